/// Dry-run engine that records the plan without touching infrastructure
use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use super::{
    urn, validate_request, Engine, EngineError, Output, PropertyValue, ResourceHandle,
    ResourceRequest,
};

/// A resource the program would register
#[derive(Debug, Clone, Serialize)]
pub struct PlannedResource {
    pub urn: String,
    #[serde(flatten)]
    pub request: ResourceRequest,
}

#[derive(Default)]
struct PlanState {
    registered: HashSet<String>,
    resources: Vec<PlannedResource>,
}

/// Preview engine: inputs are known, everything the provider computes is unknown
pub struct PreviewEngine {
    stack: String,
    project: String,
    state: Mutex<PlanState>,
}

impl PreviewEngine {
    pub fn new(stack: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            project: project.into(),
            state: Mutex::new(PlanState::default()),
        }
    }

    /// Resources recorded so far, in registration order
    pub async fn plan(&self) -> Vec<PlannedResource> {
        self.state.lock().await.resources.clone()
    }
}

impl Engine for PreviewEngine {
    fn stack(&self) -> &str {
        &self.stack
    }

    fn project(&self) -> &str {
        &self.project
    }

    fn is_dry_run(&self) -> bool {
        true
    }

    async fn register_resource(&self, request: ResourceRequest) -> Result<ResourceHandle, EngineError> {
        let urn = urn(&self.stack, &self.project, &request.type_token, &request.name);

        let mut state = self.state.lock().await;
        validate_request(&request, &urn, &state.registered)?;

        info!("+ {} {}", request.type_token, request.name);

        let outputs: BTreeMap<String, Output<PropertyValue>> = request
            .inputs
            .iter()
            .map(|(key, value)| (key.clone(), Output::known(value.clone())))
            .collect();

        state.registered.insert(urn.clone());
        state.resources.push(PlannedResource {
            urn: urn.clone(),
            request,
        });

        Ok(ResourceHandle::new(urn, Output::unknown(), outputs, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Resolved, PROVIDER_TYPE_PREFIX};

    #[tokio::test]
    async fn test_preview_records_plan() {
        let engine = PreviewEngine::new("dev", "helios");
        let provider = engine
            .register_resource(ResourceRequest::new(
                format!("{}orbstack", PROVIDER_TYPE_PREFIX),
                "orbstack-provider",
            ))
            .await
            .unwrap();

        let handle = engine
            .register_resource(
                ResourceRequest::new("orbstack:index:Machine", "demo")
                    .input("name", "demo")
                    .provider(provider.provider_ref()),
            )
            .await
            .unwrap();

        assert_eq!(handle.id.resolve().await.unwrap(), Resolved::Unknown);
        assert_eq!(
            handle.string_output("name").resolve().await.unwrap(),
            Resolved::Known("demo".to_string())
        );
        assert_eq!(
            handle.string_output("status").resolve().await.unwrap(),
            Resolved::Unknown
        );

        let plan = engine.plan().await;
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[1].urn, "urn:pulumi:dev::helios::orbstack:index:Machine::demo");
    }

    #[tokio::test]
    async fn test_preview_rejects_duplicates() {
        let engine = PreviewEngine::new("dev", "helios");
        let request = ResourceRequest::new("orbstack:index:Machine", "demo");
        engine.register_resource(request.clone()).await.unwrap();

        let err = engine.register_resource(request).await.unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
