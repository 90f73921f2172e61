/// In-process engine that drives resource creation through a provisioner
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{
    urn, validate_request, Engine, EngineError, Output, PropertyMap, PropertyValue,
    ResourceHandle, ResourceRequest,
};

/// What a provisioner reports once a resource exists
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState {
    pub id: String,
    pub outputs: PropertyMap,
}

/// The provider-side seam of [`LocalEngine`]
#[allow(async_fn_in_trait)]
pub trait Provisioner {
    /// Bring the resource into existence and report its state.
    /// `timeout` is the declared create timeout, if any.
    async fn create(
        &self,
        request: &ResourceRequest,
        timeout: Option<Duration>,
    ) -> anyhow::Result<ResourceState>;
}

/// A resource known to the local engine
#[derive(Debug, Clone, Serialize)]
pub struct ResourceRecord {
    pub urn: String,
    #[serde(rename = "type")]
    pub type_token: String,
    pub id: String,
    pub inputs: PropertyMap,
    pub outputs: PropertyMap,
    pub created: DateTime<Utc>,
}

#[derive(Default)]
struct LocalState {
    registered: HashSet<String>,
    resources: Vec<ResourceRecord>,
}

/// Local engine; provider resources resolve in-process, everything else goes
/// through the provisioner under the declared create timeout
pub struct LocalEngine<P> {
    stack: String,
    project: String,
    provisioner: P,
    state: Mutex<LocalState>,
}

impl<P: Provisioner> LocalEngine<P> {
    pub fn new(stack: impl Into<String>, project: impl Into<String>, provisioner: P) -> Self {
        Self {
            stack: stack.into(),
            project: project.into(),
            provisioner,
            state: Mutex::new(LocalState::default()),
        }
    }

    /// Snapshot of every registered resource
    pub async fn state(&self) -> Vec<ResourceRecord> {
        self.state.lock().await.resources.clone()
    }

    async fn provision(&self, request: &ResourceRequest) -> Result<ResourceState, EngineError> {
        if request.is_provider() {
            return Ok(ResourceState {
                id: request.name.clone(),
                outputs: PropertyMap::new(),
            });
        }

        let create_timeout = match &request.timeouts {
            Some(timeouts) => timeouts.parse()?.create,
            None => None,
        };

        let creation = self.provisioner.create(request, create_timeout);
        let result = match create_timeout {
            Some(after) => tokio::time::timeout(after, creation)
                .await
                .map_err(|_| EngineError::Timeout {
                    operation: "create",
                    name: request.name.clone(),
                    after,
                })?,
            None => creation.await,
        };

        result.map_err(|e| EngineError::Provisioner {
            name: request.name.clone(),
            message: format!("{:#}", e),
        })
    }
}

impl<P: Provisioner> Engine for LocalEngine<P> {
    fn stack(&self) -> &str {
        &self.stack
    }

    fn project(&self) -> &str {
        &self.project
    }

    fn is_dry_run(&self) -> bool {
        false
    }

    async fn register_resource(&self, request: ResourceRequest) -> Result<ResourceHandle, EngineError> {
        let urn = urn(&self.stack, &self.project, &request.type_token, &request.name);

        {
            let state = self.state.lock().await;
            validate_request(&request, &urn, &state.registered)?;
        }

        info!("Creating {} '{}'...", request.type_token, request.name);
        let resource = self.provision(&request).await?;
        debug!("{} resolved to id {}", urn, resource.id);

        let mut outputs = request.inputs.clone();
        outputs.extend(resource.outputs.clone());

        let handle_outputs: BTreeMap<String, Output<PropertyValue>> = outputs
            .iter()
            .map(|(key, value)| (key.clone(), Output::known(value.clone())))
            .collect();

        let mut state = self.state.lock().await;
        if !state.registered.insert(urn.clone()) {
            return Err(EngineError::InvalidRequest {
                name: request.name,
                reason: format!("duplicate resource {}", urn),
            });
        }
        state.resources.push(ResourceRecord {
            urn: urn.clone(),
            type_token: request.type_token,
            id: resource.id.clone(),
            inputs: request.inputs,
            outputs,
            created: Utc::now(),
        });

        info!("✓ Created {}", urn);

        Ok(ResourceHandle::new(
            urn,
            Output::known(resource.id),
            handle_outputs,
            false,
        ))
    }
}
