/// Host orchestration engine interface
///
/// Programs describe resources and outputs through a [`Context`]; an
/// [`Engine`] implementation decides what registering a resource means
/// (recording a plan, or provisioning through a [`local::Provisioner`]).
pub mod error;
pub mod local;
pub mod output;
pub mod preview;
pub mod timeouts;

use std::collections::{BTreeMap, HashSet};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use error::{EngineError, OutputError};
pub use local::{LocalEngine, Provisioner, ResourceState};
pub use output::{Output, Resolved};
pub use preview::PreviewEngine;
pub use timeouts::CustomTimeouts;

/// Type token prefix shared by all provider resources
pub const PROVIDER_TYPE_PREFIX: &str = "pulumi:providers:";

/// A single resource property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    String(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

/// Resource inputs or outputs, keyed by property name
pub type PropertyMap = BTreeMap<String, PropertyValue>;

/// Reference to a registered provider resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRef {
    pub urn: String,
}

/// Everything a program hands to the engine for one resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequest {
    #[serde(rename = "type")]
    pub type_token: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderRef>,
    pub inputs: PropertyMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<CustomTimeouts>,
}

impl ResourceRequest {
    pub fn new(type_token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_token: type_token.into(),
            name: name.into(),
            provider: None,
            inputs: PropertyMap::new(),
            timeouts: None,
        }
    }

    pub fn input(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.inputs.insert(key.to_string(), value.into());
        self
    }

    pub fn provider(mut self, provider: ProviderRef) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn timeouts(mut self, timeouts: CustomTimeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    pub fn is_provider(&self) -> bool {
        self.type_token.starts_with(PROVIDER_TYPE_PREFIX)
    }
}

/// Build a resource URN
pub fn urn(stack: &str, project: &str, type_token: &str, name: &str) -> String {
    format!("urn:pulumi:{}::{}::{}::{}", stack, project, type_token, name)
}

/// Checks shared by every engine before a request is accepted
pub(crate) fn validate_request(
    request: &ResourceRequest,
    urn: &str,
    registered: &HashSet<String>,
) -> Result<(), EngineError> {
    let invalid = |reason: String| EngineError::InvalidRequest {
        name: request.name.clone(),
        reason,
    };

    if request.name.is_empty() {
        return Err(invalid("resource name cannot be empty".to_string()));
    }

    let segments: Vec<&str> = request.type_token.split(':').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(invalid(format!(
            "type token '{}' is not of the form package:module:Type",
            request.type_token
        )));
    }

    if registered.contains(urn) {
        return Err(invalid(format!("duplicate resource {}", urn)));
    }

    if let Some(provider) = &request.provider {
        if !registered.contains(&provider.urn) {
            return Err(EngineError::UnknownProvider(provider.urn.clone()));
        }
    }

    if let Some(timeouts) = &request.timeouts {
        timeouts.parse()?;
    }

    Ok(())
}

/// Handle to a registered resource; attributes resolve asynchronously
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    pub urn: String,
    pub id: Output<String>,
    outputs: BTreeMap<String, Output<PropertyValue>>,
    dry_run: bool,
}

impl ResourceHandle {
    pub fn new(
        urn: String,
        id: Output<String>,
        outputs: BTreeMap<String, Output<PropertyValue>>,
        dry_run: bool,
    ) -> Self {
        Self {
            urn,
            id,
            outputs,
            dry_run,
        }
    }

    /// Raw output attribute. Missing attributes are unknown during a dry
    /// run and null otherwise.
    pub fn output(&self, key: &str) -> Output<PropertyValue> {
        match self.outputs.get(key) {
            Some(output) => output.clone(),
            None if self.dry_run => Output::unknown(),
            None => Output::known(PropertyValue::Null),
        }
    }

    pub fn string_output(&self, key: &str) -> Output<String> {
        let key = key.to_string();
        self.output(&key).map(move |value| match value {
            PropertyValue::String(s) => Ok(s),
            _ => Err(OutputError::UnexpectedType {
                key,
                expected: "string",
            }),
        })
    }

    pub fn int_output(&self, key: &str) -> Output<i64> {
        let key = key.to_string();
        self.output(&key).map(move |value| {
            value.as_int().ok_or(OutputError::UnexpectedType {
                key,
                expected: "integer",
            })
        })
    }

    pub fn provider_ref(&self) -> ProviderRef {
        ProviderRef {
            urn: self.urn.clone(),
        }
    }
}

/// The orchestration runtime a program runs against
#[allow(async_fn_in_trait)]
pub trait Engine {
    fn stack(&self) -> &str;

    fn project(&self) -> &str;

    /// True when registering resources must not touch real infrastructure
    fn is_dry_run(&self) -> bool;

    /// Register a resource and return a handle to its (eventual) state
    async fn register_resource(&self, request: ResourceRequest) -> Result<ResourceHandle, EngineError>;
}

struct Export {
    name: String,
    value: Output<String>,
    secret: bool,
}

/// Program-facing view of an engine plus the table of exported outputs
pub struct Context<'a, E: Engine> {
    engine: &'a E,
    exports: Vec<Export>,
}

impl<'a, E: Engine> Context<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self {
            engine,
            exports: Vec::new(),
        }
    }

    pub fn engine(&self) -> &E {
        self.engine
    }

    pub async fn register_resource(
        &self,
        request: ResourceRequest,
    ) -> Result<ResourceHandle, EngineError> {
        debug!(
            "Registering {} '{}' with {} input(s) in {}/{}",
            request.type_token,
            request.name,
            request.inputs.len(),
            self.engine.project(),
            self.engine.stack()
        );
        self.engine.register_resource(request).await
    }

    pub fn export(&mut self, name: &str, value: Output<String>) {
        self.push_export(name, value, false);
    }

    /// Export an output whose value must not be printed by default
    pub fn export_secret(&mut self, name: &str, value: Output<String>) {
        self.push_export(name, value, true);
    }

    fn push_export(&mut self, name: &str, value: Output<String>, secret: bool) {
        if self.exports.iter().any(|e| e.name == name) {
            warn!("Output '{}' exported twice, keeping the latest value", name);
            self.exports.retain(|e| e.name != name);
        }
        self.exports.push(Export {
            name: name.to_string(),
            value,
            secret,
        });
    }

    /// Resolve every export concurrently. Failures stay scoped to their output.
    pub async fn finish(self) -> StackOutputs {
        let resolutions = self.exports.iter().map(|export| export.value.resolve());
        let results = join_all(resolutions).await;

        let outputs = self
            .exports
            .into_iter()
            .zip(results)
            .map(|(export, result)| {
                let value = match result {
                    Ok(Resolved::Known(value)) => OutputValue::Known(value),
                    Ok(Resolved::Unknown) => OutputValue::Unknown,
                    Err(e) => {
                        warn!("Output '{}' failed: {}", export.name, e);
                        OutputValue::Failed(e.to_string())
                    }
                };
                StackOutput {
                    name: export.name,
                    value,
                    secret: export.secret,
                }
            })
            .collect();

        StackOutputs { outputs }
    }
}

/// Final state of an exported output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputValue {
    Known(String),
    Unknown,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct StackOutput {
    pub name: String,
    pub value: OutputValue,
    pub secret: bool,
}

impl StackOutput {
    /// Human-readable value, masking secrets unless asked not to
    pub fn display_value(&self, show_secrets: bool) -> String {
        match &self.value {
            OutputValue::Known(_) if self.secret && !show_secrets => "[secret]".to_string(),
            OutputValue::Known(value) => value.clone(),
            OutputValue::Unknown => "<computed>".to_string(),
            OutputValue::Failed(reason) => format!("<failed: {}>", reason),
        }
    }
}

/// Resolved exports of one run, in export order
#[derive(Debug, Clone, Default)]
pub struct StackOutputs {
    outputs: Vec<StackOutput>,
}

impl StackOutputs {
    pub fn iter(&self) -> impl Iterator<Item = &StackOutput> {
        self.outputs.iter()
    }

    pub fn get(&self, name: &str) -> Option<&OutputValue> {
        self.outputs.iter().find(|o| o.name == name).map(|o| &o.value)
    }

    pub fn failures(&self) -> Vec<&StackOutput> {
        self.outputs
            .iter()
            .filter(|o| matches!(o.value, OutputValue::Failed(_)))
            .collect()
    }

    pub fn to_json(&self, show_secrets: bool) -> serde_json::Value {
        let map = self
            .outputs
            .iter()
            .map(|o| {
                let value = match &o.value {
                    OutputValue::Known(_) if o.secret && !show_secrets => {
                        serde_json::Value::String("[secret]".to_string())
                    }
                    OutputValue::Known(value) => serde_json::Value::String(value.clone()),
                    OutputValue::Unknown => serde_json::Value::Null,
                    OutputValue::Failed(reason) => serde_json::json!({ "error": reason }),
                };
                (o.name.clone(), value)
            })
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}
