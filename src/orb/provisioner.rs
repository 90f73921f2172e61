/// Adopt OrbStack machines into the local engine
use anyhow::Result;
use std::time::Duration;
use tracing::{debug, info};

use super::OrbCli;
use crate::engine::{PropertyMap, PropertyValue, Provisioner, ResourceRequest, ResourceState};
use crate::utils::command::CommandRunner;
use crate::utils::polling::PollingConfig;

/// Port the k3s API server listens on inside the machine
pub const DEFAULT_API_PORT: i64 = 6443;

/// Used when a request declares no create timeout
const DEFAULT_WAIT: Duration = Duration::from_secs(600);

/// Added to a declared create timeout; the engine enforces the deadline itself
const POLL_GRACE: Duration = Duration::from_secs(30);

/// Provisioner that binds to an existing OrbStack machine by name.
///
/// It waits for the machine to report `running` and never creates or
/// deletes machines itself.
pub struct AdoptProvisioner<R> {
    orb: OrbCli<R>,
    interval: Duration,
}

impl<R: CommandRunner> AdoptProvisioner<R> {
    pub fn new(orb: OrbCli<R>) -> Self {
        Self {
            orb,
            interval: Duration::from_secs(2),
        }
    }

    #[cfg(test)]
    fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl<R: CommandRunner> Provisioner for AdoptProvisioner<R> {
    async fn create(
        &self,
        request: &ResourceRequest,
        timeout: Option<Duration>,
    ) -> Result<ResourceState> {
        let name = request
            .inputs
            .get("name")
            .and_then(PropertyValue::as_str)
            .unwrap_or(request.name.as_str())
            .to_string();

        info!("Adopting OrbStack machine '{}'", name);

        let polling = PollingConfig::new(
            timeout.map_or(DEFAULT_WAIT, |after| after + POLL_GRACE),
            self.interval,
            format!("Waiting for machine '{}' to be running", name),
        );
        let machine = polling
            .poll(|| async {
                let info = self.orb.machine_info(&name).await?;
                Ok::<_, anyhow::Error>((info.state == "running").then_some(info))
            })
            .await?;

        debug!("Machine '{}' has id {:?}", machine.name, machine.id);

        let mut outputs = PropertyMap::new();
        outputs.insert("name".to_string(), machine.name.clone().into());
        outputs.insert("status".to_string(), machine.state.clone().into());
        outputs.insert("apiPort".to_string(), DEFAULT_API_PORT.into());

        Ok(ResourceState {
            id: machine.name,
            outputs,
        })
    }
}
