/// The k3d cluster program: one OrbStack machine plus its exported outputs
use anyhow::{Context as _, Result};
use tracing::info;

use crate::engine::{
    Context, CustomTimeouts, Engine, Output, ResourceRequest, PROVIDER_TYPE_PREFIX,
};
use crate::orb::OrbCli;
use crate::utils::command::CommandRunner;

pub const MACHINE_TYPE: &str = "orbstack:index:Machine";
pub const PROVIDER_PACKAGE: &str = "orbstack";
pub const PROVIDER_NAME: &str = "orbstack-provider";

pub const MEMORY_GB: i64 = 4;
pub const CPU_COUNT: i64 = 2;

pub const CREATE_TIMEOUT: &str = "10m";
pub const UPDATE_TIMEOUT: &str = "5m";
pub const DELETE_TIMEOUT: &str = "5m";

pub const CLUSTER_NAME_OUTPUT: &str = "clusterName";
pub const KUBECONFIG_OUTPUT: &str = "kubeconfig";

/// Desired shape of the cluster machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDescriptor {
    pub name: String,
    pub image_path: String,
    pub memory_gb: i64,
    pub cpu_count: i64,
}

impl ClusterDescriptor {
    /// Memory and CPU are fixed; only name and image come from configuration
    pub fn new(name: String, image_path: String) -> Self {
        Self {
            name,
            image_path,
            memory_gb: MEMORY_GB,
            cpu_count: CPU_COUNT,
        }
    }

    /// Machine registration request for this descriptor
    pub fn request(&self) -> ResourceRequest {
        ResourceRequest::new(MACHINE_TYPE, self.name.as_str())
            .input("name", self.name.as_str())
            .input("imagePath", self.image_path.as_str())
            .input("memoryGB", self.memory_gb)
            .input("cpuCount", self.cpu_count)
            .timeouts(CustomTimeouts::new(
                CREATE_TIMEOUT,
                UPDATE_TIMEOUT,
                DELETE_TIMEOUT,
            ))
    }
}

/// A registered machine and its output attributes
#[derive(Debug, Clone)]
pub struct Machine {
    pub urn: String,
    pub id: Output<String>,
    pub name: Output<String>,
    pub image_path: Output<String>,
    pub status: Output<String>,
    pub api_port: Output<i64>,
}

/// Register the provider and the cluster machine
pub async fn declare_cluster<E: Engine>(
    ctx: &Context<'_, E>,
    descriptor: &ClusterDescriptor,
) -> Result<Machine> {
    let provider = ctx
        .register_resource(ResourceRequest::new(
            format!("{}{}", PROVIDER_TYPE_PREFIX, PROVIDER_PACKAGE),
            PROVIDER_NAME,
        ))
        .await
        .context("Failed to register OrbStack provider")?;

    let handle = ctx
        .register_resource(descriptor.request().provider(provider.provider_ref()))
        .await
        .with_context(|| format!("Failed to declare machine '{}'", descriptor.name))?;

    Ok(Machine {
        name: handle.string_output("name"),
        image_path: handle.string_output("imagePath"),
        status: handle.string_output("status"),
        api_port: handle.int_output("apiPort"),
        id: handle.id.clone(),
        urn: handle.urn,
    })
}

/// Export the machine id and the kubeconfig derived from it
pub fn export_outputs<E: Engine, R: CommandRunner>(
    ctx: &mut Context<'_, E>,
    machine: &Machine,
    orb: OrbCli<R>,
) {
    ctx.export(CLUSTER_NAME_OUTPUT, machine.id.clone());

    let kubeconfig = machine.id.apply(move |id| async move {
        info!("Fetching kubeconfig from machine '{}'", id);
        orb.machine_kubeconfig(&id).await
    });
    ctx.export_secret(KUBECONFIG_OUTPUT, kubeconfig);
}

/// Declare the cluster and publish its outputs
pub async fn program<E: Engine, R: CommandRunner>(
    ctx: &mut Context<'_, E>,
    descriptor: &ClusterDescriptor,
    orb: OrbCli<R>,
) -> Result<Machine> {
    if ctx.engine().is_dry_run() {
        info!("Dry run: provider outputs will be unknown");
    }
    info!("Cluster name: {}", descriptor.name);
    info!("Image path: {}", descriptor.image_path);

    let machine = declare_cluster(ctx, descriptor).await?;
    export_outputs(ctx, &machine, orb);

    Ok(machine)
}
