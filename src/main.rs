/// Helios - k3d cluster on OrbStack
///
/// Declares the Helios k3d machine against an orchestration engine and
/// exports its identifier and kubeconfig.
mod cluster;
mod config;
mod engine;
mod orb;
mod utils;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ClusterSettings, StackConfig};
use crate::engine::{Context, LocalEngine, OutputValue, PreviewEngine, Resolved, StackOutputs};
use crate::orb::{AdoptProvisioner, OrbCli};
use crate::utils::command::TokioCommandRunner;

#[derive(Parser)]
#[command(name = "helios")]
#[command(about = "Declare the Helios k3d cluster machine on OrbStack", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Stack configuration file path
    #[arg(short, long, default_value = "Pulumi.dev.yaml")]
    config: PathBuf,

    /// Stack name
    #[arg(short, long, default_value = "dev")]
    stack: String,

    /// Project name, used as the configuration namespace
    #[arg(short, long, default_value = config::DEFAULT_PROJECT)]
    project: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate example stack configuration file
    Init,

    /// Read or write stack configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show what would be declared without touching infrastructure
    Preview {
        /// Print outputs as JSON
        #[arg(long)]
        json: bool,
    },

    /// Bring the cluster machine up and resolve its outputs
    Up {
        /// Print secret outputs in clear text
        #[arg(long)]
        show_secrets: bool,

        /// Print outputs as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a configuration value
    Get { key: String },

    /// Store a configuration value
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("helios={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Execute command
    let result = match cli.command {
        Commands::Init => init_config(&cli.config, &cli.project).await,
        Commands::Config { ref action } => config_command(&cli, action),
        Commands::Preview { json } => preview(&cli, json).await,
        Commands::Up { show_secrets, json } => up(&cli, show_secrets, json).await,
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<StackConfig> {
    let config = StackConfig::load(&cli.config, &cli.project)
        .context("Failed to load stack configuration")?;
    Ok(config.with_env_overrides())
}

/// Preview the stack with a dry-run engine
async fn preview(cli: &Cli, json: bool) -> Result<()> {
    info!("Previewing stack {}...", cli.stack);

    let config = load_config(cli)?;
    let descriptor = ClusterSettings::resolve(&config);

    let engine = PreviewEngine::new(cli.stack.clone(), config.project());
    let mut ctx = Context::new(&engine);
    cluster::program(&mut ctx, &descriptor, OrbCli::new(TokioCommandRunner)).await?;
    let outputs = ctx.finish().await;

    let plan = engine.plan().await;
    info!("");
    info!("Resources:");
    for resource in &plan {
        info!("  + {}", resource.urn);
    }
    let yaml = serde_yaml::to_string(&plan).context("Failed to render plan")?;
    for line in yaml.lines() {
        info!("    {}", line);
    }

    print_outputs(&outputs, false, json)?;
    info!("");
    info!("{} resource(s) to create", plan.len());

    Ok(())
}

/// Run the stack against the local engine, adopting the OrbStack machine
async fn up(cli: &Cli, show_secrets: bool, json: bool) -> Result<()> {
    info!("Updating stack {}...", cli.stack);

    orb::check_orb_installed().await.context("orb is required")?;

    let config = load_config(cli)?;
    let descriptor = ClusterSettings::resolve(&config);

    let provisioner = AdoptProvisioner::new(OrbCli::new(TokioCommandRunner));
    let engine = LocalEngine::new(cli.stack.clone(), config.project(), provisioner);
    let mut ctx = Context::new(&engine);
    let machine = cluster::program(&mut ctx, &descriptor, OrbCli::new(TokioCommandRunner)).await?;
    let outputs = ctx.finish().await;

    info!("✓ Machine ready: {}", machine.urn);
    if let Ok(Resolved::Known(name)) = machine.name.resolve().await {
        info!("  Name: {}", name);
    }
    if let Ok(Resolved::Known(image_path)) = machine.image_path.resolve().await {
        info!("  Image: {}", image_path);
    }
    if let Ok(Resolved::Known(status)) = machine.status.resolve().await {
        info!("  Status: {}", status);
    }
    if let Ok(Resolved::Known(port)) = machine.api_port.resolve().await {
        info!("  API port: {}", port);
    }

    info!("");
    info!("Resources:");
    for record in engine.state().await {
        info!(
            "  {} {} (id: {}, created {})",
            record.type_token,
            record.urn,
            record.id,
            record.created.to_rfc3339()
        );
    }

    print_outputs(&outputs, show_secrets, json)?;

    if let Some(OutputValue::Known(id)) = outputs.get(cluster::CLUSTER_NAME_OUTPUT) {
        info!("");
        info!("To access your cluster:");
        info!("  helios up --show-secrets --json | jq -r .kubeconfig > kubeconfig");
        info!("  orb machine ssh {}", id);
    }

    ensure_outputs_resolved(&outputs)
}

/// Fail the run if any output could not be computed
fn ensure_outputs_resolved(outputs: &StackOutputs) -> Result<()> {
    let failures = outputs.failures();
    if !failures.is_empty() {
        for failure in &failures {
            warn!("Output '{}' could not be computed", failure.name);
        }
        anyhow::bail!("{} output(s) failed", failures.len());
    }

    Ok(())
}

fn print_outputs(outputs: &StackOutputs, show_secrets: bool, json: bool) -> Result<()> {
    if json {
        let rendered = serde_json::to_string_pretty(&outputs.to_json(show_secrets))?;
        println!("{}", rendered);
        return Ok(());
    }

    info!("");
    info!("Outputs:");
    for output in outputs.iter() {
        let value = output.display_value(show_secrets);
        if value.contains('\n') {
            info!("  {}:", output.name);
            for line in value.lines() {
                info!("    {}", line);
            }
        } else {
            info!("  {}: {}", output.name, value);
        }
    }

    Ok(())
}

/// Initialize example stack configuration file
async fn init_config(path: &Path, project: &str) -> Result<()> {
    if path.exists() {
        anyhow::bail!("Configuration file already exists: {}", path.display());
    }

    let example_config = StackConfig::example(project);
    let yaml = serde_yaml::to_string(&example_config)?;

    tokio::fs::write(path, yaml)
        .await
        .context("Failed to write configuration file")?;

    info!("Example configuration created: {}", path.display());
    info!("");
    info!("Next steps:");
    info!("  1. Edit the configuration file to match your requirements");
    info!("  2. Preview the stack:");
    info!("     helios preview");
    info!("  3. Bring the cluster up:");
    info!("     helios up");

    Ok(())
}

fn config_command(cli: &Cli, action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = load_config(cli)?;
            match config.get(key) {
                Some(value) => println!("{}", value),
                None => anyhow::bail!("Configuration key '{}' is not set", key),
            }
        }
        ConfigAction::Set { key, value } => {
            let mut config = StackConfig::load(&cli.config, &cli.project)
                .context("Failed to load stack configuration")?;
            config.set(key, value);
            config.save(&cli.config)?;
            info!("Set {} in {}", key, cli.config.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Output, OutputError};

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("helios-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("Pulumi.dev.yaml")
    }

    #[tokio::test]
    async fn test_init_writes_example_once() {
        let path = temp_path("init");

        init_config(&path, config::DEFAULT_PROJECT).await.unwrap();
        let written = StackConfig::load(&path, config::DEFAULT_PROJECT).unwrap();
        assert_eq!(
            written.get(config::CLUSTER_NAME_KEY).as_deref(),
            Some(config::DEFAULT_CLUSTER_NAME)
        );

        std::fs::write(&path, "config:\n  helios:clusterName: mine\n").unwrap();
        let err = init_config(&path, config::DEFAULT_PROJECT).await.unwrap_err();
        assert!(err.to_string().contains("already exists"));

        // Existing file is left untouched
        let kept = std::fs::read_to_string(&path).unwrap();
        assert!(kept.contains("mine"));

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_failed_output_fails_the_run() {
        let engine = PreviewEngine::new("dev", config::DEFAULT_PROJECT);
        let mut ctx = Context::new(&engine);
        ctx.export(cluster::CLUSTER_NAME_OUTPUT, Output::known("demo".to_string()));
        ctx.export_secret(
            cluster::KUBECONFIG_OUTPUT,
            Output::failed(OutputError::MalformedKubeconfig("empty output".to_string())),
        );
        let outputs = ctx.finish().await;

        let err = ensure_outputs_resolved(&outputs).unwrap_err();
        assert_eq!(err.to_string(), "1 output(s) failed");
        assert_eq!(
            outputs.get(cluster::CLUSTER_NAME_OUTPUT),
            Some(&OutputValue::Known("demo".to_string()))
        );
    }

    #[tokio::test]
    async fn test_resolved_outputs_pass() {
        let engine = PreviewEngine::new("dev", config::DEFAULT_PROJECT);
        let mut ctx = Context::new(&engine);
        ctx.export(cluster::CLUSTER_NAME_OUTPUT, Output::known("demo".to_string()));
        ctx.export_secret(cluster::KUBECONFIG_OUTPUT, Output::unknown());
        let outputs = ctx.finish().await;

        assert!(ensure_outputs_resolved(&outputs).is_ok());
    }
}
