/// OrbStack CLI operations
pub mod provisioner;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::engine::OutputError;
use crate::utils::command::CommandRunner;

pub use provisioner::AdoptProvisioner;

/// OrbStack command-line tool
pub const ORB_BINARY: &str = "orb";

/// Where k3s writes the cluster kubeconfig inside the machine
pub const KUBECONFIG_PATH: &str = "/home/core/.kube/config";

/// Machine details as reported by `orb info --format json`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MachineInfo {
    pub name: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub state: String,
}

/// Check if orb is installed
pub async fn check_orb_installed() -> Result<()> {
    crate::utils::command::check_tool_installed(
        ORB_BINARY,
        &["version"],
        "https://orbstack.dev/download",
    )
    .await
}

/// Client for the `orb` CLI
pub struct OrbCli<R> {
    runner: Arc<R>,
}

impl<R> Clone for OrbCli<R> {
    fn clone(&self) -> Self {
        Self {
            runner: self.runner.clone(),
        }
    }
}

impl<R: CommandRunner> OrbCli<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner: Arc::new(runner),
        }
    }

    #[cfg(test)]
    pub(crate) fn runner(&self) -> &R {
        &self.runner
    }

    /// Read the kubeconfig of a machine over `orb machine ssh`.
    ///
    /// Only stdout becomes the value; stderr is used for error messages.
    pub async fn machine_kubeconfig(&self, machine_id: &str) -> Result<String, OutputError> {
        let remote = format!("cat {}", KUBECONFIG_PATH);
        let args = ["machine", "ssh", machine_id, "-c", remote.as_str()];
        let command = format!("{} {}", ORB_BINARY, args.join(" "));
        debug!("Fetching kubeconfig: {}", command);

        let output = self
            .runner
            .output(ORB_BINARY, &args)
            .await
            .map_err(|e| OutputError::Command {
                command: command.clone(),
                reason: format!("{:#}", e),
            })?;

        if !output.success() {
            let stderr = output.stderr.trim();
            let reason = if stderr.is_empty() {
                output.status.to_string()
            } else {
                format!("{}: {}", output.status, stderr)
            };
            return Err(OutputError::Command { command, reason });
        }

        let kubeconfig =
            String::from_utf8(output.stdout).map_err(|_| OutputError::Decode { command })?;
        validate_kubeconfig(&kubeconfig)?;

        Ok(kubeconfig)
    }

    /// Look up a machine by name
    pub async fn machine_info(&self, name: &str) -> Result<MachineInfo> {
        let stdout = self
            .runner
            .output(ORB_BINARY, &["info", name, "--format", "json"])
            .await?
            .into_result()
            .with_context(|| format!("Failed to query OrbStack machine '{}'", name))?;

        parse_machine_info(&stdout)
    }
}

/// Accepts both a bare machine object and one wrapped in `{"record": ...}`
fn parse_machine_info(json: &str) -> Result<MachineInfo> {
    let value: serde_json::Value =
        serde_json::from_str(json).context("Failed to parse orb info output")?;
    let record = value.get("record").cloned().unwrap_or(value);
    serde_json::from_value(record).context("Unexpected orb info output")
}

/// A usable kubeconfig is a YAML mapping with `apiVersion` and `clusters`
pub fn validate_kubeconfig(contents: &str) -> Result<(), OutputError> {
    if contents.trim().is_empty() {
        return Err(OutputError::MalformedKubeconfig("empty output".to_string()));
    }

    let value: serde_yaml::Value = serde_yaml::from_str(contents)
        .map_err(|e| OutputError::MalformedKubeconfig(e.to_string()))?;
    let mapping = value
        .as_mapping()
        .ok_or_else(|| OutputError::MalformedKubeconfig("not a YAML mapping".to_string()))?;

    for key in ["apiVersion", "clusters"] {
        if !mapping.contains_key(key) {
            return Err(OutputError::MalformedKubeconfig(format!(
                "missing '{}'",
                key
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::utils::command::CommandOutput;
    use std::future::Future;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex;

    pub const KUBECONFIG: &str = "apiVersion: v1\nkind: Config\nclusters:\n- name: demo\n  cluster:\n    server: https://127.0.0.1:6443\n";

    /// Canned reply for one invocation
    #[derive(Clone)]
    pub enum Reply {
        Exit { code: i32, stdout: Vec<u8>, stderr: String },
        SpawnError(String),
    }

    impl Reply {
        pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
            Reply::Exit {
                code: 0,
                stdout: stdout.into(),
                stderr: String::new(),
            }
        }

        pub fn fail(code: i32, stderr: &str) -> Self {
            Reply::Exit {
                code,
                stdout: Vec::new(),
                stderr: stderr.to_string(),
            }
        }
    }

    /// Records every invocation and answers from a reply list; the last
    /// reply repeats once the list is exhausted
    pub struct FakeRunner {
        replies: Mutex<Vec<Reply>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeRunner {
        pub fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CommandRunner for FakeRunner {
        fn output(
            &self,
            program: &str,
            args: &[&str],
        ) -> impl Future<Output = Result<CommandOutput>> + Send {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().map(|a| a.to_string()));
            self.calls.lock().unwrap().push(call);

            let reply = {
                let mut replies = self.replies.lock().unwrap();
                if replies.len() > 1 {
                    replies.remove(0)
                } else {
                    replies[0].clone()
                }
            };

            let result = match reply {
                Reply::Exit {
                    code,
                    stdout,
                    stderr,
                } => Ok(CommandOutput {
                    stdout,
                    stderr,
                    status: ExitStatus::from_raw(code << 8),
                }),
                Reply::SpawnError(message) => Err(anyhow::anyhow!(message)),
            };
            futures::future::ready(result)
        }
    }
}
