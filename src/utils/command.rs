/// Command execution utilities
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::future::Future;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;

/// Result from command execution with captured output
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Raw stdout bytes; decoding is left to the caller
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub status: ExitStatus,
}

impl CommandOutput {
    /// Create from tokio Command output
    fn from_output(output: std::process::Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status,
        }
    }

    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Return stdout if successful, otherwise error with stderr
    pub fn into_result(self) -> Result<String> {
        if self.success() {
            Ok(String::from_utf8_lossy(&self.stdout).to_string())
        } else {
            anyhow::bail!("{} ({})", self.stderr.trim(), self.status)
        }
    }
}

/// Builder for executing external commands with common patterns
pub struct CommandBuilder {
    command: Command,
    context_msg: Option<String>,
}

impl CommandBuilder {
    /// Create a new command builder; stdin is closed, stdout/stderr are piped
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        let mut command = Command::new(program);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Self {
            command,
            context_msg: None,
        }
    }

    /// Add a single argument
    #[allow(dead_code)]
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.command.arg(arg);
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.command.args(args);
        self
    }

    /// Set context message for error reporting
    pub fn context<S: Into<String>>(mut self, msg: S) -> Self {
        self.context_msg = Some(msg.into());
        self
    }

    /// Execute and return raw output
    pub async fn output(mut self) -> Result<CommandOutput> {
        let output = if let Some(ctx) = &self.context_msg {
            self.command.output().await.context(ctx.clone())?
        } else {
            self.command.output().await?
        };
        Ok(CommandOutput::from_output(output))
    }
}

/// Runs external programs; swapped for canned results in tests
pub trait CommandRunner: Send + Sync + 'static {
    /// Run `program` with `args` to completion. Spawn failures are errors,
    /// a nonzero exit is reported through [`CommandOutput::status`].
    fn output(
        &self,
        program: &str,
        args: &[&str],
    ) -> impl Future<Output = Result<CommandOutput>> + Send;
}

/// Production runner backed by tokio::process. Applies no timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioCommandRunner;

impl CommandRunner for TokioCommandRunner {
    fn output(
        &self,
        program: &str,
        args: &[&str],
    ) -> impl Future<Output = Result<CommandOutput>> + Send {
        let builder = CommandBuilder::new(program)
            .args(args)
            .context(format!("Failed to execute {}", program));
        builder.output()
    }
}

/// Check if a command-line tool is installed
pub async fn check_tool_installed(
    tool_name: &str,
    version_args: &[&str],
    install_url: &str,
) -> Result<()> {
    let output = CommandBuilder::new(tool_name)
        .args(version_args)
        .output()
        .await;

    match output {
        Ok(out) if out.success() => Ok(()),
        _ => anyhow::bail!(
            "{} is not installed or not in PATH. Please install from {}",
            tool_name,
            install_url
        ),
    }
}
