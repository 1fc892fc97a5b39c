//! Worker and generator interfaces.
//!
//! The engine never performs I/O itself: every node execution goes through
//! a [`Worker`], and every dynamic node's generator call goes through a
//! [`Generator`]. Both are synchronous and blocking; the executor moves them
//! onto blocking threads.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::graph::{GeneratorCall, WorkerConfig};
use crate::error::{Error, Result};
use crate::tlog_debug;
use crate::util::blocking;

/// Output of one worker or generator call.
///
/// A present `error` marks the call as failed; `output` may still carry
/// whatever partial text the worker produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerResponse {
    pub fn success(output: &str) -> Self {
        Self {
            output: output.to_string(),
            error: None,
        }
    }

    pub fn failure(error: &str) -> Self {
        Self {
            output: String::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Performs one node's work.
pub trait Worker: Send + Sync {
    fn invoke(&self, task: &str, context: &str, config: &WorkerConfig) -> WorkerResponse;
}

/// Performs a dynamic node's generator call.
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str, call: &GeneratorCall) -> WorkerResponse;
}

impl<F> Worker for F
where
    F: Fn(&str, &str, &WorkerConfig) -> WorkerResponse + Send + Sync,
{
    fn invoke(&self, task: &str, context: &str, config: &WorkerConfig) -> WorkerResponse {
        self(task, context, config)
    }
}

impl<F> Generator for F
where
    F: Fn(&str, &GeneratorCall) -> WorkerResponse + Send + Sync,
{
    fn generate(&self, prompt: &str, call: &GeneratorCall) -> WorkerResponse {
        self(prompt, call)
    }
}

/// Invoke a worker on the blocking pool. A panicking worker becomes a
/// failed response.
pub async fn invoke_blocking(
    worker: Arc<dyn Worker>,
    task: String,
    context: String,
    config: WorkerConfig,
) -> WorkerResponse {
    blocking(move || worker.invoke(&task, &context, &config))
        .await
        .unwrap_or_else(|e| WorkerResponse::failure(&e.to_string()))
}

/// Call a generator on the blocking pool. A panicking generator becomes a
/// failed response.
pub async fn generate_blocking(
    generator: Arc<dyn Generator>,
    prompt: String,
    call: GeneratorCall,
) -> WorkerResponse {
    blocking(move || generator.generate(&prompt, &call))
        .await
        .unwrap_or_else(|e| WorkerResponse::failure(&e.to_string()))
}

/// Build the full prompt for a worker call.
pub fn compose_prompt(config: &WorkerConfig, task: &str, context: &str) -> String {
    let mut parts = vec![format!("You are: {}", config.role)];
    if !context.is_empty() {
        parts.push(format!("Context from previous work:\n{}", context));
    }
    parts.push(format!("Task:\n{}", task));
    if !config.instruction.is_empty() {
        parts.push(format!("Your specific assignment:\n{}", config.instruction));
    }
    parts.join("\n\n")
}

/// Worker backed by an external command.
///
/// The prompt is written to the command's stdin and its stdout becomes the
/// output. A non-zero exit status is reported as a worker error carrying
/// stderr.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandWorker {
    /// Resolve `command` on `PATH`.
    pub fn new(command: &str, args: Vec<String>) -> Result<Self> {
        let program =
            which::which(command).map_err(|_| Error::CommandNotFound(command.to_string()))?;
        Ok(Self { program, args })
    }

    /// Use an explicit program path without resolving it.
    pub fn with_program(program: PathBuf, args: Vec<String>) -> Self {
        Self { program, args }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn run(&self, prompt: &str) -> WorkerResponse {
        tlog_debug!(
            "CommandWorker::run program={} prompt_len={}",
            self.program.display(),
            prompt.len()
        );
        match self.spawn(prompt) {
            Ok(response) => response,
            Err(e) => WorkerResponse::failure(&format!(
                "failed to run {}: {}",
                self.program.display(),
                e
            )),
        }
    }

    fn spawn(&self, prompt: &str) -> std::io::Result<WorkerResponse> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Feed stdin from a separate thread so a chatty child cannot fill
        // its stdout pipe while we are still writing.
        let stdin = child.stdin.take();
        let payload = prompt.to_string();
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(payload.as_bytes())?;
            }
            Ok(())
        });

        let output = child.wait_with_output()?;
        // A child that exits without reading stdin yields a broken pipe here.
        let _ = writer.join();
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            return Ok(WorkerResponse::success(&stdout));
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Ok(WorkerResponse {
            output: stdout,
            error: Some(format!("exited with {}: {}", code, stderr)),
        })
    }
}

impl Worker for CommandWorker {
    fn invoke(&self, task: &str, context: &str, config: &WorkerConfig) -> WorkerResponse {
        self.run(&compose_prompt(config, task, context))
    }
}

impl Generator for CommandWorker {
    fn generate(&self, prompt: &str, _call: &GeneratorCall) -> WorkerResponse {
        self.run(prompt)
    }
}
