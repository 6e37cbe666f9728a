//! Transform pipeline
//!
//! A chain of transforms runs over an in-memory buffer. Each step receives
//! the previous step's output on stdin. The pipeline never touches a
//! clipboard or a slot: callers write the result only when the whole chain
//! succeeded, so a failed step leaves the destination untouched.

pub mod builtin;

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

pub use builtin::Builtin;

use crate::config::{ConfigError, FxConfig};

/// Default per-step timeout
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// How a transform is executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Program and arguments, run without a shell
    Argv(Vec<String>),
    /// Command line interpreted by `sh -c`
    Shell(String),
    /// Implemented inside clipslot
    Builtin(Builtin),
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Invocation::Argv(argv) => write!(f, "{}", argv.join(" ")),
            Invocation::Shell(cmd) => write!(f, "sh -c '{}'", cmd),
            Invocation::Builtin(b) => write!(f, "builtin:{}", b.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transform {
    pub name: String,
    pub invocation: Invocation,
    pub description: String,
}

impl Transform {
    pub fn argv<S: Into<String>>(name: &str, argv: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.to_string(),
            invocation: Invocation::Argv(argv.into_iter().map(Into::into).collect()),
            description: String::new(),
        }
    }

    pub fn shell(name: &str, command: &str) -> Self {
        Self {
            name: name.to_string(),
            invocation: Invocation::Shell(command.to_string()),
            description: String::new(),
        }
    }

    pub fn builtin(builtin: Builtin) -> Self {
        Self {
            name: builtin.name().to_string(),
            invocation: Invocation::Builtin(builtin),
            description: builtin.description().to_string(),
        }
    }

    fn from_config(name: &str, fx: &FxConfig) -> Result<Self, ConfigError> {
        let invocation = match (&fx.cmd, &fx.shell) {
            (Some(argv), None) if !argv.is_empty() => Invocation::Argv(argv.clone()),
            (None, Some(shell)) if !shell.trim().is_empty() => Invocation::Shell(shell.clone()),
            _ => {
                return Err(ConfigError::Validation(format!(
                    "fx.{} needs exactly one of cmd or shell",
                    name
                )))
            }
        };

        Ok(Self {
            name: name.to_string(),
            invocation,
            description: fx.description.clone(),
        })
    }
}

/// Transform failures. Every variant names the step that failed.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("transform '{step}' could not be started: {source}")]
    Spawn {
        step: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transform '{step}' exited with {status}{}", stderr_suffix(.stderr))]
    Failed {
        step: String,
        status: String,
        stderr: String,
    },

    #[error("transform '{step}' produced no output")]
    EmptyOutput { step: String },

    #[error("transform '{step}' timed out after {}s", .timeout.as_secs())]
    Timeout { step: String, timeout: Duration },

    #[error("transform '{step}' failed: {reason}")]
    Builtin { step: String, reason: String },
}

impl TransformError {
    /// Name of the failing step
    pub fn step(&self) -> &str {
        match self {
            TransformError::Spawn { step, .. }
            | TransformError::Failed { step, .. }
            | TransformError::EmptyOutput { step }
            | TransformError::Timeout { step, .. }
            | TransformError::Builtin { step, .. } => step,
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

/// Transforms available by name: builtins plus `[fx.*]` from the config
#[derive(Debug, Clone)]
pub struct FxRegistry {
    transforms: BTreeMap<String, Transform>,
}

impl FxRegistry {
    /// Only the builtin transforms
    pub fn builtins() -> Self {
        let transforms = Builtin::ALL
            .into_iter()
            .map(|b| (b.name().to_string(), Transform::builtin(b)))
            .collect();
        Self { transforms }
    }

    /// Builtins overlaid with configured transforms of the same name
    pub fn from_config(fx: &BTreeMap<String, FxConfig>) -> Result<Self, ConfigError> {
        let mut registry = Self::builtins();
        for (name, config) in fx {
            registry
                .transforms
                .insert(name.clone(), Transform::from_config(name, config)?);
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&Transform> {
        self.transforms.get(name)
    }

    /// All transforms, sorted by name
    pub fn iter(&self) -> impl Iterator<Item = &Transform> {
        self.transforms.values()
    }

    /// Turn a list of names into a chain, failing on the first unknown name
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Transform>, ConfigError> {
        names
            .iter()
            .map(|name| {
                let name = name.as_ref().trim();
                self.get(name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownTransform(name.to_string()))
            })
            .collect()
    }
}

/// Runs transform chains
#[derive(Debug, Clone)]
pub struct Pipeline {
    step_timeout: Duration,
    shell: String,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            step_timeout: DEFAULT_STEP_TIMEOUT,
            shell: "sh".to_string(),
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Run `chain` over `input`.
    ///
    /// Dry runs execute exactly the same steps; the flag only changes what
    /// the caller does with the result.
    pub async fn run_chain(
        &self,
        input: &[u8],
        chain: &[Transform],
        dry_run: bool,
    ) -> Result<Vec<u8>, TransformError> {
        if chain.is_empty() {
            return Ok(input.to_vec());
        }

        let names: Vec<&str> = chain.iter().map(|t| t.name.as_str()).collect();
        info!(chain = %names.join(","), dry_run, size = input.len(), "running transform chain");

        let mut buffer = input.to_vec();
        for transform in chain {
            buffer = self.run_step(transform, &buffer).await?;
            debug!(step = %transform.name, size = buffer.len(), "transform step finished");
        }

        Ok(buffer)
    }

    async fn run_step(&self, transform: &Transform, input: &[u8]) -> Result<Vec<u8>, TransformError> {
        let step = || transform.name.clone();

        let output = match &transform.invocation {
            Invocation::Builtin(builtin) => builtin
                .apply(input)
                .map_err(|reason| TransformError::Builtin {
                    step: step(),
                    reason,
                })?,
            Invocation::Argv(argv) => {
                let (program, args) = argv.split_first().ok_or_else(|| TransformError::Spawn {
                    step: step(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty argv"),
                })?;
                let mut command = Command::new(program);
                command.args(args);
                self.run_process(transform, command, input).await?
            }
            Invocation::Shell(script) => {
                let mut command = Command::new(&self.shell);
                command.arg("-c").arg(script);
                self.run_process(transform, command, input).await?
            }
        };

        if output.is_empty() {
            return Err(TransformError::EmptyOutput { step: step() });
        }

        Ok(output)
    }

    async fn run_process(
        &self,
        transform: &Transform,
        mut command: Command,
        input: &[u8],
    ) -> Result<Vec<u8>, TransformError> {
        let step = || transform.name.clone();

        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| TransformError::Spawn {
            step: step(),
            source,
        })?;

        // Feed stdin from a separate task so a chatty child can't deadlock us
        let mut stdin = child.stdin.take();
        let data = input.to_vec();
        let writer = tokio::spawn(async move {
            if let Some(stdin) = stdin.as_mut() {
                // The child may exit without reading everything
                let _ = stdin.write_all(&data).await;
                let _ = stdin.shutdown().await;
            }
        });

        let output = tokio::time::timeout(self.step_timeout, child.wait_with_output())
            .await
            .map_err(|_| TransformError::Timeout {
                step: step(),
                timeout: self.step_timeout,
            })?
            .map_err(|source| TransformError::Spawn {
                step: step(),
                source,
            })?;
        let _ = writer.await;

        if !output.status.success() {
            return Err(TransformError::Failed {
                step: step(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(output.stdout)
    }
}
