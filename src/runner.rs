//! Command Runner - bounded-retry execution of external commands
//!
//! Each attempt streams the child's output to the console while keeping a
//! copy for classification. A classifier decides whether a failed attempt is
//! worth repeating (transient) or not (permanent).

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;

/// A fully specified command invocation, including its working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    /// Extra environment variables layered over the inherited environment
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            current_dir: None,
            env: Vec::new(),
        }
    }

    /// Run the command inside `dir` instead of the process working directory
    pub fn in_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        if let Some(dir) = &self.current_dir {
            write!(f, " (in {})", dir.display())?;
        }
        Ok(())
    }
}

/// How a single attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    /// Non-zero exit status
    Code(i32),
    /// Terminated by a signal (Unix)
    Signal(i32),
    /// The process could not be started or waited on
    SpawnError(String),
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Success => write!(f, "success"),
            ExitOutcome::Code(code) => write!(f, "exit status {}", code),
            ExitOutcome::Signal(signal) => write!(f, "killed by signal {}", signal),
            ExitOutcome::SpawnError(error) => write!(f, "spawn error: {}", error),
        }
    }
}

/// Captured result of one execution of a command
#[derive(Debug, Clone)]
pub struct CommandAttempt {
    pub attempt_index: u32,
    pub stdout: String,
    pub stderr: String,
    pub exit: ExitOutcome,
}

/// Verdict for one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Success,
    /// Retrying cannot help within this run
    Permanent(String),
    /// Worth another attempt
    Transient,
}

/// Decides what a finished attempt means for the retry loop
pub trait OutcomeClassifier: Send + Sync {
    fn classify(&self, attempt: &CommandAttempt) -> Classification;
}

/// Classifier driven by stderr markers and a list of benign exit codes
#[derive(Debug, Clone)]
pub struct MarkerClassifier {
    markers: Vec<String>,
    benign_exit_codes: Vec<i32>,
}

impl MarkerClassifier {
    pub fn new(markers: Vec<String>, benign_exit_codes: Vec<i32>) -> Self {
        Self {
            markers,
            benign_exit_codes,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.permanent_failure_markers.clone(),
            config.benign_exit_codes.clone(),
        )
    }
}

impl OutcomeClassifier for MarkerClassifier {
    fn classify(&self, attempt: &CommandAttempt) -> Classification {
        if attempt.exit == ExitOutcome::Success {
            return Classification::Success;
        }

        if let Some(marker) = self
            .markers
            .iter()
            .find(|marker| !marker.is_empty() && attempt.stderr.contains(marker.as_str()))
        {
            return Classification::Permanent(format!("stderr contains \"{}\"", marker));
        }

        if let ExitOutcome::Code(code) = attempt.exit {
            if self.benign_exit_codes.contains(&code) {
                return Classification::Permanent(format!("exit status {}", code));
            }
        }

        Classification::Transient
    }
}

/// Executes one attempt of a command
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, spec: &CommandSpec, attempt_index: u32) -> CommandAttempt;
}

/// Runs real child processes, teeing their output to the console
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, spec: &CommandSpec, attempt_index: u32) -> CommandAttempt {
        let mut command = AsyncCommand::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }
        command.envs(spec.env.iter().map(|(key, value)| (key, value)));

        let failed = |error: String| CommandAttempt {
            attempt_index,
            stdout: String::new(),
            stderr: String::new(),
            exit: ExitOutcome::SpawnError(error),
        };

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => return failed(e.to_string()),
        };

        let (stdout, stderr) = tokio::join!(
            tee(child.stdout.take(), tokio::io::stdout()),
            tee(child.stderr.take(), tokio::io::stderr()),
        );

        let exit = match child.wait().await {
            Ok(status) => exit_outcome(status),
            Err(e) => ExitOutcome::SpawnError(e.to_string()),
        };

        CommandAttempt {
            attempt_index,
            stdout,
            stderr,
            exit,
        }
    }
}

fn exit_outcome(status: std::process::ExitStatus) -> ExitOutcome {
    if let Some(code) = status.code() {
        return if code == 0 {
            ExitOutcome::Success
        } else {
            ExitOutcome::Code(code)
        };
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitOutcome::Signal(signal);
        }
    }

    ExitOutcome::Code(-1)
}

/// Copy `source` line by line to `sink` (indented) and return everything read
async fn tee<R, W>(source: Option<R>, mut sink: W) -> String
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Some(source) = source else {
        return String::new();
    };

    let mut segments = BufReader::new(source).split(b'\n');
    let mut captured = String::new();
    let mut echo_failed = false;

    loop {
        match segments.next_segment().await {
            Ok(Some(segment)) => {
                let line = String::from_utf8_lossy(&segment);
                captured.push_str(&line);
                captured.push('\n');

                let trimmed = line.trim();
                if !trimmed.is_empty() && !echo_failed {
                    if let Err(e) = sink.write_all(format!("   {}\n", trimmed).as_bytes()).await {
                        debug!("Failed to echo command output: {}", e);
                        echo_failed = true;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read command output: {}", e);
                break;
            }
        }
    }

    if !echo_failed {
        if let Err(e) = sink.flush().await {
            debug!("Failed to flush command output: {}", e);
        }
    }
    captured
}

/// Final result of running a command through the retry loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded { attempts: u32 },
    /// Stopped early by a permanent classification
    Abandoned { attempts: u32, reason: String },
    /// Every attempt failed transiently
    Exhausted { attempts: u32 },
}

impl RunOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            RunOutcome::Succeeded { attempts }
            | RunOutcome::Abandoned { attempts, .. }
            | RunOutcome::Exhausted { attempts } => *attempts,
        }
    }
}

/// Retry loop around a [`CommandExecutor`]
#[derive(Clone)]
pub struct CommandRunner {
    executor: Arc<dyn CommandExecutor>,
    classifier: Arc<dyn OutcomeClassifier>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl CommandRunner {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        classifier: Arc<dyn OutcomeClassifier>,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            executor,
            classifier,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// Runner backed by real processes and the configured markers
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::with_executor(config, Arc::new(ProcessExecutor))
    }

    /// Runner using the configured classifier and limits over a custom executor
    pub fn with_executor(config: &SyncConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        Self::new(
            executor,
            Arc::new(MarkerClassifier::from_config(config)),
            config.max_attempts,
            config.retry_delay(),
        )
    }

    /// Run `spec` until it succeeds, fails permanently, or attempts run out
    pub async fn run(&self, spec: &CommandSpec) -> RunOutcome {
        debug!("Running: {}", spec);

        for attempt_index in 1..=self.max_attempts {
            let attempt = self.executor.execute(spec, attempt_index).await;

            match self.classifier.classify(&attempt) {
                Classification::Success => {
                    return RunOutcome::Succeeded {
                        attempts: attempt_index,
                    };
                }
                Classification::Permanent(reason) => {
                    info!("Not retrying {}: {}", spec, reason);
                    return RunOutcome::Abandoned {
                        attempts: attempt_index,
                        reason,
                    };
                }
                Classification::Transient => {
                    warn!(
                        "Command failed (attempt {}/{}): {}: {}",
                        attempt_index, self.max_attempts, spec, attempt.exit
                    );
                }
            }

            if attempt_index < self.max_attempts {
                info!("Retrying: {}", spec);
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        warn!("Giving up on {} after {} attempts", spec, self.max_attempts);
        RunOutcome::Exhausted {
            attempts: self.max_attempts,
        }
    }
}
