//! One running instance of the external tool.
//!
//! A `Session` owns the child process and its three pipes. It is only ever
//! touched by the actor task that owns it (see [`super::registry`]), so no
//! method here takes a lock.

use std::process::Stdio;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use log::{debug, info, warn};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use super::burst::{deadline_after, read_burst, read_until_prompt};
use super::outcome::{Failure, FailureKind, Outcome};
use super::protocol::{Protocol, bootstrap_failure, classify_response};
use super::race::first_completed;
use super::registry::RegistryInner;
use crate::config::ShellSettings;
use crate::error::{StopmotionError, StopmotionResult};

/// How long to look for a last stderr message after the tool exited during
/// startup.
const EXIT_STDERR_GRACE: Duration = Duration::from_millis(200);

pub struct Session {
    id: u64,
    key: String,
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: ChildStdout,
    stderr: ChildStderr,
    state: Outcome,
    protocol: Arc<Protocol>,
    command_timeout: Option<Duration>,
    registry: Weak<RegistryInner>,
}

impl Session {
    /// Start the tool for `key`.
    ///
    /// Must be called from within a tokio runtime. The process is killed when
    /// the session is dropped.
    pub(crate) fn spawn(
        id: u64,
        key: &str,
        settings: &ShellSettings,
        protocol: Arc<Protocol>,
        registry: Weak<RegistryInner>,
    ) -> StopmotionResult<Self> {
        let args = settings.args_for(key);
        debug!(
            target: "stopmotion::session",
            "Spawning {} {:?} for {}",
            settings.program,
            args,
            key
        );

        let mut child = Command::new(&settings.program)
            .args(&args)
            .envs(&settings.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StopmotionError::spawn(&settings.program, e))?;

        let missing = |pipe: &str| {
            StopmotionError::spawn(
                &settings.program,
                std::io::Error::other(format!("{} pipe not captured", pipe)),
            )
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        Ok(Self {
            id,
            key: key.to_string(),
            child,
            stdin: BufWriter::new(stdin),
            stdout,
            stderr,
            state: Outcome::Ready,
            protocol,
            command_timeout: settings.command_timeout(),
            registry,
        })
    }

    /// Decide the initial state by racing a stderr probe against the first
    /// prompt.
    ///
    /// Anything on stderr before the prompt means the tool failed to start.
    /// A prompt within `timeout` means it is healthy. Neither means it hung.
    pub(crate) async fn bootstrap(&mut self, timeout: Duration) -> Outcome {
        let protocol = Arc::clone(&self.protocol);
        let deadline = deadline_after(Some(timeout));
        let Self { stdout, stderr, .. } = &mut *self;

        let stderr_probe = async {
            match read_burst(stderr, None).await {
                Ok(text) => bootstrap_failure(&text),
                // A quiet, closed stderr says nothing; let the prompt probe decide.
                Err(_) => std::future::pending().await,
            }
        };
        let prompt_probe = async {
            match read_until_prompt::<_, ChildStderr>(stdout, None, &protocol, deadline).await {
                Ok(text) => Outcome::Success(text.trim().to_string()),
                Err(e) => Outcome::Error(e.into()),
            }
        };

        let outcome = first_completed(vec![stderr_probe.boxed(), prompt_probe.boxed()])
            .await
            .map(|(outcome, _)| outcome)
            .unwrap_or_else(|| Outcome::Error(Failure::timed_out()));

        let outcome = match outcome {
            Outcome::Error(Failure {
                kind: FailureKind::ProcessExited,
                message: None,
            }) => self.exit_message().await,
            other => other,
        };

        match &outcome {
            Outcome::Success(_) => {
                info!(target: "stopmotion::session", "Session for {} is ready", self.key)
            }
            other => warn!(
                target: "stopmotion::session",
                "Session for {} failed to start: {:?}",
                self.key,
                other
            ),
        }
        self.state = outcome.clone();
        outcome
    }

    /// The tool quit during startup; pick up whatever it said on its way out.
    async fn exit_message(&mut self) -> Outcome {
        match read_burst(&mut self.stderr, deadline_after(Some(EXIT_STDERR_GRACE))).await {
            Ok(text) => bootstrap_failure(&text),
            Err(_) => Outcome::Error(Failure::process_exited()),
        }
    }

    /// Send one command and wait for the prompt that ends its response.
    ///
    /// Returns `Closed` without touching the process once the session is
    /// closed. Otherwise the classified response becomes the new state.
    pub async fn send(&mut self, command: &str) -> Outcome {
        if self.state.is_closed() {
            return Outcome::Closed;
        }
        let outcome = self.round_trip(command).await;
        self.state = outcome.clone();
        outcome
    }

    async fn round_trip(&mut self, command: &str) -> Outcome {
        debug!(target: "stopmotion::session", "[{}] > {}", self.key, command);

        if let Err(e) = self.write_line(command).await {
            warn!(
                target: "stopmotion::session",
                "[{}] Failed to write command: {}",
                self.key,
                e
            );
            return match e.kind() {
                std::io::ErrorKind::BrokenPipe => Outcome::Error(Failure::process_exited()),
                _ => Outcome::Error(Failure::io(&e)),
            };
        }

        let deadline = deadline_after(self.command_timeout);
        match read_until_prompt(
            &mut self.stdout,
            Some(&mut self.stderr),
            &self.protocol,
            deadline,
        )
        .await
        {
            Ok(response) => {
                let outcome = classify_response(command, &response);
                debug!(target: "stopmotion::session", "[{}] < {:?}", self.key, outcome);
                outcome
            }
            Err(e) => {
                warn!(
                    target: "stopmotion::session",
                    "[{}] No prompt after {}: {}",
                    self.key,
                    command,
                    e
                );
                Outcome::Error(e.into())
            }
        }
    }

    async fn write_line(&mut self, command: &str) -> std::io::Result<()> {
        self.stdin.write_all(command.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await
    }

    /// Clear an error so the next `send` starts fresh.
    pub fn reset(&mut self) -> Outcome {
        if !self.state.is_closed() {
            self.state = Outcome::Ready;
        }
        self.state.clone()
    }

    /// Mark the session interrupted, which stops self-rescheduling loops.
    ///
    /// Does not affect I/O already in flight.
    pub fn interrupt(&mut self) -> Outcome {
        if !self.state.is_closed() {
            self.state = Outcome::Interrupted;
        }
        self.state.clone()
    }

    /// Close the session: leave the registry and kill the process.
    ///
    /// Idempotent. Actions still queued for this session are dropped.
    pub fn close(&mut self) -> Outcome {
        if self.state.is_closed() {
            return Outcome::Closed;
        }
        self.state = Outcome::Closed;

        if let Some(registry) = self.registry.upgrade() {
            registry.detach(&self.key, self.id);
        }
        if let Err(e) = self.child.start_kill() {
            // Already exited
            debug!(
                target: "stopmotion::session",
                "Kill for {} skipped: {}",
                self.key,
                e
            );
        }
        info!(target: "stopmotion::session", "Session for {} closed", self.key);
        Outcome::Closed
    }

    /// Record a failure raised outside `send`, unless already closed.
    pub(crate) fn fail(&mut self, failure: Failure) {
        if !self.state.is_closed() {
            self.state = Outcome::Error(failure);
        }
    }

    pub fn state(&self) -> &Outcome {
        &self.state
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn is_failed(&self) -> bool {
        self.state.is_failed()
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.is_interrupted()
    }

    /// Message of the current error, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.state.error_message()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
