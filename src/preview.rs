//! Live preview controller.
//!
//! `Streamer` drives one session through the preview workflow: a polling
//! loop that keeps requesting previews, stopping that loop, and taking a
//! full capture. Every step is an action queued on the session, so the
//! steps interleave in the order they were requested. Progress is reported
//! to a [`StatusSink`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Local;
use log::{debug, warn};
use tokio::time::Instant;

use crate::config::PreviewSettings;
use crate::error::StopmotionResult;
use crate::shell::{Outcome, Registry, Session};

/// Receives status updates from a [`Streamer`].
///
/// Called from session actor tasks, so implementations must not block.
pub trait StatusSink: Send + Sync + 'static {
    /// A message for the user, such as an error or a capture result
    fn status(&self, message: &str);
    /// Whether the preview loop is running
    fn polling(&self, active: bool);
}

/// Prefix `message` with the local time of day.
pub fn format_status(message: &str) -> String {
    format!("{} {}", Local::now().format("%H:%M:%S%.3f"), message)
}

#[derive(Clone)]
pub struct Streamer {
    registry: Registry,
    key: String,
    settings: Arc<PreviewSettings>,
    sink: Arc<dyn StatusSink>,
    /// Whether a preview loop is running
    active: Arc<AtomicBool>,
    /// Identifies the running loop; iterations of older loops end silently
    generation: Arc<AtomicU64>,
}

impl Streamer {
    pub fn new(
        registry: Registry,
        key: impl Into<String>,
        settings: PreviewSettings,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            registry,
            key: key.into(),
            settings: Arc::new(settings),
            sink,
            active: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Start the preview loop. Does nothing while a loop is already running.
    ///
    /// A session that fails to start is reported and closed, so the next
    /// attempt spawns the tool again.
    pub fn start_polling(&self) -> StopmotionResult<()> {
        let this = self.clone();
        self.registry.open(&self.key, move |session, _| {
            Box::pin(async move {
                if this.active.load(Ordering::SeqCst) {
                    debug!(target: "stopmotion::preview", "Preview loop for {} already running", this.key);
                    return;
                }
                resume(session);
                if session.is_ready() {
                    this.active.store(true, Ordering::SeqCst);
                    let generation = this.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    this.sink.polling(true);
                    this.poll_next(generation);
                } else if session.is_failed() {
                    this.sink.status(session.last_error().unwrap_or_default());
                    this.sink.polling(false);
                    session.close();
                }
            })
        })
    }

    /// Queue the next preview iteration.
    fn poll_next(&self, generation: u64) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let started = Instant::now();
        let this = self.clone();
        let queued = self.registry.open(&self.key, move |session, _| {
            Box::pin(async move { this.poll_once(session, generation, started).await })
        });
        if let Err(e) = queued {
            warn!(target: "stopmotion::preview", "Preview loop for {} ended: {}", self.key, e);
            self.sink.status(&e.to_string());
            self.end_polling();
        }
    }

    async fn poll_once(&self, session: &mut Session, generation: u64, started: Instant) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if session.is_interrupted() {
            debug!(target: "stopmotion::preview", "Preview loop for {} interrupted", self.key);
            self.end_polling();
            return;
        }
        if !session.is_ready() {
            self.end_polling();
            return;
        }

        match session.send(&self.settings.preview_command).await {
            Outcome::Success(_) => {
                tokio::time::sleep_until(started + self.settings.interval()).await;
                self.poll_next(generation);
            }
            failed @ Outcome::Error(_) => {
                self.end_polling();
                self.sink.status(&failed.to_string());
                session.reset();
            }
            _ => self.end_polling(),
        }
    }

    /// Retire the running loop. Returns whether one was running.
    fn halt(&self) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.active.swap(false, Ordering::SeqCst)
    }

    fn end_polling(&self) {
        if self.halt() {
            self.sink.polling(false);
        }
    }

    /// Stop the preview loop once its current iteration is done.
    pub fn stop_polling(&self) -> StopmotionResult<()> {
        let this = self.clone();
        self.registry.open(&self.key, move |session, _| {
            Box::pin(async move {
                if session.is_ready() {
                    session.interrupt();
                }
                this.end_polling();
            })
        })
    }

    /// Take a full capture, then leave the preview loop stopped.
    pub fn capture(&self) -> StopmotionResult<()> {
        let this = self.clone();
        self.registry.open(&self.key, move |session, _| {
            Box::pin(async move {
                resume(session);
                if !session.is_ready() {
                    return;
                }

                match session.send(&this.settings.capture_command).await {
                    Outcome::Success(text) => this.sink.status(&text),
                    failed => {
                        this.sink.status(&failed.to_string());
                        session.reset();
                    }
                }
                this.halt();
                this.sink.polling(false);
                session.interrupt();
            })
        })
    }

    /// Close the session; queued steps after this are dropped, which also
    /// ends a running preview loop.
    pub fn close(&self) -> bool {
        self.end_polling();
        self.registry.close(&self.key)
    }
}

/// An interrupted session may be picked up again by a new request.
fn resume(session: &mut Session) {
    if session.is_interrupted() {
        session.reset();
    }
}
