//! Session registry and per-key actors.
//!
//! Every key maps to at most one live [`Session`]. The session is owned by a
//! dedicated tokio task that pulls actions off an unbounded queue and runs
//! them one at a time, so actions for one key never overlap while different
//! keys proceed independently.
//!
//! ```ignore
//! let registry = Registry::new(&settings)?;
//! registry.open("/tmp/frame.jpg", |session, _state| {
//!     Box::pin(async move {
//!         if session.is_ready() {
//!             session.send("capture-preview").await;
//!         }
//!     })
//! })?;
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::BoxFuture;
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::outcome::{Failure, Outcome};
use super::protocol::Protocol;
use super::session::Session;
use crate::config::{Settings, ShellSettings, validate_settings};
use crate::error::{StopmotionError, StopmotionResult};

/// Work queued for a session. Receives the session and its state at the
/// moment the action starts.
pub type Action = Box<dyn for<'a> FnOnce(&'a mut Session, Outcome) -> BoxFuture<'a, ()> + Send>;

fn action<F>(f: F) -> Action
where
    F: for<'a> FnOnce(&'a mut Session, Outcome) -> BoxFuture<'a, ()> + Send + 'static,
{
    Box::new(f)
}

/// Registry-side handle of a running session actor.
struct SessionHandle {
    id: u64,
    actions: mpsc::UnboundedSender<Action>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub(crate) struct RegistryInner {
    sessions: DashMap<String, SessionHandle>,
    settings: ShellSettings,
    protocol: Arc<Protocol>,
    runtime: Handle,
    next_id: AtomicU64,
}

impl RegistryInner {
    /// Remove `key` if it still belongs to session `id`.
    ///
    /// A session that was already replaced can never evict its successor.
    pub(crate) fn detach(&self, key: &str, id: u64) {
        if self.sessions.remove_if(key, |_, handle| handle.id == id).is_some() {
            debug!(target: "stopmotion::registry", "Removed session {} for {}", id, key);
        }
    }
}

/// Owner of all sessions. Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Create a registry whose actors run on the current tokio runtime.
    pub fn new(settings: &Settings) -> StopmotionResult<Self> {
        Self::with_runtime(settings, Handle::try_current()?)
    }

    /// Create a registry whose actors run on `runtime`.
    pub fn with_runtime(settings: &Settings, runtime: Handle) -> StopmotionResult<Self> {
        validate_settings(settings)?;
        let protocol = Protocol::new(&settings.shell.prompt_tag)?;
        Ok(Self {
            inner: Arc::new(RegistryInner {
                sessions: DashMap::new(),
                settings: settings.shell.clone(),
                protocol: Arc::new(protocol),
                runtime,
                next_id: AtomicU64::new(1),
            }),
        })
    }

    /// Queue `action` for the session of `key`, starting the session first
    /// if there is none.
    ///
    /// A new session bootstraps before any action runs. Fails only if the
    /// tool cannot be spawned or the session's queue is already closed.
    /// Safe to call from any thread, including from inside an action.
    pub fn open<F>(&self, key: impl Into<String>, f: F) -> StopmotionResult<()>
    where
        F: for<'a> FnOnce(&'a mut Session, Outcome) -> BoxFuture<'a, ()> + Send + 'static,
    {
        let key = key.into();
        let sender = match self.inner.sessions.entry(key.clone()) {
            Entry::Occupied(entry) => entry.get().actions.clone(),
            Entry::Vacant(entry) => {
                let handle = self.start(&key)?;
                let sender = handle.actions.clone();
                entry.insert(handle);
                sender
            }
        };

        sender
            .send(action(f))
            .map_err(|_| StopmotionError::rejected(key))
    }

    /// Spawn the tool for `key` and the actor that owns it.
    fn start(&self, key: &str) -> StopmotionResult<SessionHandle> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let _guard = self.inner.runtime.enter();
        let session = Session::spawn(
            id,
            key,
            &self.inner.settings,
            Arc::clone(&self.inner.protocol),
            Arc::downgrade(&self.inner),
        )?;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = self.inner.runtime.spawn(run_session(
            session,
            rx,
            cancel.clone(),
            self.inner.settings.bootstrap_timeout(),
        ));
        info!(target: "stopmotion::registry", "Started session {} for {}", id, key);

        Ok(SessionHandle {
            id,
            actions: tx,
            cancel,
            task,
        })
    }

    /// Queue a close for the session of `key`.
    ///
    /// Returns false if there is no such session. Actions queued before the
    /// close still run; later ones are dropped.
    pub fn close(&self, key: &str) -> bool {
        let Some(handle) = self.inner.sessions.get(key) else {
            return false;
        };
        let close = action(|session, _| {
            Box::pin(async move {
                session.close();
            })
        });
        handle.actions.send(close).is_ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.sessions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Keys of all live sessions, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Close every session, waiting at most the configured shutdown timeout.
    pub async fn shutdown(&self) {
        self.shutdown_with_timeout(self.inner.settings.shutdown_timeout())
            .await;
    }

    /// Close every session under one global timeout.
    ///
    /// Each actor finishes the action it is running, then stops. Actors still
    /// running when `timeout` expires are aborted, which drops their sessions
    /// and kills the processes.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) {
        let handles: Vec<(String, SessionHandle)> = self
            .keys()
            .into_iter()
            .filter_map(|key| self.inner.sessions.remove(&key))
            .collect();

        if handles.is_empty() {
            return;
        }
        info!(
            target: "stopmotion::registry",
            "Shutting down {} session(s)",
            handles.len()
        );

        let mut join_set = tokio::task::JoinSet::new();
        let mut aborts = Vec::with_capacity(handles.len());
        for (key, SessionHandle { cancel, task, .. }) in handles {
            cancel.cancel();
            aborts.push(task.abort_handle());
            join_set.spawn(async move {
                if let Err(e) = task.await {
                    if e.is_panic() {
                        error!(
                            target: "stopmotion::registry",
                            "Session actor for {} panicked: {}",
                            key,
                            e
                        );
                    }
                }
            });
        }

        let drained = tokio::time::timeout(timeout, async {
            while join_set.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                target: "stopmotion::registry",
                "Shutdown timeout ({:?}) expired, aborting remaining sessions",
                timeout
            );
            join_set.abort_all();
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("sessions", &self.keys())
            .finish_non_exhaustive()
    }
}

/// The actor loop owning one session.
///
/// Bootstraps, then runs queued actions in order until the session closes,
/// the queue is dropped, or shutdown is requested. A panicking action turns
/// into an error state instead of ending the loop.
async fn run_session(
    mut session: Session,
    mut actions: mpsc::UnboundedReceiver<Action>,
    cancel: CancellationToken,
    bootstrap_timeout: Duration,
) {
    let bootstrapped = tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = session.bootstrap(bootstrap_timeout) => true,
    };
    if !bootstrapped {
        session.close();
        return;
    }

    loop {
        let action = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(
                    target: "stopmotion::registry",
                    "Session {} for {} cancelled",
                    session.id(),
                    session.key()
                );
                break;
            }
            next = actions.recv() => match next {
                Some(action) => action,
                None => break,
            },
        };

        let state = session.state().clone();
        let target = &mut session;
        let result = AssertUnwindSafe(async move { action(target, state).await })
            .catch_unwind()
            .await;
        if let Err(panic) = result {
            let message = panic_message(panic.as_ref());
            error!(
                target: "stopmotion::registry",
                "Action for {} panicked: {}",
                session.key(),
                message.as_deref().unwrap_or("<non-string payload>")
            );
            session.fail(Failure::panicked(message));
        }

        if session.is_closed() {
            break;
        }
    }

    actions.close();
    let mut dropped = 0usize;
    while actions.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        debug!(
            target: "stopmotion::registry",
            "Dropped {} queued action(s) for closed session {}",
            dropped,
            session.key()
        );
    }
    session.close();
}

fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::FailureKind;
    use tokio::sync::oneshot;

    const PROMPT: &str = "gphoto2: {/tmp} /> ";

    fn settings(script: &str) -> Settings {
        let mut settings = Settings::default();
        settings.shell.program = "sh".to_string();
        settings.shell.args = vec![
            "-c".to_string(),
            script.to_string(),
            "sh".to_string(),
            PROMPT.to_string(),
        ];
        settings.shell.command_timeout_ms = Some(2000);
        settings
    }

    fn healthy() -> Registry {
        Registry::new(&settings(
            r#"printf '%s' "$1"; while read line; do printf '%s\nok\n%s' "$line" "$1"; done"#,
        ))
        .unwrap()
    }

    /// Queue an action and wait for the outcome it reports back.
    async fn run<F>(registry: &Registry, key: &str, f: F) -> Outcome
    where
        F: for<'a> FnOnce(&'a mut Session, Outcome) -> BoxFuture<'a, Outcome> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        registry
            .open(key, move |session, state| {
                Box::pin(async move {
                    let _ = tx.send(f(session, state).await);
                })
            })
            .unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn first_action_sees_bootstrap_state() {
        let registry = healthy();
        let state = run(&registry, "a", |_, state| Box::pin(async move { state })).await;
        assert!(state.is_ready(), "unexpected {:?}", state);
        assert!(registry.contains("a"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn same_key_reuses_the_session() {
        let registry = healthy();
        run(&registry, "a", |_, s| Box::pin(async move { s })).await;
        run(&registry, "a", |_, s| Box::pin(async move { s })).await;
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn closing_from_an_action_removes_the_session() {
        let registry = healthy();
        let outcome = run(&registry, "a", |session, _| {
            Box::pin(async move { session.close() })
        })
        .await;
        assert_eq!(outcome, Outcome::Closed);
        assert!(!registry.contains("a"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn reopening_after_close_starts_a_new_session() {
        let registry = healthy();
        run(&registry, "a", |session, _| Box::pin(async move { session.close() })).await;
        let state = run(&registry, "a", |_, s| Box::pin(async move { s })).await;
        assert!(state.is_ready());
        assert!(registry.contains("a"));
    }

    #[tokio::test]
    async fn close_by_key() {
        let registry = healthy();
        run(&registry, "a", |_, s| Box::pin(async move { s })).await;

        assert!(registry.close("a"));
        assert!(!registry.close("missing"));

        for _ in 0..100 {
            if !registry.contains("a") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!registry.contains("a"));
    }

    #[tokio::test]
    async fn panicking_action_leaves_an_error_state() {
        let registry = healthy();
        let (tx, rx) = oneshot::channel::<()>();
        registry
            .open("a", move |_, _| {
                Box::pin(async move {
                    drop(tx);
                    panic!("boom");
                })
            })
            .unwrap();
        let _ = rx.await;

        let state = run(&registry, "a", |_, s| Box::pin(async move { s })).await;
        assert_eq!(state.failure().map(|f| f.kind), Some(FailureKind::Panicked));
        assert_eq!(state.error_message(), Some("boom"));
    }

    #[tokio::test]
    async fn spawn_failure_is_returned_to_the_caller() {
        let mut settings = Settings::default();
        settings.shell.program = "/nonexistent/stopmotion-tool".to_string();
        let registry = Registry::new(&settings).unwrap();

        let result = registry.open("a", |_, _| Box::pin(async {}));
        assert!(matches!(result, Err(StopmotionError::Spawn { .. })));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let mut settings = Settings::default();
        settings.shell.prompt_tag.clear();
        assert!(matches!(
            Registry::new(&settings),
            Err(StopmotionError::Config { .. })
        ));
    }

    #[test]
    fn registry_needs_a_runtime() {
        assert!(matches!(
            Registry::new(&Settings::default()),
            Err(StopmotionError::NoRuntime(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_closes_every_session() {
        let registry = healthy();
        run(&registry, "a", |_, s| Box::pin(async move { s })).await;
        run(&registry, "b", |_, s| Box::pin(async move { s })).await;

        registry.shutdown_with_timeout(Duration::from_secs(2)).await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn shutdown_aborts_a_stuck_action() {
        let registry = healthy();
        run(&registry, "a", |_, s| Box::pin(async move { s })).await;
        registry
            .open("a", |_, _| Box::pin(std::future::pending::<()>()))
            .unwrap();

        let started = tokio::time::Instant::now();
        registry
            .shutdown_with_timeout(Duration::from_millis(100))
            .await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(registry.is_empty());
    }
}
