//! Shared helpers for session tests.
//!
//! Sessions run a small `sh` script in place of the real camera tool. The
//! script prints a prompt, then answers each command line according to its
//! first word:
//!
//! - `slow`: waits 200ms, then answers
//! - `hang`: never answers
//! - `fail`: answers with an error marker
//! - `trailing`: prints a payload, then the echo, then the prompt
//! - `quit`: exits without answering
//! - anything else: echo plus `<command> ok`

#![allow(dead_code)]

use std::time::Duration;

use futures::future::BoxFuture;
use stopmotion::config::Settings;
use stopmotion::shell::{Outcome, Registry, Session};
use tokio::sync::oneshot;

pub const PROMPT: &str = "gphoto2: {/tmp} /store > ";
pub const ERROR_MARKER: &str = "**** Error (-1: 'Some failure') ****";

pub const SCRIPT: &str = r#"
printf '%s' "$1"
while read line; do
  case "$line" in
    slow*) sleep 0.2; printf '%s\nslow done\n%s' "$line" "$1" ;;
    hang*) sleep 30 ;;
    fail*) printf '%s\n%s\n%s' "$line" "$2" "$1" ;;
    trailing*) printf 'payload line\n%s\n%s' "$line" "$1" ;;
    quit*) exit 0 ;;
    *) printf '%s\n%s ok\n%s' "$line" "$line" "$1" ;;
  esac
done
"#;

/// Settings that run `script` with `$1` = prompt, `$2` = error marker and
/// `$3` = session key.
pub fn settings_for(script: &str) -> Settings {
    let mut settings = Settings::default();
    settings.shell.program = "sh".to_string();
    settings.shell.args = vec![
        "-c".to_string(),
        script.to_string(),
        "sh".to_string(),
        PROMPT.to_string(),
        ERROR_MARKER.to_string(),
        "{path}".to_string(),
    ];
    settings
}

pub fn fake_tool() -> Registry {
    Registry::new(&settings_for(SCRIPT)).expect("registry should start")
}

/// Queue `f` for `key` and wait for the outcome it returns.
pub async fn run<F>(registry: &Registry, key: &str, f: F) -> Outcome
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
        .expect("open should succeed");

    tokio::time::timeout(Duration::from_secs(10), rx)
        .await
        .expect("action should finish")
        .expect("action should report an outcome")
}

/// Send one command to `key` and return the outcome.
pub async fn send(registry: &Registry, key: &str, command: &'static str) -> Outcome {
    run(registry, key, move |session, _| {
        Box::pin(async move { session.send(command).await })
    })
    .await
}

/// The session state seen by the next queued action.
pub async fn state(registry: &Registry, key: &str) -> Outcome {
    run(registry, key, |_, state| Box::pin(async move { state })).await
}
