//! Moves freshly written preview files onto the output path.
//!
//! The tool writes previews as `<prefix><name>` next to the requested
//! output. `AutoRename` watches that directory and renames each such file
//! onto the output as soon as it appears, replacing the previous frame.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{StopmotionError, StopmotionResult};

/// File name the tool uses for a preview of `target`.
///
/// Returns `None` if `target` has no file name.
pub fn thumbnail_name(target: &Path, prefix: &str) -> Option<OsString> {
    let name = target.file_name()?;
    let mut thumbnail = OsString::from(prefix);
    thumbnail.push(name);
    Some(thumbnail)
}

/// Watches the output directory until closed or dropped.
pub struct AutoRename {
    target: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl AutoRename {
    /// Start watching the directory of `target` for `<prefix><file name>`.
    pub fn watch(target: impl Into<PathBuf>, prefix: &str) -> StopmotionResult<Self> {
        let target = target.into();
        let thumbnail = thumbnail_name(&target, prefix).ok_or_else(|| {
            StopmotionError::config(format!("{} is not a file path", target.display()))
        })?;
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let destination = target.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => handle_event(&event, &thumbnail, &destination),
            Err(e) => warn!(target: "stopmotion::rename", "Watch error: {}", e),
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(
            target: "stopmotion::rename",
            "Watching {} for previews of {}",
            dir.display(),
            target.display()
        );

        Ok(Self {
            target,
            watcher: Some(watcher),
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Stop watching. Idempotent.
    pub fn close(&mut self) {
        if self.watcher.take().is_some() {
            debug!(
                target: "stopmotion::rename",
                "Stopped watching for {}",
                self.target.display()
            );
        }
    }
}

impl Drop for AutoRename {
    fn drop(&mut self) {
        self.close();
    }
}

fn handle_event(event: &Event, thumbnail: &OsString, destination: &Path) {
    let appeared = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    );
    if !appeared {
        return;
    }

    for path in &event.paths {
        if path.file_name() != Some(thumbnail.as_os_str()) || !path.exists() {
            continue;
        }
        match std::fs::rename(path, destination) {
            Ok(()) => debug!(
                target: "stopmotion::rename",
                "Moved {} to {}",
                path.display(),
                destination.display()
            ),
            Err(e) => warn!(
                target: "stopmotion::rename",
                "Failed to move {} to {}: {}",
                path.display(),
                destination.display(),
                e
            ),
        }
    }
}
