use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use badge_core::{EventSender, NotificationRecord, NotificationSource, SourceError, SourceEvent};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// One entry of the active-notification file, shaped like a status bar
/// notification: a unique key plus the posting package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEntry {
    pub key: String,
    pub package: String,
    #[serde(default)]
    pub group_summary: bool,
}

impl ActiveEntry {
    pub fn to_record(&self) -> NotificationRecord {
        NotificationRecord::new(self.package.as_str(), self.group_summary)
    }
}

/// Active notifications read from a JSON array on disk.
///
/// A missing file is an empty notification shade.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> Result<Vec<ActiveEntry>, SourceError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(SourceError::Unavailable(format!(
                    "{}: {err}",
                    self.path.display()
                )))
            }
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|err| {
            SourceError::Unavailable(format!("{}: {err}", self.path.display()))
        })
    }
}

impl NotificationSource for FileSource {
    fn query_active(&self) -> Result<Vec<NotificationRecord>, SourceError> {
        Ok(self.entries()?.iter().map(ActiveEntry::to_record).collect())
    }
}

/// Posted/removed events that turn the `before` shade into `after`, matched
/// by notification key. An entry whose contents changed under the same key is
/// reported as a fresh post.
pub fn diff_events(before: &[ActiveEntry], after: &[ActiveEntry]) -> Vec<SourceEvent> {
    let old: BTreeMap<&str, &ActiveEntry> = before.iter().map(|e| (e.key.as_str(), e)).collect();
    let new: BTreeMap<&str, &ActiveEntry> = after.iter().map(|e| (e.key.as_str(), e)).collect();

    let mut events = Vec::new();
    for (key, entry) in &old {
        match new.get(key) {
            Some(current) if current == entry => {}
            Some(_) | None => events.push(SourceEvent::Removed(entry.to_record())),
        }
    }
    for (key, entry) in &new {
        if old.get(key) != Some(entry) {
            events.push(SourceEvent::Posted(entry.to_record()));
        }
    }
    events
}

/// Watches the active-notification file and forwards the differences between
/// successive versions as platform events.
pub struct ActiveFileWatcher {
    _watcher: RecommendedWatcher,
}

pub fn watch_active_file(source: FileSource, sender: EventSender) -> Result<ActiveFileWatcher> {
    let initial = source.entries().unwrap_or_else(|err| {
        tracing::warn!(%err, "unable to read initial active notifications");
        Vec::new()
    });
    let previous = Mutex::new(initial);
    let watched = source.path().to_path_buf();
    let parent = watched
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(%err, "active notification watcher error");
                return;
            }
        };
        if !event.paths.iter().any(|path| path.ends_with(file_name(&watched))) {
            return;
        }
        let current = match source.entries() {
            Ok(current) => current,
            Err(err) => {
                tracing::warn!(%err, "ignoring unreadable active notification file");
                return;
            }
        };
        let mut previous = previous.lock();
        for change in diff_events(&previous, &current) {
            if let Err(err) = sender.send(change) {
                tracing::debug!(%err, "dispatcher gone, dropping file change");
                return;
            }
        }
        *previous = current;
    })
    .context("failed to create active notification watcher")?;

    watcher
        .watch(&parent, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", parent.display()))?;
    tracing::info!(path = %parent.display(), "watching active notifications");
    Ok(ActiveFileWatcher { _watcher: watcher })
}

fn file_name(path: &Path) -> &Path {
    path.file_name().map(Path::new).unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, package: &str, group_summary: bool) -> ActiveEntry {
        ActiveEntry {
            key: key.into(),
            package: package.into(),
            group_summary,
        }
    }

    #[test]
    fn diff_reports_removals_then_posts() {
        let before = vec![entry("1", "com.mail", false), entry("2", "com.chat", false)];
        let after = vec![entry("2", "com.chat", false), entry("3", "com.chat", true)];

        assert_eq!(
            diff_events(&before, &after),
            vec![
                SourceEvent::Removed(NotificationRecord::child("com.mail")),
                SourceEvent::Posted(NotificationRecord::summary("com.chat")),
            ]
        );
    }

    #[test]
    fn changed_entry_is_removed_and_reposted() {
        let before = vec![entry("1", "com.mail", false)];
        let after = vec![entry("1", "com.mail", true)];

        assert_eq!(
            diff_events(&before, &after),
            vec![
                SourceEvent::Removed(NotificationRecord::child("com.mail")),
                SourceEvent::Posted(NotificationRecord::summary("com.mail")),
            ]
        );
    }

    #[test]
    fn identical_shades_produce_no_events() {
        let shade = vec![entry("1", "com.mail", false)];
        assert!(diff_events(&shade, &shade).is_empty());
    }
}
