use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use badge_core::{EventDispatcher, NotificationService, NotificationSource};
use tracing::{info, warn};

use crate::{
    board::BadgeBoard,
    file_source::{watch_active_file, ActiveFileWatcher, FileSource},
};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub(crate) active_file: PathBuf,
    pub(crate) query_timeout: Option<Duration>,
    pub(crate) dots_enabled: bool,
    pub(crate) listener_package: String,
    pub(crate) enabled_listeners: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(path) = std::env::var("BADGE_ACTIVE_FILE") {
            if !path.trim().is_empty() {
                config.active_file = PathBuf::from(path);
            }
        }
        if let Ok(timeout) = std::env::var("BADGE_QUERY_TIMEOUT_MS") {
            let millis = timeout
                .trim()
                .parse::<u64>()
                .with_context(|| format!("invalid BADGE_QUERY_TIMEOUT_MS `{timeout}`"))?;
            config.query_timeout = (millis > 0).then(|| Duration::from_millis(millis));
        }
        if let Ok(flag) = std::env::var("BADGE_DOTS_ENABLED") {
            if let Some(value) = parse_flag(&flag) {
                config.dots_enabled = value;
            }
        }
        if let Ok(package) = std::env::var("BADGE_LISTENER_PACKAGE") {
            if !package.trim().is_empty() {
                config.listener_package = package.trim().to_string();
            }
        }
        if let Ok(flat) = std::env::var("ENABLED_NOTIFICATION_LISTENERS") {
            config.enabled_listeners = Some(flat);
        }
        Ok(config)
    }

    pub fn with_active_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.active_file = path.into();
        self
    }

    /// Overrides the flattened listener list normally read from
    /// `ENABLED_NOTIFICATION_LISTENERS`.
    pub fn with_enabled_listeners(mut self, flat: impl Into<String>) -> Self {
        self.enabled_listeners = Some(flat.into());
        self
    }

    pub fn active_file(&self) -> &PathBuf {
        &self.active_file
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout
    }

    pub fn dots_enabled(&self) -> bool {
        self.dots_enabled
    }

    /// Without an explicit listener list the desktop build assumes access.
    pub fn listener_access(&self) -> bool {
        match &self.enabled_listeners {
            Some(flat) => listener_access_granted(flat, &self.listener_package),
            None => true,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            active_file: PathBuf::from("active_notifications.json"),
            query_timeout: Some(Duration::from_millis(500)),
            dots_enabled: true,
            listener_package: "com.launcher.badges".to_string(),
            enabled_listeners: None,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Checks a colon-separated list of flattened `package/class` listener
/// components for one belonging to `package`.
pub fn listener_access_granted(flat: &str, package: &str) -> bool {
    flat.split(':')
        .filter_map(|component| component.split_once('/'))
        .any(|(component_package, class)| component_package == package && !class.is_empty())
}

/// Everything a running monitor keeps alive.
pub struct Monitor {
    pub service: Arc<NotificationService<Box<dyn NotificationSource>>>,
    pub board: Arc<BadgeBoard>,
    dispatcher: Option<EventDispatcher>,
    _watcher: ActiveFileWatcher,
}

impl Monitor {
    pub fn start(config: &AppConfig) -> Result<Self> {
        if !config.listener_access() {
            anyhow::bail!(
                "notification listener access has not been granted to `{}`",
                config.listener_package
            );
        }

        let source = FileSource::new(&config.active_file);
        let board = Arc::new(BadgeBoard::new(config.dots_enabled));
        let mut builder = NotificationService::builder()
            .with_source(source.clone())
            .add_observer(board.clone());
        if let Some(timeout) = config.query_timeout {
            builder = builder.query_timeout(timeout);
        }
        let service = Arc::new(builder.build().context("failed to build badge service")?);

        let dispatcher = EventDispatcher::spawn(Arc::clone(&service))?;
        let sender = dispatcher.sender();
        let watcher = watch_active_file(source, sender.clone())?;
        sender.connected()?;
        info!(path = %config.active_file.display(), "badge monitor started");

        Ok(Self {
            service,
            board,
            dispatcher: Some(dispatcher),
            _watcher: watcher,
        })
    }

    pub fn stop(mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(err) = dispatcher.sender().disconnected() {
                warn!(%err, "unable to signal disconnect");
            }
            dispatcher.shutdown();
        }
        info!("badge monitor stopped");
    }
}

pub fn run(config: AppConfig) -> Result<()> {
    let monitor = Monitor::start(&config)?;
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    writeln!(stdout, "commands: status, counts, dots, quit")?;
    for line in stdin.lock().lines() {
        let line = line?;
        match line.trim() {
            "status" => {
                let status = serde_json::to_string_pretty(&monitor.service.status())?;
                writeln!(stdout, "{status}")?;
            }
            "counts" => {
                let counts = serde_json::to_string_pretty(&monitor.service.snapshot())?;
                writeln!(stdout, "{counts}")?;
            }
            "dots" => {
                for package in monitor.board.badged_packages() {
                    if monitor.board.shows_dot(&package) {
                        writeln!(stdout, "{package} ({})", monitor.board.count(&package))?;
                    }
                }
            }
            "quit" | "exit" => break,
            "" => {}
            other => writeln!(stdout, "unknown command `{other}`")?,
        }
    }
    monitor.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_list_must_name_our_package() {
        let flat = "com.other/.Listener:com.launcher.badges/com.launcher.badges.BadgeListener";
        assert!(listener_access_granted(flat, "com.launcher.badges"));
        assert!(!listener_access_granted(flat, "com.launcher"));
        assert!(!listener_access_granted("", "com.launcher.badges"));
        assert!(!listener_access_granted("com.launcher.badges", "com.launcher.badges"));
    }

    #[test]
    fn flags_accept_common_spellings() {
        assert_eq!(parse_flag(" Yes "), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn missing_listener_list_assumes_access() {
        let config = AppConfig::default();
        assert!(config.listener_access());
        let denied = AppConfig::default().with_enabled_listeners("com.other/.Listener");
        assert!(!denied.listener_access());
        let granted = AppConfig::default()
            .with_enabled_listeners("com.launcher.badges/com.launcher.badges.BadgeListener");
        assert!(granted.listener_access());
    }
}
