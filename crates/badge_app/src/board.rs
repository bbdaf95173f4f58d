use std::collections::BTreeMap;

use badge_core::CountObserver;
use parking_lot::RwLock;

/// Launcher-side view of the badge counts: which app icons carry a dot.
pub struct BadgeBoard {
    dots_enabled: bool,
    counts: RwLock<BTreeMap<String, usize>>,
}

impl BadgeBoard {
    pub fn new(dots_enabled: bool) -> Self {
        Self {
            dots_enabled,
            counts: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn count(&self, package: &str) -> usize {
        self.counts.read().get(package).copied().unwrap_or(0)
    }

    pub fn shows_dot(&self, package: &str) -> bool {
        self.dots_enabled && self.count(package) > 0
    }

    pub fn badged_packages(&self) -> Vec<String> {
        self.counts.read().keys().cloned().collect()
    }

    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.counts.read().clone()
    }
}

impl CountObserver for BadgeBoard {
    fn on_count_changed(&self, package: &str, count: usize) -> anyhow::Result<()> {
        let mut counts = self.counts.write();
        if count == 0 {
            counts.remove(package);
        } else {
            counts.insert(package.to_string(), count);
        }
        tracing::debug!(package, count, "badge updated");
        Ok(())
    }
}
