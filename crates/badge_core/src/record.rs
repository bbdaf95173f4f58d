use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// One notification the platform reports as active at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationRecord {
    source_id: String,
    #[serde(default)]
    is_group_summary: bool,
}

impl NotificationRecord {
    pub fn new(source_id: impl Into<String>, is_group_summary: bool) -> Self {
        Self {
            source_id: source_id.into(),
            is_group_summary,
        }
    }

    pub fn child(source_id: impl Into<String>) -> Self {
        Self::new(source_id, false)
    }

    pub fn summary(source_id: impl Into<String>) -> Self {
        Self::new(source_id, true)
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn is_group_summary(&self) -> bool {
        self.is_group_summary
    }

    /// Group summaries mirror their children and never add to a badge.
    pub fn counts_toward_badge(&self) -> bool {
        !self.is_group_summary
    }

    pub fn validate(&self) -> Result<&str, RecordError> {
        let trimmed = self.source_id.trim();
        if trimmed.is_empty() {
            return Err(RecordError::MissingSourceId);
        }
        Ok(self.source_id.as_str())
    }
}

/// Normalised "source X now has N notifications" message fanned out to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMessage {
    pub source_id: String,
    pub count: usize,
}

impl UpdateMessage {
    pub fn new(source_id: impl Into<String>, count: usize) -> Self {
        Self {
            source_id: source_id.into(),
            count,
        }
    }

    pub fn is_clear(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_source_id_is_malformed() {
        assert!(matches!(
            NotificationRecord::child("   ").validate(),
            Err(RecordError::MissingSourceId)
        ));
        assert!(NotificationRecord::child("").validate().is_err());
        assert_eq!(
            NotificationRecord::child("com.mail").validate().unwrap(),
            "com.mail"
        );
    }

    #[test]
    fn summary_flag_defaults_to_false_when_absent() {
        let record: NotificationRecord =
            serde_json::from_str(r#"{"source_id":"com.chat"}"#).unwrap();
        assert!(record.counts_toward_badge());
        assert!(!NotificationRecord::summary("com.chat").counts_toward_badge());
    }
}
