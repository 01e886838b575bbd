//! Versioned channels backing the Machine Runtime State (§3).
//!
//! Each channel wraps a value with a monotonic version counter that is
//! bumped only when the orchestrator detects the content actually changed —
//! the same discipline the teacher crate uses for its message/extra/error
//! channels, generalized here to the four channels this orchestrator needs:
//! `context`, `history`, `results`, `errors`.

use serde::{Deserialize, Serialize};

/// A value paired with a version counter.
pub trait Channel<T> {
    fn get(&self) -> &T;
    fn get_mut(&mut self) -> &mut T;
    fn version(&self) -> u32;

    /// Replaces the value, bumping the version only if it actually changed.
    fn set(&mut self, value: T)
    where
        T: PartialEq;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionedChannel<T> {
    value: T,
    version: u32,
}

impl<T> VersionedChannel<T> {
    #[must_use]
    pub fn new(value: T, version: u32) -> Self {
        Self { value, version }
    }
}

impl<T> Channel<T> for VersionedChannel<T> {
    fn get(&self) -> &T {
        &self.value
    }

    fn get_mut(&mut self) -> &mut T {
        &mut self.value
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn set(&mut self, value: T)
    where
        T: PartialEq,
    {
        if self.value != value {
            self.value = value;
            self.version += 1;
        }
    }
}

pub type ContextChannel = VersionedChannel<serde_json::Value>;
pub type HistoryChannel = VersionedChannel<Vec<HistoryEntry>>;
pub type ResultsChannel = VersionedChannel<serde_json::Value>;
pub type ErrorsChannel = VersionedChannel<Vec<crate::errors::ErrorRecord>>;

/// One entry in the `history` channel (§3): a visited node tagged with the
/// event/cause that brought the machine there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub node: String,
    pub cause: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub allow_back: bool,
}

impl HistoryEntry {
    #[must_use]
    pub fn new(node: impl Into<String>, cause: impl Into<String>, allow_back: bool) -> Self {
        Self {
            node: node.into(),
            cause: cause.into(),
            timestamp: chrono::Utc::now(),
            allow_back,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_bumps_version_only_on_actual_change() {
        let mut ch: ContextChannel = VersionedChannel::new(json!({"a": 1}), 0);
        ch.set(json!({"a": 1}));
        assert_eq!(ch.version(), 0);
        ch.set(json!({"a": 2}));
        assert_eq!(ch.version(), 1);
        assert_eq!(ch.get(), &json!({"a": 2}));
    }
}
