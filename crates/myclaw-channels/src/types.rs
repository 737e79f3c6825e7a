use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Runtime connection state of a channel adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Running,
    Stopped,
    Error(String),
}

/// Sender allowlist shared by every channel (§3 Channel, §4.2).
///
/// An empty allowlist permits every sender; otherwise membership is
/// required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Allowlist(HashSet<String>);

impl Allowlist {
    pub fn new(ids: impl IntoIterator<Item = String>) -> Self {
        Self(ids.into_iter().collect())
    }

    pub fn is_allowed(&self, sender_id: &str) -> bool {
        self.0.is_empty() || self.0.contains(sender_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowlist_permits_all() {
        let allow = Allowlist::default();
        assert!(allow.is_allowed("anyone"));
    }

    #[test]
    fn nonempty_allowlist_requires_membership() {
        let allow = Allowlist::new(["zhangsan".to_string()]);
        assert!(allow.is_allowed("zhangsan"));
        assert!(!allow.is_allowed("lisi"));
    }
}
