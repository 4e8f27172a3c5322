use std::fmt;

use serde::{Deserialize, Serialize};

/// Role-lifecycle of one server node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    #[default]
    Uninitialized,
    Syncing,
    Active,
    Passive,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "UNINITIALIZED",
            LifecycleState::Syncing => "SYNCING",
            LifecycleState::Active => "ACTIVE",
            LifecycleState::Passive => "PASSIVE",
        }
    }

    /// True while the node holds (or is receiving) a replica of another
    /// node's state.
    pub fn is_standby(self) -> bool {
        matches!(self, LifecycleState::Syncing | LifecycleState::Passive)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
