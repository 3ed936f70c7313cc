use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally supplied identity of whoever runs a worker
pub type OwnerId = String;

/// Identifier of one worker slot within a scene, formatted `"<owner>-<n>"`.
///
/// The counter lets one owner hold several slots on the same scene, e.g. one
/// per open browser tab.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(owner_id: &str, slot: u32) -> Self {
        WorkerId(format!("{}-{}", owner_id, slot))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(value: &str) -> Self {
        WorkerId(value.to_string())
    }
}
