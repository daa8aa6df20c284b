//! Container ID formation and validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{BpmError, BpmResult};

/// A validated container ID.
///
/// BPM container IDs are deterministic: `<job>-<process>`, unique per
/// job and process pair. Both components must:
/// - Be non-empty
/// - Contain only alphanumeric characters, hyphens, underscores, and dots
/// - Start with an alphanumeric character
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Form the container ID for a process of a job.
    ///
    /// # Errors
    ///
    /// Returns an error if either component is empty or contains characters
    /// outside the BOSH-safe set.
    pub fn for_process(job: &str, process: &str) -> BpmResult<Self> {
        Self::validate_component(job)?;
        Self::validate_component(process)?;
        Ok(Self(format!("{job}-{process}")))
    }

    /// Get the container ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate_component(part: &str) -> BpmResult<()> {
        let invalid = || BpmError::InvalidContainerId {
            id: part.to_string(),
        };

        let first = part.chars().next().ok_or_else(invalid)?;
        if !first.is_ascii_alphanumeric() {
            return Err(invalid());
        }

        for c in part.chars() {
            if !c.is_ascii_alphanumeric() && c != '-' && c != '_' && c != '.' {
                return Err(invalid());
            }
        }

        Ok(())
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContainerId {
    type Err = BpmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::validate_component(s)?;
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for ContainerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
