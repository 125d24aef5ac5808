//! Identity types.
//!
//! `DeviceId` normalization strips `-` before any comparison, storage, or
//! logging — two device ids that differ only in dash placement refer to
//! the same device slot.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque user identity, as resolved by the Token Verifier (C1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized device identity. Construct only via [`DeviceId::normalize`] so
/// that two differently-dashed spellings of the same id always compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn normalize(raw: &str) -> Self {
        Self(raw.chars().filter(|c| *c != '-').collect())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_dashes() {
        assert_eq!(
            DeviceId::normalize("a1b2-c3d4-e5f6"),
            DeviceId::normalize("a1b2c3d4e5f6")
        );
    }

    #[test]
    fn normalize_is_identity_without_dashes() {
        assert_eq!(DeviceId::normalize("abc123").as_ref(), "abc123");
    }

    #[test]
    fn different_ids_are_not_equal() {
        assert_ne!(DeviceId::normalize("aaa-bbb"), DeviceId::normalize("aaa-ccc"));
    }
}
