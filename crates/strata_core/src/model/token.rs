//! Optimistic concurrency token.
//!
//! # Responsibility
//! - Carry the backend row version as one opaque value type.
//! - Provide the single equality contract used for optimistic locking.
//!
//! # Invariants
//! - Equality is byte-wise over the normalized representation.
//! - Numeric row stamps are always normalized to 8 little-endian bytes, so a
//!   stamp and the byte form read back from storage compare equal.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

const ROW_STAMP_WIDTH: usize = 8;

/// Opaque per-row version stamp.
///
/// Callers compare tokens; they never interpret them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(Vec<u8>);

impl VersionToken {
    /// Wraps a backend-maintained row-version byte sequence.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Converts a numeric row stamp into its fixed-width byte form.
    pub fn from_row_stamp(stamp: i64) -> Self {
        Self(stamp.to_le_bytes().to_vec())
    }

    /// Reads the token back as a numeric row stamp.
    ///
    /// Returns `None` when the token was not produced from an 8-byte stamp.
    pub fn as_row_stamp(&self) -> Option<i64> {
        let bytes: [u8; ROW_STAMP_WIDTH] = self.0.as_slice().try_into().ok()?;
        Some(i64::from_le_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for VersionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::VersionToken;

    #[test]
    fn row_stamp_and_its_byte_form_compare_equal() {
        let stamp = VersionToken::from_row_stamp(42);
        let bytes = VersionToken::from_bytes(42_i64.to_le_bytes().to_vec());
        assert_eq!(stamp, bytes);
        assert_eq!(bytes.as_row_stamp(), Some(42));
    }

    #[test]
    fn as_row_stamp_rejects_other_widths() {
        let token = VersionToken::from_bytes(vec![1, 2, 3]);
        assert_eq!(token.as_row_stamp(), None);
    }

    #[test]
    fn display_renders_lowercase_hex() {
        let token = VersionToken::from_bytes(vec![0x0a, 0xff, 0x00]);
        assert_eq!(token.to_string(), "0aff00");
    }

    #[test]
    fn different_stamps_are_not_equal() {
        assert_ne!(
            VersionToken::from_row_stamp(7),
            VersionToken::from_row_stamp(8)
        );
    }
}
