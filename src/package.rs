//! The encrypted package wire format
//!
//! A package is a flat JSON object:
//!
//! ```json
//! {
//!   "v": 1,
//!   "alg": "AES-GCM",
//!   "iters": 250000,
//!   "salt": "<16 bytes, base64>",
//!   "iv": "<12 bytes, base64>",
//!   "ct": "<ciphertext + 16-byte tag, base64>"
//! }
//! ```
//!
//! File-mode packages also carry `"filename"`. Binary fields use the standard
//! base64 alphabet with padding.

use crate::error::{BitblockError, ErrorCategory, ErrorKind, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer, Serialize, de};
use std::fmt;

/// Format version written by this crate.
pub const VERSION: u32 = 1;

/// The only cipher suite identifier we produce or accept.
pub const ALGORITHM: &str = "AES-GCM";

/// Suffix appended to encrypted file names, and stripped again on decrypt.
pub const FILE_SUFFIX: &str = ".secure.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPackage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub v: u32,
    pub alg: String,
    /// Counts past `u64::MAX` saturate; [`crate::codec::decrypt`] caps them.
    #[serde(deserialize_with = "deserialize_iterations")]
    pub iters: u64,
    pub salt: String,
    pub iv: String,
    pub ct: String,
}

impl EncryptedPackage {
    /// Parse a package from its JSON text.
    ///
    /// Only structure is checked here. Version, algorithm and field contents
    /// are validated by [`crate::codec::decrypt`], which knows the order the
    /// checks must run in.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json.trim()).map_err(|e| {
            BitblockError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::MalformedPackage,
                format!("input is not a valid encrypted package: {}", e),
                e,
            )
        })
    }

    /// Render the package as pretty-printed JSON (two-space indent).
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            BitblockError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to serialize package",
                e,
            )
        })
    }

    /// Attach the original file name, as file-mode encryption does.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Accepts any non-negative JSON integer as an iteration count.
///
/// serde_json hands integers too large for `u64` over as floats, so a float
/// at or beyond `u64::MAX` is taken as a huge integer. Other floats and
/// negative numbers are rejected.
fn deserialize_iterations<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct IterationsVisitor;

    impl de::Visitor<'_> for IterationsVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a non-negative integer")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<u64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<u64, E> {
            u64::try_from(v).map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<u64, E> {
            if v.is_finite() && v >= u64::MAX as f64 {
                Ok(u64::MAX)
            } else {
                Err(E::invalid_value(de::Unexpected::Float(v), &self))
            }
        }
    }

    deserializer.deserialize_any(IterationsVisitor)
}

pub(crate) fn encode_field(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode one base64 field. `name` is the JSON field name, for the message.
pub(crate) fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD.decode(value.trim()).map_err(|e| {
        BitblockError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::MalformedPackage,
            format!("package field '{}' is not valid base64: {}", name, e),
            e,
        )
    })
}

/// Decode a base64 field that must hold exactly `N` bytes.
pub(crate) fn decode_fixed<const N: usize>(name: &str, value: &str) -> Result<[u8; N]> {
    let bytes = decode_field(name, value)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        BitblockError::with_kind(
            ErrorCategory::User,
            ErrorKind::MalformedPackage,
            format!(
                "package field '{}' must decode to {} bytes, got {}",
                name, N, len
            ),
        )
    })
}

/// Strip a trailing `.secure.json`, ignoring ASCII case.
pub fn strip_file_suffix(name: &str) -> &str {
    let cut = name.len().checked_sub(FILE_SUFFIX.len());
    match cut {
        Some(at)
            if name.is_char_boundary(at) && name[at..].eq_ignore_ascii_case(FILE_SUFFIX) =>
        {
            &name[..at]
        }
        _ => name,
    }
}
