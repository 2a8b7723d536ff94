//! Uploaded asset identifiers.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum accepted length of an asset id.
const MAX_ASSET_ID_LEN: usize = 64;

/// Errors from parsing an asset id supplied by a client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetIdError {
    #[error("asset id is empty")]
    Empty,

    #[error("asset id is longer than {MAX_ASSET_ID_LEN} characters")]
    TooLong,

    #[error("asset id contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Identifier of an uploaded input video.
///
/// Generated ids have the form `{unix_millis}-{9 digit suffix}`. Ids are also
/// used verbatim as file stems on disk, so only ASCII alphanumerics, `-` and
/// `_` are accepted when parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetId(String);

impl AssetId {
    /// Generate a fresh id from the current timestamp and a random suffix.
    pub fn generate() -> Self {
        Self::generate_with(&mut rand::rng())
    }

    /// Generate a fresh id drawing the suffix from `rng`.
    pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let suffix: u32 = rng.random_range(0..1_000_000_000);
        Self(format!("{}-{:09}", Utc::now().timestamp_millis(), suffix))
    }

    /// Validate and wrap an id received from a client.
    pub fn parse(s: impl Into<String>) -> Result<Self, AssetIdError> {
        let s = s.into();
        if s.is_empty() {
            return Err(AssetIdError::Empty);
        }
        if s.len() > MAX_ASSET_ID_LEN {
            return Err(AssetIdError::TooLong);
        }
        if let Some(c) = s.chars().find(|c| !is_id_char(*c)) {
            return Err(AssetIdError::InvalidChar(c));
        }
        Ok(Self(s))
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Characters allowed in asset and variation ids.
pub fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AssetId {
    type Err = AssetIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AssetId {
    type Error = AssetIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<AssetId> for String {
    fn from(id: AssetId) -> Self {
        id.0
    }
}
