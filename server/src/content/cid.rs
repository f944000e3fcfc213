use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Two-character prefix every content identifier starts with.
pub const CID_PREFIX: &str = "Qm";

/// Number of alphanumeric characters following the prefix.
pub const CID_BODY_LEN: usize = 44;

static CID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Qm[A-Za-z0-9]{44}").expect("static CID pattern is valid"));

/// A content identifier naming an immutable blob in the storage network.
///
/// Only obtainable through [`extract_content_id`] or validated parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid content identifier {0:?}: expected \"Qm\" followed by 44 alphanumeric characters")]
pub struct InvalidContentId(pub String);

impl ContentId {
    /// Validate a complete identifier (surrounding whitespace is ignored).
    pub fn parse(value: &str) -> Result<Self, InvalidContentId> {
        let value = value.trim();
        let valid = value.len() == CID_PREFIX.len() + CID_BODY_LEN
            && value.starts_with(CID_PREFIX)
            && value[CID_PREFIX.len()..]
                .bytes()
                .all(|b| b.is_ascii_alphanumeric());
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(InvalidContentId(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for ContentId {
    type Err = InvalidContentId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentId {
    type Error = InvalidContentId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentId> for String {
    fn from(cid: ContentId) -> Self {
        cid.0
    }
}

/// Find the first content identifier embedded in raw log data.
///
/// Bytes are decoded lossily, so ABI padding and length words around the
/// identifier do not prevent a match.
pub fn extract_content_id(raw: &[u8]) -> Option<ContentId> {
    let text = String::from_utf8_lossy(raw);
    CID_PATTERN
        .find(&text)
        .map(|m| ContentId(m.as_str().to_string()))
}
