//! Core types for value resolution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::Error;

/// Default TTL for secrets (5 minutes)
pub const DEFAULT_SECRET_TTL_SECS: u64 = 300;

/// Default TTL for config values (15 minutes)
pub const DEFAULT_CONFIG_TTL_SECS: u64 = 900;

/// Logical identifier for a configuration value, secret or metadata field
///
/// Keys are opaque and case-sensitive: `db.password` and `DB.PASSWORD` are
/// different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Classification of a lookup, selecting which policy entry applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Secret,
    Config,
    Metadata,
}

impl Kind {
    /// Every kind, in display order
    pub const ALL: [Kind; 3] = [Kind::Secret, Kind::Config, Kind::Metadata];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Secret => "secret",
            Kind::Config => "config",
            Kind::Metadata => "metadata",
        }
    }

    /// TTL applied when a policy entry does not set one.
    ///
    /// Metadata defaults to no expiry: fields like the instance id never change
    /// for the life of the process.
    pub fn default_ttl(&self) -> Option<Duration> {
        match self {
            Kind::Secret => Some(Duration::from_secs(DEFAULT_SECRET_TTL_SECS)),
            Kind::Config => Some(Duration::from_secs(DEFAULT_CONFIG_TTL_SECS)),
            Kind::Metadata => None,
        }
    }

    /// Whether values of this kind must never be printed or logged
    pub fn is_sensitive(&self) -> bool {
        matches!(self, Kind::Secret)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "secret" => Ok(Kind::Secret),
            "config" => Ok(Kind::Config),
            "metadata" => Ok(Kind::Metadata),
            other => Err(Error::unknown_kind(other)),
        }
    }
}

/// Stable identifier of a backend instance (`env`, `vault:hcom`, `metadata`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(String);

impl BackendId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Provenance id for a value served by one endpoint of this backend,
    /// e.g. `metadata` + `v3` -> `metadata:v3`
    pub fn qualified(&self, detail: &str) -> BackendId {
        BackendId(format!("{}:{}", self.0, detail))
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackendId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Raw resolved bytes, zeroed on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// UTF-8 view of the payload, if it is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload([REDACTED {} bytes])", self.0.len())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

/// A value produced by a backend, with provenance and freshness
///
/// Never mutated once created: a changed value is a new `ResolvedValue`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedValue {
    pub key: Key,
    pub kind: Kind,
    pub value: Payload,
    pub source: BackendId,
    pub fetched_at: DateTime<Utc>,
    /// `None` means the value never expires
    pub ttl: Option<Duration>,
}

impl ResolvedValue {
    /// Instant after which the value is stale, or `None` if it never expires
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = chrono::Duration::from_std(self.ttl?).ok()?;
        self.fetched_at.checked_add_signed(ttl)
    }

    /// Whether the value is stale at `now` (`now >= fetched_at + ttl`)
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }
}

/// One versioned endpoint of a metadata-style backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointCandidate {
    /// Short label used for provenance (`v4`, `v3`, `override`)
    pub label: String,
    /// URL; a `{key}` placeholder is replaced by the looked-up key
    pub url: String,
    /// Higher ranks are probed first
    #[serde(rename = "rank")]
    pub version_rank: u32,
}

impl EndpointCandidate {
    pub fn new(label: impl Into<String>, url: impl Into<String>, version_rank: u32) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
            version_rank,
        }
    }

    /// URL to request for `key`
    pub fn url_for(&self, key: &Key) -> String {
        if self.url.contains("{key}") {
            self.url.replace("{key}", key.as_str())
        } else {
            self.url.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn value_with_ttl(ttl: Option<Duration>) -> ResolvedValue {
        ResolvedValue {
            key: Key::from("db.password"),
            kind: Kind::Secret,
            value: Payload::from("hunter2"),
            source: BackendId::from("env"),
            fetched_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            ttl,
        }
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("secret".parse::<Kind>().unwrap(), Kind::Secret);
        assert_eq!("METADATA".parse::<Kind>().unwrap(), Kind::Metadata);
        assert!("credentials".parse::<Kind>().is_err());
    }

    #[test]
    fn test_key_is_case_sensitive() {
        assert_ne!(Key::from("db.password"), Key::from("DB.PASSWORD"));
    }

    #[test]
    fn test_expiry_boundary() {
        let value = value_with_ttl(Some(Duration::from_secs(60)));
        let fetched = value.fetched_at;

        assert!(!value.is_expired_at(fetched + chrono::Duration::seconds(59)));
        // now == fetched_at + ttl counts as expired
        assert!(value.is_expired_at(fetched + chrono::Duration::seconds(60)));
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let value = value_with_ttl(None);
        assert_eq!(value.expires_at(), None);
        assert!(!value.is_expired_at(value.fetched_at + chrono::Duration::days(3650)));
    }

    #[test]
    fn test_huge_ttl_never_expires() {
        let value = value_with_ttl(Some(Duration::MAX));
        assert!(!value.is_expired_at(value.fetched_at + chrono::Duration::days(3650)));
    }

    #[test]
    fn test_payload_debug_redacted() {
        let payload = Payload::from("sensitive");
        let debug_str = format!("{:?}", payload);
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("sensitive"));
    }

    #[test]
    fn test_backend_id_qualified() {
        assert_eq!(BackendId::from("metadata").qualified("v3").as_str(), "metadata:v3");
    }

    #[test]
    fn test_candidate_url_for() {
        let templated = EndpointCandidate::new("v4", "http://169.254.170.2/v4/{key}", 4);
        assert_eq!(
            templated.url_for(&Key::from("task")),
            "http://169.254.170.2/v4/task"
        );

        let whole = EndpointCandidate::new("v3", "http://169.254.170.2/v3/metadata", 3);
        assert_eq!(
            whole.url_for(&Key::from("task")),
            "http://169.254.170.2/v3/metadata"
        );
    }
}
