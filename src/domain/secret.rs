//! Secret record types
//!
//! Defines the canonical stored entity and its projections, plus the
//! backing-store selector shared by configuration and adapter dispatch.

use crate::domain::template;
use crate::errors::{KeyplaneError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Reserved bootstrap secret name. Its presence signals that first-run
/// initialization has completed.
pub const KEYSTONE_SECRET_NAME: &str = "keyplane-keystone";

/// Durable destination for secret records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackingStoreKind {
    /// No persistence; secrets live only in memory
    Memory,
    /// Encrypted files on the local filesystem
    #[default]
    File,
    /// Cluster-native key/value objects
    Cluster,
    /// Relational database table
    Relational,
    /// AWS Secrets Manager (not yet implemented)
    AwsSecret,
    /// Azure Key Vault (not yet implemented)
    AzureSecret,
    /// GCP Secret Manager (not yet implemented)
    GcpSecret,
}

impl BackingStoreKind {
    /// Get the canonical string representation of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::File => "file",
            Self::Cluster => "cluster",
            Self::Relational => "relational",
            Self::AwsSecret => "aws-secret",
            Self::AzureSecret => "azure-secret",
            Self::GcpSecret => "gcp-secret",
        }
    }
}

impl FromStr for BackingStoreKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "cluster" => Ok(Self::Cluster),
            "relational" => Ok(Self::Relational),
            "aws-secret" => Ok(Self::AwsSecret),
            "azure-secret" => Ok(Self::AzureSecret),
            "gcp-secret" => Ok(Self::GcpSecret),
            _ => Err(format!("Unknown backing store kind: {}", s)),
        }
    }
}

impl fmt::Display for BackingStoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output format of the transformed secret value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecretFormat {
    #[default]
    Json,
    Yaml,
    Raw,
}

/// Metadata that shapes how a secret is transformed and persisted.
///
/// None of these fields identify the secret; `correlation_id` exists for
/// tracing only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretMeta {
    /// Namespaces the secret is mirrored into. Defaults to `["default"]`.
    #[serde(default = "default_namespaces")]
    pub namespaces: Vec<String>,

    /// Template used to transform the secret value.
    /// Sample secret: `{"username":"admin","password":"keyplane-rocks"}`
    /// Sample template: `{"USER":"{{.username}}","PASS":"{{.password}}"}`
    #[serde(default)]
    pub template: String,

    /// Output format of the transformed value
    #[serde(default)]
    pub format: SecretFormat,

    /// Overrides the globally configured backing store for this secret
    #[serde(default)]
    pub backing_store: Option<BackingStoreKind>,

    /// Mirror this secret into cluster objects regardless of its name
    #[serde(default)]
    pub mirror: bool,

    /// Correlation id for tracing. Not an identity field.
    #[serde(default)]
    pub correlation_id: String,
}

fn default_namespaces() -> Vec<String> {
    vec!["default".to_string()]
}

impl Default for SecretMeta {
    fn default() -> Self {
        Self {
            namespaces: default_namespaces(),
            template: String::new(),
            format: SecretFormat::default(),
            backing_store: None,
            mirror: false,
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// The canonical stored secret entity.
///
/// Exactly one record exists per name in the in-memory index at any time.
/// `created` is set once on first insert; `updated` is refreshed on every
/// successful upsert, so `created <= updated` always holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    /// Unique identifier; immutable after creation
    pub name: String,

    /// Raw values. A secret can hold multiple values; empty entries are
    /// filtered out before the record is stored or persisted.
    #[serde(default)]
    pub values: Vec<String>,

    /// Template-transformed, format-validated projection of `values`.
    /// This is the value served to readers.
    #[serde(default)]
    pub value_transformed: String,

    /// Additional information shaping transformation and persistence
    #[serde(default)]
    pub meta: SecretMeta,

    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,

    /// Invalid before this time
    #[serde(default = "Utc::now")]
    pub not_before: DateTime<Utc>,

    /// Invalid after this time
    #[serde(default = "far_future")]
    pub expires_after: DateTime<Utc>,
}

/// Sentinel for "never expires"
pub(crate) fn far_future() -> DateTime<Utc> {
    DateTime::<Utc>::MAX_UTC
}

impl SecretRecord {
    /// Create a record with the given name and values, valid from now,
    /// never expiring.
    pub fn new<S: Into<String>>(name: S, values: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            values,
            value_transformed: String::new(),
            meta: SecretMeta::default(),
            created: now,
            updated: now,
            not_before: now,
            expires_after: far_future(),
        }
    }

    /// Set the validity window from RFC 3339 strings. Unspecified or
    /// unparsable bounds fall back to "now" and "never expires".
    pub fn with_validity(mut self, not_before: Option<&str>, expires_after: Option<&str>) -> Self {
        self.not_before = parse_time(not_before).unwrap_or_else(Utc::now);
        self.expires_after = parse_time(expires_after).unwrap_or_else(far_future);
        self
    }

    /// True iff the record is within its validity window at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now < self.expires_after
    }

    /// Render the transformed projection of the values.
    ///
    /// Each value goes through the template/format transform; empty results
    /// are dropped. A single surviving value is returned as-is, multiple
    /// values as a JSON array. Fails only when nothing survives.
    pub fn render_transformed(&self) -> Result<String> {
        let results: Vec<String> = self
            .values
            .iter()
            .map(|v| template::transform(&self.meta, v))
            .filter(|t| !t.is_empty())
            .collect();

        match results.len() {
            0 => Err(KeyplaneError::internal(format!(
                "no renderable values for secret {}",
                self.name
            ))),
            1 => Ok(results.into_iter().next().unwrap_or_default()),
            _ => Ok(serde_json::to_string(&results)?),
        }
    }

    /// Whether this record may be mirrored into cluster objects: its name
    /// carries the mirror prefix or its metadata opts in, and it is not
    /// under the raw prefix.
    pub fn mirror_eligible(&self, mirror_prefix: &str, raw_prefix: &str) -> bool {
        if self.name.starts_with(raw_prefix) {
            return false;
        }
        self.name.starts_with(mirror_prefix) || self.meta.mirror
    }

    /// Build the byte-valued payload of the mirrored cluster object.
    ///
    /// Derived from the first value: the template reshapes it when present
    /// and applicable; otherwise the value parses as a flat JSON map; as a
    /// last resort the whole value lands under a single `VALUE` key.
    pub fn to_cluster_payload(&self) -> HashMap<String, Vec<u8>> {
        let Some(first) = self.values.first() else {
            return HashMap::new();
        };

        let rendered = if self.meta.template.trim().is_empty() {
            first.clone()
        } else {
            template::try_parse(&self.meta.template, first)
        };

        if let Ok(map) = serde_json::from_str::<HashMap<String, String>>(&rendered) {
            return map.into_iter().map(|(k, v)| (k, v.into_bytes())).collect();
        }
        if let Ok(map) = serde_json::from_str::<HashMap<String, String>>(first) {
            return map.into_iter().map(|(k, v)| (k, v.into_bytes())).collect();
        }

        HashMap::from([("VALUE".to_string(), first.clone().into_bytes())])
    }
}

fn parse_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc))
}

/// Metadata-only projection of a secret, safe to expose to observation
/// surfaces: no values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretView {
    pub name: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub expires_after: DateTime<Utc>,
}

impl From<&SecretRecord> for SecretView {
    fn from(record: &SecretRecord) -> Self {
        Self {
            name: record.name.clone(),
            created: record.created,
            updated: record.updated,
            not_before: record.not_before,
            expires_after: record.expires_after,
        }
    }
}

/// A secret with each value passed through the encryption codec. Safe to
/// list since the values are ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedSecretRecord {
    pub name: String,
    #[serde(rename = "value")]
    pub encrypted_values: Vec<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub not_before: DateTime<Utc>,
    pub expires_after: DateTime<Utc>,
}
