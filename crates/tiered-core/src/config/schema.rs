//! On-disk configuration format (`tiered.yaml`)

use crate::error::{Error, Result};
use crate::policy::{PolicyEntry, RetryPolicy, DEFAULT_FAILURE_THRESHOLD};
use crate::types::{BackendId, EndpointCandidate};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// The whole configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TieredConfigFile {
    #[serde(default)]
    pub settings: Settings,

    /// Backoff timing shared by every backend; attempt counts come from
    /// each policy entry's `max-retries`
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    #[serde(default)]
    pub policy: Vec<PolicyEntry>,
}

/// Process-wide resolver settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// Upper bound on backend calls in flight at once
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Failures in a row before a sticky metadata endpoint is demoted
    #[serde(default = "default_failure_threshold")]
    pub consecutive_failure_threshold: u32,

    /// Interval of the optional background cache sweep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_interval_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: default_max_concurrent_fetches(),
            consecutive_failure_threshold: default_failure_threshold(),
            sweep_interval_secs: None,
        }
    }
}

fn default_max_concurrent_fetches() -> usize {
    16
}
fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

/// One backend definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: BackendId,
    #[serde(flatten)]
    pub spec: BackendSpec,
}

/// Backend type and its parameters, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum BackendSpec {
    /// Process environment; `db.password` is looked up as `DB_PASSWORD`
    Env {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },

    /// Local dotenv and/or YAML files
    Local {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dotenv: Option<Utf8PathBuf>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        yaml: Option<Utf8PathBuf>,
    },

    /// Values injected directly in the config file
    Static {
        #[serde(default)]
        values: BTreeMap<String, String>,
    },

    /// Remote key-value store over HTTP: `GET {base-url}/{key}`
    HttpStore {
        base_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_env: Option<String>,
        /// JSON pointer to the value inside the response body
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value_pointer: Option<String>,
    },

    /// Vault KV v2
    Vault {
        address: String,
        #[serde(default = "default_vault_mount")]
        mount: String,
        #[serde(default = "default_vault_token_env")]
        token_env: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
        /// Field read when the key names no `#field`
        #[serde(default = "default_vault_field")]
        field: String,
    },

    /// Versioned instance-metadata endpoints
    Metadata {
        candidates: Vec<EndpointCandidate>,
        /// Env var holding a URL that outranks every candidate when set
        #[serde(default, skip_serializing_if = "Option::is_none")]
        override_env: Option<String>,
        #[serde(default = "default_probe_timeout_ms")]
        probe_timeout_ms: u64,
    },
}

fn default_vault_mount() -> String {
    "secret".to_string()
}
fn default_vault_token_env() -> String {
    "VAULT_TOKEN".to_string()
}
fn default_vault_field() -> String {
    "value".to_string()
}
fn default_probe_timeout_ms() -> u64 {
    1000
}

impl BackendSpec {
    pub fn type_name(&self) -> &'static str {
        match self {
            BackendSpec::Env { .. } => "env",
            BackendSpec::Local { .. } => "local",
            BackendSpec::Static { .. } => "static",
            BackendSpec::HttpStore { .. } => "http-store",
            BackendSpec::Vault { .. } => "vault",
            BackendSpec::Metadata { .. } => "metadata",
        }
    }
}

impl BackendConfig {
    /// Check parameters that serde alone cannot
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(Error::invalid_config(format!(
                "backend '{}' ({}): {}",
                self.id,
                self.spec.type_name(),
                message
            )))
        };

        match &self.spec {
            BackendSpec::Local { dotenv: None, yaml: None } => {
                invalid("at least one of dotenv or yaml is required")
            }
            BackendSpec::HttpStore { base_url, .. }
                if !(base_url.starts_with("http://") || base_url.starts_with("https://")) =>
            {
                invalid("base-url must be an http(s) URL")
            }
            BackendSpec::Vault { address, .. } if address.is_empty() => {
                invalid("address is required")
            }
            BackendSpec::Metadata { candidates, .. } => {
                if candidates.is_empty() {
                    return invalid("at least one candidate endpoint is required");
                }
                let mut labels = HashSet::new();
                let mut ranks = HashSet::new();
                for candidate in candidates {
                    if !labels.insert(candidate.label.as_str()) {
                        return invalid(&format!("duplicate candidate label '{}'", candidate.label));
                    }
                    if !ranks.insert(candidate.version_rank) {
                        return invalid(&format!("duplicate candidate rank {}", candidate.version_rank));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Make file paths absolute relative to `base_dir`, expanding `~`
    pub fn resolve_paths(&mut self, base_dir: &Utf8Path) {
        if let BackendSpec::Local { dotenv, yaml } = &mut self.spec {
            for path in [dotenv, yaml].into_iter().flatten() {
                *path = resolve_path(path, base_dir);
            }
        }
    }
}

fn resolve_path(path: &Utf8Path, base_dir: &Utf8Path) -> Utf8PathBuf {
    let expanded = Utf8PathBuf::from(shellexpand::tilde(path.as_str()).as_ref());
    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_specs_parse() {
        let yaml = r#"
- id: env
  type: env
  prefix: APP
- id: paramstore
  type: http-store
  base-url: https://store.internal/v1/params
  token-env: STORE_TOKEN
  value-pointer: /value
- id: vault:hcom
  type: vault
  address: https://vault.hcom.example
- id: metadata
  type: metadata
  override-env: ECS_CONTAINER_METADATA_URI
  candidates:
    - { label: v4, url: "http://169.254.170.2/v4/metadata", rank: 4 }
    - { label: v3, url: "http://169.254.170.2/v3/metadata", rank: 3 }
"#;
        let backends: Vec<BackendConfig> = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(backends.len(), 4);

        assert_eq!(
            backends[0].spec,
            BackendSpec::Env {
                prefix: Some("APP".to_string())
            }
        );

        match &backends[2].spec {
            BackendSpec::Vault {
                mount,
                token_env,
                field,
                ..
            } => {
                assert_eq!(mount, "secret");
                assert_eq!(token_env, "VAULT_TOKEN");
                assert_eq!(field, "value");
            }
            other => panic!("Expected vault backend, got {:?}", other),
        }

        match &backends[3].spec {
            BackendSpec::Metadata {
                candidates,
                probe_timeout_ms,
                ..
            } => {
                assert_eq!(candidates.len(), 2);
                assert_eq!(candidates[0].version_rank, 4);
                assert_eq!(*probe_timeout_ms, 1000);
            }
            other => panic!("Expected metadata backend, got {:?}", other),
        }

        for backend in &backends {
            backend.validate().unwrap();
        }
    }

    #[test]
    fn test_unknown_backend_type_rejected() {
        let yaml = "- id: consul\n  type: consul\n";
        let result: std::result::Result<Vec<BackendConfig>, _> = serde_yaml_ng::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_local_requires_a_file() {
        let backend = BackendConfig {
            id: BackendId::from("local"),
            spec: BackendSpec::Local {
                dotenv: None,
                yaml: None,
            },
        };
        assert!(backend.validate().is_err());
    }

    #[test]
    fn test_metadata_duplicate_rank_rejected() {
        let backend = BackendConfig {
            id: BackendId::from("metadata"),
            spec: BackendSpec::Metadata {
                candidates: vec![
                    EndpointCandidate::new("v4", "http://a/v4", 4),
                    EndpointCandidate::new("v4b", "http://b/v4", 4),
                ],
                override_env: None,
                probe_timeout_ms: 1000,
            },
        };
        let err = backend.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate candidate rank"));
    }

    #[test]
    fn test_resolve_paths() {
        let mut backend = BackendConfig {
            id: BackendId::from("local"),
            spec: BackendSpec::Local {
                dotenv: Some(Utf8PathBuf::from(".env")),
                yaml: Some(Utf8PathBuf::from("/etc/app/config.yaml")),
            },
        };
        backend.resolve_paths(Utf8Path::new("/srv/app"));

        assert_eq!(
            backend.spec,
            BackendSpec::Local {
                dotenv: Some(Utf8PathBuf::from("/srv/app/.env")),
                yaml: Some(Utf8PathBuf::from("/etc/app/config.yaml")),
            }
        );
    }
}
