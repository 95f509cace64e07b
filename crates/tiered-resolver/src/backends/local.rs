//! Local file backend: a dotenv file and/or a YAML document

use super::{Backend, FetchContext};
use crate::error::BackendError;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use serde_yaml_ng::Value;
use std::collections::HashMap;
use tiered_core::{BackendId, Key, ResolvedValue};
use tokio::sync::OnceCell;
use tracing::debug;

type Entries = HashMap<String, String>;

/// Reads keys from local files, loaded once on first use
///
/// YAML documents are flattened to dotted keys (`database.pool.size`).
/// Dotenv entries win over YAML entries with the same key; a dotenv entry is
/// also found under its dotted spelling (`DB_PASSWORD` for `db.password`).
/// A file that does not exist contributes nothing. A read or parse failure
/// is reported and the files are tried again on the next fetch.
#[derive(Debug)]
pub struct LocalBackend {
    id: BackendId,
    dotenv: Option<Utf8PathBuf>,
    yaml: Option<Utf8PathBuf>,
    loaded: OnceCell<Entries>,
}

impl LocalBackend {
    pub fn new(id: BackendId) -> Self {
        Self {
            id,
            dotenv: None,
            yaml: None,
            loaded: OnceCell::new(),
        }
    }

    pub fn with_dotenv(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.dotenv = Some(path.into());
        self
    }

    pub fn with_yaml(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.yaml = Some(path.into());
        self
    }

    async fn entries(&self) -> Result<&Entries, BackendError> {
        self.loaded.get_or_try_init(|| self.load()).await
    }

    async fn load(&self) -> Result<Entries, BackendError> {
        let mut entries = Entries::new();

        if let Some(path) = &self.yaml {
            if let Some(content) = read_optional(path).await? {
                let doc: Value = serde_yaml_ng::from_str(&content).map_err(|e| {
                    BackendError::unavailable(format!("Failed to parse {}: {}", path, e))
                })?;
                flatten_yaml(None, &doc, &mut entries);
                debug!("Loaded {} entries from {}", entries.len(), path);
            }
        }

        if let Some(path) = &self.dotenv {
            if let Some(content) = read_optional(path).await? {
                let mut count = 0;
                for item in dotenvy::from_read_iter(content.as_bytes()) {
                    let (name, value) = item.map_err(|e| {
                        BackendError::unavailable(format!("Failed to parse {}: {}", path, e))
                    })?;
                    entries.insert(name, value);
                    count += 1;
                }
                debug!("Loaded {} entries from {}", count, path);
            }
        }

        Ok(entries)
    }
}

async fn read_optional(path: &Utf8Path) -> Result<Option<String>, BackendError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("{} does not exist, skipping", path);
            Ok(None)
        }
        Err(e) => Err(BackendError::unavailable(format!(
            "Failed to read {}: {}",
            path, e
        ))),
    }
}

fn flatten_yaml(prefix: Option<&str>, value: &Value, out: &mut Entries) {
    let join = |segment: &str| match prefix {
        Some(prefix) => format!("{}.{}", prefix, segment),
        None => segment.to_string(),
    };

    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                if let Some(segment) = scalar_to_string(k) {
                    flatten_yaml(Some(&join(&segment)), v, out);
                }
            }
        }
        Value::Sequence(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_yaml(Some(&join(&i.to_string())), v, out);
            }
        }
        Value::Tagged(tagged) => flatten_yaml(prefix, &tagged.value, out),
        scalar => {
            if let (Some(prefix), Some(s)) = (prefix, scalar_to_string(scalar)) {
                out.insert(prefix.to_string(), s);
            }
        }
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn dotenv_spelling(key: &Key) -> String {
    key.as_str()
        .chars()
        .map(|c| match c {
            '.' | '-' | '/' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

#[async_trait]
impl Backend for LocalBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    async fn fetch(&self, key: &Key, ctx: &FetchContext) -> Result<ResolvedValue, BackendError> {
        let entries = self.entries().await?;

        entries
            .get(key.as_str())
            .or_else(|| entries.get(&dotenv_spelling(key)))
            .map(|value| ctx.value(key, value.as_str(), self.id.clone()))
            .ok_or_else(|| BackendError::not_found(format!("'{}' is not in any local file", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendErrorKind;
    use std::time::Duration;
    use tempfile::TempDir;
    use tiered_core::Kind;
    use tokio::time::Instant;

    fn ctx() -> FetchContext {
        FetchContext::new(Kind::Config, Instant::now() + Duration::from_secs(1))
    }

    fn dir() -> (TempDir, Utf8PathBuf) {
        let tmp = TempDir::new().unwrap();
        let path = Utf8PathBuf::try_from(tmp.path().to_path_buf()).unwrap();
        (tmp, path)
    }

    #[tokio::test]
    async fn test_yaml_is_flattened() {
        let (_tmp, dir) = dir();
        let path = dir.join("config.yaml");
        std::fs::write(
            &path,
            "database:\n  host: db.internal\n  pool:\n    size: 8\nzones: [a, b]\n",
        )
        .unwrap();

        let backend = LocalBackend::new(BackendId::from("local")).with_yaml(&path);

        let host = backend.fetch(&Key::from("database.host"), &ctx()).await.unwrap();
        assert_eq!(host.value.as_str(), Some("db.internal"));

        let size = backend.fetch(&Key::from("database.pool.size"), &ctx()).await.unwrap();
        assert_eq!(size.value.as_str(), Some("8"));

        let zone = backend.fetch(&Key::from("zones.1"), &ctx()).await.unwrap();
        assert_eq!(zone.value.as_str(), Some("b"));
    }

    #[tokio::test]
    async fn test_dotenv_wins_over_yaml() {
        let (_tmp, dir) = dir();
        std::fs::write(dir.join(".env"), "DB_PASSWORD=from-dotenv\nregion=eu-west-1\n").unwrap();
        std::fs::write(dir.join("config.yaml"), "db:\n  password: from-yaml\n").unwrap();

        let backend = LocalBackend::new(BackendId::from("local"))
            .with_dotenv(dir.join(".env"))
            .with_yaml(dir.join("config.yaml"));

        let password = backend.fetch(&Key::from("DB_PASSWORD"), &ctx()).await.unwrap();
        assert_eq!(password.value.as_str(), Some("from-dotenv"));

        // the dotted key hits the YAML entry directly
        let dotted = backend.fetch(&Key::from("db.password"), &ctx()).await.unwrap();
        assert_eq!(dotted.value.as_str(), Some("from-yaml"));

        let region = backend.fetch(&Key::from("region"), &ctx()).await.unwrap();
        assert_eq!(region.value.as_str(), Some("eu-west-1"));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let (_tmp, dir) = dir();
        let backend = LocalBackend::new(BackendId::from("local")).with_dotenv(dir.join("absent.env"));

        let err = backend.fetch(&Key::from("anything"), &ctx()).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_malformed_yaml_is_unavailable() {
        let (_tmp, dir) = dir();
        let path = dir.join("broken.yaml");
        std::fs::write(&path, "key: [unclosed\n").unwrap();

        let backend = LocalBackend::new(BackendId::from("local")).with_yaml(&path);
        let err = backend.fetch(&Key::from("key"), &ctx()).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn test_failed_load_is_retried() {
        let (_tmp, dir) = dir();
        let path = dir.join("config.yaml");
        std::fs::write(&path, "key: [unclosed\n").unwrap();

        let backend = LocalBackend::new(BackendId::from("local")).with_yaml(&path);
        let err = backend.fetch(&Key::from("key"), &ctx()).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Unavailable);

        std::fs::write(&path, "key: fixed\n").unwrap();
        let value = backend.fetch(&Key::from("key"), &ctx()).await.unwrap();
        assert_eq!(value.value.as_str(), Some("fixed"));
    }

    #[tokio::test]
    async fn test_files_are_read_once() {
        let (_tmp, dir) = dir();
        let path = dir.join(".env");
        std::fs::write(&path, "TOKEN=first\n").unwrap();

        let backend = LocalBackend::new(BackendId::from("local")).with_dotenv(&path);
        backend.fetch(&Key::from("TOKEN"), &ctx()).await.unwrap();

        std::fs::write(&path, "TOKEN=second\n").unwrap();
        let value = backend.fetch(&Key::from("TOKEN"), &ctx()).await.unwrap();
        assert_eq!(value.value.as_str(), Some("first"));
    }
}
