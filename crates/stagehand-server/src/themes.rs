//! Theme packages: a stylesheet plus a locale table, one directory per theme.
//!
//! ```text
//! themes/
//!   neon/
//!     style.css
//!     locales.json   {"alert.follow": "{name} joined the crew"}
//! ```
//!
//! The `default` theme always exists, even without a directory.

use futures_util::future::BoxFuture;
use serde::Serialize;
use stagehand_types::{Locales, DEFAULT_THEME_ID};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

const STYLE_FILE: &str = "style.css";
const LOCALES_FILE: &str = "locales.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThemePackage {
    pub id: String,
    pub css: String,
    pub locales: Locales,
}

impl ThemePackage {
    fn builtin() -> Self {
        Self {
            id: DEFAULT_THEME_ID.to_string(),
            css: String::new(),
            locales: Locales::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("unknown theme: {0}")]
    NotFound(String),

    #[error("invalid theme id: {0:?}")]
    InvalidId(String),

    #[error("failed to read theme: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid locales for theme {id}: {source}")]
    Locales {
        id: String,
        source: serde_json::Error,
    },
}

/// Source of theme packages.
pub trait ThemeCatalog: Send + Sync + 'static {
    fn load<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<ThemePackage, ThemeError>>;

    /// Ids of every available theme, sorted.
    fn list(&self) -> BoxFuture<'_, Result<Vec<String>, ThemeError>>;
}

/// [`ThemeCatalog`] reading packages from a directory.
#[derive(Debug, Clone)]
pub struct DirectoryThemeCatalog {
    root: PathBuf,
}

impl DirectoryThemeCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn load_package(&self, id: &str) -> Result<ThemePackage, ThemeError> {
        if !is_valid_id(id) {
            return Err(ThemeError::InvalidId(id.to_string()));
        }
        let dir = self.root.join(id);
        if !tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            if id == DEFAULT_THEME_ID {
                return Ok(ThemePackage::builtin());
            }
            return Err(ThemeError::NotFound(id.to_string()));
        }

        let css = read_optional(dir.join(STYLE_FILE)).await?.unwrap_or_default();
        let locales = match read_optional(dir.join(LOCALES_FILE)).await? {
            Some(raw) => {
                let table: HashMap<String, String> =
                    serde_json::from_str(&raw).map_err(|source| ThemeError::Locales {
                        id: id.to_string(),
                        source,
                    })?;
                Locales::new(table)
            }
            None => Locales::default(),
        };

        tracing::debug!(theme = id, locales = locales.len(), "loaded theme package");
        Ok(ThemePackage {
            id: id.to_string(),
            css,
            locales,
        })
    }

    async fn list_ids(&self) -> Result<Vec<String>, ThemeError> {
        let mut ids = vec![DEFAULT_THEME_ID.to_string()];
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if is_valid_id(name) && name != DEFAULT_THEME_ID {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl ThemeCatalog for DirectoryThemeCatalog {
    fn load<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<ThemePackage, ThemeError>> {
        Box::pin(self.load_package(id))
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<String>, ThemeError>> {
        Box::pin(self.list_ids())
    }
}

/// Ids are single path components made of ASCII letters, digits, `-` and `_`.
fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

async fn read_optional(path: PathBuf) -> Result<Option<String>, ThemeError> {
    match tokio::fs::read_to_string(&path).await {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
