//! The persisted snapshot and its startup loader.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stagehand_types::{AppConfig, Ruleset, ThemeState};
use std::path::{Path, PathBuf};

/// Current on-disk format version.
pub const SNAPSHOT_VERSION: u32 = 1;

const STATE_FILE_NAME: &str = "state.json";

/// The three lanes as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub config: AppConfig,
    pub rules: Ruleset,
    pub theme: ThemeState,
}

impl PersistedState {
    pub fn new(config: AppConfig, rules: Ruleset, theme: ThemeState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            config,
            rules,
            theme,
        }
    }
}

impl Default for PersistedState {
    fn default() -> Self {
        Self::new(AppConfig::default(), Ruleset::builtin(), ThemeState::default())
    }
}

/// How the snapshot returned by [`load_or_create`] was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOrigin {
    /// Read and validated as-is.
    Loaded,
    /// Read from an older layout without a theme lane.
    Migrated,
    /// No file existed; defaults were used.
    Created,
    /// The file was unreadable or invalid; defaults were used in its place.
    Recovered,
}

#[derive(Debug)]
pub struct LoadedSnapshot {
    pub state: PersistedState,
    pub origin: SnapshotOrigin,
    pub path: PathBuf,
}

/// Path of the snapshot file inside `data_dir`.
pub fn state_file(data_dir: &Path) -> PathBuf {
    data_dir.join(STATE_FILE_NAME)
}

/// Loads the snapshot from `data_dir`, creating or repairing it if needed.
///
/// Never fails on bad or unreadable content: `defaults` are returned and
/// written back on a best-effort basis.
///
/// # Errors
///
/// Returns `StoreError::Io` if the data directory cannot be created.
pub async fn load_or_create(
    data_dir: &Path,
    defaults: &PersistedState,
) -> Result<LoadedSnapshot, StoreError> {
    tokio::fs::create_dir_all(data_dir).await?;
    let path = state_file(data_dir);

    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no saved state, writing defaults");
            return Ok(fall_back(path, defaults, SnapshotOrigin::Created).await);
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "saved state is unreadable, using defaults");
            return Ok(fall_back(path, defaults, SnapshotOrigin::Recovered).await);
        }
    };

    match decode(&raw, defaults) {
        Ok((state, origin)) => {
            if origin == SnapshotOrigin::Migrated {
                tracing::warn!(path = %path.display(), "saved state has no theme lane, using default theme");
            }
            Ok(LoadedSnapshot {
                state,
                origin,
                path,
            })
        }
        Err(reason) => {
            tracing::error!(path = %path.display(), %reason, "saved state is invalid, using defaults");
            Ok(fall_back(path, defaults, SnapshotOrigin::Recovered).await)
        }
    }
}

async fn fall_back(path: PathBuf, defaults: &PersistedState, origin: SnapshotOrigin) -> LoadedSnapshot {
    if let Err(e) = write_atomic(&path, defaults).await {
        tracing::error!(path = %path.display(), error = %e, "failed to write default state");
    }
    LoadedSnapshot {
        state: defaults.clone(),
        origin,
        path,
    }
}

fn decode(raw: &[u8], defaults: &PersistedState) -> Result<(PersistedState, SnapshotOrigin), String> {
    let value: Value = serde_json::from_slice(raw).map_err(|e| e.to_string())?;
    let obj = value.as_object().ok_or("expected a JSON object")?;

    match obj.get("version").and_then(Value::as_u64) {
        Some(v) if v == u64::from(SNAPSHOT_VERSION) => {}
        other => return Err(format!("unsupported version {other:?}")),
    }

    let config: AppConfig = lane(obj.get("config"), "config")?;
    config.validate().map_err(|e| e.to_string())?;
    let rules: Ruleset = lane(obj.get("rules"), "rules")?;
    rules.validate().map_err(|e| e.to_string())?;

    let (theme, origin) = match obj.get("theme") {
        None => (defaults.theme.clone(), SnapshotOrigin::Migrated),
        Some(_) => {
            let theme: ThemeState = lane(obj.get("theme"), "theme")?;
            theme.validate().map_err(|e| e.to_string())?;
            (theme, SnapshotOrigin::Loaded)
        }
    };

    Ok((PersistedState::new(config, rules, theme), origin))
}

fn lane<T: serde::de::DeserializeOwned>(value: Option<&Value>, name: &str) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("missing {name}"))?;
    serde_json::from_value(value.clone()).map_err(|e| format!("{name}: {e}"))
}

/// Writes `state` to `path` through a sibling temp file and a rename.
pub(crate) async fn write_atomic(path: &Path, state: &PersistedState) -> Result<(), StoreError> {
    let data = serde_json::to_vec_pretty(state)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &data).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
