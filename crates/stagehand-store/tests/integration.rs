use stagehand_store::{
    load_or_create, state_file, FilePersistor, PersistedState, Persistence, SnapshotOrigin,
};
use stagehand_types::{AppConfig, Ruleset, ThemeState};
use std::time::Duration;

fn custom_state(channel: &str) -> PersistedState {
    let config = AppConfig {
        channel: channel.to_string(),
        ..AppConfig::default()
    };
    PersistedState::new(config, Ruleset::builtin(), ThemeState::default())
}

async fn read_back(path: &std::path::Path) -> PersistedState {
    let raw = tokio::fs::read(path).await.expect("snapshot should exist");
    serde_json::from_slice(&raw).expect("snapshot should parse")
}

// ── loader ───────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_file_is_created_from_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("nested");
    let defaults = PersistedState::default();

    let loaded = load_or_create(&data_dir, &defaults).await.unwrap();
    assert_eq!(loaded.origin, SnapshotOrigin::Created);
    assert_eq!(loaded.state, defaults);
    assert_eq!(read_back(&state_file(&data_dir)).await, defaults);
}

#[tokio::test]
async fn valid_file_is_loaded_as_is() {
    let dir = tempfile::tempdir().unwrap();
    let saved = custom_state("somechannel");
    tokio::fs::write(
        state_file(dir.path()),
        serde_json::to_vec(&saved).unwrap(),
    )
    .await
    .unwrap();

    let loaded = load_or_create(dir.path(), &PersistedState::default())
        .await
        .unwrap();
    assert_eq!(loaded.origin, SnapshotOrigin::Loaded);
    assert_eq!(loaded.state.config.channel, "somechannel");
}

#[tokio::test]
async fn snapshot_without_theme_is_migrated() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = serde_json::json!({
        "version": 1,
        "config": { "channel": "legacy", "maxMessages": 20 },
        "rules": { "version": 1, "rules": [] }
    });
    tokio::fs::write(state_file(dir.path()), legacy.to_string())
        .await
        .unwrap();

    let defaults = PersistedState::default();
    let loaded = load_or_create(dir.path(), &defaults).await.unwrap();
    assert_eq!(loaded.origin, SnapshotOrigin::Migrated);
    assert_eq!(loaded.state.config.channel, "legacy");
    assert_eq!(loaded.state.config.max_messages, 20);
    assert_eq!(loaded.state.theme, defaults.theme);
}

#[tokio::test]
async fn corrupt_or_invalid_files_fall_back_to_defaults() {
    let bad_inputs = [
        "{ not json".to_string(),
        "[]".to_string(),
        serde_json::json!({"version": 2, "config": {}, "rules": {}, "theme": {}}).to_string(),
        serde_json::json!({
            "version": 1,
            "config": { "channel": "", "maxMessages": 50 },
            "rules": { "version": 1, "rules": [] },
            "theme": { "activeThemeId": "default", "values": {} }
        })
        .to_string(),
    ];

    for input in bad_inputs {
        let dir = tempfile::tempdir().unwrap();
        let path = state_file(dir.path());
        tokio::fs::write(&path, &input).await.unwrap();

        let defaults = PersistedState::default();
        let loaded = load_or_create(dir.path(), &defaults).await.unwrap();
        assert_eq!(loaded.origin, SnapshotOrigin::Recovered, "input: {input}");
        assert_eq!(loaded.state, defaults);
        assert_eq!(read_back(&path).await, defaults, "file should be rewritten");
    }
}

#[tokio::test]
async fn unreadable_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    // A directory in place of the snapshot can be neither read nor replaced.
    std::fs::create_dir(state_file(dir.path())).unwrap();

    let defaults = PersistedState::default();
    let loaded = load_or_create(dir.path(), &defaults).await.unwrap();
    assert_eq!(loaded.origin, SnapshotOrigin::Recovered);
    assert_eq!(loaded.state, defaults);
    assert!(state_file(dir.path()).is_dir());
}

// ── persistor ────────────────────────────────────────────────────────

#[tokio::test]
async fn scheduled_snapshots_coalesce_and_last_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = state_file(dir.path());
    let persistor = FilePersistor::new(path.clone(), Duration::from_millis(50));

    let a = persistor.schedule(custom_state("a"));
    let b = persistor.schedule(custom_state("b"));
    let c = persistor.schedule(custom_state("c"));

    let (ra, rb, rc) = tokio::join!(a, b, c);
    assert!(ra.is_ok() && rb.is_ok() && rc.is_ok());
    assert_eq!(read_back(&path).await.config.channel, "c");
}

#[tokio::test]
async fn flush_writes_pending_snapshot_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let path = state_file(dir.path());
    let persistor = FilePersistor::new(path.clone(), Duration::from_secs(60));

    let scheduled = persistor.schedule(custom_state("flushed"));
    tokio::time::timeout(Duration::from_secs(5), persistor.flush())
        .await
        .expect("flush should not wait for the debounce")
        .unwrap();
    assert!(scheduled.await.is_ok());
    assert_eq!(read_back(&path).await.config.channel, "flushed");

    // Nothing pending: flushing again is a no-op.
    persistor.flush().await.unwrap();
}

#[tokio::test]
async fn write_failures_reach_every_waiter() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    tokio::fs::write(&blocker, b"file").await.unwrap();
    let persistor = FilePersistor::new(blocker.join("state.json"), Duration::from_millis(10));

    let first = persistor.schedule(custom_state("x"));
    let second = persistor.schedule(custom_state("y"));
    let (r1, r2) = tokio::join!(first, second);
    assert!(r1.is_err());
    assert_eq!(r1, r2);
}
