//! Optimistic lane commits with rollback.
//!
//! A mutation is validated against the merged value, applied in memory at
//! once and handed to persistence together with a fresh commit token for its
//! lane. When persistence answers, only the holder of the lane's latest
//! token may act: it acknowledges (revision bump, `*:changed` broadcast,
//! config hooks) or rolls back (restore, error to the requester, notice to
//! the other control clients). Older completions are dropped.
//!
//! Snapshots carry every lane, so a snapshot staged by one lane may hold
//! another lane's pending value. A rollback therefore schedules a fresh
//! snapshot of the restored state, which supersedes any earlier one.

use crate::hub::{rollback_details, Hub, HubError, Shared};
use crate::protocol::{NoticeLevel, ServerMessage};
use futures_util::future::BoxFuture;
use serde_json::Value;
use stagehand_state::{CommitToken, Lane};
use stagehand_store::{PersistError, PersistedState};
use stagehand_types::{
    AppConfig, ConfigPatch, FieldIssue, Locales, Ruleset, ThemePatch, ThemeState, ValidationError,
};
use uuid::Uuid;

/// Lane value to restore if persistence fails.
enum Revert {
    Config(AppConfig),
    Rules(Ruleset),
    Theme(ThemeState, Locales),
}

/// A mutation that was applied in memory and awaits persistence.
pub(crate) struct StagedCommit {
    origin: Uuid,
    token: CommitToken,
    revert: Revert,
    outcome: BoxFuture<'static, Result<(), PersistError>>,
}

impl Hub {
    pub(crate) async fn stage_config(
        &self,
        origin: Uuid,
        raw: Value,
    ) -> Result<StagedCommit, HubError> {
        let patch = ConfigPatch::from_value(raw)?;
        let mut shared = self.shared.lock().await;
        let previous = shared.state.config().clone();
        let next = previous.merged(&patch);
        next.validate()?;
        shared.state.set_config(next);
        Ok(self.issue(&mut shared, origin, Lane::Config, Revert::Config(previous)))
    }

    pub(crate) async fn stage_rules(
        &self,
        origin: Uuid,
        raw: Value,
    ) -> Result<StagedCommit, HubError> {
        let rules = Ruleset::from_value(raw)?;
        rules.validate()?;
        let mut shared = self.shared.lock().await;
        let previous = shared.state.ruleset().clone();
        shared.state.set_ruleset(rules);
        Ok(self.issue(&mut shared, origin, Lane::Rules, Revert::Rules(previous)))
    }

    pub(crate) async fn stage_theme(
        &self,
        origin: Uuid,
        raw: Value,
    ) -> Result<StagedCommit, HubError> {
        let patch = ThemePatch::from_value(raw)?;

        // The package is loaded before taking the lock; its locales become
        // active together with the new theme id.
        let package = match &patch.active_theme_id {
            Some(id) => {
                let id = id.trim();
                let package = self.themes.load(id).await.map_err(|e| ValidationError {
                    lane: "theme",
                    issues: vec![FieldIssue {
                        field: "activeThemeId".to_string(),
                        message: e.to_string(),
                    }],
                })?;
                Some(package)
            }
            None => None,
        };

        let mut shared = self.shared.lock().await;
        let previous = shared.state.theme().clone();
        let next = previous.merged(&patch);
        next.validate()?;
        let previous_locales = shared.state.locales().clone();
        let locales = match package {
            Some(package) => package.locales,
            None => previous_locales.clone(),
        };
        shared.state.set_theme(next, locales);
        Ok(self.issue(
            &mut shared,
            origin,
            Lane::Theme,
            Revert::Theme(previous, previous_locales),
        ))
    }

    /// Issues the lane's next commit token and schedules the snapshot.
    ///
    /// Runs under the state lock so snapshots reach persistence in the
    /// order their tokens were issued.
    fn issue(&self, shared: &mut Shared, origin: Uuid, lane: Lane, revert: Revert) -> StagedCommit {
        let token = shared.state.lanes_mut().issue(lane);
        tracing::debug!(lane = %lane, connection = %origin, "lane change applied, persisting");
        StagedCommit {
            origin,
            token,
            revert,
            outcome: self.persistence.schedule(snapshot_of(shared)),
        }
    }

    /// Waits for persistence and acknowledges or rolls back `staged`.
    pub(crate) async fn settle(&self, staged: StagedCommit) {
        let StagedCommit {
            origin,
            token,
            revert,
            outcome,
        } = staged;
        let result = outcome.await;
        let lane = token.lane();

        let mut shared = self.shared.lock().await;
        if !shared.state.lanes().is_current(token) {
            tracing::debug!(lane = %lane, "superseded commit settled, ignoring");
            return;
        }

        match result {
            Ok(()) => {
                let Some(rev) = shared.state.lanes_mut().commit(token) else {
                    return;
                };
                let frame = match lane {
                    Lane::Config => {
                        shared.state.settle_log_bound();
                        let patch = shared.acknowledged_config.diff(shared.state.config());
                        shared.acknowledged_config = shared.state.config().clone();
                        ServerMessage::ConfigChanged {
                            rev,
                            patch: patch.redacted(),
                        }
                    }
                    Lane::Rules => ServerMessage::RulesChanged {
                        rev,
                        data: shared.state.ruleset().clone(),
                    },
                    Lane::Theme => ServerMessage::ThemeChanged {
                        rev,
                        data: shared.state.theme().clone(),
                    },
                };
                self.broadcast(&frame).await;
                let committed = (lane == Lane::Config).then(|| shared.state.config().clone());
                drop(shared);

                tracing::info!(lane = %lane, rev, "lane change committed");
                if let Some(config) = committed {
                    self.run_config_hooks(&config);
                }
            }
            Err(e) => {
                match revert {
                    Revert::Config(previous) => {
                        shared.state.set_config(previous);
                        shared.state.settle_log_bound();
                    }
                    Revert::Rules(previous) => shared.state.set_ruleset(previous),
                    Revert::Theme(previous, locales) => shared.state.set_theme(previous, locales),
                }
                let rev = shared.state.revision(lane);
                tracing::error!(lane = %lane, error = %e, "persistence failed, change rolled back");

                let restored = self.persistence.schedule(snapshot_of(&shared));
                tokio::spawn(async move {
                    if let Err(e) = restored.await {
                        tracing::error!(lane = %lane, error = %e, "failed to persist rolled back state");
                    }
                });

                let message = format!("{lane} change rolled back: {e}");
                let error = HubError::Persistence(e).frame();
                let notice = ServerMessage::ControlNotice {
                    rev: Some(rev),
                    level: NoticeLevel::Error,
                    message,
                    details: rollback_details(lane),
                };
                if let Some(json) = error.encode() {
                    self.connections.send(origin, &json).await;
                }
                if let Some(json) = notice.encode() {
                    self.connections.notify_control(&json, Some(origin)).await;
                }
            }
        }
    }
}

fn snapshot_of(shared: &Shared) -> PersistedState {
    PersistedState::new(
        shared.state.config().clone(),
        shared.state.ruleset().clone(),
        shared.state.theme().clone(),
    )
}
