//! State and revision store for the Stagehand event pipeline.
//!
//! Holds the three mutable lanes and everything derived from them, the
//! bounded event log used for overlay replay, and the third-party resource
//! catalogs used to enrich chat.
//!
//! # Lanes
//!
//! | Lane | Value | Derived data |
//! |------|-------|--------------|
//! | `config` | [`AppConfig`](stagehand_types::AppConfig) | event-log bound |
//! | `rules` | [`Ruleset`](stagehand_types::Ruleset) | compiled engine |
//! | `theme` | [`ThemeState`](stagehand_types::ThemeState) | locale table |
//!
//! Each lane has a [`LaneClock`]: a revision that only advances on an
//! acknowledged commit, and a commit-token issuer. A mutation takes a
//! [`CommitToken`] when it is applied; when its persistence completes, only
//! the holder of the latest token may finalize or roll back.
//!
//! Nothing in this crate locks. The owner wraps [`State`] in a mutex.

mod lanes;
mod log;
mod resources;
mod state;

pub use lanes::{CommitToken, Lane, LaneClock, Lanes};
pub use log::{EventLog, LoggedEvent};
pub use resources::{BadgeImage, BadgeMap, EmoteMap, ReloadTicket, Resources};
pub use state::State;

#[cfg(test)]
mod tests;
