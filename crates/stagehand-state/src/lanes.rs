//! Per-lane revision clocks and commit tokens.

use serde::Serialize;

/// One independently versioned slice of shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Config,
    Rules,
    Theme,
}

impl Lane {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Rules => "rules",
            Self::Theme => "theme",
        }
    }
}

impl std::fmt::Display for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one in-flight mutation of a lane.
///
/// Only the most recently issued token of a lane may finalize a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitToken {
    lane: Lane,
    seq: u64,
}

impl CommitToken {
    pub fn lane(&self) -> Lane {
        self.lane
    }
}

/// Revision counter plus commit-token issuer for a single lane.
#[derive(Debug, Clone, Default)]
pub struct LaneClock {
    revision: u64,
    issued: u64,
}

impl LaneClock {
    /// Revision of the last acknowledged commit.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn issue(&mut self, lane: Lane) -> CommitToken {
        self.issued += 1;
        CommitToken {
            lane,
            seq: self.issued,
        }
    }

    fn is_current(&self, token: CommitToken) -> bool {
        token.seq == self.issued
    }

    fn commit(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

/// The three lane clocks.
#[derive(Debug, Clone, Default)]
pub struct Lanes {
    config: LaneClock,
    rules: LaneClock,
    theme: LaneClock,
}

impl Lanes {
    pub fn clock(&self, lane: Lane) -> &LaneClock {
        match lane {
            Lane::Config => &self.config,
            Lane::Rules => &self.rules,
            Lane::Theme => &self.theme,
        }
    }

    fn clock_mut(&mut self, lane: Lane) -> &mut LaneClock {
        match lane {
            Lane::Config => &mut self.config,
            Lane::Rules => &mut self.rules,
            Lane::Theme => &mut self.theme,
        }
    }

    pub fn revision(&self, lane: Lane) -> u64 {
        self.clock(lane).revision()
    }

    /// Issues a fresh token for `lane`, superseding any earlier one.
    pub fn issue(&mut self, lane: Lane) -> CommitToken {
        self.clock_mut(lane).issue(lane)
    }

    /// Whether `token` is still the latest token of its lane.
    pub fn is_current(&self, token: CommitToken) -> bool {
        self.clock(token.lane).is_current(token)
    }

    /// Bumps the lane revision for a successful commit and returns the new
    /// revision, or `None` if `token` has been superseded.
    pub fn commit(&mut self, token: CommitToken) -> Option<u64> {
        let clock = self.clock_mut(token.lane);
        if !clock.is_current(token) {
            return None;
        }
        Some(clock.commit())
    }
}
