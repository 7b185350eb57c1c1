//! The shared mutable state owned by the hub.

use crate::lanes::{Lane, Lanes};
use crate::log::{EventLog, LoggedEvent};
use crate::resources::{ReloadGate, ReloadTicket, Resources};
use stagehand_rules::CompiledEngine;
use stagehand_types::{AppConfig, EvaluatedEvent, Locales, Ruleset, ThemeState};

/// Everything the pipeline shares between the commit path, the event
/// processor and the connection hub.
///
/// Lane values (`config`, `ruleset`, `theme`) are replaced through the
/// `set_*` methods so derived data (compiled engine, log bound, locales)
/// stays consistent with them.
#[derive(Debug)]
pub struct State {
    config: AppConfig,
    ruleset: Ruleset,
    engine: CompiledEngine,
    theme: ThemeState,
    locales: Locales,
    lanes: Lanes,
    event_sequence: u64,
    event_log: EventLog,
    resources: Resources,
    reload_gate: ReloadGate,
}

impl State {
    pub fn new(config: AppConfig, ruleset: Ruleset, theme: ThemeState, locales: Locales) -> Self {
        let engine = CompiledEngine::compile(&ruleset);
        let event_log = EventLog::new(config.max_messages);
        Self {
            config,
            ruleset,
            engine,
            theme,
            locales,
            lanes: Lanes::default(),
            event_sequence: 0,
            event_log,
            resources: Resources::default(),
            reload_gate: ReloadGate::default(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn ruleset(&self) -> &Ruleset {
        &self.ruleset
    }

    pub fn theme(&self) -> &ThemeState {
        &self.theme
    }

    pub fn locales(&self) -> &Locales {
        &self.locales
    }

    pub fn engine_mut(&mut self) -> &mut CompiledEngine {
        &mut self.engine
    }

    pub fn lanes(&self) -> &Lanes {
        &self.lanes
    }

    pub fn lanes_mut(&mut self) -> &mut Lanes {
        &mut self.lanes
    }

    pub fn revision(&self, lane: Lane) -> u64 {
        self.lanes.revision(lane)
    }

    /// Replaces the config. A larger log bound applies at once; a smaller
    /// one waits for [`State::settle_log_bound`] so an unacknowledged change
    /// never evicts events.
    pub fn set_config(&mut self, config: AppConfig) {
        if config.max_messages > self.event_log.capacity() {
            self.event_log.set_capacity(config.max_messages);
        }
        self.config = config;
    }

    /// Resizes the event log to the current config's bound, evicting the
    /// oldest entries if it shrank.
    pub fn settle_log_bound(&mut self) {
        if self.config.max_messages != self.event_log.capacity() {
            self.event_log.set_capacity(self.config.max_messages);
        }
    }

    /// Replaces the ruleset and recompiles the engine, resetting cooldowns.
    pub fn set_ruleset(&mut self, ruleset: Ruleset) {
        self.engine = CompiledEngine::compile(&ruleset);
        self.ruleset = ruleset;
    }

    pub fn set_theme(&mut self, theme: ThemeState, locales: Locales) {
        self.theme = theme;
        self.locales = locales;
    }

    /// Last sequence number handed out; 0 before the first event.
    pub fn event_sequence(&self) -> u64 {
        self.event_sequence
    }

    /// Assigns the next sequence number to `payload` and appends it to the
    /// log, evicting the oldest entry when full.
    pub fn append_event(&mut self, payload: EvaluatedEvent) -> LoggedEvent {
        self.event_sequence += 1;
        let entry = LoggedEvent {
            seq: self.event_sequence,
            payload,
        };
        self.event_log.push(entry.clone());
        entry
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    pub fn event_log_mut(&mut self) -> &mut EventLog {
        &mut self.event_log
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Starts a resource reload, superseding any reload still in flight.
    pub fn begin_resource_reload(&mut self) -> ReloadTicket {
        self.reload_gate.begin()
    }

    /// Installs reloaded resources if `ticket` is still the latest.
    /// Returns whether they were installed.
    pub fn finish_resource_reload(&mut self, ticket: ReloadTicket, resources: Resources) -> bool {
        if !self.reload_gate.is_current(ticket) {
            tracing::debug!("discarding superseded resource reload");
            return false;
        }
        self.resources = resources;
        true
    }
}
