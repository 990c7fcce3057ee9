//! Per-game telemetry session.
//!
//! A [`Session`] owns everything one loaded game needs and drives the
//! per-frame pipeline:
//!
//! ```text
//! MemoryReader ─▶ MappingTable::refresh ─▶ ObservationFrame::build
//!                                              │
//!                        ┌─────────────────────┼──────────────────┐
//!                        ▼                     ▼                  ▼
//!                 HealthHistory          ComboTracker       change-filtered
//!                 (damage deltas)        (ComboEvents)      update frame
//! ```
//!
//! A session without a mapping is *degraded*: it reports
//! `is_initialized() == false`, produces default frames and never detects
//! a combo.

use crate::combo::{ComboEvent, ComboRecord, ComboTracker, FrameInput};
use crate::config::TelemetryConfig;
use crate::error::MappingLoadError;
use crate::frame::{ObservationFrame, Side};
use crate::health::{DamageDelta, HealthHistory};
use crate::history::SharedComboHistory;
use crate::input::InputCommand;
use crate::mapping::{MappingDirectory, MappingSnapshot, MappingTable, MemoryReader};

/// Result of one [`Session::process_frame`] call.
#[derive(Clone, Debug)]
pub struct FrameOutcome {
    /// Full observation for this frame.
    pub frame: ObservationFrame,
    /// Change-filtered frame; `None` when nothing meaningful moved.
    pub update: Option<ObservationFrame>,
    /// Damage each player took since the previous frame.
    pub damage: DamageDelta,
    /// Combo events raised on this frame.
    pub events: Vec<ComboEvent>,
}

/// One loaded game.
#[derive(Debug)]
pub struct Session {
    game_id: String,
    table: Option<MappingTable>,
    perspective: Side,
    significance_threshold: f64,
    only_significant: bool,
    health: HealthHistory,
    tracker: ComboTracker,
}

impl Session {
    /// Load `<mapping_dir>/<game_id>` and start a session.
    pub fn load(game_id: &str, config: &TelemetryConfig) -> Result<Self, MappingLoadError> {
        let table = MappingDirectory::new(config.effective_mapping_dir()).load(game_id)?;
        Ok(Self::with_table(table, config))
    }

    /// Like [`load`](Self::load), but fall back to a degraded session when
    /// the mapping cannot be loaded.
    pub fn load_or_degraded(game_id: &str, config: &TelemetryConfig) -> Self {
        match Self::load(game_id, config) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(game = game_id, error = %e, "mapping unavailable; running degraded");
                Self::degraded(game_id, config)
            }
        }
    }

    /// Session around an already-built mapping.
    pub fn with_table(table: MappingTable, config: &TelemetryConfig) -> Self {
        let game_id = table.game_id().to_string();
        let perspective = config.effective_perspective();
        let opponent_health = perspective.opponent().field("health");
        if !table.has(&opponent_health) {
            tracing::warn!(game = %game_id, field = %opponent_health, "opponent health not mapped; combos cannot be detected");
        }
        tracing::info!(game = %game_id, fields = table.len(), ?perspective, "telemetry session started");
        Self::build(game_id, Some(table), config)
    }

    /// Session with no mapping.
    pub fn degraded(game_id: &str, config: &TelemetryConfig) -> Self {
        tracing::info!(game = game_id, "telemetry session started without a mapping");
        Self::build(game_id.to_string(), None, config)
    }

    fn build(game_id: String, table: Option<MappingTable>, config: &TelemetryConfig) -> Self {
        let mut tracker = ComboTracker::new(config.combo_config_for(&game_id));
        tracker.set_patterns(config.patterns_for(&game_id));
        Self {
            perspective: config.effective_perspective(),
            significance_threshold: config.effective_significance_threshold(),
            only_significant: config.effective_only_significant(),
            health: HealthHistory::new(),
            tracker,
            table,
            game_id,
        }
    }

    /// Run one frame: refresh, build, record health, classify.
    ///
    /// `input` is the tracked player's controller state, when known.
    pub fn process_frame(
        &mut self,
        frame_number: u64,
        reader: &dyn MemoryReader,
        input: Option<InputCommand>,
    ) -> FrameOutcome {
        let Some(table) = self.table.as_mut() else {
            return FrameOutcome {
                frame: ObservationFrame::build(&MappingSnapshot::empty(), frame_number),
                update: None,
                damage: DamageDelta { frame_number, ..DamageDelta::default() },
                events: Vec::new(),
            };
        };

        table.refresh(frame_number, reader);
        let snapshot = table.snapshot();
        let frame = ObservationFrame::build(snapshot, frame_number);
        let update = ObservationFrame::build_with_change_filter(
            snapshot,
            frame_number,
            self.only_significant,
            self.significance_threshold,
        );
        let damage = self
            .health
            .record(frame_number, frame.p1().health_points, frame.p2().health_points);

        let me = self.perspective;
        let them = frame.player(me.opponent());
        let mapped = |side: Side, suffix: &str| snapshot.has(&side.field(suffix));
        let whiff_name = me.field("whiffed");
        let frame_input = FrameInput::from_frame(&frame, me)
            .with_defense_flags(
                mapped(me.opponent(), "blocking").then(|| them.is_blocking()),
                mapped(me.opponent(), "hitstun").then(|| them.in_hitstun()),
            )
            .with_whiffed(snapshot.has(&whiff_name).then(|| frame.extra_or(&whiff_name, 0.0) >= 0.5))
            .with_input(input);
        let events = self.tracker.process(&frame_input);

        FrameOutcome { frame, update, damage, events }
    }

    /// Close any open combo, e.g. at the end of a round.
    pub fn end_round(&mut self) -> Option<ComboEvent> {
        self.tracker.flush()
    }

    /// Drop per-frame state. With `clear_history`, the combo ledger is
    /// emptied as well.
    pub fn reset(&mut self, clear_history: bool) {
        self.health.clear();
        self.tracker.reset(clear_history);
        tracing::info!(game = %self.game_id, clear_history, "telemetry session reset");
    }

    // ── Accessors ──────────────────────────────────────────────────────

    /// Game identifier.
    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    /// False for degraded sessions.
    pub fn is_initialized(&self) -> bool {
        self.table.is_some()
    }

    /// Player whose combos are tracked.
    pub fn perspective(&self) -> Side {
        self.perspective
    }

    /// The loaded mapping.
    pub fn table(&self) -> Option<&MappingTable> {
        self.table.as_ref()
    }

    /// The combo tracker.
    pub fn tracker(&self) -> &ComboTracker {
        &self.tracker
    }

    /// The combo tracker, mutably (listeners, state restore).
    pub fn tracker_mut(&mut self) -> &mut ComboTracker {
        &mut self.tracker
    }

    /// Handle to the combo ledger, for readers on other threads.
    pub fn history(&self) -> SharedComboHistory {
        self.tracker.history().clone()
    }

    /// Recent health samples.
    pub fn health_history(&self) -> &HealthHistory {
        &self.health
    }

    /// See [`ComboTracker::is_combo_active`].
    pub fn is_combo_active(&self) -> bool {
        self.tracker.is_combo_active()
    }

    /// See [`ComboTracker::current_combo_length`].
    pub fn current_combo_length(&self) -> usize {
        self.tracker.current_combo_length()
    }

    /// See [`ComboTracker::recent_combos`].
    pub fn recent_combos(&self, n: usize) -> Vec<ComboRecord> {
        self.tracker.recent_combos(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FieldMapping, RamImage, ValueKind};

    // ── Helpers ──────────────────────────────────────────────────────────

    const P1_HEALTH: u64 = 0x00;
    const P2_HEALTH: u64 = 0x01;
    const P1_ATTACKING: u64 = 0x02;
    const P2_ATTACKING: u64 = 0x03;

    fn table() -> MappingTable {
        MappingTable::from_fields(
            "test",
            vec![
                FieldMapping::new("p1_health", P1_HEALTH, ValueKind::Int8).with_bounds(0.0, 100.0),
                FieldMapping::new("p2_health", P2_HEALTH, ValueKind::Int8).with_bounds(0.0, 100.0),
                FieldMapping::new("p1_attacking", P1_ATTACKING, ValueKind::Int8),
                FieldMapping::new("p2_attacking", P2_ATTACKING, ValueKind::Int8),
            ],
        )
        .unwrap()
    }

    fn ram(p1: f64, p2: f64, p1_atk: f64, p2_atk: f64) -> RamImage {
        let mut ram = RamImage::new(0, 8);
        ram.write(P1_HEALTH, ValueKind::Int8, p1).unwrap();
        ram.write(P2_HEALTH, ValueKind::Int8, p2).unwrap();
        ram.write(P1_ATTACKING, ValueKind::Int8, p1_atk).unwrap();
        ram.write(P2_ATTACKING, ValueKind::Int8, p2_atk).unwrap();
        ram
    }

    // ── Tests ────────────────────────────────────────────────────────────

    #[test]
    fn test_degraded_session_is_inert() {
        let mut s = Session::degraded("unknown", &TelemetryConfig::default());
        assert!(!s.is_initialized());
        let reader = ram(100.0, 50.0, 1.0, 0.0);
        for f in 0..30 {
            let out = s.process_frame(f, &reader, None);
            assert!(out.events.is_empty());
            assert!(out.update.is_none());
            assert_eq!(out.frame.p1().facing, 1);
        }
        assert!(s.recent_combos(10).is_empty());
    }

    #[test]
    fn test_load_missing_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TelemetryConfig { mapping_dir: Some(dir.path().to_path_buf()), ..Default::default() };
        assert!(matches!(Session::load("nope", &cfg), Err(MappingLoadError::NotFound { .. })));
        assert!(!Session::load_or_degraded("nope", &cfg).is_initialized());
    }

    #[test]
    fn test_p1_perspective_tracks_damage_to_p2() {
        let mut s = Session::with_table(table(), &TelemetryConfig::default());
        s.process_frame(0, &ram(100.0, 100.0, 1.0, 0.0), None);
        let out = s.process_frame(1, &ram(100.0, 90.0, 1.0, 0.0), None);
        assert_eq!(out.damage.p2, 10);
        assert!(matches!(out.events.as_slice(), [ComboEvent::Started { frame_number: 1, damage: 10 }]));
        s.process_frame(2, &ram(100.0, 80.0, 1.0, 0.0), None);
        assert_eq!(s.current_combo_length(), 2);
        assert!(matches!(s.end_round(), Some(ComboEvent::Finished(_))));
        assert_eq!(s.recent_combos(1).len(), 1);
    }

    #[test]
    fn test_p2_perspective_ignores_damage_to_p2() {
        let cfg = TelemetryConfig { perspective: Some(Side::P2), ..Default::default() };
        let mut s = Session::with_table(table(), &cfg);
        s.process_frame(0, &ram(100.0, 100.0, 1.0, 1.0), None);
        s.process_frame(1, &ram(100.0, 90.0, 1.0, 1.0), None);
        assert!(!s.is_combo_active());
        s.process_frame(2, &ram(90.0, 90.0, 0.0, 1.0), None);
        assert!(s.is_combo_active());
    }

    #[test]
    fn test_blocking_only_mapping_records_combo() {
        let mut fields = table().fields().to_vec();
        fields.push(FieldMapping::new("p2_blocking", 0x04, ValueKind::Int8));
        let table = MappingTable::from_fields("blocking_only", fields).unwrap();
        let mut s = Session::with_table(table, &TelemetryConfig::default());

        s.process_frame(0, &ram(100.0, 100.0, 1.0, 0.0), None);
        s.process_frame(1, &ram(100.0, 90.0, 1.0, 0.0), None);
        let out = s.process_frame(2, &ram(100.0, 90.0, 0.0, 0.0), None);
        assert!(out.events.is_empty(), "{:?}", out.events);
        s.process_frame(3, &ram(100.0, 80.0, 1.0, 0.0), None);

        assert_eq!(s.current_combo_length(), 2);
        assert!(matches!(s.end_round(), Some(ComboEvent::Finished(_))));
        assert_eq!(s.recent_combos(5).len(), 1);
    }

    #[test]
    fn test_update_frame_only_on_change() {
        let mut s = Session::with_table(table(), &TelemetryConfig::default());
        let reader = ram(100.0, 100.0, 0.0, 0.0);
        assert!(s.process_frame(0, &reader, None).update.is_some());
        assert!(s.process_frame(1, &reader, None).update.is_none());
    }

    #[test]
    fn test_reset_clears_health_and_optionally_history() {
        let mut s = Session::with_table(table(), &TelemetryConfig::default());
        for (f, hp) in [(0, 100.0), (1, 90.0), (2, 80.0)] {
            s.process_frame(f, &ram(100.0, hp, 1.0, 0.0), None);
        }
        s.end_round();
        s.reset(false);
        assert!(s.health_history().is_empty());
        assert_eq!(s.history().len(), 1);
        s.reset(true);
        assert!(s.history().is_empty());
    }
}
