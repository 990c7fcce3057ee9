/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Frame-windowed combo segmentation.
//!
//! [`ComboTracker`] watches the opponent's health one frame at a time and
//! groups consecutive damage into combos.
//!
//! ```text
//!            damage while attacking
//!   ┌──────┐ ─────────────────────▶ ┌─────────┐ ──┐ damage, gap ≤ max
//!   │ Idle │                        │ InCombo │ ◀─┘ (extend)
//!   └──────┘ ◀───────────────────── └─────────┘
//!            no damage and one of:    │     ▲
//!             gap > max               └─────┘ damage, gap > max
//!             attacker whiffed         (close, then reopen same frame)
//!             opponent known out of
//!             hitstun, not blocking
//! ```
//!
//! A closed segment becomes a [`ComboRecord`] only if it holds at least
//! `minimum_combo_length` hits; shorter ones are dropped.
//!
//! "While attacking" means the attacker raised its attack or hit-connected
//! flag on this frame or within the previous `attack_recency_frames`:
//! health bars often update a frame or two after the flag.
//!
//! # Invariants
//!
//! - Only strictly positive health decreases count as hits.
//! - Every emitted record has `hit_count >= minimum_combo_length`.
//! - Records are appended to history before the listener runs.
//! - Description is a pure function of `(hit_count, total_damage)`.

use core::fmt;

use heapless::Deque;
use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::frame::{ObservationFrame, Side};
use crate::history::{ComboHistory, ComboSessionState, SharedComboHistory};
use crate::input::InputCommand;
use crate::pattern::PatternMatcher;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Inter-hit window used when a configured value is missing or unusable.
pub const DEFAULT_MAX_FRAMES_BETWEEN_HITS: u32 = 15;

/// Largest inter-hit window accepted before falling back to the default.
pub const MAX_REASONABLE_GAP_FRAMES: u32 = 600;

/// Recent-input ring capacity. Older inputs cannot seed a combo.
const INPUT_RING: usize = 32;

/// Tracker tuning. Per-game values come from
/// [`TelemetryConfig`](crate::config::TelemetryConfig).
#[derive(Clone, Debug, PartialEq)]
pub struct ComboConfig {
    /// Largest frame gap between two hits of one combo.
    pub max_frames_between_hits: u32,
    /// Fewest hits a segment needs to become a record.
    pub minimum_combo_length: usize,
    /// How long an attack flag keeps vouching for a health drop.
    pub attack_recency_frames: u32,
    /// How far before the start a defensive state marks a reversal.
    pub reversal_window_frames: u32,
    /// Damage per unit of meter at or above which meter use is efficient.
    pub efficient_damage_per_meter: f64,
}

impl Default for ComboConfig {
    fn default() -> Self {
        Self {
            max_frames_between_hits: DEFAULT_MAX_FRAMES_BETWEEN_HITS,
            minimum_combo_length: 2,
            attack_recency_frames: 3,
            reversal_window_frames: 10,
            efficient_damage_per_meter: 30.0,
        }
    }
}

impl ComboConfig {
    /// Replace unusable values with defaults, logging each fallback.
    pub fn sanitized(mut self) -> Self {
        let gap = self.max_frames_between_hits;
        if gap == 0 || gap > MAX_REASONABLE_GAP_FRAMES {
            tracing::warn!(
                configured = gap,
                fallback = DEFAULT_MAX_FRAMES_BETWEEN_HITS,
                "max_frames_between_hits out of range; using default"
            );
            self.max_frames_between_hits = DEFAULT_MAX_FRAMES_BETWEEN_HITS;
        }
        if self.minimum_combo_length == 0 {
            tracing::warn!("minimum_combo_length must be at least 1; using 1");
            self.minimum_combo_length = 1;
        }
        if !(self.efficient_damage_per_meter.is_finite() && self.efficient_damage_per_meter > 0.0) {
            let fallback = ComboConfig::default().efficient_damage_per_meter;
            tracing::warn!(
                configured = self.efficient_damage_per_meter,
                fallback,
                "efficient_damage_per_meter must be positive; using default"
            );
            self.efficient_damage_per_meter = fallback;
        }
        self
    }
}

// ─── Per-frame input ─────────────────────────────────────────────────────────

/// Everything the tracker looks at on one frame, from the attacker's side.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameInput {
    /// Frame number, strictly increasing.
    pub frame_number: u64,
    /// Opponent health in game units.
    pub opponent_health: i64,
    /// Attacker has an attack active.
    pub attacker_attacking: bool,
    /// Attacker's hit registered this frame.
    pub hit_connected: bool,
    /// Opponent blocking, when the game exposes it.
    pub opponent_blocking: Option<bool>,
    /// Opponent in hitstun, when the game exposes it.
    pub opponent_hitstun: Option<bool>,
    /// Attacker's attack missed, when the game exposes it.
    pub whiffed: Option<bool>,
    /// Attacker was blocking or in hitstun.
    pub attacker_defending: bool,
    /// Opponent had an attack active.
    pub opponent_attacking: bool,
    /// Attacker meter, in frame units.
    pub attacker_meter: f64,
    /// Attacker's controller state.
    pub input: Option<InputCommand>,
}

impl FrameInput {
    /// Read the attacker-relative view of `frame`.
    ///
    /// Opponent blocking/hitstun and whiff flags are left unknown; set them
    /// with [`with_defense_flags`](Self::with_defense_flags) and
    /// [`with_whiffed`](Self::with_whiffed) when the game maps them.
    pub fn from_frame(frame: &ObservationFrame, attacker: Side) -> Self {
        let me = frame.player(attacker);
        let them = frame.player(attacker.opponent());
        let connected = frame.extra_or(&attacker.field("hit_connected"), 0.0) >= 0.5;
        Self {
            frame_number: frame.frame_number(),
            opponent_health: them.health_points,
            attacker_attacking: me.is_attacking(),
            hit_connected: connected,
            opponent_blocking: None,
            opponent_hitstun: None,
            whiffed: None,
            attacker_defending: me.is_blocking() || me.in_hitstun(),
            opponent_attacking: them.is_attacking(),
            attacker_meter: me.meter,
            input: None,
        }
    }

    /// Opponent blocking and hitstun flags.
    pub fn with_defense_flags(mut self, blocking: Option<bool>, hitstun: Option<bool>) -> Self {
        self.opponent_blocking = blocking;
        self.opponent_hitstun = hitstun;
        self
    }

    /// Attacker whiff flag.
    pub fn with_whiffed(mut self, whiffed: Option<bool>) -> Self {
        self.whiffed = whiffed;
        self
    }

    /// Attacker controller state.
    pub fn with_input(mut self, input: Option<InputCommand>) -> Self {
        self.input = input;
        self
    }

    /// No-damage frame signals that the opponent has recovered.
    ///
    /// Requires a known hitstun flag: a game that only exposes blocking
    /// cannot tell hitstun from neutral, so it relies on timeout and whiff.
    fn opponent_recovered(&self) -> bool {
        self.opponent_hitstun == Some(false) && self.opponent_blocking != Some(true)
    }
}

// ─── Records and events ──────────────────────────────────────────────────────

/// One hit inside a combo.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComboHit {
    /// Frame the health drop was observed.
    pub frame_number: u64,
    /// Health removed by this hit.
    pub damage: i64,
}

/// A finished combo.
#[derive(Clone, Debug, PartialEq)]
pub struct ComboRecord {
    /// First hit frame.
    pub start_frame: u64,
    /// Last hit frame.
    pub end_frame: u64,
    /// Hits in order. Empty for records loaded from documents that omit them.
    pub hits: Vec<ComboHit>,
    /// Number of hits.
    pub hit_count: usize,
    /// Sum of hit damage.
    pub total_damage: i64,
    /// Input variety and timing spread score.
    pub complexity: f64,
    /// Tier label, e.g. `"Medium Punisher"`.
    pub description: String,
    /// Started out of a defensive state.
    pub is_reversal: bool,
    /// Opened on an attacking opponent.
    pub is_counter: bool,
    /// Emptied the opponent's health.
    pub is_finisher: bool,
    /// Converted meter into damage efficiently.
    pub is_efficient_use: bool,
    /// Matched move pattern, when a matcher is installed.
    pub pattern: Option<String>,
}

/// What happened on one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum ComboEvent {
    /// A segment opened.
    Started {
        /// Frame of the first hit.
        frame_number: u64,
        /// Damage of the first hit.
        damage: i64,
    },
    /// A hit extended the open segment.
    Extended {
        /// Frame of the hit.
        frame_number: u64,
        /// Hits so far.
        hit_count: usize,
        /// Damage of this hit.
        damage: i64,
    },
    /// A segment closed with enough hits and was recorded.
    Finished(ComboRecord),
    /// A segment closed below the minimum length.
    Dropped {
        /// First hit frame.
        start_frame: u64,
        /// Last hit frame.
        end_frame: u64,
        /// Hits in the segment.
        hit_count: usize,
    },
}

// ─── Scoring ─────────────────────────────────────────────────────────────────

const LENGTH_TIERS: [(usize, &str); 4] = [(0, "Small"), (4, "Medium"), (7, "Big"), (10, "Massive")];
const DAMAGE_TIERS: [(i64, &str); 4] = [(0, "Combo"), (25, "Punisher"), (50, "Destroyer"), (80, "Devastation")];

fn tier<T: PartialOrd + Copy>(ladder: &[(T, &'static str)], value: T) -> &'static str {
    ladder
        .iter()
        .rev()
        .find(|(floor, _)| value >= *floor)
        .map_or(ladder[0].1, |&(_, label)| label)
}

/// Tier label for a combo, e.g. `"Big Destroyer"`.
pub fn describe(hit_count: usize, total_damage: i64) -> String {
    format!("{} {}", tier(&LENGTH_TIERS, hit_count), tier(&DAMAGE_TIERS, total_damage))
}

/// `unique_inputs * 1.5 + direction_changes * 1.2 + min(1, var / 100) * 0.7`
///
/// `var` is the population variance of inter-hit gaps, 0 with fewer than
/// three hits.
pub fn complexity(hits: &[ComboHit], inputs: &[(u64, InputCommand)]) -> f64 {
    let mut unique: Vec<InputCommand> = Vec::new();
    for &(_, cmd) in inputs {
        if !unique.contains(&cmd) {
            unique.push(cmd);
        }
    }
    let direction_changes = inputs
        .windows(2)
        .filter(|w| w[0].1.direction() != w[1].1.direction())
        .count();

    unique.len() as f64 * 1.5 + direction_changes as f64 * 1.2 + (timing_variance(hits) / 100.0).min(1.0) * 0.7
}

fn timing_variance(hits: &[ComboHit]) -> f64 {
    if hits.len() < 3 {
        return 0.0;
    }
    let gaps: Vec<f64> = hits
        .windows(2)
        .map(|w| w[1].frame_number.saturating_sub(w[0].frame_number) as f64)
        .collect();
    let n = gaps.len() as f64;
    let mean = gaps.iter().sum::<f64>() / n;
    gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / n
}

// ─── Tracker ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct ActiveCombo {
    start_frame: u64,
    last_hit_frame: u64,
    hits: Vec<ComboHit>,
    total_damage: i64,
    inputs: Vec<(u64, InputCommand)>,
    is_reversal: bool,
    is_counter: bool,
    health_after_last_hit: i64,
    last_meter: f64,
    meter_spent: f64,
}

#[derive(Clone, Debug)]
enum TrackerState {
    Idle,
    InCombo(ActiveCombo),
}

type Listener = Box<dyn FnMut(&ComboRecord) + Send>;

/// Health-delta combo state machine.
pub struct ComboTracker {
    config: ComboConfig,
    state: TrackerState,
    last_opponent_health: Option<i64>,
    last_attack_frame: Option<u64>,
    last_defending_frame: Option<u64>,
    last_opponent_attack_frame: Option<u64>,
    recent_inputs: Deque<(u64, InputCommand), INPUT_RING>,
    history: SharedComboHistory,
    patterns: Option<PatternMatcher>,
    listener: Option<Listener>,
}

impl ComboTracker {
    /// Tracker with its own empty history.
    pub fn new(config: ComboConfig) -> Self {
        Self::with_history(config, SharedComboHistory::new())
    }

    /// Tracker appending to `history`.
    pub fn with_history(config: ComboConfig, history: SharedComboHistory) -> Self {
        Self {
            config: config.sanitized(),
            state: TrackerState::Idle,
            last_opponent_health: None,
            last_attack_frame: None,
            last_defending_frame: None,
            last_opponent_attack_frame: None,
            recent_inputs: Deque::new(),
            history,
            patterns: None,
            listener: None,
        }
    }

    /// Label finished combos with the best matching move pattern.
    pub fn set_patterns(&mut self, matcher: PatternMatcher) {
        self.patterns = (!matcher.is_empty()).then_some(matcher);
    }

    /// Called with every recorded combo, after it lands in history.
    pub fn set_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&ComboRecord) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
    }

    /// Remove the listener.
    pub fn clear_listener(&mut self) {
        self.listener = None;
    }

    /// Active configuration.
    pub fn config(&self) -> &ComboConfig {
        &self.config
    }

    /// Handle to the shared ledger.
    pub fn history(&self) -> &SharedComboHistory {
        &self.history
    }

    /// True while a segment is open.
    pub fn is_combo_active(&self) -> bool {
        matches!(self.state, TrackerState::InCombo(_))
    }

    /// Hits in the open segment, 0 when idle.
    pub fn current_combo_length(&self) -> usize {
        match &self.state {
            TrackerState::InCombo(c) => c.hits.len(),
            TrackerState::Idle => 0,
        }
    }

    /// The last `n` recorded combos, oldest first.
    pub fn recent_combos(&self, n: usize) -> Vec<ComboRecord> {
        self.history.recent(n)
    }

    /// Feed one frame.
    pub fn process(&mut self, input: &FrameInput) -> Vec<ComboEvent> {
        let frame = input.frame_number;
        let mut events = Vec::new();

        if input.attacker_attacking || input.hit_connected {
            self.last_attack_frame = Some(frame);
        }
        if input.attacker_defending {
            self.last_defending_frame = Some(frame);
        }
        if input.opponent_attacking {
            self.last_opponent_attack_frame = Some(frame);
        }
        let damage = match self.last_opponent_health {
            Some(prev) if input.opponent_health < prev => prev.saturating_sub(input.opponent_health),
            _ => 0,
        };
        self.last_opponent_health = Some(input.opponent_health);

        if let TrackerState::InCombo(c) = &mut self.state {
            if input.attacker_meter < c.last_meter {
                c.meter_spent += c.last_meter - input.attacker_meter;
            }
            c.last_meter = input.attacker_meter;
        }

        let state = core::mem::replace(&mut self.state, TrackerState::Idle);
        let next = match state {
            TrackerState::Idle if damage > 0 && self.attack_recent(frame) => {
                events.push(ComboEvent::Started { frame_number: frame, damage });
                TrackerState::InCombo(self.open(input, damage))
            }
            TrackerState::Idle => TrackerState::Idle,

            TrackerState::InCombo(mut c) if damage > 0 => {
                let gap = frame.saturating_sub(c.last_hit_frame);
                if gap <= u64::from(self.config.max_frames_between_hits) {
                    c.hits.push(ComboHit { frame_number: frame, damage });
                    c.total_damage = c.total_damage.saturating_add(damage);
                    c.last_hit_frame = frame;
                    c.health_after_last_hit = input.opponent_health;
                    tracing::debug!(frame, hits = c.hits.len(), damage, "combo extended");
                    events.push(ComboEvent::Extended { frame_number: frame, hit_count: c.hits.len(), damage });
                    TrackerState::InCombo(c)
                } else {
                    tracing::debug!(frame, gap, "hit after timeout; closing segment");
                    events.push(self.close(c));
                    if self.attack_recent(frame) {
                        events.push(ComboEvent::Started { frame_number: frame, damage });
                        TrackerState::InCombo(self.open(input, damage))
                    } else {
                        TrackerState::Idle
                    }
                }
            }
            TrackerState::InCombo(c) => {
                let gap = frame.saturating_sub(c.last_hit_frame);
                let timed_out = gap > u64::from(self.config.max_frames_between_hits);
                let whiffed = input.whiffed == Some(true);
                if timed_out || whiffed || input.opponent_recovered() {
                    tracing::debug!(frame, timed_out, whiffed, hits = c.hits.len(), "combo ended");
                    events.push(self.close(c));
                    TrackerState::Idle
                } else {
                    TrackerState::InCombo(c)
                }
            }
        };
        self.state = next;

        // After the transition, so a segment closed on this frame never
        // sees an input from after its last hit.
        if let Some(cmd) = input.input {
            self.note_input(frame, cmd);
        }
        events
    }

    /// Close any open segment, e.g. at end of round or end of stream.
    pub fn flush(&mut self) -> Option<ComboEvent> {
        match core::mem::replace(&mut self.state, TrackerState::Idle) {
            TrackerState::InCombo(c) => Some(self.close(c)),
            TrackerState::Idle => None,
        }
    }

    /// Return to idle and forget per-frame memory. With `clear_history`,
    /// the shared ledger is swapped for an empty one.
    pub fn reset(&mut self, clear_history: bool) {
        self.state = TrackerState::Idle;
        self.last_opponent_health = None;
        self.last_attack_frame = None;
        self.last_defending_frame = None;
        self.last_opponent_attack_frame = None;
        self.recent_inputs.clear();
        if clear_history {
            self.history.clear();
        }
        tracing::debug!(clear_history, "combo tracker reset");
    }

    // ── Session state ──────────────────────────────────────────────────

    /// Snapshot of the open segment plus the ledger.
    pub fn session_state(&self) -> ComboSessionState {
        let mut state = self.history.with(ComboSessionState::idle);
        state.last_opponent_health = self.last_opponent_health;
        if let TrackerState::InCombo(c) = &self.state {
            state.in_combo = true;
            state.combo_start_frame = c.start_frame;
            state.last_hit_frame = c.last_hit_frame;
            state.hit_counter = c.hits.len();
            state.total_damage = c.total_damage;
            state.active_hits = c.hits.clone();
        }
        state
    }

    /// Restore from a snapshot, replacing the ledger.
    ///
    /// Nothing changes when the document is invalid. Documents without
    /// `activeHits` get placeholder hits: the first at the start frame
    /// carrying all damage, the rest at the last hit frame.
    pub fn restore_session_state(&mut self, state: &ComboSessionState) -> Result<(), PersistenceError> {
        let history: ComboHistory = state.history()?;

        let active = if state.in_combo {
            if state.hit_counter == 0 {
                return Err(PersistenceError::ParseFailure {
                    reason: "inCombo is set but hitCounter is 0".into(),
                });
            }
            let hits = if state.active_hits.len() == state.hit_counter {
                state.active_hits.clone()
            } else {
                (0..state.hit_counter)
                    .map(|i| match i {
                        0 => ComboHit { frame_number: state.combo_start_frame, damage: state.total_damage },
                        _ => ComboHit { frame_number: state.last_hit_frame, damage: 0 },
                    })
                    .collect()
            };
            Some(ActiveCombo {
                start_frame: state.combo_start_frame,
                last_hit_frame: state.last_hit_frame,
                hits,
                total_damage: state.total_damage,
                inputs: Vec::new(),
                is_reversal: false,
                is_counter: false,
                health_after_last_hit: state.last_opponent_health.unwrap_or(0),
                last_meter: 0.0,
                meter_spent: 0.0,
            })
        } else {
            None
        };

        self.reset(false);
        self.history.replace(history);
        self.last_opponent_health = state.last_opponent_health;
        self.state = active.map_or(TrackerState::Idle, TrackerState::InCombo);
        Ok(())
    }

    /// Save [`session_state`](Self::session_state) to `path`.
    pub fn save_state(&self, path: &std::path::Path) -> Result<(), PersistenceError> {
        self.session_state().save(path)
    }

    /// Load and [`restore_session_state`](Self::restore_session_state).
    pub fn load_state(&mut self, path: &std::path::Path) -> Result<(), PersistenceError> {
        let state = ComboSessionState::load(path)?;
        self.restore_session_state(&state)
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn attack_recent(&self, frame: u64) -> bool {
        self.last_attack_frame
            .is_some_and(|a| a <= frame && frame - a <= u64::from(self.config.attack_recency_frames))
    }

    fn note_input(&mut self, frame: u64, cmd: InputCommand) {
        if self.recent_inputs.back().map(|&(_, c)| c) == Some(cmd) {
            return;
        }
        if self.recent_inputs.is_full() {
            self.recent_inputs.pop_front();
        }
        let _ = self.recent_inputs.push_back((frame, cmd));
        if let TrackerState::InCombo(c) = &mut self.state {
            c.inputs.push((frame, cmd));
        }
    }

    fn open(&self, input: &FrameInput, damage: i64) -> ActiveCombo {
        let frame = input.frame_number;
        let lookback = u64::from(self.config.max_frames_between_hits);
        let inputs = self
            .recent_inputs
            .iter()
            .filter(|(f, _)| frame.saturating_sub(*f) <= lookback && *f <= frame)
            .copied()
            .collect();
        let within = |last: Option<u64>, window: u32| {
            last.is_some_and(|l| l <= frame && frame - l <= u64::from(window))
        };
        tracing::debug!(frame, damage, "combo started");
        ActiveCombo {
            start_frame: frame,
            last_hit_frame: frame,
            hits: vec![ComboHit { frame_number: frame, damage }],
            total_damage: damage,
            inputs,
            // Defending on the start frame itself is a trade, not a reversal.
            is_reversal: self
                .last_defending_frame
                .is_some_and(|d| d < frame && frame - d <= u64::from(self.config.reversal_window_frames)),
            is_counter: within(self.last_opponent_attack_frame, self.config.attack_recency_frames),
            health_after_last_hit: input.opponent_health,
            last_meter: input.attacker_meter,
            meter_spent: 0.0,
        }
    }

    fn close(&mut self, c: ActiveCombo) -> ComboEvent {
        let hit_count = c.hits.len();
        if hit_count < self.config.minimum_combo_length {
            tracing::debug!(start = c.start_frame, hit_count, "segment below minimum length; dropped");
            return ComboEvent::Dropped {
                start_frame: c.start_frame,
                end_frame: c.last_hit_frame,
                hit_count,
            };
        }

        let record = ComboRecord {
            start_frame: c.start_frame,
            end_frame: c.last_hit_frame,
            hit_count,
            total_damage: c.total_damage,
            complexity: complexity(&c.hits, &c.inputs),
            description: describe(hit_count, c.total_damage),
            is_reversal: c.is_reversal,
            is_counter: c.is_counter,
            is_finisher: c.health_after_last_hit <= 0,
            is_efficient_use: c.meter_spent > 0.0
                && c.total_damage as f64 / c.meter_spent >= self.config.efficient_damage_per_meter,
            pattern: self
                .patterns
                .as_ref()
                .and_then(|m| m.best_match(&c.inputs))
                .map(str::to_string),
            hits: c.hits,
        };

        tracing::debug!(
            start = record.start_frame,
            end = record.end_frame,
            hits = record.hit_count,
            damage = record.total_damage,
            description = %record.description,
            "combo recorded"
        );
        self.history.push(record.clone());
        if let Some(listener) = self.listener.as_mut() {
            listener(&record);
        }
        ComboEvent::Finished(record)
    }
}

impl fmt::Debug for ComboTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComboTracker")
            .field("config", &self.config)
            .field("active", &self.is_combo_active())
            .field("current_length", &self.current_combo_length())
            .field("history", &self.history)
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    // ── Helpers ──────────────────────────────────────────────────────────

    fn frame(n: u64, health: i64, attacking: bool) -> FrameInput {
        FrameInput {
            frame_number: n,
            opponent_health: health,
            attacker_attacking: attacking,
            ..FrameInput::default()
        }
    }

    fn config(max_gap: u32, min_len: usize) -> ComboConfig {
        ComboConfig {
            max_frames_between_hits: max_gap,
            minimum_combo_length: min_len,
            ..ComboConfig::default()
        }
    }

    fn run(t: &mut ComboTracker, frames: &[FrameInput]) -> Vec<ComboEvent> {
        frames.iter().flat_map(|f| t.process(f)).collect()
    }

    fn finished(events: &[ComboEvent]) -> Vec<&ComboRecord> {
        events
            .iter()
            .filter_map(|e| match e {
                ComboEvent::Finished(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    // ── Description and scoring ──────────────────────────────────────────

    #[test]
    fn test_description_ladders() {
        assert_eq!(describe(2, 10), "Small Combo");
        assert_eq!(describe(3, 25), "Small Punisher");
        assert_eq!(describe(4, 49), "Medium Punisher");
        assert_eq!(describe(7, 50), "Big Destroyer");
        assert_eq!(describe(12, 80), "Massive Devastation");
        assert_eq!(describe(1, -5), "Small Combo");
    }

    #[test]
    fn test_timing_variance_needs_three_hits() {
        let two = [ComboHit { frame_number: 0, damage: 1 }, ComboHit { frame_number: 9, damage: 1 }];
        assert_eq!(complexity(&two, &[]), 0.0);

        // Gaps 2 and 8: mean 5, population variance 9.
        let three = [
            ComboHit { frame_number: 0, damage: 1 },
            ComboHit { frame_number: 2, damage: 1 },
            ComboHit { frame_number: 10, damage: 1 },
        ];
        assert!((complexity(&three, &[]) - 0.09 * 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_complexity_counts_inputs_and_direction_changes() {
        let p = |t: &str| InputCommand::parse(t).unwrap();
        let inputs = [(0, p("2")), (1, p("3")), (2, p("6A")), (3, p("2")), (4, p("2B"))];
        // unique {2, 3, 6A, 2B} = 4, direction changes 2→3→6→2 = 3.
        assert!((complexity(&[], &inputs) - (4.0 * 1.5 + 3.0 * 1.2)).abs() < 1e-12);
    }

    // ── Segmentation ─────────────────────────────────────────────────────

    #[test]
    fn test_single_hit_is_dropped() {
        let mut t = ComboTracker::new(config(5, 2));
        let events = run(
            &mut t,
            &[frame(0, 100, true), frame(1, 90, true), frame(2, 90, false), frame(7, 90, false)],
        );
        assert!(finished(&events).is_empty());
        assert!(events.iter().any(|e| matches!(e, ComboEvent::Dropped { hit_count: 1, .. })));
        assert!(t.history().is_empty());
    }

    #[test]
    fn test_two_hits_recorded() {
        let mut t = ComboTracker::new(config(5, 2));
        let events = run(
            &mut t,
            &[frame(0, 100, true), frame(1, 90, true), frame(3, 80, true), frame(9, 80, false)],
        );
        let recs = finished(&events);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].hit_count, 2);
        assert_eq!(recs[0].total_damage, 20);
        assert_eq!((recs[0].start_frame, recs[0].end_frame), (1, 3));
        assert_eq!(t.recent_combos(5).len(), 1);
    }

    #[test]
    fn test_damage_without_attack_flag_is_ignored() {
        let mut t = ComboTracker::new(ComboConfig::default());
        let events = run(&mut t, &[frame(0, 100, false), frame(10, 90, false), frame(11, 80, false)]);
        assert!(events.is_empty());
        assert!(!t.is_combo_active());
    }

    #[test]
    fn test_attack_recency_window() {
        let mut t = ComboTracker::new(ComboConfig { attack_recency_frames: 0, ..ComboConfig::default() });
        run(&mut t, &[frame(0, 100, true), frame(1, 90, false)]);
        assert!(!t.is_combo_active(), "strict same-frame rule");

        let mut t = ComboTracker::new(ComboConfig::default());
        run(&mut t, &[frame(0, 100, true), frame(3, 90, false)]);
        assert!(t.is_combo_active());
    }

    #[test]
    fn test_health_increase_is_not_a_hit() {
        let mut t = ComboTracker::new(ComboConfig::default());
        let events = run(&mut t, &[frame(0, 50, true), frame(1, 100, true)]);
        assert!(events.is_empty());
    }

    #[test]
    fn test_timeout_boundary_extends_at_max() {
        let mut t = ComboTracker::new(config(10, 2));
        run(&mut t, &[frame(0, 100, true), frame(1, 90, true), frame(11, 80, true)]);
        assert_eq!(t.current_combo_length(), 2);
    }

    #[test]
    fn test_timeout_boundary_reopens_past_max() {
        let mut t = ComboTracker::new(config(10, 2));
        let events = run(&mut t, &[frame(0, 100, true), frame(1, 90, true), frame(12, 80, true)]);
        assert!(matches!(events[1], ComboEvent::Dropped { hit_count: 1, .. }));
        assert!(matches!(events[2], ComboEvent::Started { frame_number: 12, damage: 10 }));
        assert_eq!(t.current_combo_length(), 1);
    }

    #[test]
    fn test_recovered_opponent_ends_combo() {
        let mut t = ComboTracker::new(config(30, 2));
        let mut frames = vec![frame(0, 100, true), frame(1, 90, true), frame(2, 80, true)];
        frames.push(frame(3, 80, false).with_defense_flags(Some(false), Some(true)));
        run(&mut t, &frames);
        assert!(t.is_combo_active(), "still in hitstun");

        let events = t.process(&frame(4, 80, false).with_defense_flags(Some(false), Some(false)));
        assert_eq!(finished(&events).len(), 1);
    }

    #[test]
    fn test_unknown_defense_flags_never_end_combo() {
        let mut t = ComboTracker::new(config(30, 2));
        run(&mut t, &[frame(0, 100, true), frame(1, 90, true), frame(2, 80, true), frame(20, 80, false)]);
        assert!(t.is_combo_active());
    }

    #[test]
    fn test_blocking_only_flags_keep_combo_open() {
        let mut t = ComboTracker::new(config(15, 2));
        let not_blocking = |f: FrameInput| f.with_defense_flags(Some(false), None);
        let events = run(
            &mut t,
            &[
                not_blocking(frame(0, 100, true)),
                not_blocking(frame(1, 90, true)),
                not_blocking(frame(2, 90, false)),
                not_blocking(frame(3, 90, false)),
                not_blocking(frame(4, 80, true)),
            ],
        );
        assert!(events.iter().all(|e| !matches!(e, ComboEvent::Dropped { .. })), "{events:?}");
        assert_eq!(t.current_combo_length(), 2);
        assert!(matches!(t.flush(), Some(ComboEvent::Finished(r)) if r.hit_count == 2));
    }

    #[test]
    fn test_blocking_opponent_keeps_combo_open() {
        let mut t = ComboTracker::new(config(30, 2));
        run(&mut t, &[frame(0, 100, true), frame(1, 90, true), frame(2, 80, true)]);
        t.process(&frame(3, 80, false).with_defense_flags(Some(true), Some(false)));
        assert!(t.is_combo_active(), "blockstun is not recovery");
    }

    #[test]
    fn test_extreme_health_values_saturate() {
        let mut t = ComboTracker::new(ComboConfig::default());
        run(&mut t, &[frame(0, i64::MAX, true), frame(1, i64::MIN, true)]);
        assert_eq!(t.current_combo_length(), 1);

        let mut t = ComboTracker::new(ComboConfig::default());
        run(&mut t, &[frame(0, i64::MAX, true), frame(1, 0, true), frame(2, -10, true)]);
        let Some(ComboEvent::Finished(r)) = t.flush() else { panic!("expected record") };
        assert_eq!(r.total_damage, i64::MAX);
    }

    #[test]
    fn test_timeout_reset_input_belongs_to_new_segment() {
        use crate::pattern::MovePattern;

        let mut t = ComboTracker::new(config(15, 2));
        t.set_patterns(PatternMatcher::new(vec![MovePattern::new("Link", "6A 2C", 30).unwrap()]));
        let p = |t: &str| InputCommand::parse(t);
        run(
            &mut t,
            &[frame(0, 100, true).with_input(p("6A")), frame(1, 90, true), frame(2, 80, true)],
        );
        let events = t.process(&frame(20, 70, true).with_input(p("2C")));

        let recs = finished(&events);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].pattern, None, "2C came after the last hit");
        assert_eq!(recs[0].complexity, 1.5);
        assert!(matches!(events.last(), Some(ComboEvent::Started { frame_number: 20, .. })));
        assert_eq!(t.session_state().hit_counter, 1);
    }

    #[test]
    fn test_whiff_ends_combo() {
        let mut t = ComboTracker::new(config(30, 2));
        run(&mut t, &[frame(0, 100, true), frame(1, 90, true), frame(2, 80, true)]);
        let events = t.process(&frame(3, 80, true).with_whiffed(Some(true)));
        assert_eq!(finished(&events).len(), 1);
    }

    #[test]
    fn test_flush_closes_open_segment() {
        let mut t = ComboTracker::new(ComboConfig::default());
        run(&mut t, &[frame(0, 100, true), frame(1, 90, true), frame(2, 80, true)]);
        assert!(matches!(t.flush(), Some(ComboEvent::Finished(_))));
        assert!(t.flush().is_none());
    }

    // ── Flags ────────────────────────────────────────────────────────────

    #[test]
    fn test_finisher_flag() {
        let mut t = ComboTracker::new(ComboConfig::default());
        run(&mut t, &[frame(0, 30, true), frame(1, 10, true), frame(2, 0, true)]);
        let Some(ComboEvent::Finished(r)) = t.flush() else { panic!("expected record") };
        assert!(r.is_finisher);
    }

    #[test]
    fn test_reversal_and_counter_flags() {
        let mut t = ComboTracker::new(ComboConfig::default());
        let defending = FrameInput { attacker_defending: true, ..frame(0, 100, false) };
        let counter = FrameInput { opponent_attacking: true, ..frame(5, 100, true) };
        run(&mut t, &[defending, counter, frame(6, 90, true), frame(7, 80, true)]);
        let Some(ComboEvent::Finished(r)) = t.flush() else { panic!("expected record") };
        assert!(r.is_reversal);
        assert!(r.is_counter);
    }

    #[test]
    fn test_efficient_meter_use() {
        let mut t = ComboTracker::new(ComboConfig { efficient_damage_per_meter: 50.0, ..ComboConfig::default() });
        let m = |f: FrameInput, meter: f64| FrameInput { attacker_meter: meter, ..f };
        run(
            &mut t,
            &[m(frame(0, 100, true), 1.0), m(frame(1, 90, true), 1.0), m(frame(2, 40, true), 0.5)],
        );
        // 60 damage for 0.5 meter = 120 per bar.
        let Some(ComboEvent::Finished(r)) = t.flush() else { panic!("expected record") };
        assert!(r.is_efficient_use);
    }

    #[test]
    fn test_no_meter_spent_is_not_efficient() {
        let mut t = ComboTracker::new(ComboConfig::default());
        run(&mut t, &[frame(0, 100, true), frame(1, 90, true), frame(2, 40, true)]);
        let Some(ComboEvent::Finished(r)) = t.flush() else { panic!("expected record") };
        assert!(!r.is_efficient_use);
    }

    // ── Patterns and listener ────────────────────────────────────────────

    #[test]
    fn test_pattern_labels_record() {
        use crate::pattern::MovePattern;

        let mut t = ComboTracker::new(ComboConfig::default());
        t.set_patterns(PatternMatcher::new(vec![MovePattern::new("Fireball", "236A", 20).unwrap()]));
        let p = |t: &str| InputCommand::parse(t);
        run(
            &mut t,
            &[
                frame(0, 100, false).with_input(p("2")),
                frame(1, 100, false).with_input(p("3")),
                frame(2, 100, true).with_input(p("6A")),
                frame(3, 90, true).with_input(p("5")),
                frame(4, 80, true),
            ],
        );
        let Some(ComboEvent::Finished(r)) = t.flush() else { panic!("expected record") };
        assert_eq!(r.pattern.as_deref(), Some("Fireball"));
        assert!(r.complexity > 0.0);
    }

    #[test]
    fn test_listener_sees_record_after_history_append() {
        let mut t = ComboTracker::new(ComboConfig::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let history = t.history().clone();
        t.set_listener(move |r| {
            sink.lock().unwrap().push((r.hit_count, history.len()));
        });
        run(&mut t, &[frame(0, 100, true), frame(1, 90, true), frame(2, 80, true)]);
        t.flush();
        assert_eq!(*seen.lock().unwrap(), vec![(2, 1)]);
    }

    // ── Reset and state ──────────────────────────────────────────────────

    #[test]
    fn test_reset_keeps_or_clears_history() {
        let mut t = ComboTracker::new(ComboConfig::default());
        run(&mut t, &[frame(0, 100, true), frame(1, 90, true), frame(2, 80, true)]);
        t.flush();
        run(&mut t, &[frame(3, 70, true), frame(4, 60, true)]);

        t.reset(false);
        assert!(!t.is_combo_active());
        assert_eq!(t.history().len(), 1);

        t.reset(true);
        assert!(t.history().is_empty());
    }

    #[test]
    fn test_session_state_restores_open_combo() {
        let mut t = ComboTracker::new(ComboConfig::default());
        run(&mut t, &[frame(0, 100, true), frame(1, 90, true), frame(2, 80, true)]);
        let state = t.session_state();
        assert!(state.in_combo);
        assert_eq!(state.hit_counter, 2);
        assert_eq!(state.last_opponent_health, Some(80));

        let mut u = ComboTracker::new(ComboConfig::default());
        u.restore_session_state(&state).unwrap();
        assert_eq!(u.current_combo_length(), 2);
        u.process(&frame(3, 70, true));
        let Some(ComboEvent::Finished(r)) = u.flush() else { panic!("expected record") };
        assert_eq!(r.hit_count, 3);
        assert_eq!(r.total_damage, 30);
    }

    #[test]
    fn test_invalid_state_leaves_tracker_untouched() {
        let mut t = ComboTracker::new(ComboConfig::default());
        run(&mut t, &[frame(0, 100, true), frame(1, 90, true)]);
        let bad = ComboSessionState { in_combo: true, hit_counter: 0, ..ComboSessionState::default() };
        assert!(t.restore_session_state(&bad).is_err());
        assert!(t.is_combo_active());
    }

    #[test]
    fn test_bad_timing_falls_back() {
        let t = ComboTracker::new(config(0, 2));
        assert_eq!(t.config().max_frames_between_hits, DEFAULT_MAX_FRAMES_BETWEEN_HITS);
        let t = ComboTracker::new(config(100_000, 2));
        assert_eq!(t.config().max_frames_between_hits, DEFAULT_MAX_FRAMES_BETWEEN_HITS);
    }
}
