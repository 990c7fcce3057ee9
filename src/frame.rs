/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Canonical per-frame observation snapshots.
//!
//! An [`ObservationFrame`] is assembled from a [`MappingSnapshot`] using a
//! fixed set of well-known field names plus an open-ended `extras` map for
//! everything else the game mapping declares.
//!
//! # Well-known fields
//!
//! ```text
//! timer, round
//! p{1,2}_x   p{1,2}_y   p{1,2}_health   p{1,2}_meter   p{1,2}_state
//! p{1,2}_facing   p{1,2}_attacking   p{1,2}_blocking   p{1,2}_hitstun
//! ```
//!
//! Missing fields degrade to defaults: 0.0, `facing` derived from relative
//! position, flags cleared. Building a frame never fails.
//!
//! # Invariants
//!
//! - Bounded fields lie in [0.0, 1.0]; non-finite values become 0.0.
//! - `facing` is exactly -1 or +1 (ties resolve to +1).
//! - `attacking`, `blocking` and `hitstun` are exactly 0.0 or 1.0
//!   (threshold 0.5 on the normalized value).
//! - The content hash is computed over field names in sorted order, so map
//!   insertion order never changes it. `frame_number` is metadata and is
//!   excluded from both hash and [`ObservationFrame::diff`].

use std::collections::BTreeMap;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::FrameBuildError;
use crate::mapping::MappingSnapshot;

/// Tolerance for continuous-field comparison in [`ObservationFrame::diff`].
pub const FRAME_EPSILON: f64 = 1e-4;

/// Normalized value at or above which a boolean-coded field reads as set.
const FLAG_THRESHOLD: f64 = 0.5;

/// Mapping names consumed by the fixed schema. Everything else is an extra.
const FIXED_FIELDS: [&str; 20] = [
    "timer",
    "round",
    "p1_x",
    "p1_y",
    "p1_health",
    "p1_meter",
    "p1_state",
    "p1_facing",
    "p1_attacking",
    "p1_blocking",
    "p1_hitstun",
    "p2_x",
    "p2_y",
    "p2_health",
    "p2_meter",
    "p2_state",
    "p2_facing",
    "p2_attacking",
    "p2_blocking",
    "p2_hitstun",
];

// ─── Side ────────────────────────────────────────────────────────────────────

/// One of the two players.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Player one.
    #[default]
    P1,
    /// Player two.
    P2,
}

impl Side {
    /// The other player.
    pub fn opponent(self) -> Side {
        match self {
            Side::P1 => Side::P2,
            Side::P2 => Side::P1,
        }
    }

    /// Field-name prefix, `"p1"` or `"p2"`.
    pub fn prefix(self) -> &'static str {
        match self {
            Side::P1 => "p1",
            Side::P2 => "p2",
        }
    }

    /// Well-known field name for this side, e.g. `Side::P2.field("health")`.
    pub fn field(self, suffix: &str) -> String {
        format!("{}_{suffix}", self.prefix())
    }
}

// ─── Player state ────────────────────────────────────────────────────────────

/// Per-player slice of an [`ObservationFrame`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    /// Horizontal position (normalized when bounded).
    pub x: f64,
    /// Vertical position (normalized when bounded).
    pub y: f64,
    /// Health (normalized when bounded).
    pub health: f64,
    /// Raw health as read from memory, in game units.
    pub health_points: i64,
    /// Super meter (normalized when bounded).
    pub meter: f64,
    /// Raw character state enum.
    pub state: i64,
    /// -1 facing left, +1 facing right.
    pub facing: i8,
    /// 1.0 while an attack is active.
    pub attacking: f64,
    /// 1.0 while blocking.
    pub blocking: f64,
    /// 1.0 while in hitstun.
    pub hitstun: f64,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            health: 0.0,
            health_points: 0,
            meter: 0.0,
            state: 0,
            facing: 1,
            attacking: 0.0,
            blocking: 0.0,
            hitstun: 0.0,
        }
    }
}

impl PlayerState {
    /// Attack flag as a bool.
    pub fn is_attacking(&self) -> bool {
        self.attacking >= FLAG_THRESHOLD
    }

    /// Block flag as a bool.
    pub fn is_blocking(&self) -> bool {
        self.blocking >= FLAG_THRESHOLD
    }

    /// Hitstun flag as a bool.
    pub fn in_hitstun(&self) -> bool {
        self.hitstun >= FLAG_THRESHOLD
    }

    fn from_snapshot(snapshot: &MappingSnapshot, side: Side, opponent_x: f64) -> Self {
        let x = value(snapshot, &side.field("x"));
        let facing_name = side.field("facing");
        let facing = if snapshot.has(&facing_name) {
            sign(snapshot.raw(&facing_name))
        } else {
            sign(opponent_x - x)
        };
        let health_raw = snapshot.raw(&side.field("health"));
        Self {
            x,
            y: value(snapshot, &side.field("y")),
            health: value(snapshot, &side.field("health")),
            health_points: if health_raw.is_finite() { health_raw.round() as i64 } else { 0 },
            meter: value(snapshot, &side.field("meter")),
            state: discrete(snapshot.raw(&side.field("state"))),
            facing,
            attacking: value(snapshot, &side.field("attacking")),
            blocking: value(snapshot, &side.field("blocking")),
            hitstun: value(snapshot, &side.field("hitstun")),
        }
        .sanitized()
    }

    /// Force every field back inside its invariant range.
    fn sanitized(mut self) -> Self {
        for v in [&mut self.x, &mut self.y, &mut self.health, &mut self.meter] {
            *v = finite_or_zero(*v);
        }
        self.facing = if self.facing >= 0 { 1 } else { -1 };
        self.attacking = flag(self.attacking);
        self.blocking = flag(self.blocking);
        self.hitstun = flag(self.hitstun);
        self
    }

    fn push_entries(&self, side: Side, out: &mut BTreeMap<String, FieldEntry>) {
        use FieldEntry::{Continuous, Discrete};
        out.insert(side.field("x"), Continuous(self.x));
        out.insert(side.field("y"), Continuous(self.y));
        out.insert(side.field("health"), Continuous(self.health));
        out.insert(side.field("health_points"), Discrete(self.health_points));
        out.insert(side.field("meter"), Continuous(self.meter));
        out.insert(side.field("state"), Discrete(self.state));
        out.insert(side.field("facing"), Discrete(self.facing as i64));
        out.insert(side.field("attacking"), Discrete(self.attacking as i64));
        out.insert(side.field("blocking"), Discrete(self.blocking as i64));
        out.insert(side.field("hitstun"), Discrete(self.hitstun as i64));
    }

    fn validate(&self, side: Side) -> Result<(), FrameBuildError> {
        if self.facing != 1 && self.facing != -1 {
            return Err(out_of_range(side.field("facing"), self.facing as f64));
        }
        for (suffix, v) in [
            ("attacking", self.attacking),
            ("blocking", self.blocking),
            ("hitstun", self.hitstun),
        ] {
            if v != 0.0 && v != 1.0 {
                return Err(out_of_range(side.field(suffix), v));
            }
        }
        for (suffix, v) in [("x", self.x), ("y", self.y), ("health", self.health), ("meter", self.meter)] {
            if !v.is_finite() {
                return Err(out_of_range(side.field(suffix), v));
            }
        }
        Ok(())
    }
}

// ─── Field helpers ───────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
enum FieldEntry {
    Continuous(f64),
    Discrete(i64),
}

impl FieldEntry {
    fn differs(self, other: FieldEntry, tolerance: f64) -> bool {
        match (self, other) {
            (FieldEntry::Continuous(a), FieldEntry::Continuous(b)) => (a - b).abs() > tolerance,
            (FieldEntry::Discrete(a), FieldEntry::Discrete(b)) => a != b,
            _ => true,
        }
    }

    fn feed(self, hasher: &mut blake3::Hasher) {
        match self {
            FieldEntry::Continuous(v) => {
                // -0.0 and 0.0 must hash alike.
                let v = if v == 0.0 { 0.0 } else { v };
                hasher.update(b"f");
                hasher.update(&v.to_bits().to_le_bytes());
            }
            FieldEntry::Discrete(v) => {
                hasher.update(b"i");
                hasher.update(&v.to_le_bytes());
            }
        }
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

fn sign(v: f64) -> i8 {
    if v < 0.0 { -1 } else { 1 }
}

fn flag(v: f64) -> f64 {
    if v >= FLAG_THRESHOLD { 1.0 } else { 0.0 }
}

fn discrete(v: f64) -> i64 {
    if v.is_finite() { v.round() as i64 } else { 0 }
}

/// Normalized read, re-clamped for bounded fields.
fn value(snapshot: &MappingSnapshot, name: &str) -> f64 {
    let v = finite_or_zero(snapshot.normalized(name));
    if snapshot.is_bounded(name) {
        v.clamp(0.0, 1.0)
    } else {
        v
    }
}

fn out_of_range(field: String, value: f64) -> FrameBuildError {
    FrameBuildError::OutOfRange { field, value }
}

// ─── Observation frame ───────────────────────────────────────────────────────

/// One emulation tick's canonical observation.
///
/// Immutable once built: the content hash is sealed at construction.
/// Equality compares sealed hashes when both frames carry one, and falls
/// back to field-by-field comparison within [`FRAME_EPSILON`] otherwise.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObservationFrame {
    frame_number: u64,
    timer: f64,
    round: i64,
    p1: PlayerState,
    p2: PlayerState,
    x_distance: f64,
    y_distance: f64,
    #[serde(default)]
    extras: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    updated_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

impl ObservationFrame {
    /// Assemble a frame from the current snapshot.
    pub fn build(snapshot: &MappingSnapshot, frame_number: u64) -> Self {
        let p1_x = value(snapshot, "p1_x");
        let p2_x = value(snapshot, "p2_x");

        let extras = snapshot
            .iter()
            .filter(|(name, _)| !FIXED_FIELDS.contains(name))
            .map(|(name, _)| (name.to_string(), value(snapshot, name)));

        FrameBuilder::new(frame_number)
            .timer(value(snapshot, "timer"))
            .round(discrete(snapshot.raw("round")))
            .player(Side::P1, PlayerState::from_snapshot(snapshot, Side::P1, p2_x))
            .player(Side::P2, PlayerState::from_snapshot(snapshot, Side::P2, p1_x))
            .extras(extras)
            .build()
    }

    /// Like [`build`](Self::build), but returns `None` when nothing moved.
    ///
    /// The filter set is [`MappingSnapshot::changed_fields`], or
    /// [`MappingSnapshot::significant_changes`] with `threshold` when
    /// `only_significant` is set. The fixed schema is always populated; the
    /// extras map is restricted to the filter set, and
    /// [`updated_fields`](Self::updated_fields) lists it.
    pub fn build_with_change_filter(
        snapshot: &MappingSnapshot,
        frame_number: u64,
        only_significant: bool,
        threshold: f64,
    ) -> Option<Self> {
        let updated = if only_significant {
            snapshot.significant_changes(threshold)
        } else {
            snapshot.changed_fields()
        };
        if updated.is_empty() {
            return None;
        }

        let mut frame = Self::build(snapshot, frame_number);
        frame.extras.retain(|k, _| updated.contains(k.as_str()));
        frame.updated_fields = updated.iter().map(|s| s.to_string()).collect();
        frame.hash = Some(frame.content_hash());
        Some(frame)
    }

    /// Start building a frame from already-normalized values.
    pub fn builder(frame_number: u64) -> FrameBuilder {
        FrameBuilder::new(frame_number)
    }

    // ── Accessors ──────────────────────────────────────────────────────

    /// Frame number this observation was taken at.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Round time remaining.
    pub fn timer(&self) -> f64 {
        self.timer
    }

    /// Round index.
    pub fn round(&self) -> i64 {
        self.round
    }

    /// Player one.
    pub fn p1(&self) -> &PlayerState {
        &self.p1
    }

    /// Player two.
    pub fn p2(&self) -> &PlayerState {
        &self.p2
    }

    /// The given player.
    pub fn player(&self, side: Side) -> &PlayerState {
        match side {
            Side::P1 => &self.p1,
            Side::P2 => &self.p2,
        }
    }

    /// `|p1.x - p2.x|`.
    pub fn x_distance(&self) -> f64 {
        self.x_distance
    }

    /// `|p1.y - p2.y|`.
    pub fn y_distance(&self) -> f64 {
        self.y_distance
    }

    /// Game-specific values outside the fixed schema.
    pub fn extras(&self) -> &HashMap<String, f64> {
        &self.extras
    }

    /// Extra value by name.
    pub fn extra(&self, name: &str) -> Option<f64> {
        self.extras.get(name).copied()
    }

    /// Extra value by name, or `default` when absent.
    pub fn extra_or(&self, name: &str, default: f64) -> f64 {
        self.extra(name).unwrap_or(default)
    }

    /// Fields that triggered a change-filtered build; empty otherwise.
    pub fn updated_fields(&self) -> &[String] {
        &self.updated_fields
    }

    // ── Hashing and comparison ─────────────────────────────────────────

    /// Content hash: the sealed hash when present, else a fresh computation.
    pub fn hash(&self) -> String {
        self.hash.clone().unwrap_or_else(|| self.content_hash())
    }

    /// The hash sealed at construction, if any.
    pub fn sealed_hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// True when there is no sealed hash or it matches the content.
    pub fn verify_hash(&self) -> bool {
        self.hash.as_deref().map_or(true, |h| h == self.content_hash())
    }

    /// Names of fields that differ from `other`, sorted.
    ///
    /// Continuous fields compare within [`FRAME_EPSILON`]; discrete fields
    /// compare exactly. Extras present on only one side count as differing.
    pub fn diff(&self, other: &Self) -> Vec<String> {
        self.diff_with_tolerance(other, FRAME_EPSILON)
    }

    /// [`diff`](Self::diff) with an explicit tolerance.
    pub fn diff_with_tolerance(&self, other: &Self, tolerance: f64) -> Vec<String> {
        let mine = self.entries();
        let theirs = other.entries();

        let mut out: Vec<String> = mine
            .iter()
            .filter(|(name, a)| theirs.get(*name).map_or(true, |b| a.differs(*b, tolerance)))
            .map(|(name, _)| name.clone())
            .collect();
        out.extend(theirs.keys().filter(|k| !mine.contains_key(*k)).cloned());
        out.sort();
        out
    }

    /// Hash comparison when both frames are sealed, tolerant field
    /// comparison otherwise.
    pub fn matches(&self, other: &Self) -> bool {
        match (&self.hash, &other.hash) {
            (Some(a), Some(b)) => a == b,
            _ => self.diff(other).is_empty(),
        }
    }

    /// All field values in sorted-name order, for flat model inputs.
    pub fn features(&self) -> Vec<f64> {
        self.entries()
            .into_values()
            .map(|e| match e {
                FieldEntry::Continuous(v) => v,
                FieldEntry::Discrete(v) => v as f64,
            })
            .collect()
    }

    // ── Serialization ──────────────────────────────────────────────────

    /// Encode as JSON.
    pub fn to_json(&self) -> Result<String, FrameBuildError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON, rejecting documents that break a range invariant
    /// or whose sealed hash disagrees with their content.
    pub fn from_json(text: &str) -> Result<Self, FrameBuildError> {
        let frame: Self = serde_json::from_str(text)?;
        frame.p1.validate(Side::P1)?;
        frame.p2.validate(Side::P2)?;
        for (name, v) in [
            ("timer", frame.timer),
            ("x_distance", frame.x_distance),
            ("y_distance", frame.y_distance),
        ] {
            if !v.is_finite() {
                return Err(out_of_range(name.to_string(), v));
            }
        }
        if frame.x_distance < 0.0 || frame.y_distance < 0.0 {
            return Err(out_of_range("x_distance".into(), frame.x_distance.min(frame.y_distance)));
        }
        if let Some((name, v)) = frame.extras.iter().find(|(_, v)| !v.is_finite()) {
            return Err(out_of_range(name.clone(), *v));
        }
        if let Some(sealed) = frame.hash.as_deref() {
            let computed = frame.content_hash();
            if sealed != computed {
                return Err(FrameBuildError::HashMismatch { sealed: sealed.to_string(), computed });
            }
        }
        Ok(frame)
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn entries(&self) -> BTreeMap<String, FieldEntry> {
        let mut out = BTreeMap::new();
        out.insert("timer".to_string(), FieldEntry::Continuous(self.timer));
        out.insert("round".to_string(), FieldEntry::Discrete(self.round));
        out.insert("x_distance".to_string(), FieldEntry::Continuous(self.x_distance));
        out.insert("y_distance".to_string(), FieldEntry::Continuous(self.y_distance));
        self.p1.push_entries(Side::P1, &mut out);
        self.p2.push_entries(Side::P2, &mut out);
        for (name, v) in &self.extras {
            out.insert(name.clone(), FieldEntry::Continuous(*v));
        }
        out
    }

    fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for (name, entry) in self.entries() {
            hasher.update(name.as_bytes());
            hasher.update(&[0]);
            entry.feed(&mut hasher);
        }
        hasher.finalize().to_hex().to_string()
    }
}

impl PartialEq for ObservationFrame {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Assembles an [`ObservationFrame`] from already-normalized values.
///
/// [`build`](FrameBuilder::build) enforces the facing and flag invariants,
/// derives the distances and seals the hash.
#[derive(Clone, Debug)]
pub struct FrameBuilder {
    frame_number: u64,
    timer: f64,
    round: i64,
    p1: PlayerState,
    p2: PlayerState,
    extras: HashMap<String, f64>,
}

impl FrameBuilder {
    /// Empty builder for `frame_number`.
    pub fn new(frame_number: u64) -> Self {
        Self {
            frame_number,
            timer: 0.0,
            round: 0,
            p1: PlayerState::default(),
            p2: PlayerState::default(),
            extras: HashMap::new(),
        }
    }

    /// Round time remaining.
    pub fn timer(mut self, timer: f64) -> Self {
        self.timer = timer;
        self
    }

    /// Round index.
    pub fn round(mut self, round: i64) -> Self {
        self.round = round;
        self
    }

    /// State of one player.
    pub fn player(mut self, side: Side, state: PlayerState) -> Self {
        match side {
            Side::P1 => self.p1 = state,
            Side::P2 => self.p2 = state,
        }
        self
    }

    /// Add one extra value.
    pub fn extra(mut self, name: impl Into<String>, value: f64) -> Self {
        self.extras.insert(name.into(), value);
        self
    }

    /// Add several extra values.
    pub fn extras<I>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        self.extras.extend(values);
        self
    }

    /// Finish and seal the frame.
    pub fn build(self) -> ObservationFrame {
        let p1 = self.p1.sanitized();
        let p2 = self.p2.sanitized();
        let extras = self
            .extras
            .into_iter()
            .map(|(k, v)| (k, finite_or_zero(v)))
            .collect();
        let mut frame = ObservationFrame {
            frame_number: self.frame_number,
            timer: finite_or_zero(self.timer),
            round: self.round,
            x_distance: (p1.x - p2.x).abs(),
            y_distance: (p1.y - p2.y).abs(),
            p1,
            p2,
            extras,
            updated_fields: Vec::new(),
            hash: None,
        };
        frame.hash = Some(frame.content_hash());
        frame
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
