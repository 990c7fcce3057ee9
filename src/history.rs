/*
 * This source code is licensed under the Business Source License 1.1.
 * See LICENSE in the root directory for full details.
 */

//! Combo ledger, aggregate metrics and persistence.
//!
//! [`ComboHistory`] is append-only during play. It keeps a
//! `description → count` map alongside the records so diversity can be
//! read without rescanning.
//!
//! # Diversity
//!
//! Normalized Shannon entropy over description labels:
//!
//! ```text
//! H = -Σ p_i ln p_i        p_i = count_i / total
//! diversity = H / ln(k)    k = number of distinct labels
//! ```
//!
//! Defined as 0.0 when `k ≤ 1`.
//!
//! # Persisted layout
//!
//! ```text
//! { inCombo, comboStartFrame, lastHitFrame, hitCounter, totalDamage,
//!   lastOpponentHealth, comboHistory: [ {frameStart, frameEnd, hitCount,
//!   damage, complexity, description, isReversal, isCounter, isFinisher,
//!   isEfficientUse, hits?, pattern?}, ... ] }
//! ```
//!
//! # Invariants
//!
//! - `description_counts` always sums to `records.len()`.
//! - Writes go to a sibling temp file and are renamed into place, so a
//!   failed save never leaves a truncated document behind.
//! - [`SharedComboHistory::clear`] and [`SharedComboHistory::replace`] swap
//!   the whole ledger under the lock.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::combo::{ComboHit, ComboRecord};
use crate::error::PersistenceError;

// ─── Ledger ──────────────────────────────────────────────────────────────────

/// Every finished combo of a session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ComboHistory {
    records: Vec<ComboRecord>,
    description_counts: BTreeMap<String, usize>,
}

/// Aggregate metrics over a [`ComboHistory`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStats {
    /// Number of records.
    pub combo_count: usize,
    /// Longest combo by hit count.
    pub max_length: usize,
    /// Largest single-combo damage.
    pub max_damage: i64,
    /// Sum of hit counts.
    pub total_hits: usize,
    /// Sum of damage.
    pub total_damage: i64,
    /// Mean hit count, 0.0 when empty.
    pub average_length: f64,
    /// Mean damage, 0.0 when empty.
    pub average_damage: f64,
    /// Mean complexity, 0.0 when empty.
    pub average_complexity: f64,
    /// Normalized description entropy.
    pub diversity: f64,
}

impl ComboHistory {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger holding `records` in order.
    pub fn from_records<I: IntoIterator<Item = ComboRecord>>(records: I) -> Self {
        let mut h = Self::new();
        for r in records {
            h.push(r);
        }
        h
    }

    /// Append a finished combo.
    pub fn push(&mut self, record: ComboRecord) {
        *self
            .description_counts
            .entry(record.description.clone())
            .or_insert(0) += 1;
        self.records.push(record);
    }

    /// All records, oldest first.
    pub fn records(&self) -> &[ComboRecord] {
        &self.records
    }

    /// The last `n` records, oldest first.
    pub fn recent(&self, n: usize) -> &[ComboRecord] {
        let start = self.records.len().saturating_sub(n);
        &self.records[start..]
    }

    /// Occurrences per description label.
    pub fn description_counts(&self) -> &BTreeMap<String, usize> {
        &self.description_counts
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no combo has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Normalized Shannon entropy of the description distribution.
    pub fn diversity_score(&self) -> f64 {
        let k = self.description_counts.len();
        if k <= 1 {
            return 0.0;
        }
        let total = self.records.len() as f64;
        let entropy: f64 = self
            .description_counts
            .values()
            .map(|&c| {
                let p = c as f64 / total;
                -p * p.ln()
            })
            .sum();
        entropy / (k as f64).ln()
    }

    /// Aggregate metrics.
    pub fn stats(&self) -> HistoryStats {
        let n = self.records.len();
        let mut s = HistoryStats {
            combo_count: n,
            diversity: self.diversity_score(),
            ..HistoryStats::default()
        };
        if n == 0 {
            return s;
        }
        let mut complexity = 0.0;
        for r in &self.records {
            s.max_length = s.max_length.max(r.hit_count);
            s.max_damage = s.max_damage.max(r.total_damage);
            s.total_hits += r.hit_count;
            s.total_damage = s.total_damage.saturating_add(r.total_damage);
            complexity += r.complexity;
        }
        s.average_length = s.total_hits as f64 / n as f64;
        s.average_damage = s.total_damage as f64 / n as f64;
        s.average_complexity = complexity / n as f64;
        s
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.records.clear();
        self.description_counts.clear();
    }

    // ── Persistence ────────────────────────────────────────────────────

    /// Save as an idle session document.
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        ComboSessionState::idle(self).save(path)
    }

    /// Load the history part of a session document.
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        ComboSessionState::load(path)?.history()
    }

    /// Write a pretty-printed report with stats, label counts and records.
    pub fn export(&self, path: &Path) -> Result<(), PersistenceError> {
        let report = ExportReport {
            stats: self.stats(),
            description_counts: &self.description_counts,
            combos: self.records.iter().map(ComboRecordDoc::from).collect(),
        };
        let text = serde_json::to_string_pretty(&report)?;
        write_atomic(path, &text)?;
        tracing::info!(path = %path.display(), combos = self.records.len(), "exported combo history");
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportReport<'a> {
    stats: HistoryStats,
    description_counts: &'a BTreeMap<String, usize>,
    combos: Vec<ComboRecordDoc>,
}

// ─── Shared handle ───────────────────────────────────────────────────────────

/// Lock-guarded [`ComboHistory`] shared between the tracker and readers.
///
/// Cloning the handle shares the ledger. A poisoned lock is recovered; the
/// ledger is only ever replaced whole, so it cannot be left half-written.
#[derive(Clone, Default)]
pub struct SharedComboHistory(Arc<Mutex<ComboHistory>>);

impl SharedComboHistory {
    /// Fresh, empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing ledger.
    pub fn from_history(history: ComboHistory) -> Self {
        Self(Arc::new(Mutex::new(history)))
    }

    fn lock(&self) -> MutexGuard<'_, ComboHistory> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record.
    pub fn push(&self, record: ComboRecord) {
        self.lock().push(record);
    }

    /// Run `f` with the ledger locked.
    pub fn with<R>(&self, f: impl FnOnce(&ComboHistory) -> R) -> R {
        f(&self.lock())
    }

    /// Owned copy of the ledger.
    pub fn snapshot(&self) -> ComboHistory {
        self.lock().clone()
    }

    /// The last `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ComboRecord> {
        self.lock().recent(n).to_vec()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when no combo has been recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// See [`ComboHistory::diversity_score`].
    pub fn diversity_score(&self) -> f64 {
        self.lock().diversity_score()
    }

    /// See [`ComboHistory::stats`].
    pub fn stats(&self) -> HistoryStats {
        self.lock().stats()
    }

    /// Swap in an empty ledger.
    pub fn clear(&self) {
        *self.lock() = ComboHistory::new();
    }

    /// Swap in `history`.
    pub fn replace(&self, history: ComboHistory) {
        *self.lock() = history;
    }
}

impl fmt::Debug for SharedComboHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedComboHistory")
            .field("len", &self.len())
            .finish()
    }
}

// ─── Documents ───────────────────────────────────────────────────────────────

/// Persisted form of a [`ComboRecord`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComboRecordDoc {
    /// First hit frame.
    pub frame_start: u64,
    /// Last hit frame.
    pub frame_end: u64,
    /// Number of hits.
    pub hit_count: usize,
    /// Total damage.
    pub damage: i64,
    /// Complexity score.
    pub complexity: f64,
    /// Tier label.
    pub description: String,
    /// Started out of a defensive state.
    pub is_reversal: bool,
    /// Opened on an attacking opponent.
    pub is_counter: bool,
    /// Emptied the opponent's health.
    pub is_finisher: bool,
    /// Converted meter into damage efficiently.
    pub is_efficient_use: bool,
    /// Per-hit detail, omitted by older writers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hits: Vec<ComboHit>,
    /// Matched move pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl From<&ComboRecord> for ComboRecordDoc {
    fn from(r: &ComboRecord) -> Self {
        Self {
            frame_start: r.start_frame,
            frame_end: r.end_frame,
            hit_count: r.hit_count,
            damage: r.total_damage,
            complexity: r.complexity,
            description: r.description.clone(),
            is_reversal: r.is_reversal,
            is_counter: r.is_counter,
            is_finisher: r.is_finisher,
            is_efficient_use: r.is_efficient_use,
            hits: r.hits.clone(),
            pattern: r.pattern.clone(),
        }
    }
}

impl TryFrom<ComboRecordDoc> for ComboRecord {
    type Error = PersistenceError;

    fn try_from(d: ComboRecordDoc) -> Result<Self, Self::Error> {
        let invalid = |reason: String| PersistenceError::ParseFailure { reason };
        if d.hit_count == 0 {
            return Err(invalid(format!("combo at frame {} has no hits", d.frame_start)));
        }
        if d.frame_end < d.frame_start {
            return Err(invalid(format!(
                "combo ends at frame {} before it starts at {}",
                d.frame_end, d.frame_start
            )));
        }
        if !d.hits.is_empty() && d.hits.len() != d.hit_count {
            return Err(invalid(format!(
                "combo at frame {} lists {} hits but hitCount is {}",
                d.frame_start,
                d.hits.len(),
                d.hit_count
            )));
        }
        Ok(Self {
            start_frame: d.frame_start,
            end_frame: d.frame_end,
            hits: d.hits,
            hit_count: d.hit_count,
            total_damage: d.damage,
            complexity: d.complexity,
            description: d.description,
            is_reversal: d.is_reversal,
            is_counter: d.is_counter,
            is_finisher: d.is_finisher,
            is_efficient_use: d.is_efficient_use,
            pattern: d.pattern,
        })
    }
}

/// Persisted tracker state: the in-progress combo plus the whole ledger.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComboSessionState {
    /// A combo was open when the state was taken.
    pub in_combo: bool,
    /// Start frame of the open combo.
    pub combo_start_frame: u64,
    /// Frame of the open combo's latest hit.
    pub last_hit_frame: u64,
    /// Hits in the open combo.
    pub hit_counter: usize,
    /// Damage in the open combo.
    pub total_damage: i64,
    /// Opponent health at the last observed frame.
    pub last_opponent_health: Option<i64>,
    /// Hits of the open combo, when the writer recorded them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active_hits: Vec<ComboHit>,
    /// Finished combos, oldest first.
    #[serde(default)]
    pub combo_history: Vec<ComboRecordDoc>,
}

impl ComboSessionState {
    /// State with no open combo.
    pub fn idle(history: &ComboHistory) -> Self {
        Self {
            combo_history: history.records().iter().map(ComboRecordDoc::from).collect(),
            ..Self::default()
        }
    }

    /// Rebuild the ledger, validating every record.
    pub fn history(&self) -> Result<ComboHistory, PersistenceError> {
        let records = self
            .combo_history
            .iter()
            .cloned()
            .map(ComboRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ComboHistory::from_records(records))
    }

    /// Encode as compact JSON.
    pub fn to_json(&self) -> Result<String, PersistenceError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON.
    pub fn from_json(text: &str) -> Result<Self, PersistenceError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Write to `path`.
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        write_atomic(path, &self.to_json()?)?;
        tracing::debug!(path = %path.display(), combos = self.combo_history.len(), "saved combo session state");
        Ok(())
    }

    /// Read from `path`.
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        let text = fs::read_to_string(path).map_err(|e| PersistenceError::io(path, e))?;
        let state = Self::from_json(&text)?;
        tracing::debug!(path = %path.display(), combos = state.combo_history.len(), "loaded combo session state");
        Ok(state)
    }
}

fn write_atomic(path: &Path, text: &str) -> Result<(), PersistenceError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, text).map_err(|e| PersistenceError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| PersistenceError::io(path, e))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Helpers ──────────────────────────────────────────────────────────

    fn record(start: u64, hits: usize, damage: i64, description: &str) -> ComboRecord {
        ComboRecord {
            start_frame: start,
            end_frame: start + hits as u64,
            hits: (0..hits)
                .map(|i| ComboHit { frame_number: start + i as u64, damage: damage / hits as i64 })
                .collect(),
            hit_count: hits,
            total_damage: damage,
            complexity: 2.5,
            description: description.to_string(),
            is_reversal: false,
            is_counter: true,
            is_finisher: false,
            is_efficient_use: false,
            pattern: None,
        }
    }

    // ── Metrics ──────────────────────────────────────────────────────────

    #[test]
    fn test_diversity_zero_for_single_label() {
        let h = ComboHistory::from_records((0..10).map(|i| record(i * 100, 2, 20, "Small Combo")));
        assert_eq!(h.diversity_score(), 0.0);
    }

    #[test]
    fn test_diversity_zero_when_empty() {
        assert_eq!(ComboHistory::new().diversity_score(), 0.0);
    }

    #[test]
    fn test_diversity_one_for_uniform_labels() {
        let h = ComboHistory::from_records(vec![
            record(0, 2, 10, "Small Combo"),
            record(100, 5, 30, "Medium Punisher"),
            record(200, 2, 10, "Small Combo"),
            record(300, 5, 30, "Medium Punisher"),
        ]);
        assert!((h.diversity_score() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_diversity_skewed_between_zero_and_one() {
        let mut records: Vec<_> = (0..9).map(|i| record(i * 10, 2, 10, "Small Combo")).collect();
        records.push(record(500, 10, 90, "Massive Devastation"));
        let d = ComboHistory::from_records(records).diversity_score();
        assert!(d > 0.0 && d < 1.0, "{d}");
    }

    #[test]
    fn test_stats() {
        let h = ComboHistory::from_records(vec![record(0, 2, 20, "Small Combo"), record(50, 4, 60, "Medium Destroyer")]);
        let s = h.stats();
        assert_eq!(s.combo_count, 2);
        assert_eq!(s.max_length, 4);
        assert_eq!(s.max_damage, 60);
        assert_eq!(s.total_hits, 6);
        assert_eq!(s.total_damage, 80);
        assert!((s.average_length - 3.0).abs() < 1e-12);
        assert!((s.average_damage - 40.0).abs() < 1e-12);
    }

    #[test]
    fn test_recent_keeps_order() {
        let h = ComboHistory::from_records((0..5).map(|i| record(i * 10, 2, 10, "Small Combo")));
        let starts: Vec<u64> = h.recent(2).iter().map(|r| r.start_frame).collect();
        assert_eq!(starts, vec![30, 40]);
        assert_eq!(h.recent(99).len(), 5);
    }

    // ── Shared handle ────────────────────────────────────────────────────

    #[test]
    fn test_shared_handle_clones_share_state() {
        let a = SharedComboHistory::new();
        let b = a.clone();
        a.push(record(0, 2, 10, "Small Combo"));
        assert_eq!(b.len(), 1);
        b.clear();
        assert!(a.is_empty());
    }

    #[test]
    fn test_shared_handle_recovers_from_poison() {
        let shared = SharedComboHistory::new();
        shared.push(record(0, 2, 10, "Small Combo"));
        let inner = shared.clone();
        let _ = std::thread::spawn(move || {
            inner.with(|_| panic!("poison the lock"));
        })
        .join();
        assert_eq!(shared.len(), 1);
    }

    // ── Documents ────────────────────────────────────────────────────────

    #[test]
    fn test_document_keys_are_camel_case() {
        let state = ComboSessionState::idle(&ComboHistory::from_records(vec![record(0, 2, 10, "Small Combo")]));
        let v: serde_json::Value = serde_json::from_str(&state.to_json().unwrap()).unwrap();
        for key in ["inCombo", "comboStartFrame", "lastHitFrame", "hitCounter", "totalDamage", "lastOpponentHealth", "comboHistory"] {
            assert!(v.get(key).is_some(), "missing {key}");
        }
        let rec = &v["comboHistory"][0];
        for key in ["frameStart", "frameEnd", "hitCount", "damage", "complexity", "description", "isReversal", "isCounter", "isFinisher", "isEfficientUse"] {
            assert!(rec.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn test_records_without_hit_list_load() {
        let text = r#"{"inCombo":false,"comboStartFrame":0,"lastHitFrame":0,"hitCounter":0,
            "totalDamage":0,"lastOpponentHealth":null,"comboHistory":[{"frameStart":5,"frameEnd":9,
            "hitCount":3,"damage":42,"complexity":1.5,"description":"Small Punisher","isReversal":false,
            "isCounter":false,"isFinisher":true,"isEfficientUse":false}]}"#;
        let h = ComboSessionState::from_json(text).unwrap().history().unwrap();
        assert_eq!(h.len(), 1);
        assert_eq!(h.records()[0].hit_count, 3);
        assert!(h.records()[0].hits.is_empty());
        assert!(h.records()[0].is_finisher);
    }

    #[test]
    fn test_inconsistent_hit_list_rejected() {
        let mut doc = ComboRecordDoc::from(&record(0, 3, 30, "Small Punisher"));
        doc.hit_count = 4;
        assert!(matches!(ComboRecord::try_from(doc), Err(PersistenceError::ParseFailure { .. })));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut r = record(0, 3, 33, "Small Punisher");
        r.complexity = 0.1 + 0.2;
        r.pattern = Some("Fireball".into());
        let h = ComboHistory::from_records(vec![r, record(40, 7, 81, "Big Devastation")]);
        h.save(&path).unwrap();
        let back = ComboHistory::load(&path).unwrap();
        assert_eq!(back, h);
        assert_eq!(back.diversity_score(), h.diversity_score());
    }

    #[test]
    fn test_load_missing_file_is_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = ComboHistory::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, PersistenceError::IoFailure { .. }));
    }

    #[test]
    fn test_export_writes_stats_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let h = ComboHistory::from_records(vec![record(0, 2, 10, "Small Combo")]);
        h.export(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(v["stats"]["comboCount"], 1);
        assert_eq!(v["descriptionCounts"]["Small Combo"], 1);
        assert_eq!(v["combos"].as_array().map(Vec::len), Some(1));
    }
}
