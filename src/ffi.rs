//! Python FFI bindings via PyO3.
//!
//! Exposes the combo tracker and frame JSON helpers to Python training and
//! logging code. Frame construction stays on the Rust side; Python receives
//! frames as JSON.
//!
//! # Building the Python extension
//!
//! ```bash
//! pip install maturin
//! maturin develop --features python-ffi
//! ```
//!
//! # Usage
//!
//! ```python
//! from fightlens_core import ComboTracker
//!
//! tracker = ComboTracker(max_frames_between_hits=12)
//! for frame, hp, attacking in stream:
//!     for ev in tracker.process(frame, hp, attacking):
//!         if ev.kind == "finished":
//!             print(ev.record.description, ev.record.total_damage)
//! print(tracker.diversity_score())
//! ```

#![allow(non_snake_case)]
#![allow(missing_docs)]

use std::path::PathBuf;

use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;

use crate::combo::{
    describe as rust_describe, ComboConfig, ComboEvent, ComboRecord, ComboTracker as RustComboTracker,
    FrameInput,
};
use crate::error::{FrameBuildError, PersistenceError};
use crate::frame::ObservationFrame;
use crate::input::InputCommand;

fn persistence_err(e: PersistenceError) -> PyErr {
    match e {
        PersistenceError::IoFailure { .. } => PyIOError::new_err(e.to_string()),
        PersistenceError::ParseFailure { .. } => PyValueError::new_err(e.to_string()),
    }
}

fn frame_err(e: FrameBuildError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

// ── ComboRecord ───────────────────────────────────────────────────────────────

/// A finished combo. Read-only.
#[pyclass(name = "ComboRecord", frozen)]
#[derive(Clone)]
pub struct PyComboRecord {
    inner: ComboRecord,
}

#[pymethods]
impl PyComboRecord {
    #[getter]
    pub fn start_frame(&self) -> u64 {
        self.inner.start_frame
    }

    #[getter]
    pub fn end_frame(&self) -> u64 {
        self.inner.end_frame
    }

    #[getter]
    pub fn hit_count(&self) -> usize {
        self.inner.hit_count
    }

    #[getter]
    pub fn total_damage(&self) -> i64 {
        self.inner.total_damage
    }

    #[getter]
    pub fn complexity(&self) -> f64 {
        self.inner.complexity
    }

    #[getter]
    pub fn description(&self) -> String {
        self.inner.description.clone()
    }

    #[getter]
    pub fn pattern(&self) -> Option<String> {
        self.inner.pattern.clone()
    }

    /// `[(frame_number, damage), ...]`
    #[getter]
    pub fn hits(&self) -> Vec<(u64, i64)> {
        self.inner.hits.iter().map(|h| (h.frame_number, h.damage)).collect()
    }

    #[getter]
    pub fn is_reversal(&self) -> bool {
        self.inner.is_reversal
    }

    #[getter]
    pub fn is_counter(&self) -> bool {
        self.inner.is_counter
    }

    #[getter]
    pub fn is_finisher(&self) -> bool {
        self.inner.is_finisher
    }

    #[getter]
    pub fn is_efficient_use(&self) -> bool {
        self.inner.is_efficient_use
    }

    pub fn __repr__(&self) -> String {
        format!(
            "ComboRecord(frames={}..{}, hits={}, damage={}, description='{}')",
            self.inner.start_frame,
            self.inner.end_frame,
            self.inner.hit_count,
            self.inner.total_damage,
            self.inner.description
        )
    }
}

// ── ComboEvent ────────────────────────────────────────────────────────────────

/// One tracker event: `kind` is `"started"`, `"extended"`, `"finished"` or
/// `"dropped"`.
#[pyclass(name = "ComboEvent", frozen)]
#[derive(Clone)]
pub struct PyComboEvent {
    #[pyo3(get)]
    kind: &'static str,
    #[pyo3(get)]
    frame_number: u64,
    #[pyo3(get)]
    hit_count: usize,
    #[pyo3(get)]
    damage: i64,
    #[pyo3(get)]
    record: Option<PyComboRecord>,
}

impl From<ComboEvent> for PyComboEvent {
    fn from(e: ComboEvent) -> Self {
        match e {
            ComboEvent::Started { frame_number, damage } => Self {
                kind: "started",
                frame_number,
                hit_count: 1,
                damage,
                record: None,
            },
            ComboEvent::Extended { frame_number, hit_count, damage } => Self {
                kind: "extended",
                frame_number,
                hit_count,
                damage,
                record: None,
            },
            ComboEvent::Dropped { end_frame, hit_count, .. } => Self {
                kind: "dropped",
                frame_number: end_frame,
                hit_count,
                damage: 0,
                record: None,
            },
            ComboEvent::Finished(r) => Self {
                kind: "finished",
                frame_number: r.end_frame,
                hit_count: r.hit_count,
                damage: r.total_damage,
                record: Some(PyComboRecord { inner: r }),
            },
        }
    }
}

#[pymethods]
impl PyComboEvent {
    pub fn __repr__(&self) -> String {
        format!(
            "ComboEvent(kind='{}', frame={}, hits={}, damage={})",
            self.kind, self.frame_number, self.hit_count, self.damage
        )
    }
}

// ── ComboTracker ──────────────────────────────────────────────────────────────

/// Health-delta combo state machine.
#[pyclass(name = "ComboTracker")]
pub struct PyComboTracker {
    inner: RustComboTracker,
}

#[pymethods]
impl PyComboTracker {
    /// Create a tracker. Out-of-range timing falls back to 15 frames.
    #[new]
    #[pyo3(signature = (max_frames_between_hits=15, minimum_combo_length=2, attack_recency_frames=3))]
    pub fn new(max_frames_between_hits: u32, minimum_combo_length: usize, attack_recency_frames: u32) -> Self {
        let config = ComboConfig {
            max_frames_between_hits,
            minimum_combo_length,
            attack_recency_frames,
            ..ComboConfig::default()
        };
        Self { inner: RustComboTracker::new(config) }
    }

    /// Feed one frame of attacker-relative observations.
    ///
    /// Args:
    ///     frame_number:      strictly increasing frame counter
    ///     opponent_health:   opponent health in game units
    ///     attacking:         attacker has an attack active
    ///     hit_connected:     attacker's hit registered this frame
    ///     opponent_blocking: None when the game does not expose it
    ///     opponent_hitstun:  None when the game does not expose it
    ///     whiffed:           None when the game does not expose it
    ///     input:             numpad token such as "2B", or None
    ///
    /// Returns:
    ///     list of ComboEvent
    #[pyo3(signature = (
        frame_number, opponent_health, attacking, hit_connected=false,
        opponent_blocking=None, opponent_hitstun=None, whiffed=None, input=None
    ))]
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        &mut self,
        frame_number: u64,
        opponent_health: i64,
        attacking: bool,
        hit_connected: bool,
        opponent_blocking: Option<bool>,
        opponent_hitstun: Option<bool>,
        whiffed: Option<bool>,
        input: Option<&str>,
    ) -> PyResult<Vec<PyComboEvent>> {
        let input = match input {
            Some(token) => Some(
                InputCommand::parse(token)
                    .ok_or_else(|| PyValueError::new_err(format!("invalid input token '{token}'")))?,
            ),
            None => None,
        };
        let frame = FrameInput {
            frame_number,
            opponent_health,
            attacker_attacking: attacking,
            hit_connected,
            ..FrameInput::default()
        }
        .with_defense_flags(opponent_blocking, opponent_hitstun)
        .with_whiffed(whiffed)
        .with_input(input);
        Ok(self.inner.process(&frame).into_iter().map(PyComboEvent::from).collect())
    }

    /// Close any open combo. Returns the closing event, if any.
    pub fn flush(&mut self) -> Option<PyComboEvent> {
        self.inner.flush().map(PyComboEvent::from)
    }

    pub fn is_combo_active(&self) -> bool {
        self.inner.is_combo_active()
    }

    pub fn current_combo_length(&self) -> usize {
        self.inner.current_combo_length()
    }

    /// The last `n` recorded combos, oldest first.
    pub fn recent_combos(&self, n: usize) -> Vec<PyComboRecord> {
        self.inner
            .recent_combos(n)
            .into_iter()
            .map(|inner| PyComboRecord { inner })
            .collect()
    }

    /// Normalized entropy of combo descriptions.
    pub fn diversity_score(&self) -> f64 {
        self.inner.history().diversity_score()
    }

    #[pyo3(signature = (clear_history=false))]
    pub fn reset(&mut self, clear_history: bool) {
        self.inner.reset(clear_history);
    }

    /// Save tracker state and history as JSON.
    pub fn save_state(&self, path: PathBuf) -> PyResult<()> {
        self.inner.save_state(&path).map_err(persistence_err)
    }

    /// Restore tracker state and history from JSON.
    pub fn load_state(&mut self, path: PathBuf) -> PyResult<()> {
        self.inner.load_state(&path).map_err(persistence_err)
    }

    /// Write a pretty JSON report of the history.
    pub fn export(&self, path: PathBuf) -> PyResult<()> {
        self.inner.history().snapshot().export(&path).map_err(persistence_err)
    }

    pub fn __repr__(&self) -> String {
        format!(
            "ComboTracker(active={}, recorded={})",
            self.inner.is_combo_active(),
            self.inner.history().len()
        )
    }
}

// ── Free functions ────────────────────────────────────────────────────────────

/// Tier label for a combo, e.g. "Medium Punisher".
#[pyfunction]
pub fn describe(hit_count: usize, total_damage: i64) -> String {
    rust_describe(hit_count, total_damage)
}

/// Content hash of a JSON-encoded frame.
#[pyfunction]
pub fn frame_hash(frame_json: &str) -> PyResult<String> {
    Ok(ObservationFrame::from_json(frame_json).map_err(frame_err)?.hash())
}

/// Sorted names of fields that differ between two JSON-encoded frames.
#[pyfunction]
pub fn frame_diff(a_json: &str, b_json: &str) -> PyResult<Vec<String>> {
    let a = ObservationFrame::from_json(a_json).map_err(frame_err)?;
    let b = ObservationFrame::from_json(b_json).map_err(frame_err)?;
    Ok(a.diff(&b))
}

// ── Module entry point ────────────────────────────────────────────────────────

/// fightlens-core Python bindings: combo tracking and frame helpers.
#[pymodule]
pub fn fightlens_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyComboTracker>()?;
    m.add_class::<PyComboRecord>()?;
    m.add_class::<PyComboEvent>()?;
    m.add_function(wrap_pyfunction!(describe, m)?)?;
    m.add_function(wrap_pyfunction!(frame_hash, m)?)?;
    m.add_function(wrap_pyfunction!(frame_diff, m)?)?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
