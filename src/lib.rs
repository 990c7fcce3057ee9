//! # fightlens-core
//!
//! Frame telemetry and combo classification for two-player fighting game
//! emulation.
//!
//! ---
//!
//! ## What it does
//!
//! Every emulated frame, a per-game **mapping** says where each interesting
//! value lives in memory and how to scale it. The crate reads those values
//! through an injected [`MemoryReader`], assembles them into a canonical,
//! hashable [`ObservationFrame`], and watches the opponent's health for
//! damage. Runs of damage close together in time become **combos**, which
//! are scored, labelled and kept in a persistent [`ComboHistory`].
//!
//! Frames are what policy inference and dataset logging consume. Combo
//! records are what reward shaping and replay validation consume. If either
//! is wrong, everything downstream is wrong, so both are deterministic:
//! identical memory gives an identical frame hash, and identical frame
//! streams give identical combo records.
//!
//! ---
//!
//! ## The pipeline
//!
//! ```text
//! emulator RAM
//!     │  MemoryReader
//!     ▼
//! MappingTable::refresh ──▶ ObservationFrame::build ──▶ HealthHistory
//!                                    │
//!                                    ▼
//!                         ComboTracker::process ──▶ ComboEvent
//!                                    │
//!                                    ▼
//!                         ComboHistory (+ PatternMatcher label)
//! ```
//!
//! [`Session`] wires these together for one loaded game.
//!
//! ## Module overview
//!
//! | Module | Key types | What it does |
//! |--------|-----------|--------------|
//! | [`mapping`] | [`MappingTable`], [`FieldMapping`], [`MemoryReader`], [`RamImage`] | Declarative per-game field registry, normalization, change detection |
//! | [`frame`] | [`ObservationFrame`], [`PlayerState`], [`FrameBuilder`] | Canonical per-frame snapshot with blake3 content hash and diff |
//! | [`health`] | [`HealthHistory`] | Fixed-capacity ring of health samples, damage deltas |
//! | [`input`] | [`InputCommand`] | Numpad-notation controller input |
//! | [`combo`] | [`ComboTracker`], [`ComboRecord`], [`ComboEvent`] | Health-delta combo state machine and scoring |
//! | [`pattern`] | [`PatternMatcher`], [`MovePattern`] | Names a finished combo from its input sequence |
//! | [`history`] | [`ComboHistory`], [`SharedComboHistory`] | Ledger, diversity metric, JSON persistence and export |
//! | [`config`] | [`TelemetryConfig`] | TOML configuration with per-game overrides |
//! | [`session`] | [`Session`], [`FrameOutcome`] | Per-game pipeline driver |
//! | [`error`] | [`MappingLoadError`], [`PersistenceError`], ... | Error types |
//!
//! ## Logging
//!
//! The crate emits `tracing` events and never installs a subscriber.
//!
//! ## License
//!
//! Business Source License 1.1.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod error;
pub mod mapping;
pub mod frame;
pub mod health;
pub mod input;
pub mod combo;
pub mod pattern;
pub mod history;
pub mod config;
pub mod session;

#[cfg(feature = "python-ffi")]
pub mod ffi;

pub use combo::{ComboConfig, ComboEvent, ComboHit, ComboRecord, ComboTracker, FrameInput};
pub use config::TelemetryConfig;
pub use error::{ConfigError, FrameBuildError, MappingLoadError, MemoryReadError, PersistenceError};
pub use frame::{FrameBuilder, ObservationFrame, PlayerState, Side};
pub use health::{DamageDelta, HealthHistory};
pub use history::{ComboHistory, ComboSessionState, HistoryStats, SharedComboHistory};
pub use input::InputCommand;
pub use mapping::{FieldMapping, MappingDirectory, MappingSnapshot, MappingTable, MemoryReader, RamImage, ValueKind};
pub use pattern::{MovePattern, PatternMatcher};
pub use session::{FrameOutcome, Session};
