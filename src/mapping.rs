//! Per-game memory mapping layer.
//!
//! A game's observation space is declared as a list of [`FieldMapping`]s: a
//! name, an opaque address, a storage kind and optional bounds. The
//! [`MappingTable`] reads every declared field once per frame through an
//! injected [`MemoryReader`] and keeps a [`MappingSnapshot`] of raw values,
//! normalized values and change flags.
//!
//! # Mapping files
//!
//! One file per game identifier, TOML or JSON:
//!
//! ```toml
//! game = "example"
//!
//! [[field]]
//! name = "p1_health"
//! address = 0xFF8450
//! type = "int16"
//! min = 0
//! max = 144
//!
//! [[field]]
//! name = "p1_x"
//! address = 0xFF8454
//! type = "int16"
//! ```
//!
//! # Invariants
//!
//! - Field names are unique and non-empty within a table, and never one of
//!   the derived frame names in [`RESERVED_FIELDS`].
//! - Declared bounds are finite with `min < max`; a field with both bounds
//!   always normalizes into [0.0, 1.0].
//! - [`MappingTable::refresh`] is the only mutation point. A field whose read
//!   fails keeps its last value and reports unchanged.
//! - Unknown names read as 0.0; use [`MappingTable::has`] to test presence.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};

use crate::error::{MappingLoadError, MemoryReadError};

/// Default threshold for [`MappingTable::significant_changes`].
pub const DEFAULT_SIGNIFICANCE_THRESHOLD: f64 = 0.05;

/// Names the frame derives itself; a mapping may not declare them.
pub const RESERVED_FIELDS: [&str; 4] = ["x_distance", "y_distance", "p1_health_points", "p2_health_points"];

// ─── Value kinds ─────────────────────────────────────────────────────────────

/// Storage width and type of a memory-resident value.
///
/// Integer kinds are decoded as signed little-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 32-bit IEEE-754 float.
    Float,
}

impl ValueKind {
    /// Number of bytes occupied by a value of this kind.
    pub fn width(self) -> usize {
        match self {
            ValueKind::Int8 => 1,
            ValueKind::Int16 => 2,
            ValueKind::Int32 | ValueKind::Float => 4,
        }
    }

    /// Decode a little-endian value from the start of `bytes`.
    ///
    /// Returns `None` when `bytes` is shorter than [`width`](Self::width).
    pub fn decode_le(self, bytes: &[u8]) -> Option<f64> {
        match self {
            ValueKind::Int8 => bytes.first().map(|&b| b as i8 as f64),
            ValueKind::Int16 => bytes
                .get(..2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as f64),
            ValueKind::Int32 => bytes
                .get(..4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64),
            ValueKind::Float => bytes
                .get(..4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64),
        }
    }

    fn encode_le(self, value: f64, out: &mut [u8]) {
        match self {
            ValueKind::Int8 => out[0] = (value as i8) as u8,
            ValueKind::Int16 => out[..2].copy_from_slice(&(value as i16).to_le_bytes()),
            ValueKind::Int32 => out[..4].copy_from_slice(&(value as i32).to_le_bytes()),
            ValueKind::Float => out[..4].copy_from_slice(&(value as f32).to_le_bytes()),
        }
    }
}

// ─── Memory access ───────────────────────────────────────────────────────────

/// Read capability supplied by the emulator integration layer.
///
/// This crate never touches process memory directly. Closures of the form
/// `Fn(u64, ValueKind) -> Result<f64, MemoryReadError>` implement the trait.
pub trait MemoryReader {
    /// Read the value of `kind` stored at `address`.
    fn read_at(&self, address: u64, kind: ValueKind) -> Result<f64, MemoryReadError>;
}

impl<F> MemoryReader for F
where
    F: Fn(u64, ValueKind) -> Result<f64, MemoryReadError>,
{
    fn read_at(&self, address: u64, kind: ValueKind) -> Result<f64, MemoryReadError> {
        self(address, kind)
    }
}

/// A contiguous little-endian RAM region starting at `base`.
///
/// Useful for savestate dumps and for emulators that expose work RAM as a
/// byte slice.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RamImage {
    base: u64,
    bytes: Vec<u8>,
}

impl RamImage {
    /// A zero-filled region of `len` bytes mapped at `base`.
    pub fn new(base: u64, len: usize) -> Self {
        Self {
            base,
            bytes: vec![0; len],
        }
    }

    /// Wrap an existing byte dump mapped at `base`.
    pub fn from_bytes(base: u64, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    /// First mapped address.
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Raw bytes of the region.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encode `value` as `kind` at `address`.
    pub fn write(&mut self, address: u64, kind: ValueKind, value: f64) -> Result<(), MemoryReadError> {
        let range = self.range(address, kind)?;
        kind.encode_le(value, &mut self.bytes[range]);
        Ok(())
    }

    fn range(&self, address: u64, kind: ValueKind) -> Result<core::ops::Range<usize>, MemoryReadError> {
        let start = address
            .checked_sub(self.base)
            .and_then(|off| usize::try_from(off).ok())
            .ok_or(MemoryReadError::Unmapped { address })?;
        let end = start
            .checked_add(kind.width())
            .filter(|&end| end <= self.bytes.len())
            .ok_or(MemoryReadError::Unmapped { address })?;
        Ok(start..end)
    }
}

impl MemoryReader for RamImage {
    fn read_at(&self, address: u64, kind: ValueKind) -> Result<f64, MemoryReadError> {
        let range = self.range(address, kind)?;
        kind.decode_le(&self.bytes[range])
            .ok_or(MemoryReadError::Unmapped { address })
    }
}

// ─── Field mapping ───────────────────────────────────────────────────────────

/// Declaration of one named observation field for one game.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Unique field name, e.g. `"p1_health"`.
    pub name: String,
    /// Game-specific memory address; opaque to this crate.
    pub address: u64,
    /// Storage kind at `address`.
    #[serde(rename = "type")]
    pub kind: ValueKind,
    /// Lower normalization bound.
    #[serde(default, rename = "min", alias = "min_value", skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    /// Upper normalization bound.
    #[serde(default, rename = "max", alias = "max_value", skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
}

impl FieldMapping {
    /// An unbounded field.
    pub fn new(name: impl Into<String>, address: u64, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            address,
            kind,
            min_value: None,
            max_value: None,
        }
    }

    /// Builder: declare normalization bounds.
    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    /// Both bounds, when declared.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match (self.min_value, self.max_value) {
            (Some(lo), Some(hi)) => Some((lo, hi)),
            _ => None,
        }
    }

    /// `clamp((raw - min) / (max - min), 0, 1)` when bounded, `raw` otherwise.
    pub fn normalize(&self, raw: f64) -> f64 {
        match self.bounds() {
            Some((lo, hi)) => ((raw - lo) / (hi - lo)).clamp(0.0, 1.0),
            None => raw,
        }
    }

    fn validate(&self, game_id: &str) -> Result<(), MappingLoadError> {
        if self.name.trim().is_empty() {
            return Err(MappingLoadError::malformed(game_id, "field with empty name"));
        }
        if RESERVED_FIELDS.contains(&self.name.as_str()) {
            return Err(MappingLoadError::malformed(
                game_id,
                format!("field '{}' collides with a derived frame value", self.name),
            ));
        }
        for bound in [self.min_value, self.max_value].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(MappingLoadError::malformed(
                    game_id,
                    format!("field '{}' declares a non-finite bound", self.name),
                ));
            }
        }
        if let Some((lo, hi)) = self.bounds() {
            if lo >= hi {
                return Err(MappingLoadError::malformed(
                    game_id,
                    format!("field '{}' has min {lo} >= max {hi}", self.name),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct MappingFile {
    #[serde(default)]
    game: Option<String>,
    #[serde(default, rename = "field", alias = "fields")]
    fields: Vec<FieldMapping>,
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// Cached state of one field after the most recent refresh.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldValue {
    /// Last successfully read raw value.
    pub raw: f64,
    /// `raw` after normalization.
    pub normalized: f64,
    /// Normalized value before the most recent refresh.
    pub previous_normalized: f64,
    /// Raw value differed from the prior refresh.
    pub changed: bool,
    /// Field declares both bounds.
    pub bounded: bool,
}

/// The live value cache owned by a [`MappingTable`].
#[derive(Clone, Debug, Default)]
pub struct MappingSnapshot {
    values: HashMap<String, FieldValue>,
    frame_number: Option<u64>,
}

impl MappingSnapshot {
    /// A snapshot with no fields. Every read returns the default.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Cached state of `name`.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    /// Whether `name` is declared.
    pub fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Raw value of `name`, or 0.0 when unknown.
    pub fn raw(&self, name: &str) -> f64 {
        self.values.get(name).map_or(0.0, |v| v.raw)
    }

    /// Normalized value of `name`, or 0.0 when unknown.
    pub fn normalized(&self, name: &str) -> f64 {
        self.values.get(name).map_or(0.0, |v| v.normalized)
    }

    /// Whether `name` declares both bounds.
    pub fn is_bounded(&self, name: &str) -> bool {
        self.values.get(name).is_some_and(|v| v.bounded)
    }

    /// Frame number passed to the most recent refresh.
    pub fn frame_number(&self) -> Option<u64> {
        self.frame_number
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when no fields are declared.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate over `(name, value)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Fields whose raw value changed on the most recent refresh.
    pub fn changed_fields(&self) -> BTreeSet<&str> {
        self.values
            .iter()
            .filter(|(_, v)| v.changed)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Fields whose normalized value moved by at least `threshold`.
    pub fn significant_changes(&self, threshold: f64) -> BTreeSet<&str> {
        self.values
            .iter()
            .filter(|(_, v)| (v.normalized - v.previous_normalized).abs() >= threshold)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    fn declare(&mut self, mapping: &FieldMapping) {
        self.values.insert(
            mapping.name.clone(),
            FieldValue {
                bounded: mapping.bounds().is_some(),
                normalized: mapping.normalize(0.0),
                previous_normalized: mapping.normalize(0.0),
                ..FieldValue::default()
            },
        );
    }
}

// ─── Mapping table ───────────────────────────────────────────────────────────

/// Registry of a game's declared fields plus their live cache.
#[derive(Clone, Debug)]
pub struct MappingTable {
    game_id: String,
    fields: Vec<FieldMapping>,
    snapshot: MappingSnapshot,
    last_refresh: Option<u64>,
}

impl MappingTable {
    /// Build a table from already-parsed declarations.
    ///
    /// Fails with [`MappingLoadError::Malformed`] on an empty field list,
    /// duplicate or empty names, non-finite bounds or `min >= max`.
    pub fn from_fields(
        game_id: impl Into<String>,
        fields: Vec<FieldMapping>,
    ) -> Result<Self, MappingLoadError> {
        let game_id = game_id.into();
        if fields.is_empty() {
            return Err(MappingLoadError::malformed(&game_id, "mapping declares no fields"));
        }
        {
            let mut seen: HashSet<&str> = HashSet::with_capacity(fields.len());
            for field in &fields {
                field.validate(&game_id)?;
                if !seen.insert(field.name.as_str()) {
                    return Err(MappingLoadError::malformed(
                        &game_id,
                        format!("duplicate field '{}'", field.name),
                    ));
                }
                if field.bounds().is_none() && (field.min_value.is_some() || field.max_value.is_some()) {
                    tracing::debug!(game = %game_id, field = %field.name, "single bound declared; field left unnormalized");
                }
            }
        }

        let mut snapshot = MappingSnapshot::default();
        for field in &fields {
            snapshot.declare(field);
        }
        Ok(Self {
            game_id,
            fields,
            snapshot,
            last_refresh: None,
        })
    }

    /// Parse a TOML mapping document.
    pub fn from_toml_str(game_id: &str, text: &str) -> Result<Self, MappingLoadError> {
        let file: MappingFile =
            toml::from_str(text).map_err(|e| MappingLoadError::malformed(game_id, e.to_string()))?;
        Self::from_file(game_id, file)
    }

    /// Parse a JSON mapping document.
    pub fn from_json_str(game_id: &str, text: &str) -> Result<Self, MappingLoadError> {
        let file: MappingFile = serde_json::from_str(text)
            .map_err(|e| MappingLoadError::malformed(game_id, e.to_string()))?;
        Self::from_file(game_id, file)
    }

    fn from_file(game_id: &str, file: MappingFile) -> Result<Self, MappingLoadError> {
        if let Some(declared) = file.game.as_deref() {
            if declared != game_id {
                tracing::warn!(requested = %game_id, declared = %declared, "mapping file declares a different game id");
            }
        }
        Self::from_fields(game_id, file.fields)
    }

    /// Game identifier this table was loaded for.
    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    /// Declarations in file order.
    pub fn fields(&self) -> &[FieldMapping] {
        &self.fields
    }

    /// Declaration of `name`.
    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Always false for a successfully built table.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether `name` is declared.
    pub fn has(&self, name: &str) -> bool {
        self.snapshot.has(name)
    }

    /// Last raw value of `name`; 0.0 when unknown.
    pub fn read_raw(&self, name: &str) -> f64 {
        self.snapshot.raw(name)
    }

    /// Last normalized value of `name`; 0.0 when unknown.
    pub fn read_normalized(&self, name: &str) -> f64 {
        self.snapshot.normalized(name)
    }

    /// The live cache.
    pub fn snapshot(&self) -> &MappingSnapshot {
        &self.snapshot
    }

    /// Frame number of the most recent refresh.
    pub fn last_refresh_frame(&self) -> Option<u64> {
        self.last_refresh
    }

    /// Re-read every declared field for `frame_number`.
    ///
    /// Call at most once per frame. A field whose read fails (or yields a
    /// non-finite value) keeps its last value and is reported unchanged.
    pub fn refresh<R>(&mut self, frame_number: u64, reader: &R)
    where
        R: MemoryReader + ?Sized,
    {
        if let Some(prev) = self.last_refresh {
            if frame_number <= prev {
                tracing::warn!(game = %self.game_id, prev, frame_number, "refresh called without advancing the frame");
            }
        }

        for mapping in &self.fields {
            let Some(entry) = self.snapshot.values.get_mut(&mapping.name) else {
                continue;
            };
            entry.previous_normalized = entry.normalized;
            match reader.read_at(mapping.address, mapping.kind) {
                Ok(raw) if raw.is_finite() => {
                    entry.changed = raw != entry.raw;
                    entry.raw = raw;
                    entry.normalized = mapping.normalize(raw);
                }
                Ok(raw) => {
                    tracing::warn!(field = %mapping.name, frame_number, raw, "non-finite read; keeping last value");
                    entry.changed = false;
                }
                Err(e) => {
                    tracing::warn!(field = %mapping.name, frame_number, error = %e, "field read failed; keeping last value");
                    entry.changed = false;
                }
            }
        }

        self.snapshot.frame_number = Some(frame_number);
        self.last_refresh = Some(frame_number);
    }

    /// Fields whose raw value changed on the most recent refresh.
    pub fn changed_fields(&self) -> BTreeSet<&str> {
        self.snapshot.changed_fields()
    }

    /// Fields whose normalized value moved by at least `threshold`.
    pub fn significant_changes(&self, threshold: f64) -> BTreeSet<&str> {
        self.snapshot.significant_changes(threshold)
    }
}

// ─── Directory loader ────────────────────────────────────────────────────────

/// Loads mapping files named `<game_id>.toml` or `<game_id>.json` from a
/// directory.
#[derive(Clone, Debug)]
pub struct MappingDirectory {
    root: PathBuf,
}

impl MappingDirectory {
    /// Loader rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory searched by [`load`](Self::load).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the mapping file for `game_id`, if one exists.
    pub fn path_for(&self, game_id: &str) -> Option<PathBuf> {
        ["toml", "json"]
            .iter()
            .map(|ext| self.root.join(format!("{game_id}.{ext}")))
            .find(|p| p.is_file())
    }

    /// Load and validate the mapping for `game_id`.
    pub fn load(&self, game_id: &str) -> Result<MappingTable, MappingLoadError> {
        if game_id.is_empty() || game_id.contains(['/', '\\']) || game_id.contains("..") {
            return Err(MappingLoadError::malformed(game_id, "invalid game identifier"));
        }
        let path = self.path_for(game_id).ok_or_else(|| MappingLoadError::NotFound {
            game_id: game_id.to_string(),
        })?;
        let text = std::fs::read_to_string(&path)
            .map_err(|e| MappingLoadError::malformed(game_id, format!("{}: {e}", path.display())))?;

        let table = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => MappingTable::from_json_str(game_id, &text)?,
            _ => MappingTable::from_toml_str(game_id, &text)?,
        };
        tracing::info!(game = %game_id, path = %path.display(), fields = table.len(), "loaded field mapping");
        Ok(table)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
