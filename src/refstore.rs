//! The reference store (spec §4.1): loads and persists the per-`uid`
//! mapping tables that make de-identification deterministic across runs.
//!
//! Each `uid` frame is represented as an ordered sequence plus a
//! value→index map for O(1) append-or-lookup (spec §9, "Reference
//! lookups"), guarded by its own lock so that two transformers touching
//! different `uid`s never contend, while two touching the same `uid`
//! observe a serial order (spec §5).

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use crate::error::DeidError;
use crate::frame::Value;

const SHIFT_SUFFIX: &str = "_shift";

/// An ordered `(uid_value, uid_value__deid)` map with O(1) lookup by value
/// key. Surrogates are contiguous positive integers assigned in
/// first-seen order (invariant 7, spec §8).
#[derive(Debug, Clone, Default)]
pub struct IdMapFrame {
    pub values: Vec<Value>,
    pub deids: Vec<i64>,
    index: HashMap<String, usize>,
}

impl IdMapFrame {
    pub fn lookup(&self, key: &str) -> Option<i64> {
        self.index.get(key).map(|&i| self.deids[i])
    }

    pub fn lookup_value(&self, deid: i64) -> Option<&Value> {
        self.deids.iter().position(|&d| d == deid).map(|i| &self.values[i])
    }

    pub fn max_deid(&self) -> i64 {
        self.deids.iter().copied().max().unwrap_or(0)
    }

    fn append(&mut self, value: Value, deid: i64) {
        self.index.insert(value.to_key(), self.values.len());
        self.values.push(value);
        self.deids.push(deid);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An ordered `(uid_value, shift_value)` map, same shape as [`IdMapFrame`]
/// but the second column is a signed offset rather than a dense surrogate.
#[derive(Debug, Clone, Default)]
pub struct ShiftMapFrame {
    pub values: Vec<Value>,
    pub shifts: Vec<i64>,
    index: HashMap<String, usize>,
}

impl ShiftMapFrame {
    pub fn lookup(&self, key: &str) -> Option<i64> {
        self.index.get(key).map(|&i| self.shifts[i])
    }

    fn append(&mut self, value: Value, shift: i64) {
        self.index.insert(value.to_key(), self.values.len());
        self.values.push(value);
        self.shifts.push(shift);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A single `uid`'s mapping frame: either an ID map or a shift map,
/// distinguished by which reference the transformer requested.
#[derive(Debug)]
enum Slot {
    Id(IdMapFrame),
    Shift(ShiftMapFrame),
}

/// `{uid → frame}`, content-addressed by `uid`, shared across every table
/// pipeline in a run. Loaded once at engine start, flushed once at engine
/// end (spec §3 "Lifecycle", §4.7).
#[derive(Debug, Default)]
pub struct ReferenceStore {
    slots: RwLock<HashMap<String, Mutex<Slot>>>,
}

impl ReferenceStore {
    pub fn new() -> Self {
        ReferenceStore {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Load every `uid` (ID map) and `uid_shift` (shift map) file under
    /// `base_path`. A missing directory is not an error — it is the first
    /// run and the store starts empty. A present-but-corrupt file is fatal
    /// (spec §9, "Corrupt-file behaviour": never silently drop mappings).
    pub fn load(base_path: &Path) -> Result<Self, DeidError> {
        let store = ReferenceStore::new();
        if !base_path.exists() {
            return Ok(store);
        }
        let entries = fs::read_dir(base_path)
            .map_err(|e| DeidError::StoreUnavailable(format!("cannot read ref store '{}': {e}", base_path.display())))?;
        let mut slots = store.slots.write().expect("ref store lock poisoned");
        for entry in entries {
            let entry = entry.map_err(|e| DeidError::StoreUnavailable(format!("ref store read error: {e}")))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| DeidError::StoreUnavailable(format!("unreadable ref file name: {}", path.display())))?
                .to_string();
            if let Some(uid) = stem.strip_suffix(SHIFT_SUFFIX) {
                let frame = read_shift_csv(&path)?;
                slots.insert(format!("{uid}{SHIFT_SUFFIX}"), Mutex::new(Slot::Shift(frame)));
            } else {
                let frame = read_id_csv(&path)?;
                slots.insert(stem, Mutex::new(Slot::Id(frame)));
            }
        }
        drop(slots);
        Ok(store)
    }

    fn with_id_slot<R>(&self, uid: &str, f: impl FnOnce(&mut IdMapFrame) -> R) -> R {
        self.ensure_slot(uid, || Slot::Id(IdMapFrame::default()));
        let slots = self.slots.read().expect("ref store lock poisoned");
        let mut guard = slots.get(uid).expect("slot just ensured").lock().expect("slot mutex poisoned");
        match &mut *guard {
            Slot::Id(frame) => f(frame),
            Slot::Shift(_) => panic!("uid '{uid}' requested as ID map but holds a shift map"),
        }
    }

    fn with_shift_slot<R>(&self, uid: &str, f: impl FnOnce(&mut ShiftMapFrame) -> R) -> R {
        let key = format!("{uid}{SHIFT_SUFFIX}");
        self.ensure_slot(&key, || Slot::Shift(ShiftMapFrame::default()));
        let slots = self.slots.read().expect("ref store lock poisoned");
        let mut guard = slots.get(&key).expect("slot just ensured").lock().expect("slot mutex poisoned");
        match &mut *guard {
            Slot::Shift(frame) => f(frame),
            Slot::Id(_) => panic!("uid '{uid}' requested as shift map but holds an ID map"),
        }
    }

    fn ensure_slot(&self, key: &str, default: impl FnOnce() -> Slot) {
        {
            let slots = self.slots.read().expect("ref store lock poisoned");
            if slots.contains_key(key) {
                return;
            }
        }
        let mut slots = self.slots.write().expect("ref store lock poisoned");
        slots.entry(key.to_string()).or_insert_with(|| Mutex::new(default()));
    }

    /// `append_or_lookup(uid, values) → deid_values` (spec §4.1). For
    /// unseen values, allocates new contiguous integers in first-seen order
    /// and appends them to the `uid` frame.
    pub fn append_or_lookup(&self, uid: &str, values: &[Value]) -> Vec<i64> {
        self.with_id_slot(uid, |frame| {
            let mut out = Vec::with_capacity(values.len());
            let mut next = frame.max_deid() + 1;
            for v in values {
                let key = v.to_key();
                if let Some(existing) = frame.lookup(&key) {
                    out.push(existing);
                } else {
                    frame.append(v.clone(), next);
                    out.push(next);
                    next += 1;
                }
            }
            out
        })
    }

    /// Reverse lookup: surrogate → original value, for a given `uid`.
    pub fn lookup_original(&self, uid: &str, deid: i64) -> Option<Value> {
        self.with_id_slot(uid, |frame| frame.lookup_value(deid).cloned())
    }

    /// Read-only shift lookup for a known entity, used by `DateTime`'s
    /// reverse mode: never allocates a new shift for an entity that isn't
    /// already in the map.
    pub fn lookup_shift(&self, uid: &str, entity: &Value) -> Option<i64> {
        self.with_shift_slot(uid, |frame| frame.lookup(&entity.to_key()))
    }

    /// `append_or_lookup_shift(uid, entity_values, generator) → shifts`
    /// (spec §4.1, §4.4). `generator` is called only for entities not
    /// already present in the shift map.
    pub fn append_or_lookup_shift(
        &self,
        uid: &str,
        entity_values: &[Value],
        mut generator: impl FnMut(&Value) -> i64,
    ) -> Vec<i64> {
        self.with_shift_slot(uid, |frame| {
            let mut out = Vec::with_capacity(entity_values.len());
            for v in entity_values {
                let key = v.to_key();
                if let Some(existing) = frame.lookup(&key) {
                    out.push(existing);
                } else {
                    let shift = generator(v);
                    frame.append(v.clone(), shift);
                    out.push(shift);
                }
            }
            out
        })
    }

    /// `save(ref_output, map)` (spec §4.1): writes each `uid` frame to a
    /// temporary path and renames it into place so a crash mid-write never
    /// leaves a partially written file.
    pub fn save(&self, base_path: &Path) -> Result<(), DeidError> {
        fs::create_dir_all(base_path)
            .map_err(|e| DeidError::WriteError(format!("cannot create ref store '{}': {e}", base_path.display())))?;
        let slots = self.slots.read().expect("ref store lock poisoned");
        for (key, slot) in slots.iter() {
            let guard = slot.lock().expect("slot mutex poisoned");
            let final_path = base_path.join(format!("{key}.csv"));
            let tmp_path = base_path.join(format!(".{key}.csv.tmp"));
            match &*guard {
                Slot::Id(frame) => write_id_csv(&tmp_path, frame)?,
                Slot::Shift(frame) => write_shift_csv(&tmp_path, frame)?,
            }
            fs::rename(&tmp_path, &final_path)
                .map_err(|e| DeidError::WriteError(format!("cannot finalize ref file '{}': {e}", final_path.display())))?;
        }
        Ok(())
    }
}

fn read_id_csv(path: &Path) -> Result<IdMapFrame, DeidError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| DeidError::StoreUnavailable(format!("corrupt ref file '{}': {e}", path.display())))?;
    let mut frame = IdMapFrame::default();
    for record in reader.records() {
        let record = record.map_err(|e| DeidError::StoreUnavailable(format!("corrupt ref file '{}': {e}", path.display())))?;
        if record.len() != 2 {
            return Err(DeidError::StoreUnavailable(format!(
                "corrupt ref file '{}': expected 2 columns, found {}",
                path.display(),
                record.len()
            )));
        }
        let value = Value::infer_from_str(&record[0]);
        let deid: i64 = record[1]
            .parse()
            .map_err(|_| DeidError::StoreUnavailable(format!("corrupt ref file '{}': non-integer surrogate", path.display())))?;
        frame.append(value, deid);
    }
    Ok(frame)
}

fn read_shift_csv(path: &Path) -> Result<ShiftMapFrame, DeidError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| DeidError::StoreUnavailable(format!("corrupt ref file '{}': {e}", path.display())))?;
    let mut frame = ShiftMapFrame::default();
    for record in reader.records() {
        let record = record.map_err(|e| DeidError::StoreUnavailable(format!("corrupt ref file '{}': {e}", path.display())))?;
        if record.len() != 2 {
            return Err(DeidError::StoreUnavailable(format!(
                "corrupt ref file '{}': expected 2 columns, found {}",
                path.display(),
                record.len()
            )));
        }
        let value = Value::infer_from_str(&record[0]);
        let shift: i64 = record[1]
            .parse()
            .map_err(|_| DeidError::StoreUnavailable(format!("corrupt ref file '{}': non-integer shift", path.display())))?;
        frame.append(value, shift);
    }
    Ok(frame)
}

fn write_id_csv(path: &Path, frame: &IdMapFrame) -> Result<(), DeidError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| DeidError::WriteError(format!("cannot open '{}' for write: {e}", path.display())))?;
    for (value, deid) in frame.values.iter().zip(frame.deids.iter()) {
        writer
            .write_record([value.display(), deid.to_string()])
            .map_err(|e| DeidError::WriteError(format!("write error on '{}': {e}", path.display())))?;
    }
    writer
        .flush()
        .map_err(|e| DeidError::WriteError(format!("flush error on '{}': {e}", path.display())))
}

fn write_shift_csv(path: &Path, frame: &ShiftMapFrame) -> Result<(), DeidError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| DeidError::WriteError(format!("cannot open '{}' for write: {e}", path.display())))?;
    for (value, shift) in frame.values.iter().zip(frame.shifts.iter()) {
        writer
            .write_record([value.display(), shift.to_string()])
            .map_err(|e| DeidError::WriteError(format!("write error on '{}': {e}", path.display())))?;
    }
    writer
        .flush()
        .map_err(|e| DeidError::WriteError(format!("flush error on '{}': {e}", path.display())))
}
