//! Hybrid sequence + map table.
//!
//! Keys `1..=N` written in order live in the dense `array` part; every other
//! key lives in the insertion-ordered `map` part. Callers never see the split:
//! reads check the array part first and fall back to the map.

use crate::gc::GcIdx;
use crate::string::StringId;
use crate::value::Value;
use indexmap::IndexMap;
use thiserror::Error;

/// A key in the map part of a table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TableKey {
    /// Number key as raw bits, with `-0.0` folded into `0.0`.
    Number(u32),
    String(StringId),
    Table(u32),
    Closure(u32),
    Native(u32),
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("table index is nil")]
    NilKey,
    #[error("table index is NaN")]
    NanKey,
    #[error("invalid key to 'next'")]
    InvalidNextKey,
}

#[derive(Debug, Default)]
pub struct Table {
    /// Sequence part: `array[0]` is key 1. Never ends with nil.
    array: Vec<Value>,
    /// Number of nil slots inside `array`.
    holes: usize,
    /// Map part. Removed keys stay as nil tombstones so `next` stays stable
    /// while fields are cleared; they are dropped when a new key arrives and
    /// tombstones outnumber live entries.
    map: IndexMap<TableKey, Value>,
    /// Number of nil tombstones in `map`.
    dead: usize,
}

/// Tombstone count below which the map is never compacted.
const MIN_COMPACT: usize = 8;

impl Table {
    pub fn new(array_hint: usize, map_hint: usize) -> Self {
        Table {
            array: Vec::with_capacity(array_hint),
            holes: 0,
            map: IndexMap::with_capacity(map_hint),
            dead: 0,
        }
    }

    pub fn get(&self, key: Value) -> Value {
        if let Some(i) = key.as_sequence_index() {
            if i <= self.array.len() {
                return self.array[i - 1];
            }
        }
        match to_table_key(key) {
            Ok(tk) => self.map.get(&tk).copied().unwrap_or(Value::Nil),
            Err(_) => Value::Nil,
        }
    }

    pub fn set(&mut self, key: Value, value: Value) -> Result<(), TableError> {
        if let Some(i) = key.as_sequence_index() {
            if i <= self.array.len() + 1 {
                self.set_int(i, value);
                return Ok(());
            }
        }
        let tk = to_table_key(key)?;
        self.map_set(tk, value);
        Ok(())
    }

    /// Read key `i` (1-based).
    pub fn get_int(&self, i: usize) -> Value {
        if i >= 1 && i <= self.array.len() {
            self.array[i - 1]
        } else {
            self.map
                .get(&number_key(i as f32))
                .copied()
                .unwrap_or(Value::Nil)
        }
    }

    /// Write key `i` (1-based).
    pub fn set_int(&mut self, i: usize, value: Value) {
        let len = self.array.len();
        if i >= 1 && i <= len {
            let slot = &mut self.array[i - 1];
            match (slot.is_nil(), value.is_nil()) {
                (true, false) => self.holes -= 1,
                (false, true) => self.holes += 1,
                _ => {}
            }
            *slot = value;
            if i == len && value.is_nil() {
                self.trim_tail();
            }
        } else if i == len + 1 && !value.is_nil() {
            self.array.push(value);
            self.migrate_from_map();
        } else {
            self.map_set(number_key(i as f32), value);
        }
    }

    pub fn get_str(&self, key: StringId) -> Value {
        self.map
            .get(&TableKey::String(key))
            .copied()
            .unwrap_or(Value::Nil)
    }

    pub fn set_str(&mut self, key: StringId, value: Value) {
        self.map_set(TableKey::String(key), value);
    }

    /// Length of the contiguous sequence `1..=n`.
    pub fn length(&self) -> usize {
        if self.holes == 0 {
            self.array.len()
        } else {
            self.array
                .iter()
                .position(|v| v.is_nil())
                .unwrap_or(self.array.len())
        }
    }

    /// Slots in the array part, holes included.
    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    /// Live entries in the map part.
    pub fn map_len(&self) -> usize {
        self.map.len() - self.dead
    }

    /// Entries in the map part, tombstones included.
    pub fn map_slots(&self) -> usize {
        self.map.len()
    }

    /// Traversal step: the entry after `key` (nil starts the traversal).
    ///
    /// Array entries come first in index order, then map entries in insertion
    /// order. Assigning nil to an existing field during traversal is allowed.
    pub fn next(&self, key: Value) -> Result<Option<(Value, Value)>, TableError> {
        let mut array_start = 0;
        let mut map_start = 0;
        if !key.is_nil() {
            match key.as_sequence_index() {
                Some(i) if i <= self.array.len() => array_start = i,
                _ => {
                    let tk = to_table_key(key)?;
                    let pos = self
                        .map
                        .get_index_of(&tk)
                        .ok_or(TableError::InvalidNextKey)?;
                    array_start = self.array.len();
                    map_start = pos + 1;
                }
            }
        }
        for i in array_start..self.array.len() {
            let v = self.array[i];
            if !v.is_nil() {
                return Ok(Some((Value::Number((i + 1) as f32), v)));
            }
        }
        for idx in map_start..self.map.len() {
            if let Some((k, v)) = self.map.get_index(idx) {
                if !v.is_nil() {
                    return Ok(Some((key_to_value(*k), *v)));
                }
            }
        }
        Ok(None)
    }

    /// All live entries, array part first.
    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        let array = self
            .array
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nil())
            .map(|(i, v)| (Value::Number((i + 1) as f32), *v));
        let map = self
            .map
            .iter()
            .filter(|(_, v)| !v.is_nil())
            .map(|(k, v)| (key_to_value(*k), *v));
        array.chain(map)
    }

    /// Insert `value` at sequence position `pos`, shifting `pos..=n` up.
    pub fn insert_seq(&mut self, pos: usize, value: Value) {
        let n = self.length();
        let pos = pos.clamp(1, n + 1);
        for i in (pos..=n).rev() {
            let v = self.get_int(i);
            self.set_int(i + 1, v);
        }
        self.set_int(pos, value);
    }

    /// Remove sequence position `pos`, shifting the tail down. Returns the removed value.
    pub fn remove_seq(&mut self, pos: usize) -> Value {
        let n = self.length();
        if pos < 1 || pos > n {
            return Value::Nil;
        }
        let removed = self.get_int(pos);
        for i in pos..n {
            let v = self.get_int(i + 1);
            self.set_int(i, v);
        }
        self.set_int(n, Value::Nil);
        removed
    }

    fn map_set(&mut self, tk: TableKey, value: Value) {
        match self.map.get_mut(&tk) {
            Some(slot) => {
                match (slot.is_nil(), value.is_nil()) {
                    (false, true) => self.dead += 1,
                    (true, false) => self.dead -= 1,
                    _ => {}
                }
                *slot = value;
            }
            None if value.is_nil() => {}
            None => {
                self.compact();
                self.map.insert(tk, value);
            }
        }
    }

    /// Drop tombstones once they outnumber live entries.
    fn compact(&mut self) {
        if self.dead >= MIN_COMPACT && self.dead > self.map.len() - self.dead {
            self.map.retain(|_, v| !v.is_nil());
            self.dead = 0;
        }
    }

    fn trim_tail(&mut self) {
        while let Some(last) = self.array.last() {
            if !last.is_nil() {
                break;
            }
            self.array.pop();
            self.holes -= 1;
        }
    }

    /// After the array grew, pull the keys that now continue it out of the
    /// map. Moved entries become tombstones and are dropped in one pass.
    fn migrate_from_map(&mut self) {
        let mut moved = false;
        loop {
            let next = number_key((self.array.len() + 1) as f32);
            match self.map.get_mut(&next) {
                Some(slot) if !slot.is_nil() => {
                    self.array.push(std::mem::take(slot));
                    self.dead += 1;
                    moved = true;
                }
                _ => break,
            }
        }
        if moved {
            self.compact();
        }
    }
}

fn number_key(n: f32) -> TableKey {
    let n = if n == 0.0 { 0.0 } else { n };
    TableKey::Number(n.to_bits())
}

/// Map-part key for a value.
pub fn to_table_key(key: Value) -> Result<TableKey, TableError> {
    Ok(match key {
        Value::Nil => return Err(TableError::NilKey),
        Value::Number(n) if n.is_nan() => return Err(TableError::NanKey),
        Value::Number(n) => number_key(n),
        Value::String(id) => TableKey::String(id),
        Value::Table(t) => TableKey::Table(t.index()),
        Value::Closure(c) => TableKey::Closure(c.index()),
        Value::Native(f) => TableKey::Native(f.index()),
    })
}

pub fn key_to_value(key: TableKey) -> Value {
    match key {
        TableKey::Number(bits) => Value::Number(f32::from_bits(bits)),
        TableKey::String(id) => Value::String(id),
        TableKey::Table(i) => Value::Table(GcIdx::new(i)),
        TableKey::Closure(i) => Value::Closure(GcIdx::new(i)),
        TableKey::Native(i) => Value::Native(GcIdx::new(i)),
    }
}
