//! Interned byte strings.
//!
//! Every string a script can observe goes through the interner, so string
//! equality is id equality and table keys hash a `u32`. Ids of strings freed
//! by a collection are reused.
use std::borrow::Cow;
use std::collections::HashMap;
use std::rc::Rc;

/// An opaque handle to a string in the interner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StringId(pub u32);

/// Owns every string of a runtime.
#[derive(Debug, Default)]
pub struct StringInterner {
    /// Indexed by id; `None` marks a freed slot.
    slots: Vec<Option<Rc<[u8]>>>,
    lookup: HashMap<Rc<[u8]>, u32>,
    free: Vec<u32>,
    /// Strings created since the last sweep.
    created: usize,
}

impl StringInterner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `bytes`, returning the existing id if the content is already known.
    pub fn intern(&mut self, bytes: &[u8]) -> StringId {
        if let Some(id) = self.find(bytes) {
            return id;
        }
        let data: Rc<[u8]> = Rc::from(bytes);
        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id as usize] = Some(Rc::clone(&data));
                id
            }
            None => {
                self.slots.push(Some(Rc::clone(&data)));
                (self.slots.len() - 1) as u32
            }
        };
        self.lookup.insert(data, id);
        self.created += 1;
        StringId(id)
    }

    /// Look up an already-interned string without inserting it.
    pub fn find(&self, bytes: &[u8]) -> Option<StringId> {
        self.lookup.get(bytes).map(|&id| StringId(id))
    }

    /// Bytes of `id`; a freed or unknown id reads as the empty string.
    pub fn get_bytes(&self, id: StringId) -> &[u8] {
        match self.slots.get(id.0 as usize) {
            Some(Some(data)) => &data[..],
            _ => &[],
        }
    }

    /// Lossy UTF-8 view, for messages and host-side inspection.
    pub fn get_lossy(&self, id: StringId) -> Cow<'_, str> {
        String::from_utf8_lossy(self.get_bytes(id))
    }

    /// Live strings.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Number of id slots, freed ones included.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn created_since_sweep(&self) -> usize {
        self.created
    }

    /// Free every string whose id is not marked in `live`. Returns how many
    /// were freed.
    pub fn sweep(&mut self, live: &[bool]) -> usize {
        let mut freed = 0;
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if live.get(i).copied().unwrap_or(false) {
                continue;
            }
            if let Some(data) = slot.take() {
                self.lookup.remove(&data);
                self.free.push(i as u32);
                freed += 1;
            }
        }
        self.created = 0;
        freed
    }
}
