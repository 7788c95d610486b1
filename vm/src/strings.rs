use std::collections::{HashMap, HashSet};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StringId(u32);

impl StringId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Per-VM interned byte strings. An id stays valid until a [`retain`] pass
/// that does not list it; its slot may then be handed out again.
///
/// [`retain`]: StringTable::retain
#[derive(Debug, Default)]
pub struct StringTable {
    table: Vec<Option<Rc<[u8]>>>,
    mappings: HashMap<Rc<[u8]>, StringId>,
    free: Vec<StringId>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `value` into the table unless an equal string is already there.
    pub fn intern(&mut self, value: &[u8]) -> StringId {
        if let Some(&id) = self.mappings.get(value) {
            return id;
        }
        let interned: Rc<[u8]> = Rc::from(value);
        let id = match self.free.pop() {
            Some(id) => {
                self.table[id.index()] = Some(interned.clone());
                id
            }
            None => {
                self.table.push(Some(interned.clone()));
                StringId(self.table.len() as u32 - 1)
            }
        };
        self.mappings.insert(interned, id);
        id
    }

    /// Id of an already interned string.
    pub fn lookup(&self, value: &[u8]) -> Option<StringId> {
        self.mappings.get(value).copied()
    }

    /// Bytes of `id`; a released id reads as empty.
    pub fn get(&self, id: StringId) -> &[u8] {
        self.table
            .get(id.index())
            .and_then(Option::as_deref)
            .unwrap_or(&[])
    }

    /// Release every string not in `live`. Returns how many were released.
    pub fn retain(&mut self, live: &HashSet<StringId>) -> usize {
        let mut released = 0;
        for (index, slot) in self.table.iter_mut().enumerate() {
            let id = StringId(index as u32);
            if live.contains(&id) {
                continue;
            }
            if let Some(bytes) = slot.take() {
                self.mappings.remove(&bytes);
                self.free.push(id);
                released += 1;
            }
        }
        released
    }

    /// Number of strings currently interned.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
