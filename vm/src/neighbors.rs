#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: u16,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Neighbor entries for the current tick, in insertion order, one per id.
#[derive(Debug, Default)]
pub struct NeighborSet {
    entries: Vec<Neighbor>,
}

impl NeighborSet {
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Add a neighbor; an entry with the same id is replaced in place.
    pub fn insert(&mut self, neighbor: Neighbor) {
        match self.entries.iter_mut().find(|n| n.id == neighbor.id) {
            Some(existing) => *existing = neighbor,
            None => self.entries.push(neighbor),
        }
    }

    pub fn as_slice(&self) -> &[Neighbor] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
