//! Append-only entity store with stable offsets and explicit compaction.
//!
//! Both the batches handed out by the reader and the collector's working
//! sets live in an [`EntityBuffer`]. Offsets returned by [`append`] stay
//! valid until the next [`purge_deleted`], which compacts tombstoned
//! records in place and reports every surviving record's move through a
//! relocation callback before the old offset becomes invalid.
//!
//! [`append`]: EntityBuffer::append
//! [`purge_deleted`]: EntityBuffer::purge_deleted

use crate::entity::Entity;

#[derive(Debug)]
struct Slot {
    entity: Entity,
    deleted: bool,
}

#[derive(Debug, Default)]
pub struct EntityBuffer {
    slots: Vec<Slot>,
    /// Set while the most recent append is still uncommitted.
    pending: bool,
}

impl EntityBuffer {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        EntityBuffer {
            slots: Vec::with_capacity(capacity),
            pending: false,
        }
    }

    /// Appends a record and returns its offset. The record does not become
    /// visible to iteration until [`commit`](Self::commit); a subsequent
    /// [`rollback`](Self::rollback) discards it instead.
    pub fn append(&mut self, entity: Entity) -> usize {
        debug_assert!(!self.pending, "append while previous record uncommitted");
        let offset = self.slots.len();
        self.slots.push(Slot {
            entity,
            deleted: false,
        });
        self.pending = true;
        offset
    }

    /// Finalizes the most recent append.
    pub fn commit(&mut self) {
        self.pending = false;
    }

    /// Discards the most recent uncommitted append.
    pub fn rollback(&mut self) {
        if self.pending {
            self.slots.pop();
            self.pending = false;
        }
    }

    /// Number of committed records, live or deleted.
    pub fn committed(&self) -> usize {
        self.slots.len() - usize::from(self.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.committed() == 0
    }

    pub fn reserve(&mut self, additional: usize) {
        self.slots.reserve(additional);
    }

    pub fn get(&self, offset: usize) -> &Entity {
        &self.slots[offset].entity
    }

    pub(crate) fn get_mut(&mut self, offset: usize) -> &mut Entity {
        &mut self.slots[offset].entity
    }

    /// Tombstones the record at `offset`. The slot is reclaimed by the next
    /// [`purge_deleted`](Self::purge_deleted).
    pub fn mark_deleted(&mut self, offset: usize) {
        self.slots[offset].deleted = true;
    }

    /// Iterates committed, non-deleted records in append order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.slots[..self.committed()]
            .iter()
            .filter(|slot| !slot.deleted)
            .map(|slot| &slot.entity)
    }

    /// Compacts the buffer in place, dropping tombstoned records. For every
    /// surviving record whose offset changes, `moving` is called with the
    /// record and its `(old_offset, new_offset)` pair before the old offset
    /// is invalidated.
    pub fn purge_deleted<F>(&mut self, mut moving: F)
    where
        F: FnMut(&Entity, usize, usize),
    {
        debug_assert!(!self.pending, "purge while a record is uncommitted");
        let mut target = 0;
        for source in 0..self.slots.len() {
            if self.slots[source].deleted {
                continue;
            }
            if source != target {
                moving(&self.slots[source].entity, source, target);
                self.slots.swap(source, target);
            }
            target += 1;
        }
        self.slots.truncate(target);
    }
}

impl<'a> IntoIterator for &'a EntityBuffer {
    type Item = &'a Entity;
    type IntoIter = Box<dyn Iterator<Item = &'a Entity> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
