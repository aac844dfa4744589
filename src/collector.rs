//! Two-pass assembly of relations together with their member objects.
//!
//! Pass one walks the input and keeps every relation the handler is
//! interested in, recording for each tracked member which relation expects
//! it and at which position. Pass two walks the input again; every incoming
//! object is matched against the sorted member index by binary search,
//! stored once, and credited to all waiting relations. A relation whose
//! last missing member streams past is handed to the handler immediately.
//!
//! Typical use: pass one with a relations-only entity mask, pass two with
//! everything the kept relations may reference. The caller opens the input
//! once per pass.

use std::collections::HashMap;

use log::debug;

use crate::buffer::EntityBuffer;
use crate::entity::{Entity, Member, MemberType, Node, Relation, Way};
use crate::error::Result;
use crate::reader::Reader;

/// Anything that can feed entity batches to the collector. Implemented by
/// [`Reader`]; tests feed hand-built batches.
pub trait BatchSource {
    fn next_batch(&mut self) -> Result<Option<EntityBuffer>>;
}

impl BatchSource for Reader {
    fn next_batch(&mut self) -> Result<Option<EntityBuffer>> {
        Reader::next_batch(self)
    }
}

/// Hooks customizing what the collector keeps and what it does with
/// finished relations. Only `complete_relation` is mandatory.
pub trait RelationHandler {
    /// Called for every relation in pass one. Only relations for which this
    /// returns true are kept; storing relations costs memory, so filter as
    /// tightly as possible.
    fn keep_relation(&mut self, relation: &Relation) -> bool {
        let _ = relation;
        true
    }

    /// Called for every member of a kept relation. Members for which this
    /// returns false are never resolved; their id is zeroed in the stored
    /// relation.
    fn keep_member(&mut self, relation: &Relation, member: &Member) -> bool {
        let _ = (relation, member);
        true
    }

    /// Called exactly once per kept relation, as soon as its last tracked
    /// member has been seen in pass two. `members` resolves this relation's
    /// member entities; ids zeroed by `keep_member` resolve to `None`.
    fn complete_relation(&mut self, relation: &Relation, members: &MemberLookup<'_>);

    /// Pass-two objects no kept relation is waiting for.
    fn node_not_in_any_relation(&mut self, node: &Node) {
        let _ = node;
    }

    fn way_not_in_any_relation(&mut self, way: &Way) {
        let _ = way;
    }

    fn relation_not_in_any_relation(&mut self, relation: &Relation) {
        let _ = relation;
    }

    /// Called exactly once when pass two has consumed its input. Relations
    /// whose members never showed up have not been completed at this point
    /// and remain accessible through
    /// [`RelationCollector::incomplete_relations`].
    fn done(&mut self) {}
}

const UNRESOLVED: usize = usize::MAX;

#[derive(Debug, Clone, Copy)]
struct RelationMeta {
    relation_offset: usize,
    /// Tracked members still missing; the relation is complete at zero.
    need: u32,
    emitted: bool,
}

#[derive(Debug, Clone, Copy)]
struct MemberMeta {
    member_id: i64,
    relation_pos: u32,
    member_pos: u32,
    buffer_offset: usize,
}

/// Resolves member entities for the relation currently being completed.
pub struct MemberLookup<'a> {
    members: &'a EntityBuffer,
    member_meta: &'a [Vec<MemberMeta>; 3],
}

impl MemberLookup<'_> {
    /// Returns the stored member entity, or `None` for members that were
    /// not tracked (id zero) or not seen in the input.
    pub fn get(&self, mtype: MemberType, id: i64) -> Option<&Entity> {
        if id == 0 {
            return None;
        }
        let metas = &self.member_meta[mtype.index()];
        let (lo, hi) = equal_range(metas, id);
        metas[lo..hi]
            .iter()
            .find(|meta| meta.buffer_offset != UNRESOLVED)
            .map(|meta| self.members.get(meta.buffer_offset))
    }
}

/// All member metas with the given id, as a half-open index range.
fn equal_range(metas: &[MemberMeta], id: i64) -> (usize, usize) {
    let lo = metas.partition_point(|m| m.member_id < id);
    let hi = metas.partition_point(|m| m.member_id <= id);
    (lo, hi)
}

pub struct RelationCollector<H> {
    handler: H,
    relations_buffer: EntityBuffer,
    members_buffer: EntityBuffer,
    relations: Vec<RelationMeta>,
    /// One sorted index per member kind, binary-searchable after pass one.
    member_meta: [Vec<MemberMeta>; 3],
    /// Per stored member: metas that still await their relation's
    /// completion. At zero the record is tombstoned.
    member_uses: HashMap<usize, u32>,
    completed_since_purge: usize,
    purge_threshold: usize,
}

impl<H: RelationHandler> RelationCollector<H> {
    pub fn new(handler: H) -> Self {
        Self::with_purge_threshold(handler, 1000)
    }

    /// `purge_threshold` is the number of completed relations after which
    /// the member buffer is compacted.
    pub fn with_purge_threshold(handler: H, purge_threshold: usize) -> Self {
        RelationCollector {
            handler,
            relations_buffer: EntityBuffer::new(),
            members_buffer: EntityBuffer::new(),
            relations: Vec::new(),
            member_meta: Default::default(),
            member_uses: HashMap::new(),
            completed_since_purge: 0,
            purge_threshold,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// Relations kept in pass one that never became complete.
    pub fn incomplete_relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations
            .iter()
            .filter(|meta| !meta.emitted)
            .map(|meta| match self.relations_buffer.get(meta.relation_offset) {
                Entity::Relation(relation) => relation,
                other => unreachable!("relation buffer holds {other:?}"),
            })
    }

    /// Pass one: collect interesting relations. Consumes `source` to the
    /// end, then sorts the member indices for pass two.
    pub fn first_pass<S: BatchSource>(&mut self, source: &mut S) -> Result<()> {
        while let Some(batch) = source.next_batch()? {
            for entity in batch.iter() {
                if let Entity::Relation(relation) = entity {
                    if self.handler.keep_relation(relation) {
                        self.add_relation(relation);
                    }
                }
            }
        }
        for metas in &mut self.member_meta {
            // stable, so equal ids keep insertion order
            metas.sort_by_key(|meta| meta.member_id);
        }
        debug!(
            "collector pass one: {} relations, {} node / {} way / {} relation members",
            self.relations.len(),
            self.member_meta[0].len(),
            self.member_meta[1].len(),
            self.member_meta[2].len()
        );
        Ok(())
    }

    /// Pass two: resolve members and emit complete relations. Invokes the
    /// handler's `done` hook after the input is exhausted and releases the
    /// member indices.
    pub fn second_pass<S: BatchSource>(&mut self, source: &mut S) -> Result<()> {
        while let Some(batch) = source.next_batch()? {
            for entity in batch.iter() {
                self.resolve_object(entity);
            }
        }
        self.handler.done();
        for metas in &mut self.member_meta {
            metas.clear();
            metas.shrink_to_fit();
        }
        self.member_uses.clear();
        Ok(())
    }

    fn add_relation(&mut self, relation: &Relation) {
        let offset = self.relations_buffer.append(Entity::Relation(relation.clone()));
        let relation_pos = self.relations.len() as u32;

        let mut need = 0u32;
        let mut dropped = Vec::new();
        for (pos, member) in relation.members.iter().enumerate() {
            if member.id != 0 && self.handler.keep_member(relation, member) {
                self.member_meta[member.mtype.index()].push(MemberMeta {
                    member_id: member.id,
                    relation_pos,
                    member_pos: pos as u32,
                    buffer_offset: UNRESOLVED,
                });
                need += 1;
            } else {
                dropped.push(pos);
            }
        }

        if need == 0 {
            self.relations_buffer.rollback();
            return;
        }

        if !dropped.is_empty() {
            if let Entity::Relation(stored) = self.relations_buffer.get_mut(offset) {
                for pos in dropped {
                    stored.members[pos].id = 0;
                }
            }
        }
        self.relations_buffer.commit();
        self.relations.push(RelationMeta {
            relation_offset: offset,
            need,
            emitted: false,
        });
    }

    fn resolve_object(&mut self, entity: &Entity) {
        let kind = entity.mtype().index();
        let (lo, hi) = equal_range(&self.member_meta[kind], entity.id());
        if lo == hi {
            match entity {
                Entity::Node(node) => self.handler.node_not_in_any_relation(node),
                Entity::Way(way) => self.handler.way_not_in_any_relation(way),
                Entity::Relation(relation) => {
                    self.handler.relation_not_in_any_relation(relation)
                }
            }
            return;
        }

        let unresolved: Vec<usize> = (lo..hi)
            .filter(|&i| self.member_meta[kind][i].buffer_offset == UNRESOLVED)
            .collect();
        if unresolved.is_empty() {
            // a later version of an object that is already resolved
            return;
        }

        let offset = self.members_buffer.append(entity.clone());
        self.members_buffer.commit();
        self.member_uses.insert(offset, unresolved.len() as u32);

        // update the whole range before emitting anything, so a relation
        // referencing this object at several positions is only emitted once
        // all of them are satisfied
        let mut completed = Vec::new();
        for i in unresolved {
            let meta = &mut self.member_meta[kind][i];
            meta.buffer_offset = offset;
            let relation = &mut self.relations[meta.relation_pos as usize];
            debug_assert!(relation.need > 0);
            relation.need -= 1;
            if relation.need == 0 && !relation.emitted {
                completed.push(meta.relation_pos);
            }
        }
        for relation_pos in completed {
            self.emit(relation_pos);
        }
    }

    fn emit(&mut self, relation_pos: u32) {
        let meta = &mut self.relations[relation_pos as usize];
        meta.emitted = true;
        let relation_offset = meta.relation_offset;

        {
            let relation = match self.relations_buffer.get(relation_offset) {
                Entity::Relation(relation) => relation,
                other => unreachable!("relation buffer holds {other:?}"),
            };
            let lookup = MemberLookup {
                members: &self.members_buffer,
                member_meta: &self.member_meta,
            };
            self.handler.complete_relation(relation, &lookup);
        }

        self.release_members(relation_pos);
        self.completed_since_purge += 1;
        self.possibly_purge();
    }

    /// Drops this relation's claim on each of its resolved members; a
    /// member no longer awaited by anyone is tombstoned.
    fn release_members(&mut self, relation_pos: u32) {
        let relation_offset = self.relations[relation_pos as usize].relation_offset;
        let members: Vec<(MemberType, i64)> =
            match self.relations_buffer.get(relation_offset) {
                Entity::Relation(relation) => relation
                    .members
                    .iter()
                    .filter(|member| member.id != 0)
                    .map(|member| (member.mtype, member.id))
                    .collect(),
                other => unreachable!("relation buffer holds {other:?}"),
            };

        for (mtype, id) in members {
            let metas = &self.member_meta[mtype.index()];
            let (lo, hi) = equal_range(metas, id);
            for i in lo..hi {
                if metas[i].relation_pos != relation_pos {
                    continue;
                }
                let offset = metas[i].buffer_offset;
                debug_assert_ne!(offset, UNRESOLVED);
                if let Some(uses) = self.member_uses.get_mut(&offset) {
                    *uses -= 1;
                    if *uses == 0 {
                        self.member_uses.remove(&offset);
                        self.members_buffer.mark_deleted(offset);
                    }
                }
            }
        }
    }

    fn possibly_purge(&mut self) {
        if self.completed_since_purge <= self.purge_threshold {
            return;
        }
        debug!("collector: purging member buffer");
        self.completed_since_purge = 0;

        let member_meta = &mut self.member_meta;
        let member_uses = &mut self.member_uses;
        self.members_buffer.purge_deleted(|entity, old, new| {
            let metas = &mut member_meta[entity.mtype().index()];
            let (lo, hi) = equal_range(metas, entity.id());
            for meta in &mut metas[lo..hi] {
                if meta.buffer_offset == old {
                    meta.buffer_offset = new;
                }
            }
            if let Some(uses) = member_uses.remove(&old) {
                member_uses.insert(new, uses);
            }
        });
    }
}
