//! Streaming reader and in-memory assembler for OpenStreetMap PBF data.
//!
//! The reader turns a (possibly compressed, possibly URL-fetched) `.osm.pbf`
//! byte stream into batches of parsed entities, decoding blocks on a worker
//! pool while preserving on-disk order:
//!
//! ```no_run
//! use osmstream::{EntityMask, Reader};
//!
//! # fn main() -> osmstream::Result<()> {
//! let mut reader = Reader::new("berlin.osm.pbf", EntityMask::ALL)?;
//! println!("generator: {:?}", reader.header().generator);
//! while let Some(batch) = reader.next_batch()? {
//!     for entity in &batch {
//!         println!("{} {}", entity.mtype(), entity.id());
//!     }
//! }
//! reader.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! The [`RelationCollector`] materializes relations together with their
//! members over two passes of the same file:
//!
//! ```no_run
//! use osmstream::{EntityMask, MemberLookup, Reader, Relation, RelationCollector, RelationHandler};
//!
//! struct Boundaries;
//!
//! impl RelationHandler for Boundaries {
//!     fn keep_relation(&mut self, relation: &Relation) -> bool {
//!         relation.tags.iter().any(|t| t.key == "boundary")
//!     }
//!
//!     fn complete_relation(&mut self, relation: &Relation, members: &MemberLookup<'_>) {
//!         // every tracked member of `relation` is resolvable here
//!     }
//! }
//!
//! # fn main() -> osmstream::Result<()> {
//! let mut collector = RelationCollector::new(Boundaries);
//! let mut pass1 = Reader::new("berlin.osm.pbf", EntityMask::RELATIONS)?;
//! collector.first_pass(&mut pass1)?;
//! let mut pass2 = Reader::new("berlin.osm.pbf", EntityMask::ALL)?;
//! collector.second_pass(&mut pass2)?;
//! # Ok(())
//! # }
//! ```

mod block;
mod buffer;
mod collector;
mod compression;
mod entity;
mod error;
mod frame;
mod header;
mod pool;
pub mod proto;
mod queue;
mod read_thread;
mod reader;
mod source;

pub use crate::buffer::EntityBuffer;
pub use crate::collector::{BatchSource, MemberLookup, RelationCollector, RelationHandler};
pub use crate::compression::{
    Bzip2Decompressor, Compression, Decompressor, GzipDecompressor, IdentityDecompressor,
};
pub use crate::entity::{
    Entity, EntityMask, Info, Member, MemberType, Node, Relation, Tag, Way, COORDINATE_PRECISION,
};
pub use crate::error::{Error, Result};
pub use crate::header::{BoundingBox, Header};
pub use crate::reader::{Reader, ReaderOptions};
