//! One parse job: decode a blob payload into a batch of entities.
//!
//! A blob is a nested envelope (raw bytes, zlib-compressed bytes, or
//! unsupported LZMA) around either the OSMHeader block or a primitive
//! block. Primitive blocks carry a shared string table, coordinate
//! offsets/granularity, and groups of dense nodes, nodes, ways, or
//! relations.

use std::io::Read;

use flate2::read::ZlibDecoder;
use prost::Message;

use crate::buffer::EntityBuffer;
use crate::entity::{
    Entity, EntityMask, Info, Member, MemberType, Node, Relation, Tag, Way,
    COORDINATE_PRECISION, NANO_RESOLUTION,
};
use crate::error::{Error, Result};
use crate::frame::MAX_UNCOMPRESSED_BLOB_SIZE;
use crate::header::Header;
use crate::proto;

/// Decodes the OSMHeader blob payload.
pub(crate) fn parse_header_payload(payload: &[u8]) -> Result<Header> {
    let data = decode_blob(payload, 0)?;
    let block = proto::HeaderBlock::decode(data.as_slice()).map_err(|e| Error::Parse {
        what: "HeaderBlock",
        block: Some(0),
        source: e,
    })?;
    Header::from_block(block)
}

/// Decodes one OSMData blob payload into an entity batch, skipping groups
/// whose kind is not in `mask`.
pub(crate) fn parse_data_payload(
    payload: &[u8],
    mask: EntityMask,
    block_index: usize,
) -> Result<EntityBuffer> {
    let data = decode_blob(payload, block_index)?;
    let block = proto::PrimitiveBlock::decode(data.as_slice()).map_err(|e| Error::Parse {
        what: "PrimitiveBlock",
        block: Some(block_index),
        source: e,
    })?;
    parse_primitive_block(&block, mask, block_index)
}

/// Unwraps the blob envelope into the inner payload bytes.
fn decode_blob(payload: &[u8], block_index: usize) -> Result<Vec<u8>> {
    let blob = proto::Blob::decode(payload).map_err(|e| Error::Parse {
        what: "Blob",
        block: Some(block_index),
        source: e,
    })?;

    if let Some(raw) = blob.raw {
        return Ok(raw);
    }
    if let Some(zlib_data) = blob.zlib_data {
        let raw_size = blob.raw_size.unwrap_or(0);
        if raw_size < 0 || raw_size as usize > MAX_UNCOMPRESSED_BLOB_SIZE {
            return Err(Error::protocol(
                format!("invalid uncompressed blob size: {raw_size}"),
                Some(block_index),
            ));
        }
        let mut data = Vec::with_capacity(raw_size as usize);
        ZlibDecoder::new(zlib_data.as_slice())
            .read_to_end(&mut data)
            .map_err(Error::decompression)?;
        if data.len() != raw_size as usize {
            return Err(Error::protocol(
                format!(
                    "uncompressed blob has {} bytes, header declared {raw_size}",
                    data.len()
                ),
                Some(block_index),
            ));
        }
        return Ok(data);
    }
    if blob.lzma_data.is_some() {
        return Err(Error::UnsupportedFeature {
            feature: "lzma blobs not implemented".to_string(),
        });
    }
    Err(Error::protocol("blob contains no data", Some(block_index)))
}

/// Decodes an already-unwrapped primitive block.
pub(crate) fn parse_primitive_block(
    block: &proto::PrimitiveBlock,
    mask: EntityMask,
    block_index: usize,
) -> Result<EntityBuffer> {
    PrimitiveBlockParser::new(block, mask, block_index).parse()
}

struct PrimitiveBlockParser<'a> {
    block: &'a proto::PrimitiveBlock,
    lon_offset: i64,
    lat_offset: i64,
    granularity: i64,
    /// Multiplier from packed timestamps to seconds.
    date_factor: i64,
    mask: EntityMask,
    block_index: usize,
    batch: EntityBuffer,
}

impl<'a> PrimitiveBlockParser<'a> {
    fn new(block: &'a proto::PrimitiveBlock, mask: EntityMask, block_index: usize) -> Self {
        PrimitiveBlockParser {
            block,
            lon_offset: block.lon_offset(),
            lat_offset: block.lat_offset(),
            granularity: i64::from(block.granularity()),
            date_factor: i64::from(block.date_granularity()) / 1000,
            mask,
            block_index,
            batch: EntityBuffer::new(),
        }
    }

    fn parse(mut self) -> Result<EntityBuffer> {
        for group in &self.block.primitivegroup {
            if group.dense.is_some() {
                if self.mask.contains(EntityMask::NODES) {
                    self.parse_dense_node_group(group)?;
                }
            } else if !group.ways.is_empty() {
                if self.mask.contains(EntityMask::WAYS) {
                    self.parse_way_group(group)?;
                }
            } else if !group.relations.is_empty() {
                if self.mask.contains(EntityMask::RELATIONS) {
                    self.parse_relation_group(group)?;
                }
            } else if !group.nodes.is_empty() {
                if self.mask.contains(EntityMask::NODES) {
                    self.parse_node_group(group)?;
                }
            } else {
                return Err(Error::protocol(
                    "group of unknown type",
                    Some(self.block_index),
                ));
            }
        }
        Ok(self.batch)
    }

    fn string(&self, index: usize) -> Result<String> {
        let raw = self.block.stringtable.s.get(index).ok_or_else(|| {
            Error::protocol(
                format!("string table index {index} out of range"),
                Some(self.block_index),
            )
        })?;
        String::from_utf8(raw.clone()).map_err(|_| {
            Error::protocol(
                format!("string table entry {index} is not valid UTF-8"),
                Some(self.block_index),
            )
        })
    }

    /// Converts on-disk coordinates (granularity grid plus block offset,
    /// nano-degree resolution) to fixed-point 10⁻⁷ degrees.
    fn location(&self, raw_lon: i64, raw_lat: i64) -> (i32, i32) {
        let scale = NANO_RESOLUTION / COORDINATE_PRECISION;
        let lon = (raw_lon * self.granularity + self.lon_offset) / scale;
        let lat = (raw_lat * self.granularity + self.lat_offset) / scale;
        (lon as i32, lat as i32)
    }

    fn info(&self, info: Option<&proto::Info>) -> Result<Info> {
        let Some(info) = info else {
            return Ok(Info::default());
        };
        Ok(Info {
            version: info.version(),
            changeset: info.changeset(),
            uid: info.uid(),
            user: self.string(info.user_sid() as usize)?,
            timestamp: info.timestamp() * self.date_factor,
            visible: info.visible.unwrap_or(true),
        })
    }

    fn tags(&self, keys: &[u32], vals: &[u32]) -> Result<Vec<Tag>> {
        debug_assert_eq!(keys.len(), vals.len(), "invalid input data");
        keys.iter()
            .zip(vals)
            .map(|(&k, &v)| {
                Ok(Tag {
                    key: self.string(k as usize)?,
                    value: self.string(v as usize)?,
                })
            })
            .collect()
    }

    fn parse_node_group(&mut self, group: &proto::PrimitiveGroup) -> Result<()> {
        for pbf_node in &group.nodes {
            let info = self.info(pbf_node.info.as_ref())?;
            let (lon, lat) = if info.visible {
                self.location(pbf_node.lon, pbf_node.lat)
            } else {
                (0, 0)
            };
            let node = Node {
                id: pbf_node.id,
                info,
                lon,
                lat,
                tags: self.tags(&pbf_node.keys, &pbf_node.vals)?,
            };
            self.batch.append(Entity::Node(node));
            self.batch.commit();
        }
        Ok(())
    }

    fn parse_dense_node_group(&mut self, group: &proto::PrimitiveGroup) -> Result<()> {
        let dense = group.dense.as_ref().unwrap();
        let denseinfo = dense.denseinfo.as_ref();

        let n = dense.id.len();
        let info_consistent = denseinfo.map_or(true, |di| {
            di.version.len() == n
                && di.timestamp.len() == n
                && di.changeset.len() == n
                && di.uid.len() == n
                && di.user_sid.len() == n
                && (di.visible.is_empty() || di.visible.len() == n)
        });
        if dense.lat.len() != n || dense.lon.len() != n || !info_consistent {
            return Err(Error::protocol(
                "dense node arrays have inconsistent lengths",
                Some(self.block_index),
            ));
        }

        let mut id = 0i64;
        let mut lat = 0i64;
        let mut lon = 0i64;
        let mut changeset = 0i64;
        let mut timestamp = 0i64;
        let mut uid = 0i64;
        let mut user_sid = 0i64;
        let mut tags_offset = 0usize;

        for i in 0..dense.id.len() {
            id += dense.id[i];
            lat += dense.lat[i];
            lon += dense.lon[i];

            let info = match denseinfo {
                Some(di) => {
                    changeset += di.changeset[i];
                    timestamp += di.timestamp[i];
                    uid += di.uid[i] as i64;
                    user_sid += di.user_sid[i] as i64;
                    let visible = if di.visible.is_empty() {
                        true
                    } else {
                        di.visible[i]
                    };
                    Info {
                        version: di.version[i],
                        changeset,
                        uid: uid as i32,
                        user: self.string(user_sid as usize)?,
                        timestamp: timestamp * self.date_factor,
                        visible,
                    }
                }
                None => Info::default(),
            };

            let (node_lon, node_lat) = if info.visible {
                self.location(lon, lat)
            } else {
                (0, 0)
            };

            let tags = self.dense_tags(&dense.keys_vals, &mut tags_offset)?;

            self.batch.append(Entity::Node(Node {
                id,
                info,
                lon: node_lon,
                lat: node_lat,
                tags,
            }));
            self.batch.commit();
        }
        Ok(())
    }

    /// Dense tags are flattened into one array of key/value string indices,
    /// each node's run terminated by a zero.
    fn dense_tags(&self, keys_vals: &[i32], offset: &mut usize) -> Result<Vec<Tag>> {
        let mut tags = Vec::new();
        while *offset < keys_vals.len() {
            let key = keys_vals[*offset];
            *offset += 1;
            if key == 0 {
                break;
            }
            let value = keys_vals[*offset];
            *offset += 1;
            tags.push(Tag {
                key: self.string(key as usize)?,
                value: self.string(value as usize)?,
            });
        }
        Ok(tags)
    }

    fn parse_way_group(&mut self, group: &proto::PrimitiveGroup) -> Result<()> {
        for pbf_way in &group.ways {
            let mut refs = Vec::with_capacity(pbf_way.refs.len());
            let mut node_ref = 0i64;
            for delta in &pbf_way.refs {
                node_ref += delta;
                refs.push(node_ref);
            }
            let way = Way {
                id: pbf_way.id,
                info: self.info(pbf_way.info.as_ref())?,
                refs,
                tags: self.tags(&pbf_way.keys, &pbf_way.vals)?,
            };
            self.batch.append(Entity::Way(way));
            self.batch.commit();
        }
        Ok(())
    }

    fn parse_relation_group(&mut self, group: &proto::PrimitiveGroup) -> Result<()> {
        for pbf_relation in &group.relations {
            let n = pbf_relation.memids.len();
            if pbf_relation.types.len() != n || pbf_relation.roles_sid.len() != n {
                return Err(Error::protocol(
                    "relation member arrays have inconsistent lengths",
                    Some(self.block_index),
                ));
            }
            let mut members = Vec::with_capacity(pbf_relation.memids.len());
            let mut member_id = 0i64;
            for i in 0..pbf_relation.memids.len() {
                member_id += pbf_relation.memids[i];
                let mtype = match proto::relation::MemberType::from_i32(pbf_relation.types[i]) {
                    Some(proto::relation::MemberType::Node) => MemberType::Node,
                    Some(proto::relation::MemberType::Way) => MemberType::Way,
                    Some(proto::relation::MemberType::Relation) => MemberType::Relation,
                    None => {
                        return Err(Error::protocol(
                            format!("unknown relation member type {}", pbf_relation.types[i]),
                            Some(self.block_index),
                        ))
                    }
                };
                members.push(Member {
                    mtype,
                    id: member_id,
                    role: self.string(pbf_relation.roles_sid[i] as usize)?,
                });
            }
            let relation = Relation {
                id: pbf_relation.id,
                info: self.info(pbf_relation.info.as_ref())?,
                members,
                tags: self.tags(&pbf_relation.keys, &pbf_relation.vals)?,
            };
            self.batch.append(Entity::Relation(relation));
            self.batch.commit();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn string_table(strings: &[&str]) -> proto::StringTable {
        proto::StringTable {
            s: strings.iter().map(|s| s.as_bytes().to_vec()).collect(),
        }
    }

    fn empty_block(strings: &[&str]) -> proto::PrimitiveBlock {
        proto::PrimitiveBlock {
            stringtable: string_table(strings),
            primitivegroup: Vec::new(),
            granularity: None,
            lat_offset: None,
            lon_offset: None,
            date_granularity: None,
        }
    }

    fn empty_group() -> proto::PrimitiveGroup {
        proto::PrimitiveGroup {
            nodes: Vec::new(),
            dense: None,
            ways: Vec::new(),
            relations: Vec::new(),
            changesets: Vec::new(),
        }
    }

    fn dense_block() -> proto::PrimitiveBlock {
        let mut block = empty_block(&["", "amenity", "pub", "Gastwirtschaft", "alice"]);
        let mut group = empty_group();
        group.dense = Some(proto::DenseNodes {
            // ids 10, 11, 13
            id: vec![10, 1, 2],
            denseinfo: Some(proto::DenseInfo {
                version: vec![1, 2, 1],
                // timestamps 1000, 1010, 1015
                timestamp: vec![1000, 10, 5],
                // changesets 500, 500, 501
                changeset: vec![500, 0, 1],
                // uids 7, 7, 8
                uid: vec![7, 0, 1],
                // all nodes by "alice"
                user_sid: vec![4, 0, 0],
                visible: Vec::new(),
            }),
            // lat 5_000_000, 5_000_100, 5_000_300 (granularity units)
            lat: vec![5_000_000, 100, 200],
            // lon -1_000_000, -999_900, -999_800
            lon: vec![-1_000_000, 100, 100],
            // node 10: amenity=pub; node 11: no tags; node 13: amenity=Gastwirtschaft
            keys_vals: vec![1, 2, 0, 0, 1, 3, 0],
        });
        block.primitivegroup.push(group);
        block.date_granularity = Some(1000);
        block
    }

    #[test]
    fn dense_nodes_decode_with_cumulative_sums() {
        let block = dense_block();
        let batch = parse_primitive_block(&block, EntityMask::ALL, 1).unwrap();
        let nodes: Vec<&Node> = batch
            .iter()
            .map(|e| match e {
                Entity::Node(n) => n,
                other => panic!("expected node, got {other:?}"),
            })
            .collect();

        assert_eq!(nodes.len(), 3);
        assert_eq!(
            nodes.iter().map(|n| n.id).collect::<Vec<_>>(),
            vec![10, 11, 13]
        );
        // granularity 100 nano-degrees → raw * 100 / 100 = raw
        assert_eq!(nodes[0].lat, 5_000_000);
        assert_eq!(nodes[0].lon, -1_000_000);
        assert_eq!(nodes[2].lat, 5_000_300);
        assert_eq!(nodes[2].lon, -999_800);

        assert_eq!(nodes[0].info.timestamp, 1000);
        assert_eq!(nodes[1].info.timestamp, 1010);
        assert_eq!(nodes[2].info.timestamp, 1015);
        assert_eq!(nodes[2].info.changeset, 501);
        assert_eq!(nodes[2].info.uid, 8);
        assert!(nodes.iter().all(|n| n.info.user == "alice"));
        assert!(nodes.iter().all(|n| n.info.visible));

        assert_eq!(nodes[0].tags, vec![Tag::new("amenity", "pub")]);
        assert!(nodes[1].tags.is_empty());
        assert_eq!(nodes[2].tags, vec![Tag::new("amenity", "Gastwirtschaft")]);
    }

    #[test]
    fn dense_and_plain_encodings_agree() {
        let dense = dense_block();
        let batch_dense = parse_primitive_block(&dense, EntityMask::ALL, 0).unwrap();

        // the same three nodes in the non-dense encoding
        let mut plain = empty_block(&["", "amenity", "pub", "Gastwirtschaft", "alice"]);
        let mut group = empty_group();
        let cases: [(i64, i64, i64, i32, i64, i64, i32, Vec<(u32, u32)>); 3] = [
            (10, 5_000_000, -1_000_000, 1, 1000, 500, 7, vec![(1, 2)]),
            (11, 5_000_100, -999_900, 2, 1010, 500, 7, vec![]),
            (13, 5_000_300, -999_800, 1, 1015, 501, 8, vec![(1, 3)]),
        ];
        for (id, lat, lon, version, timestamp, changeset, uid, tags) in cases {
            group.nodes.push(proto::Node {
                id,
                keys: tags.iter().map(|t| t.0).collect(),
                vals: tags.iter().map(|t| t.1).collect(),
                info: Some(proto::Info {
                    version: Some(version),
                    timestamp: Some(timestamp),
                    changeset: Some(changeset),
                    uid: Some(uid),
                    user_sid: Some(4),
                    visible: None,
                }),
                lat,
                lon,
            });
        }
        plain.primitivegroup.push(group);
        let batch_plain = parse_primitive_block(&plain, EntityMask::ALL, 0).unwrap();

        let dense_nodes: Vec<&Entity> = batch_dense.iter().collect();
        let plain_nodes: Vec<&Entity> = batch_plain.iter().collect();
        assert_eq!(dense_nodes, plain_nodes);
    }

    #[test]
    fn coordinates_use_granularity_and_offsets() {
        let mut block = empty_block(&[""]);
        block.granularity = Some(1000);
        block.lat_offset = Some(500_000);
        block.lon_offset = Some(-200_000);
        let mut group = empty_group();
        group.nodes.push(proto::Node {
            id: 1,
            keys: Vec::new(),
            vals: Vec::new(),
            info: None,
            lat: 12_345,
            lon: 6_789,
        });
        block.primitivegroup.push(group);

        let batch = parse_primitive_block(&block, EntityMask::ALL, 0).unwrap();
        let node = match batch.iter().next().unwrap() {
            Entity::Node(n) => n.clone(),
            other => panic!("expected node, got {other:?}"),
        };
        // (raw * granularity + offset) / 100, integer arithmetic
        assert_eq!(node.lat, (12_345 * 1000 + 500_000) / 100);
        assert_eq!(node.lon, (6_789 * 1000 - 200_000) / 100);
    }

    #[test]
    fn date_granularity_scales_timestamps() {
        let mut block = dense_block();
        block.date_granularity = Some(2000);
        let batch = parse_primitive_block(&block, EntityMask::ALL, 0).unwrap();
        let first = match batch.iter().next().unwrap() {
            Entity::Node(n) => n.clone(),
            other => panic!("expected node, got {other:?}"),
        };
        assert_eq!(first.info.timestamp, 2000);
    }

    #[test]
    fn ways_and_relations_decode_delta_refs() {
        let mut block = empty_block(&["", "highway", "residential", "outer", "inner"]);
        let mut way_group = empty_group();
        way_group.ways.push(proto::Way {
            id: 100,
            keys: vec![1],
            vals: vec![2],
            info: None,
            // refs 5, 8, 6
            refs: vec![5, 3, -2],
        });
        let mut rel_group = empty_group();
        rel_group.relations.push(proto::Relation {
            id: 200,
            keys: Vec::new(),
            vals: Vec::new(),
            info: None,
            roles_sid: vec![3, 4, 3],
            // member ids 5, 100, 200
            memids: vec![5, 95, 100],
            types: vec![
                proto::relation::MemberType::Node as i32,
                proto::relation::MemberType::Way as i32,
                proto::relation::MemberType::Relation as i32,
            ],
        });
        block.primitivegroup.push(way_group);
        block.primitivegroup.push(rel_group);

        let batch = parse_primitive_block(&block, EntityMask::ALL, 0).unwrap();
        let entities: Vec<&Entity> = batch.iter().collect();
        assert_eq!(entities.len(), 2);

        let way = match entities[0] {
            Entity::Way(w) => w,
            other => panic!("expected way, got {other:?}"),
        };
        assert_eq!(way.refs, vec![5, 8, 6]);
        assert_eq!(way.tags, vec![Tag::new("highway", "residential")]);

        let relation = match entities[1] {
            Entity::Relation(r) => r,
            other => panic!("expected relation, got {other:?}"),
        };
        assert_eq!(relation.id, 200);
        assert_eq!(relation.members.len(), 3);
        assert_eq!(relation.members[0].mtype, MemberType::Node);
        assert_eq!(relation.members[0].id, 5);
        assert_eq!(relation.members[0].role, "outer");
        assert_eq!(relation.members[1].mtype, MemberType::Way);
        assert_eq!(relation.members[1].id, 100);
        assert_eq!(relation.members[1].role, "inner");
        assert_eq!(relation.members[2].mtype, MemberType::Relation);
        assert_eq!(relation.members[2].id, 200);
    }

    #[test]
    fn mask_skips_unwanted_groups() {
        let mut block = dense_block();
        let mut way_group = empty_group();
        way_group.ways.push(proto::Way {
            id: 100,
            keys: Vec::new(),
            vals: Vec::new(),
            info: None,
            refs: vec![1],
        });
        block.primitivegroup.push(way_group);

        let batch = parse_primitive_block(&block, EntityMask::WAYS, 0).unwrap();
        assert!(batch.iter().all(|e| matches!(e, Entity::Way(_))));
        assert_eq!(batch.iter().count(), 1);

        let batch = parse_primitive_block(&block, EntityMask::NODES, 0).unwrap();
        assert!(batch.iter().all(|e| matches!(e, Entity::Node(_))));
        assert_eq!(batch.iter().count(), 3);
    }

    #[test]
    fn group_of_unknown_type_is_protocol_violation() {
        let mut block = empty_block(&[""]);
        let mut group = empty_group();
        group.changesets.push(proto::ChangeSet { id: 1 });
        block.primitivegroup.push(group);
        let err = parse_primitive_block(&block, EntityMask::ALL, 3).unwrap_err();
        assert!(matches!(err, Error::Protocol { block: Some(3), .. }));
    }

    #[test]
    fn blob_envelope_raw_and_zlib() {
        use flate2::write::ZlibEncoder;
        use std::io::Write;

        let inner = b"inner payload".to_vec();

        let raw_blob = proto::Blob {
            raw: Some(inner.clone()),
            raw_size: None,
            zlib_data: None,
            lzma_data: None,
            obsolete_bzip2_data: None,
        };
        let mut payload = Vec::new();
        raw_blob.encode(&mut payload).unwrap();
        assert_eq!(decode_blob(&payload, 0).unwrap(), inner);

        let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&inner).unwrap();
        let zlib_blob = proto::Blob {
            raw: None,
            raw_size: Some(inner.len() as i32),
            zlib_data: Some(encoder.finish().unwrap()),
            lzma_data: None,
            obsolete_bzip2_data: None,
        };
        let mut payload = Vec::new();
        zlib_blob.encode(&mut payload).unwrap();
        assert_eq!(decode_blob(&payload, 0).unwrap(), inner);
    }

    #[test]
    fn lzma_blob_is_unsupported() {
        let blob = proto::Blob {
            raw: None,
            raw_size: Some(10),
            zlib_data: None,
            lzma_data: Some(vec![1, 2, 3]),
            obsolete_bzip2_data: None,
        };
        let mut payload = Vec::new();
        blob.encode(&mut payload).unwrap();
        let err = decode_blob(&payload, 5).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFeature { .. }));
    }

    #[test]
    fn blob_without_data_is_protocol_violation() {
        let blob = proto::Blob {
            raw: None,
            raw_size: None,
            zlib_data: None,
            lzma_data: None,
            obsolete_bzip2_data: None,
        };
        let mut payload = Vec::new();
        blob.encode(&mut payload).unwrap();
        let err = decode_blob(&payload, 5).unwrap_err();
        assert!(matches!(err, Error::Protocol { block: Some(5), .. }));
    }

    #[test]
    fn corrupt_zlib_data_fails_decompression() {
        let blob = proto::Blob {
            raw: None,
            raw_size: Some(100),
            zlib_data: Some(vec![0xde, 0xad, 0xbe, 0xef]),
            lzma_data: None,
            obsolete_bzip2_data: None,
        };
        let mut payload = Vec::new();
        blob.encode(&mut payload).unwrap();
        let err = decode_blob(&payload, 0).unwrap_err();
        assert!(matches!(err, Error::Decompression { .. }));
    }

    proptest! {
        /// Re-applying cumulative sums to deltas reproduces the original
        /// running values.
        #[test]
        fn delta_decoding_is_idempotent(values in prop::collection::vec(-1_000_000i64..1_000_000, 1..100)) {
            let mut deltas = Vec::with_capacity(values.len());
            let mut previous = 0i64;
            for &v in &values {
                deltas.push(v - previous);
                previous = v;
            }
            let mut decoded = Vec::with_capacity(deltas.len());
            let mut sum = 0i64;
            for &d in &deltas {
                sum += d;
                decoded.push(sum);
            }
            prop_assert_eq!(decoded, values);
        }

        /// Decoding then re-encoding a coordinate reproduces the raw value
        /// exactly, for granularities on the output grid.
        #[test]
        fn coordinates_round_trip(
            raw in -1_000_000i64..1_000_000,
            granularity in prop::sample::select(vec![100i64, 1000, 10000]),
            offset_step in -10_000i64..10_000,
        ) {
            let scale = NANO_RESOLUTION / COORDINATE_PRECISION;
            let offset = offset_step * scale * granularity;
            let fixed = (raw * granularity + offset) / scale;
            let raw_again = (fixed * scale - offset) / granularity;
            prop_assert_eq!(raw_again, raw);
        }
    }
}
