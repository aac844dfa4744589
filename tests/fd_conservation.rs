//! Descriptor accounting: constructing and tearing down readers and
//! decompressors must leave the process's open-descriptor count unchanged,
//! on the success path and on every failure path.
//!
//! All scenarios run inside a single test function because descriptor
//! counts are process-global and the default harness runs tests in
//! parallel.

use std::fs::File;
use std::io::Write;

use flate2::write::ZlibEncoder;
use prost::Message;

use osmstream::{
    proto, Bzip2Decompressor, Decompressor, EntityMask, Error, IdentityDecompressor, Reader,
};

fn count_fds() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

fn frame(block_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(payload).unwrap();
    let blob = proto::Blob {
        raw: None,
        raw_size: Some(payload.len() as i32),
        zlib_data: Some(encoder.finish().unwrap()),
        lzma_data: None,
        obsolete_bzip2_data: None,
    };
    let mut blob_buf = Vec::new();
    blob.encode(&mut blob_buf).unwrap();
    let header = proto::BlobHeader {
        r#type: block_type.to_string(),
        indexdata: None,
        datasize: blob_buf.len() as i32,
    };
    let mut header_buf = Vec::new();
    header.encode(&mut header_buf).unwrap();

    let mut out = Vec::new();
    out.extend_from_slice(&(header_buf.len() as u32).to_be_bytes());
    out.extend_from_slice(&header_buf);
    out.extend_from_slice(&blob_buf);
    out
}

fn write_minimal_file(path: &std::path::Path) {
    let header = proto::HeaderBlock {
        bbox: None,
        required_features: vec!["OsmSchema-V0.6".to_string(), "DenseNodes".to_string()],
        optional_features: Vec::new(),
        writingprogram: None,
        source: None,
        osmosis_replication_timestamp: None,
        osmosis_replication_sequence_number: None,
        osmosis_replication_base_url: None,
    };
    let mut header_payload = Vec::new();
    header.encode(&mut header_payload).unwrap();

    let mut group = proto::PrimitiveGroup {
        nodes: Vec::new(),
        dense: None,
        ways: Vec::new(),
        relations: Vec::new(),
        changesets: Vec::new(),
    };
    group.dense = Some(proto::DenseNodes {
        id: vec![1, 1, 1, 1],
        denseinfo: None,
        lat: vec![0; 4],
        lon: vec![0; 4],
        keys_vals: Vec::new(),
    });
    let block = proto::PrimitiveBlock {
        stringtable: proto::StringTable {
            s: vec![Vec::new()],
        },
        primitivegroup: vec![group],
        granularity: None,
        lat_offset: None,
        lon_offset: None,
        date_granularity: None,
    };
    let mut block_payload = Vec::new();
    block.encode(&mut block_payload).unwrap();

    let mut bytes = frame("OSMHeader", &header_payload);
    bytes.extend(frame("OSMData", &block_payload));
    std::fs::write(path, bytes).unwrap();
}

#[test]
fn descriptor_count_is_conserved_on_every_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixture.osm.pbf");
    write_minimal_file(&path);
    let path_str = path.to_str().unwrap();

    let before = count_fds();

    // reader: normal termination with explicit close
    {
        let mut reader = Reader::new(path_str, EntityMask::ALL).unwrap();
        while reader.next_batch().unwrap().is_some() {}
        reader.close().unwrap();
    }
    assert_eq!(before, count_fds(), "normal termination leaked");

    // reader: mid-iteration abandonment, cleanup via Drop
    {
        let mut reader = Reader::new(path_str, EntityMask::ALL).unwrap();
        let _ = reader.next_batch().unwrap();
    }
    assert_eq!(before, count_fds(), "abandonment leaked");

    // reader: corrupt input fails construction
    {
        let bad = dir.path().join("garbage.osm.pbf");
        std::fs::write(&bad, b"this is not a pbf file at all, not even close").unwrap();
        assert!(Reader::new(bad.to_str().unwrap(), EntityMask::ALL).is_err());
    }
    assert_eq!(before, count_fds(), "corrupt-input failure leaked");

    // reader: missing file
    {
        let err = Reader::new("/nonexistent/fixture.osm.pbf", EntityMask::ALL).unwrap_err();
        assert!(matches!(err, Error::SystemCall { .. }));
    }
    assert_eq!(before, count_fds(), "missing-file failure leaked");

    // decompressor: corrupt bzip2 stream, explicit close
    {
        let bz = dir.path().join("corrupt.bz2");
        std::fs::write(&bz, b"BZh9\x31\x41\x59").unwrap();
        let inner = count_fds();
        let mut decomp = Bzip2Decompressor::new(File::open(&bz).unwrap().into());
        assert!(matches!(decomp.read(), Err(Error::Decompression { .. })));
        decomp.close();
        assert_eq!(inner, count_fds(), "bzip2 close leaked");
    }
    assert_eq!(before, count_fds());

    // decompressor: release through Drop alone
    {
        let plain = dir.path().join("plain.bin");
        std::fs::write(&plain, b"TESTDATA\n").unwrap();
        let inner = count_fds();
        {
            let mut decomp = IdentityDecompressor::new(File::open(&plain).unwrap().into());
            assert_eq!(decomp.read().unwrap(), b"TESTDATA\n");
        }
        assert_eq!(inner, count_fds(), "drop-only release leaked");
    }

    // invalid descriptors must not acquire anything
    {
        assert!(Bzip2Decompressor::from_raw_fd(-1).is_err());
        assert!(Bzip2Decompressor::from_raw_fd(12345).is_err());
    }
    assert_eq!(before, count_fds(), "invalid-fd constructor leaked");
}
