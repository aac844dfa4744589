//! Prost-generated types for the two on-disk protobuf schemas: the blob
//! envelope (`fileformat.proto`) and the OSM payload (`osmformat.proto`).

#![allow(clippy::all)]

include!(concat!(env!("OUT_DIR"), "/osmpbf.rs"));
