//! The file header exposed by the reader after construction.

use crate::entity::{COORDINATE_PRECISION, NANO_RESOLUTION};
use crate::error::{Error, Result};
use crate::proto;

/// Rectangle in WGS84, fixed-point units of 10⁻⁷ degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

/// Metadata from the mandatory OSMHeader block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub bounding_box: Option<BoundingBox>,
    /// Writing-program identifier.
    pub generator: Option<String>,
    /// Source of the data, as recorded by the writing program.
    pub source: Option<String>,
    /// Seconds since the epoch of the last replication update.
    pub osmosis_replication_timestamp: Option<i64>,
    pub osmosis_replication_sequence_number: Option<i64>,
    pub osmosis_replication_base_url: Option<String>,
    /// True iff the file uses the dense-node encoding.
    pub pbf_dense_nodes: bool,
    /// True iff the file carries OSM history (multiple object versions).
    pub has_multiple_object_versions: bool,
    pub optional_features: Vec<String>,
    pub required_features: Vec<String>,
}

impl Header {
    /// Builds a header from the decoded block, rejecting required features
    /// this reader does not implement.
    pub(crate) fn from_block(block: proto::HeaderBlock) -> Result<Header> {
        let mut header = Header::default();

        for feature in &block.required_features {
            match feature.as_str() {
                "OsmSchema-V0.6" => {}
                "DenseNodes" => header.pbf_dense_nodes = true,
                "HistoricalInformation" => header.has_multiple_object_versions = true,
                other => {
                    return Err(Error::UnsupportedFeature {
                        feature: format!("required feature not supported: {other}"),
                    })
                }
            }
        }
        header.required_features = block.required_features;
        header.optional_features = block.optional_features;

        if let Some(bbox) = block.bbox {
            let scale = NANO_RESOLUTION / COORDINATE_PRECISION;
            header.bounding_box = Some(BoundingBox {
                left: (bbox.left / scale) as i32,
                right: (bbox.right / scale) as i32,
                top: (bbox.top / scale) as i32,
                bottom: (bbox.bottom / scale) as i32,
            });
        }

        header.generator = block.writingprogram;
        header.source = block.source;
        header.osmosis_replication_timestamp = block.osmosis_replication_timestamp;
        header.osmosis_replication_sequence_number = block.osmosis_replication_sequence_number;
        header.osmosis_replication_base_url = block.osmosis_replication_base_url;

        Ok(header)
    }

    /// Replication timestamp rendered as ISO-8601 UTC, e.g.
    /// `2020-03-01T12:00:00Z`.
    pub fn replication_timestamp_iso(&self) -> Option<String> {
        self.osmosis_replication_timestamp.map(|ts| {
            let days = ts.div_euclid(86_400);
            let secs = ts.rem_euclid(86_400);
            let (year, month, day) = civil_from_days(days);
            format!(
                "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}Z",
                secs / 3600,
                (secs / 60) % 60,
                secs % 60
            )
        })
    }
}

/// Proleptic-Gregorian date for a day count relative to 1970-01-01.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let year = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if month <= 2 { year + 1 } else { year }, month, day)
}
