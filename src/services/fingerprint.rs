//! Content-free fingerprints for remote objects.
//!
//! `file_hash` is derived only from provider change indicators (entity tag,
//! size, last-modified). `schema_hash` is derived only from the schema
//! document extracted from a bounded header or tail sample.

use crate::{
    models::object::DiscoveredObject,
    services::schema::{self, ExtractedSchema},
};
use chrono::SecondsFormat;
use md5::Context;
use serde_json::Value;

/// Default header sample for row-oriented formats.
pub const HEAD_SAMPLE_BYTES: u64 = 1024;
/// Default tail sample for columnar formats with a trailing schema footer.
pub const TAIL_SAMPLE_BYTES: u64 = 8192;

/// Hash provenance recorded alongside the file hash.
pub const FILE_HASH_ALGORITHM: &str = "md5_etag_composite";

/// Which end of an object to sample for schema extraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleWindow {
    Head(u64),
    Tail(u64),
}

impl SampleWindow {
    /// Columnar formats keep their schema in a trailer; everything else is
    /// read from offset zero.
    pub fn for_extension(extension: &str, head_bytes: u64, tail_bytes: u64) -> Self {
        match extension {
            "parquet" => SampleWindow::Tail(tail_bytes),
            _ => SampleWindow::Head(head_bytes),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    pub file_hash: String,
    pub schema_hash: String,
}

/// Fingerprint plus the schema document it was computed from.
#[derive(Clone, Debug)]
pub struct FingerprintedObject {
    pub fingerprint: Fingerprint,
    pub schema: Option<ExtractedSchema>,
    pub schema_json: Value,
}

/// Compute both hashes. An empty `sample` means "no sample".
pub fn fingerprint(object: &DiscoveredObject, sample: &[u8]) -> FingerprintedObject {
    let schema = schema::extract(&object.extension(), sample);
    let schema_json = schema::schema_document(schema.as_ref());
    FingerprintedObject {
        fingerprint: Fingerprint {
            file_hash: file_hash(object),
            schema_hash: schema_hash(&schema_json),
        },
        schema,
        schema_json,
    }
}

/// Hash over (etag, size, last-modified) without reading payload bytes.
pub fn file_hash(object: &DiscoveredObject) -> String {
    let size = object.size.to_string();
    let last_modified = object
        .last_modified
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Micros, true))
        .unwrap_or_default();
    composite_digest(&[object.normalized_etag(), &size, &last_modified])
}

/// Hash over the canonical serialization of a schema document.
///
/// `serde_json` maps keep keys sorted, so equal documents serialize equally.
pub fn schema_hash(schema_json: &Value) -> String {
    let mut digest = Context::new();
    digest.consume(schema_json.to_string().as_bytes());
    format!("{:x}", digest.compute())
}

/// MD5 over length-prefixed fields, so `("ab", "c")` and `("a", "bc")` differ.
fn composite_digest(fields: &[&str]) -> String {
    let mut digest = Context::new();
    for field in fields {
        digest.consume(field.len().to_string().as_bytes());
        digest.consume(b":");
        digest.consume(field.as_bytes());
    }
    format!("{:x}", digest.compute())
}
