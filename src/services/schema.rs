//! Structural metadata extraction from a bounded byte sample.
//!
//! Only column or key names are ever read. Row values are never parsed into
//! the output: CSV/TSV use the first line, JSON uses the keys of the first
//! object, Parquet uses the footer carried by a tail sample.

use parquet::file::metadata::ParquetMetaDataReader;
use serde::{
    Deserializer, Serialize,
    de::{DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor},
};
use serde_json::Value;
use std::fmt;
use tracing::debug;

const PARQUET_MAGIC: &[u8; 4] = b"PAR1";
const PARQUET_FOOTER_LEN: usize = 8;

/// Column names extracted from a sample, tagged with the detected format.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ExtractedSchema {
    pub format: &'static str,
    pub columns: Vec<String>,
    pub column_count: usize,
}

impl ExtractedSchema {
    fn new(format: &'static str, columns: Vec<String>) -> Option<Self> {
        if columns.is_empty() {
            return None;
        }
        Some(Self {
            format,
            column_count: columns.len(),
            columns,
        })
    }
}

/// Extract a schema for `extension` from `sample`. Unknown extensions,
/// empty samples, and unparsable input yield `None`.
pub fn extract(extension: &str, sample: &[u8]) -> Option<ExtractedSchema> {
    if sample.is_empty() {
        return None;
    }
    let schema = match extension {
        "csv" => delimited_header("csv", b',', sample),
        "tsv" => delimited_header("tsv", b'\t', sample),
        "json" | "jsonl" | "ndjson" => json_keys(sample),
        "parquet" => parquet_columns(sample),
        _ => None,
    };
    if schema.is_none() {
        debug!(extension, sample_len = sample.len(), "no schema extracted");
    }
    schema
}

/// Whether a sample of this extension can yield a schema at all.
pub fn supports(extension: &str) -> bool {
    matches!(extension, "csv" | "tsv" | "json" | "jsonl" | "ndjson" | "parquet")
}

/// The stored schema document: `{}` when nothing was extracted.
pub fn schema_document(schema: Option<&ExtractedSchema>) -> Value {
    schema
        .and_then(|s| serde_json::to_value(s).ok())
        .unwrap_or_else(|| Value::Object(Default::default()))
}

fn first_line(sample: &[u8]) -> &[u8] {
    let line = match sample.iter().position(|b| *b == b'\n') {
        Some(end) => &sample[..end],
        None => sample,
    };
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    line.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(line)
}

fn delimited_header(format: &'static str, delimiter: u8, sample: &[u8]) -> Option<ExtractedSchema> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(first_line(sample));
    let headers = reader.headers().ok()?;
    let columns = headers
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();
    if columns.iter().all(String::is_empty) {
        return None;
    }
    ExtractedSchema::new(format, columns)
}

fn json_keys(sample: &[u8]) -> Option<ExtractedSchema> {
    let sample = sample.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(sample);
    let mut keys = Vec::new();
    let mut de = serde_json::Deserializer::from_slice(sample);
    // A head sample usually ends mid-document; keys read before the cut stay.
    if let Err(err) = FirstObjectKeys(&mut keys).deserialize(&mut de) {
        debug!(error = %err, keys = keys.len(), "json sample ended early");
    }
    // Key order carries no meaning in JSON objects.
    keys.sort();
    keys.dedup();
    ExtractedSchema::new("json", keys)
}

/// Collects the top-level keys of the first object in a document, which is
/// either the document itself or the first element of a top-level array.
/// Values are skipped without being materialized.
struct FirstObjectKeys<'a>(&'a mut Vec<String>);

impl<'de> DeserializeSeed<'de> for FirstObjectKeys<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for FirstObjectKeys<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an object or an array of objects")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            self.0.push(key);
            map.next_value::<IgnoredAny>()?;
        }
        Ok(())
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        seq.next_element_seed(FirstObjectKeys(self.0))?;
        Ok(())
    }
}

fn parquet_columns(tail: &[u8]) -> Option<ExtractedSchema> {
    if tail.len() < PARQUET_FOOTER_LEN || !tail.ends_with(PARQUET_MAGIC) {
        return None;
    }
    let footer = &tail[tail.len() - PARQUET_FOOTER_LEN..];
    let metadata_len = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]) as usize;
    let metadata_end = tail.len() - PARQUET_FOOTER_LEN;
    // The footer must fit entirely inside the tail sample.
    let metadata_start = metadata_end.checked_sub(metadata_len)?;

    let metadata = ParquetMetaDataReader::decode_metadata(&tail[metadata_start..metadata_end])
        .map_err(|err| debug!(error = %err, "parquet footer decode failed"))
        .ok()?;
    let columns = metadata
        .file_metadata()
        .schema_descr()
        .columns()
        .iter()
        .map(|column| column.path().string())
        .collect();
    ExtractedSchema::new("parquet", columns)
}
