// src/export/mod.rs
//
// The export formatter: turns the session's tables + mappings into the exact
// batch payload the export service expects, and materializes the returned
// filename -> CSV map through the delivery capability.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::delivery::FileDelivery;
use crate::service::models::{ExportRequest, ExportTableUnit, ExtractedTable, RowRecord};
use crate::session::HeaderMappings;
use crate::utils::error::DeliveryError;

pub const CSV_MIME: &str = "text/csv";

/// Filename used when a direct-CSV service returns a single bare body
/// instead of a filename map.
pub const FALLBACK_CSV_FILENAME: &str = "extracted_tables.csv";

const MANIFEST_FILENAME: &str = "export_manifest.json";
const MANIFEST_MIME: &str = "application/json";

/// Rebuilds a row so its keys are exactly `headers`, in header order.
/// Values come from the original record; a header missing from the record
/// (or null) becomes an empty cell. Never fails on missing keys.
pub fn reorder_row(headers: &[String], row: &RowRecord) -> RowRecord {
    let mut ordered = Map::new();
    for header in headers {
        let value = match row.get(header) {
            Some(Value::Null) | None => Value::String(String::new()),
            Some(value) => value.clone(),
        };
        ordered.insert(header.clone(), value);
    }
    ordered
}

/// Builds one request unit per table: original header order, rows rebuilt in
/// that order, and the table's mapping passed through unmodified (sentinel
/// entries included).
pub fn build_export_request(
    tables: &[ExtractedTable],
    mappings: &[HeaderMappings],
) -> ExportRequest {
    let units = tables
        .iter()
        .zip(mappings.iter())
        .map(|(table, mapping)| ExportTableUnit {
            headers: table.headers.clone(),
            table_data: table
                .rows
                .iter()
                .map(|row| reorder_row(&table.headers, row))
                .collect(),
            header_mappings: mapping.clone(),
        })
        .collect();
    ExportRequest { tables: units }
}

/// Delivers each returned file exactly once, under its exact filename.
/// Returns the paths written, in delivery order.
pub fn deliver_files<D: FileDelivery>(
    files: &HashMap<String, String>,
    delivery: &D,
) -> Result<Vec<PathBuf>, DeliveryError> {
    let mut written = Vec::with_capacity(files.len());
    for (filename, csv_text) in files {
        let path = delivery.deliver(filename, csv_text.as_bytes(), CSV_MIME)?;
        written.push(path);
    }
    Ok(written)
}

/// Records a completed batch delivery next to the delivered files: one entry
/// per file plus an export timestamp.
pub fn write_manifest<D: FileDelivery>(
    files: &HashMap<String, String>,
    delivery: &D,
) -> Result<PathBuf, DeliveryError> {
    let entries: Vec<Value> = files
        .iter()
        .map(|(filename, csv_text)| {
            serde_json::json!({
                "filename": filename,
                "bytes": csv_text.len(),
            })
        })
        .collect();

    let manifest = serde_json::json!({
        "files": entries,
        "exported_at": chrono::Utc::now().to_rfc3339(),
    });

    let body = serde_json::to_string_pretty(&manifest)
        .map_err(|e| DeliveryError::Serialization(e.to_string()))?;

    delivery.deliver(MANIFEST_FILENAME, body.as_bytes(), MANIFEST_MIME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn row(pairs: &[(&str, &str)]) -> RowRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    /// Test double that records every delivery instead of touching disk.
    #[derive(Default)]
    struct RecordingDelivery {
        delivered: RefCell<Vec<(String, Vec<u8>, String)>>,
    }

    impl FileDelivery for RecordingDelivery {
        fn deliver(
            &self,
            filename: &str,
            bytes: &[u8],
            mime: &str,
        ) -> Result<PathBuf, DeliveryError> {
            self.delivered.borrow_mut().push((
                filename.to_string(),
                bytes.to_vec(),
                mime.to_string(),
            ));
            Ok(PathBuf::from(filename))
        }
    }

    #[test]
    fn reorder_row_is_key_order_independent() {
        let cols = headers(&["A", "B"]);
        let scrambled = row(&[("B", "2"), ("A", "1")]);

        let ordered = reorder_row(&cols, &scrambled);
        let keys: Vec<&String> = ordered.keys().collect();
        assert_eq!(keys, vec!["A", "B"]);
        assert_eq!(ordered["A"], "1");
        assert_eq!(ordered["B"], "2");
    }

    #[test]
    fn reorder_row_fills_missing_columns_with_empty() {
        let cols = headers(&["A", "B"]);
        let partial = row(&[("A", "1")]);

        let ordered = reorder_row(&cols, &partial);
        assert_eq!(ordered["A"], "1");
        assert_eq!(ordered["B"], "");
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn reorder_row_reads_null_as_empty() {
        let cols = headers(&["A"]);
        let mut record = RowRecord::new();
        record.insert("A".to_string(), Value::Null);

        let ordered = reorder_row(&cols, &record);
        assert_eq!(ordered["A"], "");
    }

    #[test]
    fn export_request_preserves_header_order_and_mappings() {
        let table = ExtractedTable {
            headers: headers(&["B", "A"]),
            rows: vec![row(&[("A", "1"), ("B", "2")])],
        };
        let mut mapping = HeaderMappings::for_headers(&table.headers);
        mapping.set("B", "amount");

        let request = build_export_request(&[table], &[mapping]);
        assert_eq!(request.tables.len(), 1);

        let unit = &request.tables[0];
        assert_eq!(unit.headers, vec!["B", "A"]);
        let keys: Vec<&String> = unit.table_data[0].keys().collect();
        assert_eq!(keys, vec!["B", "A"], "rows follow header order, not record order");

        // Mapping passes through unmodified, sentinel entries included.
        assert_eq!(unit.header_mappings.get("B"), Some("amount"));
        assert_eq!(unit.header_mappings.get("A"), Some(""));
    }

    #[test]
    fn deliver_files_delivers_each_file_exactly_once() {
        let mut files = HashMap::new();
        files.insert("table_1.csv".to_string(), "A,B\n1,2\n".to_string());
        files.insert("table_2.csv".to_string(), "X\nv\n".to_string());

        let delivery = RecordingDelivery::default();
        let written = deliver_files(&files, &delivery).expect("delivery succeeds");
        assert_eq!(written.len(), 2);

        let delivered = delivery.delivered.borrow();
        assert_eq!(delivered.len(), 2);
        for (filename, bytes, mime) in delivered.iter() {
            assert_eq!(mime, CSV_MIME);
            assert_eq!(files[filename].as_bytes(), bytes.as_slice());
        }
    }

    #[test]
    fn manifest_lists_every_delivered_file() {
        let mut files = HashMap::new();
        files.insert("table_1.csv".to_string(), "A\n1\n".to_string());

        let delivery = RecordingDelivery::default();
        write_manifest(&files, &delivery).expect("manifest write succeeds");

        let delivered = delivery.delivered.borrow();
        assert_eq!(delivered.len(), 1);
        let (name, bytes, mime) = &delivered[0];
        assert_eq!(name, MANIFEST_FILENAME);
        assert_eq!(mime, MANIFEST_MIME);

        let manifest: Value = serde_json::from_slice(bytes).expect("manifest is JSON");
        assert_eq!(manifest["files"][0]["filename"], "table_1.csv");
        assert_eq!(manifest["files"][0]["bytes"], 4);
        assert!(manifest["exported_at"].is_string());
    }
}
