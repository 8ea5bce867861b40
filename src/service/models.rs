// src/service/models.rs
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use crate::session::HeaderMappings;
use crate::utils::error::ServiceError;

/// A row record as it appears on the wire: header name -> cell value.
/// serde_json is built with `preserve_order`, so key order survives both
/// parsing and re-serialization.
pub type RowRecord = Map<String, Value>;

/// One extracted table as returned by the extraction service. `headers` is
/// the canonical column order for export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedTable {
    pub headers: Vec<String>,
    #[serde(rename = "table_data")]
    pub rows: Vec<RowRecord>,
}

impl ExtractedTable {
    /// Checks the structural contract of an extracted table: header names
    /// are distinct and every row key names a known header.
    pub fn validate(&self) -> Result<(), ServiceError> {
        let mut seen: HashSet<&str> = HashSet::with_capacity(self.headers.len());
        for header in &self.headers {
            if !seen.insert(header.as_str()) {
                return Err(ServiceError::MalformedResponse(format!(
                    "duplicate header '{}' in extracted table",
                    header
                )));
            }
        }
        for (idx, row) in self.rows.iter().enumerate() {
            for key in row.keys() {
                if !seen.contains(key.as_str()) {
                    return Err(ServiceError::MalformedResponse(format!(
                        "row {} references unknown header '{}'",
                        idx, key
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The `tables` value of an extraction response. Deployments differ: the
/// structured variant feeds the review session, the CSV variants are
/// delivered to the user as-is.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TablesPayload {
    /// Array of structured tables (review/mapping workflow).
    Structured(Vec<ExtractedTable>),
    /// Ready-made CSV files keyed by filename (direct-CSV variant).
    CsvFiles(HashMap<String, String>),
    /// A single bare CSV body (single-file direct variant).
    CsvBody(String),
}

/// Raw extraction response envelope. Field presence is part of the contract
/// and is checked by [`ExtractResponse::into_payload`], not by serde.
#[derive(Debug, Deserialize)]
pub struct ExtractResponse {
    pub success: Option<bool>,
    pub tables: Option<TablesPayload>,
    pub error: Option<String>,
}

impl ExtractResponse {
    /// Applies the response contract: the success flag must be present and
    /// true, a `tables` payload must be present, and structured tables must
    /// be well-formed and non-empty. Anything else is a failure, carrying
    /// the server's own message when it sent one.
    pub fn into_payload(self) -> Result<TablesPayload, ServiceError> {
        match self.success {
            Some(true) => {}
            Some(false) => {
                let msg = self
                    .error
                    .unwrap_or_else(|| "extraction failed".to_string());
                return Err(ServiceError::ExtractionFailed(msg));
            }
            None => {
                return Err(ServiceError::MalformedResponse(
                    "response is missing the success flag".to_string(),
                ));
            }
        }

        let payload = self.tables.ok_or_else(|| {
            ServiceError::MalformedResponse(
                "successful response carries no tables".to_string(),
            )
        })?;

        if let TablesPayload::Structured(tables) = &payload {
            if tables.is_empty() {
                return Err(ServiceError::ExtractionFailed(
                    "no tables detected in document".to_string(),
                ));
            }
            for table in tables {
                table.validate()?;
            }
        }

        Ok(payload)
    }
}

/// One table unit of the export request: ordered headers, rows rebuilt in
/// header order, and the header mapping passed through unmodified.
#[derive(Debug, Clone, Serialize)]
pub struct ExportTableUnit {
    pub headers: Vec<String>,
    pub table_data: Vec<RowRecord>,
    pub header_mappings: HeaderMappings,
}

/// The single batch request sent to the export service.
#[derive(Debug, Clone, Serialize)]
pub struct ExportRequest {
    pub tables: Vec<ExportTableUnit>,
}

/// Raw export response envelope.
#[derive(Debug, Deserialize)]
pub struct ExportResponse {
    pub csv_files: Option<HashMap<String, String>>,
    pub error: Option<String>,
}

impl ExportResponse {
    /// A response without `csv_files` is a failure; partial success is never
    /// guessed at.
    pub fn into_files(self) -> Result<HashMap<String, String>, ServiceError> {
        match self.csv_files {
            Some(files) => Ok(files),
            None => Err(match self.error {
                Some(msg) => ServiceError::ExportFailed(msg),
                None => ServiceError::MalformedResponse(
                    "response is missing csv_files".to_string(),
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> ExtractResponse {
        serde_json::from_str(body).expect("test body should be valid JSON")
    }

    #[test]
    fn success_false_is_extraction_failure() {
        let result = parse(r#"{"success": false, "error": "No selected file."}"#).into_payload();
        match result {
            Err(ServiceError::ExtractionFailed(msg)) => assert_eq!(msg, "No selected file."),
            other => panic!("expected ExtractionFailed, got {:?}", other),
        }
    }

    #[test]
    fn missing_success_flag_is_malformed() {
        let result = parse(r#"{"tables": []}"#).into_payload();
        assert!(matches!(result, Err(ServiceError::MalformedResponse(_))));
    }

    #[test]
    fn missing_tables_is_malformed() {
        let result = parse(r#"{"success": true}"#).into_payload();
        assert!(matches!(result, Err(ServiceError::MalformedResponse(_))));
    }

    #[test]
    fn empty_table_list_is_extraction_failure() {
        let result = parse(r#"{"success": true, "tables": []}"#).into_payload();
        assert!(matches!(result, Err(ServiceError::ExtractionFailed(_))));
    }

    #[test]
    fn structured_payload_parses() {
        let body = r#"{"success": true, "tables": [{"headers": ["X"], "table_data": [{"X": "v"}]}]}"#;
        match parse(body).into_payload() {
            Ok(TablesPayload::Structured(tables)) => {
                assert_eq!(tables.len(), 1);
                assert_eq!(tables[0].headers, vec!["X"]);
                assert_eq!(tables[0].rows[0]["X"], "v");
            }
            other => panic!("expected structured payload, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_headers_are_rejected() {
        let body = r#"{"success": true, "tables": [{"headers": ["A", "A"], "table_data": []}]}"#;
        assert!(matches!(
            parse(body).into_payload(),
            Err(ServiceError::MalformedResponse(_))
        ));
    }

    #[test]
    fn row_key_outside_headers_is_rejected() {
        let body = r#"{"success": true, "tables": [{"headers": ["A"], "table_data": [{"B": "1"}]}]}"#;
        assert!(matches!(
            parse(body).into_payload(),
            Err(ServiceError::MalformedResponse(_))
        ));
    }

    #[test]
    fn direct_csv_map_parses() {
        let body = r#"{"success": true, "tables": {"table_1.csv": "A,B\n1,2\n"}}"#;
        match parse(body).into_payload() {
            Ok(TablesPayload::CsvFiles(files)) => {
                assert_eq!(files.len(), 1);
                assert_eq!(files["table_1.csv"], "A,B\n1,2\n");
            }
            other => panic!("expected csv files payload, got {:?}", other),
        }
    }

    #[test]
    fn bare_csv_body_parses() {
        let body = r#"{"success": true, "tables": "A,B\n1,2\n"}"#;
        assert!(matches!(
            parse(body).into_payload(),
            Ok(TablesPayload::CsvBody(_))
        ));
    }

    #[test]
    fn export_response_without_csv_files_is_failure() {
        let response: ExportResponse =
            serde_json::from_str(r#"{"message": "done"}"#).expect("valid JSON");
        assert!(matches!(
            response.into_files(),
            Err(ServiceError::MalformedResponse(_))
        ));
    }

    #[test]
    fn export_response_error_message_is_surfaced() {
        let response: ExportResponse =
            serde_json::from_str(r#"{"error": "disk full"}"#).expect("valid JSON");
        match response.into_files() {
            Err(ServiceError::ExportFailed(msg)) => assert_eq!(msg, "disk full"),
            other => panic!("expected ExportFailed, got {:?}", other),
        }
    }

    #[test]
    fn export_request_serializes_rows_in_insertion_order() {
        let mut row = RowRecord::new();
        row.insert("B".to_string(), Value::String("2".to_string()));
        row.insert("A".to_string(), Value::String("1".to_string()));
        let unit = ExportTableUnit {
            headers: vec!["B".to_string(), "A".to_string()],
            table_data: vec![row],
            header_mappings: HeaderMappings::for_headers(&["B".to_string(), "A".to_string()]),
        };
        let json = serde_json::to_string(&unit).expect("serializable");
        // Insertion order must survive: B before A in both rows and mappings.
        assert!(json.contains(r#""table_data":[{"B":"2","A":"1"}]"#), "got {}", json);
        assert!(json.contains(r#""header_mappings":{"B":"","A":""}"#), "got {}", json);
    }
}
