// src/service/client.rs
use std::collections::HashMap;

use reqwest::multipart;

use crate::service::models::{ExportRequest, ExportResponse, ExtractResponse, TablesPayload};
use crate::utils::error::ServiceError;

// The two backend routes are fixed; only the server base URL is configurable.
pub const EXTRACT_ROUTE: &str = "/api/extract-tables";
pub const EXPORT_ROUTE: &str = "/api/export-csv";

/// Creates a reqwest client for backend interaction.
fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().build()
}

fn route_url(server: &str, route: &str) -> String {
    format!("{}{}", server.trim_end_matches('/'), route)
}

/// Uploads a PDF for table extraction. The OCR flag travels as the string
/// "true"/"false" in its own form field, alongside the file part.
pub async fn extract_tables(
    server: &str,
    file_name: &str,
    pdf_bytes: Vec<u8>,
    use_ocr: bool,
) -> Result<TablesPayload, ServiceError> {
    let client = build_client()?;
    let url = route_url(server, EXTRACT_ROUTE);

    tracing::info!(
        "Uploading {} ({} bytes) to {} (ocr: {})",
        file_name,
        pdf_bytes.len(),
        url,
        use_ocr
    );

    let file_part = multipart::Part::bytes(pdf_bytes)
        .file_name(file_name.to_string())
        .mime_str("application/pdf")?;
    let form = multipart::Form::new()
        .part("file", file_part)
        .text("use_ocr", if use_ocr { "true" } else { "false" });

    let response = client.post(&url).multipart(form).send().await?;

    // Check if the request was successful (status code 2xx)
    let status = response.status();
    if !status.is_success() {
        tracing::error!("HTTP error status: {} for URL: {}", status, url);
        return Err(ServiceError::Http(status));
    }

    let parsed: ExtractResponse = response.json().await?;
    let payload = parsed.into_payload()?;
    tracing::debug!("Extraction response accepted from {}", url);

    Ok(payload)
}

/// Sends the assembled table batch to the export service and returns the
/// filename -> CSV text map it produced.
pub async fn export_csv(
    server: &str,
    request: &ExportRequest,
) -> Result<HashMap<String, String>, ServiceError> {
    let client = build_client()?;
    let url = route_url(server, EXPORT_ROUTE);

    tracing::info!("Exporting {} table(s) to {}", request.tables.len(), url);

    let response = client.post(&url).json(request).send().await?;

    let status = response.status();
    if !status.is_success() {
        tracing::error!("HTTP error status: {} for URL: {}", status, url);
        return Err(ServiceError::Http(status));
    }

    let parsed: ExportResponse = response.json().await?;
    let files = parsed.into_files()?;
    tracing::debug!("Export service returned {} file(s)", files.len());

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_url_joins_without_double_slash() {
        assert_eq!(
            route_url("http://localhost:5328/", EXTRACT_ROUTE),
            "http://localhost:5328/api/extract-tables"
        );
        assert_eq!(
            route_url("http://localhost:5328", EXPORT_ROUTE),
            "http://localhost:5328/api/export-csv"
        );
    }
}
