// src/utils/error.rs
use thiserror::Error;

// Define specific error types for different parts of the application
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error), // Automatically convert reqwest errors

    #[error("HTTP error: {0}")]
    Http(reqwest::StatusCode), // e.g., 404 Not Found, 500 Internal Server Error

    #[error("Extraction rejected by server: {0}")]
    ExtractionFailed(String), // success:false (or absent), with the server's message

    #[error("Export rejected by server: {0}")]
    ExportFailed(String),

    #[error("Malformed service response: {0}")]
    MalformedResponse(String), // missing success flag, missing tables/csv_files, bad table shape
}

/// Precondition violations raised by the review session. Rejected
/// synchronously; session state is never changed by a rejected action.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("No file selected")]
    NoFileSelected,

    #[error("Action '{action}' is not valid while {phase}")]
    InvalidPhase {
        action: &'static str,
        phase: &'static str,
    },

    #[error("Review is only complete at the last table (table {current} of {total})")]
    ReviewIncomplete { current: usize, total: usize },

    #[error("Table has no header named '{0}'")]
    UnknownHeader(String),

    #[error("'{0}' is not a canonical field name")]
    UnknownField(String),
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Refusing unsafe filename: {0}")]
    UnsafeFilename(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error), // Automatically convert IO errors

    #[error("Service interaction failed: {0}")]
    Service(#[from] ServiceError), // Automatically convert service errors

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}
