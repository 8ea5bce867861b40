// src/session/mod.rs
//
// The extraction review session: a single tagged state machine owning the
// ingested tables, the per-table header mappings and review decisions, and
// the cursor the user pages through tables with. Every user action and every
// asynchronous completion goes through this type; completions carry the
// generation that issued them and are ignored once it is stale.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::service::models::ExtractedTable;
use crate::utils::error::SessionError;

/// Mapping value meaning "keep the original header name".
pub const KEEP_ORIGINAL: &str = "";

/// Canonical field names the mapping workflow may assign headers to.
pub static CANONICAL_FIELDS: &[&str] = &[
    "date",
    "description",
    "category",
    "quantity",
    "unit_price",
    "amount",
    "total",
    "currency",
    "account",
    "notes",
];

static CANONICAL_FIELD_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| CANONICAL_FIELDS.iter().copied().collect());

/// True for canonical field names and the "keep original" sentinel.
pub fn is_canonical_field(field: &str) -> bool {
    field == KEEP_ORIGINAL || CANONICAL_FIELD_SET.contains(field)
}

/// The session's single source of truth for what the user may do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Uploading,
    Reviewing,
    Mapping,
    Exporting,
    Done,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Uploading => "uploading",
            Phase::Reviewing => "reviewing",
            Phase::Mapping => "mapping",
            Phase::Exporting => "exporting",
            Phase::Done => "done",
        }
    }
}

/// Per-table review outcome in the review workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Unset,
    Confirmed,
    Rejected,
}

impl ReviewDecision {
    pub fn label(&self) -> &'static str {
        match self {
            ReviewDecision::Unset => "unreviewed",
            ReviewDecision::Confirmed => "confirmed",
            ReviewDecision::Rejected => "rejected",
        }
    }
}

/// Which phase a successful extraction enters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Workflow {
    Review,
    Mapping,
}

/// Identifies the session lifetime a request was issued in. An asynchronous
/// completion presents its token back; tokens minted before a reset no
/// longer match and the completion is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

/// Ordered header -> canonical-field mapping for one table. Keys are exactly
/// the table's headers, in header order; [`KEEP_ORIGINAL`] means the header
/// is exported under its own name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderMappings(Map<String, Value>);

impl HeaderMappings {
    /// A fresh mapping with every header at the sentinel.
    pub fn for_headers(headers: &[String]) -> Self {
        let mut map = Map::new();
        for header in headers {
            map.insert(header.clone(), Value::String(KEEP_ORIGINAL.to_string()));
        }
        Self(map)
    }

    /// Overwrites the entry for `header`. Key position is preserved, so the
    /// mapping stays in header order.
    pub fn set(&mut self, header: &str, field: &str) {
        self.0
            .insert(header.to_string(), Value::String(field.to_string()));
    }

    pub fn get(&self, header: &str) -> Option<&str> {
        self.0.get(header).and_then(Value::as_str)
    }

    pub fn contains_header(&self, header: &str) -> bool {
        self.0.contains_key(header)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// The aggregate root for one upload-review-export pass.
#[derive(Debug)]
pub struct Session {
    tables: Vec<ExtractedTable>,
    mappings: Vec<HeaderMappings>,
    decisions: Vec<ReviewDecision>,
    cursor: usize,
    phase: Phase,
    generation: u64,
    selected_file: Option<PathBuf>,
    use_ocr: bool,
    error: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            tables: Vec::new(),
            mappings: Vec::new(),
            decisions: Vec::new(),
            cursor: 0,
            phase: Phase::Idle,
            generation: 0,
            selected_file: None,
            use_ocr: false,
            error: None,
        }
    }

    // --- Accessors ---

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn tables(&self) -> &[ExtractedTable] {
        &self.tables
    }

    pub fn mappings(&self) -> &[HeaderMappings] {
        &self.mappings
    }

    pub fn decisions(&self) -> &[ReviewDecision] {
        &self.decisions
    }

    pub fn current_table(&self) -> Option<&ExtractedTable> {
        self.tables.get(self.cursor)
    }

    pub fn current_mapping(&self) -> Option<&HeaderMappings> {
        self.mappings.get(self.cursor)
    }

    pub fn current_decision(&self) -> Option<ReviewDecision> {
        self.decisions.get(self.cursor).copied()
    }

    pub fn is_last_table(&self) -> bool {
        !self.tables.is_empty() && self.cursor == self.tables.len() - 1
    }

    pub fn selected_file(&self) -> Option<&Path> {
        self.selected_file.as_deref()
    }

    pub fn use_ocr(&self) -> bool {
        self.use_ocr
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    // --- Idle-phase actions ---

    pub fn select_file(&mut self, path: PathBuf) -> Result<(), SessionError> {
        self.require_phase(Phase::Idle, "select_file")?;
        self.selected_file = Some(path);
        Ok(())
    }

    pub fn toggle_ocr(&mut self) -> Result<(), SessionError> {
        self.require_phase(Phase::Idle, "toggle_ocr")?;
        self.use_ocr = !self.use_ocr;
        Ok(())
    }

    /// Starts the upload. Refused without a selected file; on success the
    /// returned token must accompany the eventual completion.
    pub fn begin_upload(&mut self) -> Result<Generation, SessionError> {
        self.require_phase(Phase::Idle, "submit")?;
        if self.selected_file.is_none() {
            return Err(SessionError::NoFileSelected);
        }
        self.error = None;
        self.phase = Phase::Uploading;
        Ok(Generation(self.generation))
    }

    // --- Upload completions ---

    /// Ingests a successful extraction. Returns whether the completion
    /// applied; a stale token or wrong phase leaves the session untouched.
    /// An empty table set counts as an extraction failure so the cursor
    /// range invariant never meets zero tables.
    pub fn ingest(
        &mut self,
        token: Generation,
        tables: Vec<ExtractedTable>,
        workflow: Workflow,
    ) -> bool {
        if !self.accepts(token, Phase::Uploading, "ingest") {
            return false;
        }
        if tables.is_empty() {
            return self.fail_upload(token, "no tables detected in document");
        }

        self.mappings = tables
            .iter()
            .map(|t| HeaderMappings::for_headers(&t.headers))
            .collect();
        self.decisions = vec![ReviewDecision::Unset; tables.len()];
        self.tables = tables;
        self.cursor = 0;
        self.error = None;
        self.phase = match workflow {
            Workflow::Review => Phase::Reviewing,
            Workflow::Mapping => Phase::Mapping,
        };
        tracing::info!(
            "Ingested {} table(s), entering {}",
            self.tables.len(),
            self.phase.name()
        );
        true
    }

    /// Records an extraction failure: back to Idle with the message, no
    /// partial table data retained. The selected file and OCR flag survive
    /// so the user can retry.
    pub fn fail_upload(&mut self, token: Generation, message: &str) -> bool {
        if !self.accepts(token, Phase::Uploading, "fail_upload") {
            return false;
        }
        self.discard_tables();
        self.error = Some(message.to_string());
        self.phase = Phase::Idle;
        tracing::warn!("Extraction failed: {}", message);
        true
    }

    // --- Navigation (Reviewing and Mapping) ---

    /// Advances the cursor; a no-op at the last table.
    pub fn next_table(&mut self) -> Result<(), SessionError> {
        self.require_review_phase("next_table")?;
        self.advance();
        Ok(())
    }

    /// Moves the cursor back; a no-op at the first table.
    pub fn prev_table(&mut self) -> Result<(), SessionError> {
        self.require_review_phase("prev_table")?;
        if self.cursor > 0 {
            self.cursor -= 1;
        }
        Ok(())
    }

    // --- Review workflow ---

    /// Records a Confirmed decision for the current table, then advances
    /// like `next_table` (boundary no-op included).
    pub fn confirm_table(&mut self) -> Result<(), SessionError> {
        self.decide(ReviewDecision::Confirmed, "confirm_table")
    }

    /// Records a Rejected decision for the current table, then advances.
    pub fn reject_table(&mut self) -> Result<(), SessionError> {
        self.decide(ReviewDecision::Rejected, "reject_table")
    }

    /// Finishes the review pass and starts the export. Only enabled at the
    /// last table; earlier invocation is refused without a state change.
    pub fn done_review(&mut self) -> Result<Generation, SessionError> {
        self.require_phase(Phase::Reviewing, "done_review")?;
        self.require_last_table()?;
        self.phase = Phase::Exporting;
        Ok(Generation(self.generation))
    }

    // --- Mapping workflow ---

    /// Assigns `field` to `header` on the current table only. Other tables'
    /// mappings and the table's headers/rows are never touched.
    pub fn set_mapping(&mut self, header: &str, field: &str) -> Result<(), SessionError> {
        self.require_phase(Phase::Mapping, "set_mapping")?;
        if !is_canonical_field(field) {
            return Err(SessionError::UnknownField(field.to_string()));
        }
        let mapping = match self.mappings.get_mut(self.cursor) {
            Some(m) if m.contains_header(header) => m,
            _ => return Err(SessionError::UnknownHeader(header.to_string())),
        };
        mapping.set(header, field);
        Ok(())
    }

    /// Starts the export from the mapping workflow. Only enabled at the
    /// last table, mirroring `done_review`.
    pub fn begin_export(&mut self) -> Result<Generation, SessionError> {
        self.require_phase(Phase::Mapping, "export")?;
        self.require_last_table()?;
        self.phase = Phase::Exporting;
        Ok(Generation(self.generation))
    }

    // --- Export completions ---

    /// Marks the export as succeeded. Stale tokens are dropped.
    pub fn finish_export(&mut self, token: Generation) -> bool {
        if !self.accepts(token, Phase::Exporting, "finish_export") {
            return false;
        }
        self.error = None;
        self.phase = Phase::Done;
        true
    }

    /// Records an export failure: back to Idle with the message, the whole
    /// session discarded (no partial table/mapping data retained).
    pub fn fail_export(&mut self, token: Generation, message: &str) -> bool {
        if !self.accepts(token, Phase::Exporting, "fail_export") {
            return false;
        }
        self.clear();
        self.error = Some(message.to_string());
        tracing::warn!("Export failed: {}", message);
        true
    }

    // --- Reset ---

    /// Total and unconditional: returns the session to the pristine Idle
    /// state from any phase and bumps the generation, so any in-flight
    /// operation's eventual completion is ignored.
    pub fn reset(&mut self) {
        self.clear();
        self.generation += 1;
        tracing::info!("Session reset");
    }

    // --- Internals ---

    fn accepts(&self, token: Generation, expected: Phase, action: &'static str) -> bool {
        if token.0 != self.generation {
            tracing::debug!(
                "Dropping stale '{}' completion (generation {} != {})",
                action,
                token.0,
                self.generation
            );
            return false;
        }
        if self.phase != expected {
            tracing::debug!(
                "Dropping '{}' completion while {}",
                action,
                self.phase.name()
            );
            return false;
        }
        true
    }

    fn require_phase(&self, expected: Phase, action: &'static str) -> Result<(), SessionError> {
        if self.phase != expected {
            return Err(SessionError::InvalidPhase {
                action,
                phase: self.phase.name(),
            });
        }
        Ok(())
    }

    fn require_review_phase(&self, action: &'static str) -> Result<(), SessionError> {
        match self.phase {
            Phase::Reviewing | Phase::Mapping => Ok(()),
            _ => Err(SessionError::InvalidPhase {
                action,
                phase: self.phase.name(),
            }),
        }
    }

    fn require_last_table(&self) -> Result<(), SessionError> {
        if !self.is_last_table() {
            return Err(SessionError::ReviewIncomplete {
                current: self.cursor + 1,
                total: self.tables.len(),
            });
        }
        Ok(())
    }

    fn decide(
        &mut self,
        decision: ReviewDecision,
        action: &'static str,
    ) -> Result<(), SessionError> {
        self.require_phase(Phase::Reviewing, action)?;
        if let Some(slot) = self.decisions.get_mut(self.cursor) {
            *slot = decision;
        }
        self.advance();
        Ok(())
    }

    fn advance(&mut self) {
        if self.cursor + 1 < self.tables.len() {
            self.cursor += 1;
        }
    }

    fn discard_tables(&mut self) {
        self.tables.clear();
        self.mappings.clear();
        self.decisions.clear();
        self.cursor = 0;
    }

    fn clear(&mut self) {
        self.discard_tables();
        self.selected_file = None;
        self.use_ocr = false;
        self.error = None;
        self.phase = Phase::Idle;
    }
}
