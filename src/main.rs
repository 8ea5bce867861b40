// src/main.rs
mod delivery;
mod export;
mod service;
mod session;
mod utils;

use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::Parser;

use delivery::{DirectoryDelivery, FileDelivery};
use service::client;
use service::models::TablesPayload;
use session::{Generation, Phase, Session, Workflow, CANONICAL_FIELDS};
use utils::error::SessionError;
use utils::AppError;

const PREVIEW_ROWS: usize = 3;

/// Command Line Interface for the PDF table review client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the PDF document to upload
    pdf: PathBuf,

    /// Ask the extraction backend to run OCR on the document
    #[arg(long)]
    ocr: bool,

    /// Base URL of the extraction/export backend
    #[arg(short, long, default_value = "http://localhost:5328")]
    server: String,

    /// Output directory for delivered CSV files
    #[arg(short, long, default_value = "./exports")]
    output_dir: PathBuf,

    /// Walk tables confirming/rejecting them, or remap their headers
    #[arg(short, long, value_enum, default_value = "mapping")]
    workflow: WorkflowArg,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
enum WorkflowArg {
    Review,
    Mapping,
}

impl From<WorkflowArg> for Workflow {
    fn from(arg: WorkflowArg) -> Self {
        match arg {
            WorkflowArg::Review => Workflow::Review,
            WorkflowArg::Mapping => Workflow::Mapping,
        }
    }
}

/// How an interactive pass over the tables ended.
enum LoopOutcome {
    /// The user triggered the export; the token accompanies the completion.
    Export(Generation),
    /// The user reset the session; start over with a fresh upload.
    Reset,
    /// The user quit (or stdin closed).
    Quit,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Setup Logging (reads RUST_LOG env var)
    utils::logging::setup_logging();

    // 2. Parse CLI Arguments
    let args = Args::parse();
    tracing::info!("Starting table review for {}", args.pdf.display());

    // 3. Initialize the delivery target
    let delivery = DirectoryDelivery::new(&args.output_dir)?;

    // 4. Read the document once; re-submissions after a reset reuse the bytes
    let pdf_bytes = tokio::fs::read(&args.pdf).await?;
    let file_name = args
        .pdf
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.pdf")
        .to_string();

    let workflow = Workflow::from(args.workflow);
    let mut session = Session::new();

    // 5. Upload, review, export; a `reset` command loops back to a fresh upload
    loop {
        if session.selected_file().is_none() {
            session.select_file(args.pdf.clone())?;
        }
        if args.ocr && !session.use_ocr() {
            session.toggle_ocr()?;
        }

        let token = session.begin_upload()?;
        let payload =
            match client::extract_tables(&args.server, &file_name, pdf_bytes.clone(), session.use_ocr())
                .await
            {
                Ok(payload) => payload,
                Err(e) => {
                    let message = e.to_string();
                    session.fail_upload(token, &message);
                    eprintln!("Extraction failed: {}", message);
                    return Err(e.into());
                }
            };

        match payload {
            TablesPayload::Structured(tables) => {
                if !session.ingest(token, tables, workflow) {
                    // Only possible if the session was torn down meanwhile.
                    return Err(AppError::Config(
                        "extraction response no longer matches the session".to_string(),
                    ));
                }
                if let Some(message) = session.error() {
                    eprintln!("Extraction failed: {}", message);
                    return Ok(());
                }
            }
            TablesPayload::CsvFiles(files) => {
                // Direct-CSV deployment: nothing to review, deliver as-is.
                let written = export::deliver_files(&files, &delivery)?;
                println!(
                    "Delivered {} file(s) to {}",
                    written.len(),
                    delivery.base_dir().display()
                );
                return Ok(());
            }
            TablesPayload::CsvBody(body) => {
                let path =
                    delivery.deliver(export::FALLBACK_CSV_FILENAME, body.as_bytes(), export::CSV_MIME)?;
                println!("Delivered {}", path.display());
                return Ok(());
            }
        }

        // 6. Interactive pass over the ingested tables
        match run_review_loop(&mut session)? {
            LoopOutcome::Export(token) => {
                run_export(&mut session, token, &args.server, &delivery).await?;
                return Ok(());
            }
            LoopOutcome::Reset => continue,
            LoopOutcome::Quit => {
                tracing::info!("Quitting without export");
                return Ok(());
            }
        }
    }
}

/// Drives Reviewing/Mapping from stdin until the user exports, resets, or
/// quits. Refused preconditions are printed inline and change nothing.
fn run_review_loop(session: &mut Session) -> Result<LoopOutcome, AppError> {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print_current_table(session);
        match session.phase() {
            Phase::Reviewing => {
                print!("[c]onfirm / [r]eject / [n]ext / [p]rev / [d]one / reset / quit > ")
            }
            Phase::Mapping => {
                print!("map <header> = <field> / fields / [n]ext / [p]rev / [e]xport / reset / quit > ")
            }
            _ => return Ok(LoopOutcome::Quit),
        }
        std::io::stdout().flush()?;

        let line = match lines.next() {
            Some(line) => line?,
            None => return Ok(LoopOutcome::Quit), // stdin closed
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let handled = match session.phase() {
            Phase::Reviewing => handle_review_command(session, input),
            Phase::Mapping => handle_mapping_command(session, input),
            _ => return Ok(LoopOutcome::Quit),
        };

        match handled {
            Ok(Some(outcome)) => return Ok(outcome),
            Ok(None) => {}
            Err(e) => println!("  ! {}", e),
        }
    }
}

fn handle_review_command(
    session: &mut Session,
    input: &str,
) -> Result<Option<LoopOutcome>, SessionError> {
    match input {
        "c" | "confirm" => session.confirm_table().map(|_| None),
        "r" | "reject" => session.reject_table().map(|_| None),
        "n" | "next" => session.next_table().map(|_| None),
        "p" | "prev" => session.prev_table().map(|_| None),
        "d" | "done" => session
            .done_review()
            .map(|token| Some(LoopOutcome::Export(token))),
        "reset" => {
            session.reset();
            Ok(Some(LoopOutcome::Reset))
        }
        "q" | "quit" => Ok(Some(LoopOutcome::Quit)),
        other => {
            println!("  ? unknown command '{}'", other);
            Ok(None)
        }
    }
}

fn handle_mapping_command(
    session: &mut Session,
    input: &str,
) -> Result<Option<LoopOutcome>, SessionError> {
    if let Some(rest) = input.strip_prefix("map ") {
        return match parse_map_command(rest) {
            Some((header, field)) => session.set_mapping(&header, &field).map(|_| None),
            None => {
                println!("  ? usage: map <header> = <field>");
                Ok(None)
            }
        };
    }

    match input {
        "fields" => {
            println!("  canonical fields: {}", CANONICAL_FIELDS.join(", "));
            Ok(None)
        }
        "n" | "next" => session.next_table().map(|_| None),
        "p" | "prev" => session.prev_table().map(|_| None),
        "e" | "export" => session
            .begin_export()
            .map(|token| Some(LoopOutcome::Export(token))),
        "reset" => {
            session.reset();
            Ok(Some(LoopOutcome::Reset))
        }
        "q" | "quit" => Ok(Some(LoopOutcome::Quit)),
        other => {
            println!("  ? unknown command '{}'", other);
            Ok(None)
        }
    }
}

/// Splits `<header> = <field>`; an empty field means "keep original".
fn parse_map_command(rest: &str) -> Option<(String, String)> {
    let (header, field) = rest.split_once('=')?;
    let header = header.trim();
    let field = field.trim();
    if header.is_empty() {
        return None;
    }
    Some((header.to_string(), field.to_string()))
}

fn print_current_table(session: &Session) {
    let Some(table) = session.current_table() else {
        return;
    };

    println!();
    println!("Table {} of {}", session.cursor() + 1, session.table_count());
    println!("  headers: {}", table.headers.join(", "));
    println!("  rows: {}", table.rows.len());
    for row in table.rows.iter().take(PREVIEW_ROWS) {
        let cells: Vec<String> = table
            .headers
            .iter()
            .map(|header| match row.get(header) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(value) if !value.is_null() => value.to_string(),
                _ => String::new(),
            })
            .collect();
        println!("    | {}", cells.join(" | "));
    }

    match session.phase() {
        Phase::Reviewing => {
            if let Some(decision) = session.current_decision() {
                println!("  status: {}", decision.label());
            }
        }
        Phase::Mapping => {
            if let Some(mapping) = session.current_mapping() {
                let shown: Vec<String> = mapping
                    .iter()
                    .map(|(header, field)| match field.as_str() {
                        Some("") | None => format!("{} (keep)", header),
                        Some(field) => format!("{} -> {}", header, field),
                    })
                    .collect();
                println!("  mapping: {}", shown.join(", "));
            }
        }
        _ => {}
    }
}

/// Builds the batch request, calls the export service, and delivers the
/// returned files. Any failure past `begin_export` lands in `fail_export`.
async fn run_export(
    session: &mut Session,
    token: Generation,
    server: &str,
    delivery: &DirectoryDelivery,
) -> Result<(), AppError> {
    let request = export::build_export_request(session.tables(), session.mappings());

    let files = match client::export_csv(server, &request).await {
        Ok(files) => files,
        Err(e) => {
            let message = e.to_string();
            session.fail_export(token, &message);
            eprintln!("Export failed: {}", message);
            return Err(e.into());
        }
    };

    let delivered = export::deliver_files(&files, delivery).and_then(|written| {
        export::write_manifest(&files, delivery)?;
        Ok(written)
    });

    match delivered {
        Ok(written) => {
            session.finish_export(token);
            println!(
                "Export complete: {} file(s) delivered to {}",
                written.len(),
                delivery.base_dir().display()
            );
            Ok(())
        }
        Err(e) => {
            let message = e.to_string();
            session.fail_export(token, &message);
            eprintln!("Export failed: {}", message);
            Err(e.into())
        }
    }
}
