//! CLI command definitions for the `docflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod process;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use uuid::Uuid;

/// Durable PDF extraction, OCR and NER pipeline.
#[derive(Parser)]
#[command(name = "docflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Data directory holding docflow.toml, the database and blobs.
    #[arg(long, env = "DOCFLOW_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API together with workers for every queue.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Run a dedicated worker process.
    Worker {
        /// Queue to poll (repeatable). Defaults to every active queue.
        #[arg(long = "queue", short = 'q')]
        queues: Vec<String>,
    },

    /// Submit a PDF document for processing.
    Submit {
        /// Path to the PDF file.
        file: PathBuf,

        /// Drive the run here and wait for its result.
        #[arg(long)]
        wait: bool,
    },

    /// Show the status of a run.
    Status {
        /// Run ID.
        run_id: Uuid,
    },

    /// List the tasks of a run with their attempt history.
    Tasks {
        /// Run ID.
        run_id: Uuid,
    },

    /// Re-evaluate every running run once (re-enqueue lost tasks, apply
    /// expired deadlines).
    Recover,

    /// Serve fake OCR and NER endpoints for local development.
    #[command(name = "mock-services")]
    MockServices {
        /// Port of the fake OCR service.
        #[arg(long, default_value = "8001")]
        ocr_port: u16,

        /// Port of the fake NER service.
        #[arg(long, default_value = "8002")]
        ner_port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Tracing filter directives for the verbosity flags.
pub fn log_directives(verbose: u8, quiet: bool) -> &'static str {
    match verbose {
        0 if quiet => "error",
        0 => "warn,docflow=info",
        1 => "info,docflow=debug",
        _ => "trace",
    }
}
