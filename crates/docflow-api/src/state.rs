//! Application state wiring all services together.
//!
//! AppState holds the concrete engine, worker pool and blob store used by
//! both CLI commands and REST handlers. Core types are generic over their
//! ports; AppState pins them to the infra implementations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use docflow_core::event::EventBus;
use docflow_core::storage::ObjectStore;
use docflow_core::workflow::activity::{PipelineActivities, input_document_key};
use docflow_core::workflow::engine::WorkflowEngine;
use docflow_core::workflow::router::QueueRouter;
use docflow_core::workflow::worker::WorkerPool;
use docflow_infra::config::{blob_dir, database_path, load_config};
use docflow_infra::ml::{HttpNerClient, HttpOcrClient};
use docflow_infra::pdf::PdfiumExtractor;
use docflow_infra::sqlite::pool::DatabasePool;
use docflow_infra::sqlite::workflow_store::SqliteWorkflowStore;
use docflow_infra::storage::FilesystemObjectStore;
use docflow_types::config::DocflowConfig;
use docflow_types::workflow::{ActivityType, BlobRef};

use crate::drivers::RunDrivers;

/// Capacity of the in-process event bus.
const EVENT_CAPACITY: usize = 1024;

/// Concrete type aliases for the core generics pinned to infra implementations.
pub type ConcreteActivities =
    PipelineActivities<FilesystemObjectStore, PdfiumExtractor, HttpOcrClient, HttpNerClient>;

pub type ConcreteEngine = WorkflowEngine<SqliteWorkflowStore>;

pub type ConcreteWorkers = WorkerPool<SqliteWorkflowStore, ConcreteActivities>;

/// Shared application state.
///
/// Used by CLI commands, REST handlers and worker processes.
#[derive(Clone)]
pub struct AppState {
    pub engine: ConcreteEngine,
    pub workers: ConcreteWorkers,
    pub drivers: RunDrivers<SqliteWorkflowStore>,
    pub router: Arc<QueueRouter>,
    pub blobs: Arc<FilesystemObjectStore>,
    pub pdf: PdfiumExtractor,
    pub config: DocflowConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize the application state: load config, connect to the DB,
    /// wire the engine and worker pool.
    pub async fn init(data_dir: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("create data directory {}", data_dir.display()))?;

        let config = load_config(&data_dir).await;
        let router = Arc::new(QueueRouter::from_config(&config).context("invalid configuration")?);

        let db_path = database_path(&data_dir, &config);
        let db_pool = DatabasePool::open(&db_path, &config.database)
            .await
            .with_context(|| format!("open database {}", db_path.display()))?;
        let store = Arc::new(SqliteWorkflowStore::new(db_pool));

        let blobs = Arc::new(FilesystemObjectStore::new(blob_dir(&data_dir, &config)));

        // Request deadlines come from the supervisor, not the HTTP client.
        let http = reqwest::Client::new();
        let pdf = PdfiumExtractor::new(config.services.pdfium_path.clone());
        let activities = Arc::new(PipelineActivities::new(
            Arc::clone(&blobs),
            pdf.clone(),
            HttpOcrClient::new(http.clone(), config.services.ocr_url.clone()),
            HttpNerClient::new(http, config.services.ner_url.clone()),
        ));

        let events = EventBus::new(EVENT_CAPACITY);
        let engine = WorkflowEngine::new(
            Arc::clone(&store),
            Arc::clone(&router),
            events.clone(),
            config.engine.clone(),
        );
        let workers = WorkerPool::new(
            store,
            activities,
            Arc::clone(&router),
            config.retry.clone(),
            events,
            config.engine.poll_interval(),
        );

        tracing::debug!(data_dir = %data_dir.display(), "application state initialized");

        Ok(Self {
            drivers: RunDrivers::new(engine.clone()),
            engine,
            workers,
            router,
            blobs,
            pdf,
            config,
            data_dir,
        })
    }

    /// Names of every queue that has at least one activity routed to it.
    pub fn active_queue_names(&self) -> Vec<String> {
        self.router.active_queues().map(|q| q.name.clone()).collect()
    }

    /// Fail before polling if `queues` carry extraction tasks and pdfium
    /// cannot be loaded.
    pub fn check_extraction(&self, queues: &[String]) -> anyhow::Result<()> {
        let extract_queue = self.router.queue_for(ActivityType::Extract);
        if !queues.iter().any(|q| q == extract_queue) {
            return Ok(());
        }
        self.pdf.check_binding().with_context(|| {
            format!(
                "queue '{extract_queue}' needs the pdfium library \
                 (set DOCFLOW_PDFIUM_PATH or services.pdfium_path)"
            )
        })
    }

    /// Store a PDF content-addressed and submit a run for it.
    pub async fn submit_document(&self, pdf: Vec<u8>) -> anyhow::Result<(BlobRef, Uuid)> {
        let key = input_document_key(&document_digest(&pdf));
        self.blobs
            .put(&key, pdf)
            .await
            .with_context(|| format!("store input document at {key}"))?;
        let run_id = self.engine.submit(key.clone()).await?;
        Ok((key, run_id))
    }
}

/// Lowercase hex SHA-256 of a document.
pub fn document_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
