mod config;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use common::StorageBackendKind;
use common::storage::BlobStore;
use common::storage::filesystem::FilesystemBlobStore;
use common::storage::memory::MemoryBlobStore;
use common::storage::object::ObjectBlobStore;
use engine::database::init_db;
use engine::{DatabasePointerStore, JsonCodec, LoadOptions, LoadResult, SaveOptions, SyncEngine};
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::{CliError, Result};

type DocEngine = SyncEngine<JsonCodec<Value>>;

/// Save and load versioned JSON documents.
#[derive(Parser, Debug)]
#[command(name = "docsync", version, about, long_about = None)]
struct Cli {
    /// Config file path, extension optional.
    #[arg(long, env = "DOCSYNC_CONFIG", default_value = "config/docsync")]
    config: String,

    /// Caller identity. Every document is scoped to one owner.
    #[arg(long, env = "DOCSYNC_OWNER", global = true, default_value = "")]
    owner: String,

    /// Top-level payload fields copied into the pointer summary.
    #[arg(long = "summary-field", global = true)]
    summary_fields: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Save a JSON payload as the next revision of a document.
    Save {
        resource: String,

        /// Payload file, or `-` for stdin.
        #[arg(long, short, default_value = "-")]
        file: PathBuf,

        /// Revision the payload was edited from.
        #[arg(long)]
        expected_revision: Option<u64>,

        /// Skip the conflict check.
        #[arg(long)]
        force: bool,

        /// Retry transient failures with backoff.
        #[arg(long)]
        retry: bool,

        /// Summary object stored instead of the extracted fields.
        #[arg(long)]
        summary: Option<String>,
    },
    /// Print the current revision of a document.
    Load {
        resource: String,

        #[arg(long)]
        no_cache: bool,
    },
    /// Print the pointer record of a document.
    Head { resource: String },
    /// Print the pointer records of every document of the owner.
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config).context("Failed to load config")?;

    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(config.log.level())
        .with_writer(std::io::stderr)
        .init();

    let engine = open_engine(&config, &cli.summary_fields)
        .await
        .context("Failed to open sync engine")?;

    let result = execute(&engine, &cli.owner, cli.command).await;

    engine.flush_notifications().await;
    engine.wait_for_cleanup().await;

    match result {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            Ok(ExitCode::from(e.exit_code()))
        }
    }
}

async fn open_engine(config: &AppConfig, summary_fields: &[String]) -> Result<DocEngine> {
    let storage = &config.storage;
    let blobs: Arc<dyn BlobStore> = match storage.backend {
        StorageBackendKind::Filesystem => Arc::new(
            FilesystemBlobStore::new(PathBuf::from(&storage.root), storage.max_blob_bytes).await?,
        ),
        StorageBackendKind::Memory => {
            warn!("Memory blob store selected; payloads are lost on exit");
            Arc::new(MemoryBlobStore::new())
        }
        StorageBackendKind::S3 => Arc::new(ObjectBlobStore::new(
            &storage.s3,
            storage.max_blob_bytes,
        )?),
    };

    let db = init_db(&config.database)
        .await
        .map_err(|e| CliError::Database(e.to_string()))?;
    let pointers = Arc::new(DatabasePointerStore::new(db));

    info!(backend = ?storage.backend, "Sync engine ready");

    let codec = JsonCodec::new().with_summary_fields(summary_fields.iter().cloned());
    Ok(SyncEngine::builder(codec, blobs, pointers)
        .config(config.engine.clone())
        .build())
}

async fn execute(engine: &DocEngine, owner: &str, command: Command) -> Result<Value> {
    match command {
        Command::Save {
            resource,
            file,
            expected_revision,
            force,
            retry,
            summary,
        } => {
            let payload: Value = serde_json::from_slice(&read_payload(&file).await?)?;

            let mut options = SaveOptions::new().with_force_overwrite(force);
            if let Some(revision) = expected_revision {
                options = options.with_expected_revision(revision);
            }
            if let Some(summary) = summary {
                options = options.with_summary(serde_json::from_str(&summary)?);
            }

            let outcome = if retry {
                engine.save_with_retry(owner, &resource, &payload, options).await?
            } else {
                engine.save(owner, &resource, &payload, options).await?
            };

            Ok(json!({
                "revision": outcome.revision,
                "blob_path": outcome.blob_path,
                "size_bytes": outcome.size_bytes,
            }))
        }
        Command::Load { resource, no_cache } => {
            let options = if no_cache {
                LoadOptions::bypass_cache()
            } else {
                LoadOptions::default()
            };

            match engine.load(owner, &resource, options).await? {
                LoadResult::Loaded(doc) => Ok(json!({
                    "source": doc.source,
                    "record": doc.record,
                    "payload": doc.payload,
                })),
                LoadResult::NotFound => Ok(json!({ "status": "not_found" })),
            }
        }
        Command::Head { resource } => {
            let record = engine.head(owner, &resource).await?;
            Ok(serde_json::to_value(record)?)
        }
        Command::List => {
            let records = engine.list(owner).await?;
            Ok(serde_json::to_value(records)?)
        }
    }
}

async fn read_payload(file: &PathBuf) -> Result<Vec<u8>> {
    if file.as_os_str() == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin().read_to_end(&mut buf).await?;
        Ok(buf)
    } else {
        Ok(tokio::fs::read(file).await?)
    }
}
