//! Batch CLI for the SDS extraction pipeline.
//!
//! `sds process <dir>` runs every supported document in a folder through
//! the processing queue and prints per-document results; `sds enrich`
//! revisits stored documents for online enrichment; `sds cache-stats`
//! reports on the field result cache.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sds_extraction::{
    DocumentProcessor, ExtractionStore, FieldCache, FieldRetriever, OnlineEnricher,
    OnlineSearcher, OpenAiCompatModel, PipelineConfig, ProcessMode, ProcessingQueue, QueueEvent,
    SearxClient, SqliteFieldCache, SqliteSearchCache, SqliteStore,
};

#[derive(Parser)]
#[command(name = "sds", about = "Chemical SDS field extraction", version)]
struct Cli {
    /// Directory holding the SQLite databases.
    #[arg(long, default_value = "data", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process every supported document in a folder.
    Process {
        /// Folder to scan for documents.
        dir: PathBuf,

        /// Processing mode: online (with web completion) or local.
        #[arg(long, default_value = "online")]
        mode: ProcessMode,

        /// Worker pool size (defaults to MAX_WORKERS or 2).
        #[arg(long)]
        workers: Option<usize>,

        /// Skip the language-model pass entirely.
        #[arg(long)]
        no_model: bool,
    },

    /// Re-run online enrichment over stored documents.
    Enrich {
        /// Maximum documents to visit.
        #[arg(long, default_value_t = 200)]
        limit: usize,

        /// Also visit documents whose last run failed.
        #[arg(long)]
        include_failed: bool,
    },

    /// Show field cache statistics.
    CacheStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.data_dir)
        .with_context(|| format!("cannot create data dir {}", cli.data_dir.display()))?;

    match cli.command {
        Command::Process {
            dir,
            mode,
            workers,
            no_model,
        } => process_folder(&cli.data_dir, &dir, mode, workers, no_model).await,
        Command::Enrich {
            limit,
            include_failed,
        } => enrich(&cli.data_dir, limit, include_failed).await,
        Command::CacheStats => cache_stats(&cli.data_dir).await,
    }
}

fn sqlite_url(data_dir: &Path, name: &str) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join(name).display())
}

struct Services {
    store: Arc<SqliteStore>,
    cache: Arc<SqliteFieldCache>,
    provider: Arc<SearxClient>,
    config: PipelineConfig,
}

async fn build_services(data_dir: &Path) -> Result<Services> {
    let config = PipelineConfig::from_env();
    let store = Arc::new(
        SqliteStore::new(&sqlite_url(data_dir, "extractions.db"))
            .await
            .context("opening document store")?,
    );
    let cache = Arc::new(
        SqliteFieldCache::new(&sqlite_url(data_dir, "field_cache.db"), config.cache_ttl)
            .await
            .context("opening field cache")?,
    );
    let search_cache = Arc::new(
        SqliteSearchCache::new(
            &sqlite_url(data_dir, "search_cache.db"),
            config.search_cache_ttl,
        )
        .await
        .context("opening search cache")?,
    );
    let provider = Arc::new(SearxClient::new(config.search.clone()).with_cache(search_cache));
    Ok(Services {
        store,
        cache,
        provider,
        config,
    })
}

fn build_processor(services: &Services, no_model: bool) -> DocumentProcessor {
    let mut processor =
        DocumentProcessor::new(services.store.clone(), services.config.clone())
            .with_online_search(Arc::new(OnlineSearcher::snippet(services.provider.clone())));
    if !no_model {
        let model = OpenAiCompatModel::new(services.config.model.clone());
        processor = processor.with_model(Arc::new(model));
    }
    processor
}

async fn process_folder(
    data_dir: &Path,
    dir: &Path,
    mode: ProcessMode,
    workers: Option<usize>,
    no_model: bool,
) -> Result<()> {
    let files = sds_extraction::list_supported_files(dir)
        .with_context(|| format!("cannot read folder {}", dir.display()))?;
    if files.is_empty() {
        println!("No supported documents in {}", dir.display());
        return Ok(());
    }

    let services = build_services(data_dir).await?;
    let processor = Arc::new(build_processor(&services, no_model));
    let workers = workers.unwrap_or(services.config.workers);

    let (mut queue, mut events) = ProcessingQueue::new(processor, workers);
    queue.start();

    let total = files.len();
    println!("Processing {total} document(s) with {workers} worker(s)...");
    for file in files {
        queue.enqueue(file, mode);
    }

    let mut done = 0usize;
    let mut failed = 0usize;
    while done < total {
        let Some(event) = events.recv().await else {
            break;
        };
        match event {
            QueueEvent::Started { file } => {
                println!("  started  {}", file.display());
            }
            QueueEvent::Finished { file, document_id } => {
                done += 1;
                println!("  finished {} (document {document_id})", file.display());
            }
            QueueEvent::Failed { file, error } => {
                done += 1;
                failed += 1;
                println!("  FAILED   {}: {error}", file.display());
            }
        }
    }
    queue.stop(Duration::from_secs(5)).await;

    println!();
    print_results(services.store.as_ref(), total).await?;
    if failed > 0 {
        println!("\n{failed} document(s) failed; see the log for details.");
    }
    Ok(())
}

async fn print_results(store: &SqliteStore, limit: usize) -> Result<()> {
    let documents = store.list_documents(limit).await?;
    for document in documents {
        println!(
            "{} [{}]{}",
            document.filename,
            match document.status {
                sds_extraction::DocumentStatus::Success => "success",
                sds_extraction::DocumentStatus::Failed => "failed",
                sds_extraction::DocumentStatus::Pending => "pending",
            },
            document
                .processing_time_seconds
                .map(|s| format!(" {s:.2}s"))
                .unwrap_or_default(),
        );
        let details = store.field_details(document.id).await?;
        let mut fields: Vec<_> = details.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        for (name, detail) in fields {
            let value = detail.value.replace('\n', " ");
            let value = if value.chars().count() > 60 {
                format!("{}...", value.chars().take(57).collect::<String>())
            } else {
                value
            };
            println!(
                "    {name:<20} {value:<60} conf={:.2} [{}]",
                detail.confidence,
                detail.validation_status.as_str()
            );
        }
    }
    Ok(())
}

async fn enrich(data_dir: &Path, limit: usize, include_failed: bool) -> Result<()> {
    let services = build_services(data_dir).await?;
    let processor = Arc::new(build_processor(&services, false));
    let retriever = Arc::new(FieldRetriever::new(
        services.store.clone(),
        services.provider.clone(),
        services.cache.clone(),
        services.config.retrieval.clone(),
    ));
    let enricher = OnlineEnricher::new(
        services.store.clone(),
        processor,
        services.config.retrieval.clone(),
    )
    .with_field_retriever(retriever);

    let enriched = enricher.enrich_all(limit, !include_failed).await?;
    println!("Enriched {enriched} document(s).");
    Ok(())
}

async fn cache_stats(data_dir: &Path) -> Result<()> {
    let config = PipelineConfig::from_env();
    let cache = SqliteFieldCache::new(&sqlite_url(data_dir, "field_cache.db"), config.cache_ttl)
        .await
        .context("opening field cache")?;
    let stats = cache.stats().await?;
    println!("Field cache:");
    println!("  entries        {}", stats.total_entries);
    println!("  expired        {}", stats.expired_entries);
    println!("  total hits     {}", stats.total_hits);
    println!("  hits per entry {:.2}", stats.hit_rate);
    Ok(())
}
