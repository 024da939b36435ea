use std::{fs, io, sync::Arc};

use anyhow::{Context, bail};
use clap::Parser;
use tablescan_config::{ScanSettings, ScanSettingsSource, init_tracing};
use tablescan_core::prefix_scan::{StepTracer, write_json_lines};
use tablescan_core::store::{InMemoryTableService, TableStore};
use tablescan_core::table_scan::{
    CollectingSink, InMemoryMessageQueue, InMemoryTaskStateStore,
    SegmentSink, TableCopySink, TableScanMessageProcessor, TableScanService,
    TableScanWorker,
};
use tablescan_core::TablePrefixScanner;
use tokio_util::sync::CancellationToken;
use tracing::info;

mod cli;
mod fixture;

use cli::{Cli, Command, ScanArgs, StrategyArg, worker_config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file_loaded = dotenvy::dotenv().is_ok();
    init_tracing();
    if env_file_loaded {
        info!("loaded .env file");
    }

    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    match cli.command {
        Command::List { scan } => list(&settings, &scan).await,
        Command::Trace { scan, order } => trace(&settings, &scan, order.into()).await,
        Command::Drain {
            scan,
            workers,
            strategy,
            copy_to,
        } => drain(&settings, &scan, workers, strategy, copy_to).await,
    }
}

fn load_settings(cli: &Cli) -> anyhow::Result<ScanSettings> {
    let (settings, source) = match &cli.config {
        Some(path) => {
            let settings = ScanSettings::load_from_file(path)?;
            settings.validate()?;
            (settings, ScanSettingsSource::File(path.clone()))
        }
        None => ScanSettings::load_from_env()?,
    };
    match &source {
        ScanSettingsSource::Default => info!("using default scan settings"),
        ScanSettingsSource::EnvInline => {
            info!("scan settings loaded from inline environment json")
        }
        ScanSettingsSource::EnvPath(path) | ScanSettingsSource::File(path) => {
            info!(path = %path.display(), "scan settings loaded from file")
        }
    }
    Ok(settings)
}

async fn list(settings: &ScanSettings, scan: &ScanArgs) -> anyhow::Result<()> {
    let config = scan.prefix_scan_config(settings.prefix_scan);
    let table = fixture::load_table(&scan.table)?;

    let rows = TablePrefixScanner::new(config)
        .list_with(table, scan.list_request(&config))
        .await
        .context("prefix scan failed")?;

    info!(rows = rows.len(), prefix = %scan.prefix, "listing complete");
    fixture::write_rows(&rows, io::stdout().lock())
}

async fn trace(
    settings: &ScanSettings,
    scan: &ScanArgs,
    order: tablescan_core::prefix_scan::TraceOrder,
) -> anyhow::Result<()> {
    let config = scan.prefix_scan_config(settings.prefix_scan);
    let table = fixture::load_table(&scan.table)?;

    let start = scan.list_request(&config).into_start_step(table)?;
    let entries = StepTracer::new(order)
        .trace(start)
        .await
        .context("prefix scan failed")?;

    write_json_lines(&entries, io::stdout().lock())?;
    Ok(())
}

async fn drain(
    settings: &ScanSettings,
    scan: &ScanArgs,
    workers: Option<usize>,
    strategy: StrategyArg,
    copy_to: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let config = scan.prefix_scan_config(settings.prefix_scan);
    let worker = worker_config(settings.worker, workers);

    let tables = Arc::new(InMemoryTableService::new());
    let source = fixture::load_table(&scan.table)?;
    let table_name = source.name().to_string();
    tables.insert_table(source).await;

    let collected = Arc::new(CollectingSink::new());
    let destination = match &copy_to {
        Some(_) => Some(tables.create_table(&format!("{table_name}-copy")).await),
        None => None,
    };
    let sink: Arc<dyn SegmentSink> = match &destination {
        Some(table) => Arc::new(TableCopySink::new(table.clone())),
        None => collected.clone(),
    };

    let queue = Arc::new(InMemoryMessageQueue::new());
    let task_states = Arc::new(InMemoryTaskStateStore::new());
    let service = TableScanService::new(queue.clone(), task_states.clone(), config);
    let processor = Arc::new(TableScanMessageProcessor::new(
        tables.clone(),
        queue.clone(),
        task_states,
        sink,
    ));

    let mut request = service.request(table_name);
    request.strategy = strategy.into();
    request.prefix = scan.prefix.clone();
    request.lower_bound = scan.lower.clone();
    request.upper_bound = scan.upper.clone();
    request.select = scan.select.clone();
    let scan_id = service.start(request).await?;

    let report = TableScanWorker::new(queue.clone(), processor, worker)
        .run(CancellationToken::new())
        .await?;

    let poisoned = queue.poisoned().await;
    if let Some(first) = poisoned.first() {
        bail!(
            "scan {scan_id} left {} poisoned message(s); first error: {}",
            poisoned.len(),
            first.error
        );
    }
    if !service.is_complete(scan_id).await? {
        bail!("scan {scan_id} stopped with outstanding steps");
    }

    info!(
        scan_id = %scan_id,
        completed = report.completed,
        retried = report.retried,
        "drain complete"
    );

    match (copy_to, destination) {
        (Some(path), Some(table)) => {
            let file = fs::File::create(&path).with_context(|| {
                format!("failed to create {}", path.display())
            })?;
            fixture::write_rows(&table.rows().await, io::BufWriter::new(file))
        }
        _ => fixture::write_rows(&collected.rows().await, io::stdout().lock()),
    }
}
