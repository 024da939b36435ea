use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tablescan_core::prefix_scan::TraceOrder;
use tablescan_core::table_scan::TableScanStrategy;
use tablescan_core::{ListRequest, PrefixScanConfig, WorkerConfig};

#[derive(Debug, Parser)]
#[command(
    name = "tablescanctl",
    version,
    about = "Partition-key prefix scans over JSON-lines tables"
)]
pub struct Cli {
    /// Settings file (TOML or JSON). Defaults to `$TABLESCAN_CONFIG_PATH`,
    /// `$TABLESCAN_CONFIG_JSON`, then `tablescan.toml` in the working
    /// directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print every row under a prefix, one JSON object per line
    List {
        #[command(flatten)]
        scan: ScanArgs,
    },
    /// Print every step the scan executes, one JSON object per line
    Trace {
        #[command(flatten)]
        scan: ScanArgs,
        #[arg(long, value_enum, default_value = "depth-first")]
        order: OrderArg,
    },
    /// Run the scan through an in-process queue and worker pool
    Drain {
        #[command(flatten)]
        scan: ScanArgs,
        /// Worker tasks; overrides `[worker] workers`
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long, value_enum, default_value = "prefix-scan")]
        strategy: StrategyArg,
        /// Write the scanned rows to this JSON-lines file instead of stdout
        #[arg(long)]
        copy_to: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// JSON-lines table; each line is a row with `PartitionKey` and `RowKey`
    #[arg(long)]
    pub table: PathBuf,
    /// Partition key prefix; empty lists the whole table
    #[arg(long, default_value = "")]
    pub prefix: String,
    /// Exclusive lower partition key bound
    #[arg(long)]
    pub lower: Option<String>,
    /// Exclusive upper partition key bound
    #[arg(long)]
    pub upper: Option<String>,
    /// Columns to return; key columns are always included
    #[arg(long, value_delimiter = ',')]
    pub select: Option<Vec<String>>,
    /// Page size for range queries (1..=1000)
    #[arg(long)]
    pub take: Option<usize>,
    /// Skip partition key queries for keys straddling a page
    #[arg(long)]
    pub no_expand: bool,
    #[arg(long)]
    pub segments_first: Option<usize>,
    #[arg(long)]
    pub segments_subsequent: Option<usize>,
}

impl ScanArgs {
    /// Settings with command line overrides applied.
    pub fn prefix_scan_config(&self, base: PrefixScanConfig) -> PrefixScanConfig {
        PrefixScanConfig {
            take_count: self.take.unwrap_or(base.take_count),
            expand_partition_keys: base.expand_partition_keys && !self.no_expand,
            segments_per_first_prefix: self
                .segments_first
                .unwrap_or(base.segments_per_first_prefix),
            segments_per_subsequent_prefix: self
                .segments_subsequent
                .unwrap_or(base.segments_per_subsequent_prefix),
        }
    }

    pub fn list_request(&self, config: &PrefixScanConfig) -> ListRequest {
        ListRequest::new(self.prefix.clone(), config)
            .with_bounds(self.lower.clone(), self.upper.clone())
            .with_select(self.select.clone())
    }
}

pub fn worker_config(base: WorkerConfig, workers: Option<usize>) -> WorkerConfig {
    WorkerConfig {
        workers: workers.unwrap_or(base.workers),
        ..base
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OrderArg {
    DepthFirst,
    BreadthFirst,
}

impl From<OrderArg> for TraceOrder {
    fn from(value: OrderArg) -> Self {
        match value {
            OrderArg::DepthFirst => TraceOrder::DepthFirst,
            OrderArg::BreadthFirst => TraceOrder::BreadthFirst,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum StrategyArg {
    Serial,
    PrefixScan,
}

impl From<StrategyArg> for TableScanStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Serial => TableScanStrategy::Serial,
            StrategyArg::PrefixScan => TableScanStrategy::PrefixScan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_only_what_was_passed() {
        let cli = Cli::parse_from([
            "tablescanctl",
            "list",
            "--table",
            "rows.jsonl",
            "--take",
            "3",
            "--no-expand",
            "--select",
            "Size,Name",
        ]);
        let Command::List { scan } = cli.command else {
            panic!("expected list");
        };

        let config = scan.prefix_scan_config(PrefixScanConfig::default());
        assert_eq!(config.take_count, 3);
        assert!(!config.expand_partition_keys);
        assert_eq!(config.segments_per_first_prefix, 1);

        let request = scan.list_request(&config);
        assert_eq!(request.prefix, "");
        assert_eq!(
            request.select,
            Some(vec!["Size".to_string(), "Name".to_string()])
        );
    }

    #[test]
    fn drain_defaults() {
        let cli = Cli::parse_from([
            "tablescanctl",
            "drain",
            "--table",
            "rows.jsonl",
            "--config",
            "scan.toml",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("scan.toml")));
        let Command::Drain {
            workers, strategy, ..
        } = cli.command
        else {
            panic!("expected drain");
        };
        assert!(matches!(strategy, StrategyArg::PrefixScan));
        assert_eq!(worker_config(WorkerConfig::default(), workers).workers, 4);
    }
}
