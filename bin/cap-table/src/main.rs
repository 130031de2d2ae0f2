use alloy_primitives::Address;
use clap::{Parser, Subcommand, ValueEnum};
use common::amount::TokenAmount;
use common::ledger::{LedgerSnapshot, Transaction, TransactionKind};
use eyre::{eyre, Result};
use ledger_sync::{
    export, HistoryFilters, HistoryOrder, HistoryPage, LedgerError, LedgerService, LedgerSource,
    RpcLedgerSource, SearchProbe, SimulatedLedger, WalletRow,
};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::CapTableConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration directory
    #[arg(long, default_value = "./configs/dev")]
    config_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Run against the built-in demo ledger instead of an RPC node
    #[arg(long)]
    simulated: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cap table at the tip, a block, or a point in time
    Snapshot {
        #[arg(long, conflicts_with = "at")]
        block: Option<u64>,
        /// RFC 3339 time or unix seconds
        #[arg(long)]
        at: Option<String>,
    },
    /// Transaction history
    History(HistoryArgs),
    /// History expanded into per-wallet rows with linked transfer legs
    Links(HistoryArgs),
    /// Block at or before a point in time
    Resolve {
        /// RFC 3339 time or unix seconds
        time: String,
    },
}

#[derive(clap::Args, Debug)]
struct HistoryArgs {
    #[arg(long, default_value_t = 1)]
    page: usize,
    #[arg(long)]
    page_size: Option<usize>,
    #[arg(long)]
    address: Option<String>,
    /// Start of the date range (RFC 3339 or unix seconds)
    #[arg(long)]
    from: Option<String>,
    /// End of the date range (RFC 3339 or unix seconds)
    #[arg(long)]
    to: Option<String>,
    /// Transaction kinds to keep (transfer, mint, burn, split, symbol-change)
    #[arg(long = "kind")]
    kinds: Vec<String>,
    #[arg(long)]
    oldest_first: bool,
    /// Number of consecutive pages to load
    #[arg(long, default_value_t = 1)]
    pages: usize,
}

impl HistoryArgs {
    fn filters(&self) -> Result<HistoryFilters> {
        let mut filters = HistoryFilters::default();
        if let Some(address) = &self.address {
            filters = filters.with_address(parse_address(address)?);
        }
        if self.from.is_some() || self.to.is_some() {
            let start = self.from.as_deref().map(parse_time).transpose()?;
            let end = self.to.as_deref().map(parse_time).transpose()?;
            filters = filters.with_date_range(start, end);
        }
        let kinds = self
            .kinds
            .iter()
            .map(|k| k.parse::<TransactionKind>().map_err(|e| eyre!(e)))
            .collect::<Result<Vec<_>>>()?;
        Ok(filters.with_kinds(kinds))
    }
}

fn parse_address(value: &str) -> Result<Address> {
    value
        .parse()
        .map_err(|e| eyre!("Invalid address '{}': {}", value, e))
}

/// RFC 3339 timestamp or plain unix seconds.
fn parse_time(value: &str) -> Result<u64> {
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(secs);
    }
    let parsed = chrono::DateTime::parse_from_rfc3339(value)
        .map_err(|e| eyre!("Invalid time '{}': {}", value, e))?;
    u64::try_from(parsed.timestamp()).map_err(|_| eyre!("Time '{}' is before 1970", value))
}

fn format_time(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| chrono::DateTime::from_timestamp(s, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}

/// Plain-language message first, details after.
fn report(err: LedgerError) -> eyre::Report {
    let hint = if err.is_retryable() { " Retrying may help." } else { "" };
    eyre!("{}{}\n  cause: {}", err.user_message(), hint, err)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    let config_path = PathBuf::from(&cli.config_path).join("cap-table.json");
    let mut config = if config_path.exists() {
        CapTableConfig::load_from_file(&config_path).await?
    } else {
        if !cli.simulated {
            tracing::warn!(path = %config_path.display(), "cap-table.json not found, using defaults");
        }
        CapTableConfig::default()
    }
    .with_env_overrides();

    if let Command::History(args) | Command::Links(args) = &cli.command {
        if args.oldest_first {
            config.engine.history.order = HistoryOrder::OldestFirst;
        }
    }

    let source: Arc<dyn LedgerSource> = if cli.simulated {
        tracing::info!("Using the simulated demo ledger");
        Arc::new(SimulatedLedger::demo())
    } else {
        let token = parse_address(&config.ledger.token_address)?;
        let provider = alloy::providers::ProviderBuilder::new().connect_http(
            config
                .ledger
                .rpc_url
                .parse()
                .map_err(|e| eyre!("Invalid RPC URL '{}': {}", config.ledger.rpc_url, e))?,
        );
        tracing::info!(rpc_url = %config.ledger.rpc_url, token = %token, "Connecting to ledger");
        Arc::new(RpcLedgerSource::new(provider, token))
    };

    let decimals = config.ledger.decimals;
    let service = LedgerService::new(source, config.engine);

    match &cli.command {
        Command::Snapshot { block, at } => {
            let snapshot = match at {
                Some(at) => service.snapshot_at_timestamp(parse_time(at)?).await,
                None => service.get_snapshot(*block).await,
            }
            .map_err(report)?;
            print_snapshot(&snapshot, cli.format, decimals)?;
        }
        Command::History(args) => {
            let transactions = load_pages(&service, args).await?;
            print_transactions(&transactions, cli.format, decimals)?;
        }
        Command::Links(args) => {
            let filters = args.filters()?;
            let transactions = load_pages(&service, args).await?;
            let rows = service.link_transfers(&transactions, filters.address.as_ref());
            print_rows(&rows, cli.format, decimals)?;
        }
        Command::Resolve { time } => {
            let target = parse_time(time)?;
            let progress = |probe: SearchProbe| {
                tracing::debug!(mid = probe.mid, lo = probe.lo, hi = probe.hi, "Search probe");
            };
            let record = service
                .resolve_index_for_timestamp(target, Some(&progress))
                .await
                .map_err(report)?;
            match cli.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
                OutputFormat::Csv => println!("index,timestamp\n{},{}", record.index, record.timestamp),
                OutputFormat::Table => println!(
                    "Block {} at {} (requested {})",
                    record.index,
                    format_time(record.timestamp),
                    format_time(target)
                ),
            }
        }
    }

    Ok(())
}

/// Load `args.pages` pages, following with `load_more` while more remain.
async fn load_pages(service: &LedgerService, args: &HistoryArgs) -> Result<Vec<Transaction>> {
    let filters = args.filters()?;
    let page_size = args
        .page_size
        .unwrap_or(service.history_config().default_page_size);

    let mut page: HistoryPage = service
        .get_history_page(args.page, page_size, &filters)
        .await
        .map_err(report)?;
    let mut transactions = std::mem::take(&mut page.transactions);

    for _ in 1..args.pages.max(1) {
        if !page.has_more {
            break;
        }
        page = service.load_more().await.map_err(report)?;
        transactions.append(&mut page.transactions);
    }

    tracing::info!(count = transactions.len(), has_more = page.has_more, "History loaded");
    Ok(transactions)
}

fn print_snapshot(snapshot: &LedgerSnapshot, format: OutputFormat, decimals: u8) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", export::snapshot_to_json(snapshot)?),
        OutputFormat::Csv => print!("{}", export::snapshot_to_csv(snapshot)?),
        OutputFormat::Table => {
            println!(
                "Cap table at block {}: total supply {}, {} holders",
                snapshot.as_of_index,
                TokenAmount::new(snapshot.total_supply, decimals),
                snapshot.holder_count()
            );
            println!("{:<44} {:>28} {:>12}", "address", "balance", "ownership %");
            for holder in &snapshot.holders {
                println!(
                    "{:<44} {:>28} {:>12}",
                    format!("{:#x}", holder.address),
                    TokenAmount::new(holder.balance, decimals).to_string(),
                    holder.ownership_percentage.to_string()
                );
            }
        }
    }
    Ok(())
}

fn print_transactions(transactions: &[Transaction], format: OutputFormat, decimals: u8) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", export::transactions_to_json(transactions)?),
        OutputFormat::Csv => print!("{}", export::transactions_to_csv(transactions)?),
        OutputFormat::Table => {
            println!(
                "{:<8} {:<26} {:<13} {:<44} {:<44} {:>20}",
                "block", "time", "kind", "from", "to", "amount"
            );
            for tx in transactions {
                let address = |a: Option<Address>| a.map(|a| format!("{:#x}", a)).unwrap_or_default();
                println!(
                    "{:<8} {:<26} {:<13} {:<44} {:<44} {:>20}",
                    tx.index,
                    format_time(tx.timestamp),
                    tx.kind.to_string(),
                    address(tx.from),
                    address(tx.to),
                    tx.amount
                        .map(|a| TokenAmount::new(a, decimals).to_string())
                        .unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

fn print_rows(rows: &[WalletRow], format: OutputFormat, decimals: u8) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", export::wallet_rows_to_json(rows)?),
        OutputFormat::Csv => print!("{}", export::wallet_rows_to_csv(rows)?),
        OutputFormat::Table => {
            println!(
                "{:<8} {:<13} {:<10} {:<44} {:>20}  linked",
                "block", "kind", "role", "address", "amount"
            );
            for row in rows {
                println!(
                    "{:<8} {:<13} {:<10} {:<44} {:>20}  {}",
                    row.index,
                    row.kind.to_string(),
                    row.role.as_str(),
                    row.address.map(|a| format!("{:#x}", a)).unwrap_or_default(),
                    row.amount
                        .map(|a| TokenAmount::new(a, decimals).to_string())
                        .unwrap_or_default(),
                    row.linked_row_id.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}
