use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::{fs, path::PathBuf};
use textsets::{
    acquire,
    driver::ScriptedProducer,
    export::export_parquet,
    schema::normalize_key,
    AccumulationDriver, BatchItem, BatchReport, Config, DatasetStore,
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Accumulate extracted category tables into per-category CSV datasets.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// YAML config file
    #[arg(long, env = "TEXTSETS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the dataset directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Merge one CSV table into a category's dataset
    Accumulate {
        #[arg(long)]
        category: String,
        #[arg(long)]
        table: PathBuf,
    },
    /// Merge a JSON array of {"category", "table"} objects
    Batch {
        #[arg(long)]
        input: PathBuf,
    },
    /// Run detection + extraction + accumulation with recorded producer responses
    Ingest {
        #[arg(long)]
        text: PathBuf,
        #[arg(long)]
        replay: PathBuf,
    },
    /// Print the existing header of a category's dataset
    Header {
        #[arg(long)]
        category: String,
    },
    /// List persisted datasets
    List,
    /// Snapshot a category's dataset as Parquet
    Export {
        #[arg(long)]
        category: String,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ─── 1) config ───────────────────────────────────────────────────
    let mut config = Config::load(args.config.as_deref()).context("loading config")?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }

    // ─── 2) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(std::io::stderr)
        .init();
    info!(data_dir = %config.data_dir.display(), "startup");

    // ─── 3) open store ───────────────────────────────────────────────
    let store = DatasetStore::open(&config.data_dir)?;
    let driver = AccumulationDriver::from_config(store.clone(), &config);

    // ─── 4) run command ──────────────────────────────────────────────
    match args.command {
        Command::Accumulate { category, table } => {
            let raw = fs::read_to_string(&table)
                .with_context(|| format!("reading table {}", table.display()))?;
            let report = driver
                .accumulate_batch([BatchItem::new(category, raw)])
                .await;
            finish(&report)
        }
        Command::Batch { input } => {
            let text = fs::read_to_string(&input)
                .with_context(|| format!("reading batch {}", input.display()))?;
            let items: Vec<BatchItem> = serde_json::from_str(&text)
                .with_context(|| format!("parsing batch {}", input.display()))?;
            info!(items = items.len(), "accumulating batch");
            let report = driver.accumulate_batch(items).await;
            finish(&report)
        }
        Command::Ingest { text, replay } => {
            let document = acquire::read_text(&text)?;
            let producer = ScriptedProducer::from_path(&replay)?;
            let report = driver.ingest(&producer, &document).await?;
            finish(&report)
        }
        Command::Header { category } => {
            let key = normalize_key(&category);
            match store.header(&key)? {
                Some(header) => println!("{}", header.join(",")),
                None => bail!("no dataset for `{}` (key `{}`)", category, key),
            }
            Ok(())
        }
        Command::List => {
            #[derive(Serialize)]
            struct Entry {
                key: String,
                location: String,
            }
            let entries: Vec<Entry> = store
                .list()?
                .into_iter()
                .map(|(key, loc)| Entry {
                    key,
                    location: loc.to_string(),
                })
                .collect();
            print_json(&entries)
        }
        Command::Export { category, out_dir } => {
            let key = normalize_key(&category);
            let out_dir = out_dir.unwrap_or_else(|| config.export_dir.clone());
            match export_parquet(&store, &key, &out_dir)? {
                Some(path) => println!("{}", path.display()),
                None => bail!("no dataset for `{}` (key `{}`)", category, key),
            }
            Ok(())
        }
    }
}

/// Print the report and fail the process if any category failed.
fn finish(report: &BatchReport) -> Result<()> {
    print_json(report)?;
    let failed = report.failures().len();
    if failed > 0 {
        bail!("{} of {} categories failed", failed, report.entries.len());
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serializing output")?
    );
    Ok(())
}
