use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sellerboard::{
    config::Settings,
    model::Metric,
    report::{
        dashboard,
        league::{league_table, LeagueQuery},
        listings::{filter_listings, listing_detail, ListingFilter},
        products::summarize,
        render,
    },
    store::Store,
    upload::{self, ImportOptions},
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Ingest eBay listing traffic reports and browse the results.
#[derive(Parser, Debug)]
#[command(name = "sellerboard", version)]
struct Cli {
    /// Settings file (default: sellerboard.yaml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// DuckDB database file, overriding the configured one
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import CSV reports (files, directories, globs or .zip archives)
    Import {
        #[arg(required = true)]
        inputs: Vec<String>,
        /// Report period, YYYY-MM-DD (default: from file name, else today)
        #[arg(long, value_parser = parse_period)]
        period: Option<NaiveDate>,
        /// Re-import uploads that were imported before
        #[arg(long)]
        force: bool,
        /// Parse and preview without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Headline KPIs and per-period series
    Dashboard {
        #[arg(long, value_parser = parse_period)]
        period: Option<NaiveDate>,
    },
    /// Rank listings of a period by a metric
    League {
        #[arg(long, value_enum)]
        metric: Option<Metric>,
        #[arg(long)]
        ascending: bool,
        /// Number of rows (0 for all)
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, value_parser = parse_period)]
        period: Option<NaiveDate>,
        /// Title substring
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        category: Option<String>,
        /// Product ID
        #[arg(long)]
        product: Option<i64>,
        #[arg(long, default_value_t = 0.0)]
        min_impressions: f64,
    },
    /// All known listings
    Listings {
        /// Title or item ID substring
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        product: Option<i64>,
        /// Only listings without a product
        #[arg(long)]
        unmapped: bool,
    },
    /// One listing with its history
    Listing { item_id: String },
    /// Manage products
    #[command(subcommand)]
    Product(ProductCommand),
    /// Listings not yet assigned to a product
    Mapping,
    /// Import batches and raw data
    #[command(subcommand)]
    Raw(RawCommand),
    /// Report periods with data
    Periods,
}

#[derive(Subcommand, Debug)]
enum ProductCommand {
    Create { name: String },
    Rename { id: i64, name: String },
    Delete { id: i64 },
    /// Assign listings to a product
    Assign {
        id: i64,
        #[arg(required = true)]
        item_ids: Vec<String>,
    },
    /// Remove listings from their product
    Unassign {
        #[arg(required = true)]
        item_ids: Vec<String>,
    },
    /// Products with aggregated metrics for a period
    List {
        #[arg(long, value_parser = parse_period)]
        period: Option<NaiveDate>,
    },
    /// One product with its member listings
    Show {
        id: i64,
        #[arg(long, value_parser = parse_period)]
        period: Option<NaiveDate>,
    },
}

#[derive(Subcommand, Debug)]
enum RawCommand {
    /// List import batches, newest first
    Batches,
    /// Delete an import batch and its snapshots
    Delete { id: i64 },
    /// Write snapshots to DIR/period=YYYY-MM-DD/snapshots.parquet
    Export { dir: PathBuf },
    /// Remove all data
    Purge {
        #[arg(long)]
        yes: bool,
    },
}

fn parse_period(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD: {}", e))
}

fn period_str(p: Option<NaiveDate>) -> Option<String> {
    p.map(|d| d.format("%Y-%m-%d").to_string())
}

/// Prints JSON or the rendered text.
fn emit<T: Serialize + ?Sized>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", render::to_json(value)?);
    } else {
        print!("{}", text());
    }
    Ok(())
}

/// The requested period, or the latest one with data.
fn resolve_period(store: &Store, requested: Option<NaiveDate>) -> Result<Option<String>> {
    match period_str(requested) {
        Some(p) => Ok(Some(p)),
        None => store.latest_period(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db) = &cli.database {
        settings.database_path = db.clone();
    }

    // ─── logging to stderr; stdout carries the output ────────────────
    let env =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    debug!(?settings, "settings loaded");

    // dry runs never read or create the database file
    let dry_run = matches!(cli.command, Command::Import { dry_run: true, .. });
    let mut store = if dry_run {
        info!("dry run, using an in-memory database");
        Store::open_in_memory()?
    } else {
        info!(database = %settings.database_path.display(), "startup");
        Store::open(&settings.database_path)?
    };
    let json = cli.json;

    match cli.command {
        Command::Import {
            inputs,
            period,
            force,
            dry_run,
        } => {
            let paths = upload::resolve_inputs(&inputs)?;
            if paths.is_empty() {
                bail!("no CSV or ZIP files found");
            }
            let opts = ImportOptions {
                period,
                force,
                dry_run,
                max_concurrent: settings.max_concurrent_parses,
            };
            let outcomes = upload::run_import(&mut store, paths, &opts).await?;
            let failed = outcomes.iter().filter(|o| o.is_failure()).count();

            emit(json, &outcomes, || {
                outcomes
                    .iter()
                    .map(|o| render::upload_outcome(o, settings.preview_rows))
                    .collect()
            })?;

            if failed > 0 {
                error!(failed, "some uploads failed");
                bail!("{} of {} upload(s) failed", failed, outcomes.len());
            }
        }

        Command::Dashboard { period } => {
            let all = store.all_snapshots()?;
            let d = dashboard::build(&all, period_str(period).as_deref());
            emit(json, &d, || render::dashboard(&d))?;
        }

        Command::League {
            metric,
            ascending,
            limit,
            period,
            search,
            category,
            product,
            min_impressions,
        } => {
            let Some(period) = resolve_period(&store, period)? else {
                println!("No data imported yet.");
                return Ok(());
            };
            let metric = metric.unwrap_or(settings.default_metric);
            let query = LeagueQuery {
                ascending,
                limit: match limit {
                    Some(0) => None,
                    Some(n) => Some(n),
                    None => settings.league_limit(),
                },
                search,
                category,
                product_id: product,
                min_impressions,
                ..LeagueQuery::new(metric)
            };
            let snaps = store.snapshots_for_period(&period)?;
            let entries = league_table(&snaps, &query);
            emit(json, &entries, || render::league(&entries, metric, &period))?;
        }

        Command::Listings {
            search,
            product,
            unmapped,
        } => {
            let filter = ListingFilter {
                search,
                product_id: product,
                unmapped_only: unmapped,
            };
            let rows = filter_listings(store.listings()?, &store.products()?, &filter);
            emit(json, &rows, || render::listings(&rows))?;
        }

        Command::Listing { item_id } => {
            let Some(record) = store.listing(&item_id)? else {
                bail!("no listing with item ID {}", item_id);
            };
            let history = store.listing_history(&item_id)?;
            let d = listing_detail(record, &store.products()?, &history);
            emit(json, &d, || render::listing_detail(&d))?;
        }

        Command::Product(cmd) => product_command(&mut store, cmd, json)?,

        Command::Mapping => {
            let filter = ListingFilter {
                unmapped_only: true,
                ..Default::default()
            };
            let rows = filter_listings(store.listings()?, &store.products()?, &filter);
            emit(json, &rows, || {
                if rows.is_empty() {
                    "Every listing is assigned to a product.\n".to_string()
                } else {
                    format!(
                        "{} unmapped listing(s); assign with `product assign <ID> <ITEM_ID>`\n{}",
                        rows.len(),
                        render::listings(&rows)
                    )
                }
            })?;
        }

        Command::Raw(cmd) => raw_command(&mut store, cmd, json)?,

        Command::Periods => {
            let periods = store.periods()?;
            emit(json, &periods, || {
                periods.iter().map(|p| format!("{}\n", p)).collect()
            })?;
        }
    }

    Ok(())
}

fn product_command(store: &mut Store, cmd: ProductCommand, json: bool) -> Result<()> {
    match cmd {
        ProductCommand::Create { name } => {
            let id = store.create_product(&name, Utc::now())?;
            emit(json, &serde_json::json!({ "id": id }), || {
                format!("created product {} ({})\n", id, name.trim())
            })
        }
        ProductCommand::Rename { id, name } => {
            store.rename_product(id, &name)?;
            emit(json, &serde_json::json!({ "id": id }), || {
                format!("renamed product {}\n", id)
            })
        }
        ProductCommand::Delete { id } => {
            store.delete_product(id)?;
            emit(json, &serde_json::json!({ "id": id }), || {
                format!("deleted product {}\n", id)
            })
        }
        ProductCommand::Assign { id, item_ids } => {
            let n = store.assign(id, &item_ids)?;
            emit(json, &serde_json::json!({ "assigned": n }), || {
                format!("assigned {} listing(s) to product {}\n", n, id)
            })
        }
        ProductCommand::Unassign { item_ids } => {
            let n = store.unassign(&item_ids)?;
            emit(json, &serde_json::json!({ "unassigned": n }), || {
                format!("unassigned {} listing(s)\n", n)
            })
        }
        ProductCommand::List { period } => {
            let period = resolve_period(store, period)?;
            let snaps = match &period {
                Some(p) => store.snapshots_for_period(p)?,
                None => Vec::new(),
            };
            let summaries = summarize(store.products()?, &snaps);
            emit(json, &summaries, || {
                render::products(&summaries, period.as_deref())
            })
        }
        ProductCommand::Show { id, period } => {
            let Some(product) = store.product(id)? else {
                bail!("no product with id {}", id);
            };
            let period = resolve_period(store, period)?;
            let snaps = match &period {
                Some(p) => store.snapshots_for_period(p)?,
                None => Vec::new(),
            };
            let products = store.products()?;
            let summary = summarize(vec![product], &snaps);
            let filter = ListingFilter {
                product_id: Some(id),
                ..Default::default()
            };
            let members = filter_listings(store.listings()?, &products, &filter);
            emit(
                json,
                &serde_json::json!({ "summary": summary, "members": members }),
                || {
                    format!(
                        "{}\n{}",
                        render::products(&summary, period.as_deref()),
                        render::listings(&members)
                    )
                },
            )
        }
    }
}

fn raw_command(store: &mut Store, cmd: RawCommand, json: bool) -> Result<()> {
    match cmd {
        RawCommand::Batches => {
            let batches = store.batches()?;
            emit(json, &batches, || render::batches(&batches))
        }
        RawCommand::Delete { id } => {
            let summary = store.delete_batch(id)?;
            emit(json, &summary, || {
                format!(
                    "deleted batch {}: {} snapshot(s), {} orphaned listing(s) removed\n",
                    id, summary.snapshots_removed, summary.listings_removed
                )
            })
        }
        RawCommand::Export { dir } => {
            let parts = store.export_parquet(&dir)?;
            emit(json, &parts, || {
                parts
                    .iter()
                    .map(|p| format!("{}: {} rows → {}\n", p.period, p.rows, p.path.display()))
                    .collect()
            })
        }
        RawCommand::Purge { yes } => {
            if !yes {
                bail!("purge removes every import, listing and product; pass --yes to confirm");
            }
            store.purge()?;
            emit(json, &serde_json::json!({ "purged": true }), || {
                "all data removed\n".to_string()
            })
        }
    }
}
