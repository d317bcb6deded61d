// 🏭 issuer-master - worker / merge / gc entry point
//
//   issuer-master worker <run_id> <chunk_id> <observations.csv> [<kind> <file.csv>]...
//     kind: bridges | catalog | index | any detail kind
//   issuer-master merge <run_id> [as_of]
//   issuer-master gc
//   issuer-master run-id
//
// Exit codes: 0 ok, 1 failed (state rolled back or untouched), 2 rollback
// failed, 3 configuration or usage error.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use std::env;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use issuer_master::delta::new_run_id;
use issuer_master::ingest::{read_bridges, read_catalog, read_detail, read_index_events, read_observations};
use issuer_master::{
    partition_rows, Config, DeltaStore, DeltaTable, HubRepo, MergeCoordinator, TableData,
};

const EXIT_FAILED: i32 = 1;
const EXIT_USAGE: i32 = 3;

const USAGE: &str = "\
usage:
  issuer-master worker <run_id> <chunk_id> <observations.csv> [<kind> <file.csv>]...
      kind: bridges | catalog | index | a detail kind
  issuer-master merge <run_id> [as_of YYYY-MM-DD]
  issuer-master gc
  issuer-master run-id";

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            error!(error = %e, "invalid configuration");
            std::process::exit(EXIT_USAGE);
        }
    };
    init_logging(&config.log_filter);

    let code = match dispatch(&args, &config).await {
        Ok(code) => code,
        Err(e) => {
            error!("command failed: {e:#}");
            EXIT_FAILED
        }
    };
    std::process::exit(code);
}

/// `RUST_LOG` wins over the configured filter.
fn init_logging(fallback: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

async fn dispatch(args: &[String], config: &Config) -> Result<i32> {
    match args.get(1).map(String::as_str) {
        Some("worker") if args.len() >= 5 && (args.len() - 5) % 2 == 0 => {
            let remote = match connect(config) {
                Some(remote) => remote,
                None => return Ok(EXIT_USAGE),
            };
            run_worker(remote, config, &args[2], &args[3], Path::new(&args[4]), &args[5..]).await
        }
        Some("merge") if args.len() == 3 || args.len() == 4 => {
            let as_of = match args.get(3) {
                Some(s) => match NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                    Ok(d) => d,
                    Err(_) => {
                        eprintln!("❌ as_of must be YYYY-MM-DD, got '{s}'");
                        return Ok(EXIT_USAGE);
                    }
                },
                None => Utc::now().date_naive(),
            };
            let remote = match connect(config) {
                Some(remote) => remote,
                None => return Ok(EXIT_USAGE),
            };
            Ok(run_merge(remote, config, &args[2], as_of).await)
        }
        Some("gc") if args.len() == 2 => {
            let remote = match connect(config) {
                Some(remote) => remote,
                None => return Ok(EXIT_USAGE),
            };
            run_gc(remote, config).await
        }
        Some("run-id") if args.len() == 2 => {
            println!("{}", new_run_id(Utc::now()));
            Ok(0)
        }
        _ => {
            eprintln!("{USAGE}");
            Ok(EXIT_USAGE)
        }
    }
}

fn connect(config: &Config) -> Option<Arc<HubRepo>> {
    match HubRepo::new(&config.remote) {
        Ok(repo) => Some(Arc::new(repo)),
        Err(e) => {
            error!(error = %e, "cannot set up the remote repository (is ISSUER_MASTER_REPO set?)");
            None
        }
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

async fn run_worker(
    remote: Arc<HubRepo>,
    config: &Config,
    run_id: &str,
    chunk_id: &str,
    observations_csv: &Path,
    extra: &[String],
) -> Result<i32> {
    let mut deltas = DeltaStore::new(remote, config);

    let observations = read_observations(observations_csv)?;
    deltas
        .write_delta(&DeltaTable::Observations, run_id, chunk_id, TableData::Observations(observations))
        .await
        .context("writing observations delta")?;

    for pair in extra.chunks(2) {
        let (kind, file) = (pair[0].as_str(), Path::new(&pair[1]));
        let fixed = match kind {
            "bridges" => Some((DeltaTable::Bridges, TableData::Bridges(read_bridges(file)?))),
            "catalog" => Some((DeltaTable::Catalog, TableData::Catalog(read_catalog(file)?))),
            "index" => Some((DeltaTable::IndexEvents, TableData::IndexHistory(read_index_events(file)?))),
            _ => None,
        };
        if let Some((table, data)) = fixed {
            deltas
                .write_delta(&table, run_id, chunk_id, data)
                .await
                .with_context(|| format!("writing {} delta", table.file_name()))?;
            continue;
        }

        for (bin, frame) in partition_rows(read_detail(file)?) {
            let table = DeltaTable::Detail {
                kind: kind.to_string(),
                bin,
            };
            deltas
                .write_delta(&table, run_id, chunk_id, TableData::Detail(frame))
                .await
                .with_context(|| format!("writing {} delta", table.file_name()))?;
        }
    }

    let marker = deltas.mark_chunk_done(run_id, chunk_id).await?;
    println!("✅ Chunk {run_id}/{chunk_id} sealed ({} delta files)", marker.tables.len());
    Ok(0)
}

async fn run_merge(remote: Arc<HubRepo>, config: &Config, run_id: &str, as_of: NaiveDate) -> i32 {
    let mut coordinator = MergeCoordinator::new(remote, config);
    match coordinator.run(run_id, as_of).await {
        Ok(report) => {
            println!("✅ {}", report.summary());
            println!("   {}", report.stats.summary());
            0
        }
        Err(e) => {
            eprintln!("❌ {e}");
            e.exit_code()
        }
    }
}

async fn run_gc(remote: Arc<HubRepo>, config: &Config) -> Result<i32> {
    let mut deltas = DeltaStore::new(remote, config);
    let removed = deltas.cleanup_expired(Utc::now(), config.delta_ttl).await?;
    info!(runs = removed.len(), "expired delta cleanup done");
    println!("🧹 Removed deltas of {} expired runs", removed.len());
    Ok(0)
}
