use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arbor::config::{Config, RemoteTarget};
use arbor::db::RecordDatabase;
use arbor::models::NodeId;
use arbor::persist::{ArtifactStorage, FileStorage, RestoreGate, TreeRepository};
use arbor::service::TreeService;
use arbor::sync::{
    Fingerprint, HttpRecordStore, Reconciler, RemoteStore, SystemClock, TrackedArtifact,
};
use arbor::{api, render};

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "Editable content tree mirrored to a durable remote record")]
struct Cli {
    /// Config file (defaults to <config dir>/arbor/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore if needed, start the sync watcher and serve the HTTP API
    Serve {
        /// Port for HTTP API (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Write a backup bundle of the local tree
    Export {
        /// Destination file
        file: PathBuf,
    },
    /// Replace the local tree with a backup bundle or bare store record
    Import {
        /// Backup file
        file: PathBuf,
    },
    /// Print the tree as ASCII art
    Tree {
        /// Node to start from (defaults to the root)
        #[arg(long)]
        from: Option<String>,
    },
    /// Run the startup restore check and one sync tick, then exit
    SyncOnce,
    /// Show local artifact and remote record status
    Status,
}

/// Initialize tracing with output to stderr so command output stays clean.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "arbor=debug,tower_http=debug".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_remote(config: &Config) -> anyhow::Result<Option<Arc<dyn RemoteStore>>> {
    match config.remote_target() {
        RemoteTarget::Http {
            url,
            table,
            api_key,
        } => {
            let timeout = Duration::from_secs(config.remote_timeout_secs.max(1));
            let store = HttpRecordStore::new(&url, &table, api_key, timeout)
                .context("Failed to build remote record client")?;
            tracing::info!("Mirroring to {}", store.table_url());
            Ok(Some(Arc::new(store)))
        }
        RemoteTarget::Sqlite(path) => {
            let db = RecordDatabase::open(path.clone())?;
            db.migrate()?;
            tracing::info!("Mirroring to record database {}", path.display());
            Ok(Some(Arc::new(db)))
        }
        RemoteTarget::Disabled => Ok(None),
    }
}

/// Track the tree artifact, reporting through `gate` if given, plus every
/// configured extra artifact.
fn build_reconciler(
    config: &Config,
    storage: Arc<dyn ArtifactStorage>,
    gate: Option<RestoreGate>,
) -> anyhow::Result<Option<Reconciler>> {
    let Some(remote) = build_remote(config)? else {
        return Ok(None);
    };

    let mut tree = TrackedArtifact::new(config.record_name.clone(), storage);
    if let Some(gate) = gate {
        tree = tree.with_gate(gate);
    }
    let mut reconciler =
        Reconciler::new(remote, Arc::new(SystemClock), config.sync_policy()).track(tree);
    for extra in &config.extra_artifacts {
        tracing::info!(
            "Also mirroring {} as '{}'",
            extra.path.display(),
            extra.record_name
        );
        reconciler = reconciler.track(TrackedArtifact::new(
            extra.record_name.clone(),
            Arc::new(FileStorage::new(&extra.path)),
        ));
    }
    Ok(Some(reconciler))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::load(cli.config.as_deref())?;
    let storage: Arc<dyn ArtifactStorage> = Arc::new(FileStorage::new(&config.data_path));
    let repo = TreeRepository::new(storage.clone(), &config.root_name);

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            let port = port.unwrap_or(config.port);

            // Restore before accepting any mutation, so a wiped disk is never
            // mistaken for an empty tree. If the remote is down, writes stay
            // blocked by the gate until a later tick settles it.
            let gate = RestoreGate::new();
            let mut service = TreeService::new(repo, config.history_depth);
            let sync = match build_reconciler(&config, storage.clone(), Some(gate.clone()))? {
                Some(mut reconciler) => {
                    for outcome in reconciler.restore_check().await {
                        if let Err(e) = outcome.result {
                            tracing::warn!(
                                "Startup restore of {} failed, writes wait for the next tick: {}",
                                outcome.artifact,
                                e
                            );
                        }
                    }
                    service = service.with_gate(gate);
                    Some(reconciler.spawn())
                }
                None => {
                    tracing::warn!("No remote configured; local changes are not mirrored");
                    None
                }
            };

            let app = api::create_router(service);

            let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
            tracing::info!("Arbor listening on http://127.0.0.1:{}", port);

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            if let Some(sync) = sync {
                sync.shutdown().await;
            }
        }
        Commands::Export { file } => {
            let tree = repo
                .peek()?
                .with_context(|| format!("No tree stored at {}", config.data_path.display()))?;
            let service = TreeService::new(repo, config.history_depth);
            let bundle = service.export_backup()?;
            std::fs::write(&file, serde_json::to_vec_pretty(&bundle)?)
                .with_context(|| format!("Failed to write {}", file.display()))?;
            println!("Exported {} nodes to {}", tree.len(), file.display());
        }
        Commands::Import { file } => {
            let payload = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let service = TreeService::new(repo, config.history_depth);
            let tree = service.import_backup(&payload)?;
            println!("Imported {} nodes from {}", tree.len(), file.display());
        }
        Commands::Tree { from } => {
            let tree = repo
                .peek()?
                .with_context(|| format!("No tree stored at {}", config.data_path.display()))?;
            let from = from.map(NodeId::from).unwrap_or_else(|| tree.root_id());
            print!("{}", render::render_tree(&tree, &from)?);
        }
        Commands::SyncOnce => {
            let mut reconciler = build_reconciler(&config, storage, None)?
                .context("No remote configured (set ARBOR_REMOTE_URL or ARBOR_RECORD_DB)")?;
            let mut outcomes = reconciler.restore_check().await;
            outcomes.extend(reconciler.tick().await);
            for outcome in outcomes {
                match outcome.result {
                    Ok(()) => println!("{}: {:?}", outcome.artifact, outcome.action),
                    Err(e) => println!("{}: {:?} failed: {}", outcome.artifact, outcome.action, e),
                }
            }
        }
        Commands::Status => {
            println!("Local artifact: {}", config.data_path.display());
            match storage.read()? {
                Some(bytes) => println!(
                    "  {} bytes, {}",
                    bytes.len(),
                    Fingerprint::of(&bytes).as_str()
                ),
                None => println!("  missing"),
            }

            match config.remote_target() {
                RemoteTarget::Http { url, table, .. } => {
                    println!("Remote: {}/{} (record '{}')", url, table, config.record_name)
                }
                RemoteTarget::Sqlite(path) => {
                    println!("Remote: record database {}", path.display());
                    let db = RecordDatabase::open(path)?;
                    db.migrate()?;
                    for record in db.list_records()? {
                        println!(
                            "  {} ({} bytes, updated {})",
                            record.name,
                            record.size,
                            record.updated_at.to_rfc3339()
                        );
                    }
                }
                RemoteTarget::Disabled => println!("Remote: disabled"),
            }

            for extra in &config.extra_artifacts {
                let size = FileStorage::new(&extra.path)
                    .read()?
                    .map(|bytes| format!("{} bytes", bytes.len()))
                    .unwrap_or_else(|| "missing".to_string());
                println!(
                    "Extra artifact '{}': {} ({})",
                    extra.record_name,
                    extra.path.display(),
                    size
                );
            }
        }
    }

    Ok(())
}
