use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mythrill_sync::application::ports::LocalDurableStore;
use mythrill_sync::application::services::{OfflineSyncService, OfflineSyncServiceTrait};
use mythrill_sync::domain::value_objects::{EntityFields, EntityKey, OriginatorId};
use mythrill_sync::infrastructure::network::ConnectivityMonitor;
use mythrill_sync::infrastructure::offline::{SyncTriggerJob, metrics};
use mythrill_sync::infrastructure::remote::InMemoryDocumentStore;
use mythrill_sync::infrastructure::storage::{MemoryDurableStore, SqliteDurableStore};
use mythrill_sync::shared::AppConfig;
use mythrill_sync::shared::logging::init_logging;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "offline_sync_harness")]
#[command(about = "Drive the offline sync engine through an offline/online cycle", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database URL (defaults to the platform data directory)
    #[arg(long, env = "MYTHRILL_SYNC_DATABASE_URL")]
    database_url: Option<String>,

    /// Keep everything in memory instead of SQLite
    #[arg(long)]
    in_memory: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "MYTHRILL_SYNC_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "MYTHRILL_SYNC_JSON_LOGS")]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Mutate an entity while offline, reconnect and print the result
    Scenario {
        /// Entity type (remote collection)
        #[arg(long, default_value = "characters")]
        entity_type: String,
        /// Entity id
        #[arg(long, default_value = "char-1")]
        entity_id: String,
        /// Field mutations applied in order while offline (JSON objects)
        #[arg(long = "mutation", default_values_t = [r#"{"hp":40}"#.to_string(), r#"{"mana":10}"#.to_string()])]
        mutations: Vec<String>,
        /// Seconds to wait for the queue to drain after reconnecting
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
    /// Print the persisted queue and sync status
    Inspect,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::from_env();
    if let Some(url) = cli.database_url.clone() {
        config.storage.database_url = url;
    }
    if let Some(level) = cli.log_level.clone() {
        config.logging.level = level;
    }
    config.logging.json |= cli.json_logs;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    init_logging(&config.logging)?;
    info!("Starting offline sync harness v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn LocalDurableStore> = if cli.in_memory {
        Arc::new(MemoryDurableStore::new())
    } else {
        Arc::new(
            SqliteDurableStore::connect(&config.storage)
                .await
                .context("failed to open local store")?,
        )
    };

    match cli.command {
        Commands::Scenario {
            entity_type,
            entity_id,
            mutations,
            timeout_secs,
        } => {
            let key = EntityKey::parse(&entity_type, &entity_id).map_err(anyhow::Error::msg)?;
            let mutations = mutations
                .iter()
                .map(|raw| EntityFields::from_json_str(raw).map_err(anyhow::Error::msg))
                .collect::<Result<Vec<_>>>()?;
            run_scenario(store, config, key, mutations, timeout_secs).await?
        }
        Commands::Inspect => inspect(store, config).await?,
    }

    Ok(())
}

async fn run_scenario(
    store: Arc<dyn LocalDurableStore>,
    config: AppConfig,
    key: EntityKey,
    mutations: Vec<EntityFields>,
    timeout_secs: u64,
) -> Result<()> {
    let remote = InMemoryDocumentStore::new();
    remote
        .external_write(
            &key,
            EntityFields::new(json!({"hp": 10, "mana": 0, "name": "Aria"}))
                .map_err(anyhow::Error::msg)?,
        )
        .await;

    let monitor = Arc::new(ConnectivityMonitor::new(false));
    let service = OfflineSyncService::bootstrap(
        store,
        Arc::new(remote.clone()),
        monitor.clone(),
        config.sync.clone(),
    )
    .await?;
    let _triggers = SyncTriggerJob::new(service.coordinator(), monitor.clone(), config.sync).start();

    let originator = OriginatorId::new(uuid::Uuid::new_v4().to_string()).map_err(anyhow::Error::msg)?;
    for mutation in mutations {
        service
            .mutate_entity(key.clone(), mutation, originator.clone())
            .await?;
    }
    print_json("offline", &service.get_sync_status().await?)?;

    monitor.set_online(true);
    tokio::time::timeout(Duration::from_secs(timeout_secs), async {
        loop {
            match service.get_sync_status().await {
                Ok(status) if status.pending_action_count == 0 && !status.is_syncing => break,
                _ => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await
    .context("queue did not drain in time")?;

    print_json("status", &service.get_sync_status().await?)?;
    print_json("entity", &service.get_entity(&key).await?)?;
    print_json("remote", &remote.document(&key).await)?;
    print_json("metrics", &metrics::snapshot())?;
    Ok(())
}

async fn inspect(store: Arc<dyn LocalDurableStore>, config: AppConfig) -> Result<()> {
    let monitor = Arc::new(ConnectivityMonitor::new(false));
    let service = OfflineSyncService::bootstrap(
        store,
        Arc::new(InMemoryDocumentStore::new()),
        monitor,
        config.sync,
    )
    .await?;

    print_json("status", &service.get_sync_status().await?)?;
    print_json("pending", &service.list_pending_actions(None).await?)?;
    print_json("entities", &service.list_entities().await?)?;
    Ok(())
}

fn print_json<T: serde::Serialize>(label: &str, value: &T) -> Result<()> {
    println!("{label}: {}", serde_json::to_string_pretty(value)?);
    Ok(())
}
