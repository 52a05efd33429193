use std::sync::Arc;
use tracing::{error, info, warn};

use store_sync::config::AppConfig;
use store_sync::ledger::JsonRpcLedgerClient;
use store_sync::schema::{RpcSchemaResolver, SchemaRegistry};
use store_sync::snapshot::HttpSnapshotSource;
use store_sync::storage::{ReactiveTableStore, SqliteIndexer};
use store_sync::sync::{ProgressCallback, RetryPolicy, SyncProgress, SyncSession};

const DEFAULT_CONFIG_PATH: &str = "store-sync.json";

#[tokio::main(flavor = "current_thread")]
async fn main() {
	// Initialize tracing subscriber with debug logging for the sync pipeline
	let mut filter = tracing_subscriber::EnvFilter::from_default_env()
		.add_directive(tracing::Level::INFO.into());
	if let Ok(directive) = "store_sync::sync=debug".parse() {
		filter = filter.add_directive(directive);
	}
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let config_path = std::env::args()
		.nth(1)
		.unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
	let config = match AppConfig::load(&config_path) {
		Ok(config) => config,
		Err(e) => {
			error!("Failed to load configuration from {}: {}", config_path, e);
			return;
		}
	};
	info!(
		"Starting store sync for {} from {}",
		config.session.store_address, config.rpc_url
	);

	let ledger = match JsonRpcLedgerClient::new(config.rpc_url.clone(), config.ws_url.clone()) {
		Ok(client) => Arc::new(client),
		Err(e) => {
			error!("Failed to create ledger client: {}", e);
			return;
		}
	};

	let resolver = Arc::new(RpcSchemaResolver::new(
		ledger.clone(),
		config.session.store_address,
	));
	let registry = Arc::new(SchemaRegistry::new(
		resolver,
		RetryPolicy::new(config.session.retry.clone()),
	));
	for schema in config.tables.clone() {
		let table_id = schema.table_id;
		if let Err(e) = registry.register(schema).await {
			warn!("Skipping configured table {}: {}", table_id, e);
		}
	}
	info!("Registered {} configured table(s)", registry.known_tables().len());

	let store = Arc::new(ReactiveTableStore::new());
	let mut session = SyncSession::new(config.session.clone(), ledger, registry)
		.with_storage_adapter(store.clone());

	if let Some(path) = &config.sqlite_path {
		match SqliteIndexer::open(path) {
			Ok(indexer) => session = session.with_storage_adapter(Arc::new(indexer)),
			Err(e) => {
				error!("Failed to open indexer database {}: {}", path.display(), e);
				return;
			}
		}
	}

	if let Some(url) = &config.snapshot_url {
		match HttpSnapshotSource::new(url.clone()) {
			Ok(source) => session = session.with_snapshot_source(Arc::new(source)),
			Err(e) => warn!("Snapshot source unavailable, fetching history by range: {}", e),
		}
	}

	session.register_handler(Box::new(ProgressCallback::new(|progress: &SyncProgress| {
		info!(
			"[{}] {:.1}% {}",
			progress.step, progress.percentage, progress.message
		);
	})));

	let cancel = session.cancel_token();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!("Interrupted, stopping sync");
			cancel.cancel();
		}
	});

	match session.run().await {
		Ok(summary) => {
			info!(
				"Sync finished in {} at block {:?}: {} batches, {} operations applied, {} dropped",
				summary.final_step,
				summary.last_applied_block,
				summary.batches_applied,
				summary.operations_applied,
				summary.operations_dropped
			);
			for schema in config.tables.iter() {
				match store.records(&schema.table_id) {
					Ok(records) => info!("{}: {} record(s)", schema.table_id, records.len()),
					Err(e) => warn!("Failed to read {}: {}", schema.table_id, e),
				}
			}
		}
		Err(e) => {
			error!(
				"Sync failed (resume after block {:?}): {}",
				e.last_applied_block(),
				e
			);
		}
	}
}
