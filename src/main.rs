use std::sync::Arc;

use colored::Colorize;

pub mod allocator;
pub mod cache;
pub mod config;
pub mod datastore;
pub mod error;
pub mod event_log;
pub mod external_ip;
pub mod initialization;
pub mod logging;
pub mod quota;
pub mod stats;
pub mod storage;
pub mod store;
pub mod types;

use datastore::Datastore;
use store::{MemoryStore, PersistentStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    initialization::setup_logging().await;

    let config = config::DatastoreConfig::read().map_err(|e| format!("{:?}", e))?;
    logging::print_banner("controller datastore starting", |s| s.cyan());

    let backend: Arc<dyn PersistentStore> = match config.db_backend {
        config::DbBackend::Memory => Arc::new(MemoryStore::new()),
        config::DbBackend::Sqlite => Arc::new(SqliteStore::connect(&config.persistent_uri).await?),
    };

    let datastore = Datastore::initialize(backend).await?;
    logging::print_banner(
        &format!(
            "datastore ready: {} tenants, {} instances",
            datastore.tenant_count(),
            datastore.instance_count()
        ),
        |s| s.green(),
    );

    // The HTTP/API surface and the southbound stat-pipeline transport
    // are out-of-scope external collaborators; this process only
    // owns the datastore core and keeps it resident for them to attach
    // to through whatever IPC mechanism wraps this crate.
    std::future::pending::<()>().await;
    Ok(())
}
