use crate::config::AppConfig;
use crate::db::connection::DbPool;
use crate::store::SqliteDocumentStore;
use crate::ws::events::EventBroadcaster;
use backup_engine::BackupService;
use std::sync::Arc;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub events: EventBroadcaster,
    pub service: Arc<BackupService>,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let events = EventBroadcaster::new();
        let store = Arc::new(SqliteDocumentStore::new(db.clone()));
        let service = Arc::new(BackupService::new(
            config.engine.clone(),
            store,
            Arc::new(events.clone()),
        ));
        Self {
            db,
            config,
            events,
            service,
        }
    }
}
