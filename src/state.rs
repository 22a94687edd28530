use std::sync::Arc;

use crate::db::DbService;
use crate::error::Result;
use crate::storage::ObjectStore;
use crate::transfer::FileTransferService;

#[derive(Debug, Clone)]
pub struct AppState {
    pub db: DbService,
    pub transfer: FileTransferService,
}

impl AppState {
    /// The composition root builds the collaborators once and injects them
    /// here, nothing in the request paths reaches for globals.
    pub async fn new(db_path: &str, store: Arc<dyn ObjectStore>, directory: &str) -> Result<Self> {
        let db = DbService::new(db_path).await?;
        let transfer = FileTransferService::new(store, db.clone(), directory);
        Ok(Self { db, transfer })
    }
}
