use std::sync::Arc;

use sqlx::SqlitePool;

use crate::notices::Messenger;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Shared secret the payment collaborator signs webhook deliveries with.
    /// Empty means the webhook endpoint rejects everything.
    pub webhook_secret: String,
    pub messenger: Arc<dyn Messenger>,
}
