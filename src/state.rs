//! Application state shared across handlers and the scheduler.

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::notify::Notifier;
use crate::realtime::EventBus;

#[derive(Clone)]
pub struct AppState {
    /// Database connection
    pub db: DatabaseConnection,
    /// Outbound WhatsApp gateway
    pub notifier: Arc<dyn Notifier>,
    /// In-process event fan-out
    pub events: EventBus,
}

impl AppState {
    pub fn new(db: DatabaseConnection, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            db,
            notifier,
            events: EventBus::default(),
        }
    }

    /// Fire-and-forget WhatsApp send. Detached so no request or database
    /// transaction ever waits on the gateway.
    pub fn notify(&self, phone: &str, message: String) {
        let notifier = Arc::clone(&self.notifier);
        let phone = phone.to_string();
        tokio::spawn(async move {
            notifier.send(&phone, &message).await;
        });
    }
}

// Allow handlers that only need the connection to extract it directly
impl axum::extract::FromRef<AppState> for DatabaseConnection {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}
