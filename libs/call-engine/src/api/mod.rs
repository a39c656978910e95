pub mod chat;
pub mod users;

use std::sync::Arc;

use reqwest::Client;
use tokio::sync::RwLock;

/// Shared HTTP state for the backend collaborators (user directory, chat
/// message sink).
pub struct ApiContext {
    pub client: Client,
    pub base_url: String,
    pub token: Arc<RwLock<Option<String>>>,
}

impl ApiContext {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url,
            token: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn set_token(&self, token: Option<String>) {
        let mut write_guard = self.token.write().await;
        *write_guard = token;
    }

    pub async fn auth_header(&self) -> Option<String> {
        self.token.read().await.clone().map(|t| format!("Bearer {}", t))
    }
}
