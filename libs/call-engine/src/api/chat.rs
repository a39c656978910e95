use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::api::ApiContext;
use crate::error::CallError;

/// System chat message recording a call outcome in the call's room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLogEntry {
    pub room_id: String,
    pub content: String,
    pub created_at: String,
}

impl CallLogEntry {
    fn new(room_id: impl Into<String>, content: String) -> Self {
        Self {
            room_id: room_id.into(),
            content,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn answered(room_id: impl Into<String>, duration: Duration) -> Self {
        Self::new(
            room_id,
            format!("Chamada atendida ({})", format_duration(duration)),
        )
    }

    pub fn missed(room_id: impl Into<String>) -> Self {
        Self::new(room_id, "Chamada perdida".to_string())
    }

    pub fn declined(room_id: impl Into<String>) -> Self {
        Self::new(room_id, "Chamada recusada".to_string())
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// Appends system messages to a room's message log. Fire-and-forget from
/// the engine's point of view: failures are logged and swallowed at the
/// call site.
pub trait CallLogSink: Send + Sync {
    fn append(&self, entry: CallLogEntry) -> BoxFuture<'_, Result<(), CallError>>;
}

pub struct HttpCallLogSink {
    ctx: Arc<ApiContext>,
}

impl HttpCallLogSink {
    pub fn new(ctx: Arc<ApiContext>) -> Self {
        Self { ctx }
    }
}

#[derive(Debug, Serialize)]
struct SystemMessageRequest<'a> {
    content: &'a str,
    kind: &'static str,
    created_at: &'a str,
}

impl CallLogSink for HttpCallLogSink {
    fn append(&self, entry: CallLogEntry) -> BoxFuture<'_, Result<(), CallError>> {
        Box::pin(async move {
            let url = format!("{}/chat/rooms/{}/messages", self.ctx.base_url, entry.room_id);

            let mut req = self.ctx.client.post(&url).json(&SystemMessageRequest {
                content: &entry.content,
                kind: "call",
                created_at: &entry.created_at,
            });
            if let Some(auth) = self.ctx.auth_header().await {
                req = req.header("Authorization", auth);
            }

            let res = req
                .send()
                .await
                .map_err(|e| CallError::transport(format!("call log request failed: {e}")))?;

            if !res.status().is_success() {
                return Err(CallError::transport(format!(
                    "call log rejected with status {}",
                    res.status()
                )));
            }

            Ok(())
        })
    }
}
