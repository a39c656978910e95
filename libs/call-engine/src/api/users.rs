use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::api::ApiContext;

#[derive(Debug, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// Resolves a user id to something worth rendering next to a call. A
/// failed lookup is not an error for the engine — it labels the call with
/// the raw id instead.
pub trait UserDirectory: Send + Sync {
    fn display_name<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Option<String>>;
}

pub struct HttpUserDirectory {
    ctx: Arc<ApiContext>,
}

impl HttpUserDirectory {
    pub fn new(ctx: Arc<ApiContext>) -> Self {
        Self { ctx }
    }
}

impl UserDirectory for HttpUserDirectory {
    fn display_name<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Option<String>> {
        Box::pin(async move {
            let url = format!("{}/users/{}", self.ctx.base_url, user_id);

            let mut req = self.ctx.client.get(&url);
            if let Some(auth) = self.ctx.auth_header().await {
                req = req.header("Authorization", auth);
            }

            let res = match req.send().await {
                Ok(res) => res,
                Err(e) => {
                    tracing::warn!(component = "api.users", user_id = %user_id, error = %e, "user lookup failed");
                    return None;
                }
            };

            if !res.status().is_success() {
                tracing::warn!(
                    component = "api.users",
                    user_id = %user_id,
                    status = %res.status(),
                    "user lookup rejected"
                );
                return None;
            }

            res.json::<UserProfile>().await.ok().map(|p| p.username)
        })
    }
}
