//! Tenant access token cache for the Feishu open-platform API.
//!
//! Fetched from `auth/v3/tenant_access_token/internal` with `app_id` +
//! `app_secret`, cached until shortly before its documented expiry so
//! concurrent sends don't all refetch at once.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{FeishuError, Result};

const TOKEN_URL: &str = "https://open.feishu.cn/open-apis/auth/v3/tenant_access_token/internal";
/// Refresh this long before the token's reported expiry to avoid racing it.
const EXPIRY_SAFETY_MARGIN: Duration = Duration::from_secs(60);

pub struct TenantTokenCache {
    app_id: String,
    app_secret: String,
    cached: Mutex<Option<(String, Instant)>>,
}

impl TenantTokenCache {
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            cached: Mutex::new(None),
        }
    }

    pub async fn get(&self, client: &reqwest::Client) -> Result<String> {
        if let Some((token, expiry)) = self.cached.lock().unwrap().clone() {
            if expiry > Instant::now() {
                return Ok(token);
            }
        }
        let resp: TokenResponse = client
            .post(TOKEN_URL)
            .json(&serde_json::json!({
                "app_id": self.app_id,
                "app_secret": self.app_secret,
            }))
            .send()
            .await?
            .json()
            .await?;

        if resp.code != 0 {
            return Err(FeishuError::TokenRequest(format!(
                "code {}: {}",
                resp.code, resp.msg
            )));
        }
        let token = resp
            .tenant_access_token
            .ok_or_else(|| FeishuError::TokenRequest("missing tenant_access_token".into()))?;
        let ttl = Duration::from_secs(resp.expire.unwrap_or(7200) as u64)
            .saturating_sub(EXPIRY_SAFETY_MARGIN);
        *self.cached.lock().unwrap() = Some((token.clone(), Instant::now() + ttl));
        Ok(token)
    }
}

#[derive(serde::Deserialize)]
struct TokenResponse {
    code: i64,
    msg: String,
    tenant_access_token: Option<String>,
    expire: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_cached_token_without_a_network_call() {
        let cache = TenantTokenCache::new("app", "secret");
        *cache.cached.lock().unwrap() = Some(("cached-token".to_string(), Instant::now() + Duration::from_secs(60)));

        let client = reqwest::Client::new();
        let token = cache.get(&client).await.unwrap();
        assert_eq!(token, "cached-token");
    }

    #[test]
    fn expired_cache_entry_is_not_treated_as_fresh() {
        let cache = TenantTokenCache::new("app", "secret");
        *cache.cached.lock().unwrap() = Some(("stale-token".to_string(), Instant::now() - Duration::from_secs(1)));
        let (_, expiry) = cache.cached.lock().unwrap().clone().unwrap();
        assert!(expiry <= Instant::now());
    }
}
