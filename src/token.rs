use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};

/// Account credentials, held for the lifetime of the client only.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

#[derive(Clone)]
pub(crate) struct CachedToken {
    value: SecretString,
    expires_at: Instant,
}

impl CachedToken {
    pub fn new(value: String, ttl: Duration) -> Self {
        Self {
            value: SecretString::from(value),
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn value(&self) -> &str {
        self.value.expose_secret()
    }

    /// Usable only while `now < expiry - margin`.
    pub fn is_fresh(&self, margin: Duration) -> bool {
        Instant::now() + margin < self.expires_at
    }
}

/// Identity token plus per-plant access tokens. The identity slot is an
/// async mutex so concurrent callers share one fetch.
pub(crate) struct TokenCache {
    pub identity: tokio::sync::Mutex<Option<CachedToken>>,
    plants: Mutex<HashMap<String, CachedToken>>,
    margin: Duration,
}

impl TokenCache {
    pub fn new(margin: Duration) -> Self {
        Self {
            identity: tokio::sync::Mutex::new(None),
            plants: Mutex::new(HashMap::new()),
            margin,
        }
    }

    pub fn margin(&self) -> Duration {
        self.margin
    }

    pub fn plant_token(&self, plant_id: &str) -> Option<String> {
        let plants = self.plants.lock().unwrap_or_else(|e| e.into_inner());
        plants
            .get(plant_id)
            .filter(|t| t.is_fresh(self.margin))
            .map(|t| t.value().to_string())
    }

    pub fn store_plant_token(&self, plant_id: &str, token: CachedToken) {
        let mut plants = self.plants.lock().unwrap_or_else(|e| e.into_inner());
        plants.insert(plant_id.to_string(), token);
    }

    pub fn remove_plant_token(&self, plant_id: &str) -> bool {
        let mut plants = self.plants.lock().unwrap_or_else(|e| e.into_inner());
        plants.remove(plant_id).is_some()
    }

    pub fn clear_plant_tokens(&self) {
        let mut plants = self.plants.lock().unwrap_or_else(|e| e.into_inner());
        plants.clear();
    }

    /// Waits out an in-flight fetch, then drops whatever it stored.
    pub async fn clear_identity(&self) {
        *self.identity.lock().await = None;
    }
}
