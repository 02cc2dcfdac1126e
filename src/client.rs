use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use secrecy::SecretString;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{
    self, DEFAULT_BASE_URL, DEFAULT_CLIENT_ID, DEFAULT_IDP_URL, PLANT_ACCESS_HEADER,
    PLANTS_PAGE_SIZE,
};
use crate::token::{CachedToken, Credentials, TokenCache};
use crate::types::TemporaryDuration;
use crate::{Error, Result};

const DEFAULT_IDENTITY_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);
const DEFAULT_PLANT_TOKEN_TTL: Duration = Duration::from_secs(12 * 60);
const DEFAULT_TOKEN_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Attempts are clamped to this range whatever the builder is given.
const MIN_ATTEMPTS: u32 = 2;
const MAX_ATTEMPTS: u32 = 5;

const ERROR_BODY_EXCERPT: usize = 200;

pub struct HovalClientBuilder {
    credentials: Credentials,
    base_url: String,
    idp_url: String,
    client_id: String,
    identity_token_ttl: Duration,
    plant_token_ttl: Duration,
    token_margin: Duration,
    max_attempts: u32,
    retry_backoff: Duration,
    timeout: Duration,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl HovalClientBuilder {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: Credentials {
                email: email.into(),
                password: SecretString::from(password.into()),
            },
            base_url: DEFAULT_BASE_URL.to_string(),
            idp_url: DEFAULT_IDP_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            identity_token_ttl: DEFAULT_IDENTITY_TOKEN_TTL,
            plant_token_ttl: DEFAULT_PLANT_TOKEN_TTL,
            token_margin: DEFAULT_TOKEN_MARGIN,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            timeout: DEFAULT_TIMEOUT,
            log_mode: None,
            log_path: None,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn idp_url(mut self, url: impl Into<String>) -> Self {
        self.idp_url = url.into();
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// Lifetime assumed when the identity provider does not declare one.
    pub fn identity_token_ttl(mut self, ttl: Duration) -> Self {
        self.identity_token_ttl = ttl;
        self
    }

    pub fn plant_token_ttl(mut self, ttl: Duration) -> Self {
        self.plant_token_ttl = ttl;
        self
    }

    /// Tokens are refreshed this long before they expire.
    pub fn token_margin(mut self, margin: Duration) -> Self {
        self.token_margin = margin;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.clamp(MIN_ATTEMPTS, MAX_ATTEMPTS);
        self
    }

    /// First retry delay; doubled on every further attempt.
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<HovalClient> {
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::api(format!("failed to build HTTP client: {e}")))?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, &path)?)),
            _ => None,
        };

        Ok(HovalClient {
            http,
            base_url: self.base_url,
            idp_url: self.idp_url,
            client_id: self.client_id,
            credentials: self.credentials,
            tokens: TokenCache::new(self.token_margin),
            identity_token_ttl: self.identity_token_ttl,
            plant_token_ttl: self.plant_token_ttl,
            max_attempts: self.max_attempts,
            retry_backoff: self.retry_backoff,
            logger,
        })
    }
}

/// Authenticated client for the Hoval Connect cloud API. Owns all token state.
pub struct HovalClient {
    http: reqwest::Client,
    base_url: String,
    idp_url: String,
    client_id: String,
    credentials: Credentials,
    tokens: TokenCache,
    identity_token_ttl: Duration,
    plant_token_ttl: Duration,
    max_attempts: u32,
    retry_backoff: Duration,
    logger: Option<Mutex<MessageLogger>>,
}

impl HovalClient {
    pub fn builder(email: impl Into<String>, password: impl Into<String>) -> HovalClientBuilder {
        HovalClientBuilder::new(email, password)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub(crate) fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    // -- Tokens --

    /// Cached identity token, fetched through the password grant when absent
    /// or inside the expiry margin.
    pub async fn identity_token(&self) -> Result<String> {
        let mut slot = self.tokens.identity.lock().await;
        if let Some(token) = slot.as_ref()
            && token.is_fresh(self.tokens.margin())
        {
            return Ok(token.value().to_string());
        }

        let (token, ttl) = self.fetch_identity_token().await?;
        *slot = Some(CachedToken::new(token.clone(), ttl));
        Ok(token)
    }

    async fn fetch_identity_token(&self) -> Result<(String, Duration)> {
        debug!(url = %self.idp_url, "requesting identity token");
        let form = protocol::password_grant_form(
            &self.client_id,
            &self.credentials.email,
            &self.credentials.password,
        );
        let resp = self
            .http
            .post(&self.idp_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                Error::api(format!(
                    "connection error during authentication: {}",
                    describe_transport(&e)
                ))
            })?;

        let status = resp.status().as_u16();
        if status == 400 || status == 401 {
            warn!(status, "identity provider rejected credentials");
            return Err(Error::Auth("invalid credentials".to_string()));
        }
        if !resp.status().is_success() {
            return Err(Error::api_status(status, "identity provider request failed"));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| Error::api(format!("malformed identity provider response: {e}")))?;
        let (token, expires_in) = protocol::parse_identity_response(&body)
            .ok_or_else(|| Error::api("identity provider response missing id_token"))?;

        let ttl = expires_in
            .map(Duration::from_secs)
            .unwrap_or(self.identity_token_ttl);
        debug!(ttl_secs = ttl.as_secs(), "identity token acquired");
        Ok((token, ttl))
    }

    /// Cached plant access token, fetched through the plant settings endpoint
    /// when absent or stale.
    pub async fn plant_access_token(&self, plant_id: &str) -> Result<String> {
        if let Some(token) = self.tokens.plant_token(plant_id) {
            return Ok(token);
        }
        let settings = self.get_plant_settings(plant_id).await?;
        protocol::parse_plant_token(&settings)
            .ok_or_else(|| Error::api("plant settings response missing token"))
    }

    /// Plant settings. Also refreshes the cached plant access token.
    pub async fn get_plant_settings(&self, plant_id: &str) -> Result<Value> {
        let path = protocol::plant_settings_path(plant_id);
        // Identity bearer only, this is where the plant token comes from.
        let settings = self
            .execute(Method::GET, &path, None, None, None, || self.identity_headers())
            .await?
            .ok_or_else(|| Error::api("empty plant settings response"))?;

        if let Some(token) = protocol::parse_plant_token(&settings) {
            trace!(plant_id, "plant access token refreshed");
            self.tokens
                .store_plant_token(plant_id, CachedToken::new(token, self.plant_token_ttl));
        }
        Ok(settings)
    }

    /// Forces full re-authentication on the next request.
    pub async fn invalidate_tokens(&self) {
        debug!("invalidating all tokens");
        self.tokens.clear_identity().await;
        self.tokens.clear_plant_tokens();
    }

    pub fn invalidate_plant_token(&self, plant_id: &str) {
        if self.tokens.remove_plant_token(plant_id) {
            debug!(plant_id, "plant access token invalidated");
        }
    }

    async fn identity_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let id_token = self.identity_token().await?;
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {id_token}"))?);
        Ok(headers)
    }

    async fn headers(&self, plant_id: Option<&str>) -> Result<HeaderMap> {
        let mut headers = self.identity_headers().await?;
        if let Some(plant_id) = plant_id {
            let pat = self.plant_access_token(plant_id).await?;
            headers.insert(PLANT_ACCESS_HEADER, header_value(&pat)?);
        }
        Ok(headers)
    }

    // -- Request funnel --

    /// Issues one authenticated call with the retry policy applied:
    /// a 401 drops the tokens and retries once with fresh ones, retryable
    /// statuses and transport failures back off up to `max_attempts`, any
    /// other failure status fails immediately. Empty bodies yield `None`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        plant_id: Option<&str>,
        params: Option<&[(&str, &str)]>,
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        self.execute(method, path, plant_id, params, body, || self.headers(plant_id))
            .await
    }

    /// Retry loop behind [`request`](Self::request). `headers` is called
    /// before every attempt so a retry after a 401 picks up fresh tokens.
    async fn execute<H, Fut>(
        &self,
        method: Method,
        path: &str,
        plant_id: Option<&str>,
        params: Option<&[(&str, &str)]>,
        body: Option<&Value>,
        headers: H,
    ) -> Result<Option<Value>>
    where
        H: Fn() -> Fut,
        Fut: Future<Output = Result<HeaderMap>>,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt: u32 = 0;
        let mut auth_retried = false;

        loop {
            let headers = headers().await?;
            let mut req = self.http.request(method.clone(), &url).headers(headers);
            if let Some(params) = params {
                req = req.query(params);
            }
            if let Some(body) = body {
                req = req.json(body);
            }

            self.log_request(method.as_str(), path, body);
            trace!(method = %method, path, attempt, "sending request");

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    let reason = describe_transport(&e);
                    if attempt + 1 < self.max_attempts {
                        debug!(path, attempt, error = %reason, "transport failure, retrying");
                        self.backoff(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    warn!(path, error = %reason, "giving up after transport failures");
                    return Err(Error::api(format!("{method} {path}: {reason}")));
                }
            };

            let status = resp.status().as_u16();

            if status == 401 {
                self.drop_tokens_after_rejection(plant_id).await;
                if !auth_retried {
                    debug!(path, "token rejected, retrying with fresh tokens");
                    auth_retried = true;
                    continue;
                }
                warn!(path, "token rejected twice");
                return Err(Error::Auth(format!("{method} {path}: authentication failed")));
            }

            if protocol::is_retryable(status) {
                if attempt + 1 < self.max_attempts {
                    debug!(path, status, attempt, "transient status, retrying");
                    self.backoff(attempt).await;
                    attempt += 1;
                    continue;
                }
                warn!(path, status, "retries exhausted");
                return Err(Error::api_status(
                    status,
                    format!("{method} {path}: retries exhausted"),
                ));
            }

            let text = resp
                .text()
                .await
                .map_err(|e| Error::api(format!("{method} {path}: {}", describe_transport(&e))))?;

            if !(200..300).contains(&status) {
                let excerpt: String = text.chars().take(ERROR_BODY_EXCERPT).collect();
                return Err(Error::api_status(status, format!("{method} {path}: {excerpt}")));
            }

            if status == 204 || text.trim().is_empty() {
                self.log_response(path, status, &Value::Null);
                return Ok(None);
            }

            let value: Value = serde_json::from_str(&text)
                .map_err(|e| Error::api(format!("{method} {path}: malformed response: {e}")))?;
            self.log_response(path, status, &value);
            return Ok(Some(value));
        }
    }

    async fn drop_tokens_after_rejection(&self, plant_id: Option<&str>) {
        self.tokens.clear_identity().await;
        if let Some(plant_id) = plant_id {
            self.tokens.remove_plant_token(plant_id);
        }
    }

    async fn backoff(&self, attempt: u32) {
        let delay = self.retry_backoff.saturating_mul(2u32.saturating_pow(attempt));
        tokio::time::sleep(delay).await;
    }

    fn log_request(&self, method: &str, path: &str, body: Option<&Value>) {
        if let Some(logger) = &self.logger {
            let mut logger = logger.lock().unwrap_or_else(|e| e.into_inner());
            logger.log_request(method, path, body);
        }
    }

    fn log_response(&self, path: &str, status: u16, body: &Value) {
        if let Some(logger) = &self.logger {
            let mut logger = logger.lock().unwrap_or_else(|e| e.into_inner());
            logger.log_response(path, status, body);
        }
    }

    async fn get(
        &self,
        path: &str,
        plant_id: Option<&str>,
        params: Option<&[(&str, &str)]>,
    ) -> Result<Value> {
        Ok(self
            .request(Method::GET, path, plant_id, params, None)
            .await?
            .unwrap_or(Value::Null))
    }

    // -- Reads --

    pub async fn get_plants(&self) -> Result<Value> {
        self.get(
            protocol::plants_path(),
            None,
            Some(&[("size", PLANTS_PAGE_SIZE), ("page", "0")]),
        )
        .await
    }

    pub async fn get_circuits(&self, plant_id: &str) -> Result<Value> {
        self.get(&protocol::circuits_path(plant_id), Some(plant_id), None)
            .await
    }

    pub async fn get_live_values(
        &self,
        plant_id: &str,
        circuit_path: &str,
        circuit_type: &str,
    ) -> Result<Value> {
        self.get(
            &protocol::live_values_path(plant_id),
            Some(plant_id),
            Some(&[("circuitPath", circuit_path), ("circuitType", circuit_type)]),
        )
        .await
    }

    pub async fn get_programs(&self, plant_id: &str, circuit_path: &str) -> Result<Value> {
        self.get(
            &protocol::programs_path(plant_id, circuit_path),
            Some(plant_id),
            None,
        )
        .await
    }

    pub async fn get_weather(&self, plant_id: &str) -> Result<Value> {
        self.get(&protocol::weather_path(plant_id), Some(plant_id), None)
            .await
    }

    pub async fn get_latest_event(&self, plant_id: &str) -> Result<Value> {
        self.get(&protocol::latest_event_path(plant_id), Some(plant_id), None)
            .await
    }

    pub async fn get_events(&self, plant_id: &str) -> Result<Value> {
        self.get(&protocol::events_path(plant_id), Some(plant_id), None)
            .await
    }

    // -- Writes --

    /// Switches the circuit operation mode (`standby`, `constant`, `manual`, ...).
    pub async fn set_circuit_mode(
        &self,
        plant_id: &str,
        circuit_path: &str,
        mode: &str,
        value: Option<f64>,
    ) -> Result<()> {
        debug!(plant_id, circuit_path, mode, "setting circuit mode");
        let body = protocol::mode_value_data(value);
        self.request(
            Method::PUT,
            &protocol::circuit_mode_path(plant_id, circuit_path, mode),
            Some(plant_id),
            None,
            body.as_ref(),
        )
        .await?;
        Ok(())
    }

    /// Updates arbitrary circuit settings, e.g. `targetAirVolume`.
    pub async fn set_circuit_settings(
        &self,
        plant_id: &str,
        circuit_path: &str,
        settings: &Map<String, Value>,
    ) -> Result<()> {
        debug!(plant_id, circuit_path, keys = settings.len(), "updating circuit settings");
        let body = protocol::settings_data(settings);
        self.request(
            Method::PUT,
            &protocol::circuit_settings_path(plant_id, circuit_path),
            Some(plant_id),
            None,
            Some(&body),
        )
        .await?;
        Ok(())
    }

    /// Overrides the current setpoint for a limited time.
    pub async fn set_temporary_change(
        &self,
        plant_id: &str,
        circuit_path: &str,
        value: f64,
        duration: TemporaryDuration,
    ) -> Result<()> {
        debug!(
            plant_id,
            circuit_path,
            value,
            duration = duration.as_hoval_str(),
            "temporary change"
        );
        let body = protocol::temporary_change_data(value, duration.as_hoval_str());
        self.request(
            Method::POST,
            &protocol::temporary_change_path(plant_id, circuit_path),
            Some(plant_id),
            None,
            Some(&body),
        )
        .await?;
        Ok(())
    }

    pub async fn set_program(
        &self,
        plant_id: &str,
        circuit_path: &str,
        program: &str,
    ) -> Result<()> {
        debug!(plant_id, circuit_path, program, "activating program");
        self.request(
            Method::POST,
            &protocol::set_program_path(plant_id, circuit_path, program),
            Some(plant_id),
            None,
            None,
        )
        .await?;
        Ok(())
    }

    /// Drops any manual or temporary state so the circuit resumes its program.
    pub async fn reset_circuit(&self, plant_id: &str, circuit_path: &str) -> Result<()> {
        debug!(plant_id, circuit_path, "resetting circuit");
        self.request(
            Method::POST,
            &protocol::reset_path(plant_id, circuit_path),
            Some(plant_id),
            None,
            None,
        )
        .await?;
        Ok(())
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|_| Error::api("token contains invalid header characters"))
}

fn describe_transport(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}
