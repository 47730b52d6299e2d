use super::error::{BackendError, BackendResult};
use super::traits::{AuthClient, SignUp, StorageClient, TableClient};
use super::types::{Filter, SelectRequest, SelectResponse};
use crate::config::Config;
use crate::models::{Session, User};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use reqwest::header::{HeaderMap, CONTENT_RANGE};
use reqwest::{Client, Request, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Client for the hosted backend's REST surface: tables, storage and auth.
///
/// Cloning is cheap; `authorized` derives a handle that sends a user's access
/// token instead of the anon key.
#[derive(Clone)]
pub struct RestBackend {
    client: Client,
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
}

impl RestBackend {
    pub fn new(config: &Config) -> BackendResult<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("phongtro/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.supabase_url.clone(),
            anon_key: config.anon_key.clone(),
            access_token: None,
        })
    }

    /// Handle that authenticates table and storage calls as the session's user
    pub fn authorized(&self, session: Option<&Session>) -> Self {
        Self {
            access_token: session.map(|s| s.access_token.clone()),
            ..self.clone()
        }
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, endpoint)
    }

    fn storage_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path)
    }

    fn with_keys(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        request.header("apikey", &self.anon_key).bearer_auth(bearer)
    }

    fn with_token(&self, request: RequestBuilder, access_token: &str) -> RequestBuilder {
        request.header("apikey", &self.anon_key).bearer_auth(access_token)
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> BackendResult<Response> {
        debug!("Sending request to {}", url);
        let response = request.send().await.map_err(|source| BackendError::Http {
            url: url.to_string(),
            source,
        })?;
        check_status(response, url).await
    }

    async fn read_json<T: DeserializeOwned>(response: Response, url: &str) -> BackendResult<T> {
        let text = response.text().await.map_err(|source| BackendError::Http {
            url: url.to_string(),
            source,
        })?;
        if text.trim().is_empty() {
            return Ok(serde_json::from_value(Value::Null)?);
        }
        serde_json::from_str(&text)
            .map_err(|e| BackendError::Decode(format!("{} from {}", e, url)))
    }

    /// GET on the table endpoint; the row range and exact count travel as headers.
    fn select_request(&self, request: &SelectRequest) -> BackendResult<Request> {
        let url = self.rest_url(&request.table);
        let mut builder = self
            .with_keys(self.client.get(&url))
            .query(&request.query_pairs());
        if let Some(range) = request.range {
            builder = builder
                .header("Range-Unit", "items")
                .header("Range", format!("{}-{}", range.from, range.to));
        }
        if request.exact_count {
            builder = builder.header("Prefer", "count=exact");
        }
        builder
            .build()
            .map_err(|source| BackendError::Http { url, source })
    }

    async fn write_rows(&self, table: &str, rows: Vec<Value>, prefer: &str) -> BackendResult<Vec<Value>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.rest_url(table);
        let request = self
            .with_keys(self.client.post(&url))
            .header("Prefer", prefer)
            .json(&rows);
        let response = self.send(request, &url).await?;
        let inserted: Option<Vec<Value>> = Self::read_json(response, &url).await?;
        Ok(inserted.unwrap_or_default())
    }
}

/// Turn an error status into `BackendError::Status` carrying the server message.
async fn check_status(response: Response, url: &str) -> BackendResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!("{} returned status {}", url, status);
    Err(BackendError::Status {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// Pull the human-readable part out of an error body.
pub(crate) fn error_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|key| v.get(*key).and_then(Value::as_str))
        })
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string())
}

fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range)
}

/// A range past the last row is answered with 416 rather than an empty page.
fn past_last_row(status: StatusCode, count: Option<u64>) -> Option<SelectResponse> {
    (status == StatusCode::RANGE_NOT_SATISFIABLE).then(|| SelectResponse {
        rows: Vec::new(),
        count,
    })
}

/// Total from a `Content-Range` header: `0-4/12` and `*/0` both carry it.
pub(crate) fn parse_content_range(header: &str) -> Option<u64> {
    header.rsplit_once('/').and_then(|(_, total)| total.trim().parse().ok())
}

/// Token endpoint payload
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .or_else(|| expiry_from_seconds(self.expires_in));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

#[async_trait]
impl TableClient for RestBackend {
    async fn select(&self, request: &SelectRequest) -> BackendResult<SelectResponse> {
        let http_request = self.select_request(request)?;
        let url = http_request.url().to_string();
        debug!("Selecting from {}: {:?}", request.table, request.query_pairs());
        let response = self
            .client
            .execute(http_request)
            .await
            .map_err(|source| BackendError::Http {
                url: url.clone(),
                source,
            })?;

        let count = content_range_total(response.headers());
        if let Some(empty) = past_last_row(response.status(), count) {
            return Ok(empty);
        }

        let response = check_status(response, &url).await?;
        let rows: Option<Vec<Value>> = Self::read_json(response, &url).await?;
        Ok(SelectResponse {
            rows: rows.unwrap_or_default(),
            count,
        })
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> BackendResult<Vec<Value>> {
        self.write_rows(table, rows, "return=representation").await
    }

    async fn upsert(&self, table: &str, rows: Vec<Value>) -> BackendResult<Vec<Value>> {
        self.write_rows(
            table,
            rows,
            "resolution=merge-duplicates,return=representation",
        )
        .await
    }

    async fn update(&self, table: &str, patch: Value, filters: &[Filter]) -> BackendResult<()> {
        let url = self.rest_url(table);
        let pairs: Vec<(String, String)> = filters.iter().map(Filter::to_query_pair).collect();
        let request = self
            .with_keys(self.client.patch(&url))
            .query(&pairs)
            .header("Prefer", "return=minimal")
            .json(&patch);
        self.send(request, &url).await?;
        Ok(())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> BackendResult<()> {
        let url = self.rest_url(table);
        let pairs: Vec<(String, String)> = filters.iter().map(Filter::to_query_pair).collect();
        let request = self.with_keys(self.client.delete(&url)).query(&pairs);
        self.send(request, &url).await?;
        Ok(())
    }
}

#[async_trait]
impl StorageClient for RestBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> BackendResult<()> {
        let url = self.storage_url(bucket, path);
        let request = self
            .with_keys(self.client.post(&url))
            .header("x-upsert", "true")
            .header("cache-control", "max-age=3600")
            .header("content-type", content_type)
            .body(bytes);
        self.send(request, &url).await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, path)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> BackendResult<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let url = format!("{}/storage/v1/object/{}", self.base_url, bucket);
        let request = self
            .with_keys(self.client.delete(&url))
            .json(&json!({ "prefixes": paths }));
        self.send(request, &url).await?;
        Ok(())
    }
}

#[async_trait]
impl AuthClient for RestBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session> {
        let url = self.auth_url("token?grant_type=password");
        let request = self
            .with_token(self.client.post(&url), &self.anon_key)
            .json(&json!({ "email": email, "password": password }));
        let response = self.send(request, &url).await?;
        let token: TokenResponse = Self::read_json(response, &url).await?;
        Ok(token.into_session())
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> BackendResult<SignUp> {
        let url = self.auth_url("signup");
        let request = self
            .with_token(self.client.post(&url), &self.anon_key)
            .json(&json!({ "email": email, "password": password, "data": metadata }));
        let response = self.send(request, &url).await?;
        let body: Value = Self::read_json(response, &url).await?;

        // Auto-confirming projects answer with a full token payload.
        if body.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(body)?;
            let session = token.into_session();
            return Ok(SignUp {
                user: session.user.clone(),
                session: Some(session),
            });
        }
        let user: User = serde_json::from_value(body)?;
        Ok(SignUp {
            user,
            session: None,
        })
    }

    async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        let url = self.auth_url("logout");
        let request = self.with_token(self.client.post(&url), access_token);
        self.send(request, &url).await?;
        Ok(())
    }

    async fn current_user(&self, access_token: &str) -> BackendResult<User> {
        let url = self.auth_url("user");
        let request = self.with_token(self.client.get(&url), access_token);
        let response = self.send(request, &url).await?;
        Self::read_json(response, &url).await
    }

    async fn refresh_session(&self, refresh_token: &str) -> BackendResult<Session> {
        let url = self.auth_url("token?grant_type=refresh_token");
        let request = self
            .with_token(self.client.post(&url), &self.anon_key)
            .json(&json!({ "refresh_token": refresh_token }));
        let response = self.send(request, &url).await?;
        let token: TokenResponse = Self::read_json(response, &url).await?;
        Ok(token.into_session())
    }

    async fn update_user(&self, access_token: &str, metadata: Value) -> BackendResult<User> {
        let url = self.auth_url("user");
        let request = self
            .with_token(self.client.put(&url), access_token)
            .json(&json!({ "data": metadata }));
        let response = self.send(request, &url).await?;
        Self::read_json(response, &url).await
    }

    fn oauth_url(&self, provider: &str, redirect_to: &str) -> BackendResult<String> {
        let url = url::Url::parse_with_params(
            &self.auth_url("authorize"),
            &[("provider", provider), ("redirect_to", redirect_to)],
        )
        .map_err(|e| BackendError::Config(format!("invalid project URL: {}", e)))?;
        Ok(url.to_string())
    }
}

/// Expiry of a session given the seconds-from-now the server reported
pub(crate) fn expiry_from_seconds(expires_in: Option<i64>) -> Option<DateTime<Utc>> {
    expires_in.map(|secs| Utc::now() + ChronoDuration::seconds(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Order;
    use reqwest::header::HeaderValue;

    fn backend() -> RestBackend {
        let config = Config {
            supabase_url: "https://demo.supabase.co".into(),
            anon_key: "anon-key".into(),
            images_bucket: "room-images".into(),
            session_file: "session.json".into(),
        };
        RestBackend::new(&config).unwrap()
    }

    #[test]
    fn content_range_total() {
        assert_eq!(parse_content_range("0-4/12"), Some(12));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("0-4/*"), None);
    }

    #[test]
    fn error_message_prefers_server_text() {
        assert_eq!(
            error_message(r#"{"code":"23502","message":"null value in column"}"#),
            "null value in column"
        );
        assert_eq!(
            error_message(r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#),
            "Invalid login credentials"
        );
        assert_eq!(error_message("Bad Gateway\n"), "Bad Gateway");
    }

    #[test]
    fn public_and_oauth_urls() {
        let backend = backend();
        assert_eq!(
            backend.public_url("room-images", "rooms/1/a.webp"),
            "https://demo.supabase.co/storage/v1/object/public/room-images/rooms/1/a.webp"
        );
        let url = backend
            .oauth_url("google", "http://localhost:3000/oauth/callback")
            .unwrap();
        assert!(url.starts_with("https://demo.supabase.co/auth/v1/authorize?provider=google"));
        assert!(url.contains("redirect_to=http%3A%2F%2Flocalhost%3A3000%2Foauth%2Fcallback"));
    }

    #[test]
    fn token_response_prefers_absolute_expiry() {
        let token: TokenResponse = serde_json::from_value(json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": 3600,
            "expires_at": 1_700_000_000,
            "user": { "id": "u1" }
        }))
        .unwrap();
        let session = token.into_session();
        assert_eq!(session.expires_at.map(|t| t.timestamp()), Some(1_700_000_000));
    }

    #[test]
    fn select_sends_range_and_count_headers() {
        let request = SelectRequest::new("rooms")
            .columns("id,title")
            .filter(Filter::gt("price", 10_000_000))
            .order(Order::desc("created_at"))
            .range(12, 23)
            .exact_count();
        let http = backend().select_request(&request).unwrap();

        assert_eq!(http.method(), reqwest::Method::GET);
        assert_eq!(http.url().path(), "/rest/v1/rooms");
        let query: Vec<(String, String)> = http
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(query, request.query_pairs());

        let headers = http.headers();
        assert_eq!(headers["range"], "12-23");
        assert_eq!(headers["range-unit"], "items");
        assert_eq!(headers["prefer"], "count=exact");
        assert_eq!(headers["apikey"], "anon-key");
        assert_eq!(headers["authorization"], "Bearer anon-key");
    }

    #[test]
    fn plain_select_has_no_range_headers() {
        let session = Session {
            access_token: "user-token".into(),
            refresh_token: "r".into(),
            expires_at: None,
            user: serde_json::from_value(json!({ "id": "u1" })).unwrap(),
        };
        let http = backend()
            .authorized(Some(&session))
            .select_request(&SelectRequest::new("amenities"))
            .unwrap();
        let headers = http.headers();
        assert!(headers.get("range").is_none());
        assert!(headers.get("prefer").is_none());
        assert_eq!(headers["authorization"], "Bearer user-token");
        let query: Vec<(String, String)> = http
            .url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(query, vec![("select".to_string(), "*".to_string())]);
    }

    #[test]
    fn range_past_last_row_is_an_empty_page() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("*/14"));
        let count = super::content_range_total(&headers);
        assert_eq!(count, Some(14));

        assert_eq!(
            past_last_row(StatusCode::RANGE_NOT_SATISFIABLE, count),
            Some(SelectResponse { rows: Vec::new(), count: Some(14) })
        );
        assert_eq!(past_last_row(StatusCode::OK, count), None);
        assert_eq!(past_last_row(StatusCode::BAD_REQUEST, count), None);
    }

    #[test]
    fn missing_config_is_rejected() {
        let config = Config::from_lookup(|_| None);
        assert!(matches!(RestBackend::new(&config), Err(BackendError::Config(_))));
    }
}
