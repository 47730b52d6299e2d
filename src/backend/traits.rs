use super::error::BackendResult;
use super::types::{Filter, SelectRequest, SelectResponse};
use crate::models::{Session, User};
use async_trait::async_trait;
use serde_json::Value;

/// Table endpoints of the hosted database.
/// Row-level security and query execution live on the other side.
#[async_trait]
pub trait TableClient: Send + Sync {
    /// Filtered, ordered, range-limited read
    async fn select(&self, request: &SelectRequest) -> BackendResult<SelectResponse>;

    /// Insert rows in one batch and return them as stored
    async fn insert(&self, table: &str, rows: Vec<Value>) -> BackendResult<Vec<Value>>;

    /// Insert or merge on primary key
    async fn upsert(&self, table: &str, rows: Vec<Value>) -> BackendResult<Vec<Value>>;

    async fn update(&self, table: &str, patch: Value, filters: &[Filter]) -> BackendResult<()>;

    async fn delete(&self, table: &str, filters: &[Filter]) -> BackendResult<()>;
}

/// Object storage buckets
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Upload (overwriting) an object
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> BackendResult<()>;

    /// Public URL of an object; no request is made
    fn public_url(&self, bucket: &str, path: &str) -> String;

    async fn remove(&self, bucket: &str, paths: &[String]) -> BackendResult<()>;
}

/// What sign-up produced: a session when the project auto-confirms emails,
/// otherwise just the pending user.
#[derive(Debug, Clone)]
pub struct SignUp {
    pub user: User,
    pub session: Option<Session>,
}

/// Hosted authentication endpoints. Tokens are always passed explicitly.
#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session>;

    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> BackendResult<SignUp>;

    async fn sign_out(&self, access_token: &str) -> BackendResult<()>;

    async fn current_user(&self, access_token: &str) -> BackendResult<User>;

    async fn refresh_session(&self, refresh_token: &str) -> BackendResult<Session>;

    /// Merge `metadata` into the user's metadata
    async fn update_user(&self, access_token: &str, metadata: Value) -> BackendResult<User>;

    /// Authorization URL that starts an OAuth sign-in with `provider`
    fn oauth_url(&self, provider: &str, redirect_to: &str) -> BackendResult<String>;
}
