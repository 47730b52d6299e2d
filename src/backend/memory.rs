//! In-memory backend implementation.
//!
//! Implements the table, storage and auth traits over plain collections with
//! the same filter, ordering and range semantics as the hosted endpoints. Used
//! by the test suite and by `--offline` runs of the CLI.

use super::error::{BackendError, BackendResult};
use super::traits::{AuthClient, SignUp, StorageClient, TableClient};
use super::types::{Filter, SelectRequest, SelectResponse};
use crate::models::{Session, User};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Map, Value};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

const BASE_URL: &str = "memory://phongtro";

#[derive(Default)]
struct MemoryData {
    tables: HashMap<String, Vec<Value>>,
    next_ids: HashMap<String, i64>,
    objects: HashMap<(String, String), (Vec<u8>, String)>,
    users: HashMap<String, StoredUser>,
    /// access token -> user id
    tokens: HashMap<String, String>,
    /// refresh token -> user id
    refresh_tokens: HashMap<String, String>,
    failing_tables: HashSet<String>,
    failing_selects: HashSet<String>,
}

struct StoredUser {
    password: String,
    user: User,
}

/// In-memory backend. Clones share the same data.
#[derive(Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<MemoryData>>,
    select_calls: Arc<AtomicU64>,
    latency: Arc<RwLock<HashMap<String, Duration>>>,
    auto_confirm: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty backend that confirms sign-ups immediately.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(MemoryData::default())),
            select_calls: Arc::new(AtomicU64::new(0)),
            latency: Arc::new(RwLock::new(HashMap::new())),
            auto_confirm: true,
        }
    }

    /// Sign-ups stay unconfirmed and cannot sign in.
    pub fn requiring_email_confirmation(mut self) -> Self {
        self.auto_confirm = false;
        self
    }

    /// Backend pre-populated with a handful of listings and tag options.
    pub fn with_demo_data() -> Self {
        let backend = Self::new();
        backend.seed(
            "rooms",
            vec![
                demo_room("Phòng trọ khép kín gần ĐH Quốc Gia", "144 Xuân Thủy, Cầu Giấy", 2_500_000, 20.0, "2024-03-01T08:00:00Z"),
                demo_room("Studio full nội thất", "25 Trần Thái Tông, Cầu Giấy", 4_800_000, 28.0, "2024-03-05T08:00:00Z"),
                demo_room("Phòng giá rẻ cho sinh viên", "12 Ngõ 165 Chùa Bộc, Đống Đa", 1_600_000, 14.0, "2024-02-20T08:00:00Z"),
                demo_room("Căn hộ mini ban công", "8 Tô Hiến Thành, Hai Bà Trưng", 6_500_000, 35.0, "2024-03-10T08:00:00Z"),
                demo_room("Chung cư 2 phòng ngủ", "Vinhomes Gardenia, Nam Từ Liêm", 12_000_000, 70.0, "2024-03-12T08:00:00Z"),
                demo_room("Phòng trọ có gác xép", "45 Hồ Tùng Mậu, Cầu Giấy", 2_000_000, 18.0, "2024-01-15T08:00:00Z"),
            ],
        );
        backend.seed("amenities", vec![json!({"name": "Wifi"}), json!({"name": "Điều hòa"}), json!({"name": "Máy giặt"})]);
        backend.seed("targets", vec![json!({"name": "Sinh viên"}), json!({"name": "Người đi làm"})]);
        backend.seed("surroundings", vec![json!({"name": "Gần chợ"}), json!({"name": "Gần trường học"})]);
        backend
    }

    /// Insert rows directly, assigning ids and timestamps like `insert` does.
    pub fn seed(&self, table: &str, rows: Vec<Value>) -> Vec<Value> {
        let mut data = self.data.write().expect("memory backend lock poisoned");
        rows.into_iter()
            .map(|row| data.store_row(table, row))
            .collect()
    }

    /// Every row currently stored in `table`
    pub fn rows(&self, table: &str) -> Vec<Value> {
        let data = self.data.read().expect("memory backend lock poisoned");
        data.tables.get(table).cloned().unwrap_or_default()
    }

    /// Make subsequent inserts into `table` fail with a server error.
    pub fn fail_inserts_into(&self, table: &str) {
        let mut data = self.data.write().expect("memory backend lock poisoned");
        data.failing_tables.insert(table.to_string());
    }

    /// Make subsequent selects from `table` fail with a bad-request error.
    pub fn fail_selects_from(&self, table: &str) {
        let mut data = self.data.write().expect("memory backend lock poisoned");
        data.failing_selects.insert(table.to_string());
    }

    /// Delay selects on `table`; used to provoke out-of-order responses.
    pub fn set_select_latency(&self, table: &str, latency: Duration) {
        let mut map = self.latency.write().expect("memory backend lock poisoned");
        map.insert(table.to_string(), latency);
    }

    pub fn select_calls(&self) -> u64 {
        self.select_calls.load(Ordering::SeqCst)
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        let data = self.data.read().expect("memory backend lock poisoned");
        data.objects
            .get(&(bucket.to_string(), path.to_string()))
            .map(|(bytes, _)| bytes.clone())
    }

    pub fn object_count(&self) -> usize {
        let data = self.data.read().expect("memory backend lock poisoned");
        data.objects.len()
    }

    /// Register a user directly with the given metadata.
    pub fn add_user(&self, email: &str, password: &str, metadata: Value) -> User {
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            phone: None,
            email_confirmed_at: Some(Utc::now()),
            user_metadata: metadata,
            identities: vec![crate::models::Identity {
                provider: "email".into(),
                identity_data: json!({ "email": email }),
            }],
        };
        let mut data = self.data.write().expect("memory backend lock poisoned");
        data.users.insert(
            email.to_lowercase(),
            StoredUser {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        user
    }

    fn lock_err() -> BackendError {
        BackendError::Decode("memory backend lock poisoned".into())
    }

    fn user_for_token(&self, access_token: &str) -> BackendResult<User> {
        let data = self.data.read().map_err(|_| Self::lock_err())?;
        let user_id = data
            .tokens
            .get(access_token)
            .ok_or(BackendError::Status {
                status: 401,
                message: "invalid JWT".into(),
            })?;
        data.users
            .values()
            .find(|stored| &stored.user.id == user_id)
            .map(|stored| stored.user.clone())
            .ok_or(BackendError::Unauthenticated)
    }
}

impl MemoryData {
    fn store_row(&mut self, table: &str, row: Value) -> Value {
        let mut object = match row {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        };

        let next = self.next_ids.entry(table.to_string()).or_insert(1);
        match object.get("id").and_then(Value::as_i64) {
            Some(id) if id >= *next => *next = id + 1,
            Some(_) => {}
            None if !object.contains_key("id") => {
                object.insert("id".into(), json!(*next));
                *next += 1;
            }
            None => {}
        }
        object
            .entry("created_at")
            .or_insert_with(|| json!(Utc::now().to_rfc3339()));

        let row = Value::Object(object);
        self.tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        row
    }

    fn issue_session(&mut self, user: User) -> Session {
        let access_token = format!("access-{}", Uuid::new_v4().simple());
        let refresh_token = format!("refresh-{}", Uuid::new_v4().simple());
        self.tokens.insert(access_token.clone(), user.id.clone());
        self.refresh_tokens
            .insert(refresh_token.clone(), user.id.clone());
        Session {
            access_token,
            refresh_token,
            expires_at: Some(Utc::now() + ChronoDuration::hours(1)),
            user,
        }
    }
}

/// Whether `row` satisfies `filter`
pub(crate) fn row_matches(filter: &Filter, row: &Value) -> bool {
    let field = |column: &str| row.get(column).unwrap_or(&Value::Null);
    match filter {
        Filter::Eq(c, v) => compare(field(c), v) == Some(CmpOrdering::Equal),
        Filter::Lt(c, v) => compare(field(c), v) == Some(CmpOrdering::Less),
        Filter::Lte(c, v) => matches!(
            compare(field(c), v),
            Some(CmpOrdering::Less | CmpOrdering::Equal)
        ),
        Filter::Gt(c, v) => compare(field(c), v) == Some(CmpOrdering::Greater),
        Filter::Gte(c, v) => matches!(
            compare(field(c), v),
            Some(CmpOrdering::Greater | CmpOrdering::Equal)
        ),
        Filter::ILike(c, pattern) => field(c)
            .as_str()
            .map(|s| ilike(s, pattern))
            .unwrap_or(false),
        Filter::In(c, values) => values
            .iter()
            .any(|v| compare(field(c), v) == Some(CmpOrdering::Equal)),
        Filter::Or(inner) => inner.iter().any(|f| row_matches(f, row)),
    }
}

/// Compare two JSON scalars; `None` when they are not comparable (nulls, mixed types).
fn compare(left: &Value, right: &Value) -> Option<CmpOrdering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        // Filter values typed in as text against numeric columns
        (Value::Number(a), Value::String(b)) => a.as_f64()?.partial_cmp(&b.parse::<f64>().ok()?),
        (Value::String(a), Value::Number(b)) => a.parse::<f64>().ok()?.partial_cmp(&b.as_f64()?),
        _ => None,
    }
}

/// Case-insensitive LIKE with `%` wildcards
fn ilike(value: &str, pattern: &str) -> bool {
    let value = value.to_lowercase();
    let pattern = pattern.to_lowercase();
    let parts: Vec<&str> = pattern.split('%').collect();
    if parts.len() == 1 {
        return value == pattern;
    }

    let mut rest = value.as_str();
    let last = parts.len() - 1;
    for (idx, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if idx == 0 {
            if !rest.starts_with(part) {
                return false;
            }
            rest = &rest[part.len()..];
        } else if idx == last {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

/// Order for sorting rows; nulls sort last in either direction.
fn order_rows(a: &Value, b: &Value, column: &str, ascending: bool) -> CmpOrdering {
    let left = a.get(column).unwrap_or(&Value::Null);
    let right = b.get(column).unwrap_or(&Value::Null);
    match (left.is_null(), right.is_null()) {
        (true, true) => CmpOrdering::Equal,
        (true, false) => CmpOrdering::Greater,
        (false, true) => CmpOrdering::Less,
        _ => {
            let ord = compare(left, right).unwrap_or(CmpOrdering::Equal);
            if ascending {
                ord
            } else {
                ord.reverse()
            }
        }
    }
}

/// Keep only the requested columns; `*` keeps everything.
fn project(row: &Value, columns: &str) -> Value {
    let wanted: Vec<&str> = columns
        .split(',')
        .map(|c| c.trim().trim_matches('"'))
        .filter(|c| !c.is_empty())
        .collect();
    if wanted.iter().any(|c| *c == "*") {
        return row.clone();
    }
    let mut out = Map::new();
    for column in wanted {
        if let Some(value) = row.get(column) {
            out.insert(column.to_string(), value.clone());
        }
    }
    Value::Object(out)
}

#[async_trait]
impl TableClient for MemoryBackend {
    async fn select(&self, request: &SelectRequest) -> BackendResult<SelectResponse> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        let latency = self
            .latency
            .read()
            .map_err(|_| Self::lock_err())?
            .get(&request.table)
            .copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let data = self.data.read().map_err(|_| Self::lock_err())?;
        if data.failing_selects.contains(&request.table) {
            return Err(BackendError::Status {
                status: 400,
                message: format!("select from {} failed", request.table),
            });
        }
        let mut rows: Vec<Value> = data
            .tables
            .get(&request.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| request.filters.iter().all(|f| row_matches(f, row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        rows.sort_by(|a, b| {
            request
                .order
                .iter()
                .map(|o| order_rows(a, b, &o.column, o.ascending))
                .find(|ord| *ord != CmpOrdering::Equal)
                .unwrap_or(CmpOrdering::Equal)
        });

        let total = rows.len() as u64;
        let page: Vec<Value> = match request.range {
            Some(range) => rows
                .iter()
                .skip(range.from as usize)
                .take(range.len() as usize)
                .map(|row| project(row, &request.columns))
                .collect(),
            None => rows.iter().map(|row| project(row, &request.columns)).collect(),
        };

        Ok(SelectResponse {
            rows: page,
            count: request.exact_count.then_some(total),
        })
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> BackendResult<Vec<Value>> {
        let mut data = self.data.write().map_err(|_| Self::lock_err())?;
        if data.failing_tables.contains(table) {
            return Err(BackendError::Status {
                status: 500,
                message: format!("insert into {} failed", table),
            });
        }
        Ok(rows
            .into_iter()
            .map(|row| data.store_row(table, row))
            .collect())
    }

    async fn upsert(&self, table: &str, rows: Vec<Value>) -> BackendResult<Vec<Value>> {
        let mut data = self.data.write().map_err(|_| Self::lock_err())?;
        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let position = row.get("id").and_then(|id| {
                data.tables
                    .get(table)
                    .and_then(|rows| rows.iter().position(|r| r.get("id") == Some(id)))
            });
            let existing = position.and_then(|pos| {
                data.tables
                    .get_mut(table)
                    .and_then(|rows| rows.get_mut(pos))
            });
            match existing {
                Some(Value::Object(target)) => {
                    if let Value::Object(patch) = row {
                        target.extend(patch);
                    }
                    stored.push(Value::Object(target.clone()));
                }
                _ => stored.push(data.store_row(table, row)),
            }
        }
        Ok(stored)
    }

    async fn update(&self, table: &str, patch: Value, filters: &[Filter]) -> BackendResult<()> {
        let Value::Object(patch) = patch else {
            return Err(BackendError::Decode("update patch must be an object".into()));
        };
        let mut data = self.data.write().map_err(|_| Self::lock_err())?;
        if let Some(rows) = data.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|row| filters.iter().all(|f| row_matches(f, row))) {
                if let Value::Object(target) = row {
                    target.extend(patch.clone());
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> BackendResult<()> {
        let mut data = self.data.write().map_err(|_| Self::lock_err())?;
        if let Some(rows) = data.tables.get_mut(table) {
            rows.retain(|row| !filters.iter().all(|f| row_matches(f, row)));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageClient for MemoryBackend {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> BackendResult<()> {
        let mut data = self.data.write().map_err(|_| Self::lock_err())?;
        data.objects.insert(
            (bucket.to_string(), path.to_string()),
            (bytes, content_type.to_string()),
        );
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", BASE_URL, bucket, path)
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> BackendResult<()> {
        let mut data = self.data.write().map_err(|_| Self::lock_err())?;
        for path in paths {
            data.objects.remove(&(bucket.to_string(), path.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthClient for MemoryBackend {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session> {
        let mut data = self.data.write().map_err(|_| Self::lock_err())?;
        let user = match data.users.get(&email.to_lowercase()) {
            Some(stored) if stored.password == password => stored.user.clone(),
            _ => {
                return Err(BackendError::Status {
                    status: 400,
                    message: "Invalid login credentials".into(),
                })
            }
        };
        if user.email_confirmed_at.is_none() {
            return Err(BackendError::Status {
                status: 400,
                message: "Email not confirmed".into(),
            });
        }
        Ok(data.issue_session(user))
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> BackendResult<SignUp> {
        let mut data = self.data.write().map_err(|_| Self::lock_err())?;
        let key = email.to_lowercase();
        if data.users.contains_key(&key) {
            return Err(BackendError::Status {
                status: 422,
                message: "User already registered".into(),
            });
        }
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            phone: None,
            email_confirmed_at: self.auto_confirm.then(Utc::now),
            user_metadata: metadata,
            identities: vec![crate::models::Identity {
                provider: "email".into(),
                identity_data: json!({ "email": email }),
            }],
        };
        data.users.insert(
            key,
            StoredUser {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        let session = self.auto_confirm.then(|| data.issue_session(user.clone()));
        Ok(SignUp { user, session })
    }

    async fn sign_out(&self, access_token: &str) -> BackendResult<()> {
        let mut data = self.data.write().map_err(|_| Self::lock_err())?;
        if let Some(user_id) = data.tokens.remove(access_token) {
            data.refresh_tokens.retain(|_, id| id != &user_id);
        }
        Ok(())
    }

    async fn current_user(&self, access_token: &str) -> BackendResult<User> {
        self.user_for_token(access_token)
    }

    async fn refresh_session(&self, refresh_token: &str) -> BackendResult<Session> {
        let mut data = self.data.write().map_err(|_| Self::lock_err())?;
        let user_id = data
            .refresh_tokens
            .remove(refresh_token)
            .ok_or(BackendError::Status {
                status: 400,
                message: "Invalid Refresh Token".into(),
            })?;
        let user = data
            .users
            .values()
            .find(|stored| stored.user.id == user_id)
            .map(|stored| stored.user.clone())
            .ok_or(BackendError::Unauthenticated)?;
        Ok(data.issue_session(user))
    }

    async fn update_user(&self, access_token: &str, metadata: Value) -> BackendResult<User> {
        let user = self.user_for_token(access_token)?;
        let mut data = self.data.write().map_err(|_| Self::lock_err())?;
        let stored = data
            .users
            .values_mut()
            .find(|stored| stored.user.id == user.id)
            .ok_or(BackendError::Unauthenticated)?;
        if let (Value::Object(target), Value::Object(patch)) =
            (&mut stored.user.user_metadata, metadata.clone())
        {
            target.extend(patch);
        } else {
            stored.user.user_metadata = metadata;
        }
        Ok(stored.user.clone())
    }

    fn oauth_url(&self, provider: &str, redirect_to: &str) -> BackendResult<String> {
        let url = url::Url::parse_with_params(
            &format!("{}/auth/v1/authorize", BASE_URL),
            &[("provider", provider), ("redirect_to", redirect_to)],
        )
        .map_err(|e| BackendError::Config(e.to_string()))?;
        Ok(url.to_string())
    }
}

fn demo_room(title: &str, address: &str, price: i64, area: f64, created_at: &str) -> Value {
    json!({
        "title": title,
        "address": address,
        "price": price,
        "area": area,
        "city": "Hà Nội",
        "status": "available",
        "banner": null,
        "created_at": created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::Order;

    #[test]
    fn ilike_wildcards() {
        assert!(ilike("144 Xuân Thủy, Cầu Giấy", "%cầu giấy%"));
        assert!(ilike("Cầu Giấy", "cầu%"));
        assert!(!ilike("Đống Đa", "%cầu%"));
        assert!(ilike("abc", "abc"));
        assert!(!ilike("abcd", "abc"));
        assert!(ilike("a-b-c", "a%b%c"));
    }

    #[tokio::test]
    async fn select_filters_orders_and_counts() {
        let backend = MemoryBackend::with_demo_data();
        let request = SelectRequest::new("rooms")
            .columns("id, title, price")
            .filter(Filter::gte("price", 2_000_000))
            .filter(Filter::lte("price", 5_000_000))
            .order(Order::asc("price"))
            .range(0, 1)
            .exact_count();

        let response = backend.select(&request).await.unwrap();
        assert_eq!(response.count, Some(3));
        let prices: Vec<i64> = response
            .rows
            .iter()
            .map(|r| r["price"].as_i64().unwrap())
            .collect();
        assert_eq!(prices, vec![2_000_000, 2_500_000]);
        assert!(response.rows[0].get("address").is_none());
    }

    #[tokio::test]
    async fn insert_assigns_ids_and_delete_removes() {
        let backend = MemoryBackend::new();
        let rows = backend
            .insert("room_images", vec![json!({"room_id": 1, "image_url": "a"}), json!({"room_id": 1, "image_url": "b"})])
            .await
            .unwrap();
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[1]["id"], json!(2));

        backend
            .delete("room_images", &[Filter::eq("id", 1)])
            .await
            .unwrap();
        assert_eq!(backend.rows("room_images").len(), 1);
    }

    #[tokio::test]
    async fn upsert_merges_by_id() {
        let backend = MemoryBackend::new();
        backend
            .upsert("profiles", vec![json!({"id": "u1", "name": "A", "role": "renter"})])
            .await
            .unwrap();
        backend
            .upsert("profiles", vec![json!({"id": "u1", "name": "B"})])
            .await
            .unwrap();
        let rows = backend.rows("profiles");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("B"));
        assert_eq!(rows[0]["role"], json!("renter"));
    }

    #[tokio::test]
    async fn unconfirmed_users_cannot_sign_in() {
        let backend = MemoryBackend::new().requiring_email_confirmation();
        let outcome = backend.sign_up("a@b.vn", "secret1", json!({})).await.unwrap();
        assert!(outcome.session.is_none());
        let err = backend.sign_in_with_password("a@b.vn", "secret1").await.unwrap_err();
        assert_eq!(err.user_message(), "Email not confirmed");
    }
}
