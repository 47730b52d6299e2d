use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Availability of a room listing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    #[default]
    Available,
    /// Older rows were written as `occupied`, newer ones as `rented`.
    #[serde(alias = "occupied")]
    Rented,
    Hidden,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Available => "available",
            RoomStatus::Rented => "rented",
            RoomStatus::Hidden => "hidden",
        }
    }

    /// Badge text shown on listing cards
    pub fn badge(&self) -> &'static str {
        match self {
            RoomStatus::Available => "Còn trống",
            _ => "Đã thuê",
        }
    }

    /// Lenient parse used by form and CSV input; blank falls back to available.
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "" | "available" => Some(RoomStatus::Available),
            "rented" | "occupied" => Some(RoomStatus::Rented),
            "hidden" => Some(RoomStatus::Hidden),
            _ => None,
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rentable room as stored in the `rooms` table.
///
/// List queries select only a subset of columns, so everything except the id
/// falls back to a default when absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "de_price")]
    pub price: i64,
    #[serde(default)]
    pub area: Option<f64>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub ward: Option<String>,
    #[serde(default)]
    pub status: RoomStatus,
    #[serde(default)]
    pub banner: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Room {
    /// "Từ 2.5 triệu/tháng"
    pub fn price_label(&self) -> String {
        format!("Từ {:.1} triệu/tháng", self.price as f64 / 1_000_000.0)
    }
}

/// Row payload written on insert and on full edit saves.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoomDraft {
    pub title: String,
    pub description: Option<String>,
    pub price: i64,
    pub area: Option<f64>,
    pub address: String,
    pub city: Option<String>,
    pub district: Option<String>,
    pub ward: Option<String>,
    pub status: RoomStatus,
    pub banner: Option<String>,
}

/// Image attached to a room
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomImage {
    pub id: i64,
    #[serde(default)]
    pub room_id: i64,
    pub image_url: String,
    /// Storage path, known only for images uploaded in this session
    #[serde(skip)]
    pub path: Option<String>,
}

/// Named category that rooms can be associated with
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

/// The three tag groups and their join relations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagKind {
    Target,
    Surrounding,
    Amenity,
}

impl TagKind {
    pub const ALL: [TagKind; 3] = [TagKind::Target, TagKind::Surrounding, TagKind::Amenity];

    pub fn table(&self) -> &'static str {
        match self {
            TagKind::Target => "targets",
            TagKind::Surrounding => "surroundings",
            TagKind::Amenity => "amenities",
        }
    }

    pub fn join_table(&self) -> &'static str {
        match self {
            TagKind::Target => "room_targets",
            TagKind::Surrounding => "room_surroundings",
            TagKind::Amenity => "room_amenities",
        }
    }

    /// Foreign key column in the join table
    pub fn join_column(&self) -> &'static str {
        match self {
            TagKind::Target => "target_id",
            TagKind::Surrounding => "surrounding_id",
            TagKind::Amenity => "amenity_id",
        }
    }
}

/// Linked login identity (email, google, facebook, ...)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Identity {
    pub provider: String,
    #[serde(default)]
    pub identity_data: Value,
}

/// Authenticated user as returned by the auth endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email_confirmed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_metadata: Value,
    #[serde(default)]
    pub identities: Vec<Identity>,
}

impl User {
    /// String value from `user_metadata`, ignoring blanks
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.user_metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn metadata_role(&self) -> Option<Role> {
        self.meta_str("role").and_then(Role::parse)
    }
}

/// Signed-in session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: User,
}

/// Row in the `profiles` table; `id` equals the auth user id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "de_opt_string")]
    pub phone: Option<String>,
    #[serde(default, rename = "DoB")]
    pub dob: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Admin,
    Renter,
    Other(String),
}

impl Role {
    /// Roles are compared trimmed and case-insensitively; blank means no role.
    pub fn parse(raw: &str) -> Option<Self> {
        let role = raw.trim().to_lowercase();
        match role.as_str() {
            "" => None,
            "admin" => Some(Role::Admin),
            "renter" => Some(Role::Renter),
            _ => Some(Role::Other(role)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Renter => "renter",
            Role::Other(other) => other,
        }
    }
}

/// Postgres `numeric` columns may arrive as integers, floats or strings.
fn de_price<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .ok_or_else(|| serde::de::Error::custom("price out of range")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(|f| f.round() as i64)
            .map_err(serde::de::Error::custom),
        other => Err(serde::de::Error::custom(format!(
            "unexpected price value: {}",
            other
        ))),
    }
}

/// Phone numbers are sometimes stored as numbers.
fn de_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
