use crate::backend::{BackendResult, Filter, Order, SelectRequest, TableClient};
use crate::models::{Room, RoomStatus, Tag, TagKind};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use tracing::{debug, info, warn};

/// A room with its gallery and tag names, as shown on the detail page
#[derive(Debug, Clone, PartialEq)]
pub struct RoomDetail {
    pub room: Room,
    pub images: Vec<String>,
    /// One entry per association row, in the order the join table returns them
    pub tags: BTreeMap<TagKind, Vec<String>>,
}

impl RoomDetail {
    pub fn tag_names(&self, kind: TagKind) -> &[String] {
        self.tags.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn bookable(&self) -> bool {
        self.room.status == RoomStatus::Available
    }

    pub fn render(&self) -> String {
        let room = &self.room;
        let mut out = String::new();
        let _ = writeln!(out, "{} [#{}]", room.title, room.id);
        let _ = writeln!(out, "{}", room.address);
        let place: Vec<&str> = [&room.ward, &room.district, &room.city]
            .into_iter()
            .filter_map(|part| part.as_deref())
            .collect();
        if !place.is_empty() {
            let _ = writeln!(out, "{}", place.join(", "));
        }
        let _ = write!(out, "{} · {}", room.price_label(), room.status.badge());
        if let Some(area) = room.area {
            let _ = write!(out, " · {} m²", area);
        }
        out.push('\n');
        if let Some(description) = &room.description {
            let _ = writeln!(out, "\n{}\n", description);
        }
        for (kind, label) in [
            (TagKind::Amenity, "Tiện ích"),
            (TagKind::Target, "Đối tượng"),
            (TagKind::Surrounding, "Môi trường xung quanh"),
        ] {
            let names = self.tag_names(kind);
            if !names.is_empty() {
                let _ = writeln!(out, "{}: {}", label, names.join(", "));
            }
        }
        let _ = writeln!(out, "Ảnh: {}", self.images.len());
        for url in &self.images {
            let _ = writeln!(out, "  {}", url);
        }
        if self.bookable() {
            let _ = writeln!(out, "Có thể đặt phòng");
        }
        out
    }
}

#[derive(Deserialize)]
struct ImageUrl {
    image_url: String,
}

/// Read at most one row; absence is `None`, not an error.
pub async fn maybe_single<T: for<'de> Deserialize<'de>>(
    table: &dyn TableClient,
    request: SelectRequest,
) -> BackendResult<Option<T>> {
    let response = table.select(&request.range(0, 0)).await?;
    match response.rows.into_iter().next() {
        Some(row) => Ok(Some(serde_json::from_value(row)?)),
        None => Ok(None),
    }
}

/// Load a room and its related rows. `Ok(None)` when the room does not exist.
/// Only the room lookup can fail; a relation that cannot be read comes back empty.
pub async fn load_room_detail(table: &dyn TableClient, room_id: i64) -> BackendResult<Option<RoomDetail>> {
    let room: Option<Room> = maybe_single(
        table,
        SelectRequest::new("rooms").filter(Filter::eq("id", room_id)),
    )
    .await?;
    let Some(room) = room else {
        info!("Room {} not found", room_id);
        return Ok(None);
    };

    let images = load_images(table, room_id).await.unwrap_or_else(|err| {
        warn!("Images for room {} unavailable: {}", room_id, err);
        Vec::new()
    });

    let mut tags = BTreeMap::new();
    for kind in TagKind::ALL {
        let names = load_tag_names(table, kind, room_id).await.unwrap_or_else(|err| {
            warn!("{} for room {} unavailable: {}", kind.join_table(), room_id, err);
            Vec::new()
        });
        tags.insert(kind, names);
    }

    debug!("Loaded room {} with {} images", room_id, images.len());
    Ok(Some(RoomDetail { room, images, tags }))
}

async fn load_images(table: &dyn TableClient, room_id: i64) -> BackendResult<Vec<String>> {
    table
        .select(
            &SelectRequest::new("room_images")
                .columns("image_url, room_id")
                .filter(Filter::eq("room_id", room_id))
                .order(Order::asc("id")),
        )
        .await?
        .rows
        .into_iter()
        .map(|row| serde_json::from_value::<ImageUrl>(row).map(|r| r.image_url))
        .collect::<Result<Vec<_>, _>>()
        .map_err(Into::into)
}

/// Names of the tags associated with a room, one per join row
async fn load_tag_names(table: &dyn TableClient, kind: TagKind, room_id: i64) -> BackendResult<Vec<String>> {
    let column = kind.join_column();
    let ids: Vec<i64> = table
        .select(
            &SelectRequest::new(kind.join_table())
                .columns(column)
                .filter(Filter::eq("room_id", room_id)),
        )
        .await?
        .rows
        .iter()
        .filter_map(|row| row.get(column).and_then(Value::as_i64))
        .collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut unique = ids.clone();
    unique.sort_unstable();
    unique.dedup();
    let names: HashMap<i64, String> = table
        .select(
            &SelectRequest::new(kind.table())
                .columns("id, name")
                .filter(Filter::is_in("id", unique)),
        )
        .await?
        .rows
        .into_iter()
        .map(serde_json::from_value::<Tag>)
        .map(|tag| tag.map(|t| (t.id, t.name)))
        .collect::<Result<_, _>>()?;

    Ok(ids.iter().filter_map(|id| names.get(id).cloned()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, SelectResponse};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[tokio::test]
    async fn missing_room_is_none() {
        let backend = MemoryBackend::new();
        assert!(load_room_detail(&backend, 42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn loads_images_and_tag_names() {
        let backend = MemoryBackend::with_demo_data();
        backend.seed(
            "room_images",
            vec![
                json!({"room_id": 1, "image_url": "https://img/1.webp"}),
                json!({"room_id": 1, "image_url": "https://img/2.webp"}),
                json!({"room_id": 2, "image_url": "https://img/other.webp"}),
            ],
        );
        backend.seed(
            "room_amenities",
            vec![json!({"room_id": 1, "amenity_id": 1}), json!({"room_id": 1, "amenity_id": 2})],
        );
        backend.seed("room_targets", vec![json!({"room_id": 1, "target_id": 1})]);

        let detail = load_room_detail(&backend, 1).await.unwrap().unwrap();
        assert_eq!(detail.images, vec!["https://img/1.webp", "https://img/2.webp"]);
        assert_eq!(detail.tag_names(TagKind::Amenity), ["Wifi", "Điều hòa"]);
        assert_eq!(detail.tag_names(TagKind::Target), ["Sinh viên"]);
        assert!(detail.tag_names(TagKind::Surrounding).is_empty());
        assert!(detail.bookable());
        assert!(detail.render().contains("Tiện ích: Wifi, Điều hòa"));
    }

    #[tokio::test]
    async fn unreadable_relations_come_back_empty() {
        let backend = MemoryBackend::with_demo_data();
        backend.seed("room_images", vec![json!({"room_id": 1, "image_url": "https://img/1.webp"})]);
        backend.seed("room_targets", vec![json!({"room_id": 1, "target_id": 2})]);
        backend.fail_selects_from("room_amenities");
        backend.fail_selects_from("room_images");

        let detail = load_room_detail(&backend, 1).await.unwrap().unwrap();
        assert_eq!(detail.room.id, 1);
        assert!(detail.images.is_empty());
        assert!(detail.tag_names(TagKind::Amenity).is_empty());
        assert_eq!(detail.tag_names(TagKind::Target), ["Người đi làm"]);
    }

    /// Records every select before handing it to the memory backend
    struct Recording {
        inner: MemoryBackend,
        selects: Mutex<Vec<SelectRequest>>,
    }

    #[async_trait]
    impl TableClient for Recording {
        async fn select(&self, request: &SelectRequest) -> BackendResult<SelectResponse> {
            self.selects.lock().unwrap().push(request.clone());
            self.inner.select(request).await
        }

        async fn insert(&self, table: &str, rows: Vec<Value>) -> BackendResult<Vec<Value>> {
            self.inner.insert(table, rows).await
        }

        async fn upsert(&self, table: &str, rows: Vec<Value>) -> BackendResult<Vec<Value>> {
            self.inner.upsert(table, rows).await
        }

        async fn update(&self, table: &str, patch: Value, filters: &[Filter]) -> BackendResult<()> {
            self.inner.update(table, patch, filters).await
        }

        async fn delete(&self, table: &str, filters: &[Filter]) -> BackendResult<()> {
            self.inner.delete(table, filters).await
        }
    }

    #[tokio::test]
    async fn join_tables_are_read_without_ordering() {
        let inner = MemoryBackend::with_demo_data();
        inner.seed("room_surroundings", vec![json!({"room_id": 1, "surrounding_id": 1})]);
        let table = Recording {
            inner,
            selects: Mutex::new(Vec::new()),
        };

        let detail = load_room_detail(&table, 1).await.unwrap().unwrap();
        assert_eq!(detail.tag_names(TagKind::Surrounding), ["Gần chợ"]);

        let selects = table.selects.lock().unwrap();
        for kind in TagKind::ALL {
            let join = selects
                .iter()
                .find(|r| r.table == kind.join_table())
                .expect("join table queried");
            assert!(join.order.is_empty(), "{} ordered", join.table);
            assert_eq!(join.columns, kind.join_column());
        }
    }

    #[tokio::test]
    async fn unreadable_room_is_an_error() {
        let backend = MemoryBackend::with_demo_data();
        backend.fail_selects_from("rooms");
        assert!(load_room_detail(&backend, 1).await.is_err());
    }
}
