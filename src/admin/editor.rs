use crate::backend::{
    BackendError, Filter, Order, SelectRequest, StorageClient, TableClient,
};
use crate::listing::detail::maybe_single;
use crate::listing::{Pagination, ADMIN_PAGE_SIZE};
use crate::models::{Room, RoomDraft, RoomImage, RoomStatus, Tag, TagKind};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const ADMIN_LIST_COLUMNS: &str = "id, title, address, price, status";

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Vui lòng nhập đủ Tiêu đề, Địa chỉ và Giá")]
    MissingRequired,

    #[error("Giá không hợp lệ: {0}")]
    InvalidPrice(String),

    #[error("Diện tích không hợp lệ: {0}")]
    InvalidArea(String),

    #[error("Trạng thái không hợp lệ: {0}")]
    InvalidStatus(String),
}

#[derive(Debug, Error)]
pub enum EditorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("{0} is already in progress")]
    Busy(EditorAction),

    /// A dependent write failed and everything written for the listing was removed again.
    #[error("listing was not created: {source}")]
    RolledBack {
        #[source]
        source: BackendError,
    },

    #[error("room {0} not found")]
    RoomNotFound(i64),

    #[error("image {0} is not attached to this room")]
    ImageNotFound(i64),
}

impl EditorError {
    pub fn user_message(&self) -> String {
        match self {
            EditorError::Backend(err) | EditorError::RolledBack { source: err } => err.user_message(),
            other => other.to_string(),
        }
    }
}

/// Editor actions guarded against double submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorAction {
    Create,
    Save,
    AddImages,
    DeleteImage,
}

impl EditorAction {
    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for EditorAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EditorAction::Create => "create",
            EditorAction::Save => "save",
            EditorAction::AddImages => "add images",
            EditorAction::DeleteImage => "delete image",
        })
    }
}

/// Clears the busy flag when dropped
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Room form as typed by the admin; every field is raw text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomForm {
    pub title: String,
    pub description: String,
    pub price: String,
    pub area: String,
    pub address: String,
    pub city: String,
    pub district: String,
    pub ward: String,
    pub status: String,
    pub banner: String,
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl RoomForm {
    /// Form pre-filled from a stored room
    pub fn from_room(room: &Room) -> Self {
        Self {
            title: room.title.clone(),
            description: room.description.clone().unwrap_or_default(),
            price: room.price.to_string(),
            area: room.area.map(|a| a.to_string()).unwrap_or_default(),
            address: room.address.clone(),
            city: room.city.clone().unwrap_or_default(),
            district: room.district.clone().unwrap_or_default(),
            ward: room.ward.clone().unwrap_or_default(),
            status: room.status.as_str().to_string(),
            banner: room.banner.clone().unwrap_or_default(),
        }
    }

    /// Strict conversion for new listings: title, address and a non-negative price are required.
    pub fn to_create_draft(&self) -> Result<RoomDraft, ValidationError> {
        let title = non_empty(&self.title).ok_or(ValidationError::MissingRequired)?;
        let address = non_empty(&self.address).ok_or(ValidationError::MissingRequired)?;
        let price_text = non_empty(&self.price).ok_or(ValidationError::MissingRequired)?;
        let price = price_text
            .parse::<f64>()
            .ok()
            .filter(|p| p.is_finite() && *p >= 0.0)
            .ok_or_else(|| ValidationError::InvalidPrice(price_text.clone()))?;
        let area = match non_empty(&self.area) {
            Some(text) => Some(
                text.parse::<f64>()
                    .map_err(|_| ValidationError::InvalidArea(text.clone()))?,
            ),
            None => None,
        };
        let status = RoomStatus::parse_lenient(&self.status)
            .ok_or_else(|| ValidationError::InvalidStatus(self.status.clone()))?;

        Ok(RoomDraft {
            title,
            description: non_empty(&self.description),
            price: price.round() as i64,
            area,
            address,
            city: non_empty(&self.city),
            district: non_empty(&self.district),
            ward: non_empty(&self.ward),
            status,
            banner: non_empty(&self.banner),
        })
    }

    /// Lenient conversion for edits: bad numbers become 0 / none, unknown status becomes available.
    pub fn to_update_draft(&self) -> RoomDraft {
        RoomDraft {
            title: self.title.trim().to_string(),
            description: non_empty(&self.description),
            price: self
                .price
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|p| p.is_finite())
                .map(|p| p.round() as i64)
                .unwrap_or(0),
            area: self.area.trim().parse::<f64>().ok(),
            address: self.address.trim().to_string(),
            city: non_empty(&self.city),
            district: non_empty(&self.district),
            ward: non_empty(&self.ward),
            status: RoomStatus::parse_lenient(&self.status).unwrap_or_default(),
            banner: non_empty(&self.banner),
        }
    }
}

/// An image file picked for upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub async fn read(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self { name, bytes })
    }

    fn extension(&self) -> String {
        Path::new(&self.name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| "jpg".to_string())
    }

    fn content_type(&self) -> String {
        mime_guess::from_path(&self.name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    }
}

/// Everything submitted with the create form
#[derive(Debug, Clone, Default)]
pub struct CreateListing {
    pub form: RoomForm,
    pub files: Vec<UploadFile>,
    /// Image URLs typed by hand
    pub image_urls: Vec<String>,
    pub tags: BTreeMap<TagKind, BTreeSet<i64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedListing {
    pub room: Room,
    pub images: Vec<String>,
}

/// One page of the admin room table
#[derive(Debug, Clone, PartialEq)]
pub struct AdminPage {
    pub rooms: Vec<Room>,
    pub pagination: Pagination,
}

/// A room opened in the edit dialog
#[derive(Debug, Clone, PartialEq)]
pub struct EditSession {
    pub room_id: i64,
    pub form: RoomForm,
    pub images: Vec<RoomImage>,
}

impl EditSession {
    /// Use an attached image as banner; persisted by the next save.
    pub fn set_banner_from_image(&mut self, url: &str) {
        if !url.trim().is_empty() {
            self.form.banner = url.trim().to_string();
        }
    }
}

/// What a create has written so far, for cleanup on failure
#[derive(Default)]
struct Written {
    room_id: Option<i64>,
    objects: Vec<String>,
}

/// Admin-side listing management over the table and storage collaborators.
pub struct RoomEditor {
    tables: Arc<dyn TableClient>,
    storage: Arc<dyn StorageClient>,
    bucket: String,
    busy: [AtomicBool; 4],
}

impl RoomEditor {
    pub fn new(tables: Arc<dyn TableClient>, storage: Arc<dyn StorageClient>, bucket: impl Into<String>) -> Self {
        Self {
            tables,
            storage,
            bucket: bucket.into(),
            busy: Default::default(),
        }
    }

    fn begin(&self, action: EditorAction) -> Result<BusyGuard<'_>, EditorError> {
        let flag = &self.busy[action.index()];
        if flag.swap(true, Ordering::AcqRel) {
            return Err(EditorError::Busy(action));
        }
        Ok(BusyGuard(flag))
    }

    pub fn is_busy(&self, action: EditorAction) -> bool {
        self.busy[action.index()].load(Ordering::Acquire)
    }

    /// Options for the three tag pickers, each ordered by name
    pub async fn load_tag_options(&self) -> Result<BTreeMap<TagKind, Vec<Tag>>, EditorError> {
        let mut options = BTreeMap::new();
        for kind in TagKind::ALL {
            let rows = self
                .tables
                .select(
                    &SelectRequest::new(kind.table())
                        .columns("id, name")
                        .order(Order::asc("name")),
                )
                .await?
                .rows;
            let tags = rows
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<Tag>, _>>()
                .map_err(BackendError::from)?;
            options.insert(kind, tags);
        }
        Ok(options)
    }

    /// Newest rooms first, ten per page
    /// One admin page, newest first. A page past the end is clamped to the last page.
    pub async fn list_rooms(&self, page: u32) -> Result<AdminPage, EditorError> {
        let mut pagination = Pagination::new(ADMIN_PAGE_SIZE);
        let (mut rooms, total) = self.fetch_admin_page(&pagination, page).await?;
        pagination.set_total(total);
        pagination.jump_to(page);
        if pagination.page() != page {
            debug!("Admin page {} out of range, showing {}", page, pagination.page());
            let (clamped, total) = self.fetch_admin_page(&pagination, pagination.page()).await?;
            rooms = clamped;
            pagination.set_total(total);
        }
        Ok(AdminPage { rooms, pagination })
    }

    async fn fetch_admin_page(&self, pagination: &Pagination, page: u32) -> Result<(Vec<Room>, u64), EditorError> {
        let range = pagination.range_for(page);
        let response = self
            .tables
            .select(
                &SelectRequest::new("rooms")
                    .columns(ADMIN_LIST_COLUMNS)
                    .order(Order::desc("created_at"))
                    .range(range.from, range.to)
                    .exact_count(),
            )
            .await?;
        let rooms = response
            .rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Room>, _>>()
            .map_err(BackendError::from)?;
        Ok((rooms, response.count.unwrap_or(0)))
    }

    fn object_path(&self, folder: &str, file: &UploadFile) -> String {
        let token = Uuid::new_v4().simple().to_string();
        format!(
            "rooms/{}/{}-{}.{}",
            folder,
            Utc::now().timestamp_millis(),
            &token[..10],
            file.extension()
        )
    }

    async fn upload(&self, path: &str, file: &UploadFile) -> Result<String, BackendError> {
        debug!("Uploading {} ({} bytes) to {}", file.name, file.bytes.len(), path);
        self.storage
            .upload(&self.bucket, path, file.bytes.clone(), &file.content_type())
            .await?;
        Ok(self.storage.public_url(&self.bucket, path))
    }

    /// Create a listing with its uploads, tag associations and images.
    ///
    /// Validation runs before any remote call. If any write after validation
    /// fails, rows and objects written for this listing are removed and
    /// `EditorError::RolledBack` carries the first error.
    pub async fn create_listing(&self, request: CreateListing) -> Result<CreatedListing, EditorError> {
        let mut draft = request.form.to_create_draft()?;
        let _busy = self.begin(EditorAction::Create)?;

        let mut written = Written::default();
        match self.write_listing(&request, &mut draft, &mut written).await {
            Ok(created) => {
                info!(
                    "✅ Created room {} with {} images",
                    created.room.id,
                    created.images.len()
                );
                Ok(created)
            }
            Err(source) => {
                warn!("Creating listing failed, cleaning up: {}", source);
                self.clean_up(written).await;
                Err(EditorError::RolledBack { source })
            }
        }
    }

    async fn write_listing(
        &self,
        request: &CreateListing,
        draft: &mut RoomDraft,
        written: &mut Written,
    ) -> Result<CreatedListing, BackendError> {
        let mut images = Vec::new();
        for file in &request.files {
            let path = self.object_path("new", file);
            let url = self.upload(&path, file).await?;
            written.objects.push(path);
            images.push(url);
        }

        let url_inputs: Vec<String> = request.image_urls.iter().filter_map(|u| non_empty(u)).collect();
        if draft.banner.is_none() {
            draft.banner = url_inputs.first().cloned();
        }
        images.extend(url_inputs);

        let stored = self
            .tables
            .insert("rooms", vec![serde_json::to_value(&*draft)?])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode("insert returned no room".into()))?;
        let room: Room = serde_json::from_value(stored)?;
        written.room_id = Some(room.id);

        for (kind, ids) in &request.tags {
            if ids.is_empty() {
                continue;
            }
            let rows = ids
                .iter()
                .map(|id| json!({ "room_id": room.id, kind.join_column(): id }))
                .collect();
            self.tables.insert(kind.join_table(), rows).await?;
        }

        if !images.is_empty() {
            let rows = images
                .iter()
                .map(|url| json!({ "room_id": room.id, "image_url": url }))
                .collect();
            self.tables.insert("room_images", rows).await?;
        }

        Ok(CreatedListing { room, images })
    }

    async fn clean_up(&self, written: Written) {
        if let Some(room_id) = written.room_id {
            let by_room = [Filter::eq("room_id", room_id)];
            for table in TagKind::ALL
                .iter()
                .map(TagKind::join_table)
                .chain(["room_images"])
            {
                if let Err(err) = self.tables.delete(table, &by_room).await {
                    warn!("Cleanup of {} for room {} failed: {}", table, room_id, err);
                }
            }
            if let Err(err) = self.tables.delete("rooms", &[Filter::eq("id", room_id)]).await {
                warn!("Cleanup of room {} failed: {}", room_id, err);
            }
        }
        if !written.objects.is_empty() {
            if let Err(err) = self.storage.remove(&self.bucket, &written.objects).await {
                warn!("Removing {} uploaded objects failed: {}", written.objects.len(), err);
            }
        }
    }

    /// Upload `files` under the room's folder and insert their `room_images` rows.
    /// Successful uploads are recorded in `uploaded` as they happen.
    async fn attach_images(
        &self,
        room_id: i64,
        files: &[UploadFile],
        uploaded: &mut Vec<(String, String)>,
    ) -> Result<Vec<Value>, BackendError> {
        let folder = room_id.to_string();
        for file in files {
            let path = self.object_path(&folder, file);
            let url = self.upload(&path, file).await?;
            uploaded.push((path, url));
        }
        let rows = uploaded
            .iter()
            .map(|(_, url)| json!({ "room_id": room_id, "image_url": url }))
            .collect();
        self.tables.insert("room_images", rows).await
    }

    /// Load a room and its images into an edit session
    pub async fn open_edit(&self, room_id: i64) -> Result<EditSession, EditorError> {
        let room: Option<Room> = maybe_single(
            self.tables.as_ref(),
            SelectRequest::new("rooms").filter(Filter::eq("id", room_id)),
        )
        .await?;
        let room = room.ok_or(EditorError::RoomNotFound(room_id))?;

        let images = self
            .tables
            .select(
                &SelectRequest::new("room_images")
                    .columns("id, image_url, room_id")
                    .filter(Filter::eq("room_id", room_id))
                    .order(Order::asc("id")),
            )
            .await?
            .rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<RoomImage>, _>>()
            .map_err(BackendError::from)?;

        Ok(EditSession {
            room_id,
            form: RoomForm::from_room(&room),
            images,
        })
    }

    /// Write the whole form back to the room row
    pub async fn save_edit(&self, edit: &EditSession) -> Result<(), EditorError> {
        let _busy = self.begin(EditorAction::Save)?;
        let patch = serde_json::to_value(edit.form.to_update_draft()).map_err(BackendError::from)?;
        self.tables
            .update("rooms", patch, &[Filter::eq("id", edit.room_id)])
            .await?;
        info!("Saved room {}", edit.room_id);
        Ok(())
    }

    /// Upload files into the room's folder and attach them.
    ///
    /// The first new image becomes the banner when the room has none.
    pub async fn add_images(&self, edit: &mut EditSession, files: Vec<UploadFile>) -> Result<Vec<RoomImage>, EditorError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let _busy = self.begin(EditorAction::AddImages)?;

        let mut uploaded = Vec::with_capacity(files.len());
        let inserted = match self.attach_images(edit.room_id, &files, &mut uploaded).await {
            Ok(inserted) => inserted,
            Err(err) => {
                if !uploaded.is_empty() {
                    let paths: Vec<String> = uploaded.into_iter().map(|(path, _)| path).collect();
                    warn!("Adding images to room {} failed, removing {} uploads", edit.room_id, paths.len());
                    if let Err(remove_err) = self.storage.remove(&self.bucket, &paths).await {
                        warn!("Removing {} uploaded objects failed: {}", paths.len(), remove_err);
                    }
                }
                return Err(err.into());
            }
        };

        let mut added = Vec::with_capacity(uploaded.len());
        for (path, url) in uploaded {
            let id = inserted
                .iter()
                .find(|row| row.get("image_url").and_then(Value::as_str) == Some(url.as_str()))
                .and_then(|row| row.get("id"))
                .and_then(Value::as_i64)
                .unwrap_or_default();
            added.push(RoomImage {
                id,
                room_id: edit.room_id,
                image_url: url,
                path: Some(path),
            });
        }

        if edit.form.banner.trim().is_empty() {
            if let Some(first) = added.first() {
                edit.form.banner = first.image_url.clone();
                self.tables
                    .update(
                        "rooms",
                        json!({ "banner": first.image_url }),
                        &[Filter::eq("id", edit.room_id)],
                    )
                    .await?;
            }
        }

        info!("Added {} images to room {}", added.len(), edit.room_id);
        edit.images.extend(added.iter().cloned());
        Ok(added)
    }

    /// Detach an image; its storage object is removed when this session uploaded it.
    pub async fn delete_image(&self, edit: &mut EditSession, image_id: i64) -> Result<(), EditorError> {
        let _busy = self.begin(EditorAction::DeleteImage)?;
        let position = edit
            .images
            .iter()
            .position(|img| img.id == image_id)
            .ok_or(EditorError::ImageNotFound(image_id))?;

        if let Some(path) = &edit.images[position].path {
            self.storage.remove(&self.bucket, &[path.clone()]).await?;
        }
        self.tables
            .delete("room_images", &[Filter::eq("id", image_id)])
            .await?;
        edit.images.remove(position);
        debug!("Deleted image {} from room {}", image_id, edit.room_id);
        Ok(())
    }
}
