pub mod editor;
pub mod import;

pub use editor::{
    AdminPage, CreateListing, CreatedListing, EditSession, EditorAction, EditorError, RoomEditor, RoomForm,
    UploadFile, ValidationError,
};
pub use import::{import_rooms, parse_rooms, ImportError, ImportSummary, RowOutcome, IMPORT_TEMPLATE};
