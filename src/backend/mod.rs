pub mod error;
pub mod memory;
pub mod rest;
pub mod traits;
pub mod types;

pub use error::{BackendError, BackendResult};
pub use memory::MemoryBackend;
pub use rest::RestBackend;
pub use traits::{AuthClient, SignUp, StorageClient, TableClient};
pub use types::{Filter, Order, RowRange, SelectRequest, SelectResponse};

use crate::models::Session;
use std::sync::Arc;

/// The three collaborators handed to the rest of the crate
#[derive(Clone)]
pub struct Backends {
    pub tables: Arc<dyn TableClient>,
    pub storage: Arc<dyn StorageClient>,
    pub auth: Arc<dyn AuthClient>,
}

impl Backends {
    /// Remote backend; table and storage calls run as the session's user when one is given.
    pub fn rest(backend: &RestBackend, session: Option<&Session>) -> Self {
        let authorized = Arc::new(backend.authorized(session));
        Self {
            tables: authorized.clone(),
            storage: authorized,
            auth: Arc::new(backend.clone()),
        }
    }

    pub fn memory(backend: &MemoryBackend) -> Self {
        let shared = Arc::new(backend.clone());
        Self {
            tables: shared.clone(),
            storage: shared.clone(),
            auth: shared,
        }
    }
}
