use crate::backend::{AuthClient, BackendError, BackendResult};
use crate::models::Session;
use chrono::{DateTime, Duration, Utc};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Refresh this long before the access token actually expires.
const REFRESH_MARGIN_SECS: i64 = 60;

/// JSON file holding the signed-in session between runs
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no session was saved; an unreadable file is treated the same.
    pub async fn load(&self) -> io::Result<Option<Session>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        match serde_json::from_str(&text) {
            Ok(session) => Ok(Some(session)),
            Err(err) => {
                warn!("Ignoring unreadable session file {}: {}", self.path.display(), err);
                Ok(None)
            }
        }
    }

    pub async fn save(&self, session: &Session) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(session)?;
        tokio::fs::write(&self.path, json).await
    }

    pub async fn clear(&self) -> io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

/// The signed-in session, passed explicitly to whatever needs it.
#[derive(Debug)]
pub struct SessionContext {
    store: SessionStore,
    session: Option<Session>,
}

impl SessionContext {
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            session: None,
        }
    }

    /// Read the persisted session, if any.
    pub async fn load(store: SessionStore) -> io::Result<Self> {
        let session = store.load().await?;
        if let Some(session) = &session {
            debug!("Loaded session for {}", session.user.id);
        }
        Ok(Self { store, session })
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.access_token.as_str())
    }

    pub fn require(&self) -> BackendResult<&Session> {
        self.session.as_ref().ok_or(BackendError::Unauthenticated)
    }

    /// Replace the session and persist it.
    pub async fn set(&mut self, session: Session) -> io::Result<()> {
        self.store.save(&session).await?;
        self.session = Some(session);
        Ok(())
    }

    /// Whether the access token is expired or about to be at `now`
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.session.as_ref().and_then(|s| s.expires_at) {
            Some(expires_at) => expires_at - Duration::seconds(REFRESH_MARGIN_SECS) <= now,
            None => false,
        }
    }

    /// Exchange the refresh token for a new session.
    pub async fn refresh(&mut self, auth: &dyn AuthClient) -> BackendResult<&Session> {
        let refresh_token = self.require()?.refresh_token.clone();
        let session = auth.refresh_session(&refresh_token).await?;
        info!("Session refreshed for {}", session.user.id);
        self.set(session)
            .await
            .map_err(|e| BackendError::Config(format!("failed to save session: {}", e)))?;
        self.require()
    }

    /// Refresh when the token is expiring; a failed refresh drops the session.
    pub async fn ensure_fresh(&mut self, auth: &dyn AuthClient) -> BackendResult<Option<&Session>> {
        if self.session.is_some() && self.needs_refresh(Utc::now()) {
            let refreshed = self.refresh(auth).await.map(|_| ());
            if let Err(err) = refreshed {
                warn!("Session refresh failed, signing out locally: {}", err);
                self.forget().await;
                return Ok(None);
            }
        }
        Ok(self.session.as_ref())
    }

    /// Sign out remotely (best effort) and forget the local session.
    pub async fn clear(&mut self, auth: &dyn AuthClient) {
        if let Some(token) = self.access_token() {
            if let Err(err) = auth.sign_out(token).await {
                warn!("Remote sign-out failed: {}", err);
            }
        }
        self.forget().await;
    }

    async fn forget(&mut self) {
        self.session = None;
        if let Err(err) = self.store.clear().await {
            warn!("Failed to remove session file {}: {}", self.store.path().display(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SessionContext::load(SessionStore::new(dir.path().join("none.json")))
            .await
            .unwrap();
        assert!(ctx.session().is_none());
        assert!(ctx.require().is_err());
    }

    #[tokio::test]
    async fn set_persists_and_clear_removes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/session.json");
        let backend = MemoryBackend::new();
        backend.add_user("an@example.vn", "secret1", json!({}));
        let session = backend
            .sign_in_with_password("an@example.vn", "secret1")
            .await
            .unwrap();

        let mut ctx = SessionContext::new(SessionStore::new(&path));
        ctx.set(session.clone()).await.unwrap();

        let reloaded = SessionContext::load(SessionStore::new(&path)).await.unwrap();
        assert_eq!(reloaded.session(), Some(&session));

        ctx.clear(&backend).await;
        assert!(ctx.session().is_none());
        assert!(!path.exists());
        assert!(backend.current_user(&session.access_token).await.is_err());
    }

    #[tokio::test]
    async fn expiring_session_is_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackend::new();
        backend.add_user("an@example.vn", "secret1", json!({}));
        let mut session = backend
            .sign_in_with_password("an@example.vn", "secret1")
            .await
            .unwrap();
        session.expires_at = Some(Utc::now() + Duration::seconds(10));
        let old_token = session.access_token.clone();

        let mut ctx = SessionContext::new(SessionStore::new(dir.path().join("s.json")));
        ctx.set(session).await.unwrap();
        assert!(ctx.needs_refresh(Utc::now()));

        let fresh = ctx.ensure_fresh(&backend).await.unwrap().unwrap();
        assert_ne!(fresh.access_token, old_token);
        assert!(!ctx.needs_refresh(Utc::now()));
    }

    #[tokio::test]
    async fn corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        std::fs::write(&path, "not json").unwrap();
        let ctx = SessionContext::load(SessionStore::new(&path)).await.unwrap();
        assert!(ctx.session().is_none());
    }
}
