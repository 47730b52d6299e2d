use crate::backend::{BackendError, BackendResult};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_IMAGES_BUCKET: &str = "room-images";
pub const DEFAULT_SESSION_FILE: &str = ".phongtro/session.json";

/// Connection settings for the hosted backend
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub supabase_url: String,
    /// Public anon key sent as `apikey` on every request
    pub anon_key: String,
    pub images_bucket: String,
    pub session_file: PathBuf,
}

impl Config {
    /// Read settings from the environment, loading `.env` first when present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            supabase_url: get("SUPABASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_default(),
            anon_key: get("SUPABASE_ANON_KEY").unwrap_or_default(),
            images_bucket: get("ROOM_IMAGES_BUCKET")
                .unwrap_or_else(|| DEFAULT_IMAGES_BUCKET.to_string()),
            session_file: get("PHONGTRO_SESSION_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SESSION_FILE)),
        }
    }

    /// Remote mode needs both the project URL and the anon key.
    pub fn validate(&self) -> BackendResult<()> {
        if self.supabase_url.is_empty() {
            return Err(BackendError::Config("SUPABASE_URL is not set".into()));
        }
        if self.anon_key.is_empty() {
            return Err(BackendError::Config("SUPABASE_ANON_KEY is not set".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.images_bucket, "room-images");
        assert_eq!(config.session_file, PathBuf::from(".phongtro/session.json"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn trims_trailing_slash_from_url() {
        let config = Config::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://demo.supabase.co/"),
            ("SUPABASE_ANON_KEY", "anon"),
            ("ROOM_IMAGES_BUCKET", "  "),
        ]));
        assert_eq!(config.supabase_url, "https://demo.supabase.co");
        assert_eq!(config.images_bucket, "room-images");
        assert!(config.validate().is_ok());
    }
}
