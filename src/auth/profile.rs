use super::AuthError;
use crate::backend::{AuthClient, Filter, SelectRequest, TableClient};
use crate::listing::detail::maybe_single;
use crate::models::{Profile, Session, User};
use serde_json::{json, Value};
use tracing::info;

const METADATA_AVATAR_KEYS: [&str; 6] = [
    "avatar_url",
    "picture",
    "photo_url",
    "image_url",
    "profile_picture",
    "avatar",
];

/// What the profile page shows, merged from the `profiles` row and auth metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileView {
    pub user_id: String,
    pub display_name: String,
    pub email: String,
    pub phone: String,
    pub date_of_birth: String,
    pub avatar_url: Option<String>,
    /// Login provider of the first identity
    pub provider: Option<String>,
    pub role: String,
}

impl ProfileView {
    pub fn from_parts(user: &User, profile: Option<&Profile>) -> Self {
        let profile_name = profile.and_then(|p| p.name.as_deref()).filter(|s| !s.trim().is_empty());
        let display_name = profile_name
            .or_else(|| user.meta_str("nickname"))
            .or_else(|| user.meta_str("name"))
            .or(user.email.as_deref())
            .unwrap_or("Người dùng")
            .to_string();

        let phone = [
            profile.and_then(|p| p.phone.as_deref()),
            user.phone.as_deref(),
            user.meta_str("phone"),
            user.meta_str("phone_number"),
        ]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .unwrap_or_default()
        .to_string();

        let date_of_birth = profile
            .and_then(|p| p.dob.as_deref())
            .or_else(|| user.meta_str("date_of_birth"))
            .or_else(|| user.meta_str("birthday"))
            .map(|raw| raw.get(..10).unwrap_or(raw).to_string())
            .unwrap_or_default();

        Self {
            user_id: user.id.clone(),
            display_name,
            email: user.email.clone().unwrap_or_default(),
            phone,
            date_of_birth,
            avatar_url: avatar_url(user),
            provider: user.identities.first().map(|i| i.provider.clone()),
            role: profile
                .and_then(|p| p.role.clone())
                .unwrap_or_else(|| "authenticated".to_string()),
        }
    }
}

/// First http(s) avatar found in metadata or the first identity
pub fn avatar_url(user: &User) -> Option<String> {
    let from_metadata = METADATA_AVATAR_KEYS
        .iter()
        .filter_map(|key| user.user_metadata.get(*key))
        .chain(user.user_metadata.pointer("/picture/data/url"));
    let from_identity = user
        .identities
        .first()
        .into_iter()
        .flat_map(|i| ["avatar_url", "picture"].map(|k| i.identity_data.get(k)))
        .flatten();

    from_metadata
        .chain(from_identity)
        .filter_map(Value::as_str)
        .find(|url| url.starts_with("http"))
        .map(str::to_string)
}

/// Editable profile fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileForm {
    pub full_name: String,
    pub phone: String,
    pub date_of_birth: String,
}

pub async fn load_profile(
    auth: &dyn AuthClient,
    table: &dyn TableClient,
    session: &Session,
) -> Result<ProfileView, AuthError> {
    let user = auth.current_user(&session.access_token).await?;
    let profile: Option<Profile> = maybe_single(
        table,
        SelectRequest::new("profiles")
            .columns("id, name, phone, \"DoB\", role")
            .filter(Filter::eq("id", user.id.as_str())),
    )
    .await?;
    Ok(ProfileView::from_parts(&user, profile.as_ref()))
}

/// Upsert the `profiles` row, then mirror the fields into auth metadata so they
/// stay readable even where row-level security hides the profile.
pub async fn update_profile(
    auth: &dyn AuthClient,
    table: &dyn TableClient,
    session: &Session,
    form: &ProfileForm,
) -> Result<ProfileView, AuthError> {
    let user = auth.current_user(&session.access_token).await?;
    let stored = table
        .upsert(
            "profiles",
            vec![json!({
                "id": user.id,
                "name": form.full_name,
                "phone": form.phone,
                "DoB": form.date_of_birth,
            })],
        )
        .await?;
    let profile: Option<Profile> = stored
        .into_iter()
        .next()
        .map(serde_json::from_value)
        .transpose()
        .map_err(crate::backend::BackendError::from)?;

    let user = auth
        .update_user(
            &session.access_token,
            json!({
                "full_name": form.full_name,
                "phone": form.phone,
                "phone_number": form.phone,
                "date_of_birth": form.date_of_birth,
                "birthday": form.date_of_birth,
            }),
        )
        .await?;
    info!("Profile updated for {}", user.id);
    Ok(ProfileView::from_parts(&user, profile.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::models::Identity;

    fn user(metadata: Value) -> User {
        User {
            id: "u1".into(),
            email: Some("an@example.vn".into()),
            phone: None,
            email_confirmed_at: None,
            user_metadata: metadata,
            identities: vec![Identity {
                provider: "google".into(),
                identity_data: json!({"picture": "https://lh3.example/p.png"}),
            }],
        }
    }

    #[test]
    fn falls_back_through_metadata() {
        let view = ProfileView::from_parts(
            &user(json!({"name": "An", "phone_number": "0912", "birthday": "2001-05-06T00:00:00Z"})),
            None,
        );
        assert_eq!(view.display_name, "An");
        assert_eq!(view.phone, "0912");
        assert_eq!(view.date_of_birth, "2001-05-06");
        assert_eq!(view.avatar_url.as_deref(), Some("https://lh3.example/p.png"));
        assert_eq!(view.provider.as_deref(), Some("google"));
        assert_eq!(view.role, "authenticated");
    }

    #[test]
    fn avatar_skips_non_http_values() {
        let u = user(json!({"avatar_url": "/local.png", "picture": {"data": {"url": "https://fb.example/a.jpg"}}}));
        assert_eq!(avatar_url(&u).as_deref(), Some("https://fb.example/a.jpg"));
    }

    #[tokio::test]
    async fn update_writes_profile_and_metadata() {
        let backend = MemoryBackend::new();
        backend.add_user("an@example.vn", "secret1", json!({}));
        let session = backend.sign_in_with_password("an@example.vn", "secret1").await.unwrap();

        let form = ProfileForm {
            full_name: "Nguyễn An".into(),
            phone: "0987654321".into(),
            date_of_birth: "2000-02-03".into(),
        };
        let view = update_profile(&backend, &backend, &session, &form).await.unwrap();
        assert_eq!(view.display_name, "Nguyễn An");
        assert_eq!(view.phone, "0987654321");

        let reloaded = load_profile(&backend, &backend, &session).await.unwrap();
        assert_eq!(reloaded.date_of_birth, "2000-02-03");
        let user = backend.current_user(&session.access_token).await.unwrap();
        assert_eq!(user.meta_str("phone_number"), Some("0987654321"));
    }
}
