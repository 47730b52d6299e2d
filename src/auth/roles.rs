use crate::backend::{AuthClient, BackendResult, Filter, SelectRequest, TableClient};
use crate::listing::detail::maybe_single;
use crate::models::{Profile, Role, Session, User};
use crate::routes::Route;
use serde_json::json;
use tracing::{debug, info, warn};

/// Role stored on the user's `profiles` row, creating the row when missing.
///
/// New profiles take the metadata role, or `renter`.
pub async fn ensure_profile_role(table: &dyn TableClient, user: &User) -> BackendResult<Option<Role>> {
    let lookup = || {
        SelectRequest::new("profiles")
            .columns("id, role")
            .filter(Filter::eq("id", user.id.as_str()))
    };

    let mut profile: Option<Profile> = maybe_single(table, lookup()).await?;
    if profile.is_none() {
        let role = user.metadata_role().unwrap_or(Role::Renter);
        info!("Creating profile for {} with role {}", user.id, role.as_str());
        table
            .insert(
                "profiles",
                vec![json!({
                    "id": user.id,
                    "name": user.email.clone().unwrap_or_else(|| "User".to_string()),
                    "role": role.as_str(),
                })],
            )
            .await?;
        profile = maybe_single(table, lookup()).await?;
    }

    Ok(profile.and_then(|p| p.role).as_deref().and_then(Role::parse))
}

/// Where to send a user right after sign-in or the OAuth callback.
///
/// Profile lookup failures are not fatal; the user simply lands on the user home.
pub async fn post_login_route(table: &dyn TableClient, user: &User) -> Route {
    let meta_role = user.metadata_role();
    debug!("Post-login for {} (metadata role {:?})", user.id, meta_role);
    if meta_role == Some(Role::Admin) {
        return Route::AdminDashboard;
    }

    match ensure_profile_role(table, user).await {
        Ok(Some(Role::Admin)) => Route::AdminDashboard,
        Ok(_) => Route::UserHome,
        Err(err) => {
            warn!("Profile lookup failed for {}: {}", user.id, err);
            Route::UserHome
        }
    }
}

/// Outcome of checking an admin route
#[derive(Debug, Clone, PartialEq)]
pub enum AdminAccess {
    Allowed(User),
    Redirect(Route),
}

/// Client-side gate for admin routes. Real enforcement belongs to row-level
/// security on the backend; this only decides where to navigate.
pub async fn guard_admin(
    auth: &dyn AuthClient,
    table: &dyn TableClient,
    session: Option<&Session>,
) -> AdminAccess {
    let Some(session) = session else {
        return AdminAccess::Redirect(Route::Login);
    };
    let user = match auth.current_user(&session.access_token).await {
        Ok(user) => user,
        Err(err) => {
            warn!("Could not load current user: {}", err);
            return AdminAccess::Redirect(Route::Login);
        }
    };

    let role = match user.metadata_role() {
        Some(role) => Some(role),
        None => {
            let profile: BackendResult<Option<Profile>> = maybe_single(
                table,
                SelectRequest::new("profiles")
                    .columns("id, role")
                    .filter(Filter::eq("id", user.id.as_str())),
            )
            .await;
            profile
                .ok()
                .flatten()
                .and_then(|p| p.role)
                .as_deref()
                .and_then(Role::parse)
        }
    };

    if role == Some(Role::Admin) {
        AdminAccess::Allowed(user)
    } else {
        AdminAccess::Redirect(Route::UserHome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test]
    async fn metadata_admin_skips_profile_lookup() {
        let backend = MemoryBackend::new();
        let user = backend.add_user("boss@example.vn", "secret1", json!({"role": " Admin"}));
        assert_eq!(post_login_route(&backend, &user).await, Route::AdminDashboard);
        assert!(backend.rows("profiles").is_empty());
    }

    #[tokio::test]
    async fn missing_profile_is_created_as_renter() {
        let backend = MemoryBackend::new();
        let user = backend.add_user("an@example.vn", "secret1", json!({}));

        assert_eq!(post_login_route(&backend, &user).await, Route::UserHome);
        let profiles = backend.rows("profiles");
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0]["role"], json!("renter"));
        assert_eq!(profiles[0]["name"], json!("an@example.vn"));

        // Second login reuses the row
        post_login_route(&backend, &user).await;
        assert_eq!(backend.rows("profiles").len(), 1);
    }

    #[tokio::test]
    async fn profile_admin_routes_to_dashboard() {
        let backend = MemoryBackend::new();
        let user = backend.add_user("ops@example.vn", "secret1", json!({}));
        backend.seed("profiles", vec![json!({"id": user.id, "role": "ADMIN"})]);
        assert_eq!(post_login_route(&backend, &user).await, Route::AdminDashboard);
    }

    #[tokio::test]
    async fn guard_redirects_by_role() {
        let backend = MemoryBackend::new();
        assert_eq!(
            guard_admin(&backend, &backend, None).await,
            AdminAccess::Redirect(Route::Login)
        );

        backend.add_user("an@example.vn", "secret1", json!({}));
        let renter = backend.sign_in_with_password("an@example.vn", "secret1").await.unwrap();
        assert_eq!(
            guard_admin(&backend, &backend, Some(&renter)).await,
            AdminAccess::Redirect(Route::UserHome)
        );

        let admin_user = backend.add_user("boss@example.vn", "secret1", json!({}));
        backend.seed("profiles", vec![json!({"id": admin_user.id, "role": "admin"})]);
        let admin = backend.sign_in_with_password("boss@example.vn", "secret1").await.unwrap();
        assert!(matches!(
            guard_admin(&backend, &backend, Some(&admin)).await,
            AdminAccess::Allowed(_)
        ));
    }
}
