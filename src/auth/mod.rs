pub mod profile;
pub mod roles;
pub mod session;

pub use profile::{load_profile, update_profile, ProfileForm, ProfileView};
pub use roles::{ensure_profile_role, guard_admin, post_login_route, AdminAccess};
pub use session::{SessionContext, SessionStore};

use crate::backend::rest::expiry_from_seconds;
use crate::backend::{AuthClient, BackendError};
use crate::models::{Session, User};
use crate::routes::Route;
use chrono::{TimeZone, Utc};
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("not signed in")]
    NotSignedIn,

    #[error("OAuth callback rejected: {0}")]
    Callback(String),

    #[error("failed to persist session: {0}")]
    Persist(#[from] std::io::Error),
}

impl AuthError {
    /// Message suitable for showing to the user
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Backend(err) => err.user_message(),
            other => other.to_string(),
        }
    }
}

/// Sign in with email and password, persist the session and return it.
pub async fn login(
    auth: &dyn AuthClient,
    ctx: &mut SessionContext,
    email: &str,
    password: &str,
) -> Result<Session, AuthError> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(AuthError::Validation("Vui lòng nhập email và mật khẩu".into()));
    }
    let session = auth.sign_in_with_password(email, password).await?;
    info!("✅ Signed in as {}", email);
    ctx.set(session.clone()).await?;
    Ok(session)
}

/// Sign out remotely and locally.
pub async fn logout(auth: &dyn AuthClient, ctx: &mut SessionContext) {
    ctx.clear(auth).await;
    info!("Signed out");
}

#[derive(Debug, Clone, Default)]
pub struct RegisterForm {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegisterForm {
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.email.trim().is_empty() {
            return Err(AuthError::Validation("Vui lòng nhập email".into()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Validation(format!(
                "Mật khẩu phải có ít nhất {} ký tự",
                MIN_PASSWORD_LEN
            )));
        }
        if self.password != self.confirm_password {
            return Err(AuthError::Validation("Mật khẩu xác nhận không khớp".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub user: User,
    /// Login when the address is already confirmed, otherwise the confirmation page
    pub next: Route,
}

pub async fn register(auth: &dyn AuthClient, form: &RegisterForm) -> Result<Registration, AuthError> {
    form.validate()?;
    let email = form.email.trim();
    let signup = auth
        .sign_up(email, &form.password, json!({ "full_name": form.full_name.trim() }))
        .await?;

    let next = if signup.user.email_confirmed_at.is_some() {
        Route::Login
    } else {
        Route::EmailConfirmation {
            email: Some(email.to_string()),
        }
    };
    info!("Registered {} (next: {})", email, next);
    Ok(Registration {
        user: signup.user,
        next,
    })
}

/// Authorization URL for `provider`, returning to `{origin}/oauth/callback`.
pub fn oauth_start(auth: &dyn AuthClient, provider: &str, origin: &str) -> Result<String, AuthError> {
    let redirect = format!("{}{}", origin.trim_end_matches('/'), Route::OAuthCallback.path());
    Ok(auth.oauth_url(provider, &redirect)?)
}

/// Finish an OAuth sign-in from the URL the provider redirected to.
///
/// Tokens arrive in the fragment (`#access_token=...&refresh_token=...`).
pub async fn oauth_callback(
    auth: &dyn AuthClient,
    ctx: &mut SessionContext,
    callback_url: &str,
) -> Result<Session, AuthError> {
    let url = url::Url::parse(callback_url).map_err(|e| AuthError::Callback(e.to_string()))?;
    let fragment = url.fragment().unwrap_or_default();
    let mut params = url::form_urlencoded::parse(fragment.as_bytes())
        .chain(url.query_pairs())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect::<std::collections::HashMap<String, String>>();

    if let Some(error) = params.remove("error_description").or_else(|| params.remove("error")) {
        warn!("OAuth provider returned an error: {}", error);
        return Err(AuthError::Callback(error));
    }
    let access_token = params
        .remove("access_token")
        .ok_or_else(|| AuthError::Callback("missing access_token".into()))?;
    let refresh_token = params.remove("refresh_token").unwrap_or_default();
    let expires_at = params
        .get("expires_at")
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .or_else(|| expiry_from_seconds(params.get("expires_in").and_then(|v| v.parse().ok())));

    let user = auth.current_user(&access_token).await?;
    let session = Session {
        access_token,
        refresh_token,
        expires_at,
        user,
    };
    ctx.set(session.clone()).await?;
    info!("✅ OAuth sign-in completed for {}", session.user.id);
    Ok(session)
}
