use std::fmt;

/// Client-side routes of the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Login,
    Register,
    /// Waiting for the user to confirm the address they signed up with
    EmailConfirmation { email: Option<String> },
    OAuthCallback,
    UserHome,
    Rooms,
    RoomDetail(i64),
    MyBookings,
    ManageRooms,
    Profile,
    AdminDashboard,
}

impl Route {
    /// Resolve a path (query string ignored except for the confirmation email).
    pub fn parse(raw: &str) -> Option<Self> {
        let (path, query) = raw.split_once('?').unwrap_or((raw, ""));
        let path = match path.trim_end_matches('/') {
            "" => "/",
            p => p,
        };

        let route = match path {
            "/" => Route::Home,
            "/login" => Route::Login,
            "/register" => Route::Register,
            "/email-confirmation" => Route::EmailConfirmation {
                email: url::form_urlencoded::parse(query.as_bytes())
                    .find(|(key, _)| key == "email")
                    .map(|(_, value)| value.into_owned()),
            },
            "/oauth/callback" => Route::OAuthCallback,
            "/user-home" => Route::UserHome,
            "/rooms" => Route::Rooms,
            "/my-bookings" => Route::MyBookings,
            "/manage-rooms" | "/admin/rooms" => Route::ManageRooms,
            "/profile" => Route::Profile,
            "/admin" | "/admin/dashboard" => Route::AdminDashboard,
            other => {
                let id = other.strip_prefix("/room/")?;
                Route::RoomDetail(id.parse().ok()?)
            }
        };
        Some(route)
    }

    pub fn path(&self) -> String {
        match self {
            Route::Home => "/".into(),
            Route::Login => "/login".into(),
            Route::Register => "/register".into(),
            Route::EmailConfirmation { email: None } => "/email-confirmation".into(),
            Route::EmailConfirmation { email: Some(email) } => {
                let query: String = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("email", email)
                    .finish();
                format!("/email-confirmation?{}", query)
            }
            Route::OAuthCallback => "/oauth/callback".into(),
            Route::UserHome => "/user-home".into(),
            Route::Rooms => "/rooms".into(),
            Route::RoomDetail(id) => format!("/room/{}", id),
            Route::MyBookings => "/my-bookings".into(),
            Route::ManageRooms => "/manage-rooms".into(),
            Route::Profile => "/profile".into(),
            Route::AdminDashboard => "/admin/dashboard".into(),
        }
    }

    pub fn shows_navbar(&self) -> bool {
        !matches!(
            self,
            Route::Home
                | Route::Login
                | Route::Register
                | Route::EmailConfirmation { .. }
                | Route::UserHome
        )
    }

    pub fn shows_footer(&self) -> bool {
        !matches!(
            self,
            Route::Login | Route::Register | Route::EmailConfirmation { .. } | Route::UserHome
        )
    }

    /// Routes that only admins should see
    pub fn is_admin(&self) -> bool {
        matches!(self, Route::AdminDashboard | Route::ManageRooms)
    }

    /// One route of each kind, for listings such as `phongtro routes`
    pub fn all() -> Vec<Route> {
        vec![
            Route::Home,
            Route::Login,
            Route::Register,
            Route::EmailConfirmation { email: None },
            Route::OAuthCallback,
            Route::UserHome,
            Route::Rooms,
            Route::RoomDetail(1),
            Route::MyBookings,
            Route::ManageRooms,
            Route::Profile,
            Route::AdminDashboard,
        ]
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
