use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use phongtro::admin::{import_rooms, CreateListing, RoomEditor, RoomForm, RowOutcome, UploadFile, IMPORT_TEMPLATE};
use phongtro::auth::{
    self, guard_admin, load_profile, post_login_route, update_profile, AdminAccess, AuthError, ProfileForm,
    RegisterForm, SessionContext, SessionStore,
};
use phongtro::backend::{AuthClient, Backends, MemoryBackend, RestBackend};
use phongtro::listing::{
    load_room_detail, ListingController, PriceBucket, SortKey, LISTING_PAGE_SIZE, SEARCH_DEBOUNCE,
};
use phongtro::models::{Session, TagKind};
use phongtro::routes::Route;
use phongtro::Config;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const DEMO_ADMIN_EMAIL: &str = "admin@phongtro.local";
const DEMO_PASSWORD: &str = "phongtro";

#[derive(Parser)]
#[command(name = "phongtro", version, about = "Room-rental marketplace client")]
struct Cli {
    /// Use an in-memory backend with demo listings instead of the hosted project
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Browse listings
    Rooms {
        #[command(subcommand)]
        command: RoomsCommand,
    },
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        confirm: String,
    },
    Logout,
    Whoami,
    /// Print the URL that starts an OAuth sign-in
    OauthUrl {
        #[arg(long, default_value = "google")]
        provider: String,
        #[arg(long, default_value = "http://localhost:3000")]
        origin: String,
    },
    /// Finish an OAuth sign-in from the redirect URL
    OauthCallback { url: String },
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
    Admin {
        #[command(subcommand)]
        command: AdminCommand,
    },
    /// List client routes and their page chrome
    Routes,
}

#[derive(Subcommand)]
enum RoomsCommand {
    List {
        #[arg(long, default_value = "")]
        keyword: String,
        /// any, lt2, 2-5, 5-10, gt10
        #[arg(long, default_value = "any")]
        price: PriceBucket,
        /// newest, price-asc, price-desc
        #[arg(long, default_value = "newest")]
        sort: SortKey,
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Read search-box contents line by line from stdin, debounced like typing
    Search {
        #[arg(long, default_value = "any")]
        price: PriceBucket,
        #[arg(long, default_value = "newest")]
        sort: SortKey,
    },
    Show { id: i64 },
}

#[derive(Subcommand)]
enum ProfileCommand {
    Show,
    Update {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        phone: String,
        /// YYYY-MM-DD
        #[arg(long, default_value = "")]
        dob: String,
    },
}

#[derive(Args, Default)]
struct RoomFields {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    price: Option<String>,
    #[arg(long)]
    area: Option<String>,
    #[arg(long)]
    address: Option<String>,
    #[arg(long)]
    city: Option<String>,
    #[arg(long)]
    district: Option<String>,
    #[arg(long)]
    ward: Option<String>,
    /// available, rented or hidden
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    banner: Option<String>,
}

impl RoomFields {
    fn apply(self, form: &mut RoomForm) {
        let fields = [
            (self.title, &mut form.title),
            (self.description, &mut form.description),
            (self.price, &mut form.price),
            (self.area, &mut form.area),
            (self.address, &mut form.address),
            (self.city, &mut form.city),
            (self.district, &mut form.district),
            (self.ward, &mut form.ward),
            (self.status, &mut form.status),
            (self.banner, &mut form.banner),
        ];
        for (value, slot) in fields {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }
}

#[derive(Subcommand)]
enum AdminCommand {
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
    },
    /// Tag options for create
    Tags,
    Create {
        #[command(flatten)]
        fields: RoomFields,
        /// Image file to upload (repeatable)
        #[arg(long = "file")]
        files: Vec<PathBuf>,
        /// Image URL (repeatable)
        #[arg(long = "image-url")]
        image_urls: Vec<String>,
        #[arg(long = "target")]
        targets: Vec<i64>,
        #[arg(long = "surrounding")]
        surroundings: Vec<i64>,
        #[arg(long = "amenity")]
        amenities: Vec<i64>,
    },
    Edit {
        id: i64,
        #[command(flatten)]
        fields: RoomFields,
        /// Use an attached image as banner
        #[arg(long)]
        banner_from_image: Option<i64>,
    },
    AddImages {
        id: i64,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    DeleteImage {
        room_id: i64,
        image_id: i64,
    },
    /// Bulk-create rooms from a CSV file
    Import { file: PathBuf },
    /// Print the CSV import template
    Template,
}

enum Backend {
    Remote(RestBackend),
    Memory(MemoryBackend),
}

/// Backend plus session for one CLI invocation
struct App {
    config: Config,
    backend: Backend,
    ctx: SessionContext,
}

impl App {
    async fn new(config: Config, offline: bool) -> anyhow::Result<Self> {
        if offline {
            info!("📦 Offline mode: in-memory backend with demo listings");
            let memory = MemoryBackend::with_demo_data();
            memory.add_user(DEMO_ADMIN_EMAIL, DEMO_PASSWORD, json!({ "role": "admin" }));
            let store = SessionStore::new(std::env::temp_dir().join("phongtro-offline-session.json"));
            return Ok(Self {
                config,
                backend: Backend::Memory(memory),
                ctx: SessionContext::new(store),
            });
        }

        config.validate().context("Missing backend configuration")?;
        let remote = RestBackend::new(&config).context("Failed to build HTTP client")?;
        let mut ctx = SessionContext::load(SessionStore::new(&config.session_file))
            .await
            .with_context(|| format!("Failed to read {}", config.session_file.display()))?;
        ctx.ensure_fresh(&remote).await?;
        Ok(Self {
            config,
            backend: Backend::Remote(remote),
            ctx,
        })
    }

    /// Collaborators acting as the current session's user
    fn backends(&self) -> Backends {
        match &self.backend {
            Backend::Remote(remote) => Backends::rest(remote, self.ctx.session()),
            Backend::Memory(memory) => Backends::memory(memory),
        }
    }

    /// The signed-in session; offline runs sign in as the demo admin.
    async fn session(&mut self) -> anyhow::Result<Session> {
        if self.ctx.session().is_none() && matches!(self.backend, Backend::Memory(_)) {
            let backends = self.backends();
            auth::login(backends.auth.as_ref(), &mut self.ctx, DEMO_ADMIN_EMAIL, DEMO_PASSWORD).await?;
        }
        Ok(self.ctx.session().cloned().ok_or(AuthError::NotSignedIn)?)
    }

    async fn editor(&mut self) -> anyhow::Result<RoomEditor> {
        let session = self.session().await?;
        let backends = self.backends();
        match guard_admin(backends.auth.as_ref(), backends.tables.as_ref(), Some(&session)).await {
            AdminAccess::Allowed(user) => {
                info!("🔑 Admin {}", user.email.as_deref().unwrap_or(&user.id));
                Ok(RoomEditor::new(backends.tables, backends.storage, self.config.images_bucket.clone()))
            }
            AdminAccess::Redirect(route) => bail!("Admin access required (redirecting to {})", route),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut app = App::new(Config::from_env(), cli.offline).await?;

    match cli.command {
        Command::Rooms { command } => rooms(&app, command).await?,
        Command::Login { email, password } => {
            let backends = app.backends();
            let session = auth::login(backends.auth.as_ref(), &mut app.ctx, &email, &password)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            let backends = app.backends();
            let next = post_login_route(backends.tables.as_ref(), &session.user).await;
            println!("Signed in as {} → {}", email, next);
        }
        Command::Register {
            name,
            email,
            password,
            confirm,
        } => {
            let form = RegisterForm {
                full_name: name,
                email,
                password,
                confirm_password: confirm,
            };
            let done = auth::register(app.backends().auth.as_ref(), &form)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("Registered {} → {}", done.user.email.unwrap_or_default(), done.next);
        }
        Command::Logout => {
            let backends = app.backends();
            auth::logout(backends.auth.as_ref(), &mut app.ctx).await;
            println!("Signed out");
        }
        Command::Whoami => {
            let session = app.session().await?;
            let backends = app.backends();
            let user = backends.auth.current_user(&session.access_token).await?;
            let home = post_login_route(backends.tables.as_ref(), &user).await;
            println!("{} ({})", user.email.as_deref().unwrap_or("-"), user.id);
            println!("Home: {}", home);
        }
        Command::OauthUrl { provider, origin } => {
            println!("{}", auth::oauth_start(app.backends().auth.as_ref(), &provider, &origin)?);
        }
        Command::OauthCallback { url } => {
            let backends = app.backends();
            let session = auth::oauth_callback(backends.auth.as_ref(), &mut app.ctx, &url).await?;
            let backends = app.backends();
            let next = post_login_route(backends.tables.as_ref(), &session.user).await;
            println!("Signed in as {} → {}", session.user.id, next);
        }
        Command::Profile { command } => profile(&mut app, command).await?,
        Command::Admin { command } => admin(&mut app, command).await?,
        Command::Routes => {
            for route in Route::all() {
                println!(
                    "{:<22} navbar:{:<5} footer:{:<5}{}",
                    route.path(),
                    route.shows_navbar(),
                    route.shows_footer(),
                    if route.is_admin() { " admin" } else { "" }
                );
            }
        }
    }

    Ok(())
}

async fn rooms(app: &App, command: RoomsCommand) -> anyhow::Result<()> {
    let tables = app.backends().tables;
    match command {
        RoomsCommand::List {
            keyword,
            price,
            sort,
            page,
        } => {
            let controller = ListingController::new(tables, LISTING_PAGE_SIZE);
            controller.apply_keyword(&keyword).await;
            controller.set_price(price).await;
            controller.set_sort(sort).await;
            controller.fetch().await.context("Failed to load rooms")?;
            if page > 1 && controller.jump_to(page).await {
                controller.fetch().await.context("Failed to load rooms")?;
            }
            print!("{}", controller.view().await.render());
        }
        RoomsCommand::Search { price, sort } => {
            let controller = Arc::new(ListingController::new(tables, LISTING_PAGE_SIZE));
            controller.set_price(price).await;
            controller.set_sort(sort).await;
            controller.fetch().await.context("Failed to load rooms")?;

            let (debouncer, driver) = controller.attach_search();
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                controller.type_keyword(&line).await;
                debouncer.push(&line);
            }
            // Let the last keystroke settle before shutting the search down
            tokio::time::sleep(SEARCH_DEBOUNCE * 2).await;
            drop(debouncer);
            if let Err(err) = driver.await {
                warn!("Search task ended abnormally: {}", err);
            }
            print!("{}", controller.view().await.render());
        }
        RoomsCommand::Show { id } => match load_room_detail(tables.as_ref(), id).await? {
            Some(detail) => print!("{}", detail.render()),
            None => bail!("Room {} not found", id),
        },
    }
    Ok(())
}

async fn profile(app: &mut App, command: ProfileCommand) -> anyhow::Result<()> {
    let session = app.session().await?;
    let backends = app.backends();
    let view = match command {
        ProfileCommand::Show => load_profile(backends.auth.as_ref(), backends.tables.as_ref(), &session).await?,
        ProfileCommand::Update { name, phone, dob } => {
            let form = ProfileForm {
                full_name: name,
                phone,
                date_of_birth: dob,
            };
            update_profile(backends.auth.as_ref(), backends.tables.as_ref(), &session, &form).await?
        }
    };

    println!("{}", view.display_name);
    println!("   Email: {}", view.email);
    println!("   Phone: {}", if view.phone.is_empty() { "-" } else { view.phone.as_str() });
    println!("   DoB: {}", if view.date_of_birth.is_empty() { "-" } else { view.date_of_birth.as_str() });
    if let Some(avatar) = &view.avatar_url {
        println!("   Avatar: {}", avatar);
    }
    println!("   Provider: {}", view.provider.as_deref().unwrap_or("email"));
    println!("   Role: {}", view.role);
    Ok(())
}

async fn admin(app: &mut App, command: AdminCommand) -> anyhow::Result<()> {
    if let AdminCommand::Template = command {
        print!("{}", IMPORT_TEMPLATE);
        return Ok(());
    }
    let editor = app.editor().await?;

    match command {
        AdminCommand::List { page } => {
            let listing = editor.list_rooms(page).await?;
            for room in &listing.rooms {
                println!(
                    "#{:<5} {} | {} | {} | {}",
                    room.id,
                    room.title,
                    room.address,
                    room.price_label(),
                    room.status
                );
            }
            println!(
                "Trang {}/{} ({} phòng)",
                listing.pagination.page(),
                listing.pagination.total_pages(),
                listing.pagination.total()
            );
        }
        AdminCommand::Tags => {
            for (kind, tags) in editor.load_tag_options().await? {
                let names: Vec<String> = tags.iter().map(|t| format!("{}={}", t.id, t.name)).collect();
                println!("{}: {}", kind.table(), names.join(", "));
            }
        }
        AdminCommand::Create {
            fields,
            files,
            image_urls,
            targets,
            surroundings,
            amenities,
        } => {
            let mut form = RoomForm::default();
            fields.apply(&mut form);
            let mut uploads = Vec::with_capacity(files.len());
            for path in &files {
                uploads.push(
                    UploadFile::read(path)
                        .await
                        .with_context(|| format!("Failed to read {}", path.display()))?,
                );
            }
            let tags: BTreeMap<TagKind, BTreeSet<i64>> = [
                (TagKind::Target, targets),
                (TagKind::Surrounding, surroundings),
                (TagKind::Amenity, amenities),
            ]
            .into_iter()
            .map(|(kind, ids)| (kind, ids.into_iter().collect()))
            .collect();

            let created = editor
                .create_listing(CreateListing {
                    form,
                    files: uploads,
                    image_urls,
                    tags,
                })
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("✅ Created room #{} with {} images", created.room.id, created.images.len());
        }
        AdminCommand::Edit {
            id,
            fields,
            banner_from_image,
        } => {
            let mut edit = editor.open_edit(id).await?;
            fields.apply(&mut edit.form);
            if let Some(image_id) = banner_from_image {
                let url = edit
                    .images
                    .iter()
                    .find(|img| img.id == image_id)
                    .map(|img| img.image_url.clone())
                    .with_context(|| format!("Image {} is not attached to room {}", image_id, id))?;
                edit.set_banner_from_image(&url);
            }
            editor.save_edit(&edit).await?;
            println!("Đã lưu thay đổi");
        }
        AdminCommand::AddImages { id, files } => {
            let mut edit = editor.open_edit(id).await?;
            let mut uploads = Vec::with_capacity(files.len());
            for path in &files {
                uploads.push(
                    UploadFile::read(path)
                        .await
                        .with_context(|| format!("Failed to read {}", path.display()))?,
                );
            }
            for image in editor.add_images(&mut edit, uploads).await? {
                println!("#{} {}", image.id, image.image_url);
            }
        }
        AdminCommand::DeleteImage { room_id, image_id } => {
            let mut edit = editor.open_edit(room_id).await?;
            editor.delete_image(&mut edit, image_id).await?;
            println!("Deleted image #{}", image_id);
        }
        AdminCommand::Import { file } => {
            let text = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let summary = import_rooms(app.backends().tables.as_ref(), &text).await?;
            println!("{}", summary);
            for row in &summary.rows {
                match row {
                    RowOutcome::Ok { line, title } => println!("  dòng {}: ok ({})", line, title),
                    RowOutcome::Error { line, error } => println!("  dòng {}: lỗi ({})", line, error),
                }
            }
        }
        AdminCommand::Template => {}
    }
    Ok(())
}
