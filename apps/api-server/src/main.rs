//! api-server: HTTP API for the URL Shortener workspace.
//!
//! Exposes link creation, redirect-and-record, analytics, deletion and
//! listing, plus account sign-up/login. Identity travels in two cookies:
//! - `uid`: HttpOnly session token issued by `session-token`.
//! - `anon_urls`: client-readable JSON list of links created anonymously.
//!
//! Storage is in-memory or SQLite (when the `sqlite` feature is enabled).
//!
//! Run:
//! ```bash
//! TOKEN_SECRET=change-me-to-something-long cargo run -p api-server
//!
//! # volatile storage, JSON logs
//! TOKEN_SECRET=... STORAGE_PROVIDER=memory LOG_FORMAT=json cargo run -p api-server
//! ```
//!
//! Configuration: See `config.rs` for all environment variables.

mod accounts;
mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use domain::adapters::memory_repo::{InMemoryAccountRepo, InMemoryLinkStore};
use domain::quota::AnonQuota;
use domain::service::{CreateOutcome, LinkService};
use domain::shortid::RandomIdGenerator;
use domain::{
    Account, AccountRepository, Caller, CoreError, LinkFilter, LinkRecord, LinkStore, ShortId,
    SystemClock, UserEmail, VisitEvent,
};
use http_common::CookieOptions;
use serde::{Deserialize, Serialize};
use session_token::TokenService;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::accounts::AccountError;

/// Cookie carrying the session token.
const SESSION_COOKIE: &str = "uid";
/// Cookie carrying the anonymous quota state.
const ANON_COOKIE: &str = "anon_urls";

// Local store abstraction supporting memory or sqlite (feature-gated).
enum StoreKind {
    Memory {
        links: InMemoryLinkStore,
        accounts: InMemoryAccountRepo,
    },
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite_adapter::SqliteRepo),
}

#[derive(Clone)]
struct AnyStore {
    kind: Arc<StoreKind>,
}

impl AnyStore {
    fn memory() -> Self {
        Self {
            kind: Arc::new(StoreKind::Memory {
                links: InMemoryLinkStore::new(),
                accounts: InMemoryAccountRepo::new(),
            }),
        }
    }

    #[cfg(feature = "sqlite")]
    fn sqlite(path: &std::path::Path) -> Result<Self, CoreError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| CoreError::StoreUnavailable(format!("create {}: {e}", dir.display())))?;
        }
        Ok(Self {
            kind: Arc::new(StoreKind::Sqlite(sqlite_adapter::SqliteRepo::new(path)?)),
        })
    }
}

impl LinkStore for AnyStore {
    fn insert_unique(&self, record: LinkRecord) -> Result<(), CoreError> {
        match &*self.kind {
            StoreKind::Memory { links, .. } => links.insert_unique(record),
            #[cfg(feature = "sqlite")]
            StoreKind::Sqlite(r) => r.insert_unique(record),
        }
    }

    fn find_one(&self, filter: &LinkFilter) -> Result<Option<LinkRecord>, CoreError> {
        match &*self.kind {
            StoreKind::Memory { links, .. } => links.find_one(filter),
            #[cfg(feature = "sqlite")]
            StoreKind::Sqlite(r) => r.find_one(filter),
        }
    }

    fn find_many(&self, filter: &LinkFilter) -> Result<Vec<LinkRecord>, CoreError> {
        match &*self.kind {
            StoreKind::Memory { links, .. } => links.find_many(filter),
            #[cfg(feature = "sqlite")]
            StoreKind::Sqlite(r) => r.find_many(filter),
        }
    }

    fn append_visit(
        &self,
        id: &ShortId,
        event: VisitEvent,
    ) -> Result<Option<LinkRecord>, CoreError> {
        match &*self.kind {
            StoreKind::Memory { links, .. } => links.append_visit(id, event),
            #[cfg(feature = "sqlite")]
            StoreKind::Sqlite(r) => r.append_visit(id, event),
        }
    }

    fn delete_one(&self, filter: &LinkFilter) -> Result<bool, CoreError> {
        match &*self.kind {
            StoreKind::Memory { links, .. } => links.delete_one(filter),
            #[cfg(feature = "sqlite")]
            StoreKind::Sqlite(r) => r.delete_one(filter),
        }
    }
}

impl AccountRepository for AnyStore {
    fn create(&self, account: Account) -> Result<(), CoreError> {
        match &*self.kind {
            StoreKind::Memory { accounts, .. } => accounts.create(account),
            #[cfg(feature = "sqlite")]
            StoreKind::Sqlite(r) => r.create(account),
        }
    }

    fn find_by_email(&self, email: &UserEmail) -> Result<Option<Account>, CoreError> {
        match &*self.kind {
            StoreKind::Memory { accounts, .. } => accounts.find_by_email(email),
            #[cfg(feature = "sqlite")]
            StoreKind::Sqlite(r) => r.find_by_email(email),
        }
    }
}

type Links = LinkService<AnyStore, RandomIdGenerator, SystemClock>;

#[derive(Clone)]
struct AppState {
    links: Arc<Links>,
    accounts: AnyStore,
    tokens: Arc<TokenService>,
    base_url: Option<String>,
    cookie_secure: bool,
}

impl AppState {
    fn new(store: AnyStore, tokens: TokenService, base_url: Option<String>, cookie_secure: bool) -> Self {
        Self {
            links: Arc::new(LinkService::new(
                store.clone(),
                RandomIdGenerator::default(),
                SystemClock,
            )),
            accounts: store,
            tokens: Arc::new(tokens),
            base_url,
            cookie_secure,
        }
    }

    fn session_cookie_opts(&self) -> CookieOptions {
        CookieOptions {
            http_only: true,
            secure: self.cookie_secure,
        }
    }

    // Readable by client-side scripts so the page can show "your links".
    fn anon_cookie_opts(&self) -> CookieOptions {
        CookieOptions {
            http_only: false,
            secure: self.cookie_secure,
        }
    }
}

#[tokio::main]
async fn main() {
    // A missing .env file is fine; real environments set variables directly
    let _ = dotenvy::dotenv();

    // Load and validate config first (fail fast on misconfiguration)
    let cfg = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&cfg);
    cfg.warn_if_insecure();

    let store = match build_store(&cfg) {
        Ok(s) => s,
        Err(e) => {
            error!(err = %e, "failed to open store");
            std::process::exit(1);
        }
    };
    let tokens = match TokenService::new(cfg.token_secret.as_bytes(), cfg.token_ttl) {
        Ok(t) => t,
        Err(e) => {
            error!(err = %e, "failed to initialise token service");
            std::process::exit(1);
        }
    };
    let state = AppState::new(store, tokens, cfg.base_url.clone(), cfg.cookie_secure);

    // Request ID header name
    let x_request_id = axum::http::HeaderName::from_static("x-request-id");

    let mut app = router(state)
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid));

    // CORS - already validated in Config::from_env()
    let cors = if cfg.cors_allow_origin == HeaderValue::from_static("*") {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list([cfg.cors_allow_origin.clone()]))
            .allow_credentials(true)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
    };
    app = app.layer(cors);

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    info!(%addr, "api-server listening");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, err = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!(err = %e, "server error");
        std::process::exit(1);
    }
}

fn init_tracing(cfg: &config::Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match cfg.log_format {
        config::LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(fmt::time::SystemTime)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
        config::LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
    }
}

// Construct a store instance based on config and feature flags.
fn build_store(cfg: &config::Config) -> Result<AnyStore, CoreError> {
    match cfg.storage_provider {
        #[cfg(feature = "sqlite")]
        config::StorageProvider::Sqlite => {
            info!(path = %cfg.db_path.display(), "using sqlite store");
            AnyStore::sqlite(&cfg.db_path)
        }
        #[cfg(not(feature = "sqlite"))]
        config::StorageProvider::Sqlite => {
            warn!("sqlite feature disabled at build time; falling back to memory store");
            Ok(AnyStore::memory())
        }
        config::StorageProvider::Memory => Ok(AnyStore::memory()),
    }
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/url", post(create_link).get(list_links))
        .route("/url/analytics/:short_id", get(get_analytics))
        .route("/url/:short_id", get(redirect_link).delete(delete_link))
        .route("/user", post(signup))
        .route("/user/login", post(login))
        .route("/user/logout", post(logout))
        .route("/user/me", get(get_me))
        .with_state(state)
}

// ---- request identity ----

/// Token from an `Authorization: Bearer <token>` header. The scheme is
/// matched case-insensitively.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Resolve the caller from the session cookie, falling back to a bearer
/// token. Anything that does not verify is anonymous.
fn resolve_caller(state: &AppState, jar: &CookieJar, headers: &HeaderMap) -> Caller {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| bearer_token(headers));
    match token {
        Some(t) => state.tokens.verify(&t),
        None => Caller::Anonymous,
    }
}

fn anon_quota(jar: &CookieJar) -> AnonQuota {
    AnonQuota::from_client_state(jar.get(ANON_COOKIE).map(|c| c.value()))
}

// ---- responses ----

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(http_common::json_error_with_message(code, message))).into_response()
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(http_common::json_err("not_found"))).into_response()
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(http_common::json_err("internal")),
    )
        .into_response()
}

fn core_error_response(e: CoreError) -> Response {
    match e {
        CoreError::InvalidUrl(msg) | CoreError::InvalidShortId(msg) | CoreError::InvalidInput(msg) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_request", &msg)
        }
        CoreError::InvalidEmail => {
            error_response(StatusCode::BAD_REQUEST, "invalid_request", "invalid email")
        }
        CoreError::NotFound => not_found(),
        CoreError::AlreadyExists => {
            (StatusCode::CONFLICT, Json(http_common::json_err("conflict"))).into_response()
        }
        CoreError::CreationFailed { attempts } => {
            error!(attempts, "short id allocation exhausted");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "could not allocate a short id",
            )
        }
        CoreError::StoreUnavailable(msg) => {
            error!(err = %msg, "store unavailable");
            internal_error()
        }
    }
}

#[derive(Deserialize)]
struct CreateLinkReq {
    #[serde(default)]
    url: String,
}

#[derive(Serialize)]
struct CreatedOut {
    id: String,
    short_url: String,
}

#[derive(Serialize)]
struct LinkOut {
    id: String,
    short_url: String,
    target_url: String,
    created_at: String,
    total_clicks: usize,
}

#[derive(Serialize)]
struct ListOut {
    links: Vec<LinkOut>,
}

#[derive(Serialize)]
struct VisitOut {
    timestamp: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyticsOut {
    total_clicks: usize,
    analytics: Vec<VisitOut>,
}

#[derive(Serialize)]
struct AccountOut {
    id: String,
    name: String,
    email: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MeOut {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    anonymous_remaining: Option<usize>,
}

/// Build short URL using the configured base URL, or Host header as fallback.
fn short_url(state: &AppState, headers: &HeaderMap, id: &ShortId) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    http_common::build_short_url(state.base_url.as_deref(), host, id.as_str())
}

fn link_to_out(state: &AppState, headers: &HeaderMap, record: LinkRecord) -> LinkOut {
    LinkOut {
        short_url: short_url(state, headers, &record.short_id),
        id: record.short_id.as_str().to_string(),
        target_url: record.target_url,
        created_at: http_common::system_time_to_rfc3339(record.created_at),
        total_clicks: record.visits.len(),
    }
}

// ---- link handlers ----

async fn create_link(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Json(body): Json<CreateLinkReq>,
) -> Response {
    let caller = resolve_caller(&state, &jar, &headers);
    let quota = anon_quota(&jar);

    match state.links.create(&body.url, &caller, &quota) {
        Ok(CreateOutcome::Created(created)) => {
            let out = CreatedOut {
                id: created.record.short_id.as_str().to_string(),
                short_url: short_url(&state, &headers, &created.record.short_id),
            };
            match created.quota_update {
                Some(update) => {
                    let cookie = http_common::build_cookie(
                        ANON_COOKIE,
                        update.value,
                        update.max_age,
                        state.anon_cookie_opts(),
                    );
                    (StatusCode::CREATED, jar.add(cookie), Json(out)).into_response()
                }
                None => (StatusCode::CREATED, Json(out)).into_response(),
            }
        }
        Ok(CreateOutcome::QuotaExceeded) => {
            (StatusCode::FORBIDDEN, Json(http_common::json_quota_exceeded())).into_response()
        }
        Err(e) => core_error_response(e),
    }
}

async fn list_links(State(state): State<AppState>, jar: CookieJar, headers: HeaderMap) -> Response {
    let caller = resolve_caller(&state, &jar, &headers);
    let quota = anon_quota(&jar);
    match state.links.list(&caller, &quota) {
        Ok(records) => {
            let links = records
                .into_iter()
                .map(|r| link_to_out(&state, &headers, r))
                .collect();
            (StatusCode::OK, Json(ListOut { links })).into_response()
        }
        Err(e) => core_error_response(e),
    }
}

async fn redirect_link(State(state): State<AppState>, Path(short_id): Path<String>) -> Response {
    // Malformed ids are answered like unknown ones
    let Ok(id) = ShortId::new(short_id) else {
        warn!("malformed short id in path");
        return not_found();
    };
    match state.links.redirect(&id) {
        Ok(target) => match HeaderValue::from_str(&target) {
            Ok(location) => {
                info!(short_id = %id, redirect_to = %target, "redirect");
                (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, location)]).into_response()
            }
            Err(e) => {
                error!(short_id = %id, err = %e, "stored target is not a valid Location header");
                internal_error()
            }
        },
        Err(CoreError::NotFound) => {
            warn!(short_id = %id, "redirect 404");
            not_found()
        }
        Err(e) => core_error_response(e),
    }
}

async fn get_analytics(State(state): State<AppState>, Path(short_id): Path<String>) -> Response {
    let Ok(id) = ShortId::new(short_id) else {
        return not_found();
    };
    match state.links.analytics(&id) {
        Ok(stats) => {
            let out = AnalyticsOut {
                total_clicks: stats.total_clicks,
                analytics: stats
                    .visits
                    .into_iter()
                    .map(|v| VisitOut {
                        timestamp: http_common::system_time_to_millis(v.timestamp),
                    })
                    .collect(),
            };
            (StatusCode::OK, Json(out)).into_response()
        }
        Err(e) => core_error_response(e),
    }
}

async fn delete_link(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Path(short_id): Path<String>,
) -> Response {
    let Ok(id) = ShortId::new(short_id) else {
        return not_found();
    };
    let caller = resolve_caller(&state, &jar, &headers);
    match state.links.delete(&id, &caller) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => core_error_response(e),
    }
}

// ---- account handlers ----

#[derive(Deserialize)]
struct SignupReq {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
struct LoginReq {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

fn account_error_response(e: AccountError) -> Response {
    match e {
        AccountError::InvalidInput(msg) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_request", &msg)
        }
        AccountError::EmailTaken => error_response(
            StatusCode::CONFLICT,
            "conflict",
            "an account with this email already exists",
        ),
        AccountError::InvalidCredentials => error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "invalid email or password",
        ),
        AccountError::Hashing(msg) => {
            error!(err = %msg, "password hashing failed");
            internal_error()
        }
        AccountError::Store(e) => core_error_response(e),
    }
}

/// Issue a session for `account`: token cookie set, anonymous quota dropped.
fn start_session(state: &AppState, jar: CookieJar, account: &Account, status: StatusCode) -> Response {
    let token = match state.tokens.issue(&account.identity()) {
        Ok(t) => t,
        Err(e) => {
            error!(err = %e, "failed to issue session token");
            return internal_error();
        }
    };
    let out = AccountOut {
        id: account.id.as_str().to_string(),
        name: account.name.clone(),
        email: account.email.as_str().to_string(),
    };
    let jar = jar
        .add(http_common::build_cookie(
            SESSION_COOKIE,
            token,
            state.tokens.ttl(),
            state.session_cookie_opts(),
        ))
        .add(http_common::removal_cookie(ANON_COOKIE, state.anon_cookie_opts()));
    (status, jar, Json(out)).into_response()
}

// Argon2 hashing is CPU bound; keep it off the async workers.
async fn signup(State(state): State<AppState>, jar: CookieJar, Json(body): Json<SignupReq>) -> Response {
    let repo = state.accounts.clone();
    let now = state.links.now();
    let result = tokio::task::spawn_blocking(move || {
        accounts::signup(&repo, &body.name, &body.email, &body.password, now)
    })
    .await;
    match result {
        Ok(Ok(account)) => start_session(&state, jar, &account, StatusCode::CREATED),
        Ok(Err(e)) => account_error_response(e),
        Err(e) => {
            error!(err = %e, "signup task failed");
            internal_error()
        }
    }
}

async fn login(State(state): State<AppState>, jar: CookieJar, Json(body): Json<LoginReq>) -> Response {
    let repo = state.accounts.clone();
    let result =
        tokio::task::spawn_blocking(move || accounts::login(&repo, &body.email, &body.password)).await;
    match result {
        Ok(Ok(account)) => {
            info!(account_id = %account.id.as_str(), "login ok");
            start_session(&state, jar, &account, StatusCode::OK)
        }
        Ok(Err(e)) => {
            if matches!(e, AccountError::InvalidCredentials) {
                warn!("login rejected");
            }
            account_error_response(e)
        }
        Err(e) => {
            error!(err = %e, "login task failed");
            internal_error()
        }
    }
}

async fn logout(State(state): State<AppState>, jar: CookieJar) -> Response {
    let jar = jar
        .add(http_common::removal_cookie(SESSION_COOKIE, state.session_cookie_opts()))
        .add(http_common::removal_cookie(ANON_COOKIE, state.anon_cookie_opts()));
    (StatusCode::NO_CONTENT, jar).into_response()
}

async fn get_me(State(state): State<AppState>, jar: CookieJar, headers: HeaderMap) -> Response {
    let out = match resolve_caller(&state, &jar, &headers) {
        Caller::Authenticated(identity) => MeOut {
            authenticated: true,
            id: Some(identity.id.as_str().to_string()),
            email: Some(identity.email.as_str().to_string()),
            anonymous_remaining: None,
        },
        Caller::Anonymous => MeOut {
            authenticated: false,
            id: None,
            email: None,
            anonymous_remaining: Some(anon_quota(&jar).remaining()),
        },
    };
    (StatusCode::OK, Json(out)).into_response()
}
