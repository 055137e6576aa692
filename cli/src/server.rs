use std::collections::BTreeMap;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Extension, Json, Router,
    extract::{Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::tls::TlsPaths;
use crate::views::{self, IndexTemplate};
use grocer_core::form::{self, FormError};
use grocer_core::models::parse_id;
use grocer_core::{Database, KeyStore, Mutation, StoreError};

const BODY_LIMIT: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    db: Database,
    keys: Arc<KeyStore>,
    index: Arc<IndexTemplate>,
    transport: Transport,
}

/// How requests reach the server and whether plain HTTP is redirected.
#[derive(Debug, Clone, Copy)]
pub struct Transport {
    pub require_https: bool,
    /// The server itself terminates TLS.
    pub tls: bool,
}

/// The validated key of the current request.
#[derive(Debug, Clone)]
struct AccessKey(String);

pub struct ServeOptions {
    pub port: u16,
    pub bind: String,
    pub tls: Option<TlsPaths>,
    pub require_https: bool,
    pub index: IndexTemplate,
    /// A key generated on this run, shown once with a QR code.
    pub new_key: Option<String>,
}

// --- Request types ---

#[derive(Deserialize)]
struct KeyParam {
    key: Option<String>,
}

#[derive(Deserialize)]
struct SearchParams {
    search_terms: Option<String>,
}

// --- Error handling ---

enum ApiError {
    BadRequest(String),
    Validation(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) | Self::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                tracing::error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(Mutation::failed(message))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(msg) => Self::Validation(msg),
            other => Self::Internal(other.into()),
        }
    }
}

impl From<FormError> for ApiError {
    fn from(err: FormError) -> Self {
        tracing::warn!("{err}");
        Self::BadRequest(err.to_string())
    }
}

// --- Middleware ---

/// Gate every request: redirect plain HTTP to HTTPS, then require a known
/// `key` query parameter. Rejections carry no body.
async fn authenticate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if state.transport.require_https && !is_secure(&request, state.transport) {
        return match secure_url(&request) {
            Some(url) => (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, url)]).into_response(),
            None => StatusCode::BAD_REQUEST.into_response(),
        };
    }

    let key = Query::<KeyParam>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(p)| p.key)
        .filter(|k| state.keys.contains(k));

    match key {
        Some(key) => {
            request.extensions_mut().insert(AccessKey(key));
            next.run(request).await
        }
        None => {
            tracing::debug!(path = request.uri().path(), "rejected request without a valid key");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}

fn is_secure(request: &Request, transport: Transport) -> bool {
    // The connection itself is TLS; a client-sent header cannot downgrade it
    if transport.tls {
        return true;
    }
    if let Some(proto) = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
    {
        // A proxy chain appends; the first hop is the client's
        return proto
            .split(',')
            .next()
            .is_some_and(|p| p.trim().eq_ignore_ascii_case("https"));
    }
    request
        .uri()
        .scheme_str()
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https"))
}

/// The request URL with the scheme switched to `https`.
fn secure_url(request: &Request) -> Option<String> {
    let host = request
        .uri()
        .authority()
        .map(|a| a.as_str().to_string())
        .or_else(|| {
            request
                .headers()
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })?;
    let path = request
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    Some(format!("https://{host}{path}"))
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static(
            "default-src 'none'; script-src 'unsafe-inline'; style-src 'unsafe-inline'; \
             connect-src 'self'; form-action 'self'",
        ),
    );
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    response
}

// --- Handlers ---

async fn root(Extension(AccessKey(key)): Extension<AccessKey>) -> Redirect {
    Redirect::to(&format!("/index.html?key={}", urlencoding::encode(&key)))
}

async fn index_page(
    State(state): State<AppState>,
    Extension(AccessKey(key)): Extension<AccessKey>,
) -> Result<Html<String>, ApiError> {
    let page = state.index.render(&key)?;
    Ok(Html(page))
}

async fn search_food(
    State(state): State<AppState>,
    Extension(AccessKey(key)): Extension<AccessKey>,
    Query(params): Query<SearchParams>,
) -> Result<Html<String>, ApiError> {
    let terms: Vec<String> = params
        .search_terms
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let records = with_db(&state, move |db| db.search(terms.as_slice())).await?;
    Ok(Html(views::results_table(&records, &key)))
}

async fn create_food(State(state): State<AppState>, body: String) -> Result<Response, ApiError> {
    let fields = decode_form(&body)?;
    let mutation = with_db(&state, move |db| db.create(&fields)).await?;
    Ok(mutation_response(mutation))
}

async fn update_food(State(state): State<AppState>, body: String) -> Result<Response, ApiError> {
    let fields = decode_form(&body)?;
    let mutation = with_db(&state, move |db| db.update(&fields)).await?;
    Ok(mutation_response(mutation))
}

async fn delete_food(State(state): State<AppState>, body: String) -> Result<Response, ApiError> {
    let fields = decode_form(&body)?;
    let id = parse_id(&fields)?;
    let mutation = with_db(&state, move |db| db.soft_delete(id)).await?;
    Ok(mutation_response(mutation))
}

/// Decode a form body. The access key may ride along in the body; it is not
/// record data.
fn decode_form(body: &str) -> Result<BTreeMap<String, String>, ApiError> {
    let mut fields = form::decode(body)?;
    fields.remove("key");
    Ok(fields)
}

/// Run a store operation on the blocking pool.
async fn with_db<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    let result = tokio::task::spawn_blocking(move || op(&db))
        .await
        .context("database task failed")?;
    Ok(result?)
}

fn mutation_response(mutation: Mutation) -> Response {
    if mutation.success {
        tracing::info!(id = ?mutation.id, rows = mutation.rows_affected, "{}", mutation.message);
        (StatusCode::OK, Json(mutation)).into_response()
    } else {
        tracing::warn!("storage rejected change: {}", mutation.message);
        (StatusCode::UNPROCESSABLE_ENTITY, Json(mutation)).into_response()
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/index.html", get(index_page))
        .route(
            "/food",
            get(search_food)
                .post(create_food)
                .put(update_food)
                .delete(delete_food),
        )
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        // Spans carry the path only; the query holds the access key
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            tracing::info_span!(
                "request",
                method = %request.method(),
                path = request.uri().path(),
            )
        }))
        .with_state(state)
}

// --- Server startup ---

fn detect_local_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let addr = socket.local_addr().ok()?;
    let ip = addr.ip();
    if ip.is_loopback() {
        None
    } else {
        Some(ip.to_string())
    }
}

/// Print a compact QR code to stderr using Unicode half-block characters.
///
/// Each character encodes two vertical modules, halving the output height.
fn print_qr_code(data: &str) {
    use qrcode::QrCode;

    let code = match QrCode::new(data.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("failed to generate QR code: {e}");
            return;
        }
    };

    let width = code.width();
    let dark: Vec<bool> = code
        .into_colors()
        .into_iter()
        .map(|c| c == qrcode::Color::Dark)
        .collect();

    // 1-module quiet zone on each side
    let total = width + 2;
    let is_dark = |row: usize, col: usize| -> bool {
        (1..=width).contains(&row)
            && (1..=width).contains(&col)
            && dark[(row - 1) * width + (col - 1)]
    };

    eprintln!();
    eprintln!("Scan to open grocer:");
    for row in (0..total).step_by(2) {
        let line: String = (0..total)
            .map(|col| match (is_dark(row, col), is_dark(row + 1, col)) {
                (true, true) => '\u{2588}',
                (true, false) => '\u{2580}',
                (false, true) => '\u{2584}',
                (false, false) => ' ',
            })
            .collect();
        eprintln!("{line}");
    }
    eprintln!();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

pub async fn start_server(db: Database, keys: KeyStore, opts: ServeOptions) -> anyhow::Result<()> {
    let transport = Transport {
        require_https: opts.require_https,
        tls: opts.tls.is_some(),
    };
    let state = AppState {
        db,
        keys: Arc::new(keys),
        index: Arc::new(opts.index),
        transport,
    };
    tracing::info!(keys = state.keys.len(), "loaded access keys");

    if transport.require_https && !transport.tls {
        tracing::warn!(
            "serving plain HTTP with HTTPS required; every request must arrive through a TLS proxy"
        );
    }

    let app = build_router(state);
    let scheme = if transport.tls { "https" } else { "http" };
    let bind = opts.bind.as_str();
    let port = opts.port;

    if let Some(ref key) = opts.new_key {
        let host = if bind == "0.0.0.0" {
            detect_local_ip().unwrap_or_else(|| bind.to_string())
        } else {
            bind.to_string()
        };
        let url = format!(
            "{scheme}://{host}:{port}/index.html?key={}",
            urlencoding::encode(key)
        );
        eprintln!("Generated new access key: {key}");
        eprintln!("Open: {url}");
        print_qr_code(&url);
    }

    if let Some(tls) = opts.tls {
        let extra_hosts = vec![bind.to_string()];
        let fingerprint = crate::tls::ensure_cert(&tls, &extra_hosts)?;

        let rustls_config =
            axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .context("failed to load TLS certificate")?;

        let addr = format!("{bind}:{port}")
            .parse::<std::net::SocketAddr>()
            .context("invalid bind address")?;

        tracing::info!("listening on https://{bind}:{port}");
        tracing::info!("certificate fingerprint (SHA-256): {fingerprint}");

        let handle = axum_server::Handle::new();
        let shutdown = handle.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        axum_server::bind_rustls(addr, rustls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
            .await
            .with_context(|| format!("failed to bind {bind}:{port}"))?;
        tracing::info!("listening on http://{bind}:{port}");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    Ok(())
}
