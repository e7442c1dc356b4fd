//! hiregate is an onboarding, visa document and housing API for HR teams.

#![forbid(unsafe_code)]
pub mod clock;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod mail;
mod middleware;
pub mod model;
mod router;
pub mod storage;
pub mod telemetry;
pub mod token;
pub mod workflow;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use error::ServerError;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub db: database::Database,
    pub crypto: Arc<crypto::Crypto>,
    pub token: token::TokenManager,
    pub mail: Arc<dyn mail::Mailer>,
    pub storage: Arc<dyn storage::ObjectStorage>,
    pub clock: Arc<dyn clock::Clock>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    router::routes(state)
        .route_layer(axum::middleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let path = std::env::var("CONFIG_PATH").unwrap_or_default();
    let config = config::Configuration::default().path(path.into()).read()?;

    let db = match config.postgres {
        Some(ref config) => {
            database::Database::new(
                &config.address,
                config
                    .username
                    .as_deref()
                    .unwrap_or(database::DEFAULT_CREDENTIALS),
                config
                    .password
                    .as_deref()
                    .unwrap_or(database::DEFAULT_CREDENTIALS),
                config
                    .database
                    .as_deref()
                    .unwrap_or(database::DEFAULT_DATABASE_NAME),
                config.pool_size.unwrap_or(database::DEFAULT_POOL_SIZE),
            )
            .await?
        },
        None => {
            tracing::warn!("missing `postgres` entry on `config.yaml` file, data is kept in memory");
            database::Database::memory()
        },
    };

    let crypto = Arc::new(crypto::Crypto::new(config.argon2.clone())?);

    // handle jwt.
    let secret = match &config.token {
        Some(token) => token.secret.clone().into_bytes(),
        None => {
            tracing::warn!("missing `token` entry on `config.yaml` file, sessions end on restart");
            crypto::random_token().into_bytes()
        },
    };
    let mut token = token::TokenManager::new(&config.url, &secret);
    if let Some(audience) = config.token.as_ref().and_then(|t| t.audience.as_ref()) {
        token.audience(audience);
    }

    // handle mail sender.
    let mail: Arc<dyn mail::Mailer> = match &config.mail {
        Some(cfg) => Arc::new(mail::MailManager::new(cfg, config.registration_url()).await?),
        None => {
            tracing::warn!("missing `mail` entry on `config.yaml` file, emails are only logged");
            Arc::new(mail::MailManager::disconnected(config.registration_url()))
        },
    };

    // handle uploaded files.
    let storage: Arc<dyn storage::ObjectStorage> = {
        let (root, secret, public_url) = match &config.storage {
            Some(cfg) => (
                cfg.root.clone(),
                cfg.secret.clone(),
                cfg.public_url.clone().unwrap_or_else(|| config.url.clone()),
            ),
            None => {
                tracing::warn!("missing `storage` entry on `config.yaml` file, using ./uploads");
                ("uploads".into(), crypto::random_token(), config.url.clone())
            },
        };
        Arc::new(storage::LocalStorage::new(
            root,
            &public_url,
            crypto::Signer::new(secret)?,
        ))
    };

    Ok(AppState {
        config,
        db,
        crypto,
        token,
        mail,
        storage,
        clock: Arc::new(clock::SystemClock),
    })
}
