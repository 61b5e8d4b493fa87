use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info};
use url::Url;

use crate::api_types::{AddUrlRequest, AddUrlResponse, ErrorResponse, HealthResponse, UrlList};
use crate::viz_export::{read_json, write_json};

/// Outcome of one append attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added { total: usize },
    Duplicate { total: usize },
}

/// `{"urls": [...]}` file, reloaded on every call so edits made by other
/// tools between requests are respected.
#[derive(Debug, Clone)]
pub struct UrlStore {
    path: PathBuf,
}

impl UrlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<UrlList> {
        if !self.path.exists() {
            return Ok(UrlList::default());
        }
        read_json(&self.path)
    }

    pub fn add(&self, url: &str) -> Result<AddOutcome> {
        let mut list = self.load()?;
        if list.urls.iter().any(|u| u == url) {
            return Ok(AddOutcome::Duplicate { total: list.urls.len() });
        }
        list.urls.push(url.to_string());
        write_json(&self.path, &list).with_context(|| format!("save url store {}", self.path.display()))?;
        Ok(AddOutcome::Added { total: list.urls.len() })
    }
}

#[derive(Clone)]
pub struct AppState {
    store: Arc<Mutex<UrlStore>>,
}

impl AppState {
    pub fn new(store: UrlStore) -> Self {
        Self { store: Arc::new(Mutex::new(store)) }
    }
}

/// Browser extension content scripts post from arbitrary page origins.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/add-url", post(add_url))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(bind: &str, store_path: &Path) -> Result<()> {
    let addr: SocketAddr = bind.parse().with_context(|| format!("invalid bind address {}", bind))?;
    let state = AppState::new(UrlStore::new(store_path));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    info!("URL collector listening - addr={}, store={}", addr, store_path.display());
    axum::serve(listener, app).await.context("collector server error")?;
    Ok(())
}

type Reply = (StatusCode, Json<Value>);

fn reply<T: serde::Serialize>(status: StatusCode, body: T) -> Reply {
    (status, Json(serde_json::to_value(body).unwrap_or(Value::Null)))
}

fn no_url() -> Reply {
    reply(StatusCode::BAD_REQUEST, ErrorResponse::new("No URL provided"))
}

/// Requested URL, if the body carries a non-empty, parseable one.
fn requested_url(body: &[u8]) -> Option<(String, AddUrlRequest)> {
    let req: AddUrlRequest = serde_json::from_slice(body).ok()?;
    let url = req.url.as_deref().map(str::trim).filter(|u| !u.is_empty())?;
    Url::parse(url).ok()?;
    Some((url.to_string(), req))
}

pub async fn add_url(State(state): State<AppState>, body: Bytes) -> Reply {
    let Some((url, req)) = requested_url(&body) else {
        debug!("Rejected add-url request without a usable url");
        return no_url();
    };

    let store = state.store.clone().lock_owned().await;
    let added = {
        let url = url.clone();
        tokio::task::spawn_blocking(move || store.add(&url))
            .await
            .context("url store task failed")
            .and_then(|r| r)
    };
    match added {
        Ok(AddOutcome::Added { total }) => {
            info!(
                "Added URL - url={}, design_keywords=[{}], critical_keywords=[{}], total={}",
                url,
                req.design_keywords.join(", "),
                req.critical_keywords.join(", "),
                total
            );
            reply(
                StatusCode::OK,
                AddUrlResponse {
                    success: true,
                    total_urls: total,
                    message: "URL added successfully".into(),
                },
            )
        }
        Ok(AddOutcome::Duplicate { total }) => {
            debug!("Duplicate URL - url={}, total={}", url, total);
            reply(StatusCode::CONFLICT, ErrorResponse::new("URL already exists").with_total(total))
        }
        Err(e) => {
            error!("URL store failure - url={}, error={:#}", url, e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, ErrorResponse::new(format!("{:#}", e)))
        }
    }
}

pub async fn health() -> Reply {
    reply(
        StatusCode::OK,
        HealthResponse {
            status: "running".into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        },
    )
}
