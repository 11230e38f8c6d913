use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, info};
use uuid::Uuid;

/// First bytes of every PNG file.
pub const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cat {
    #[serde(rename = "_id")]
    pub id: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl Cat {
    fn new(tags: &[&str], owner: Option<&str>, day: u32) -> Self {
        let created_at = Utc
            .with_ymd_and_hms(2024, 3, day, 10, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self {
            id: Uuid::new_v4().simple().to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            owner: owner.map(str::to_string),
            created_at,
            updated_at: created_at,
        }
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

#[derive(Deserialize)]
pub struct ListParams {
    /// Comma-separated; a cat must carry every listed tag.
    pub tags: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    cats: Arc<Vec<Cat>>,
    image_hits: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(cats: Vec<Cat>) -> Self {
        Self {
            cats: Arc::new(cats),
            image_hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The catalog every fresh server starts with.
    pub fn seeded() -> Self {
        Self::new(vec![
            Cat::new(&["cute", "orange"], None, 1),
            Cat::new(&["grumpy"], Some("Tom"), 2),
            Cat::new(&["cute", "sleepy"], Some("Ann"), 3),
            Cat::new(&[], None, 4),
        ])
    }

    pub fn cats(&self) -> &[Cat] {
        &self.cats
    }

    /// Number of images served so far.
    pub fn image_hits(&self) -> usize {
        self.image_hits.load(Ordering::SeqCst)
    }
}

pub fn app() -> Router {
    app_with_state(AppState::seeded())
}

pub fn app_with_state(state: AppState) -> Router {
    Router::new()
        .route("/api/cats", get(list_cats))
        .route("/cat/{id_or_tag}", get(cat_image))
        .route("/status/{code}", get(status))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with_state(listener, AppState::seeded()).await
}

pub async fn run_with_state(listener: TcpListener, state: AppState) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, cats = state.cats().len(), "mock server ready");
    }
    axum::serve(listener, app_with_state(state)).await
}

async fn list_cats(State(state): State<AppState>, Query(params): Query<ListParams>) -> Json<Vec<Cat>> {
    let wanted: Vec<&str> = params
        .tags
        .as_deref()
        .map(|raw| raw.split(',').map(str::trim).filter(|t| !t.is_empty()).collect())
        .unwrap_or_default();
    let cats = state
        .cats()
        .iter()
        .filter(|cat| wanted.iter().all(|tag| cat.has_tag(tag)))
        .cloned()
        .collect::<Vec<_>>();
    debug!(tags = ?wanted, count = cats.len(), "listing cats");
    Json(cats)
}

async fn cat_image(
    State(state): State<AppState>,
    Path(id_or_tag): Path<String>,
) -> Result<impl IntoResponse, StatusCode> {
    let cat = state
        .cats()
        .iter()
        .find(|cat| cat.id == id_or_tag)
        .or_else(|| state.cats().iter().find(|cat| cat.has_tag(&id_or_tag)))
        .ok_or(StatusCode::NOT_FOUND)?;
    state.image_hits.fetch_add(1, Ordering::SeqCst);
    debug!(id = %cat.id, requested = %id_or_tag, "serving image");
    Ok(([(header::CONTENT_TYPE, "image/png")], image_bytes(&cat.id)))
}

async fn status(Path(code): Path<u16>) -> Result<(StatusCode, String), StatusCode> {
    let status = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok((status, format!("status {code}")))
}

/// Placeholder image for `id`: the PNG signature followed by the id.
pub fn image_bytes(id: &str) -> Vec<u8> {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(id.as_bytes());
    bytes
}
