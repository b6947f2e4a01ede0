use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::HeaderValue;
use axum::http::header::CONTENT_TYPE;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;
use url::Url;

use crate::category::Category;
use crate::config::Settings;
use crate::error::TryOnError;
use crate::fal::{TryOnJob, TryOnProvider};
use crate::image_processing;
use crate::store::{LocalFileStorage, compute_hash};

const DEMO_HTML: &str = include_str!("../static/demo.html");
const WIDGET_JS: &str = include_str!("../static/tryon-widget.js");

/// Limit on the optional free-text style guidance field.
const PROMPT_EXTRA_MAX_CHARS: usize = 400;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub storage: Arc<LocalFileStorage>,
    pub provider: Arc<dyn TryOnProvider>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TryOnResponse {
    image_url: String,
    description: String,
    request_id: String,
    ttl_minutes: u64,
    created_at: DateTime<Utc>,
}

pub fn create_router(state: AppState) -> Router {
    // Leave headroom above the upload bound so our own 413 fires with a
    // useful message instead of the framework's generic limit error.
    let body_limit = (state.settings.max_upload_bytes() + 1024 * 1024) as usize;
    let cors = cors_layer(&state.settings.allowed_origins);

    Router::new()
        .route("/", get(demo_page))
        .route("/health", get(health))
        .route("/widget/tryon-widget.js", get(widget_js))
        .route(
            &state.settings.api_path(),
            post(handle_try_on).layer(DefaultBodyLimit::max(body_limit)),
        )
        .nest_service("/tmp", ServeDir::new(state.storage.base_dir()))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn demo_page() -> Html<&'static str> {
    Html(DEMO_HTML)
}

async fn widget_js() -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/javascript; charset=utf-8")], WIDGET_JS)
}

#[derive(Default)]
struct TryOnFields {
    person_name: Option<String>,
    person_bytes: Option<Vec<u8>>,
    garment_name: Option<String>,
    garment_bytes: Option<Vec<u8>>,
    garment_url: Option<String>,
    category: Option<Category>,
    prompt_extra: Option<String>,
}

async fn collect_fields(mut multipart: Multipart) -> Result<TryOnFields, TryOnError> {
    let mut fields = TryOnFields::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return Err(TryOnError::InvalidInput(format!(
                    "malformed multipart body: {err}"
                )));
            }
        };
        let read_failed =
            |err| TryOnError::InvalidInput(format!("failed to read multipart field: {err}"));
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("person") => {
                fields.person_name = Some(field.file_name().unwrap_or("").to_string());
                fields.person_bytes = Some(field.bytes().await.map_err(read_failed)?.to_vec());
            }
            Some("garment") => {
                fields.garment_name = Some(field.file_name().unwrap_or("").to_string());
                fields.garment_bytes = Some(field.bytes().await.map_err(read_failed)?.to_vec());
            }
            Some("garmentUrl") => {
                fields.garment_url = Some(field.text().await.map_err(read_failed)?);
            }
            Some("category") => {
                let raw = field.text().await.map_err(read_failed)?;
                let parsed = raw
                    .parse::<Category>()
                    .map_err(TryOnError::InvalidInput)?;
                fields.category = Some(parsed);
            }
            Some("promptExtra") => {
                fields.prompt_extra = Some(field.text().await.map_err(read_failed)?);
            }
            // Unknown fields (e.g. a future mask) are tolerated.
            _ => {}
        }
    }
    Ok(fields)
}

fn policy_guard(file_name: &str) -> Result<(), TryOnError> {
    let name = file_name.to_lowercase();
    if name.contains("nude") || name.contains("nsfw") {
        return Err(TryOnError::PolicyRejected);
    }
    Ok(())
}

fn validate_garment_url(raw: &str) -> Result<String, TryOnError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TryOnError::InvalidInput(
            "garment URL must not be empty".to_string(),
        ));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|err| TryOnError::InvalidInput(format!("invalid garment URL: {err}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.to_string()),
        scheme => Err(TryOnError::InvalidInput(format!(
            "garment URL must use http or https, got {scheme}"
        ))),
    }
}

/// Validates an uploaded image, runs it through the strip/resize
/// pipeline and stores it under the given key. Returns the public URL
/// the provider will fetch it from.
async fn store_processed_upload(
    state: &AppState,
    key: &str,
    file_name: &str,
    bytes: &[u8],
) -> Result<String, TryOnError> {
    policy_guard(file_name)?;
    if bytes.is_empty() {
        return Err(TryOnError::InvalidInput(format!(
            "uploaded file '{file_name}' is empty"
        )));
    }
    if bytes.len() as u64 > state.settings.max_upload_bytes() {
        return Err(TryOnError::PayloadTooLarge(state.settings.max_upload_mb));
    }
    let mime_type =
        image_processing::detect_mime_type(bytes).ok_or(TryOnError::UnsupportedMediaType)?;
    let processed = image_processing::prepare_upload(bytes, mime_type)
        .map_err(|_| TryOnError::UnsupportedMediaType)?;

    state
        .storage
        .put(key, &processed.bytes)
        .await
        .map_err(|err| TryOnError::Storage(err.to_string()))?;
    Ok(state.storage.get_public_url(key))
}

async fn handle_try_on(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<TryOnResponse>, TryOnError> {
    let fields = collect_fields(multipart).await?;

    let person_name = fields.person_name.clone().unwrap_or_default();
    let person_bytes = fields
        .person_bytes
        .as_deref()
        .ok_or_else(|| TryOnError::InvalidInput("missing 'person' file".to_string()))?;

    if let Some(extra) = fields.prompt_extra.as_deref() {
        if extra.chars().count() > PROMPT_EXTRA_MAX_CHARS {
            return Err(TryOnError::InvalidInput(format!(
                "promptExtra exceeds {PROMPT_EXTRA_MAX_CHARS} characters"
            )));
        }
    }
    if fields.garment_url.is_none() && fields.garment_bytes.is_none() {
        return Err(TryOnError::InvalidInput(
            "missing garment reference: provide 'garmentUrl' or a 'garment' file".to_string(),
        ));
    }

    let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let id_input = format!("tryon:{timestamp}:{person_name}:{}", person_bytes.len());
    let id = compute_hash(&id_input);
    let created_at = Utc::now();

    let person_key = LocalFileStorage::upload_key(&id);
    let person_url =
        store_processed_upload(&state, &person_key, &person_name, person_bytes).await?;
    let mut stored_keys = vec![person_key];

    // A binary garment travels the same pipeline as the photo so the
    // provider can fetch both by URL.
    let garment_url = match (&fields.garment_url, &fields.garment_bytes) {
        (Some(raw), _) => validate_garment_url(raw)?,
        (None, Some(bytes)) => {
            let garment_name = fields.garment_name.clone().unwrap_or_default();
            let garment_key = LocalFileStorage::upload_key(&format!("{id}-garment"));
            let url = match store_processed_upload(&state, &garment_key, &garment_name, bytes)
                .await
            {
                Ok(url) => url,
                Err(err) => {
                    cleanup_artifacts(&state, &stored_keys).await;
                    return Err(err);
                }
            };
            stored_keys.push(garment_key);
            url
        }
        (None, None) => unreachable!("checked above"),
    };

    let category = fields.category.or_else(|| {
        let reference = fields
            .garment_url
            .as_deref()
            .or(fields.garment_name.as_deref())?;
        Some(Category::infer(reference))
    });

    let job = TryOnJob {
        person_url,
        garment_url,
        category,
        prompt_extra: fields
            .prompt_extra
            .map(|extra| extra.trim().to_string())
            .filter(|extra| !extra.is_empty()),
    };

    let short_id = &id[..12];
    info!(
        request_id = %short_id,
        category = category.map(|c| c.as_str()).unwrap_or("unspecified"),
        "forwarding try-on request to provider"
    );

    let generated = match state.provider.try_on(job).await {
        Ok(generated) => generated,
        Err(err) => {
            // No partial state: drop this request's uploads right away
            // rather than waiting for the sweep.
            cleanup_artifacts(&state, &stored_keys).await;
            return Err(TryOnError::Provider(err.to_string()));
        }
    };

    let result_key = LocalFileStorage::result_key(&id);
    if let Err(err) = state.storage.put(&result_key, &generated.bytes).await {
        cleanup_artifacts(&state, &stored_keys).await;
        return Err(TryOnError::Storage(err.to_string()));
    }

    let description = if generated.description.trim().is_empty() {
        "Generated try-on preview".to_string()
    } else {
        generated.description
    };

    Ok(Json(TryOnResponse {
        image_url: state.storage.get_public_url(&result_key),
        description,
        request_id: generated.request_id,
        ttl_minutes: state.settings.ttl_minutes(),
        created_at,
    }))
}

async fn cleanup_artifacts(state: &AppState, keys: &[String]) {
    for key in keys {
        if let Err(err) = state.storage.delete(key).await {
            tracing::warn!(key = %key, error = %err, "failed to clean up artifact");
        }
    }
}
