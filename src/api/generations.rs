//! Selfie generation and gallery endpoints

use crate::api::{caller_id, decode_image, require_image_mime, ApiError, AppState};
use crate::auth::models::Claims;
use crate::generations::{
    composer::MAX_CELEBRITY_PHOTOS, ComposeRequest, GenerationError, GenerationRecord,
    SceneTemplate, UploadedImage,
};
use crate::api::payments::LimitQuery;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePayload {
    pub mime_type: String,
    pub base64: String,
}

impl ImagePayload {
    fn decode(&self) -> Result<UploadedImage, ApiError> {
        require_image_mime(&self.mime_type)?;
        Ok(UploadedImage {
            mime_type: self.mime_type.clone(),
            bytes: decode_image(&self.base64)?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGenerationRequest {
    pub user_photo: ImagePayload,
    pub celebrity_photos: Vec<ImagePayload>,
    pub template: SceneTemplate,
    #[serde(default)]
    pub custom_instructions: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationView {
    pub id: Uuid,
    pub template: String,
    pub created_at: String,
    pub image_url: String,
}

impl GenerationView {
    fn from_record(record: &GenerationRecord) -> Self {
        Self {
            id: record.id,
            template: record.template.clone(),
            created_at: record.created_at.to_rfc3339(),
            image_url: format!("/api/generations/{}/image", record.id),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGenerationResponse {
    pub generation: GenerationView,
    /// `data:` URL of the composed image
    pub image: String,
    pub balance: i64,
}

/// GET /api/templates
pub async fn list_templates() -> Json<Vec<&'static str>> {
    Json(SceneTemplate::ALL.iter().map(|t| t.label()).collect())
}

/// POST /api/generations
pub async fn create_generation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateGenerationRequest>,
) -> Result<(StatusCode, Json<CreateGenerationResponse>), ApiError> {
    let user_id = caller_id(&claims)?;

    if payload.celebrity_photos.is_empty() {
        return Err(ApiError::BadRequest(
            "Upload at least one celebrity photo".to_string(),
        ));
    }
    if payload.celebrity_photos.len() > MAX_CELEBRITY_PHOTOS {
        return Err(ApiError::BadRequest(format!(
            "At most {MAX_CELEBRITY_PHOTOS} celebrity photos are allowed"
        )));
    }

    let request = ComposeRequest {
        user_photo: payload.user_photo.decode()?,
        celebrity_photos: payload
            .celebrity_photos
            .iter()
            .map(ImagePayload::decode)
            .collect::<Result<Vec<_>, _>>()?,
        template: payload.template,
        custom_instructions: payload.custom_instructions,
    };

    let outcome = state
        .selfies
        .generate(user_id, request)
        .await
        .map_err(|e| match e {
            GenerationError::InsufficientCredits { available } => {
                ApiError::InsufficientCredits { available }
            }
            GenerationError::ComposeFailed(err) => {
                warn!(user_id = %user_id, "selfie generation failed: {:#}", err);
                ApiError::Upstream("Image generation failed. No credits were used.".to_string())
            }
            GenerationError::Storage(err) => ApiError::Internal(err),
        })?;

    Ok((
        StatusCode::CREATED,
        Json(CreateGenerationResponse {
            generation: GenerationView::from_record(&outcome.record),
            image: format!(
                "data:{};base64,{}",
                outcome.mime_type,
                BASE64.encode(&outcome.image)
            ),
            balance: outcome.balance,
        }),
    ))
}

/// GET /api/generations
pub async fn list_generations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<GenerationView>>, ApiError> {
    let user_id = caller_id(&claims)?;
    let rows = state
        .selfies
        .store()
        .list_for_user(user_id, q.limit.unwrap_or(50))
        .await?;
    Ok(Json(rows.iter().map(GenerationView::from_record).collect()))
}

/// GET /api/generations/:id/image
pub async fn get_generation_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let user_id = caller_id(&claims)?;
    let record = state
        .selfies
        .store()
        .get(id)
        .await?
        .filter(|r| r.user_id == user_id)
        .ok_or(ApiError::NotFound("Generation"))?;

    let bytes = match tokio::fs::read(&record.image_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("Generation"))
        }
        Err(e) => return Err(ApiError::Internal(e.into())),
    };

    let content_type = match record.image_path.extension().and_then(|e| e.to_str()) {
        Some("jpg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    };

    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}
