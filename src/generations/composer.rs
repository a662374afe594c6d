//! Selfie composition service
//!
//! The image model is opaque: photos and a scene go in, one image comes out.

use crate::gemini::{GeminiClient, RequestPart};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::info;

pub const MAX_CELEBRITY_PHOTOS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SceneTemplate {
    #[serde(rename = "Pakistani House Event")]
    PakistaniHouseEvent,
    Dhaba,
    Rooftop,
    Street,
    Mall,
    #[serde(rename = "New York")]
    NewYork,
    Switzerland,
    #[serde(rename = "Movie Set")]
    MovieSet,
    #[serde(rename = "Press Conference")]
    PressConference,
    #[serde(rename = "Random Encounter")]
    RandomEncounter,
    #[serde(rename = "Award Show")]
    AwardShow,
    #[serde(rename = "Concert Backstage")]
    ConcertBackstage,
}

impl SceneTemplate {
    pub const ALL: [SceneTemplate; 12] = [
        SceneTemplate::PakistaniHouseEvent,
        SceneTemplate::Dhaba,
        SceneTemplate::Rooftop,
        SceneTemplate::Street,
        SceneTemplate::Mall,
        SceneTemplate::NewYork,
        SceneTemplate::Switzerland,
        SceneTemplate::MovieSet,
        SceneTemplate::PressConference,
        SceneTemplate::RandomEncounter,
        SceneTemplate::AwardShow,
        SceneTemplate::ConcertBackstage,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SceneTemplate::PakistaniHouseEvent => "Pakistani House Event",
            SceneTemplate::Dhaba => "Dhaba",
            SceneTemplate::Rooftop => "Rooftop",
            SceneTemplate::Street => "Street",
            SceneTemplate::Mall => "Mall",
            SceneTemplate::NewYork => "New York",
            SceneTemplate::Switzerland => "Switzerland",
            SceneTemplate::MovieSet => "Movie Set",
            SceneTemplate::PressConference => "Press Conference",
            SceneTemplate::RandomEncounter => "Random Encounter",
            SceneTemplate::AwardShow => "Award Show",
            SceneTemplate::ConcertBackstage => "Concert Backstage",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.label().eq_ignore_ascii_case(label.trim()))
    }

    /// Short setting description handed to the image model
    pub fn setting(&self) -> &'static str {
        match self {
            SceneTemplate::PakistaniHouseEvent => "a colourful Pakistani family gathering at home",
            SceneTemplate::Dhaba => "a roadside dhaba at night with charpoys and string lights",
            SceneTemplate::Rooftop => "a rooftop terrace at dusk with city lights behind",
            SceneTemplate::Street => "a busy Pakistani street market",
            SceneTemplate::Mall => "a bright modern shopping mall",
            SceneTemplate::NewYork => "a New York City street",
            SceneTemplate::Switzerland => "a Swiss mountain valley in daylight",
            SceneTemplate::MovieSet => "a film set with studio lights and cameras",
            SceneTemplate::PressConference => "a press conference with microphones and flashes",
            SceneTemplate::RandomEncounter => "a candid fan encounter at an airport or cafe",
            SceneTemplate::AwardShow => "a red carpet award show",
            SceneTemplate::ConcertBackstage => "a concert backstage corridor",
        }
    }
}

impl std::fmt::Display for SceneTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ComposeRequest {
    pub user_photo: UploadedImage,
    pub celebrity_photos: Vec<UploadedImage>,
    pub template: SceneTemplate,
    pub custom_instructions: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ComposedImage {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ComposedImage {
    pub fn file_extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            _ => "png",
        }
    }
}

#[async_trait]
pub trait ImageComposer: Send + Sync {
    async fn compose(&self, request: &ComposeRequest) -> Result<ComposedImage>;
}

pub struct GeminiImageComposer {
    client: GeminiClient,
    model: String,
    timeout: Duration,
}

impl GeminiImageComposer {
    pub fn new(client: GeminiClient, model: String, timeout: Duration) -> Self {
        Self {
            client,
            model,
            timeout,
        }
    }
}

fn compose_prompt(request: &ComposeRequest) -> String {
    let mut prompt = format!(
        "Create one photorealistic group selfie of the person in the first image together with \
         the people in the other images, set in {}. Keep every face exactly as in its reference \
         photo. Front-camera point of view; no phone visible.",
        request.template.setting()
    );
    if let Some(extra) = request
        .custom_instructions
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        prompt.push_str("\nAdditional instructions: ");
        prompt.push_str(extra);
    }
    prompt
}

#[async_trait]
impl ImageComposer for GeminiImageComposer {
    async fn compose(&self, request: &ComposeRequest) -> Result<ComposedImage> {
        let mut parts = vec![
            RequestPart::text(compose_prompt(request)),
            RequestPart::image(&request.user_photo.mime_type, BASE64.encode(&request.user_photo.bytes)),
        ];
        for photo in &request.celebrity_photos {
            parts.push(RequestPart::image(&photo.mime_type, BASE64.encode(&photo.bytes)));
        }

        let config = json!({
            "responseModalities": ["IMAGE"],
            "imageConfig": { "aspectRatio": "3:4", "imageSize": "1K" }
        });

        let out = self
            .client
            .generate_content(&self.model, parts, config, self.timeout)
            .await?;
        let image = out
            .images
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no image data in response"))?;
        let bytes = BASE64
            .decode(image.data.as_bytes())
            .context("decode composed image")?;

        info!(
            template = %request.template,
            latency_ms = out.latency_ms,
            size = bytes.len(),
            "🎨 Selfie composed"
        );

        Ok(ComposedImage {
            mime_type: image.mime_type,
            bytes,
        })
    }
}

pub struct DisabledComposer;

#[async_trait]
impl ImageComposer for DisabledComposer {
    async fn compose(&self, _: &ComposeRequest) -> Result<ComposedImage> {
        Err(anyhow!("GEMINI_API_KEY not configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_labels_round_trip_through_serde() {
        let json = serde_json::to_string(&SceneTemplate::PakistaniHouseEvent).unwrap();
        assert_eq!(json, r#""Pakistani House Event""#);
        let t: SceneTemplate = serde_json::from_str(r#""Dhaba""#).unwrap();
        assert_eq!(t, SceneTemplate::Dhaba);
    }

    #[test]
    fn test_from_label_is_case_insensitive() {
        assert_eq!(
            SceneTemplate::from_label(" award show "),
            Some(SceneTemplate::AwardShow)
        );
        assert_eq!(SceneTemplate::from_label("Moon Base"), None);
    }

    #[test]
    fn test_prompt_includes_setting_and_custom_text() {
        let req = ComposeRequest {
            user_photo: UploadedImage {
                mime_type: "image/png".to_string(),
                bytes: vec![1],
            },
            celebrity_photos: vec![],
            template: SceneTemplate::Rooftop,
            custom_instructions: Some("everyone smiling".to_string()),
        };
        let prompt = compose_prompt(&req);
        assert!(prompt.contains("rooftop terrace"));
        assert!(prompt.contains("everyone smiling"));
    }

    #[test]
    fn test_file_extension_from_mime() {
        let img = |m: &str| ComposedImage {
            mime_type: m.to_string(),
            bytes: vec![],
        };
        assert_eq!(img("image/jpeg").file_extension(), "jpg");
        assert_eq!(img("image/png").file_extension(), "png");
        assert_eq!(img("application/octet-stream").file_extension(), "png");
    }
}
