//! AI group selfies and the per-user gallery

pub mod composer;
pub mod service;
pub mod store;

pub use composer::{
    ComposeRequest, ComposedImage, DisabledComposer, GeminiImageComposer, ImageComposer,
    SceneTemplate, UploadedImage,
};
pub use service::{
    retention_sweep_polling, GenerationError, GenerationOutcome, SelfieService,
    CREDITS_PER_GENERATION,
};
pub use store::{GenerationRecord, GenerationStore, PruneReport};
