//! Domain types for panel image generation
//!
//! Explicit, typed shapes for everything that crosses a component boundary:
//! image parameters, task lifecycle records and generation results.

mod image;
mod result;
mod task;

pub use image::{ImageFormat, ImageQuality, ImageSize, ProviderType};
pub use result::{
    BatchGenerationResult, GenerationResult, PanelOutcome, ValidationIssue, ValidationResult, ValidationSeverity,
    ValidationSummary,
};
pub use task::{GenerationRequest, GenerationTask, TaskSpec, TaskStatus};
