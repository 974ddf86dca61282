//! Image provider adapters
//!
//! Every backend implements [`ImageProvider`]; the orchestrator only ever sees
//! `Arc<dyn ImageProvider>` values built by [`create_providers`].

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

mod error;
mod http;
pub mod mock;
mod openai;
mod openrouter;
mod stability;
mod traits;

pub use error::{ErrorKind, GenerationError, ProviderError};
pub use mock::{MockProvider, MockStep};
pub use openai::OpenAiImageProvider;
pub use openrouter::OpenRouterImageProvider;
pub use stability::StabilityProvider;
pub use traits::{ImageProvider, MAX_IMAGE_BYTES, MIN_IMAGE_BYTES, ProviderInfo, validate_image_bytes};

use crate::config::ProviderConfig;
use crate::domain::ProviderType;

/// Create a provider based on the type specified in config
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn ImageProvider>, ProviderError> {
    debug!(name = %config.name, provider_type = %config.provider_type, "create_provider: called");
    match config.provider_type {
        ProviderType::Mock => {
            debug!("create_provider: creating mock provider");
            Ok(Arc::new(MockProvider::new(config.clone())))
        }
        ProviderType::Dalle3 => {
            debug!("create_provider: creating DALL-E 3 provider");
            Ok(Arc::new(OpenAiImageProvider::from_config(config)?))
        }
        ProviderType::Sdxl => {
            debug!("create_provider: creating SDXL provider");
            Ok(Arc::new(StabilityProvider::from_config(config)?))
        }
        ProviderType::OpenRouter => {
            debug!("create_provider: creating OpenRouter provider");
            Ok(Arc::new(OpenRouterImageProvider::from_config(config)?))
        }
    }
}

/// Create the ordered provider set, rejecting duplicate names
pub fn create_providers(configs: &[ProviderConfig]) -> Result<Vec<Arc<dyn ImageProvider>>, ProviderError> {
    debug!(count = configs.len(), "create_providers: called");
    let mut seen = HashSet::new();
    configs
        .iter()
        .map(|config| {
            if !seen.insert(config.name.as_str()) {
                return Err(ProviderError::DuplicateName(config.name.clone()));
            }
            create_provider(config)
        })
        .collect()
}
