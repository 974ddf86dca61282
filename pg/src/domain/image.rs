//! Image parameter types shared by providers, tasks and configuration

use serde::{Deserialize, Serialize};

/// Supported image provider backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Scripted in-process provider, used offline and in tests
    #[default]
    Mock,
    /// OpenAI DALL-E 3
    #[serde(alias = "dall-e-3")]
    Dalle3,
    /// Stability AI SDXL
    #[serde(alias = "stable-diffusion-xl")]
    Sdxl,
    /// Image models behind OpenRouter's chat completions API
    #[serde(alias = "open-router")]
    OpenRouter,
}

impl ProviderType {
    /// Environment variable conventionally holding this provider's API key
    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Self::Mock => "",
            Self::Dalle3 => "OPENAI_API_KEY",
            Self::Sdxl => "STABILITY_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    /// Whether this provider talks to a remote API (and therefore needs a key)
    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::Mock)
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mock => write!(f, "mock"),
            Self::Dalle3 => write!(f, "dalle3"),
            Self::Sdxl => write!(f, "sdxl"),
            Self::OpenRouter => write!(f, "openrouter"),
        }
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "dalle3" | "dall-e-3" => Ok(Self::Dalle3),
            "sdxl" | "stable-diffusion-xl" => Ok(Self::Sdxl),
            "openrouter" | "open-router" => Ok(Self::OpenRouter),
            _ => Err(format!(
                "Unknown provider type: {}. Valid types: mock, dalle3, sdxl, openrouter",
                s
            )),
        }
    }
}

/// Image quality levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    #[default]
    Standard,
    Hd,
    Ultra,
}

impl ImageQuality {
    /// HD or better
    pub fn is_hd(&self) -> bool {
        *self >= Self::Hd
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Hd => "hd",
            Self::Ultra => "ultra",
        }
    }
}

impl std::fmt::Display for ImageQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ImageQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "hd" => Ok(Self::Hd),
            "ultra" => Ok(Self::Ultra),
            _ => Err(format!("Unknown quality: {}. Valid qualities: standard, hd, ultra", s)),
        }
    }
}

/// Standard image sizes, serialized as `WIDTHxHEIGHT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum ImageSize {
    Square256,
    Square512,
    #[default]
    Square1024,
    Landscape1024,
    Portrait1024,
    Landscape1792,
    Portrait1792,
}

impl ImageSize {
    pub const ALL: [ImageSize; 7] = [
        Self::Square256,
        Self::Square512,
        Self::Square1024,
        Self::Landscape1024,
        Self::Portrait1024,
        Self::Landscape1792,
        Self::Portrait1792,
    ];

    /// (width, height) in pixels
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Self::Square256 => (256, 256),
            Self::Square512 => (512, 512),
            Self::Square1024 => (1024, 1024),
            Self::Landscape1024 => (1024, 768),
            Self::Portrait1024 => (768, 1024),
            Self::Landscape1792 => (1792, 1024),
            Self::Portrait1792 => (1024, 1792),
        }
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "{}x{}", w, h)
    }
}

impl std::str::FromStr for ImageSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|size| size.to_string() == normalized)
            .ok_or_else(|| format!("Unknown image size: {}", s))
    }
}

impl TryFrom<String> for ImageSize {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ImageSize> for String {
    fn from(size: ImageSize) -> Self {
        size.to_string()
    }
}

/// Encoded image formats recognized by structural validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Webp,
}

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const JPEG_MAGIC: &[u8] = b"\xff\xd8";

impl ImageFormat {
    /// Sniff the format from the leading magic bytes
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(PNG_MAGIC) {
            Some(Self::Png)
        } else if bytes.starts_with(JPEG_MAGIC) {
            Some(Self::Jpeg)
        } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
            Some(Self::Webp)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::Jpeg => write!(f, "jpeg"),
            Self::Webp => write!(f, "webp"),
        }
    }
}
