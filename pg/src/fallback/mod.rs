//! Alternate-provider selection after the primary gives up

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::ImageQuality;
use crate::provider::ImageProvider;

/// How to choose the single fallback provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FallbackStrategy {
    /// Never fall back
    None,
    /// The provider after the failed one in configured order
    #[default]
    NextProvider,
    /// Lowest cost per image among the others
    Cheapest,
    /// First other provider whose default quality is HD or better
    HighestQuality,
}

impl FallbackStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::NextProvider => "next_provider",
            Self::Cheapest => "cheapest",
            Self::HighestQuality => "highest_quality",
        }
    }
}

impl std::fmt::Display for FallbackStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FallbackStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "none" => Ok(Self::None),
            "next_provider" => Ok(Self::NextProvider),
            "cheapest" => Ok(Self::Cheapest),
            "highest_quality" => Ok(Self::HighestQuality),
            _ => Err(format!(
                "Unknown fallback strategy: {}. Valid strategies: none, next_provider, cheapest, highest_quality",
                s
            )),
        }
    }
}

impl TryFrom<String> for FallbackStrategy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FallbackStrategy> for String {
    fn from(strategy: FallbackStrategy) -> Self {
        strategy.as_str().to_string()
    }
}

/// What the selector knows about one provider
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub name: String,
    pub cost_per_image: f64,
    pub quality: ImageQuality,
}

impl Candidate {
    pub fn new(name: impl Into<String>, cost_per_image: f64, quality: ImageQuality) -> Self {
        Self {
            name: name.into(),
            cost_per_image,
            quality,
        }
    }

    pub fn from_provider(provider: &dyn ImageProvider) -> Self {
        let info = provider.info();
        Self::new(info.name, info.cost_per_image, info.quality)
    }
}

/// Picks at most one alternate provider for a failed one
#[derive(Debug, Clone)]
pub struct FallbackSelector {
    strategy: FallbackStrategy,
    candidates: Vec<Candidate>,
}

impl FallbackSelector {
    /// `candidates` must be in configured provider order
    pub fn new(strategy: FallbackStrategy, candidates: Vec<Candidate>) -> Self {
        debug!(%strategy, count = candidates.len(), "FallbackSelector::new: called");
        Self { strategy, candidates }
    }

    pub fn strategy(&self) -> FallbackStrategy {
        self.strategy
    }

    /// The alternate for `failed`, never `failed` itself
    pub fn select(&self, failed: &str) -> Option<&str> {
        let others = || self.candidates.iter().filter(move |c| c.name != failed);

        let chosen = match self.strategy {
            FallbackStrategy::None => None,
            FallbackStrategy::NextProvider => self
                .candidates
                .iter()
                .position(|c| c.name == failed)
                .and_then(|idx| self.candidates.get(idx + 1)),
            // Only a strictly cheaper candidate replaces the current best
            FallbackStrategy::Cheapest => others().fold(None, |best: Option<&Candidate>, c| match best {
                Some(b) if b.cost_per_image <= c.cost_per_image => Some(b),
                _ => Some(c),
            }),
            FallbackStrategy::HighestQuality => others().find(|c| c.quality.is_hd()),
        };

        debug!(strategy = %self.strategy, %failed, chosen = ?chosen.map(|c| &c.name), "FallbackSelector::select: called");
        chosen.map(|c| c.name.as_str())
    }
}
