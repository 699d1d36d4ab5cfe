//! Joke captions for finished cloud art.

use crate::constants::FUNNY_CAPTIONS;
use crate::error::SkygramError;

/// Fixed, non-empty pool of captions.
#[derive(Clone, Debug)]
pub struct CaptionPool {
    captions: Vec<String>,
}

impl CaptionPool {
    /// Pool over `captions`; an empty pool is a configuration error.
    pub fn new(captions: Vec<String>) -> Result<Self, SkygramError> {
        if captions.is_empty() {
            return Err(SkygramError::Config("caption pool is empty".to_string()));
        }
        Ok(Self { captions })
    }

    /// Pseudo-random caption. The label isn't used by the fixed pool but is
    /// logged alongside the pick.
    pub fn pick(&self, label: &str) -> &str {
        let idx = rand::random_range(0..self.captions.len());
        tracing::debug!("Caption {idx} for {label}");
        &self.captions[idx]
    }

    /// Every caption in the pool.
    pub fn captions(&self) -> &[String] {
        &self.captions
    }
}

impl Default for CaptionPool {
    fn default() -> Self {
        Self {
            captions: FUNNY_CAPTIONS.iter().map(|caption| caption.to_string()).collect(),
        }
    }
}
