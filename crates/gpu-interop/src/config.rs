use std::time::Duration;

use anyhow::{Context, Result};
use render_core::config::parse_var;

/// Tunables for shared textures and their bags.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedTextureConfig {
    /// Keyed-mutex acquire timeout. Zero only tries.
    pub acquire_timeout: Duration,
    /// Unused textures older than this are dropped by the bag.
    pub idle_timeout: Duration,
    /// Sweeps a render thread keeps its claim on a texture after asking for
    /// it.
    pub interest_frames: u32,
    /// How long a background copy waits for the device before giving up.
    pub copy_wait_timeout: Duration,
}

impl Default for SharedTextureConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::ZERO,
            idle_timeout: Duration::from_secs(3),
            interest_frames: 3,
            copy_wait_timeout: Duration::from_secs(1),
        }
    }
}

impl SharedTextureConfig {
    /// Defaults overridden by `SHARED_TEXTURE_ACQUIRE_MS`,
    /// `SHARED_TEXTURE_IDLE_MS`, `SHARED_TEXTURE_INTEREST_FRAMES` and
    /// `SHARED_TEXTURE_COPY_WAIT_MS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(ms) = parse_var::<u64>(&lookup, "SHARED_TEXTURE_ACQUIRE_MS")? {
            config.acquire_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "SHARED_TEXTURE_IDLE_MS")? {
            config.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(frames) = parse_var(&lookup, "SHARED_TEXTURE_INTEREST_FRAMES")? {
            config.interest_frames = frames;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "SHARED_TEXTURE_COPY_WAIT_MS")? {
            config.copy_wait_timeout = Duration::from_millis(ms);
        }
        anyhow::ensure!(config.interest_frames > 0, "interest_frames must be at least 1");
        u32::try_from(config.acquire_timeout.as_millis())
            .context("SHARED_TEXTURE_ACQUIRE_MS does not fit a native timeout")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_overrides_defaults() {
        let config = SharedTextureConfig::from_lookup(|key| match key {
            "SHARED_TEXTURE_IDLE_MS" => Some("500".into()),
            "SHARED_TEXTURE_INTEREST_FRAMES" => Some("5".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.idle_timeout, Duration::from_millis(500));
        assert_eq!(config.interest_frames, 5);
        assert_eq!(config.acquire_timeout, Duration::ZERO);
    }

    #[test]
    fn zero_interest_is_rejected() {
        let err = SharedTextureConfig::from_lookup(|key| {
            (key == "SHARED_TEXTURE_INTEREST_FRAMES").then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("interest_frames"));
    }
}
