//! Renderer configuration.
//!
//! [`RenderConfig`] is read once at driver startup and shared by the
//! [`RenderManager`](crate::RenderManager) and every render thread.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Tunables for the render-thread resource layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    /// Number of render threads. Each thread owns one GPU context and one
    /// slot in every per-thread table.
    pub max_render_threads: usize,
    /// Frame rate the upload budget is spread over.
    pub target_fps: f64,
    /// Soft upper bound for texture/buffer uploads, in bytes per second.
    pub upload_limit: u64,
    /// Bytes per second that are always allowed, even when the frame budget
    /// is used up.
    pub upload_margin: u64,
    /// Idle time after which a GPU mirror object is destroyed. Zero disables
    /// expiration.
    pub default_expiration: Duration,
    /// Defer 2D texture sub-image uploads onto the GPU-command executor.
    pub async_texture_upload: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_render_threads: 4,
            target_fps: 60.0,
            upload_limit: 1536 * 1024 * 1024,
            upload_margin: 64 * 1024 * 1024,
            default_expiration: Duration::from_secs(3),
            async_texture_upload: false,
        }
    }
}

impl RenderConfig {
    /// Build a configuration from the defaults, overridden by `RENDER_*`
    /// environment variables.
    ///
    /// | variable | field |
    /// |----------|-------|
    /// | `RENDER_MAX_THREADS` | `max_render_threads` |
    /// | `RENDER_TARGET_FPS` | `target_fps` |
    /// | `RENDER_UPLOAD_LIMIT` | `upload_limit` |
    /// | `RENDER_UPLOAD_MARGIN` | `upload_margin` |
    /// | `RENDER_EXPIRATION_SECS` | `default_expiration` |
    /// | `RENDER_ASYNC_UPLOAD` | `async_texture_upload` |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads variables through
    /// `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, "RENDER_MAX_THREADS")? {
            config.max_render_threads = v;
        }
        if let Some(v) = parse_var(&lookup, "RENDER_TARGET_FPS")? {
            config.target_fps = v;
        }
        if let Some(v) = parse_var(&lookup, "RENDER_UPLOAD_LIMIT")? {
            config.upload_limit = v;
        }
        if let Some(v) = parse_var(&lookup, "RENDER_UPLOAD_MARGIN")? {
            config.upload_margin = v;
        }
        if let Some(v) = parse_var::<f64>(&lookup, "RENDER_EXPIRATION_SECS")? {
            config.default_expiration = Duration::try_from_secs_f64(v)
                .with_context(|| format!("RENDER_EXPIRATION_SECS out of range: {v}"))?;
        }
        if let Some(v) = parse_var(&lookup, "RENDER_ASYNC_UPLOAD")? {
            config.async_texture_upload = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject values the render layer cannot work with.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.max_render_threads > 0,
            "max_render_threads must be at least 1"
        );
        anyhow::ensure!(
            self.target_fps.is_finite() && self.target_fps > 0.0,
            "target_fps must be positive, got {}",
            self.target_fps
        );
        Ok(())
    }
}

/// Parse an optional variable, attaching the variable name to parse errors.
pub fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_overrides() {
        let config = RenderConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RenderConfig::default());
    }

    #[test]
    fn overrides_are_applied() {
        let config = RenderConfig::from_lookup(lookup(&[
            ("RENDER_MAX_THREADS", "2"),
            ("RENDER_TARGET_FPS", "120"),
            ("RENDER_EXPIRATION_SECS", "0.5"),
            ("RENDER_ASYNC_UPLOAD", "true"),
        ]))
        .unwrap();
        assert_eq!(config.max_render_threads, 2);
        assert_eq!(config.target_fps, 120.0);
        assert_eq!(config.default_expiration, Duration::from_millis(500));
        assert!(config.async_texture_upload);
    }

    #[test]
    fn bad_values_name_the_variable() {
        let err = RenderConfig::from_lookup(lookup(&[("RENDER_UPLOAD_LIMIT", "lots")]))
            .unwrap_err();
        assert!(format!("{err:#}").contains("RENDER_UPLOAD_LIMIT"));

        let err = RenderConfig::from_lookup(lookup(&[("RENDER_MAX_THREADS", "0")])).unwrap_err();
        assert!(err.to_string().contains("max_render_threads"));
    }
}
