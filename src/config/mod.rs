//! Configuration management for mipview
//!
//! This module handles loading, parsing, and validating renderer
//! configuration from TOML files: the screen scale ladder, the render
//! time budget, worker threads and cache behaviour.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main configuration struct containing all renderer settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RendererConfig {
    /// Resolution ladder and buffering
    #[serde(default)]
    pub scales: ScalesConfig,

    /// Render time budget and ladder adaptation
    #[serde(default)]
    pub adaptation: AdaptationConfig,

    /// Rendering worker threads
    #[serde(default)]
    pub threads: ThreadsConfig,

    /// Cache-aware rendering
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Resolution ladder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalesConfig {
    /// Scale factors relative to the canvas, finest first, strictly decreasing
    pub screen_scales: Vec<f64>,

    /// Output buffers per scale (3 = triple buffering, 1 = single buffer)
    pub buffer_count: usize,
}

/// Ladder adaptation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdaptationConfig {
    /// Target time for the first (coarsest) render of a sequence (ms)
    pub target_render_ms: u64,

    /// Renders faster than target / divisor move the start one level finer
    #[serde(default = "AdaptationConfig::default_fast_render_divisor")]
    pub fast_render_divisor: f64,

    /// Pause before re-rendering the finest level while data is missing (ms)
    #[serde(default = "AdaptationConfig::default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Worker thread configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadsConfig {
    /// Rendering worker threads
    pub num_rendering_threads: usize,

    /// Row ranges per worker thread
    pub num_tasks_per_thread: usize,
}

/// Cache-aware rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Use the cache-aware projector when a source provides volatile data
    pub use_volatile_if_available: bool,

    /// Submit visible cells to the cache before rendering
    pub prefetch_cells: bool,

    /// Per-frame IO time budget per priority level (ms), non-increasing
    pub io_budget_ms: Vec<u64>,
}

impl Default for ScalesConfig {
    fn default() -> Self {
        Self {
            screen_scales: vec![1.0, 0.75, 0.5, 0.25, 0.125],
            buffer_count: 3,
        }
    }
}

impl Default for AdaptationConfig {
    fn default() -> Self {
        Self {
            target_render_ms: 30,
            fast_render_divisor: Self::default_fast_render_divisor(),
            retry_backoff_ms: Self::default_retry_backoff_ms(),
        }
    }
}

impl AdaptationConfig {
    fn default_fast_render_divisor() -> f64 {
        3.0
    }
    fn default_retry_backoff_ms() -> u64 {
        1
    }

    /// Target render time
    pub fn target_render_time(&self) -> Duration {
        Duration::from_millis(self.target_render_ms)
    }

    /// Retry pause
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            num_rendering_threads: 3,
            num_tasks_per_thread: 1,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            use_volatile_if_available: true,
            prefetch_cells: true,
            io_budget_ms: vec![100, 10],
        }
    }
}

impl CacheConfig {
    /// IO budget as durations
    pub fn io_budget(&self) -> Vec<Duration> {
        self.io_budget_ms.iter().map(|&ms| Duration::from_millis(ms)).collect()
    }
}

impl RendererConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Path::new(&home).join(path.strip_prefix("~").unwrap_or(path))
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: RendererConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let scales = &self.scales.screen_scales;
        if scales.is_empty() {
            anyhow::bail!("Invalid screen_scales: at least one scale is required");
        }
        if let Some(s) = scales.iter().find(|&&s| !(s > 0.0 && s <= 1.0)) {
            anyhow::bail!("Invalid screen scale {}: must be in (0, 1]", s);
        }
        if scales.windows(2).any(|w| w[1] >= w[0]) {
            anyhow::bail!("Invalid screen_scales: must be strictly decreasing");
        }
        if self.scales.buffer_count == 0 || self.scales.buffer_count > 8 {
            anyhow::bail!("Invalid buffer_count: must be between 1 and 8");
        }

        if self.adaptation.target_render_ms == 0 {
            anyhow::bail!("Invalid target_render_ms: must be positive");
        }
        if !(self.adaptation.fast_render_divisor >= 1.0) {
            anyhow::bail!("Invalid fast_render_divisor: must be at least 1.0");
        }
        if self.adaptation.retry_backoff_ms > 1000 {
            anyhow::bail!("Invalid retry_backoff_ms: must be at most 1000");
        }

        if self.threads.num_rendering_threads == 0 || self.threads.num_rendering_threads > 256 {
            anyhow::bail!("Invalid num_rendering_threads: must be between 1 and 256");
        }
        if self.threads.num_tasks_per_thread == 0 || self.threads.num_tasks_per_thread > 64 {
            anyhow::bail!("Invalid num_tasks_per_thread: must be between 1 and 64");
        }

        if self.cache.io_budget_ms.windows(2).any(|w| w[1] > w[0]) {
            anyhow::bail!("Invalid io_budget_ms: must be non-increasing");
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Merge a partial configuration into this one
    /// Sections of the partial config that differ from the defaults override this config
    pub fn merge_partial(mut self, partial: RendererConfig) -> Self {
        let default_config = RendererConfig::default();

        if partial.scales != default_config.scales {
            self.scales = partial.scales;
        }
        if partial.adaptation != default_config.adaptation {
            self.adaptation = partial.adaptation;
        }
        if partial.threads != default_config.threads {
            self.threads = partial.threads;
        }
        if partial.cache != default_config.cache {
            self.cache = partial.cache;
        }

        self
    }
}
