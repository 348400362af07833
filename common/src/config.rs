use std::{path::PathBuf, time::Duration};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    chart::Canvas,
    plot::Plot,
    watch::{WatchMode, WatchSettings},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output_dir: PathBuf,
    /// Canvas size applied to every plot. Each plot picks its own when unset.
    pub canvas: Option<Canvas>,
    pub watch: WatchConfig,
    /// Empty means the caller falls back to its default plot set
    pub plots: Vec<Box<dyn Plot>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("plots"),
            canvas: None,
            watch: WatchConfig::default(),
            plots: Vec::new(),
        }
    }
}

impl Config {
    pub async fn load(path: &std::path::Path) -> Result<Self> {
        let data = tokio::fs::read_to_string(path)
            .await
            .wrap_err_with(|| format!("Read config {}", path.display()))?;
        Self::parse(&data).wrap_err_with(|| format!("Parse config {}", path.display()))
    }

    pub fn parse(data: &str) -> Result<Self> {
        Ok(serde_yml::from_str(data)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub mode: WatchMode,
    pub debounce_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        let settings = WatchSettings::default();
        Self {
            mode: settings.mode,
            debounce_ms: settings.debounce.as_millis() as u64,
            poll_interval_ms: settings.poll_interval.as_millis() as u64,
        }
    }
}

impl From<&WatchConfig> for WatchSettings {
    fn from(config: &WatchConfig) -> Self {
        Self {
            mode: config.mode,
            debounce: Duration::from_millis(config.debounce_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("{}").unwrap();
        assert_eq!(config.output_dir, PathBuf::from("plots"));
        assert!(config.canvas.is_none());
        assert!(config.plots.is_empty());
        let settings = WatchSettings::from(&config.watch);
        assert_eq!(settings.mode, WatchMode::Event);
        assert_eq!(settings.debounce, Duration::from_secs(1));
        assert_eq!(settings.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn parses_watch_and_canvas() {
        let config = Config::parse(
            "output_dir: out\n\
             canvas: { width: 640, height: 480 }\n\
             watch:\n  mode: Poll\n  poll_interval_ms: 250\n",
        )
        .unwrap();
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.canvas, Some(Canvas::new(640, 480)));
        let settings = WatchSettings::from(&config.watch);
        assert_eq!(settings.mode, WatchMode::Poll);
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.debounce, Duration::from_secs(1));
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let config = Config::parse("watch: { poll_interval_ms: 0 }").unwrap();
        assert_eq!(
            WatchSettings::from(&config.watch).poll_interval,
            Duration::from_millis(1)
        );
    }

    #[test]
    fn unknown_plot_type_is_rejected() {
        assert!(Config::parse("plots:\n  - type: Pie\n").is_err());
    }
}
