//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::domain::classes::ClassTable;
use crate::domain::types::{ClassId, Zone};
use crate::services::engine::EngineConfig;
use anyhow::Context;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::Path;

/// Where detector frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestSource {
    /// One JSON frame per MQTT message
    Mqtt,
    /// JSONL file (or stdin when the path is "-")
    Replay,
}

impl IngestSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestSource::Mqtt => "mqtt",
            IngestSource::Replay => "replay",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier, used as the Prometheus `site` label
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "parking".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OccupancyConfig {
    #[serde(default = "default_conf_threshold")]
    pub conf_threshold: f32,
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f64,
    #[serde(default = "default_min_box_area")]
    pub min_box_area: i64,
    #[serde(default = "default_confirm_frames")]
    pub confirm_frames: u32,
    #[serde(default = "default_release_frames")]
    pub release_frames: u32,
    /// Treat any detected class as an obstacle (runtime toggle start value)
    #[serde(default)]
    pub any_class_as_obstacle: bool,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            conf_threshold: default_conf_threshold(),
            overlap_threshold: default_overlap_threshold(),
            min_box_area: default_min_box_area(),
            confirm_frames: default_confirm_frames(),
            release_frames: default_release_frames(),
            any_class_as_obstacle: false,
        }
    }
}

fn default_conf_threshold() -> f32 {
    0.35
}

fn default_overlap_threshold() -> f64 {
    0.2
}

fn default_min_box_area() -> i64 {
    300
}

/// Hysteresis bounds are stored as `i32` counters
const MAX_HYSTERESIS_FRAMES: u32 = i32::MAX as u32;

fn default_confirm_frames() -> u32 {
    3
}

fn default_release_frames() -> u32 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmoothingConfig {
    /// Observations averaged per track
    #[serde(default = "default_smoothing_window")]
    pub window: usize,
    /// Frames without an observation before a track buffer is dropped
    #[serde(default = "default_track_idle_frames")]
    pub track_idle_frames: u64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self { window: default_smoothing_window(), track_idle_frames: default_track_idle_frames() }
    }
}

fn default_smoothing_window() -> usize {
    3
}

fn default_track_idle_frames() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassesConfig {
    /// Class id to name mapping (e.g., "2" = "car")
    #[serde(default = "default_class_names")]
    pub names: HashMap<String, String>,
    /// Class names counted as vehicles
    #[serde(default = "default_allowed_classes")]
    pub allowed: Vec<String>,
}

impl Default for ClassesConfig {
    fn default() -> Self {
        Self { names: default_class_names(), allowed: default_allowed_classes() }
    }
}

fn default_class_names() -> HashMap<String, String> {
    [
        ("0", "person"),
        ("1", "bicycle"),
        ("2", "car"),
        ("3", "motorcycle"),
        ("5", "bus"),
        ("7", "truck"),
    ]
    .into_iter()
    .map(|(id, name)| (id.to_string(), name.to_string()))
    .collect()
}

fn default_allowed_classes() -> Vec<String> {
    EngineConfig::default().allowed_classes
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ZonesConfig {
    /// Zones present at startup, each four `[x, y]` corners
    #[serde(default)]
    pub initial: Vec<Zone>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_source")]
    pub source: IngestSource,
    /// JSONL path for replay ("-" reads stdin)
    #[serde(default = "default_replay_file")]
    pub replay_file: String,
    /// Delay between replayed frames (0 = as fast as possible)
    #[serde(default)]
    pub frame_interval_ms: u64,
    /// Frames skipped between processed frames
    #[serde(default)]
    pub skip_frames: u32,
    /// Bounded frame queue between ingest and pipeline
    #[serde(default = "default_frame_queue")]
    pub frame_queue: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source: default_ingest_source(),
            replay_file: default_replay_file(),
            frame_interval_ms: 0,
            skip_frames: 0,
            frame_queue: default_frame_queue(),
        }
    }
}

fn default_ingest_source() -> IngestSource {
    IngestSource::Mqtt
}

fn default_replay_file() -> String {
    "frames.jsonl".to_string()
}

fn default_frame_queue() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_mqtt_topic(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "detector/frames".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Status/operator HTTP port (0 to disable)
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// Bounded queue of operator commands into the pipeline
    #[serde(default = "default_command_queue")]
    pub command_queue: usize,
    /// Content-Type served for `GET /preview`
    #[serde(default = "default_preview_content_type")]
    pub preview_content_type: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: default_http_port(),
            command_queue: default_command_queue(),
            preview_content_type: default_preview_content_type(),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_command_queue() -> usize {
    32
}

fn default_preview_content_type() -> String {
    "image/jpeg".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub occupancy: OccupancyConfig,
    #[serde(default)]
    pub smoothing: SmoothingConfig,
    #[serde(default)]
    pub classes: ClassesConfig,
    #[serde(default)]
    pub zones: ZonesConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    engine: EngineConfig,
    class_names: BTreeMap<ClassId, String>,
    initial_zones: Vec<Zone>,
    ingest_source: IngestSource,
    replay_file: String,
    frame_interval_ms: u64,
    skip_frames: u32,
    frame_queue: usize,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    http_port: u16,
    command_queue: usize,
    preview_content_type: String,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, path.display().to_string())
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Parse a TOML document; `source` is what `config_file()` reports
    pub fn from_toml_str(content: &str, source: String) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)?;
        Ok(Self::from_toml(toml_config, source))
    }

    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        // Class table keys arrive as strings; non-numeric keys are ignored
        let mut class_names = BTreeMap::new();
        for (key, value) in toml_config.classes.names {
            if let Ok(id) = key.trim().parse::<i32>() {
                class_names.insert(ClassId(id), value);
            }
        }

        let occ = toml_config.occupancy;
        let engine = EngineConfig {
            conf_threshold: occ.conf_threshold,
            overlap_threshold: occ.overlap_threshold,
            min_box_area: occ.min_box_area,
            confirm_frames: occ.confirm_frames.clamp(1, MAX_HYSTERESIS_FRAMES),
            release_frames: occ.release_frames.min(MAX_HYSTERESIS_FRAMES),
            smoothing_window: toml_config.smoothing.window,
            track_idle_frames: toml_config.smoothing.track_idle_frames,
            any_class_as_obstacle: occ.any_class_as_obstacle,
            allowed_classes: toml_config.classes.allowed,
        };

        Self {
            site_id: toml_config.site.id,
            engine,
            class_names,
            initial_zones: toml_config.zones.initial,
            ingest_source: toml_config.ingest.source,
            replay_file: toml_config.ingest.replay_file,
            frame_interval_ms: toml_config.ingest.frame_interval_ms,
            skip_frames: toml_config.ingest.skip_frames,
            frame_queue: toml_config.ingest.frame_queue.max(1),
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            http_port: toml_config.http.port,
            command_queue: toml_config.http.command_queue.max(1),
            preview_content_type: toml_config.http.preview_content_type,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            config_file,
        }
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Load from an explicit path, falling back to defaults on any error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Resolved class table for the engine
    pub fn class_table(&self) -> ClassTable {
        ClassTable::new(self.class_names.clone(), &self.engine.allowed_classes)
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn initial_zones(&self) -> &[Zone] {
        &self.initial_zones
    }

    pub fn ingest_source(&self) -> IngestSource {
        self.ingest_source
    }

    pub fn replay_file(&self) -> &str {
        &self.replay_file
    }

    pub fn frame_interval_ms(&self) -> u64 {
        self.frame_interval_ms
    }

    pub fn skip_frames(&self) -> u32 {
        self.skip_frames
    }

    pub fn frame_queue(&self) -> usize {
        self.frame_queue
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn command_queue(&self) -> usize {
        self.command_queue
    }

    pub fn preview_content_type(&self) -> &str {
        &self.preview_content_type
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Switch ingest to replaying `path` ("-" for stdin)
    pub fn with_replay_file(mut self, path: &str) -> Self {
        self.ingest_source = IngestSource::Replay;
        self.replay_file = path.to_string();
        self
    }

    /// Builder method for tests to override the ingest source
    #[cfg(test)]
    pub fn with_ingest_source(mut self, source: IngestSource) -> Self {
        self.ingest_source = source;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "parking");
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.ingest_source(), IngestSource::Mqtt);
        assert_eq!(config.skip_frames(), 0);
        assert_eq!(config.http_port(), 8080);
        assert!(config.initial_zones().is_empty());

        let engine = config.engine_config();
        assert_eq!(engine.confirm_frames, 3);
        assert_eq!(engine.release_frames, 2);
        assert_eq!(engine.min_box_area, 300);
        assert_eq!(engine.smoothing_window, 3);
    }

    #[test]
    fn test_default_class_table() {
        let classes = Config::default().class_table();
        assert_eq!(classes.name(ClassId(2)), Some("car"));
        assert!(classes.is_allowed(ClassId(2)));
        assert!(classes.is_allowed(ClassId(7)));
        assert!(!classes.is_allowed(ClassId(0)));
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = Config::from_toml_str(
            "[occupancy]\nconfirm_frames = 5\n",
            "inline".to_string(),
        )
        .unwrap();
        assert_eq!(config.engine_config().confirm_frames, 5);
        assert_eq!(config.engine_config().release_frames, 2);
        assert_eq!(config.mqtt_topic(), "detector/frames");
        assert_eq!(config.config_file(), "inline");
    }

    #[test]
    fn test_hysteresis_bounds_clamped() {
        let config = Config::from_toml_str(
            "[occupancy]\nconfirm_frames = 4294967295\nrelease_frames = 3000000000\n",
            "inline".to_string(),
        )
        .unwrap();
        assert_eq!(config.engine_config().confirm_frames, i32::MAX as u32);
        assert_eq!(config.engine_config().release_frames, i32::MAX as u32);

        let config =
            Config::from_toml_str("[occupancy]\nconfirm_frames = 0\n", "inline".to_string()).unwrap();
        assert_eq!(config.engine_config().confirm_frames, 1);
    }

    #[test]
    fn test_zones_and_ingest_parse() {
        let config = Config::from_toml_str(
            r#"
[zones]
initial = [
  [[0, 0], [100, 0], [100, 100], [0, 100]],
  [[200, 0], [300, 0], [300, 100], [200, 100]],
]

[ingest]
source = "replay"
replay_file = "-"
skip_frames = 2
"#,
            "inline".to_string(),
        )
        .unwrap();

        assert_eq!(config.initial_zones().len(), 2);
        assert_eq!(config.initial_zones()[1], Zone::rect(200, 0, 300, 100));
        assert_eq!(config.ingest_source(), IngestSource::Replay);
        assert_eq!(config.replay_file(), "-");
        assert_eq!(config.skip_frames(), 2);
    }

    #[test]
    fn test_zone_with_wrong_corner_count_rejected() {
        let result = Config::from_toml_str(
            "[zones]\ninitial = [[[0, 0], [1, 0], [1, 1]]]\n",
            "inline".to_string(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_non_numeric_class_keys_ignored() {
        let config = Config::from_toml_str(
            "[classes]\nnames = { \"2\" = \"car\", \"van\" = \"van\" }\nallowed = [\"car\"]\n",
            "inline".to_string(),
        )
        .unwrap();
        let classes = config.class_table();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes.allowed_ids(), vec![ClassId(2)]);
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["zone-occupancy".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "zone-occupancy".to_string(),
            "--config".to_string(),
            "config/lot_b.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/lot_b.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["zone-occupancy".to_string(), "--config=config/lot_c.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/lot_c.toml");
    }

    #[test]
    fn test_with_replay_file() {
        let config = Config::default().with_replay_file("-");
        assert_eq!(config.ingest_source(), IngestSource::Replay);
        assert_eq!(config.replay_file(), "-");
    }

    #[test]
    fn test_with_ingest_source() {
        let config = Config::default().with_ingest_source(IngestSource::Replay);
        assert_eq!(config.ingest_source(), IngestSource::Replay);
    }
}
