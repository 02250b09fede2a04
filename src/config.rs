use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0} dimensions must be non-zero")]
    ZeroDimensions(&'static str),
    #[error("{0} dimensions exceed {max}", max = i32::MAX)]
    OversizedDimensions(&'static str),
    #[error("probability threshold {0} is outside [0, 1]")]
    Threshold(f32),
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    3001
}

fn default_keep_alive() -> u64 {
    60
}

fn default_client_id() -> String {
    "people-counter".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            keep_alive_secs: default_keep_alive(),
            client_id: default_client_id(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_input_width")]
    pub input_width: u32,
    #[serde(default = "default_input_height")]
    pub input_height: u32,
    #[serde(default = "default_output_name")]
    pub output_name: String,
}

// person-detection-retail SSD input
fn default_input_width() -> u32 {
    544
}

fn default_input_height() -> u32 {
    320
}

fn default_output_name() -> String {
    "detection_out".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_width: default_input_width(),
            input_height: default_input_height(),
            output_name: default_output_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_width")]
    pub width: u32,
    #[serde(default = "default_output_height")]
    pub height: u32,
    #[serde(default = "default_image_path")]
    pub image_path: String,
}

fn default_output_width() -> u32 {
    768
}

fn default_output_height() -> u32 {
    432
}

fn default_image_path() -> String {
    "output_image.jpg".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: default_output_width(),
            height: default_output_height(),
            image_path: default_image_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Loads `path` when given, otherwise falls back to built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from(path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_dimensions("model input", self.model.input_width, self.model.input_height)?;
        check_dimensions("output frame", self.output.width, self.output.height)
    }
}

// OpenCV sizes are i32.
fn check_dimensions(what: &'static str, width: u32, height: u32) -> Result<(), ConfigError> {
    if width == 0 || height == 0 {
        return Err(ConfigError::ZeroDimensions(what));
    }
    if i32::try_from(width).is_err() || i32::try_from(height).is_err() {
        return Err(ConfigError::OversizedDimensions(what));
    }
    Ok(())
}

pub fn validate_threshold(threshold: f32) -> Result<f32, ConfigError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(ConfigError::Threshold(threshold))
    }
}
