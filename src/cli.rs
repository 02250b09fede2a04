use std::path::PathBuf;

use clap::Parser;

use crate::analytics::Device;
use crate::config::Config;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Count people in a video stream and publish presence statistics over MQTT"
)]
pub struct Args {
    /// Path to an ONNX person-detection model with an SSD DetectionOutput.
    #[arg(short, long)]
    pub model: String,

    /// Video file, stream URL, camera index or still image.
    #[arg(short, long)]
    pub input: String,

    /// Target device to infer on: CPU, GPU or CUDA.
    #[arg(short, long, default_value = "CPU")]
    pub device: Device,

    /// Probability threshold for detections filtering.
    #[arg(long = "prob-threshold", visible_alias = "pt", default_value_t = 0.5)]
    pub prob_threshold: f32,

    /// Optional TOML config file.
    #[arg(short, long, env = "PEOPLE_COUNTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// MQTT broker host (overrides config).
    #[arg(long, env = "MQTT_HOST")]
    pub mqtt_host: Option<String>,

    /// MQTT broker port (overrides config).
    #[arg(long, env = "MQTT_PORT")]
    pub mqtt_port: Option<u16>,
}

impl Args {
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.mqtt_host {
            config.mqtt.host = host.clone();
        }
        if let Some(port) = self.mqtt_port {
            config.mqtt.port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(args).unwrap()
    }

    #[test]
    fn defaults() {
        let args = parse(&["people-counter", "-m", "model.onnx", "-i", "video.mp4"]);
        assert_eq!(args.model, "model.onnx");
        assert_eq!(args.input, "video.mp4");
        assert_eq!(args.device, Device::Cpu);
        assert_eq!(args.prob_threshold, 0.5);
        assert!(args.config.is_none());
    }

    #[test]
    fn threshold_alias_and_device() {
        let args = parse(&[
            "people-counter",
            "--model",
            "model.onnx",
            "--input",
            "0",
            "--device",
            "gpu",
            "--pt",
            "0.6",
        ]);
        assert_eq!(args.device, Device::Gpu);
        assert_eq!(args.prob_threshold, 0.6);
    }

    #[test]
    fn model_and_input_required() {
        assert!(Args::try_parse_from(["people-counter", "-m", "model.onnx"]).is_err());
        assert!(Args::try_parse_from(["people-counter", "-i", "video.mp4"]).is_err());
    }

    #[test]
    fn rejects_unknown_device() {
        assert!(Args::try_parse_from([
            "people-counter",
            "-m",
            "model.onnx",
            "-i",
            "video.mp4",
            "-d",
            "MYRIAD"
        ])
        .is_err());
    }

    #[test]
    fn broker_overrides_apply() {
        let args = parse(&[
            "people-counter",
            "-m",
            "model.onnx",
            "-i",
            "video.mp4",
            "--mqtt-host",
            "broker.lan",
            "--mqtt-port",
            "1883",
        ]);
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.mqtt.host, "broker.lan");
        assert_eq!(config.mqtt.port, 1883);
    }
}
