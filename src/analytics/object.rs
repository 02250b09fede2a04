use std::fmt;
use std::str::FromStr;

use ndarray::{Array4, ArrayViewD};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::TensorRef;

use crate::config::ModelConfig;

/// Values per row of an SSD `DetectionOutput` blob:
/// `[image_id, label, confidence, x_min, y_min, x_max, y_max]`.
const SSD_ROW_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    #[default]
    Cpu,
    Gpu,
    Cuda,
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CPU" => Ok(Device::Cpu),
            "GPU" => Ok(Device::Gpu),
            "CUDA" => Ok(Device::Cuda),
            other => Err(format!(
                "unsupported device '{other}', expected CPU, GPU or CUDA"
            )),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("CPU"),
            Device::Gpu => f.write_str("GPU"),
            Device::Cuda => f.write_str("CUDA"),
        }
    }
}

/// A person box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub confidence: f32,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

pub struct PersonDetector {
    session: Session,
    input_width: u32,
    input_height: u32,
    output_name: String,
    prob_threshold: f32,
}

impl PersonDetector {
    pub fn new(
        model_path: &str,
        device: Device,
        model: &ModelConfig,
        prob_threshold: f32,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;

        if matches!(device, Device::Gpu | Device::Cuda) {
            // Registration failures fall back to the CPU provider.
            builder = builder.with_execution_providers([CUDAExecutionProvider::default().build()])?;
        }

        let session = builder.commit_from_file(model_path)?;

        tracing::info!(
            model = %model_path,
            device = %device,
            input = format!("{}x{}", model.input_width, model.input_height),
            "person detector loaded"
        );

        Ok(Self {
            session,
            input_width: model.input_width,
            input_height: model.input_height,
            output_name: model.output_name.clone(),
            prob_threshold,
        })
    }

    pub fn detect(
        &mut self,
        frame: &opencv::core::Mat,
    ) -> Result<Vec<Detection>, Box<dyn std::error::Error + Send + Sync>> {
        use opencv::prelude::*;

        let rows = frame.rows();
        let cols = frame.cols();
        if rows == 0 || cols == 0 {
            return Ok(Vec::new());
        }

        let input_tensor = self.preprocess(frame)?;

        let tensor_ref = TensorRef::from_array_view(input_tensor.view())?.into_dyn();
        let outputs = self.session.run(ort::inputs![tensor_ref])?;

        let Some(output_val) = outputs.get(self.output_name.as_str()) else {
            return Err(format!(
                "model has no '{}' output, expected an SSD DetectionOutput blob",
                self.output_name
            )
            .into());
        };

        let output = output_val.try_extract_array::<f32>()?;
        let detections = parse_ssd_output(
            &output,
            self.prob_threshold,
            cols as f32,
            rows as f32,
        )?;

        Ok(detections)
    }

    /// Resizes to the network input and lays the BGR bytes out as NCHW.
    fn preprocess(
        &self,
        frame: &opencv::core::Mat,
    ) -> Result<Array4<f32>, Box<dyn std::error::Error + Send + Sync>> {
        use opencv::core::{Mat, Size};
        use opencv::imgproc;
        use opencv::prelude::*;

        if frame.channels() != 3 {
            return Err(format!("expected a 3-channel frame, got {}", frame.channels()).into());
        }

        let width = self.input_width as usize;
        let height = self.input_height as usize;

        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            Size::new(width as i32, height as i32),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )?;

        let data = resized.data_bytes()?;
        if data.len() < width * height * 3 {
            return Err("Frame data too small".into());
        }

        let mut tensor = Array4::<f32>::zeros((1, 3, height, width));
        for y in 0..height {
            for x in 0..width {
                let idx = (y * width + x) * 3;
                tensor[[0, 0, y, x]] = data[idx] as f32;
                tensor[[0, 1, y, x]] = data[idx + 1] as f32;
                tensor[[0, 2, y, x]] = data[idx + 2] as f32;
            }
        }

        Ok(tensor)
    }
}

/// Keeps rows above `prob_threshold` and scales their boxes to the frame.
pub fn parse_ssd_output(
    output: &ArrayViewD<f32>,
    prob_threshold: f32,
    frame_w: f32,
    frame_h: f32,
) -> Result<Vec<Detection>, Box<dyn std::error::Error + Send + Sync>> {
    if output.shape().last() != Some(&SSD_ROW_LEN) {
        return Err(format!(
            "unexpected detection output shape {:?}, expected [.., {SSD_ROW_LEN}]",
            output.shape()
        )
        .into());
    }

    let values: Vec<f32> = output.iter().copied().collect();
    let mut detections = Vec::new();

    for row in values.chunks_exact(SSD_ROW_LEN) {
        // A negative image id terminates the valid rows.
        if row[0] < 0.0 {
            break;
        }

        let confidence = row[2];
        if confidence <= prob_threshold {
            continue;
        }

        let x1 = (row[3].clamp(0.0, 1.0) * frame_w) as i32;
        let y1 = (row[4].clamp(0.0, 1.0) * frame_h) as i32;
        let x2 = (row[5].clamp(0.0, 1.0) * frame_w) as i32;
        let y2 = (row[6].clamp(0.0, 1.0) * frame_h) as i32;

        detections.push(Detection {
            confidence,
            x: x1,
            y: y1,
            width: (x2 - x1).max(0),
            height: (y2 - y1).max(0),
        });
    }

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn ssd(rows: &[[f32; 7]]) -> ndarray::ArrayD<f32> {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Array::from_shape_vec(vec![1, 1, rows.len(), 7], flat).unwrap()
    }

    #[test]
    fn keeps_rows_above_threshold() {
        let output = ssd(&[
            [0.0, 1.0, 0.9, 0.1, 0.2, 0.3, 0.6],
            [0.0, 1.0, 0.4, 0.5, 0.5, 0.6, 0.6],
            [0.0, 1.0, 0.75, 0.0, 0.0, 1.0, 1.0],
        ]);

        let detections = parse_ssd_output(&output.view(), 0.5, 1000.0, 500.0).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(
            detections[0],
            Detection {
                confidence: 0.9,
                x: 100,
                y: 100,
                width: 200,
                height: 200,
            }
        );
        assert_eq!(detections[1].width, 1000);
        assert_eq!(detections[1].height, 500);
    }

    #[test]
    fn threshold_is_strict() {
        let output = ssd(&[[0.0, 1.0, 0.5, 0.1, 0.1, 0.2, 0.2]]);
        let detections = parse_ssd_output(&output.view(), 0.5, 100.0, 100.0).unwrap();
        assert!(detections.is_empty());
    }

    #[test]
    fn stops_at_terminator_row() {
        let output = ssd(&[
            [0.0, 1.0, 0.8, 0.1, 0.1, 0.2, 0.2],
            [-1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.9, 0.1, 0.1, 0.2, 0.2],
        ]);
        let detections = parse_ssd_output(&output.view(), 0.5, 100.0, 100.0).unwrap();
        assert_eq!(detections.len(), 1);
    }

    #[test]
    fn clamps_boxes_to_frame() {
        let output = ssd(&[[0.0, 1.0, 0.8, -0.2, -0.1, 1.3, 1.1]]);
        let detections = parse_ssd_output(&output.view(), 0.5, 640.0, 480.0).unwrap();
        assert_eq!(detections[0].x, 0);
        assert_eq!(detections[0].y, 0);
        assert_eq!(detections[0].width, 640);
        assert_eq!(detections[0].height, 480);
    }

    #[test]
    fn rejects_wrong_row_length() {
        let output = Array::from_shape_vec(vec![1, 1, 2, 6], vec![0.0; 12]).unwrap();
        assert!(parse_ssd_output(&output.view(), 0.5, 100.0, 100.0).is_err());
    }

    #[test]
    fn device_parses_case_insensitively() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("GPU".parse::<Device>().unwrap(), Device::Gpu);
        assert_eq!("Cuda".parse::<Device>().unwrap(), Device::Cuda);
        assert!("MYRIAD".parse::<Device>().is_err());
    }
}
