use std::path::Path;

use opencv::core::Mat;
use opencv::imgcodecs;
use opencv::prelude::*;
use opencv::videoio::{self, VideoCapture};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("opencv error: {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("failed to open input '{0}'")]
    Open(String),
}

enum Inner {
    Stream(VideoCapture),
    /// Single still image, taken on the first read.
    Image(Option<Mat>),
}

pub struct VideoSource {
    input: String,
    inner: Inner,
    width: i32,
    height: i32,
}

impl VideoSource {
    /// Opens a file, stream URL, camera index or still image.
    pub fn open(input: &str) -> Result<Self, VideoError> {
        if is_image_path(input) {
            let image = imgcodecs::imread(input, imgcodecs::IMREAD_COLOR)?;
            if image.empty() {
                return Err(VideoError::Open(input.to_string()));
            }
            let (width, height) = (image.cols(), image.rows());
            tracing::info!(input = %input, width, height, "opened still image");
            return Ok(Self {
                input: input.to_string(),
                inner: Inner::Image(Some(image)),
                width,
                height,
            });
        }

        let cap = match parse_camera_index(input) {
            Some(index) => VideoCapture::new(index, videoio::CAP_ANY)?,
            None => VideoCapture::from_file(input, videoio::CAP_ANY)?,
        };

        if !cap.is_opened()? {
            return Err(VideoError::Open(input.to_string()));
        }

        let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
        tracing::info!(input = %input, width, height, "opened video stream");

        Ok(Self {
            input: input.to_string(),
            inner: Inner::Stream(cap),
            width,
            height,
        })
    }

    /// Returns `Ok(None)` once the input is exhausted.
    pub fn read(&mut self) -> Result<Option<Mat>, VideoError> {
        match &mut self.inner {
            Inner::Stream(cap) => {
                let mut frame = Mat::default();
                if !cap.read(&mut frame)? || frame.empty() {
                    return Ok(None);
                }
                Ok(Some(frame))
            }
            Inner::Image(image) => Ok(image.take()),
        }
    }

    pub fn is_single_image(&self) -> bool {
        matches!(self.inner, Inner::Image(_))
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn release(&mut self) {
        if let Inner::Stream(cap) = &mut self.inner {
            if let Err(e) = cap.release() {
                tracing::warn!(input = %self.input, error = %e, "failed to release capture");
            }
        }
    }
}

pub fn is_image_path(input: &str) -> bool {
    Path::new(input)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

fn parse_camera_index(input: &str) -> Option<i32> {
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    input.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_image_extensions() {
        assert!(is_image_path("resources/frame.jpg"));
        assert!(is_image_path("frame.PNG"));
        assert!(is_image_path("frame.Bmp"));
        assert!(!is_image_path("resources/Pedestrian_Detect_2_1_1.mp4"));
        assert!(!is_image_path("rtsp://camera.local/stream"));
        assert!(!is_image_path("0"));
    }

    #[test]
    fn camera_index_only_for_digits() {
        assert_eq!(parse_camera_index("0"), Some(0));
        assert_eq!(parse_camera_index("12"), Some(12));
        assert_eq!(parse_camera_index("-1"), None);
        assert_eq!(parse_camera_index("video.mp4"), None);
        assert_eq!(parse_camera_index(""), None);
    }
}
