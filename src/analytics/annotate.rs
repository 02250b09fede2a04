use std::io::Write;

use opencv::core::{Mat, Rect, Scalar, Size, Vector};
use opencv::imgcodecs;
use opencv::imgproc;
use opencv::prelude::*;

use super::object::Detection;

const BOX_THICKNESS: i32 = 2;

fn box_color() -> Scalar {
    // BGR red
    Scalar::new(0.0, 0.0, 255.0, 0.0)
}

pub fn draw_detections(frame: &mut Mat, detections: &[Detection]) -> opencv::Result<()> {
    for det in detections {
        imgproc::rectangle(
            frame,
            Rect::new(det.x, det.y, det.width, det.height),
            box_color(),
            BOX_THICKNESS,
            imgproc::LINE_8,
            0,
        )?;
    }
    Ok(())
}

pub fn resize_for_output(frame: &Mat, width: u32, height: u32) -> opencv::Result<Mat> {
    let mut resized = Mat::default();
    imgproc::resize(
        frame,
        &mut resized,
        Size::new(width as i32, height as i32),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;
    Ok(resized)
}

/// Writes the frame as raw interleaved BGR bytes and flushes.
pub fn write_raw<W: Write>(writer: &mut W, frame: &Mat) -> std::io::Result<()> {
    let bytes = frame
        .data_bytes()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.message))?;
    writer.write_all(bytes)?;
    writer.flush()
}

pub fn write_image(path: &str, frame: &Mat) -> opencv::Result<()> {
    let params = Vector::<i32>::new();
    if !imgcodecs::imwrite(path, frame, &params)? {
        return Err(opencv::Error::new(
            opencv::core::StsError,
            format!("failed to write {path}"),
        ));
    }
    tracing::info!(path = %path, "output image written");
    Ok(())
}
