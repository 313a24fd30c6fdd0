use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;
use thiserror::Error;

use crate::types::Frame;

pub const DETECT_INPUT_SIZE: u32 = 128;
pub const MESH_INPUT_SIZE: u32 = 192;
pub const NUM_FACE_LANDMARKS: usize = 468;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame buffer size mismatch: got {got}, expected {expected}")]
    BufferSize { got: usize, expected: usize },
    #[error("landmark output too short: got {got}, need {need}")]
    LandmarkCount { got: usize, need: usize },
}

#[derive(Clone, Debug)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

/// Axis-aligned square crop in frame pixels, used to feed one detected
/// face into the mesh model.
#[derive(Clone, Copy, Debug)]
pub struct CropBox {
    pub x: f32,
    pub y: f32,
    pub side: f32,
}

impl CropBox {
    /// Square region around a detection box, expanded so the mesh model
    /// sees the whole head, clamped to stay mostly inside the frame.
    pub fn around(bbox: &[f32; 4], frame_w: u32, frame_h: u32) -> Self {
        let cx = (bbox[0] + bbox[2]) * 0.5;
        let cy = (bbox[1] + bbox[3]) * 0.5;
        let side = ((bbox[2] - bbox[0]).abs().max((bbox[3] - bbox[1]).abs()) * 1.6).max(32.0);
        let max_x = (frame_w as f32 - side).max(0.0);
        let max_y = (frame_h as f32 - side).max(0.0);
        Self {
            x: (cx - side * 0.5).clamp(0.0, max_x),
            y: (cy - side * 0.5).clamp(0.0, max_y),
            side,
        }
    }

    /// Map a point from mesh-input pixels back to frame pixels.
    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        let scale = self.side / MESH_INPUT_SIZE as f32;
        (self.x + x * scale, self.y + y * scale)
    }
}

fn check_frame_buffer(frame: &Frame) -> Result<(), DecodeError> {
    let expected = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.rgba.len() != expected {
        return Err(DecodeError::BufferSize {
            got: frame.rgba.len(),
            expected,
        });
    }
    Ok(())
}

/// Resize the whole frame into a square model input, preserving aspect
/// ratio with centered zero padding.
pub fn prepare_letterboxed(
    frame: &Frame,
    target_size: u32,
) -> Result<(Array4<f32>, LetterboxInfo)> {
    check_frame_buffer(frame)?;

    let scale = target_size as f32 / (frame.width.max(frame.height) as f32);
    let new_w = (frame.width as f32 * scale).round().max(1.0) as u32;
    let new_h = (frame.height as f32 * scale).round().max(1.0) as u32;

    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let pad_x = ((target_size as i64 - new_w as i64) / 2).max(0) as usize;
    let pad_y = ((target_size as i64 - new_h as i64) / 2).max(0) as usize;
    let mut canvas = vec![0u8; (target_size as usize) * (target_size as usize) * 4];
    for px in canvas.chunks_mut(4) {
        px[3] = 255;
    }
    let dst_stride = target_size as usize * 4;
    let src_stride = new_w as usize * 4;
    for row in 0..(new_h as usize) {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 4;
        let src_offset = row * src_stride;
        canvas[dst_offset..dst_offset + src_stride]
            .copy_from_slice(&resized[src_offset..src_offset + src_stride]);
    }

    let normalized: Vec<f32> = canvas
        .par_chunks_exact(4)
        .flat_map_iter(|px| {
            [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ]
        })
        .collect();
    let input = Array4::<f32>::from_shape_vec(
        (1, target_size as usize, target_size as usize, 3),
        normalized,
    )
    .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    Ok((
        input,
        LetterboxInfo {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            orig_w: frame.width,
            orig_h: frame.height,
        },
    ))
}

/// Bilinearly resample a square crop of the frame into a mesh input.
pub fn prepare_crop(frame: &Frame, crop: &CropBox, output_size: u32) -> Result<Array4<f32>> {
    check_frame_buffer(frame)?;

    let mut data =
        Vec::with_capacity((output_size as usize).saturating_mul(output_size as usize * 3));
    let scale = crop.side / output_size as f32;

    for y in 0..output_size {
        let src_y = crop.y + (y as f32 + 0.5) * scale;
        for x in 0..output_size {
            let src_x = crop.x + (x as f32 + 0.5) * scale;
            data.extend_from_slice(&sample_rgb(frame, src_x, src_y));
        }
    }

    Array4::<f32>::from_shape_vec((1, output_size as usize, output_size as usize, 3), data)
        .map_err(|err| anyhow!("failed to build crop tensor: {err}"))
}

pub fn decode_mesh_landmarks(flat: &[f32]) -> Result<Vec<[f32; 3]>, DecodeError> {
    if flat.len() < NUM_FACE_LANDMARKS * 3 {
        return Err(DecodeError::LandmarkCount {
            got: flat.len(),
            need: NUM_FACE_LANDMARKS * 3,
        });
    }

    let mut landmarks = Vec::with_capacity(NUM_FACE_LANDMARKS);
    for chunk in flat.chunks_exact(3).take(NUM_FACE_LANDMARKS) {
        landmarks.push([chunk[0], chunk[1], chunk[2]]);
    }
    Ok(landmarks)
}

pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

fn sample_rgb(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    if x.is_nan() || y.is_nan() {
        return [0.0, 0.0, 0.0];
    }
    let x0 = x.floor();
    let y0 = y.floor();

    let (w, h) = (frame.width as i32, frame.height as i32);
    let fetch = |cx: f32, cy: f32| -> [f32; 3] {
        let ix = cx as i32;
        let iy = cy as i32;
        if ix < 0 || iy < 0 || ix >= w || iy >= h {
            return [0.0, 0.0, 0.0];
        }
        let idx = ((iy as u32 * frame.width + ix as u32) as usize) * 4;
        if idx + 2 >= frame.rgba.len() {
            return [0.0, 0.0, 0.0];
        }
        [
            frame.rgba[idx] as f32 / 255.0,
            frame.rgba[idx + 1] as f32 / 255.0,
            frame.rgba[idx + 2] as f32 / 255.0,
        ]
    };

    let fx = x - x0;
    let fy = y - y0;
    let c00 = fetch(x0, y0);
    let c10 = fetch(x0 + 1.0, y0);
    let c01 = fetch(x0, y0 + 1.0);
    let c11 = fetch(x0 + 1.0, y0 + 1.0);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    [
        lerp(lerp(c00[0], c10[0], fx), lerp(c01[0], c11[0], fx), fy),
        lerp(lerp(c00[1], c10[1], fx), lerp(c01[1], c11[1], fx), fy),
        lerp(lerp(c00[2], c10[2], fx), lerp(c01[2], c11[2], fx), fy),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn solid_frame(width: u32, height: u32, value: u8) -> Frame {
        Frame {
            rgba: vec![value; (width * height * 4) as usize],
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn letterbox_centers_a_wide_frame() {
        let frame = solid_frame(64, 32, 255);
        let (input, letterbox) = prepare_letterboxed(&frame, 64).unwrap();
        assert_eq!(input.shape(), &[1, 64, 64, 3]);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 16.0);
        assert_eq!(letterbox.scale, 1.0);
        // Padding rows are zero, content rows are not.
        assert_eq!(input[[0, 0, 0, 0]], 0.0);
        assert_eq!(input[[0, 32, 0, 0]], 1.0);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let mut frame = solid_frame(8, 8, 0);
        frame.rgba.pop();
        assert!(prepare_letterboxed(&frame, 16).is_err());
        assert!(prepare_crop(&frame, &CropBox { x: 0.0, y: 0.0, side: 8.0 }, 4).is_err());
    }

    #[test]
    fn crop_projection_round_trips() {
        let crop = CropBox {
            x: 100.0,
            y: 50.0,
            side: 96.0,
        };
        let (x, y) = crop.project(0.0, 0.0);
        assert_eq!((x, y), (100.0, 50.0));
        let (x, y) = crop.project(MESH_INPUT_SIZE as f32, MESH_INPUT_SIZE as f32);
        assert_eq!((x, y), (196.0, 146.0));
    }

    #[test]
    fn crop_box_is_square_and_clamped() {
        let crop = CropBox::around(&[0.0, 0.0, 40.0, 20.0], 640, 480);
        assert!((crop.side - 64.0).abs() < 1e-3);
        assert_eq!(crop.x, 0.0);
        assert_eq!(crop.y, 0.0);
    }

    #[test]
    fn short_mesh_output_is_an_error() {
        let err = decode_mesh_landmarks(&[0.0; 30]).unwrap_err();
        assert!(matches!(err, DecodeError::LandmarkCount { got: 30, .. }));
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = [0.0, 0.0, 10.0, 10.0];
        assert!((iou(&b, &b) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&b, &[20.0, 20.0, 30.0, 30.0]), 0.0);
    }
}
