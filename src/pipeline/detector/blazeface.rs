use std::{cmp::Ordering, path::PathBuf};

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::common::{DETECT_INPUT_SIZE, LetterboxInfo, iou, prepare_letterboxed};
use crate::types::Frame;

// Short-range BlazeFace: 16 box features per anchor (box + 6 keypoints).
const BOX_FEATURES: usize = 16;

#[derive(Clone, Debug)]
pub struct FaceDetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for FaceDetectorConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            nms_threshold: 0.3,
            top_k: 8,
        }
    }
}

/// One detected face, box in frame pixels.
#[derive(Clone, Debug)]
pub struct FaceDetection {
    pub bbox: [f32; 4],
    pub score: f32,
}

pub struct FaceDetector {
    session: Session,
    anchors: Vec<(f32, f32)>,
    cfg: FaceDetectorConfig,
}

impl FaceDetector {
    pub fn new(model_path: &PathBuf, cfg: FaceDetectorConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load face detector from {}", model_path.display())
            })?;

        Ok(Self {
            session,
            anchors: generate_anchors(),
            cfg,
        })
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceDetection>> {
        let (input, letterbox) = prepare_letterboxed(frame, DETECT_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run face detector session")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "face detector returned {} outputs, expected at least 2",
                outputs.len()
            ));
        }

        let boxes = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;

        decode_detections(
            boxes
                .as_slice()
                .ok_or_else(|| anyhow!("face boxes not contiguous"))?,
            scores
                .as_slice()
                .ok_or_else(|| anyhow!("face scores not contiguous"))?,
            &self.anchors,
            &letterbox,
            &self.cfg,
        )
    }
}

/// SSD anchor centers for the 128x128 short-range model: a 16x16 grid at
/// stride 8 with 2 anchors per cell followed by an 8x8 grid at stride 16
/// with 6 anchors per cell, 896 anchors total.
fn generate_anchors() -> Vec<(f32, f32)> {
    let mut anchors = Vec::with_capacity(896);
    for (grid, per_cell) in [(16u32, 2usize), (8, 6)] {
        for y in 0..grid {
            for x in 0..grid {
                let cx = (x as f32 + 0.5) / grid as f32;
                let cy = (y as f32 + 0.5) / grid as f32;
                for _ in 0..per_cell {
                    anchors.push((cx, cy));
                }
            }
        }
    }
    anchors
}

fn decode_detections(
    boxes: &[f32],
    scores: &[f32],
    anchors: &[(f32, f32)],
    letterbox: &LetterboxInfo,
    cfg: &FaceDetectorConfig,
) -> Result<Vec<FaceDetection>> {
    let anchor_count = anchors.len().min(scores.len());
    if boxes.len() < anchor_count * BOX_FEATURES {
        return Err(anyhow!(
            "face detector box output too short: got {}, need {}",
            boxes.len(),
            anchor_count * BOX_FEATURES
        ));
    }

    let input = DETECT_INPUT_SIZE as f32;
    let pad_bias_x = letterbox.pad_x / letterbox.scale;
    let pad_bias_y = letterbox.pad_y / letterbox.scale;
    let scale = letterbox.orig_w.max(letterbox.orig_h) as f32;

    let mut candidates = Vec::new();
    for (anchor_idx, &(ax, ay)) in anchors.iter().enumerate().take(anchor_count) {
        let score = sigmoid(scores[anchor_idx].clamp(-80.0, 80.0));
        if score < cfg.score_threshold {
            continue;
        }

        let offset = anchor_idx * BOX_FEATURES;
        let cx = boxes[offset] / input + ax;
        let cy = boxes[offset + 1] / input + ay;
        let hw = boxes[offset + 2] / input / 2.0;
        let hh = boxes[offset + 3] / input / 2.0;

        let mut x1 = (cx - hw) * scale - pad_bias_x;
        let mut y1 = (cy - hh) * scale - pad_bias_y;
        let mut x2 = (cx + hw) * scale - pad_bias_x;
        let mut y2 = (cy + hh) * scale - pad_bias_y;

        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        let max_w = (letterbox.orig_w.saturating_sub(1)) as f32;
        let max_h = (letterbox.orig_h.saturating_sub(1)) as f32;
        x1 = x1.clamp(0.0, max_w);
        y1 = y1.clamp(0.0, max_h);
        x2 = x2.clamp(0.0, max_w);
        y2 = y2.clamp(0.0, max_h);

        candidates.push(FaceDetection {
            bbox: [x1, y1, x2, y2],
            score,
        });
    }

    Ok(nms(candidates, cfg.nms_threshold, cfg.top_k))
}

fn nms(mut candidates: Vec<FaceDetection>, threshold: f32, top_k: usize) -> Vec<FaceDetection> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<FaceDetection> = Vec::new();
    'outer: for candidate in candidates {
        for existing in &kept {
            if iou(&candidate.bbox, &existing.bbox) >= threshold {
                continue 'outer;
            }
        }
        kept.push(candidate);
        if kept.len() >= top_k {
            break;
        }
    }
    kept
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
