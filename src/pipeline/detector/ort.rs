use std::{path::PathBuf, thread};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::{
    DETECTION_INTERVAL, DetectorBackend, FaceMeshEngine,
    blazeface::{FaceDetection, FaceDetector, FaceDetectorConfig},
    common::{self, CropBox, MESH_INPUT_SIZE},
    run_worker_loop,
    track::FaceIdAssigner,
};
use crate::{
    gesture::GestureThresholds,
    model_download::{ModelKind, ensure_model_ready},
    types::{FaceObservation, Frame, Point, VoteFrame},
};

// Faces whose mesh confidence falls below this are treated as not
// detected for the frame.
const MESH_SCORE_THRESHOLD: f32 = 0.3;

pub(super) fn start_worker(
    backend: DetectorBackend,
    thresholds: GestureThresholds,
    frame_rx: Receiver<Frame>,
    result_tx: Sender<VoteFrame>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let detector_model_path = backend.face_detector_model_path();
        let mesh_model_path = backend.face_mesh_model_path();

        // Model preparation failures are terminal; retry is up to the
        // user, not this worker.
        if let Err(err) =
            ensure_model_ready(ModelKind::FaceDetector, &detector_model_path, |_evt| {})
        {
            log::error!(
                "failed to prepare face detector model at {}: {err:?}",
                detector_model_path.display()
            );
            return;
        }
        if let Err(err) = ensure_model_ready(ModelKind::FaceMesh, &mesh_model_path, |_evt| {}) {
            log::error!(
                "failed to prepare face mesh model at {}: {err:?}",
                mesh_model_path.display()
            );
            return;
        }

        let engine = match OrtEngine::new(&detector_model_path, &mesh_model_path) {
            Ok(engine) => {
                log::info!(
                    "face pipeline ready using {} and {}",
                    detector_model_path.display(),
                    mesh_model_path.display()
                );
                engine
            }
            Err(err) => {
                log::error!("failed to load ORT face models: {err:?}");
                return;
            }
        };

        run_worker_loop(engine, thresholds, frame_rx, result_tx, DETECTION_INTERVAL);
    })
}

struct OrtEngine {
    detector: FaceDetector,
    mesh: Session,
    assigner: FaceIdAssigner,
}

impl OrtEngine {
    fn new(detector_model_path: &PathBuf, mesh_model_path: &PathBuf) -> Result<Self> {
        let detector = FaceDetector::new(detector_model_path, FaceDetectorConfig::default())?;

        let mesh = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(mesh_model_path)
            .with_context(|| {
                format!(
                    "failed to load face mesh session from {}",
                    mesh_model_path.display()
                )
            })?;

        Ok(Self {
            detector,
            mesh,
            assigner: FaceIdAssigner::new(),
        })
    }

    fn landmarks_for(
        &mut self,
        frame: &Frame,
        detection: &FaceDetection,
    ) -> Result<Option<Vec<Point>>> {
        let crop = CropBox::around(&detection.bbox, frame.width, frame.height);
        let input = common::prepare_crop(frame, &crop, MESH_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;

        let outputs = self
            .mesh
            .run(ort::inputs![tensor])
            .context("failed to run face mesh session")?;
        if outputs.len() == 0 {
            return Err(anyhow!("face mesh returned no outputs"));
        }

        let score = if outputs.len() > 1 {
            outputs[1]
                .try_extract_array::<f32>()
                .ok()
                .and_then(|arr| arr.iter().next().copied())
                .unwrap_or(1.0)
        } else {
            1.0
        };
        if score < MESH_SCORE_THRESHOLD {
            return Ok(None);
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flattened: Vec<f32> = coords.iter().copied().collect();
        let landmarks = common::decode_mesh_landmarks(&flattened)?;

        let (frame_w, frame_h) = (frame.width.max(1) as f32, frame.height.max(1) as f32);
        let points = landmarks
            .iter()
            .map(|[x, y, _z]| {
                let (px, py) = crop.project(*x, *y);
                Point::new((px / frame_w).clamp(0.0, 1.0), (py / frame_h).clamp(0.0, 1.0))
            })
            .collect();

        Ok(Some(points))
    }
}

impl FaceMeshEngine for OrtEngine {
    fn infer(&mut self, frame: &Frame) -> Result<Vec<FaceObservation>> {
        let detections = self.detector.detect(frame).unwrap_or_else(|err| {
            log::warn!("face detection failed: {err:?}");
            Vec::new()
        });

        let boxes: Vec<[f32; 4]> = detections.iter().map(|d| d.bbox).collect();
        let ids = self.assigner.assign(&boxes);

        let mut observations = Vec::with_capacity(detections.len());
        for (detection, id) in detections.iter().zip(ids) {
            match self.landmarks_for(frame, detection) {
                Ok(Some(landmarks)) => observations.push(FaceObservation { id, landmarks }),
                Ok(None) => {}
                Err(err) => {
                    log::warn!("face mesh failed for face {id}: {err:?}");
                }
            }
        }

        Ok(observations)
    }
}
