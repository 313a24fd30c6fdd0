mod blazeface;
mod common;
mod ort;
mod track;

use std::{
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};

use crate::{
    gesture::{GestureThresholds, VoteTracker},
    model_download::{default_face_detector_model_path, default_face_mesh_model_path},
    types::{FaceObservation, Frame, VoteFrame},
};

/// Inference runs at most this often regardless of the camera frame
/// rate; frames arriving faster are dropped, never queued.
pub const DETECTION_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) trait FaceMeshEngine: Send + 'static {
    fn infer(&mut self, frame: &Frame) -> anyhow::Result<Vec<FaceObservation>>;
}

#[derive(Clone, Debug)]
pub struct DetectorBackend {
    face_detector_model_path: PathBuf,
    face_mesh_model_path: PathBuf,
}

impl DetectorBackend {
    pub fn face_detector_model_path(&self) -> PathBuf {
        self.face_detector_model_path.clone()
    }

    pub fn face_mesh_model_path(&self) -> PathBuf {
        self.face_mesh_model_path.clone()
    }

    pub fn label(&self) -> &'static str {
        "ort"
    }
}

impl Default for DetectorBackend {
    fn default() -> Self {
        DetectorBackend {
            face_detector_model_path: default_face_detector_model_path(),
            face_mesh_model_path: default_face_mesh_model_path(),
        }
    }
}

pub fn start_detector(
    backend: DetectorBackend,
    thresholds: GestureThresholds,
    frame_rx: Receiver<Frame>,
    result_tx: Sender<VoteFrame>,
) -> thread::JoinHandle<()> {
    log::info!("starting face mesh backend: {}", backend.label());

    ort::start_worker(backend, thresholds, frame_rx, result_tx)
}

fn run_worker_loop<E: FaceMeshEngine>(
    mut engine: E,
    thresholds: GestureThresholds,
    frame_rx: Receiver<Frame>,
    result_tx: Sender<VoteFrame>,
    interval: Duration,
) {
    let mut tracker = VoteTracker::new(thresholds);
    let mut last_inference: Option<Instant> = None;

    while let Some(frame) = recv_latest_frame(&frame_rx) {
        if last_inference.is_some_and(|at| at.elapsed() < interval) {
            continue;
        }
        last_inference = Some(Instant::now());

        match engine.infer(&frame) {
            Ok(faces) => {
                let report = tracker.process_frame(&faces, frame.timestamp);
                for summary in &report.summaries {
                    log::trace!(
                        "face {}: {} conf {:.2} dx {:.3} dy {:.3}{}{}",
                        summary.id,
                        summary.gesture.label(),
                        summary.confidence,
                        summary.delta_x,
                        summary.delta_y,
                        if summary.is_preparing { " preparing" } else { "" },
                        if summary.is_in_cooldown { " cooldown" } else { "" },
                    );
                }
                let vote_frame = VoteFrame {
                    frame,
                    summaries: report.summaries,
                    events: report.events,
                };
                // Confirmed votes must not be dropped; backpressure is
                // fine since the consumer only tallies and logs.
                if result_tx.send(vote_frame).is_err() {
                    break;
                }
            }
            Err(err) => {
                log::warn!("face mesh inference failed: {err:?}");
            }
        }
    }
}

fn recv_latest_frame(frame_rx: &Receiver<Frame>) -> Option<Frame> {
    let mut frame = frame_rx.recv().ok()?;
    while let Ok(newer) = frame_rx.try_recv() {
        frame = newer;
    }
    Some(frame)
}
