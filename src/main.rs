mod gesture;
mod model_download;
mod pipeline;
mod types;

use anyhow::Result;

fn main() -> Result<()> {
    env_logger::init();
    run()
}

#[cfg(feature = "camera-nokhwa")]
fn run() -> Result<()> {
    use std::{env, path::PathBuf};

    use anyhow::Context;
    use crossbeam_channel::bounded;
    use nokhwa::utils::CameraIndex;

    use crate::{
        gesture::GestureThresholds,
        pipeline::{DetectorBackend, available_cameras, start_camera_stream, start_detector},
    };

    let camera_index = env::args()
        .nth(1)
        .map(|arg| arg.parse::<u32>())
        .transpose()
        .context("camera index must be a non-negative integer")?
        .unwrap_or(0);

    match available_cameras() {
        Ok(cameras) => {
            for camera in &cameras {
                log::info!("camera {:?}: {}", camera.index, camera.label);
            }
        }
        Err(err) => log::warn!("camera enumeration failed: {err:?}"),
    }

    let (frame_tx, frame_rx) = bounded(1);
    let (result_tx, result_rx) = bounded(8);

    let _camera = start_camera_stream(CameraIndex::Index(camera_index), frame_tx)
        .context("failed to open camera")?;
    let _worker = start_detector(
        DetectorBackend::default(),
        thresholds_from_env(GestureThresholds::default()),
        frame_rx,
        result_tx,
    );

    let snapshot_dir = env::var_os("NODVOTE_SNAPSHOTS").map(PathBuf::from);
    let mut tally = VoteTally::default();

    for vote_frame in result_rx.iter() {
        handle_vote_frame(vote_frame, &mut tally, snapshot_dir.as_deref());
    }

    Ok(())
}

#[cfg(not(feature = "camera-nokhwa"))]
fn run() -> Result<()> {
    anyhow::bail!("built without camera support; rebuild with the camera-nokhwa feature")
}

#[cfg(feature = "camera-nokhwa")]
fn thresholds_from_env(defaults: gesture::GestureThresholds) -> gesture::GestureThresholds {
    let read = |name: &str, fallback: f32| -> f32 {
        match std::env::var(name) {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                log::warn!("ignoring unparseable {name}={raw}");
                fallback
            }),
            Err(_) => fallback,
        }
    };

    gesture::GestureThresholds {
        nod: read("NODVOTE_NOD_THRESHOLD", defaults.nod),
        shake: read("NODVOTE_SHAKE_THRESHOLD", defaults.shake),
    }
}

#[derive(Debug, Default)]
struct VoteTally {
    yes: u32,
    no: u32,
}

impl VoteTally {
    fn record(&mut self, vote: types::Vote) {
        match vote {
            types::Vote::Yes => self.yes += 1,
            types::Vote::No => self.no += 1,
        }
    }
}

#[cfg(feature = "camera-nokhwa")]
fn handle_vote_frame(
    vote_frame: types::VoteFrame,
    tally: &mut VoteTally,
    snapshot_dir: Option<&std::path::Path>,
) {
    for event in &vote_frame.events {
        tally.record(event.vote);
        log::info!(
            "face {} voted {} (tally: {} yes / {} no)",
            event.face_id,
            event.vote.label(),
            tally.yes,
            tally.no
        );
    }

    if !vote_frame.events.is_empty()
        && let Some(dir) = snapshot_dir
        && let Err(err) = save_snapshot(&vote_frame, dir)
    {
        log::warn!("failed to save vote snapshot: {err:?}");
    }
}

/// Save the confirming frame with the overlay burned in, for debugging
/// gesture tuning after the fact.
#[cfg(feature = "camera-nokhwa")]
fn save_snapshot(vote_frame: &types::VoteFrame, dir: &std::path::Path) -> Result<()> {
    use anyhow::{Context, anyhow};
    use std::time::{SystemTime, UNIX_EPOCH};

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create snapshot directory {}", dir.display()))?;

    let frame = &vote_frame.frame;
    let mut rgba = frame.rgba.clone();
    pipeline::overlay::draw_face_overlays(
        &mut rgba,
        frame.width,
        frame.height,
        &vote_frame.summaries,
    );

    let image = image::RgbaImage::from_raw(frame.width, frame.height, rgba)
        .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let event = &vote_frame.events[0];
    let path = dir.join(format!(
        "vote-{}-{}-{stamp}.png",
        event.face_id,
        event.vote.label()
    ));
    image
        .save(&path)
        .with_context(|| format!("failed to write snapshot to {}", path.display()))?;
    log::debug!("saved vote snapshot to {}", path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vote;

    #[test]
    fn tally_counts_each_side() {
        let mut tally = VoteTally::default();
        tally.record(Vote::Yes);
        tally.record(Vote::Yes);
        tally.record(Vote::No);
        assert_eq!(tally.yes, 2);
        assert_eq!(tally.no, 1);
    }
}
