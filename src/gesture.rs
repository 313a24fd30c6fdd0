use std::{
    collections::{HashMap, HashSet, VecDeque, hash_map::Entry},
    time::{Duration, Instant},
};

use crate::types::{
    FaceObservation, FaceSummary, Gesture, GestureSample, Point, Rect, Vote, VoteEvent,
};

/// Landmark index of the nose tip in a face-mesh landmark list.
pub const NOSE_TIP_INDEX: usize = 4;

/// Confirmation window: a vote needs this many agreeing samples in a row.
pub const REQUIRED_GESTURE_FRAMES: usize = 6;

/// Minimum time between two confirmed votes for the same face.
pub const GESTURE_COOLDOWN: Duration = Duration::from_millis(4_000);

/// Minimum average confidence across the confirmation window.
pub const GESTURE_CONFIDENCE_THRESHOLD: f32 = 0.7;

// 90% of the window; with a 6-slot window this is effectively unanimous.
const SUPERMAJORITY: usize = (REQUIRED_GESTURE_FRAMES * 9).div_ceil(10);

// The primary axis must beat the secondary one by this factor, otherwise
// diagonal head motion would read as a clean nod or shake.
const AXIS_DOMINANCE: f32 = 1.2;

const HISTORY_CAP: usize = REQUIRED_GESTURE_FRAMES * 2;

// Normalized margin added around the landmark extent for the overlay box.
const RECT_PADDING: f32 = 0.02;

/// Tunable motion thresholds in normalized coordinates. Callers may swap
/// these at runtime; new values apply from the next classified frame.
/// Values are not validated, zero makes every movement register.
#[derive(Clone, Copy, Debug)]
pub struct GestureThresholds {
    /// Vertical displacement a nod must exceed.
    pub nod: f32,
    /// Horizontal displacement a shake must exceed.
    pub shake: f32,
}

impl Default for GestureThresholds {
    fn default() -> Self {
        Self {
            nod: 0.05,
            shake: 0.06,
        }
    }
}

/// Classify one frame-to-frame displacement into a gesture sample.
///
/// Confidence scales with how far past the threshold the dominant axis
/// moved, saturating at twice the threshold. Ratio-based dominance keeps
/// the check scale-invariant across head sizes and camera distances.
pub fn classify_delta(delta_x: f32, delta_y: f32, thresholds: GestureThresholds) -> GestureSample {
    let (gesture, confidence) = if delta_x > thresholds.shake && delta_x > delta_y * AXIS_DOMINANCE
    {
        (
            Gesture::No,
            (delta_x / (2.0 * thresholds.shake)).min(1.0),
        )
    } else if delta_y > thresholds.nod && delta_y > delta_x * AXIS_DOMINANCE {
        (
            Gesture::Yes,
            (delta_y / (2.0 * thresholds.nod)).min(1.0),
        )
    } else {
        (Gesture::None, 0.0)
    };

    GestureSample {
        gesture,
        confidence,
        delta_x,
        delta_y,
    }
}

/// Debounce state for one tracked face.
///
/// Only decisive (`yes`/`no`) samples enter `history`; quiet frames are
/// reported in the per-frame summary but skipped here, so a hesitation gap
/// pauses the run rather than resetting it.
#[derive(Debug)]
struct FaceVoteState {
    previous_nose: Point,
    history: VecDeque<GestureSample>,
    is_preparing: bool,
    last_confirmed: Option<Instant>,
}

impl FaceVoteState {
    fn new(nose: Point) -> Self {
        Self {
            previous_nose: nose,
            history: VecDeque::with_capacity(HISTORY_CAP),
            is_preparing: false,
            last_confirmed: None,
        }
    }

    fn is_in_cooldown(&self, now: Instant) -> bool {
        self.last_confirmed
            .is_some_and(|at| now.duration_since(at) < GESTURE_COOLDOWN)
    }

    fn cooldown_fade(&self, now: Instant) -> f32 {
        match self.last_confirmed {
            Some(at) if now.duration_since(at) < GESTURE_COOLDOWN => {
                let elapsed = now.duration_since(at).as_secs_f32();
                (1.0 - elapsed / GESTURE_COOLDOWN.as_secs_f32()).clamp(0.0, 1.0)
            }
            _ => 1.0,
        }
    }

    /// Append one classified sample and run the debounce transition rules.
    /// Returns the confirmed vote, if this sample completed one.
    fn ingest(&mut self, sample: GestureSample, now: Instant) -> Option<Vote> {
        if sample.gesture != Gesture::None {
            self.history.push_back(sample);
            while self.history.len() > HISTORY_CAP {
                self.history.pop_front();
            }
        }

        if self.history.is_empty() {
            self.is_preparing = false;
            return None;
        }

        let recent_start = self.history.len().saturating_sub(REQUIRED_GESTURE_FRAMES);
        let mut yes_count = 0usize;
        let mut no_count = 0usize;
        let mut confidence_sum = 0.0f32;
        for entry in self.history.iter().skip(recent_start) {
            match entry.gesture {
                Gesture::Yes => yes_count += 1,
                Gesture::No => no_count += 1,
                Gesture::None => {}
            }
            confidence_sum += entry.confidence;
        }
        let majority = yes_count.max(no_count);

        if self.history.len() < REQUIRED_GESTURE_FRAMES {
            // Early "hold still to confirm" signal: every sample so far
            // agrees but the window has not filled yet. Confidence is
            // deliberately not checked here, only at confirmation.
            self.is_preparing = majority == self.history.len();
            return None;
        }

        // A 6-slot window cannot hold two 6-sample supermajorities.
        debug_assert!(
            yes_count < SUPERMAJORITY || no_count < SUPERMAJORITY,
            "supermajority tie is unreachable"
        );

        let winner = if yes_count >= SUPERMAJORITY {
            Some(Vote::Yes)
        } else if no_count >= SUPERMAJORITY {
            Some(Vote::No)
        } else {
            None
        };

        let average_confidence = confidence_sum / REQUIRED_GESTURE_FRAMES as f32;
        if let Some(vote) = winner
            && !self.is_in_cooldown(now)
            && average_confidence > GESTURE_CONFIDENCE_THRESHOLD
        {
            self.history.clear();
            self.is_preparing = false;
            self.last_confirmed = Some(now);
            return Some(vote);
        }

        None
    }
}

/// Everything the pipeline derived from one frame of tracker output.
#[derive(Clone, Debug, Default)]
pub struct FrameReport {
    pub summaries: Vec<FaceSummary>,
    pub events: Vec<VoteEvent>,
}

/// The face tracking table: owns one [`FaceVoteState`] per currently
/// visible face id and runs the delta → classify → debounce pipeline for
/// each of them, once per frame, synchronously.
///
/// A face id that drops out of the tracker report loses all of its state
/// immediately; a re-acquired id starts over as a fresh voter.
#[derive(Debug)]
pub struct VoteTracker {
    thresholds: GestureThresholds,
    faces: HashMap<u32, FaceVoteState>,
}

impl VoteTracker {
    pub fn new(thresholds: GestureThresholds) -> Self {
        Self {
            thresholds,
            faces: HashMap::new(),
        }
    }

    /// Takes effect on the next processed frame.
    pub fn set_thresholds(&mut self, thresholds: GestureThresholds) {
        self.thresholds = thresholds;
    }

    pub fn thresholds(&self) -> GestureThresholds {
        self.thresholds
    }

    pub fn tracked_faces(&self) -> usize {
        self.faces.len()
    }

    /// Discard all per-face state, e.g. when detection is disabled.
    pub fn reset(&mut self) {
        self.faces.clear();
    }

    /// Process one frame worth of tracker output. Emits at most one
    /// [`VoteEvent`] per face per cooldown window and a summary for every
    /// face whose nose tip was resolvable this frame.
    pub fn process_frame(&mut self, faces: &[FaceObservation], now: Instant) -> FrameReport {
        let reported: HashSet<u32> = faces.iter().map(|f| f.id).collect();
        self.faces.retain(|id, _| reported.contains(id));

        let mut report = FrameReport::default();

        for face in faces {
            // Nose tip missing: dropped frame for this face, existing
            // history stays untouched.
            let Some(&nose) = face.landmarks.get(NOSE_TIP_INDEX) else {
                continue;
            };
            let rect = bounding_rect(&face.landmarks);

            let state = match self.faces.entry(face.id) {
                Entry::Vacant(slot) => {
                    // First observation: store the baseline, no sample yet.
                    slot.insert(FaceVoteState::new(nose));
                    report.summaries.push(FaceSummary {
                        id: face.id,
                        rect,
                        nose,
                        delta_x: 0.0,
                        delta_y: 0.0,
                        gesture: Gesture::None,
                        confidence: 0.0,
                        is_preparing: false,
                        is_in_cooldown: false,
                        cooldown_fade: 1.0,
                    });
                    continue;
                }
                Entry::Occupied(slot) => slot.into_mut(),
            };

            let delta_x = (nose.x - state.previous_nose.x).abs();
            let delta_y = (nose.y - state.previous_nose.y).abs();
            state.previous_nose = nose;

            let sample = classify_delta(delta_x, delta_y, self.thresholds);
            if let Some(vote) = state.ingest(sample, now) {
                report.events.push(VoteEvent {
                    face_id: face.id,
                    vote,
                });
            }

            report.summaries.push(FaceSummary {
                id: face.id,
                rect,
                nose,
                delta_x: sample.delta_x,
                delta_y: sample.delta_y,
                gesture: sample.gesture,
                confidence: sample.confidence,
                is_preparing: state.is_preparing,
                is_in_cooldown: state.is_in_cooldown(now),
                cooldown_fade: state.cooldown_fade(now),
            });
        }

        report
    }
}

fn bounding_rect(landmarks: &[Point]) -> Rect {
    let mut min_x = f32::MAX;
    let mut min_y = f32::MAX;
    let mut max_x = f32::MIN;
    let mut max_y = f32::MIN;

    for point in landmarks {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }

    Rect {
        x1: (min_x - RECT_PADDING).clamp(0.0, 1.0),
        y1: (min_y - RECT_PADDING).clamp(0.0, 1.0),
        x2: (max_x + RECT_PADDING).clamp(0.0, 1.0),
        y2: (max_y + RECT_PADDING).clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_THRESHOLDS: GestureThresholds = GestureThresholds {
        nod: 0.05,
        shake: 0.06,
    };

    fn yes_sample(confidence: f32) -> GestureSample {
        GestureSample {
            gesture: Gesture::Yes,
            confidence,
            delta_x: 0.0,
            delta_y: 0.08,
        }
    }

    fn no_sample(confidence: f32) -> GestureSample {
        GestureSample {
            gesture: Gesture::No,
            confidence,
            delta_x: 0.09,
            delta_y: 0.0,
        }
    }

    fn quiet_sample() -> GestureSample {
        GestureSample {
            gesture: Gesture::None,
            confidence: 0.0,
            delta_x: 0.0,
            delta_y: 0.0,
        }
    }

    /// Five landmarks around `nose`, with index 4 as the nose tip itself.
    fn observation(id: u32, nose: Point) -> FaceObservation {
        let mut landmarks = vec![
            Point::new(nose.x - 0.05, nose.y - 0.05),
            Point::new(nose.x + 0.05, nose.y - 0.05),
            Point::new(nose.x - 0.05, nose.y + 0.05),
            Point::new(nose.x + 0.05, nose.y + 0.05),
        ];
        landmarks.push(nose);
        FaceObservation { id, landmarks }
    }

    /// Observation whose nose alternates vertically by 0.08 per frame,
    /// which classifies as a high-confidence nod at the test thresholds.
    fn nodding_observation(id: u32, frame: usize) -> FaceObservation {
        let y = if frame % 2 == 0 { 0.42 } else { 0.50 };
        observation(id, Point::new(0.5, y))
    }

    fn shaking_observation(id: u32, frame: usize) -> FaceObservation {
        let x = if frame % 2 == 0 { 0.42 } else { 0.52 };
        observation(id, Point::new(x, 0.5))
    }

    #[test]
    fn axis_dominance_rejects_diagonal_motion() {
        // Neither axis beats the other by 1.2x, so this is quiet.
        let sample = classify_delta(0.10, 0.09, TEST_THRESHOLDS);
        assert_eq!(sample.gesture, Gesture::None);
        assert_eq!(sample.confidence, 0.0);
    }

    #[test]
    fn vertical_motion_classifies_as_yes() {
        let sample = classify_delta(0.01, 0.08, TEST_THRESHOLDS);
        assert_eq!(sample.gesture, Gesture::Yes);
        assert!((sample.confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn horizontal_motion_classifies_as_no() {
        let sample = classify_delta(0.09, 0.01, TEST_THRESHOLDS);
        assert_eq!(sample.gesture, Gesture::No);
        assert!((sample.confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn confidence_saturates_at_one() {
        let sample = classify_delta(0.0, 0.5, TEST_THRESHOLDS);
        assert_eq!(sample.gesture, Gesture::Yes);
        assert_eq!(sample.confidence, 1.0);
    }

    #[test]
    fn confirmation_requires_full_supermajority() {
        let now = Instant::now();
        let mut state = FaceVoteState::new(Point::new(0.5, 0.5));

        // 5 yes + 1 no fills the window but 5/6 < 6/6.
        for _ in 0..5 {
            assert_eq!(state.ingest(yes_sample(0.9), now), None);
        }
        assert_eq!(state.ingest(no_sample(0.9), now), None);
        assert!(!state.history.is_empty());
    }

    #[test]
    fn six_unanimous_samples_confirm_exactly_once() {
        let now = Instant::now();
        let mut state = FaceVoteState::new(Point::new(0.5, 0.5));

        for _ in 0..5 {
            assert_eq!(state.ingest(yes_sample(0.9), now), None);
        }
        assert_eq!(state.ingest(yes_sample(0.9), now), Some(Vote::Yes));
        assert!(state.history.is_empty());
        assert!(!state.is_preparing);
        assert!(state.is_in_cooldown(now));
    }

    #[test]
    fn low_average_confidence_blocks_confirmation() {
        let now = Instant::now();
        let mut state = FaceVoteState::new(Point::new(0.5, 0.5));

        for _ in 0..6 {
            assert_eq!(state.ingest(yes_sample(0.5), now), None);
        }
    }

    #[test]
    fn preparing_is_transient_and_unconfirmed() {
        let now = Instant::now();
        let mut state = FaceVoteState::new(Point::new(0.5, 0.5));

        for _ in 0..3 {
            state.ingest(yes_sample(0.9), now);
        }
        assert!(state.is_preparing);

        // A disagreeing fourth sample breaks unanimity immediately.
        assert_eq!(state.ingest(no_sample(0.9), now), None);
        assert!(!state.is_preparing);
    }

    #[test]
    fn low_confidence_run_still_sets_preparing() {
        // Confidence only gates confirmation, not the preparing signal.
        let now = Instant::now();
        let mut state = FaceVoteState::new(Point::new(0.5, 0.5));

        for _ in 0..3 {
            state.ingest(yes_sample(0.1), now);
        }
        assert!(state.is_preparing);
    }

    #[test]
    fn quiet_frames_pause_the_run_without_resetting_it() {
        let now = Instant::now();
        let mut state = FaceVoteState::new(Point::new(0.5, 0.5));

        for _ in 0..4 {
            state.ingest(yes_sample(0.9), now);
        }
        state.ingest(quiet_sample(), now);
        assert_eq!(state.history.len(), 4);

        state.ingest(yes_sample(0.9), now);
        assert_eq!(state.ingest(yes_sample(0.9), now), Some(Vote::Yes));
    }

    #[test]
    fn at_most_one_confirmation_per_cooldown_window() {
        let start = Instant::now();
        let mut state = FaceVoteState::new(Point::new(0.5, 0.5));
        let mut confirmed = 0;

        // 40 unanimous samples spread over ~3.9 seconds: everything after
        // the first confirmation lands inside the cooldown window.
        for i in 0..40u64 {
            let now = start + Duration::from_millis(i * 100);
            if state.ingest(yes_sample(0.9), now).is_some() {
                confirmed += 1;
            }
        }
        assert_eq!(confirmed, 1);

        // Once the cooldown lapses the next full window confirms again.
        let mut later = start + GESTURE_COOLDOWN + Duration::from_millis(600);
        let mut second = 0;
        for _ in 0..REQUIRED_GESTURE_FRAMES {
            later += Duration::from_millis(100);
            if state.ingest(yes_sample(0.9), later).is_some() {
                second += 1;
            }
        }
        assert_eq!(second, 1);
    }

    #[test]
    fn history_never_exceeds_twice_the_window() {
        let start = Instant::now();
        let mut state = FaceVoteState::new(Point::new(0.5, 0.5));
        // Confirm once, then keep sampling inside the cooldown so history
        // only ever grows.
        for i in 0..60u64 {
            let now = start + Duration::from_millis(i * 50);
            state.ingest(yes_sample(0.9), now);
            assert!(state.history.len() <= HISTORY_CAP);
        }
    }

    #[test]
    fn tracker_emits_vote_after_seven_frames_of_nodding() {
        let now = Instant::now();
        let mut tracker = VoteTracker::new(TEST_THRESHOLDS);
        let mut events = Vec::new();

        // Frame 0 establishes the baseline, frames 1..=6 are six samples.
        for frame in 0..7 {
            let report = tracker.process_frame(&[nodding_observation(1, frame)], now);
            events.extend(report.events);
        }

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].face_id, 1);
        assert_eq!(events[0].vote, Vote::Yes);
    }

    #[test]
    fn faces_debounce_independently() {
        let now = Instant::now();
        let mut tracker = VoteTracker::new(TEST_THRESHOLDS);
        let mut events = Vec::new();

        for frame in 0..7 {
            let report = tracker.process_frame(
                &[nodding_observation(1, frame), shaking_observation(2, frame)],
                now,
            );
            events.extend(report.events);
        }

        assert_eq!(events.len(), 2);
        let yes = events.iter().find(|e| e.face_id == 1).unwrap();
        let no = events.iter().find(|e| e.face_id == 2).unwrap();
        assert_eq!(yes.vote, Vote::Yes);
        assert_eq!(no.vote, Vote::No);
    }

    #[test]
    fn tracking_gap_resets_cooldown_and_history() {
        let now = Instant::now();
        let mut tracker = VoteTracker::new(TEST_THRESHOLDS);

        let mut confirmed = false;
        for frame in 0..7 {
            let report = tracker.process_frame(&[nodding_observation(7, frame)], now);
            confirmed |= !report.events.is_empty();
        }
        assert!(confirmed);

        // Face 7 disappears for one frame: its state is discarded.
        tracker.process_frame(&[], now);
        assert_eq!(tracker.tracked_faces(), 0);

        // Reintroduced immediately, still inside the wall-clock cooldown,
        // it is a fresh voter: empty history, inactive cooldown.
        let report = tracker.process_frame(&[nodding_observation(7, 0)], now);
        let summary = &report.summaries[0];
        assert!(!summary.is_in_cooldown);
        assert_eq!(summary.cooldown_fade, 1.0);

        // And it can confirm again right away, ignoring the old cooldown.
        let mut events = Vec::new();
        for frame in 1..7 {
            let report = tracker.process_frame(&[nodding_observation(7, frame)], now);
            events.extend(report.events);
        }
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn short_landmark_list_skips_the_frame_but_keeps_state() {
        let now = Instant::now();
        let mut tracker = VoteTracker::new(TEST_THRESHOLDS);

        for frame in 0..4 {
            tracker.process_frame(&[nodding_observation(3, frame)], now);
        }

        // Index 4 absent: no summary, no sample, but not a tracking loss.
        let malformed = FaceObservation {
            id: 3,
            landmarks: vec![Point::new(0.5, 0.5)],
        };
        let report = tracker.process_frame(&[malformed], now);
        assert!(report.summaries.is_empty());
        assert_eq!(tracker.tracked_faces(), 1);

        // The interrupted run picks up where it left off.
        let mut events = Vec::new();
        for frame in 4..8 {
            let report = tracker.process_frame(&[nodding_observation(3, frame)], now);
            events.extend(report.events);
        }
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn first_observation_produces_no_gesture() {
        let now = Instant::now();
        let mut tracker = VoteTracker::new(TEST_THRESHOLDS);

        let report = tracker.process_frame(&[nodding_observation(1, 0)], now);
        assert_eq!(report.summaries.len(), 1);
        assert_eq!(report.summaries[0].gesture, Gesture::None);
        assert_eq!(report.summaries[0].delta_x, 0.0);
        assert_eq!(report.summaries[0].delta_y, 0.0);
        assert!(report.events.is_empty());
    }

    #[test]
    fn cooldown_fade_decreases_linearly() {
        let start = Instant::now();
        let mut state = FaceVoteState::new(Point::new(0.5, 0.5));
        for _ in 0..6 {
            state.ingest(yes_sample(0.9), start);
        }

        let halfway = start + GESTURE_COOLDOWN / 2;
        assert!((state.cooldown_fade(halfway) - 0.5).abs() < 1e-3);

        let done = start + GESTURE_COOLDOWN + Duration::from_millis(1);
        assert!(!state.is_in_cooldown(done));
        assert_eq!(state.cooldown_fade(done), 1.0);
    }

    #[test]
    fn reset_discards_all_faces() {
        let now = Instant::now();
        let mut tracker = VoteTracker::new(TEST_THRESHOLDS);
        tracker.process_frame(&[nodding_observation(1, 0), nodding_observation(2, 0)], now);
        assert_eq!(tracker.tracked_faces(), 2);

        tracker.reset();
        assert_eq!(tracker.tracked_faces(), 0);
    }

    #[test]
    fn bounding_rect_pads_and_clamps() {
        let rect = bounding_rect(&[Point::new(0.0, 0.1), Point::new(0.5, 0.99)]);
        assert_eq!(rect.x1, 0.0);
        assert!((rect.y1 - 0.08).abs() < 1e-6);
        assert!((rect.x2 - 0.52).abs() < 1e-6);
        assert_eq!(rect.y2, 1.0);
    }
}
