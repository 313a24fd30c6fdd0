use std::time::Instant;

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

/// Normalized image coordinates, x and y in [0, 1].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in normalized coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// Per-frame classification of a single face's head motion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gesture {
    Yes,
    No,
    None,
}

impl Gesture {
    pub fn label(&self) -> &'static str {
        match self {
            Gesture::Yes => "yes",
            Gesture::No => "no",
            Gesture::None => "none",
        }
    }
}

/// A confirmed vote. Unlike [`Gesture`] this can never be `none`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Vote {
    Yes,
    No,
}

impl Vote {
    pub fn label(&self) -> &'static str {
        match self {
            Vote::Yes => "yes",
            Vote::No => "no",
        }
    }
}

/// One classified observation, as appended to a face's rolling history.
#[derive(Clone, Copy, Debug)]
pub struct GestureSample {
    pub gesture: Gesture,
    pub confidence: f32,
    pub delta_x: f32,
    pub delta_y: f32,
}

/// What the landmark detector reports for one face in one frame.
///
/// `landmarks` is ordered; index 4 is the nose tip. `id` is stable only
/// while the face stays continuously detected.
#[derive(Clone, Debug)]
pub struct FaceObservation {
    pub id: u32,
    pub landmarks: Vec<Point>,
}

/// Per-frame state of one tracked face, for UI / debug consumers.
#[derive(Clone, Copy, Debug)]
pub struct FaceSummary {
    pub id: u32,
    pub rect: Rect,
    pub nose: Point,
    pub delta_x: f32,
    pub delta_y: f32,
    pub gesture: Gesture,
    pub confidence: f32,
    pub is_preparing: bool,
    pub is_in_cooldown: bool,
    /// Overlay opacity: fades linearly 1 → 0 across the cooldown window,
    /// 1.0 outside of cooldown.
    pub cooldown_fade: f32,
}

/// Emitted exactly once per face per cooldown window.
#[derive(Clone, Copy, Debug)]
pub struct VoteEvent {
    pub face_id: u32,
    pub vote: Vote,
}

/// A processed camera frame plus everything the gesture pipeline derived
/// from it, sent from the detector worker to the consuming application.
#[derive(Clone, Debug)]
pub struct VoteFrame {
    pub frame: Frame,
    pub summaries: Vec<FaceSummary>,
    pub events: Vec<VoteEvent>,
}
