use super::common::iou;

// Minimum overlap for a detection to inherit an id from the last frame.
const MATCH_IOU: f32 = 0.3;

/// Assigns stable face ids by greedy box overlap between consecutive
/// frames. A face that drops out of one frame loses its id for good;
/// ids are never reused, so a re-acquired face always looks new to the
/// vote tracker.
#[derive(Debug, Default)]
pub struct FaceIdAssigner {
    next_id: u32,
    previous: Vec<(u32, [f32; 4])>,
}

impl FaceIdAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// One id per input box, in order.
    pub fn assign(&mut self, boxes: &[[f32; 4]]) -> Vec<u32> {
        let mut claimed = vec![false; self.previous.len()];
        let mut ids = Vec::with_capacity(boxes.len());

        for bbox in boxes {
            let mut best: Option<(usize, f32)> = None;
            for (prev_idx, (_, prev_box)) in self.previous.iter().enumerate() {
                if claimed[prev_idx] {
                    continue;
                }
                let overlap = iou(bbox, prev_box);
                if overlap >= MATCH_IOU && best.is_none_or(|(_, b)| overlap > b) {
                    best = Some((prev_idx, overlap));
                }
            }

            let id = match best {
                Some((prev_idx, _)) => {
                    claimed[prev_idx] = true;
                    self.previous[prev_idx].0
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    id
                }
            };
            ids.push(id);
        }

        self.previous = ids.iter().copied().zip(boxes.iter().copied()).collect();
        ids
    }
}
