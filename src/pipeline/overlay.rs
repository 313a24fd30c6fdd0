//! Software overlay for the debug view: one colored box per tracked
//! face (green nod, red shake, gray quiet) plus a nose-tip dot, with
//! the box fading out across the cooldown window after a confirmation.

use crate::types::{FaceSummary, Gesture};

const BOX_THICKNESS: i32 = 6;
const NOSE_DOT_RADIUS: i32 = 5;

const YES_COLOR: [u8; 3] = [34, 197, 94];
const NO_COLOR: [u8; 3] = [239, 68, 68];
const QUIET_COLOR: [u8; 3] = [148, 163, 184];
const NOSE_COLOR: [u8; 4] = [248, 113, 113, 255];

pub fn draw_face_overlays(buffer: &mut [u8], width: u32, height: u32, summaries: &[FaceSummary]) {
    for summary in summaries {
        let base = match summary.gesture {
            Gesture::Yes => YES_COLOR,
            Gesture::No => NO_COLOR,
            Gesture::None => QUIET_COLOR,
        };
        let alpha = (summary.cooldown_fade.clamp(0.0, 1.0) * 255.0).round() as u8;
        let color = [base[0], base[1], base[2], alpha];

        let x1 = summary.rect.x1 * width as f32;
        let y1 = summary.rect.y1 * height as f32;
        let x2 = summary.rect.x2 * width as f32;
        let y2 = summary.rect.y2 * height as f32;
        draw_rect(buffer, width, height, x1, y1, x2, y2, color, BOX_THICKNESS);

        let nose_x = (summary.nose.x * width as f32) as i32;
        let nose_y = (summary.nose.y * height as f32) as i32;
        draw_circle(
            buffer,
            width,
            height,
            (nose_x, nose_y),
            NOSE_DOT_RADIUS,
            NOSE_COLOR,
        );
    }
}

fn draw_rect(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    color: [u8; 4],
    thickness: i32,
) {
    draw_line(buffer, width, height, (x1, y1), (x2, y1), color, thickness);
    draw_line(buffer, width, height, (x2, y1), (x2, y2), color, thickness);
    draw_line(buffer, width, height, (x2, y2), (x1, y2), color, thickness);
    draw_line(buffer, width, height, (x1, y2), (x1, y1), color, thickness);
}

fn draw_line(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    p0: (f32, f32),
    p1: (f32, f32),
    color: [u8; 4],
    thickness: i32,
) {
    let (mut x0, mut y0) = (p0.0 as i32, p0.1 as i32);
    let (x1, y1) = (p1.0 as i32, p1.1 as i32);
    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    let radius = (thickness.max(1) - 1) / 2;

    loop {
        blend_pixel(buffer, width, height, x0, y0, color);
        if radius > 0 {
            for ox in -radius..=radius {
                for oy in -radius..=radius {
                    if ox == 0 && oy == 0 {
                        continue;
                    }
                    if ox.abs() + oy.abs() <= radius {
                        blend_pixel(buffer, width, height, x0 + ox, y0 + oy, color);
                    }
                }
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn draw_circle(
    buffer: &mut [u8],
    width: u32,
    height: u32,
    center: (i32, i32),
    radius: i32,
    color: [u8; 4],
) {
    let (cx, cy) = center;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                blend_pixel(buffer, width, height, cx + dx, cy + dy, color);
            }
        }
    }
}

// Source-over blend so a fading box dims instead of vanishing abruptly.
fn blend_pixel(buffer: &mut [u8], width: u32, height: u32, x: i32, y: i32, color: [u8; 4]) {
    if x < 0 || y < 0 {
        return;
    }
    let (ux, uy) = (x as u32, y as u32);
    if ux >= width || uy >= height {
        return;
    }
    let idx = ((uy * width + ux) as usize) * 4;
    if idx + 3 >= buffer.len() {
        return;
    }

    let alpha = color[3] as u16;
    let inverse = 255 - alpha;
    for channel in 0..3 {
        let src = color[channel] as u16;
        let dst = buffer[idx + channel] as u16;
        buffer[idx + channel] = ((src * alpha + dst * inverse) / 255) as u8;
    }
    buffer[idx + 3] = 255;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Point, Rect};

    fn summary(gesture: Gesture, fade: f32) -> FaceSummary {
        FaceSummary {
            id: 1,
            rect: Rect {
                x1: 0.1,
                y1: 0.1,
                x2: 0.9,
                y2: 0.9,
            },
            nose: Point::new(0.5, 0.5),
            delta_x: 0.0,
            delta_y: 0.0,
            gesture,
            confidence: 0.0,
            is_preparing: false,
            is_in_cooldown: fade < 1.0,
            cooldown_fade: fade,
        }
    }

    #[test]
    fn opaque_blend_replaces_the_pixel() {
        let mut buffer = vec![0u8; 4];
        blend_pixel(&mut buffer, 1, 1, 0, 0, [200, 100, 50, 255]);
        assert_eq!(&buffer[..3], &[200, 100, 50]);
    }

    #[test]
    fn transparent_blend_leaves_the_pixel() {
        let mut buffer = vec![10u8, 20, 30, 255];
        blend_pixel(&mut buffer, 1, 1, 0, 0, [200, 100, 50, 0]);
        assert_eq!(&buffer[..3], &[10, 20, 30]);
    }

    #[test]
    fn out_of_bounds_pixels_are_ignored() {
        let mut buffer = vec![0u8; 4];
        blend_pixel(&mut buffer, 1, 1, -1, 0, [255, 255, 255, 255]);
        blend_pixel(&mut buffer, 1, 1, 0, 5, [255, 255, 255, 255]);
        assert_eq!(buffer, vec![0u8; 4]);
    }

    #[test]
    fn nod_draws_a_green_box_edge() {
        let width = 40u32;
        let height = 40u32;
        let mut buffer = vec![0u8; (width * height * 4) as usize];
        draw_face_overlays(&mut buffer, width, height, &[summary(Gesture::Yes, 1.0)]);

        // Top edge of the rect runs through y=4; sample a pixel on it.
        let idx = ((4 * width + 20) as usize) * 4;
        assert_eq!(&buffer[idx..idx + 3], &YES_COLOR);
    }

    #[test]
    fn faded_box_is_dimmer_than_a_fresh_one() {
        let width = 40u32;
        let height = 40u32;
        let mut fresh = vec![0u8; (width * height * 4) as usize];
        let mut faded = vec![0u8; (width * height * 4) as usize];
        draw_face_overlays(&mut fresh, width, height, &[summary(Gesture::No, 1.0)]);
        draw_face_overlays(&mut faded, width, height, &[summary(Gesture::No, 0.25)]);

        let idx = ((4 * width + 20) as usize) * 4;
        assert!(faded[idx] < fresh[idx]);
        assert!(faded[idx] > 0);
    }
}
