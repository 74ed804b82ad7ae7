//! Flattening of framebuffer and cursor into one still image.
//!
//! Compositing is a pure function of its inputs: the same framebuffer,
//! cursor and position always produce the same pixels. The server cursor is
//! alpha-blended at `position - hotspot`; without one, a small arrow is
//! drawn at the fallback position instead.

use image::{Rgba, RgbaImage};

use crate::error::{PilotError, Result};
use crate::session::ConnectionSession;
use crate::types::{CursorShape, Point, Region};

/// Outline of the fallback arrow, tip at the origin.
pub const ARROW: [(f32, f32); 7] = [
    (0.0, 0.0),
    (0.0, 12.0),
    (3.0, 10.0),
    (6.0, 15.0),
    (8.0, 14.0),
    (5.0, 9.0),
    (9.0, 9.0),
];

/// Samples per pixel along each axis when rasterising the arrow.
const SUBSAMPLES: u32 = 4;
/// Half the outline pen width.
const HALF_PEN: f32 = 0.5;

// ── Composition ──────────────────────────────────────────────────

/// Composite `frame` with the cursor.
///
/// `cursor_pos` places a server cursor; `fallback` places the arrow drawn
/// when there is none.
pub fn compose(
    frame: &RgbaImage,
    cursor: Option<&CursorShape>,
    cursor_pos: Point,
    fallback: Point,
) -> RgbaImage {
    let mut out = frame.clone();
    match cursor {
        Some(shape) => blend_cursor(&mut out, shape, cursor_pos - shape.hotspot),
        None => draw_arrow(&mut out, fallback),
    }
    out
}

/// Composite the session's current snapshot, if there is one.
pub fn render(session: &ConnectionSession, fallback: Point) -> Option<RgbaImage> {
    session
        .framebuffer()
        .map(|fb| compose(fb, session.cursor(), session.cursor_pos(), fallback))
}

/// Cut `region` out of `image`. The full region returns the image unchanged.
pub fn extract_region(image: RgbaImage, region: Region) -> Option<RgbaImage> {
    let (w, h) = image.dimensions();
    let rect = region.resolve(w, h)?;
    if rect.x == 0 && rect.y == 0 && rect.width == w && rect.height == h {
        return Some(image);
    }
    Some(image::imageops::crop_imm(&image, rect.x, rect.y, rect.width, rect.height).to_image())
}

/// Composite and extract in one step, as the capture tools need it.
pub fn capture(session: &ConnectionSession, fallback: Point, region: Region) -> Result<RgbaImage> {
    render(session, fallback)
        .and_then(|img| extract_region(img, region))
        .ok_or(PilotError::NoFramebuffer)
}

// ── Cursor blending ──────────────────────────────────────────────

fn blend_cursor(out: &mut RgbaImage, shape: &CursorShape, origin: Point) {
    for (cx, cy, src) in shape.image.enumerate_pixels() {
        let x = i64::from(origin.x) + i64::from(cx);
        let y = i64::from(origin.y) + i64::from(cy);
        if x < 0 || y < 0 || x >= i64::from(out.width()) || y >= i64::from(out.height()) {
            continue;
        }
        let alpha = u32::from(src[3]);
        if alpha == 0 {
            continue;
        }
        let dst = out.get_pixel_mut(x as u32, y as u32);
        let mix = |d: u8, s: u8| ((u32::from(s) * alpha + u32::from(d) * (255 - alpha) + 127) / 255) as u8;
        *dst = Rgba([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2]), dst[3]]);
    }
}

// ── Fallback arrow ───────────────────────────────────────────────

/// Antialiased arrow: white fill, 1 px black outline, tip at `at`.
fn draw_arrow(out: &mut RgbaImage, at: Point) {
    let (w, h) = (i64::from(out.width()), i64::from(out.height()));
    let step = 1.0 / SUBSAMPLES as f32;
    let total = SUBSAMPLES * SUBSAMPLES;

    // Bounding box of the arrow plus the outline's overhang.
    for py in -1..=16i64 {
        for px in -1..=10i64 {
            let (x, y) = (i64::from(at.x) + px, i64::from(at.y) + py);
            if x < 0 || y < 0 || x >= w || y >= h {
                continue;
            }

            let (mut ink, mut paper) = (0u32, 0u32);
            for sy in 0..SUBSAMPLES {
                for sx in 0..SUBSAMPLES {
                    let fx = px as f32 + (sx as f32 + 0.5) * step;
                    let fy = py as f32 + (sy as f32 + 0.5) * step;
                    if edge_distance(fx, fy) <= HALF_PEN {
                        ink += 1;
                    } else if inside(fx, fy) {
                        paper += 1;
                    }
                }
            }

            if ink + paper == 0 {
                continue;
            }
            // Black ink contributes nothing; only paper and bare frame remain.
            let bare = total - ink - paper;
            let dst = out.get_pixel_mut(x as u32, y as u32);
            let mix = |d: u8| ((u32::from(d) * bare + 255 * paper + total / 2) / total) as u8;
            *dst = Rgba([mix(dst[0]), mix(dst[1]), mix(dst[2]), dst[3]]);
        }
    }
}

/// Even-odd point-in-polygon test against [`ARROW`].
fn inside(x: f32, y: f32) -> bool {
    let mut hit = false;
    let mut j = ARROW.len() - 1;
    for i in 0..ARROW.len() {
        let (xi, yi) = ARROW[i];
        let (xj, yj) = ARROW[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            hit = !hit;
        }
        j = i;
    }
    hit
}

/// Distance from `(x, y)` to the nearest outline segment.
fn edge_distance(x: f32, y: f32) -> f32 {
    let mut best = f32::MAX;
    for i in 0..ARROW.len() {
        let (ax, ay) = ARROW[i];
        let (bx, by) = ARROW[(i + 1) % ARROW.len()];
        let (dx, dy) = (bx - ax, by - ay);
        let len2 = dx * dx + dy * dy;
        let t = if len2 == 0.0 {
            0.0
        } else {
            (((x - ax) * dx + (y - ay) * dy) / len2).clamp(0.0, 1.0)
        };
        let (ex, ey) = (ax + t * dx - x, ay + t * dy - y);
        best = best.min((ex * ex + ey * ey).sqrt());
    }
    best
}
