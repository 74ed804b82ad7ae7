//! Shared geometry, pointer and cursor types.
//!
//! These are the engine's own representations. The RFB wire encodings of the
//! same concepts live in [`crate::rfb::codec`].

use bitflags::bitflags;
use image::RgbaImage;

// ── Point ────────────────────────────────────────────────────────

/// A position in framebuffer pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::ops::Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

// ── Rect ─────────────────────────────────────────────────────────

/// A rectangle that is known to lie inside some framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The rectangle covering a whole `width × height` frame.
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

// ── Region ───────────────────────────────────────────────────────

/// A caller-supplied capture region.
///
/// Negative `width` / `height` mean "to the far edge from the origin". The
/// default `(0, 0, -1, -1)` is the full frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Default for Region {
    fn default() -> Self {
        Self::FULL
    }
}

impl Region {
    /// The whole frame, whatever its size.
    pub const FULL: Region = Region {
        x: 0,
        y: 0,
        width: -1,
        height: -1,
    };

    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Resolve against a `frame_width × frame_height` frame.
    ///
    /// Returns `None` when the result would be empty or would reach outside
    /// the frame.
    pub fn resolve(&self, frame_width: u32, frame_height: u32) -> Option<Rect> {
        let fw = i64::from(frame_width);
        let fh = i64::from(frame_height);
        let x = i64::from(self.x);
        let y = i64::from(self.y);
        let w = if self.width < 0 { fw - x } else { i64::from(self.width) };
        let h = if self.height < 0 { fh - y } else { i64::from(self.height) };

        if x < 0 || y < 0 || w <= 0 || h <= 0 || x + w > fw || y + h > fh {
            return None;
        }
        Some(Rect::new(x as u32, y as u32, w as u32, h as u32))
    }
}

// ── Buttons ──────────────────────────────────────────────────────

bitflags! {
    /// RFB pointer button mask (bit 0 = left, bit 1 = middle, bit 2 = right).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct ButtonMask: u8 {
        const LEFT = 0x01;
        const MIDDLE = 0x02;
        const RIGHT = 0x04;
    }
}

/// Abstract mouse button as addressed by tool calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum MouseButton {
    #[default]
    None,
    Left,
    Middle,
    Right,
}

impl MouseButton {
    /// Button held during a move. Codes other than 1 to 3 mean no button.
    pub fn held_code(code: i64) -> Self {
        match code {
            1 => MouseButton::Left,
            2 => MouseButton::Middle,
            3 => MouseButton::Right,
            _ => MouseButton::None,
        }
    }

    /// Button pressed by a click-like action. Codes other than 2 or 3 mean left.
    pub fn press_code(code: i64) -> Self {
        match code {
            2 => MouseButton::Middle,
            3 => MouseButton::Right,
            _ => MouseButton::Left,
        }
    }

    pub fn mask(self) -> ButtonMask {
        match self {
            MouseButton::None => ButtonMask::empty(),
            MouseButton::Left => ButtonMask::LEFT,
            MouseButton::Middle => ButtonMask::MIDDLE,
            MouseButton::Right => ButtonMask::RIGHT,
        }
    }
}

// ── Cursor ───────────────────────────────────────────────────────

/// A server-supplied cursor shape.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorShape {
    /// Cursor pixels; transparent where the server mask is clear.
    pub image: RgbaImage,
    /// Offset of the pointer tip inside `image`.
    pub hotspot: Point,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_region_is_full_frame() {
        assert_eq!(Region::default().resolve(800, 600), Some(Rect::full(800, 600)));
    }

    #[test]
    fn negative_extent_runs_to_far_edge() {
        assert_eq!(
            Region::new(100, 50, -1, -1).resolve(800, 600),
            Some(Rect::new(100, 50, 700, 550))
        );
        assert_eq!(
            Region::new(10, 20, 30, -5).resolve(800, 600),
            Some(Rect::new(10, 20, 30, 580))
        );
        assert_eq!(
            Region::new(10, 20, -7, 40).resolve(800, 600),
            Some(Rect::new(10, 20, 790, 40))
        );
    }

    #[test]
    fn out_of_bounds_regions_do_not_resolve() {
        assert_eq!(Region::new(790, 0, 20, 10).resolve(800, 600), None);
        assert_eq!(Region::new(-1, 0, 10, 10).resolve(800, 600), None);
        assert_eq!(Region::new(800, 0, -1, -1).resolve(800, 600), None);
        assert_eq!(Region::new(0, 0, 0, 10).resolve(800, 600), None);
        assert_eq!(Region::default().resolve(0, 0), None);
    }

    #[test]
    fn button_codes() {
        assert_eq!(MouseButton::held_code(0), MouseButton::None);
        assert_eq!(MouseButton::held_code(7), MouseButton::None);
        assert_eq!(MouseButton::press_code(0), MouseButton::Left);
        assert_eq!(MouseButton::press_code(3), MouseButton::Right);
        assert_eq!(MouseButton::Middle.mask(), ButtonMask::MIDDLE);
        assert!(MouseButton::None.mask().is_empty());
    }
}
