use serde::{Deserialize, Serialize};

/// Marker for payloads a value channel may store inline in shared memory.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, contain no pointers, references, or
/// other address-space-local data, and must be valid for any byte pattern a
/// producer built from the same crate version can write. The channel copies
/// values across process boundaries as raw bytes.
pub unsafe trait ShmValue: Copy + 'static {}

unsafe impl ShmValue for u8 {}
unsafe impl ShmValue for u16 {}
unsafe impl ShmValue for u32 {}
unsafe impl ShmValue for u64 {}
unsafe impl ShmValue for i8 {}
unsafe impl ShmValue for i16 {}
unsafe impl ShmValue for i32 {}
unsafe impl ShmValue for i64 {}
unsafe impl ShmValue for f32 {}
unsafe impl ShmValue for f64 {}

/// A tracked object's 2D position in pixel coordinates, with optional
/// velocity and heading estimates and the calibration needed to express
/// the position in world units.
///
/// Every group carries its own validity flag; downstream code must check
/// the flag before using the group, never assume the last value is fresh.
/// Serde derives are for JSON at log/CLI boundaries; the channel itself
/// moves the plain `repr(C)` bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position2D {
    pub x: f64,
    pub y: f64,
    pub position_valid: bool,

    pub dx: f64,
    pub dy: f64,
    pub velocity_valid: bool,

    pub heading_x: f64,
    pub heading_y: f64,
    pub heading_valid: bool,

    /// World-unit calibration: millimeters per pixel and the world origin
    /// in pixel coordinates.
    pub mm_per_px_x: f64,
    pub mm_per_px_y: f64,
    pub origin_px_x: f64,
    pub origin_px_y: f64,
    pub calibration_valid: bool,
}

unsafe impl ShmValue for Position2D {}

impl Position2D {
    /// A detection at pixel coordinates (x, y) with no velocity, heading,
    /// or calibration information.
    pub fn at_pixel(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            position_valid: true,
            ..Self::default()
        }
    }

    pub fn with_calibration(
        mut self,
        mm_per_px_x: f64,
        mm_per_px_y: f64,
        origin_px_x: f64,
        origin_px_y: f64,
    ) -> Self {
        self.mm_per_px_x = mm_per_px_x;
        self.mm_per_px_y = mm_per_px_y;
        self.origin_px_x = origin_px_x;
        self.origin_px_y = origin_px_y;
        self.calibration_valid = true;
        self
    }

    /// Convert the pixel position to world coordinates (millimeters from
    /// the calibrated origin). None unless both the position and the
    /// calibration are valid.
    pub fn to_world_coords(&self) -> Option<(f64, f64)> {
        if !(self.position_valid && self.calibration_valid) {
            return None;
        }
        Some((
            (self.x - self.origin_px_x) * self.mm_per_px_x,
            (self.y - self.origin_px_y) * self.mm_per_px_y,
        ))
    }
}

impl Default for Position2D {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            position_valid: false,
            dx: 0.0,
            dy: 0.0,
            velocity_valid: false,
            heading_x: 0.0,
            heading_y: 0.0,
            heading_valid: false,
            mm_per_px_x: 0.0,
            mm_per_px_y: 0.0,
            origin_px_x: 0.0,
            origin_px_y: 0.0,
            calibration_valid: false,
        }
    }
}
