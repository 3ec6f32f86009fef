//! Geometry between a frame's native pixels and the surface it is drawn on.
//!
//! Two scaling policies live here and they are not interchangeable.
//! [`ViewportTransform::fit`] letterboxes the whole frame and is the only one
//! that supports pointer mapping. [`CropRect::fill`] covers the surface and
//! crops the overflow, which is fine for thumbnails but shifts which frame
//! pixel sits under any display pixel, so it exposes no mapping at all.

use crate::coords::{validate_xy, NormalizedPoint};
use serde::{Deserialize, Serialize};

/// Where the scaled frame is drawn inside the display surface, in display pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportTransform {
    pub offset_x: i32,
    pub offset_y: i32,
    pub width: u32,
    pub height: u32,
}

impl ViewportTransform {
    /// Fit-with-letterbox: keep aspect ratio, center, pad the remainder.
    pub fn fit(frame_w: u32, frame_h: u32, surface_w: u32, surface_h: u32) -> Self {
        if frame_w == 0 || frame_h == 0 || surface_w == 0 || surface_h == 0 {
            return Self { offset_x: 0, offset_y: 0, width: 0, height: 0 };
        }
        let scale = (f64::from(surface_w) / f64::from(frame_w))
            .min(f64::from(surface_h) / f64::from(frame_h));
        let width = ((f64::from(frame_w) * scale).round() as u32).clamp(1, surface_w);
        let height = ((f64::from(frame_h) * scale).round() as u32).clamp(1, surface_h);
        Self {
            offset_x: ((surface_w - width) / 2) as i32,
            offset_y: ((surface_h - height) / 2) as i32,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether a display pixel lands on the drawn frame rather than the padding.
    pub fn contains(&self, px: i32, py: i32) -> bool {
        !self.is_empty()
            && px >= self.offset_x
            && py >= self.offset_y
            && i64::from(px) < i64::from(self.offset_x) + i64::from(self.width)
            && i64::from(py) < i64::from(self.offset_y) + i64::from(self.height)
    }

    pub fn to_normalized(&self, px: i32, py: i32) -> Option<NormalizedPoint> {
        if !self.contains(px, py) {
            return None;
        }
        let nx = f64::from(px - self.offset_x) / f64::from(self.width);
        let ny = f64::from(py - self.offset_y) / f64::from(self.height);
        validate_xy(nx, ny).ok()
    }

    pub fn to_display(&self, point: NormalizedPoint) -> (i32, i32) {
        let px = f64::from(self.offset_x) + point.x() * f64::from(self.width);
        let py = f64::from(self.offset_y) + point.y() * f64::from(self.height);
        (px.round() as i32, py.round() as i32)
    }
}

/// Current mapping for an interactive surface. Recomputed whenever the
/// surface is resized or a frame with different dimensions arrives.
#[derive(Clone, Debug, Default)]
pub struct ViewportMapper {
    frame: Option<(u32, u32)>,
    surface: (u32, u32),
    transform: Option<ViewportTransform>,
}

impl ViewportMapper {
    pub fn new(surface_w: u32, surface_h: u32) -> Self {
        Self { frame: None, surface: (surface_w, surface_h), transform: None }
    }

    pub fn set_frame_size(&mut self, width: u32, height: u32) {
        self.frame = Some((width, height));
        self.recompute();
    }

    pub fn resize(&mut self, surface_w: u32, surface_h: u32) {
        self.surface = (surface_w, surface_h);
        self.recompute();
    }

    pub fn transform(&self) -> Option<ViewportTransform> {
        self.transform
    }

    pub fn display_to_normalized(&self, px: i32, py: i32) -> Option<NormalizedPoint> {
        self.transform?.to_normalized(px, py)
    }

    /// Inverse mapping, used for drawing overlays on the live view.
    pub fn normalized_to_display(&self, point: NormalizedPoint) -> Option<(i32, i32)> {
        self.transform
            .filter(|t| !t.is_empty())
            .map(|t| t.to_display(point))
    }

    fn recompute(&mut self) {
        self.transform = self
            .frame
            .map(|(fw, fh)| ViewportTransform::fit(fw, fh, self.surface.0, self.surface.1));
    }
}

/// Fill-with-crop placement for non-interactive surfaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropRect {
    /// Size the frame is scaled to before cropping.
    pub scaled_width: u32,
    pub scaled_height: u32,
    /// Visible window within the scaled frame; always the surface size.
    pub crop_x: u32,
    pub crop_y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn fill(frame_w: u32, frame_h: u32, surface_w: u32, surface_h: u32) -> Option<Self> {
        if frame_w == 0 || frame_h == 0 || surface_w == 0 || surface_h == 0 {
            return None;
        }
        let scale = (f64::from(surface_w) / f64::from(frame_w))
            .max(f64::from(surface_h) / f64::from(frame_h));
        let scaled_width = ((f64::from(frame_w) * scale).round() as u32).max(surface_w);
        let scaled_height = ((f64::from(frame_h) * scale).round() as u32).max(surface_h);
        Some(Self {
            scaled_width,
            scaled_height,
            crop_x: (scaled_width - surface_w) / 2,
            crop_y: (scaled_height - surface_h) / 2,
            width: surface_w,
            height: surface_h,
        })
    }
}
