use imageproc::point::Point;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Size<T> {
    pub width: T,
    pub height: T,
}

/// A region of a page expressed as fractions of the page width and height,
/// so the same region applies to a scan at any resolution.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedRect {
    pub start_x: f32,
    pub start_y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub const fn new(start_x: f32, start_y: f32, width: f32, height: f32) -> Self {
        Self {
            start_x,
            start_y,
            width,
            height,
        }
    }

    /// Maps the region onto an image of the given size.
    pub fn to_pixels(&self, image_size: Size<u32>) -> PixelRect {
        let image_width = image_size.width as f32;
        let image_height = image_size.height as f32;
        PixelRect {
            left: image_width * self.start_x,
            top: image_height * self.start_y,
            width: image_width * self.width,
            height: image_height * self.height,
        }
    }

    pub fn is_within_page(&self) -> bool {
        self.start_x >= 0.0
            && self.start_y >= 0.0
            && self.width > 0.0
            && self.height > 0.0
            && self.start_x + self.width <= 1.0
            && self.start_y + self.height <= 1.0
    }
}

/// A region in pixel space. Coordinates stay fractional until a bubble
/// center is snapped to a pixel.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PixelRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl PixelRect {
    /// The size of one cell when the region is split evenly into a grid.
    pub fn cell_size(&self, columns: u32, rows: u32) -> Size<f32> {
        Size {
            width: self.width / columns.max(1) as f32,
            height: self.height / rows.max(1) as f32,
        }
    }

    /// Converts to an integer rect for drawing. Returns `None` for regions
    /// smaller than a pixel.
    pub fn to_rect(&self) -> Option<Rect> {
        let width = self.width.round() as u32;
        let height = self.height.round() as u32;
        if width == 0 || height == 0 {
            return None;
        }
        Some(Rect::at(self.left.round() as i32, self.top.round() as i32).of_size(width, height))
    }
}

/// Snaps a fractional position to the pixel containing it.
pub fn floor_point(x: f32, y: f32) -> Point<i32> {
    Point::new(x.floor() as i32, y.floor() as i32)
}
