use image::{Rgb, Rgba, RgbaImage};
use imageproc::point::Point;

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const DARK_GREEN: Rgb<u8> = Rgb([0, 128, 0]);
pub const RED: Rgb<u8> = Rgb([255, 0, 0]);
pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const PINK: Rgb<u8> = Rgb([255, 0, 255]);

#[cfg(test)]
pub const WHITE_RGBA: Rgba<u8> = Rgba([u8::MAX, u8::MAX, u8::MAX, u8::MAX]);
#[cfg(test)]
pub const BLACK_RGBA: Rgba<u8> = Rgba([u8::MIN, u8::MIN, u8::MIN, u8::MAX]);

/// Grayscale level of a pixel as the plain average of its color channels.
/// Alpha is ignored.
pub fn gray(pixel: &Rgba<u8>) -> f32 {
    let [r, g, b, _] = pixel.0;
    (r as f32 + g as f32 + b as f32) / 3.0
}

/// How dark a single pixel is, from 0.0 (white) to 1.0 (black).
pub fn pixel_darkness(pixel: &Rgba<u8>) -> f32 {
    (255.0 - gray(pixel)) / 255.0
}

/// Mean darkness over every pixel within `radius` of `center`.
///
/// Pixels falling outside the image are skipped rather than clamped, so a
/// bubble hanging off the page edge is judged only by its visible part. A
/// region with no visible pixels has darkness 0.
///
/// ```text
///      radius 2
///     . . x . .
///     . x x x .
///     x x C x x
///     . x x x .
///     . . x . .
/// ```
pub fn circle_darkness(img: &RgbaImage, center: Point<i32>, radius: i32) -> f32 {
    let radius = radius.max(0);
    let (width, height) = (img.width() as i32, img.height() as i32);
    let mut total = 0.0f32;
    let mut count = 0u32;

    for y in (center.y - radius)..=(center.y + radius) {
        if y < 0 || y >= height {
            continue;
        }
        for x in (center.x - radius)..=(center.x + radius) {
            if x < 0 || x >= width {
                continue;
            }
            let dx = x - center.x;
            let dy = y - center.y;
            if dx * dx + dy * dy <= radius * radius {
                total += pixel_darkness(img.get_pixel(x as u32, y as u32));
                count += 1;
            }
        }
    }

    if count > 0 {
        total / count as f32
    } else {
        0.0
    }
}

/// Paints a filled disc, used to fake pencil marks on synthetic sheets.
#[cfg(test)]
pub fn fill_circle(img: &mut RgbaImage, center: Point<i32>, radius: i32, color: Rgba<u8>) {
    imageproc::drawing::draw_filled_circle_mut(img, (center.x, center.y), radius, color);
}
