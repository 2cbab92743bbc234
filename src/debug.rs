use std::path::{Path, PathBuf};

use image::RgbImage;
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, draw_hollow_rect_mut};

use crate::bubble_grid::{
    decide_column, decide_multiple_choice, scan_grid, BubbleGridSpec, DetectionThresholds,
    Interpretation,
};
use crate::image_utils::{BLUE, DARK_GREEN, GREEN, PINK, RED};
use crate::sheet_template::SheetTemplate;
use crate::types::RasterImage;

const CENTER_DOT_RADIUS: i32 = 2;

/// Creates a path for a debug image.
pub fn debug_image_path(base: &Path, label: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut result = PathBuf::from(base);
    result.set_file_name(format!("{}_debug_{}.png", stem, label));
    result
}

/// Writes annotated copies of an input image next to it. A disabled writer
/// does nothing, so call sites need not check whether debugging is on.
pub struct ImageDebugWriter {
    input_path: PathBuf,
    input_image: Option<RgbImage>,
}

impl ImageDebugWriter {
    pub fn new(input_path: PathBuf, input_image: RgbImage) -> Self {
        Self {
            input_path,
            input_image: Some(input_image),
        }
    }

    pub fn disabled() -> Self {
        Self {
            input_path: PathBuf::new(),
            input_image: None,
        }
    }

    /// Draws on a copy of the input image and saves it. Returns the written
    /// path, or `None` if disabled or the save failed.
    pub fn write(&self, label: &str, draw: impl FnOnce(&mut RgbImage)) -> Option<PathBuf> {
        let input_image = self.input_image.as_ref()?;
        let mut canvas = input_image.clone();
        draw(&mut canvas);

        let path = debug_image_path(&self.input_path, label);
        match canvas.save(&path) {
            Ok(()) => {
                log::debug!("wrote debug image {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::warn!("could not write debug image {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Outlines each grid of `template` and marks every bubble center: green
/// when its darkness clears the grid's threshold, red otherwise. The bubble
/// each question or column settles on is ringed.
pub fn draw_template_debug_image_mut(
    canvas: &mut RgbImage,
    image: &RasterImage,
    template: &SheetTemplate,
    thresholds: &DetectionThresholds,
) {
    for (_, spec) in template.grids() {
        draw_grid_debug_image_mut(canvas, image, spec, thresholds);
    }
}

fn draw_grid_debug_image_mut(
    canvas: &mut RgbImage,
    image: &RasterImage,
    spec: &BubbleGridSpec,
    thresholds: &DetectionThresholds,
) {
    let size = image.size();
    let is_answer_grid = matches!(spec.interpretation, Interpretation::MultipleChoice { .. });
    let threshold = if is_answer_grid {
        thresholds.answer_absolute
    } else {
        thresholds.identity_absolute
    };

    if let Some(rect) = spec.region.to_pixels(size).to_rect() {
        draw_hollow_rect_mut(canvas, rect, if is_answer_grid { BLUE } else { PINK });
    }

    let centers = spec.bubble_centers(size);
    let radius = spec.bubble_radius(size);
    let scan = scan_grid(&image.pixels, spec);

    for column in &scan.columns {
        for bubble in column {
            let center = centers[bubble.col as usize][bubble.row as usize];
            let color = if bubble.darkness > threshold { GREEN } else { RED };
            draw_filled_circle_mut(canvas, (center.x, center.y), CENTER_DOT_RADIUS, color);
        }
    }

    let chosen: Vec<(usize, usize)> = if is_answer_grid {
        let options = spec.options() as usize;
        let mut chosen = Vec::new();
        for (block, columns) in scan.columns.chunks(options.max(1)).enumerate() {
            for row in 0..spec.rows as usize {
                let question: Vec<_> =
                    columns.iter().filter_map(|column| column.get(row).copied()).collect();
                if let Some(option) = decide_multiple_choice(&question, thresholds) {
                    chosen.push((block * options + option, row));
                }
            }
        }
        chosen
    } else {
        scan.columns
            .iter()
            .enumerate()
            .filter_map(|(col, column)| {
                decide_column(column, threshold).map(|row| (col, row as usize))
            })
            .collect()
    };

    for (col, row) in chosen {
        let center = centers[col][row];
        draw_hollow_circle_mut(canvas, (center.x, center.y), radius.max(1), DARK_GREEN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Size;
    use crate::image_utils::{fill_circle, BLACK_RGBA, WHITE_RGBA};
    use image::RgbaImage;
    use crate::sheet_template::sheet_template_standard_50;

    #[test]
    fn debug_path_sits_next_to_input() {
        let path = debug_image_path(Path::new("/scans/batch-1/sheet.jpg"), "page2");
        assert_eq!(path, PathBuf::from("/scans/batch-1/sheet_debug_page2.png"));
    }

    #[test]
    fn disabled_writer_writes_nothing() {
        let mut called = false;
        let written = ImageDebugWriter::disabled().write("page1", |_| called = true);
        assert_eq!(written, None);
        assert!(!called);
    }

    #[test]
    fn writes_annotated_image() {
        let dir = tempfile::tempdir().expect("creates temp dir");
        let input = dir.path().join("sheet.png");
        let writer = ImageDebugWriter::new(input, RgbImage::new(20, 20));

        let written = writer
            .write("page1", |canvas| canvas.put_pixel(1, 1, GREEN))
            .expect("writes debug image");

        assert_eq!(written, dir.path().join("sheet_debug_page1.png"));
        let saved = image::open(&written).expect("reads back").into_rgb8();
        assert_eq!(saved.get_pixel(1, 1), &GREEN);
    }

    #[test]
    fn bubble_centers_are_colored_by_darkness() {
        let template = sheet_template_standard_50();
        let mut pixels = RgbaImage::from_pixel(1000, 1400, WHITE_RGBA);
        let size = Size {
            width: pixels.width(),
            height: pixels.height(),
        };
        let centers = template.answers.bubble_centers(size);
        let radius = template.answers.bubble_radius(size);
        fill_circle(&mut pixels, centers[1][0], radius + 1, BLACK_RGBA);

        let mut canvas = RgbImage::new(1000, 1400);
        draw_template_debug_image_mut(
            &mut canvas,
            &RasterImage::new(0, pixels),
            &template,
            &DetectionThresholds::default(),
        );

        let marked = centers[1][0];
        let blank = centers[0][0];
        assert_eq!(canvas.get_pixel(marked.x as u32, marked.y as u32), &GREEN);
        assert_eq!(canvas.get_pixel(blank.x as u32, blank.y as u32), &RED);
    }
}
