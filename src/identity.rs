use logging_timer::time;

use crate::bubble_grid::{decide_column, scan_grid, BubbleGridSpec, DetectionThresholds, GridScan};
use crate::sheet_template::SheetTemplate;
use crate::types::{RasterImage, StudentIdentity};

/// Decodes a letter grid into text, one character per column.
///
/// An undecided column is read as a word break: it adds a single space
/// unless the text already ends in one. Leading and trailing spaces are
/// trimmed.
pub fn decode_letters(scan: &GridScan, spec: &BubbleGridSpec, threshold: f32) -> String {
    let mut text = String::new();
    for column in &scan.columns {
        match decide_column(column, threshold).and_then(|row| spec.symbol_for_row(row)) {
            Some(letter) => text.push(letter),
            None => {
                if !text.is_empty() && !text.ends_with(' ') {
                    text.push(' ');
                }
            }
        }
    }
    text.trim().to_string()
}

/// Decodes a digit grid. Undecided columns are skipped.
pub fn decode_digits(scan: &GridScan, spec: &BubbleGridSpec, threshold: f32) -> String {
    scan.columns
        .iter()
        .filter_map(|column| decide_column(column, threshold))
        .filter_map(|row| spec.symbol_for_row(row))
        .collect()
}

#[time]
pub fn extract_identity(
    image: &RasterImage,
    template: &SheetTemplate,
    thresholds: &DetectionThresholds,
) -> StudentIdentity {
    let threshold = thresholds.identity_absolute;
    let name = decode_letters(&scan_grid(&image.pixels, &template.name), &template.name, threshold);
    let roll_number = decode_digits(
        &scan_grid(&image.pixels, &template.roll_number),
        &template.roll_number,
        threshold,
    );
    let hall_ticket = decode_digits(
        &scan_grid(&image.pixels, &template.hall_ticket),
        &template.hall_ticket,
        threshold,
    );

    let identity = StudentIdentity::from_decoded(&name, &roll_number, &hall_ticket);
    log::debug!(
        "page {}: name={:?} roll={:?} hall ticket={:?}",
        image.page_number(),
        identity.name,
        identity.roll_number,
        identity.hall_ticket
    );
    identity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bubble_grid::BubbleDecision;
    use crate::geometry::Size;
    use crate::image_utils::{fill_circle, BLACK_RGBA, WHITE_RGBA};
    use crate::sheet_template::sheet_template_neet_180;
    use image::RgbaImage;

    /// A scan where each column has the given row marked (or none).
    fn scan_with_marks(marks: &[Option<u32>], rows: u32) -> GridScan {
        GridScan {
            columns: marks
                .iter()
                .enumerate()
                .map(|(col, mark)| {
                    (0..rows)
                        .map(|row| BubbleDecision {
                            row,
                            col: col as u32,
                            darkness: if *mark == Some(row) { 0.9 } else { 0.05 },
                        })
                        .collect()
                })
                .collect(),
        }
    }

    fn fill(img: &mut RgbaImage, spec: &BubbleGridSpec, marks: &[(usize, usize)]) {
        let size = Size {
            width: img.width(),
            height: img.height(),
        };
        let centers = spec.bubble_centers(size);
        let radius = spec.bubble_radius(size);
        for &(column, row) in marks {
            fill_circle(img, centers[column][row], radius + 1, BLACK_RGBA);
        }
    }

    #[test]
    fn blank_columns_become_single_spaces() {
        let template = sheet_template_neet_180();
        // _ A N _ _ L E E _
        let marks = [None, Some(0), Some(13), None, None, Some(11), Some(4), Some(4), None];
        let name = decode_letters(&scan_with_marks(&marks, 26), &template.name, 0.35);
        assert_eq!(name, "AN LEE");
    }

    #[test]
    fn blank_digit_columns_are_dropped() {
        let template = sheet_template_neet_180();
        let marks = [Some(4), None, Some(0), Some(9)];
        let roll = decode_digits(&scan_with_marks(&marks, 10), &template.roll_number, 0.35);
        assert_eq!(roll, "409");
    }

    #[test]
    fn reads_identity_from_a_marked_sheet() {
        let template = sheet_template_neet_180();
        let mut img = RgbaImage::from_pixel(1200, 1600, WHITE_RGBA);
        // "BO" then a gap then "X".
        fill(&mut img, &template.name, &[(0, 1), (1, 14), (3, 23)]);
        fill(&mut img, &template.roll_number, &[(0, 1), (1, 2), (2, 3)]);

        let identity = extract_identity(
            &RasterImage::new(0, img),
            &template,
            &DetectionThresholds::default(),
        );
        assert_eq!(identity.name, "BO X");
        assert_eq!(identity.roll_number, "123");
        assert_eq!(identity.hall_ticket, "N/A");
    }

    #[test]
    fn blank_sheet_gets_sentinel_identity() {
        let template = sheet_template_neet_180();
        let img = RgbaImage::from_pixel(1200, 1600, WHITE_RGBA);
        let identity = extract_identity(
            &RasterImage::new(0, img),
            &template,
            &DetectionThresholds::default(),
        );
        assert_eq!(identity, StudentIdentity::unknown());
    }
}
