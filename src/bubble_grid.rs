use image::RgbaImage;
use imageproc::point::Point;
use logging_timer::time;
use serde::{Deserialize, Serialize};

use crate::geometry::{floor_point, NormalizedRect, Size};
use crate::image_utils::circle_darkness;

/// How the rows (and, for answers, the sub-columns) of a grid map to symbols.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Interpretation {
    /// Each grid column is a block of questions, one question per row. Inside
    /// a block, `options` bubbles (A, B, C, ...) sit side by side, starting
    /// `options_offset` into the block and spanning `options_span` of its
    /// width (both as fractions of the block width).
    #[serde(rename_all = "camelCase", rename = "multipleChoice")]
    MultipleChoice {
        options: u32,
        options_offset: f32,
        options_span: f32,
    },

    /// One letter per column, rows A through Z.
    #[serde(rename = "letter")]
    Letter,

    /// One digit per column, rows 0 through 9.
    #[serde(rename = "digit")]
    Digit,
}

/// Declarative geometry of a rectangular grid of bubbles.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BubbleGridSpec {
    pub region: NormalizedRect,
    pub columns: u32,
    pub rows: u32,
    /// Bubble radius as a fraction of the smaller cell dimension.
    pub radius_fraction: f32,
    pub interpretation: Interpretation,
}

/// Darkness of one sampled bubble.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BubbleDecision {
    pub row: u32,
    pub col: u32,
    pub darkness: f32,
}

/// The darkness of every bubble of a grid, column-major: `columns[col][row]`.
#[derive(Clone, Debug, PartialEq)]
pub struct GridScan {
    pub columns: Vec<Vec<BubbleDecision>>,
}

/// Acceptance thresholds for bubble decisions. The defaults were tuned by
/// hand against typical scans; darker or lighter printers may need others.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionThresholds {
    /// Minimum darkness for an answer bubble to count as marked.
    pub answer_absolute: f32,
    /// How much darker the chosen answer must be than the runner-up.
    pub answer_relative: f32,
    /// Minimum darkness for a name/roll-number/hall-ticket bubble.
    pub identity_absolute: f32,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            answer_absolute: 0.35,
            answer_relative: 1.1,
            identity_absolute: 0.35,
        }
    }
}

pub const LETTER_ROWS: u32 = 26;
pub const DIGIT_ROWS: u32 = 10;

/// Letter for the option at `index` (0 is 'A').
pub fn option_letter(index: u32) -> char {
    char::from(b'A' + (index.min(25) as u8))
}

impl BubbleGridSpec {
    /// Options per question, or 1 for letter and digit grids.
    pub fn options(&self) -> u32 {
        match self.interpretation {
            Interpretation::MultipleChoice { options, .. } => options.max(1),
            Interpretation::Letter | Interpretation::Digit => 1,
        }
    }

    /// Symbol encoded by `row` of a letter or digit grid.
    pub fn symbol_for_row(&self, row: u32) -> Option<char> {
        match self.interpretation {
            Interpretation::Letter if row < LETTER_ROWS => Some(option_letter(row)),
            Interpretation::Digit if row < DIGIT_ROWS => char::from_digit(row, 10),
            _ => None,
        }
    }

    /// Bubble radius in pixels for an image of the given size.
    pub fn bubble_radius(&self, image_size: Size<u32>) -> i32 {
        let cell = self
            .region
            .to_pixels(image_size)
            .cell_size(self.columns, self.rows);
        (cell.width.min(cell.height) * self.radius_fraction).floor() as i32
    }

    /// Pixel centers of every bubble, column-major like [`GridScan`].
    pub fn bubble_centers(&self, image_size: Size<u32>) -> Vec<Vec<Point<i32>>> {
        let region = self.region.to_pixels(image_size);
        let cell = region.cell_size(self.columns, self.rows);

        let column_centers: Vec<f32> = match self.interpretation {
            Interpretation::MultipleChoice {
                options,
                options_offset,
                options_span,
            } => {
                let options = options.max(1);
                let options_width = cell.width * options_span;
                let option_width = options_width / options as f32;
                (0..self.columns)
                    .flat_map(|col| {
                        let options_start =
                            region.left + col as f32 * cell.width + cell.width * options_offset;
                        (0..options).map(move |opt| {
                            options_start + opt as f32 * option_width + option_width / 2.0
                        })
                    })
                    .collect()
            }
            Interpretation::Letter | Interpretation::Digit => (0..self.columns)
                .map(|col| region.left + col as f32 * cell.width + cell.width * 0.5)
                .collect(),
        };

        column_centers
            .into_iter()
            .map(|x| {
                (0..self.rows)
                    .map(|row| floor_point(x, region.top + row as f32 * cell.height + cell.height * 0.5))
                    .collect()
            })
            .collect()
    }
}

/// Samples every bubble of `spec` using the standard circular darkness.
pub fn scan_grid(img: &RgbaImage, spec: &BubbleGridSpec) -> GridScan {
    scan_grid_with(img, spec, circle_darkness)
}

/// Samples every bubble of `spec` with a caller-supplied darkness function
/// taking the image, the bubble center and the radius in pixels.
#[time]
pub fn scan_grid_with<F>(img: &RgbaImage, spec: &BubbleGridSpec, darkness: F) -> GridScan
where
    F: Fn(&RgbaImage, Point<i32>, i32) -> f32,
{
    let size = Size {
        width: img.width(),
        height: img.height(),
    };
    let radius = spec.bubble_radius(size);
    let columns = spec
        .bubble_centers(size)
        .into_iter()
        .enumerate()
        .map(|(col, centers)| {
            centers
                .into_iter()
                .enumerate()
                .map(|(row, center)| BubbleDecision {
                    row: row as u32,
                    col: col as u32,
                    darkness: darkness(img, center, radius),
                })
                .collect()
        })
        .collect();

    GridScan { columns }
}

/// Picks the marked option among the bubbles of one question.
///
/// The darkest bubble wins only if it clears `thresholds.answer_absolute` and
/// is darker than the runner-up by the factor `thresholds.answer_relative`.
/// Returns the index of the winning option, or `None` when unattempted or
/// ambiguous.
pub fn decide_multiple_choice(
    options: &[BubbleDecision],
    thresholds: &DetectionThresholds,
) -> Option<usize> {
    let mut ranked: Vec<(usize, f32)> = options
        .iter()
        .enumerate()
        .map(|(index, decision)| (index, decision.darkness))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let (index, darkest) = *ranked.first()?;
    let second = ranked.get(1).map_or(0.0, |(_, darkness)| *darkness);

    if darkest > thresholds.answer_absolute && darkest > second * thresholds.answer_relative {
        Some(index)
    } else {
        None
    }
}

/// Picks the marked row of one letter or digit column: the darkest row, if
/// it clears `absolute`. The first row wins a tie.
pub fn decide_column(column: &[BubbleDecision], absolute: f32) -> Option<u32> {
    let mut best: Option<&BubbleDecision> = None;
    for decision in column {
        if best.map_or(true, |b| decision.darkness > b.darkness) {
            best = Some(decision);
        }
    }
    best.filter(|b| b.darkness > absolute).map(|b| b.row)
}
