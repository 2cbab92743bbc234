use logging_timer::time;

use crate::bubble_grid::{decide_multiple_choice, option_letter, scan_grid, DetectionThresholds, GridScan};
use crate::sheet_template::SheetTemplate;
use crate::types::{AnswerRecord, RasterImage};

/// Reads the marked option of every question on the page.
///
/// Questions run down each answer column before moving to the next, so
/// question `i` lives in block `i / rows`, row `i % rows`. The record always
/// holds `template.question_count` entries.
#[time]
pub fn detect_answers(
    image: &RasterImage,
    template: &SheetTemplate,
    thresholds: &DetectionThresholds,
) -> AnswerRecord {
    let scan = scan_grid(&image.pixels, &template.answers);
    let answers = answers_from_scan(&scan, template, thresholds);
    log::debug!(
        "page {}: {} of {} questions attempted",
        image.page_number(),
        answers.attempted_count(),
        template.question_count
    );
    answers
}

pub fn answers_from_scan(
    scan: &GridScan,
    template: &SheetTemplate,
    thresholds: &DetectionThresholds,
) -> AnswerRecord {
    let options = template.options() as usize;
    let rows = template.answers.rows as usize;
    let mut answers = AnswerRecord::unattempted(template.question_count);

    for (block, block_columns) in scan.columns.chunks(options).enumerate() {
        for row in 0..rows {
            let question = block * rows + row;
            if question >= template.question_count {
                break;
            }
            let bubbles: Vec<_> = block_columns
                .iter()
                .filter_map(|column| column.get(row).copied())
                .collect();
            if let Some(choice) = decide_multiple_choice(&bubbles, thresholds) {
                answers.set(question, option_letter(choice as u32).to_string());
            }
        }
    }

    answers
}
