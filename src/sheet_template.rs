use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bubble_grid::{BubbleGridSpec, Interpretation, DIGIT_ROWS, LETTER_ROWS};
use crate::geometry::NormalizedRect;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateId {
    #[serde(rename = "standard-50")]
    Standard50,
    #[serde(rename = "neet-180")]
    Neet180,
}

impl Default for TemplateId {
    fn default() -> Self {
        TemplateId::Neet180
    }
}

impl Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateId::Standard50 => write!(f, "standard-50"),
            TemplateId::Neet180 => write!(f, "neet-180"),
        }
    }
}

impl FromStr for TemplateId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard-50" => Ok(TemplateId::Standard50),
            "neet-180" => Ok(TemplateId::Neet180),
            _ => Err(format!(
                "unknown sheet template {:?} (expected standard-50 or neet-180)",
                s
            )),
        }
    }
}

/// Fixed layout of one printed sheet: where each bubble grid sits and how
/// many questions it carries.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SheetTemplate {
    pub id: TemplateId,
    pub question_count: usize,
    pub answers: BubbleGridSpec,
    pub name: BubbleGridSpec,
    pub roll_number: BubbleGridSpec,
    pub hall_ticket: BubbleGridSpec,
}

const ANSWER_RADIUS_FRACTION: f32 = 0.12;
const IDENTITY_RADIUS_FRACTION: f32 = 0.3;

const FOUR_OPTIONS: Interpretation = Interpretation::MultipleChoice {
    options: 4,
    options_offset: 0.15,
    options_span: 0.8,
};

/// Name block: 20 letter columns on the left of the header.
const NAME_GRID: BubbleGridSpec = BubbleGridSpec {
    region: NormalizedRect::new(0.08, 0.18, 0.45, 0.16),
    columns: 20,
    rows: LETTER_ROWS,
    radius_fraction: IDENTITY_RADIUS_FRACTION,
    interpretation: Interpretation::Letter,
};

/// Roll number block: 10 digit columns, top right.
const ROLL_NUMBER_GRID: BubbleGridSpec = BubbleGridSpec {
    region: NormalizedRect::new(0.58, 0.18, 0.30, 0.12),
    columns: 10,
    rows: DIGIT_ROWS,
    radius_fraction: IDENTITY_RADIUS_FRACTION,
    interpretation: Interpretation::Digit,
};

/// Hall ticket (test booklet) block: 7 digit columns below the roll number.
const HALL_TICKET_GRID: BubbleGridSpec = BubbleGridSpec {
    region: NormalizedRect::new(0.58, 0.31, 0.30, 0.12),
    columns: 7,
    rows: DIGIT_ROWS,
    radius_fraction: IDENTITY_RADIUS_FRACTION,
    interpretation: Interpretation::Digit,
};

/// NEET style sheet: 180 questions in 4 columns of 45.
pub fn sheet_template_neet_180() -> SheetTemplate {
    SheetTemplate {
        id: TemplateId::Neet180,
        question_count: 180,
        answers: BubbleGridSpec {
            region: NormalizedRect::new(0.05, 0.40, 0.70, 0.55),
            columns: 4,
            rows: 45,
            radius_fraction: ANSWER_RADIUS_FRACTION,
            interpretation: FOUR_OPTIONS,
        },
        name: NAME_GRID,
        roll_number: ROLL_NUMBER_GRID,
        hall_ticket: HALL_TICKET_GRID,
    }
}

/// Short sheet: 50 questions in 4 columns of 13, the last column holding
/// only 11.
pub fn sheet_template_standard_50() -> SheetTemplate {
    SheetTemplate {
        id: TemplateId::Standard50,
        question_count: 50,
        answers: BubbleGridSpec {
            region: NormalizedRect::new(0.05, 0.45, 0.70, 0.45),
            columns: 4,
            rows: 13,
            radius_fraction: ANSWER_RADIUS_FRACTION,
            interpretation: FOUR_OPTIONS,
        },
        name: NAME_GRID,
        roll_number: ROLL_NUMBER_GRID,
        hall_ticket: HALL_TICKET_GRID,
    }
}

pub fn get_sheet_template(id: TemplateId) -> SheetTemplate {
    let template = match id {
        TemplateId::Standard50 => sheet_template_standard_50(),
        TemplateId::Neet180 => sheet_template_neet_180(),
    };
    debug_assert!(template.answer_capacity() >= template.question_count);
    for (label, grid) in template.grids() {
        debug_assert!(grid.region.is_within_page(), "{} grid of {} is off the page", label, id);
    }
    template
}

impl SheetTemplate {
    /// Options per question on the answer grid.
    pub fn options(&self) -> u32 {
        self.answers.options()
    }

    /// Number of question slots printed on the answer grid.
    pub fn answer_capacity(&self) -> usize {
        (self.answers.columns * self.answers.rows) as usize
    }

    pub fn grids(&self) -> [(&'static str, &BubbleGridSpec); 4] {
        [
            ("answers", &self.answers),
            ("name", &self.name),
            ("roll_number", &self.roll_number),
            ("hall_ticket", &self.hall_ticket),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_template_fits_its_questions_on_the_page() {
        for id in [TemplateId::Standard50, TemplateId::Neet180] {
            let template = get_sheet_template(id);
            assert_eq!(template.id, id);
            assert!(template.answer_capacity() >= template.question_count);
            assert_eq!(template.options(), 4);
            for (label, grid) in template.grids() {
                assert!(grid.region.is_within_page(), "{} of {} is off the page", label, id);
            }
        }
    }

    #[test]
    fn template_ids_round_trip_through_strings() {
        assert_eq!("neet-180".parse::<TemplateId>(), Ok(TemplateId::Neet180));
        assert_eq!(TemplateId::Standard50.to_string(), "standard-50");
        assert!("letter-size".parse::<TemplateId>().is_err());
        assert_eq!(
            serde_json::to_string(&TemplateId::Standard50).expect("serializes"),
            "\"standard-50\""
        );
    }
}
