use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::geometry::Size;

/// Name reported when no letters could be read from the name grid.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Roll number or hall ticket reported when no digits could be read.
pub const NOT_AVAILABLE: &str = "N/A";

/// One rasterized page.
#[derive(Clone, Debug)]
pub struct RasterImage {
    /// 0-based position of the page in its source document.
    pub page_index: usize,
    pub pixels: RgbaImage,
}

impl RasterImage {
    pub fn new(page_index: usize, pixels: RgbaImage) -> Self {
        Self { page_index, pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn size(&self) -> Size<u32> {
        Size {
            width: self.width(),
            height: self.height(),
        }
    }

    /// 1-based page number.
    pub fn page_number(&self) -> u32 {
        self.page_index as u32 + 1
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentIdentity {
    pub name: String,
    pub roll_number: String,
    pub hall_ticket: String,
}

impl StudentIdentity {
    /// Applies the sentinel defaults to decoded fields.
    pub fn from_decoded(name: &str, roll_number: &str, hall_ticket: &str) -> Self {
        fn or_default(value: &str, default: &str) -> String {
            let value = value.trim();
            if value.is_empty() {
                default.to_string()
            } else {
                value.to_string()
            }
        }

        Self {
            name: or_default(name, UNKNOWN_NAME),
            roll_number: or_default(roll_number, NOT_AVAILABLE),
            hall_ticket: or_default(hall_ticket, NOT_AVAILABLE),
        }
    }

    pub fn unknown() -> Self {
        Self::from_decoded("", "", "")
    }

    /// Whether the roll number was actually read. A sentinel roll number
    /// must never be used to look a student up.
    pub fn has_roll_number(&self) -> bool {
        self.roll_number != NOT_AVAILABLE
    }

    pub fn has_name(&self) -> bool {
        self.name != UNKNOWN_NAME
    }
}

/// The option marked for each question, in question order. An empty string
/// means unattempted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerRecord(Vec<String>);

impl AnswerRecord {
    /// A record of `question_count` unattempted questions.
    pub fn unattempted(question_count: usize) -> Self {
        Self(vec![String::new(); question_count])
    }

    pub fn from_answers<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(answers.into_iter().map(Into::into).collect())
    }

    /// Records `option` for the 0-based `index`. Indexes past the end are
    /// ignored.
    pub fn set(&mut self, index: usize, option: impl Into<String>) {
        if let Some(slot) = self.0.get_mut(index) {
            *slot = option.into();
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.0.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn attempted_count(&self) -> usize {
        self.0.iter().filter(|answer| !answer.is_empty()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_defaults_apply_to_blank_fields() {
        let identity = StudentIdentity::from_decoded("  ", "", "0012345");
        assert_eq!(identity.name, "Unknown");
        assert_eq!(identity.roll_number, "N/A");
        assert_eq!(identity.hall_ticket, "0012345");
        assert!(!identity.has_roll_number());
        assert!(!identity.has_name());
    }

    #[test]
    fn answer_record_keeps_its_length() {
        let mut record = AnswerRecord::unattempted(3);
        record.set(1, "B");
        record.set(7, "C");
        assert_eq!(record.len(), 3);
        assert_eq!(record.attempted_count(), 1);
        assert_eq!(record.get(1), Some("B"));
        assert_eq!(record.iter().collect::<Vec<_>>(), vec!["", "B", ""]);
    }

    #[test]
    fn answer_record_serializes_as_plain_list() {
        let record = AnswerRecord::from_answers(["A", ""]);
        assert_eq!(
            serde_json::to_string(&record).expect("serializes"),
            r#"["A",""]"#
        );
    }
}
