//! Text fallback for pages where no bubble could be read.
//!
//! Whole-page text recognition is much less reliable than bubble sampling,
//! so it only runs when bubble detection found nothing at all on a page. It
//! looks for lines like `12 B` and files each option under its question.

use std::sync::LazyLock;

use logging_timer::time;
use regex::Regex;

use crate::types::{AnswerRecord, RasterImage};

#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[cfg(feature = "tesseract")]
    #[error("text recognizer could not be initialized: {0}")]
    Init(String),
    #[error("text recognition failed: {0}")]
    Recognize(String),
}

/// Full-page text recognition backend.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &RasterImage) -> Result<String, RecognitionError>;
}

/// `<number><whitespace><letter>`. The number may follow a prefix such as
/// `Q`; the letter must stand alone.
static ANSWER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+([A-Z])\b").expect("answer pattern is valid"));

/// Extracts answers from recognized text. Question numbers are 1-based;
/// numbers outside the sheet and letters past the last option are ignored.
/// Later matches overwrite earlier ones.
pub fn parse_answers(text: &str, question_count: usize, options: u32) -> AnswerRecord {
    let mut answers = AnswerRecord::unattempted(question_count);

    for line in text.lines() {
        for captures in ANSWER_LINE.captures_iter(line) {
            let question = match captures[1].parse::<usize>() {
                Ok(question) if (1..=question_count).contains(&question) => question,
                _ => continue,
            };
            let letter = captures[2].to_ascii_uppercase();
            if u32::from(letter.as_bytes()[0] - b'A') >= options {
                continue;
            }
            answers.set(question - 1, letter);
        }
    }

    answers
}

#[time]
pub fn recognize_answers(
    recognizer: &dyn TextRecognizer,
    image: &RasterImage,
    question_count: usize,
    options: u32,
) -> Result<AnswerRecord, RecognitionError> {
    let text = recognizer.recognize(image)?;
    let answers = parse_answers(&text, question_count, options);
    log::info!(
        "page {}: text fallback found {} answers",
        image.page_number(),
        answers.attempted_count()
    );
    Ok(answers)
}

#[cfg(feature = "tesseract")]
pub use self::tesseract::TesseractRecognizer;

#[cfg(feature = "tesseract")]
mod tesseract {
    use std::io::Cursor;

    use leptess::LepTess;

    use super::{RecognitionError, TextRecognizer};
    use crate::types::RasterImage;

    /// Tesseract through leptess. A fresh engine is created per page, so one
    /// recognizer can be shared by every worker.
    #[derive(Clone, Debug)]
    pub struct TesseractRecognizer {
        language: String,
    }

    impl TesseractRecognizer {
        pub fn new(language: impl Into<String>) -> Self {
            Self {
                language: language.into(),
            }
        }
    }

    impl TextRecognizer for TesseractRecognizer {
        fn recognize(&self, image: &RasterImage) -> Result<String, RecognitionError> {
            let mut tesseract = LepTess::new(None, &self.language)
                .map_err(|e| RecognitionError::Init(e.to_string()))?;

            let mut png = Vec::new();
            image
                .pixels
                .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
                .map_err(|e| RecognitionError::Recognize(e.to_string()))?;

            tesseract
                .set_image_from_mem(&png)
                .map_err(|e| RecognitionError::Recognize(e.to_string()))?;
            tesseract
                .get_utf8_text()
                .map_err(|e| RecognitionError::Recognize(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    struct FixedText(&'static str);

    impl TextRecognizer for FixedText {
        fn recognize(&self, _image: &RasterImage) -> Result<String, RecognitionError> {
            Ok(self.0.to_string())
        }
    }

    struct Broken;

    impl TextRecognizer for Broken {
        fn recognize(&self, _image: &RasterImage) -> Result<String, RecognitionError> {
            Err(RecognitionError::Recognize("engine crashed".to_string()))
        }
    }

    #[test]
    fn parses_numbered_answers() {
        let text = "ANSWER SHEET\n1 A\n2   c\n3 E\n4 B 5 D\n";
        let answers = parse_answers(text, 5, 4);
        assert_eq!(answers.iter().collect::<Vec<_>>(), vec!["A", "C", "", "B", "D"]);
    }

    #[test]
    fn ignores_out_of_range_questions() {
        let answers = parse_answers("0 A\n6 B\n100 C\n2 D", 5, 4);
        assert_eq!(answers.iter().collect::<Vec<_>>(), vec!["", "D", "", "", ""]);
    }

    #[test]
    fn accepts_prefixed_question_numbers() {
        let answers = parse_answers("Q12 B\nQ.3 a\n", 12, 4);
        assert_eq!(answers.get(11), Some("B"));
        assert_eq!(answers.get(2), Some("A"));
        assert_eq!(answers.attempted_count(), 2);
    }

    #[test]
    fn ignores_letters_past_the_last_option() {
        let answers = parse_answers("1 E\n2 d\n3 Z", 3, 4);
        assert_eq!(answers.iter().collect::<Vec<_>>(), vec!["", "D", ""]);
    }

    #[test]
    fn requires_whitespace_between_number_and_letter() {
        let answers = parse_answers("1A 2B", 3, 4);
        assert_eq!(answers.attempted_count(), 0);
    }

    #[test]
    fn recognizer_output_becomes_answer_record() {
        let image = RasterImage::new(0, RgbaImage::new(4, 4));
        let answers = recognize_answers(&FixedText("1 B\n3 A"), &image, 3, 4).expect("recognizes");
        assert_eq!(answers.iter().collect::<Vec<_>>(), vec!["B", "", "A"]);

        assert!(recognize_answers(&Broken, &image, 3, 4).is_err());
    }
}
