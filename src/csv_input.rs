//! Answer keys and student answers typed up as spreadsheets rather than
//! scanned.
//!
//! Both formats are headerless by convention, but a header row is tolerated:
//! key rows whose question number does not parse are skipped, as is a
//! leading student row whose roll number holds no digit.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::scoring::{AnswerKey, AnswerKeyEntry, AnswerKeyError, StudentAnswers};
use crate::types::{AnswerRecord, StudentIdentity};

#[derive(Debug, thiserror::Error)]
pub enum CsvInputError {
    #[error("cannot open {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("invalid answer key: {0}")]
    AnswerKey(#[from] AnswerKeyError),
}

fn records<R: Read>(reader: R) -> impl Iterator<Item = Result<StringRecord, csv::Error>> {
    ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader)
        .into_records()
}

fn open(path: &Path) -> Result<File, CsvInputError> {
    File::open(path).map_err(|source| CsvInputError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads `question_number, correct_answer` rows into a key.
pub fn read_answer_key_csv<R: Read>(reader: R) -> Result<AnswerKey, CsvInputError> {
    let mut entries = Vec::new();
    for record in records(reader) {
        let record = record?;
        let question_number = match record.get(0).and_then(|cell| cell.parse::<u32>().ok()) {
            Some(question_number) => question_number,
            None => continue,
        };
        let correct_option = match record.get(1) {
            Some(answer) if !answer.is_empty() => answer,
            _ => continue,
        };
        entries.push(AnswerKeyEntry {
            question_number,
            correct_option: correct_option.to_string(),
        });
    }

    let key = AnswerKey::new(entries)?;
    log::debug!("read answer key with {} question(s)", key.len());
    Ok(key)
}

pub fn load_answer_key_csv(path: &Path) -> Result<AnswerKey, CsvInputError> {
    read_answer_key_csv(open(path)?)
}

/// Reads `name, roll_number, answer1, answer2, ...` rows. Rows missing a name,
/// a roll number or any answer column are skipped. Answers are upper-cased;
/// an empty cell is an unattempted question.
pub fn read_student_csv<R: Read>(
    reader: R,
    source: &str,
) -> Result<Vec<StudentAnswers>, CsvInputError> {
    let mut students = Vec::new();
    for (index, record) in records(reader).enumerate() {
        let record = record?;
        if record.len() < 3 {
            continue;
        }
        let (name, roll_number) = (&record[0], &record[1]);
        if name.is_empty() || roll_number.is_empty() {
            continue;
        }
        if index == 0 && !roll_number.chars().any(|c| c.is_ascii_digit()) {
            log::debug!("{}: skipping header row", source);
            continue;
        }

        students.push(StudentAnswers {
            identity: StudentIdentity::from_decoded(name, roll_number, ""),
            answers: AnswerRecord::from_answers(
                record.iter().skip(2).map(|answer| answer.to_ascii_uppercase()),
            ),
            source: source.to_string(),
            page_number: None,
        });
    }

    log::debug!("{}: read {} student(s)", source, students.len());
    Ok(students)
}

pub fn load_student_csv(path: &Path) -> Result<Vec<StudentAnswers>, CsvInputError> {
    read_student_csv(open(path)?, &path.display().to_string())
}
