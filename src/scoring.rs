use std::collections::BTreeSet;

use logging_timer::time;
use serde::{Deserialize, Serialize};

use crate::process::SheetResult;
use crate::types::{AnswerRecord, StudentIdentity};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AnswerKeyError {
    #[error("answer key is empty")]
    Empty,
    #[error("question {0} appears more than once in the answer key")]
    DuplicateQuestion(u32),
    #[error("answer key has no entry for question {0}")]
    MissingQuestion(u32),
    #[error("question {0} has no correct option")]
    MissingAnswer(u32),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ScoringError {
    #[error("answer key has {key} questions but {student} answered a sheet of {answers}")]
    KeyMismatch {
        student: String,
        key: usize,
        answers: usize,
    },
    #[error("correct marks must be positive, got {0}")]
    NonPositiveCorrectMarks(f64),
    #[error("wrong marks must not be positive, got {0}")]
    PositiveWrongMarks(f64),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerKeyEntry {
    pub question_number: u32,
    pub correct_option: String,
}

/// The correct option of every question, numbered 1..=n without gaps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AnswerKey {
    entries: Vec<AnswerKeyEntry>,
}

impl AnswerKey {
    /// Validates and orders `entries`. Options are trimmed and upper-cased.
    pub fn new(mut entries: Vec<AnswerKeyEntry>) -> Result<Self, AnswerKeyError> {
        if entries.is_empty() {
            return Err(AnswerKeyError::Empty);
        }

        let mut seen = BTreeSet::new();
        for entry in &mut entries {
            entry.correct_option = entry.correct_option.trim().to_ascii_uppercase();
            if entry.correct_option.is_empty() {
                return Err(AnswerKeyError::MissingAnswer(entry.question_number));
            }
            if !seen.insert(entry.question_number) {
                return Err(AnswerKeyError::DuplicateQuestion(entry.question_number));
            }
        }

        entries.sort_by_key(|entry| entry.question_number);
        for (index, entry) in entries.iter().enumerate() {
            let expected = index as u32 + 1;
            if entry.question_number != expected {
                return Err(AnswerKeyError::MissingQuestion(expected));
            }
        }

        Ok(Self { entries })
    }

    /// Builds a key from options listed in question order.
    pub fn from_options<I, S>(options: I) -> Result<Self, AnswerKeyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            options
                .into_iter()
                .enumerate()
                .map(|(index, option)| AnswerKeyEntry {
                    question_number: index as u32 + 1,
                    correct_option: option.into(),
                })
                .collect(),
        )
    }

    /// Uses a scanned sheet as the key. Every question must be marked: an
    /// unreadable key question would silently misgrade every student.
    pub fn from_answer_record(record: &AnswerRecord) -> Result<Self, AnswerKeyError> {
        Self::from_options(record.iter())
    }

    pub fn entries(&self) -> &[AnswerKeyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

}

/// Points awarded per question outcome.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarkingScheme {
    pub correct_marks: f64,
    /// Applied per wrong answer only when negative marking is enabled.
    pub wrong_marks: f64,
    pub unattempted_marks: f64,
    pub negative_marking_enabled: bool,
}

impl Default for MarkingScheme {
    fn default() -> Self {
        Self {
            correct_marks: 1.0,
            wrong_marks: 0.0,
            unattempted_marks: 0.0,
            negative_marking_enabled: false,
        }
    }
}

impl MarkingScheme {
    pub fn validate(&self) -> Result<(), ScoringError> {
        if !(self.correct_marks > 0.0) {
            return Err(ScoringError::NonPositiveCorrectMarks(self.correct_marks));
        }
        if self.wrong_marks > 0.0 {
            return Err(ScoringError::PositiveWrongMarks(self.wrong_marks));
        }
        Ok(())
    }
}

/// A student's answers ready to be scored, whether read from a scanned sheet
/// or imported from a spreadsheet.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAnswers {
    #[serde(flatten)]
    pub identity: StudentIdentity,
    pub answers: AnswerRecord,
    pub source: String,
    pub page_number: Option<u32>,
}

impl From<&SheetResult> for StudentAnswers {
    fn from(sheet: &SheetResult) -> Self {
        Self {
            identity: sheet.identity.clone(),
            answers: sheet.answers.clone(),
            source: sheet.source.clone(),
            page_number: sheet.page_number,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionOutcome {
    pub question_number: u32,
    pub student_answer: String,
    pub correct_answer: String,
    pub is_correct: bool,
    pub is_attempted: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredStudent {
    #[serde(flatten)]
    pub identity: StudentIdentity,
    pub source: String,
    pub page_number: Option<u32>,
    pub total_marks: f64,
    pub max_marks: f64,
    pub percentage: f64,
    pub correct_count: usize,
    pub wrong_count: usize,
    pub unattempted_count: usize,
    pub per_question: Vec<QuestionOutcome>,
    /// 1-based position in the batch; 0 until the batch is ranked.
    pub rank: usize,
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn check_length(key: &AnswerKey, student: &StudentAnswers) -> Result<(), ScoringError> {
    if student.answers.len() != key.len() {
        return Err(ScoringError::KeyMismatch {
            student: format!("{} ({})", student.identity.name, student.source),
            key: key.len(),
            answers: student.answers.len(),
        });
    }
    Ok(())
}

/// Scores one student. The result is unranked.
pub fn score_student(
    key: &AnswerKey,
    scheme: &MarkingScheme,
    student: &StudentAnswers,
) -> Result<ScoredStudent, ScoringError> {
    check_length(key, student)?;

    let per_question: Vec<QuestionOutcome> = key
        .entries()
        .iter()
        .zip(student.answers.iter())
        .map(|(entry, answer)| {
            let student_answer = answer.trim();
            let is_attempted = !student_answer.is_empty();
            QuestionOutcome {
                question_number: entry.question_number,
                student_answer: student_answer.to_string(),
                correct_answer: entry.correct_option.clone(),
                is_correct: is_attempted && student_answer.eq_ignore_ascii_case(&entry.correct_option),
                is_attempted,
            }
        })
        .collect();

    let correct_count = per_question.iter().filter(|q| q.is_correct).count();
    let unattempted_count = per_question.iter().filter(|q| !q.is_attempted).count();
    let wrong_count = per_question.len() - correct_count - unattempted_count;

    let wrong_penalty = if scheme.negative_marking_enabled {
        wrong_count as f64 * scheme.wrong_marks
    } else {
        0.0
    };
    let total_marks = correct_count as f64 * scheme.correct_marks
        + wrong_penalty
        + unattempted_count as f64 * scheme.unattempted_marks;
    let max_marks = key.len() as f64 * scheme.correct_marks;
    let percentage = if max_marks > 0.0 {
        round_to_hundredths(total_marks / max_marks * 100.0)
    } else {
        0.0
    };

    Ok(ScoredStudent {
        identity: student.identity.clone(),
        source: student.source.clone(),
        page_number: student.page_number,
        total_marks,
        max_marks,
        percentage,
        correct_count,
        wrong_count,
        unattempted_count,
        per_question,
        rank: 0,
    })
}

/// Orders students by descending total marks and numbers them from 1. The
/// sort is stable: equal totals keep their current relative order.
pub fn rank_students(students: &mut [ScoredStudent]) {
    students.sort_by(|a, b| b.total_marks.total_cmp(&a.total_marks));
    for (index, student) in students.iter_mut().enumerate() {
        student.rank = index + 1;
    }
}

/// A ranked set of students scored against one key and scheme.
/// A student left out of the ranking because their answers do not line up
/// with the key.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MismatchedStudent {
    #[serde(flatten)]
    pub identity: StudentIdentity,
    pub source: String,
    pub page_number: Option<u32>,
    pub error: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredBatch {
    key: AnswerKey,
    scheme: MarkingScheme,
    students: Vec<ScoredStudent>,
    mismatched: Vec<MismatchedStudent>,
}

impl ScoredBatch {
    /// Scores and ranks `students`. Records whose length differs from the
    /// key are set aside unscored; only an invalid scheme fails the batch.
    #[time]
    pub fn score(
        key: AnswerKey,
        scheme: MarkingScheme,
        students: &[StudentAnswers],
    ) -> Result<Self, ScoringError> {
        let mut batch = Self {
            key,
            scheme,
            students: Vec::new(),
            mismatched: Vec::new(),
        };
        batch.add(students)?;
        Ok(batch)
    }

    /// Scores more students with the batch's key and scheme, then re-ranks
    /// the whole batch. Existing students win ties against new ones.
    pub fn add(&mut self, students: &[StudentAnswers]) -> Result<(), ScoringError> {
        self.scheme.validate()?;
        for student in students {
            match score_student(&self.key, &self.scheme, student) {
                Ok(scored) => self.students.push(scored),
                Err(e) => {
                    log::warn!("{}", e);
                    self.mismatched.push(MismatchedStudent {
                        identity: student.identity.clone(),
                        source: student.source.clone(),
                        page_number: student.page_number,
                        error: e.to_string(),
                    });
                }
            }
        }
        rank_students(&mut self.students);
        log::info!("ranked {} student(s)", self.students.len());
        Ok(())
    }

    pub fn students(&self) -> &[ScoredStudent] {
        &self.students
    }

    pub fn mismatched(&self) -> &[MismatchedStudent] {
        &self.mismatched
    }

    pub fn summary(&self) -> Option<ResultSummary> {
        ResultSummary::from_students(&self.students)
    }
}

/// Class-level statistics over a scored batch.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    pub student_count: usize,
    pub average_percentage: f64,
    pub highest_percentage: f64,
    pub lowest_percentage: f64,
}

impl ResultSummary {
    pub fn from_students(students: &[ScoredStudent]) -> Option<Self> {
        if students.is_empty() {
            return None;
        }
        let percentages = students.iter().map(|s| s.percentage);
        let total: f64 = percentages.clone().sum();
        Some(Self {
            student_count: students.len(),
            average_percentage: round_to_hundredths(total / students.len() as f64),
            highest_percentage: percentages.clone().fold(f64::MIN, f64::max),
            lowest_percentage: percentages.fold(f64::MAX, f64::min),
        })
    }
}
