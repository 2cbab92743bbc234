extern crate log;
extern crate pretty_env_logger;

use std::path::{Path, PathBuf};
use std::process::exit;
use std::str::FromStr;

use clap::{arg, command, value_parser, ArgMatches, Command};
use serde::Serialize;

use crate::config::{ConfigError, GraderConfig};
use crate::csv_input::{load_answer_key_csv, load_student_csv, CsvInputError};
use crate::process::{process_document, process_page, BatchOutcome, ProcessOptions, SheetResult};
use crate::raster::{DocumentDecodeError, DocumentKind, PageRasterizer};
use crate::scoring::{
    AnswerKey, AnswerKeyError, MismatchedStudent, ResultSummary, ScoredBatch, ScoredStudent,
    ScoringError, StudentAnswers,
};
use crate::sheet_template::TemplateId;

mod answers;
mod bubble_grid;
mod config;
mod csv_input;
mod debug;
mod geometry;
mod identity;
mod image_utils;
mod ocr;
mod process;
mod quality;
mod raster;
mod scoring;
mod sheet_template;
mod types;

#[derive(Debug, thiserror::Error)]
enum GradeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Csv(#[from] CsvInputError),

    #[error(transparent)]
    Decode(#[from] DocumentDecodeError),

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("answer key sheet {0} was rejected: {1}")]
    KeySheetRejected(String, String),

    #[error("invalid answer key: {0}")]
    AnswerKey(#[from] AnswerKeyError),

    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error("cannot write report: {0}")]
    Report(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileFailure {
    file: String,
    error: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<Vec<ScoredStudent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ResultSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    mismatched_students: Vec<MismatchedStudent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    valid_sheets: Option<Vec<SheetResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    imported_students: Option<Vec<StudentAnswers>>,
    invalid_sheets: Vec<SheetResult>,
    failed_files: Vec<FileFailure>,
}

fn main() {
    pretty_env_logger::init_custom_env("LOG");

    let matches = cli().get_matches();
    if let Err(e) = run(&matches) {
        eprintln!("Error: {}", e);
        exit(1);
    }
}

fn run(matches: &ArgMatches) -> Result<(), GradeError> {
    let config = load_config(matches)?;
    let debug = matches.get_flag("debug");
    let options = process_options(&config, debug);
    let rasterizer = page_rasterizer(&config);
    if !rasterizer.supports_pdf() {
        log::debug!("PDF rendering is not available");
    }

    let key = match matches.get_one::<String>("key") {
        Some(path) => Some(load_answer_key(Path::new(path), &rasterizer, &options)?),
        None => None,
    };

    let mut outcome = BatchOutcome::default();
    let mut imported = Vec::new();
    let mut failed_files = Vec::new();
    for file in matches.get_many::<String>("files").into_iter().flatten() {
        match grade_file(Path::new(file), &rasterizer, &options) {
            Ok(GradedFile::Sheets(sheets)) => outcome.extend(sheets),
            Ok(GradedFile::Students(students)) => imported.extend(students),
            Err(e) => {
                log::warn!("{}: {}", file, e);
                failed_files.push(FileFailure {
                    file: file.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    if outcome.is_empty() && imported.is_empty() {
        log::warn!("no sheets or students could be read");
    }
    log::info!(
        "{} valid sheet(s), {} rejected, {} imported student(s), {} failed file(s)",
        outcome.valid.len(),
        outcome.invalid.len(),
        imported.len(),
        failed_files.len()
    );

    let mut report = Report {
        invalid_sheets: outcome.invalid,
        failed_files,
        ..Report::default()
    };

    match key {
        Some(key) => {
            let students: Vec<StudentAnswers> = outcome
                .valid
                .iter()
                .map(StudentAnswers::from)
                .chain(imported)
                .collect();
            let batch = ScoredBatch::score(key, config.marking_scheme, &students)?;
            report.summary = batch.summary();
            report.results = Some(batch.students().to_vec());
            report.mismatched_students = batch.mismatched().to_vec();
        }
        None => {
            report.valid_sheets = Some(outcome.valid);
            if !imported.is_empty() {
                report.imported_students = Some(imported);
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn load_config(matches: &ArgMatches) -> Result<GraderConfig, GradeError> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => GraderConfig::load(Path::new(path))?,
        None => GraderConfig::default(),
    };

    if let Some(template) = matches.get_one::<TemplateId>("template") {
        config.template = *template;
    }
    if let Some(correct) = matches.get_one::<f64>("correct") {
        config.marking_scheme.correct_marks = *correct;
    }
    if let Some(wrong) = matches.get_one::<f64>("wrong") {
        config.marking_scheme.wrong_marks = *wrong;
    }
    if let Some(unattempted) = matches.get_one::<f64>("unattempted") {
        config.marking_scheme.unattempted_marks = *unattempted;
    }
    if matches.get_flag("negative") {
        config.marking_scheme.negative_marking_enabled = true;
    }
    if let Some(workers) = matches.get_one::<usize>("workers") {
        config.workers = *workers;
    }
    if let Some(dir) = matches.get_one::<String>("pdfium_dir") {
        config.pdfium_library_dir = Some(PathBuf::from(dir));
    }

    config.validate()?;
    Ok(config)
}

fn process_options(config: &GraderConfig, debug: bool) -> ProcessOptions {
    #[allow(unused_mut)]
    let mut options = config.process_options(debug);

    #[cfg(feature = "tesseract")]
    {
        options.recognizer = Some(std::sync::Arc::new(ocr::TesseractRecognizer::new(
            config.ocr_language.clone(),
        )));
    }

    options
}

#[cfg(feature = "pdfium")]
fn page_rasterizer(config: &GraderConfig) -> PageRasterizer {
    match raster::PdfiumRenderer::new(config.pdfium_library_dir.as_deref()) {
        Ok(renderer) => {
            PageRasterizer::new(Box::new(raster::ImageCrateDecoder), Some(Box::new(renderer)))
        }
        Err(e) => {
            log::warn!("{}; PDF documents will be rejected", e);
            PageRasterizer::default()
        }
    }
}

#[cfg(not(feature = "pdfium"))]
fn page_rasterizer(_config: &GraderConfig) -> PageRasterizer {
    PageRasterizer::default()
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map_or(false, |extension| extension.eq_ignore_ascii_case("csv"))
}

fn read_document(path: &Path) -> Result<(Vec<u8>, DocumentKind), GradeError> {
    let mime = DocumentKind::mime_for_path(path).ok_or_else(|| {
        DocumentDecodeError::UnsupportedType(path.display().to_string())
    })?;
    let kind = DocumentKind::from_mime(mime)?;
    let bytes = std::fs::read(path).map_err(|source| GradeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok((bytes, kind))
}

enum GradedFile {
    Sheets(BatchOutcome),
    Students(Vec<StudentAnswers>),
}

fn grade_file(
    path: &Path,
    rasterizer: &PageRasterizer,
    options: &ProcessOptions,
) -> Result<GradedFile, GradeError> {
    if is_csv(path) {
        return Ok(GradedFile::Students(load_student_csv(path)?));
    }

    let (bytes, kind) = read_document(path)?;
    let source = path.display().to_string();
    Ok(GradedFile::Sheets(process_document(
        &bytes, kind, &source, rasterizer, options,
    )?))
}

/// Loads the key from a CSV file, or reads it off page 1 of a scanned key
/// sheet. Any further pages are ignored; a rejected page 1 is an error.
fn load_answer_key(
    path: &Path,
    rasterizer: &PageRasterizer,
    options: &ProcessOptions,
) -> Result<AnswerKey, GradeError> {
    if is_csv(path) {
        return Ok(load_answer_key_csv(path)?);
    }

    let (bytes, kind) = read_document(path)?;
    let source = path.display().to_string();
    let page_count = rasterizer.page_count(&bytes, kind)?;
    if page_count > 1 {
        log::warn!("{}: answer key has {} pages, reading page 1 only", source, page_count);
    }

    let page = rasterizer.render_page(&bytes, kind, 0)?;
    let sheet = process_page(&page, &source, None, options);
    if let Some(reason) = sheet.rejection {
        return Err(GradeError::KeySheetRejected(source, reason.to_string()));
    }

    let key = AnswerKey::from_answer_record(&sheet.answers)?;
    log::info!("read answer key with {} question(s) from {}", key.len(), source);
    Ok(key)
}

#[allow(clippy::cognitive_complexity)]
fn cli() -> Command {
    command!()
        .arg(arg!(-c --config <PATH> "Path to a JSON grader config"))
        .arg(
            arg!(-t --template <ID> "Sheet template (standard-50 or neet-180)")
                .value_parser(TemplateId::from_str),
        )
        .arg(arg!(-k --key <PATH> "Answer key: a CSV file or a scanned key sheet"))
        .arg(arg!(--correct <MARKS> "Marks per correct answer").value_parser(value_parser!(f64)))
        .arg(
            arg!(--wrong <MARKS> "Marks per wrong answer (zero or negative)")
                .value_parser(value_parser!(f64))
                .allow_negative_numbers(true),
        )
        .arg(
            arg!(--unattempted <MARKS> "Marks per unattempted question")
                .value_parser(value_parser!(f64))
                .allow_negative_numbers(true),
        )
        .arg(arg!(--negative "Apply wrong-answer marks"))
        .arg(
            arg!(-w --workers <N> "Pages processed in parallel")
                .value_parser(value_parser!(usize)),
        )
        .arg(arg!(pdfium_dir: --"pdfium-dir" <DIR> "Directory containing the pdfium library"))
        .arg(arg!(-d --debug "Write annotated debug images next to each input"))
        .arg(
            arg!(files: <FILES> "Scanned sheets (PDF, JPG, PNG, BMP) or student CSV files")
                .num_args(1..)
                .required(true),
        )
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::raster::{ImageCrateDecoder, PdfRenderer};

    /// Blank white pages; records which pages were rendered.
    struct BlankPdf {
        pages: usize,
        rendered: Arc<Mutex<Vec<usize>>>,
    }

    impl PdfRenderer for BlankPdf {
        fn page_count(&self, _bytes: &[u8]) -> Result<usize, DocumentDecodeError> {
            Ok(self.pages)
        }

        fn render_page(
            &self,
            _bytes: &[u8],
            index: usize,
            _scale: f32,
        ) -> Result<RgbaImage, DocumentDecodeError> {
            self.rendered.lock().expect("not poisoned").push(index);
            Ok(RgbaImage::from_pixel(1000, 1400, Rgba([255, 255, 255, 255])))
        }
    }

    #[test]
    fn cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let matches = cli()
            .try_get_matches_from([
                "omr-grader",
                "--template",
                "standard-50",
                "--correct",
                "4",
                "--wrong",
                "-1",
                "--negative",
                "--workers",
                "3",
                "a.png",
                "b.pdf",
            ])
            .expect("parses");
        let config = load_config(&matches).expect("valid config");

        assert_eq!(config.template, TemplateId::Standard50);
        assert_eq!(config.marking_scheme.correct_marks, 4.0);
        assert_eq!(config.marking_scheme.wrong_marks, -1.0);
        assert!(config.marking_scheme.negative_marking_enabled);
        assert_eq!(config.workers, 3);
        assert_eq!(matches.get_many::<String>("files").map(|f| f.count()), Some(2));
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let matches = cli()
            .try_get_matches_from(["omr-grader", "--correct", "0", "a.png"])
            .expect("parses");
        assert!(matches!(load_config(&matches), Err(GradeError::Config(_))));

        assert!(cli()
            .try_get_matches_from(["omr-grader", "--template", "legal-100", "a.png"])
            .is_err());
        assert!(cli().try_get_matches_from(["omr-grader"]).is_err());
    }

    #[test]
    fn unsupported_extension_is_a_file_error() {
        let result = grade_file(
            Path::new("notes.txt"),
            &PageRasterizer::default(),
            &GraderConfig::default().process_options(false),
        );
        assert!(matches!(
            result,
            Err(GradeError::Decode(DocumentDecodeError::UnsupportedType(_)))
        ));
    }

    #[test]
    fn scanned_key_is_read_from_page_one_only() {
        let dir = tempfile::tempdir().expect("creates temp dir");
        let key_path = dir.path().join("key.pdf");
        std::fs::write(&key_path, b"%PDF").expect("writes key");

        let rendered = Arc::new(Mutex::new(Vec::new()));
        let pdf = BlankPdf {
            pages: 3,
            rendered: rendered.clone(),
        };
        let rasterizer = PageRasterizer::new(Box::new(ImageCrateDecoder), Some(Box::new(pdf)));
        let options = GraderConfig::default().process_options(false);

        let result = load_answer_key(&key_path, &rasterizer, &options);
        assert!(
            matches!(result, Err(GradeError::KeySheetRejected(ref source, _)) if source.ends_with("key.pdf")),
            "{:?}",
            result.err()
        );
        assert_eq!(*rendered.lock().expect("not poisoned"), vec![0]);
    }

    #[test]
    fn csv_key_and_students_are_recognized_by_extension() {
        let dir = tempfile::tempdir().expect("creates temp dir");
        let key_path = dir.path().join("key.CSV");
        std::fs::write(&key_path, "1,A\n2,B\n").expect("writes key");
        let students_path = dir.path().join("class.csv");
        std::fs::write(&students_path, "Asha,101,A,C\n").expect("writes students");

        let rasterizer = PageRasterizer::default();
        let options = GraderConfig::default().process_options(false);
        let key = load_answer_key(&key_path, &rasterizer, &options).expect("loads key");
        assert_eq!(key.len(), 2);

        match grade_file(&students_path, &rasterizer, &options).expect("reads students") {
            GradedFile::Students(students) => assert_eq!(students.len(), 1),
            GradedFile::Sheets(_) => panic!("expected imported students"),
        }
    }
}
