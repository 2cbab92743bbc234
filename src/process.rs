use std::fmt::Display;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use logging_timer::time;
use rayon::prelude::*;
use serde::{Serialize, Serializer};

use crate::answers::detect_answers;
use crate::bubble_grid::DetectionThresholds;
use crate::debug::{draw_template_debug_image_mut, ImageDebugWriter};
use crate::identity::extract_identity;
use crate::ocr::{recognize_answers, RecognitionError, TextRecognizer};
use crate::quality::{assess_quality, QualityFailure, QualityThresholds, QualityVerdict};
use crate::raster::{DocumentDecodeError, DocumentKind, PageRasterizer};
use crate::sheet_template::SheetTemplate;
use crate::types::{AnswerRecord, RasterImage, StudentIdentity};

/// Stages a page moves through, in order. A page never revisits a stage.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SheetState {
    Rasterizing,
    QualityChecking,
    DetectingAnswers,
    FallbackRecognizing,
    ExtractingIdentity,
    Finalized,
}

/// Why a page was not accepted for scoring.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RejectionReason {
    LowQuality(QualityFailure),
    NoAnswersDetected,
    ProcessingTimeout(SheetState),
}

impl Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::LowQuality(failure) => write!(f, "{}", failure),
            RejectionReason::NoAnswersDetected => write!(f, "No answers detected"),
            RejectionReason::ProcessingTimeout(_) => write!(f, "Processing timeout"),
        }
    }
}

impl Serialize for RejectionReason {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Outcome of one page. Never modified once produced.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetResult {
    pub source: String,
    /// Set for pages of multi-page documents.
    pub page_number: Option<u32>,
    #[serde(flatten)]
    pub identity: StudentIdentity,
    pub answers: AnswerRecord,
    pub quality: QualityVerdict,
    pub used_text_fallback: bool,
    pub is_valid: bool,
    pub rejection: Option<RejectionReason>,
}

/// Valid and rejected pages of one or more documents, each in page order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub valid: Vec<SheetResult>,
    pub invalid: Vec<SheetResult>,
}

impl BatchOutcome {
    pub fn from_results(results: Vec<SheetResult>) -> Self {
        let (valid, invalid) = results.into_iter().partition(|result| result.is_valid);
        Self { valid, invalid }
    }

    pub fn extend(&mut self, other: BatchOutcome) {
        self.valid.extend(other.valid);
        self.invalid.extend(other.invalid);
    }

    pub fn len(&self) -> usize {
        self.valid.len() + self.invalid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct ProcessOptions {
    pub debug: bool,
    pub template: SheetTemplate,
    pub detection: DetectionThresholds,
    pub quality: QualityThresholds,
    pub recognizer: Option<Arc<dyn TextRecognizer>>,
    pub page_timeout: Option<Duration>,
    /// Pages processed at once. 1 processes pages one after another.
    pub workers: usize,
}

impl ProcessOptions {
    pub fn new(template: SheetTemplate) -> Self {
        Self {
            debug: false,
            template,
            detection: DetectionThresholds::default(),
            quality: QualityThresholds::default(),
            recognizer: None,
            page_timeout: None,
            workers: 1,
        }
    }
}

/// Per-page time budget, checked whenever the page changes state. Text
/// recognition is additionally cut off once the budget runs out.
struct Deadline {
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    fn start(limit: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            limit,
        }
    }

    fn remaining(&self) -> Option<Duration> {
        self.limit
            .map(|limit| limit.saturating_sub(self.started.elapsed()))
    }

    fn enter(&self, page_number: u32, state: SheetState) -> Result<(), RejectionReason> {
        log::trace!("page {}: {:?}", page_number, state);
        match self.limit {
            Some(limit) if self.started.elapsed() >= limit => {
                log::warn!("page {}: timed out before {:?}", page_number, state);
                Err(RejectionReason::ProcessingTimeout(state))
            }
            _ => Ok(()),
        }
    }
}

/// What the detection stages learned before finishing or timing out.
struct PageProgress {
    answers: AnswerRecord,
    identity: StudentIdentity,
    used_text_fallback: bool,
}

fn run_detection_stages(
    image: &RasterImage,
    options: &ProcessOptions,
    deadline: &Deadline,
    progress: &mut PageProgress,
) -> Result<(), RejectionReason> {
    let page_number = image.page_number();
    let template = &options.template;

    deadline.enter(page_number, SheetState::DetectingAnswers)?;
    progress.answers = detect_answers(image, template, &options.detection);

    if progress.answers.attempted_count() == 0 {
        deadline.enter(page_number, SheetState::FallbackRecognizing)?;
        match &options.recognizer {
            Some(recognizer) => {
                log::info!("page {}: no bubbles detected, trying text recognition", page_number);
                match recognize_within(recognizer, image, template, deadline)? {
                    Ok(answers) => {
                        progress.answers = answers;
                        progress.used_text_fallback = true;
                    }
                    Err(e) => log::warn!("page {}: {}", page_number, e),
                }
            }
            None => log::debug!("page {}: no text recognizer configured", page_number),
        }
    }

    deadline.enter(page_number, SheetState::ExtractingIdentity)?;
    progress.identity = extract_identity(image, template, &options.detection);
    Ok(())
}

/// Runs the recognizer on its own thread and stops waiting for it when the
/// page's budget runs out. A recognizer still running at that point is left
/// to finish in the background; its result is dropped.
fn recognize_within(
    recognizer: &Arc<dyn TextRecognizer>,
    image: &RasterImage,
    template: &SheetTemplate,
    deadline: &Deadline,
) -> Result<Result<AnswerRecord, RecognitionError>, RejectionReason> {
    let (question_count, choices) = (template.question_count, template.options());
    let remaining = match deadline.remaining() {
        Some(remaining) => remaining,
        None => {
            return Ok(recognize_answers(recognizer.as_ref(), image, question_count, choices));
        }
    };

    let (tx, rx) = mpsc::channel();
    let worker = Arc::clone(recognizer);
    let page = image.clone();
    let spawned = thread::Builder::new()
        .name(format!("ocr-page-{}", image.page_number()))
        .spawn(move || {
            // The receiver is gone if the page already timed out.
            let _ = tx.send(recognize_answers(worker.as_ref(), &page, question_count, choices));
        });
    if let Err(e) = spawned {
        log::warn!("cannot start text recognition thread ({}), running inline", e);
        return Ok(recognize_answers(recognizer.as_ref(), image, question_count, choices));
    }

    match rx.recv_timeout(remaining) {
        Ok(result) => Ok(result),
        Err(RecvTimeoutError::Timeout) => {
            log::warn!(
                "page {}: timed out during {:?}",
                image.page_number(),
                SheetState::FallbackRecognizing
            );
            Err(RejectionReason::ProcessingTimeout(SheetState::FallbackRecognizing))
        }
        Err(RecvTimeoutError::Disconnected) => Ok(Err(RecognitionError::Recognize(
            "recognizer stopped without a result".to_string(),
        ))),
    }
}

/// Runs one page through the pipeline.
///
/// Quality is assessed whenever the page has time left, and the later
/// stages run even when the scan fails the quality gate, so a rejected sheet
/// still reports whatever identity could be read.
pub fn process_page(
    image: &RasterImage,
    source: &str,
    page_number: Option<u32>,
    options: &ProcessOptions,
) -> SheetResult {
    process_rendered_page(image, source, page_number, options, Duration::ZERO)
}

/// Like [`process_page`], with `render_time` already spent from the page's
/// budget on rasterizing it.
#[time]
fn process_rendered_page(
    image: &RasterImage,
    source: &str,
    page_number: Option<u32>,
    options: &ProcessOptions,
    render_time: Duration,
) -> SheetResult {
    let budget = options
        .page_timeout
        .map(|limit| limit.saturating_sub(render_time));
    let deadline = Deadline::start(budget);
    let ready = deadline.enter(image.page_number(), SheetState::QualityChecking);
    let quality = assess_quality(image, &options.quality);

    let mut progress = PageProgress {
        answers: AnswerRecord::unattempted(options.template.question_count),
        identity: StudentIdentity::unknown(),
        used_text_fallback: false,
    };
    let timeout = ready
        .and_then(|()| run_detection_stages(image, options, &deadline, &mut progress))
        .err();

    let rejection = if let Some(timeout) = timeout {
        Some(timeout)
    } else if let Some(failure) = quality.failure {
        Some(RejectionReason::LowQuality(failure))
    } else if progress.answers.attempted_count() == 0 {
        Some(RejectionReason::NoAnswersDetected)
    } else {
        None
    };

    debug_writer(image, source, options).write(&format!("page{}", image.page_number()), |canvas| {
        draw_template_debug_image_mut(canvas, image, &options.template, &options.detection);
    });

    log::trace!("page {}: {:?}", image.page_number(), SheetState::Finalized);
    match &rejection {
        Some(reason) => log::info!("{} page {}: rejected: {}", source, image.page_number(), reason),
        None => {
            log::info!("{} page {}: accepted", source, image.page_number());
            if !progress.identity.has_name() || !progress.identity.has_roll_number() {
                log::warn!(
                    "{} page {}: student identity only partly read",
                    source,
                    image.page_number()
                );
            }
        }
    }

    SheetResult {
        source: source.to_string(),
        page_number,
        identity: progress.identity,
        answers: progress.answers,
        quality,
        used_text_fallback: progress.used_text_fallback,
        is_valid: rejection.is_none(),
        rejection,
    }
}

fn debug_writer(image: &RasterImage, source: &str, options: &ProcessOptions) -> ImageDebugWriter {
    if !options.debug {
        return ImageDebugWriter::disabled();
    }
    let canvas = image::DynamicImage::ImageRgba8(image.pixels.clone()).into_rgb8();
    ImageDebugWriter::new(Path::new(source).to_path_buf(), canvas)
}

/// A pool of `workers` threads, or `None` to process on the calling thread.
fn worker_pool(workers: usize) -> Option<rayon::ThreadPool> {
    if workers <= 1 {
        return None;
    }
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => Some(pool),
        Err(e) => {
            log::warn!("cannot start worker pool ({}), processing sequentially", e);
            None
        }
    }
}

/// Processes pages, each paired with the time spent rasterizing it, in
/// parallel when a pool is given. Results come back in page order.
#[time]
fn process_batch(
    pages: &[(RasterImage, Duration)],
    source: &str,
    multi_page: bool,
    options: &ProcessOptions,
    pool: Option<&rayon::ThreadPool>,
) -> Vec<SheetResult> {
    let run = |(page, render_time): &(RasterImage, Duration)| {
        let page_number = multi_page.then(|| page.page_number());
        process_rendered_page(page, source, page_number, options, *render_time)
    };

    match pool {
        Some(pool) => pool.install(|| pages.par_iter().map(run).collect()),
        None => pages.iter().map(run).collect(),
    }
}

/// Rasterizes and processes a whole document. A failing page never stops
/// the others; results come back in page order. Pages are rendered
/// `workers` at a time, so no more than `workers` page bitmaps are held at
/// once. Rendering time counts against each page's budget. A document that
/// cannot be opened, has no pages, or has a page that fails to render is an
/// error.
pub fn process_document(
    bytes: &[u8],
    kind: DocumentKind,
    source: &str,
    rasterizer: &PageRasterizer,
    options: &ProcessOptions,
) -> Result<BatchOutcome, DocumentDecodeError> {
    let page_count = rasterizer.page_count(bytes, kind)?;
    let multi_page = kind == DocumentKind::Pdf;
    log::info!("{}: processing {} page(s)", source, page_count);

    let pool = worker_pool(options.workers.min(page_count));
    let chunk_size = if pool.is_some() { options.workers } else { 1 };

    let mut results = Vec::with_capacity(page_count);
    let mut first = 0;
    while first < page_count {
        let last = (first + chunk_size).min(page_count);
        let mut pages = Vec::with_capacity(last - first);
        for index in first..last {
            log::trace!("{} page {}: {:?}", source, index + 1, SheetState::Rasterizing);
            let started = Instant::now();
            let page = rasterizer.render_page(bytes, kind, index)?;
            pages.push((page, started.elapsed()));
        }
        results.extend(process_batch(&pages, source, multi_page, options, pool.as_ref()));
        first = last;
    }

    Ok(BatchOutcome::from_results(results))
}
