use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bubble_grid::DetectionThresholds;
use crate::process::ProcessOptions;
use crate::quality::QualityThresholds;
use crate::scoring::{MarkingScheme, ScoringError};
use crate::sheet_template::{get_sheet_template, TemplateId};

pub const DEFAULT_PAGE_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid marking scheme: {0}")]
    Scheme(#[from] ScoringError),

    #[error("workers must be at least 1")]
    NoWorkers,
}

/// Settings for a grading run. Every key is optional in the JSON file.
///
/// ```json
/// {
///   "template": "standard-50",
///   "markingScheme": { "correctMarks": 4, "wrongMarks": -1, "negativeMarkingEnabled": true },
///   "workers": 4
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GraderConfig {
    pub template: TemplateId,
    pub detection: DetectionThresholds,
    pub quality: QualityThresholds,
    pub marking_scheme: MarkingScheme,
    pub workers: usize,
    /// Per-page budget; `null` disables the timeout.
    pub page_timeout_secs: Option<u64>,
    pub ocr_language: String,
    /// Directory holding the pdfium shared library. The system library is
    /// used when unset.
    pub pdfium_library_dir: Option<PathBuf>,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            template: TemplateId::default(),
            detection: DetectionThresholds::default(),
            quality: QualityThresholds::default(),
            marking_scheme: MarkingScheme::default(),
            workers: 1,
            page_timeout_secs: Some(DEFAULT_PAGE_TIMEOUT_SECS),
            ocr_language: "eng".to_string(),
            pdfium_library_dir: None,
        }
    }
}

impl GraderConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&json)?;
        log::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.marking_scheme.validate()?;
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }

    pub fn page_timeout(&self) -> Option<Duration> {
        self.page_timeout_secs.map(Duration::from_secs)
    }

    /// Options for the sheet processor. No text recognizer is attached.
    pub fn process_options(&self, debug: bool) -> ProcessOptions {
        let mut options = ProcessOptions::new(get_sheet_template(self.template));
        options.debug = debug;
        options.detection = self.detection;
        options.quality = self.quality;
        options.page_timeout = self.page_timeout();
        options.workers = self.workers;
        options
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let config = GraderConfig::from_json("{}").expect("parses");
        assert_eq!(config, GraderConfig::default());
        assert_eq!(config.template, TemplateId::Neet180);
        assert_eq!(config.page_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let config = GraderConfig::from_json(
            r#"{
                "template": "standard-50",
                "detection": { "answerAbsolute": 0.5 },
                "markingScheme": { "correctMarks": 4, "wrongMarks": -1, "negativeMarkingEnabled": true },
                "workers": 4,
                "pageTimeoutSecs": null
            }"#,
        )
        .expect("parses");

        assert_eq!(config.template, TemplateId::Standard50);
        assert_eq!(config.detection.answer_absolute, 0.5);
        assert_eq!(config.detection.answer_relative, 1.1);
        assert_eq!(config.marking_scheme.wrong_marks, -1.0);
        assert_eq!(config.marking_scheme.unattempted_marks, 0.0);
        assert_eq!(config.quality, QualityThresholds::default());
        assert_eq!(config.page_timeout(), None);

        let options = config.process_options(true);
        assert!(options.debug);
        assert_eq!(options.workers, 4);
        assert_eq!(options.template.question_count, 50);
        assert_eq!(options.page_timeout, None);
    }

    #[test]
    fn rejects_invalid_marking_scheme() {
        let result = GraderConfig::from_json(r#"{ "markingScheme": { "correctMarks": 0 } }"#);
        assert!(matches!(result, Err(ConfigError::Scheme(_))));

        let result = GraderConfig::from_json(r#"{ "markingScheme": { "wrongMarks": 1 } }"#);
        assert!(matches!(result, Err(ConfigError::Scheme(_))));
    }

    #[test]
    fn rejects_zero_workers_and_unknown_templates() {
        assert!(matches!(
            GraderConfig::from_json(r#"{ "workers": 0 }"#),
            Err(ConfigError::NoWorkers)
        ));
        assert!(matches!(
            GraderConfig::from_json(r#"{ "template": "legal-100" }"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("creates temp file");
        write!(file, r#"{{ "ocrLanguage": "hin" }}"#).expect("writes config");

        let config = GraderConfig::load(file.path()).expect("loads");
        assert_eq!(config.ocr_language, "hin");

        let missing = GraderConfig::load(Path::new("/nonexistent/omr.json"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
