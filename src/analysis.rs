//! Person detection on captured stills.
//!
//! Analysis never fails outright: decode and backend errors collapse into
//! fixed summary strings so the notification still goes out.

use std::path::Path;

use crate::detect::{Detection, DetectorBackend};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.4;
pub const DEFAULT_TARGET_CLASS: &str = "person";
pub const DEFAULT_MAX_OTHER_OBJECTS: usize = 3;

pub const HUMAN_DETECTED_MARKER: &str = "HUMAN DETECTED";
pub const NO_SIGNIFICANT_OBJECTS: &str = "NO HUMAN - No significant objects detected";
pub const IMAGE_READ_FAILED: &str = "Image read failed";
pub const DETECTION_FAILED: &str = "Detection failed";

/// Outcome of analysing one capture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalysisResult {
    pub summary: String,
    /// Target-class detections above threshold.
    pub human_count: usize,
}

impl AnalysisResult {
    pub fn from_summary(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            human_count: 0,
        }
    }

    /// Derived from the summary text so that any producer of a summary,
    /// including the failure strings, maps to the right notification.
    pub fn human_present(&self) -> bool {
        self.summary.to_uppercase().contains(HUMAN_DETECTED_MARKER)
    }
}

#[derive(Clone, Debug)]
pub struct AnalysisSettings {
    pub confidence_threshold: f32,
    pub target_class: String,
    pub max_other_objects: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            target_class: DEFAULT_TARGET_CLASS.to_string(),
            max_other_objects: DEFAULT_MAX_OTHER_OBJECTS,
        }
    }
}

/// Runs a detector backend over captured images.
pub struct Analyzer {
    backend: Box<dyn DetectorBackend>,
    settings: AnalysisSettings,
}

impl Analyzer {
    pub fn new(backend: Box<dyn DetectorBackend>, settings: AnalysisSettings) -> Self {
        Self { backend, settings }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn warm_up(&mut self) -> anyhow::Result<()> {
        self.backend.warm_up()
    }

    pub fn analyze(&mut self, image_path: &Path) -> AnalysisResult {
        let image = match image::open(image_path) {
            Ok(image) => image.into_rgb8(),
            Err(e) => {
                log::error!("could not read image {}: {}", image_path.display(), e);
                return AnalysisResult::from_summary(IMAGE_READ_FAILED);
            }
        };

        let detections = match self.backend.detect(&image) {
            Ok(detections) => detections,
            Err(e) => {
                log::error!("{} backend failed: {:#}", self.backend.name(), e);
                return AnalysisResult::from_summary(DETECTION_FAILED);
            }
        };

        log::debug!("total detections: {}", detections.len());
        for detection in &detections {
            log::debug!(
                "  - {}: {:.2}",
                detection.class_name,
                detection.confidence
            );
        }

        let result = summarize(&detections, &self.settings);
        log::info!("analysis: {}", result.summary);
        result
    }
}

/// Builds the summary for a detection list.
///
/// Only detections strictly above the threshold count. Other classes are
/// listed once each, in first-seen order, capped at `max_other_objects`.
pub fn summarize(detections: &[Detection], settings: &AnalysisSettings) -> AnalysisResult {
    let mut human_count = 0usize;
    let mut others: Vec<&str> = Vec::new();

    for detection in detections
        .iter()
        .filter(|d| d.confidence > settings.confidence_threshold)
    {
        if detection.class_name == settings.target_class {
            human_count += 1;
        } else if !others.contains(&detection.class_name.as_str()) {
            others.push(detection.class_name.as_str());
        }
    }

    let summary = match (human_count, others.is_empty()) {
        (1, _) => format!("{} - 1 person detected", HUMAN_DETECTED_MARKER),
        (n, _) if n > 1 => format!("{} - {} people detected", HUMAN_DETECTED_MARKER, n),
        (_, true) => NO_SIGNIFICANT_OBJECTS.to_string(),
        (_, false) => {
            others.truncate(settings.max_other_objects);
            format!("NO HUMAN - Detected: {}", others.join(", "))
        }
    };

    AnalysisResult {
        summary,
        human_count,
    }
}
