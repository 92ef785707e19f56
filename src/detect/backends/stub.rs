use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Stub backend for testing and bench runs without a model.
///
/// Returns a fixed set of detections for every image, or a fixed error.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    detections: Vec<Detection>,
    failure: Option<String>,
    calls: usize,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detections(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            ..Self::default()
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    /// Number of `detect` calls so far.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>> {
        self.calls += 1;
        if let Some(message) = &self.failure {
            return Err(anyhow!("{}", message));
        }
        Ok(self.detections.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_returns_configured_detections() {
        let image = RgbImage::new(4, 4);
        let mut backend =
            StubBackend::with_detections(vec![Detection::new(0, "person", 0.9)]);

        let first = backend.detect(&image).unwrap();
        let second = backend.detect(&image).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[0].class_name, "person");
        assert_eq!(backend.calls(), 2);
    }

    #[test]
    fn stub_backend_can_fail() {
        let mut backend = StubBackend::failing("model unavailable");
        let err = backend.detect(&RgbImage::new(1, 1)).unwrap_err();
        assert!(err.to_string().contains("model unavailable"));
    }
}
