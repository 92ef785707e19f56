//! Push notifications through an ntfy-compatible topic.
//!
//! The captured image is uploaded as the request body with `PUT`; metadata
//! travels in headers (`Title`, `Priority`, `Tags`, `Message`, `Filename`).

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::AnalysisResult;
use crate::capture::CapturedImage;

pub const DEFAULT_TOPIC_URL: &str = "https://ntfy.sh/motion-notify";
pub const DEFAULT_TITLE: &str = "Raspberry Pi Motion Alert";
pub const DEFAULT_PRIORITY: &str = "high";
pub const DEFAULT_FILENAME: &str = "intruder.jpg";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const HUMAN_TITLE: &str = "ALERT: HUMAN DETECTED";
pub const HUMAN_TAGS: &str = "warning,skull,human";
pub const NO_HUMAN_TITLE: &str = "No Human Detected";
pub const NO_HUMAN_TAGS: &str = "white_check_mark,camera";

#[derive(Clone, Debug)]
pub struct NotifySettings {
    pub topic_url: String,
    pub title: String,
    pub priority: String,
    pub filename: String,
    pub access_token: Option<String>,
    pub timeout: Duration,
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            topic_url: DEFAULT_TOPIC_URL.to_string(),
            title: DEFAULT_TITLE.to_string(),
            priority: DEFAULT_PRIORITY.to_string(),
            filename: DEFAULT_FILENAME.to_string(),
            access_token: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// One push notification, ready to send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub priority: String,
    pub tags: Option<String>,
    pub message: String,
    pub filename: String,
    pub image_path: PathBuf,
}

impl Notification {
    /// Builds the notification for a capture, with or without analysis.
    pub fn for_capture(
        image: &CapturedImage,
        analysis: Option<&AnalysisResult>,
        settings: &NotifySettings,
    ) -> Self {
        let base_message = format!("Motion detected at {}", image.timestamp);
        let (title, tags, message) = match analysis {
            None => (settings.title.clone(), None, base_message),
            Some(analysis) => {
                let (title, tags) = if analysis.human_present() {
                    (HUMAN_TITLE, HUMAN_TAGS)
                } else {
                    (NO_HUMAN_TITLE, NO_HUMAN_TAGS)
                };
                (
                    title.to_string(),
                    Some(tags.to_string()),
                    format!("{} - {}", base_message, analysis.summary),
                )
            }
        };
        Self {
            title,
            priority: settings.priority.clone(),
            tags,
            message,
            filename: settings.filename.clone(),
            image_path: image.path.clone(),
        }
    }

    /// Header name/value pairs in send order.
    pub fn headers(&self) -> Vec<(&'static str, &str)> {
        let mut headers = vec![("Title", self.title.as_str()), ("Priority", self.priority.as_str())];
        if let Some(tags) = &self.tags {
            headers.push(("Tags", tags.as_str()));
        }
        headers.push(("Message", self.message.as_str()));
        headers.push(("Filename", self.filename.as_str()));
        headers
    }
}

/// Delivers notifications. Failures are reported, never retried.
pub trait Notifier {
    fn send(&mut self, notification: &Notification) -> Result<()>;
}

/// HTTP notifier for ntfy topics.
pub struct NtfyNotifier {
    agent: ureq::Agent,
    topic_url: String,
    access_token: Option<String>,
}

impl NtfyNotifier {
    pub fn new(settings: &NotifySettings) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(settings.timeout).build();
        Self {
            agent,
            topic_url: settings.topic_url.clone(),
            access_token: settings.access_token.clone(),
        }
    }
}

impl Notifier for NtfyNotifier {
    fn send(&mut self, notification: &Notification) -> Result<()> {
        let body = read_image(&notification.image_path)?;

        let mut request = self.agent.put(&self.topic_url);
        for (name, value) in notification.headers() {
            request = request.set(name, value);
        }
        if let Some(token) = &self.access_token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }

        match request.send_bytes(&body) {
            Ok(response) => {
                log::debug!("ntfy accepted notification: {}", response.status());
                Ok(())
            }
            Err(ureq::Error::Status(code, response)) => {
                let detail = response.into_string().unwrap_or_default();
                Err(anyhow!(
                    "ntfy rejected notification with status {}: {}",
                    code,
                    detail.trim()
                ))
            }
            Err(e) => Err(anyhow!("ntfy request to {} failed: {}", self.topic_url, e)),
        }
    }
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read image {}", path.display()))
}
