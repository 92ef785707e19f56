//! Still image capture through an external camera process.
//!
//! The camera command (default `rpicam-still`) is invoked once per trigger.
//! A capture only counts as successful when the process exits zero AND the
//! output file exists.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const DISPLAY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIMEOUT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Image written by a capture action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedImage {
    pub path: PathBuf,
    /// Local capture time, `YYYY-MM-DD HH:MM:SS`.
    pub timestamp: String,
}

/// Produces one still image per call.
pub trait CaptureAction {
    fn capture(&mut self) -> Result<CapturedImage>;
}

#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub command: String,
    pub output_dir: PathBuf,
    pub file_prefix: String,
    pub extension: String,
    pub width: u32,
    pub height: u32,
    pub quality: u8,
    /// Pass `--nopreview` to the camera command.
    pub no_preview: bool,
    /// Kill the camera process after this long. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            command: "rpicam-still".to_string(),
            output_dir: PathBuf::from("captures"),
            file_prefix: "Image_".to_string(),
            extension: "jpg".to_string(),
            width: 640,
            height: 480,
            quality: 50,
            no_preview: true,
            timeout: None,
        }
    }
}

/// Capture action backed by a still-camera command line tool.
pub struct StillCamera {
    settings: CaptureSettings,
}

impl StillCamera {
    /// Creates the camera and its output directory.
    pub fn new(settings: CaptureSettings) -> Result<Self> {
        std::fs::create_dir_all(&settings.output_dir).with_context(|| {
            format!(
                "failed to create output directory {}",
                settings.output_dir.display()
            )
        })?;
        Ok(Self { settings })
    }

    /// Output path for a capture taken at `now`.
    pub fn output_path(&self, now: &DateTime<Local>) -> PathBuf {
        self.settings.output_dir.join(capture_file_name(
            &self.settings.file_prefix,
            &self.settings.extension,
            now,
        ))
    }

    fn command_for(&self, path: &Path) -> Command {
        let mut command = Command::new(&self.settings.command);
        command
            .arg("-o")
            .arg(path)
            .arg("--width")
            .arg(self.settings.width.to_string())
            .arg("--height")
            .arg(self.settings.height.to_string())
            .arg("--quality")
            .arg(self.settings.quality.to_string());
        if self.settings.no_preview {
            command.arg("--nopreview");
        }
        command.stdin(Stdio::null());
        command
    }

    fn run(&self, mut command: Command) -> Result<std::process::ExitStatus> {
        let program = self.settings.command.as_str();
        let Some(timeout) = self.settings.timeout else {
            return command
                .status()
                .with_context(|| format!("failed to spawn {}", program));
        };

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", program))?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("failed to wait for {}", program))?
            {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                if let Err(e) = child.kill() {
                    log::warn!("failed to kill {}: {}", program, e);
                }
                let _ = child.wait();
                return Err(anyhow!(
                    "{} timed out after {}s",
                    program,
                    timeout.as_secs_f64()
                ));
            }
            std::thread::sleep(TIMEOUT_POLL_INTERVAL);
        }
    }
}

impl CaptureAction for StillCamera {
    fn capture(&mut self) -> Result<CapturedImage> {
        let now = Local::now();
        let path = self.output_path(&now);
        log::info!("capturing image to {}", path.display());

        let status = self.run(self.command_for(&path))?;
        if !status.success() {
            return Err(anyhow!("{} exited with {}", self.settings.command, status));
        }
        if !path.exists() {
            return Err(anyhow!(
                "{} exited cleanly but {} was not written",
                self.settings.command,
                path.display()
            ));
        }

        Ok(CapturedImage {
            path,
            timestamp: display_timestamp(&now),
        })
    }
}

/// `{prefix}{YYYYMMDD_HHMMSS}.{extension}`
pub fn capture_file_name(prefix: &str, extension: &str, now: &DateTime<Local>) -> String {
    format!(
        "{}{}.{}",
        prefix,
        now.format(FILE_TIMESTAMP_FORMAT),
        extension.trim_start_matches('.')
    )
}

pub fn display_timestamp(now: &DateTime<Local>) -> String {
    now.format(DISPLAY_TIMESTAMP_FORMAT).to_string()
}
