//! Motion sentry: the event loop context.
//!
//! A `Sentry` owns the classifier, the armed/disarmed state machine and the
//! three actions. Each serial line goes through `process_line`; a motion
//! start while disarmed runs capture, optional analysis and notification in
//! order, synchronously, before the next line is read.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::analysis::{AnalysisResult, Analyzer};
use crate::capture::{CaptureAction, CapturedImage, StillCamera};
use crate::config::{DetectorKind, MotionConfig};
use crate::detect::{DetectorBackend, StubBackend};
use crate::event::{EventClassifier, MotionEvent};
use crate::ingest::{LineSource, ReadLine};
use crate::machine::{MotionStateMachine, Transition};
use crate::notify::{Notification, Notifier, NotifySettings, NtfyNotifier};

const READ_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What happened to one line.
#[derive(Clone, Debug, PartialEq)]
pub enum LineOutcome {
    /// Dropped before classification (strict protocol line noise).
    Noise,
    /// Classified but caused no transition.
    Ignored(MotionEvent),
    /// Motion start while already armed.
    Debounced,
    /// Motion ended; the sentry is ready for the next trigger.
    Rearmed,
    /// Motion start while disarmed; the action sequence ran.
    Dispatched(DispatchReport),
}

/// Result of one capture -> analyze -> notify sequence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DispatchReport {
    pub image: Option<CapturedImage>,
    pub capture_error: Option<String>,
    pub analysis: Option<AnalysisResult>,
    pub notification: Option<Notification>,
    pub notify_error: Option<String>,
}

impl DispatchReport {
    pub fn notified(&self) -> bool {
        self.notification.is_some() && self.notify_error.is_none()
    }
}

/// Counters reported when the loop exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub lines: u64,
    pub triggers: u64,
    pub notifications_sent: u64,
    pub failures: u64,
}

pub struct Sentry {
    classifier: EventClassifier,
    machine: MotionStateMachine,
    camera: Box<dyn CaptureAction>,
    analyzer: Option<Analyzer>,
    notifier: Box<dyn Notifier>,
    notify_settings: NotifySettings,
    stats: RunStats,
}

impl Sentry {
    pub fn new(
        classifier: EventClassifier,
        camera: Box<dyn CaptureAction>,
        notifier: Box<dyn Notifier>,
        notify_settings: NotifySettings,
    ) -> Self {
        Self {
            classifier,
            machine: MotionStateMachine::new(),
            camera,
            analyzer: None,
            notifier,
            notify_settings,
            stats: RunStats::default(),
        }
    }

    pub fn with_analyzer(mut self, analyzer: Analyzer) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Builds a sentry with the still camera, the ntfy notifier and, when
    /// enabled, the configured detector backend.
    pub fn from_config(cfg: &MotionConfig) -> Result<Self> {
        let classifier =
            EventClassifier::new(cfg.protocol.strategy, cfg.protocol.keywords.clone())?;
        let camera = StillCamera::new(cfg.capture.clone())?;
        let notifier = NtfyNotifier::new(&cfg.notify);
        let sentry = Self::new(
            classifier,
            Box::new(camera),
            Box::new(notifier),
            cfg.notify.clone(),
        );
        if !cfg.analysis.enabled {
            return Ok(sentry);
        }

        let mut analyzer = Analyzer::new(build_backend(cfg)?, cfg.analysis.settings.clone());
        analyzer.warm_up()?;
        log::info!("analysis backend {} ready", analyzer.backend_name());
        Ok(sentry.with_analyzer(analyzer))
    }

    pub fn is_armed(&self) -> bool {
        self.machine.is_armed()
    }

    pub fn has_analyzer(&self) -> bool {
        self.analyzer.is_some()
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Classifies one raw line and applies it.
    pub fn process_line(&mut self, line: &str) -> LineOutcome {
        self.stats.lines += 1;
        if self.classifier.is_noise(line) {
            return LineOutcome::Noise;
        }
        log::debug!("received (raw): {}", line);

        let event = self.classifier.classify(line);
        match self.machine.handle(event) {
            Transition::Triggered => {
                log::info!("motion trigger detected");
                self.stats.triggers += 1;
                LineOutcome::Dispatched(self.dispatch())
            }
            Transition::Rearmed => {
                log::info!("motion ended - system re-armed");
                LineOutcome::Rearmed
            }
            Transition::Debounced => {
                log::debug!("motion start while armed; ignored");
                LineOutcome::Debounced
            }
            Transition::Ignored => {
                if event == MotionEvent::Unknown {
                    log::debug!("unrecognised line: {}", line);
                }
                LineOutcome::Ignored(event)
            }
        }
    }

    fn dispatch(&mut self) -> DispatchReport {
        let mut report = DispatchReport::default();

        let image = match self.camera.capture() {
            Ok(image) => image,
            Err(e) => {
                log::error!("camera error: {:#}", e);
                self.stats.failures += 1;
                report.capture_error = Some(format!("{:#}", e));
                return report;
            }
        };
        log::info!("image saved to {}", image.path.display());

        let analysis = self
            .analyzer
            .as_mut()
            .map(|analyzer| analyzer.analyze(&image.path));

        let notification =
            Notification::for_capture(&image, analysis.as_ref(), &self.notify_settings);
        log::info!("sending notification: {}", notification.title);
        match self.notifier.send(&notification) {
            Ok(()) => {
                self.stats.notifications_sent += 1;
                log::info!("notification sent");
            }
            Err(e) => {
                self.stats.failures += 1;
                log::error!("notification error: {:#}", e);
                report.notify_error = Some(format!("{:#}", e));
            }
        }

        report.image = Some(image);
        report.analysis = analysis;
        report.notification = Some(notification);
        report
    }

    /// Reads lines until the source closes or `shutdown` is set.
    ///
    /// Read errors are logged and retried after a short pause; they never
    /// end the loop.
    pub fn run<S: LineSource + ?Sized>(
        &mut self,
        source: &mut S,
        shutdown: &AtomicBool,
    ) -> Result<RunStats> {
        log::info!("listening for motion events on {}", source.describe());
        while !shutdown.load(Ordering::SeqCst) {
            match source.read_line() {
                Ok(ReadLine::Line(line)) => {
                    self.process_line(&line);
                }
                Ok(ReadLine::Idle) => {}
                Ok(ReadLine::Closed) => {
                    log::info!("{} closed", source.describe());
                    break;
                }
                Err(e) => {
                    log::error!("read error: {:#}", e);
                    self.stats.failures += 1;
                    std::thread::sleep(READ_ERROR_BACKOFF);
                }
            }
        }
        Ok(self.stats)
    }
}

fn build_backend(cfg: &MotionConfig) -> Result<Box<dyn DetectorBackend>> {
    match cfg.analysis.backend {
        DetectorKind::Stub => {
            log::warn!("analysis uses the stub backend; every image reports no objects");
            Ok(Box::new(StubBackend::new()))
        }
        DetectorKind::Tract => build_tract_backend(cfg),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract_backend(cfg: &MotionConfig) -> Result<Box<dyn DetectorBackend>> {
    let model_path = cfg
        .analysis
        .model_path
        .as_deref()
        .ok_or_else(|| anyhow!("analysis.model_path is required for the tract backend"))?;
    let backend = crate::detect::TractBackend::new(model_path, cfg.analysis.input_size)?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract_backend(_cfg: &MotionConfig) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!(
        "analysis backend 'tract' requires building with --features backend-tract"
    ))
}
