//! Motion sensor notifier.
//!
//! Listens for motion events on a serial link, captures a still when motion
//! starts, optionally checks the still for people, and pushes the image to
//! an ntfy topic.
//!
//! # Module Structure
//!
//! - `ingest`: line sources (serial device, any `BufRead`)
//! - `event`: token classification (exact or fragment matching)
//! - `machine`: armed/disarmed state machine with debouncing
//! - `capture`: still capture through an external camera command
//! - `detect`: detector backends (stub, tract/ONNX)
//! - `analysis`: detection summaries
//! - `notify`: ntfy push notifications
//! - `sentry`: the event loop context tying it together
//! - `config`: file + environment configuration

pub mod analysis;
pub mod capture;
pub mod config;
pub mod detect;
pub mod event;
pub mod ingest;
pub mod machine;
pub mod notify;
pub mod sentry;

pub use analysis::{summarize, AnalysisResult, AnalysisSettings, Analyzer};
pub use capture::{CaptureAction, CaptureSettings, CapturedImage, StillCamera};
pub use config::{ConfigOverrides, DetectorKind, MotionConfig};
pub use detect::{Detection, DetectorBackend, StubBackend};
pub use event::{EventClassifier, KeywordTable, MatchStrategy, MotionEvent};
pub use ingest::{open_serial, LineReader, LineSource, ReadLine, SerialSettings};
pub use machine::{MotionState, MotionStateMachine, Transition};
pub use notify::{Notification, Notifier, NotifySettings, NtfyNotifier};
pub use sentry::{DispatchReport, LineOutcome, RunStats, Sentry};
