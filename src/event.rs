//! Serial token classification.
//!
//! The motion sensor speaks a line protocol over a serial link. Two matching
//! strategies are supported:
//!
//! - `Fragment`: case-insensitive substring match against start/end fragment
//!   sets. This tolerates a noisy channel where tokens arrive corrupted
//!   (e.g. `MOTION_STARTED` arriving as `MOOINSARTD`).
//! - `Exact`: lines must carry a reserved prefix and equal a reserved token.
//!   Anything without the prefix is line noise and dropped quietly.

use anyhow::{anyhow, Result};
use serde::Deserialize;

pub const DEFAULT_START_FRAGMENTS: &[&str] = &["STARTED", "OINSA", "OINT"];
pub const DEFAULT_END_FRAGMENTS: &[&str] = &["ENDED", "MTO_NE", "OINE"];

pub const DEFAULT_EVENT_PREFIX: &str = "EVENT:";
pub const DEFAULT_START_TOKEN: &str = "EVENT:MOTION_STARTED";
pub const DEFAULT_END_TOKEN: &str = "EVENT:MOTION_ENDED";

/// Motion event decoded from one serial line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionEvent {
    Started,
    Ended,
    Unknown,
}

/// How raw lines are matched against the keyword table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Exact,
    Fragment,
}

impl MatchStrategy {
    pub fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exact" | "strict" => Ok(Self::Exact),
            "fragment" | "fuzzy" => Ok(Self::Fragment),
            other => Err(anyhow!(
                "unknown protocol '{}'; expected 'exact' or 'fragment'",
                other
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Fragment => "fragment",
        }
    }
}

/// Keyword table consulted by the classifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeywordTable {
    pub start: Vec<String>,
    pub end: Vec<String>,
    /// Reserved prefix for `Exact`. Ignored by `Fragment`.
    pub prefix: String,
}

impl KeywordTable {
    pub fn defaults_for(strategy: MatchStrategy) -> Self {
        match strategy {
            MatchStrategy::Fragment => Self {
                start: to_owned(DEFAULT_START_FRAGMENTS),
                end: to_owned(DEFAULT_END_FRAGMENTS),
                prefix: String::new(),
            },
            MatchStrategy::Exact => Self {
                start: vec![DEFAULT_START_TOKEN.to_string()],
                end: vec![DEFAULT_END_TOKEN.to_string()],
                prefix: DEFAULT_EVENT_PREFIX.to_string(),
            },
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.start.is_empty() || self.end.is_empty() {
            return Err(anyhow!("keyword table needs at least one start and one end token"));
        }
        if self
            .start
            .iter()
            .chain(self.end.iter())
            .any(|token| token.trim().is_empty())
        {
            return Err(anyhow!("keyword table contains an empty token"));
        }
        Ok(())
    }
}

fn to_owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

/// Maps raw serial lines to motion events.
#[derive(Clone, Debug)]
pub struct EventClassifier {
    strategy: MatchStrategy,
    keywords: KeywordTable,
}

impl EventClassifier {
    pub fn new(strategy: MatchStrategy, keywords: KeywordTable) -> Result<Self> {
        keywords.validate()?;
        let keywords = match strategy {
            // Fragment matching compares upper-cased text on both sides.
            MatchStrategy::Fragment => KeywordTable {
                start: keywords.start.iter().map(|k| k.to_uppercase()).collect(),
                end: keywords.end.iter().map(|k| k.to_uppercase()).collect(),
                prefix: keywords.prefix,
            },
            MatchStrategy::Exact => keywords,
        };
        Ok(Self { strategy, keywords })
    }

    pub fn with_defaults(strategy: MatchStrategy) -> Self {
        Self {
            strategy,
            keywords: KeywordTable::defaults_for(strategy),
        }
    }

    /// Returns true when the line is line noise under the strict protocol.
    ///
    /// Noise is dropped without being surfaced.
    pub fn is_noise(&self, line: &str) -> bool {
        let line = line.trim();
        match self.strategy {
            MatchStrategy::Exact => !line.starts_with(&self.keywords.prefix),
            MatchStrategy::Fragment => line.is_empty(),
        }
    }

    pub fn classify(&self, line: &str) -> MotionEvent {
        let line = line.trim();
        if line.is_empty() {
            return MotionEvent::Unknown;
        }
        match self.strategy {
            MatchStrategy::Exact => {
                if !line.starts_with(&self.keywords.prefix) {
                    return MotionEvent::Unknown;
                }
                if self.keywords.start.iter().any(|token| token == line) {
                    MotionEvent::Started
                } else if self.keywords.end.iter().any(|token| token == line) {
                    MotionEvent::Ended
                } else {
                    MotionEvent::Unknown
                }
            }
            MatchStrategy::Fragment => {
                let upper = line.to_uppercase();
                let started = self
                    .keywords
                    .start
                    .iter()
                    .any(|fragment| upper.contains(fragment.as_str()));
                let ended = self
                    .keywords
                    .end
                    .iter()
                    .any(|fragment| upper.contains(fragment.as_str()));
                match (started, ended) {
                    (true, false) => MotionEvent::Started,
                    (false, true) => MotionEvent::Ended,
                    _ => MotionEvent::Unknown,
                }
            }
        }
    }
}
