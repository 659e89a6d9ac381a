use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{FailureKind, GenerationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Image,
    Speech,
    Music,
    Video,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Image,
        Capability::Speech,
        Capability::Music,
        Capability::Video,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Image => "image",
            Capability::Speech => "speech",
            Capability::Music => "music",
            Capability::Video => "video",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Resolution {
    #[default]
    Square,
    Wide,
    Portrait,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Resolution::Square, Resolution::Wide, Resolution::Portrait];

    pub fn label(self) -> &'static str {
        match self {
            Resolution::Square => "Square",
            Resolution::Wide => "Wide",
            Resolution::Portrait => "Portrait",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Resolution {
    type Err = GenerationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "square" | "1:1" => Ok(Resolution::Square),
            "wide" | "landscape" | "16:9" => Ok(Resolution::Wide),
            "portrait" | "tall" | "9:16" => Ok(Resolution::Portrait),
            other => Err(GenerationError::UnsupportedSelection(format!(
                "unknown resolution '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SpeechLanguage {
    #[default]
    English,
    Spanish,
    French,
    Chinese,
    Korean,
    Japanese,
}

impl SpeechLanguage {
    pub const ALL: [SpeechLanguage; 6] = [
        SpeechLanguage::English,
        SpeechLanguage::Spanish,
        SpeechLanguage::French,
        SpeechLanguage::Chinese,
        SpeechLanguage::Korean,
        SpeechLanguage::Japanese,
    ];

    pub fn code(self) -> &'static str {
        match self {
            SpeechLanguage::English => "EN",
            SpeechLanguage::Spanish => "ES",
            SpeechLanguage::French => "FR",
            SpeechLanguage::Chinese => "ZH",
            SpeechLanguage::Korean => "KR",
            SpeechLanguage::Japanese => "JP",
        }
    }

    /// Voice id; English uses the default accent.
    pub fn speaker(self) -> &'static str {
        match self {
            SpeechLanguage::English => "EN-Default",
            other => other.code(),
        }
    }
}

impl FromStr for SpeechLanguage {
    type Err = GenerationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        SpeechLanguage::ALL
            .into_iter()
            .find(|language| {
                language.code().eq_ignore_ascii_case(&normalized)
                    || format!("{language:?}").eq_ignore_ascii_case(&normalized)
            })
            .ok_or_else(|| {
                GenerationError::UnsupportedSelection(format!("unknown speech language '{raw}'"))
            })
    }
}

/// Generic inputs every adapter receives.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JobParameters {
    pub prompt: String,
    pub resolution: Resolution,
    pub language: SpeechLanguage,
}

impl JobParameters {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_language(mut self, language: SpeechLanguage) -> Self {
        self.language = language;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Init,
    Submitted,
    AwaitingHandshake,
    Streaming,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Init => "init",
            JobStatus::Submitted => "submitted",
            JobStatus::AwaitingHandshake => "awaiting_handshake",
            JobStatus::Streaming => "streaming",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    fn allows(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Init, Submitted) | (Init, Failed) => true,
            (Submitted, AwaitingHandshake) | (Submitted, Streaming) | (Submitted, Failed) => true,
            (AwaitingHandshake, Streaming) | (AwaitingHandshake, Failed) => true,
            (Streaming, Completed) | (Streaming, Failed) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid job transition {} -> {}",
            self.from.as_str(),
            self.to.as_str()
        )
    }
}

/// One request to a backend. Status only moves forward and terminates once.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pub correlation_token: String,
    pub adapter_id: String,
    pub parameters: JobParameters,
    status: JobStatus,
    result: Option<String>,
    failure: Option<JobFailure>,
}

impl GenerationJob {
    pub fn new(
        correlation_token: impl Into<String>,
        adapter_id: impl Into<String>,
        parameters: JobParameters,
    ) -> Self {
        Self {
            correlation_token: correlation_token.into(),
            adapter_id: adapter_id.into(),
            parameters,
            status: JobStatus::Init,
            result: None,
            failure: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        self.failure.as_ref()
    }

    /// Moves to a non-terminal state.
    pub fn advance(&mut self, next: JobStatus) -> Result<JobStatus, InvalidTransition> {
        if next.is_terminal() {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.set_status(next)
    }

    pub fn complete(&mut self, url: impl Into<String>) -> Result<JobStatus, InvalidTransition> {
        let previous = self.set_status(JobStatus::Completed)?;
        self.result = Some(url.into());
        Ok(previous)
    }

    pub fn fail(
        &mut self,
        kind: FailureKind,
        message: impl Into<String>,
    ) -> Result<JobStatus, InvalidTransition> {
        let previous = self.set_status(JobStatus::Failed)?;
        self.failure = Some(JobFailure {
            kind,
            message: message.into(),
        });
        Ok(previous)
    }

    /// Converts a terminal job into its caller-facing outcome.
    pub fn outcome(&self) -> Option<Result<String, GenerationError>> {
        match self.status {
            JobStatus::Completed => self.result.clone().map(Ok),
            JobStatus::Failed => self.failure.as_ref().map(|failure| {
                Err(match failure.kind {
                    FailureKind::SubmitError => GenerationError::Submit(failure.message.clone()),
                    FailureKind::TransportError => {
                        GenerationError::Transport(failure.message.clone())
                    }
                    FailureKind::MissingOutput => GenerationError::MissingOutput,
                })
            }),
            _ => None,
        }
    }

    fn set_status(&mut self, next: JobStatus) -> Result<JobStatus, InvalidTransition> {
        if !self.status.allows(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let previous = self.status;
        self.status = next;
        Ok(previous)
    }
}
