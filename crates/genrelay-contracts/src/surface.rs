use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum RenderContent {
    /// Current response text, replacing whatever was shown before.
    Text(String),
    /// Static notice shown instead of the text (e.g. when it is too long).
    Placeholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ArtifactMetadata {
    pub prompt_echo: String,
    pub model_used: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactBody {
    Url { url: String },
    TextFile { name: String, content: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub body: ArtifactBody,
    pub metadata: ArtifactMetadata,
}

impl Artifact {
    pub fn url(url: impl Into<String>, metadata: ArtifactMetadata) -> Self {
        Self {
            body: ArtifactBody::Url { url: url.into() },
            metadata,
        }
    }

    pub fn text_file(
        name: impl Into<String>,
        content: impl Into<String>,
        metadata: ArtifactMetadata,
    ) -> Self {
        Self {
            body: ArtifactBody::TextFile {
                name: name.into(),
                content: content.into(),
            },
            metadata,
        }
    }
}

/// Presentation layer for one request.
pub trait ResponseSurface: Send {
    fn render(&mut self, content: RenderContent);
    fn deliver(&mut self, artifact: Artifact);
    /// Transient status line, e.g. between retry attempts.
    fn notice(&mut self, message: &str);
    fn failure(&mut self, message: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Render(RenderContent),
    Deliver(Artifact),
    Notice(String),
    Failure(String),
}

/// Records every call in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    pub calls: Vec<SurfaceCall>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn renders(&self) -> Vec<&RenderContent> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                SurfaceCall::Render(content) => Some(content),
                _ => None,
            })
            .collect()
    }

    pub fn last_render(&self) -> Option<&RenderContent> {
        self.renders().last().copied()
    }

    pub fn artifacts(&self) -> Vec<&Artifact> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                SurfaceCall::Deliver(artifact) => Some(artifact),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                SurfaceCall::Failure(message) => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                SurfaceCall::Notice(message) => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl ResponseSurface for RecordingSurface {
    fn render(&mut self, content: RenderContent) {
        self.calls.push(SurfaceCall::Render(content));
    }

    fn deliver(&mut self, artifact: Artifact) {
        self.calls.push(SurfaceCall::Deliver(artifact));
    }

    fn notice(&mut self, message: &str) {
        self.calls.push(SurfaceCall::Notice(message.to_string()));
    }

    fn failure(&mut self, message: &str) {
        self.calls.push(SurfaceCall::Failure(message.to_string()));
    }
}
