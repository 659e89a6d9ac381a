use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use genrelay_contracts::GenerationError;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use scraper::{Html, Node};

use crate::util::{error_chain_text, is_timeout_error};

pub const PAGE_TIMEOUT_PLACEHOLDER: &str = "ERROR: The website is not responding..";
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(8);

const ERROR_TEXT_MAX_CHARS: usize = 256;

/// Elements whose text never reaches the reader.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

const TEXT_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "text/plain",
    "text/html",
    "text/css",
    "application/javascript",
    "application/json",
    "text/x-python",
    "application/x-yaml",
    "text/markdown",
    "application/xml",
];

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "yaml", "yml", "xml", "json", "html", "htm", "css", "js", "py", "env", "sh",
    "bat", "rb", "c", "cpp", "cc", "cxx", "h", "hpp", "java", "rs", "pdf",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    Url(String),
    File(PathBuf),
    Inline(String),
    Bytes(Vec<u8>),
}

/// An attachment that may carry text for the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub mime_type: Option<String>,
    pub source: DocumentSource,
}

impl Document {
    pub fn new(name: impl Into<String>, source: DocumentSource) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            source,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    fn base_mime(&self) -> Option<String> {
        self.mime_type
            .as_deref()
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_ascii_lowercase())
    }

    fn extension(&self) -> Option<String> {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext.trim().to_ascii_lowercase())
    }

    pub fn is_pdf(&self) -> bool {
        self.base_mime().as_deref() == Some("application/pdf")
            || self.extension().as_deref() == Some("pdf")
    }

    pub fn is_html(&self) -> bool {
        self.base_mime().as_deref() == Some("text/html")
            || matches!(self.extension().as_deref(), Some("html" | "htm"))
    }

    pub fn is_image(&self) -> bool {
        if let Some(mime) = self.base_mime() {
            return mime.starts_with("image/");
        }
        matches!(
            self.extension().as_deref(),
            Some("png" | "jpg" | "jpeg" | "webp" | "gif")
        )
    }

    pub fn is_text(&self) -> bool {
        self.base_mime()
            .map(|mime| TEXT_MIME_TYPES.contains(&mime.as_str()))
            .unwrap_or(false)
            || self
                .extension()
                .map(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
                .unwrap_or(false)
    }
}

pub trait TextExtractor: Send + Sync {
    /// Plain text of a document attachment.
    fn extract(&self, document: &Document) -> Result<String, GenerationError>;

    /// Raw bytes of an attachment (used for images).
    fn read_bytes(&self, document: &Document) -> Result<Vec<u8>, GenerationError>;

    /// Visible text of a web page; a slow site yields `GenerationError::Timeout`.
    fn fetch_page(&self, url: &str, timeout: Duration) -> Result<String, GenerationError>;
}

pub struct HttpTextExtractor {
    http: HttpClient,
}

impl HttpTextExtractor {
    pub fn new() -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .user_agent(concat!("genrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build extraction HTTP client")?;
        Ok(Self { http })
    }

    fn get(&self, url: &str, timeout: Option<Duration>) -> anyhow::Result<HttpResponse> {
        let mut request = self.http.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .with_context(|| format!("request failed ({url})"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("request failed ({}): {url}", status.as_u16());
        }
        Ok(response)
    }

    fn get_text(&self, url: &str, timeout: Option<Duration>) -> anyhow::Result<String> {
        self.get(url, timeout)?
            .text()
            .with_context(|| format!("body read failed ({url})"))
    }
}

impl TextExtractor for HttpTextExtractor {
    fn extract(&self, document: &Document) -> Result<String, GenerationError> {
        if document.is_pdf() {
            let bytes = self.read_bytes(document)?;
            return pdf_text(&document.name, &bytes);
        }
        let raw = match &document.source {
            DocumentSource::Inline(text) => text.clone(),
            DocumentSource::Bytes(bytes) => String::from_utf8(bytes.clone()).map_err(|_| {
                GenerationError::Extraction(format!("{} is not UTF-8 text", document.name))
            })?,
            DocumentSource::File(path) => fs::read_to_string(path).map_err(|err| {
                GenerationError::Extraction(format!("{}: {err}", path.display()))
            })?,
            DocumentSource::Url(url) => self.get_text(url, None).map_err(|err| {
                GenerationError::Extraction(error_chain_text(&err, ERROR_TEXT_MAX_CHARS))
            })?,
        };
        if document.is_html() {
            return Ok(strip_html(&raw));
        }
        Ok(raw)
    }

    fn read_bytes(&self, document: &Document) -> Result<Vec<u8>, GenerationError> {
        match &document.source {
            DocumentSource::Inline(text) => Ok(text.clone().into_bytes()),
            DocumentSource::Bytes(bytes) => Ok(bytes.clone()),
            DocumentSource::File(path) => fs::read(path).map_err(|err| {
                GenerationError::Extraction(format!("{}: {err}", path.display()))
            }),
            DocumentSource::Url(url) => self
                .get(url, None)
                .and_then(|response| {
                    response
                        .bytes()
                        .map(|bytes| bytes.to_vec())
                        .with_context(|| format!("body read failed ({url})"))
                })
                .map_err(|err| {
                    GenerationError::Extraction(error_chain_text(&err, ERROR_TEXT_MAX_CHARS))
                }),
        }
    }

    fn fetch_page(&self, url: &str, timeout: Duration) -> Result<String, GenerationError> {
        match self.get_text(url, Some(timeout)) {
            Ok(html) => Ok(strip_html(&html)),
            Err(err) if is_timeout_error(&err) => Err(GenerationError::timeout(
                format!("page fetch {url}"),
                timeout.as_secs_f64(),
            )),
            Err(err) => Err(GenerationError::Extraction(error_chain_text(
                &err,
                ERROR_TEXT_MAX_CHARS,
            ))),
        }
    }
}

/// `http(s)://` links in order of appearance.
pub fn extract_urls(text: &str) -> Vec<String> {
    let mut urls = Vec::new();
    for word in text.split_whitespace() {
        let lowered = word.to_ascii_lowercase();
        let start = ["https://", "http://"]
            .iter()
            .filter_map(|scheme| lowered.find(scheme))
            .filter(|&index| {
                lowered[..index]
                    .chars()
                    .last()
                    .map(|prev| !prev.is_alphanumeric() && prev != '_')
                    .unwrap_or(true)
            })
            .min();
        if let Some(start) = start {
            let url = &word[start..];
            if url.len() > "https://".len() {
                urls.push(url.to_string());
            }
        }
    }
    urls
}

/// Page text without scripts, styles, tags, or runs of whitespace.
pub fn strip_html(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut words = Vec::new();
    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| match ancestor.value() {
            Node::Element(element) => HIDDEN_ELEMENTS.contains(&element.name()),
            _ => false,
        });
        if !hidden {
            words.extend(text.split_whitespace());
        }
    }
    words.join(" ")
}

/// Text layer of a PDF; scanned pages without one come back empty.
pub fn pdf_text(name: &str, bytes: &[u8]) -> Result<String, GenerationError> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|err| GenerationError::Extraction(format!("{name}: {err}")))?;
    Ok(text.trim().to_string())
}

/// Appends the text of each linked page and swaps each fetched link for a
/// numbered reference. Fetch failures never fail the message.
pub fn compose_with_urls(extractor: &dyn TextExtractor, message: &str, timeout: Duration) -> String {
    let mut composed = message.to_string();
    let mut index = 1;
    for url in extract_urls(message) {
        let page = match extractor.fetch_page(&url, timeout) {
            Ok(text) => Ok(text),
            Err(GenerationError::Timeout { .. }) => {
                tracing::debug!(url = %url, "page fetch timed out");
                Ok(PAGE_TIMEOUT_PLACEHOLDER.to_string())
            }
            Err(err) => Err(err),
        };
        match page {
            Ok(text) => {
                composed.push_str(&format!("\n\n[Text Inside The Website {url}]:\n\"{text}\""));
                composed = composed.replacen(&url, &format!("[Reference Number {index}]({url})"), 1);
                index += 1;
            }
            Err(err) => {
                tracing::warn!(url = %url, error = %err, "page fetch failed");
                composed.push_str(&format!(
                    "\n\n[Error]: Can't access content from the [URL {index}]({url}), likely due to bot blocking. Mention if you were blocked in your reply."
                ));
            }
        }
    }
    composed
}

/// Appends each document's text under its file name.
pub fn append_documents(
    extractor: &dyn TextExtractor,
    message: &str,
    documents: &[Document],
) -> Result<String, GenerationError> {
    let mut composed = message.to_string();
    for document in documents {
        let text = extractor.extract(document)?;
        composed.push_str(&format!(
            "\n\n[{}] File Content:\n\"{}\"",
            document.name, text
        ));
    }
    Ok(composed)
}
