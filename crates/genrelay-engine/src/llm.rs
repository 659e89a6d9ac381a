use std::io::BufReader;
use std::time::Duration;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use genrelay_contracts::history::Turn;
use genrelay_contracts::GenerationError;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use crate::stream::FragmentProducer;
use crate::transport::EventStreamReader;
use crate::util::{error_chain_text, is_timeout_error, response_json_or_error, truncate_text};

pub const DEFAULT_TEXT_MODEL: &str = "gemini-1.5-flash-latest";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const ERROR_TEXT_MAX_CHARS: usize = 512;

/// Image bytes sent to the model alongside the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelInput {
    pub text: String,
    pub images: Vec<InlineImage>,
}

impl ModelInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }
}

pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &str;

    /// Starts a streamed reply to `input` following `history`.
    fn stream_chat(
        &self,
        history: &[Turn],
        input: &ModelInput,
        system_instruction: Option<&str>,
    ) -> Result<FragmentProducer, GenerationError>;

    /// Single-shot completion bounded by `timeout`.
    fn complete(
        &self,
        system_instruction: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, GenerationError>;
}

pub struct GeminiModel {
    api_key: String,
    api_base: String,
    model: String,
    http: HttpClient,
}

impl GeminiModel {
    pub fn new(
        api_key: impl Into<String>,
        api_base: impl Into<String>,
        model: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(None::<Duration>)
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http,
        })
    }

    fn endpoint(&self, method: &str) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{method}", self.api_base, model_path)
    }

    fn safety_settings() -> Vec<Value> {
        [
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ]
        .into_iter()
        .map(|category| {
            json!({
                "category": category,
                "threshold": "BLOCK_NONE",
            })
        })
        .collect()
    }

    fn build_body(
        history: &[Turn],
        input: &ModelInput,
        system_instruction: Option<&str>,
    ) -> Value {
        let mut contents: Vec<Value> = history
            .iter()
            .map(|turn| {
                json!({
                    "role": turn.role.as_str(),
                    "parts": [{ "text": turn.text }],
                })
            })
            .collect();
        let mut parts: Vec<Value> = input
            .images
            .iter()
            .map(|image| {
                json!({
                    "inlineData": {
                        "mimeType": image.mime_type,
                        "data": BASE64.encode(&image.data),
                    }
                })
            })
            .collect();
        parts.push(json!({ "text": input.text }));
        contents.push(json!({ "role": "user", "parts": parts }));

        let mut body = json!({
            "contents": contents,
            "safetySettings": Self::safety_settings(),
        });
        if let (Some(instruction), Some(object)) = (
            system_instruction.filter(|value| !value.trim().is_empty()),
            body.as_object_mut(),
        ) {
            object.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": instruction }] }),
            );
        }
        body
    }
}

impl LanguageModel for GeminiModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn stream_chat(
        &self,
        history: &[Turn],
        input: &ModelInput,
        system_instruction: Option<&str>,
    ) -> Result<FragmentProducer, GenerationError> {
        let body = Self::build_body(history, input, system_instruction);
        let response = self
            .http
            .post(self.endpoint("streamGenerateContent"))
            .query(&[("alt", "sse"), ("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .context("Gemini stream request failed")
            .map_err(|err| GenerationError::Model(error_chain_text(&err, ERROR_TEXT_MAX_CHARS)))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let text = response.text().unwrap_or_default();
            return Err(GenerationError::Model(format!(
                "Gemini stream rejected ({code}): {}",
                truncate_text(&text, ERROR_TEXT_MAX_CHARS)
            )));
        }
        tracing::debug!(model = %self.model, turns = history.len(), "Gemini stream opened");
        Ok(Box::new(GeminiFragments {
            reader: EventStreamReader::new(BufReader::new(response)),
            finished: false,
        }))
    }

    fn complete(
        &self,
        system_instruction: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, GenerationError> {
        let body = Self::build_body(&[], &ModelInput::text(prompt), Some(system_instruction));
        let payload = self
            .http
            .post(self.endpoint("generateContent"))
            .query(&[("key", self.api_key.as_str())])
            .timeout(timeout)
            .json(&body)
            .send()
            .context("Gemini completion request failed")
            .and_then(|response| response_json_or_error("Gemini completion", response))
            .map_err(|err| {
                if is_timeout_error(&err) {
                    GenerationError::timeout("model completion", timeout.as_secs_f64())
                } else {
                    GenerationError::Model(error_chain_text(&err, ERROR_TEXT_MAX_CHARS))
                }
            })?;
        match candidate_text(&payload) {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(GenerationError::Model(
                block_reason(&payload)
                    .map(|reason| format!("completion blocked: {reason}"))
                    .unwrap_or_else(|| "completion returned no text".to_string()),
            )),
        }
    }
}

struct GeminiFragments {
    reader: EventStreamReader<BufReader<HttpResponse>>,
    finished: bool,
}

impl Iterator for GeminiFragments {
    type Item = Result<String, GenerationError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            match self.reader.next_event() {
                Ok(Some(event)) => {
                    if let Some(reason) = block_reason(&event) {
                        self.finish();
                        return Some(Err(GenerationError::Model(format!(
                            "response blocked: {reason}"
                        ))));
                    }
                    if let Some(text) = candidate_text(&event).filter(|text| !text.is_empty()) {
                        return Some(Ok(text));
                    }
                }
                Ok(None) => self.finish(),
                Err(err) => {
                    self.finish();
                    return Some(Err(GenerationError::Model(format!(
                        "Gemini stream read failed: {err}"
                    ))));
                }
            }
        }
        None
    }
}

impl GeminiFragments {
    fn finish(&mut self) {
        self.finished = true;
        self.reader.close();
    }
}

fn candidate_text(payload: &Value) -> Option<String> {
    let parts = payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)?;
    Some(
        parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<String>(),
    )
}

fn block_reason(payload: &Value) -> Option<String> {
    payload
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Offline model: echoes the input back word by word.
#[derive(Debug, Clone, Default)]
pub struct DryrunModel;

impl LanguageModel for DryrunModel {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn stream_chat(
        &self,
        history: &[Turn],
        input: &ModelInput,
        _system_instruction: Option<&str>,
    ) -> Result<FragmentProducer, GenerationError> {
        let reply = format!(
            "[dryrun turn {}] {}",
            history.len() / 2 + 1,
            input.text.trim()
        );
        let fragments: Vec<String> = reply.split_inclusive(' ').map(str::to_string).collect();
        Ok(Box::new(fragments.into_iter().map(Ok::<String, GenerationError>)))
    }

    fn complete(
        &self,
        _system_instruction: &str,
        prompt: &str,
        _timeout: Duration,
    ) -> Result<String, GenerationError> {
        Ok(format!("```\n{}, highly detailed\n```", prompt.trim()))
    }
}
