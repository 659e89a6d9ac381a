pub mod adapters;
pub mod config;
pub mod extract;
pub mod llm;
pub mod media;
pub mod prompt;
pub mod protocol;
pub mod retry;
pub mod stream;
pub mod transport;
mod util;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use genrelay_contracts::adapters::{AdapterSelector, AdapterTable};
use genrelay_contracts::channels::{ChannelRules, MessageContext};
use genrelay_contracts::events::EventWriter;
use genrelay_contracts::gate::ConcurrencyGate;
use genrelay_contracts::history::HistoryStore;
use genrelay_contracts::job::{Capability, JobParameters, Resolution, SpeechLanguage};
use genrelay_contracts::preferences::{PreferencesStore, UserPreferences};
use genrelay_contracts::surface::{Artifact, ArtifactMetadata, ResponseSurface};
use genrelay_contracts::GenerationError;
use reqwest::blocking::Client as HttpClient;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::adapters::{default_adapter_table, JobAdapter};
use crate::config::RelayConfig;
use crate::extract::{append_documents, compose_with_urls, Document, HttpTextExtractor, TextExtractor};
use crate::llm::{DryrunModel, GeminiModel, LanguageModel, ModelInput};
use crate::media::prepare_inline_image;
use crate::prompt::enhance_prompt;
use crate::protocol::JobProtocolEngine;
use crate::retry::retry_with;
use crate::stream::{CancelToken, StreamOutcome, StreamTurn, StreamingAggregator};
use crate::transport::{ChannelConnector, HttpConnector};
use crate::util::map_object;

pub const BUSY_NOTICE: &str =
    "> `Please wait until your previous action is complete before starting a new one.`";
pub const EMPTY_MESSAGE_NOTICE: &str =
    "> `It looks like you didn't say anything. What would you like to talk about?`";

/// One generation request from an actor.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub capability: Capability,
    pub prompt: String,
    pub adapter: Option<String>,
    pub resolution: Option<Resolution>,
    pub language: Option<SpeechLanguage>,
}

impl GenerationRequest {
    pub fn new(capability: Capability, prompt: impl Into<String>) -> Self {
        Self {
            capability,
            prompt: prompt.into(),
            adapter: None,
            resolution: None,
            language: None,
        }
    }

    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = Some(adapter.into());
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn with_language(mut self, language: SpeechLanguage) -> Self {
        self.language = Some(language);
        self
    }
}

/// A chat message with optional image or document attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatMessage {
    pub text: String,
    pub attachments: Vec<Document>,
}

impl ChatMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachment(mut self, document: Document) -> Self {
        self.attachments.push(document);
        self
    }
}

/// External services the relay talks to.
pub struct Collaborators {
    pub connector: Arc<dyn ChannelConnector>,
    pub model: Arc<dyn LanguageModel>,
    pub extractor: Arc<dyn TextExtractor>,
    pub events: EventWriter,
}

impl Collaborators {
    /// Network-backed collaborators. Without a Gemini key, chat falls back to
    /// the offline dryrun model.
    pub fn live(config: &RelayConfig, events: EventWriter) -> Result<Self> {
        let model: Arc<dyn LanguageModel> = match config.gemini_api_key.as_deref() {
            Some(key) => Arc::new(GeminiModel::new(
                key,
                config.gemini_api_base.clone(),
                config.text_model.clone(),
            )?),
            None => {
                tracing::warn!("GEMINI_API_KEY or GOOGLE_API_KEY not set; chat uses dryrun model");
                Arc::new(DryrunModel)
            }
        };
        Ok(Self {
            connector: Arc::new(HttpConnector::new()?),
            model,
            extractor: Arc::new(HttpTextExtractor::new()?),
            events,
        })
    }
}

/// Owns every per-actor map and runs generation and chat requests.
pub struct Relay {
    config: RelayConfig,
    adapters: AdapterTable<Box<dyn JobAdapter>>,
    selector: AdapterSelector,
    engine: JobProtocolEngine,
    aggregator: StreamingAggregator,
    model: Arc<dyn LanguageModel>,
    extractor: Arc<dyn TextExtractor>,
    gate: ConcurrencyGate,
    history: HistoryStore,
    preferences: PreferencesStore,
    channels: ChannelRules,
    streams: Mutex<HashMap<String, CancelToken>>,
}

impl Relay {
    pub fn new(config: RelayConfig, collaborators: Collaborators) -> Self {
        let history = HistoryStore::new();
        let preferences = PreferencesStore::new(UserPreferences {
            image_adapter: config.default_image_adapter.clone(),
            ..UserPreferences::default()
        });
        Self {
            adapters: default_adapter_table(&config.adapters),
            selector: AdapterSelector::default(),
            engine: JobProtocolEngine::new(collaborators.connector, collaborators.events),
            aggregator: StreamingAggregator::new(
                history.clone(),
                config.chat_retry,
                config.render_interval,
            ),
            model: collaborators.model,
            extractor: collaborators.extractor,
            gate: ConcurrencyGate::new(),
            history,
            preferences,
            channels: ChannelRules::new(),
            streams: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn preferences(&self) -> &PreferencesStore {
        &self.preferences
    }

    pub fn channels(&self) -> &ChannelRules {
        &self.channels
    }

    pub fn events(&self) -> &EventWriter {
        self.engine.events()
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Adapter names for a capability, in catalog order.
    pub fn adapter_names(&self, capability: Capability) -> Vec<String> {
        self.selector
            .catalog
            .by_capability(capability)
            .into_iter()
            .map(|spec| spec.name)
            .collect()
    }

    /// Runs one generation job (retried as a unit) and delivers its URL.
    pub fn generate(
        &self,
        actor: &str,
        request: GenerationRequest,
        surface: &mut dyn ResponseSurface,
    ) -> Result<String, GenerationError> {
        self.check_access(actor, surface)?;
        let Some(_permit) = self.gate.admit(actor) else {
            surface.failure(BUSY_NOTICE);
            return Err(GenerationError::Busy);
        };

        let prefs = self.preferences.get(actor);
        let resolution = request.resolution.unwrap_or(prefs.resolution);
        let requested = request.adapter.clone().or(match request.capability {
            Capability::Image => Some(prefs.image_adapter.clone()),
            Capability::Speech => Some(prefs.speech_adapter.clone()),
            Capability::Music | Capability::Video => None,
        });

        let selection =
            match self
                .selector
                .select_for(requested.as_deref(), request.capability, resolution)
            {
                Ok(selection) => selection,
                Err(err) => return Err(report(surface, err)),
            };
        if let (Some(reason), Some(_)) = (&selection.fallback_reason, &selection.requested) {
            surface.notice(reason);
        }
        let adapter_name = selection.adapter.name.clone();
        if request.adapter.is_some() && selection.fallback_reason.is_none() {
            match request.capability {
                Capability::Image => {
                    self.preferences.set_image_adapter(actor, &adapter_name);
                }
                Capability::Speech => {
                    self.preferences.set_speech_adapter(actor, &adapter_name);
                }
                Capability::Music | Capability::Video => {}
            }
        }
        let Some(adapter) = self.adapters.get(&adapter_name) else {
            return Err(report(
                surface,
                GenerationError::UnsupportedSelection(format!(
                    "adapter '{adapter_name}' is not registered"
                )),
            ));
        };

        let prompt = if request.capability == Capability::Image && prefs.enhance_prompts {
            surface.notice("> `Enhancing your prompt...`");
            enhance_prompt(self.model.as_ref(), &request.prompt)
        } else {
            request.prompt.clone()
        };
        let params = JobParameters::new(prompt)
            .with_resolution(resolution)
            .with_language(request.language.unwrap_or_default());

        surface.notice(&format!("> `Generating with {adapter_name}...`"));
        tracing::info!(
            actor,
            adapter = %adapter_name,
            capability = %request.capability,
            resolution = %resolution,
            "generation started"
        );
        let max_attempts = self.config.job_retry.max_attempts();
        let result = retry_with(
            self.config.job_retry,
            |_| self.engine.run(&**adapter, &params),
            GenerationError::is_retryable,
            |attempt, err| {
                tracing::warn!(actor, adapter = %adapter_name, attempt, error = %err, "generation attempt failed");
                surface.notice(&format!(
                    "> `Generation failed, retrying ({}/{max_attempts})...`",
                    attempt + 1
                ));
            },
        );

        match result {
            Ok(url) => {
                surface.deliver(Artifact::url(
                    url.clone(),
                    ArtifactMetadata {
                        prompt_echo: params.prompt.clone(),
                        model_used: adapter_name,
                    },
                ));
                Ok(url)
            }
            Err(exhausted) => Err(report(surface, exhausted.into_generation_error())),
        }
    }

    /// Streams a model reply to `message`. `Ok(None)` means nothing was sent.
    pub fn chat(
        &self,
        actor: &str,
        message: ChatMessage,
        surface: &mut dyn ResponseSurface,
    ) -> Result<Option<StreamOutcome>, GenerationError> {
        self.check_access(actor, surface)?;
        let text = message.text.trim().to_string();
        if text.is_empty() && message.attachments.is_empty() {
            surface.notice(EMPTY_MESSAGE_NOTICE);
            return Ok(None);
        }
        let Some(_permit) = self.gate.admit(actor) else {
            surface.failure(BUSY_NOTICE);
            return Err(GenerationError::Busy);
        };
        let stream = self.register_stream(actor);
        let cancel = stream.token.clone();

        let prefs = self.preferences.get(actor);
        let input = match self.compose_input(&text, &message.attachments, &prefs, surface) {
            Ok(input) => input,
            Err(err) => return Err(report(surface, err)),
        };

        let history = self.history.snapshot(actor);
        let turn = StreamTurn {
            actor,
            input: &text,
            char_budget: prefs.style.char_budget(),
            metadata: ArtifactMetadata {
                prompt_echo: text.clone(),
                model_used: self.model.name().to_string(),
            },
        };
        let outcome = if cancel.is_cancelled() {
            tracing::info!(actor, "chat cancelled before the model was called");
            Ok(StreamOutcome::Cancelled)
        } else {
            self.aggregator.run(turn, surface, &cancel, || {
                self.model.stream_chat(&history, &input, None)
            })
        };
        drop(stream);

        let (status, detail) = match &outcome {
            Ok(StreamOutcome::Inline(text)) => ("inline", json!(text.chars().count())),
            Ok(StreamOutcome::Attached(text)) => ("attached", json!(text.chars().count())),
            Ok(StreamOutcome::Cancelled) => ("cancelled", json!(0)),
            Err(err) => ("failed", json!(err.to_string())),
        };
        let payload = map_object(json!({ "actor": actor, "outcome": status, "detail": detail }));
        if let Err(err) = self.events().emit("chat_turn", payload) {
            tracing::warn!(error = %err, "failed to record chat event");
        }
        outcome.map(Some)
    }

    /// Signals the actor's in-progress chat stream to stop.
    pub fn cancel(&self, actor: &str) -> bool {
        match self.lock_streams().get(actor) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn clear_history(&self, actor: &str) -> bool {
        self.history.clear(actor)
    }

    pub fn export_history(&self, actor: &str) -> Option<String> {
        self.history.export_text(actor)
    }

    pub fn select_adapter(
        &self,
        actor: &str,
        capability: Capability,
        name: &str,
    ) -> Result<String, GenerationError> {
        let spec = self.selector.catalog.ensure(name, capability).ok_or_else(|| {
            GenerationError::UnsupportedSelection(format!(
                "unknown {capability} adapter '{name}' (available: {})",
                self.adapter_names(capability).join(", ")
            ))
        })?;
        match capability {
            Capability::Image => {
                self.preferences.set_image_adapter(actor, &spec.name);
            }
            Capability::Speech => {
                self.preferences.set_speech_adapter(actor, &spec.name);
            }
            Capability::Music | Capability::Video => {
                return Err(GenerationError::UnsupportedSelection(format!(
                    "{capability} has a single adapter"
                )))
            }
        }
        Ok(spec.name)
    }

    pub fn set_resolution(&self, actor: &str, raw: &str) -> Result<Resolution, GenerationError> {
        let resolution = raw.parse::<Resolution>()?;
        self.preferences.set_resolution(actor, resolution);
        Ok(resolution)
    }

    pub fn should_respond(&self, message: &MessageContext<'_>) -> bool {
        self.config.access.is_allowed(message.actor) && self.channels.should_respond(message)
    }

    fn compose_input(
        &self,
        text: &str,
        attachments: &[Document],
        prefs: &UserPreferences,
        surface: &mut dyn ResponseSurface,
    ) -> Result<ModelInput, GenerationError> {
        let mut composed = match prefs.instructions.as_deref() {
            Some(instructions) => format!("[Instructions To Follow]: {instructions}\n\n[User]: {text}"),
            None => text.to_string(),
        };
        if prefs.url_mode.is_on() && !extract::extract_urls(text).is_empty() {
            surface.notice("> `Fetching content from the URLs...`");
            composed = compose_with_urls(self.extractor.as_ref(), &composed, self.config.page_timeout);
        }

        let (images, others): (Vec<&Document>, Vec<&Document>) =
            attachments.iter().partition(|document| document.is_image());
        let (documents, skipped): (Vec<Document>, Vec<Document>) = others
            .into_iter()
            .cloned()
            .partition(|document| document.is_text());
        for document in &skipped {
            tracing::debug!(name = %document.name, "skipping unsupported attachment");
        }
        if !documents.is_empty() {
            surface.notice("> `Processing your document(s)...`");
            composed = append_documents(self.extractor.as_ref(), &composed, &documents)?;
        }

        let mut inline_images = Vec::with_capacity(images.len());
        for image in images {
            let bytes = self.extractor.read_bytes(image)?;
            let mime = image.mime_type.clone().unwrap_or_else(|| "image/png".to_string());
            inline_images.push(prepare_inline_image(bytes, &mime)?);
        }
        Ok(ModelInput {
            text: composed,
            images: inline_images,
        })
    }

    fn check_access(
        &self,
        actor: &str,
        surface: &mut dyn ResponseSurface,
    ) -> Result<(), GenerationError> {
        if self.config.access.is_allowed(actor) {
            return Ok(());
        }
        tracing::info!(actor, "request from blocked actor");
        Err(report(surface, GenerationError::Denied(actor.to_string())))
    }

    fn lock_streams(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancelToken>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register_stream(&self, actor: &str) -> StreamRegistration<'_> {
        let token = CancelToken::new();
        self.lock_streams().insert(actor.to_string(), token.clone());
        StreamRegistration {
            relay: self,
            actor: actor.to_string(),
            token,
        }
    }
}

/// Keeps an actor's cancel token reachable from [`Relay::cancel`] until dropped.
struct StreamRegistration<'a> {
    relay: &'a Relay,
    actor: String,
    token: CancelToken,
}

impl Drop for StreamRegistration<'_> {
    fn drop(&mut self) {
        self.relay.lock_streams().remove(&self.actor);
    }
}

fn report(surface: &mut dyn ResponseSurface, err: GenerationError) -> GenerationError {
    let message = match err.root() {
        GenerationError::Compression(_) => {
            "The image is too large to process even after compressing it.".to_string()
        }
        GenerationError::Denied(_) => "You are not allowed to use this bot.".to_string(),
        _ => format!("Error: {err}"),
    };
    surface.failure(&message);
    err
}

/// Saves a delivered artifact under `out_dir` with a name derived from its URL.
pub fn download_artifact(url: &str, out_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    let path = out_dir.join(artifact_file_name(url));
    let response = HttpClient::new()
        .get(url)
        .send()
        .with_context(|| format!("artifact download failed ({url})"))?;
    if !response.status().is_success() {
        anyhow::bail!(
            "artifact download failed ({}): {url}",
            response.status().as_u16()
        );
    }
    let bytes = response
        .bytes()
        .with_context(|| format!("artifact body read failed ({url})"))?;
    fs::write(&path, &bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn artifact_file_name(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|ch| ch.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "bin".to_string());
    format!("artifact-{}.{ext}", hex::encode(&digest[..6]))
}
