use std::time::Duration;

use genrelay_contracts::adapters::{AdapterTable, NamedAdapter};
use genrelay_contracts::job::{Capability, Dimensions, JobParameters, Resolution, SpeechLanguage};
use genrelay_contracts::tokens::nonce;
use genrelay_contracts::GenerationError;
use serde_json::{json, Value};

use crate::transport::{ChannelDescriptor, SubmitCall};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Push,
    Duplex,
    Poll,
    Inline,
}

/// What a backend message means to the job state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    SendHash,
    SendData,
    Progress,
    Completed,
    Rejected(String),
    Ignored,
}

/// Replies a duplex backend expects during the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeReplies {
    pub hash: Value,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub warmups: Vec<SubmitCall>,
    pub submit: Option<SubmitCall>,
    pub channel: ChannelDescriptor,
    pub handshake: Option<HandshakeReplies>,
}

/// Backend-specific request building and result extraction.
pub trait JobAdapter: NamedAdapter + Send + Sync {
    fn capability(&self) -> Capability;
    fn transport(&self) -> TransportKind;
    fn resolutions(&self) -> Vec<Resolution>;
    fn build_request(
        &self,
        params: &JobParameters,
        token: &str,
    ) -> Result<JobRequest, GenerationError>;
    fn extract_result(&self, message: &Value) -> Option<String>;

    fn classify(&self, message: &Value) -> MessageKind {
        classify_queue_message(message)
    }
}

/// Reads the `msg` tag of a hosted-queue message.
pub fn classify_queue_message(message: &Value) -> MessageKind {
    match message.get("msg").and_then(Value::as_str).unwrap_or_default() {
        "send_hash" => MessageKind::SendHash,
        "send_data" => MessageKind::SendData,
        "estimation" | "process_starts" | "progress" | "process_generating" => {
            MessageKind::Progress
        }
        "process_completed" => MessageKind::Completed,
        "queue_full" => MessageKind::Rejected("backend queue is full".to_string()),
        "unexpected_error" => MessageKind::Rejected(
            message
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("backend reported an unexpected error")
                .to_string(),
        ),
        _ => MessageKind::Ignored,
    }
}

/// Settings shared by adapters that embed them in payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterSettings {
    pub negative_prompt: String,
    pub music_banner_url: String,
    pub openai_api_key: Option<String>,
    pub openai_api_base: String,
    pub replicate_api_token: Option<String>,
    pub replicate_api_base: String,
}

pub const DEFAULT_NEGATIVE_PROMPT: &str = "(deformed, distorted, disfigured:1.3), poorly drawn, bad anatomy, wrong anatomy, extra limb, missing limb, floating limbs, (mutated hands and fingers:1.4), disconnected limbs, mutation, mutated, ugly, disgusting, blurry, amputation, (NSFW:1.25)";

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            music_banner_url: String::new(),
            openai_api_key: None,
            openai_api_base: "https://api.openai.com/v1".to_string(),
            replicate_api_token: None,
            replicate_api_base: "https://api.replicate.com/v1".to_string(),
        }
    }
}

/// Inputs a payload builder may draw on.
pub struct PayloadContext<'a> {
    pub prompt: &'a str,
    pub dimensions: Option<Dimensions>,
    pub seed: u64,
    pub language: SpeechLanguage,
    pub settings: &'a AdapterSettings,
}

type PayloadBuilder = fn(&PayloadContext<'_>) -> Vec<Value>;

const STANDARD_SIZES: &[(Resolution, Dimensions)] = &[
    (Resolution::Square, Dimensions::new(1024, 1024)),
    (Resolution::Wide, Dimensions::new(1280, 768)),
    (Resolution::Portrait, Dimensions::new(768, 1280)),
];
const ANIME_SIZES: &[(Resolution, Dimensions)] = &[
    (Resolution::Square, Dimensions::new(1024, 1024)),
    (Resolution::Wide, Dimensions::new(1152, 896)),
    (Resolution::Portrait, Dimensions::new(896, 1152)),
];
const SQUARE_SIZE: &[(Resolution, Dimensions)] =
    &[(Resolution::Square, Dimensions::new(1024, 1024))];

/// A call sent before the enqueue request.
#[derive(Debug, Clone, Copy)]
struct Warmup {
    fn_index: u32,
    trigger_id: u32,
    data: fn() -> Vec<Value>,
}

/// Adapter for hosted inference queues (`queue/join` + `queue/data`).
#[derive(Debug, Clone)]
pub struct GradioAdapter {
    name: &'static str,
    capability: Capability,
    base_url: &'static str,
    transport: TransportKind,
    fn_index: u32,
    trigger_id: Option<u32>,
    hash_fn_index: u32,
    sizes: &'static [(Resolution, Dimensions)],
    payload: PayloadBuilder,
    result_pointer: &'static str,
    file_prefixed: bool,
    warmup: Option<Warmup>,
    settings: AdapterSettings,
}

impl GradioAdapter {
    #[allow(clippy::too_many_arguments)]
    fn push(
        name: &'static str,
        capability: Capability,
        base_url: &'static str,
        fn_index: u32,
        trigger_id: u32,
        payload: PayloadBuilder,
        result_pointer: &'static str,
        settings: &AdapterSettings,
    ) -> Self {
        Self {
            name,
            capability,
            base_url,
            transport: TransportKind::Push,
            fn_index,
            trigger_id: Some(trigger_id),
            hash_fn_index: fn_index,
            sizes: &[],
            payload,
            result_pointer,
            file_prefixed: false,
            warmup: None,
            settings: settings.clone(),
        }
    }

    fn with_sizes(mut self, sizes: &'static [(Resolution, Dimensions)]) -> Self {
        self.sizes = sizes;
        self
    }

    fn with_warmup(mut self, warmup: Warmup) -> Self {
        self.warmup = Some(warmup);
        self
    }

    /// Turns the adapter into a websocket handshake adapter.
    fn duplex(mut self, hash_fn_index: u32) -> Self {
        self.transport = TransportKind::Duplex;
        self.trigger_id = None;
        self.hash_fn_index = hash_fn_index;
        self
    }

    fn file_prefixed(mut self) -> Self {
        self.file_prefixed = true;
        self
    }

    fn dimensions(&self, resolution: Resolution) -> Result<Option<Dimensions>, GenerationError> {
        if self.capability != Capability::Image {
            return Ok(None);
        }
        self.sizes
            .iter()
            .find(|(candidate, _)| *candidate == resolution)
            .map(|(_, dims)| Some(*dims))
            .ok_or_else(|| {
                GenerationError::UnsupportedSelection(format!(
                    "{} does not support {resolution}",
                    self.name
                ))
            })
    }

    fn queue_body(&self, data: Vec<Value>, fn_index: u32, trigger_id: Option<u32>, token: &str) -> Value {
        let mut body = json!({
            "data": data,
            "event_data": Value::Null,
            "fn_index": fn_index,
            "session_hash": token,
        });
        if let (Some(trigger), Some(object)) = (trigger_id, body.as_object_mut()) {
            object.insert("trigger_id".to_string(), json!(trigger));
        }
        body
    }

    fn socket_url(&self) -> String {
        let host = self
            .base_url
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        format!("wss://{host}/queue/join")
    }
}

impl NamedAdapter for GradioAdapter {
    fn name(&self) -> &str {
        self.name
    }
}

impl JobAdapter for GradioAdapter {
    fn capability(&self) -> Capability {
        self.capability
    }

    fn transport(&self) -> TransportKind {
        self.transport
    }

    fn resolutions(&self) -> Vec<Resolution> {
        self.sizes.iter().map(|(resolution, _)| *resolution).collect()
    }

    fn build_request(
        &self,
        params: &JobParameters,
        token: &str,
    ) -> Result<JobRequest, GenerationError> {
        let context = PayloadContext {
            prompt: &params.prompt,
            dimensions: self.dimensions(params.resolution)?,
            seed: nonce(),
            language: params.language,
            settings: &self.settings,
        };
        let data = (self.payload)(&context);

        if self.transport == TransportKind::Duplex {
            return Ok(JobRequest {
                warmups: Vec::new(),
                submit: None,
                channel: ChannelDescriptor::Socket {
                    url: self.socket_url(),
                },
                handshake: Some(HandshakeReplies {
                    hash: json!({
                        "fn_index": self.hash_fn_index,
                        "session_hash": token,
                    }),
                    data: self.queue_body(data, self.fn_index, None, token),
                }),
            });
        }

        let warmups = self
            .warmup
            .map(|warmup| {
                SubmitCall::new(
                    format!("{}/run/predict", self.base_url),
                    self.queue_body((warmup.data)(), warmup.fn_index, Some(warmup.trigger_id), token),
                )
            })
            .into_iter()
            .collect();
        Ok(JobRequest {
            warmups,
            submit: Some(SubmitCall::new(
                format!("{}/queue/join", self.base_url),
                self.queue_body(data, self.fn_index, self.trigger_id, token),
            )),
            channel: ChannelDescriptor::EventStream {
                url: format!("{}/queue/data?session_hash={token}", self.base_url),
            },
            handshake: None,
        })
    }

    fn extract_result(&self, message: &Value) -> Option<String> {
        let value = message
            .pointer(self.result_pointer)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())?;
        if self.file_prefixed {
            return Some(format!("{}/file={value}", self.base_url));
        }
        Some(value.to_string())
    }
}

/// OpenAI images API; the submit response carries the result.
#[derive(Debug, Clone)]
pub struct OpenAiImagesAdapter {
    settings: AdapterSettings,
}

const OPENAI_IMAGE_TIMEOUT: Duration = Duration::from_secs(30);

impl OpenAiImagesAdapter {
    fn size_label(resolution: Resolution) -> &'static str {
        match resolution {
            Resolution::Square => "1024x1024",
            Resolution::Wide => "1792x1024",
            Resolution::Portrait => "1024x1792",
        }
    }
}

impl NamedAdapter for OpenAiImagesAdapter {
    fn name(&self) -> &str {
        "DallE-3"
    }
}

impl JobAdapter for OpenAiImagesAdapter {
    fn capability(&self) -> Capability {
        Capability::Image
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Inline
    }

    fn resolutions(&self) -> Vec<Resolution> {
        Resolution::ALL.to_vec()
    }

    fn build_request(
        &self,
        params: &JobParameters,
        _token: &str,
    ) -> Result<JobRequest, GenerationError> {
        let Some(api_key) = self.settings.openai_api_key.as_deref() else {
            return Err(GenerationError::UnsupportedSelection(
                "DallE-3 requires OPENAI_API_KEY".to_string(),
            ));
        };
        let payload = json!({
            "model": "dall-e-3",
            "prompt": params.prompt,
            "n": 1,
            "size": Self::size_label(params.resolution),
        });
        Ok(JobRequest {
            warmups: Vec::new(),
            submit: Some(
                SubmitCall::new(
                    format!("{}/images/generations", self.settings.openai_api_base),
                    payload,
                )
                .with_bearer(api_key)
                .with_timeout(OPENAI_IMAGE_TIMEOUT),
            ),
            channel: ChannelDescriptor::Inline,
            handshake: None,
        })
    }

    fn classify(&self, message: &Value) -> MessageKind {
        if message.get("data").is_some() {
            return MessageKind::Completed;
        }
        if let Some(error) = message.get("error") {
            return MessageKind::Rejected(
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("image request rejected")
                    .to_string(),
            );
        }
        MessageKind::Ignored
    }

    fn extract_result(&self, message: &Value) -> Option<String> {
        message
            .pointer("/data/0/url")
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string)
    }
}

/// Replicate predictions API; the job is tracked by polling its status URL.
#[derive(Debug, Clone)]
pub struct ReplicateAdapter {
    settings: AdapterSettings,
    model: String,
}

const REPLICATE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const REPLICATE_POLL_TIMEOUT: Duration = Duration::from_secs(120);

impl ReplicateAdapter {
    fn extract_output_urls(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::String(url) => {
                let trimmed = url.trim();
                if trimmed.starts_with("http") && !out.iter().any(|existing| existing == trimmed) {
                    out.push(trimmed.to_string());
                }
            }
            Value::Array(rows) => {
                for row in rows {
                    Self::extract_output_urls(row, out);
                }
            }
            Value::Object(obj) => {
                if let Some(url) = obj.get("url") {
                    Self::extract_output_urls(url, out);
                }
            }
            _ => {}
        }
    }
}

impl NamedAdapter for ReplicateAdapter {
    fn name(&self) -> &str {
        "Replicate-SDXL"
    }
}

impl JobAdapter for ReplicateAdapter {
    fn capability(&self) -> Capability {
        Capability::Image
    }

    fn transport(&self) -> TransportKind {
        TransportKind::Poll
    }

    fn resolutions(&self) -> Vec<Resolution> {
        STANDARD_SIZES.iter().map(|(resolution, _)| *resolution).collect()
    }

    fn build_request(
        &self,
        params: &JobParameters,
        _token: &str,
    ) -> Result<JobRequest, GenerationError> {
        let Some(api_token) = self.settings.replicate_api_token.as_deref() else {
            return Err(GenerationError::UnsupportedSelection(
                "Replicate-SDXL requires REPLICATE_API_TOKEN".to_string(),
            ));
        };
        let dims = STANDARD_SIZES
            .iter()
            .find(|(resolution, _)| *resolution == params.resolution)
            .map(|(_, dims)| *dims)
            .unwrap_or(Dimensions::new(1024, 1024));
        let payload = json!({
            "model": self.model,
            "input": {
                "prompt": params.prompt,
                "negative_prompt": self.settings.negative_prompt,
                "width": dims.width,
                "height": dims.height,
                "seed": nonce(),
            },
        });
        Ok(JobRequest {
            warmups: Vec::new(),
            submit: Some(
                SubmitCall::new(
                    format!("{}/predictions", self.settings.replicate_api_base),
                    payload,
                )
                .with_bearer(api_token),
            ),
            channel: ChannelDescriptor::Poll {
                url_pointer: "/urls/get".to_string(),
                bearer: Some(api_token.to_string()),
                interval: REPLICATE_POLL_INTERVAL,
                timeout: REPLICATE_POLL_TIMEOUT,
            },
            handshake: None,
        })
    }

    fn classify(&self, message: &Value) -> MessageKind {
        let status = message
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match status.as_str() {
            "succeeded" => MessageKind::Completed,
            "failed" | "canceled" => MessageKind::Rejected(
                message
                    .get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("prediction {status}")),
            ),
            "starting" | "processing" => MessageKind::Progress,
            _ => MessageKind::Ignored,
        }
    }

    fn extract_result(&self, message: &Value) -> Option<String> {
        let mut urls = Vec::new();
        if let Some(output) = message.get("output") {
            Self::extract_output_urls(output, &mut urls);
        }
        urls.into_iter().next()
    }
}

fn dims_or_square(context: &PayloadContext<'_>) -> Dimensions {
    context.dimensions.unwrap_or(Dimensions::new(1024, 1024))
}

fn dalle_xl_payload(context: &PayloadContext<'_>) -> Vec<Value> {
    let dims = dims_or_square(context);
    vec![
        json!(context.prompt),
        json!(context.settings.negative_prompt),
        json!(true),
        json!(context.seed),
        json!(dims.width),
        json!(dims.height),
        json!(6),
        json!(true),
    ]
}

fn sdxl_lightning_payload(context: &PayloadContext<'_>) -> Vec<Value> {
    vec![json!(context.prompt), json!("8-Step")]
}

fn tcd_payload(context: &PayloadContext<'_>) -> Vec<Value> {
    vec![json!(context.prompt), json!(10), json!(-1), json!(0.5)]
}

fn kandinsky_payload(context: &PayloadContext<'_>) -> Vec<Value> {
    let dims = dims_or_square(context);
    vec![
        json!(context.prompt),
        json!(dims.width.to_string()),
        json!(dims.height.to_string()),
    ]
}

fn anime_payload(context: &PayloadContext<'_>) -> Vec<Value> {
    let dims = dims_or_square(context);
    vec![
        json!(context.prompt),
        json!(format!("(rating_explicit:1.2), {}", context.settings.negative_prompt)),
        json!(context.seed),
        json!(1024),
        json!(1024),
        json!(7),
        json!(28),
        json!("Euler a"),
        json!(format!("{} x {}", dims.width, dims.height)),
        json!("(None)"),
        json!("Standard v3.1"),
        json!(false),
        json!(0.55),
        json!(1.5),
        json!(true),
    ]
}

fn cascade_warmup_data() -> Vec<Value> {
    vec![json!(0), json!(true)]
}

fn cascade_payload(context: &PayloadContext<'_>) -> Vec<Value> {
    let dims = dims_or_square(context);
    vec![
        json!(context.prompt),
        json!(context.settings.negative_prompt),
        json!(context.seed),
        json!(dims.width),
        json!(dims.height),
        json!(30),
        json!(4),
        json!(12),
        json!(0),
        json!(1),
    ]
}

fn pixart_payload(context: &PayloadContext<'_>) -> Vec<Value> {
    let dims = dims_or_square(context);
    vec![
        json!(context.prompt),
        json!(context.settings.negative_prompt),
        json!("(No style)"),
        json!(true),
        json!(1),
        json!(context.seed),
        json!(dims.width),
        json!(dims.height),
        json!("SA-Solver"),
        json!(4.5),
        json!(3),
        json!(14),
        json!(35),
        json!(true),
    ]
}

fn melotts_payload(context: &PayloadContext<'_>) -> Vec<Value> {
    vec![
        json!(context.language.speaker()),
        json!(context.prompt),
        json!(1),
        json!(context.language.code()),
    ]
}

fn musicgen_payload(context: &PayloadContext<'_>) -> Vec<Value> {
    vec![
        json!("large"),
        json!(context.prompt),
        Value::Null,
        json!(30),
        json!(2),
        json!(280),
        json!(1150),
        json!(0.7),
        json!(8.5),
        json!(context.settings.music_banner_url),
        json!("MusicGen"),
        json!("./assets/arial.ttf"),
        json!("#fff"),
        json!(-1),
        json!(2),
        json!(0),
        json!(true),
        json!(false),
        json!("No"),
    ]
}

fn animatediff_payload(context: &PayloadContext<'_>) -> Vec<Value> {
    vec![json!(context.prompt), json!("epiCRealism"), json!(""), json!(8)]
}

pub fn default_adapter_table(settings: &AdapterSettings) -> AdapterTable<Box<dyn JobAdapter>> {
    let image = Capability::Image;
    let mut table: AdapterTable<Box<dyn JobAdapter>> = AdapterTable::default();
    table.register(Box::new(
        GradioAdapter::push(
            "DallE-XL",
            image,
            "https://ehristoforu-dalle-3-xl-lora-v2.hf.space",
            3,
            6,
            dalle_xl_payload,
            "/output/data/0/0/image/url",
            settings,
        )
        .with_sizes(STANDARD_SIZES),
    ));
    table.register(Box::new(
        GradioAdapter::push(
            "SD-XL-Alt",
            image,
            "https://ap123-sdxl-lightning.hf.space",
            1,
            7,
            sdxl_lightning_payload,
            "/output/data/0/url",
            settings,
        )
        .with_sizes(SQUARE_SIZE),
    ));
    table.register(Box::new(
        GradioAdapter::push(
            "SD-XL-Alt2",
            image,
            "https://h1t-tcd.hf.space",
            2,
            17,
            tcd_payload,
            "/output/data/0/url",
            settings,
        )
        .with_sizes(SQUARE_SIZE),
    ));
    table.register(Box::new(
        GradioAdapter::push(
            "Kandinsky",
            image,
            "https://ehristoforu-kandinsky-api.hf.space",
            0,
            4,
            kandinsky_payload,
            "/output/data/0/0/image/url",
            settings,
        )
        .with_sizes(STANDARD_SIZES),
    ));
    table.register(Box::new(
        GradioAdapter::push(
            "Anime",
            image,
            "https://cagliostrolab-animagine-xl-3-1.hf.space",
            5,
            49,
            anime_payload,
            "/output/data/0/0/image/url",
            settings,
        )
        .with_sizes(ANIME_SIZES),
    ));
    table.register(Box::new(
        GradioAdapter::push(
            "Stable-Cascade",
            image,
            "https://multimodalart-stable-cascade.hf.space",
            3,
            6,
            cascade_payload,
            "/output/data/0/url",
            settings,
        )
        .with_sizes(STANDARD_SIZES)
        .with_warmup(Warmup {
            fn_index: 2,
            trigger_id: 6,
            data: cascade_warmup_data,
        }),
    ));
    table.register(Box::new(
        GradioAdapter::push(
            "PixArt-Sigma",
            image,
            "https://pixart-alpha-pixart-sigma.hf.space",
            3,
            7,
            pixart_payload,
            "/output/data/0/0/image/url",
            settings,
        )
        .with_sizes(STANDARD_SIZES),
    ));
    table.register(Box::new(OpenAiImagesAdapter {
        settings: settings.clone(),
    }));
    table.register(Box::new(ReplicateAdapter {
        settings: settings.clone(),
        model: "stability-ai/sdxl".to_string(),
    }));
    table.register(Box::new(GradioAdapter::push(
        "MeloTTS",
        Capability::Speech,
        "https://mrfakename-melotts.hf.space",
        1,
        8,
        melotts_payload,
        "/output/data/0/url",
        settings,
    )));
    table.register(Box::new(
        GradioAdapter::push(
            "MusicGen",
            Capability::Music,
            "https://surn-unlimitedmusicgen.hf.space",
            5,
            0,
            musicgen_payload,
            "/output/data/0/0/name",
            settings,
        )
        .duplex(0)
        .file_prefixed(),
    ));
    table.register(Box::new(GradioAdapter::push(
        "AnimateDiff",
        Capability::Video,
        "https://bytedance-animatediff-lightning.hf.space",
        1,
        10,
        animatediff_payload,
        "/output/data/0/video/url",
        settings,
    )));
    table
}

#[cfg(test)]
mod tests {
    use genrelay_contracts::adapters::AdapterCatalog;

    use super::*;

    fn table() -> AdapterTable<Box<dyn JobAdapter>> {
        default_adapter_table(&AdapterSettings::default())
    }

    fn submit_data(request: &JobRequest) -> Vec<Value> {
        request
            .submit
            .as_ref()
            .and_then(|call| call.payload.get("data"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    #[test]
    fn dalle_xl_wide_maps_to_1280_by_768() {
        let table = table();
        let adapter = table.get("DallE-XL").unwrap();
        let request = adapter
            .build_request(
                &JobParameters::new("a lighthouse").with_resolution(Resolution::Wide),
                "aB3dE",
            )
            .unwrap();
        let data = submit_data(&request);
        assert_eq!(data[4], json!(1280));
        assert_eq!(data[5], json!(768));
        let seed = data[3].as_u64().unwrap();
        assert!((100_000_000..=999_999_999).contains(&seed));

        let call = request.submit.unwrap();
        assert_eq!(
            call.url,
            "https://ehristoforu-dalle-3-xl-lora-v2.hf.space/queue/join"
        );
        assert_eq!(call.payload["fn_index"], json!(3));
        assert_eq!(call.payload["trigger_id"], json!(6));
        assert_eq!(call.payload["session_hash"], json!("aB3dE"));
        assert_eq!(
            request.channel,
            ChannelDescriptor::EventStream {
                url: "https://ehristoforu-dalle-3-xl-lora-v2.hf.space/queue/data?session_hash=aB3dE"
                    .to_string()
            }
        );
    }

    #[test]
    fn anime_uses_size_labels() {
        let table = table();
        let request = table
            .get("Anime")
            .unwrap()
            .build_request(
                &JobParameters::new("cat girl").with_resolution(Resolution::Wide),
                "tok01",
            )
            .unwrap();
        assert_eq!(submit_data(&request)[8], json!("1152 x 896"));
    }

    #[test]
    fn square_only_adapter_rejects_wide() {
        let table = table();
        let err = table
            .get("SD-XL-Alt")
            .unwrap()
            .build_request(
                &JobParameters::new("x").with_resolution(Resolution::Wide),
                "tok01",
            )
            .unwrap_err();
        assert!(matches!(err, GenerationError::UnsupportedSelection(_)));
    }

    #[test]
    fn cascade_sends_warmup_before_enqueue() {
        let table = table();
        let request = table
            .get("Stable-Cascade")
            .unwrap()
            .build_request(&JobParameters::new("x"), "tok01")
            .unwrap();
        assert_eq!(request.warmups.len(), 1);
        assert_eq!(
            request.warmups[0].url,
            "https://multimodalart-stable-cascade.hf.space/run/predict"
        );
        assert_eq!(request.warmups[0].payload["data"], json!([0, true]));
    }

    #[test]
    fn music_uses_duplex_handshake() {
        let table = table();
        let adapter = table.get("MusicGen").unwrap();
        let request = adapter
            .build_request(&JobParameters::new("lofi beats"), "tok01")
            .unwrap();
        assert!(request.submit.is_none());
        assert_eq!(
            request.channel,
            ChannelDescriptor::Socket {
                url: "wss://surn-unlimitedmusicgen.hf.space/queue/join".to_string()
            }
        );
        let handshake = request.handshake.unwrap();
        assert_eq!(handshake.hash, json!({"fn_index": 0, "session_hash": "tok01"}));
        assert_eq!(handshake.data["fn_index"], json!(5));
        assert_eq!(handshake.data["data"][1], json!("lofi beats"));
        assert!(handshake.data.get("trigger_id").is_none());

        let completed = json!({
            "msg": "process_completed",
            "output": {"data": [[{"name": "/tmp/out.mp4"}]]}
        });
        assert_eq!(
            adapter.extract_result(&completed).as_deref(),
            Some("https://surn-unlimitedmusicgen.hf.space/file=/tmp/out.mp4")
        );
    }

    #[test]
    fn speech_payload_uses_language_codes() {
        let table = table();
        let request = table
            .get("MeloTTS")
            .unwrap()
            .build_request(
                &JobParameters::new("hola").with_language(SpeechLanguage::Spanish),
                "tok01",
            )
            .unwrap();
        assert_eq!(
            submit_data(&request),
            vec![json!("ES"), json!("hola"), json!(1), json!("ES")]
        );
    }

    #[test]
    fn keyed_apis_require_credentials() {
        let table = table();
        for name in ["DallE-3", "Replicate-SDXL"] {
            let err = table
                .get(name)
                .unwrap()
                .build_request(&JobParameters::new("x"), "tok01")
                .unwrap_err();
            assert!(matches!(err, GenerationError::UnsupportedSelection(_)), "{name}");
        }
    }

    #[test]
    fn replicate_polls_status_url() {
        let adapter = ReplicateAdapter {
            settings: AdapterSettings {
                replicate_api_token: Some("r8_test".to_string()),
                ..AdapterSettings::default()
            },
            model: "stability-ai/sdxl".to_string(),
        };
        let request = adapter
            .build_request(
                &JobParameters::new("x").with_resolution(Resolution::Portrait),
                "tok01",
            )
            .unwrap();
        let call = request.submit.unwrap();
        assert_eq!(call.bearer.as_deref(), Some("r8_test"));
        assert_eq!(call.payload["input"]["height"], json!(1280));
        assert!(matches!(request.channel, ChannelDescriptor::Poll { .. }));

        assert_eq!(
            adapter.classify(&json!({"status": "processing"})),
            MessageKind::Progress
        );
        let done = json!({"status": "succeeded", "output": ["https://cdn.test/a.png"]});
        assert_eq!(adapter.classify(&done), MessageKind::Completed);
        assert_eq!(
            adapter.extract_result(&done).as_deref(),
            Some("https://cdn.test/a.png")
        );
    }

    #[test]
    fn implementations_match_catalog() {
        let table = table();
        let catalog = AdapterCatalog::default();
        for spec in catalog.list() {
            let adapter = table
                .get(&spec.name)
                .unwrap_or_else(|| panic!("missing adapter {}", spec.name));
            assert_eq!(adapter.capability(), spec.capability, "{}", spec.name);
            if spec.capability == Capability::Image {
                assert_eq!(adapter.resolutions(), spec.resolutions, "{}", spec.name);
            }
        }
        assert_eq!(table.adapters().len(), catalog.list().count());
    }

    #[test]
    fn queue_messages_are_classified() {
        assert_eq!(
            classify_queue_message(&json!({"msg": "send_hash"})),
            MessageKind::SendHash
        );
        assert_eq!(
            classify_queue_message(&json!({"msg": "estimation", "rank": 2})),
            MessageKind::Progress
        );
        assert_eq!(
            classify_queue_message(&json!({"msg": "heartbeat"})),
            MessageKind::Ignored
        );
        assert!(matches!(
            classify_queue_message(&json!({"msg": "queue_full"})),
            MessageKind::Rejected(_)
        ));
    }
}
