use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use genrelay_contracts::GenerationError;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{connect as websocket_connect, Message as WsMessage, WebSocket};

use crate::util::{error_chain_text, response_json_or_error};

const ERROR_TEXT_MAX_CHARS: usize = 512;

/// One HTTP POST with a JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitCall {
    pub url: String,
    pub payload: Value,
    pub bearer: Option<String>,
    pub timeout: Option<Duration>,
}

impl SubmitCall {
    pub fn new(url: impl Into<String>, payload: Value) -> Self {
        Self {
            url: url.into(),
            payload,
            bearer: None,
            timeout: None,
        }
    }

    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// How the status channel of a job is reached.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelDescriptor {
    /// Server-sent events read from a GET stream.
    EventStream { url: String },
    /// Websocket; connecting is the enqueue step.
    Socket { url: String },
    /// Repeated GETs of a status URL found in the submit response.
    Poll {
        url_pointer: String,
        bearer: Option<String>,
        interval: Duration,
        timeout: Duration,
    },
    /// The submit response is the only message.
    Inline,
}

/// A per-job message channel. `next_message` yields `None` once the channel is closed.
pub trait JobChannel: Send {
    fn next_message(&mut self) -> Result<Option<Value>, GenerationError>;
    fn send(&mut self, message: &Value) -> Result<(), GenerationError>;
    fn close(&mut self);
}

/// Network capability the protocol engine depends on.
pub trait ChannelConnector: Send + Sync {
    fn submit(&self, call: &SubmitCall) -> Result<Value, GenerationError>;
    fn open(
        &self,
        descriptor: &ChannelDescriptor,
        submit_response: Option<&Value>,
    ) -> Result<Box<dyn JobChannel>, GenerationError>;
}

pub struct HttpConnector {
    http: HttpClient,
}

impl HttpConnector {
    pub fn new() -> anyhow::Result<Self> {
        // Event streams stay open for the whole job, so no client-wide timeout.
        let http = HttpClient::builder()
            .timeout(None::<Duration>)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }
}

impl ChannelConnector for HttpConnector {
    fn submit(&self, call: &SubmitCall) -> Result<Value, GenerationError> {
        let mut request = self.http.post(&call.url).json(&call.payload);
        if let Some(token) = call.bearer.as_deref() {
            request = request.bearer_auth(token);
        }
        if let Some(timeout) = call.timeout {
            request = request.timeout(timeout);
        }
        request
            .send()
            .with_context(|| format!("submit request failed ({})", call.url))
            .and_then(|response| response_json_or_error("submit", response))
            .map_err(|err| GenerationError::Submit(error_chain_text(&err, ERROR_TEXT_MAX_CHARS)))
    }

    fn open(
        &self,
        descriptor: &ChannelDescriptor,
        submit_response: Option<&Value>,
    ) -> Result<Box<dyn JobChannel>, GenerationError> {
        match descriptor {
            ChannelDescriptor::EventStream { url } => {
                let response = self
                    .http
                    .get(url)
                    .header(reqwest::header::ACCEPT, "text/event-stream")
                    .send()
                    .with_context(|| format!("event stream request failed ({url})"))
                    .map_err(|err| {
                        GenerationError::Transport(error_chain_text(&err, ERROR_TEXT_MAX_CHARS))
                    })?;
                if !response.status().is_success() {
                    return Err(GenerationError::Transport(format!(
                        "event stream rejected ({}): {url}",
                        response.status().as_u16()
                    )));
                }
                Ok(Box::new(EventStreamChannel::new(response)))
            }
            ChannelDescriptor::Socket { url } => Ok(Box::new(SocketChannel::connect(url)?)),
            ChannelDescriptor::Poll {
                url_pointer,
                bearer,
                interval,
                timeout,
            } => {
                let first = submit_response.cloned();
                let url = first
                    .as_ref()
                    .and_then(|value| value.pointer(url_pointer))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        GenerationError::Transport(format!(
                            "submit response has no status URL at {url_pointer}"
                        ))
                    })?;
                Ok(Box::new(PollChannel {
                    http: self.http.clone(),
                    url,
                    bearer: bearer.clone(),
                    interval: *interval,
                    timeout: *timeout,
                    started: Instant::now(),
                    pending: first,
                    closed: false,
                }))
            }
            ChannelDescriptor::Inline => Ok(Box::new(InlineChannel::new(
                submit_response.cloned().unwrap_or(Value::Null),
            ))),
        }
    }
}

/// Parses `data:` lines of a server-sent event stream into JSON messages.
pub struct EventStreamReader<R: BufRead> {
    reader: R,
    closed: bool,
}

impl<R: BufRead> EventStreamReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            closed: false,
        }
    }

    /// Next JSON event payload; non-JSON events are skipped.
    pub fn next_event(&mut self) -> std::io::Result<Option<Value>> {
        let mut data = String::new();
        let mut line = String::new();
        loop {
            if self.closed {
                return Ok(None);
            }
            line.clear();
            let read = self.reader.read_line(&mut line)?;
            if read == 0 {
                self.closed = true;
                return Ok(parse_event_data(&data));
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                if let Some(value) = parse_event_data(&data) {
                    return Ok(Some(value));
                }
                data.clear();
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
            }
        }
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}

fn parse_event_data(data: &str) -> Option<Value> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

pub struct EventStreamChannel {
    events: EventStreamReader<BufReader<HttpResponse>>,
}

impl EventStreamChannel {
    fn new(response: HttpResponse) -> Self {
        Self {
            events: EventStreamReader::new(BufReader::new(response)),
        }
    }
}

impl JobChannel for EventStreamChannel {
    fn next_message(&mut self) -> Result<Option<Value>, GenerationError> {
        self.events
            .next_event()
            .map_err(|err| GenerationError::Transport(format!("event stream read failed: {err}")))
    }

    fn send(&mut self, _message: &Value) -> Result<(), GenerationError> {
        Err(GenerationError::Transport(
            "event streams are receive-only".to_string(),
        ))
    }

    fn close(&mut self) {
        self.events.close();
    }
}

pub struct SocketChannel {
    ws: WebSocket<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

impl SocketChannel {
    fn connect(url: &str) -> Result<Self, GenerationError> {
        let (ws, _) = websocket_connect(url)
            .map_err(|err| GenerationError::Submit(format!("websocket connect failed ({url}): {err}")))?;
        Ok(Self { ws, closed: false })
    }
}

impl JobChannel for SocketChannel {
    fn next_message(&mut self) -> Result<Option<Value>, GenerationError> {
        while !self.closed {
            let message = match self.ws.read() {
                Ok(message) => message,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    self.closed = true;
                    return Ok(None);
                }
                Err(err) => {
                    return Err(GenerationError::Transport(format!(
                        "websocket read failed: {err}"
                    )))
                }
            };
            let raw = match message {
                WsMessage::Text(text) => text.to_string(),
                WsMessage::Binary(bytes) => String::from_utf8_lossy(&bytes).to_string(),
                WsMessage::Close(_) => {
                    self.closed = true;
                    return Ok(None);
                }
                _ => continue,
            };
            if let Ok(value) = serde_json::from_str::<Value>(&raw) {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn send(&mut self, message: &Value) -> Result<(), GenerationError> {
        let raw = serde_json::to_string(message)
            .map_err(|err| GenerationError::Transport(format!("payload encode failed: {err}")))?;
        self.ws
            .send(WsMessage::Text(raw.into()))
            .map_err(|err| GenerationError::Transport(format!("websocket send failed: {err}")))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.ws.close(None);
        let _ = self.ws.flush();
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct PollChannel {
    http: HttpClient,
    url: String,
    bearer: Option<String>,
    interval: Duration,
    timeout: Duration,
    started: Instant,
    pending: Option<Value>,
    closed: bool,
}

impl JobChannel for PollChannel {
    fn next_message(&mut self) -> Result<Option<Value>, GenerationError> {
        if self.closed {
            return Ok(None);
        }
        if let Some(first) = self.pending.take() {
            return Ok(Some(first));
        }
        if self.started.elapsed() >= self.timeout {
            return Err(GenerationError::Transport(format!(
                "polling timed out after {:.1}s",
                self.timeout.as_secs_f64()
            )));
        }
        thread::sleep(self.interval);
        let mut request = self.http.get(&self.url);
        if let Some(token) = self.bearer.as_deref() {
            request = request.bearer_auth(token);
        }
        request
            .send()
            .with_context(|| format!("poll request failed ({})", self.url))
            .and_then(|response| response_json_or_error("poll", response))
            .map(Some)
            .map_err(|err| {
                GenerationError::Transport(error_chain_text(&err, ERROR_TEXT_MAX_CHARS))
            })
    }

    fn send(&mut self, _message: &Value) -> Result<(), GenerationError> {
        Err(GenerationError::Transport(
            "poll channels are receive-only".to_string(),
        ))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Replays a fixed list of messages; also the shape of synchronous APIs.
#[derive(Debug, Default)]
pub struct InlineChannel {
    messages: VecDeque<Value>,
    sent: Vec<Value>,
    closed: bool,
}

impl InlineChannel {
    pub fn new(message: Value) -> Self {
        Self::scripted(vec![message])
    }

    pub fn scripted(messages: Vec<Value>) -> Self {
        Self {
            messages: messages.into(),
            sent: Vec::new(),
            closed: false,
        }
    }

    pub fn sent(&self) -> &[Value] {
        &self.sent
    }
}

impl JobChannel for InlineChannel {
    fn next_message(&mut self) -> Result<Option<Value>, GenerationError> {
        if self.closed {
            return Ok(None);
        }
        Ok(self.messages.pop_front())
    }

    fn send(&mut self, message: &Value) -> Result<(), GenerationError> {
        if self.closed {
            return Err(GenerationError::Transport("channel closed".to_string()));
        }
        self.sent.push(message.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
