use std::sync::Arc;

use genrelay_contracts::events::EventWriter;
use genrelay_contracts::job::{GenerationJob, JobParameters, JobStatus};
use genrelay_contracts::tokens::TokenRegistry;
use genrelay_contracts::{FailureKind, GenerationError};
use serde_json::{json, Value};

use crate::adapters::{HandshakeReplies, JobAdapter, JobRequest, MessageKind};
use crate::transport::{ChannelConnector, JobChannel};
use crate::util::map_object;

type StepFailure = (FailureKind, String);

/// Drives one generation job from submission to a terminal state.
///
/// Each run leases a correlation token, emits a `job_status` event per
/// transition and closes the job's channel on every exit path.
#[derive(Clone)]
pub struct JobProtocolEngine {
    connector: Arc<dyn ChannelConnector>,
    tokens: TokenRegistry,
    events: EventWriter,
}

impl JobProtocolEngine {
    pub fn new(connector: Arc<dyn ChannelConnector>, events: EventWriter) -> Self {
        Self {
            connector,
            tokens: TokenRegistry::new(),
            events,
        }
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn run(
        &self,
        adapter: &dyn JobAdapter,
        params: &JobParameters,
    ) -> Result<String, GenerationError> {
        let lease = self.tokens.lease();
        let request = adapter.build_request(params, lease.token())?;
        let mut job = GenerationJob::new(lease.token(), adapter.name(), params.clone());
        tracing::info!(
            token = %job.correlation_token,
            adapter = %job.adapter_id,
            "job created"
        );
        self.emit(&job, None, json!({ "prompt": params.prompt }));

        self.drive(adapter, &mut job, request);
        job.outcome().unwrap_or_else(|| {
            Err(GenerationError::Transport(format!(
                "job ended in non-terminal state {}",
                job.status().as_str()
            )))
        })
    }

    fn drive(&self, adapter: &dyn JobAdapter, job: &mut GenerationJob, request: JobRequest) {
        for warmup in &request.warmups {
            if let Err(err) = self.connector.submit(warmup) {
                self.finish_failed(job, FailureKind::SubmitError, err.to_string());
                return;
            }
        }

        let mut channel: Box<dyn JobChannel> = match request.submit.as_ref() {
            Some(call) => {
                let response = match self.connector.submit(call) {
                    Ok(response) => response,
                    Err(err) => {
                        self.finish_failed(job, FailureKind::SubmitError, err.to_string());
                        return;
                    }
                };
                self.transition(job, JobStatus::Submitted);
                match self.connector.open(&request.channel, Some(&response)) {
                    Ok(channel) => channel,
                    Err(err) => {
                        self.finish_failed(job, FailureKind::TransportError, err.to_string());
                        return;
                    }
                }
            }
            // Duplex backends enqueue on connect.
            None => match self.connector.open(&request.channel, None) {
                Ok(channel) => {
                    self.transition(job, JobStatus::Submitted);
                    channel
                }
                Err(err) => {
                    self.finish_failed(job, FailureKind::SubmitError, err.to_string());
                    return;
                }
            },
        };

        if request.handshake.is_some() {
            self.transition(job, JobStatus::AwaitingHandshake);
        } else {
            self.transition(job, JobStatus::Streaming);
        }

        let outcome = self.pump(adapter, job, channel.as_mut(), request.handshake.as_ref());
        channel.close();

        match outcome {
            Ok(url) => {
                let previous = job.status();
                match job.complete(url.clone()) {
                    Ok(_) => {
                        tracing::info!(token = %job.correlation_token, url = %url, "job completed");
                        self.emit(job, Some(previous), json!({ "url": url }));
                    }
                    Err(err) => tracing::warn!(error = %err, "completion rejected"),
                }
            }
            Err((kind, message)) => self.finish_failed(job, kind, message),
        }
    }

    fn pump(
        &self,
        adapter: &dyn JobAdapter,
        job: &mut GenerationJob,
        channel: &mut dyn JobChannel,
        handshake: Option<&HandshakeReplies>,
    ) -> Result<String, StepFailure> {
        loop {
            let message = match channel.next_message() {
                Ok(Some(message)) => message,
                Ok(None) => {
                    return Err((
                        FailureKind::TransportError,
                        "channel closed before the job completed".to_string(),
                    ))
                }
                Err(err) => return Err((FailureKind::TransportError, err.to_string())),
            };

            match adapter.classify(&message) {
                MessageKind::SendHash => {
                    if let Some(replies) = handshake {
                        send_reply(channel, &replies.hash)?;
                    }
                }
                MessageKind::SendData => {
                    if let Some(replies) = handshake {
                        send_reply(channel, &replies.data)?;
                    }
                    // The handshake ends once the data request is answered.
                    if job.status() == JobStatus::AwaitingHandshake {
                        self.transition(job, JobStatus::Streaming);
                    }
                }
                MessageKind::Progress => {
                    tracing::debug!(token = %job.correlation_token, "job progress");
                }
                MessageKind::Completed => {
                    if job.status() == JobStatus::AwaitingHandshake {
                        self.transition(job, JobStatus::Streaming);
                    }
                    return adapter.extract_result(&message).ok_or_else(|| {
                        (
                            FailureKind::MissingOutput,
                            "completion message carried no output".to_string(),
                        )
                    });
                }
                MessageKind::Rejected(reason) => return Err((FailureKind::TransportError, reason)),
                MessageKind::Ignored => {}
            }
        }
    }

    fn transition(&self, job: &mut GenerationJob, next: JobStatus) {
        match job.advance(next) {
            Ok(previous) => {
                tracing::debug!(
                    token = %job.correlation_token,
                    from = previous.as_str(),
                    to = next.as_str(),
                    "job transition"
                );
                self.emit(job, Some(previous), Value::Null);
            }
            Err(err) => tracing::warn!(token = %job.correlation_token, error = %err, "skipped transition"),
        }
    }

    fn finish_failed(&self, job: &mut GenerationJob, kind: FailureKind, message: String) {
        let previous = job.status();
        if let Err(err) = job.fail(kind, message.clone()) {
            tracing::warn!(token = %job.correlation_token, error = %err, "failure rejected");
            return;
        }
        tracing::warn!(
            token = %job.correlation_token,
            adapter = %job.adapter_id,
            kind = kind.as_str(),
            error = %message,
            "job failed"
        );
        self.emit(
            job,
            Some(previous),
            json!({ "failure": kind.as_str(), "error": message }),
        );
    }

    fn emit(&self, job: &GenerationJob, previous: Option<JobStatus>, extra: Value) {
        let mut payload = map_object(json!({
            "token": job.correlation_token,
            "adapter": job.adapter_id,
            "status": job.status().as_str(),
        }));
        if let Some(previous) = previous {
            payload.insert("from".to_string(), json!(previous.as_str()));
        }
        payload.extend(map_object(extra));
        if let Err(err) = self.events.emit("job_status", payload) {
            tracing::warn!(error = %err, "failed to record job event");
        }
    }
}

fn send_reply(channel: &mut dyn JobChannel, reply: &Value) -> Result<(), StepFailure> {
    channel
        .send(reply)
        .map_err(|err| (FailureKind::TransportError, err.to_string()))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use genrelay_contracts::GenerationError;
    use serde_json::Value;

    use crate::transport::{ChannelConnector, ChannelDescriptor, JobChannel, SubmitCall};

    #[derive(Debug, Default)]
    pub(crate) struct ChannelLog {
        pub opened: usize,
        pub closed: usize,
        pub sent: Vec<Value>,
        pub submits: Vec<SubmitCall>,
    }

    /// Connector that replays one scripted message list per opened channel.
    #[derive(Default)]
    pub(crate) struct ScriptedConnector {
        pub log: Arc<Mutex<ChannelLog>>,
        scripts: Mutex<VecDeque<Vec<Value>>>,
        submit_failure: Option<GenerationError>,
    }

    impl ScriptedConnector {
        pub(crate) fn new(scripts: Vec<Vec<Value>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                ..Self::default()
            }
        }

        pub(crate) fn failing_submit(err: GenerationError) -> Self {
            Self {
                submit_failure: Some(err),
                ..Self::default()
            }
        }

        pub(crate) fn log(&self) -> std::sync::MutexGuard<'_, ChannelLog> {
            self.log.lock().unwrap()
        }
    }

    impl ChannelConnector for ScriptedConnector {
        fn submit(&self, call: &SubmitCall) -> Result<Value, GenerationError> {
            self.log.lock().unwrap().submits.push(call.clone());
            match &self.submit_failure {
                Some(err) => Err(err.clone()),
                None => Ok(serde_json::json!({ "event_id": "evt" })),
            }
        }

        fn open(
            &self,
            _descriptor: &ChannelDescriptor,
            _submit_response: Option<&Value>,
        ) -> Result<Box<dyn JobChannel>, GenerationError> {
            let messages = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
            self.log.lock().unwrap().opened += 1;
            Ok(Box::new(ScriptedChannel {
                messages: messages.into(),
                log: Arc::clone(&self.log),
                closed: false,
            }))
        }
    }

    struct ScriptedChannel {
        messages: VecDeque<Value>,
        log: Arc<Mutex<ChannelLog>>,
        closed: bool,
    }

    impl JobChannel for ScriptedChannel {
        fn next_message(&mut self) -> Result<Option<Value>, GenerationError> {
            Ok(self.messages.pop_front())
        }

        fn send(&mut self, message: &Value) -> Result<(), GenerationError> {
            self.log.lock().unwrap().sent.push(message.clone());
            Ok(())
        }

        fn close(&mut self) {
            if !self.closed {
                self.closed = true;
                self.log.lock().unwrap().closed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use genrelay_contracts::adapters::AdapterTable;
    use serde_json::json;

    use super::testing::ScriptedConnector;
    use super::*;
    use crate::adapters::{default_adapter_table, AdapterSettings};

    fn engine(connector: &Arc<ScriptedConnector>) -> JobProtocolEngine {
        let connector: Arc<dyn ChannelConnector> = connector.clone();
        JobProtocolEngine::new(connector, EventWriter::in_memory("test"))
    }

    fn adapters() -> AdapterTable<Box<dyn JobAdapter>> {
        default_adapter_table(&AdapterSettings::default())
    }

    fn completed(url: &str) -> Value {
        json!({
            "msg": "process_completed",
            "output": { "data": [[{ "image": { "url": url } }]] }
        })
    }

    fn statuses(engine: &JobProtocolEngine) -> Vec<String> {
        engine
            .events()
            .captured()
            .iter()
            .filter_map(|event| event["status"].as_str().map(str::to_string))
            .collect()
    }

    #[test]
    fn push_job_completes_once_and_ignores_duplicates() {
        let connector = Arc::new(ScriptedConnector::new(vec![vec![
            json!({"msg": "estimation", "rank": 0}),
            json!({"msg": "process_starts"}),
            completed("https://cdn.test/first.png"),
            completed("https://cdn.test/second.png"),
        ]]));
        let engine = engine(&connector);
        let adapters = adapters();
        let url = engine
            .run(adapters.get("DallE-XL").unwrap().as_ref(), &JobParameters::new("boat"))
            .unwrap();

        assert_eq!(url, "https://cdn.test/first.png");
        assert_eq!(
            statuses(&engine),
            vec!["init", "submitted", "streaming", "completed"]
        );
        let log = connector.log();
        assert_eq!(log.closed, 1);
        assert_eq!(log.submits.len(), 1);
        assert_eq!(engine.tokens().in_flight(), 0);
    }

    #[test]
    fn completion_without_output_is_missing_output() {
        let connector = Arc::new(ScriptedConnector::new(vec![vec![json!({
            "msg": "process_completed",
            "output": { "error": null }
        })]]));
        let engine = engine(&connector);
        let adapters = adapters();
        let err = engine
            .run(adapters.get("DallE-XL").unwrap().as_ref(), &JobParameters::new("boat"))
            .unwrap_err();

        assert_eq!(err, GenerationError::MissingOutput);
        assert_eq!(statuses(&engine).last().map(String::as_str), Some("failed"));
        assert_eq!(connector.log().closed, 1);
    }

    #[test]
    fn duplex_job_answers_handshake_in_order() {
        let connector = Arc::new(ScriptedConnector::new(vec![vec![
            json!({"msg": "send_hash"}),
            json!({"msg": "estimation"}),
            json!({"msg": "send_data"}),
            json!({"msg": "process_starts"}),
            json!({
                "msg": "process_completed",
                "output": { "data": [[{ "name": "/tmp/song.mp4" }]] }
            }),
        ]]));
        let engine = engine(&connector);
        let adapters = adapters();
        let url = engine
            .run(adapters.get("MusicGen").unwrap().as_ref(), &JobParameters::new("lofi"))
            .unwrap();

        assert_eq!(url, "https://surn-unlimitedmusicgen.hf.space/file=/tmp/song.mp4");
        assert_eq!(
            statuses(&engine),
            vec!["init", "submitted", "awaiting_handshake", "streaming", "completed"]
        );
        let log = connector.log();
        assert!(log.submits.is_empty());
        assert_eq!(log.sent.len(), 2);
        assert_eq!(log.sent[0]["fn_index"], json!(0));
        assert_eq!(log.sent[1]["fn_index"], json!(5));
        assert_eq!(log.sent[0]["session_hash"], log.sent[1]["session_hash"]);
        assert_eq!(log.closed, 1);
    }

    #[test]
    fn queue_updates_before_data_request_keep_handshake_pending() {
        let connector = Arc::new(ScriptedConnector::new(vec![vec![
            json!({"msg": "send_hash"}),
            json!({"msg": "estimation", "rank": 3}),
            json!({"msg": "estimation", "rank": 1}),
        ]]));
        let engine = engine(&connector);
        let adapters = adapters();
        let err = engine
            .run(adapters.get("MusicGen").unwrap().as_ref(), &JobParameters::new("lofi"))
            .unwrap_err();

        assert_eq!(err.failure_kind(), Some(FailureKind::TransportError));
        assert_eq!(
            statuses(&engine),
            vec!["init", "submitted", "awaiting_handshake", "failed"]
        );
        assert_eq!(connector.log().sent.len(), 1);
    }

    #[test]
    fn submit_failure_never_opens_a_channel() {
        let connector = Arc::new(ScriptedConnector::failing_submit(GenerationError::Submit(
            "503".to_string(),
        )));
        let engine = engine(&connector);
        let adapters = adapters();
        let err = engine
            .run(adapters.get("Kandinsky").unwrap().as_ref(), &JobParameters::new("x"))
            .unwrap_err();

        assert!(matches!(err, GenerationError::Submit(_)));
        assert_eq!(statuses(&engine), vec!["init", "failed"]);
        assert_eq!(connector.log().opened, 0);
    }

    #[test]
    fn early_close_is_a_transport_failure() {
        let connector = Arc::new(ScriptedConnector::new(vec![vec![json!({"msg": "estimation"})]]));
        let engine = engine(&connector);
        let adapters = adapters();
        let err = engine
            .run(adapters.get("PixArt-Sigma").unwrap().as_ref(), &JobParameters::new("x"))
            .unwrap_err();

        assert_eq!(err.failure_kind(), Some(FailureKind::TransportError));
        assert_eq!(connector.log().closed, 1);
        assert_eq!(engine.tokens().in_flight(), 0);
    }

    #[test]
    fn unsupported_resolution_fails_before_any_network_call() {
        let connector = Arc::new(ScriptedConnector::new(Vec::new()));
        let engine = engine(&connector);
        let adapters = adapters();
        let params = JobParameters::new("x")
            .with_resolution(genrelay_contracts::job::Resolution::Portrait);
        let err = engine
            .run(adapters.get("SD-XL-Alt2").unwrap().as_ref(), &params)
            .unwrap_err();

        assert!(matches!(err, GenerationError::UnsupportedSelection(_)));
        assert!(connector.log().submits.is_empty());
        assert!(engine.events().captured().is_empty());
    }
}
