use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use genrelay_contracts::history::HistoryStore;
use genrelay_contracts::surface::{Artifact, ArtifactMetadata, RenderContent, ResponseSurface};
use genrelay_contracts::GenerationError;

use crate::retry::{retry_with, RetryPolicy};
use crate::util::timestamp_millis;

/// Live, finite, non-restartable sequence of response chunks.
pub type FragmentProducer = Box<dyn Iterator<Item = Result<String, GenerationError>> + Send>;

pub const OVERFLOW_NOTICE: &str =
    "> `The response is too large and will be sent as a text file once it is ready.`";

pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(500);

/// Shared stop flag for one in-progress response.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

struct FeedState<'s> {
    surface: &'s mut dyn ResponseSurface,
    buffer: String,
    dirty: bool,
    halted: bool,
    overflowed: bool,
    /// Byte length of the buffer at the last partial render.
    shown: usize,
}

/// Buffer shared between the fragment pump and the render ticker.
struct Feed<'s> {
    state: Mutex<FeedState<'s>>,
    wake: Condvar,
}

impl<'s> Feed<'s> {
    fn new(surface: &'s mut dyn ResponseSurface) -> Self {
        Self {
            state: Mutex::new(FeedState {
                surface,
                buffer: String::new(),
                dirty: false,
                halted: false,
                overflowed: false,
                shown: 0,
            }),
            wake: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FeedState<'s>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn halt(&self) {
        self.lock().halted = true;
        self.wake.notify_all();
    }

    /// Renders the newest buffer at most once per interval while new text
    /// keeps arriving, including while the producer is stalled.
    fn tick(&self, interval: Duration) {
        let mut state = self.lock();
        loop {
            state = self
                .wake
                .wait_while(state, |state| !state.dirty && !state.halted)
                .unwrap_or_else(PoisonError::into_inner);
            if state.halted {
                return;
            }
            let (next, _) = self
                .wake
                .wait_timeout_while(state, interval, |state| !state.halted)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
            if state.halted {
                return;
            }
            state.dirty = false;
            if !state.buffer.trim().is_empty() {
                let text = state.buffer.clone();
                state.shown = text.len();
                state.surface.render(RenderContent::Text(text));
            }
        }
    }
}

/// One chat turn as the aggregator sees it.
#[derive(Debug, Clone)]
pub struct StreamTurn<'a> {
    pub actor: &'a str,
    /// Text recorded in history for the actor's side of the turn.
    pub input: &'a str,
    pub char_budget: usize,
    pub metadata: ArtifactMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    /// Rendered in place.
    Inline(String),
    /// Too long for inline rendering; delivered as a text file.
    Attached(String),
    Cancelled,
}

enum AttemptEnd {
    Finished {
        text: String,
        overflowed: bool,
        shown: bool,
    },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct StreamingAggregator {
    history: HistoryStore,
    retry: RetryPolicy,
    render_interval: Duration,
}

impl StreamingAggregator {
    pub fn new(history: HistoryStore, retry: RetryPolicy, render_interval: Duration) -> Self {
        Self {
            history,
            retry,
            render_interval,
        }
    }

    /// Drives producers from `open` until one finishes, the retry policy is
    /// spent, or `cancel` is set. History gains one exchange only on a
    /// finished, non-cancelled response.
    pub fn run<F>(
        &self,
        turn: StreamTurn<'_>,
        surface: &mut dyn ResponseSurface,
        cancel: &CancelToken,
        mut open: F,
    ) -> Result<StreamOutcome, GenerationError>
    where
        F: FnMut() -> Result<FragmentProducer, GenerationError>,
    {
        let max_attempts = self.retry.max_attempts();
        let result = retry_with(
            self.retry,
            |attempt| {
                if attempt > 1 {
                    surface.notice(&format!(
                        "Response failed, retrying ({attempt}/{max_attempts})..."
                    ));
                }
                let producer = open()?;
                self.consume(producer, turn.char_budget, &mut *surface, cancel)
            },
            GenerationError::is_retryable,
            |attempt, err| {
                tracing::info!(actor = turn.actor, attempt, error = %err, "chat stream attempt failed")
            },
        );

        match result {
            Ok(AttemptEnd::Cancelled) => {
                tracing::info!(actor = turn.actor, "chat stream cancelled");
                Ok(StreamOutcome::Cancelled)
            }
            Ok(AttemptEnd::Finished {
                text,
                overflowed,
                shown,
            }) => {
                self.history.append_exchange(turn.actor, turn.input, text.clone());
                tracing::info!(
                    actor = turn.actor,
                    chars = text.chars().count(),
                    overflowed,
                    "chat stream finished"
                );
                if overflowed {
                    let name = format!("response-{}.txt", timestamp_millis());
                    surface.deliver(Artifact::text_file(name, text.clone(), turn.metadata));
                    Ok(StreamOutcome::Attached(text))
                } else {
                    if !shown {
                        surface.render(RenderContent::Text(text.clone()));
                    }
                    Ok(StreamOutcome::Inline(text))
                }
            }
            Err(exhausted) => {
                let err = exhausted.into_generation_error();
                surface.failure(&format!("Could not generate a response: {err}"));
                Err(err)
            }
        }
    }

    fn consume(
        &self,
        producer: FragmentProducer,
        budget: usize,
        surface: &mut dyn ResponseSurface,
        cancel: &CancelToken,
    ) -> Result<AttemptEnd, GenerationError> {
        let feed = Feed::new(surface);
        let interval = self.render_interval;
        let drained = thread::scope(|scope| {
            scope.spawn(|| feed.tick(interval));
            let drained = pump(producer, budget, &feed, cancel);
            feed.halt();
            drained
        })?;
        if !drained {
            return Ok(AttemptEnd::Cancelled);
        }

        let state = feed
            .state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        if state.buffer.trim().is_empty() {
            return Err(GenerationError::Model(
                "model returned an empty response".to_string(),
            ));
        }
        Ok(AttemptEnd::Finished {
            shown: state.shown == state.buffer.len(),
            overflowed: state.overflowed,
            text: state.buffer,
        })
    }
}

/// Feeds fragments into the shared buffer. `Ok(false)` means cancelled.
fn pump(
    mut producer: FragmentProducer,
    budget: usize,
    feed: &Feed<'_>,
    cancel: &CancelToken,
) -> Result<bool, GenerationError> {
    let mut chars = 0usize;
    loop {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let Some(fragment) = producer.next() else {
            return Ok(true);
        };
        let fragment = fragment?;
        chars += fragment.chars().count();

        let mut state = feed.lock();
        state.buffer.push_str(&fragment);
        if state.overflowed {
            continue;
        }
        if chars > budget {
            state.overflowed = true;
            state.halted = true;
            state
                .surface
                .render(RenderContent::Placeholder(OVERFLOW_NOTICE.to_string()));
            drop(state);
            feed.wake.notify_all();
            continue;
        }
        state.dirty = true;
        drop(state);
        feed.wake.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use genrelay_contracts::history::Role;
    use genrelay_contracts::surface::{ArtifactBody, RecordingSurface};

    use super::*;

    fn aggregator(history: &HistoryStore, retries: usize) -> StreamingAggregator {
        StreamingAggregator::new(history.clone(), RetryPolicy::immediate(retries), Duration::ZERO)
    }

    fn turn(budget: usize) -> StreamTurn<'static> {
        StreamTurn {
            actor: "ana",
            input: "tell me a story",
            char_budget: budget,
            metadata: ArtifactMetadata {
                prompt_echo: "tell me a story".to_string(),
                model_used: "dryrun".to_string(),
            },
        }
    }

    fn producer(fragments: Vec<String>) -> FragmentProducer {
        Box::new(fragments.into_iter().map(Ok::<String, GenerationError>))
    }

    fn numbered_fragments(count: usize, len: usize) -> Vec<String> {
        (0..count)
            .map(|index| {
                let digit = char::from(b'0' + (index % 10) as u8);
                std::iter::repeat(digit).take(len).collect()
            })
            .collect()
    }

    #[test]
    fn overflow_delivers_full_text_as_file() {
        let history = HistoryStore::new();
        let mut surface = RecordingSurface::new();
        let mut fragments = numbered_fragments(8, 600);
        fragments.push("x".repeat(200));
        let expected = fragments.concat();
        assert_eq!(expected.len(), 5000);

        let outcome = aggregator(&history, 0)
            .run(turn(1900), &mut surface, &CancelToken::new(), || {
                Ok(producer(fragments.clone()))
            })
            .unwrap();

        assert_eq!(outcome, StreamOutcome::Attached(expected.clone()));
        assert_eq!(
            surface.last_render(),
            Some(&RenderContent::Placeholder(OVERFLOW_NOTICE.to_string()))
        );
        let artifacts = surface.artifacts();
        assert_eq!(artifacts.len(), 1);
        match &artifacts[0].body {
            ArtifactBody::TextFile { name, content } => {
                assert!(name.starts_with("response-") && name.ends_with(".txt"));
                assert_eq!(content.len(), 5000);
                assert_eq!(content, &expected);
            }
            other => panic!("unexpected artifact {other:?}"),
        }
        let placeholders = surface
            .renders()
            .into_iter()
            .filter(|render| matches!(render, RenderContent::Placeholder(_)))
            .count();
        assert_eq!(placeholders, 1);
        assert_eq!(history.len("ana"), 2);
    }

    #[test]
    fn under_budget_renders_concatenation_inline() {
        let history = HistoryStore::new();
        let mut surface = RecordingSurface::new();
        let fragments = vec!["Once ".to_string(), "upon ".to_string(), "a time.".to_string()];

        let outcome = aggregator(&history, 0)
            .run(turn(1900), &mut surface, &CancelToken::new(), || {
                Ok(producer(fragments.clone()))
            })
            .unwrap();

        assert_eq!(outcome, StreamOutcome::Inline("Once upon a time.".to_string()));
        assert_eq!(
            surface.last_render(),
            Some(&RenderContent::Text("Once upon a time.".to_string()))
        );
        assert!(surface.artifacts().is_empty());
        let turns = history.snapshot("ana");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[0].text, "tell me a story");
        assert_eq!(turns[1].role, Role::Model);
        assert_eq!(turns[1].text, "Once upon a time.");
    }

    #[test]
    fn cancellation_stops_consumption_and_skips_history() {
        let history = HistoryStore::new();
        let mut surface = RecordingSurface::new();
        let cancel = CancelToken::new();
        let pulled = Arc::new(AtomicUsize::new(0));

        let fragments = numbered_fragments(10, 4);
        let consumed: String = fragments[..3].concat();
        let outcome = aggregator(&history, 0)
            .run(turn(1900), &mut surface, &cancel, || {
                let pulled = Arc::clone(&pulled);
                let cancel = cancel.clone();
                Ok(Box::new(fragments.clone().into_iter().map(move |fragment| {
                    if pulled.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                        cancel.cancel();
                    }
                    Ok::<_, GenerationError>(fragment)
                })))
            })
            .unwrap();

        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
        assert!(history.is_empty("ana"));
        match surface.last_render() {
            Some(RenderContent::Text(text)) => assert!(consumed.starts_with(text.as_str())),
            None => {}
            other => panic!("unexpected render {other:?}"),
        }
        assert!(surface.artifacts().is_empty());
    }

    #[test]
    fn failed_attempt_restarts_with_fresh_buffer() {
        let history = HistoryStore::new();
        let mut surface = RecordingSurface::new();
        let mut opened = 0;

        let outcome = aggregator(&history, 2)
            .run(turn(1900), &mut surface, &CancelToken::new(), || {
                opened += 1;
                if opened == 1 {
                    let broken: Vec<Result<String, GenerationError>> = vec![
                        Ok("partial ".to_string()),
                        Err(GenerationError::Model("stream reset".to_string())),
                    ];
                    return Ok(Box::new(broken.into_iter()));
                }
                Ok(producer(vec!["clean answer".to_string()]))
            })
            .unwrap();

        assert_eq!(opened, 2);
        assert_eq!(outcome, StreamOutcome::Inline("clean answer".to_string()));
        assert_eq!(surface.notices().len(), 1);
        assert_eq!(history.snapshot("ana")[1].text, "clean answer");
    }

    #[test]
    fn exhausted_retries_report_failure_without_history() {
        let history = HistoryStore::new();
        let mut surface = RecordingSurface::new();
        let mut opened = 0;

        let err = aggregator(&history, 2)
            .run(turn(1900), &mut surface, &CancelToken::new(), || {
                opened += 1;
                Err(GenerationError::Model("quota".to_string()))
            })
            .unwrap_err();

        assert_eq!(opened, 3);
        assert!(matches!(err, GenerationError::Exhausted { attempts: 3, .. }));
        assert_eq!(surface.failures().len(), 1);
        assert!(history.is_empty("ana"));
    }

    #[test]
    fn throttle_limits_partial_renders() {
        let history = HistoryStore::new();
        let mut surface = RecordingSurface::new();
        let aggregator = StreamingAggregator::new(
            history,
            RetryPolicy::immediate(0),
            Duration::from_secs(60),
        );

        aggregator
            .run(turn(1900), &mut surface, &CancelToken::new(), || {
                Ok(producer(numbered_fragments(20, 5)))
            })
            .unwrap();

        // Only the final render fires inside a long interval.
        assert_eq!(surface.renders().len(), 1);
    }

    #[test]
    fn stalled_producer_still_shows_partial_text() {
        let history = HistoryStore::new();
        let mut surface = RecordingSurface::new();
        let aggregator = StreamingAggregator::new(
            history.clone(),
            RetryPolicy::immediate(0),
            Duration::from_millis(50),
        );

        let outcome = aggregator
            .run(turn(1900), &mut surface, &CancelToken::new(), || {
                Ok(Box::new((0..2).map(|index| {
                    if index == 0 {
                        return Ok::<_, GenerationError>("hello".to_string());
                    }
                    thread::sleep(Duration::from_millis(400));
                    Ok(" world".to_string())
                })))
            })
            .unwrap();

        assert_eq!(outcome, StreamOutcome::Inline("hello world".to_string()));
        let texts: Vec<&str> = surface
            .renders()
            .into_iter()
            .filter_map(|render| match render {
                RenderContent::Text(text) => Some(text.as_str()),
                RenderContent::Placeholder(_) => None,
            })
            .collect();
        assert_eq!(texts.first(), Some(&"hello"));
        assert_eq!(texts.iter().filter(|text| **text == "hello world").count(), 1);
        assert_eq!(history.snapshot("ana")[1].text, "hello world");
    }
}
