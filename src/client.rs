//! HTTP client for the arena backend.

use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures_util::stream::{self, Stream};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE};
use reqwest::{RequestBuilder, StatusCode};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::config::ArenaConfig;
use crate::error::ArenaError;
use crate::protocol::{
    ModelInfo, ModelsResponse, RetryRequest, StreamMessage, TranslationResult, VoteRequest,
    VoteResponse,
};
use crate::reconciler::{SessionEvent, TranslationRequest, AUTH_REQUIRED_MESSAGE};

pub const CSRF_HEADER: &str = "X-CSRFToken";

/// Name of the SSE event the backend sends after the last model.
pub const END_EVENT: &str = "end";

pub const STREAM_CLOSED_MESSAGE: &str = "stream closed before completion";

/// Longest run of bytes the stream may send without a line break.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Decoded events of one translation stream. Always ends with exactly one
/// terminal event (`End`, `TransportError` or `AuthRequired`).
pub type EventStream = Pin<Box<dyn Stream<Item = SessionEvent> + Send>>;

pub struct ArenaClient {
    http: reqwest::Client,
    // no overall timeout: a stream legitimately stays open for minutes
    stream_http: reqwest::Client,
    config: ArenaConfig,
}

impl ArenaClient {
    pub fn new(config: ArenaConfig) -> Result<Self, ArenaError> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = &config.session_cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| ArenaError::Config(format!("invalid session cookie: {}", e)))?;
            headers.insert(COOKIE, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers.clone())
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ArenaError::Config(e.to_string()))?;

        let stream_http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ArenaError::Config(e.to_string()))?;

        Ok(ArenaClient {
            http,
            stream_http,
            config,
        })
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    fn post(&self, url: &str) -> RequestBuilder {
        let builder = self.http.post(url);
        match &self.config.csrf_token {
            Some(token) => builder.header(CSRF_HEADER, token),
            None => builder,
        }
    }

    /// `GET /get_available_models`, sorted by model key.
    pub async fn available_models(&self) -> Result<Vec<ModelInfo>, ArenaError> {
        let url = self.config.url(&self.config.paths.models);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(ArenaError::Transport(format!(
                "HTTP {} from {}",
                resp.status().as_u16(),
                url
            )));
        }
        let body: ModelsResponse = resp
            .json()
            .await
            .map_err(|e| ArenaError::Protocol(e.to_string()))?;
        Ok(body.into_models())
    }

    /// Open the translation stream for `request`.
    ///
    /// A 401 on open is reported as [`ArenaError::Auth`]; any other non-2xx
    /// status as [`ArenaError::Transport`]. Once open, the body is subject to
    /// the configured idle timeout.
    pub async fn stream_translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<EventStream, ArenaError> {
        let url = self.config.url(&self.config.paths.stream);
        let mut query: Vec<(&str, &str)> = vec![("query", request.source_text())];
        query.extend(request.model_ids().iter().map(|m| ("models", m.as_str())));

        debug!(url = %url, models = ?request.model_ids(), "opening translation stream");
        let resp = self
            .stream_http
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .query(&query)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ArenaError::Auth(AUTH_REQUIRED_MESSAGE.to_string()));
        }
        if !status.is_success() {
            return Err(ArenaError::Transport(format!(
                "HTTP {} from {}",
                status.as_u16(),
                url
            )));
        }
        Ok(session_events(
            resp.bytes_stream(),
            self.config.stream_idle_timeout(),
        ))
    }

    /// `POST /retry-single` for one model.
    pub async fn retry_single(
        &self,
        source_text: &str,
        model: &str,
    ) -> Result<TranslationResult, ArenaError> {
        let url = self.config.url(&self.config.paths.retry);
        let resp = self
            .post(&url)
            .json(&RetryRequest {
                query: source_text,
                model,
            })
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ArenaError::Auth(AUTH_REQUIRED_MESSAGE.to_string()));
        }
        let body = resp.text().await?;

        match serde_json::from_str::<StreamMessage>(&body) {
            Ok(StreamMessage::Success(mut result)) => {
                if result.model != model {
                    warn!(requested = model, returned = %result.model, "retry answered for a different model key");
                    result.model = model.to_string();
                }
                Ok(result)
            }
            Ok(StreamMessage::Failure(failure)) if failure.is_auth() => {
                Err(ArenaError::Auth(failure.error))
            }
            Ok(StreamMessage::Failure(failure)) => Err(ArenaError::Model {
                model: model.to_string(),
                message: failure.error,
            }),
            Err(_) if !status.is_success() => Err(ArenaError::Transport(format!(
                "HTTP {} from {}",
                status.as_u16(),
                url
            ))),
            Err(e) => Err(ArenaError::Protocol(e.to_string())),
        }
    }

    /// `POST /vote`. Every failure other than a 401 is a
    /// [`ArenaError::Submission`].
    pub async fn submit_votes(&self, batch: &VoteRequest) -> Result<(), ArenaError> {
        let url = self.config.url(&self.config.paths.vote);
        let resp = self
            .post(&url)
            .json(batch)
            .send()
            .await
            .map_err(|e| ArenaError::Submission(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ArenaError::Auth(AUTH_REQUIRED_MESSAGE.to_string()));
        }
        let body: VoteResponse = resp
            .json()
            .await
            .map_err(|e| ArenaError::Submission(format!("HTTP {}: {}", status.as_u16(), e)))?;

        if body.is_success() {
            info!(query_id = batch.query_id, votes = batch.votes.len(), "votes accepted");
            Ok(())
        } else {
            Err(ArenaError::Submission(
                body.error
                    .unwrap_or_else(|| format!("HTTP {}", status.as_u16())),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// SSE body -> SessionEvent stream
// ---------------------------------------------------------------------------

/// Map one SSE event to a session event. Events that carry nothing we act on
/// (unknown event names, malformed JSON) map to `None`.
pub fn event_from_frame(frame: &Event) -> Option<SessionEvent> {
    if frame.event == END_EVENT {
        return Some(SessionEvent::End);
    }
    if frame.event != "message" {
        debug!(event = %frame.event, "ignoring unknown stream event");
        return None;
    }
    if frame.data.trim().is_empty() {
        return None;
    }

    match serde_json::from_str::<StreamMessage>(&frame.data) {
        Ok(StreamMessage::Success(result)) => Some(SessionEvent::Result(result)),
        Ok(StreamMessage::Failure(failure)) if failure.is_auth() => {
            Some(SessionEvent::AuthRequired(failure.error))
        }
        Ok(StreamMessage::Failure(failure)) => match failure.model {
            Some(model) => Some(SessionEvent::ModelError {
                model,
                message: failure.error,
            }),
            None => {
                warn!(error = %failure.error, "stream error without a model ignored");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "malformed stream event skipped");
            None
        }
    }
}

pub fn is_terminal(event: &SessionEvent) -> bool {
    matches!(
        event,
        SessionEvent::End | SessionEvent::TransportError(_) | SessionEvent::AuthRequired(_)
    )
}

/// Why the raw body stopped before the SSE layer saw an `end` event.
#[derive(Debug, thiserror::Error)]
enum BodyFault {
    #[error("{0}")]
    Read(String),
    #[error("no data received for {0:?}")]
    Idle(Duration),
    #[error("stream line longer than {0} bytes")]
    LineTooLong(usize),
}

struct BodyState<S> {
    body: Pin<Box<S>>,
    idle_timeout: Option<Duration>,
    line_bytes: usize,
    done: bool,
}

/// Raw byte chunks with the idle timeout and the line cap applied. Any bytes,
/// keepalive comments included, reset the idle timer.
fn guarded_body<S, B, E>(
    body: S,
    idle_timeout: Option<Duration>,
) -> impl Stream<Item = Result<B, BodyFault>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = BodyState {
        body: Box::pin(body),
        idle_timeout,
        line_bytes: 0,
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }
        let next = match st.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, st.body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(idle = ?limit, "translation stream went silent");
                    st.done = true;
                    return Some((Err(BodyFault::Idle(limit)), st));
                }
            },
            None => st.body.next().await,
        };

        match next {
            Some(Ok(chunk)) => {
                let bytes = chunk.as_ref();
                st.line_bytes = match bytes.iter().rposition(|&b| b == b'\n') {
                    Some(pos) => bytes.len() - pos - 1,
                    None => st.line_bytes + bytes.len(),
                };
                if st.line_bytes > MAX_LINE_BYTES {
                    warn!(limit = MAX_LINE_BYTES, "translation stream line too long");
                    st.done = true;
                    return Some((Err(BodyFault::LineTooLong(MAX_LINE_BYTES)), st));
                }
                Some((Ok(chunk), st))
            }
            Some(Err(e)) => {
                st.done = true;
                Some((Err(BodyFault::Read(e.to_string())), st))
            }
            None => None,
        }
    })
}

struct EventState<F> {
    frames: F,
    finished: bool,
}

/// Decode a raw byte stream into session events.
///
/// A body error, an idle timeout, an overlong line, or a body that ends
/// before the `end` event becomes a single `TransportError`. Nothing is
/// yielded after the first terminal event, and the body is dropped (closing
/// the connection) as soon as the stream ends.
pub fn session_events<S, B, E>(body: S, idle_timeout: Option<Duration>) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = EventState {
        frames: Box::pin(guarded_body(body, idle_timeout)).eventsource(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut st| async move {
        loop {
            if st.finished {
                return None;
            }
            let event = match st.frames.next().await {
                Some(Ok(frame)) => match event_from_frame(&frame) {
                    Some(event) => event,
                    None => continue,
                },
                Some(Err(EventStreamError::Transport(fault))) => {
                    SessionEvent::TransportError(fault.to_string())
                }
                Some(Err(other)) => {
                    SessionEvent::TransportError(format!("malformed event stream: {}", other))
                }
                None => SessionEvent::TransportError(STREAM_CLOSED_MESSAGE.to_string()),
            };
            if is_terminal(&event) {
                st.finished = true;
            }
            return Some((event, st));
        }
    }))
}
