//! # Streaming translation reconciler
//!
//! ## Responsibility
//! Map the events of one translate request (results, per-model errors, the
//! end marker, connection loss, single-model retries) onto a keyed set of
//! slots, one per requested model, and turn the user's ratings into a vote
//! batch.
//!
//! ## Guarantees
//! - Exactly one slot per requested model id, kept in request order
//! - Every event is checked against the session token that produced it; an
//!   event from a superseded session never touches the current one
//! - Slot moves follow [`crate::slot::transition`]; anything else is a no-op
//! - Primary-stream events never touch a slot whose retry is in flight, and
//!   retry outcomes touch nothing but their own slot
//! - An auth failure blocks the session: one prompt, then silence
//!
//! ## NOT Responsible For
//! - Network I/O (see [`crate::client`] and [`crate::controller`])
//! - Rendering (see [`crate::render`])

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::ArenaError;
use crate::protocol::{TranslationResult, Vote, VoteRequest};
use crate::slot::{Rating, Slot, SlotInput, SlotPayload, SlotState};

/// Identity of one translate invocation. Strictly increasing.
pub type SessionToken = u64;

/// A comparison needs at least this many models.
pub const MIN_MODELS: usize = 2;

pub const NO_RESULT_MESSAGE: &str = "no result returned";
pub const CONNECTION_LOST_MESSAGE: &str = "Stream connection lost / Model failed";
pub const AUTH_REQUIRED_MESSAGE: &str = "Authentication required. Please login.";

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Source text plus the models to ask, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    source_text: String,
    model_ids: Vec<String>,
}

impl TranslationRequest {
    /// Trims the text and collapses repeated model ids (first occurrence
    /// wins). Fails without touching anything else when the text is empty or
    /// fewer than [`MIN_MODELS`] distinct models remain.
    pub fn new<I, S>(source_text: &str, model_ids: I) -> Result<Self, ArenaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let text = source_text.trim();
        if text.is_empty() {
            return Err(ArenaError::validation("Please enter text to translate"));
        }

        let mut seen = HashSet::new();
        let models: Vec<String> = model_ids
            .into_iter()
            .map(Into::into)
            .map(|m: String| m.trim().to_string())
            .filter(|m| !m.is_empty() && seen.insert(m.clone()))
            .collect();

        if models.len() < MIN_MODELS {
            return Err(ArenaError::validation(format!(
                "Please select at least {} models",
                MIN_MODELS
            )));
        }

        Ok(TranslationRequest {
            source_text: text.to_string(),
            model_ids: models,
        })
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    pub fn model_ids(&self) -> &[String] {
        &self.model_ids
    }
}

// ---------------------------------------------------------------------------
// Events and their effects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A model's translation arrived on the primary stream.
    Result(TranslationResult),
    /// A model failed on the primary stream.
    ModelError { model: String, message: String },
    /// The backend wants a fresh login.
    AuthRequired(String),
    /// The backend finished the stream.
    End,
    /// The primary connection failed or went silent.
    TransportError(String),
    /// A single-model retry succeeded.
    RetryResult(TranslationResult),
    /// A single-model retry failed.
    RetryFailed {
        model: String,
        message: String,
        auth: bool,
    },
}

/// An event stamped with the session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged {
    pub token: SessionToken,
    pub event: SessionEvent,
}

impl Tagged {
    pub fn new(token: SessionToken, event: SessionEvent) -> Self {
        Tagged { token, event }
    }
}

/// Transient, non-blocking message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Success(String),
    Error(String),
    /// Ask the user to log in again.
    AuthPrompt(String),
}

/// What applying one event did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    /// The event belonged to a session that is no longer current.
    pub stale: bool,
    /// Model ids whose slot changed.
    pub changed: Vec<String>,
    pub notices: Vec<Notice>,
}

impl Applied {
    fn stale() -> Self {
        Applied {
            stale: true,
            ..Applied::default()
        }
    }

    pub fn is_noop(&self) -> bool {
        self.changed.is_empty() && self.notices.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The primary stream is open.
    Streaming,
    /// The backend sent its end marker.
    Completed,
    /// The primary connection failed.
    Disconnected,
    /// An auth error ended the session.
    AuthBlocked,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Phase::Streaming)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Idle,
    InFlight,
    Submitted,
}

/// Everything a single-model retry needs, captured when it is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTicket {
    pub token: SessionToken,
    pub model: String,
    pub source_text: String,
}

// ---------------------------------------------------------------------------
// StreamSession
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StreamSession {
    token: SessionToken,
    request: TranslationRequest,
    slots: HashMap<String, Slot>,
    total_cost: f64,
    seen_fingerprints: HashSet<String>,
    query_id: Option<i64>,
    phase: Phase,
    submission: Submission,
    rating_scale: u8,
}

impl StreamSession {
    pub fn new(token: SessionToken, request: TranslationRequest, rating_scale: u8) -> Self {
        let slots = request
            .model_ids()
            .iter()
            .map(|m| (m.clone(), Slot::pending(m.clone())))
            .collect();
        StreamSession {
            token,
            request,
            slots,
            total_cost: 0.0,
            seen_fingerprints: HashSet::new(),
            query_id: None,
            phase: Phase::Streaming,
            submission: Submission::Idle,
            rating_scale,
        }
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn request(&self) -> &TranslationRequest {
        &self.request
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn submission(&self) -> Submission {
        self.submission
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    /// Shared backend query id, known once the first result has arrived.
    pub fn query_id(&self) -> Option<i64> {
        self.query_id
    }

    pub fn rating_scale(&self) -> u8 {
        self.rating_scale
    }

    pub fn slot(&self, model: &str) -> Option<&Slot> {
        self.slots.get(model)
    }

    /// Slots in request order.
    pub fn slots(&self) -> impl Iterator<Item = &Slot> + '_ {
        self.request
            .model_ids()
            .iter()
            .filter_map(move |m| self.slots.get(m))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn has_filled(&self) -> bool {
        self.slots.values().any(Slot::is_filled)
    }

    pub fn errored_models(&self) -> Vec<String> {
        self.slots()
            .filter(|s| s.is_errored())
            .map(|s| s.model_id.clone())
            .collect()
    }

    /// Model ids are shown only after a successful vote.
    pub fn is_revealed(&self) -> bool {
        self.submission == Submission::Submitted
    }

    pub fn can_vote(&self) -> bool {
        matches!(self.phase, Phase::Completed | Phase::Disconnected)
            && self.submission == Submission::Idle
            && self.has_filled()
    }

    /// No more events are expected: the stream is over and no retry is
    /// outstanding. An auth-blocked session is settled regardless.
    pub fn is_settled(&self) -> bool {
        match self.phase {
            Phase::Streaming => false,
            Phase::AuthBlocked => true,
            Phase::Completed | Phase::Disconnected => !self.slots.values().any(|s| s.retrying),
        }
    }

    /// Apply one event. This is the reducer; it performs no I/O.
    pub fn apply(&mut self, event: SessionEvent) -> Applied {
        if self.phase == Phase::AuthBlocked {
            debug!(token = self.token, "session blocked on authentication, event ignored");
            return Applied::default();
        }

        match event {
            SessionEvent::Result(result) => self.fill(result, false),
            SessionEvent::RetryResult(result) => self.fill(result, true),
            SessionEvent::ModelError { model, message } => self.fail(&model, message),
            SessionEvent::AuthRequired(message) => self.block_on_auth(message, Vec::new()),
            SessionEvent::End => self.finish_stream(),
            SessionEvent::TransportError(message) => self.lose_connection(message),
            SessionEvent::RetryFailed {
                model,
                message,
                auth,
            } => self.fail_retry(&model, message, auth),
        }
    }

    fn fill(&mut self, result: TranslationResult, from_retry: bool) -> Applied {
        let Some(slot) = self.slots.get_mut(&result.model) else {
            debug!(token = self.token, model = %result.model, "result for unknown model ignored");
            return Applied::default();
        };
        if slot.retrying != from_retry {
            return Applied::default();
        }
        if !slot.advance(SlotInput::Result, || {
            SlotState::Filled(SlotPayload::from(&result))
        }) {
            return Applied::default();
        }

        slot.retrying = false;
        self.total_cost += result.cost;
        if let Some(hash) = &result.response_hash {
            if !self.seen_fingerprints.insert(hash.clone()) {
                slot.duplicate = true;
            }
        }
        if self.query_id.is_none() {
            self.query_id = Some(result.query_id);
        }

        let mut notices = Vec::new();
        if from_retry {
            notices.push(Notice::Success("Retry successful".to_string()));
        }
        Applied {
            stale: false,
            changed: vec![result.model],
            notices,
        }
    }

    fn fail(&mut self, model: &str, message: String) -> Applied {
        let Some(slot) = self.slots.get_mut(model) else {
            debug!(token = self.token, model, "error for unknown model ignored");
            return Applied::default();
        };
        if slot.retrying || !slot.advance(SlotInput::Error, || SlotState::Errored(message)) {
            return Applied::default();
        }
        Applied {
            stale: false,
            changed: vec![model.to_string()],
            notices: Vec::new(),
        }
    }

    fn fail_retry(&mut self, model: &str, message: String, auth: bool) -> Applied {
        let Some(slot) = self.slots.get_mut(model) else {
            return Applied::default();
        };
        if !slot.retrying {
            return Applied::default();
        }
        slot.retrying = false;
        let notice = Notice::Error(format!("Retry failed: {}", message));
        if !slot.advance(SlotInput::Error, || SlotState::Errored(message)) {
            return Applied::default();
        }
        let changed = vec![model.to_string()];
        if auth {
            return self.block_on_auth(AUTH_REQUIRED_MESSAGE.to_string(), changed);
        }
        Applied {
            stale: false,
            changed,
            notices: vec![notice],
        }
    }

    fn block_on_auth(&mut self, message: String, changed: Vec<String>) -> Applied {
        debug!(token = self.token, %message, "authentication required, session blocked");
        self.phase = Phase::AuthBlocked;
        let prompt = if message.trim().is_empty() {
            AUTH_REQUIRED_MESSAGE.to_string()
        } else {
            message
        };
        Applied {
            stale: false,
            changed,
            notices: vec![Notice::AuthPrompt(prompt)],
        }
    }

    fn finish_stream(&mut self) -> Applied {
        if self.phase != Phase::Streaming {
            return Applied::default();
        }
        self.phase = Phase::Completed;
        let changed = self.settle_pending(SlotInput::StreamEnd, NO_RESULT_MESSAGE);
        Applied {
            stale: false,
            changed,
            notices: vec![Notice::Success("Translation complete".to_string())],
        }
    }

    fn lose_connection(&mut self, message: String) -> Applied {
        if self.phase != Phase::Streaming {
            return Applied::default();
        }
        self.phase = Phase::Disconnected;
        let changed = self.settle_pending(SlotInput::TransportLost, CONNECTION_LOST_MESSAGE);
        Applied {
            stale: false,
            changed,
            notices: vec![Notice::Error(format!("Stream interrupted: {}", message))],
        }
    }

    // Pending slots with a retry in flight are left for the retry to settle.
    fn settle_pending(&mut self, input: SlotInput, message: &str) -> Vec<String> {
        let mut changed = Vec::new();
        for model in self.request.model_ids() {
            if let Some(slot) = self.slots.get_mut(model) {
                if !slot.retrying && slot.advance(input, || SlotState::Errored(message.to_string()))
                {
                    changed.push(model.clone());
                }
            }
        }
        changed
    }

    /// Move an errored slot back to pending for a single-model retry.
    pub fn begin_retry(&mut self, model: &str) -> Result<RetryTicket, ArenaError> {
        if self.phase == Phase::AuthBlocked {
            return Err(ArenaError::Auth(AUTH_REQUIRED_MESSAGE.to_string()));
        }
        let slot = self
            .slots
            .get_mut(model)
            .ok_or_else(|| ArenaError::validation(format!("no slot for model {}", model)))?;
        if slot.retrying {
            return Err(ArenaError::validation(format!(
                "a retry for {} is already running",
                model
            )));
        }
        if !slot.advance(SlotInput::RetryBegin, || SlotState::Pending) {
            return Err(ArenaError::validation(
                "only failed translations can be retried",
            ));
        }
        slot.retrying = true;
        slot.duplicate = false;
        slot.rating = None;

        Ok(RetryTicket {
            token: self.token,
            model: model.to_string(),
            source_text: self.request.source_text().to_string(),
        })
    }

    fn ratings_open(&self) -> Result<(), ArenaError> {
        match self.submission {
            Submission::Idle => Ok(()),
            Submission::InFlight => Err(ArenaError::validation("votes are being submitted")),
            Submission::Submitted => Err(ArenaError::validation("votes were already submitted")),
        }
    }

    pub fn rate(&mut self, model: &str, rating: Rating) -> Result<(), ArenaError> {
        self.ratings_open()?;
        let rating = rating.check_scale(self.rating_scale)?;
        let slot = self
            .slots
            .get_mut(model)
            .ok_or_else(|| ArenaError::validation(format!("no slot for model {}", model)))?;
        if !slot.is_filled() {
            return Err(ArenaError::validation("only finished translations can be rated"));
        }
        slot.rating = Some(rating);
        Ok(())
    }

    pub fn clear_rating(&mut self, model: &str) -> Result<(), ArenaError> {
        self.ratings_open()?;
        if let Some(slot) = self.slots.get_mut(model) {
            slot.rating = None;
        }
        Ok(())
    }

    /// Votes for every filled and rated slot, in request order. Unrated slots
    /// are left out rather than sent as zero.
    pub fn collect_votes(&self) -> Result<VoteRequest, ArenaError> {
        let votes: Vec<Vote> = self
            .slots()
            .filter_map(|slot| match (slot.payload(), slot.rating) {
                (Some(payload), Some(rating)) => Some(Vote {
                    translation_id: payload.result_id,
                    rating: rating.wire_value(),
                }),
                _ => None,
            })
            .collect();

        if votes.is_empty() {
            return Err(ArenaError::validation("Please rate at least one translation"));
        }
        let query_id = self
            .query_id
            .ok_or_else(|| ArenaError::validation("no query to vote on"))?;
        Ok(VoteRequest { query_id, votes })
    }

    /// Collect the votes and mark a submission in flight. A second call
    /// before [`finish_submission`](Self::finish_submission) is rejected.
    pub fn begin_submission(&mut self) -> Result<VoteRequest, ArenaError> {
        self.ratings_open()?;
        match self.phase {
            Phase::Streaming => {
                return Err(ArenaError::validation("translations are still arriving"))
            }
            Phase::AuthBlocked => return Err(ArenaError::Auth(AUTH_REQUIRED_MESSAGE.to_string())),
            Phase::Completed | Phase::Disconnected => {}
        }
        let batch = self.collect_votes()?;
        self.submission = Submission::InFlight;
        Ok(batch)
    }

    /// Record the outcome of the vote POST. On failure the ratings stay so
    /// the user can resubmit.
    pub fn finish_submission(&mut self, outcome: Result<(), ArenaError>) -> Vec<Notice> {
        if self.submission != Submission::InFlight {
            return Vec::new();
        }
        match outcome {
            Ok(()) => {
                self.submission = Submission::Submitted;
                vec![Notice::Success("Votes submitted".to_string())]
            }
            Err(err) => {
                self.submission = Submission::Idle;
                let mut notices = vec![Notice::Error(err.to_string())];
                if err.is_auth() {
                    notices.push(Notice::AuthPrompt(AUTH_REQUIRED_MESSAGE.to_string()));
                }
                notices
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Owns the current session and hands out session tokens.
#[derive(Debug)]
pub struct Reconciler {
    last_token: SessionToken,
    rating_scale: u8,
    session: Option<StreamSession>,
}

impl Reconciler {
    pub fn new(rating_scale: u8) -> Self {
        Reconciler {
            last_token: 0,
            rating_scale,
            session: None,
        }
    }

    /// Validate and open a new session, replacing any previous one.
    pub fn start<I, S>(&mut self, source_text: &str, model_ids: I) -> Result<SessionToken, ArenaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = TranslationRequest::new(source_text, model_ids)?;
        Ok(self.start_request(request))
    }

    pub fn start_request(&mut self, request: TranslationRequest) -> SessionToken {
        self.last_token += 1;
        let token = self.last_token;
        if let Some(old) = &self.session {
            debug!(old = old.token(), new = token, "session superseded");
        }
        self.session = Some(StreamSession::new(token, request, self.rating_scale));
        token
    }

    pub fn session(&self) -> Option<&StreamSession> {
        self.session.as_ref()
    }

    pub fn current_token(&self) -> Option<SessionToken> {
        self.session.as_ref().map(StreamSession::token)
    }

    /// Apply a tagged event if it belongs to the current session.
    pub fn apply(&mut self, tagged: Tagged) -> Applied {
        let current = self.current_token();
        if current != Some(tagged.token) {
            debug!(token = tagged.token, current = ?current, "stale event dropped");
            return Applied::stale();
        }
        match self.session.as_mut() {
            Some(session) => session.apply(tagged.event),
            None => Applied::stale(),
        }
    }

    fn session_mut(&mut self) -> Result<&mut StreamSession, ArenaError> {
        self.session
            .as_mut()
            .ok_or_else(|| ArenaError::validation("no translation in progress"))
    }

    fn session_ref(&self) -> Result<&StreamSession, ArenaError> {
        self.session
            .as_ref()
            .ok_or_else(|| ArenaError::validation("no translation in progress"))
    }

    pub fn retry(&mut self, model: &str) -> Result<RetryTicket, ArenaError> {
        self.session_mut()?.begin_retry(model)
    }

    pub fn rate(&mut self, model: &str, rating: Rating) -> Result<(), ArenaError> {
        self.session_mut()?.rate(model, rating)
    }

    pub fn clear_rating(&mut self, model: &str) -> Result<(), ArenaError> {
        self.session_mut()?.clear_rating(model)
    }

    pub fn collect_votes(&self) -> Result<VoteRequest, ArenaError> {
        self.session_ref()?.collect_votes()
    }

    pub fn begin_submission(&mut self) -> Result<VoteRequest, ArenaError> {
        self.session_mut()?.begin_submission()
    }

    /// Outcomes for a session that has since been replaced are dropped.
    pub fn finish_submission(
        &mut self,
        token: SessionToken,
        outcome: Result<(), ArenaError>,
    ) -> Vec<Notice> {
        match self.session.as_mut() {
            Some(session) if session.token() == token => session.finish_submission(outcome),
            _ => Vec::new(),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.session.as_ref().map_or(true, StreamSession::is_settled)
    }
}
