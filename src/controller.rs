//! Drives a [`Reconciler`] from live network tasks.
//!
//! The primary stream and every single-model retry run as separate tokio
//! tasks. Each stamps its events with the session token it was started for
//! and sends them over one channel; the controller applies them in arrival
//! order, so the reducer only ever sees one event at a time.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::client::{is_terminal, ArenaClient};
use crate::error::ArenaError;
use crate::reconciler::{
    Applied, Notice, Phase, Reconciler, RetryTicket, SessionEvent, SessionToken, StreamSession, Tagged,
    TranslationRequest,
};
use crate::slot::Rating;

pub struct Controller {
    client: Arc<ArenaClient>,
    reconciler: Reconciler,
    tx: mpsc::UnboundedSender<Tagged>,
    rx: mpsc::UnboundedReceiver<Tagged>,
    stream_task: Option<JoinHandle<()>>,
    retry_tasks: HashMap<String, JoinHandle<()>>,
}

impl Controller {
    pub fn new(client: ArenaClient) -> Self {
        let rating_scale = client.config().rating_scale;
        let (tx, rx) = mpsc::unbounded_channel();
        Controller {
            client: Arc::new(client),
            reconciler: Reconciler::new(rating_scale),
            tx,
            rx,
            stream_task: None,
            retry_tasks: HashMap::new(),
        }
    }

    pub fn session(&self) -> Option<&StreamSession> {
        self.reconciler.session()
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Start a new translate session. Invalid input leaves the current
    /// session and its tasks untouched; otherwise the previous session's
    /// tasks are cancelled and its late events are dropped as stale.
    pub fn translate<I, S>(&mut self, source_text: &str, model_ids: I) -> Result<SessionToken, ArenaError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = TranslationRequest::new(source_text, model_ids)?;
        self.cancel_tasks();

        let token = self.reconciler.start_request(request.clone());
        info!(token, models = ?request.model_ids(), "translation started");

        let handle = tokio::spawn(pump_stream(
            Arc::clone(&self.client),
            request,
            token,
            self.tx.clone(),
        ));
        self.stream_task = Some(handle);
        Ok(token)
    }

    /// Start a single-model retry for an errored slot.
    pub fn retry(&mut self, model: &str) -> Result<(), ArenaError> {
        let ticket = self.reconciler.retry(model)?;
        info!(token = ticket.token, model, "retrying translation");

        self.retry_tasks.retain(|_, handle| !handle.is_finished());
        let handle = tokio::spawn(run_retry(Arc::clone(&self.client), ticket, self.tx.clone()));
        self.retry_tasks.insert(model.to_string(), handle);
        Ok(())
    }

    pub fn rate(&mut self, model: &str, rating: Rating) -> Result<(), ArenaError> {
        self.reconciler.rate(model, rating)
    }

    pub fn clear_rating(&mut self, model: &str) -> Result<(), ArenaError> {
        self.reconciler.clear_rating(model)
    }

    /// Wait for the next event that belongs to the current session and apply
    /// it. Returns `None` once the session is settled.
    ///
    /// A session blocked on auth is torn down at once: the stream and any
    /// retries still running are cancelled.
    pub async fn next_update(&mut self) -> Option<Applied> {
        loop {
            if self.reconciler.is_settled() {
                return None;
            }
            let tagged = self.rx.recv().await?;
            let applied = self.reconciler.apply(tagged);
            if applied.stale {
                continue;
            }
            if self.session().map(StreamSession::phase) == Some(Phase::AuthBlocked) {
                self.cancel_tasks();
            }
            return Some(applied);
        }
    }

    /// Apply updates until the session is settled, handing each one to
    /// `on_update` together with the session it was applied to.
    pub async fn run_until_settled<F>(&mut self, mut on_update: F)
    where
        F: FnMut(&StreamSession, &Applied),
    {
        while let Some(applied) = self.next_update().await {
            if let Some(session) = self.reconciler.session() {
                on_update(session, &applied);
            }
        }
    }

    /// Submit the current ratings. A second call while one is in flight is
    /// rejected by the session, and a failed POST leaves the ratings in place
    /// for another attempt.
    pub async fn submit_votes(&mut self) -> Result<Vec<Notice>, ArenaError> {
        let token = self
            .reconciler
            .current_token()
            .ok_or_else(|| ArenaError::validation("no translation in progress"))?;
        let batch = self.reconciler.begin_submission()?;
        info!(token, query_id = batch.query_id, votes = batch.votes.len(), "submitting votes");

        let outcome = self.client.submit_votes(&batch).await;
        if let Err(e) = &outcome {
            warn!(token, error = %e, "vote submission failed");
        }
        Ok(self.reconciler.finish_submission(token, outcome))
    }

    fn cancel_tasks(&mut self) {
        if let Some(handle) = self.stream_task.take() {
            handle.abort();
        }
        for (model, handle) in self.retry_tasks.drain() {
            debug!(model = %model, "cancelling retry");
            handle.abort();
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.cancel_tasks();
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn pump_stream(
    client: Arc<ArenaClient>,
    request: TranslationRequest,
    token: SessionToken,
    tx: mpsc::UnboundedSender<Tagged>,
) {
    // the receiver only goes away with the controller
    let send = |event: SessionEvent| {
        let _ = tx.send(Tagged::new(token, event));
    };

    let mut events = match client.stream_translate(&request).await {
        Ok(events) => events,
        Err(ArenaError::Auth(message)) => {
            send(SessionEvent::AuthRequired(message));
            return;
        }
        Err(e) => {
            warn!(token, error = %e, "could not open translation stream");
            send(SessionEvent::TransportError(e.to_string()));
            return;
        }
    };

    while let Some(event) = events.next().await {
        let terminal = is_terminal(&event);
        send(event);
        if terminal {
            break;
        }
    }
    debug!(token, "translation stream closed");
}

async fn run_retry(client: Arc<ArenaClient>, ticket: RetryTicket, tx: mpsc::UnboundedSender<Tagged>) {
    let event = match client.retry_single(&ticket.source_text, &ticket.model).await {
        Ok(result) => SessionEvent::RetryResult(result),
        Err(e) => {
            warn!(token = ticket.token, model = %ticket.model, error = %e, "retry failed");
            SessionEvent::RetryFailed {
                model: ticket.model.clone(),
                auth: e.is_auth(),
                message: retry_message(e),
            }
        }
    };
    let _ = tx.send(Tagged::new(ticket.token, event));
}

fn retry_message(err: ArenaError) -> String {
    match err {
        ArenaError::Model { message, .. } => message,
        ArenaError::Transport(detail) => format!("Network error during retry: {}", detail),
        other => other.to_string(),
    }
}
