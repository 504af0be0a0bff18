//! ConversationEngine — drives the intake through its phases, validating
//! answers and calling the backend at phase boundaries.
//!
//! All mutable state lives in one [`EngineInner`] record behind a tokio
//! mutex. The lock is never held across a gateway call: a call is bracketed
//! by `begin()` (sets `busy`, captures the epoch) and `finish()` (clears
//! `busy`, rejects results from a superseded epoch). `begin()` hands out an
//! [`InFlight`] token; if the caller's future is dropped before `finish()`,
//! the token clears `busy` itself.

use std::sync::Arc;

use chrono::Local;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::model::{Attachment, Field, Message, PatientProfile};
use super::prompts;
use super::questions::QuestionTable;
use super::state::{ConversationState, Phase};
use super::validation;
use crate::config::EngineConfig;
use crate::error::IntakeError;
use crate::gateway::{Acknowledgement, BackendGateway, BookingConfirmation, QueueStatus};
use crate::socket::SocketEvent;

/// What a call changed, for callers that render turn by turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub state: ConversationState,
    pub question_index: usize,
    /// Messages emitted in response, oldest first. Excludes the echoed user
    /// message.
    pub replies: Vec<Message>,
}

/// Read-only view of the engine for presentation layers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub state: ConversationState,
    pub question_index: usize,
    pub current_prompt: Option<String>,
    pub busy: bool,
    pub profile: PatientProfile,
    pub messages: Vec<Message>,
    pub booking: Option<BookingConfirmation>,
}

#[derive(Default)]
struct EngineInner {
    state: ConversationState,
    question_index: usize,
    profile: PatientProfile,
    messages: Vec<Message>,
    busy: bool,
    /// Bumped by `restart()`; results of calls begun in an older epoch are
    /// discarded.
    epoch: u64,
    /// Set while the symptom analysis keeps asking for more detail.
    follow_up_prompt: Option<String>,
    patient_id: Option<String>,
    booking: Option<BookingConfirmation>,
}

impl EngineInner {
    fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    fn outcome(&self, mark: usize) -> TurnOutcome {
        TurnOutcome {
            state: self.state,
            question_index: self.question_index,
            replies: self.messages[mark..].to_vec(),
        }
    }

    fn transition(&mut self, to: ConversationState) {
        debug_assert!(
            self.state.can_transition_to(to),
            "invalid transition {} -> {to}",
            self.state
        );
        info!(from = %self.state, to = %to, "Intake state transition");
        self.state = to;
        self.question_index = 0;
    }

    /// Undo the bookkeeping of a call whose caller went away.
    fn abandon(&mut self, epoch: u64) {
        self.busy = false;
        if self.epoch == epoch && self.state == ConversationState::AwaitingRecommendations {
            // The cursor already sits on the last history question.
            self.state = ConversationState::CollectingMedicalHistory;
        }
        warn!(epoch, state = %self.state, "Backend call abandoned before it returned");
    }
}

/// One outstanding gateway call. Consumed by `finish()`; dropped anywhere
/// else it releases the busy flag.
struct InFlight {
    inner: Arc<Mutex<EngineInner>>,
    epoch: u64,
    armed: bool,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let epoch = self.epoch;
        if let Ok(mut inner) = self.inner.try_lock() {
            inner.abandon(epoch);
            return;
        }
        // Contended: finish the cleanup once the lock frees up.
        let inner = Arc::clone(&self.inner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    inner.lock().await.abandon(epoch);
                });
            }
            Err(_) => warn!(epoch, "Backend call abandoned outside a runtime; engine stays busy"),
        }
    }
}

/// The intake conversation state machine.
pub struct ConversationEngine {
    gateway: Arc<dyn BackendGateway>,
    questions: QuestionTable,
    config: EngineConfig,
    inner: Arc<Mutex<EngineInner>>,
}

impl ConversationEngine {
    pub fn new(
        gateway: Arc<dyn BackendGateway>,
        questions: QuestionTable,
        config: EngineConfig,
    ) -> Self {
        Self {
            gateway,
            questions,
            config,
            inner: Arc::new(Mutex::new(EngineInner::default())),
        }
    }

    pub fn questions(&self) -> &QuestionTable {
        &self.questions
    }

    /// Greet the patient and ask the first personal-info question. No-op
    /// outside `Initial`.
    pub async fn start(&self) -> TurnOutcome {
        let mut inner = self.inner.lock().await;
        let mark = inner.messages.len();
        if inner.state == ConversationState::Initial {
            inner.transition(ConversationState::CollectingPersonalInfo);
            let prompt = self.prompt_at(Phase::PersonalInfo, 0);
            inner.push(Message::bot(prompt));
        }
        inner.outcome(mark)
    }

    /// Reset to `Initial` with an empty profile and log. A call in flight
    /// keeps `busy` set until it returns or its caller drops it; a late
    /// result is discarded.
    pub async fn restart(&self) {
        let mut inner = self.inner.lock().await;
        let busy = inner.busy;
        let epoch = inner.epoch + 1;
        *inner = EngineInner {
            busy,
            epoch,
            ..EngineInner::default()
        };
        info!(epoch, in_flight = busy, "Intake restarted");
    }

    /// Feed one raw answer to the current question.
    pub async fn submit_answer(&self, raw: &str) -> Result<TurnOutcome, IntakeError> {
        let mut inner = self.inner.lock().await;
        if inner.busy {
            return Err(IntakeError::Busy);
        }
        let Some(phase) = inner.state.phase() else {
            return Err(IntakeError::NotCollecting { state: inner.state });
        };

        inner.push(Message::user(raw));
        let mark = inner.messages.len();

        let set = self.questions.set(phase);
        let index = inner.question_index;
        let Some(question) = set.get(index) else {
            // The cursor is kept in range by construction.
            warn!(phase = %phase, index, "Question index out of range");
            return Err(IntakeError::NotCollecting { state: inner.state });
        };
        let field = question.field;

        let value = match validation::validate(field, raw) {
            Ok(value) => value,
            Err(e) => {
                debug!(field = %field, error = %e, "Answer rejected");
                inner.push(Message::bot(e.message.clone()));
                let prompt = inner
                    .follow_up_prompt
                    .clone()
                    .unwrap_or_else(|| question.prompt.clone());
                inner.push(Message::bot(prompt));
                return Err(IntakeError::Validation(e));
            }
        };

        if index < set.last_index() {
            if !inner.profile.insert(field, value) {
                warn!(field = %field, "Field already answered; keeping first value");
            }
            inner.question_index += 1;
            let prompt = self.prompt_at(phase, inner.question_index);
            inner.push(Message::bot(prompt));
            return Ok(inner.outcome(mark));
        }

        match phase {
            Phase::PersonalInfo => {
                inner.profile.insert(field, value);
                inner.transition(ConversationState::CollectingSymptoms);
                let prompt = self.prompt_at(Phase::Symptoms, 0);
                inner.push(Message::bot(prompt));
                Ok(inner.outcome(mark))
            }
            Phase::Symptoms => {
                let mut staged = inner.profile.clone();
                if inner.follow_up_prompt.is_some() {
                    staged.follow_ups.push(value.to_string());
                } else {
                    staged.insert(field, value);
                }
                let call = self.begin(&mut inner);
                drop(inner);
                self.analyze(staged, call, mark).await
            }
            Phase::MedicalHistory => {
                let mut staged = inner.profile.clone();
                staged.insert(field, value);
                inner.transition(ConversationState::AwaitingRecommendations);
                inner.question_index = index;
                let call = self.begin(&mut inner);
                drop(inner);
                self.recommend(staged, call, mark).await
            }
        }
    }

    async fn analyze(
        &self,
        staged: PatientProfile,
        call: InFlight,
        mark: usize,
    ) -> Result<TurnOutcome, IntakeError> {
        let symptoms = staged.symptom_list();
        info!(count = symptoms.len(), "Analyzing symptoms");

        let result = self.gateway.analyze_symptoms(&symptoms, &staged).await;
        let mut inner = self.finish(call).await?;

        let analysis = match result {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(error = %e, "Symptom analysis failed");
                inner.push(Message::error(prompts::ANALYSIS_FAILED));
                return Err(IntakeError::Backend(e));
            }
        };

        inner.profile = staged;
        let follow_ups = inner.profile.follow_ups.len();
        let limit = self.config.max_follow_ups as usize;

        if analysis.needs_more_info && follow_ups < limit {
            let question = analysis
                .follow_up_question
                .clone()
                .filter(|q| !q.trim().is_empty())
                .unwrap_or_else(|| prompts::FOLLOW_UP_FALLBACK.to_string());
            debug!(follow_ups, limit, "Analysis asked for more detail");
            inner.follow_up_prompt = Some(question.clone());
            inner.push(Message::bot(question).with_attachment(Attachment::Analysis(analysis)));
            return Ok(inner.outcome(mark));
        }

        let specialty = analysis.recommended_specialty.clone();
        let notice = if analysis.needs_more_info {
            info!(follow_ups, "Follow-up limit reached; moving on");
            Some(prompts::follow_up_limit_reached(specialty.as_deref()))
        } else {
            specialty.as_deref().map(prompts::specialty_found)
        };

        inner.profile.recommended_specialty = specialty;
        inner.follow_up_prompt = None;
        inner.transition(ConversationState::CollectingMedicalHistory);
        if let Some(text) = notice {
            inner.push(Message::bot(text).with_attachment(Attachment::Analysis(analysis)));
        }
        let prompt = self.prompt_at(Phase::MedicalHistory, 0);
        inner.push(Message::bot(prompt));
        Ok(inner.outcome(mark))
    }

    async fn recommend(
        &self,
        staged: PatientProfile,
        call: InFlight,
        mark: usize,
    ) -> Result<TurnOutcome, IntakeError> {
        let history = staged.history_text();
        info!("Requesting recommendations");

        let result = self.gateway.generate_recommendations(&staged, &history).await;
        let mut inner = self.finish(call).await?;

        match result {
            Ok(recommendations) => {
                inner.profile = staged;
                if inner.profile.recommended_specialty.is_none() {
                    inner.profile.recommended_specialty = Some(recommendations.specialty.clone());
                }
                inner.transition(ConversationState::Completed);
                let text = prompts::recommendation_summary(&recommendations);
                inner.push(
                    Message::bot(text)
                        .with_attachment(Attachment::Recommendations(recommendations)),
                );
                // Leave the cursor on the last question for display.
                inner.question_index = self.questions.set(Phase::MedicalHistory).last_index();
                Ok(inner.outcome(mark))
            }
            Err(e) => {
                warn!(error = %e, "Recommendation request failed");
                inner.transition(ConversationState::CollectingMedicalHistory);
                inner.question_index = self.questions.set(Phase::MedicalHistory).last_index();
                inner.push(Message::error(prompts::GENERIC_FAILURE));
                Err(IntakeError::Backend(e))
            }
        }
    }

    /// Free-form chat outside the question flow.
    pub async fn chat(&self, message: &str) -> Result<TurnOutcome, IntakeError> {
        let text = validation::validate(Field::ChatMessage, message)?.to_string();
        let (call, patient_id, mark) = {
            let mut inner = self.inner.lock().await;
            if inner.busy {
                return Err(IntakeError::Busy);
            }
            inner.push(Message::user(text.clone()));
            let mark = inner.messages.len();
            (self.begin(&mut inner), inner.patient_id.clone(), mark)
        };

        let result = self.gateway.chat(&text, patient_id.as_deref()).await;
        let mut inner = self.finish(call).await?;

        match result {
            Ok(reply) => {
                if reply.patient_id.is_some() {
                    inner.patient_id = reply.patient_id;
                }
                inner.push(Message::bot(reply.response));
                Ok(inner.outcome(mark))
            }
            Err(e) => {
                warn!(error = %e, "Chat request failed");
                inner.push(Message::error(prompts::GENERIC_FAILURE));
                Err(IntakeError::Backend(e))
            }
        }
    }

    /// Current queue for the recommended specialty. Completed intakes only.
    pub async fn queue_status(&self) -> Result<QueueStatus, IntakeError> {
        let (call, specialty) = {
            let mut inner = self.inner.lock().await;
            let specialty = self.completed_specialty(&inner)?;
            (self.begin(&mut inner), specialty)
        };

        let result = self.gateway.get_queue_status(&specialty).await;
        let mut inner = self.finish(call).await?;

        match result {
            Ok(status) => {
                let text = prompts::queue_summary(&specialty, &status);
                inner.push(Message::bot(text).with_attachment(Attachment::QueueStatus(status)));
                Ok(status)
            }
            Err(e) => {
                warn!(error = %e, specialty = %specialty, "Queue status request failed");
                inner.push(Message::error(prompts::GENERIC_FAILURE));
                Err(IntakeError::Backend(e))
            }
        }
    }

    /// Book a slot with the recommended specialty. `date` is `YYYY-MM-DD`
    /// and may not be in the past; `time` must be a clinic slot.
    pub async fn book_appointment(
        &self,
        date: &str,
        time: &str,
    ) -> Result<BookingConfirmation, IntakeError> {
        let today = Local::now().date_naive();
        let (call, specialty, profile, date, slot) = {
            let mut inner = self.inner.lock().await;
            let specialty = self.completed_specialty(&inner)?;
            if inner.booking.is_some() {
                return Err(IntakeError::AlreadyBooked);
            }
            let checked = validation::validate_appointment_date(date, today)
                .and_then(|d| validation::validate_time_slot(time).map(|t| (d, t)));
            let (date, slot) = match checked {
                Ok(pair) => pair,
                Err(e) => {
                    inner.push(Message::bot(e.message.clone()));
                    return Err(IntakeError::Validation(e));
                }
            };
            (self.begin(&mut inner), specialty, inner.profile.clone(), date, slot)
        };

        info!(specialty = %specialty, %date, time = slot, "Booking appointment");
        let result = self
            .gateway
            .book_appointment(&specialty, &profile, date, slot)
            .await;
        let mut inner = self.finish(call).await?;

        match result {
            Ok(confirmation) => {
                let text =
                    prompts::booking_summary(&specialty, &date.to_string(), slot, &confirmation);
                inner.booking = Some(confirmation.clone());
                inner.push(
                    Message::bot(text).with_attachment(Attachment::Booking(confirmation.clone())),
                );
                Ok(confirmation)
            }
            Err(e) => {
                warn!(error = %e, "Booking failed");
                inner.push(Message::error(prompts::GENERIC_FAILURE));
                Err(IntakeError::Backend(e))
            }
        }
    }

    /// Persist the full profile on the backend. Completed intakes only.
    pub async fn save_profile(&self) -> Result<Acknowledgement, IntakeError> {
        let (call, profile) = {
            let mut inner = self.inner.lock().await;
            if inner.state != ConversationState::Completed {
                return Err(IntakeError::NotCompleted { state: inner.state });
            }
            if inner.busy {
                return Err(IntakeError::Busy);
            }
            (self.begin(&mut inner), inner.profile.clone())
        };

        let result = self.gateway.save_profile(&profile).await;
        let mut inner = self.finish(call).await?;

        match result {
            Ok(ack) => {
                inner.push(Message::system(prompts::PROFILE_SAVED));
                Ok(ack)
            }
            Err(e) => {
                warn!(error = %e, "Saving profile failed");
                inner.push(Message::error(prompts::GENERIC_FAILURE));
                Err(IntakeError::Backend(e))
            }
        }
    }

    /// Fold a pushed frame into the message log. Never touches state or
    /// profile.
    pub async fn ingest_frame(&self, frame: Value) -> Message {
        let message = message_from_frame(frame);
        let mut inner = self.inner.lock().await;
        inner.push(message.clone());
        message
    }

    /// Append a system notice to the log.
    pub async fn notify(&self, text: impl Into<String>) -> Message {
        let message = Message::system(text);
        self.inner.lock().await.push(message.clone());
        message
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        let inner = self.inner.lock().await;
        EngineSnapshot {
            state: inner.state,
            question_index: inner.question_index,
            current_prompt: self.current_prompt(&inner),
            busy: inner.busy,
            profile: inner.profile.clone(),
            messages: inner.messages.clone(),
            booking: inner.booking.clone(),
        }
    }

    pub async fn state(&self) -> ConversationState {
        self.inner.lock().await.state
    }

    /// Log entries from `offset` on. Empty if the log was reset below it.
    pub async fn messages_since(&self, offset: usize) -> Vec<Message> {
        let inner = self.inner.lock().await;
        inner.messages.get(offset..).map(<[Message]>::to_vec).unwrap_or_default()
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn prompt_at(&self, phase: Phase, index: usize) -> String {
        self.questions
            .set(phase)
            .get(index)
            .map(|q| q.prompt.clone())
            .unwrap_or_default()
    }

    fn current_prompt(&self, inner: &EngineInner) -> Option<String> {
        if let Some(ref prompt) = inner.follow_up_prompt {
            return Some(prompt.clone());
        }
        let phase = inner.state.phase()?;
        self.questions
            .set(phase)
            .get(inner.question_index)
            .map(|q| q.prompt.clone())
    }

    /// Common gate for the post-intake operations.
    fn completed_specialty(&self, inner: &EngineInner) -> Result<String, IntakeError> {
        if inner.state != ConversationState::Completed {
            return Err(IntakeError::NotCompleted { state: inner.state });
        }
        if inner.busy {
            return Err(IntakeError::Busy);
        }
        inner
            .profile
            .recommended_specialty
            .clone()
            .ok_or(IntakeError::NoSpecialty)
    }

    fn begin(&self, inner: &mut EngineInner) -> InFlight {
        inner.busy = true;
        InFlight {
            inner: Arc::clone(&self.inner),
            epoch: inner.epoch,
            armed: true,
        }
    }

    /// Re-acquire the state after `call` returned.
    async fn finish(&self, mut call: InFlight) -> Result<MutexGuard<'_, EngineInner>, IntakeError> {
        let mut inner = self.inner.lock().await;
        call.armed = false;
        let epoch = call.epoch;
        inner.busy = false;
        if inner.epoch != epoch {
            debug!(started = epoch, current = inner.epoch, "Discarding result from before restart");
            return Err(IntakeError::Restarted);
        }
        Ok(inner)
    }
}

fn frame_text<'a>(frame: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|key| frame.get(*key).and_then(Value::as_str))
}

fn message_from_frame(frame: Value) -> Message {
    let kind = frame.get("type").and_then(Value::as_str).unwrap_or_default();
    let text = match kind {
        "message" | "response" => frame_text(&frame, &["content", "response"]).map(Message::bot),
        "error" => Some(Message::error(
            frame_text(&frame, &["message", "content"]).unwrap_or(prompts::GENERIC_FAILURE),
        )),
        "status" => frame_text(&frame, &["message", "content", "status"]).map(Message::system),
        _ => None,
    };
    match text {
        Some(message) => message,
        None => {
            debug!(kind, "Unrecognized push frame");
            Message::system(prompts::UNRECOGNIZED_FRAME).with_attachment(Attachment::Frame(frame))
        }
    }
}

/// Feed push-channel events into `engine` until the channel closes.
pub fn spawn_event_forwarder(
    engine: Arc<ConversationEngine>,
    mut events: mpsc::UnboundedReceiver<SocketEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SocketEvent::Frame(frame) => {
                    engine.ingest_frame(frame).await;
                }
                SocketEvent::Failed { attempts } => {
                    warn!(attempts, "Push channel failed permanently");
                    engine.notify(prompts::CONNECTION_LOST).await;
                }
                other => debug!(event = ?other, "Push channel event"),
            }
        }
        debug!("Event forwarder stopped");
    })
}
