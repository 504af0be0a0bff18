//! Patient intake conversation: the phase state machine, the profile it
//! builds and the rules applied to each answer.

pub mod engine;
pub mod model;
pub mod prompts;
pub mod questions;
pub mod state;
pub mod validation;

pub use engine::{ConversationEngine, EngineSnapshot, TurnOutcome, spawn_event_forwarder};
pub use model::{Attachment, Field, FieldValue, Gender, Message, MessageKind, PatientProfile};
pub use questions::{Question, QuestionSet, QuestionTable};
pub use state::{ConversationState, Phase};
