//! Patient profile and message log data models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::Phase;
use crate::gateway::{BookingConfirmation, QueueStatus, Recommendations, SymptomAnalysis};

/// A named input the intake collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    // Personal info
    Name,
    Age,
    Gender,
    Contact,
    // Symptoms
    Description,
    Duration,
    Severity,
    Location,
    Frequency,
    // Medical history
    History,
    ChronicConditions,
    Surgeries,
    Medications,
    Allergies,
    // Outside the phase tables
    AppointmentDate,
    AppointmentTime,
    ChatMessage,
}

impl Field {
    /// The phase whose profile section this field belongs to.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Field::Name | Field::Age | Field::Gender | Field::Contact => Some(Phase::PersonalInfo),
            Field::Description
            | Field::Duration
            | Field::Severity
            | Field::Location
            | Field::Frequency => Some(Phase::Symptoms),
            Field::History
            | Field::ChronicConditions
            | Field::Surgeries
            | Field::Medications
            | Field::Allergies => Some(Phase::MedicalHistory),
            Field::AppointmentDate | Field::AppointmentTime | Field::ChatMessage => None,
        }
    }

    /// Wire name of the field.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Age => "age",
            Field::Gender => "gender",
            Field::Contact => "contact",
            Field::Description => "description",
            Field::Duration => "duration",
            Field::Severity => "severity",
            Field::Location => "location",
            Field::Frequency => "frequency",
            Field::History => "history",
            Field::ChronicConditions => "chronicConditions",
            Field::Surgeries => "surgeries",
            Field::Medications => "medications",
            Field::Allergies => "allergies",
            Field::AppointmentDate => "appointmentDate",
            Field::AppointmentTime => "appointmentTime",
            Field::ChatMessage => "chatMessage",
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Male => write!(f, "male"),
            Self::Female => write!(f, "female"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A normalized, validated answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(u32),
    Gender(Gender),
    /// An optional field the user left blank.
    Absent,
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
            Self::Gender(g) => write!(f, "{g}"),
            Self::Absent => Ok(()),
        }
    }
}

/// Validated patient data, partitioned by phase.
///
/// Sent as `patientInfo` in backend requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientProfile {
    pub personal_info: BTreeMap<Field, FieldValue>,
    pub symptoms: BTreeMap<Field, FieldValue>,
    pub medical_history: BTreeMap<Field, FieldValue>,
    /// Answers to follow-up questions asked by the symptom analysis.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub follow_ups: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_specialty: Option<String>,
}

impl PatientProfile {
    pub fn is_empty(&self) -> bool {
        self.personal_info.is_empty()
            && self.symptoms.is_empty()
            && self.medical_history.is_empty()
            && self.follow_ups.is_empty()
            && self.recommended_specialty.is_none()
    }

    pub fn section(&self, phase: Phase) -> &BTreeMap<Field, FieldValue> {
        match phase {
            Phase::PersonalInfo => &self.personal_info,
            Phase::Symptoms => &self.symptoms,
            Phase::MedicalHistory => &self.medical_history,
        }
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        field.phase().and_then(|phase| self.section(phase).get(&field))
    }

    /// Write a validated value. Fields are write-once: returns `false` (and
    /// leaves the profile untouched) if the field is already set or belongs to
    /// no phase.
    pub(crate) fn insert(&mut self, field: Field, value: FieldValue) -> bool {
        let section = match field.phase() {
            Some(Phase::PersonalInfo) => &mut self.personal_info,
            Some(Phase::Symptoms) => &mut self.symptoms,
            Some(Phase::MedicalHistory) => &mut self.medical_history,
            None => return false,
        };
        if section.contains_key(&field) {
            return false;
        }
        section.insert(field, value);
        true
    }

    /// Symptom list for analysis: the description and every follow-up answer,
    /// split on commas, lowercased and trimmed.
    pub fn symptom_list(&self) -> Vec<String> {
        self.symptoms
            .get(&Field::Description)
            .and_then(FieldValue::as_text)
            .into_iter()
            .chain(self.follow_ups.iter().map(String::as_str))
            .flat_map(|text| text.split(','))
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Medical history answers joined into one free-text block.
    pub fn history_text(&self) -> String {
        self.medical_history
            .values()
            .map(ToString::to_string)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Who authored a message in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Bot,
    System,
    Error,
}

/// Structured data carried alongside a message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Attachment {
    Analysis(SymptomAnalysis),
    Recommendations(Recommendations),
    QueueStatus(QueueStatus),
    Booking(BookingConfirmation),
    /// A push frame that did not match a known shape.
    Frame(serde_json::Value),
}

/// One entry of the append-only conversation log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl Message {
    pub fn new(kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            content: content.into(),
            timestamp: Utc::now(),
            attachment: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageKind::User, content)
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Bot, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageKind::System, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(MessageKind::Error, content)
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_map_to_their_phase() {
        assert_eq!(Field::Age.phase(), Some(Phase::PersonalInfo));
        assert_eq!(Field::Severity.phase(), Some(Phase::Symptoms));
        assert_eq!(Field::Allergies.phase(), Some(Phase::MedicalHistory));
        assert_eq!(Field::AppointmentTime.phase(), None);
    }

    #[test]
    fn insert_is_write_once() {
        let mut profile = PatientProfile::default();
        assert!(profile.insert(Field::Name, FieldValue::Text("An".into())));
        assert!(!profile.insert(Field::Name, FieldValue::Text("Bình".into())));
        assert_eq!(profile.get(Field::Name), Some(&FieldValue::Text("An".into())));
    }

    #[test]
    fn insert_rejects_fields_outside_phases() {
        let mut profile = PatientProfile::default();
        assert!(!profile.insert(Field::ChatMessage, FieldValue::Text("hi".into())));
        assert!(profile.is_empty());
    }

    #[test]
    fn symptom_list_splits_description_and_follow_ups() {
        let mut profile = PatientProfile::default();
        profile.insert(
            Field::Description,
            FieldValue::Text("Đau đầu, chóng mặt".into()),
        );
        profile.follow_ups.push(" Sốt nhẹ ,".into());

        assert_eq!(
            profile.symptom_list(),
            vec!["đau đầu", "chóng mặt", "sốt nhẹ"]
        );
    }

    #[test]
    fn history_text_joins_answers_in_field_order() {
        let mut profile = PatientProfile::default();
        profile.insert(Field::Allergies, FieldValue::Text("penicillin".into()));
        profile.insert(
            Field::ChronicConditions,
            FieldValue::Text("tiểu đường".into()),
        );
        assert_eq!(profile.history_text(), "tiểu đường; penicillin");
    }

    #[test]
    fn profile_serializes_with_wire_keys() {
        let mut profile = PatientProfile::default();
        profile.insert(Field::Name, FieldValue::Text("An".into()));
        profile.insert(Field::Age, FieldValue::Number(34));
        profile.insert(Field::Gender, FieldValue::Gender(Gender::Male));
        profile.insert(Field::Severity, FieldValue::Absent);

        let json = serde_json::to_value(&profile).unwrap();
        assert_eq!(json["personalInfo"]["name"], "An");
        assert_eq!(json["personalInfo"]["age"], 34);
        assert_eq!(json["personalInfo"]["gender"], "male");
        assert!(json["symptoms"]["severity"].is_null());
        assert!(json.get("followUps").is_none());
    }

    #[test]
    fn message_constructors_set_kind() {
        assert_eq!(Message::user("x").kind, MessageKind::User);
        assert_eq!(Message::bot("x").kind, MessageKind::Bot);
        assert_eq!(Message::system("x").kind, MessageKind::System);
        let err = Message::error("x").with_attachment(Attachment::Frame(serde_json::json!({})));
        assert_eq!(err.kind, MessageKind::Error);
        assert!(err.attachment.is_some());
    }
}
