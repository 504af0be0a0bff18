//! Question tables: the ordered prompts asked in each phase.
//!
//! The engine is parameterised by a [`QuestionTable`], so the chat-style
//! consultation and the multi-field wizard share one state machine.

use serde::Serialize;

use super::model::Field;
use super::state::Phase;
use crate::error::ConfigError;

/// One prompt and the field its answer fills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    pub field: Field,
    pub prompt: String,
}

impl Question {
    pub fn new(field: Field, prompt: impl Into<String>) -> Self {
        Self {
            field,
            prompt: prompt.into(),
        }
    }
}

/// Ordered questions of a single phase. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionSet {
    phase: Phase,
    questions: Vec<Question>,
}

impl QuestionSet {
    /// Build a set, checking it is non-empty, that every field belongs to
    /// `phase` and that no field repeats.
    pub fn new(phase: Phase, questions: Vec<Question>) -> Result<Self, ConfigError> {
        if questions.is_empty() {
            return Err(ConfigError::InvalidQuestionTable(format!(
                "phase {phase} has no questions"
            )));
        }
        for (i, q) in questions.iter().enumerate() {
            if q.field.phase() != Some(phase) {
                return Err(ConfigError::InvalidQuestionTable(format!(
                    "field {} does not belong to phase {phase}",
                    q.field
                )));
            }
            if questions[..i].iter().any(|prev| prev.field == q.field) {
                return Err(ConfigError::InvalidQuestionTable(format!(
                    "field {} is asked twice in phase {phase}",
                    q.field
                )));
            }
        }
        Ok(Self { phase, questions })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn get(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    pub fn last_index(&self) -> usize {
        self.questions.len() - 1
    }

    pub fn iter(&self) -> impl Iterator<Item = &Question> {
        self.questions.iter()
    }
}

/// The three phase sets an engine walks through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionTable {
    personal_info: QuestionSet,
    symptoms: QuestionSet,
    medical_history: QuestionSet,
}

impl QuestionTable {
    pub fn new(
        personal_info: QuestionSet,
        symptoms: QuestionSet,
        medical_history: QuestionSet,
    ) -> Result<Self, ConfigError> {
        let sets = [
            (&personal_info, Phase::PersonalInfo),
            (&symptoms, Phase::Symptoms),
            (&medical_history, Phase::MedicalHistory),
        ];
        for (set, expected) in sets {
            if set.phase() != expected {
                return Err(ConfigError::InvalidQuestionTable(format!(
                    "expected a {expected} set, got {}",
                    set.phase()
                )));
            }
        }
        Ok(Self {
            personal_info,
            symptoms,
            medical_history,
        })
    }

    pub fn set(&self, phase: Phase) -> &QuestionSet {
        match phase {
            Phase::PersonalInfo => &self.personal_info,
            Phase::Symptoms => &self.symptoms,
            Phase::MedicalHistory => &self.medical_history,
        }
    }

    /// Chat-style consultation: four personal questions, one free-text
    /// symptom question and one history question.
    pub fn consultation() -> Self {
        Self {
            personal_info: personal_info_set(),
            symptoms: QuestionSet {
                phase: Phase::Symptoms,
                questions: vec![Question::new(
                    Field::Description,
                    "Bạn đang gặp phải những triệu chứng gì?",
                )],
            },
            medical_history: QuestionSet {
                phase: Phase::MedicalHistory,
                questions: vec![Question::new(
                    Field::History,
                    "Bạn có tiền sử bệnh lý nào cần lưu ý không?",
                )],
            },
        }
    }

    /// Multi-field wizard form.
    pub fn wizard() -> Self {
        Self {
            personal_info: personal_info_set(),
            symptoms: QuestionSet {
                phase: Phase::Symptoms,
                questions: vec![
                    Question::new(Field::Description, "Mô tả triệu chứng của bạn?"),
                    Question::new(Field::Duration, "Triệu chứng này đã kéo dài bao lâu?"),
                    Question::new(
                        Field::Severity,
                        "Mức độ khó chịu của triệu chứng từ 1-10? (có thể bỏ trống)",
                    ),
                    Question::new(Field::Location, "Triệu chứng xuất hiện ở vị trí nào?"),
                ],
            },
            medical_history: QuestionSet {
                phase: Phase::MedicalHistory,
                questions: vec![
                    Question::new(Field::ChronicConditions, "Bạn có bệnh mãn tính nào không?"),
                    Question::new(Field::Surgeries, "Bạn đã từng phẫu thuật chưa?"),
                    Question::new(Field::Medications, "Bạn đang dùng thuốc gì không?"),
                    Question::new(Field::Allergies, "Bạn có dị ứng với thuốc hoặc thực phẩm nào không?"),
                ],
            },
        }
    }
}

impl Default for QuestionTable {
    fn default() -> Self {
        Self::consultation()
    }
}

fn personal_info_set() -> QuestionSet {
    QuestionSet {
        phase: Phase::PersonalInfo,
        questions: vec![
            Question::new(
                Field::Name,
                "Xin chào! Tôi là trợ lý y tế ảo. Xin cho biết họ tên đầy đủ của bạn?",
            ),
            Question::new(Field::Age, "Bạn bao nhiêu tuổi?"),
            Question::new(Field::Gender, "Xin cho biết giới tính của bạn (Nam/Nữ/Khác)?"),
            Question::new(
                Field::Contact,
                "Vui lòng cung cấp số điện thoại hoặc email để liên hệ?",
            ),
        ],
    }
}
