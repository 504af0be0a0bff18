//! Per-field validators and normalizers.
//!
//! Pure functions: no I/O, no state. Each returns the normalized value or a
//! [`ValidationError`] whose message is shown to the user.

use chrono::NaiveDate;

use super::model::{Field, FieldValue, Gender};
use crate::error::ValidationError;

/// Inclusive age bounds.
pub const MIN_AGE: i64 = 0;
pub const MAX_AGE: i64 = 150;

/// Inclusive severity bounds.
pub const MIN_SEVERITY: i64 = 1;
pub const MAX_SEVERITY: i64 = 10;

/// Bookable clinic time slots.
pub const TIME_SLOTS: [&str; 10] = [
    "08:00", "08:30", "09:00", "09:30", "10:00", "10:30", "11:00", "14:00", "14:30", "15:00",
];

/// Validate a raw answer for `field`.
pub fn validate(field: Field, raw: &str) -> Result<FieldValue, ValidationError> {
    match field {
        Field::Name => non_empty(field, raw, "Vui lòng nhập họ tên."),
        Field::Age => validate_age(raw).map(FieldValue::Number),
        Field::Gender => validate_gender(raw).map(FieldValue::Gender),
        Field::Contact => non_empty(field, raw, "Vui lòng nhập thông tin liên hệ."),
        Field::Description => non_empty(field, raw, "Vui lòng mô tả triệu chứng."),
        Field::Duration => non_empty(field, raw, "Vui lòng nhập thời gian xuất hiện triệu chứng."),
        Field::Location => non_empty(field, raw, "Vui lòng cho biết vị trí triệu chứng."),
        Field::Frequency => non_empty(field, raw, "Vui lòng cho biết tần suất triệu chứng."),
        Field::Severity => validate_severity(raw),
        Field::History
        | Field::ChronicConditions
        | Field::Surgeries
        | Field::Medications
        | Field::Allergies => non_empty(field, raw, "Vui lòng điền thông tin."),
        Field::ChatMessage => non_empty(field, raw, "Vui lòng nhập tin nhắn."),
        Field::AppointmentDate => non_empty(field, raw, "Vui lòng chọn ngày khám."),
        Field::AppointmentTime => {
            validate_time_slot(raw).map(|slot| FieldValue::Text(slot.to_string()))
        }
    }
}

fn non_empty(field: Field, raw: &str, message: &str) -> Result<FieldValue, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new(field, message));
    }
    Ok(FieldValue::Text(trimmed.to_string()))
}

/// Integer age in `[0, 150]`.
pub fn validate_age(raw: &str) -> Result<u32, ValidationError> {
    let invalid = || ValidationError::new(Field::Age, "Vui lòng nhập tuổi hợp lệ (0-150).");
    let age: i64 = raw.trim().parse().map_err(|_| invalid())?;
    if !(MIN_AGE..=MAX_AGE).contains(&age) {
        return Err(invalid());
    }
    u32::try_from(age).map_err(|_| invalid())
}

/// Case-insensitive male/female/other, also accepting the Vietnamese labels.
pub fn validate_gender(raw: &str) -> Result<Gender, ValidationError> {
    match raw.trim().to_lowercase().as_str() {
        "male" | "nam" => Ok(Gender::Male),
        "female" | "nữ" => Ok(Gender::Female),
        "other" | "khác" => Ok(Gender::Other),
        _ => Err(ValidationError::new(
            Field::Gender,
            "Vui lòng chọn giới tính: Nam, Nữ hoặc Khác.",
        )),
    }
}

/// Optional severity: blank is accepted as absent, otherwise an integer in
/// `[1, 10]`.
pub fn validate_severity(raw: &str) -> Result<FieldValue, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(FieldValue::Absent);
    }
    let invalid = || ValidationError::new(Field::Severity, "Vui lòng nhập mức độ từ 1 đến 10.");
    let severity: i64 = trimmed.parse().map_err(|_| invalid())?;
    if !(MIN_SEVERITY..=MAX_SEVERITY).contains(&severity) {
        return Err(invalid());
    }
    u32::try_from(severity)
        .map(FieldValue::Number)
        .map_err(|_| invalid())
}

/// `YYYY-MM-DD`, not before `today`.
pub fn validate_appointment_date(raw: &str, today: NaiveDate) -> Result<NaiveDate, ValidationError> {
    let date = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        ValidationError::new(
            Field::AppointmentDate,
            "Vui lòng nhập ngày khám theo định dạng YYYY-MM-DD.",
        )
    })?;
    if date < today {
        return Err(ValidationError::new(
            Field::AppointmentDate,
            "Không thể đặt lịch cho ngày đã qua.",
        ));
    }
    Ok(date)
}

/// One of the fixed [`TIME_SLOTS`].
pub fn validate_time_slot(raw: &str) -> Result<&'static str, ValidationError> {
    let trimmed = raw.trim();
    TIME_SLOTS
        .iter()
        .copied()
        .find(|slot| *slot == trimmed)
        .ok_or_else(|| {
            ValidationError::new(
                Field::AppointmentTime,
                format!("Vui lòng chọn giờ khám: {}.", TIME_SLOTS.join(", ")),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_is_trimmed_and_required() {
        assert_eq!(
            validate(Field::Name, "  An  ").unwrap(),
            FieldValue::Text("An".into())
        );
        assert!(validate(Field::Name, "   ").is_err());
        assert!(validate(Field::Name, "").is_err());
    }

    #[test]
    fn age_boundaries() {
        assert_eq!(validate_age("0").unwrap(), 0);
        assert_eq!(validate_age("150").unwrap(), 150);
        assert_eq!(validate_age(" 34 ").unwrap(), 34);
        assert!(validate_age("-1").is_err());
        assert!(validate_age("151").is_err());
    }

    #[test]
    fn age_must_be_an_integer() {
        for raw in ["", "abc", "34.5", "ba mươi", "1e2"] {
            let err = validate_age(raw).unwrap_err();
            assert_eq!(err.field, Field::Age, "input {raw:?}");
        }
    }

    #[test]
    fn gender_accepts_case_insensitive_variants() {
        let cases = [
            ("male", Gender::Male),
            ("MALE", Gender::Male),
            ("Nam", Gender::Male),
            ("nam", Gender::Male),
            ("Female", Gender::Female),
            ("NỮ", Gender::Female),
            ("nữ", Gender::Female),
            ("oThEr", Gender::Other),
            ("Khác", Gender::Other),
        ];
        for (raw, expected) in cases {
            assert_eq!(validate_gender(raw).unwrap(), expected, "input {raw:?}");
        }
    }

    #[test]
    fn gender_rejects_everything_else() {
        for raw in ["", "m", "f", "man", "woman", "unknown", "nam nữ", "males"] {
            assert!(validate_gender(raw).is_err(), "input {raw:?} should be rejected");
        }
    }

    #[test]
    fn contact_is_required() {
        assert!(validate(Field::Contact, "an@example.com").is_ok());
        assert!(validate(Field::Contact, " \t").is_err());
    }

    #[test]
    fn symptom_text_fields_are_required() {
        for field in [Field::Description, Field::Duration, Field::Location] {
            assert!(validate(field, "").is_err(), "{field} blank");
            assert!(validate(field, "đau đầu").is_ok(), "{field} filled");
        }
    }

    #[test]
    fn severity_is_optional_but_bounded() {
        assert_eq!(validate(Field::Severity, "").unwrap(), FieldValue::Absent);
        assert_eq!(validate(Field::Severity, "1").unwrap(), FieldValue::Number(1));
        assert_eq!(validate(Field::Severity, "10").unwrap(), FieldValue::Number(10));
        assert!(validate(Field::Severity, "0").is_err());
        assert!(validate(Field::Severity, "11").is_err());
        assert!(validate(Field::Severity, "rất đau").is_err());
    }

    #[test]
    fn errors_name_their_field() {
        let err = validate(Field::Gender, "x").unwrap_err();
        assert_eq!(err.field, Field::Gender);
        assert!(!err.message.is_empty());
    }

    #[test]
    fn appointment_date_rules() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        assert_eq!(
            validate_appointment_date("2026-10-17", today).unwrap(),
            today
        );
        assert!(validate_appointment_date("2026-10-20", today).is_ok());
        assert!(validate_appointment_date("2026-10-16", today).is_err());
        assert!(validate_appointment_date("17/10/2026", today).is_err());
    }

    #[test]
    fn time_slot_must_be_listed() {
        assert_eq!(validate_time_slot(" 08:30 ").unwrap(), "08:30");
        assert!(validate_time_slot("12:00").is_err());
        assert!(validate_time_slot("8:30").is_err());
    }
}
