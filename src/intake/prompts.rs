//! Bot replies emitted by the engine outside the question tables.

use crate::gateway::{BookingConfirmation, QueueStatus, Recommendations};

pub const FOLLOW_UP_FALLBACK: &str =
    "Vui lòng mô tả chi tiết hơn về triệu chứng của bạn. Ví dụ: vị trí đau, mức độ đau, thời gian kéo dài?";

pub const ANALYSIS_FAILED: &str =
    "Xin lỗi, có lỗi xảy ra khi phân tích triệu chứng. Vui lòng thử lại.";

pub const GENERIC_FAILURE: &str = "Xin lỗi, có lỗi xảy ra. Vui lòng thử lại sau.";

pub const RECOMMENDATIONS_READY: &str = "Dựa trên thông tin của bạn, đây là các đề xuất của tôi:";

pub const PROFILE_SAVED: &str = "Thông tin bệnh nhân đã được lưu.";

pub const CONNECTION_LOST: &str =
    "Mất kết nối tới máy chủ. Vui lòng tải lại trang hoặc thử lại sau.";

pub const UNRECOGNIZED_FRAME: &str = "Nhận được thông báo từ máy chủ.";

/// Reply after symptom analysis picked a specialty.
pub fn specialty_found(specialty: &str) -> String {
    format!("Dựa trên triệu chứng của bạn, tôi đề xuất khám tại khoa {specialty}.")
}

/// Reply when the follow-up bound forces the intake forward.
pub fn follow_up_limit_reached(specialty: Option<&str>) -> String {
    match specialty {
        Some(s) => format!(
            "Tôi đã ghi nhận các triệu chứng của bạn. Tạm thời đề xuất khám tại khoa {s}; bác sĩ sẽ hỏi thêm khi khám."
        ),
        None => "Tôi đã ghi nhận các triệu chứng của bạn. Bác sĩ sẽ hỏi thêm khi khám.".to_string(),
    }
}

pub fn recommendation_summary(rec: &Recommendations) -> String {
    format!(
        "{RECOMMENDATIONS_READY}\nChuyên khoa: {}\nMức độ ưu tiên: {}\nThời gian chờ dự kiến: {}",
        rec.specialty, rec.urgency, rec.estimated_wait_time
    )
}

pub fn queue_summary(specialty: &str, status: &QueueStatus) -> String {
    format!(
        "Khoa {specialty}: số thứ tự hiện tại {}, thời gian chờ khoảng {} phút.",
        status.current_number, status.waiting_time_minutes
    )
}

pub fn booking_summary(specialty: &str, date: &str, time: &str, confirmation: &BookingConfirmation) -> String {
    let mut text = format!("Đặt lịch thành công! Thời gian: {date} {time}. Chuyên khoa: {specialty}.");
    if let Some(ref id) = confirmation.confirmation_id {
        text.push_str(&format!(" Mã xác nhận: {id}."));
    }
    text
}
