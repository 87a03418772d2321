use chrono::NaiveTime;

use crate::limits::*;
use crate::model::Ms;

use super::BookingError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_timestamp(t: Ms) -> Result<(), BookingError> {
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(BookingError::Invalid(format!("timestamp {t} out of range")));
    }
    Ok(())
}

pub(crate) fn validate_text(field: &str, value: Option<&str>, max: usize) -> Result<(), BookingError> {
    match value {
        Some(v) if v.len() > max => Err(BookingError::Invalid(format!(
            "{field} too long ({} > {max} bytes)",
            v.len()
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn validate_duration(minutes: u32) -> Result<(), BookingError> {
    if minutes == 0 || minutes > MAX_DURATION_MINUTES {
        return Err(BookingError::Invalid(format!(
            "duration must be 1..={MAX_DURATION_MINUTES} minutes, got {minutes}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_window(day_of_week: u8, start: NaiveTime, end: NaiveTime) -> Result<(), BookingError> {
    if day_of_week > 6 {
        return Err(BookingError::Invalid(format!(
            "day_of_week must be 0..=6, got {day_of_week}"
        )));
    }
    if start >= end {
        return Err(BookingError::Invalid(format!(
            "window start {start} must be before end {end}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_bounds() {
        assert!(validate_timestamp(MIN_VALID_TIMESTAMP_MS).is_ok());
        assert!(validate_timestamp(MIN_VALID_TIMESTAMP_MS - 1).is_err());
        assert!(validate_timestamp(MAX_VALID_TIMESTAMP_MS).is_err());
    }

    #[test]
    fn text_limits() {
        assert!(validate_text("notes", None, 3).is_ok());
        assert!(validate_text("notes", Some("abc"), 3).is_ok());
        let err = validate_text("notes", Some("abcd"), 3).unwrap_err();
        assert!(err.to_string().contains("notes too long"));
    }

    #[test]
    fn duration_limits() {
        assert!(validate_duration(0).is_err());
        assert!(validate_duration(1).is_ok());
        assert!(validate_duration(MAX_DURATION_MINUTES).is_ok());
        assert!(validate_duration(MAX_DURATION_MINUTES + 1).is_err());
    }

    #[test]
    fn window_shape() {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        assert!(validate_window(1, nine, noon).is_ok());
        assert!(validate_window(7, nine, noon).is_err());
        assert!(validate_window(1, noon, nine).is_err());
        assert!(validate_window(1, nine, nine).is_err());
    }
}
