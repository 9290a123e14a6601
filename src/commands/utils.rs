use crate::error::{HarvestError, HarvestResult};
use chrono::{Local, NaiveDate};
use rust_decimal::Decimal;

pub const QUALITY_GRADES: [&str; 4] = ["A", "B", "C", "D"];

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn parse_date_safe(date_str: &str) -> Option<NaiveDate> {
    if date_str.trim().is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(date_str, "%Y%m%d"))
        .ok()
}

/// Optional query-string date; blank is `None`, garbage is a validation error.
pub fn parse_date_param(name: &str, value: Option<&str>) -> HarvestResult<Option<NaiveDate>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => parse_date_safe(v)
            .map(Some)
            .ok_or_else(|| HarvestError::validation(format!("Invalid {}: {}", name, v))),
    }
}

pub fn validate_grade(grade: &str) -> HarvestResult<String> {
    let g = grade.trim().to_uppercase();
    if QUALITY_GRADES.contains(&g.as_str()) {
        Ok(g)
    } else {
        Err(HarvestError::validation(format!(
            "Quality grade must be one of A, B, C, D (got '{}')",
            grade
        )))
    }
}

pub fn validate_positive(what: &str, value: Decimal) -> HarvestResult<()> {
    if value <= Decimal::ZERO {
        return Err(HarvestError::validation(format!("{} must be greater than 0", what)));
    }
    Ok(())
}

pub fn validate_non_negative(what: &str, value: Decimal) -> HarvestResult<()> {
    if value < Decimal::ZERO {
        return Err(HarvestError::validation(format!("{} cannot be negative", what)));
    }
    Ok(())
}

pub fn require_text(what: &str, value: &str) -> HarvestResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(HarvestError::validation(format!("{} is required", what)));
    }
    Ok(v.to_string())
}

/// Maps a unique-constraint violation to a 409 with a readable message.
pub fn conflict_on_unique(e: sqlx::Error, msg: &str) -> HarvestError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
            HarvestError::Conflict(msg.to_string())
        }
        _ => HarvestError::Database(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_safe() {
        assert_eq!(parse_date_safe("2024-03-01"), NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(parse_date_safe("20240301"), NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(parse_date_safe("  "), None);
        assert_eq!(parse_date_safe("March"), None);
    }

    #[test]
    fn test_parse_date_param() {
        assert_eq!(parse_date_param("start_date", None).unwrap(), None);
        assert_eq!(parse_date_param("start_date", Some("")).unwrap(), None);
        assert!(parse_date_param("start_date", Some("2024-13-40")).is_err());
    }

    #[test]
    fn test_validate_grade() {
        assert_eq!(validate_grade("b").unwrap(), "B");
        assert!(validate_grade("E").is_err());
        assert!(validate_grade("").is_err());
    }

    #[test]
    fn test_numeric_validation() {
        assert!(validate_positive("Area", Decimal::ZERO).is_err());
        assert!(validate_positive("Area", Decimal::ONE).is_ok());
        assert!(validate_non_negative("Quantity", Decimal::ZERO).is_ok());
        assert!(validate_non_negative("Quantity", Decimal::NEGATIVE_ONE).is_err());
        assert_eq!(require_text("Name", "  North ").unwrap(), "North");
        assert!(require_text("Name", " ").is_err());
    }
}
