//! Validation helpers for DTOs.

use std::collections::HashSet;

use validator::ValidationError;

use crate::dao::models::CATEGORIES_PER_SESSION;

/// Shortest player or team name accepted, counted after trimming.
pub const MIN_NAME_LEN: usize = 2;

/// Validates that a display name has at least [`MIN_NAME_LEN`] visible characters.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().chars().count() < MIN_NAME_LEN {
        let mut err = ValidationError::new("name_length");
        err.message = Some(format!("Name must be at least {MIN_NAME_LEN} characters").into());
        return Err(err);
    }
    Ok(())
}

/// Validates that a session lists exactly four distinct, non-blank categories.
///
/// # Examples
///
/// ```ignore
/// validate_categories(&["A", "B", "C", "D"].map(String::from)) // Ok
/// validate_categories(&["A", "A", "C", "D"].map(String::from)) // Err - duplicate
/// validate_categories(&["A", "B", "C"].map(String::from))      // Err - too few
/// ```
pub fn validate_categories(categories: &[String]) -> Result<(), ValidationError> {
    if categories.len() != CATEGORIES_PER_SESSION {
        let mut err = ValidationError::new("categories_count");
        err.message = Some(
            format!(
                "A session needs exactly {CATEGORIES_PER_SESSION} categories (got {})",
                categories.len()
            )
            .into(),
        );
        return Err(err);
    }

    if categories.iter().any(|category| category.trim().is_empty()) {
        let mut err = ValidationError::new("categories_blank");
        err.message = Some("Category names must not be blank".into());
        return Err(err);
    }

    let distinct: HashSet<&str> = categories.iter().map(|category| category.trim()).collect();
    if distinct.len() != categories.len() {
        let mut err = ValidationError::new("categories_distinct");
        err.message = Some("Categories must be distinct".into());
        return Err(err);
    }

    Ok(())
}

/// Validates an RFC 3339 timestamp such as `2025-05-01T18:00:00Z`.
pub fn validate_rfc3339(value: &str) -> Result<(), ValidationError> {
    if super::parse_system_time(value).is_none() {
        let mut err = ValidationError::new("timestamp_format");
        err.message = Some("Timestamp must be RFC 3339 (e.g. 2025-05-01T18:00:00Z)".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("Al").is_ok());
        assert!(validate_display_name("  Ada ").is_ok());
        assert!(validate_display_name(" A ").is_err());
        assert!(validate_display_name("").is_err());
    }

    #[test]
    fn test_validate_categories_count() {
        assert!(validate_categories(&names(&["A", "B", "C", "D"])).is_ok());
        assert!(validate_categories(&names(&["A", "B", "C"])).is_err()); // too few
        assert!(validate_categories(&names(&["A", "B", "C", "D", "E"])).is_err()); // too many
    }

    #[test]
    fn test_validate_categories_content() {
        assert!(validate_categories(&names(&["A", "B", " ", "D"])).is_err()); // blank
        assert!(validate_categories(&names(&["A", "B", "A ", "D"])).is_err()); // duplicate
    }

    #[test]
    fn test_validate_rfc3339() {
        assert!(validate_rfc3339("2025-05-01T18:00:00Z").is_ok());
        assert!(validate_rfc3339("2025-05-01T18:00:00+02:00").is_ok());
        assert!(validate_rfc3339("2025-05-01 18:00").is_err());
    }
}
