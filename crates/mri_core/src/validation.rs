//! crates/mri_core/src/validation.rs
//!
//! Input rules for signup and the patient application form. Validation failures
//! are ordinary values: every rule is checked and all violations are returned
//! together.

use serde::Deserialize;
use std::sync::LazyLock;

use regex::Regex;

use crate::domain::PatientDetails;
use crate::error::{FieldError, ValidationErrors};

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{10}$").expect("phone pattern is a valid regex"));

/// Characters that satisfy the "special character" password rule.
pub const PASSWORD_SPECIAL_CHARS: &str = "!@#$%^&*()-_=+[]{};:'\",.<>/?\\|`~";

/// Oldest age the form accepts.
pub const MAX_AGE: i64 = 150;

/// The raw application form as submitted by the user.
#[derive(Debug, Clone, Deserialize)]
pub struct PatientForm {
    pub name: String,
    pub age: i64,
    pub place: String,
    pub phone: String,
}

pub fn is_valid_phone(phone: &str) -> bool {
    PHONE_PATTERN.is_match(phone)
}

/// Minimal structural check: exactly one `@` with something on both sides.
/// Single-label domains such as `a@localhost` are accepted.
pub fn is_plausible_email(email: &str) -> bool {
    let mut parts = email.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => {
            !local.is_empty() && !domain.is_empty() && !email.chars().any(char::is_whitespace)
        }
        _ => false,
    }
}

/// Every password complexity rule `password` violates.
pub fn password_policy_violations(password: &str) -> Vec<FieldError> {
    let mut errors = Vec::new();
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        errors.push(FieldError::new(
            "password",
            "must contain at least one uppercase letter",
        ));
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        errors.push(FieldError::new(
            "password",
            "must contain at least one lowercase letter",
        ));
    }
    if !password.chars().any(|c| PASSWORD_SPECIAL_CHARS.contains(c)) {
        errors.push(FieldError::new(
            "password",
            format!(
                "must contain at least one special character ({})",
                PASSWORD_SPECIAL_CHARS
            ),
        ));
    }
    errors
}

/// Checks a signup request. `email` is expected to be trimmed already.
pub fn validate_signup(
    name: &str,
    email: &str,
    password: &str,
    confirm: &str,
) -> Result<(), ValidationErrors> {
    let mut errors = Vec::new();

    if name.trim().is_empty() {
        errors.push(FieldError::new("name", "is required"));
    }
    if email.is_empty() {
        errors.push(FieldError::new("email", "is required"));
    } else if !is_plausible_email(email) {
        errors.push(FieldError::new("email", "is not a valid email address"));
    }
    if password.is_empty() {
        errors.push(FieldError::new("password", "is required"));
    } else {
        errors.extend(password_policy_violations(password));
    }
    if confirm.is_empty() {
        errors.push(FieldError::new("confirm_password", "is required"));
    } else if confirm != password {
        errors.push(FieldError::new("confirm_password", "passwords do not match"));
    }

    into_result(errors)
}

/// Checks the application form and produces validated patient details.
pub fn validate_patient_form(
    form: &PatientForm,
    image_present: bool,
) -> Result<PatientDetails, ValidationErrors> {
    let mut errors = Vec::new();

    let name = form.name.trim();
    let place = form.place.trim();
    let phone = form.phone.as_str();

    if name.is_empty() {
        errors.push(FieldError::new("name", "is required"));
    }
    if form.age < 0 {
        errors.push(FieldError::new("age", "must not be negative"));
    } else if form.age > MAX_AGE {
        errors.push(FieldError::new("age", format!("must be at most {}", MAX_AGE)));
    }
    if place.is_empty() {
        errors.push(FieldError::new("place", "is required"));
    }
    if !is_valid_phone(phone) {
        errors.push(FieldError::new("phone", "must be exactly 10 digits"));
    }
    if !image_present {
        errors.push(FieldError::new("image", "upload an MRI scan before submitting"));
    }

    into_result(errors)?;
    Ok(PatientDetails {
        name: name.to_string(),
        // Range checked above.
        age: form.age as u32,
        place: place.to_string(),
        phone: phone.to_string(),
    })
}

fn into_result(errors: Vec<FieldError>) -> Result<(), ValidationErrors> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(name: &str, age: i64, place: &str, phone: &str) -> PatientForm {
        PatientForm {
            name: name.to_string(),
            age,
            place: place.to_string(),
            phone: phone.to_string(),
        }
    }

    #[test]
    fn phone_must_be_exactly_ten_digits() {
        assert!(is_valid_phone("9876543210"));
        assert!(!is_valid_phone("12345"));
        assert!(!is_valid_phone("12345678901"));
        assert!(!is_valid_phone("98765-4321"));
        assert!(!is_valid_phone("98765432１0"));
        assert!(!is_valid_phone(""));
    }

    #[test]
    fn password_policy_reports_each_missing_class() {
        assert!(password_policy_violations("Aa!1234").is_empty());
        assert_eq!(password_policy_violations("aa!1234").len(), 1);
        assert_eq!(password_policy_violations("password").len(), 2);
        assert_eq!(password_policy_violations("1234").len(), 3);
    }

    #[test]
    fn signup_requires_matching_confirmation() {
        assert!(validate_signup("A", "a@x.com", "Aa!1234", "Aa!1234").is_ok());
        let err = validate_signup("A", "a@x.com", "Aa!1234", "Aa!12345").unwrap_err();
        assert!(err.mentions("confirm_password"));
    }

    #[test]
    fn signup_reports_missing_fields_together() {
        let err = validate_signup("", "", "", "").unwrap_err();
        for field in ["name", "email", "password", "confirm_password"] {
            assert!(err.mentions(field), "missing error for {}", field);
        }
        assert!(validate_signup("A", "not-an-email", "Aa!1234", "Aa!1234")
            .unwrap_err()
            .mentions("email"));
    }

    #[test]
    fn complete_form_produces_trimmed_details() {
        let details =
            validate_patient_form(&form(" A ", 70, "X", "1234567890"), true).unwrap();
        assert_eq!(
            details,
            PatientDetails {
                name: "A".to_string(),
                age: 70,
                place: "X".to_string(),
                phone: "1234567890".to_string(),
            }
        );
    }

    #[test]
    fn form_rejects_empty_fields_and_negative_age() {
        let err = validate_patient_form(&form("", -1, " ", "12345"), true).unwrap_err();
        for field in ["name", "age", "place", "phone"] {
            assert!(err.mentions(field), "missing error for {}", field);
        }
        assert!(!err.mentions("image"));
    }

    #[test]
    fn phone_is_checked_exactly_as_entered() {
        for phone in [" 1234567890", "1234567890\n", "1234567890 "] {
            let err = validate_patient_form(&form("A", 70, "X", phone), true).unwrap_err();
            assert!(err.mentions("phone"), "accepted {:?}", phone);
        }
    }

    #[test]
    fn form_requires_an_image() {
        let err = validate_patient_form(&form("A", 0, "X", "1234567890"), false).unwrap_err();
        assert_eq!(err.fields().len(), 1);
        assert!(err.mentions("image"));
    }
}
