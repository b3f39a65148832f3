//! Registration field rules for `#[derive(Validate)]`.

use std::borrow::Cow;

use validator::{ValidationError, ValidationErrors};

use crate::utils::Password;

pub const MIN_PASSWORD_LEN: usize = 6;

pub const REQUIRED: &str = "required";
pub const EMAIL_FORMAT: &str = "email_format";
pub const PASSWORD_LENGTH: &str = "password_length";

/// Failures are reported one at a time, most basic rule first.
const RULE_ORDER: [&str; 3] = [REQUIRED, EMAIL_FORMAT, PASSWORD_LENGTH];

fn rule_error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

/// Permissive shape check: an `@` followed somewhere later by a `.`.
pub fn validate_email_shape(email: &str) -> Result<(), ValidationError> {
    match email.split_once('@') {
        Some((_, domain)) if domain.contains('.') => Ok(()),
        _ => Err(rule_error(EMAIL_FORMAT, "invalid email format")),
    }
}

pub fn validate_password_strength(password: &Password) -> Result<(), ValidationError> {
    let len = password.expose().chars().count();
    if len == 0 {
        Err(rule_error(REQUIRED, "all fields are required"))
    } else if len < MIN_PASSWORD_LEN {
        Err(rule_error(PASSWORD_LENGTH, "password must be at least 6 characters"))
    } else {
        Ok(())
    }
}

/// The message of the highest-priority failed rule.
pub fn validation_message(errors: &ValidationErrors) -> String {
    let failed: Vec<&ValidationError> = errors.field_errors().into_values().flatten().collect();

    RULE_ORDER
        .iter()
        .find_map(|code| failed.iter().find(|e| e.code == *code))
        .and_then(|e| e.message.as_ref())
        .map(|message| message.to_string())
        .unwrap_or_else(|| errors.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_shape() {
        assert!(validate_email_shape("demo@x.com").is_ok());
        assert!(validate_email_shape("first.last@sub.example.org").is_ok());
        assert!(validate_email_shape("demo.x@com").is_err());
        assert!(validate_email_shape("demo@localhost").is_err());
        assert!(validate_email_shape("demo.x.com").is_err());
        assert!(validate_email_shape("").is_err());
    }

    #[test]
    fn test_password_strength() {
        assert!(validate_password_strength(&Password::new("123456".to_string())).is_ok());

        let short = validate_password_strength(&Password::new("12345".to_string())).unwrap_err();
        assert_eq!(short.code, PASSWORD_LENGTH);

        let empty = validate_password_strength(&Password::new(String::new())).unwrap_err();
        assert_eq!(empty.code, REQUIRED);
    }

    #[test]
    fn test_message_prefers_required_over_format() {
        let mut errors = ValidationErrors::new();
        errors.add("email", rule_error(EMAIL_FORMAT, "invalid email format"));
        errors.add("last_name", rule_error(REQUIRED, "all fields are required"));

        assert_eq!(validation_message(&errors), "all fields are required");
    }
}
