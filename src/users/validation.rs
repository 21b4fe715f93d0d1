use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// Every field that failed validation, in the order checked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid input: {}", describe(.fields))]
pub struct ValidationError {
    pub fields: Vec<FieldError>,
}

fn describe(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(|f| format!("{} {}", f.field, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn has(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f.field == field)
    }
}

/// Collects field errors so a single pass reports all of them.
#[derive(Debug, Default)]
pub(crate) struct Violations(Vec<FieldError>);

impl Violations {
    pub(crate) fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(FieldError {
            field,
            message: message.into(),
        });
    }

    pub(crate) fn into_result(self) -> Result<(), ValidationError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { fields: self.0 })
        }
    }
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Rules a plaintext password must satisfy before it is hashed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub max_length: usize,
    pub require_letter: bool,
    pub require_digit: bool,
    /// Reject passwords containing the local part of the account email.
    pub forbid_email: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 128,
            require_letter: true,
            require_digit: true,
            forbid_email: true,
        }
    }
}

impl PasswordPolicy {
    pub(crate) fn check(&self, password: &str, email: Option<&str>, out: &mut Violations) {
        let len = password.chars().count();
        if len < self.min_length {
            out.push(
                "password",
                format!("must be at least {} characters", self.min_length),
            );
        }
        if len > self.max_length {
            out.push(
                "password",
                format!("must be at most {} characters", self.max_length),
            );
        }
        if self.require_letter && !password.chars().any(char::is_alphabetic) {
            out.push("password", "must contain a letter");
        }
        if self.require_digit && !password.chars().any(|c| c.is_ascii_digit()) {
            out.push("password", "must contain a digit");
        }
        if self.forbid_email {
            let local = email
                .and_then(|e| e.split('@').next())
                .filter(|l| l.len() >= 3);
            if let Some(local) = local {
                if password.to_lowercase().contains(local) {
                    out.push("password", "must not contain the email address");
                }
            }
        }
    }

    /// Validate a standalone password, e.g. on reset.
    pub fn validate(&self, password: &str, email: Option<&str>) -> Result<(), ValidationError> {
        let mut violations = Violations::default();
        self.check(password, email, &mut violations);
        violations.into_result()
    }
}
