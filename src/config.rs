//! Resolver configuration and identifier validation.

use crate::error::ValidationError;

/// Limits applied to submitted identifiers before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Maximum email length in characters.
    pub max_email_len: usize,
    /// Maximum phone number length in characters.
    pub max_phone_len: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_email_len: 255,
            max_phone_len: 20,
        }
    }
}

/// Identifiers that passed validation. Blank values are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identifiers<'a> {
    /// Email, verbatim.
    pub email: Option<&'a str>,
    /// Phone number, verbatim.
    pub phone_number: Option<&'a str>,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn check_len(field: &str, value: Option<&str>, max_length: usize) -> Result<(), ValidationError> {
    match value {
        Some(v) if v.chars().count() > max_length => Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length,
        }),
        _ => Ok(()),
    }
}

impl ResolverConfig {
    /// Validate a submitted (email, phone number) pair.
    ///
    /// # Errors
    /// - `MissingIdentifier` if both are absent or blank
    /// - `FieldTooLong` if either exceeds its limit
    pub fn check<'a>(
        &self,
        email: Option<&'a str>,
        phone_number: Option<&'a str>,
    ) -> Result<Identifiers<'a>, ValidationError> {
        let email = present(email);
        let phone_number = present(phone_number);
        if email.is_none() && phone_number.is_none() {
            return Err(ValidationError::MissingIdentifier);
        }
        check_len("email", email, self.max_email_len)?;
        check_len("phoneNumber", phone_number, self.max_phone_len)?;
        Ok(Identifiers {
            email,
            phone_number,
        })
    }
}
