//! Request body validation.
//!
//! Every request type implements [`Validate`], which reports all field
//! problems at once. Handlers receive bodies through [`ValidJson`], which
//! rejects malformed JSON with `bad_request` (or `payload_too_large`) and invalid content with
//! `validation_failed` plus per-field details. [`ApiQuery`] and [`ApiPath`]
//! give query strings and path segments the same JSON error shape.

use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::{AppError, FieldError};

pub trait Validate {
    fn validate(&self) -> Result<(), Vec<FieldError>>;
}

/// JSON body extractor that runs [`Validate`] before the handler sees it.
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::rejected(rejection.status(), rejection.body_text()))?;
        value.validate().map_err(AppError::validation)?;
        Ok(ValidJson(value))
    }
}

/// `Query<T>` with a JSON `bad_request` rejection.
pub struct ApiQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::rejected(rejection.status(), rejection.body_text()))?;
        Ok(ApiQuery(value))
    }
}

/// `Path<T>` with a JSON `bad_request` rejection.
pub struct ApiPath<T>(pub T);

impl<S, T> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::rejected(rejection.status(), rejection.body_text()))?;
        Ok(ApiPath(value))
    }
}

/// Accumulates field errors for one request.
#[derive(Debug, Default)]
pub struct Checker {
    errors: Vec<FieldError>,
}

impl Checker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(field, message));
    }

    pub fn required(&mut self, field: &str, value: &str, max_len: usize) {
        if value.trim().is_empty() {
            self.add(field, "is required");
        } else {
            self.max_len(field, value, max_len);
        }
    }

    pub fn max_len(&mut self, field: &str, value: &str, max_len: usize) {
        if value.chars().count() > max_len {
            self.add(field, format!("must be at most {} characters", max_len));
        }
    }

    pub fn optional(&mut self, field: &str, value: Option<&str>, max_len: usize) {
        if let Some(v) = value {
            self.max_len(field, v, max_len);
        }
    }

    pub fn email(&mut self, field: &str, value: &str) {
        if value.trim().is_empty() {
            self.add(field, "is required");
        } else if !is_valid_email(value) {
            self.add(field, "must be a valid email address");
        }
    }

    pub fn one_of(&mut self, field: &str, value: &str, allowed: &[&str]) {
        if !allowed.contains(&value) {
            self.add(field, format!("must be one of: {}", allowed.join(", ")));
        }
    }

    pub fn range<T: PartialOrd + std::fmt::Display>(
        &mut self,
        field: &str,
        value: T,
        min: T,
        max: T,
    ) {
        if value < min || value > max {
            self.add(field, format!("must be between {} and {}", min, max));
        }
    }

    pub fn finish(self) -> Result<(), Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

/// Structural email check: one `@`, non-empty local part, dotted domain,
/// no whitespace.
pub fn is_valid_email(value: &str) -> bool {
    let value = value.trim();
    if value.len() > 254 || value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|l| !l.is_empty())
}

/// Lower-case and trim an email for storage and lookups.
pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Trim an optional string, mapping blank to `None`.
pub fn clean_opt(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert!(is_valid_email("ada@example.com"));
        assert!(is_valid_email("  first.last+tag@sub.example.co.uk "));
    }

    #[test]
    fn test_invalid_emails() {
        assert!(!is_valid_email("ada"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("ada@example"));
        assert!(!is_valid_email("ada@@example.com"));
        assert!(!is_valid_email("ada@exa mple.com"));
        assert!(!is_valid_email("ada@example..com"));
    }

    #[test]
    fn test_checker_collects_all_errors() {
        let mut c = Checker::new();
        c.required("name", "   ", 100);
        c.email("email", "nope");
        c.range("value", 7, 1, 5);
        let errors = c.finish().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "email", "value"]);
    }

    #[test]
    fn test_max_len_counts_chars() {
        let mut c = Checker::new();
        c.required("name", "ééé", 3);
        assert!(c.finish().is_ok());
    }

    #[test]
    fn test_clean_opt() {
        assert_eq!(clean_opt(&Some("  ".into())), None);
        assert_eq!(clean_opt(&Some(" Acme ".into())), Some("Acme".into()));
        assert_eq!(clean_opt(&None), None);
    }
}
