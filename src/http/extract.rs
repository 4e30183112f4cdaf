//! Request body extraction with field validation.
//!
//! Malformed bodies become HTTP-intent failures carrying the rejection's
//! status; bodies that parse but fail [`Validate`] become a 400 with one
//! message per field.

use axum::{
    extract::{FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;

use crate::http::failure::Failure;

/// Field-level checks run after deserialization.
pub trait Validate {
    /// One message per rejected field; empty when the value is acceptable.
    fn validate(&self) -> Vec<String>;
}

/// JSON body that has been deserialized and validated.
#[derive(Debug, Clone)]
pub struct Validated<T>(pub T);

impl<T, S> FromRequest<S> for Validated<T>
where
    T: DeserializeOwned + Validate + Send,
    S: Send + Sync,
{
    type Rejection = Failure;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| Failure::status(rejection.status(), rejection.body_text()))?;

        let problems = value.validate();
        if problems.is_empty() {
            Ok(Validated(value))
        } else {
            Err(Failure::validation(problems))
        }
    }
}
