use axum::Json;
use axum::extract::{FromRequest, Request};
use serde::de::DeserializeOwned;

/// Boundary checks a request body runs before it reaches a service.
pub trait Validate {
    fn validate(&self) -> Result<(), framework::Error>;
}

/// A JSON body that parsed and passed [`Validate`]. Malformed bodies and unknown enum
/// values are answered with 400.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = framework::Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| framework::Error::invalid_input(rejection.body_text()))?;
        value.validate()?;
        Ok(Self(value))
    }
}

pub(crate) fn require(condition: bool, message: &str) -> Result<(), framework::Error> {
    if condition {
        Ok(())
    } else {
        Err(framework::Error::invalid_input(message))
    }
}
