use std::fmt::Display;

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ci_relay_core::models::CiEvent;

/// Extract a CI notification posted by the notify step of a CircleCI job.
#[derive(Clone, Debug)]
#[must_use]
pub struct CiEventPayload {
    pub event: CiEvent,
}

impl CiEventPayload {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body).map(|event| Self { event })
    }
}

impl<S> FromRequest<S> for CiEventPayload
where S: Send + Sync
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        fn err(m: impl Display) -> Response {
            tracing::error!("{m}");
            (StatusCode::BAD_REQUEST, m.to_string()).into_response()
        }
        let body = Bytes::from_request(req, state).await.map_err(|_| err("error reading body"))?;
        if body.is_empty() {
            return Err(err("empty webhook body"));
        }
        Self::parse(&body).map_err(|e| err(format!("error parsing body: {e}")))
    }
}
