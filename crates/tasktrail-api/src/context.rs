//! Request extractors: the unit of work, the calling principal and the saga.

use std::convert::Infallible;

use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::HeaderName;
use axum::http::request::Parts;
use tasktrail_core::acl::{Principal, UserType};
use tasktrail_core::error::DomainError;
use tasktrail_core::trace::parse_trace_parent;
use tasktrail_core::unit_of_work::UnitOfWork;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

/// W3C trace context header, read on the way in and written on the way out.
pub const TRACEPARENT: &str = "traceparent";
/// Caller type header: `user` or `application`.
pub const USER_TYPE: &str = "x-user-type";
/// Caller id header.
pub const USER_ID: &str = "x-user-id";
/// Optional saga id header.
pub const SAGA_ID: &str = "x-saga-id";

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// The request's unit of work, traced from the inbound `traceparent`.
#[derive(Debug)]
pub struct RequestUnitOfWork(pub UnitOfWork);

impl FromRequestParts<AppState> for RequestUnitOfWork {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let trace = parse_trace_parent(header(parts, TRACEPARENT))?;
        debug!(trace_id = %trace.trace_id, request_id = %trace.request_id, "unit of work opened");
        Ok(Self(state.uow_factory.create(trace)))
    }
}

/// The authenticated caller, from `x-user-type` and `x-user-id`.
#[derive(Debug, Clone)]
pub struct Caller(pub Principal);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, ApiError> {
        let user_type: UserType = header(parts, USER_TYPE)
            .ok_or_else(|| DomainError::Validation(format!("missing {USER_TYPE} header")))?
            .parse()?;
        let user_id = header(parts, USER_ID)
            .ok_or_else(|| DomainError::Validation(format!("missing {USER_ID} header")))?;
        Ok(Self(Principal::new(user_type, user_id)))
    }
}

/// The saga a command belongs to, if the caller named one.
#[derive(Debug, Clone, Default)]
pub struct Saga(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for Saga {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Infallible> {
        Ok(Self(header(parts, SAGA_ID).map(str::to_owned)))
    }
}

/// A JSON body carrying the `traceparent` to propagate downstream.
pub type Traced<T> = ([(HeaderName, String); 1], Json<T>);

/// Wraps `body` with the unit of work's outbound `traceparent`.
#[must_use]
pub fn traced<T>(uow: &UnitOfWork, body: T) -> Traced<T> {
    (
        [(HeaderName::from_static(TRACEPARENT), uow.trace_info().to_header())],
        Json(body),
    )
}
