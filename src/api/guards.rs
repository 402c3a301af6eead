use async_trait::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::{header, request::Parts};
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::core::security::{self, Claims, Role};
use crate::core::state::AppState;
use crate::store::Identity;

/// Authenticated caller. Rejects requests without a valid bearer token.
pub(crate) struct CurrentIdentity(pub(crate) Identity);

/// Caller for attempt endpoints. A missing Authorization header yields a
/// guest identity so unauthenticated practice sessions can run; a present
/// but invalid token is still rejected. Guests keep a client-generated id in
/// the `x-guest-id` header so their attempt survives across requests.
pub(crate) struct AttemptIdentity(pub(crate) Identity);

pub(crate) const GUEST_ID_HEADER: &str = "x-guest-id";

fn identity_from_claims(claims: Claims) -> Identity {
    if claims.role.is_elevated() {
        Identity::Staff { id: claims.sub }
    } else if claims.role == Role::Guest {
        Identity::Guest { id: claims.sub }
    } else {
        Identity::Student { id: claims.sub }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let State(app_state) = State::<AppState>::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to access application state"))?;

        let token = bearer_token(parts)
            .ok_or(ApiError::Unauthorized("Invalid authentication credentials"))?;

        let claims = security::verify_token(token, app_state.settings())
            .map_err(|_| ApiError::Unauthorized("Invalid authentication credentials"))?;

        Ok(CurrentIdentity(identity_from_claims(claims)))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AttemptIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if bearer_token(parts).is_none() {
            let guest_id = parts
                .headers
                .get(GUEST_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.trim().is_empty())
                .map(|value| format!("guest-{}", value.trim()))
                .unwrap_or_else(|| format!("guest-{}", Uuid::new_v4()));
            return Ok(AttemptIdentity(Identity::Guest { id: guest_id }));
        }
        let CurrentIdentity(identity) = CurrentIdentity::from_request_parts(parts, state).await?;
        Ok(AttemptIdentity(identity))
    }
}
