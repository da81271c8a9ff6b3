//! Actor extraction from request headers

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::domain::{Actor, Role};

use super::AppError;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

/// The caller as reported by the identity provider in front of us
#[derive(Debug, Clone)]
pub struct RequestActor(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for RequestActor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let id = header(ACTOR_ID_HEADER)
            .ok_or_else(|| AppError::MissingActor(format!("{} header is required", ACTOR_ID_HEADER)))?;
        let role: Role = header(ACTOR_ROLE_HEADER)
            .ok_or_else(|| {
                AppError::MissingActor(format!("{} header is required", ACTOR_ROLE_HEADER))
            })?
            .parse()
            .map_err(AppError::BadRequest)?;

        Ok(RequestActor(Actor::new(id, role)))
    }
}
