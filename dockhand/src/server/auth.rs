//! Bearer authentication
//!
//! Callers present an opaque token, either as `Authorization: Bearer <t>` or
//! a `session=<t>` cookie, resolved against the users file. Non-owner access
//! to project-scoped resources is answered with 404 rather than 403 so
//! resource existence does not leak.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};

use crate::models::project::Project;
use crate::server::response::ApiError;
use crate::server::state::ServerState;

/// Authenticated caller identity
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: String,
    pub is_admin: bool,
}

impl Caller {
    pub fn owns(&self, project: &Project) -> bool {
        self.is_admin || self.id == project.owner_id
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn cookie_token(parts: &Parts) -> Option<String> {
    let cookies = parts.headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        if name == "session" && !value.is_empty() {
            Some(value.to_string())
        } else {
            None
        }
    })
}

#[axum::async_trait]
impl FromRequestParts<Arc<ServerState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<ServerState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .or_else(|| cookie_token(parts))
            .ok_or_else(|| ApiError::unauthorized("missing credentials"))?;

        match state.users.resolve(&token).await {
            Ok(Some(user)) => Ok(Caller {
                id: user.id,
                is_admin: user.is_admin,
            }),
            Ok(None) => Err(ApiError::unauthorized("invalid credentials")),
            Err(e) => Err(ApiError::from(e)),
        }
    }
}
