use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::error::ServiceError;
use crate::shared::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Person,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Person => "PERSON",
            Self::Admin => "ADMIN",
        }
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER" => Ok(Self::User),
            "PERSON" => Ok(Self::Person),
            "ADMIN" => Ok(Self::Admin),
            _ => Err(()),
        }
    }
}

/// Verified caller identity, extracted once at the request boundary and
/// threaded explicitly into service calls. There is no ambient security
/// context anywhere else in the crate.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
    pub person_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
}

impl Identity {
    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }

    pub fn require_any_role(&self, roles: &[Role]) -> Result<(), ServiceError> {
        if self.has_any_role(roles) {
            Ok(())
        } else {
            Err(ServiceError::Unauthorized(format!(
                "role {} may not perform this action",
                self.role.as_str()
            )))
        }
    }

    /// The acting person behind this credential, required by the assignment
    /// transitions.
    pub fn require_person(&self) -> Result<Uuid, ServiceError> {
        self.person_id.ok_or_else(|| {
            ServiceError::Unauthenticated("no person is linked to this credential".to_string())
        })
    }
}

/// Validates the bearer token once and inserts a typed [`Identity`] into the
/// request extensions. A presented-but-unresolvable credential is rejected
/// here; requests without a credential pass through and are stopped by the
/// [`Identity`] extractor on protected routes.
pub async fn authentication_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ServiceError> {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if let Some(token) = bearer {
        let claims = state
            .jwt
            .verify(token)
            .map_err(|e| ServiceError::Unauthenticated(e.to_string()))?;
        if !claims.is_access() {
            return Err(ServiceError::Unauthenticated(
                "refresh token presented where an access token is required".to_string(),
            ));
        }
        let user_id = claims
            .user_id()
            .map_err(|e| ServiceError::Unauthenticated(e.to_string()))?;
        // A valid signature without a resolvable role is an authentication
        // failure, never a downgrade or an escalation.
        let role = claims
            .role
            .as_deref()
            .and_then(|r| Role::from_str(r).ok())
            .ok_or_else(|| {
                ServiceError::Unauthenticated("credential carries no resolvable role".to_string())
            })?;
        request.extensions_mut().insert(Identity {
            user_id,
            role,
            person_id: claims.person_id,
            department_id: claims.department_id,
        });
    }

    Ok(next.run(request).await)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Identity>().cloned().ok_or((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "Authentication required"
            })),
        ))
    }
}
