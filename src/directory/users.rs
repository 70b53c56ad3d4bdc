use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, SaltString};
use argon2::{Argon2, PasswordVerifier};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::security::jwt::JwtManager;
use crate::security::{Identity, Role};
use crate::shared::error::ServiceError;
use crate::shared::schema::{persons, users};
use crate::shared::state::AppState;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = users)]
pub struct User {
    #[diesel(column_name = user_id)]
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub person_id: Option<Uuid>,
    pub refresh_token: Option<String>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub person_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
    pub person_id: Option<Uuid>,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub person_id: Option<Uuid>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            email: u.email,
            role: u.role,
            person_id: u.person_id,
            first_name: u.first_name,
            last_name: u.last_name,
            phone: u.phone,
            created_at: u.created_at,
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ServiceError::Database(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    PasswordHash::new(stored_hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn validate_registration(req: &RegisterRequest) -> Result<(), ServiceError> {
    if req.email.trim().is_empty() || !req.email.contains('@') {
        return Err(ServiceError::invalid("a valid email is required"));
    }
    if req.password.len() < 8 {
        return Err(ServiceError::invalid(
            "password must be at least 8 characters",
        ));
    }
    Ok(())
}

/// Issues a fresh access/refresh pair and stores the rotated refresh token on
/// the user row. The department claim is resolved from the linked person at
/// issuance time; a dangling person link simply yields no department claim.
fn issue_tokens(
    conn: &mut PgConnection,
    jwt: &JwtManager,
    user: &User,
) -> Result<AuthResponse, ServiceError> {
    let department_id = match user.person_id {
        Some(pid) => persons::table
            .filter(persons::person_id.eq(pid))
            .select(persons::department_id)
            .first::<Option<Uuid>>(conn)
            .optional()?
            .flatten(),
        None => None,
    };

    let access_token = jwt
        .issue_access(user.id, &user.role, user.person_id, department_id)
        .map_err(|e| ServiceError::Database(e.to_string()))?;
    let refresh_token = jwt
        .issue_refresh(user.id)
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    let expires_at = Utc::now() + Duration::seconds(jwt.refresh_ttl_seconds());
    diesel::update(users::table.filter(users::user_id.eq(user.id)))
        .set((
            users::refresh_token.eq(Some(refresh_token.clone())),
            users::refresh_token_expires_at.eq(Some(expires_at)),
        ))
        .execute(conn)?;

    Ok(AuthResponse {
        user_id: user.id,
        email: user.email.clone(),
        role: user.role.clone(),
        person_id: user.person_id,
        access_token,
        refresh_token,
    })
}

fn register_with_role(
    state: &AppState,
    req: RegisterRequest,
    role: Role,
) -> Result<AuthResponse, ServiceError> {
    validate_registration(&req)?;
    let mut conn = state.conn.get()?;

    let exists: i64 = users::table
        .filter(users::email.eq(&req.email))
        .count()
        .get_result(&mut conn)?;
    if exists > 0 {
        return Err(ServiceError::conflict(format!(
            "email {} is already registered",
            req.email
        )));
    }

    let user = User {
        id: Uuid::new_v4(),
        email: req.email,
        password_hash: hash_password(&req.password)?,
        role: role.as_str().to_string(),
        person_id: req.person_id,
        refresh_token: None,
        refresh_token_expires_at: None,
        first_name: req.first_name,
        last_name: req.last_name,
        phone: req.phone,
        created_at: Utc::now(),
    };
    diesel::insert_into(users::table)
        .values(&user)
        .execute(&mut conn)?;

    info!("registered {} user {}", user.role, user.email);
    issue_tokens(&mut conn, &state.jwt, &user)
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ServiceError> {
    // Public registration never links a person and never escalates.
    let req = RegisterRequest {
        person_id: None,
        ..req
    };
    Ok(Json(register_with_role(&state, req, Role::User)?))
}

pub async fn register_person(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    Ok(Json(register_with_role(&state, req, Role::Person)?))
}

pub async fn register_admin(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    Ok(Json(register_with_role(&state, req, Role::Admin)?))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ServiceError> {
    let mut conn = state.conn.get()?;

    let user: Option<User> = users::table
        .filter(users::email.eq(&req.email))
        .first(&mut conn)
        .optional()?;

    // Same rejection for unknown email and wrong password.
    let user = user.ok_or_else(|| {
        ServiceError::Unauthenticated("invalid email or password".to_string())
    })?;
    if !verify_password(&req.password, &user.password_hash) {
        warn!("failed login attempt for {}", req.email);
        return Err(ServiceError::Unauthenticated(
            "invalid email or password".to_string(),
        ));
    }

    Ok(Json(issue_tokens(&mut conn, &state.jwt, &user)?))
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, ServiceError> {
    let claims = state
        .jwt
        .verify(&req.refresh_token)
        .map_err(|e| ServiceError::Unauthenticated(e.to_string()))?;
    if !claims.is_refresh() {
        return Err(ServiceError::Unauthenticated(
            "not a refresh token".to_string(),
        ));
    }
    let user_id = claims
        .user_id()
        .map_err(|e| ServiceError::Unauthenticated(e.to_string()))?;

    let mut conn = state.conn.get()?;
    let user: User = users::table
        .filter(users::user_id.eq(user_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| ServiceError::Unauthenticated("unknown user".to_string()))?;

    let (stored, expires_at) = match (&user.refresh_token, user.refresh_token_expires_at) {
        (Some(t), Some(e)) => (t, e),
        _ => {
            return Err(ServiceError::Unauthenticated(
                "no refresh token on record".to_string(),
            ))
        }
    };
    if Utc::now() > expires_at {
        return Err(ServiceError::Unauthenticated(
            "refresh token expired".to_string(),
        ));
    }
    if stored != &req.refresh_token {
        return Err(ServiceError::Unauthenticated(
            "refresh token does not match (rotated or revoked)".to_string(),
        ));
    }

    Ok(Json(issue_tokens(&mut conn, &state.jwt, &user)?))
}

pub async fn list_users(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<UserResponse>>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    let mut conn = state.conn.get()?;
    let rows: Vec<User> = users::table.order(users::created_at.desc()).load(&mut conn)?;
    Ok(Json(rows.into_iter().map(UserResponse::from).collect()))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    let mut conn = state.conn.get()?;
    let user: User = users::table
        .filter(users::user_id.eq(id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| ServiceError::not_found(format!("user {id} not found")))?;
    Ok(Json(user.into()))
}

/// Users are the one directory entity that is hard-deleted.
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    let mut conn = state.conn.get()?;
    let deleted = diesel::delete(users::table.filter(users::user_id.eq(id))).execute(&mut conn)?;
    if deleted == 0 {
        return Err(ServiceError::not_found(format!("user {id} not found")));
    }
    info!("deleted user {id}");
    Ok(Json(serde_json::json!({ "deleted": id })))
}

pub fn configure_users_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/register-person", post(register_person))
        .route("/api/auth/register-admin", post(register_admin))
        .route("/api/auth/login", post(login))
        .route("/api/auth/refresh", post(refresh))
        .route("/api/users", get(list_users))
        .route("/api/users/:id", get(get_user).delete(delete_user))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn registration_validation() {
        let base = RegisterRequest {
            email: "a@x.com".into(),
            password: "long-enough".into(),
            first_name: None,
            last_name: None,
            phone: None,
            person_id: None,
        };
        assert!(validate_registration(&base).is_ok());

        let bad_email = RegisterRequest {
            email: "nope".into(),
            password: "long-enough".into(),
            first_name: None,
            last_name: None,
            phone: None,
            person_id: None,
        };
        assert!(validate_registration(&bad_email).is_err());

        let short_password = RegisterRequest {
            email: "a@x.com".into(),
            password: "short".into(),
            first_name: None,
            last_name: None,
            phone: None,
            person_id: None,
        };
        assert!(validate_registration(&short_password).is_err());
    }
}
