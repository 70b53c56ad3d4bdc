use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::directory::departments;
use crate::security::{Identity, Role};
use crate::shared::error::ServiceError;
use crate::shared::lifecycle::Lifecycle;
use crate::shared::schema::persons;
use crate::shared::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = persons)]
pub struct Person {
    #[diesel(column_name = person_id)]
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub department_id: Option<Uuid>,
    #[diesel(embed)]
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePersonRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub department_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePersonRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub department_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub include_deleted: Option<bool>,
}

pub fn find_active(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<Person>, diesel::result::Error> {
    persons::table
        .filter(persons::person_id.eq(id))
        .filter(persons::is_active.eq(true))
        .first(conn)
        .optional()
}

pub async fn list_persons(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Person>>, ServiceError> {
    identity.require_any_role(&[Role::Person, Role::Admin])?;
    let mut conn = state.conn.get()?;

    let include_deleted =
        query.include_deleted.unwrap_or(false) && identity.has_any_role(&[Role::Admin]);

    let mut q = persons::table.into_boxed();
    if !include_deleted {
        q = q.filter(persons::is_active.eq(true));
    }
    let rows: Vec<Person> = q
        .order((persons::last_name.asc(), persons::first_name.asc()))
        .load(&mut conn)?;
    Ok(Json(rows))
}

pub async fn get_person(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Person>, ServiceError> {
    identity.require_any_role(&[Role::Person, Role::Admin])?;
    let mut conn = state.conn.get()?;
    let person = find_active(&mut conn, id)?
        .ok_or_else(|| ServiceError::not_found(format!("person {id} not found")))?;
    Ok(Json(person))
}

/// Active persons with no department. Used by admins when routing new hires.
pub async fn list_unassigned(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<Person>>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    let mut conn = state.conn.get()?;
    let rows: Vec<Person> = persons::table
        .filter(persons::is_active.eq(true))
        .filter(persons::department_id.is_null())
        .order((persons::last_name.asc(), persons::first_name.asc()))
        .load(&mut conn)?;
    Ok(Json(rows))
}

pub async fn list_by_department(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(dept_id): Path<Uuid>,
) -> Result<Json<Vec<Person>>, ServiceError> {
    identity.require_any_role(&[Role::Person, Role::Admin])?;
    let mut conn = state.conn.get()?;
    let rows: Vec<Person> = persons::table
        .filter(persons::is_active.eq(true))
        .filter(persons::department_id.eq(dept_id))
        .order((persons::last_name.asc(), persons::first_name.asc()))
        .load(&mut conn)?;
    Ok(Json(rows))
}

pub async fn create_person(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<CreatePersonRequest>,
) -> Result<Json<Person>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    if req.email.trim().is_empty() {
        return Err(ServiceError::invalid("person email must not be empty"));
    }
    let mut conn = state.conn.get()?;

    let person = Person {
        id: Uuid::new_v4(),
        first_name: req.first_name,
        last_name: req.last_name,
        email: req.email,
        phone: req.phone,
        department_id: req.department_id,
        lifecycle: Lifecycle::new(),
        created_at: Utc::now(),
    };
    diesel::insert_into(persons::table)
        .values(&person)
        .execute(&mut conn)?;

    info!("created person {} ({})", person.email, person.id);
    Ok(Json(person))
}

pub async fn update_person(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePersonRequest>,
) -> Result<Json<Person>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    let mut conn = state.conn.get()?;

    find_active(&mut conn, id)?
        .ok_or_else(|| ServiceError::not_found(format!("person {id} not found")))?;

    let person: Person = diesel::update(persons::table.filter(persons::person_id.eq(id)))
        .set((
            persons::first_name.eq(req.first_name),
            persons::last_name.eq(req.last_name),
            persons::email.eq(req.email),
            persons::phone.eq(req.phone),
            persons::department_id.eq(req.department_id),
        ))
        .get_result(&mut conn)?;

    Ok(Json(person))
}

/// Routes a person into a department. The department must currently exist;
/// existing dangling ids elsewhere are tolerated but new ones are not minted.
pub async fn assign_department(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path((id, dept_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Person>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    let mut conn = state.conn.get()?;

    find_active(&mut conn, id)?
        .ok_or_else(|| ServiceError::not_found(format!("person {id} not found")))?;
    departments::find_active(&mut conn, dept_id)?
        .ok_or_else(|| ServiceError::invalid(format!("department {dept_id} does not exist")))?;

    let person: Person = diesel::update(persons::table.filter(persons::person_id.eq(id)))
        .set(persons::department_id.eq(Some(dept_id)))
        .get_result(&mut conn)?;

    info!("assigned person {id} to department {dept_id}");
    Ok(Json(person))
}

pub async fn delete_person(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    let mut conn = state.conn.get()?;

    find_active(&mut conn, id)?
        .ok_or_else(|| ServiceError::not_found(format!("person {id} not found")))?;

    diesel::update(persons::table.filter(persons::person_id.eq(id)))
        .set((
            persons::is_active.eq(false),
            persons::deleted_by.eq(Some(identity.user_id)),
        ))
        .execute(&mut conn)?;

    info!("soft-deleted person {id}");
    Ok(Json(serde_json::json!({ "deleted": id })))
}

pub fn configure_persons_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/persons", get(list_persons).post(create_person))
        .route("/api/persons/unassigned", get(list_unassigned))
        .route(
            "/api/persons/:id",
            get(get_person).put(update_person).delete(delete_person),
        )
        .route(
            "/api/persons/:id/department/:dept_id",
            put(assign_department),
        )
        .route(
            "/api/persons/by-department/:dept_id",
            get(list_by_department),
        )
}
