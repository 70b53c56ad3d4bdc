use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::security::{Identity, Role};
use crate::shared::error::ServiceError;
use crate::shared::lifecycle::Lifecycle;
use crate::shared::schema::departments;
use crate::shared::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = departments)]
pub struct Department {
    #[diesel(column_name = department_id)]
    pub id: Uuid,
    pub name: String,
    pub parent_department_id: Option<Uuid>,
    #[diesel(embed)]
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
    #[diesel(column_name = is_updated)]
    pub updated: bool,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDepartmentRequest {
    pub name: String,
    pub parent_department_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDepartmentRequest {
    pub name: String,
    pub parent_department_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub include_deleted: Option<bool>,
}

/// Loads a department that has not been soft-deleted. Dangling references
/// elsewhere resolve through this as "no department".
pub fn find_active(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<Department>, diesel::result::Error> {
    departments::table
        .filter(departments::department_id.eq(id))
        .filter(departments::is_active.eq(true))
        .first(conn)
        .optional()
}

pub async fn list_departments(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Department>>, ServiceError> {
    identity.require_any_role(&[Role::Person, Role::Admin])?;
    let mut conn = state.conn.get()?;

    let include_deleted =
        query.include_deleted.unwrap_or(false) && identity.has_any_role(&[Role::Admin]);

    let mut q = departments::table.into_boxed();
    if !include_deleted {
        q = q.filter(departments::is_active.eq(true));
    }
    let rows: Vec<Department> = q.order(departments::name.asc()).load(&mut conn)?;
    Ok(Json(rows))
}

pub async fn get_department(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<Department>, ServiceError> {
    identity.require_any_role(&[Role::Person, Role::Admin])?;
    let mut conn = state.conn.get()?;
    let department = find_active(&mut conn, id)?
        .ok_or_else(|| ServiceError::not_found(format!("department {id} not found")))?;
    Ok(Json(department))
}

pub async fn create_department(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<CreateDepartmentRequest>,
) -> Result<Json<Department>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    if req.name.trim().is_empty() {
        return Err(ServiceError::invalid("department name must not be empty"));
    }
    let mut conn = state.conn.get()?;

    let department = Department {
        id: Uuid::new_v4(),
        name: req.name,
        parent_department_id: req.parent_department_id,
        lifecycle: Lifecycle::new(),
        updated: false,
        updated_by: None,
        created_at: Utc::now(),
    };
    diesel::insert_into(departments::table)
        .values(&department)
        .execute(&mut conn)?;

    info!("created department {} ({})", department.name, department.id);
    Ok(Json(department))
}

pub async fn update_department(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateDepartmentRequest>,
) -> Result<Json<Department>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    let mut conn = state.conn.get()?;

    find_active(&mut conn, id)?
        .ok_or_else(|| ServiceError::not_found(format!("department {id} not found")))?;

    let department: Department =
        diesel::update(departments::table.filter(departments::department_id.eq(id)))
            .set((
                departments::name.eq(req.name),
                departments::parent_department_id.eq(req.parent_department_id),
                departments::is_updated.eq(true),
                departments::updated_by.eq(Some(identity.user_id)),
            ))
            .get_result(&mut conn)?;

    Ok(Json(department))
}

pub async fn delete_department(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    let mut conn = state.conn.get()?;

    find_active(&mut conn, id)?
        .ok_or_else(|| ServiceError::not_found(format!("department {id} not found")))?;

    // Children keep their dangling parent id; no cascade.
    diesel::update(departments::table.filter(departments::department_id.eq(id)))
        .set((
            departments::is_active.eq(false),
            departments::deleted_by.eq(Some(identity.user_id)),
        ))
        .execute(&mut conn)?;

    info!("soft-deleted department {id}");
    Ok(Json(serde_json::json!({ "deleted": id })))
}

pub fn configure_departments_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/departments",
            get(list_departments).post(create_department),
        )
        .route(
            "/api/departments/:dept_id",
            get(get_department)
                .put(update_department)
                .delete(delete_department),
        )
}
