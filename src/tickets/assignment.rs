//! The assignment state machine. Each row tracks one leg of a ticket's
//! routing: OPEN in a department queue or the pool, IN_PROGRESS once a person
//! claims it, then TRANSFERRED (superseded by a new OPEN row elsewhere) or
//! DONE (ticket closed while the row was current). Exactly one of
//! {pool, department, person} holds a row at any time; every transition
//! clears the field it vacates.

use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::security::{Identity, Role};
use crate::shared::error::ServiceError;
use crate::shared::schema::{ticket_assignments, tickets};
use crate::shared::state::AppState;
use crate::tickets::{enrich_assignees, ticket_response, Ticket, TicketResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentStatus {
    Open,
    InProgress,
    Transferred,
    Done,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::InProgress => "IN_PROGRESS",
            Self::Transferred => "TRANSFERRED",
            Self::Done => "DONE",
        }
    }
}

impl FromStr for AssignmentStatus {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(Self::Open),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "TRANSFERRED" => Ok(Self::Transferred),
            "DONE" => Ok(Self::Done),
            other => Err(ServiceError::invalid(format!(
                "unknown assignment status {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = ticket_assignments)]
pub struct Assignment {
    #[diesel(column_name = assignment_id)]
    pub id: Uuid,
    pub ticket_id: Uuid,
    #[diesel(column_name = is_in_pool)]
    pub in_pool: bool,
    pub department_id: Option<Uuid>,
    pub person_id: Option<Uuid>,
    pub status: String,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Assignment {
    /// A fresh OPEN row. Without a target department the row goes to the pool.
    pub fn open(ticket_id: Uuid, department_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            in_pool: department_id.is_none(),
            department_id,
            person_id: None,
            status: AssignmentStatus::Open.as_str().to_string(),
            assigned_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// A claim is only possible on an OPEN row nobody holds yet.
pub fn ensure_takeable(assignment: &Assignment) -> Result<(), ServiceError> {
    if assignment.status != AssignmentStatus::Open.as_str() || assignment.person_id.is_some() {
        return Err(ServiceError::conflict(format!(
            "ticket {} is already claimed or has moved on",
            assignment.ticket_id
        )));
    }
    Ok(())
}

/// Target validation for explicitly created assignments: a pool row carries
/// no target at all, a routed row exactly one.
pub fn validate_targets(
    pool: bool,
    department_id: Option<Uuid>,
    person_id: Option<Uuid>,
) -> Result<(Option<Uuid>, Option<Uuid>), ServiceError> {
    if pool {
        return Ok((None, None));
    }
    if department_id.is_some() == person_id.is_some() {
        return Err(ServiceError::conflict(
            "a non-pool assignment requires exactly one of departmentId or personId",
        ));
    }
    Ok((department_id, person_id))
}

/// The row with the newest assigned timestamp defines the ticket's current
/// holder; everything older is history.
pub fn latest_for_ticket(
    conn: &mut PgConnection,
    ticket: Uuid,
) -> Result<Option<Assignment>, diesel::result::Error> {
    ticket_assignments::table
        .filter(ticket_assignments::ticket_id.eq(ticket))
        .order(ticket_assignments::assigned_at.desc())
        .first(conn)
        .optional()
}

pub fn insert_initial(
    conn: &mut PgConnection,
    ticket: Uuid,
    department_id: Option<Uuid>,
) -> Result<Assignment, diesel::result::Error> {
    let row = Assignment::open(ticket, department_id);
    diesel::insert_into(ticket_assignments::table)
        .values(&row)
        .execute(conn)?;
    Ok(row)
}

// ===== Transitions =====
//
// Each transition runs inside one transaction and locks the row it is about
// to mutate, so two concurrent claims of the same row cannot both pass the
// read-check-write sequence.

pub fn take_ticket(
    conn: &mut PgConnection,
    ticket: Uuid,
    dept: Uuid,
    actor: Uuid,
) -> Result<(Ticket, Assignment), ServiceError> {
    conn.transaction::<_, ServiceError, _>(|conn| {
        let current: Assignment = ticket_assignments::table
            .filter(ticket_assignments::ticket_id.eq(ticket))
            .filter(ticket_assignments::department_id.eq(dept))
            .order(ticket_assignments::assigned_at.desc())
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(|| {
                ServiceError::not_found(format!(
                    "ticket {ticket} is not routed to department {dept}"
                ))
            })?;

        ensure_takeable(&current)?;

        let claimed: Assignment = diesel::update(
            ticket_assignments::table.filter(ticket_assignments::assignment_id.eq(current.id)),
        )
        .set((
            ticket_assignments::status.eq(AssignmentStatus::InProgress.as_str()),
            ticket_assignments::person_id.eq(Some(actor)),
            ticket_assignments::department_id.eq(None::<Uuid>),
            ticket_assignments::assigned_at.eq(Utc::now()),
        ))
        .get_result(conn)?;

        let row: Ticket = tickets::table
            .filter(tickets::ticket_id.eq(ticket))
            .first(conn)?;

        info!("ticket {ticket} taken from department {dept} by person {actor}");
        Ok((row, claimed))
    })
}

pub fn reassign_ticket(
    conn: &mut PgConnection,
    ticket: Uuid,
    from_dept: Option<Uuid>,
    to_dept: Uuid,
    actor: Uuid,
) -> Result<(Ticket, Assignment), ServiceError> {
    conn.transaction::<_, ServiceError, _>(|conn| {
        // Contract: the latest row for the ticket is the one transferred,
        // whatever source department the caller names. A claimed row has its
        // department cleared, so filtering by source could never find it.
        let current: Assignment = ticket_assignments::table
            .filter(ticket_assignments::ticket_id.eq(ticket))
            .order(ticket_assignments::assigned_at.desc())
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(|| {
                ServiceError::not_found(format!("ticket {ticket} has no assignment"))
            })?;

        if let Some(from) = from_dept {
            if current.department_id != Some(from) {
                debug!(
                    "reassign of ticket {ticket}: fromDeptId {from} does not match the current row, using latest assignment"
                );
            }
        }

        diesel::update(
            ticket_assignments::table.filter(ticket_assignments::assignment_id.eq(current.id)),
        )
        .set((
            ticket_assignments::status.eq(AssignmentStatus::Transferred.as_str()),
            ticket_assignments::person_id.eq(Some(actor)),
            ticket_assignments::department_id.eq(None::<Uuid>),
            ticket_assignments::completed_at.eq(Some(Utc::now())),
        ))
        .execute(conn)?;

        let replacement = Assignment::open(ticket, Some(to_dept));
        diesel::insert_into(ticket_assignments::table)
            .values(&replacement)
            .execute(conn)?;

        let row: Ticket = tickets::table
            .filter(tickets::ticket_id.eq(ticket))
            .first(conn)?;

        info!("ticket {ticket} reassigned to department {to_dept} by person {actor}");
        Ok((row, replacement))
    })
}

/// Idempotent: closing an inactive ticket returns it untouched.
pub fn close_ticket(conn: &mut PgConnection, ticket: Uuid) -> Result<Ticket, ServiceError> {
    conn.transaction::<_, ServiceError, _>(|conn| {
        let row: Ticket = tickets::table
            .filter(tickets::ticket_id.eq(ticket))
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(|| ServiceError::not_found(format!("ticket {ticket} not found")))?;

        if !row.active {
            return Ok(row);
        }

        let now = Utc::now();
        let closed: Ticket = diesel::update(tickets::table.filter(tickets::ticket_id.eq(ticket)))
            .set((
                tickets::is_active.eq(false),
                tickets::closed_at.eq(Some(now)),
            ))
            .get_result(conn)?;

        diesel::update(
            ticket_assignments::table
                .filter(ticket_assignments::ticket_id.eq(ticket))
                .filter(ticket_assignments::completed_at.is_null()),
        )
        .set(ticket_assignments::completed_at.eq(Some(now)))
        .execute(conn)?;

        diesel::update(
            ticket_assignments::table
                .filter(ticket_assignments::ticket_id.eq(ticket))
                .filter(ticket_assignments::status.ne(AssignmentStatus::Done.as_str())),
        )
        .set(ticket_assignments::status.eq(AssignmentStatus::Done.as_str()))
        .execute(conn)?;

        info!("ticket {ticket} closed");
        Ok(closed)
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRequest {
    pub ticket_id: Uuid,
    pub pool: Option<bool>,
    pub department_id: Option<Uuid>,
    pub person_id: Option<Uuid>,
    pub status: Option<String>,
}

/// Explicit assignment creation, the administrative escape hatch. Pool rows
/// are unique per ticket; routed rows carry exactly one target.
pub fn create_assignment(
    conn: &mut PgConnection,
    req: &AssignmentRequest,
) -> Result<Assignment, ServiceError> {
    let pool = req.pool.unwrap_or(false);
    let (department_id, person_id) = validate_targets(pool, req.department_id, req.person_id)?;
    let status = match &req.status {
        Some(s) if !s.trim().is_empty() => AssignmentStatus::from_str(s)?,
        _ => AssignmentStatus::Open,
    };

    conn.transaction::<_, ServiceError, _>(|conn| {
        tickets::table
            .filter(tickets::ticket_id.eq(req.ticket_id))
            .first::<Ticket>(conn)
            .optional()?
            .ok_or_else(|| {
                ServiceError::not_found(format!("ticket {} not found", req.ticket_id))
            })?;

        if pool {
            let existing: i64 = ticket_assignments::table
                .filter(ticket_assignments::ticket_id.eq(req.ticket_id))
                .filter(ticket_assignments::is_in_pool.eq(true))
                .count()
                .get_result(conn)?;
            if existing > 0 {
                return Err(ServiceError::conflict(format!(
                    "ticket {} already has a pool assignment",
                    req.ticket_id
                )));
            }
        }

        let row = Assignment {
            id: Uuid::new_v4(),
            ticket_id: req.ticket_id,
            in_pool: pool,
            department_id,
            person_id,
            status: status.as_str().to_string(),
            assigned_at: Utc::now(),
            completed_at: None,
        };
        diesel::insert_into(ticket_assignments::table)
            .values(&row)
            .execute(conn)?;
        Ok(row)
    })
}

// ===== Projections =====

pub fn department_rows(
    conn: &mut PgConnection,
    dept: Uuid,
) -> Result<Vec<(Assignment, Ticket)>, diesel::result::Error> {
    ticket_assignments::table
        .inner_join(tickets::table)
        .filter(ticket_assignments::department_id.eq(dept))
        .filter(ticket_assignments::status.ne(AssignmentStatus::Transferred.as_str()))
        .order(ticket_assignments::assigned_at.desc())
        .load(conn)
}

pub fn pool_rows(
    conn: &mut PgConnection,
) -> Result<Vec<(Assignment, Ticket)>, diesel::result::Error> {
    ticket_assignments::table
        .inner_join(tickets::table)
        .filter(ticket_assignments::is_in_pool.eq(true))
        .filter(ticket_assignments::status.eq(AssignmentStatus::Open.as_str()))
        .filter(ticket_assignments::person_id.is_null())
        .filter(tickets::is_active.eq(true))
        .order(ticket_assignments::assigned_at.desc())
        .load(conn)
}

pub fn my_assigned_rows(
    conn: &mut PgConnection,
    person: Uuid,
) -> Result<Vec<(Assignment, Ticket)>, diesel::result::Error> {
    ticket_assignments::table
        .inner_join(tickets::table)
        .filter(ticket_assignments::person_id.eq(person))
        .filter(ticket_assignments::status.eq(AssignmentStatus::InProgress.as_str()))
        .order(ticket_assignments::assigned_at.desc())
        .load(conn)
}

pub fn my_closed_rows(
    conn: &mut PgConnection,
    person: Uuid,
) -> Result<Vec<(Assignment, Ticket)>, diesel::result::Error> {
    ticket_assignments::table
        .inner_join(tickets::table)
        .filter(ticket_assignments::person_id.eq(person))
        .filter(
            ticket_assignments::completed_at
                .is_not_null()
                .or(ticket_assignments::status.eq(AssignmentStatus::Done.as_str())),
        )
        .order(ticket_assignments::completed_at.desc().nulls_last())
        .load(conn)
}

pub fn my_transferred_rows(
    conn: &mut PgConnection,
    person: Uuid,
) -> Result<Vec<(Assignment, Ticket)>, diesel::result::Error> {
    ticket_assignments::table
        .inner_join(tickets::table)
        .filter(ticket_assignments::person_id.eq(person))
        .filter(ticket_assignments::status.eq(AssignmentStatus::Transferred.as_str()))
        .order(ticket_assignments::completed_at.desc().nulls_last())
        .load(conn)
}

// ===== Handlers =====

fn rows_to_responses(
    conn: &mut PgConnection,
    rows: Vec<(Assignment, Ticket)>,
) -> Result<Vec<TicketResponse>, ServiceError> {
    rows.into_iter()
        .map(|(_, ticket)| ticket_response(conn, ticket))
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeQuery {
    pub dept_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassignQuery {
    pub from_dept_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeQuery {
    pub person_id: Option<Uuid>,
}

impl MeQuery {
    fn resolve(&self, identity: &Identity) -> Result<Uuid, ServiceError> {
        match self.person_id {
            Some(id) => Ok(id),
            None => identity.require_person(),
        }
    }
}

pub async fn list_department_tickets(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(dept_id): Path<Uuid>,
) -> Result<Json<Vec<TicketResponse>>, ServiceError> {
    identity.require_any_role(&[Role::Person, Role::Admin])?;
    let mut conn = state.conn.get()?;
    let rows = department_rows(&mut conn, dept_id)?;
    let mut responses = rows_to_responses(&mut conn, rows)?;
    drop(conn);
    enrich_assignees(&state, &mut responses).await;
    Ok(Json(responses))
}

pub async fn take(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(ticket_id): Path<Uuid>,
    Query(query): Query<TakeQuery>,
) -> Result<Json<TicketResponse>, ServiceError> {
    identity.require_any_role(&[Role::Person, Role::Admin])?;
    let actor = identity.require_person()?;
    let mut conn = state.conn.get()?;

    let (ticket, _) = take_ticket(&mut conn, ticket_id, query.dept_id, actor)?;
    let response = ticket_response(&mut conn, ticket)?;
    drop(conn);

    let mut responses = [response];
    enrich_assignees(&state, &mut responses).await;
    let [response] = responses;
    Ok(Json(response))
}

pub async fn reassign(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path((ticket_id, new_dept_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<ReassignQuery>,
) -> Result<Json<TicketResponse>, ServiceError> {
    identity.require_any_role(&[Role::Person, Role::Admin])?;
    let actor = identity.require_person()?;
    let mut conn = state.conn.get()?;

    let (ticket, _) =
        reassign_ticket(&mut conn, ticket_id, query.from_dept_id, new_dept_id, actor)?;
    let response = ticket_response(&mut conn, ticket)?;
    Ok(Json(response))
}

pub async fn close(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(ticket_id): Path<Uuid>,
) -> Result<Json<TicketResponse>, ServiceError> {
    identity.require_any_role(&[Role::Person, Role::Admin])?;
    let mut conn = state.conn.get()?;

    let ticket = close_ticket(&mut conn, ticket_id)?;
    let response = ticket_response(&mut conn, ticket)?;
    Ok(Json(response))
}

pub async fn my_assigned(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(query): Query<MeQuery>,
) -> Result<Json<Vec<TicketResponse>>, ServiceError> {
    identity.require_any_role(&[Role::Person, Role::Admin])?;
    let person = query.resolve(&identity)?;
    let mut conn = state.conn.get()?;
    let rows = my_assigned_rows(&mut conn, person)?;
    let mut responses = rows_to_responses(&mut conn, rows)?;
    drop(conn);
    enrich_assignees(&state, &mut responses).await;
    Ok(Json(responses))
}

pub async fn my_closed(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(query): Query<MeQuery>,
) -> Result<Json<Vec<TicketResponse>>, ServiceError> {
    identity.require_any_role(&[Role::Person, Role::Admin])?;
    let person = query.resolve(&identity)?;
    let mut conn = state.conn.get()?;
    let rows = my_closed_rows(&mut conn, person)?;
    let responses = rows_to_responses(&mut conn, rows)?;
    Ok(Json(responses))
}

pub async fn my_transferred(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Query(query): Query<MeQuery>,
) -> Result<Json<Vec<TicketResponse>>, ServiceError> {
    identity.require_any_role(&[Role::Person, Role::Admin])?;
    let person = query.resolve(&identity)?;
    let mut conn = state.conn.get()?;
    let rows = my_transferred_rows(&mut conn, person)?;
    let responses = rows_to_responses(&mut conn, rows)?;
    Ok(Json(responses))
}

pub async fn list_assignments(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<Assignment>>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    let mut conn = state.conn.get()?;
    let rows: Vec<Assignment> = ticket_assignments::table
        .order(ticket_assignments::assigned_at.desc())
        .load(&mut conn)?;
    Ok(Json(rows))
}

pub async fn create_assignment_endpoint(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<AssignmentRequest>,
) -> Result<Json<Assignment>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    let mut conn = state.conn.get()?;
    let row = create_assignment(&mut conn, &req)?;
    Ok(Json(row))
}

pub async fn list_pool(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<TicketResponse>>, ServiceError> {
    identity.require_any_role(&[Role::Person, Role::Admin])?;
    let mut conn = state.conn.get()?;
    let rows = pool_rows(&mut conn)?;
    let responses = rows_to_responses(&mut conn, rows)?;
    Ok(Json(responses))
}

pub fn configure_assignment_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/departments/:dept_id/tickets", get(list_department_tickets))
        .route("/api/departments/tickets/:ticket_id/take", put(take))
        .route(
            "/api/departments/tickets/:ticket_id/reassign/:new_dept_id",
            put(reassign),
        )
        .route("/api/departments/tickets/:ticket_id/close", put(close))
        .route("/api/departments/me/assigned", get(my_assigned))
        .route("/api/departments/me/closed", get(my_closed))
        .route("/api/departments/me/transferred", get(my_transferred))
        .route(
            "/api/assignments",
            get(list_assignments).post(create_assignment_endpoint),
        )
        .route("/api/assignments/pool", get(list_pool))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_row() -> Assignment {
        Assignment::open(Uuid::new_v4(), Some(Uuid::new_v4()))
    }

    #[test]
    fn status_round_trip() {
        for status in [
            AssignmentStatus::Open,
            AssignmentStatus::InProgress,
            AssignmentStatus::Transferred,
            AssignmentStatus::Done,
        ] {
            assert_eq!(
                AssignmentStatus::from_str(status.as_str()).unwrap(),
                status
            );
        }
        assert!(AssignmentStatus::from_str("CLOSED").is_err());
    }

    #[test]
    fn open_row_without_department_goes_to_pool() {
        let pooled = Assignment::open(Uuid::new_v4(), None);
        assert!(pooled.in_pool);
        assert!(pooled.department_id.is_none());
        assert!(pooled.person_id.is_none());

        let routed = open_row();
        assert!(!routed.in_pool);
        assert!(routed.department_id.is_some());
    }

    #[test]
    fn takeable_only_when_open_and_unclaimed() {
        let row = open_row();
        assert!(ensure_takeable(&row).is_ok());

        let mut claimed = open_row();
        claimed.person_id = Some(Uuid::new_v4());
        assert!(matches!(
            ensure_takeable(&claimed),
            Err(ServiceError::Conflict(_))
        ));

        let mut in_progress = open_row();
        in_progress.status = AssignmentStatus::InProgress.as_str().to_string();
        assert!(matches!(
            ensure_takeable(&in_progress),
            Err(ServiceError::Conflict(_))
        ));

        let mut transferred = open_row();
        transferred.status = AssignmentStatus::Transferred.as_str().to_string();
        assert!(ensure_takeable(&transferred).is_err());
    }

    #[test]
    fn pool_request_forces_empty_targets() {
        let dept = Some(Uuid::new_v4());
        let person = Some(Uuid::new_v4());
        assert_eq!(validate_targets(true, dept, person).unwrap(), (None, None));
    }

    #[test]
    fn non_pool_request_needs_exactly_one_target() {
        let dept = Some(Uuid::new_v4());
        let person = Some(Uuid::new_v4());

        assert!(validate_targets(false, dept, None).is_ok());
        assert!(validate_targets(false, None, person).is_ok());
        assert!(matches!(
            validate_targets(false, None, None),
            Err(ServiceError::Conflict(_))
        ));
        assert!(matches!(
            validate_targets(false, dept, person),
            Err(ServiceError::Conflict(_))
        ));
    }
}
