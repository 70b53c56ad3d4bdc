pub mod assignment;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::directory::departments;
use crate::security::{Identity, Role};
use crate::shared::error::ServiceError;
use crate::shared::schema::{categories, customers, tickets};
use crate::shared::state::AppState;
use assignment::Assignment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl FromStr for Priority {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            other => Err(ServiceError::invalid(format!(
                "priority must be LOW, MEDIUM or HIGH, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = tickets)]
pub struct Ticket {
    #[diesel(column_name = ticket_id)]
    pub id: Uuid,
    pub issue: String,
    pub priority: String,
    #[diesel(column_name = is_active)]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    #[diesel(column_name = is_employee)]
    pub employee: bool,
    pub creator_customer_id: Option<Uuid>,
    pub creator_person_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = customers)]
pub struct Customer {
    #[diesel(column_name = customer_id)]
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = categories)]
pub struct Category {
    #[diesel(column_name = category_id)]
    pub id: Uuid,
    #[diesel(column_name = category_key)]
    pub key: String,
    pub display_name: String,
    pub target_department_id: Option<Uuid>,
    #[diesel(column_name = is_active)]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Builds a ticket row, enforcing that exactly one creator reference is set.
pub fn new_ticket(
    issue: String,
    priority: Priority,
    creator_customer_id: Option<Uuid>,
    creator_person_id: Option<Uuid>,
    employee: bool,
) -> Result<Ticket, ServiceError> {
    if issue.trim().is_empty() {
        return Err(ServiceError::invalid("issue text must not be empty"));
    }
    if creator_customer_id.is_some() == creator_person_id.is_some() {
        return Err(ServiceError::invalid(
            "a ticket needs exactly one of a customer or a person creator",
        ));
    }
    Ok(Ticket {
        id: Uuid::new_v4(),
        issue,
        priority: priority.as_str().to_string(),
        active: true,
        created_at: Utc::now(),
        closed_at: None,
        employee,
        creator_customer_id,
        creator_person_id,
    })
}

// ===== Requests / responses =====

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicTicketRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub issue: String,
    pub priority: String,
    pub category_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalTicketRequest {
    pub issue: String,
    pub priority: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTicketRequest {
    pub issue: String,
    pub priority: String,
    pub category_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCategoryRequest {
    pub key: String,
    pub display_name: String,
    pub target_department_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryResponse {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub target_department_id: Option<Uuid>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

/// A ticket as the API reports it: the row itself plus a projection of its
/// current assignment and, best-effort, the assignee's name.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketResponse {
    pub id: Uuid,
    pub issue: String,
    pub priority: String,
    pub active: bool,
    pub employee: bool,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub department_id: Option<Uuid>,
    pub assignee_person_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer: Option<CustomerInfo>,
}

/// Projects a ticket through its latest assignment row (the row with the
/// newest assigned timestamp, which defines the ticket's current holder).
pub(crate) fn ticket_response(
    conn: &mut PgConnection,
    ticket: Ticket,
) -> Result<TicketResponse, ServiceError> {
    let current: Option<Assignment> = assignment::latest_for_ticket(conn, ticket.id)?;

    let customer = match ticket.creator_customer_id {
        Some(cid) => customers::table
            .filter(customers::customer_id.eq(cid))
            .first::<Customer>(conn)
            .optional()?
            .map(|c| CustomerInfo {
                email: c.email,
                first_name: c.first_name,
                last_name: c.last_name,
                phone: c.phone,
            }),
        None => None,
    };

    Ok(TicketResponse {
        id: ticket.id,
        issue: ticket.issue,
        priority: ticket.priority,
        active: ticket.active,
        employee: ticket.employee,
        created_at: ticket.created_at,
        closed_at: ticket.closed_at,
        status: current.as_ref().map(|a| a.status.clone()),
        department_id: current.as_ref().and_then(|a| a.department_id),
        assignee_person_id: current.as_ref().and_then(|a| a.person_id),
        assignee_name: None,
        customer,
    })
}

/// Fills assignee names through the person lookup port. Failures leave the
/// field absent; they never fail the surrounding request.
pub(crate) async fn enrich_assignees(state: &AppState, responses: &mut [TicketResponse]) {
    for response in responses.iter_mut() {
        if let Some(person_id) = response.assignee_person_id {
            if let Some(person) = state.persons.get_by_id(person_id).await {
                response.assignee_name = Some(person.display_name());
            }
        }
    }
}

// ===== Intake =====

pub async fn create_public_ticket(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PublicTicketRequest>,
) -> Result<Json<TicketResponse>, ServiceError> {
    let priority = Priority::from_str(&req.priority)?;
    if req.email.trim().is_empty() {
        return Err(ServiceError::invalid("email is required"));
    }
    let mut conn = state.conn.get()?;

    let response = conn.transaction::<_, ServiceError, _>(|conn| {
        let customer = match customers::table
            .filter(customers::email.eq(&req.email))
            .first::<Customer>(conn)
            .optional()?
        {
            Some(existing) => existing,
            None => {
                let created = Customer {
                    id: Uuid::new_v4(),
                    first_name: req.first_name.clone(),
                    last_name: req.last_name.clone(),
                    email: req.email.clone(),
                    phone: req.phone.clone(),
                };
                diesel::insert_into(customers::table)
                    .values(&created)
                    .execute(conn)?;
                created
            }
        };

        let category: Category = categories::table
            .filter(categories::category_id.eq(req.category_id))
            .first(conn)
            .optional()?
            .ok_or_else(|| {
                ServiceError::not_found(format!("category {} not found", req.category_id))
            })?;

        let ticket = new_ticket(req.issue.clone(), priority, Some(customer.id), None, false)?;
        diesel::insert_into(tickets::table)
            .values(&ticket)
            .execute(conn)?;

        // No target department on the category routes the ticket to the pool.
        assignment::insert_initial(conn, ticket.id, category.target_department_id)?;

        info!(
            "public ticket {} created for customer {}",
            ticket.id, customer.id
        );
        ticket_response(conn, ticket)
    })?;

    let mut responses = [response];
    enrich_assignees(&state, &mut responses).await;
    let [response] = responses;
    Ok(Json(response))
}

pub async fn create_internal_ticket(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Path(dept_id): Path<Uuid>,
    Json(req): Json<InternalTicketRequest>,
) -> Result<Json<TicketResponse>, ServiceError> {
    identity.require_any_role(&[Role::Person, Role::Admin])?;
    let actor = identity.require_person()?;
    let priority = Priority::from_str(&req.priority)?;
    let mut conn = state.conn.get()?;

    departments::find_active(&mut conn, dept_id)?.ok_or_else(|| {
        ServiceError::invalid(format!("department {dept_id} does not exist"))
    })?;

    let response = conn.transaction::<_, ServiceError, _>(|conn| {
        let ticket = new_ticket(req.issue.clone(), priority, None, Some(actor), true)?;
        diesel::insert_into(tickets::table)
            .values(&ticket)
            .execute(conn)?;
        assignment::insert_initial(conn, ticket.id, Some(dept_id))?;

        info!(
            "internal ticket {} created by person {actor} for department {dept_id}",
            ticket.id
        );
        ticket_response(conn, ticket)
    })?;

    Ok(Json(response))
}

pub async fn create_user_ticket(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<UserTicketRequest>,
) -> Result<Json<TicketResponse>, ServiceError> {
    identity.require_any_role(&[Role::User])?;
    let person_id = identity.require_person()?;
    let priority = Priority::from_str(&req.priority)?;
    let mut conn = state.conn.get()?;

    let response = conn.transaction::<_, ServiceError, _>(|conn| {
        let ticket = new_ticket(req.issue.clone(), priority, None, Some(person_id), true)?;
        diesel::insert_into(tickets::table)
            .values(&ticket)
            .execute(conn)?;

        // Without a category the ticket starts unrouted, with no assignment.
        if let Some(category_id) = req.category_id {
            let category: Category = categories::table
                .filter(categories::category_id.eq(category_id))
                .first(conn)
                .optional()?
                .ok_or_else(|| {
                    ServiceError::not_found(format!("category {category_id} not found"))
                })?;
            assignment::insert_initial(conn, ticket.id, category.target_department_id)?;
        }

        info!("user ticket {} created by person {person_id}", ticket.id);
        ticket_response(conn, ticket)
    })?;

    Ok(Json(response))
}

// ===== Listings =====

pub async fn list_my_tickets(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<TicketResponse>>, ServiceError> {
    identity.require_any_role(&[Role::User])?;
    let person_id = identity.require_person()?;
    let mut conn = state.conn.get()?;

    let rows: Vec<Ticket> = tickets::table
        .filter(tickets::creator_person_id.eq(person_id))
        .order(tickets::created_at.desc())
        .load(&mut conn)?;
    let mut responses = rows
        .into_iter()
        .map(|t| ticket_response(&mut conn, t))
        .collect::<Result<Vec<_>, _>>()?;
    drop(conn);

    enrich_assignees(&state, &mut responses).await;
    Ok(Json(responses))
}

pub async fn list_all_tickets(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<Vec<TicketResponse>>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    let mut conn = state.conn.get()?;

    let rows: Vec<Ticket> = tickets::table
        .order(tickets::created_at.desc())
        .load(&mut conn)?;
    let mut responses = rows
        .into_iter()
        .map(|t| ticket_response(&mut conn, t))
        .collect::<Result<Vec<_>, _>>()?;
    drop(conn);

    enrich_assignees(&state, &mut responses).await;
    Ok(Json(responses))
}

// ===== Categories =====

pub async fn list_categories(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<CategoryResponse>>, ServiceError> {
    let mut conn = state.conn.get()?;
    let rows: Vec<Category> = categories::table
        .filter(categories::is_active.eq(true))
        .order(categories::display_name.asc())
        .load(&mut conn)?;
    Ok(Json(
        rows.into_iter()
            .map(|c| CategoryResponse {
                id: c.id,
                key: c.key,
                name: c.display_name,
                target_department_id: c.target_department_id,
                active: c.active,
            })
            .collect(),
    ))
}

pub async fn create_category(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<CreateCategoryRequest>,
) -> Result<Json<CategoryResponse>, ServiceError> {
    identity.require_any_role(&[Role::Admin])?;
    if req.key.trim().is_empty() || req.display_name.trim().is_empty() {
        return Err(ServiceError::invalid(
            "category key and display name are required",
        ));
    }
    let mut conn = state.conn.get()?;

    let now = Utc::now();
    let category = Category {
        id: Uuid::new_v4(),
        key: req.key,
        display_name: req.display_name,
        target_department_id: req.target_department_id,
        active: true,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(categories::table)
        .values(&category)
        .execute(&mut conn)?;

    info!("created category {} ({})", category.key, category.id);
    Ok(Json(CategoryResponse {
        id: category.id,
        key: category.key,
        name: category.display_name,
        target_department_id: category.target_department_id,
        active: category.active,
    }))
}

pub fn configure_tickets_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tickets/public", post(create_public_ticket))
        .route("/api/categories", get(list_categories).post(create_category))
        .route(
            "/api/user-panel/tickets",
            get(list_my_tickets).post(create_user_ticket),
        )
        .route("/api/admin/tickets", get(list_all_tickets))
        .route(
            "/api/departments/:dept_id/tickets/internal",
            post(create_internal_ticket),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_parsing_is_strict() {
        assert_eq!(Priority::from_str("LOW").unwrap(), Priority::Low);
        assert_eq!(Priority::from_str("MEDIUM").unwrap(), Priority::Medium);
        assert_eq!(Priority::from_str("HIGH").unwrap(), Priority::High);
        assert!(Priority::from_str("urgent").is_err());
        assert!(Priority::from_str("low").is_err());
    }

    #[test]
    fn ticket_requires_exactly_one_creator() {
        let customer = Some(Uuid::new_v4());
        let person = Some(Uuid::new_v4());

        assert!(new_ticket("x".into(), Priority::Low, customer, None, false).is_ok());
        assert!(new_ticket("x".into(), Priority::Low, None, person, true).is_ok());
        assert!(matches!(
            new_ticket("x".into(), Priority::Low, None, None, false),
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(matches!(
            new_ticket("x".into(), Priority::Low, customer, person, false),
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn ticket_requires_issue_text() {
        assert!(matches!(
            new_ticket("  ".into(), Priority::High, Some(Uuid::new_v4()), None, false),
            Err(ServiceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn new_ticket_starts_open_and_active() {
        let t = new_ticket("help".into(), Priority::Medium, Some(Uuid::new_v4()), None, false)
            .unwrap();
        assert!(t.active);
        assert!(t.closed_at.is_none());
        assert_eq!(t.priority, "MEDIUM");
        assert!(!t.employee);
    }
}
