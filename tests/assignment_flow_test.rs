//! Lifecycle tests for the assignment state machine against a real Postgres.
//! Set TEST_DATABASE_URL to run them; without it each test logs and returns.

use chrono::Utc;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use uuid::Uuid;

use deskserver::shared::schema::{categories, departments, ticket_assignments, tickets};
use deskserver::shared::utils::run_migrations;
use deskserver::tickets::assignment::{
    self, close_ticket, create_assignment, insert_initial, reassign_ticket, take_ticket,
    Assignment, AssignmentRequest, AssignmentStatus,
};
use deskserver::tickets::{new_ticket, Category, Priority};

type TestConn = PooledConnection<ConnectionManager<PgConnection>>;

fn test_conn() -> Option<TestConn> {
    let url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            println!("Skipping test - TEST_DATABASE_URL not set");
            return None;
        }
    };
    let manager = ConnectionManager::<PgConnection>::new(url);
    let pool = match Pool::builder().max_size(1).build(manager) {
        Ok(pool) => pool,
        Err(_) => {
            println!("Skipping test - cannot connect to database");
            return None;
        }
    };
    if run_migrations(&pool).is_err() {
        println!("Skipping test - cannot run migrations");
        return None;
    }
    let mut conn = pool.get().ok()?;
    conn.begin_test_transaction().ok()?;
    Some(conn)
}

fn seed_department(conn: &mut PgConnection, name: &str) -> Uuid {
    let id = Uuid::new_v4();
    diesel::insert_into(departments::table)
        .values((
            departments::department_id.eq(id),
            departments::name.eq(name),
            departments::is_active.eq(true),
            departments::is_updated.eq(false),
            departments::created_at.eq(Utc::now()),
        ))
        .execute(conn)
        .unwrap();
    id
}

fn seed_category(conn: &mut PgConnection, key: &str, target: Option<Uuid>) -> Category {
    let now = Utc::now();
    let category = Category {
        id: Uuid::new_v4(),
        key: key.to_string(),
        display_name: key.to_string(),
        target_department_id: target,
        active: true,
        created_at: now,
        updated_at: now,
    };
    diesel::insert_into(categories::table)
        .values(&category)
        .execute(conn)
        .unwrap();
    category
}

fn seed_ticket(conn: &mut PgConnection) -> Uuid {
    let ticket = new_ticket(
        "printer on fire".to_string(),
        Priority::High,
        None,
        Some(Uuid::new_v4()),
        true,
    )
    .unwrap();
    diesel::insert_into(tickets::table)
        .values(&ticket)
        .execute(conn)
        .unwrap();
    ticket.id
}

fn assignments_of(conn: &mut PgConnection, ticket: Uuid) -> Vec<Assignment> {
    ticket_assignments::table
        .filter(ticket_assignments::ticket_id.eq(ticket))
        .order(ticket_assignments::assigned_at.asc())
        .load(conn)
        .unwrap()
}

#[test]
fn take_claims_an_open_assignment() {
    let Some(mut conn) = test_conn() else { return };
    let dept = seed_department(&mut conn, "support");
    let ticket = seed_ticket(&mut conn);
    insert_initial(&mut conn, ticket, Some(dept)).unwrap();

    let actor = Uuid::new_v4();
    let (_, claimed) = take_ticket(&mut conn, ticket, dept, actor).unwrap();

    assert_eq!(claimed.status, AssignmentStatus::InProgress.as_str());
    assert_eq!(claimed.person_id, Some(actor));
    assert_eq!(claimed.department_id, None);

    let mine = assignment::my_assigned_rows(&mut conn, actor).unwrap();
    assert_eq!(mine.len(), 1);
    // The claimed row left the department queue.
    assert!(assignment::department_rows(&mut conn, dept)
        .unwrap()
        .is_empty());
}

#[test]
fn take_on_claimed_assignment_conflicts_and_leaves_state() {
    let Some(mut conn) = test_conn() else { return };
    let dept = seed_department(&mut conn, "support");
    let ticket = seed_ticket(&mut conn);
    insert_initial(&mut conn, ticket, Some(dept)).unwrap();

    let first = Uuid::new_v4();
    take_ticket(&mut conn, ticket, dept, first).unwrap();
    let before = assignments_of(&mut conn, ticket);

    // The department was cleared on take, so the second claim cannot even
    // find a row for (ticket, dept).
    let err = take_ticket(&mut conn, ticket, dept, Uuid::new_v4()).unwrap_err();
    assert!(matches!(
        err,
        deskserver::shared::error::ServiceError::NotFound(_)
    ));

    let after = assignments_of(&mut conn, ticket);
    assert_eq!(after.len(), before.len());
    assert_eq!(after[0].status, before[0].status);
    assert_eq!(after[0].person_id, Some(first));

    // A department row that is no longer OPEN conflicts outright.
    let other = seed_ticket(&mut conn);
    create_assignment(
        &mut conn,
        &AssignmentRequest {
            ticket_id: other,
            pool: None,
            department_id: Some(dept),
            person_id: None,
            status: Some("IN_PROGRESS".to_string()),
        },
    )
    .unwrap();
    let err = take_ticket(&mut conn, other, dept, Uuid::new_v4()).unwrap_err();
    assert!(matches!(
        err,
        deskserver::shared::error::ServiceError::Conflict(_)
    ));
}

#[test]
fn reassign_adds_exactly_one_open_row() {
    let Some(mut conn) = test_conn() else { return };
    let support = seed_department(&mut conn, "support");
    let billing = seed_department(&mut conn, "billing");
    let ticket = seed_ticket(&mut conn);
    insert_initial(&mut conn, ticket, Some(support)).unwrap();

    let actor = Uuid::new_v4();
    take_ticket(&mut conn, ticket, support, actor).unwrap();
    let count_before = assignments_of(&mut conn, ticket).len();

    // fromDeptId no longer matches anything after the take; the latest row
    // is still the one transferred.
    let (_, replacement) =
        reassign_ticket(&mut conn, ticket, Some(support), billing, actor).unwrap();

    let rows = assignments_of(&mut conn, ticket);
    assert_eq!(rows.len(), count_before + 1);

    let transferred: Vec<_> = rows
        .iter()
        .filter(|a| a.status == AssignmentStatus::Transferred.as_str())
        .collect();
    assert_eq!(transferred.len(), 1);
    assert_eq!(transferred[0].person_id, Some(actor));
    assert!(transferred[0].completed_at.is_some());
    assert_eq!(transferred[0].department_id, None);

    assert_eq!(replacement.status, AssignmentStatus::Open.as_str());
    assert_eq!(replacement.department_id, Some(billing));
    assert!(replacement.person_id.is_none());

    // The from/to trail is retrievable from the rows.
    let mine = assignment::my_transferred_rows(&mut conn, actor).unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(
        assignment::department_rows(&mut conn, billing).unwrap().len(),
        1
    );
}

#[test]
fn close_is_idempotent() {
    let Some(mut conn) = test_conn() else { return };
    let dept = seed_department(&mut conn, "support");
    let ticket = seed_ticket(&mut conn);
    insert_initial(&mut conn, ticket, Some(dept)).unwrap();

    let closed = close_ticket(&mut conn, ticket).unwrap();
    assert!(!closed.active);
    let first_closed_at = closed.closed_at.unwrap();
    let rows_after_first = assignments_of(&mut conn, ticket);
    assert!(rows_after_first
        .iter()
        .all(|a| a.status == AssignmentStatus::Done.as_str() && a.completed_at.is_some()));

    let again = close_ticket(&mut conn, ticket).unwrap();
    assert_eq!(again.closed_at, Some(first_closed_at));
    assert_eq!(assignments_of(&mut conn, ticket).len(), rows_after_first.len());
}

#[test]
fn category_without_target_routes_to_pool() {
    let Some(mut conn) = test_conn() else { return };
    let dept = seed_department(&mut conn, "support");
    let routed = seed_category(&mut conn, "hardware", Some(dept));
    let unrouted = seed_category(&mut conn, "misc", None);

    let t1 = seed_ticket(&mut conn);
    insert_initial(&mut conn, t1, routed.target_department_id).unwrap();
    let t2 = seed_ticket(&mut conn);
    insert_initial(&mut conn, t2, unrouted.target_department_id).unwrap();

    let queue = assignment::department_rows(&mut conn, dept).unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].1.id, t1);

    let pool = assignment::pool_rows(&mut conn).unwrap();
    assert_eq!(pool.len(), 1);
    assert_eq!(pool[0].1.id, t2);
}

#[test]
fn duplicate_pool_assignment_conflicts() {
    let Some(mut conn) = test_conn() else { return };
    let ticket = seed_ticket(&mut conn);

    let req = AssignmentRequest {
        ticket_id: ticket,
        pool: Some(true),
        department_id: None,
        person_id: None,
        status: None,
    };
    create_assignment(&mut conn, &req).unwrap();
    let err = create_assignment(&mut conn, &req).unwrap_err();
    assert!(matches!(
        err,
        deskserver::shared::error::ServiceError::Conflict(_)
    ));
}

#[test]
fn my_closed_covers_done_and_transferred_rows() {
    let Some(mut conn) = test_conn() else { return };
    let support = seed_department(&mut conn, "support");
    let billing = seed_department(&mut conn, "billing");
    let actor = Uuid::new_v4();

    // One ticket transferred away by the actor, one closed while held.
    let moved = seed_ticket(&mut conn);
    insert_initial(&mut conn, moved, Some(support)).unwrap();
    take_ticket(&mut conn, moved, support, actor).unwrap();
    reassign_ticket(&mut conn, moved, None, billing, actor).unwrap();

    let finished = seed_ticket(&mut conn);
    insert_initial(&mut conn, finished, Some(support)).unwrap();
    take_ticket(&mut conn, finished, support, actor).unwrap();
    close_ticket(&mut conn, finished).unwrap();

    let closed = assignment::my_closed_rows(&mut conn, actor).unwrap();
    assert_eq!(closed.len(), 2);
}

#[test]
fn soft_deleted_department_keeps_children_dangling() {
    let Some(mut conn) = test_conn() else { return };
    let dept = seed_department(&mut conn, "doomed");
    diesel::update(departments::table.filter(departments::department_id.eq(dept)))
        .set((
            departments::is_active.eq(false),
            departments::deleted_by.eq(Some(Uuid::new_v4())),
        ))
        .execute(&mut conn)
        .unwrap();

    let ticket = seed_ticket(&mut conn);
    insert_initial(&mut conn, ticket, Some(dept)).unwrap();

    // The queue still reports the row; the dangling id is not an error.
    assert_eq!(assignment::department_rows(&mut conn, dept).unwrap().len(), 1);
}
