//! Behavior of the HTTP person lookup port: successful resolution, and the
//! degrade-to-absent contract on every failure mode.

use uuid::Uuid;

use deskserver::directory::lookup::{HttpPersonLookup, PersonLookup, StubPersonLookup, PersonSummary};

#[tokio::test]
async fn resolves_a_person_over_http() {
    let mut server = mockito::Server::new_async().await;
    let id = Uuid::new_v4();
    let body = serde_json::json!({
        "id": id,
        "first_name": "Ada",
        "last_name": "Lovelace",
        "email": "ada@example.com",
        "department_id": null
    });
    let mock = server
        .mock("GET", format!("/api/persons/{id}").as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await;

    let lookup = HttpPersonLookup::new(server.url());
    let person = lookup.get_by_id(id).await.expect("person should resolve");
    assert_eq!(person.display_name(), "Ada Lovelace");
    assert_eq!(person.email, "ada@example.com");
    mock.assert_async().await;
}

#[tokio::test]
async fn http_error_degrades_to_none() {
    let mut server = mockito::Server::new_async().await;
    let id = Uuid::new_v4();
    server
        .mock("GET", format!("/api/persons/{id}").as_str())
        .with_status(500)
        .create_async()
        .await;

    let lookup = HttpPersonLookup::new(server.url());
    assert!(lookup.get_by_id(id).await.is_none());
}

#[tokio::test]
async fn malformed_body_degrades_to_none() {
    let mut server = mockito::Server::new_async().await;
    let id = Uuid::new_v4();
    server
        .mock("GET", format!("/api/persons/{id}").as_str())
        .with_status(200)
        .with_body("not json")
        .create_async()
        .await;

    let lookup = HttpPersonLookup::new(server.url());
    assert!(lookup.get_by_id(id).await.is_none());
}

#[tokio::test]
async fn unreachable_service_degrades_to_none() {
    // Nothing listens on this port.
    let lookup = HttpPersonLookup::new("http://127.0.0.1:1");
    assert!(lookup.get_by_id(Uuid::new_v4()).await.is_none());
}

#[tokio::test]
async fn stub_lookup_serves_seeded_entries() {
    let id = Uuid::new_v4();
    let stub = StubPersonLookup::default().with(PersonSummary {
        id,
        first_name: "Grace".into(),
        last_name: "Hopper".into(),
        email: "grace@example.com".into(),
        department_id: None,
    });
    assert!(stub.get_by_id(id).await.is_some());
    assert!(stub.get_by_id(Uuid::new_v4()).await.is_none());
}
