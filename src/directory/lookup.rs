use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// The slice of a person record the ticket surface needs for enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonSummary {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub department_id: Option<Uuid>,
}

impl PersonSummary {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Port for resolving persons from the directory. Enrichment callers treat
/// `None` as "leave the field absent"; a lookup failure must never fail the
/// request that triggered it.
#[async_trait]
pub trait PersonLookup: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Option<PersonSummary>;
}

/// Production wiring: resolves persons over HTTP from the directory service.
pub struct HttpPersonLookup {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPersonLookup {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PersonLookup for HttpPersonLookup {
    async fn get_by_id(&self, id: Uuid) -> Option<PersonSummary> {
        let url = format!("{}/api/persons/{}", self.base_url.trim_end_matches('/'), id);
        let result = async {
            let resp = self.client.get(&url).send().await?;
            let resp = resp.error_for_status()?;
            resp.json::<PersonSummary>().await
        }
        .await;

        match result {
            Ok(person) => Some(person),
            Err(e) => {
                // Best effort only: log and degrade to an absent field.
                warn!("person lookup for {id} failed: {e}");
                None
            }
        }
    }
}

/// Wiring for deployments without a person directory configured.
pub struct NoopPersonLookup;

#[async_trait]
impl PersonLookup for NoopPersonLookup {
    async fn get_by_id(&self, _id: Uuid) -> Option<PersonSummary> {
        None
    }
}

/// In-memory lookup for tests.
#[derive(Default)]
pub struct StubPersonLookup {
    entries: std::collections::HashMap<Uuid, PersonSummary>,
}

impl StubPersonLookup {
    pub fn with(mut self, person: PersonSummary) -> Self {
        self.entries.insert(person.id, person);
        self
    }
}

#[async_trait]
impl PersonLookup for StubPersonLookup {
    async fn get_by_id(&self, id: Uuid) -> Option<PersonSummary> {
        self.entries.get(&id).cloned()
    }
}
