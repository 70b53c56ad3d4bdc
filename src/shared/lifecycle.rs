use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Soft-delete state shared by the directory entities. Deleting a record
/// flips `active` and records who did it; the row itself is never removed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Queryable, Insertable)]
#[diesel(table_name = crate::shared::schema::departments)]
#[diesel(table_name = crate::shared::schema::persons)]
pub struct Lifecycle {
    #[diesel(column_name = is_active)]
    pub active: bool,
    pub deleted_by: Option<Uuid>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            active: true,
            deleted_by: None,
        }
    }

    pub fn deleted(by: Option<Uuid>) -> Self {
        Self {
            active: false,
            deleted_by: by,
        }
    }

    pub fn is_deleted(&self) -> bool {
        !self.active
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_lifecycle_is_active() {
        let lc = Lifecycle::new();
        assert!(lc.active);
        assert!(lc.deleted_by.is_none());
        assert!(!lc.is_deleted());
    }

    #[test]
    fn deleted_records_actor() {
        let actor = Uuid::new_v4();
        let lc = Lifecycle::deleted(Some(actor));
        assert!(lc.is_deleted());
        assert_eq!(lc.deleted_by, Some(actor));
    }
}
