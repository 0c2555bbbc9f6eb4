pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{DateRange, NewUpload, NormalizedEvent};

/// Lookup parameters for [`StudentDirectory::find_student_ids`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentQuery {
    pub name: String,
    pub grade: Option<i32>,
    pub section: Option<String>,
}

#[async_trait]
pub trait StudentDirectory: Send + Sync {
    /// Ids of students whose name matches `query.name` ignoring case,
    /// narrowed to the exact grade and section when those are given.
    async fn find_student_ids(&self, query: &StudentQuery) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Writes the audit record for one ingestion call and returns its id.
    async fn record_upload(&self, upload: &NewUpload) -> Result<Uuid, StoreError>;

    async fn delete_all_events(&self) -> Result<u64, StoreError>;

    /// Deletes events dated inside `range`, both ends included.
    async fn delete_events_in_range(&self, range: DateRange) -> Result<u64, StoreError>;

    /// Inserts one batch. Either the whole batch lands or none of it does.
    async fn insert_events(
        &self,
        upload_id: Uuid,
        events: &[NormalizedEvent],
    ) -> Result<u64, StoreError>;
}

/// Downstream consumer that recomputes per-student insights.
#[async_trait]
pub trait InsightsNotifier: Send + Sync {
    async fn request_refresh(&self, upload_id: Uuid, student_ids: &[String])
        -> Result<(), StoreError>;
}

/// Everything an ingestion call talks to.
pub trait Datastore: StudentDirectory + EventStore + InsightsNotifier {}

impl<T: StudentDirectory + EventStore + InsightsNotifier> Datastore for T {}
