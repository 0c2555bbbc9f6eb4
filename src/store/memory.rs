use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use super::{EventStore, InsightsNotifier, StudentDirectory, StudentQuery};
use crate::error::StoreError;
use crate::models::{DateRange, NewUpload, NormalizedEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentRecord {
    pub student_id: String,
    pub student_name: String,
    pub grade: Option<i32>,
    pub section: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub upload_id: Uuid,
    pub event: NormalizedEvent,
}

#[derive(Debug, Default)]
struct MemoryState {
    uploads: Vec<(Uuid, NewUpload)>,
    events: Vec<StoredEvent>,
    refresh_requests: Vec<(Uuid, Vec<String>)>,
    lookups: usize,
    insert_calls: usize,
    delete_calls: usize,
}

/// A [`super::Datastore`] held in memory.
///
/// Supports injected failures on a chosen insert batch or on the insights
/// notification, and counts directory lookups so cache behaviour can be
/// observed.
#[derive(Debug, Default)]
pub struct MemoryStore {
    students: Vec<StudentRecord>,
    /// 1-based insert call that fails.
    fail_insert_call: Option<usize>,
    fail_refresh: bool,
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_student(
        mut self,
        student_id: &str,
        student_name: &str,
        grade: Option<i32>,
        section: Option<&str>,
    ) -> Self {
        self.students.push(StudentRecord {
            student_id: student_id.to_string(),
            student_name: student_name.to_string(),
            grade,
            section: section.map(str::to_string),
        });
        self
    }

    /// Pre-loads events as if an earlier upload had written them.
    pub fn with_events(self, events: Vec<NormalizedEvent>) -> Self {
        {
            let mut state = self.lock();
            let upload_id = Uuid::new_v4();
            state
                .events
                .extend(events.into_iter().map(|event| StoredEvent { upload_id, event }));
        }
        self
    }

    pub fn failing_insert_call(mut self, call: usize) -> Self {
        self.fail_insert_call = Some(call);
        self
    }

    pub fn failing_refresh(mut self) -> Self {
        self.fail_refresh = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn events(&self) -> Vec<StoredEvent> {
        self.lock().events.clone()
    }

    pub fn uploads(&self) -> Vec<(Uuid, NewUpload)> {
        self.lock().uploads.clone()
    }

    pub fn refresh_requests(&self) -> Vec<(Uuid, Vec<String>)> {
        self.lock().refresh_requests.clone()
    }

    pub fn lookup_count(&self) -> usize {
        self.lock().lookups
    }

    pub fn insert_calls(&self) -> usize {
        self.lock().insert_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.lock().delete_calls
    }
}

#[async_trait]
impl StudentDirectory for MemoryStore {
    async fn find_student_ids(&self, query: &StudentQuery) -> Result<Vec<String>, StoreError> {
        self.lock().lookups += 1;
        let name = query.name.to_lowercase();

        Ok(self
            .students
            .iter()
            .filter(|s| s.student_name.to_lowercase() == name)
            .filter(|s| query.grade.is_none() || s.grade == query.grade)
            .filter(|s| query.section.is_none() || s.section == query.section)
            .map(|s| s.student_id.clone())
            .collect())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn record_upload(&self, upload: &NewUpload) -> Result<Uuid, StoreError> {
        let upload_id = Uuid::new_v4();
        self.lock().uploads.push((upload_id, upload.clone()));
        Ok(upload_id)
    }

    async fn delete_all_events(&self) -> Result<u64, StoreError> {
        let mut state = self.lock();
        state.delete_calls += 1;
        let removed = state.events.len() as u64;
        state.events.clear();
        Ok(removed)
    }

    async fn delete_events_in_range(&self, range: DateRange) -> Result<u64, StoreError> {
        let mut state = self.lock();
        state.delete_calls += 1;
        let before = state.events.len();
        state.events.retain(|stored| !range.contains(stored.event.event_date));
        Ok((before - state.events.len()) as u64)
    }

    async fn insert_events(
        &self,
        upload_id: Uuid,
        events: &[NormalizedEvent],
    ) -> Result<u64, StoreError> {
        let mut state = self.lock();
        state.insert_calls += 1;
        if self.fail_insert_call == Some(state.insert_calls) {
            return Err(StoreError::Other(format!(
                "insert batch {} rejected",
                state.insert_calls
            )));
        }
        state.events.extend(events.iter().cloned().map(|event| StoredEvent { upload_id, event }));
        Ok(events.len() as u64)
    }
}

#[async_trait]
impl InsightsNotifier for MemoryStore {
    async fn request_refresh(
        &self,
        upload_id: Uuid,
        student_ids: &[String],
    ) -> Result<(), StoreError> {
        if self.fail_refresh {
            return Err(StoreError::Other("insights service unavailable".to_string()));
        }
        self.lock()
            .refresh_requests
            .push((upload_id, student_ids.to_vec()));
        Ok(())
    }
}
