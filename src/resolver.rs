use std::collections::HashMap;

use crate::error::RowProblem;
use crate::normalize::StudentIdentity;
use crate::store::{StudentDirectory, StudentQuery};

/// Lowercased `name|grade|section` key; absent parts are empty.
pub fn cache_key(name: &str, grade: Option<i32>, section: Option<&str>) -> String {
    format!(
        "{}|{}|{}",
        name,
        grade.map(|g| g.to_string()).unwrap_or_default(),
        section.unwrap_or_default()
    )
    .to_lowercase()
}

/// Resolver scoped to one ingestion call.
///
/// Only unique matches are cached. Misses and ambiguous lookups are asked
/// again on every row so a later row with a section can still succeed.
pub struct StudentResolver<'a, D: ?Sized> {
    directory: &'a D,
    cache: HashMap<String, String>,
}

impl<'a, D: StudentDirectory + ?Sized> StudentResolver<'a, D> {
    pub fn new(directory: &'a D) -> Self {
        Self {
            directory,
            cache: HashMap::new(),
        }
    }

    /// Returns the student id for `identity`.
    ///
    /// An explicit id on the row is trusted without a lookup.
    pub async fn resolve(&mut self, identity: &StudentIdentity) -> Result<String, RowProblem> {
        if let Some(id) = &identity.explicit_id {
            return Ok(id.clone());
        }
        let Some(name) = &identity.name else {
            return Err(RowProblem::MissingStudent);
        };

        let key = cache_key(name, identity.grade, identity.section.as_deref());
        if let Some(id) = self.cache.get(&key) {
            return Ok(id.clone());
        }

        let query = StudentQuery {
            name: name.clone(),
            grade: identity.grade,
            section: identity.section.clone(),
        };
        let mut matches = match self.directory.find_student_ids(&query).await {
            Ok(matches) => matches,
            Err(e) => {
                log::warn!("Student lookup for '{name}' failed: {e}");
                return Err(RowProblem::UnresolvedStudent);
            }
        };

        match matches.len() {
            0 => {
                log::debug!("No student matches '{key}'");
                Err(RowProblem::UnresolvedStudent)
            }
            1 => {
                let id = matches.remove(0);
                self.cache.insert(key, id.clone());
                Ok(id)
            }
            n => {
                log::debug!("{n} students match '{key}'");
                Err(RowProblem::AmbiguousStudent)
            }
        }
    }

    pub fn cached(&self, key: &str) -> Option<&str> {
        self.cache.get(key).map(String::as_str)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}
