use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{DateRange, NewUpload, NormalizedEvent, Severity};
use crate::store::{EventStore, InsightsNotifier, StudentDirectory, StudentQuery};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let students = vec![
        ("STU-1001", "Lee, Avery", 7, "A"),
        ("STU-1002", "Moreno, Jules", 8, "B"),
        ("STU-1003", "Patel, Kiara", 7, "B"),
        ("STU-1004", "Patel, Kiara", 8, "A"),
        ("STU-1005", "Okafor, Dami", 6, "A"),
    ];

    let mut upserted = 0usize;
    for (id, name, grade, section) in students {
        sqlx::query(
            r#"
            INSERT INTO merit_ingest.students (student_id, student_name, grade, section)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (student_id) DO UPDATE
            SET student_name = EXCLUDED.student_name,
                grade = EXCLUDED.grade,
                section = EXCLUDED.section
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(grade)
        .bind(section)
        .execute(pool)
        .await?;
        upserted += 1;
    }

    Ok(upserted)
}

/// Postgres-backed datastore over the `merit_ingest` schema.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StudentDirectory for PgStore {
    async fn find_student_ids(&self, query: &StudentQuery) -> Result<Vec<String>, StoreError> {
        let mut sql = String::from(
            "SELECT student_id FROM merit_ingest.students WHERE lower(student_name) = lower($1)",
        );
        let mut next_param = 2;
        if query.grade.is_some() {
            sql.push_str(&format!(" AND grade = ${next_param}"));
            next_param += 1;
        }
        if query.section.is_some() {
            sql.push_str(&format!(" AND section = ${next_param}"));
        }

        let mut rows = sqlx::query(&sql).bind(&query.name);
        if let Some(grade) = query.grade {
            rows = rows.bind(grade);
        }
        if let Some(section) = &query.section {
            rows = rows.bind(section);
        }

        let records = rows.fetch_all(&self.pool).await?;
        let mut ids = Vec::with_capacity(records.len());
        for row in records {
            ids.push(row.try_get("student_id")?);
        }

        Ok(ids)
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn record_upload(&self, upload: &NewUpload) -> Result<Uuid, StoreError> {
        let row_count = i32::try_from(upload.row_count).map_err(|_| {
            StoreError::Other(format!("row count {} out of range", upload.row_count))
        })?;

        let upload_id: Uuid = sqlx::query(
            r#"
            INSERT INTO merit_ingest.behaviour_uploads
            (upload_id, uploaded_by, source_system, file_name, row_count, upload_type,
             range_start, range_end)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING upload_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(upload.uploaded_by.as_deref())
        .bind(&upload.source_system)
        .bind(&upload.file_name)
        .bind(row_count)
        .bind(upload.upload_type.as_str())
        .bind(upload.range.map(|r| r.start))
        .bind(upload.range.map(|r| r.end))
        .fetch_one(&self.pool)
        .await?
        .try_get("upload_id")?;

        Ok(upload_id)
    }

    async fn delete_all_events(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM merit_ingest.behaviour_events")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_events_in_range(&self, range: DateRange) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM merit_ingest.behaviour_events WHERE event_date BETWEEN $1 AND $2",
        )
        .bind(range.start)
        .bind(range.end)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn insert_events(
        &self,
        upload_id: Uuid,
        events: &[NormalizedEvent],
    ) -> Result<u64, StoreError> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO merit_ingest.behaviour_events \
             (event_id, upload_id, student_id, student_name, grade, section, event_type, \
             event_date, event_time, points, category, subcategory, severity, staff_id, \
             staff_name, class_context, location, notes, source_system) ",
        );

        builder.push_values(events, |mut row, event| {
            row.push_bind(Uuid::new_v4())
                .push_bind(upload_id)
                .push_bind(event.student_id.clone())
                .push_bind(event.student_name.clone())
                .push_bind(event.grade)
                .push_bind(event.section.clone())
                .push_bind(event.event_type.as_str())
                .push_bind(event.event_date)
                .push_bind(event.event_time)
                .push_bind(event.points)
                .push_bind(event.category.clone())
                .push_bind(event.subcategory.clone())
                .push_bind(event.severity.map(Severity::as_str))
                .push_bind(event.staff_id.clone())
                .push_bind(event.staff_name.clone())
                .push_bind(event.class_context.clone())
                .push_bind(event.location.clone())
                .push_bind(event.notes.clone())
                .push_bind(event.source_system.clone());
        });

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl InsightsNotifier for PgStore {
    async fn request_refresh(
        &self,
        upload_id: Uuid,
        student_ids: &[String],
    ) -> Result<(), StoreError> {
        if student_ids.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO merit_ingest.insight_refresh_requests (upload_id, student_id) ",
        );
        builder.push_values(student_ids, |mut row, student_id| {
            row.push_bind(upload_id).push_bind(student_id.clone());
        });
        builder.build().execute(&self.pool).await?;

        Ok(())
    }
}
