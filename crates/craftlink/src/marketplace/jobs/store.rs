use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use super::domain::{fields, Job, JobStatus};
use crate::marketplace::applications::domain::{fields as application_fields, ApplicationStatus};
use crate::marketplace::error::MarketplaceError;
use crate::marketplace::ids::{JobId, UserId};
use crate::marketplace::store::{
    decode_all, from_document, to_document, Collection, Direction, DocumentStore, FieldUpdate,
    Filter, Query, StoreError,
};

/// Typed adapter over the `jobs` collection.
pub struct JobStore<S> {
    store: Arc<S>,
}

impl<S> Clone for JobStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> JobStore<S>
where
    S: DocumentStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn fetch(&self, job_id: &JobId) -> Result<Job, MarketplaceError> {
        let document = self
            .store
            .get(Collection::Jobs, job_id.as_str())
            .await?
            .ok_or_else(|| MarketplaceError::not_found("job", job_id))?;
        Ok(from_document(document)?)
    }

    pub async fn insert(&self, job: &Job) -> Result<(), MarketplaceError> {
        let mut batch = self.store.batch();
        batch.create(Collection::Jobs, job.id.as_str(), to_document(job)?);
        self.store.commit(batch).await?;
        Ok(())
    }

    pub async fn update(
        &self,
        job_id: &JobId,
        mut updates: Vec<FieldUpdate>,
    ) -> Result<(), MarketplaceError> {
        updates.push(FieldUpdate::set(
            fields::UPDATED_AT,
            Utc::now().timestamp_millis(),
        ));
        self.store
            .update(Collection::Jobs, job_id.as_str(), updates)
            .await?;
        Ok(())
    }

    /// Apply `updates` only while the job is still in `expected`.
    pub async fn update_if_status(
        &self,
        job_id: &JobId,
        expected: JobStatus,
        mut updates: Vec<FieldUpdate>,
        action: &'static str,
    ) -> Result<(), MarketplaceError> {
        updates.push(FieldUpdate::set(
            fields::UPDATED_AT,
            Utc::now().timestamp_millis(),
        ));
        let mut batch = self.store.batch();
        batch
            .require_field(Collection::Jobs, job_id.as_str(), fields::STATUS, expected.label())
            .update(Collection::Jobs, job_id.as_str(), updates);
        match self.store.commit(batch).await {
            Ok(()) => Ok(()),
            Err(StoreError::PreconditionFailed(reason)) => {
                debug!(job_id = %job_id, reason = %reason, "job status guard refused batch");
                Err(MarketplaceError::invalid_state(
                    "job",
                    job_id,
                    "changed by another request",
                    action,
                ))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn remove(&self, job_id: &JobId) -> Result<(), MarketplaceError> {
        self.store.delete(Collection::Jobs, job_id.as_str()).await?;
        Ok(())
    }

    pub fn open_jobs_query(limit: usize) -> Query {
        Query::new(Collection::Jobs)
            .filter(Filter::equals(fields::STATUS, JobStatus::Open.label()))
            .order_by(fields::CREATED_AT, Direction::Descending)
            .limit(limit)
    }

    pub async fn open_jobs(&self, limit: usize) -> Result<Vec<Job>, MarketplaceError> {
        let documents = self.store.query(&Self::open_jobs_query(limit)).await?;
        Ok(decode_all(documents)?)
    }

    pub async fn for_client(&self, client_id: &UserId) -> Result<Vec<Job>, MarketplaceError> {
        let query = Query::new(Collection::Jobs)
            .filter(Filter::equals(fields::CLIENT_ID, client_id.as_str()))
            .order_by(fields::CREATED_AT, Direction::Descending);
        let documents = self.store.query(&query).await?;
        Ok(decode_all(documents)?)
    }

    /// Recount applications in PENDING or ACCEPTED and write the result back onto the job.
    ///
    /// This is a read-then-write: two concurrent reconciliations can each write a count
    /// computed from a different snapshot. The last writer wins.
    pub async fn reconcile_application_count(
        &self,
        job_id: &JobId,
    ) -> Result<u32, MarketplaceError> {
        let query = Query::new(Collection::Applications)
            .filter(Filter::equals(application_fields::JOB_ID, job_id.as_str()))
            .filter(Filter::any_of(
                application_fields::STATUS,
                ApplicationStatus::ACTIVE.iter().map(|status| status.label()),
            ));
        let active = self.store.query(&query).await?.len() as u32;

        self.update(
            job_id,
            vec![
                FieldUpdate::set(fields::APPLICATION_COUNT, active),
                FieldUpdate::set(fields::HAS_ACTIVE_APPLICATIONS, Value::Bool(active > 0)),
            ],
        )
        .await?;

        debug!(job_id = %job_id, active, "reconciled application count");
        Ok(active)
    }
}
