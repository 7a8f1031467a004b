use std::sync::Arc;

use super::domain::{fields, Application, ApplicationStatus};
use crate::marketplace::error::MarketplaceError;
use crate::marketplace::ids::{ApplicationId, JobId, UserId};
use crate::marketplace::store::{
    decode_all, from_document, Collection, Direction, DocumentStore, Filter, Query,
};

/// Typed adapter over the `applications` collection.
pub struct ApplicationStore<S> {
    store: Arc<S>,
}

impl<S> Clone for ApplicationStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> ApplicationStore<S>
where
    S: DocumentStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn fetch(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Application, MarketplaceError> {
        let document = self
            .store
            .get(Collection::Applications, application_id.as_str())
            .await?
            .ok_or_else(|| MarketplaceError::not_found("application", application_id))?;
        Ok(from_document(document)?)
    }

    /// Applications by `applicant_id` for `job_id` that still block a new submission.
    pub fn active_for_applicant_query(job_id: &JobId, applicant_id: &UserId) -> Query {
        Query::new(Collection::Applications)
            .filter(Filter::equals(fields::JOB_ID, job_id.as_str()))
            .filter(Filter::equals(fields::APPLICANT_ID, applicant_id.as_str()))
            .filter(Filter::any_of(
                fields::STATUS,
                ApplicationStatus::ACTIVE.iter().map(|status| status.label()),
            ))
    }

    pub fn for_job_query(job_id: &JobId) -> Query {
        Query::new(Collection::Applications)
            .filter(Filter::equals(fields::JOB_ID, job_id.as_str()))
            .order_by(fields::APPLIED_AT, Direction::Descending)
    }

    pub async fn active_for_applicant(
        &self,
        job_id: &JobId,
        applicant_id: &UserId,
    ) -> Result<Vec<Application>, MarketplaceError> {
        let query = Self::active_for_applicant_query(job_id, applicant_id);
        Ok(decode_all(self.store.query(&query).await?)?)
    }

    pub async fn for_job(&self, job_id: &JobId) -> Result<Vec<Application>, MarketplaceError> {
        let query = Self::for_job_query(job_id);
        Ok(decode_all(self.store.query(&query).await?)?)
    }

    pub async fn for_job_with_status(
        &self,
        job_id: &JobId,
        status: ApplicationStatus,
    ) -> Result<Vec<Application>, MarketplaceError> {
        let query = Self::for_job_query(job_id).filter(Filter::equals(fields::STATUS, status.label()));
        Ok(decode_all(self.store.query(&query).await?)?)
    }

    pub async fn unviewed_for_job(
        &self,
        job_id: &JobId,
    ) -> Result<Vec<Application>, MarketplaceError> {
        let query = Self::for_job_query(job_id).filter(Filter::equals(fields::READ_BY_CLIENT, false));
        Ok(decode_all(self.store.query(&query).await?)?)
    }

    pub async fn for_applicant(
        &self,
        applicant_id: &UserId,
    ) -> Result<Vec<Application>, MarketplaceError> {
        let query = Query::new(Collection::Applications)
            .filter(Filter::equals(fields::APPLICANT_ID, applicant_id.as_str()))
            .order_by(fields::APPLIED_AT, Direction::Descending);
        Ok(decode_all(self.store.query(&query).await?)?)
    }
}
