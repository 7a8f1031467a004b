use std::sync::Arc;

use mime::Mime;
use tracing::info;

use super::domain::{fields, Job, JobDraft, JobStatus};
use super::store::JobStore;
use crate::marketplace::clock::timestamp;
use crate::marketplace::error::MarketplaceError;
use crate::marketplace::identity::{Actor, Role};
use crate::marketplace::ids::{JobId, UserId};
use crate::marketplace::media::{ensure_image, ObjectStorage};
use crate::marketplace::store::{DocumentStore, FieldUpdate};

/// Client facing job operations: posting, browsing, images, and owner-only changes.
pub struct JobBoard<S> {
    jobs: JobStore<S>,
    media: Arc<dyn ObjectStorage>,
    page_size: usize,
}

impl<S> JobBoard<S>
where
    S: DocumentStore + 'static,
{
    pub fn new(store: Arc<S>, media: Arc<dyn ObjectStorage>, page_size: usize) -> Self {
        Self {
            jobs: JobStore::new(store),
            media,
            page_size: page_size.max(1),
        }
    }

    pub fn store(&self) -> &JobStore<S> {
        &self.jobs
    }

    pub async fn post_job(&self, actor: &Actor, draft: JobDraft) -> Result<Job, MarketplaceError> {
        if actor.role != Role::Client {
            return Err(MarketplaceError::unauthorized(&actor.user_id, "post jobs"));
        }
        validate_draft(&draft)?;

        let now = timestamp();
        let job = Job {
            id: JobId::generate(),
            title: draft.title.trim().to_string(),
            description: draft.description.trim().to_string(),
            category: draft.category.trim().to_string(),
            location: draft.location.trim().to_string(),
            budget: draft.budget,
            client_id: actor.user_id.clone(),
            client_name: actor.display_name.clone(),
            status: JobStatus::Open,
            professional_id: None,
            professional_name: None,
            application_count: 0,
            has_active_applications: false,
            applications_revision: 0,
            image_urls: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        self.jobs.insert(&job).await?;
        info!(job_id = %job.id, client_id = %job.client_id, "job posted");
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &JobId) -> Result<Job, MarketplaceError> {
        self.jobs.fetch(job_id).await
    }

    /// Newest open jobs, capped at the configured page size.
    pub async fn open_jobs(&self) -> Result<Vec<Job>, MarketplaceError> {
        self.jobs.open_jobs(self.page_size).await
    }

    pub async fn jobs_for_client(&self, client_id: &UserId) -> Result<Vec<Job>, MarketplaceError> {
        self.jobs.for_client(client_id).await
    }

    /// Delete a job. Applications that reference it are left in place.
    pub async fn delete_job(&self, actor: &Actor, job_id: &JobId) -> Result<(), MarketplaceError> {
        let job = self.jobs.fetch(job_id).await?;
        if !job.is_owned_by(&actor.user_id) {
            return Err(MarketplaceError::unauthorized(&actor.user_id, "delete this job"));
        }

        self.jobs.remove(job_id).await?;
        info!(job_id = %job_id, "job deleted");
        Ok(())
    }

    /// Move an assigned job forward, or cancel an open one.
    ///
    /// The write is guarded on the status read here, so a change that lands first
    /// (an accepted application or another status update) refuses this one.
    pub async fn update_status(
        &self,
        actor: &Actor,
        job_id: &JobId,
        next: JobStatus,
    ) -> Result<Job, MarketplaceError> {
        let mut job = self.jobs.fetch(job_id).await?;
        let permitted = match (job.status, next) {
            (JobStatus::Open, JobStatus::Cancelled) => job.is_owned_by(&actor.user_id),
            (JobStatus::Accepted, JobStatus::InProgress)
            | (JobStatus::InProgress, JobStatus::Completed) => {
                job.is_owned_by(&actor.user_id)
                    || job.professional_id.as_ref() == Some(&actor.user_id)
            }
            (current, _) => {
                return Err(MarketplaceError::invalid_state(
                    "job",
                    job_id,
                    current.label(),
                    "change the status of",
                ))
            }
        };
        if !permitted {
            return Err(MarketplaceError::unauthorized(
                &actor.user_id,
                "change the status of this job",
            ));
        }

        self.jobs
            .update_if_status(
                job_id,
                job.status,
                vec![FieldUpdate::set(fields::STATUS, next.label())],
                "change the status of",
            )
            .await?;
        info!(job_id = %job_id, from = job.status.label(), to = next.label(), "job status changed");
        job.status = next;
        Ok(job)
    }

    /// Upload an image for a job and append its URL to the job record.
    ///
    /// The URL is appended by the store at commit time, so concurrent uploads keep each
    /// other's images. Returns the job as stored after the append.
    pub async fn attach_image(
        &self,
        actor: &Actor,
        job_id: &JobId,
        bytes: Vec<u8>,
        content_type: Mime,
    ) -> Result<Job, MarketplaceError> {
        let job = self.jobs.fetch(job_id).await?;
        if !job.is_owned_by(&actor.user_id) {
            return Err(MarketplaceError::unauthorized(
                &actor.user_id,
                "add images to this job",
            ));
        }
        ensure_image(&bytes, &content_type)?;

        let folder = format!("jobs/{}", job.id);
        let url = self.media.upload(bytes, &folder, content_type).await?;
        self.jobs
            .update(job_id, vec![FieldUpdate::append(fields::IMAGE_URLS, url.as_str())])
            .await?;
        info!(job_id = %job_id, url = %url, "job image attached");
        self.jobs.fetch(job_id).await
    }
}

fn validate_draft(draft: &JobDraft) -> Result<(), MarketplaceError> {
    if draft.title.trim().is_empty() {
        return Err(MarketplaceError::Invalid("job title is required".to_string()));
    }
    if draft.location.trim().is_empty() {
        return Err(MarketplaceError::Invalid("job location is required".to_string()));
    }
    if let Some(budget) = draft.budget {
        if !budget.is_finite() || budget < 0.0 {
            return Err(MarketplaceError::Invalid(format!(
                "budget must be a non-negative amount, got {budget}"
            )));
        }
    }
    Ok(())
}
