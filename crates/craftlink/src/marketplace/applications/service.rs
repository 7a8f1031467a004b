use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::domain::{
    fields, Application, ApplicationProposal, ApplicationStatus, SELECTED_ANOTHER_MESSAGE,
};
use super::store::ApplicationStore;
use crate::marketplace::chat::{ChatRoom, Message};
use crate::marketplace::clock::timestamp;
use crate::marketplace::error::MarketplaceError;
use crate::marketplace::identity::{Actor, Role};
use crate::marketplace::ids::{ApplicationId, ChatRoomId, JobId, UserId};
use crate::marketplace::jobs::domain::fields as job_fields;
use crate::marketplace::jobs::{Job, JobStatus, JobStore};
use crate::marketplace::notifications::{
    Notification, NotificationPriority, NotificationSink, NotificationType,
};
use crate::marketplace::store::{to_document, Collection, DocumentStore, FieldUpdate, StoreError};

/// Result of accepting an application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptanceOutcome {
    pub application: Application,
    pub job: Job,
    pub chat_room_id: ChatRoomId,
    /// Competing applications that were rejected in the same batch.
    pub rejected: Vec<ApplicationId>,
}

/// Drives applications through PENDING and into their terminal states.
///
/// Every status change is committed as one batch guarded by a precondition on the current
/// status, so two requests racing on the same application cannot both succeed. Derived job
/// counters are reconciled after the commit and notifications are queued last; neither can
/// fail an operation whose batch committed.
pub struct ApplicationLifecycle<S, N> {
    store: Arc<S>,
    applications: ApplicationStore<S>,
    jobs: JobStore<S>,
    notifications: Arc<N>,
}

impl<S, N> ApplicationLifecycle<S, N>
where
    S: DocumentStore + 'static,
    N: NotificationSink + 'static,
{
    pub fn new(store: Arc<S>, notifications: Arc<N>) -> Self {
        Self {
            applications: ApplicationStore::new(store.clone()),
            jobs: JobStore::new(store.clone()),
            store,
            notifications,
        }
    }

    pub fn applications(&self) -> &ApplicationStore<S> {
        &self.applications
    }

    /// Submit a new PENDING application for an open job.
    pub async fn submit(
        &self,
        actor: &Actor,
        job_id: &JobId,
        proposal: ApplicationProposal,
    ) -> Result<Application, MarketplaceError> {
        if actor.role != Role::Professional {
            return Err(MarketplaceError::unauthorized(
                &actor.user_id,
                "apply to jobs",
            ));
        }
        validate_proposal(&proposal)?;

        let job = self.jobs.fetch(job_id).await?;
        if job.is_owned_by(&actor.user_id) {
            return Err(MarketplaceError::unauthorized(
                &actor.user_id,
                "apply to their own job",
            ));
        }
        if job.status != JobStatus::Open {
            return Err(MarketplaceError::invalid_state(
                "job",
                job_id,
                job.status.label(),
                "apply to",
            ));
        }
        if !self
            .applications
            .active_for_applicant(job_id, &actor.user_id)
            .await?
            .is_empty()
        {
            return Err(duplicate(job_id, &actor.user_id));
        }

        let application = Application {
            id: ApplicationId::generate(),
            job_id: job.id.clone(),
            job_title: job.title.clone(),
            job_budget: job.budget,
            client_id: job.client_id.clone(),
            client_name: job.client_name.clone(),
            applicant_id: actor.user_id.clone(),
            applicant_name: actor.display_name.clone(),
            applicant_profile: proposal.profile,
            proposed_price: proposal.proposed_price,
            estimated_duration: trimmed(proposal.estimated_duration),
            cover_letter: trimmed(proposal.cover_letter),
            availability: trimmed(proposal.availability),
            status: ApplicationStatus::Pending,
            applied_at: timestamp(),
            responded_at: None,
            response_message: None,
            read_by_client: false,
            viewed_at: None,
        };

        // The no-match precondition closes the gap between the check above and this commit.
        let mut batch = self.store.batch();
        batch
            .require_field(
                Collection::Jobs,
                job_id.as_str(),
                job_fields::STATUS,
                JobStatus::Open.label(),
            )
            .require_no_match(ApplicationStore::<S>::active_for_applicant_query(
                job_id,
                &actor.user_id,
            ))
            .update(
                Collection::Jobs,
                job_id.as_str(),
                vec![FieldUpdate::increment(job_fields::APPLICATIONS_REVISION, 1)],
            )
            .create(
                Collection::Applications,
                application.id.as_str(),
                to_document(&application)?,
            );
        match self.store.commit(batch).await {
            Ok(()) => {}
            Err(StoreError::PreconditionFailed(reason)) => {
                return Err(self.submit_conflict(job_id, &actor.user_id, reason).await)
            }
            Err(err) => return Err(err.into()),
        }

        info!(
            application_id = %application.id,
            job_id = %job_id,
            applicant_id = %actor.user_id,
            "application submitted"
        );
        self.reconcile(job_id).await;

        self.notifications.enqueue(
            Notification::new(
                job.client_id.clone(),
                NotificationType::NewApplication,
                "New application",
                format!("{} applied for \"{}\"", actor.display_name, job.title),
            )
            .with_data("jobId", job_id)
            .with_data("applicationId", &application.id)
            .with_route(format!("/jobs/{}/applications", job_id))
            .with_image(application.applicant_profile.profile_image_url.clone()),
        );

        Ok(application)
    }

    /// Accept one PENDING application.
    ///
    /// One batch accepts the application, assigns the job, rejects every other pending
    /// application for the job, and opens the job's chat room with a system message.
    /// The batch is pinned to the job's applications revision as read before listing the
    /// competitors, so a submission landing in between refuses the whole accept.
    pub async fn accept(
        &self,
        actor: &Actor,
        application_id: &ApplicationId,
    ) -> Result<AcceptanceOutcome, MarketplaceError> {
        let mut application = self.applications.fetch(application_id).await?;
        let mut job = self.jobs.fetch(&application.job_id).await?;
        if !job.is_owned_by(&actor.user_id) {
            return Err(MarketplaceError::unauthorized(
                &actor.user_id,
                "accept applications for this job",
            ));
        }
        ensure_can_move(&application, ApplicationStatus::Accepted, "accept")?;
        if job.status != JobStatus::Open {
            return Err(MarketplaceError::invalid_state(
                "job",
                &job.id,
                job.status.label(),
                "accept an application for",
            ));
        }

        let competing: Vec<Application> = self
            .applications
            .for_job_with_status(&job.id, ApplicationStatus::Pending)
            .await?
            .into_iter()
            .filter(|other| other.id != application.id)
            .collect();

        let now = timestamp();
        let now_ms = now.timestamp_millis();
        let greeting = format!(
            "{} accepted {}'s application for \"{}\". You can now discuss the job here.",
            job.client_name, application.applicant_name, job.title
        );
        let room = ChatRoom::opened_for(&job, &application, &greeting, now);
        let message = Message::system(room.id.clone(), greeting, now);

        let pending = ApplicationStatus::Pending.label();
        let mut batch = self.store.batch();
        batch
            .require_field(
                Collection::Applications,
                application.id.as_str(),
                fields::STATUS,
                pending,
            )
            .require_field(
                Collection::Jobs,
                job.id.as_str(),
                job_fields::STATUS,
                JobStatus::Open.label(),
            )
            .require_field(
                Collection::Jobs,
                job.id.as_str(),
                job_fields::APPLICATIONS_REVISION,
                job.applications_revision,
            )
            .update(
                Collection::Applications,
                application.id.as_str(),
                vec![
                    FieldUpdate::set(fields::STATUS, ApplicationStatus::Accepted.label()),
                    FieldUpdate::set(fields::RESPONDED_AT, now_ms),
                ],
            )
            .update(
                Collection::Jobs,
                job.id.as_str(),
                vec![
                    FieldUpdate::set(job_fields::STATUS, JobStatus::Accepted.label()),
                    FieldUpdate::set(job_fields::PROFESSIONAL_ID, application.applicant_id.as_str()),
                    FieldUpdate::set(
                        job_fields::PROFESSIONAL_NAME,
                        application.applicant_name.as_str(),
                    ),
                    FieldUpdate::set(job_fields::APPLICATION_COUNT, 1),
                    FieldUpdate::set(job_fields::HAS_ACTIVE_APPLICATIONS, true),
                    FieldUpdate::set(job_fields::UPDATED_AT, now_ms),
                ],
            );
        for other in &competing {
            batch
                .require_field(
                    Collection::Applications,
                    other.id.as_str(),
                    fields::STATUS,
                    pending,
                )
                .update(
                    Collection::Applications,
                    other.id.as_str(),
                    vec![
                        FieldUpdate::set(fields::STATUS, ApplicationStatus::Rejected.label()),
                        FieldUpdate::set(fields::RESPONDED_AT, now_ms),
                        FieldUpdate::set(fields::RESPONSE_MESSAGE, SELECTED_ANOTHER_MESSAGE),
                    ],
                );
        }
        batch
            .create(Collection::ChatRooms, room.id.as_str(), to_document(&room)?)
            .create(
                Collection::Messages,
                message.id.as_str(),
                to_document(&message)?,
            );

        self.store
            .commit(batch)
            .await
            .map_err(|err| changed_underneath(err, "application", application_id, "accept"))?;

        application.status = ApplicationStatus::Accepted;
        application.responded_at = Some(now);
        job.status = JobStatus::Accepted;
        job.professional_id = Some(application.applicant_id.clone());
        job.professional_name = Some(application.applicant_name.clone());
        job.application_count = 1;
        job.has_active_applications = true;
        job.updated_at = now;

        info!(
            application_id = %application.id,
            job_id = %job.id,
            rejected = competing.len(),
            "application accepted"
        );

        self.notifications.enqueue(
            Notification::new(
                application.applicant_id.clone(),
                NotificationType::ApplicationAccepted,
                "Application accepted",
                format!("{} accepted your application for \"{}\"", job.client_name, job.title),
            )
            .with_priority(NotificationPriority::High)
            .with_data("jobId", &job.id)
            .with_data("applicationId", &application.id)
            .with_data("chatRoomId", &room.id)
            .with_route(format!("/chats/{}", room.id)),
        );
        for other in &competing {
            self.notifications.enqueue(
                Notification::new(
                    other.applicant_id.clone(),
                    NotificationType::ApplicationRejected,
                    "Application update",
                    format!("\"{}\": {}", job.title, SELECTED_ANOTHER_MESSAGE),
                )
                .with_data("jobId", &job.id)
                .with_data("applicationId", &other.id),
            );
        }

        Ok(AcceptanceOutcome {
            application,
            job,
            chat_room_id: room.id,
            rejected: competing.into_iter().map(|other| other.id).collect(),
        })
    }

    /// Reject one PENDING application, optionally with a message for the applicant.
    pub async fn reject(
        &self,
        actor: &Actor,
        application_id: &ApplicationId,
        message: Option<String>,
    ) -> Result<Application, MarketplaceError> {
        let mut application = self.applications.fetch(application_id).await?;
        if !actor.is(&application.client_id) {
            return Err(MarketplaceError::unauthorized(
                &actor.user_id,
                "reject applications for this job",
            ));
        }
        ensure_can_move(&application, ApplicationStatus::Rejected, "reject")?;

        let now = timestamp();
        let message = trimmed(message);
        let mut updates = vec![
            FieldUpdate::set(fields::STATUS, ApplicationStatus::Rejected.label()),
            FieldUpdate::set(fields::RESPONDED_AT, now.timestamp_millis()),
        ];
        if let Some(text) = &message {
            updates.push(FieldUpdate::set(fields::RESPONSE_MESSAGE, text.as_str()));
        }
        self.transition(&application, updates, "reject").await?;

        application.status = ApplicationStatus::Rejected;
        application.responded_at = Some(now);
        application.response_message = message;
        info!(application_id = %application.id, job_id = %application.job_id, "application rejected");
        self.reconcile(&application.job_id).await;

        let body = match &application.response_message {
            Some(text) => format!("\"{}\": {}", application.job_title, text),
            None => format!(
                "Your application for \"{}\" was not selected",
                application.job_title
            ),
        };
        self.notifications.enqueue(
            Notification::new(
                application.applicant_id.clone(),
                NotificationType::ApplicationRejected,
                "Application update",
                body,
            )
            .with_data("jobId", &application.job_id)
            .with_data("applicationId", &application.id),
        );

        Ok(application)
    }

    /// Withdraw the caller's own PENDING application.
    pub async fn withdraw(
        &self,
        actor: &Actor,
        application_id: &ApplicationId,
    ) -> Result<Application, MarketplaceError> {
        let mut application = self.applications.fetch(application_id).await?;
        if !actor.is(&application.applicant_id) {
            return Err(MarketplaceError::unauthorized(
                &actor.user_id,
                "withdraw this application",
            ));
        }
        ensure_can_move(&application, ApplicationStatus::Withdrawn, "withdraw")?;

        let now = timestamp();
        let updates = vec![
            FieldUpdate::set(fields::STATUS, ApplicationStatus::Withdrawn.label()),
            FieldUpdate::set(fields::RESPONDED_AT, now.timestamp_millis()),
        ];
        self.transition(&application, updates, "withdraw").await?;

        application.status = ApplicationStatus::Withdrawn;
        application.responded_at = Some(now);
        info!(application_id = %application.id, job_id = %application.job_id, "application withdrawn");
        self.reconcile(&application.job_id).await;

        self.notifications.enqueue(
            Notification::new(
                application.client_id.clone(),
                NotificationType::ApplicationWithdrawn,
                "Application withdrawn",
                format!(
                    "{} withdrew their application for \"{}\"",
                    application.applicant_name, application.job_title
                ),
            )
            .with_priority(NotificationPriority::Low)
            .with_data("jobId", &application.job_id)
            .with_data("applicationId", &application.id),
        );

        Ok(application)
    }

    /// Record that the job owner has looked at an application. Idempotent.
    pub async fn mark_viewed(
        &self,
        actor: &Actor,
        application_id: &ApplicationId,
    ) -> Result<Application, MarketplaceError> {
        let mut application = self.applications.fetch(application_id).await?;
        if !actor.is(&application.client_id) {
            return Err(MarketplaceError::unauthorized(
                &actor.user_id,
                "view applications for this job",
            ));
        }
        if application.read_by_client {
            return Ok(application);
        }

        let now = timestamp();
        self.store
            .update(
                Collection::Applications,
                application.id.as_str(),
                vec![
                    FieldUpdate::set(fields::READ_BY_CLIENT, true),
                    FieldUpdate::set(fields::VIEWED_AT, now.timestamp_millis()),
                ],
            )
            .await?;

        application.read_by_client = true;
        application.viewed_at = Some(now);
        Ok(application)
    }

    /// Mark every unviewed application for a job as viewed in one batch.
    pub async fn mark_all_viewed(
        &self,
        actor: &Actor,
        job_id: &JobId,
    ) -> Result<usize, MarketplaceError> {
        let job = self.jobs.fetch(job_id).await?;
        if !job.is_owned_by(&actor.user_id) {
            return Err(MarketplaceError::unauthorized(
                &actor.user_id,
                "view applications for this job",
            ));
        }

        let unviewed = self.applications.unviewed_for_job(job_id).await?;
        if unviewed.is_empty() {
            return Ok(0);
        }

        let viewed_at = timestamp().timestamp_millis();
        let mut batch = self.store.batch();
        batch.require_exists(Collection::Jobs, job_id.as_str());
        for application in &unviewed {
            batch.update(
                Collection::Applications,
                application.id.as_str(),
                vec![
                    FieldUpdate::set(fields::READ_BY_CLIENT, true),
                    FieldUpdate::set(fields::VIEWED_AT, viewed_at),
                ],
            );
        }
        self.store.commit(batch).await.map_err(|err| match err {
            StoreError::PreconditionFailed(_) => MarketplaceError::not_found("job", job_id),
            other => other.into(),
        })?;

        debug!(job_id = %job_id, count = unviewed.len(), "applications marked viewed");
        Ok(unviewed.len())
    }

    /// Load an application visible to the job owner or the applicant.
    pub async fn get_application(
        &self,
        actor: &Actor,
        application_id: &ApplicationId,
    ) -> Result<Application, MarketplaceError> {
        let application = self.applications.fetch(application_id).await?;
        if !actor.is(&application.client_id) && !actor.is(&application.applicant_id) {
            return Err(MarketplaceError::unauthorized(
                &actor.user_id,
                "read this application",
            ));
        }
        Ok(application)
    }

    /// Every application for a job, newest first. Owner only.
    pub async fn applications_for_job(
        &self,
        actor: &Actor,
        job_id: &JobId,
    ) -> Result<Vec<Application>, MarketplaceError> {
        self.ensure_job_owner(actor, job_id).await?;
        self.applications.for_job(job_id).await
    }

    pub async fn applications_for_applicant(
        &self,
        actor: &Actor,
    ) -> Result<Vec<Application>, MarketplaceError> {
        self.applications.for_applicant(&actor.user_id).await
    }

    pub async fn unviewed_count(
        &self,
        actor: &Actor,
        job_id: &JobId,
    ) -> Result<usize, MarketplaceError> {
        self.ensure_job_owner(actor, job_id).await?;
        Ok(self.applications.unviewed_for_job(job_id).await?.len())
    }

    async fn ensure_job_owner(&self, actor: &Actor, job_id: &JobId) -> Result<(), MarketplaceError> {
        let job = self.jobs.fetch(job_id).await?;
        if !job.is_owned_by(&actor.user_id) {
            return Err(MarketplaceError::unauthorized(
                &actor.user_id,
                "read applications for this job",
            ));
        }
        Ok(())
    }

    /// Commit a single-application status change guarded on it still being PENDING.
    async fn transition(
        &self,
        application: &Application,
        updates: Vec<FieldUpdate>,
        action: &'static str,
    ) -> Result<(), MarketplaceError> {
        let mut batch = self.store.batch();
        batch
            .require_field(
                Collection::Applications,
                application.id.as_str(),
                fields::STATUS,
                ApplicationStatus::Pending.label(),
            )
            .update(Collection::Applications, application.id.as_str(), updates);
        self.store
            .commit(batch)
            .await
            .map_err(|err| changed_underneath(err, "application", &application.id, action))
    }

    async fn reconcile(&self, job_id: &JobId) {
        if let Err(err) = self.jobs.reconcile_application_count(job_id).await {
            warn!(job_id = %job_id, error = %err, "application count reconciliation failed");
        }
    }

    /// Work out which guard tripped when a submission batch was refused.
    async fn submit_conflict(
        &self,
        job_id: &JobId,
        applicant_id: &UserId,
        reason: String,
    ) -> MarketplaceError {
        match self.applications.active_for_applicant(job_id, applicant_id).await {
            Ok(existing) if !existing.is_empty() => return duplicate(job_id, applicant_id),
            Ok(_) => {}
            Err(err) => return err,
        }
        match self.jobs.fetch(job_id).await {
            Ok(job) if job.status != JobStatus::Open => {
                MarketplaceError::invalid_state("job", job_id, job.status.label(), "apply to")
            }
            Ok(_) => MarketplaceError::Backend(StoreError::PreconditionFailed(reason)),
            Err(err) => err,
        }
    }
}

fn duplicate(job_id: &JobId, applicant_id: &UserId) -> MarketplaceError {
    MarketplaceError::DuplicateApplication {
        job_id: job_id.clone(),
        applicant_id: applicant_id.clone(),
    }
}

fn ensure_can_move(
    application: &Application,
    next: ApplicationStatus,
    action: &'static str,
) -> Result<(), MarketplaceError> {
    if application.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(MarketplaceError::invalid_state(
            "application",
            &application.id,
            application.status.label(),
            action,
        ))
    }
}

/// A refused precondition means another request changed the record first.
fn changed_underneath(
    err: StoreError,
    entity: &'static str,
    id: &ApplicationId,
    action: &'static str,
) -> MarketplaceError {
    match err {
        StoreError::PreconditionFailed(reason) => {
            debug!(id = %id, reason = %reason, "status guard refused batch");
            MarketplaceError::invalid_state(entity, id, "changed by another request", action)
        }
        other => other.into(),
    }
}

fn validate_proposal(proposal: &ApplicationProposal) -> Result<(), MarketplaceError> {
    if let Some(price) = proposal.proposed_price {
        if !price.is_finite() || price < 0.0 {
            return Err(MarketplaceError::Invalid(format!(
                "proposed price must be a non-negative amount, got {price}"
            )));
        }
    }
    Ok(())
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
