use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::marketplace::ids::{JobId, UserId};

/// Document field names written by partial updates.
pub(crate) mod fields {
    pub const ID: &str = "id";
    pub const STATUS: &str = "status";
    pub const CLIENT_ID: &str = "clientId";
    pub const PROFESSIONAL_ID: &str = "professionalId";
    pub const PROFESSIONAL_NAME: &str = "professionalName";
    pub const APPLICATION_COUNT: &str = "applicationCount";
    pub const HAS_ACTIVE_APPLICATIONS: &str = "hasActiveApplications";
    pub const APPLICATIONS_REVISION: &str = "applicationsRevision";
    pub const IMAGE_URLS: &str = "imageUrls";
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
}

/// A work request posted by a client.
///
/// `application_count` and `has_active_applications` are derived state, reconciled after
/// each application change. They may lag behind the applications themselves under
/// concurrent writers and are never used to enforce uniqueness.
///
/// `applications_revision` is bumped in the same batch as every new application, so a
/// writer that pins it knows no application arrived since its read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    #[serde(default)]
    pub budget: Option<f64>,
    pub client_id: UserId,
    pub client_name: String,
    pub status: JobStatus,
    #[serde(default)]
    pub professional_id: Option<UserId>,
    #[serde(default)]
    pub professional_name: Option<String>,
    #[serde(default)]
    pub application_count: u32,
    #[serde(default)]
    pub has_active_applications: bool,
    #[serde(default)]
    pub applications_revision: u64,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.client_id == user_id
    }
}

/// Client supplied fields for a new job posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDraft {
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    #[serde(default)]
    pub budget: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Open,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl JobStatus {
    pub const fn label(self) -> &'static str {
        match self {
            JobStatus::Open => "open",
            JobStatus::Accepted => "accepted",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}
