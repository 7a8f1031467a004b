use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::marketplace::ids::{ApplicationId, JobId, UserId};

/// Document field names written by partial updates and queries.
pub(crate) mod fields {
    pub const JOB_ID: &str = "jobId";
    pub const APPLICANT_ID: &str = "applicantId";
    pub const STATUS: &str = "status";
    pub const APPLIED_AT: &str = "appliedAt";
    pub const RESPONDED_AT: &str = "respondedAt";
    pub const RESPONSE_MESSAGE: &str = "responseMessage";
    pub const READ_BY_CLIENT: &str = "readByClient";
    pub const VIEWED_AT: &str = "viewedAt";
}

/// Response stored on applications rejected because another professional was accepted.
pub const SELECTED_ANOTHER_MESSAGE: &str = "Client selected another professional";

/// A professional's bid against a job.
///
/// Job title/budget, client name, and the applicant profile are copied in at submission
/// time. They are not kept in sync with the live job or user records and can go stale;
/// readers that need current values must load the job or profile directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: ApplicationId,
    pub job_id: JobId,
    pub job_title: String,
    #[serde(default)]
    pub job_budget: Option<f64>,
    pub client_id: UserId,
    pub client_name: String,
    pub applicant_id: UserId,
    pub applicant_name: String,
    #[serde(default)]
    pub applicant_profile: ApplicantSnapshot,
    #[serde(default)]
    pub proposed_price: Option<f64>,
    #[serde(default)]
    pub estimated_duration: Option<String>,
    #[serde(default)]
    pub cover_letter: Option<String>,
    #[serde(default)]
    pub availability: Option<String>,
    pub status: ApplicationStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub applied_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub responded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub response_message: Option<String>,
    #[serde(default)]
    pub read_by_client: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub viewed_at: Option<DateTime<Utc>>,
}

/// Applicant profile captured when the application was submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicantSnapshot {
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub review_count: u32,
    #[serde(default)]
    pub experience_years: Option<u32>,
    #[serde(default)]
    pub craft: Option<String>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

/// Professional supplied fields for a new application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationProposal {
    #[serde(default)]
    pub proposed_price: Option<f64>,
    #[serde(default)]
    pub estimated_duration: Option<String>,
    #[serde(default)]
    pub cover_letter: Option<String>,
    #[serde(default)]
    pub availability: Option<String>,
    #[serde(default)]
    pub profile: ApplicantSnapshot,
}

/// Application state machine: PENDING moves to exactly one of the three terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Rejected,
    Withdrawn,
}

impl ApplicationStatus {
    /// States that count towards a job's active applications and block re-applying.
    pub const ACTIVE: [ApplicationStatus; 2] =
        [ApplicationStatus::Pending, ApplicationStatus::Accepted];

    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Withdrawn => "withdrawn",
        }
    }

    pub fn can_transition_to(self, next: ApplicationStatus) -> bool {
        matches!(
            (self, next),
            (
                ApplicationStatus::Pending,
                ApplicationStatus::Accepted
                    | ApplicationStatus::Rejected
                    | ApplicationStatus::Withdrawn
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_transitions_out() {
        use ApplicationStatus::*;
        for next in [Accepted, Rejected, Withdrawn] {
            assert!(Pending.can_transition_to(next));
        }
        for terminal in [Accepted, Rejected, Withdrawn] {
            for next in [Pending, Accepted, Rejected, Withdrawn] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn status_labels_match_serialized_form() {
        for status in [
            ApplicationStatus::Pending,
            ApplicationStatus::Accepted,
            ApplicationStatus::Rejected,
            ApplicationStatus::Withdrawn,
        ] {
            let value = serde_json::to_value(status).expect("serialize status");
            assert_eq!(value, serde_json::json!(status.label()));
        }
    }
}
