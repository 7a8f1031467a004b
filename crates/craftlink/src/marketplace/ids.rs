use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! document_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

document_id!(
    /// Identifier of a posted job.
    JobId
);
document_id!(
    /// Identifier of a professional's application against a job.
    ApplicationId
);
document_id!(
    /// Identity of a marketplace user, as issued by the auth provider.
    UserId
);
document_id!(MessageId);
document_id!(NotificationId);

/// Chat rooms are keyed deterministically by the job they were opened for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatRoomId(pub String);

impl ChatRoomId {
    pub fn for_job(job_id: &JobId) -> Self {
        Self(format!("job_{}", job_id.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatRoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatRoomId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
