use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

pub type ContactId = u64;
pub type ListId = u64;
pub type SegmentId = u64;

/// Contact subscription status as tracked by the contact store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Active,
    Unsubscribed,
    Bounced,
    Complained,
    Inactive,
}

impl ContactStatus {
    pub const ALL: [ContactStatus; 5] = [
        ContactStatus::Active,
        ContactStatus::Unsubscribed,
        ContactStatus::Bounced,
        ContactStatus::Complained,
        ContactStatus::Inactive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::Active => "active",
            ContactStatus::Unsubscribed => "unsubscribed",
            ContactStatus::Bounced => "bounced",
            ContactStatus::Complained => "complained",
            ContactStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContactStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status '{s}'"))
    }
}

/// A contact record owned by the external contact store. Read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub name: Option<String>,
    pub status: ContactStatus,
    /// Set when the contact granted GDPR consent.
    pub gdpr_consent_at: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn gdpr_consent(&self) -> bool {
        self.gdpr_consent_at.is_some()
    }

    pub fn summary(&self) -> ContactSummary {
        ContactSummary {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            status: self.status,
        }
    }
}

/// A mailing list owned by the list membership collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactList {
    pub id: ListId,
    pub name: String,
}

/// Many-to-many edge between a contact and a list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListMembership {
    pub contact_id: ContactId,
    pub list_id: ListId,
    pub subscribed_at: DateTime<Utc>,
}

/// Contact projection returned in segment samples.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContactSummary {
    #[schema(value_type = u64)]
    pub id: ContactId,
    pub email: Option<String>,
    pub name: Option<String>,
    pub status: ContactStatus,
}
