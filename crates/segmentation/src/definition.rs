//! Segment definitions — immutable clause sets parsed and normalized from the wire.
//!
//! Every clause is independently optional. Empty strings and empty arrays
//! coming from form state are normalized to `None` here, so an absent clause
//! ("no constraint") is never confused with an unsatisfiable one.

use campaign_core::types::{ContactStatus, ListId};
use campaign_core::{CampaignError, CampaignResult};
use serde::Serialize;
use serde_json::{Map, Value};
use utoipa::ToSchema;

pub const FIELD_STATUS: &str = "status";
pub const FIELD_EMAIL_CONTAINS: &str = "emailContains";
pub const FIELD_GDPR_CONSENT: &str = "gdprConsent";
pub const FIELD_IN_LIST_IDS: &str = "inListIds";
pub const FIELD_NOT_IN_LIST_IDS: &str = "notInListIds";

/// A declarative AND-composition of optional clauses over a contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SegmentDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) status: Option<ContactStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) email_contains: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) gdpr_consent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<u64>>)]
    pub(crate) in_list_ids: Option<Vec<ListId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<u64>>)]
    pub(crate) not_in_list_ids: Option<Vec<ListId>>,
}

impl SegmentDefinition {
    /// The definition with no clauses; matches every contact.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Option<ContactStatus> {
        self.status
    }

    pub fn email_contains(&self) -> Option<&str> {
        self.email_contains.as_deref()
    }

    pub fn gdpr_consent(&self) -> Option<bool> {
        self.gdpr_consent
    }

    /// Sorted, de-duplicated, never empty when present.
    pub fn in_list_ids(&self) -> Option<&[ListId]> {
        self.in_list_ids.as_deref()
    }

    pub fn not_in_list_ids(&self) -> Option<&[ListId]> {
        self.not_in_list_ids.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.clause_count() == 0
    }

    pub fn clause_count(&self) -> usize {
        [
            self.status.is_some(),
            self.email_contains.is_some(),
            self.gdpr_consent.is_some(),
            self.in_list_ids.is_some(),
            self.not_in_list_ids.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    /// Parse a wire definition. Both camelCase and snake_case keys are
    /// accepted. Errors name the offending field.
    pub fn from_json(value: &Value) -> CampaignResult<Self> {
        let object = match value {
            Value::Null => return Ok(Self::empty()),
            Value::Object(object) => object,
            _ => {
                return Err(CampaignError::validation(
                    "definition",
                    "definition must be a JSON object",
                ))
            }
        };

        let mut definition = Self::empty();
        for (key, raw) in object {
            match canonical_field(key) {
                Some(FIELD_STATUS) => definition.status = parse_status(raw)?,
                Some(FIELD_EMAIL_CONTAINS) => definition.email_contains = parse_needle(raw)?,
                Some(FIELD_GDPR_CONSENT) => definition.gdpr_consent = parse_consent(raw)?,
                Some(FIELD_IN_LIST_IDS) => {
                    definition.in_list_ids = parse_list_ids(FIELD_IN_LIST_IDS, raw)?
                }
                Some(FIELD_NOT_IN_LIST_IDS) => {
                    definition.not_in_list_ids = parse_list_ids(FIELD_NOT_IN_LIST_IDS, raw)?
                }
                _ => {
                    return Err(CampaignError::validation(
                        key.as_str(),
                        "unknown segment clause",
                    ))
                }
            }
        }
        Ok(definition)
    }

    /// Wire form of this definition, suitable for `from_json`.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }
}

fn canonical_field(key: &str) -> Option<&'static str> {
    match key {
        "status" => Some(FIELD_STATUS),
        "emailContains" | "email_contains" => Some(FIELD_EMAIL_CONTAINS),
        "gdprConsent" | "gdpr_consent" => Some(FIELD_GDPR_CONSENT),
        "inListIds" | "in_list_ids" => Some(FIELD_IN_LIST_IDS),
        "notInListIds" | "not_in_list_ids" => Some(FIELD_NOT_IN_LIST_IDS),
        _ => None,
    }
}

fn parse_status(raw: &Value) -> CampaignResult<Option<ContactStatus>> {
    match raw {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<ContactStatus>()
            .map(Some)
            .map_err(|msg| CampaignError::validation(FIELD_STATUS, msg)),
        _ => Err(CampaignError::validation(
            FIELD_STATUS,
            "status must be a string",
        )),
    }
}

fn parse_needle(raw: &Value) -> CampaignResult<Option<String>> {
    match raw {
        Value::Null => Ok(None),
        Value::String(s) => {
            let trimmed = s.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        _ => Err(CampaignError::validation(
            FIELD_EMAIL_CONTAINS,
            "emailContains must be a string",
        )),
    }
}

fn parse_consent(raw: &Value) -> CampaignResult<Option<bool>> {
    match raw {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        Value::String(s) if s.is_empty() => Ok(None),
        _ => Err(CampaignError::validation(
            FIELD_GDPR_CONSENT,
            "gdprConsent must be a boolean",
        )),
    }
}

fn parse_list_ids(field: &'static str, raw: &Value) -> CampaignResult<Option<Vec<ListId>>> {
    let items = match raw {
        Value::Null => return Ok(None),
        Value::Array(items) => items,
        _ => {
            return Err(CampaignError::validation(
                field,
                "list ids must be an array of integers",
            ))
        }
    };

    let mut ids = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        let id = match item {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<ListId>().ok(),
            _ => None,
        };
        match id {
            Some(id) => ids.push(id),
            None => {
                return Err(CampaignError::validation(
                    field,
                    format!("list id at position {position} is not a non-negative integer: {item}"),
                ))
            }
        }
    }
    Ok(normalize_list_ids(ids))
}

pub(crate) fn normalize_list_ids(mut ids: Vec<ListId>) -> Option<Vec<ListId>> {
    ids.sort_unstable();
    ids.dedup();
    (!ids.is_empty()).then_some(ids)
}
