//! Definition builder — fluent API for constructing segment definitions.
//!
//! Each call replaces the clause it names; `build` produces the immutable
//! [`SegmentDefinition`] in one step.

use crate::definition::{normalize_list_ids, SegmentDefinition};
use campaign_core::types::{ContactStatus, ListId};

#[derive(Debug, Default)]
pub struct DefinitionBuilder {
    definition: SegmentDefinition,
}

impl DefinitionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing definition, e.g. when editing a segment.
    pub fn from_definition(definition: &SegmentDefinition) -> Self {
        Self {
            definition: definition.clone(),
        }
    }

    pub fn status(mut self, status: ContactStatus) -> Self {
        self.definition.status = Some(status);
        self
    }

    pub fn email_contains(mut self, needle: impl Into<String>) -> Self {
        let needle = needle.into();
        let trimmed = needle.trim();
        self.definition.email_contains = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn gdpr_consent(mut self, consent: bool) -> Self {
        self.definition.gdpr_consent = Some(consent);
        self
    }

    pub fn in_any_list(mut self, ids: impl IntoIterator<Item = ListId>) -> Self {
        self.definition.in_list_ids = normalize_list_ids(ids.into_iter().collect());
        self
    }

    pub fn in_no_list(mut self, ids: impl IntoIterator<Item = ListId>) -> Self {
        self.definition.not_in_list_ids = normalize_list_ids(ids.into_iter().collect());
        self
    }

    pub fn clear_status(mut self) -> Self {
        self.definition.status = None;
        self
    }

    pub fn clear_list_clauses(mut self) -> Self {
        self.definition.in_list_ids = None;
        self.definition.not_in_list_ids = None;
        self
    }

    pub fn build(self) -> SegmentDefinition {
        self.definition
    }
}
