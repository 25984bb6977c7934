//! Predicate compiler — turns a segment definition into an executable filter.

use crate::definition::{
    SegmentDefinition, FIELD_EMAIL_CONTAINS, FIELD_IN_LIST_IDS, FIELD_NOT_IN_LIST_IDS,
};
use campaign_core::types::{Contact, ContactStatus, ListId};
use campaign_core::{CampaignError, CampaignResult};
use serde::Serialize;
use std::fmt;
use utoipa::ToSchema;

/// Longest permitted `emailContains` needle (the maximum length of an address).
pub const MAX_EMAIL_NEEDLE_LEN: usize = 254;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    Status(ContactStatus),
    /// Needle is stored ASCII-lowercased.
    EmailContains(String),
    GdprConsent(bool),
    /// Member of at least one of these lists.
    InAnyList(Vec<ListId>),
    /// Member of none of these lists.
    InNoList(Vec<ListId>),
}

impl Clause {
    /// `member_lists` must be sorted ascending.
    fn evaluate(&self, contact: &Contact, member_lists: &[ListId]) -> bool {
        match self {
            Clause::Status(status) => contact.status == *status,
            Clause::EmailContains(needle) => contact
                .email
                .as_deref()
                .is_some_and(|email| email.to_ascii_lowercase().contains(needle.as_str())),
            Clause::GdprConsent(consent) => contact.gdpr_consent() == *consent,
            Clause::InAnyList(ids) => ids.iter().any(|id| member_lists.binary_search(id).is_ok()),
            Clause::InNoList(ids) => !ids.iter().any(|id| member_lists.binary_search(id).is_ok()),
        }
    }

    fn references_lists(&self) -> bool {
        matches!(self, Clause::InAnyList(_) | Clause::InNoList(_))
    }
}

/// Non-fatal findings about a definition that still compiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefinitionWarning {
    /// Ids present in both the inclusion and the exclusion clause.
    OverlappingListIds {
        #[schema(value_type = Vec<u64>)]
        list_ids: Vec<ListId>,
    },
    /// Referenced lists that no longer exist; they never match anyone.
    UnknownListIds {
        #[schema(value_type = Vec<u64>)]
        list_ids: Vec<ListId>,
    },
}

impl fmt::Display for DefinitionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionWarning::OverlappingListIds { list_ids } => write!(
                f,
                "list ids {list_ids:?} appear in both inListIds and notInListIds; exclusion wins for those ids"
            ),
            DefinitionWarning::UnknownListIds { list_ids } => {
                write!(f, "list ids {list_ids:?} no longer exist and match no contact")
            }
        }
    }
}

/// Compiled, side-effect-free form of a [`SegmentDefinition`].
#[derive(Debug, Clone)]
pub struct Predicate {
    clauses: Vec<Clause>,
    warnings: Vec<DefinitionWarning>,
}

impl Predicate {
    /// Evaluate against a contact and its sorted member list ids.
    pub fn matches(&self, contact: &Contact, member_lists: &[ListId]) -> bool {
        self.clauses
            .iter()
            .all(|clause| clause.evaluate(contact, member_lists))
    }

    /// Whether evaluation needs membership edges at all.
    pub fn references_lists(&self) -> bool {
        self.clauses.iter().any(Clause::references_lists)
    }

    /// Every list id named by a list clause, sorted and de-duplicated.
    pub fn referenced_list_ids(&self) -> Vec<ListId> {
        let mut ids: Vec<ListId> = self
            .clauses
            .iter()
            .flat_map(|clause| match clause {
                Clause::InAnyList(ids) | Clause::InNoList(ids) => ids.as_slice(),
                _ => &[][..],
            })
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn is_identity(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn warnings(&self) -> &[DefinitionWarning] {
        &self.warnings
    }
}

/// Validate and compile a definition. Runs before any data is scanned.
pub fn compile(definition: &SegmentDefinition) -> CampaignResult<Predicate> {
    let mut clauses = Vec::with_capacity(definition.clause_count());
    let mut warnings = Vec::new();

    if let Some(status) = definition.status() {
        clauses.push(Clause::Status(status));
    }

    if let Some(needle) = definition.email_contains() {
        if needle.chars().count() > MAX_EMAIL_NEEDLE_LEN {
            return Err(CampaignError::validation(
                FIELD_EMAIL_CONTAINS,
                format!("must be at most {MAX_EMAIL_NEEDLE_LEN} characters"),
            ));
        }
        if !needle.is_empty() {
            clauses.push(Clause::EmailContains(needle.to_ascii_lowercase()));
        }
    }

    if let Some(consent) = definition.gdpr_consent() {
        clauses.push(Clause::GdprConsent(consent));
    }

    let include = list_clause(FIELD_IN_LIST_IDS, definition.in_list_ids())?;
    let exclude = list_clause(FIELD_NOT_IN_LIST_IDS, definition.not_in_list_ids())?;

    if let (Some(include), Some(exclude)) = (&include, &exclude) {
        let overlap: Vec<ListId> = include
            .iter()
            .filter(|id| exclude.binary_search(id).is_ok())
            .copied()
            .collect();
        if !overlap.is_empty() {
            warnings.push(DefinitionWarning::OverlappingListIds { list_ids: overlap });
        }
    }

    if let Some(ids) = include {
        clauses.push(Clause::InAnyList(ids));
    }
    if let Some(ids) = exclude {
        clauses.push(Clause::InNoList(ids));
    }

    Ok(Predicate { clauses, warnings })
}

fn list_clause(field: &'static str, ids: Option<&[ListId]>) -> CampaignResult<Option<Vec<ListId>>> {
    let Some(ids) = ids else {
        return Ok(None);
    };
    if ids.contains(&0) {
        return Err(CampaignError::validation(field, "list id 0 is not a valid list"));
    }
    let mut ids = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    Ok((!ids.is_empty()).then_some(ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::DefinitionBuilder;
    use chrono::Utc;

    fn contact(id: u64, email: Option<&str>, status: ContactStatus, consent: bool) -> Contact {
        Contact {
            id,
            email: email.map(str::to_string),
            name: None,
            status,
            gdpr_consent_at: consent.then(Utc::now),
        }
    }

    #[test]
    fn test_empty_definition_is_identity() {
        let predicate = compile(&SegmentDefinition::empty()).unwrap();
        assert!(predicate.is_identity());
        assert!(!predicate.references_lists());
        assert!(predicate.matches(&contact(1, None, ContactStatus::Bounced, false), &[]));
    }

    #[test]
    fn test_status_clause() {
        let predicate = compile(&DefinitionBuilder::new().status(ContactStatus::Active).build()).unwrap();
        assert!(predicate.matches(&contact(1, None, ContactStatus::Active, false), &[]));
        assert!(!predicate.matches(&contact(2, None, ContactStatus::Unsubscribed, false), &[]));
    }

    #[test]
    fn test_email_contains_is_case_insensitive() {
        let predicate =
            compile(&DefinitionBuilder::new().email_contains("@EXAMPLE.com").build()).unwrap();
        assert!(predicate.matches(
            &contact(1, Some("Jane@Example.COM"), ContactStatus::Active, false),
            &[]
        ));
        assert!(!predicate.matches(
            &contact(2, Some("jane@example.org"), ContactStatus::Active, false),
            &[]
        ));
        assert!(!predicate.matches(&contact(3, None, ContactStatus::Active, false), &[]));
    }

    #[test]
    fn test_gdpr_clause_both_polarities() {
        let consenting = contact(1, None, ContactStatus::Active, true);
        let refusing = contact(2, None, ContactStatus::Active, false);

        let yes = compile(&DefinitionBuilder::new().gdpr_consent(true).build()).unwrap();
        assert!(yes.matches(&consenting, &[]));
        assert!(!yes.matches(&refusing, &[]));

        let no = compile(&DefinitionBuilder::new().gdpr_consent(false).build()).unwrap();
        assert!(!no.matches(&consenting, &[]));
        assert!(no.matches(&refusing, &[]));
    }

    #[test]
    fn test_any_and_none_list_semantics() {
        let c = contact(1, None, ContactStatus::Active, false);

        let any = compile(&DefinitionBuilder::new().in_any_list([1, 2]).build()).unwrap();
        assert!(any.references_lists());
        assert!(any.matches(&c, &[1]));
        assert!(any.matches(&c, &[2, 7]));
        assert!(!any.matches(&c, &[3]));
        assert!(!any.matches(&c, &[]));

        let none = compile(&DefinitionBuilder::new().in_no_list([3]).build()).unwrap();
        assert!(none.matches(&c, &[]));
        assert!(none.matches(&c, &[1, 2]));
        assert!(!none.matches(&c, &[3]));
    }

    #[test]
    fn test_overlap_warns_and_exclusion_dominates() {
        let predicate = compile(
            &DefinitionBuilder::new()
                .in_any_list([1, 2])
                .in_no_list([2])
                .build(),
        )
        .unwrap();
        assert_eq!(
            predicate.warnings(),
            &[DefinitionWarning::OverlappingListIds { list_ids: vec![2] }]
        );
        let c = contact(1, None, ContactStatus::Active, false);
        // Only through list 2: excluded.
        assert!(!predicate.matches(&c, &[2]));
        // Through list 1 while also in excluded list 2: still excluded.
        assert!(!predicate.matches(&c, &[1, 2]));
        // Through list 1 alone: included.
        assert!(predicate.matches(&c, &[1]));
    }

    #[test]
    fn test_list_id_zero_rejected() {
        let err = compile(&DefinitionBuilder::new().in_no_list([0, 4]).build()).unwrap_err();
        assert!(matches!(err, CampaignError::Validation { ref field, .. } if field == "notInListIds"));
    }

    #[test]
    fn test_needle_limit_counts_characters() {
        let needle = "é".repeat(MAX_EMAIL_NEEDLE_LEN);
        assert!(needle.len() > MAX_EMAIL_NEEDLE_LEN);
        assert!(compile(&DefinitionBuilder::new().email_contains(needle).build()).is_ok());
    }

    #[test]
    fn test_overlong_needle_rejected() {
        let needle = "a".repeat(MAX_EMAIL_NEEDLE_LEN + 1);
        let err = compile(&DefinitionBuilder::new().email_contains(needle).build()).unwrap_err();
        assert!(matches!(err, CampaignError::Validation { ref field, .. } if field == "emailContains"));
    }

    #[test]
    fn test_referenced_list_ids_merged() {
        let predicate = compile(
            &DefinitionBuilder::new()
                .in_any_list([5, 1])
                .in_no_list([1, 9])
                .build(),
        )
        .unwrap();
        assert_eq!(predicate.referenced_list_ids(), vec![1, 5, 9]);
    }

    #[test]
    fn test_adding_clause_never_widens() {
        let population: Vec<(Contact, Vec<ListId>)> = vec![
            (contact(1, Some("a@example.com"), ContactStatus::Active, true), vec![1]),
            (contact(2, Some("b@example.org"), ContactStatus::Active, false), vec![]),
            (contact(3, None, ContactStatus::Inactive, true), vec![1, 3]),
            (contact(4, Some("d@example.com"), ContactStatus::Bounced, false), vec![3]),
        ];
        let steps = [
            DefinitionBuilder::new().build(),
            DefinitionBuilder::new().status(ContactStatus::Active).build(),
            DefinitionBuilder::new()
                .status(ContactStatus::Active)
                .email_contains("example")
                .build(),
            DefinitionBuilder::new()
                .status(ContactStatus::Active)
                .email_contains("example")
                .in_any_list([1])
                .build(),
            DefinitionBuilder::new()
                .status(ContactStatus::Active)
                .email_contains("example")
                .in_any_list([1])
                .gdpr_consent(true)
                .build(),
        ];

        let mut previous: Option<Vec<u64>> = None;
        for definition in &steps {
            let predicate = compile(definition).unwrap();
            let matched: Vec<u64> = population
                .iter()
                .filter(|(c, lists)| predicate.matches(c, lists))
                .map(|(c, _)| c.id)
                .collect();
            if let Some(prev) = &previous {
                assert!(matched.iter().all(|id| prev.contains(id)));
            }
            previous = Some(matched);
        }
        assert_eq!(previous, Some(vec![1]));
    }
}
