//! Arena-backed membership index for one evaluation batch.
//!
//! All list ids live in a single flat vector; each contact maps to a span of
//! it, sorted ascending so clause evaluation can binary search.

use campaign_core::types::{ContactId, ListId, ListMembership};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MembershipIndex {
    spans: HashMap<ContactId, (usize, usize)>,
    arena: Vec<ListId>,
}

impl MembershipIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_edges<I>(edges: I) -> Self
    where
        I: IntoIterator<Item = ListMembership>,
    {
        let mut pairs: Vec<(ContactId, ListId)> = edges
            .into_iter()
            .map(|edge| (edge.contact_id, edge.list_id))
            .collect();
        pairs.sort_unstable();
        pairs.dedup();

        let mut spans = HashMap::new();
        let mut arena = Vec::with_capacity(pairs.len());
        let mut start = 0;
        for (position, (contact_id, list_id)) in pairs.iter().enumerate() {
            arena.push(*list_id);
            let last_of_contact = pairs
                .get(position + 1)
                .map_or(true, |(next_contact, _)| next_contact != contact_id);
            if last_of_contact {
                spans.insert(*contact_id, (start, position + 1));
                start = position + 1;
            }
        }

        Self { spans, arena }
    }

    /// Sorted list ids the contact belongs to; empty when it has none.
    pub fn lists_of(&self, contact_id: ContactId) -> &[ListId] {
        match self.spans.get(&contact_id) {
            Some(&(start, end)) => &self.arena[start..end],
            None => &[],
        }
    }

    /// Number of contacts with at least one membership.
    pub fn contact_count(&self) -> usize {
        self.spans.len()
    }

    pub fn edge_count(&self) -> usize {
        self.arena.len()
    }
}
