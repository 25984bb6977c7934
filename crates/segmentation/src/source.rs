//! Collaborator interfaces for the contact store and the list membership store,
//! plus an in-memory directory implementing both.
//!
//! The core only ever reads through these traits. Implementations report
//! transient read failures as [`CampaignError::SourceUnavailable`].

use async_trait::async_trait;
use campaign_core::types::{Contact, ContactId, ContactList, ContactStatus, ListId, ListMembership};
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use tracing::info;

/// Paged, id-ordered read access to the contact population.
#[async_trait]
pub trait ContactSource: Send + Sync {
    /// Up to `limit` contacts with id strictly greater than `after`, ascending.
    /// A page shorter than `limit` marks the end of the population.
    async fn fetch_page(&self, after: Option<ContactId>, limit: usize) -> CampaignResult<Vec<Contact>>;
}

/// Bulk read access to contact↔list edges.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    async fn memberships_for(&self, contact_ids: &[ContactId]) -> CampaignResult<Vec<ListMembership>>;

    /// The subset of `list_ids` that still exist.
    async fn existing_lists(&self, list_ids: &[ListId]) -> CampaignResult<BTreeSet<ListId>>;
}

/// In-memory contact and list directory for development and tests.
#[derive(Default)]
pub struct InMemoryDirectory {
    contacts: RwLock<BTreeMap<ContactId, Contact>>,
    lists: RwLock<BTreeMap<ListId, ContactList>>,
    memberships: RwLock<BTreeMap<ContactId, BTreeMap<ListId, DateTime<Utc>>>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory pre-populated with a small demo population.
    pub fn with_demo_data() -> Self {
        let directory = Self::new();
        directory.seed_demo_data();
        info!(
            contacts = directory.contact_count(),
            lists = directory.lists.read().len(),
            "In-memory contact directory seeded (development mode)"
        );
        directory
    }

    pub fn upsert_contact(&self, contact: Contact) {
        self.contacts.write().insert(contact.id, contact);
    }

    pub fn remove_contact(&self, contact_id: ContactId) -> bool {
        self.memberships.write().remove(&contact_id);
        self.contacts.write().remove(&contact_id).is_some()
    }

    pub fn upsert_list(&self, id: ListId, name: impl Into<String>) {
        self.lists.write().insert(
            id,
            ContactList {
                id,
                name: name.into(),
            },
        );
    }

    /// Delete a list and every edge pointing at it.
    pub fn remove_list(&self, list_id: ListId) -> bool {
        let removed = self.lists.write().remove(&list_id).is_some();
        if removed {
            for lists in self.memberships.write().values_mut() {
                lists.remove(&list_id);
            }
        }
        removed
    }

    pub fn add_to_list(&self, contact_id: ContactId, list_id: ListId) {
        self.memberships
            .write()
            .entry(contact_id)
            .or_default()
            .entry(list_id)
            .or_insert_with(Utc::now);
    }

    pub fn remove_from_list(&self, contact_id: ContactId, list_id: ListId) -> bool {
        self.memberships
            .write()
            .get_mut(&contact_id)
            .is_some_and(|lists| lists.remove(&list_id).is_some())
    }

    pub fn contact_count(&self) -> usize {
        self.contacts.read().len()
    }

    fn seed_demo_data(&self) {
        self.upsert_list(1, "Newsletter");
        self.upsert_list(2, "Product updates");
        self.upsert_list(3, "Suppression");

        let now = Utc::now();
        let statuses = ContactStatus::ALL;
        for id in 1..=200u64 {
            let status = if id % 10 == 0 {
                statuses[1 + (id as usize / 10) % (statuses.len() - 1)]
            } else {
                ContactStatus::Active
            };
            let domain = if id % 3 == 0 { "example.com" } else { "example.org" };
            self.upsert_contact(Contact {
                id,
                email: Some(format!("contact{id}@{domain}")),
                name: Some(format!("Contact {id}")),
                status,
                gdpr_consent_at: (id % 2 == 0).then(|| now - Duration::days(id as i64)),
            });
            if id % 2 == 0 {
                self.add_to_list(id, 1);
            }
            if id % 5 == 0 {
                self.add_to_list(id, 2);
            }
            if id % 25 == 0 {
                self.add_to_list(id, 3);
            }
        }
    }
}

#[async_trait]
impl ContactSource for InMemoryDirectory {
    async fn fetch_page(&self, after: Option<ContactId>, limit: usize) -> CampaignResult<Vec<Contact>> {
        if limit == 0 {
            return Err(CampaignError::SourceUnavailable(
                "page limit must be greater than zero".into(),
            ));
        }
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        Ok(self
            .contacts
            .read()
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, contact)| contact.clone())
            .collect())
    }
}

#[async_trait]
impl MembershipSource for InMemoryDirectory {
    async fn memberships_for(&self, contact_ids: &[ContactId]) -> CampaignResult<Vec<ListMembership>> {
        let memberships = self.memberships.read();
        Ok(contact_ids
            .iter()
            .filter_map(|id| memberships.get(id).map(|lists| (*id, lists)))
            .flat_map(|(contact_id, lists)| {
                lists.iter().map(move |(list_id, subscribed_at)| ListMembership {
                    contact_id,
                    list_id: *list_id,
                    subscribed_at: *subscribed_at,
                })
            })
            .collect())
    }

    async fn existing_lists(&self, list_ids: &[ListId]) -> CampaignResult<BTreeSet<ListId>> {
        let lists = self.lists.read();
        Ok(list_ids
            .iter()
            .filter(|id| lists.contains_key(id))
            .copied()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(id: ContactId) -> Contact {
        Contact {
            id,
            email: Some(format!("c{id}@example.com")),
            name: None,
            status: ContactStatus::Active,
            gdpr_consent_at: None,
        }
    }

    #[tokio::test]
    async fn test_keyset_paging_is_ascending() {
        let directory = InMemoryDirectory::new();
        for id in [5, 1, 9, 3, 7] {
            directory.upsert_contact(contact(id));
        }

        let first = directory.fetch_page(None, 2).await.unwrap();
        assert_eq!(first.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 3]);

        let second = directory.fetch_page(Some(3), 2).await.unwrap();
        assert_eq!(second.iter().map(|c| c.id).collect::<Vec<_>>(), vec![5, 7]);

        let last = directory.fetch_page(Some(7), 2).await.unwrap();
        assert_eq!(last.iter().map(|c| c.id).collect::<Vec<_>>(), vec![9]);
    }

    #[tokio::test]
    async fn test_memberships_and_list_removal() {
        let directory = InMemoryDirectory::new();
        directory.upsert_list(1, "a");
        directory.upsert_list(2, "b");
        directory.upsert_contact(contact(10));
        directory.add_to_list(10, 1);
        directory.add_to_list(10, 2);

        let edges = directory.memberships_for(&[10, 11]).await.unwrap();
        assert_eq!(edges.len(), 2);

        assert!(directory.remove_list(2));
        let edges = directory.memberships_for(&[10]).await.unwrap();
        assert_eq!(edges.iter().map(|e| e.list_id).collect::<Vec<_>>(), vec![1]);

        let existing = directory.existing_lists(&[1, 2, 3]).await.unwrap();
        assert_eq!(existing.into_iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_demo_data_seeded() {
        let directory = InMemoryDirectory::with_demo_data();
        assert_eq!(directory.contact_count(), 200);
        assert!(directory.remove_from_list(2, 1));
        assert!(!directory.remove_from_list(2, 1));
    }
}
