/*
    search.rs - Shortlist for iterative Kademlia lookups

    A lookup keeps the closest contacts seen so far and asks the nearest
    ones it has not asked yet, `alpha` at a time. Replies add contacts.
    The lookup is finished once every one of the `width` closest known
    contacts has been asked.
*/

use super::key::DhtKey;
use super::routing_table::Contact;
use std::collections::{BTreeMap, HashSet};

pub struct Shortlist {
    target: DhtKey,
    width: usize,
    // distance to target -> contact
    candidates: BTreeMap<DhtKey, Contact>,
    asked: HashSet<String>,
}

impl Shortlist {
    pub fn new(target: DhtKey, width: usize, seeds: impl IntoIterator<Item = Contact>) -> Self {
        let mut shortlist = Shortlist { target, width, candidates: BTreeMap::new(), asked: HashSet::new() };
        shortlist.add(seeds);
        shortlist
    }

    pub fn add(&mut self, contacts: impl IntoIterator<Item = Contact>) {
        for contact in contacts {
            self.candidates.entry(contact.key.distance(&self.target)).or_insert(contact);
        }
    }

    /// Record a contact that already answered outside the normal rounds
    pub fn add_answered(&mut self, contact: Contact) {
        self.asked.insert(contact.peer_id.clone());
        self.add([contact]);
    }

    /// Next contacts to ask, nearest first; they count as asked from now on
    pub fn next_batch(&mut self, alpha: usize) -> Vec<Contact> {
        let batch: Vec<Contact> = self
            .candidates
            .values()
            .take(self.width)
            .filter(|c| !self.asked.contains(&c.peer_id))
            .take(alpha)
            .cloned()
            .collect();
        for contact in &batch {
            self.asked.insert(contact.peer_id.clone());
        }
        batch
    }

    /// Forget a contact that did not answer
    pub fn fail(&mut self, contact: &Contact) {
        self.candidates.remove(&contact.key.distance(&self.target));
    }

    pub fn is_finished(&self) -> bool {
        self.candidates
            .values()
            .take(self.width)
            .all(|c| self.asked.contains(&c.peer_id))
    }

    /// The `width` closest contacts still standing
    pub fn closest(&self) -> Vec<Contact> {
        self.candidates.values().take(self.width).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn contacts(n: u16) -> Vec<Contact> {
        (0..n)
            .map(|i| Contact::new(format!("peer-{}", i), SocketAddr::from(([127, 0, 0, 1], 2000 + i))))
            .collect()
    }

    #[test]
    fn test_batches_nearest_first_until_finished() {
        let all = contacts(6);
        let target = DhtKey::for_peer("target");
        let mut shortlist = Shortlist::new(target, 4, all.clone());

        let first = shortlist.next_batch(3);
        assert_eq!(first.len(), 3);
        let mut by_distance = all.clone();
        by_distance.sort_by_key(|c| c.key.distance(&target));
        assert_eq!(first, by_distance[..3].to_vec());

        // Only the fourth of the width-4 window is left
        assert_eq!(shortlist.next_batch(3), by_distance[3..4].to_vec());
        assert!(shortlist.is_finished());
        assert!(shortlist.next_batch(3).is_empty());
        assert_eq!(shortlist.closest(), by_distance[..4].to_vec());
    }

    #[test]
    fn test_failed_contacts_make_room() {
        let all = contacts(3);
        let target = DhtKey::for_peer("target");
        let mut shortlist = Shortlist::new(target, 2, all.clone());

        let first = shortlist.next_batch(1);
        shortlist.fail(&first[0]);
        assert!(!shortlist.closest().contains(&first[0]));
        assert_eq!(shortlist.closest().len(), 2);
        assert!(!shortlist.is_finished());
    }

    #[test]
    fn test_answered_contacts_are_not_asked_again() {
        let target = DhtKey::for_peer("target");
        let bootstrap = Contact::new("boot", SocketAddr::from(([127, 0, 0, 1], 9000)));
        let mut shortlist = Shortlist::new(target, 4, Vec::new());

        shortlist.add_answered(bootstrap.clone());
        assert!(shortlist.next_batch(3).is_empty());
        assert_eq!(shortlist.closest(), vec![bootstrap]);
    }
}
