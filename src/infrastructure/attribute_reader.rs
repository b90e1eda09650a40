use super::{AttributeReader, RepoError, RepoResult};
use crate::domain::attribute::Attribute;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const DEFAULT_MAX_ATTRIBUTES: usize = 1_000;

/// In-memory attribute reader with hierarchical inheritance: each identifier
/// may name parent identifiers whose attributes it inherits. The walk is
/// breadth-first with a visited set, so parent cycles terminate.
///
/// Doubles as the test stand-in for an external adapter: reads are counted
/// (cache-hit assertions) and the next read can be forced to fail.
pub struct InMemoryAttributeReader {
    pub attributes: Mutex<HashMap<(String, String), HashSet<Attribute>>>, // (zone, id) -> own attrs
    pub parents: Mutex<HashMap<(String, String), Vec<String>>>,           // (zone, id) -> parent ids
    max_attributes: usize,
    reads: AtomicUsize,
    fail_next: Mutex<Option<RepoError>>,
}

impl InMemoryAttributeReader {
    pub fn new() -> Self {
        Self::with_max_attributes(DEFAULT_MAX_ATTRIBUTES)
    }

    pub fn with_max_attributes(max_attributes: usize) -> Self {
        Self {
            attributes: Mutex::new(HashMap::new()),
            parents: Mutex::new(HashMap::new()),
            max_attributes,
            reads: AtomicUsize::new(0),
            fail_next: Mutex::new(None),
        }
    }

    pub fn put<I>(&self, zone_id: &str, identifier: &str, attributes: I)
    where
        I: IntoIterator<Item = Attribute>,
    {
        self.attributes.lock().unwrap().insert(
            (zone_id.to_string(), identifier.to_string()),
            attributes.into_iter().collect(),
        );
    }

    pub fn set_parents(&self, zone_id: &str, identifier: &str, parent_ids: Vec<String>) {
        self.parents
            .lock()
            .unwrap()
            .insert((zone_id.to_string(), identifier.to_string()), parent_ids);
    }

    /// Drops everything known about a zone.
    pub fn invalidate_zone(&self, zone_id: &str) {
        self.attributes
            .lock()
            .unwrap()
            .retain(|(zone, _), _| zone != zone_id);
        self.parents
            .lock()
            .unwrap()
            .retain(|(zone, _), _| zone != zone_id);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Makes the next `attributes_for` call return the given error.
    pub fn fail_next(&self, error: RepoError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }
}

impl Default for InMemoryAttributeReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AttributeReader for InMemoryAttributeReader {
    async fn attributes_for(
        &self,
        zone_id: &str,
        identifier: &str,
    ) -> RepoResult<HashSet<Attribute>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.fail_next.lock().unwrap().take() {
            return Err(error);
        }

        let attributes = self.attributes.lock().unwrap();
        let parents = self.parents.lock().unwrap();

        let mut resolved: HashSet<Attribute> = HashSet::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier = vec![identifier.to_string()];
        while let Some(current) = frontier.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let key = (zone_id.to_string(), current);
            if let Some(own) = attributes.get(&key) {
                resolved.extend(own.iter().cloned());
            }
            if let Some(parent_ids) = parents.get(&key) {
                frontier.extend(parent_ids.iter().cloned());
            }
        }

        if resolved.len() > self.max_attributes {
            return Err(RepoError::LimitExceeded {
                identifier: identifier.to_string(),
                count: resolved.len(),
                max: self.max_attributes,
            });
        }
        Ok(resolved)
    }
}
