use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::family::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Inserted,
    Replaced,
}

/// Resources indexed by name and grouped by type tag.
///
/// Both views always hold the same set. Groups keep insertion order and an
/// emptied group is removed.
#[derive(Debug)]
pub struct DualIndex<R> {
    by_name: HashMap<String, Arc<R>>,
    by_type: BTreeMap<&'static str, Vec<Arc<R>>>,
}

impl<R> Default for DualIndex<R> {
    fn default() -> Self {
        Self {
            by_name: HashMap::new(),
            by_type: BTreeMap::new(),
        }
    }
}

impl<R: Resource> DualIndex<R> {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn from_resources(resources: impl IntoIterator<Item = R>) -> Self {
        let mut index = Self::new();
        for resource in resources {
            index.upsert(resource);
        }
        index
    }

    /// Insert, or replace the entry with the same name.
    ///
    /// A replacement keeps its position in the group unless the tag changed,
    /// in which case it moves to the end of its new group.
    pub fn upsert(&mut self, resource: R) -> Upserted {
        let resource = Arc::new(resource);
        let name = resource.name().to_string();
        let tag = resource.type_tag();

        match self.by_name.insert(name.clone(), resource.clone()) {
            Some(previous) if previous.type_tag() == tag => {
                if let Some(slot) = self
                    .by_type
                    .get_mut(tag)
                    .and_then(|group| group.iter_mut().find(|r| r.name() == name))
                {
                    *slot = resource;
                }
                Upserted::Replaced
            }
            Some(previous) => {
                self.remove_from_group(previous.type_tag(), &name);
                self.by_type.entry(tag).or_default().push(resource);
                Upserted::Replaced
            }
            None => {
                self.by_type.entry(tag).or_default().push(resource);
                Upserted::Inserted
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<R>> {
        let removed = self.by_name.remove(name)?;
        self.remove_from_group(removed.type_tag(), name);
        Some(removed)
    }

    fn remove_from_group(&mut self, tag: &'static str, name: &str) {
        if let Some(group) = self.by_type.get_mut(tag) {
            group.retain(|r| r.name() != name);
            if group.is_empty() {
                self.by_type.remove(tag);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<R>> {
        self.by_name.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn group(&self, tag: &str) -> Option<&[Arc<R>]> {
        self.by_type.get(tag).map(|group| group.as_slice())
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Resources in tag order, then insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<R>> {
        self.by_type.values().flatten()
    }

    /// Both views hold the same set and no group is empty
    pub fn is_consistent(&self) -> bool {
        let grouped: usize = self.by_type.values().map(Vec::len).sum();
        if grouped != self.by_name.len() {
            return false;
        }

        self.by_type.iter().all(|(tag, group)| {
            !group.is_empty()
                && group.iter().all(|r| {
                    r.type_tag() == *tag
                        && self
                            .by_name
                            .get(r.name())
                            .map(|named| Arc::ptr_eq(named, r))
                            .unwrap_or(false)
                })
        })
    }

    pub fn snapshot(&self) -> CacheSnapshot<R> {
        CacheSnapshot {
            groups: self
                .by_type
                .iter()
                .map(|(tag, group)| (*tag, group.iter().map(|r| R::clone(r)).collect()))
                .collect(),
        }
    }
}

/// Point-in-time copy of a cache, grouped by type tag
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot<R> {
    pub groups: BTreeMap<&'static str, Vec<R>>,
}

impl<R> Default for CacheSnapshot<R> {
    fn default() -> Self {
        Self {
            groups: BTreeMap::new(),
        }
    }
}

impl<R: Resource> CacheSnapshot<R> {
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&R> {
        self.iter().find(|r| r.name() == name)
    }

    pub fn group(&self, tag: &str) -> &[R] {
        self.groups.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.groups.values().flatten()
    }

    pub fn names(&self) -> Vec<&str> {
        self.iter().map(|r| r.name()).collect()
    }
}
