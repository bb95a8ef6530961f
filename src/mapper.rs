//! # Mapping Accumulator
//!
//! Collects add/update/remove directives keyed by destination.
//!
//! Directives are stored by source (one source fanning out to many
//! destinations) and can be regrouped by destination repository/branch with
//! [`Mapper::transpose`], which yields one [`TargetGroup`] per target commit.
//!
//! Rules enforced here:
//!
//! - source and destination of an addition must have the same object type;
//! - a destination cannot be both added and removed;
//! - only blobs can be removed, and removing twice is a no-op;
//! - when two different sources are mapped to the same destination, the last
//!   one registered wins.

use std::collections::{HashMap, HashSet};

use crate::address::{Address, ObjectType, PathAddress};
use crate::error::{Error, Result};

/// One mapping directive: what ends up at `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub destination: PathAddress,
    pub source: Address,
}

/// All directives affecting one `owner/repository/branch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetGroup {
    pub key: String,
    pub directives: Vec<Directive>,
}

impl TargetGroup {
    /// Root tree of the target repository/branch.
    pub fn root(&self) -> Option<PathAddress> {
        self.directives.first().map(|d| d.destination.root())
    }
}

/// Accumulates mapping directives.
#[derive(Debug, Clone, Default)]
pub struct Mapper {
    buckets: Vec<(PathAddress, Vec<PathAddress>)>,
    source_index: HashMap<PathAddress, usize>,
    destination_index: HashMap<PathAddress, usize>,
    removals: Vec<PathAddress>,
    removal_set: HashSet<PathAddress>,
}

impl Mapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `source` onto `destination`.
    pub fn add(&mut self, source: PathAddress, destination: PathAddress) -> Result<&mut Self> {
        if source.object_type() != destination.object_type() {
            return Err(Error::MappingConflict {
                message: format!("Cannot map {} to {}", source, destination),
            });
        }

        if self.removal_set.contains(&destination) {
            return Err(Error::MappingConflict {
                message: format!(
                    "Cannot add the target path '{}' in branch '{}' of '{}' as it's already scheduled for removal",
                    destination.path().unwrap_or_default(),
                    destination.branch(),
                    destination.repository_key()
                ),
            });
        }

        let bucket = match self.source_index.get(&source) {
            Some(&index) => {
                // Keep the most recently seen attributes of the source.
                self.buckets[index].0 = source;
                index
            }
            None => {
                self.buckets.push((source.clone(), Vec::new()));
                let index = self.buckets.len() - 1;
                self.source_index.insert(source, index);
                index
            }
        };

        if let Some(previous) = self.destination_index.insert(destination.clone(), bucket) {
            let destinations = &mut self.buckets[previous].1;
            destinations.retain(|d| d != &destination);
        }
        self.buckets[bucket].1.push(destination);

        Ok(self)
    }

    /// Maps `source` onto several destinations.
    pub fn add_many<I>(&mut self, source: PathAddress, destinations: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = PathAddress>,
    {
        for destination in destinations {
            self.add(source.clone(), destination)?;
        }
        Ok(self)
    }

    /// Schedules `destination` for removal.
    pub fn remove(&mut self, destination: PathAddress) -> Result<&mut Self> {
        if destination.object_type() == ObjectType::Tree {
            return Err(Error::MappingConflict {
                message: format!("Removing a Tree isn't supported ({})", destination),
            });
        }

        if self.destination_index.contains_key(&destination) {
            return Err(Error::MappingConflict {
                message: format!(
                    "Cannot remove the target path '{}' in branch '{}' of '{}' as it's already scheduled for addition",
                    destination.path().unwrap_or_default(),
                    destination.branch(),
                    destination.repository_key()
                ),
            });
        }

        if self.removal_set.insert(destination.clone()) {
            self.removals.push(destination);
        }
        Ok(self)
    }

    /// Dispatches on the source variant.
    pub fn add_or_remove(&mut self, source: Address, destination: PathAddress) -> Result<&mut Self> {
        match source {
            Address::Path(source) => self.add(source, destination),
            Address::Null => self.remove(destination),
        }
    }

    /// Sources with the destinations they are mapped to, in registration order.
    pub fn to_be_added_or_updated(&self) -> impl Iterator<Item = (&PathAddress, &[PathAddress])> {
        self.buckets
            .iter()
            .filter(|(_, destinations)| !destinations.is_empty())
            .map(|(source, destinations)| (source, destinations.as_slice()))
    }

    pub fn to_be_removed(&self) -> &[PathAddress] {
        &self.removals
    }

    pub fn has_additions(&self) -> bool {
        !self.destination_index.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.destination_index.is_empty() && self.removals.is_empty()
    }

    /// Number of directives, additions and removals included.
    pub fn len(&self) -> usize {
        self.destination_index.len() + self.removals.len()
    }

    /// Regroups all directives by destination `owner/repository/branch`.
    ///
    /// Groups appear in the order their first directive was registered;
    /// additions precede removals inside a group.
    pub fn transpose(&self) -> Vec<TargetGroup> {
        let mut groups: Vec<TargetGroup> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        let mut push = |destination: &PathAddress, source: Address| {
            let key = destination.target_key();
            let slot = *index.entry(key.clone()).or_insert_with(|| {
                groups.push(TargetGroup {
                    key,
                    directives: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].directives.push(Directive {
                destination: destination.clone(),
                source,
            });
        };

        for (source, destinations) in self.to_be_added_or_updated() {
            for destination in destinations {
                push(destination, Address::Path(source.clone()));
            }
        }
        for destination in &self.removals {
            push(destination, Address::Null);
        }

        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(path: &str) -> PathAddress {
        PathAddress::blob("acme", "templates", "main", path).unwrap()
    }

    fn dst(repo: &str, path: &str) -> PathAddress {
        PathAddress::blob("acme", repo, "master", path).unwrap()
    }

    #[test]
    fn test_add_then_remove_conflicts() {
        let mut mapper = Mapper::new();
        mapper.add(src("a.md"), dst("svc", "a.md")).unwrap();
        let err = mapper.remove(dst("svc", "a.md")).unwrap_err();
        assert!(matches!(err, Error::MappingConflict { .. }));
    }

    #[test]
    fn test_remove_then_add_conflicts() {
        let mut mapper = Mapper::new();
        mapper.remove(dst("svc", "a.md")).unwrap();
        let err = mapper.add(src("a.md"), dst("svc", "a.md")).unwrap_err();
        assert!(matches!(err, Error::MappingConflict { .. }));
    }

    #[test]
    fn test_remove_tree_is_rejected() {
        let mut mapper = Mapper::new();
        let tree = PathAddress::tree("acme", "svc", "master", Some("docs")).unwrap();
        assert!(matches!(
            mapper.remove(tree).unwrap_err(),
            Error::MappingConflict { .. }
        ));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut mapper = Mapper::new();
        mapper.remove(dst("svc", "a.md")).unwrap();
        mapper.remove(dst("svc", "a.md")).unwrap();
        assert_eq!(mapper.to_be_removed().len(), 1);
        assert_eq!(mapper.len(), 1);
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let mut mapper = Mapper::new();
        let tree = PathAddress::tree("acme", "svc", "master", Some("docs")).unwrap();
        assert!(mapper.add(src("docs"), tree).is_err());
    }

    #[test]
    fn test_fan_out() {
        let mut mapper = Mapper::new();
        mapper
            .add_many(src("a.md"), [dst("svc", "a.md"), dst("web", "a.md")])
            .unwrap();

        let entries: Vec<_> = mapper.to_be_added_or_updated().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.len(), 2);
    }

    #[test]
    fn test_last_registered_source_wins() {
        let low = PathAddress::blob("acme", "base", "main", "a.md").unwrap();
        let high = PathAddress::blob("acme", "rust", "main", "a.md").unwrap();

        let mut mapper = Mapper::new();
        mapper.add(low, dst("svc", "a.md")).unwrap();
        mapper.add(high.clone(), dst("svc", "a.md")).unwrap();

        let entries: Vec<_> = mapper.to_be_added_or_updated().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.repository(), "rust");
        assert_eq!(mapper.len(), 1);
    }

    #[test]
    fn test_same_directive_twice_is_not_duplicated() {
        let mut mapper = Mapper::new();
        mapper.add(src("a.md"), dst("svc", "a.md")).unwrap();
        mapper
            .add(src("a.md").enriched("abc", "100644"), dst("svc", "a.md"))
            .unwrap();

        let entries: Vec<_> = mapper.to_be_added_or_updated().collect();
        assert_eq!(entries[0].1.len(), 1);
        assert_eq!(entries[0].0.sha(), Some("abc"));
    }

    #[test]
    fn test_transpose_groups_by_target() {
        let mut mapper = Mapper::new();
        mapper
            .add_many(src("a.md"), [dst("svc", "a.md"), dst("web", "a.md")])
            .unwrap();
        mapper.add(src("b.md"), dst("svc", "b.md")).unwrap();
        mapper.remove(dst("svc", "old.md")).unwrap();

        let groups = mapper.transpose();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, "acme/svc/master");
        assert_eq!(groups[0].directives.len(), 3);
        assert!(groups[0].directives[2].source.is_null());
        assert_eq!(groups[1].key, "acme/web/master");
        assert_eq!(
            groups[1].root().unwrap(),
            PathAddress::tree("acme", "web", "master", None).unwrap()
        );
    }

    #[test]
    fn test_empty_mapper() {
        let mapper = Mapper::new();
        assert!(mapper.is_empty());
        assert!(!mapper.has_additions());
        assert!(mapper.transpose().is_empty());
    }
}
