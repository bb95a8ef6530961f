//! # Target Tree Builder
//!
//! Turns the directives of one target (one `owner/repository/branch`) into a
//! new root tree for that branch.
//!
//! [`TargetTree`] mirrors the directory hierarchy touched by the directives:
//! each level knows which sub-trees need rebuilding, which leaves must be
//! created or replaced and which leaves must be dropped. [`TreeBuilder`]
//! then rebuilds bottom-up, starting every level from the current tree in
//! the destination (or from nothing) and in this order:
//!
//! 1. rebuilt sub-trees replace their previous entry, and a sub-tree that
//!    ended up empty is omitted;
//! 2. dropped leaves are removed;
//! 3. created or updated leaves replace their previous entry, after their
//!    objects were propagated into the destination.
//!
//! An empty result yields the empty tree sha without calling the provider.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use log::debug;
use rayon::prelude::*;

use crate::address::{Address, ObjectType, PathAddress, TREE_MODE};
use crate::error::{Error, Result};
use crate::gateway::ProviderGateway;
use crate::hash::EMPTY_TREE_SHA;
use crate::mapper::TargetGroup;
use crate::object::{EntryKind, NewTree};
use crate::propagation::Propagator;

/// Hierarchy of pending changes below one tree of the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTree {
    current: PathAddress,
    subtrees_to_update: BTreeMap<String, TargetTree>,
    leaves_to_create_or_update: BTreeMap<String, (PathAddress, PathAddress)>,
    leaves_to_drop: BTreeMap<String, PathAddress>,
}

impl TargetTree {
    /// An empty hierarchy rooted at `current`, which must be a tree.
    pub fn new(current: PathAddress) -> Result<Self> {
        if current.object_type() != ObjectType::Tree {
            return Err(Error::InvalidAddress {
                message: format!("{} is not a tree", current),
            });
        }
        Ok(Self {
            current,
            subtrees_to_update: BTreeMap::new(),
            leaves_to_create_or_update: BTreeMap::new(),
            leaves_to_drop: BTreeMap::new(),
        })
    }

    /// Builds the hierarchy of all directives of `group`.
    pub fn from_group(group: &TargetGroup) -> Result<Self> {
        let root = group.root().ok_or_else(|| Error::InvalidAddress {
            message: format!("no directive for {}", group.key),
        })?;
        let mut tree = Self::new(root)?;
        for directive in &group.directives {
            tree.insert(directive.destination.clone(), directive.source.clone())?;
        }
        Ok(tree)
    }

    pub fn current(&self) -> &PathAddress {
        &self.current
    }

    pub fn subtrees_to_update(&self) -> &BTreeMap<String, TargetTree> {
        &self.subtrees_to_update
    }

    pub fn leaves_to_create_or_update(&self) -> &BTreeMap<String, (PathAddress, PathAddress)> {
        &self.leaves_to_create_or_update
    }

    pub fn leaves_to_drop(&self) -> &BTreeMap<String, PathAddress> {
        &self.leaves_to_drop
    }

    pub fn is_empty(&self) -> bool {
        self.subtrees_to_update.is_empty()
            && self.leaves_to_create_or_update.is_empty()
            && self.leaves_to_drop.is_empty()
    }

    /// Adds `destination <- source`; `Address::Null` drops the destination.
    pub fn insert(&mut self, destination: PathAddress, source: Address) -> Result<()> {
        if destination.target_key() != self.current.target_key() {
            return Err(Error::InvalidAddress {
                message: format!(
                    "{} does not belong to {}",
                    destination,
                    self.current.target_key()
                ),
            });
        }
        if destination.path().is_none() {
            return Err(Error::InvalidAddress {
                message: format!("cannot replace the root of {}", destination.target_key()),
            });
        }
        if let Address::Path(source) = &source {
            if source.object_type() != destination.object_type() {
                return Err(Error::MappingConflict {
                    message: format!("Cannot map {} to {}", source, destination),
                });
            }
        }
        self.insert_at(destination, source)
    }

    fn insert_at(&mut self, destination: PathAddress, source: Address) -> Result<()> {
        let level = self.current.depth();
        let name = destination
            .segment_at_level(level)?
            .name()
            .unwrap_or_default()
            .to_string();

        if destination.depth() == level + 1 {
            if self.subtrees_to_update.contains_key(&name)
                || self.leaves_to_create_or_update.contains_key(&name)
                || self.leaves_to_drop.contains_key(&name)
            {
                return Err(Error::MappingConflict {
                    message: format!("{} is targeted more than once", destination),
                });
            }

            match source {
                Address::Path(source) => {
                    self.leaves_to_create_or_update
                        .insert(name, (destination, source));
                }
                Address::Null => {
                    self.leaves_to_drop.insert(name, destination);
                }
            }
            return Ok(());
        }

        if self.leaves_to_create_or_update.contains_key(&name) || self.leaves_to_drop.contains_key(&name) {
            return Err(Error::MappingConflict {
                message: format!(
                    "{} is below '{}' which is itself targeted",
                    destination, name
                ),
            });
        }

        let subtree = match self.subtrees_to_update.entry(name) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                entry.insert(TargetTree::new(destination.segment_at_level(level)?)?)
            }
        };
        subtree.insert_at(destination, source)
    }
}

/// Rebuilds target trees through a gateway.
pub struct TreeBuilder<'a> {
    gateway: &'a dyn ProviderGateway,
    propagator: Propagator<'a>,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(gateway: &'a dyn ProviderGateway, propagator: Propagator<'a>) -> Self {
        Self { gateway, propagator }
    }

    /// Builds `tree` and returns the sha of the resulting tree.
    pub fn build(&self, tree: &TargetTree) -> Result<String> {
        let current = &tree.current;

        let mut new_tree = match self.gateway.tree_from(current, false)? {
            Some((_, listing)) => NewTree::from_listing(&listing),
            None => NewTree::new(current.path()),
        };

        let rebuilt = tree
            .subtrees_to_update
            .par_iter()
            .map(|(name, subtree)| Ok((name, self.build(subtree)?)))
            .collect::<Result<Vec<_>>>()?;

        for (name, sha) in rebuilt {
            new_tree.remove(name);
            if sha == EMPTY_TREE_SHA {
                debug!("Omit empty tree '{}'", new_tree.child_path(name));
                continue;
            }
            new_tree.add(TREE_MODE, name, &sha, EntryKind::Tree);
        }

        for name in tree.leaves_to_drop.keys() {
            if new_tree.remove(name).is_some() {
                debug!("Drop '{}'", new_tree.child_path(name));
            }
        }

        let leaves = tree
            .leaves_to_create_or_update
            .par_iter()
            .map(|(name, (destination, source))| {
                self.propagator.sync_leaf(source, destination)?;
                let sha = source.sha().ok_or_else(|| Error::InvalidAddress {
                    message: format!("{} has not been enriched", source),
                })?;
                let mode = match source.object_type() {
                    ObjectType::Tree => TREE_MODE.to_string(),
                    ObjectType::Blob => match source.mode() {
                        Some(mode) => mode.to_string(),
                        None => self
                            .gateway
                            .blob_from(source, true)?
                            .map(|(_, entry)| entry.mode)
                            .ok_or_else(|| Error::NotFound {
                                object_type: source.object_type().to_string(),
                                url: source.url(),
                            })?,
                    },
                };
                Ok((name, mode, sha.to_string(), EntryKind::from(source.object_type())))
            })
            .collect::<Result<Vec<_>>>()?;

        for (name, mode, sha, kind) in leaves {
            new_tree.remove(name);
            new_tree.add(&mode, name, &sha, kind);
        }

        if new_tree.is_empty() {
            return Ok(EMPTY_TREE_SHA.to_string());
        }

        self.gateway
            .create_tree(&new_tree, current.owner(), current.repository())
    }
}
