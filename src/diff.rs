//! # Diff Engine
//!
//! Given a [`Mapper`] of desired mappings, works out which directives
//! actually require a change in the destination.
//!
//! Every source is enriched with its current sha and mode (a missing source
//! is fatal). Each destination is enriched tolerantly: a missing destination
//! means the object has to be created, a destination with a different sha
//! has to be updated, and one with the same sha and mode is already in sync
//! and is dropped. A mode-only difference (e.g. a file becoming executable)
//! is an update. Removal directives are carried over untouched.

use std::fmt;

use log::{debug, info};
use rayon::prelude::*;

use crate::address::{Address, ObjectType, PathAddress};
use crate::error::{Error, Result};
use crate::gateway::ProviderGateway;
use crate::hash;
use crate::mapper::Mapper;

/// Why a directive was kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Creation,
    Update,
    Removal,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Creation => write!(f, "create"),
            ChangeKind::Update => write!(f, "update"),
            ChangeKind::Removal => write!(f, "remove"),
        }
    }
}

/// One directive that requires work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    /// Enriched source, `Address::Null` for removals.
    pub source: Address,
    pub destination: PathAddress,
}

/// Result of diffing a mapper against the providers.
#[derive(Debug, Clone, Default)]
pub struct Diff {
    mapper: Mapper,
    changes: Vec<Change>,
}

impl Diff {
    /// Directives still requiring work, with enriched sources.
    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    pub fn into_mapper(self) -> Mapper {
        self.mapper
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of changes of `kind`.
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }
}

/// Looks up the current sha and mode of `address`.
///
/// Returns `Ok(None)` for a missing object unless `throws_if_not_found`.
pub fn enrich(
    gateway: &dyn ProviderGateway,
    address: &PathAddress,
    throws_if_not_found: bool,
) -> Result<Option<PathAddress>> {
    let found = match address.object_type() {
        ObjectType::Blob => gateway
            .blob_from(address, throws_if_not_found)?
            .map(|(enriched, _)| enriched),
        ObjectType::Tree => gateway
            .tree_from(address, throws_if_not_found)?
            .map(|(enriched, _)| enriched),
    };

    match found {
        None if throws_if_not_found => Err(Error::NotFound {
            object_type: address.object_type().to_string(),
            url: address.url(),
        }),
        other => Ok(other),
    }
}

/// Computes the directives of `input` that require a change.
pub fn diff(gateway: &dyn ProviderGateway, input: &Mapper) -> Result<Diff> {
    let sources: Vec<(&PathAddress, &[PathAddress])> = input.to_be_added_or_updated().collect();

    let analyzed = sources
        .par_iter()
        .map(|(source, destinations)| {
            info!("Diff - Analyze {} => {} destination(s)", source, destinations.len());
            let source = enrich(gateway, source, true)?.ok_or_else(|| Error::NotFound {
                object_type: source.object_type().to_string(),
                url: source.url(),
            })?;

            let current = destinations
                .iter()
                .map(|destination| Ok((destination, enrich(gateway, destination, false)?)))
                .collect::<Result<Vec<_>>>()?;
            Ok((source, current))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut result = Diff::default();

    for (source, destinations) in analyzed {
        for (destination, current) in destinations {
            let kind = match current {
                None => {
                    debug!("Diff - Creation required {} => {}", source, destination);
                    ChangeKind::Creation
                }
                Some(current) if same_content(&source, &current) => {
                    debug!("Diff - No sync required {} => {}", source, destination);
                    continue;
                }
                Some(_) => {
                    debug!("Diff - Update required {} => {}", source, destination);
                    ChangeKind::Update
                }
            };

            result.mapper.add(source.clone(), destination.clone())?;
            result.changes.push(Change {
                kind,
                source: Address::Path(source.clone()),
                destination: destination.clone(),
            });
        }
    }

    for destination in input.to_be_removed() {
        debug!("Diff - Removal requested {}", destination);
        result.mapper.remove(destination.clone())?;
        result.changes.push(Change {
            kind: ChangeKind::Removal,
            source: Address::Null,
            destination: destination.clone(),
        });
    }

    Ok(result)
}

/// Same sha and, when both are known, same mode.
fn same_content(source: &PathAddress, destination: &PathAddress) -> bool {
    let same_sha = match (source.sha(), destination.sha()) {
        (Some(a), Some(b)) => hash::same_sha(a, b),
        _ => false,
    };
    let same_mode = match (source.mode(), destination.mode()) {
        (Some(a), Some(b)) => a.trim_start_matches('0') == b.trim_start_matches('0'),
        _ => true,
    };
    same_sha && same_mode
}
