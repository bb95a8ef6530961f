//! Lookups of [`BareRepoGateway`] against repositories built with `git`.
//!
//! ```bash
//! cargo test --features integration-tests --test bare_gateway
//! ```

mod common;

use common::prelude::*;
use repo_sync::address::PathAddress;
use repo_sync::gateway::bare::BareRepoGateway;
use repo_sync::gateway::{ProviderGateway, User};
use repo_sync::hash::blob_sha;

fn gateway(fixture: &TestFixture) -> BareRepoGateway {
    BareRepoGateway::new(fixture.root(), User::new("bot", "Sync Bot", None))
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_blob_lookup_of_dash_prefixed_path() {
    let fixture = TestFixture::new().with_repository(
        "acme",
        "templates",
        &[("-d.md", "dash"), ("docs/-r", "nested"), ("README.md", "readme")],
    );
    let gateway = gateway(&fixture);

    let address = PathAddress::blob("acme", "templates", "main", "-d.md").unwrap();
    let (found, entry) = gateway.blob_from(&address, true).unwrap().unwrap();
    assert_eq!(entry.sha, blob_sha(b"dash"));
    assert_eq!(found.sha(), Some(blob_sha(b"dash").as_str()));

    let nested = PathAddress::blob("acme", "templates", "main", "docs/-r").unwrap();
    let (_, entry) = gateway.blob_from(&nested, true).unwrap().unwrap();
    assert_eq!(entry.sha, blob_sha(b"nested"));
}

#[test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
fn test_missing_blob_is_absent() {
    let fixture = TestFixture::new().with_repository("acme", "templates", &[("README.md", "readme")]);
    let gateway = gateway(&fixture);

    let address = PathAddress::blob("acme", "templates", "main", "-d.md").unwrap();
    assert!(gateway.blob_from(&address, false).unwrap().is_none());
    assert!(gateway.blob_from(&address, true).is_err());
}
