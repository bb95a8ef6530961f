//! Property-based tests for addresses, path helpers and hashing.
//!
//! These tests use proptest to generate random inputs and verify that
//! invariants hold for all possible inputs.

#[cfg(test)]
mod proptest_tests {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    use crate::address::{ObjectType, PathAddress};
    use crate::hash::{blob_sha, same_sha, tree_sha};
    use crate::object::{EntryKind, TreeEntry};
    use crate::path::encode_url_path;
    use proptest::prelude::*;

    fn hash_of(address: &PathAddress) -> u64 {
        let mut hasher = DefaultHasher::new();
        address.hash(&mut hasher);
        hasher.finish()
    }

    fn segment() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,11}".prop_filter("not a dot segment", |s| s != "." && s != "..")
    }

    fn relative_path() -> impl Strategy<Value = String> {
        prop::collection::vec(segment(), 1..5).prop_map(|s| s.join("/"))
    }

    fn sha() -> impl Strategy<Value = String> {
        "[0-9a-f]{40}"
    }

    // ============================================================================
    // PathAddress identity
    // ============================================================================

    proptest! {
        /// Property: sha and mode never take part in equality or hashing
        #[test]
        fn identity_ignores_content_attributes(path in relative_path(), sha in sha(), mode in "100644|100755") {
            let address = PathAddress::blob("acme", "svc", "main", &path).unwrap();
            let enriched = address.enriched(sha, mode);
            prop_assert_eq!(&address, &enriched);
            prop_assert_eq!(hash_of(&address), hash_of(&enriched));
            prop_assert_eq!(address, enriched.bare());
        }

        /// Property: the parent of a combined child is the original tree
        #[test]
        fn combine_then_parent_round_trips(path in relative_path(), name in segment(), sha in sha()) {
            let tree = PathAddress::tree("acme", "svc", "main", Some(&path)).unwrap();
            let child = tree.combine(ObjectType::Blob, &name, &sha, "100644").unwrap();
            prop_assert_eq!(child.depth(), tree.depth() + 1);
            prop_assert_eq!(child.parent().unwrap(), tree);
        }

        /// Property: every segment of a path is an ancestor tree of it
        #[test]
        fn segments_are_ancestors(path in relative_path()) {
            let blob = PathAddress::blob("acme", "svc", "main", &path).unwrap();
            for level in 0..blob.depth().saturating_sub(1) {
                let segment = blob.segment_at_level(level).unwrap();
                prop_assert_eq!(segment.depth(), level + 1);
                let segment_path = segment.path().unwrap().to_string();
                let segment_prefix = format!("{}/", segment_path);
                prop_assert!(path.starts_with(&segment_prefix));
            }
        }

        /// Property: leading and trailing slashes don't change identity
        #[test]
        fn slashes_are_normalized(path in relative_path()) {
            let plain = PathAddress::blob("acme", "svc", "main", &path).unwrap();
            let slashed = PathAddress::blob("acme", "svc", "main", &format!("/{}/", path)).unwrap();
            prop_assert_eq!(plain.url(), slashed.url());
        }

        /// Property: relocation keeps the path and type, changes the target
        #[test]
        fn relocate_keeps_path(path in relative_path()) {
            let source = PathAddress::blob("acme", "templates", "main", &path).unwrap();
            let destination = source.relocate("acme", "svc", "develop").unwrap();
            prop_assert_eq!(destination.path(), source.path());
            prop_assert_eq!(destination.object_type(), ObjectType::Blob);
            prop_assert_eq!(destination.target_key(), "acme/svc/develop");
        }
    }

    // ============================================================================
    // Hashing
    // ============================================================================

    proptest! {
        /// Property: tree hashes don't depend on the order entries are given in
        #[test]
        fn tree_sha_is_order_independent(
            names in prop::collection::btree_set(segment(), 1..8),
            shas in prop::collection::vec(sha(), 8),
        ) {
            let entries: Vec<TreeEntry> = names
                .iter()
                .zip(shas.iter())
                .enumerate()
                .map(|(i, (name, sha))| {
                    if i % 3 == 0 {
                        TreeEntry::new("040000", name, sha, EntryKind::Tree)
                    } else {
                        TreeEntry::new("100644", name, sha, EntryKind::Blob)
                    }
                })
                .collect();
            let mut reversed = entries.clone();
            reversed.reverse();
            prop_assert_eq!(tree_sha(&entries).unwrap(), tree_sha(&reversed).unwrap());
        }

        /// Property: blob hashes are 40 lowercase hex characters
        #[test]
        fn blob_sha_is_lowercase_hex(content in prop::collection::vec(any::<u8>(), 0..256)) {
            let sha = blob_sha(&content);
            prop_assert_eq!(sha.len(), 40);
            prop_assert!(sha.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
            prop_assert!(same_sha(&sha, &sha.to_uppercase()));
        }
    }

    // ============================================================================
    // encode_url_path
    // ============================================================================

    proptest! {
        /// Property: encode_url_path never produces filesystem-unsafe characters
        #[test]
        fn encode_url_path_never_produces_unsafe_chars(input in ".*") {
            let result = encode_url_path(&input);
            let unsafe_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
            for ch in unsafe_chars {
                prop_assert!(
                    !result.contains(ch),
                    "encode_url_path produced unsafe character '{}' from input '{}'",
                    ch,
                    input
                );
            }
        }

        /// Property: encode_url_path replaces characters one for one
        #[test]
        fn encode_url_path_preserves_char_count(input in ".+") {
            let result = encode_url_path(&input);
            prop_assert_eq!(result.chars().count(), input.chars().count());
        }
    }
}
