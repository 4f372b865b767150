//! Property tests for identifiers and shard sets.

use std::collections::BTreeSet;

use proptest::prelude::*;
use serde_json::json;

use crate::{Identifier, KEYED_ALPHABET, KeyedShards, NamespaceKind, RangeShards, ShardSet};

// ============================================================================
// Test Helpers
// ============================================================================

fn assert_partition(shards: &KeyedShards) {
    let mut seen = BTreeSet::new();
    for shard in shards.shards() {
        assert!(!shard.is_empty(), "empty shard in {:?}", shards.to_strings());
        for c in shard {
            assert!(seen.insert(*c), "{c} held twice in {:?}", shards.to_strings());
        }
    }
    assert_eq!(seen, KEYED_ALPHABET.chars().collect::<BTreeSet<_>>());
}

fn alphabet_subset() -> impl Strategy<Value = String> {
    prop::collection::btree_set(prop::sample::select(KEYED_ALPHABET.chars().collect::<Vec<_>>()), 1..8)
        .prop_map(|chars| chars.into_iter().collect())
}

fn split_points() -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[a-z0-9_]{1,6}", 0..8).prop_map(|splits| splits.into_iter().collect())
}

// ============================================================================
// Identifiers
// ============================================================================

proptest! {
    #[test]
    fn identifier_text_round_trips(bits in any::<u128>()) {
        let id = Identifier::from_uuid(uuid::Uuid::from_u128(bits));
        let text = id.to_string();
        prop_assert_eq!(text.len(), Identifier::TEXT_LEN);
        prop_assert_eq!(Identifier::parse(&text).unwrap(), id);
    }

    #[test]
    fn identifier_rejects_other_lengths(text in "[0-9a-f-]{0,35}|[0-9a-f-]{37,40}") {
        prop_assert!(Identifier::parse(&text).is_err());
    }
}

// ============================================================================
// Keyed shards
// ============================================================================

proptest! {
    #[test]
    fn keyed_add_shard_preserves_partition(subsets in prop::collection::vec(alphabet_subset(), 1..10)) {
        let mut shards = KeyedShards::whole();
        for subset in &subsets {
            shards.add_shard(subset).unwrap();
            assert_partition(&shards);
        }
        let last: BTreeSet<char> = subsets.last().unwrap().chars().collect();
        prop_assert_eq!(shards.shards().last().unwrap(), &last);
    }

    #[test]
    fn keyed_remove_shard_preserves_partition(
        subsets in prop::collection::vec(alphabet_subset(), 1..10),
        picks in prop::collection::vec(any::<prop::sample::Index>(), 1..10),
    ) {
        let mut shards = KeyedShards::whole();
        for subset in &subsets {
            shards.add_shard(subset).unwrap();
        }
        for pick in picks {
            if shards.shards().len() == 1 {
                break;
            }
            let victim = shards.to_strings()[pick.index(shards.shards().len())].clone();
            shards.remove_shard(&victim).unwrap();
            assert_partition(&shards);
        }
    }

    #[test]
    fn keyed_wire_form_parses_back(subsets in prop::collection::vec(alphabet_subset(), 0..6)) {
        let mut shards = KeyedShards::whole();
        for subset in &subsets {
            shards.add_shard(subset).unwrap();
        }
        let parsed = ShardSet::parse(NamespaceKind::Keyed, &json!(shards.to_strings())).unwrap();
        prop_assert_eq!(parsed, ShardSet::Keyed(shards));
    }
}

// ============================================================================
// Range shards
// ============================================================================

proptest! {
    #[test]
    fn range_serialization_is_idempotent(splits in split_points()) {
        let shards = RangeShards::new(splits).unwrap();
        let once = shards.to_strings();
        let parsed = RangeShards::parse(&once).unwrap();
        prop_assert_eq!(&parsed, &shards);
        prop_assert_eq!(parsed.to_strings(), once);
    }

    #[test]
    fn range_splits_stay_strictly_increasing(adds in prop::collection::vec("[a-z]{1,4}", 1..12)) {
        let mut shards = RangeShards::default();
        for split in &adds {
            let had = shards.splits().contains(split);
            prop_assert_eq!(shards.add_split(split).is_err(), had);
        }
        prop_assert!(shards.splits().windows(2).all(|pair| pair[0] < pair[1]));
    }
}
