//! Property tests: parsers are total and deterministic.

mod common;

use hacore_parse::{
    parse_cluster_config, parse_cluster_status, parse_inventory, parse_storage_config,
    parse_storage_status,
};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_storage_status_deterministic(text in "[a-z0-9:. \n-]{0,200}") {
        prop_assert_eq!(parse_storage_status(&text), parse_storage_status(&text));
    }

    #[test]
    fn prop_storage_config_total(text in "[a-z0-9{};/ \n#]{0,200}") {
        let a = parse_storage_config(&text);
        let b = parse_storage_config(&text);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_xml_parsers_total(text in "\\PC{0,200}") {
        let status = parse_cluster_status(&text);
        let config = parse_cluster_config(&text);
        prop_assert_eq!(&status, &parse_cluster_status(&text));
        prop_assert_eq!(&config, &parse_cluster_config(&text));
    }

    #[test]
    fn prop_truncated_fixture_never_panics(cut in 0usize..common::CIB.len()) {
        let parsed = parse_cluster_config(&common::CIB[..cut]);
        // Truncation always breaks the document before the closing tag.
        prop_assert!(!parsed.unparsed.is_empty());
    }

    #[test]
    fn prop_inventory_deterministic(net in "[a-z0-9:./ \n]{0,120}", block in "[A-Z=\" 0-9a-z\n]{0,120}") {
        prop_assert_eq!(parse_inventory(&net, &block), parse_inventory(&net, &block));
    }
}

#[test]
fn test_reordered_output_same_ids() {
    let a = "r0 role:Primary\n  node2 role:Secondary\nr1 role:Secondary\n";
    let b = "r1 role:Secondary\nr0 role:Primary\n  node2 role:Secondary\n";
    let mut ids_a: Vec<_> = parse_storage_status(a).value.volumes.into_iter().map(|v| v.id).collect();
    let mut ids_b: Vec<_> = parse_storage_status(b).value.volumes.into_iter().map(|v| v.id).collect();
    ids_a.sort();
    ids_b.sort();
    assert_eq!(ids_a, ids_b);
}
