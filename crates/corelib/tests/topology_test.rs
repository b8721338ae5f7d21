//! Tests for topology loading and node identity construction.
//!
//! # Test Strategy
//!
//! 1. **Basic loading**: comments, blank lines, whitespace, ordering
//! 2. **Rejections**: duplicate IDs, duplicate addresses, unparseable lines
//! 3. **Node identity**: snapshotting, message-ID seeding
//! 4. **Properties**: accepted topologies never hold duplicates

use std::collections::HashSet;
use std::io::Write;

use corelib::{ConfigError, MessageId, NodeId, NodeIdentity, Topology};
use proptest::prelude::*;

const CLUSTER_CONF: &str = "\
# cluster configuration
# id, address

1, tcp://127.0.0.1:5001
2, tcp://127.0.0.1:5002
3 ,tcp://127.0.0.1:5003
";

// ============================================================================
// Basic Loading Tests
// ============================================================================

#[test]
fn test_load_skips_comments_and_blanks() {
    // Comment and blank lines contribute nothing; three pairs remain
    let topology = Topology::parse(CLUSTER_CONF).unwrap();

    assert_eq!(topology.len(), 3);
    assert_eq!(topology.ids(), &[NodeId(1), NodeId(2), NodeId(3)]);
    assert_eq!(topology.address(NodeId(3)), Some("tcp://127.0.0.1:5003"));
}

#[test]
fn test_load_preserves_file_order() {
    // IDs come back in the order they were written, not sorted
    let topology = Topology::parse("9, c\n2, a\n5, b\n").unwrap();
    assert_eq!(topology.ids(), &[NodeId(9), NodeId(2), NodeId(5)]);

    let pairs: Vec<_> = topology.iter().collect();
    assert_eq!(pairs, vec![(NodeId(9), "c"), (NodeId(2), "a"), (NodeId(5), "b")]);
}

#[test]
fn test_empty_source() {
    // A file of only comments is a valid, empty topology
    let topology = Topology::parse("# nothing here\n\n").unwrap();
    assert!(topology.is_empty());
}

#[test]
fn test_from_file() {
    // Loading from disk goes through the same parser
    let path = std::env::temp_dir().join(format!("fabric-topology-{}.txt", std::process::id()));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(CLUSTER_CONF.as_bytes()).unwrap();
    drop(file);

    let topology = Topology::from_file(&path).unwrap();
    assert_eq!(topology.len(), 3);

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn test_missing_file() {
    // An unreadable source is an I/O error with its own exit code
    let err = Topology::from_file("/definitely/not/here/clusterconf.txt").unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
    assert_eq!(err.exit_code(), 4);
}

// ============================================================================
// Rejection Tests
// ============================================================================

#[test]
fn test_duplicate_id_rejected() {
    // Second use of ID 2 aborts the load
    let err = Topology::parse("1, a\n2, b\n2, c\n").unwrap_err();
    assert_eq!(err, ConfigError::DuplicateId { id: NodeId(2) });
    assert_eq!(err.exit_code(), 1);
}

#[test]
fn test_duplicate_id_stops_before_later_lines() {
    // The garbage line after the duplicate is never looked at, otherwise
    // the error would be Unparseable
    let err = Topology::parse("1, a\n1, b\nnot a pair\n").unwrap_err();
    assert_eq!(err, ConfigError::DuplicateId { id: NodeId(1) });
}

#[test]
fn test_duplicate_address_rejected() {
    // Different IDs may not share an address
    let err = Topology::parse("1, tcp://h:1\n2, tcp://h:1\n").unwrap_err();
    assert_eq!(
        err,
        ConfigError::DuplicateAddress {
            address: "tcp://h:1".into(),
            existing: NodeId(1),
        }
    );
    assert_eq!(err.exit_code(), 2);
}

#[test]
fn test_duplicate_address_detected_after_trimming() {
    // Surrounding whitespace does not make two addresses distinct
    let err = Topology::parse("1, tcp://h:1\n2,    tcp://h:1   \n").unwrap_err();
    assert!(matches!(err, ConfigError::DuplicateAddress { .. }));
}

#[test]
fn test_unparseable_line_reports_line_number() {
    // Line numbers are 1-based and count comments and blanks
    let err = Topology::parse("# c\n1, a\n\nbogus\n").unwrap_err();
    match err {
        ConfigError::Unparseable { line, .. } => assert_eq!(line, 4),
        other => panic!("expected Unparseable, got {other:?}"),
    }
}

// ============================================================================
// Node Identity Tests
// ============================================================================

#[test]
fn test_node_identity_snapshot() {
    // Each node sees every other node as a peer
    let topology = Topology::parse(CLUSTER_CONF).unwrap();

    for id in topology.ids() {
        let node = NodeIdentity::new(*id, &topology).unwrap();
        assert_eq!(node.peers().len(), topology.len() - 1);
        assert!(!node.peers().contains(id));
        assert_eq!(node.address(), topology.address(*id).unwrap());
    }
}

#[test]
fn test_message_id_seed_and_increment() {
    // Node 5 starts at 5000 and increments by one per originated envelope
    let topology = Topology::parse("5, a\n6, b\n").unwrap();
    let mut node = NodeIdentity::new(NodeId(5), &topology).unwrap();
    assert_eq!(node.next_message_id(), MessageId(5000));

    node.envelope(NodeId(6), "hello");
    assert_eq!(node.next_message_id(), MessageId(5001));
}

// ============================================================================
// Property Tests
// ============================================================================

fn render(entries: &[(i32, String)]) -> String {
    entries
        .iter()
        .map(|(id, addr)| format!("{id}, {addr}\n"))
        .collect()
}

proptest! {
    #[test]
    fn prop_accepted_topology_has_no_duplicates(
        entries in prop::collection::vec((0i32..50, "[a-d]{1,2}"), 0..20)
    ) {
        let source = render(&entries);
        if let Ok(topology) = Topology::parse(&source) {
            let ids: HashSet<_> = topology.ids().iter().collect();
            let addrs: HashSet<_> = topology.iter().map(|(_, a)| a).collect();
            prop_assert_eq!(ids.len(), entries.len());
            prop_assert_eq!(addrs.len(), entries.len());
            prop_assert_eq!(topology.len(), entries.len());
        }
    }

    #[test]
    fn prop_unique_entries_always_load(ids in prop::collection::hash_set(0i32..10_000, 0..30)) {
        let entries: Vec<_> = ids
            .iter()
            .map(|id| (*id, format!("tcp://127.0.0.1:{}", 20_000 + id)))
            .collect();
        let topology = Topology::parse(&render(&entries)).unwrap();
        prop_assert_eq!(topology.len(), entries.len());
    }
}
