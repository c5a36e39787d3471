//! End-to-end ledger behavior through the mesh facade: genesis, chaining,
//! tamper detection, and Alpha Ceiling enforcement events.

use epochmesh::core::canon::canonical_sha256_without;
use epochmesh::core::config::MeshConfig;
use epochmesh::core::ledger::Ledger;
use epochmesh::core::seal::AlphaCeiling;
use epochmesh::mesh::Mesh;
use serde_json::json;

fn config(root: &std::path::Path) -> MeshConfig {
    MeshConfig {
        root: root.to_path_buf(),
        seed: Some(1),
        ..Default::default()
    }
}

#[test]
fn test_init_writes_single_genesis_without_prev() {
    let tmp = tempfile::tempdir().unwrap();
    let mesh = Mesh::open(config(tmp.path())).unwrap();
    let events = mesh.ledger.iter_events().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "genesis");
    assert!(events[0].prev.is_none());

    // Reopen does not add a second genesis.
    drop(mesh);
    let mesh = Mesh::open(config(tmp.path())).unwrap();
    assert_eq!(mesh.ledger.iter_events().unwrap().len(), 1);
}

#[test]
fn test_every_event_links_to_predecessor() {
    let tmp = tempfile::tempdir().unwrap();
    let mesh = Mesh::open(config(tmp.path())).unwrap();
    mesh.track_event("cpu_load", json!(0.42)).unwrap();
    mesh.registry.register("drip-01", vec![]).unwrap();
    mesh.track_event("cpu_load", json!(0.55)).unwrap();

    let events = mesh.ledger.iter_events().unwrap();
    assert_eq!(events.len(), 4);
    for pair in events.windows(2) {
        assert_eq!(pair[1].prev.as_deref(), Some(pair[0].line_sha.as_str()));
    }
    let report = mesh.ledger.verify().unwrap();
    assert!(report.ok);
    assert_eq!(report.events_checked, 4);
}

#[test]
fn test_line_sha_is_canonical_hash_without_itself() {
    let tmp = tempfile::tempdir().unwrap();
    let mesh = Mesh::open(config(tmp.path())).unwrap();
    mesh.track_event("marker", json!(1)).unwrap();
    for event in mesh.ledger.iter_events().unwrap() {
        assert_eq!(
            event.line_sha,
            canonical_sha256_without(&event.record, "line_sha")
        );
    }
}

#[test]
fn test_tampering_reported_at_first_bad_offset() {
    let tmp = tempfile::tempdir().unwrap();
    let ledger_path = {
        let mesh = Mesh::open(config(tmp.path())).unwrap();
        mesh.track_event("a", json!(1)).unwrap();
        mesh.track_event("b", json!(2)).unwrap();
        mesh.store.ledger_path()
    };

    // Flip a payload byte in the middle record.
    let content = std::fs::read_to_string(&ledger_path).unwrap();
    let tampered = content.replacen("\"value\":1", "\"value\":9", 1);
    assert_ne!(content, tampered);
    std::fs::write(&ledger_path, tampered).unwrap();

    let ledger = Ledger::open(&ledger_path).unwrap();
    let report = ledger.verify().unwrap();
    assert!(!report.ok);
    assert_eq!(report.first_bad_offset, Some(1));
    assert!(report.reason.unwrap().starts_with("line_hash_mismatch"));
}

#[test]
fn test_deleting_a_line_breaks_the_chain() {
    let tmp = tempfile::tempdir().unwrap();
    let ledger_path = {
        let mesh = Mesh::open(config(tmp.path())).unwrap();
        mesh.track_event("a", json!(1)).unwrap();
        mesh.track_event("b", json!(2)).unwrap();
        mesh.store.ledger_path()
    };

    let content = std::fs::read_to_string(&ledger_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    let pruned = format!("{}\n{}\n", lines[0], lines[2]);
    std::fs::write(&ledger_path, pruned).unwrap();

    let report = Ledger::open(&ledger_path).unwrap().verify().unwrap();
    assert!(!report.ok);
    assert_eq!(report.first_bad_offset, Some(1));
    assert!(report.reason.unwrap().starts_with("chain_break"));
}

#[test]
fn test_alpha_ceiling_logs_only_when_capping() {
    let tmp = tempfile::tempdir().unwrap();
    let mesh = Mesh::open(config(tmp.path())).unwrap();
    let ceiling = AlphaCeiling::new(100);

    assert_eq!(ceiling.enforce(&mesh.ledger, 70, None).unwrap(), 70);
    let before = mesh.ledger.iter_events().unwrap().len();

    assert_eq!(ceiling.enforce(&mesh.ledger, 250, None).unwrap(), 100);
    let events = mesh.ledger.iter_events().unwrap();
    assert_eq!(events.len(), before + 1);
    let capped = events.last().unwrap();
    assert_eq!(capped.event, "alpha_ceiling_enforced");
    assert_eq!(capped.record["original_value"], 250);
    assert_eq!(capped.record["capped_value"], 100);
}

#[test]
fn test_seal_service_witnesses_payloads() {
    let tmp = tempfile::tempdir().unwrap();
    let mesh = Mesh::open(config(tmp.path())).unwrap();
    let seal = mesh.seals.seal("manifest", b"release payload").unwrap();
    assert!(mesh.seals.verify(&seal, b"release payload"));
    assert!(!mesh.seals.verify(&seal, b"tampered payload"));
    assert!(mesh.store.seals_dir().join(&seal.file_ref).exists());
}
