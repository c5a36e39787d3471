//! Segment pipeline scenarios: chained capsules, seeded reproducibility,
//! aggregation capsules, full verification, and tamper detection.

use epochmesh::core::canon::sha256_hex_str;
use epochmesh::core::cas::Cas;
use epochmesh::core::config::MeshConfig;
use epochmesh::core::merkle::merkle_root_hex;
use epochmesh::mesh::segment::{self, MerkleRecord};
use epochmesh::mesh::Mesh;

fn mesh_with_seed(root: &std::path::Path, seed: u64) -> Mesh {
    Mesh::open(MeshConfig {
        root: root.to_path_buf(),
        seed: Some(seed),
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn test_two_segment_chain_links_and_verifies() {
    let tmp = tempfile::tempdir().unwrap();
    let mesh = mesh_with_seed(tmp.path(), 42);

    let first = mesh.segments.run_segment("settle").unwrap();
    let second = mesh.segments.run_segment("settle").unwrap();
    assert_eq!(first.seg, 1);
    assert_eq!(second.seg, 2);
    assert_ne!(first.capsule_sha, second.capsule_sha);

    let state = mesh.segments.load_chain_state().unwrap();
    assert_eq!(
        state.segments[1].chain,
        sha256_hex_str(&format!(
            "{}{}",
            state.segments[0].chain, state.segments[1].sha
        ))
    );
    assert_eq!(state.last, state.segments[1].chain);

    let report = segment::verify_mesh(&mesh.store, &mesh.ledger).unwrap();
    assert!(report.ok, "{:?}", report.checks);
}

#[test]
fn test_fixed_seed_reproduces_segment_artifacts() {
    let tmp_a = tempfile::tempdir().unwrap();
    let tmp_b = tempfile::tempdir().unwrap();
    let a = mesh_with_seed(tmp_a.path(), 7)
        .segments
        .run_segment("settle")
        .unwrap();
    let b = mesh_with_seed(tmp_b.path(), 7)
        .segments
        .run_segment("settle")
        .unwrap();
    // Exec and SLA content matches, so the Merkle root matches. Capsule ids
    // and timestamps differ by design.
    assert_eq!(a.merkle_root, b.merkle_root);
    assert_eq!(a.ok, b.ok);
    assert_eq!(a.p95_ms, b.p95_ms);
    assert_ne!(a.capsule_id, b.capsule_id);
}

#[test]
fn test_merkle_root_recomputable_from_cas_alone() {
    let tmp = tempfile::tempdir().unwrap();
    let mesh = mesh_with_seed(tmp.path(), 5);
    let outcome = mesh.segments.run_segment("execute").unwrap();

    let cas = Cas::open(mesh.store.cas_dir()).unwrap();
    let record: MerkleRecord = serde_json::from_slice(
        &std::fs::read(tmp.path().join("segment_1_merkle.json")).unwrap(),
    )
    .unwrap();
    for sha in &record.files {
        assert!(cas.has(sha));
    }
    assert_eq!(merkle_root_hex(&record.files).unwrap(), outcome.merkle_root);
}

#[test]
fn test_super_and_hyper_meta_commit_to_ledger() {
    let tmp = tempfile::tempdir().unwrap();
    let mesh = mesh_with_seed(tmp.path(), 9);
    mesh.segments.run_segment("settle").unwrap();
    mesh.segments.run_segment("settle").unwrap();

    let super_meta = mesh.segments.build_super_meta().unwrap();
    assert!(super_meta.capsule_id.starts_with("EPOCHCORE-SUPER-"));
    let hyper = mesh.segments.build_hyper_meta(&segment::SUB_MESHES).unwrap();
    assert!(hyper.capsule_id.starts_with("EPOCHCORE-HYPER-"));

    let events = mesh.ledger.iter_events().unwrap();
    assert_eq!(events.iter().filter(|e| e.event == "segment").count(), 2);
    assert_eq!(events.iter().filter(|e| e.event == "super-meta").count(), 1);
    assert_eq!(events.iter().filter(|e| e.event == "hyper-meta").count(), 1);

    let report = segment::verify_mesh(&mesh.store, &mesh.ledger).unwrap();
    assert!(report.ok, "{:?}", report.checks);
}

#[test]
fn test_super_meta_without_segments_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let mesh = mesh_with_seed(tmp.path(), 1);
    assert!(mesh.segments.build_super_meta().is_err());
    assert!(mesh.segments.build_hyper_meta(&segment::SUB_MESHES).is_err());
}

#[test]
fn test_chain_state_tampering_detected() {
    let tmp = tempfile::tempdir().unwrap();
    let mesh = mesh_with_seed(tmp.path(), 3);
    mesh.segments.run_segment("settle").unwrap();
    mesh.segments.run_segment("settle").unwrap();

    let path = mesh.store.chain_state_path();
    let mut state: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    // Swap one segment's capsule sha for another valid-looking hex digest.
    state["segments"][0]["sha"] = serde_json::json!(sha256_hex_str("forged"));
    std::fs::write(&path, serde_json::to_vec_pretty(&state).unwrap()).unwrap();

    let report = segment::verify_mesh(&mesh.store, &mesh.ledger).unwrap();
    assert!(!report.ok);
    let chain_check = report.checks.iter().find(|c| c.name == "chain").unwrap();
    assert!(!chain_check.ok);
}

#[test]
fn test_dot_output_names_every_segment() {
    let tmp = tempfile::tempdir().unwrap();
    let mesh = mesh_with_seed(tmp.path(), 2);
    mesh.segments.run_segment("settle").unwrap();
    mesh.segments.run_segment("settle").unwrap();

    let dot = mesh.segments.render_dot().unwrap();
    assert!(dot.starts_with("digraph mesh_chain"));
    assert!(dot.contains("genesis -> seg1"));
    assert!(dot.contains("seg1 -> seg2"));
}

#[test]
fn test_spend_accumulates_across_segments() {
    let tmp = tempfile::tempdir().unwrap();
    let mesh = mesh_with_seed(tmp.path(), 8);
    mesh.segments.run_segment("settle").unwrap();
    mesh.segments.run_segment("settle").unwrap();

    let read_sla = |seg: u32| -> serde_json::Value {
        serde_json::from_slice(
            &std::fs::read(tmp.path().join(format!("segment_{}_sla.json", seg))).unwrap(),
        )
        .unwrap()
    };
    let first = read_sla(1)["spent_to_date"].as_f64().unwrap();
    let second = read_sla(2)["spent_to_date"].as_f64().unwrap();
    assert!(first > 0.0);
    assert!(second > first);
}
