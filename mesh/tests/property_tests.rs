//! Property-based suites over namespaces and manifest round-trips.

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use std::path::PathBuf;

use dork_mesh::{
    normalize_namespace, read_manifest, resolve_namespace, write_manifest, AgentManifest,
};

proptest! {
    /// Normalisation is idempotent: normalising a normalised namespace
    /// changes nothing.
    #[test]
    fn normalization_is_idempotent(raw in ".{0,80}") {
        let once = normalize_namespace(&raw);
        let twice = normalize_namespace(&once);
        prop_assert_eq!(once, twice);
    }

    /// Normalised output stays inside the `[a-z0-9-]` alphabet with no
    /// leading, trailing, or doubled dashes.
    #[test]
    fn normalization_output_alphabet(raw in ".{0,80}") {
        let normalized = normalize_namespace(&raw);
        prop_assert!(normalized
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
        prop_assert!(!normalized.starts_with('-'));
        prop_assert!(!normalized.ends_with('-'));
        prop_assert!(!normalized.contains("--"));
    }

    /// Feeding a resolved namespace back as the manifest namespace
    /// resolves to the same value.
    #[test]
    fn resolution_is_idempotent(segment in "[A-Za-z0-9 _]{1,20}") {
        prop_assume!(!normalize_namespace(&segment).is_empty());
        let root = PathBuf::from("/scan");
        let project = root.join(&segment).join("project");

        let first = resolve_namespace(&project, &root, None).unwrap();
        let second = resolve_namespace(&project, &root, Some(&first)).unwrap();
        prop_assert_eq!(first, second);
    }
}

#[tokio::test]
async fn manifest_round_trips_for_arbitrary_contents() {
    // Round-trip a spread of manifests through disk, including unknown
    // fields and unicode labels.
    let dir = tempfile::tempdir().unwrap();
    for (index, name) in ["plain", "with space", "ünïcødé", "x"].iter().enumerate() {
        let project = dir.path().join(format!("p{index}"));
        std::fs::create_dir_all(&project).unwrap();

        let mut manifest = AgentManifest::new(*name, "claude-code");
        manifest.capabilities = vec!["code".to_string(), format!("cap-{index}")];
        manifest
            .extra
            .insert("vendor".to_string(), serde_json::json!({"round": index}));

        write_manifest(&project, &manifest).await.unwrap();
        let read = read_manifest(&project).await.unwrap();
        assert_eq!(read, manifest);
    }
}
