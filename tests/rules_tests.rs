//! Integration tests for rule enforcement
//!
//! Rules gate version creation during materialization: a rejected write is
//! still a durable log entry, but no node's store advances for it, and the
//! writer that is still waiting gets the rejection synchronously.

mod test_utils;

use bytes::Bytes;
use relica::node::RegistryError;
use relica::store::types::{ArtifactType, RuleType};
use test_utils::{retry, start_cluster, WAIT};

#[tokio::test]
async fn test_validity_rejection_reaches_the_writer() {
    let (_log, nodes) = start_cluster(1).await;
    let node = &nodes[0];

    node.set_global_rule(RuleType::Validity, "SYNTAX_ONLY")
        .await
        .unwrap()
        .wait(WAIT)
        .await
        .unwrap();

    let result = node
        .create_artifact(
            Some("invalid".to_string()),
            ArtifactType::Json,
            Bytes::from_static(b"this is not json"),
        )
        .await
        .unwrap()
        .wait(WAIT)
        .await;

    match result {
        Err(RegistryError::Rule(violation)) => {
            assert_eq!(violation.rule_type, RuleType::Validity);
        }
        other => panic!("expected rule violation, got {:?}", other.map(|_| ())),
    }

    // The rejected create never became visible
    assert!(node.get_artifact_metadata("invalid").is_err());
    assert!(node.list_artifacts().is_empty());

    // A valid create on the same id still works afterwards
    node.create_artifact(
        Some("invalid".to_string()),
        ArtifactType::Json,
        Bytes::from_static(b"{\"ok\":true}"),
    )
    .await
    .unwrap()
    .wait_metadata(WAIT)
    .await
    .unwrap();

    for node in nodes {
        node.shutdown().await;
    }
}

#[tokio::test]
async fn test_rejected_version_never_advances_any_node() {
    let (log, nodes) = start_cluster(2).await;
    let node1 = &nodes[0];
    let node2 = &nodes[1];

    node1
        .set_global_rule(RuleType::Validity, "SYNTAX_ONLY")
        .await
        .unwrap()
        .wait(WAIT)
        .await
        .unwrap();

    node1
        .create_artifact(
            Some("gated".to_string()),
            ArtifactType::Json,
            Bytes::from_static(b"{\"v\":1}"),
        )
        .await
        .unwrap()
        .wait_metadata(WAIT)
        .await
        .unwrap();

    let rejected = node1
        .add_version("gated", Bytes::from_static(b"{broken"))
        .await
        .unwrap();
    let rejected_position = rejected.position();
    assert!(rejected.wait(WAIT).await.is_err());

    // The entry is durably recorded as a no-op tombstone
    use relica::log::EntryLog;
    assert!(log.head().await.unwrap() >= rejected_position);

    // Version 2 is accepted after the bad one; numbering stays contiguous
    node1
        .add_version("gated", Bytes::from_static(b"{\"v\":2}"))
        .await
        .unwrap()
        .wait_metadata(WAIT)
        .await
        .unwrap();

    for node in [node1, node2] {
        retry(|| {
            let versions = node.list_versions("gated").map_err(|e| e.to_string())?;
            if versions == vec![1, 2] {
                Ok(())
            } else {
                Err(format!("versions {:?}", versions))
            }
        })
        .await;
    }

    for node in nodes {
        node.shutdown().await;
    }
}

#[tokio::test]
async fn test_artifact_rule_shadows_global_rule() {
    let (_log, nodes) = start_cluster(1).await;
    let node = &nodes[0];

    node.set_global_rule(RuleType::Validity, "SYNTAX_ONLY")
        .await
        .unwrap()
        .wait(WAIT)
        .await
        .unwrap();

    for id in ["shadowed", "unshadowed"] {
        node.create_artifact(
            Some(id.to_string()),
            ArtifactType::Json,
            Bytes::from_static(b"{\"v\":1}"),
        )
        .await
        .unwrap()
        .wait_metadata(WAIT)
        .await
        .unwrap();
    }

    // The artifact-scoped NONE rule disables the global syntax check here
    node.set_rule("shadowed", RuleType::Validity, "NONE")
        .await
        .unwrap()
        .wait(WAIT)
        .await
        .unwrap();

    node.add_version("shadowed", Bytes::from_static(b"not json at all"))
        .await
        .unwrap()
        .wait_metadata(WAIT)
        .await
        .unwrap();

    let result = node
        .add_version("unshadowed", Bytes::from_static(b"not json at all"))
        .await
        .unwrap()
        .wait(WAIT)
        .await;
    assert!(matches!(result, Err(RegistryError::Rule(_))));

    // Deleting the artifact rule reverts to the global rule
    node.delete_rule("shadowed", RuleType::Validity)
        .await
        .unwrap()
        .wait(WAIT)
        .await
        .unwrap();

    let result = node
        .add_version("shadowed", Bytes::from_static(b"still not json"))
        .await
        .unwrap()
        .wait(WAIT)
        .await;
    assert!(matches!(result, Err(RegistryError::Rule(_))));
    assert_eq!(node.list_versions("shadowed").unwrap(), vec![1, 2]);

    for node in nodes {
        node.shutdown().await;
    }
}

#[tokio::test]
async fn test_compatibility_rule_compares_history() {
    let (_log, nodes) = start_cluster(1).await;
    let node = &nodes[0];

    node.create_artifact(
        Some("compat".to_string()),
        ArtifactType::Json,
        Bytes::from_static(b"{\"a\":1}"),
    )
    .await
    .unwrap()
    .wait_metadata(WAIT)
    .await
    .unwrap();

    node.set_rule("compat", RuleType::Compatibility, "BACKWARD")
        .await
        .unwrap()
        .wait(WAIT)
        .await
        .unwrap();

    // Keeping existing fields is backward compatible
    node.add_version("compat", Bytes::from_static(b"{\"a\":1,\"b\":2}"))
        .await
        .unwrap()
        .wait_metadata(WAIT)
        .await
        .unwrap();

    // Dropping a field is not
    let result = node
        .add_version("compat", Bytes::from_static(b"{\"b\":2}"))
        .await
        .unwrap()
        .wait(WAIT)
        .await;
    match result {
        Err(RegistryError::Rule(violation)) => {
            assert_eq!(violation.rule_type, RuleType::Compatibility);
            assert!(violation.reason.contains("\"a\""));
        }
        other => panic!("expected rule violation, got {:?}", other.map(|_| ())),
    }

    assert_eq!(node.list_versions("compat").unwrap(), vec![1, 2]);

    for node in nodes {
        node.shutdown().await;
    }
}

#[tokio::test]
async fn test_duplicate_rule_conflicts() {
    let (_log, nodes) = start_cluster(1).await;
    let node = &nodes[0];

    node.create_artifact(
        Some("ruled".to_string()),
        ArtifactType::Json,
        Bytes::from_static(b"{}"),
    )
    .await
    .unwrap()
    .wait_metadata(WAIT)
    .await
    .unwrap();

    node.set_rule("ruled", RuleType::Validity, "FULL")
        .await
        .unwrap()
        .wait(WAIT)
        .await
        .unwrap();

    let result = node
        .set_rule("ruled", RuleType::Validity, "NONE")
        .await
        .unwrap()
        .wait(WAIT)
        .await;
    assert!(matches!(
        result,
        Err(RegistryError::Store(relica::store::StoreError::RuleExists { .. }))
    ));

    // The original config is untouched
    assert_eq!(
        node.get_rule("ruled", RuleType::Validity).unwrap().config,
        "FULL"
    );

    // Rules for a missing artifact are conflicts too, not silent no-ops
    let result = node
        .set_rule("ghost", RuleType::Validity, "FULL")
        .await
        .unwrap()
        .wait(WAIT)
        .await;
    assert!(matches!(
        result,
        Err(RegistryError::Store(relica::store::StoreError::ArtifactNotFound { .. }))
    ));

    for node in nodes {
        node.shutdown().await;
    }
}
