//! Provisioning behavior against a registry with pre-existing state.

use std::sync::Arc;

use flotilla_core::{ProvisionOutcome, Provisioner};
use flotilla_sim::InMemoryRegistry;

#[tokio::test]
async fn test_existing_device_is_recovered_via_fetch() {
    let registry = Arc::new(
        InMemoryRegistry::builder()
            .with_existing(&["tdevice5"])
            .build(),
    );
    let provisioner = Provisioner::new(registry.clone());

    let (members, report) = provisioner.provision("tdevice", 6).await;

    assert_eq!(report.created, 5);
    assert_eq!(report.recovered, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(members[5].outcome, ProvisionOutcome::Recovered);
    // Exactly one fetch: the create that hit AlreadyExists fell back once.
    assert_eq!(registry.fetch_calls(), 1);
    assert_eq!(registry.create_calls(), 6);
}

#[tokio::test]
async fn test_second_pass_recovers_entire_fleet() {
    let registry = Arc::new(InMemoryRegistry::new());
    let provisioner = Provisioner::new(registry.clone());

    let (first, first_report) = provisioner.provision("dev", 8).await;
    assert_eq!(first_report.created, 8);

    let (second, second_report) = provisioner.provision("dev", 8).await;
    assert_eq!(second_report.recovered, 8);
    assert_eq!(second_report.created, 0);

    // Same identity set, same credential material.
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(
            a.identity.as_ref().unwrap().primary_key,
            b.identity.as_ref().unwrap().primary_key
        );
    }
}

#[tokio::test]
async fn test_create_failure_marks_member_unusable_only() {
    let registry = Arc::new(
        InMemoryRegistry::builder()
            .fail_create_for("dev2")
            .build(),
    );
    let provisioner = Provisioner::new(registry.clone());

    let (members, report) = provisioner.provision("dev", 5).await;
    assert_eq!(report.created, 4);
    assert_eq!(report.failed, 1);
    assert!(!members[2].is_usable());
    assert!(
        matches!(&members[2].outcome, ProvisionOutcome::Failed { reason } if reason.contains("dev2"))
    );
    assert_eq!(members.iter().filter(|m| m.is_usable()).count(), 4);
}

#[tokio::test]
async fn test_fetch_failure_after_already_exists_is_reported() {
    let registry = Arc::new(
        InMemoryRegistry::builder()
            .with_existing(&["dev0"])
            .fail_fetch_for("dev0")
            .build(),
    );
    let provisioner = Provisioner::new(registry);

    let (members, report) = provisioner.provision("dev", 1).await;
    assert_eq!(report.failed, 1);
    assert!(!members[0].is_usable());
}
