mod common;

use anyhow::Result;
use common::{instance, mirror, source, FakeContextFactory, FakeFetcher, FixedTenants, MemoryStatusStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use ods_admin_api::jobs::{JobContext, JobRunner, JobStatus, RefreshEducationOrganizationsJob, JOB_TYPE_KEY, TENANT_NAME_KEY};
use ods_admin_api::services::education_organization::{
    EducationOrganizationService, EducationOrganizationSnapshot, InstanceResult, SkipReason, SyncReport,
};

fn single_tenant(fetcher: Arc<FakeFetcher>, factory: FakeContextFactory) -> EducationOrganizationService {
    common::service(
        common::settings(),
        common::router(false, FixedTenants::new(&[])),
        fetcher,
        factory,
    )
}

fn result_for(report: &SyncReport, id: i32) -> InstanceResult {
    report
        .outcomes
        .iter()
        .find(|o| o.instance_id == id)
        .map(|o| o.result.clone())
        .unwrap_or_else(|| panic!("no outcome for instance {}", id))
}

#[tokio::test]
async fn one_instance_failing_does_not_stop_the_others() -> Result<()> {
    let fetcher = Arc::new(
        FakeFetcher::new()
            .with_snapshot("ods1", EducationOrganizationSnapshot::complete(vec![source(255901001, "Grand Bend High")]))
            .with_snapshot("ods3", EducationOrganizationSnapshot::complete(vec![source(255901002, "Grand Bend Middle")])),
    );
    let factory = FakeContextFactory::new()
        .with_instances(
            "default",
            vec![instance(1, "enc:ods1"), instance(2, "not-decryptable"), instance(3, "enc:ods3")],
        )
        .failing_on(3);
    let service = single_tenant(fetcher.clone(), factory.clone());

    let report = service.execute(None, None).await?;

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(
        result_for(&report, 1),
        InstanceResult::Synced {
            inserted: 1,
            updated: 0,
            deleted: 0
        }
    );
    assert_eq!(
        result_for(&report, 2),
        InstanceResult::Skipped {
            reason: SkipReason::DecryptionFailed
        }
    );
    assert!(matches!(result_for(&report, 3), InstanceResult::Failed { .. }));
    assert_eq!((report.synced(), report.skipped(), report.failed()), (1, 1, 1));

    assert_eq!(factory.mirror_ids("default", 1), vec![255901001]);
    assert!(factory.mirror_ids("default", 3).is_empty(), "failed instance must not commit");
    assert!(
        !fetcher.calls().contains(&"not-decryptable".to_string()),
        "skipped instance never reaches the ODS"
    );
    Ok(())
}

#[tokio::test]
async fn refresh_job_completes_when_one_instance_cannot_be_decrypted() -> Result<()> {
    let fetcher = Arc::new(
        FakeFetcher::new()
            .with_snapshot("ods1", EducationOrganizationSnapshot::complete(vec![source(1, "One"), source(2, "Two")]))
            .with_snapshot("ods3", EducationOrganizationSnapshot::complete(vec![source(30, "Thirty")])),
    );
    let factory = FakeContextFactory::new()
        .with_instances(
            "default",
            vec![instance(1, "enc:ods1"), instance(2, "garbage"), instance(3, "enc:ods3")],
        )
        .with_mirror("default", 1, vec![mirror(2, 1, "Two"), mirror(9, 1, "Closed")])
        .with_mirror("default", 2, vec![mirror(20, 2, "Untouched")])
        .with_mirror("default", 3, vec![mirror(31, 3, "Gone")]);
    let service = Arc::new(single_tenant(fetcher, factory.clone()));
    let store = MemoryStatusStore::new();
    let runner = JobRunner::new(Arc::new(RefreshEducationOrganizationsJob::new(service, false)), store.clone());

    let status = runner.execute(&JobContext::new("RefreshEducationOrganizations_default")).await;

    assert_eq!(status, JobStatus::Completed);
    assert_eq!(
        store.statuses_for("RefreshEducationOrganizations_default"),
        vec![JobStatus::InProgress, JobStatus::Completed]
    );
    assert_eq!(factory.mirror_ids("default", 1), vec![1, 2]);
    assert_eq!(factory.mirror_ids("default", 2), vec![20], "skipped instance keeps its mirror");
    assert_eq!(factory.mirror_ids("default", 3), vec![30]);
    Ok(())
}

#[tokio::test]
async fn mirror_matches_source_after_sync() -> Result<()> {
    let fetcher = Arc::new(FakeFetcher::new().with_snapshot(
        "ods1",
        EducationOrganizationSnapshot::complete(vec![source(2, "B renamed"), source(3, "C")]),
    ));
    let kept = mirror(2, 1, "B");
    let factory = FakeContextFactory::new()
        .with_instances("default", vec![instance(1, "enc:ods1")])
        .with_mirror("default", 1, vec![mirror(1, 1, "A"), kept.clone()]);
    let service = single_tenant(fetcher, factory.clone());

    let report = service.execute(None, None).await?;

    assert_eq!(
        result_for(&report, 1),
        InstanceResult::Synced {
            inserted: 1,
            updated: 1,
            deleted: 1
        }
    );
    assert_eq!(factory.mirror_ids("default", 1), vec![2, 3]);

    let updated = factory.mirror_row("default", 1, 2).expect("B survives");
    assert_eq!(updated.name_of_institution, "B renamed");
    assert_eq!(updated.external_row_id, kept.external_row_id);
    assert!(updated.last_refreshed > kept.last_refreshed);
    Ok(())
}

#[tokio::test]
async fn second_run_with_same_source_changes_nothing_but_timestamps() -> Result<()> {
    let fetcher = Arc::new(FakeFetcher::new().with_snapshot(
        "ods1",
        EducationOrganizationSnapshot::complete(vec![source(10, "Ten"), source(11, "Eleven")]),
    ));
    let factory = FakeContextFactory::new().with_instances("default", vec![instance(1, "enc:ods1")]);
    let service = single_tenant(fetcher, factory.clone());

    service.execute(None, None).await?;
    let report = service.execute(None, None).await?;

    assert_eq!(
        result_for(&report, 1),
        InstanceResult::Synced {
            inserted: 0,
            updated: 2,
            deleted: 0
        }
    );
    assert_eq!(factory.mirror_ids("default", 1), vec![10, 11]);
    Ok(())
}

#[tokio::test]
async fn partial_snapshot_keeps_rows_only_when_protection_is_on() -> Result<()> {
    let snapshot = EducationOrganizationSnapshot::partial(vec![source(2, "B")]);
    let existing = vec![mirror(1, 1, "A"), mirror(2, 1, "B")];

    let unprotected = FakeContextFactory::new()
        .with_instances("default", vec![instance(1, "enc:ods1")])
        .with_mirror("default", 1, existing.clone());
    single_tenant(
        Arc::new(FakeFetcher::new().with_snapshot("ods1", snapshot.clone())),
        unprotected.clone(),
    )
    .execute(None, None)
    .await?;
    assert_eq!(unprotected.mirror_ids("default", 1), vec![2]);

    let protected = FakeContextFactory::new()
        .with_instances("default", vec![instance(1, "enc:ods1")])
        .with_mirror("default", 1, existing);
    let mut settings = common::settings();
    settings.protect_partial_snapshots = true;
    common::service(
        settings,
        common::router(false, FixedTenants::new(&[])),
        Arc::new(FakeFetcher::new().with_snapshot("ods1", snapshot)),
        protected.clone(),
    )
    .execute(None, None)
    .await?;
    assert_eq!(protected.mirror_ids("default", 1), vec![1, 2]);
    Ok(())
}

#[tokio::test]
async fn multi_tenant_run_is_scoped_to_the_named_tenant() -> Result<()> {
    let factory = FakeContextFactory::new()
        .with_instances("tenant1", vec![instance(1, "enc:t1-ods1"), instance(2, "enc:t1-ods2")])
        .with_instances("tenant2", vec![instance(7, "enc:t2-ods7")]);
    let service = common::service(
        common::settings(),
        common::router(true, FixedTenants::new(&["tenant1", "tenant2"])),
        Arc::new(FakeFetcher::new()),
        factory.clone(),
    );

    let report = service.execute(Some("TENANT1"), None).await?;

    assert_eq!(report.outcomes.len(), 2);
    assert!(report.outcomes.iter().all(|o| o.tenant == "tenant1"));
    assert_eq!(
        factory.processed(),
        vec![("tenant1".to_string(), 1), ("tenant1".to_string(), 2)]
    );
    Ok(())
}

#[tokio::test]
async fn multi_tenant_run_without_filter_covers_every_tenant() -> Result<()> {
    let factory = FakeContextFactory::new()
        .with_instances("tenant1", vec![instance(1, "enc:t1-ods1")])
        .with_instances("tenant2", vec![instance(7, "enc:t2-ods7")]);
    let service = common::service(
        common::settings(),
        common::router(true, FixedTenants::new(&["tenant1", "tenant2"])),
        Arc::new(FakeFetcher::new()),
        factory.clone(),
    );

    let report = service.execute(None, None).await?;

    assert_eq!(report.synced(), 2);
    assert_eq!(
        factory.processed(),
        vec![("tenant1".to_string(), 1), ("tenant2".to_string(), 7)]
    );
    Ok(())
}

#[tokio::test]
async fn unknown_tenant_is_an_empty_run() -> Result<()> {
    let factory = FakeContextFactory::new().with_instances("tenant1", vec![instance(1, "enc:ods1")]);
    let service = common::service(
        common::settings(),
        common::router(true, FixedTenants::new(&["tenant1"])),
        Arc::new(FakeFetcher::new()),
        factory.clone(),
    );

    let report = service.execute(Some("nobody"), None).await?;

    assert!(report.outcomes.is_empty());
    assert!(factory.context_ids().is_empty());
    Ok(())
}

#[tokio::test]
async fn ad_hoc_job_targets_its_tenant_only() -> Result<()> {
    let factory = FakeContextFactory::new()
        .with_instances("tenant1", vec![instance(1, "enc:t1-ods1")])
        .with_instances("tenant2", vec![instance(7, "enc:t2-ods7")]);
    let service = Arc::new(common::service(
        common::settings(),
        common::router(true, FixedTenants::new(&["tenant1", "tenant2"])),
        Arc::new(FakeFetcher::new()),
        factory.clone(),
    ));
    let store = MemoryStatusStore::new();
    let runner = JobRunner::new(Arc::new(RefreshEducationOrganizationsJob::new(service, true)), store.clone());

    let ctx = JobContext::new("RefreshEducationOrganizations_tenant2")
        .with_data(TENANT_NAME_KEY, "tenant2")
        .with_data(JOB_TYPE_KEY, "AdHoc");
    assert_eq!(runner.execute(&ctx).await, JobStatus::Completed);
    assert_eq!(factory.processed(), vec![("tenant2".to_string(), 7)]);

    // Ad hoc with a blank tenant has nothing to do.
    let blank = JobContext::new("RefreshEducationOrganizations_default")
        .with_data(TENANT_NAME_KEY, "")
        .with_data(JOB_TYPE_KEY, "AdHoc");
    assert_eq!(runner.execute(&blank).await, JobStatus::Completed);
    assert_eq!(factory.processed().len(), 1);
    Ok(())
}

#[tokio::test]
async fn instance_filter_without_match_processes_nothing() -> Result<()> {
    let fetcher = Arc::new(FakeFetcher::new());
    let factory = FakeContextFactory::new().with_instances("default", vec![instance(1, "enc:ods1")]);
    let service = single_tenant(fetcher.clone(), factory.clone());

    let report = service.execute(None, Some(999)).await?;

    assert!(report.outcomes.is_empty());
    assert!(fetcher.calls().is_empty());
    assert!(factory.context_ids().is_empty());

    let report = service.execute(None, Some(1)).await?;
    assert_eq!(report.synced(), 1);
    Ok(())
}

#[tokio::test]
async fn unsupported_engine_fails_before_any_instance() -> Result<()> {
    let fetcher = Arc::new(FakeFetcher::new());
    let factory = FakeContextFactory::new().with_instances("default", vec![instance(1, "enc:ods1")]);
    let mut settings = common::settings();
    settings.database_engine = Some("InvalidEngine".to_string());
    let service = common::service(settings, common::router(false, FixedTenants::new(&[])), fetcher.clone(), factory.clone());

    let err = service.execute(None, None).await.expect_err("engine should be rejected");

    assert_eq!(
        err.to_string(),
        "Not supported DatabaseEngine \"InvalidEngine\". Supported engines: SqlServer, and PostgreSql."
    );
    assert!(fetcher.calls().is_empty());
    assert!(factory.processed().is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_encryption_key_fails_the_job() -> Result<()> {
    let factory = FakeContextFactory::new().with_instances("default", vec![instance(1, "enc:ods1")]);
    let mut settings = common::settings();
    settings.encryption_key = None;
    let service = Arc::new(common::service(
        settings,
        common::router(false, FixedTenants::new(&[])),
        Arc::new(FakeFetcher::new()),
        factory.clone(),
    ));
    let store = MemoryStatusStore::new();
    let runner = JobRunner::new(Arc::new(RefreshEducationOrganizationsJob::new(service, false)), store.clone());

    let status = runner.execute(&JobContext::new("refresh")).await;

    assert_eq!(status, JobStatus::Error);
    let row = store.row("refresh").expect("row should exist");
    assert_eq!(row.error_message.as_deref(), Some("EncryptionKey can't be null."));
    assert!(factory.processed().is_empty());
    Ok(())
}

#[tokio::test]
async fn malformed_encryption_key_fails_each_instance_but_not_the_job() -> Result<()> {
    let fetcher = Arc::new(FakeFetcher::new());
    let factory = FakeContextFactory::new()
        .with_instances("default", vec![instance(1, "enc:ods1"), instance(2, "enc:ods2")])
        .with_mirror("default", 1, vec![mirror(5, 1, "Kept")]);
    let mut settings = common::settings();
    settings.encryption_key = Some("not*base64!".to_string());
    let service = Arc::new(common::service(
        settings,
        common::router(false, FixedTenants::new(&[])),
        fetcher.clone(),
        factory.clone(),
    ));

    let report = service.execute(None, None).await?;
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.failed(), 2, "one failed outcome per instance");
    assert!(fetcher.calls().is_empty());

    let store = MemoryStatusStore::new();
    let runner = JobRunner::new(Arc::new(RefreshEducationOrganizationsJob::new(service, false)), store.clone());
    let status = runner.execute(&JobContext::new("RefreshEducationOrganizations_default")).await;

    assert_eq!(status, JobStatus::Completed);
    assert_eq!(store.row("RefreshEducationOrganizations_default").and_then(|r| r.error_message), None);
    assert_eq!(factory.mirror_ids("default", 1), vec![5], "mirror is left alone");
    Ok(())
}

#[tokio::test]
async fn every_instance_gets_its_own_context_and_they_overlap() -> Result<()> {
    let factory = FakeContextFactory::new().with_instances(
        "default",
        (1..=4).map(|id| instance(id, &format!("enc:ods{}", id))).collect(),
    );
    let service = single_tenant(Arc::new(FakeFetcher::new()), factory.clone());

    let report = service.execute(None, None).await?;

    assert_eq!(report.synced(), 4);
    let ids = factory.context_ids();
    let distinct: HashSet<_> = ids.iter().collect();
    assert_eq!(ids.len(), 4);
    assert_eq!(distinct.len(), 4, "no context may be shared between instances");
    assert!(factory.max_active() >= 2, "instances should be processed concurrently");
    Ok(())
}

#[tokio::test]
async fn concurrency_limit_caps_open_contexts() -> Result<()> {
    let factory = FakeContextFactory::new().with_instances(
        "default",
        (1..=4).map(|id| instance(id, &format!("enc:ods{}", id))).collect(),
    );
    let mut settings = common::settings();
    settings.max_concurrent_instances = Some(1);
    let service = common::service(
        settings,
        common::router(false, FixedTenants::new(&[])),
        Arc::new(FakeFetcher::new()),
        factory.clone(),
    );

    let report = service.execute(None, None).await?;

    assert_eq!(report.synced(), 4);
    assert_eq!(factory.max_active(), 1);
    Ok(())
}

#[tokio::test]
async fn cancellation_fails_unfinished_instances() -> Result<()> {
    let fetcher = Arc::new(FakeFetcher::with_delay(Duration::from_secs(30)));
    let factory = FakeContextFactory::new().with_instances("default", vec![instance(1, "enc:ods1"), instance(2, "enc:ods2")]);
    let service = single_tenant(fetcher, factory.clone());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = service.execute_with_cancellation(None, None, cancel).await?;

    assert_eq!(report.failed(), 2);
    assert!(report
        .outcomes
        .iter()
        .all(|o| o.result == InstanceResult::Failed { error: "cancelled".to_string() }));
    assert!(factory.mirror_ids("default", 1).is_empty());
    Ok(())
}
