mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeConverter, Harness, ORG_BUDGETS_CSV, ORG_MAIN_CSV};
use iatigen_core::{
    ArtifactPublisher, ConversionInvoker, DirectoryHost, HostRegistry, Pipeline, PipelineOptions,
    RunRequest, RunState, SilentProgress, report::Severity,
};
use iatigen_shared::{Domain, FileType, IatiError, Namespace, Validity, registry};
use iatigen_storage::{MemoryRepository, Storage, TrackingRepository};
use sha2::{Digest, Sha256};

fn org_request(namespace: &str) -> RunRequest {
    RunRequest::new(Some(namespace), Domain::Organization)
}

#[test]
fn every_code_resolves_like_its_name() {
    for file_type in FileType::ALL {
        let by_code = registry::resolve(&file_type.code().to_string()).unwrap();
        let by_name = registry::resolve(file_type.name()).unwrap();
        assert_eq!(by_code, by_name);
        assert_eq!(by_code, file_type);
    }
}

#[tokio::test]
async fn no_destination_fails_without_side_effects() {
    let h = Harness::new();
    let main = h
        .tag_csv("main", "bcie", FileType::OrganizationMainFile, ORG_MAIN_CSV)
        .await;

    let result = h.pipeline.run(&org_request("bcie"), &SilentProgress).await;

    assert_eq!(result.state, RunState::Failed);
    assert_eq!(result.failed_stage, Some(RunState::Resolving));
    assert!(matches!(
        result.error,
        Some(IatiError::NoDestinationConfigured { .. })
    ));
    assert_eq!(h.record("main").await, main);
    assert_eq!(h.accessor.fetch_count(), 0);
    assert!(h.converter.invocations().is_empty());
}

#[tokio::test]
async fn required_only_run_publishes() {
    let h = Harness::new();
    let dest = h.provision("bcie", Domain::Organization).await;
    h.tag_csv("main", "bcie", FileType::OrganizationMainFile, ORG_MAIN_CSV)
        .await;

    let result = h.pipeline.run(&org_request("bcie"), &SilentProgress).await;

    assert!(result.is_success(), "run failed: {:?}", result.error);
    assert_eq!(result.state, RunState::Done);
    assert_eq!(result.destination_id.as_deref(), Some(dest.as_str()));
    assert_eq!(result.components.len(), 1);
    assert!(result.report().is_empty());

    let main = h.record("main").await;
    assert_eq!(main.is_valid, Validity::Valid);
    assert!(main.last_success_at.is_some());
    let destination = h.record(&dest).await;
    assert_eq!(destination.is_valid, Validity::Valid);
    assert!(destination.last_success_at.is_some());

    let payload = h.host.payload(&dest).unwrap();
    assert!(String::from_utf8_lossy(&payload).contains("organisations.csv"));
    let hash = format!("{:x}", Sha256::digest(&payload));
    assert_eq!(result.content_hash.as_deref(), Some(hash.as_str()));

    let invocation = &h.converter.invocations()[0];
    assert_eq!(invocation.files, vec!["organisations.csv"]);
}

#[tokio::test]
async fn missing_required_leaves_destination_unchanged() {
    let h = Harness::new();
    let dest = h.provision("bcie", Domain::Organization).await;
    h.tag_csv(
        "budget",
        "bcie",
        FileType::OrganizationBudgetFile,
        ORG_BUDGETS_CSV,
    )
    .await;
    let before = h.record(&dest).await;

    let result = h.pipeline.run(&org_request("bcie"), &SilentProgress).await;

    assert_eq!(result.failed_stage, Some(RunState::Staging));
    assert!(matches!(
        result.error,
        Some(IatiError::MissingRequiredComponent {
            file_type: FileType::OrganizationMainFile
        })
    ));
    assert_eq!(h.record(&dest).await, before);
    assert_eq!(h.host.payload(&dest).unwrap(), Vec::<u8>::new());
    assert_eq!(h.host.update_count(), 0);

    let report = result.report();
    assert_eq!(
        report.entries[0].component.as_deref(),
        Some("organisations.csv")
    );
}

#[tokio::test]
async fn duplicate_component_rejected_before_any_fetch() {
    let h = Harness::new();
    h.provision("bcie", Domain::Organization).await;
    h.tag_csv("main", "bcie", FileType::OrganizationMainFile, ORG_MAIN_CSV)
        .await;
    let first = h
        .tag_csv(
            "names-1",
            "bcie",
            FileType::OrganizationNamesFile,
            "name\nA\n",
        )
        .await;
    let second = h
        .tag_csv(
            "names-2",
            "bcie",
            FileType::OrganizationNamesFile,
            "name\nB\n",
        )
        .await;

    let result = h.pipeline.run(&org_request("bcie"), &SilentProgress).await;

    match result.error {
        Some(IatiError::TooManyComponents {
            file_type,
            found,
            max,
        }) => {
            assert_eq!(file_type, FileType::OrganizationNamesFile);
            assert_eq!((found, max), (2, 1));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(h.record("names-1").await, first);
    assert_eq!(h.record("names-2").await, second);
    assert_eq!(h.accessor.fetch_count(), 0);
}

#[tokio::test]
async fn two_destinations_is_too_many() {
    let h = Harness::new();
    h.provision("bcie", Domain::Activity).await;
    h.provision("bcie", Domain::Activity).await;
    h.tag_csv(
        "main",
        "bcie",
        FileType::ActivityMainFile,
        "iati-identifier\nXM-1\n",
    )
    .await;

    let result = h
        .pipeline
        .run(
            &RunRequest::new(Some("bcie"), Domain::Activity),
            &SilentProgress,
        )
        .await;

    assert_eq!(result.failed_stage, Some(RunState::Resolving));
    assert!(matches!(
        result.error,
        Some(IatiError::TooManyComponents {
            file_type: FileType::FinalActivityFile,
            found: 2,
            ..
        })
    ));
}

#[tokio::test]
async fn republishing_is_idempotent() {
    let h = Harness::new();
    let dest = h.provision("bcie", Domain::Organization).await;
    h.tag_csv("main", "bcie", FileType::OrganizationMainFile, ORG_MAIN_CSV)
        .await;
    h.tag_csv(
        "budget",
        "bcie",
        FileType::OrganizationBudgetFile,
        ORG_BUDGETS_CSV,
    )
    .await;

    let first = h.pipeline.run(&org_request("bcie"), &SilentProgress).await;
    let first_payload = h.host.payload(&dest).unwrap();
    let second = h.pipeline.run(&org_request("bcie"), &SilentProgress).await;

    assert!(first.is_success() && second.is_success());
    assert_eq!(first.destination_id, second.destination_id);
    assert_eq!(first.content_hash, second.content_hash);
    assert_eq!(h.host.payload(&dest).unwrap(), first_payload);
    assert_eq!(h.host.resource_count(), 1);
    assert_eq!(h.host.update_count(), 2);
}

#[tokio::test]
async fn concurrent_runs_use_isolated_staging() {
    let h = Harness::with_converter(FakeConverter::rendezvous(2));
    h.provision("alpha", Domain::Organization).await;
    h.provision("beta", Domain::Organization).await;
    h.tag_csv(
        "alpha-main",
        "alpha",
        FileType::OrganizationMainFile,
        ORG_MAIN_CSV,
    )
    .await;
    h.tag_csv(
        "alpha-budget",
        "alpha",
        FileType::OrganizationBudgetFile,
        ORG_BUDGETS_CSV,
    )
    .await;
    h.tag_csv(
        "beta-main",
        "beta",
        FileType::OrganizationMainFile,
        ORG_MAIN_CSV,
    )
    .await;

    let alpha = org_request("alpha");
    let beta = org_request("beta");
    // Both conversions must be in flight at once for the barrier to release.
    let (a, b) = tokio::join!(
        h.pipeline.run(&alpha, &SilentProgress),
        h.pipeline.run(&beta, &SilentProgress),
    );
    assert!(a.is_success(), "alpha failed: {:?}", a.error);
    assert!(b.is_success(), "beta failed: {:?}", b.error);

    let invocations = h.converter.invocations();
    assert_eq!(invocations.len(), 2);
    assert_ne!(invocations[0].input_dir, invocations[1].input_dir);

    let mut listings: Vec<_> = invocations.iter().map(|i| i.files.clone()).collect();
    listings.sort();
    assert_eq!(
        listings,
        vec![
            vec!["budgets.csv".to_string(), "organisations.csv".to_string()],
            vec!["organisations.csv".to_string()],
        ]
    );

    for invocation in &invocations {
        assert!(!invocation.input_dir.exists(), "staging dir left behind");
    }
}

#[tokio::test]
async fn concurrent_runs_on_one_namespace_publish_once_each() {
    let dir = tempfile::tempdir().unwrap();
    let staging_root = dir.path().join("staging");
    let repo = Arc::new(MemoryRepository::new());
    let accessor = Arc::new(common::MemoryAccessor::default());
    let converter = Arc::new(FakeConverter::rendezvous(2));
    let host = Arc::new(DirectoryHost::new(dir.path().join("published"), None));
    let publisher = ArtifactPublisher::new(host.clone());
    let pipeline = Pipeline::new(
        repo.clone(),
        accessor.clone(),
        ConversionInvoker::new(converter.clone(), Duration::from_secs(10)),
        publisher.clone(),
        PipelineOptions {
            fetch_timeout: Duration::from_secs(5),
            staging_root: Some(staging_root.clone()),
        },
    );

    let ns = Namespace::new("bcie");
    let dest = publisher
        .provision(repo.as_ref(), &ns, Domain::Organization)
        .await
        .unwrap();
    accessor.csv("main", ORG_MAIN_CSV);
    accessor.csv("budget", ORG_BUDGETS_CSV);
    repo.upsert_tag("main", &ns, FileType::OrganizationMainFile)
        .await
        .unwrap();
    repo.upsert_tag("budget", &ns, FileType::OrganizationBudgetFile)
        .await
        .unwrap();

    let request = org_request("bcie");
    let (a, b) = tokio::join!(
        pipeline.run(&request, &SilentProgress),
        pipeline.run(&request, &SilentProgress),
    );
    assert!(a.is_success(), "first run failed: {:?}", a.error);
    assert!(b.is_success(), "second run failed: {:?}", b.error);
    assert_eq!(a.destination_id, b.destination_id);

    let invocations = converter.invocations();
    assert_eq!(invocations.len(), 2);
    assert_ne!(invocations[0].input_dir, invocations[1].input_dir);
    assert_eq!(std::fs::read_dir(&staging_root).unwrap().count(), 0);

    let locator = host.locate(&dest.source_ref).await.unwrap().unwrap();
    let payload = std::fs::read(locator.to_file_path().unwrap()).unwrap();
    let hash = format!("{:x}", Sha256::digest(&payload));
    assert_eq!(a.content_hash.as_deref(), Some(hash.as_str()));
    assert_eq!(b.content_hash.as_deref(), Some(hash.as_str()));

    let stored = repo.get(&dest.id).await.unwrap().unwrap();
    assert_eq!(stored.is_valid, Validity::Valid);
}

#[tokio::test]
async fn dropped_run_cleans_staging_and_keeps_tracking() {
    // With two parties and a single run, the conversion never completes.
    let h = Harness::with_converter(FakeConverter::rendezvous(2));
    let dest = h.provision("bcie", Domain::Organization).await;
    h.tag_csv("main", "bcie", FileType::OrganizationMainFile, ORG_MAIN_CSV)
        .await;
    let dest_before = h.record(&dest).await;
    let main_before = h.record("main").await;

    let request = org_request("bcie");
    let outcome = tokio::time::timeout(
        Duration::from_millis(200),
        h.pipeline.run(&request, &SilentProgress),
    )
    .await;
    assert!(outcome.is_err(), "run should still be converting");

    assert_eq!(h.converter.invocations().len(), 1);
    assert_eq!(std::fs::read_dir(h.staging_root.path()).unwrap().count(), 0);
    assert_eq!(h.record(&dest).await, dest_before);
    let main = h.record("main").await;
    assert_eq!(main, main_before);
    assert_eq!(main.is_valid, Validity::Unknown);
    assert_eq!(h.host.update_count(), 0);
}

#[tokio::test]
async fn malformed_optional_component_is_attributed() {
    let h = Harness::new();
    let dest = h.provision("bcie", Domain::Organization).await;
    h.tag_csv("main", "bcie", FileType::OrganizationMainFile, ORG_MAIN_CSV)
        .await;
    h.tag_csv(
        "budget",
        "bcie",
        FileType::OrganizationBudgetFile,
        "id,amount\n1,2\n",
    )
    .await;

    let result = h.pipeline.run(&org_request("bcie"), &SilentProgress).await;

    assert_eq!(result.failed_stage, Some(RunState::Converting));
    let Some(IatiError::Conversion(failure)) = &result.error else {
        panic!("expected a conversion error, got {:?}", result.error);
    };
    // Trimmed and deduplicated.
    assert_eq!(failure.issues.len(), 2);

    let budget = h.record("budget").await;
    assert_eq!(budget.is_valid, Validity::Invalid);
    assert_eq!(budget.last_error.as_deref(), Some("missing budget columns"));

    let main = h.record("main").await;
    assert_eq!(main.is_valid, Validity::Unknown);
    assert!(main.last_error.is_none());

    let destination = h.record(&dest).await;
    assert_eq!(destination.is_valid, Validity::Invalid);
    assert_eq!(
        destination.last_error.as_deref(),
        Some("missing budget columns")
    );
    assert_eq!(h.host.update_count(), 0);

    let report = result.report();
    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.entries[0].component.as_deref(), Some("budgets.csv"));
    assert_eq!(report.entries[1].component, None);
    assert_eq!(report.entries[1].details, "document incomplete");
}

#[tokio::test]
async fn unreachable_optional_component_is_skipped() {
    let h = Harness::new();
    h.provision("bcie", Domain::Organization).await;
    h.tag_csv("main", "bcie", FileType::OrganizationMainFile, ORG_MAIN_CSV)
        .await;
    h.accessor.failing("names", "connection refused");
    h.tag("names", "bcie", FileType::OrganizationNamesFile)
        .await;

    let result = h.pipeline.run(&org_request("bcie"), &SilentProgress).await;

    assert!(result.is_success(), "run failed: {:?}", result.error);
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].file_type, FileType::OrganizationNamesFile);

    let names = h.record("names").await;
    assert_eq!(names.is_valid, Validity::Invalid);
    assert!(names.last_error.unwrap().contains("connection refused"));

    let report = result.report();
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].severity, Severity::Warning);
    assert!(!report.has_errors());
    assert_eq!(
        h.converter.invocations()[0].files,
        vec!["organisations.csv"]
    );
}

#[tokio::test]
async fn unreachable_required_component_aborts() {
    let h = Harness::new();
    let dest = h.provision("bcie", Domain::Organization).await;
    h.accessor.failing("main", "HTTP 503");
    h.tag("main", "bcie", FileType::OrganizationMainFile).await;
    let before = h.record(&dest).await;

    let result = h.pipeline.run(&org_request("bcie"), &SilentProgress).await;

    assert_eq!(result.failed_stage, Some(RunState::Staging));
    assert!(matches!(result.error, Some(IatiError::FetchFailure { .. })));
    assert_eq!(h.record("main").await.is_valid, Validity::Invalid);
    assert_eq!(result.components.len(), 1);
    assert_eq!(result.components[0].source_ref, "main");
    assert!(!result.components[0].outcome.is_success());
    assert_eq!(h.record(&dest).await, before);
    assert!(h.converter.invocations().is_empty());
}

#[tokio::test]
async fn non_csv_optional_component_is_skipped() {
    let h = Harness::new();
    h.provision("bcie", Domain::Organization).await;
    h.tag_csv("main", "bcie", FileType::OrganizationMainFile, ORG_MAIN_CSV)
        .await;
    h.accessor.with_format("docs", b"PK\x03\x04", "XLSX");
    h.tag("docs", "bcie", FileType::OrganizationDocumentFile)
        .await;

    let result = h.pipeline.run(&org_request("bcie"), &SilentProgress).await;

    assert!(result.is_success());
    assert!(result.skipped[0].reason.contains("only CSV"));
    assert_eq!(h.record("docs").await.is_valid, Validity::Invalid);
}

#[tokio::test]
async fn slow_fetch_times_out() {
    let h = Harness::with_fetch_timeout(Duration::from_millis(100));
    h.provision("bcie", Domain::Organization).await;
    h.tag_csv("main", "bcie", FileType::OrganizationMainFile, ORG_MAIN_CSV)
        .await;
    h.accessor.hanging("budget");
    h.tag("budget", "bcie", FileType::OrganizationBudgetFile)
        .await;

    let result = h.pipeline.run(&org_request("bcie"), &SilentProgress).await;

    assert!(result.is_success());
    assert!(result.skipped[0].reason.contains("timed out"));
}

#[tokio::test]
async fn publish_failure_marks_destination() {
    let h = Harness::new();
    let dest = h.provision("bcie", Domain::Organization).await;
    h.tag_csv("main", "bcie", FileType::OrganizationMainFile, ORG_MAIN_CSV)
        .await;
    h.host.reject_updates();

    let result = h.pipeline.run(&org_request("bcie"), &SilentProgress).await;

    assert_eq!(result.failed_stage, Some(RunState::Publishing));
    assert_eq!(
        result.error.as_ref().map(|e| e.kind()),
        Some("PublishError")
    );
    let destination = h.record(&dest).await;
    assert_eq!(destination.is_valid, Validity::Invalid);
    assert!(destination.last_error.unwrap().contains("rejected"));
    assert_eq!(h.host.payload(&dest).unwrap(), Vec::<u8>::new());
}

#[tokio::test]
async fn staging_removed_after_failed_run() {
    let h = Harness::new();
    h.provision("bcie", Domain::Organization).await;
    h.tag_csv("main", "bcie", FileType::OrganizationMainFile, ORG_MAIN_CSV)
        .await;
    h.tag_csv("budget", "bcie", FileType::OrganizationBudgetFile, "x\n")
        .await;

    let result = h.pipeline.run(&org_request("bcie"), &SilentProgress).await;

    assert_eq!(result.state, RunState::Failed);
    let leftovers: Vec<_> = std::fs::read_dir(h.staging_root.path()).unwrap().collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn resolve_destination_after_publish() {
    let h = Harness::new();
    let ns = Namespace::new("bcie");
    let err = h
        .pipeline
        .resolve_destination(&ns, Domain::Organization)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NoDestinationConfigured");

    let dest = h.provision("bcie", Domain::Organization).await;
    h.tag_csv("main", "bcie", FileType::OrganizationMainFile, ORG_MAIN_CSV)
        .await;
    assert!(
        h.pipeline
            .run(&org_request("bcie"), &SilentProgress)
            .await
            .is_success()
    );

    let url = h
        .pipeline
        .resolve_destination(&ns, Domain::Organization)
        .await
        .unwrap();
    assert_eq!(url.as_str(), format!("https://host.test/resources/{dest}"));
}

#[tokio::test]
async fn namespaces_do_not_mix() {
    let h = Harness::new();
    h.provision("alpha", Domain::Organization).await;
    h.tag_csv(
        "alpha-main",
        "alpha",
        FileType::OrganizationMainFile,
        ORG_MAIN_CSV,
    )
    .await;
    h.tag_csv(
        "beta-budget",
        "beta",
        FileType::OrganizationBudgetFile,
        ORG_BUDGETS_CSV,
    )
    .await;

    let result = h.pipeline.run(&org_request("alpha"), &SilentProgress).await;

    assert!(result.is_success());
    assert_eq!(
        h.converter.invocations()[0].files,
        vec!["organisations.csv"]
    );
    assert_eq!(h.record("beta-budget").await.is_valid, Validity::Unknown);
}

#[tokio::test]
async fn end_to_end_with_libsql_storage() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(
        Storage::open(&dir.path().join("tracking.db"))
            .await
            .unwrap(),
    );
    let accessor = Arc::new(common::MemoryAccessor::default());
    let host = Arc::new(common::MemoryHost::default());
    let publisher = ArtifactPublisher::new(host.clone());
    let pipeline = Pipeline::new(
        repo.clone(),
        accessor.clone(),
        ConversionInvoker::new(Arc::new(FakeConverter::default()), Duration::from_secs(10)),
        publisher.clone(),
        PipelineOptions {
            fetch_timeout: Duration::from_secs(5),
            staging_root: Some(dir.path().join("staging")),
        },
    );

    let ns = Namespace::new("bcie");
    let dest = publisher
        .provision(repo.as_ref(), &ns, Domain::Organization)
        .await
        .unwrap();
    accessor.csv("main", ORG_MAIN_CSV);
    repo.upsert_tag("main", &ns, FileType::OrganizationMainFile)
        .await
        .unwrap();

    let result = pipeline.run(&org_request("bcie"), &SilentProgress).await;
    assert!(result.is_success(), "run failed: {:?}", result.error);

    let stored = repo.get(&dest.id).await.unwrap().unwrap();
    assert_eq!(stored.is_valid, Validity::Valid);
    let main = repo.find_by_source_ref("main").await.unwrap().unwrap();
    assert_eq!(main.is_valid, Validity::Valid);
    assert!(
        host.payload(&dest.source_ref)
            .is_some_and(|p| !p.is_empty())
    );
}
