//! Lifecycle tests over in-memory stores: intake, both pipeline modes,
//! duplicate / early / concurrent delivery and crash recovery.

mod common;

use catchframe_pipeline::{
    process_delivery, DeliveryOutcome, PipelineError, PipelineMode, Retrigger, StageOutcome,
    StageWorker,
};
use catchframe_protocol::{ArtifactForm, ReportStatus, Visibility};
use catchframe_store::{read_to_vec, ArtifactStore, RecordStore, TriggerChannel};
use common::{submission, FakeTransform, Harness, VIDEO};
use std::time::Duration;

const LEASE: Duration = Duration::from_secs(60);

#[tokio::test]
async fn test_submit_stores_artifact_record_and_trigger() {
    let h = Harness::new(PipelineMode::Transcode);
    let id = h.submit(VIDEO, Some("dev@example.com")).await;

    let report = h.records.get(&id).await.unwrap().unwrap();
    assert_eq!(report.status, ReportStatus::Pending);
    assert_eq!(report.description, "crash on load");
    assert_eq!(report.contact_address.as_deref(), Some("dev@example.com"));
    assert!(report.public_artifact_location.is_none());

    let raw = h.ctx.location(ArtifactForm::Raw, &id);
    assert_eq!(read_to_vec(h.artifacts.as_ref(), &raw).await.unwrap(), VIDEO);

    assert_eq!(
        h.channel.pending_payloads("reports-to-process"),
        vec![id.as_bytes().to_vec()]
    );
}

#[tokio::test]
async fn test_end_to_end_transcode() {
    let h = Harness::new(PipelineMode::Transcode);
    let id = h.submit(VIDEO, None).await;

    // One delivery of the stage-1 trigger
    let delivery = h
        .channel
        .receive("reports-to-process", LEASE)
        .await
        .unwrap()
        .unwrap();
    let outcome = process_delivery(&h.handler(), &h.transition(0), &delivery).await;
    assert_eq!(
        outcome,
        DeliveryOutcome::Settled(StageOutcome::Advanced {
            to: ReportStatus::Downloaded,
            next_topic: Some("reports-to-publish".to_string()),
        })
    );
    assert_eq!(
        h.records.get(&id).await.unwrap().unwrap().status,
        ReportStatus::Downloaded
    );
    assert_eq!(h.channel.depth("reports-to-process").await.unwrap(), 0);

    let (worker, _shutdown) = StageWorker::new(h.ctx.clone());
    let summary = worker.run_once().await;
    assert_eq!(summary.advanced, 1);

    let report = h.records.get(&id).await.unwrap().unwrap();
    assert_eq!(report.status, ReportStatus::Completed);
    let url = report.public_artifact_location.unwrap();
    assert_eq!(url, format!("https://cdn.example.com/catchframe-public-reports/{id}.mp4"));

    let public = h.ctx.url_format().parse(&url).unwrap();
    assert_eq!(read_to_vec(h.artifacts.as_ref(), &public).await.unwrap(), VIDEO);
    assert_eq!(h.artifacts.visibility(&public).await.unwrap(), Visibility::Public);

    // Superseded copies retired
    assert!(h.artifacts.keys("catchframe-raw-uploads").is_empty());
    assert!(h.artifacts.keys("catchframe-processed-reports").is_empty());
    assert_eq!(h.transform.runs(), 1);
}

#[tokio::test]
async fn test_end_to_end_direct() {
    let h = Harness::new(PipelineMode::Direct);
    let id = h.submit(VIDEO, None).await;

    let (worker, _shutdown) = StageWorker::new(h.ctx.clone());
    let summary = worker.run_once().await;
    assert_eq!(summary.deliveries, 1);
    assert_eq!(summary.advanced, 1);

    let report = h.records.get(&id).await.unwrap().unwrap();
    assert_eq!(report.status, ReportStatus::Completed);
    let public = h
        .ctx
        .url_format()
        .parse(report.public_artifact_location.as_deref().unwrap())
        .unwrap();
    assert_eq!(public.key, format!("{id}.webm"));
    assert_eq!(read_to_vec(h.artifacts.as_ref(), &public).await.unwrap(), VIDEO);
    assert_eq!(h.transform.runs(), 0);
}

#[tokio::test]
async fn test_direct_in_place_keeps_raw_artifact() {
    let mut config = common::test_config(PipelineMode::Direct);
    config.publish = catchframe_pipeline::PublishStrategy::InPlace;
    let h = Harness::with_config(config, FakeTransform::new());
    let id = h.submit(VIDEO, None).await;

    StageWorker::new(h.ctx.clone()).0.run_once().await;

    let raw = h.ctx.location(ArtifactForm::Raw, &id);
    let report = h.records.get(&id).await.unwrap().unwrap();
    assert_eq!(
        report.public_artifact_location.unwrap(),
        h.ctx.url_format().url_for(&raw)
    );
    assert_eq!(h.artifacts.visibility(&raw).await.unwrap(), Visibility::Public);
    assert!(h.artifacts.keys("catchframe-public-reports").is_empty());
}

#[tokio::test]
async fn test_duplicate_delivery_advances_once() {
    let h = Harness::new(PipelineMode::Transcode);
    let id = h.submit(VIDEO, None).await;
    let handler = h.handler();
    let transcode = h.transition(0);
    let publish = h.transition(1);

    let first = handler.handle(&transcode, &id).await.unwrap();
    assert!(matches!(first, StageOutcome::Advanced { .. }));
    let second = handler.handle(&transcode, &id).await.unwrap();
    assert_eq!(
        second,
        StageOutcome::AlreadyDone {
            status: ReportStatus::Downloaded,
            republished: true,
        }
    );
    assert_eq!(h.transform.runs(), 1);

    let done = handler.handle(&publish, &id).await.unwrap();
    assert!(matches!(done, StageOutcome::Advanced { next_topic: None, .. }));
    let before = h.records.get(&id).await.unwrap().unwrap();

    let again = handler.handle(&publish, &id).await.unwrap();
    assert_eq!(
        again,
        StageOutcome::AlreadyDone {
            status: ReportStatus::Completed,
            republished: false,
        }
    );
    assert_eq!(h.records.get(&id).await.unwrap().unwrap(), before);
    assert_eq!(h.records.applied_advances(), 2);
    assert_eq!(h.artifacts.keys("catchframe-public-reports").len(), 1);
}

#[tokio::test]
async fn test_publish_trigger_before_transcode_is_retried() {
    let h = Harness::new(PipelineMode::Transcode);
    let id = h.submit(VIDEO, None).await;
    let handler = h.handler();

    let err = handler.handle(&h.transition(1), &id).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotReady { status: ReportStatus::Pending, .. }));
    assert!(!err.marks_failed());
    assert_eq!(
        h.records.get(&id).await.unwrap().unwrap().status,
        ReportStatus::Pending
    );

    // Through the worker path it is released for redelivery
    h.ctx.publish_trigger("reports-to-publish", &id).await.unwrap();
    let delivery = h
        .channel
        .receive("reports-to-publish", LEASE)
        .await
        .unwrap()
        .unwrap();
    let outcome = process_delivery(&handler, &h.transition(1), &delivery).await;
    assert!(matches!(outcome, DeliveryOutcome::Retrying(_)));
    assert_eq!(h.channel.depth("reports-to-publish").await.unwrap(), 1);

    handler.handle(&h.transition(0), &id).await.unwrap();
    let outcome = handler.handle(&h.transition(1), &id).await.unwrap();
    assert!(matches!(outcome, StageOutcome::Advanced { to: ReportStatus::Completed, .. }));

    // And a late stage-1 duplicate after completion is a no-op
    let late = handler.handle(&h.transition(0), &id).await.unwrap();
    assert_eq!(
        late,
        StageOutcome::AlreadyDone {
            status: ReportStatus::Completed,
            republished: false,
        }
    );
}

#[tokio::test]
async fn test_crash_before_record_update_does_not_rerun_transform() {
    let h = Harness::new(PipelineMode::Transcode);
    let id = h.submit(VIDEO, None).await;
    let handler = h.handler();
    let transcode = h.transition(0);

    h.records.fail_next_advances(1);
    let err = handler.handle(&transcode, &id).await.unwrap_err();
    assert_eq!(err.class(), catchframe_pipeline::ErrorClass::Transient);
    assert_eq!(
        h.records.get(&id).await.unwrap().unwrap().status,
        ReportStatus::Pending
    );
    let processed = h.ctx.location(ArtifactForm::Processed, &id);
    assert!(h.artifacts.exists(&processed).await.unwrap());
    assert_eq!(h.transform.runs(), 1);

    let outcome = handler.handle(&transcode, &id).await.unwrap();
    assert!(matches!(outcome, StageOutcome::Advanced { to: ReportStatus::Downloaded, .. }));
    assert_eq!(h.transform.runs(), 1);
}

#[tokio::test]
async fn test_lost_next_publish_is_repaired_by_redelivery() {
    let h = Harness::new(PipelineMode::Transcode);
    let id = h.submit(VIDEO, None).await;
    let handler = h.handler();
    let transcode = h.transition(0);

    h.channel.fail_next_publishes(1);
    let err = handler.handle(&transcode, &id).await.unwrap_err();
    assert!(matches!(err, PipelineError::NextPublish { .. }));
    assert!(!err.marks_failed());
    assert_eq!(
        h.records.get(&id).await.unwrap().unwrap().status,
        ReportStatus::Downloaded
    );
    assert_eq!(h.channel.depth("reports-to-publish").await.unwrap(), 0);

    let outcome = handler.handle(&transcode, &id).await.unwrap();
    assert_eq!(
        outcome,
        StageOutcome::AlreadyDone {
            status: ReportStatus::Downloaded,
            republished: true,
        }
    );
    assert_eq!(h.channel.depth("reports-to-publish").await.unwrap(), 1);
    assert_eq!(h.transform.runs(), 1);
}

#[tokio::test]
async fn test_concurrent_delivery_advances_exactly_once() {
    let h = Harness::with_config(
        common::test_config(PipelineMode::Transcode),
        FakeTransform::with_barrier(2),
    );
    let id = h.submit(VIDEO, None).await;
    let transcode = h.transition(0);

    let a = {
        let (handler, transition, id) = (h.handler(), transcode.clone(), id.clone());
        tokio::spawn(async move { handler.handle(&transition, &id).await })
    };
    let b = {
        let (handler, transition, id) = (h.handler(), transcode.clone(), id.clone());
        tokio::spawn(async move { handler.handle(&transition, &id).await })
    };
    let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];

    let advanced = outcomes
        .iter()
        .filter(|o| matches!(o, StageOutcome::Advanced { .. }))
        .count();
    assert_eq!(advanced, 1);
    assert!(outcomes.contains(&StageOutcome::AlreadyDone {
        status: ReportStatus::Downloaded,
        republished: false,
    }));
    assert_eq!(h.records.applied_advances(), 1);
    assert_eq!(h.channel.depth("reports-to-publish").await.unwrap(), 1);
    assert_eq!(h.artifacts.keys("catchframe-processed-reports").len(), 1);
}

#[tokio::test]
async fn test_missing_raw_artifact_is_an_inconsistency() {
    let h = Harness::new(PipelineMode::Transcode);
    let id = h.submit(VIDEO, None).await;
    h.artifacts
        .delete(&h.ctx.location(ArtifactForm::Raw, &id))
        .await
        .unwrap();

    let err = h.handler().handle(&h.transition(0), &id).await.unwrap_err();
    assert!(matches!(err, PipelineError::ArtifactMissing { .. }));
    assert_eq!(err.class(), catchframe_pipeline::ErrorClass::Inconsistency);
    assert_eq!(h.transform.runs(), 0);
}

#[tokio::test]
async fn test_cleanup_failure_does_not_fail_transition() {
    let h = Harness::new(PipelineMode::Transcode);
    let id = h.submit(VIDEO, None).await;
    let handler = h.handler();
    handler.handle(&h.transition(0), &id).await.unwrap();

    h.artifacts.fail_next_deletes(2);
    let outcome = handler.handle(&h.transition(1), &id).await.unwrap();
    assert!(matches!(outcome, StageOutcome::Advanced { to: ReportStatus::Completed, .. }));
    assert_eq!(h.artifacts.keys("catchframe-raw-uploads").len(), 1);

    // A duplicate of the terminal trigger retries the cleanup
    handler.handle(&h.transition(1), &id).await.unwrap();
    assert!(h.artifacts.keys("catchframe-raw-uploads").is_empty());
    assert!(h.artifacts.keys("catchframe-processed-reports").is_empty());
}

#[tokio::test]
async fn test_missing_contact_is_omitted_from_document() {
    let h = Harness::new(PipelineMode::Direct);

    let without = h.submit(VIDEO, None).await;
    let blank = h.submit(VIDEO, Some("   ")).await;
    let with = h.submit(VIDEO, Some("dev@example.com")).await;

    for id in [&without, &blank] {
        let report = h.records.get(id).await.unwrap().unwrap();
        assert_eq!(report.contact_address, None);
        let doc = serde_json::to_value(&report).unwrap();
        assert!(doc.get("email").is_none(), "email present in {doc}");
    }
    let doc = serde_json::to_value(h.records.get(&with).await.unwrap().unwrap()).unwrap();
    assert_eq!(doc["email"], "dev@example.com");
}

#[tokio::test]
async fn test_invalid_submissions_leave_nothing_behind() {
    let mut config = common::test_config(PipelineMode::Transcode);
    config.intake.max_bytes = 8;
    let h = Harness::with_config(config, FakeTransform::new());
    let intake = h.intake();

    let err = intake.submit(submission(b"0123456789", None)).await.unwrap_err();
    assert!(matches!(err, PipelineError::ArtifactTooLarge { limit: 8 }));

    let err = intake.submit(submission(b"", None)).await.unwrap_err();
    assert!(matches!(err, PipelineError::EmptyArtifact));

    let mut bad = submission(b"abc", None);
    bad.metadata = "{not json".to_string();
    let err = intake.submit(bad).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));

    assert!(h.records.is_empty());
    assert!(h.artifacts.keys("catchframe-raw-uploads").is_empty());
    assert_eq!(h.channel.published_count(), 0);

    // Exactly at the limit is accepted
    intake.submit(submission(b"01234567", None)).await.unwrap();
}

#[tokio::test]
async fn test_failed_upload_creates_no_record() {
    let h = Harness::new(PipelineMode::Transcode);
    h.artifacts.fail_next_puts(1);

    let err = h.intake().submit(submission(VIDEO, None)).await.unwrap_err();
    assert!(matches!(err, PipelineError::Store(_)));
    assert!(h.records.is_empty());
    assert_eq!(h.channel.published_count(), 0);
}

#[tokio::test]
async fn test_publish_failure_reports_id_and_kick_recovers() {
    let h = Harness::new(PipelineMode::Transcode);
    let intake = h.intake();

    // Intake retries, so one failure is absorbed
    h.channel.fail_next_publishes(1);
    intake.submit(submission(VIDEO, None)).await.unwrap();

    h.channel.fail_next_publishes(3);
    let err = intake.submit(submission(VIDEO, None)).await.unwrap_err();
    let PipelineError::PublishFailed { report_id, .. } = err else {
        panic!("expected PublishFailed, got {err}");
    };
    let stuck = h.records.get(&report_id).await.unwrap().unwrap();
    assert_eq!(stuck.status, ReportStatus::Pending);
    assert_eq!(h.channel.depth("reports-to-process").await.unwrap(), 1);

    let kicked = intake.kick(&report_id).await.unwrap();
    assert_eq!(
        kicked,
        Retrigger::Published {
            topic: "reports-to-process".to_string(),
            status: ReportStatus::Pending,
        }
    );
    assert_eq!(h.channel.depth("reports-to-process").await.unwrap(), 2);

    StageWorker::new(h.ctx.clone()).0.run_once().await;
    assert_eq!(
        intake.kick(&report_id).await.unwrap(),
        Retrigger::Terminal(ReportStatus::Completed)
    );
    assert!(matches!(
        intake.kick(&catchframe_protocol::ReportId::new()).await,
        Err(PipelineError::RecordMissing(_))
    ));
}

#[tokio::test]
async fn test_kick_from_downloaded_targets_publish_topic() {
    let h = Harness::new(PipelineMode::Transcode);
    let id = h.submit(VIDEO, None).await;
    h.channel.fail_next_publishes(1);
    let _ = h.handler().handle(&h.transition(0), &id).await;

    let kicked = h.intake().kick(&id).await.unwrap();
    assert_eq!(
        kicked,
        Retrigger::Published {
            topic: "reports-to-publish".to_string(),
            status: ReportStatus::Downloaded,
        }
    );
}
