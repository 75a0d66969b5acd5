use crate::support::{fast_settings, memory_ledger, references, MemorySink, ScriptedPipeline};
use listing_harvester::ledger::{AttemptStatus, CrawlLedger, LedgerOptions};
use listing_harvester::orchestrator::{CrawlOrchestrator, SourceOutcome};
use std::sync::Arc;
use std::time::Duration;

fn status_of(ledger: &CrawlLedger, source: &str, reference: &str) -> Option<AttemptStatus> {
    ledger.lookup(source, reference).map(|record| record.status)
}

#[tokio::test]
async fn test_resumed_run_only_processes_new_items() {
    let ledger = memory_ledger(false);
    let refs = references("bars.am", 1..=5);
    for reference in &refs[..3] {
        ledger.record_start("bars", reference).unwrap();
        ledger.record_success("bars", reference).unwrap();
    }

    let pipeline = ScriptedPipeline::new("bars", vec![refs.clone()]);
    let calls = pipeline.calls();
    let sink = Arc::new(MemorySink::default());
    let orchestrator = CrawlOrchestrator::new(ledger.clone(), sink.clone(), fast_settings());

    let summary = orchestrator.run(vec![pipeline.boxed()]).await;

    assert_eq!(calls.process(), 2);
    assert_eq!(sink.len(), 2);
    let bars = summary.source("bars").unwrap();
    assert_eq!(bars.completed, 2);
    assert_eq!(bars.skipped, 3);
    assert_eq!(bars.outcome, SourceOutcome::Exhausted);
}

#[tokio::test]
async fn test_advance_retry_is_bounded() {
    let ledger = memory_ledger(false);
    let pipeline = ScriptedPipeline::new("bars", vec![references("bars.am", 1..=2)])
        .advance_always_fails();
    let calls = pipeline.calls();
    let orchestrator =
        CrawlOrchestrator::new(ledger, Arc::new(MemorySink::default()), fast_settings());

    let summary = orchestrator.run(vec![pipeline.boxed()]).await;

    assert_eq!(calls.advance(), 3);
    let bars = summary.source("bars").unwrap();
    assert!(matches!(&bars.outcome, SourceOutcome::Failed(reason) if reason.contains("3 times")));
    assert_eq!(bars.completed, 2);
}

#[tokio::test]
async fn test_failing_source_does_not_affect_siblings() {
    let ledger = memory_ledger(false);
    let healthy = ScriptedPipeline::new(
        "bars",
        vec![
            references("bars.am", 1..=2),
            references("bars.am", 3..=4),
            references("bars.am", 5..=6),
        ],
    );
    let broken = ScriptedPipeline::new("myrealty", vec![references("myrealty.am", 1..=2)])
        .advance_always_fails();
    let broken_calls = broken.calls();
    let orchestrator = CrawlOrchestrator::new(
        ledger.clone(),
        Arc::new(MemorySink::default()),
        fast_settings(),
    );

    let summary = orchestrator.run(vec![healthy.boxed(), broken.boxed()]).await;

    let bars = summary.source("bars").unwrap();
    assert_eq!(bars.outcome, SourceOutcome::Exhausted);
    assert_eq!(bars.pages, 3);
    assert_eq!(bars.completed, 6);
    for reference in references("bars.am", 1..=6) {
        assert_eq!(
            status_of(&ledger, "bars", &reference),
            Some(AttemptStatus::Success)
        );
    }

    let myrealty = summary.source("myrealty").unwrap();
    assert!(matches!(myrealty.outcome, SourceOutcome::Failed(_)));
    assert_eq!(broken_calls.advance(), 3);
    assert_eq!(summary.sources.len(), 2);
}

#[tokio::test]
async fn test_item_failure_does_not_stop_the_page() {
    let ledger = memory_ledger(false);
    let refs = references("bars.am", 1..=5);
    let pipeline = ScriptedPipeline::new("bars", vec![refs.clone()]).failing(&refs[2]);
    let calls = pipeline.calls();
    let orchestrator = CrawlOrchestrator::new(
        ledger.clone(),
        Arc::new(MemorySink::default()),
        fast_settings(),
    );

    let summary = orchestrator.run(vec![pipeline.boxed()]).await;

    let statuses: Vec<_> = refs
        .iter()
        .map(|reference| status_of(&ledger, "bars", reference))
        .collect();
    assert_eq!(
        statuses,
        vec![
            Some(AttemptStatus::Success),
            Some(AttemptStatus::Success),
            Some(AttemptStatus::Failed),
            Some(AttemptStatus::Success),
            Some(AttemptStatus::Success),
        ]
    );
    let failed = ledger.lookup("bars", &refs[2]).unwrap();
    assert_eq!(
        failed.error.as_deref(),
        Some("required field 'price' not found")
    );
    assert_eq!(calls.advance(), 1);
    assert_eq!(summary.source("bars").unwrap().failed, 1);
}

#[tokio::test]
async fn test_skipped_items_are_recorded_as_skipped() {
    let ledger = memory_ledger(false);
    let refs = references("bars.am", 1..=2);
    let pipeline = ScriptedPipeline::new("bars", vec![refs.clone()]).skipping(&refs[0]);
    let sink = Arc::new(MemorySink::default());
    let orchestrator = CrawlOrchestrator::new(ledger.clone(), sink.clone(), fast_settings());

    let summary = orchestrator.run(vec![pipeline.boxed()]).await;

    assert_eq!(
        status_of(&ledger, "bars", &refs[0]),
        Some(AttemptStatus::Skipped)
    );
    assert_eq!(sink.len(), 1);
    assert_eq!(summary.source("bars").unwrap().skipped, 1);
}

#[tokio::test]
async fn test_panicking_worker_is_reported_as_crashed() {
    let ledger = memory_ledger(false);
    let crashing = ScriptedPipeline::new("broken", vec![]).panic_on_list();
    let healthy = ScriptedPipeline::new("bars", vec![references("bars.am", 1..=3)]);
    let orchestrator = CrawlOrchestrator::new(
        ledger.clone(),
        Arc::new(MemorySink::default()),
        fast_settings(),
    );

    let summary = orchestrator.run(vec![crashing.boxed(), healthy.boxed()]).await;

    let broken = summary.source("broken").unwrap();
    let SourceOutcome::Crashed(reason) = &broken.outcome else {
        panic!("expected a crash, got {}", broken.outcome);
    };
    assert!(reason.contains("scripted panic"));
    let bars = summary.source("bars").unwrap();
    assert_eq!(bars.outcome, SourceOutcome::Exhausted);
    assert_eq!(bars.completed, 3);
}

#[tokio::test]
async fn test_retry_failed_policy() {
    let refs = references("bars.am", 1..=1);

    for (retry_failed, expected_calls) in [(false, 0), (true, 1)] {
        let ledger = memory_ledger(retry_failed);
        ledger.record_start("bars", &refs[0]).unwrap();
        ledger.record_failure("bars", &refs[0], "timeout").unwrap();

        let pipeline = ScriptedPipeline::new("bars", vec![refs.clone()]);
        let calls = pipeline.calls();
        let orchestrator = CrawlOrchestrator::new(
            ledger.clone(),
            Arc::new(MemorySink::default()),
            fast_settings(),
        );
        orchestrator.run(vec![pipeline.boxed()]).await;

        assert_eq!(calls.process(), expected_calls, "retry_failed = {}", retry_failed);
        let expected_status = if retry_failed {
            AttemptStatus::Success
        } else {
            AttemptStatus::Failed
        };
        assert_eq!(status_of(&ledger, "bars", &refs[0]), Some(expected_status));
    }
}

#[tokio::test]
async fn test_concurrent_workers_never_process_an_item_twice() {
    let ledger = memory_ledger(false);
    let refs = references("bars.am", 1..=20);
    let first = ScriptedPipeline::new("bars", vec![refs.clone()]);
    let second = ScriptedPipeline::new("bars", vec![refs.clone()]);
    let (first_calls, second_calls) = (first.calls(), second.calls());
    let sink = Arc::new(MemorySink::default());
    let orchestrator = CrawlOrchestrator::new(ledger, sink.clone(), fast_settings());

    orchestrator.run(vec![first.boxed(), second.boxed()]).await;

    assert_eq!(first_calls.process() + second_calls.process(), 20);
    assert_eq!(sink.len(), 20);
}

#[tokio::test]
async fn test_sink_failure_marks_item_failed() {
    let ledger = memory_ledger(false);
    let refs = references("bars.am", 1..=2);
    let pipeline = ScriptedPipeline::new("bars", vec![refs.clone()]);
    let sink = Arc::new(MemorySink::rejecting(&refs[0]));
    let orchestrator = CrawlOrchestrator::new(ledger.clone(), sink.clone(), fast_settings());

    let summary = orchestrator.run(vec![pipeline.boxed()]).await;

    let record = ledger.lookup("bars", &refs[0]).unwrap();
    assert_eq!(record.status, AttemptStatus::Failed);
    assert!(record.error.unwrap().starts_with("sink error"));
    assert_eq!(
        status_of(&ledger, "bars", &refs[1]),
        Some(AttemptStatus::Success)
    );
    assert_eq!(summary.source("bars").unwrap().outcome, SourceOutcome::Exhausted);
}

#[tokio::test]
async fn test_slow_item_times_out() {
    let ledger = memory_ledger(false);
    let refs = references("bars.am", 1..=1);
    let pipeline =
        ScriptedPipeline::new("bars", vec![refs.clone()]).process_delay(Duration::from_secs(2));
    let mut settings = fast_settings();
    settings.call_timeout = Duration::from_millis(50);
    let orchestrator =
        CrawlOrchestrator::new(ledger.clone(), Arc::new(MemorySink::default()), settings);

    orchestrator.run(vec![pipeline.boxed()]).await;

    let record = ledger.lookup("bars", &refs[0]).unwrap();
    assert_eq!(record.status, AttemptStatus::Failed);
    assert!(record.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_slow_advance_times_out_and_fails_the_source() {
    let ledger = memory_ledger(false);
    let refs = references("bars.am", 1..=2);
    let pipeline = ScriptedPipeline::new("bars", vec![refs.clone(), references("bars.am", 3..=4)])
        .advance_delay(Duration::from_secs(2));
    let calls = pipeline.calls();
    let mut settings = fast_settings();
    settings.call_timeout = Duration::from_millis(50);
    let orchestrator =
        CrawlOrchestrator::new(ledger.clone(), Arc::new(MemorySink::default()), settings);

    let summary = orchestrator.run(vec![pipeline.boxed()]).await;

    assert_eq!(calls.advance(), 3);
    assert_eq!(calls.process(), 2);
    match &summary.source("bars").unwrap().outcome {
        SourceOutcome::Failed(reason) => assert!(reason.contains("timed out"), "{}", reason),
        other => panic!("expected a failed source, got {:?}", other),
    }
    assert_eq!(status_of(&ledger, "bars", &refs[1]), Some(AttemptStatus::Success));
}

#[tokio::test]
async fn test_slow_listing_times_out_and_fails_the_source() {
    let pipeline = ScriptedPipeline::new("bars", vec![references("bars.am", 1..=2)])
        .list_delay(Duration::from_secs(2));
    let calls = pipeline.calls();
    let mut settings = fast_settings();
    settings.call_timeout = Duration::from_millis(50);
    let orchestrator =
        CrawlOrchestrator::new(memory_ledger(false), Arc::new(MemorySink::default()), settings);

    let summary = orchestrator.run(vec![pipeline.boxed()]).await;

    assert_eq!(calls.list(), 3);
    assert_eq!(calls.process(), 0);
    match &summary.source("bars").unwrap().outcome {
        SourceOutcome::Failed(reason) => {
            assert!(reason.contains("listing timed out"), "{}", reason)
        }
        other => panic!("expected a failed source, got {:?}", other),
    }
}

#[tokio::test]
async fn test_stop_signal_ends_workers_as_stopped() {
    let ledger = memory_ledger(false);
    let pipeline = ScriptedPipeline::new("bars", vec![references("bars.am", 1..=3)]);
    let calls = pipeline.calls();
    let orchestrator = CrawlOrchestrator::new(
        ledger.clone(),
        Arc::new(MemorySink::default()),
        fast_settings(),
    );

    orchestrator.stop_signal().trigger();
    let summary = orchestrator.run(vec![pipeline.boxed()]).await;

    assert_eq!(summary.source("bars").unwrap().outcome, SourceOutcome::Stopped);
    assert_eq!(calls.list(), 0);
    assert_eq!(calls.process(), 0);
    assert!(ledger.is_empty());
}

#[tokio::test]
async fn test_stop_during_a_page_finishes_the_current_item() {
    let ledger = memory_ledger(false);
    let refs = references("bars.am", 1..=5);
    let sink = Arc::new(MemorySink::default());
    let orchestrator = CrawlOrchestrator::new(ledger.clone(), sink.clone(), fast_settings());

    let pipeline = ScriptedPipeline::new("bars", vec![refs.clone()])
        .stop_after(&refs[1], orchestrator.stop_signal());
    let calls = pipeline.calls();

    let summary = orchestrator.run(vec![pipeline.boxed()]).await;

    let bars = summary.source("bars").unwrap();
    assert_eq!(bars.outcome, SourceOutcome::Stopped);
    assert_eq!(bars.completed, 2);
    assert_eq!(calls.process(), 2);
    assert_eq!(calls.advance(), 0);
    assert_eq!(sink.len(), 2);

    assert_eq!(status_of(&ledger, "bars", &refs[0]), Some(AttemptStatus::Success));
    assert_eq!(status_of(&ledger, "bars", &refs[1]), Some(AttemptStatus::Success));
    for reference in &refs[2..] {
        assert_eq!(status_of(&ledger, "bars", reference), None);
    }
}

#[tokio::test]
async fn test_empty_source_is_exhausted_immediately() {
    let ledger = memory_ledger(false);
    let pipeline = ScriptedPipeline::new("bars", vec![vec![]]);
    let calls = pipeline.calls();
    let orchestrator =
        CrawlOrchestrator::new(ledger, Arc::new(MemorySink::default()), fast_settings());

    let summary = orchestrator.run(vec![pipeline.boxed()]).await;

    let bars = summary.source("bars").unwrap();
    assert_eq!(bars.outcome, SourceOutcome::Exhausted);
    assert_eq!(bars.pages, 0);
    assert_eq!(calls.advance(), 0);
}

#[tokio::test]
async fn test_ledger_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let refs = references("bars.am", 1..=4);

    {
        let ledger = Arc::new(CrawlLedger::open(&path, LedgerOptions::default()).unwrap());
        let pipeline = ScriptedPipeline::new("bars", vec![refs[..2].to_vec()]);
        let orchestrator =
            CrawlOrchestrator::new(ledger, Arc::new(MemorySink::default()), fast_settings());
        orchestrator.run(vec![pipeline.boxed()]).await;
    }

    let ledger = Arc::new(CrawlLedger::open(&path, LedgerOptions::default()).unwrap());
    let pipeline = ScriptedPipeline::new("bars", vec![refs.clone()]);
    let calls = pipeline.calls();
    let orchestrator =
        CrawlOrchestrator::new(ledger.clone(), Arc::new(MemorySink::default()), fast_settings());
    orchestrator.run(vec![pipeline.boxed()]).await;

    assert_eq!(calls.process(), 2);
    assert_eq!(ledger.counts_by_source()["bars"].success, 4);
}
