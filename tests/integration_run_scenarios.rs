use anyhow::Result;
use kite_bench::{
    aggregator::{spawn_pipeline, RunClock},
    results::ReportRenderer,
    BenchmarkRunner, MessageType, MessageTypeRegistry, OutcomeEvent, RunConfig, SimulatedHandler,
    Target,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn quiet_runner() -> BenchmarkRunner {
    let mut runner = BenchmarkRunner::new();
    runner.redirect_output(Arc::new(|_: &str| {}));
    runner
}

fn millis(values: &[u64]) -> Vec<Duration> {
    values.iter().map(|&ms| Duration::from_millis(ms)).collect()
}

/// Two workers, three requests each, latencies 10ms through 60ms.
#[tokio::test]
async fn two_workers_report_exact_latency_summary() -> Result<()> {
    let runner = quiet_runner();
    let spawned = Arc::new(AtomicUsize::new(0));

    let reports = runner
        .run(&RunConfig::simple(2, 3), &Target::new("sim"), move || {
            let latencies = match spawned.fetch_add(1, Ordering::SeqCst) {
                0 => millis(&[10, 20, 30]),
                _ => millis(&[40, 50, 60]),
            };
            SimulatedHandler::scripted(latencies).receiving(100)
        })
        .await?;

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.success_count, 6);
    assert_eq!(report.failure_count, 0);
    assert_eq!(report.concurrency, 2);
    assert_eq!(report.min_latency_ms, 10.0);
    assert_eq!(report.max_latency_ms, 60.0);
    assert_eq!(report.avg_latency_ms, 35.0);
    assert_eq!(report.latencies_ms, vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0]);
    assert_eq!(report.received_bytes, 600);
    assert_eq!(report.errors.get(0), 6);

    // qps is computed against the wall-clock window of the run
    assert!(report.total_secs > 0.0);
    let expected_qps = 6.0 / report.total_secs;
    assert!((report.qps - expected_qps).abs() <= expected_qps * 1e-9);

    let histogram = report.histogram();
    assert_eq!(histogram.len(), 11);
    assert_eq!(histogram.iter().map(|b| b.count).sum::<usize>(), 6);
    Ok(())
}

#[tokio::test]
async fn all_failures_still_produce_latency_metrics() -> Result<()> {
    let runner = quiet_runner();
    let reports = runner
        .run(&RunConfig::simple(3, 1), &Target::new("sim"), || {
            SimulatedHandler::scripted(millis(&[5]))
                .with_key(MessageType::HTTP, "GET /")
                .failing_with(500)
        })
        .await?;

    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.success_count, 0);
    assert_eq!(report.failure_count, 3);
    assert_eq!(report.qps, 0.0);
    assert_eq!(report.errors.get(500), 3);
    assert_eq!(report.errors.total(), 3);
    assert_eq!(report.errors.to_string(), "500:3");
    assert_eq!(report.min_latency_ms, 5.0);
    assert_eq!(report.max_latency_ms, 5.0);
    assert_eq!(report.avg_latency_ms, 5.0);
    Ok(())
}

#[tokio::test]
async fn every_attempt_lands_under_its_own_key() -> Result<()> {
    let runner = quiet_runner();
    let spawned = Arc::new(AtomicUsize::new(0));

    let reports = runner
        .run(&RunConfig::simple(6, 25), &Target::new("sim"), move || {
            let handler = SimulatedHandler::scripted(millis(&[1, 2, 3]));
            match spawned.fetch_add(1, Ordering::SeqCst) % 3 {
                0 => handler.with_key(MessageType::GRPC, "Unary"),
                1 => handler.with_key(MessageType::HTTP, "GET /a"),
                _ => handler.with_key(MessageType::HTTP, "GET /b").failing_with(503),
            }
        })
        .await?;

    let keys: Vec<(u32, &str)> = reports
        .iter()
        .map(|r| (r.key.message_type.0, r.key.method.as_str()))
        .collect();
    assert_eq!(keys, vec![(1, "Unary"), (3, "GET /a"), (3, "GET /b")]);

    for report in &reports {
        assert_eq!(report.total_count(), 50);
        assert_eq!(report.latencies_ms.len(), 50);
    }
    assert_eq!(reports.iter().map(|r| r.total_count()).sum::<u64>(), 150);
    assert_eq!(reports[2].errors.get(503), 50);
    Ok(())
}

#[tokio::test]
async fn failed_init_only_stops_its_own_worker() -> Result<()> {
    let runner = quiet_runner();
    let spawned = Arc::new(AtomicUsize::new(0));
    let releases = Arc::new(AtomicUsize::new(0));
    let counter = releases.clone();

    let reports = runner
        .run(&RunConfig::simple(5, 4), &Target::new("sim"), move || {
            let handler = SimulatedHandler::scripted(millis(&[2])).track_releases(counter.clone());
            if spawned.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                handler.failing_init()
            } else {
                handler
            }
        })
        .await?;

    // Two of the five handlers initialize
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].success_count, 8);
    assert_eq!(releases.load(Ordering::SeqCst), 5);
    Ok(())
}

#[tokio::test]
async fn tiny_buffers_do_not_lose_events() -> Result<()> {
    let runner = quiet_runner();
    let config = RunConfig {
        concurrency: 8,
        requests_per_worker: 40,
        results_buffer_size: 0,
        snapshot_buffer_size: 1,
        ..RunConfig::default()
    };

    let reports = runner
        .run(&config, &Target::new("sim"), || {
            SimulatedHandler::scripted(millis(&[1]))
        })
        .await?;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].success_count, 320);
    Ok(())
}

#[tokio::test]
async fn zero_requests_produce_no_reports() -> Result<()> {
    let runner = quiet_runner();
    let releases = Arc::new(AtomicUsize::new(0));
    let counter = releases.clone();

    let reports = runner
        .run(&RunConfig::simple(3, 0), &Target::new("sim"), move || {
            SimulatedHandler::scripted(millis(&[1])).track_releases(counter.clone())
        })
        .await?;

    assert!(reports.is_empty());
    assert_eq!(releases.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn periodic_reports_are_rendered_before_the_final_one() -> Result<()> {
    let mut runner = BenchmarkRunner::new();
    let rendered = Arc::new(Mutex::new(Vec::<String>::new()));
    let output = rendered.clone();
    runner.redirect_output(Arc::new(move |text: &str| {
        output.lock().unwrap().push(text.to_string());
    }));

    let config = RunConfig {
        concurrency: 2,
        requests_per_worker: 12,
        stat_interval_secs: 1,
        ..RunConfig::default()
    };
    let reports = runner
        .run(&config, &Target::new("sim"), || {
            SimulatedHandler::new(Duration::from_millis(100))
        })
        .await?;

    assert_eq!(reports[0].success_count, 24);
    assert_eq!(reports[0].key.message_type, MessageType::SIMULATED);

    let rendered = rendered.lock().unwrap();
    assert!(rendered[0].contains("message type | method : simulated | request"));
    assert!(rendered.len() >= 2);
    assert!(rendered[0].starts_with("[tick 1]"));
    assert!(rendered.last().unwrap().starts_with("[final]"));
    Ok(())
}

struct FixedClock(Duration);

impl RunClock for FixedClock {
    fn elapsed(&self) -> Duration {
        self.0
    }
}

async fn replay(events: &[OutcomeEvent]) -> Vec<kite_bench::Report> {
    let renderer = ReportRenderer::new(
        4,
        true,
        Arc::new(MessageTypeRegistry::default()),
        Arc::new(|_: &str| {}),
    );
    let (sink, pipeline) = spawn_pipeline(
        &RunConfig::default(),
        FixedClock(Duration::from_millis(1500)),
        renderer,
    );
    for event in events {
        sink.record(event.clone()).await.unwrap();
    }
    drop(sink);
    pipeline.await.unwrap()
}

#[tokio::test]
async fn identical_event_sequences_yield_identical_reports() {
    let events: Vec<OutcomeEvent> = (0..40u64)
        .map(|i| {
            let method = if i % 2 == 0 { "read" } else { "write" };
            let elapsed = Duration::from_micros(500 + (i * 7919) % 3000);
            if i % 5 == 0 {
                OutcomeEvent::failure(MessageType::MQ, method, elapsed, -1002)
            } else {
                OutcomeEvent::success(MessageType::MQ, method, elapsed, 32)
            }
        })
        .collect();

    let first = replay(&events).await;
    let second = replay(&events).await;

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    assert_eq!(first[0].total_secs, 1.5);
    assert_eq!(
        first[0].distribution(true),
        second[0].distribution(true)
    );
    assert_eq!(first[1].histogram(), second[1].histogram());
}
