use anyhow::Context;
use axum::{
    extract::{Path, State},
    routing::get,
    Router,
};
use http::StatusCode;
use std::{
    net::Ipv4Addr,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use surge::{
    address::{Address, AddressBatch},
    config::Scenario,
    driver::LoadDriver,
    metrics::{self, MetricsLog},
    threshold::Threshold,
};
use tokio::net::TcpListener;

/// A lookup API which records every address it is asked for.
#[derive(Debug, Default)]
struct Target {
    seen: Mutex<Vec<String>>,
    /// Address answered with `500`.
    failing: Option<String>,
    /// Delay before answering addresses with an odd final octet.
    slow_odd: Option<Duration>,
}
impl Target {
    fn seen(&self) -> MutexGuard<'_, Vec<String>> {
        self.seen.lock().expect("recording lock should not be poisoned")
    }
}

async fn record(State(target): State<Arc<Target>>, Path(address): Path<String>) -> StatusCode {
    target.seen().push(address.clone());

    if let Some(delay) = target.slow_odd {
        let odd = address
            .parse::<Ipv4Addr>()
            .map(|ip| ip.octets()[3] % 2 == 1)
            .unwrap_or(false);
        if odd {
            tokio::time::sleep(delay).await;
        }
    }

    if target.failing.as_deref() == Some(address.as_str()) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

/// Serves `target` on an ephemeral port.
async fn spawn_target(target: Target) -> anyhow::Result<(String, Arc<Target>)> {
    let target = Arc::new(target);
    let app = Router::new()
        .route("/api/lookup/:address", get(record))
        .with_state(target.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let base_url = format!("http://{}", listener.local_addr()?);
    tokio::spawn(async move { axum::serve(listener, app).await });

    Ok((base_url, target))
}

/// A target which fails lookups of 169.1.245.7.
async fn recording_target() -> anyhow::Result<(String, Arc<Target>)> {
    spawn_target(Target {
        failing: Some("169.1.245.7".to_string()),
        ..Target::default()
    })
    .await
}

fn driver_for(base_url: &str, pause: Duration) -> anyhow::Result<(LoadDriver, metrics::SharedMetricsLog)> {
    driver_with_timeout(base_url, pause, Duration::from_secs(10))
}

fn driver_with_timeout(
    base_url: &str,
    pause: Duration,
    request_timeout: Duration,
) -> anyhow::Result<(LoadDriver, metrics::SharedMetricsLog)> {
    let scenario = Scenario {
        base_url: base_url.to_string(),
        pause,
        ..Scenario::default()
    };
    let metrics_log = MetricsLog::shared();
    let driver = LoadDriver::new(scenario, request_timeout, metrics_log.clone())?;
    Ok((driver, metrics_log))
}

fn batch_of(last_octets: &[u8]) -> AddressBatch {
    last_octets
        .iter()
        .map(|n| Address::from(Ipv4Addr::new(169, 1, 245, *n)))
        .collect::<Vec<_>>()
        .into()
}

#[tokio::test]
async fn full_iteration_against_healthy_target_passes_every_check() -> anyhow::Result<()> {
    let (base_url, target) = spawn_target(Target::default()).await?;
    let (driver, metrics_log) = driver_for(&base_url, Duration::from_millis(100))?;

    let start = Instant::now();
    driver.run_iteration().await;
    let elapsed = start.elapsed();

    // 100 pauses of 100ms, request latency on top
    assert!(elapsed >= Duration::from_millis(9_900), "took {:?}", elapsed);

    let log = metrics::lock(&metrics_log);
    let check = log
        .get_check("is status 200")
        .copied()
        .context("check should have been recorded")?;
    assert_eq!(check.passes, 100);
    assert_eq!(check.fails, 0);
    assert_eq!(log.requests(), 100);
    assert_eq!(log.failed_requests(), 0);
    assert_eq!(log.http_req_duration().count(), 100);
    assert_eq!(log.iterations(), 1);

    let seen = target.seen();
    assert_eq!(seen.len(), 100);
    for address in seen.iter() {
        let octets = address
            .parse::<Ipv4Addr>()
            .context("target should only see IPv4 addresses")?
            .octets();
        assert_eq!(&octets[..3], &[169, 1, 245]);
    }
    Ok(())
}

#[tokio::test]
async fn timed_out_requests_count_against_latency_thresholds() -> anyhow::Result<()> {
    let (base_url, _) = spawn_target(Target {
        slow_odd: Some(Duration::from_secs(3)),
        ..Target::default()
    })
    .await?;
    let (driver, metrics_log) =
        driver_with_timeout(&base_url, Duration::from_millis(1), Duration::from_secs(1))?;

    driver.run_batch(batch_of(&(0..20).collect::<Vec<u8>>())).await;

    let log = metrics::lock(&metrics_log);
    assert_eq!(log.requests(), 20);
    assert_eq!(log.failed_requests(), 10);
    assert_eq!(log.get_status_counts().get("TIMEOUT"), Some(&10));

    // half the samples sit at the request timeout
    let durations = log.http_req_duration();
    assert_eq!(durations.count(), 20);
    assert!(durations.max().is_some_and(|max| max >= 1_000.0));

    let p95 = Threshold::parse("http_req_duration", "p(95)<500")?.evaluate(&log);
    assert!(!p95.passed, "p95 was {:?}", p95.observed);
    Ok(())
}

#[tokio::test]
async fn one_failing_address_fails_exactly_one_check() -> anyhow::Result<()> {
    let (base_url, target) = recording_target().await?;
    let (driver, metrics_log) = driver_for(&base_url, Duration::from_millis(1))?;

    let mut octets = (0..=255u8).filter(|n| *n != 7).take(99).collect::<Vec<_>>();
    octets.insert(42, 7);
    let batch = batch_of(&octets);
    let expected = batch.iter().map(|a| a.to_string()).collect::<Vec<_>>();

    driver.run_batch(batch).await;

    let log = metrics::lock(&metrics_log);
    let check = log
        .get_check("is status 200")
        .copied()
        .context("check should have been recorded")?;
    assert_eq!(check.passes, 99);
    assert_eq!(check.fails, 1);
    assert_eq!(log.get_status_counts().get("500"), Some(&1));

    // requests go out one at a time, in batch order
    assert_eq!(*target.seen(), expected);
    Ok(())
}

#[tokio::test]
async fn duplicate_addresses_are_requested_every_time() -> anyhow::Result<()> {
    let (base_url, target) = recording_target().await?;
    let (driver, metrics_log) = driver_for(&base_url, Duration::from_millis(1))?;

    driver.run_batch(batch_of(&[7, 7, 8])).await;

    let log = metrics::lock(&metrics_log);
    assert_eq!(log.requests(), 3);
    assert_eq!(log.failed_requests(), 2);
    assert_eq!(target.seen().len(), 3);
    Ok(())
}

#[tokio::test]
async fn each_request_is_followed_by_the_pause() -> anyhow::Result<()> {
    let (base_url, _) = recording_target().await?;
    let (driver, _) = driver_for(&base_url, Duration::from_millis(50))?;

    let start = Instant::now();
    driver.run_batch(batch_of(&[1, 2, 3, 4])).await;

    assert!(start.elapsed() >= Duration::from_millis(200));
    Ok(())
}
