//! Tests for the printer session: heartbeat polling, observable state and printing

mod common;

use common::*;
use niimbot_lib::model::Product;
use niimbot_lib::printer::PrintJob;
use niimbot_lib::session::{PrinterSession, SessionPhase};
use std::sync::Arc;

fn config() -> SessionConfig {
    SessionConfig::default().with_retry(fast_retry())
}

async fn open(
    sim: SimulatedPrinter,
    config: SessionConfig,
) -> (PrinterSession<SimulatedPrinter>, SimHandle) {
    init_tracing();
    let handle = sim.handle();
    let session = PrinterSession::open(sim, config).await.expect("session opens");
    (session, handle)
}

fn job() -> PrintJob {
    PrintJob::from_bitmap(&one_line_bitmap(16, 10, 4)).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_open_reads_device_info() {
    let (session, sim) = open(SimulatedPrinter::new(), config().without_heartbeat()).await;

    let state = session.state();
    assert_eq!(state.phase, SessionPhase::Connected);
    let info = state.device_info.expect("device info");
    assert_eq!(info.model, Product::B21);
    assert_eq!(info.serial.as_deref(), Some("1234AB"));
    assert!(state.updated_at.is_some());
    assert_eq!(sim.count(CommandType::GetInfo), 3);
    assert_eq!(sim.count(CommandType::Heartbeat), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_config_rejected() {
    let result = PrinterSession::open(SimulatedPrinter::new(), config().with_chunk_size(0)).await;
    assert!(matches!(result, Err(NiimError::InvalidChunkSize(0))));
}

#[tokio::test(start_paused = true)]
async fn test_zero_retry_caps_rejected() {
    let no_end_page = RetryPolicy {
        max_end_page_attempts: 0,
        ..fast_retry()
    };
    let result =
        PrinterSession::open(SimulatedPrinter::new(), config().with_retry(no_end_page)).await;
    assert!(matches!(result, Err(NiimError::Config(_))));

    let no_polls = RetryPolicy {
        max_status_polls: 0,
        ..fast_retry()
    };
    assert!(matches!(config().with_retry(no_polls).validate(), Err(NiimError::Config(_))));
    assert!(config().validate().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_cadence() {
    let (session, sim) = open(SimulatedPrinter::new(), config()).await;

    // ticks at 0 s, 3 s and 6 s
    tokio::time::sleep(Duration::from_millis(6500)).await;
    assert_eq!(sim.count(CommandType::Heartbeat), 3);

    let state = session.state();
    assert_eq!(state.status.map(|s| s.closing), Some(1));
    assert_eq!(state.rfid.as_ref().map(|r| r.total), Some(160));
}

#[tokio::test(start_paused = true)]
async fn test_rfid_refreshed_on_lid_change_only() {
    let (session, sim) = open(SimulatedPrinter::new(), config()).await;

    tokio::time::sleep(Duration::from_millis(6500)).await;
    assert_eq!(sim.count(CommandType::GetRfid), 1, "First reading counts as a change");

    sim.set_heartbeat(default_heartbeat(0));
    sim.set_rfid(rfid_payload(b"ABC", b"XY", 10, 5, 1));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(sim.count(CommandType::GetRfid), 2);
    assert_eq!(session.state().rfid.map(|r| r.barcode), Some("ABC".to_string()));

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(sim.count(CommandType::GetRfid), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_heartbeat_keeps_last_status() {
    let (session, sim) = open(SimulatedPrinter::new(), config()).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    let before = session.state().status;
    assert!(before.is_some());

    sim.set_reply(CommandType::Heartbeat, Reply::Error);
    sim.set_reply(CommandType::GetRfid, Reply::Error);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(sim.count(CommandType::Heartbeat) >= 3);
    assert_eq!(session.state().status, before);
    assert!(session.state().rfid.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_no_heartbeat_while_printing() {
    let retry = RetryPolicy {
        backoff: Duration::from_secs(1),
        max_end_page_attempts: 5,
        max_status_polls: 50,
    };
    let sim = SimulatedPrinter::new().with_status_polls(10);
    let config = config()
        .with_retry(retry)
        .with_heartbeat_interval(Duration::from_secs(1));
    let (session, sim) = open(sim, config).await;
    let session = Arc::new(session);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let printer = Arc::clone(&session);
    let print = tokio::spawn(async move { printer.print(job()).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(session.is_printing());
    assert_eq!(session.state().phase, SessionPhase::BusyPrinting);
    let heartbeats = sim.count(CommandType::Heartbeat);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(session.is_printing());
    assert_eq!(sim.count(CommandType::Heartbeat), heartbeats);
    assert!(session.state().job_status.is_some());

    print.await.unwrap().unwrap();
    assert!(!session.is_printing());
    let state = session.state();
    assert_eq!(state.phase, SessionPhase::Connected);
    assert!(state.last_error.is_none());
    assert!(state.job_status.is_none());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(sim.count(CommandType::Heartbeat) > heartbeats);
}

#[tokio::test(start_paused = true)]
async fn test_second_print_rejected_while_busy() {
    let retry = RetryPolicy {
        backoff: Duration::from_secs(1),
        ..fast_retry()
    };
    let sim = SimulatedPrinter::new().with_status_polls(5);
    let (session, sim) = open(sim, config().with_retry(retry).without_heartbeat()).await;
    let session = Arc::new(session);

    let printer = Arc::clone(&session);
    let first = tokio::spawn(async move { printer.print(job()).await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(matches!(session.print(job()).await, Err(NiimError::AlreadyPrinting)));
    first.await.unwrap().unwrap();
    assert_eq!(sim.count(CommandType::StartPrint), 1);

    session.print(job()).await.unwrap();
    assert_eq!(sim.count(CommandType::StartPrint), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_print_is_reported() {
    let (session, sim) = open(SimulatedPrinter::new(), config().without_heartbeat()).await;
    sim.push_reply(CommandType::StartPage, Reply::Error);

    let err = session.print(job()).await.unwrap_err();
    assert_eq!(err.to_string(), "Failed starting page: Device reported an error");

    let state = session.state();
    assert!(!session.is_printing());
    assert_eq!(state.last_error.as_deref(), Some("Failed starting page: Device reported an error"));
    assert_eq!(state.phase, SessionPhase::Connected);

    session.print(job()).await.unwrap();
    assert!(session.state().last_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_state_is_observable() {
    let (session, _sim) = open(SimulatedPrinter::new(), config().without_heartbeat()).await;
    let mut rx = session.subscribe();
    assert!(!rx.has_changed().unwrap());

    let status = session.refresh_status().await.unwrap();
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().status, Some(status));
}

#[tokio::test(start_paused = true)]
async fn test_execute_custom_exchange() {
    let (session, sim) = open(SimulatedPrinter::new(), config().without_heartbeat()).await;

    let density = session
        .execute(|t: &mut Transceiver<SimulatedPrinter>| {
            Box::pin(async move {
                t.command_with_offset(CommandType::GetInfo, &[1], 1)
                    .await
                    .map(|p| p.as_int())
            }) as BoxFuture<'_, Result<u64, NiimError>>
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(density, 0);
    assert_eq!(sim.received().last().map(|p| p.payload().to_vec()), Some(vec![1]));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_polling() {
    let (session, sim) = open(SimulatedPrinter::new(), config()).await;
    tokio::time::sleep(Duration::from_millis(3500)).await;

    let link = session.disconnect().await.unwrap();
    assert!(!sim.is_connected());
    let heartbeats = sim.count(CommandType::Heartbeat);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(sim.count(CommandType::Heartbeat), heartbeats);
    drop(link);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_link_goes_idle() {
    let (session, sim) = open(SimulatedPrinter::new(), config()).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(session.state().phase, SessionPhase::Connected);

    sim.set_connected(false);
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(session.state().phase, SessionPhase::Idle);
    assert!(session.state().status.is_some(), "Last status survives the drop");
}

#[tokio::test(start_paused = true)]
async fn test_silent_printer_does_not_backlog_heartbeats() {
    let (session, sim) = open(SimulatedPrinter::new(), SessionConfig::default()).await;
    sim.set_reply(CommandType::Heartbeat, Reply::Silent);

    // each heartbeat waits out the 10 s response timeout; stop between ticks
    tokio::time::sleep(Duration::from_secs(125)).await;
    let sent = sim.count(CommandType::Heartbeat);
    assert!(sent <= 12, "One heartbeat per timeout at most, got {sent}");

    let started = tokio::time::Instant::now();
    session.disconnect().await.unwrap();
    assert!(started.elapsed() <= Duration::from_secs(10));
    assert_eq!(sim.count(CommandType::Heartbeat), sent);
}
