//! One paired printer: the execution queue, the heartbeat ticker and the
//! observable state the presentation layer renders.

use crate::config::{RetryPolicy, SessionConfig};
use crate::error::{NiimError, Result};
use crate::link::Link;
use crate::printer::{PrintJob, run_print_job};
use crate::queue::{BoxFuture, ExecutionQueue};
use crate::telemetry::{DeviceInfo, DeviceStatus, PrintJobStatus, RfidRollState};
use crate::transceiver::Transceiver;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strum_macros::Display;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize)]
pub enum SessionPhase {
    /// Session exists but the link is not connected
    #[default]
    Idle,
    Connected,
    BusyPrinting,
}

/// Snapshot of everything known about the printer.
///
/// Telemetry fields keep their last good value when a poll fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub phase: SessionPhase,
    pub device_info: Option<DeviceInfo>,
    pub status: Option<DeviceStatus>,
    pub rfid: Option<RfidRollState>,
    pub job_status: Option<PrintJobStatus>,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

struct Shared {
    printing: AtomicBool,
    /// A ticker heartbeat is queued or running
    heartbeat_pending: AtomicBool,
    state: watch::Sender<SessionState>,
}

impl Shared {
    fn is_printing(&self) -> bool {
        self.printing.load(Ordering::SeqCst)
    }

    fn update(&self, f: impl FnOnce(&mut SessionState)) {
        self.state.send_modify(|state| {
            f(state);
            state.updated_at = Some(Utc::now());
        });
    }
}

type Queue<L> = ExecutionQueue<Transceiver<L>>;

/// Explicitly owned handle to one printer.
///
/// Created once the link is paired, torn down with [`PrinterSession::disconnect`].
pub struct PrinterSession<L: Link + 'static> {
    queue: Queue<L>,
    shared: Arc<Shared>,
    heartbeat: Option<JoinHandle<()>>,
    retry: RetryPolicy,
}

impl<L: Link + 'static> PrinterSession<L> {
    /// Read device info, then start the heartbeat if enabled.
    pub async fn open(link: L, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let (state, _) = watch::channel(SessionState::default());
        let shared = Arc::new(Shared {
            printing: AtomicBool::new(false),
            heartbeat_pending: AtomicBool::new(false),
            state,
        });
        let queue = ExecutionQueue::new(Transceiver::new(link, config.transceiver.clone()));

        let s = Arc::clone(&shared);
        queue
            .run(move |t: &mut Transceiver<L>| {
                Box::pin(async move {
                    let info = t.device_info().await;
                    let connected = t.link().is_connected().await;
                    info!(model = %info.model, serial = ?info.serial, "Device info read");
                    s.update(|state| {
                        state.device_info = Some(info);
                        state.phase = if connected {
                            SessionPhase::Connected
                        } else {
                            SessionPhase::Idle
                        };
                    });
                }) as BoxFuture<'_, ()>
            })
            .await?;

        let heartbeat = config
            .poll_heartbeat
            .then(|| {
                spawn_heartbeat(queue.clone(), Arc::clone(&shared), config.heartbeat_interval)
            });

        Ok(Self {
            queue,
            shared,
            heartbeat,
            retry: config.retry,
        })
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn is_printing(&self) -> bool {
        self.shared.is_printing()
    }

    /// Print `job`, resolving when the printer is done.
    ///
    /// Fails at once with [`NiimError::AlreadyPrinting`] while another job runs;
    /// such a job is not queued.
    pub async fn print(&self, job: PrintJob) -> Result<()> {
        job.validate()?;
        if self
            .shared
            .printing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(NiimError::AlreadyPrinting);
        }

        let shared = Arc::clone(&self.shared);
        let retry = self.retry.clone();
        let submitted = self.queue.submit(move |t: &mut Transceiver<L>| {
            Box::pin(print_task(t, job, retry, shared)) as BoxFuture<'_, Result<()>>
        });
        let outcome = match submitted {
            Ok(handle) => handle.wait().await.and_then(|result| result),
            Err(e) => Err(e),
        };
        if outcome.is_err() {
            self.shared.printing.store(false, Ordering::SeqCst);
        }
        outcome
    }

    /// Heartbeat right now instead of waiting for the ticker.
    pub async fn refresh_status(&self) -> Result<DeviceStatus> {
        let shared = Arc::clone(&self.shared);
        self.queue
            .run(move |t: &mut Transceiver<L>| {
                Box::pin(async move {
                    let status = t.heartbeat().await?;
                    shared.update(|state| state.status = Some(status));
                    Ok(status)
                }) as BoxFuture<'_, Result<DeviceStatus>>
            })
            .await?
    }

    /// Run a custom exchange on the queue, after everything already queued.
    pub async fn execute<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut Transceiver<L>) -> BoxFuture<'a, T> + Send + 'static,
    {
        self.queue.run(task).await
    }

    /// Stop polling, drain the queue and disconnect. Returns the link.
    pub async fn disconnect(mut self) -> Result<L> {
        if let Some(ticker) = self.heartbeat.take() {
            ticker.abort();
        }
        let transceiver = self.queue.shutdown().await.ok_or(NiimError::QueueClosed)?;
        let mut link = transceiver.into_link();
        link.disconnect().await?;
        self.shared.update(|state| *state = SessionState::default());
        info!("Session closed");
        Ok(link)
    }
}

impl<L: Link + 'static> Drop for PrinterSession<L> {
    fn drop(&mut self) {
        if let Some(ticker) = self.heartbeat.take() {
            ticker.abort();
        }
    }
}

async fn print_task<L: Link>(
    transceiver: &mut Transceiver<L>,
    job: PrintJob,
    retry: RetryPolicy,
    shared: Arc<Shared>,
) -> Result<()> {
    shared.update(|state| {
        state.phase = SessionPhase::BusyPrinting;
        state.job_status = None;
        state.last_error = None;
    });

    let result = run_print_job(transceiver, &job, &retry, |status| {
        shared.update(|state| state.job_status = status);
    })
    .await;

    if let Err(e) = &result {
        error!(error = %e, "Print job failed");
    }
    shared.printing.store(false, Ordering::SeqCst);
    shared.update(|state| {
        state.phase = SessionPhase::Connected;
        state.job_status = None;
        state.last_error = result.as_ref().err().map(ToString::to_string);
    });
    result
}

fn spawn_heartbeat<L: Link + 'static>(
    queue: Queue<L>,
    shared: Arc<Shared>,
    interval: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if shared.is_printing() {
                trace!("Printing, heartbeat skipped");
                continue;
            }
            if shared
                .heartbeat_pending
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                trace!("Previous heartbeat unresolved, tick skipped");
                continue;
            }
            let pending = PendingHeartbeat(Arc::clone(&shared));
            let q = queue.clone();
            let s = Arc::clone(&shared);
            let submitted = queue.submit(move |t: &mut Transceiver<L>| {
                Box::pin(async move {
                    let _pending = pending;
                    poll_heartbeat(t, q, s).await;
                }) as BoxFuture<'_, ()>
            });
            if submitted.is_err() {
                debug!("Queue closed, heartbeat stopped");
                break;
            }
        }
    })
}

/// Clears `heartbeat_pending` once the queued heartbeat has run or been dropped.
struct PendingHeartbeat(Arc<Shared>);

impl Drop for PendingHeartbeat {
    fn drop(&mut self) {
        self.0.heartbeat_pending.store(false, Ordering::SeqCst);
    }
}

async fn poll_heartbeat<L: Link + 'static>(
    transceiver: &mut Transceiver<L>,
    queue: Queue<L>,
    shared: Arc<Shared>,
) {
    if shared.is_printing() {
        return;
    }
    if !transceiver.link().is_connected().await {
        shared.update(|state| state.phase = SessionPhase::Idle);
        return;
    }

    let previous_closing = shared.state.borrow().status.map(|s| s.closing);
    match transceiver.heartbeat().await {
        Ok(status) => {
            shared.update(|state| {
                state.status = Some(status);
                if state.phase == SessionPhase::Idle {
                    state.phase = SessionPhase::Connected;
                }
            });
            // the roll can only change while the lid moves
            if previous_closing != Some(status.closing) {
                let s = Arc::clone(&shared);
                let _ = queue.submit(move |t: &mut Transceiver<L>| {
                    Box::pin(refresh_rfid(t, s)) as BoxFuture<'_, ()>
                });
            }
        }
        Err(e) => debug!(error = %e, "Heartbeat failed, keeping last status"),
    }
}

async fn refresh_rfid<L: Link>(transceiver: &mut Transceiver<L>, shared: Arc<Shared>) {
    if shared.is_printing() {
        return;
    }
    match transceiver.rfid_roll_state().await {
        Ok(Some(roll)) => shared.update(|state| state.rfid = Some(roll)),
        Ok(None) => {}
        Err(e) => debug!(error = %e, "RFID read failed, keeping last roll state"),
    }
}
