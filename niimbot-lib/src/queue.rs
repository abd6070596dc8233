//! FIFO task runner guarding the single request/response channel.
//!
//! The queue owns its context (in practice the [`Transceiver`](crate::transceiver::Transceiver))
//! and lends it to one task at a time, so nothing outside a running task can
//! reach the link.

use crate::error::{NiimError, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type Job<C> = Box<dyn for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, ()> + Send>;

fn boxed<C, F>(job: F) -> Job<C>
where
    F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, ()> + Send + 'static,
{
    Box::new(job)
}

/// Result of a submitted task.
pub struct JobHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> JobHandle<T> {
    /// Wait for the task to finish. Fails only if the queue died underneath it.
    pub async fn wait(self) -> Result<T> {
        self.rx.await.map_err(|_| NiimError::QueueClosed)
    }
}

/// Cloneable handle to one worker executing tasks strictly in submission order.
pub struct ExecutionQueue<C> {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<Job<C>>>>>,
    worker: Arc<tokio::sync::Mutex<Option<JoinHandle<C>>>>,
}

impl<C> Clone for ExecutionQueue<C> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
            worker: Arc::clone(&self.worker),
        }
    }
}

impl<C: Send + 'static> ExecutionQueue<C> {
    /// Spawn the worker. Must be called inside a Tokio runtime.
    pub fn new(context: C) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job<C>>();
        let worker = tokio::spawn(async move {
            let mut context = context;
            let mut executed: u64 = 0;
            while let Some(job) = rx.recv().await {
                job(&mut context).await;
                executed += 1;
            }
            debug!(executed, "Execution queue drained");
            context
        });

        Self {
            sender: Arc::new(Mutex::new(Some(tx))),
            worker: Arc::new(tokio::sync::Mutex::new(Some(worker))),
        }
    }

    /// Append a task. It starts once every earlier task has completed.
    pub fn submit<T, F>(&self, task: F) -> Result<JobHandle<T>>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, T> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        let job = boxed(move |context: &mut C| {
            Box::pin(async move {
                let output = task(context).await;
                // the submitter may have stopped waiting
                let _ = result_tx.send(output);
            }) as BoxFuture<'_, ()>
        });

        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(tx) => tx.send(job).map_err(|_| NiimError::QueueClosed)?,
            None => return Err(NiimError::QueueClosed),
        }
        Ok(JobHandle { rx: result_rx })
    }

    /// Submit and wait for the result.
    pub async fn run<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, T> + Send + 'static,
    {
        self.submit(task)?.wait().await
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Refuse new tasks, then wait until the running and queued ones finish.
    ///
    /// Hands the context back to the first caller; later calls get `None`.
    pub async fn shutdown(&self) -> Option<C> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        let handle = self.worker.lock().await.take()?;
        match handle.await {
            Ok(context) => Some(context),
            Err(e) => {
                error!(error = %e, "Execution queue worker failed");
                None
            }
        }
    }
}
