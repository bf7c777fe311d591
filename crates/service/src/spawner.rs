// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Runs a non-Send async service on a dedicated OS thread with a
//! single-threaded tokio runtime and LocalSet, plus a shutdown signal.
//!
//! Parallelism across services comes from one thread per service; within a
//! service, tasks interleave cooperatively on its own scheduler and sockets
//! are never shared across threads.

use crate::error::Error;
use std::future::Future;
use std::thread;
use tokio::{runtime::Builder as RtBuilder, task::LocalSet};
use tokio_util::sync::CancellationToken;

/// Handle to a service running on a dedicated thread.
pub struct ServiceThreadHandle<T, E> {
    cancel_token: CancellationToken,
    join_handle: Option<thread::JoinHandle<Result<T, E>>>,
    name: String,
}

impl<T, E> ServiceThreadHandle<T, E> {
    /// Requests a graceful shutdown by cancelling the token. Idempotent.
    pub fn shutdown(&mut self) {
        self.cancel_token.cancel();
    }

    /// The thread's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the service thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join_handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Requests shutdown and waits for the thread to exit.
    pub fn shutdown_and_join(mut self) -> Result<T, Error>
    where
        E: Into<Error>,
    {
        self.shutdown();
        self.join_inner()
    }

    /// Waits for the thread to exit without requesting shutdown.
    pub fn join(mut self) -> Result<T, Error>
    where
        E: Into<Error>,
    {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<T, Error>
    where
        E: Into<Error>,
    {
        let Some(handle) = self.join_handle.take() else {
            return Err(Error::ThreadJoinPanic {
                thread_name: self.name.clone(),
                panic_message: "join handle already consumed".to_string(),
            });
        };
        match handle.join() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.into()),
            Err(panic) => Err(Error::ThreadJoinPanic {
                thread_name: self.name.clone(),
                panic_message: format!("{panic:?}"),
            }),
        }
    }
}

/// Spawns a non-Send async service on a dedicated OS thread.
///
/// The `task_factory` receives a CancellationToken that fires when shutdown
/// is requested; the service must observe it and exit promptly.
pub fn spawn_service_thread<T, E, Fut, F>(
    thread_name: impl Into<String>,
    task_factory: F,
) -> Result<ServiceThreadHandle<T, E>, Error>
where
    T: Send + 'static,
    E: Send + 'static,
    Fut: 'static + Future<Output = Result<T, E>>,
    F: 'static + Send + FnOnce(CancellationToken) -> Fut,
{
    let name = thread_name.into();
    let name_for_thread = name.clone();
    let token = CancellationToken::new();
    let token_for_task = token.clone();

    let join_handle = thread::Builder::new()
        .name(name_for_thread)
        .spawn(move || {
            let rt = RtBuilder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| e.to_string());
            let rt = match rt {
                Ok(rt) => rt,
                Err(e) => {
                    // Runtime construction failures are unrecoverable for
                    // this service; surface them through the panic path.
                    panic!("failed to create runtime: {e}");
                }
            };
            let local = LocalSet::new();
            let fut = task_factory(token_for_task);
            rt.block_on(local.run_until(fut))
        })
        .map_err(|e| Error::ThreadSpawn { thread_name: name.clone(), source: e })?;

    Ok(ServiceThreadHandle { cancel_token: token, join_handle: Some(join_handle), name })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_runs_to_completion() {
        let handle = spawn_service_thread("svc", |_cancel| async move {
            Ok::<_, Error>(21 * 2)
        })
        .expect("spawn");
        assert_eq!(handle.join().expect("join"), 42);
    }

    #[test]
    fn shutdown_cancels_the_task() {
        let handle = spawn_service_thread("svc", |cancel| async move {
            cancel.cancelled().await;
            Ok::<_, Error>("stopped")
        })
        .expect("spawn");
        assert_eq!(handle.shutdown_and_join().expect("join"), "stopped");
    }

    #[test]
    fn panics_surface_as_errors() {
        let trigger = true;
        let handle = spawn_service_thread("svc", move |_cancel| async move {
            if trigger {
                panic!("boom");
            }
            Ok::<_, Error>(())
        })
        .expect("spawn");
        assert!(matches!(handle.join(), Err(Error::ThreadJoinPanic { .. })));
    }
}
