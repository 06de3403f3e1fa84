// Copyright Delta PubSub Contributors - SPDX Identifier: Apache-2.0

//! Generic supervision: a task that spawns a child, watches its
//! termination, and respawns it after `restart-delay` if it panicked.
//! Mirrors the source's tree of long-lived agents without needing any
//! runtime-specific supervision primitive -- just a `tokio::spawn`ed loop
//! watching a `JoinHandle`.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::SupervisorCrash;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Supervise a child task built fresh by `make_task` on every (re)start.
/// The child's own state is expected to live in `Arc`-shared structures
/// captured by `make_task`'s closure, so a restart only discards whatever
/// ephemeral state lived purely on the crashed task's stack -- exactly the
/// "in-flight non-replicated state" the error-handling design calls out.
///
/// Returns a handle to the supervisor loop itself; aborting it tears down
/// both the supervisor and whichever child is currently running.
pub fn spawn_supervised<F>(
    component: &'static str,
    restart_delay: Duration,
    mut make_task: F,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut() -> BoxFuture + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let child = tokio::spawn(make_task());
            match child.await {
                Ok(()) => {
                    // The child exited on its own (a clean `Stop`); nothing
                    // more for the supervisor to do.
                    break;
                }
                Err(join_error) => {
                    let crash = SupervisorCrash {
                        component,
                        message: join_error.to_string(),
                    };
                    logger_core::log_error(
                        "supervisor",
                        format!("{crash}; restarting in {restart_delay:?}"),
                    );
                    tokio::time::sleep(restart_delay).await;
                }
            }
        }
    })
}
