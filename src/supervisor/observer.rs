// Per-child observer: waits for exit, reports it, does nothing else.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::event::Event;
use crate::process::{Attached, ExitStatus};

/// Spawns the task that reaps the attached child and reports its exit both
/// on the child's exit watch and on the Supervisor's event channel.
pub fn spawn(attached: Attached, events: mpsc::Sender<Event>) -> JoinHandle<()> {
    let Attached {
        role,
        generation,
        mut waiter,
        exit_tx,
    } = attached;

    tokio::task::spawn(async move {
        let status = match waiter.wait().await {
            Ok(status) => status,
            Err(e) => {
                error!(
                    component = "observer",
                    event = "wait_failed",
                    role = role.as_str(),
                    generation,
                    error = %e,
                    "failed to collect child exit status"
                );
                ExitStatus::unknown()
            }
        };

        info!(
            component = "observer",
            event = "exited",
            role = role.as_str(),
            generation,
            status = %status,
            "child process exited"
        );

        let _ = exit_tx.send(Some(status));
        let _ = events
            .send(Event::Exited {
                role,
                generation,
                status,
            })
            .await;
    })
}
