use std::time::Duration;

use tokio::{sync::mpsc::WeakUnboundedSender, task::JoinHandle};

use super::connection::Command;

pub type TimerId = u64;

/// A pending timer owned by a state. Dropping the handle cancels it.
///
/// On expiry the connection task receives the timer id and passes it to the
/// current state, which compares it against the timers it still holds.
#[derive(Debug)]
pub struct Timer {
    id: TimerId,
    task: JoinHandle<()>,
}

impl Timer {
    pub(crate) fn spawn(
        id: TimerId,
        delay: Duration,
        commands: WeakUnboundedSender<Command>,
    ) -> Self {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Timer(id));
            }
        });
        Self { id, task }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn is(&self, id: TimerId) -> bool {
        self.id == id
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
