//! Delayed delivery of synthetic events
//!
//! The [`Scheduler`] runs a single timer task holding a deadline-ordered
//! queue. Scheduled actions never write to a device themselves: a replayed
//! mouse event goes back into the mouse channel, and a synthetic keyboard
//! event goes to the dispatch loop's synthetic channel. The dispatch loop
//! stays the only writer to the virtual devices.
//!
//! Actions with the same deadline fire in the order they were scheduled.
//! Everything still pending when the session is cancelled is dropped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use evdev::InputEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::event::RoutedEvent;

/// A one-shot action carried out after its delay
#[derive(Debug, Clone)]
pub enum ScheduledAction {
    /// Re-inject a complete frame into the mouse channel, tagged as replayed
    ReplayMouse(Vec<InputEvent>),
    /// Hand events to the dispatch loop for the keyboard output
    EmitKeyboard(Vec<InputEvent>),
}

/// Identifies a scheduled action so it can be cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScheduleId(u64);

/// Where fired actions are delivered
#[derive(Debug, Clone)]
pub struct Targets {
    pub mouse: mpsc::Sender<RoutedEvent>,
    pub synthetic: mpsc::Sender<Vec<InputEvent>>,
}

enum Command {
    Schedule(Pending),
    Cancel(ScheduleId),
}

struct Pending {
    deadline: Instant,
    id: ScheduleId,
    action: ScheduledAction,
}

// Min-heap on (deadline, id): earlier deadline first, then scheduling order
impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Pending {}

/// Handle used by the dispatch loop to schedule actions
pub struct Scheduler {
    commands: mpsc::UnboundedSender<Command>,
    next_id: u64,
}

impl Scheduler {
    /// Start the timer task. It exits when the token is cancelled or the
    /// returned `Scheduler` is dropped.
    pub fn spawn(targets: Targets, cancel: CancelToken) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_timer(rx, targets, cancel));
        (
            Self {
                commands,
                next_id: 0,
            },
            handle,
        )
    }

    /// Schedule `action` to run once `delay` has elapsed. Returns immediately.
    pub fn schedule(&mut self, delay: Duration, action: ScheduledAction) -> ScheduleId {
        let id = ScheduleId(self.next_id);
        self.next_id += 1;

        let pending = Pending {
            deadline: Instant::now() + delay,
            id,
            action,
        };

        if self.commands.send(Command::Schedule(pending)).is_err() {
            debug!("Scheduler stopped, dropping action {:?}", id);
        }
        id
    }

    /// Drop a scheduled action if it has not fired yet
    pub fn cancel(&self, id: ScheduleId) {
        let _ = self.commands.send(Command::Cancel(id));
    }
}

async fn run_timer(
    mut commands: mpsc::UnboundedReceiver<Command>,
    targets: Targets,
    cancel: CancelToken,
) {
    let mut queue: BinaryHeap<Pending> = BinaryHeap::new();

    loop {
        let next_deadline = queue.peek().map(|pending| pending.deadline);

        tokio::select! {
            _ = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(Command::Schedule(pending)) => queue.push(pending),
                Some(Command::Cancel(id)) => queue.retain(|pending| pending.id != id),
                None => break,
            },
            _ = sleep_until(next_deadline) => {
                let now = Instant::now();
                while queue.peek().is_some_and(|pending| pending.deadline <= now) {
                    if let Some(pending) = queue.pop() {
                        fire(pending, &targets).await;
                    }
                }
            }
        }
    }

    if !queue.is_empty() {
        debug!("Dropping {} pending scheduled action(s)", queue.len());
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn fire(pending: Pending, targets: &Targets) {
    // A closed channel means the session is shutting down; drop silently
    match pending.action {
        ScheduledAction::ReplayMouse(frame) => {
            if targets.mouse.send(RoutedEvent::replayed(frame)).await.is_err() {
                debug!("Mouse channel closed, dropping replay {:?}", pending.id);
            }
        }
        ScheduledAction::EmitKeyboard(events) => {
            if targets.synthetic.send(events).await.is_err() {
                debug!("Dispatch loop gone, dropping synthetic {:?}", pending.id);
            }
        }
    }
}
