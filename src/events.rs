use std::collections::HashMap;
use std::sync::PoisonError;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::job::Job;

/// Hook points recognized by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    BeforeFirstFork,
    BeforeFork,
    AfterFork,
    BeforePerform,
    AfterPerform,
    OnFailure,
    BeforeEnqueue,
    AfterEnqueue,
    BeforeSchedule,
    AfterSchedule,
    BeforeReserve,
    AfterReserve,
}

/// Payload handed to listeners; borrows from the emitting operation.
#[derive(Debug)]
pub enum EventData<'a> {
    Enqueue {
        queue: &'a str,
        class: &'a str,
        args: &'a serde_json::Value,
        id: &'a str,
    },
    Schedule {
        timestamp: i64,
        queue: &'a str,
        class: &'a str,
        args: &'a serde_json::Value,
    },
    Job(&'a Job),
    Failure {
        job: &'a Job,
        error: &'a str,
    },
    Worker {
        worker: &'a str,
    },
    Reserve {
        queues: &'a [String],
    },
}

/// Value returned by a listener. `Veto` aborts the enclosing operation
/// during `BeforeEnqueue`, `BeforeSchedule` and `BeforePerform`; other
/// events ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Proceed,
    Veto,
}

/// Outcome of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Completed,
    Vetoed,
}

impl Dispatch {
    pub fn vetoed(self) -> bool {
        self == Dispatch::Vetoed
    }
}

/// Token returned by [`Events::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookId(u64);

type Listener = Box<dyn Fn(&EventData<'_>) -> Hook + Send + Sync>;

/// In-process hook registry with synchronous dispatch.
///
/// Listeners run in registration order; the dispatcher short-circuits on the
/// first veto and reports it through the returned [`Dispatch`].
#[derive(Default)]
pub struct Events {
    listeners: RwLock<HashMap<Event, Vec<(HookId, Listener)>>>,
    next_id: AtomicU64,
}

impl Events {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, event: Event, listener: F) -> HookId
    where
        F: Fn(&EventData<'_>) -> Hook + Send + Sync + 'static,
    {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event)
            .or_default()
            .push((id, Box::new(listener)));
        id
    }

    /// Removes a listener previously attached with [`Events::on`]. Returns
    /// whether anything was removed.
    pub fn off(&self, event: Event, id: HookId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match listeners.get_mut(&event) {
            Some(hooks) => {
                let before = hooks.len();
                hooks.retain(|(hook_id, _)| *hook_id != id);
                hooks.len() != before
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn emit(&self, event: Event, data: &EventData<'_>) -> Dispatch {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(hooks) = listeners.get(&event) {
            for (_, listener) in hooks {
                if listener(data) == Hook::Veto {
                    return Dispatch::Vetoed;
                }
            }
        }
        Dispatch::Completed
    }
}
