//! Tick scheduler for repeating hit-checks and one-shot gameplay timers
//!
//! Time is measured in whole simulation ticks. Tasks are plain data handed
//! back to the match loop when they come due, so the loop decides what a
//! task does and the scheduler never holds callbacks into match state.

use std::collections::{BTreeSet, HashMap};

/// Identifies one scheduled task. Never reused within a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

/// Scheduling capability injected into the combat controller
pub trait Scheduler<T> {
    /// Schedule `task` to fire after `delay_ticks`, then every `period_ticks` if given
    fn schedule(&mut self, delay_ticks: u64, period_ticks: Option<u64>, task: T) -> TaskHandle;

    /// Cancel a task. Returns false if it was not live.
    fn cancel(&mut self, handle: TaskHandle) -> bool;

    fn is_scheduled(&self, handle: TaskHandle) -> bool;

    fn schedule_repeating(&mut self, period_ticks: u64, task: T) -> TaskHandle {
        self.schedule(period_ticks, Some(period_ticks), task)
    }

    fn schedule_once(&mut self, delay_ticks: u64, task: T) -> TaskHandle {
        self.schedule(delay_ticks, None, task)
    }
}

#[derive(Debug)]
struct Entry<T> {
    task: T,
    due: u64,
    period: Option<u64>,
}

/// Deterministic fixed-tick scheduler.
///
/// Tasks due on the same tick fire in the order they were scheduled.
#[derive(Debug)]
pub struct TickScheduler<T> {
    now: u64,
    next_id: u64,
    entries: HashMap<TaskHandle, Entry<T>>,
    queue: BTreeSet<(u64, TaskHandle)>,
}

impl<T: Clone> TickScheduler<T> {
    pub fn new() -> Self {
        Self {
            now: 0,
            next_id: 1,
            entries: HashMap::new(),
            queue: BTreeSet::new(),
        }
    }

    /// Current scheduler tick
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Move the clock forward one tick
    pub fn advance(&mut self) {
        self.now += 1;
    }

    /// Number of live tasks
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pop the next task due at or before the current tick.
    ///
    /// Repeating tasks are re-armed before being returned, so a task that
    /// cancels another between pops keeps the cancelled one from firing.
    pub fn pop_due(&mut self) -> Option<(TaskHandle, T)> {
        let &(due, handle) = self.queue.iter().next()?;
        if due > self.now {
            return None;
        }
        self.queue.remove(&(due, handle));

        let period = self.entries.get(&handle)?.period;
        match period {
            Some(period) => {
                let next = (due + period).max(self.now + 1);
                let entry = self.entries.get_mut(&handle)?;
                entry.due = next;
                let task = entry.task.clone();
                self.queue.insert((next, handle));
                Some((handle, task))
            }
            None => self.entries.remove(&handle).map(|e| (handle, e.task)),
        }
    }
}

impl<T: Clone> Default for TickScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Scheduler<T> for TickScheduler<T> {
    fn schedule(&mut self, delay_ticks: u64, period_ticks: Option<u64>, task: T) -> TaskHandle {
        let handle = TaskHandle(self.next_id);
        self.next_id += 1;

        let due = self.now + delay_ticks.max(1);
        self.entries.insert(
            handle,
            Entry {
                task,
                due,
                period: period_ticks.map(|p| p.max(1)),
            },
        );
        self.queue.insert((due, handle));
        handle
    }

    fn cancel(&mut self, handle: TaskHandle) -> bool {
        match self.entries.remove(&handle) {
            Some(entry) => {
                self.queue.remove(&(entry.due, handle));
                true
            }
            None => false,
        }
    }

    fn is_scheduled(&self, handle: TaskHandle) -> bool {
        self.entries.contains_key(&handle)
    }
}

/// Owning wrapper holding at most one live task handle.
///
/// Starting a new task cancels whatever the slot held before.
#[derive(Debug, Default, Clone)]
pub struct TimerSlot {
    handle: Option<TaskHandle>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the previous task (if any) and schedule a repeating one
    pub fn start_repeating<T, S>(&mut self, scheduler: &mut S, period_ticks: u64, task: T) -> TaskHandle
    where
        S: Scheduler<T> + ?Sized,
    {
        self.clear(scheduler);
        let handle = scheduler.schedule_repeating(period_ticks, task);
        self.handle = Some(handle);
        handle
    }

    /// Cancel the previous task (if any) and schedule a one-shot
    pub fn start_once<T, S>(&mut self, scheduler: &mut S, delay_ticks: u64, task: T) -> TaskHandle
    where
        S: Scheduler<T> + ?Sized,
    {
        self.clear(scheduler);
        let handle = scheduler.schedule_once(delay_ticks, task);
        self.handle = Some(handle);
        handle
    }

    /// Cancel the held task. Returns true if something was live.
    pub fn clear<T, S>(&mut self, scheduler: &mut S) -> bool
    where
        S: Scheduler<T> + ?Sized,
    {
        match self.handle.take() {
            Some(handle) => scheduler.cancel(handle),
            None => false,
        }
    }

    /// Forget a one-shot handle after it has fired
    pub fn release(&mut self, handle: TaskHandle) {
        if self.handle == Some(handle) {
            self.handle = None;
        }
    }

    pub fn holds(&self, handle: TaskHandle) -> bool {
        self.handle == Some(handle)
    }

    pub fn handle(&self) -> Option<TaskHandle> {
        self.handle
    }
}
