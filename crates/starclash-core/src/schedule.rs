//! Tick-keyed deferred tasks.
//!
//! A task is a value scheduled to run at a future tick. Match-scoped tasks
//! carry the scheduler generation they were created in; bumping the
//! generation with [`Scheduler::invalidate`] cancels all of them at once
//! without touching the queue. Detached tasks survive invalidation.

use std::collections::BTreeMap;

use crate::clock::Tick;

/// Handle returned by [`Scheduler::schedule`], usable with [`Scheduler::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

/// Lifetime of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelToken {
    /// Cancelled by the next [`Scheduler::invalidate`].
    Match(u64),
    /// Runs regardless of invalidation.
    Detached,
}

#[derive(Debug, Clone)]
struct Entry<T> {
    token: CancelToken,
    task: T,
}

#[derive(Debug, Clone)]
pub struct Scheduler<T> {
    queue: BTreeMap<(Tick, TaskId), Entry<T>>,
    generation: u64,
    next_id: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            queue: BTreeMap::new(),
            generation: 0,
            next_id: 0,
        }
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for a task tied to the current match generation.
    pub fn match_token(&self) -> CancelToken {
        CancelToken::Match(self.generation)
    }

    pub fn schedule(&mut self, at: Tick, token: CancelToken, task: T) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.queue.insert((at, id), Entry { token, task });
        id
    }

    /// Remove a pending task. Returns `true` if it was still queued.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let key = self.queue.keys().find(|(_, tid)| *tid == id).copied();
        match key {
            Some(key) => self.queue.remove(&key).is_some(),
            None => false,
        }
    }

    /// Cancel every match-scoped task scheduled so far.
    pub fn invalidate(&mut self) {
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Remove and return every task due at or before `now`, in (tick,
    /// scheduling) order. Tasks cancelled by invalidation are dropped.
    pub fn pop_due(&mut self, now: Tick) -> Vec<T> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let Entry { token, task } = entry.remove();
            match token {
                CancelToken::Match(generation) if generation != self.generation => {
                    tracing::trace!(generation, "Dropped task from a finished match");
                },
                _ => due.push(task),
            }
        }
        due
    }

    /// Number of queued tasks still able to run.
    pub fn pending(&self) -> usize {
        self.queue
            .values()
            .filter(|e| match e.token {
                CancelToken::Match(generation) => generation == self.generation,
                CancelToken::Detached => true,
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_run_in_tick_order() {
        let mut sched = Scheduler::new();
        let token = sched.match_token();
        sched.schedule(5, token, "late");
        sched.schedule(2, token, "early");
        sched.schedule(2, token, "early-second");

        assert!(sched.pop_due(1).is_empty());
        assert_eq!(sched.pop_due(2), vec!["early", "early-second"]);
        assert_eq!(sched.pop_due(10), vec!["late"]);
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn invalidate_cancels_match_tasks_only() {
        let mut sched = Scheduler::new();
        let token = sched.match_token();
        sched.schedule(3, token, "activate");
        sched.schedule(3, CancelToken::Detached, "menu");
        sched.invalidate();

        assert_eq!(sched.pending(), 1);
        assert_eq!(sched.pop_due(3), vec!["menu"]);
    }

    #[test]
    fn tokens_after_invalidate_are_live() {
        let mut sched = Scheduler::new();
        sched.invalidate();
        let token = sched.match_token();
        sched.schedule(1, token, 7u8);
        assert_eq!(sched.pop_due(1), vec![7]);
    }

    #[test]
    fn cancel_by_id() {
        let mut sched = Scheduler::new();
        let id = sched.schedule(4, CancelToken::Detached, ());
        assert!(sched.cancel(id));
        assert!(!sched.cancel(id));
        assert!(sched.pop_due(100).is_empty());
    }
}
