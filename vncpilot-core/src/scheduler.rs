//! Deferred engine work: "run this after a delay" and "yield once".
//!
//! Jobs are plain data. The engine loop pulls expired jobs and runs them
//! itself, so deferred work never overlaps with anything else.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::time::DelayQueue;

use crate::types::{MouseButton, Point};

/// Reply slot of a `dragAndDrop` call, answered after the drop.
pub type DoneReply = oneshot::Sender<()>;

#[derive(Debug)]
pub enum Job {
    /// Second half of a long press.
    LongPressRelease { button: MouseButton },
    /// Drag: move to the target with the button held.
    DragMove {
        to: Point,
        button: MouseButton,
        reply: Option<DoneReply>,
    },
    /// Drag: release at the target.
    DragRelease { to: Point, reply: Option<DoneReply> },
    /// Run the next macro step.
    MacroStep,
    /// Zero-delay turn between two macro steps.
    MacroYield,
}

#[derive(Default)]
pub struct Scheduler {
    queue: DelayQueue<Job>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job` to fire after `delay`.
    pub fn schedule(&mut self, job: Job, delay: Duration) {
        self.queue.insert(job, delay);
    }

    /// Queue `job` for the next loop turn.
    pub fn defer(&mut self, job: Job) {
        self.schedule(job, Duration::ZERO);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Drop every queued job.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Wait for the next expired job. `None` when the queue is empty.
    pub async fn next(&mut self) -> Option<Job> {
        std::future::poll_fn(|cx| self.queue.poll_expired(cx))
            .await
            .map(|expired| expired.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn jobs_fire_in_deadline_order() {
        let mut s = Scheduler::new();
        s.schedule(Job::MacroStep, Duration::from_millis(50));
        s.defer(Job::MacroYield);
        assert_eq!(s.len(), 2);

        let start = tokio::time::Instant::now();
        assert!(matches!(s.next().await, Some(Job::MacroYield)));
        assert!(matches!(s.next().await, Some(Job::MacroStep)));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(s.is_empty());
        assert!(s.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_drops_pending_jobs() {
        let mut s = Scheduler::new();
        s.schedule(
            Job::LongPressRelease {
                button: MouseButton::Left,
            },
            Duration::from_secs(1),
        );
        s.clear();
        assert!(s.is_empty());
    }
}
