//! Two-tier command queue shared by producers and the worker thread.
//!
//! The main lane holds every operation except thumbnail fetches, which go to
//! the thumbnail lane. The thumbnail lane is only drained while the main lane
//! is empty. Both lanes, the `running` flag and the `canceled` latch live
//! under one mutex; one condition variable wakes the worker on new work or
//! shutdown.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::command::{Command, ThumbnailTicket};

/// Lane a command was dequeued from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Regular operations.
    Main,
    /// Low-priority thumbnail fetches.
    Thumbnail,
}

#[derive(Debug)]
struct QueueState {
    main: VecDeque<Command>,
    thumbnails: VecDeque<Command>,
    running: bool,
    canceled: bool,
}

impl QueueState {
    const fn new() -> Self {
        Self {
            main: VecDeque::new(),
            thumbnails: VecDeque::new(),
            running: true,
            canceled: false,
        }
    }

    fn pop(&mut self) -> Option<(Command, Lane)> {
        if let Some(cmd) = self.main.pop_front() {
            return Some((cmd, Lane::Main));
        }
        self.thumbnails
            .pop_front()
            .map(|cmd| (cmd, Lane::Thumbnail))
    }

    fn clear(&mut self) -> usize {
        let dropped = self.main.len() + self.thumbnails.len();
        self.main.clear();
        self.thumbnails.clear();
        dropped
    }
}

/// Thread-safe two-tier FIFO of pending commands.
#[derive(Debug)]
pub struct CommandQueue {
    state: Mutex<QueueState>,
    wake: Condvar,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    /// Create an empty, running queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::new()),
            wake: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a command to its lane and wake the worker.
    ///
    /// Clears the `canceled` latch.
    pub fn enqueue(&self, cmd: Command) {
        let mut state = self.lock();
        if cmd.is_thumbnail() {
            state.thumbnails.push_back(cmd);
        } else {
            state.main.push_back(cmd);
        }
        state.canceled = false;
        drop(state);
        self.wake.notify_one();
    }

    /// Append several commands at once, preserving their order.
    pub fn enqueue_all(&self, cmds: impl IntoIterator<Item = Command>) {
        let mut state = self.lock();
        for cmd in cmds {
            if cmd.is_thumbnail() {
                state.thumbnails.push_back(cmd);
            } else {
                state.main.push_back(cmd);
            }
        }
        state.canceled = false;
        drop(state);
        self.wake.notify_one();
    }

    /// Move a queued thumbnail request to the front of the thumbnail lane.
    ///
    /// Returns `false` if the request is no longer queued.
    pub fn promote(&self, ticket: ThumbnailTicket) -> bool {
        let mut state = self.lock();
        let Some(index) = state
            .thumbnails
            .iter()
            .position(|cmd| cmd.ticket() == Some(ticket))
        else {
            return false;
        };

        if let Some(cmd) = state.thumbnails.remove(index) {
            state.thumbnails.push_front(cmd);
        }
        debug!("Promoted thumbnail request {}", ticket);
        true
    }

    /// Pop the next command, waiting until one is available.
    ///
    /// Main-lane commands always come first. Returns `None` once
    /// [`CommandQueue::shutdown`] has been called.
    pub fn dequeue_blocking(&self) -> Option<(Command, Lane)> {
        let mut state = self.lock();
        loop {
            if !state.running {
                return None;
            }
            if let Some(next) = state.pop() {
                return Some(next);
            }
            state = self
                .wake
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Pop the next command without waiting.
    pub fn try_dequeue(&self) -> Option<(Command, Lane)> {
        let mut state = self.lock();
        if !state.running {
            return None;
        }
        state.pop()
    }

    /// Discard every pending command in both lanes.
    ///
    /// Leaves the `canceled` latch alone. Returns how many commands were
    /// dropped.
    pub fn clear_all(&self) -> usize {
        self.lock().clear()
    }

    /// Whether a cancel is latched or both lanes are empty, read under one
    /// lock.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.canceled || (state.main.is_empty() && state.thumbnails.is_empty())
    }

    /// Set the `canceled` latch and discard every pending command.
    pub fn cancel(&self) -> usize {
        let mut state = self.lock();
        state.canceled = true;
        let dropped = state.clear();
        debug!("Queue canceled, {} pending command(s) dropped", dropped);
        dropped
    }

    /// Whether a cancel happened since the last enqueue.
    pub fn is_canceled(&self) -> bool {
        self.lock().canceled
    }

    /// Whether both lanes are empty.
    pub fn is_empty(&self) -> bool {
        let state = self.lock();
        state.main.is_empty() && state.thumbnails.is_empty()
    }

    /// Number of pending commands in both lanes.
    pub fn len(&self) -> usize {
        let state = self.lock();
        state.main.len() + state.thumbnails.len()
    }

    /// Stop the queue and wake the worker so it can exit.
    pub fn shutdown(&self) {
        self.lock().running = false;
        self.wake.notify_all();
    }

    /// Whether the queue still accepts work.
    pub fn is_running(&self) -> bool {
        self.lock().running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn thumbs(id: u64) -> Command {
        Command::GetThumbnails {
            ticket: ThumbnailTicket(id),
            items: vec![],
        }
    }

    fn delete(file: &str) -> Command {
        Command::Delete {
            folder: "/card/".to_string(),
            file: file.to_string(),
        }
    }

    #[test]
    fn test_main_lane_drains_first() {
        let queue = CommandQueue::new();
        queue.enqueue(thumbs(1));
        queue.enqueue(delete("a.jpg"));
        queue.enqueue(delete("b.jpg"));

        let (first, lane) = queue.try_dequeue().unwrap();
        assert_eq!(first, delete("a.jpg"));
        assert_eq!(lane, Lane::Main);

        let (second, _) = queue.try_dequeue().unwrap();
        assert_eq!(second, delete("b.jpg"));

        let (third, lane) = queue.try_dequeue().unwrap();
        assert_eq!(third, thumbs(1));
        assert_eq!(lane, Lane::Thumbnail);

        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_promote_moves_to_front() {
        let queue = CommandQueue::new();
        queue.enqueue(thumbs(1));
        queue.enqueue(thumbs(2));

        assert!(queue.promote(ThumbnailTicket(2)));

        assert_eq!(queue.try_dequeue().unwrap().0, thumbs(2));
        assert_eq!(queue.try_dequeue().unwrap().0, thumbs(1));
    }

    #[test]
    fn test_promote_keeps_remaining_order() {
        let queue = CommandQueue::new();
        for id in 1..=4 {
            queue.enqueue(thumbs(id));
        }

        assert!(queue.promote(ThumbnailTicket(3)));

        let order: Vec<_> = std::iter::from_fn(|| queue.try_dequeue())
            .filter_map(|(cmd, _)| cmd.ticket())
            .map(|t| t.0)
            .collect();
        assert_eq!(order, vec![3, 1, 2, 4]);
    }

    #[test]
    fn test_promote_missing_is_noop() {
        let queue = CommandQueue::new();
        queue.enqueue(thumbs(1));
        assert!(!queue.promote(ThumbnailTicket(9)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_cancel_while_idle_and_reuse() {
        let queue = CommandQueue::new();
        queue.enqueue(delete("a.jpg"));
        queue.enqueue(thumbs(1));

        assert_eq!(queue.cancel(), 2);
        assert!(queue.is_empty());
        assert!(queue.is_canceled());

        queue.enqueue(delete("b.jpg"));
        assert!(!queue.is_canceled());
        assert_eq!(queue.try_dequeue().unwrap().0, delete("b.jpg"));
    }

    #[test]
    fn test_clear_all_keeps_latch() {
        let queue = CommandQueue::new();
        queue.enqueue(delete("a.jpg"));
        assert_eq!(queue.clear_all(), 1);
        assert!(queue.is_empty());
        assert!(!queue.is_canceled());
    }

    #[test]
    fn test_is_idle() {
        let queue = CommandQueue::new();
        assert!(queue.is_idle());

        queue.enqueue(thumbs(1));
        assert!(!queue.is_idle());

        queue.cancel();
        assert!(queue.is_idle());
        assert!(queue.is_canceled());
    }

    #[test]
    fn test_blocking_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(CommandQueue::new());
        let worker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue_blocking())
        };

        thread::sleep(Duration::from_millis(50));
        queue.enqueue(delete("late.jpg"));

        let (cmd, lane) = worker.join().unwrap().unwrap();
        assert_eq!(cmd, delete("late.jpg"));
        assert_eq!(lane, Lane::Main);
    }

    #[test]
    fn test_shutdown_releases_waiter() {
        let queue = Arc::new(CommandQueue::new());
        let worker = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue_blocking())
        };

        thread::sleep(Duration::from_millis(50));
        queue.shutdown();

        assert!(worker.join().unwrap().is_none());
        assert!(!queue.is_running());
    }

    #[test]
    fn test_enqueue_all_routes_lanes() {
        let queue = CommandQueue::new();
        queue.enqueue_all(vec![thumbs(1), delete("a.jpg"), delete("b.jpg")]);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.try_dequeue().unwrap().1, Lane::Main);
    }
}
