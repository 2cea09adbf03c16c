//! Injected commands.
//!
//! Lines added to the [`CommandQueue`] (manual jogs, temperature changes,
//! macros from a control surface) are emitted ahead of the next line pulled
//! from the stage below.

use crate::stream::{macro_lines, BoxedStream, GcodeStream};
use gcodestream_core::{thread_safe_deque, PrinterMove, ThreadSafeDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Macro line that holds the queue until [`CommandQueue::continue_macro`] is called
pub const HOST_WAIT_OK: &str = "; host.wait_ok";

/// Shared queue of commands waiting to be injected
#[derive(Debug, Clone)]
pub struct CommandQueue {
    lines: ThreadSafeDeque<String>,
    waiting: Arc<AtomicBool>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            lines: thread_safe_deque(),
            waiting: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Append one or more newline-separated lines
    pub fn add(&self, text: &str) {
        let mut lines = self.lines.lock();
        for line in macro_lines(text) {
            lines.push_back(line);
        }
    }

    /// Insert lines ahead of everything already queued, preserving their order
    pub fn add_front(&self, text: &str) {
        let mut lines = self.lines.lock();
        for line in macro_lines(text).into_iter().rev() {
            lines.push_front(line);
        }
    }

    /// Drop every queued line and release a held macro
    pub fn clear(&self) {
        self.lines.lock().clear();
        self.waiting.store(false, Ordering::Release);
    }

    /// Lines waiting to be injected
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// True while a macro is held on [`HOST_WAIT_OK`]
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Acquire)
    }

    /// Release a macro held on [`HOST_WAIT_OK`]
    pub fn continue_macro(&self) {
        self.waiting.store(false, Ordering::Release);
    }

    fn pop(&self) -> Option<String> {
        self.lines.lock().pop_front()
    }

    fn hold(&self) {
        self.waiting.store(true, Ordering::Release);
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream stage emitting queued commands before source lines
pub struct QueuedCommands {
    inner: BoxedStream,
    queue: CommandQueue,
}

impl QueuedCommands {
    pub fn new(inner: BoxedStream, queue: CommandQueue) -> Self {
        Self { inner, queue }
    }
}

impl GcodeStream for QueuedCommands {
    fn name(&self) -> &str {
        "queued_commands"
    }

    fn read_line(&mut self) -> Option<String> {
        if self.queue.is_waiting() {
            return Some(String::new());
        }

        if let Some(line) = self.queue.pop() {
            if line.trim().eq_ignore_ascii_case(HOST_WAIT_OK) {
                tracing::info!("Macro waiting for user confirmation");
                self.queue.hold();
                return Some(String::new());
            }
            return Some(line);
        }

        self.inner.read_line()
    }

    fn set_printer_position(&mut self, position: PrinterMove) {
        self.inner.set_printer_position(position);
    }

    fn cancel(&mut self) {
        self.queue.clear();
        self.inner.cancel();
    }

    fn debug_info(&self) -> String {
        format!(
            "queued_commands ({} queued) <- {}",
            self.queue.len(),
            self.inner.debug_info()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    #[test]
    fn test_queued_lines_come_first() {
        let queue = CommandQueue::new();
        let mut stage = QueuedCommands::new(
            Box::new(MemorySource::new(vec!["G1 X1", "G1 X2"])),
            queue.clone(),
        );

        assert_eq!(stage.read_line().as_deref(), Some("G1 X1"));
        queue.add("M104 S200\\nM105");
        queue.add_front("G28\nG1 Z5");
        assert_eq!(queue.len(), 4);

        let lines: Vec<String> = std::iter::from_fn(|| stage.read_line()).collect();
        assert_eq!(lines, vec!["G28", "G1 Z5", "M104 S200", "M105", "G1 X2"]);
    }

    #[test]
    fn test_wait_ok_holds_until_continued() {
        let queue = CommandQueue::new();
        let mut stage =
            QueuedCommands::new(Box::new(MemorySource::new(vec!["G1 X1"])), queue.clone());

        queue.add("M117 Insert filament\n; host.wait_ok\nM104 S210");
        assert_eq!(stage.read_line().as_deref(), Some("M117 Insert filament"));
        assert_eq!(stage.read_line().as_deref(), Some(""));
        assert!(queue.is_waiting());
        assert_eq!(stage.read_line().as_deref(), Some(""));

        queue.continue_macro();
        assert_eq!(stage.read_line().as_deref(), Some("M104 S210"));
        assert_eq!(stage.read_line().as_deref(), Some("G1 X1"));
    }

    #[test]
    fn test_cancel_clears_queue() {
        let queue = CommandQueue::new();
        let mut stage = QueuedCommands::new(Box::new(MemorySource::new(vec!["G1 X1"])), queue.clone());
        queue.add("G28\n; host.wait_ok");
        stage.read_line();
        stage.read_line();
        assert!(queue.is_waiting());

        stage.cancel();
        assert!(queue.is_empty());
        assert!(!queue.is_waiting());
        assert_eq!(stage.read_line(), None);
    }
}
