//! Named task spawning with explicit stack size and priority.
//!
//! Every long-running task (echo workers, the log consumer) is an OS thread.
//! Priority is a nice value applied by the thread to itself; on Linux
//! `setpriority(PRIO_PROCESS, 0, ..)` targets only the calling thread.

use std::io;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// How a task is created.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// Thread name, shown in panics and tracing output.
    pub name: String,
    /// Stack size in bytes.
    pub stack_size: usize,
    /// Nice value; 0 leaves the inherited priority alone.
    pub priority: i32,
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, stack_size: usize, priority: i32) -> Self {
        Self {
            name: name.into(),
            stack_size,
            priority,
        }
    }
}

/// Spawn `body` as a new task.
pub fn spawn<F, T>(spec: TaskSpec, body: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let priority = spec.priority;
    thread::Builder::new()
        .name(spec.name)
        .stack_size(spec.stack_size)
        .spawn(move || {
            if priority != 0 {
                apply_priority(priority);
            }
            body()
        })
}

#[cfg(target_os = "linux")]
fn apply_priority(nice: i32) {
    // SAFETY: setpriority has no memory-safety preconditions.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) };
    if rc == 0 {
        debug!(nice, "Task priority applied");
    } else {
        warn!(nice, error = %io::Error::last_os_error(), "Failed to set task priority");
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_priority(nice: i32) {
    debug!(nice, "Per-thread priority not supported on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_named_task() {
        let handle = spawn(TaskSpec::new("probe-task", 128 * 1024, 0), || {
            thread::current().name().map(str::to_string)
        })
        .unwrap();
        assert_eq!(handle.join().unwrap().as_deref(), Some("probe-task"));
    }

    #[test]
    fn test_spawn_with_lowered_priority() {
        // Raising the nice value never needs privileges.
        let handle = spawn(TaskSpec::new("low-prio", 128 * 1024, 5), || 42).unwrap();
        assert_eq!(handle.join().unwrap(), 42);
    }
}
