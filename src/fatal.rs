//! Fatal error escalation.
//!
//! Stack overflow and allocation failure already abort the process with a
//! diagnostic. A panic stops only the task it happens on; the hook installed
//! here makes sure it is recorded through the log before the default report.

use std::any::Any;
use std::panic;
use std::thread;
use tracing::error;

/// Log every panic with its task name and location, then run the previous hook.
pub fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let current = thread::current();
        let task = current.name().unwrap_or("<unnamed>");
        let location = info
            .location()
            .map(|l| l.to_string())
            .unwrap_or_default();

        error!(
            task,
            %location,
            reason = panic_message(info.payload()),
            "Task halted"
        );
        previous(info);
    }));
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let literal: Box<dyn Any + Send> = Box::new("stack exhausted");
        assert_eq!(panic_message(literal.as_ref()), "stack exhausted");

        let owned: Box<dyn Any + Send> = Box::new(String::from("worker 3 failed"));
        assert_eq!(panic_message(owned.as_ref()), "worker 3 failed");

        let other: Box<dyn Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(other.as_ref()), "<non-string panic payload>");
    }

    #[test]
    fn test_panic_halts_only_its_task() {
        install_panic_hook();
        let result = thread::Builder::new()
            .name("doomed".into())
            .spawn(|| panic!("deliberate"))
            .unwrap()
            .join();
        assert!(result.is_err());
    }
}
