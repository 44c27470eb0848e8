//! Host callbacks invoked while a break runs
//!
//! The break core never draws anything itself. It signals the host through
//! [`BreakCallbacks`]; the host decides how notifications and the break
//! screen look.

use std::io::Write;
use tracing::info;

/// UI collaborator supplied when the core is created
///
/// Calls are fire-and-forget and arrive from the sequencer task, so
/// implementations should return quickly.
pub trait BreakCallbacks: Send + Sync {
    /// A break is about to start
    fn show_notification(&self);
    /// Show the break screen with `message`
    fn start_break(&self, message: &str);
    /// Close the break screen
    fn end_break(&self);
    /// Remaining break time as `MM:SS`, once per second
    fn on_countdown(&self, formatted_time: &str);
}

/// Terminal host used by the `breakwatch` binary
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleCallbacks;

impl ConsoleCallbacks {
    pub fn new() -> Self {
        Self
    }
}

impl BreakCallbacks for ConsoleCallbacks {
    fn show_notification(&self) {
        info!("Break notification shown");
        println!("Ready for a break in a few seconds...");
    }

    fn start_break(&self, message: &str) {
        info!("Break started: {}", message);
        println!("\n=== Break time: {} ===", message);
    }

    fn end_break(&self) {
        info!("Break ended");
        println!("\nBreak over, back to work!");
    }

    fn on_countdown(&self, formatted_time: &str) {
        let mut stdout = std::io::stdout();
        let _ = write!(stdout, "\r{} remaining ", formatted_time);
        let _ = stdout.flush();
    }
}
