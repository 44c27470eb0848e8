//! breakwatch - Rest break scheduler
//!
//! This crate schedules short and long rest breaks on a fixed cadence,
//! drives the notification and countdown of each break, and stays quiet
//! while a full-screen application is active or breaks are paused.

pub mod callbacks;
pub mod config;
pub mod fullscreen;
pub mod scheduler;
pub mod sequencer;
pub mod session;
pub mod timer;

pub use callbacks::{BreakCallbacks, ConsoleCallbacks};
pub use config::BreakConfig;
pub use fullscreen::{FullScreenGate, NoFullScreenGate, XpropGate};
pub use scheduler::{BreakCore, BreakCoreHandle, BreakStats, CoreState, CoreStatus};
pub use session::BreakKind;
