//! Full-screen application detection
//!
//! The break core asks the gate once per tick whether a full-screen
//! application is active. Detection failures are reported as "not full
//! screen" so a broken environment never silently disables breaks.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

/// Window manager state marker for full-screen windows
const FULLSCREEN_STATE: &str = "_NET_WM_STATE_FULLSCREEN";

/// Answers whether breaks should be suppressed right now
#[async_trait]
pub trait FullScreenGate: Send + Sync {
    /// True when the active window is full screen
    async fn is_full_screen_app_found(&self) -> bool;
}

/// Gate that never suppresses breaks
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFullScreenGate;

#[async_trait]
impl FullScreenGate for NoFullScreenGate {
    async fn is_full_screen_app_found(&self) -> bool {
        false
    }
}

/// X11 gate built on the `xprop` utility
#[derive(Debug, Clone)]
pub struct XpropGate {
    command_timeout: Duration,
    /// Run xprop without `DISPLAY`, as on a headless session
    headless: bool,
}

impl Default for XpropGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl XpropGate {
    pub fn new(command_timeout: Duration) -> Self {
        Self {
            command_timeout,
            headless: false,
        }
    }

    #[cfg(test)]
    fn headless(command_timeout: Duration) -> Self {
        Self {
            command_timeout,
            headless: true,
        }
    }

    async fn query(&self) -> Result<bool> {
        let root = self
            .run_xprop(&["-root", "-notype", "_NET_ACTIVE_WINDOW"])
            .await?;
        let window_id = parse_active_window_id(&root)
            .ok_or_else(|| anyhow!("No active window reported by xprop"))?;

        let state = self
            .run_xprop(&["-notype", "-id", &window_id, "_NET_WM_STATE"])
            .await?;
        Ok(has_full_screen_state(&state))
    }

    async fn run_xprop(&self, args: &[&str]) -> Result<String> {
        let mut command = Command::new("xprop");
        command.args(args).kill_on_drop(true);
        if self.headless {
            command.env_remove("DISPLAY");
        }

        let output = timeout(self.command_timeout, command.output())
            .await
            .map_err(|_| anyhow!("xprop timed out after {:?}", self.command_timeout))??;

        if !output.status.success() {
            bail!(
                "xprop {} failed with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl FullScreenGate for XpropGate {
    async fn is_full_screen_app_found(&self) -> bool {
        match self.query().await {
            Ok(found) => {
                debug!("Full-screen check: {}", found);
                found
            }
            Err(e) => {
                warn!("Full-screen check failed, assuming no full-screen app: {}", e);
                false
            }
        }
    }
}

/// Extract the window id from `xprop -root _NET_ACTIVE_WINDOW` output
///
/// Returns `None` when no window has focus (`0x0`).
pub fn parse_active_window_id(output: &str) -> Option<String> {
    let id = output
        .split_whitespace()
        .find(|token| token.starts_with("0x"))?
        .trim_end_matches(',');

    let value = u64::from_str_radix(id.trim_start_matches("0x"), 16).ok()?;
    if value == 0 {
        None
    } else {
        Some(id.to_string())
    }
}

/// Whether `_NET_WM_STATE` output contains the full-screen marker
pub fn has_full_screen_state(output: &str) -> bool {
    output.contains(FULLSCREEN_STATE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_active_window_id() {
        assert_eq!(
            parse_active_window_id("_NET_ACTIVE_WINDOW(WINDOW): window id # 0x3a00007\n"),
            Some("0x3a00007".to_string())
        );
        assert_eq!(
            parse_active_window_id("_NET_ACTIVE_WINDOW = 0x4c0000a\n"),
            Some("0x4c0000a".to_string())
        );
        assert_eq!(
            parse_active_window_id("_NET_ACTIVE_WINDOW(WINDOW): window id # 0x0\n"),
            None
        );
        assert_eq!(
            parse_active_window_id("_NET_ACTIVE_WINDOW:  not found.\n"),
            None
        );
    }

    #[test]
    fn test_full_screen_state() {
        assert!(has_full_screen_state(
            "_NET_WM_STATE = _NET_WM_STATE_FULLSCREEN, _NET_WM_STATE_FOCUSED\n"
        ));
        assert!(!has_full_screen_state(
            "_NET_WM_STATE = _NET_WM_STATE_MAXIMIZED_VERT, _NET_WM_STATE_MAXIMIZED_HORZ\n"
        ));
        assert!(!has_full_screen_state("_NET_WM_STATE:  not found.\n"));
        assert!(!has_full_screen_state(""));
    }

    #[tokio::test]
    async fn test_no_full_screen_gate() {
        assert!(!NoFullScreenGate.is_full_screen_app_found().await);
    }

    #[tokio::test]
    async fn test_xprop_gate_fails_open() {
        // Whether xprop is missing or has no display, a headless query
        // never reports full screen.
        let gate = XpropGate::headless(Duration::from_millis(500));
        assert!(!gate.is_full_screen_app_found().await);
    }
}
