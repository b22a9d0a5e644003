//! A terminal-aware [`pm_transport::ProgressSink`]: renders a
//! carriage-return progress line when stderr is a real terminal, and says
//! nothing at all otherwise (redirected output, CI logs).

use std::io::IsTerminal;
use std::sync::atomic::{AtomicU64, Ordering};

use console::Term;
use pm_transport::ProgressSink;

/// Prints download progress to stderr when attached to a terminal.
pub struct TerminalProgress {
    term: Term,
    interactive: bool,
    downloaded: AtomicU64,
}

impl TerminalProgress {
    /// Builds a sink, detecting terminal-ness once up front.
    pub fn new() -> Self {
        Self {
            term: Term::stderr(),
            interactive: std::io::stderr().is_terminal(),
            downloaded: AtomicU64::new(0),
        }
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for TerminalProgress {
    fn on_progress(&self, current: u64, total: u64) {
        if !self.interactive {
            return;
        }
        self.downloaded.store(current, Ordering::Relaxed);
        let pct = if total == 0 { 100 } else { current * 100 / total };
        let _ = self.term.clear_line();
        let _ = self.term.write_str(&format!("downloading... {pct}% ({current}/{total} bytes)"));
    }

    fn on_progress_unknown_total(&self, delta: u64) {
        if !self.interactive {
            return;
        }
        let total = self.downloaded.fetch_add(delta, Ordering::Relaxed) + delta;
        let _ = self.term.clear_line();
        let _ = self.term.write_str(&format!("downloading... {total} bytes"));
    }

    fn on_finish(&self) {
        if self.interactive {
            let _ = self.term.clear_line();
        }
    }
}
