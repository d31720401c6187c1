//! Terminal output helpers: the in-place transfer progress line and
//! shared formatting.

use std::io::{IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use filen_core::transfer::ProgressFn;

/// An in-place progress line on stderr, fed by the engine's per-chunk
/// callback. Renders nothing when stderr is not a terminal or quiet mode
/// is on.
pub struct ProgressLine {
    enabled: bool,
    label: Mutex<String>,
    started: Mutex<Instant>,
    dirty: AtomicBool,
}

impl ProgressLine {
    #[must_use]
    pub fn new(quiet: bool) -> Arc<Self> {
        Arc::new(Self {
            enabled: !quiet && std::io::stderr().is_terminal(),
            label: Mutex::new(String::new()),
            started: Mutex::new(Instant::now()),
            dirty: AtomicBool::new(false),
        })
    }

    /// Set the label shown before the byte counts (usually the file name)
    /// and restart the rate clock.
    pub fn set_label(&self, label: &str) {
        *self.label.lock().unwrap() = label.to_string();
        *self.started.lock().unwrap() = Instant::now();
    }

    /// The engine-facing callback.
    pub fn callback(self: &Arc<Self>) -> ProgressFn {
        let line = Arc::clone(self);
        Arc::new(move |done, total| line.render(done, total))
    }

    fn render(&self, done: u64, total: u64) {
        if !self.enabled {
            return;
        }
        let label = self.label.lock().unwrap().clone();
        let elapsed = self.started.lock().unwrap().elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            done as f64 / elapsed
        } else {
            0.0
        };
        let percent = if total > 0 {
            done * 100 / total
        } else {
            100
        };
        eprint!(
            "\r{label}: {} / {} ({percent}%, {}/s)   ",
            human_bytes(done),
            human_bytes(total),
            human_bytes(rate as u64),
        );
        let _ = std::io::stderr().flush();
        self.dirty.store(true, Ordering::Relaxed);
    }

    /// Terminate the in-place line, if anything was drawn.
    pub fn finish(&self) {
        if self.enabled && self.dirty.swap(false, Ordering::Relaxed) {
            eprintln!();
        }
    }
}

/// `1.5 MiB`-style rendering.
#[must_use]
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// Render milliseconds-since-epoch as local time.
#[must_use]
pub fn format_timestamp(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| {
            dt.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| "-".to_string())
}
