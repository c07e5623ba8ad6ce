//! Debug-level gated diagnostic log.
//!
//! Lines are plain text with fixed-width numeric fields. Each line is
//! mirrored to `tracing` and, when a writer is attached, written there too.

use std::fmt;
use std::io::Write;

use tracing::{debug, warn};

pub struct DebugLog {
    level: u8,
    sink: Option<Box<dyn Write + Send>>,
}

impl fmt::Debug for DebugLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugLog")
            .field("level", &self.level)
            .field("attached", &self.sink.is_some())
            .finish()
    }
}

impl DebugLog {
    pub fn new(level: u8) -> Self {
        Self { level, sink: None }
    }

    pub fn with_writer(level: u8, writer: Box<dyn Write + Send>) -> Self {
        Self {
            level,
            sink: Some(writer),
        }
    }

    /// True when lines of the given verbosity are recorded.
    pub fn enabled(&self, level: u8) -> bool {
        level > 0 && self.level >= level
    }

    pub fn line(&mut self, level: u8, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        debug!(target: "ebt_core::debug", level, "{}", args);
        if let Some(sink) = self.sink.as_mut() {
            if let Err(err) = writeln!(sink, "{args}").and_then(|_| sink.flush()) {
                warn!("Dropping diagnostic log writer after write failure: {err}");
                self.sink = None;
            }
        }
    }

    pub fn starting_step(&mut self, time: f64, step: f64, depth: usize) {
        self.line(
            4,
            format_args!(
                "{:<18} T = {:15.8}     dt = {:12.7e} recurs = {:2}",
                "Starting step:", time, step, depth
            ),
        );
    }

    pub fn step_ok(&mut self, time: f64, step: f64, depth: usize) {
        self.line(
            4,
            format_args!(
                "{:<18} T = {:15.8}     dt = {:12.7e} recurs = {:2}",
                "Step OK:", time, step, depth
            ),
        );
    }

    pub fn step_failed(&mut self, time: f64, step: f64, depth: usize, detail: Option<&str>) {
        match detail {
            Some(detail) => self.line(
                3,
                format_args!(
                    "{:<18} T = {:15.8}     dt = {:12.7e} recurs = {:2} {}",
                    "Step failed:", time, step, depth, detail
                ),
            ),
            None => self.line(
                3,
                format_args!(
                    "{:<18} T = {:15.8}     dt = {:12.7e} recurs = {:2}",
                    "Step failed:", time, step, depth
                ),
            ),
        }
    }

    pub fn becoming_stiff(&mut self, time: f64) {
        self.line(
            1,
            format_args!("The problem is becoming stiff at T = {time:.4}"),
        );
    }

    pub fn cohort_end(&mut self, time: f64, min_step: f64, max_step: f64) {
        self.line(
            2,
            format_args!(
                "Cohort end: T = {:15.8}   min. dt: {:12.7e}  max. dt: {:12.7e}",
                time, min_step, max_step
            ),
        );
    }
}

impl Default for DebugLog {
    fn default() -> Self {
        Self::new(0)
    }
}
