//! Collecting and reporting construction statistics.

use std::io::Write;

/// Trait for collecting events during construction of a perfect set.
pub trait BuildStatsCollector {
    /// Called at the start of each construction attempt with the load target
    /// and the bucket count it implies. Default implementation does nothing.
    #[inline(always)]
    fn attempt(&mut self, _lambda: usize, _bucket_count: usize) {}

    /// Called once when the construction driver finishes. Default
    /// implementation does nothing.
    #[inline(always)]
    fn end(&mut self, _success: bool) {}
}

/// Ignores all events and does nothing.
impl BuildStatsCollector for () {}

/// Reports construction events to the wrapped writer.
pub struct BuildStatsPrinter<W: Write = std::io::Stdout>(W);

impl BuildStatsPrinter<std::io::Stdout> {
    /// Reports construction events to the standard output.
    pub fn stdout() -> Self {
        Self(std::io::stdout())
    }
}

impl<W: Write> BuildStatsPrinter<W> {
    /// Reports construction events to `output`.
    pub fn new(output: W) -> Self {
        Self(output)
    }
}

impl<W: Write> BuildStatsCollector for BuildStatsPrinter<W> {
    fn attempt(&mut self, lambda: usize, bucket_count: usize) {
        writeln!(self.0, "lambda {} buckets {}", lambda, bucket_count).unwrap();
    }

    fn end(&mut self, success: bool) {
        writeln!(self.0, "Completed {}.", if success { "successfully" } else { "unsuccessfully" }).unwrap();
    }
}
