//! Pipeline statistics and metrics.

use std::time::Duration;

use observability::DispatchStatsAggregator;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Input lines consumed
    pub lines_read: u64,

    /// Lines that were not valid JSON
    pub parse_errors: u64,

    /// Total duration of the run
    pub duration: Duration,

    /// Whether the run stopped before the input ended
    pub interrupted: bool,

    /// Per-proposal outcome aggregation
    pub dispatch: DispatchStatsAggregator,
}

impl PipelineStats {
    /// Records accepted per second
    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.dispatch.counts.sent as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn print_summary(&self) {
        println!("\n=== Pipeline Statistics ===\n");
        println!("Duration: {:.2}s", self.duration.as_secs_f64());
        println!("Lines read: {}", self.lines_read);
        println!("Unparseable lines: {}", self.parse_errors);
        println!("Throughput: {:.2} records/s", self.throughput());
        if self.interrupted {
            println!("Stopped before end of input");
        }
        println!();
        print!("{}", self.dispatch.summary());
        println!();
    }
}
