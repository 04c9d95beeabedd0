use serde::Serialize;
use tracing::trace;

// Counters are emitted as trace events; the run summary is logged by the pipeline.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub fetched: usize,
    pub eligible: usize,
    pub selected: usize,
    pub published: usize,
    pub failed: usize,
}

impl RunCounters {
    pub fn record_published(&mut self) {
        self.published += 1;
        trace!(
            target = "lbc.metrics",
            published = self.published,
            "rows_published_inc"
        );
    }

    pub fn record_failed(&mut self, kind: &'static str) {
        self.failed += 1;
        trace!(
            target = "lbc.metrics",
            failed = self.failed,
            kind = kind,
            "rows_failed_inc"
        );
    }

    pub fn processed(&self) -> usize {
        self.published + self.failed
    }
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "lbc.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}
