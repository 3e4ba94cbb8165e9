use tokio_util::sync::CancellationToken;

use crate::models::ProcessingRun;
use crate::telemetry::Telemetry;

/// Per-run state threaded through every phase call: the open run, the
/// recording being processed, and the cooperative cancellation signal.
/// Nothing here is global, so concurrent runs over different recordings
/// cannot corrupt each other's run id.
pub struct RunContext {
    pub run: ProcessingRun,
    pub recording_id: String,
    pub cancel: CancellationToken,
    pub telemetry: Telemetry,
}

impl RunContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
