/*!
 * Progress ticks sent from worker tasks to the job coordinator.
 */

use tokio::sync::mpsc;

use crate::database::models::JobStatus;

/// A progress update produced away from the coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct StageTick {
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
}

/// Maps a worker's own 0-100 percentage onto the job's progress sub-range
/// and forwards it to the coordinator.
///
/// Sending never blocks; ticks sent after the coordinator is gone are lost.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<StageTick>,
    status: JobStatus,
    floor: u8,
    ceil: u8,
    label: String,
}

impl ProgressReporter {
    /// Reporter for `status` mapping 0-100 onto `floor..=ceil`
    pub fn new(
        tx: mpsc::UnboundedSender<StageTick>,
        status: JobStatus,
        floor: u8,
        ceil: u8,
        label: impl Into<String>,
    ) -> Self {
        Self {
            tx,
            status,
            floor: floor.min(ceil),
            ceil,
            label: label.into(),
        }
    }

    /// Reporter whose ticks go nowhere
    pub fn detached(status: JobStatus) -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        Self::new(tx, status, 0, 100, status.as_str())
    }

    // @returns: Job progress for a worker percentage
    pub fn scale(&self, percent: f64) -> u8 {
        let percent = if percent.is_finite() { percent.clamp(0.0, 100.0) } else { 0.0 };
        let span = (self.ceil - self.floor) as f64;
        self.floor + (percent * span / 100.0).floor() as u8
    }

    /// Report a percentage with the default `label NN%` message
    pub fn report(&self, percent: f64) {
        let message = format!("{} {:.0}%", self.label, percent.clamp(0.0, 100.0));
        self.report_with(percent, message);
    }

    /// Report a percentage with a custom message
    pub fn report_with(&self, percent: f64, message: impl Into<String>) {
        let _ = self.tx.send(StageTick {
            status: self.status,
            progress: self.scale(percent),
            message: message.into(),
        });
    }
}
