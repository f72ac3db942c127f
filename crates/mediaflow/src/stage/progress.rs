use serde::Serialize;
use tokio::sync::mpsc;

/// One progress report from a running stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageProgress {
    /// Always within `[0, 100]`.
    pub percent: f64,
    pub message: String,
    /// Bytes per second, when the adapter knows it.
    pub speed: Option<f64>,
    /// Seconds remaining.
    pub eta: Option<f64>,
}

impl StageProgress {
    /// Builds a report, clamping `percent` into `[0, 100]` (NaN becomes 0).
    pub fn new(percent: f64, message: impl Into<String>) -> Self {
        let percent = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0)
        };
        Self {
            percent,
            message: message.into(),
            speed: None,
            eta: None,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_eta(mut self, eta: f64) -> Self {
        self.eta = Some(eta);
        self
    }
}

/// Fire-and-forget progress channel handed to a stage adapter.
///
/// Dropping every clone of the sink closes the channel.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    sender: Option<mpsc::UnboundedSender<StageProgress>>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StageProgress>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A sink that discards every report.
    pub fn noop() -> Self {
        Self { sender: None }
    }

    pub fn report(&self, progress: StageProgress) {
        if let Some(sender) = &self.sender {
            // Ignore errors - the stage outlived its receiver
            let _ = sender.send(progress);
        }
    }

    pub fn update(&self, percent: f64, message: impl Into<String>) {
        self.report(StageProgress::new(percent, message));
    }
}
