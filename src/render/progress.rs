use indicatif::ProgressBar;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Frames between progress reports unless configured otherwise.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 100;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotifyError {
    #[error("Progress channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RenderProgress {
    pub job_id: u64,
    pub frames_done: u64,
    pub total_frames: u64,
}

impl RenderProgress {
    pub fn fraction(&self) -> f64 {
        if self.total_frames == 0 {
            1.0
        } else {
            self.frames_done as f64 / self.total_frames as f64
        }
    }

    pub fn is_complete(&self) -> bool {
        self.frames_done >= self.total_frames
    }
}

/// One-way progress sink. Must not block; errors are the caller's to ignore.
pub trait ProgressNotifier: Send + Sync {
    fn notify(&self, progress: RenderProgress) -> Result<(), NotifyError>;
}

pub struct NoopNotifier;

impl ProgressNotifier for NoopNotifier {
    fn notify(&self, _progress: RenderProgress) -> Result<(), NotifyError> {
        Ok(())
    }
}

impl ProgressNotifier for UnboundedSender<RenderProgress> {
    fn notify(&self, progress: RenderProgress) -> Result<(), NotifyError> {
        self.send(progress).map_err(|_| NotifyError::ChannelClosed)
    }
}

impl ProgressNotifier for ProgressBar {
    fn notify(&self, progress: RenderProgress) -> Result<(), NotifyError> {
        if self.length() != Some(progress.total_frames) {
            self.set_length(progress.total_frames);
        }
        self.set_position(progress.frames_done);
        if progress.is_complete() {
            self.finish_with_message(format!("Rendered {} frames", progress.total_frames));
        }
        Ok(())
    }
}

/// Deliver a report, logging and dropping any failure.
pub(crate) fn report(notifier: &dyn ProgressNotifier, progress: RenderProgress) {
    if let Err(e) = notifier.notify(progress) {
        log::debug!(
            "Progress notification for job {} dropped: {}",
            progress.job_id,
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(frames_done: u64) -> RenderProgress {
        RenderProgress {
            job_id: 1,
            frames_done,
            total_frames: 300,
        }
    }

    #[test]
    fn test_channel_notifier() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tx.notify(at(100)).unwrap();
        assert_eq!(rx.try_recv().unwrap(), at(100));
        drop(rx);
        assert_eq!(tx.notify(at(200)), Err(NotifyError::ChannelClosed));
        // report swallows the closed channel
        report(&tx, at(300));
    }

    #[test]
    fn test_progress_bar_notifier() {
        let pb = ProgressBar::hidden();
        pb.notify(at(100)).unwrap();
        assert_eq!(pb.length(), Some(300));
        assert_eq!(pb.position(), 100);
        pb.notify(at(300)).unwrap();
        assert!(pb.is_finished());
    }

    #[test]
    fn test_fraction() {
        assert!((at(150).fraction() - 0.5).abs() < 1e-12);
        let empty = RenderProgress {
            job_id: 0,
            frames_done: 0,
            total_frames: 0,
        };
        assert_eq!(empty.fraction(), 1.0);
        assert!(empty.is_complete());
    }
}
