//! Render jobs on a bounded worker pool.
//!
//! Each job builds its own renderer (and so its own particle system), drives
//! it frame by frame into a sink, and reports progress on a detached,
//! best-effort channel. Cancellation is polled between ticks.

use super::particles::ParticleRenderer;
use super::progress::{self, DEFAULT_PROGRESS_INTERVAL, NoopNotifier, ProgressNotifier, RenderProgress};
use super::reactive::ReactiveRenderer;
use super::sink::{FfmpegSink, FrameDirSink, FrameSink};
use super::{FrameSource, ParticleConfig, RenderError, VisualConfig};
use crate::features::FeatureSet;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::oneshot;

/// Shared cancellation switch for one job.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Pull every frame from `source` into `sink`. On any error, panic or
/// cancellation the sink is aborted so no partial output survives.
pub fn drive(
    job_id: u64,
    source: &mut dyn FrameSource,
    sink: &mut dyn FrameSink,
    cancel: &CancelFlag,
    notifier: &dyn ProgressNotifier,
    progress_interval: u64,
) -> Result<PathBuf, RenderError> {
    let total = source.total_frames();
    let (width, height) = source.dimensions();
    sink.begin(width, height, source.fps())?;

    let pumped = panic::catch_unwind(AssertUnwindSafe(|| {
        pump(job_id, source, sink, cancel, notifier, progress_interval.max(1), total)
    }))
    .unwrap_or_else(|payload| Err(panicked(payload.as_ref())));

    match pumped {
        Ok(path) => {
            progress::report(
                notifier,
                RenderProgress {
                    job_id,
                    frames_done: total,
                    total_frames: total,
                },
            );
            Ok(path)
        }
        Err(e) => {
            sink.abort();
            Err(e)
        }
    }
}

fn pump(
    job_id: u64,
    source: &mut dyn FrameSource,
    sink: &mut dyn FrameSink,
    cancel: &CancelFlag,
    notifier: &dyn ProgressNotifier,
    interval: u64,
    total: u64,
) -> Result<PathBuf, RenderError> {
    let mut done = 0u64;
    loop {
        if cancel.is_cancelled() {
            log::info!("Render job {job_id} cancelled after {done}/{total} frames");
            return Err(RenderError::Cancelled);
        }
        let Some(frame) = source.next_frame() else {
            break;
        };
        sink.write_frame(&frame)?;
        done += 1;
        if done % interval == 0 && done < total {
            progress::report(
                notifier,
                RenderProgress {
                    job_id,
                    frames_done: done,
                    total_frames: total,
                },
            );
        }
    }
    sink.finish()
}

fn panicked(payload: &(dyn Any + Send)) -> RenderError {
    let msg = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    RenderError::RenderFailure(format!("renderer panicked: {msg}"))
}

pub fn render_reactive_video(
    features: &FeatureSet,
    config: &VisualConfig,
    sink: &mut dyn FrameSink,
    cancel: &CancelFlag,
    notifier: &dyn ProgressNotifier,
) -> Result<PathBuf, RenderError> {
    let mut source = ReactiveRenderer::new(features, config)?;
    let path = drive(0, &mut source, sink, cancel, notifier, DEFAULT_PROGRESS_INTERVAL)?;
    log::info!("Generated audio-reactive video: {}", path.display());
    Ok(path)
}

pub fn render_particle_video(
    features: &FeatureSet,
    config: &ParticleConfig,
    sink: &mut dyn FrameSink,
    cancel: &CancelFlag,
    notifier: &dyn ProgressNotifier,
) -> Result<PathBuf, RenderError> {
    let mut source = ParticleRenderer::new(features, config)?;
    let path = drive(0, &mut source, sink, cancel, notifier, DEFAULT_PROGRESS_INTERVAL)?;
    log::info!("Generated particle system video: {}", path.display());
    Ok(path)
}

#[derive(Debug, Clone, PartialEq)]
pub enum RenderKind {
    Reactive(VisualConfig),
    Particles(ParticleConfig),
}

impl RenderKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Reactive(_) => "reactive",
            Self::Particles(_) => "particles",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Mp4,
    /// PNG frame directory with a manifest; needs no external encoder.
    Frames,
}

pub struct RenderRequest {
    pub features: Arc<FeatureSet>,
    pub kind: RenderKind,
    pub format: OutputFormat,
    pub notifier: Arc<dyn ProgressNotifier>,
}

impl RenderRequest {
    pub fn new(features: Arc<FeatureSet>, kind: RenderKind) -> Self {
        Self {
            features,
            kind,
            format: OutputFormat::default(),
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ProgressNotifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

/// Caller's view of a submitted job.
pub struct RenderHandle {
    job_id: u64,
    output: PathBuf,
    cancel: CancelFlag,
    rx: oneshot::Receiver<Result<PathBuf, RenderError>>,
}

impl RenderHandle {
    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    /// Where the job writes its output.
    pub fn output_path(&self) -> &Path {
        &self.output
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn wait(self) -> Result<PathBuf, RenderError> {
        self.rx.await.map_err(|_| RenderError::WorkerLost)?
    }

    /// Blocks the current thread. Not for use inside an async context.
    pub fn wait_blocking(self) -> Result<PathBuf, RenderError> {
        self.rx.blocking_recv().map_err(|_| RenderError::WorkerLost)?
    }
}

pub struct RenderService {
    pool: rayon::ThreadPool,
    output_dir: PathBuf,
    progress_interval: u64,
    next_id: AtomicU64,
}

impl RenderService {
    pub fn new(
        workers: usize,
        output_dir: impl Into<PathBuf>,
        progress_interval: u64,
    ) -> Result<Self, RenderError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("moodviz-render-{i}"))
            .build()
            .map_err(|e| RenderError::InvalidConfig(format!("render pool: {e}")))?;
        Ok(Self {
            pool,
            output_dir: output_dir.into(),
            progress_interval: progress_interval.max(1),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn output_path(&self, kind: &RenderKind, format: OutputFormat, job_id: u64) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let stem = format!("{}_{stamp}_{job_id}", kind.label());
        match format {
            OutputFormat::Mp4 => self.output_dir.join(format!("{stem}.mp4")),
            OutputFormat::Frames => self.output_dir.join(format!("{stem}_frames")),
        }
    }

    /// Queue a job and return immediately.
    pub fn submit(&self, request: RenderRequest) -> RenderHandle {
        let job_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let output = self.output_path(&request.kind, request.format, job_id);
        let cancel = CancelFlag::new();
        let (tx, rx) = oneshot::channel();

        let job_cancel = cancel.clone();
        let job_output = output.clone();
        let interval = self.progress_interval;
        log::debug!("Queued {} render job {job_id}", request.kind.label());

        self.pool.spawn(move || {
            // A panic must end this job only, never the pool.
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                run_job(job_id, &request, job_output, &job_cancel, interval)
            }))
            .unwrap_or_else(|payload| Err(panicked(payload.as_ref())));
            match &result {
                Ok(path) => log::info!("Render job {job_id} finished: {}", path.display()),
                Err(e) => log::warn!("Render job {job_id} failed: {e}"),
            }
            // The caller may have dropped its handle.
            tx.send(result).ok();
        });

        RenderHandle {
            job_id,
            output,
            cancel,
            rx,
        }
    }
}

fn run_job(
    job_id: u64,
    request: &RenderRequest,
    output: PathBuf,
    cancel: &CancelFlag,
    interval: u64,
) -> Result<PathBuf, RenderError> {
    let mut source: Box<dyn FrameSource> = match &request.kind {
        RenderKind::Reactive(cfg) => Box::new(ReactiveRenderer::new(&request.features, cfg)?),
        RenderKind::Particles(cfg) => Box::new(ParticleRenderer::new(&request.features, cfg)?),
    };
    let mut sink: Box<dyn FrameSink> = match request.format {
        OutputFormat::Mp4 => Box::new(FfmpegSink::new(output)),
        OutputFormat::Frames => Box::new(FrameDirSink::new(output)),
    };
    drive(
        job_id,
        source.as_mut(),
        sink.as_mut(),
        cancel,
        request.notifier.as_ref(),
        interval,
    )
}
