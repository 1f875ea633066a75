use super::RenderError;
use super::raster::Frame;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Consumer of an ordered frame sequence.
///
/// `abort` must leave nothing behind that a later reader could mistake for
/// a finished render.
pub trait FrameSink: Send {
    fn begin(&mut self, width: u32, height: u32, fps: u32) -> Result<(), RenderError>;
    fn write_frame(&mut self, frame: &Frame) -> Result<(), RenderError>;
    fn finish(&mut self) -> Result<PathBuf, RenderError>;
    fn abort(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameManifest {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub frame_count: u64,
}

// ── Frame directory ──

/// Numbered PNG frames plus a manifest, written into `dir`.
pub struct FrameDirSink {
    dir: PathBuf,
    format: Option<(u32, u32, u32)>,
    written: u64,
    created_dir: bool,
}

impl FrameDirSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            format: None,
            written: 0,
            created_dir: false,
        }
    }

    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{index:06}.png"))
    }
}

impl FrameSink for FrameDirSink {
    fn begin(&mut self, width: u32, height: u32, fps: u32) -> Result<(), RenderError> {
        self.created_dir = !self.dir.exists();
        std::fs::create_dir_all(&self.dir)?;
        self.format = Some((width, height, fps));
        self.written = 0;
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), RenderError> {
        if self.format.is_none() {
            return Err(RenderError::RenderFailure("sink not started".to_string()));
        }
        frame.save(self.frame_path(self.written))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<PathBuf, RenderError> {
        let Some((width, height, fps)) = self.format else {
            return Err(RenderError::RenderFailure("sink not started".to_string()));
        };
        let manifest = FrameManifest {
            width,
            height,
            fps,
            frame_count: self.written,
        };
        std::fs::write(
            self.dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;
        Ok(self.dir.clone())
    }

    fn abort(&mut self) {
        if self.created_dir {
            std::fs::remove_dir_all(&self.dir).ok();
        } else {
            // Includes the frame a failed write may have left half-written.
            for i in 0..=self.written {
                std::fs::remove_file(self.frame_path(i)).ok();
            }
            std::fs::remove_file(self.dir.join(MANIFEST_FILE)).ok();
            // Only succeeds when nothing else lives there.
            std::fs::remove_dir(&self.dir).ok();
        }
        self.written = 0;
        self.created_dir = false;
    }
}

// ── ffmpeg ──

/// Pipes raw RGB24 frames into an `ffmpeg` subprocess encoding H.264/MP4.
pub struct FfmpegSink {
    output: PathBuf,
    binary: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
}

impl FfmpegSink {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self::with_binary(output, "ffmpeg")
    }

    pub fn with_binary(output: impl Into<PathBuf>, binary: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            binary: binary.into(),
            child: None,
            stdin: None,
        }
    }
}

impl FfmpegSink {
    /// Close the pipe, wait for the encoder and describe how it ended.
    fn reap(&mut self) -> String {
        drop(self.stdin.take());
        let Some(child) = self.child.take() else {
            return "encoder not running".to_string();
        };
        match child.wait_with_output() {
            Ok(output) => format!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => format!("ffmpeg wait failed: {e}"),
        }
    }
}

fn tool_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, width: u32, height: u32, fps: u32) -> Result<(), RenderError> {
        if !tool_available(&self.binary) {
            return Err(RenderError::EncoderNotFound);
        }
        if let Some(parent) = self.output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let size = format!("{width}x{height}");
        let rate = fps.to_string();
        let target = self.output.to_string_lossy().into_owned();
        let mut child = Command::new(&self.binary)
            .args([
                "-y",
                "-loglevel",
                "error",
                "-nostats",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-s",
                size.as_str(),
                "-r",
                rate.as_str(),
                "-i",
                "-",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                target.as_str(),
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        self.stdin = child.stdin.take();
        self.child = Some(child);
        log::debug!("ffmpeg encoding {width}x{height}@{fps} to {}", self.output.display());
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), RenderError> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(RenderError::RenderFailure("encoder not started".to_string()));
        };
        if let Err(e) = stdin.write_all(frame.as_raw()) {
            // The encoder has usually exited; its stderr says why.
            let reason = self.reap();
            return Err(RenderError::RenderFailure(format!("ffmpeg pipe: {e}; {reason}")));
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<PathBuf, RenderError> {
        // Closing stdin signals end of stream.
        drop(self.stdin.take());
        let Some(child) = self.child.take() else {
            return Err(RenderError::RenderFailure("encoder not started".to_string()));
        };
        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::RenderFailure(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(self.output.clone())
    }

    fn abort(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            child.kill().ok();
            child.wait().ok();
        }
        std::fs::remove_file(&self.output).ok();
    }
}

// ── Probing ──

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frame_count: u64,
}

impl VideoInfo {
    pub fn duration(&self) -> f64 {
        if self.fps > 0.0 {
            self.frame_count as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// Read back size, rate and frame count of a render: a frame directory's
/// manifest, or `ffprobe` for encoded files.
pub fn probe(path: &Path) -> Result<VideoInfo, RenderError> {
    if path.is_dir() {
        let contents = std::fs::read_to_string(path.join(MANIFEST_FILE))?;
        let m: FrameManifest = serde_json::from_str(&contents)?;
        return Ok(VideoInfo {
            width: m.width,
            height: m.height,
            fps: m.fps as f64,
            frame_count: m.frame_count,
        });
    }
    probe_with_ffprobe(path, "ffprobe")
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: u32,
    height: u32,
    r_frame_rate: String,
    nb_read_frames: Option<String>,
}

fn probe_with_ffprobe(path: &Path, binary: &str) -> Result<VideoInfo, RenderError> {
    if !tool_available(binary) {
        return Err(RenderError::EncoderNotFound);
    }
    let target = path.to_string_lossy().into_owned();
    let output = Command::new(binary)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-count_frames",
            "-show_entries",
            "stream=width,height,r_frame_rate,nb_read_frames",
            "-of",
            "json",
            target.as_str(),
        ])
        .output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RenderError::RenderFailure(format!(
            "ffprobe failed: {}",
            stderr.trim()
        )));
    }
    parse_probe_json(&String::from_utf8_lossy(&output.stdout))
}

fn parse_probe_json(json: &str) -> Result<VideoInfo, RenderError> {
    let parsed: ProbeOutput = serde_json::from_str(json)?;
    let Some(stream) = parsed.streams.into_iter().next() else {
        return Err(RenderError::RenderFailure("no video stream".to_string()));
    };
    let frame_count = stream
        .nb_read_frames
        .as_deref()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);
    Ok(VideoInfo {
        width: stream.width,
        height: stream.height,
        fps: parse_rate(&stream.r_frame_rate),
        frame_count,
    })
}

/// `"30000/1001"` → 29.97; plain numbers parse directly.
fn parse_rate(rate: &str) -> f64 {
    match rate.split_once('/') {
        Some((num, den)) => {
            let (n, d) = (num.parse::<f64>().unwrap_or(0.0), den.parse::<f64>().unwrap_or(0.0));
            if d > 0.0 { n / d } else { 0.0 }
        }
        None => rate.parse().unwrap_or(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::raster;

    #[test]
    fn test_frame_dir_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("out");
        let mut sink = FrameDirSink::new(&dir);
        sink.begin(8, 4, 30).unwrap();
        for _ in 0..3 {
            sink.write_frame(&raster::blank(8, 4)).unwrap();
        }
        let path = sink.finish().unwrap();
        assert_eq!(path, dir);
        assert!(dir.join("frame_000002.png").exists());

        let info = probe(&dir).unwrap();
        assert_eq!((info.width, info.height, info.frame_count), (8, 4, 3));
        assert!((info.duration() - 0.1).abs() < 1e-9);

        let img = image::open(dir.join("frame_000000.png")).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (8, 4));
    }

    #[test]
    fn test_frame_dir_abort_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("partial");
        let mut sink = FrameDirSink::new(&dir);
        sink.begin(4, 4, 30).unwrap();
        sink.write_frame(&raster::blank(4, 4)).unwrap();
        sink.abort();
        assert!(!dir.exists());
    }

    #[test]
    fn test_frame_dir_abort_after_failed_write() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("failing");
        let mut sink = FrameDirSink::new(&dir);
        sink.begin(4, 4, 30).unwrap();
        sink.write_frame(&raster::blank(4, 4)).unwrap();
        // A directory squatting on the next frame's name makes the save fail.
        std::fs::create_dir(sink.frame_path(1)).unwrap();
        assert!(sink.write_frame(&raster::blank(4, 4)).is_err());
        sink.abort();
        assert!(!dir.exists());
    }

    #[test]
    fn test_frame_dir_abort_removes_half_written_frame() {
        let tmp = tempfile::tempdir().unwrap();
        let keep = tmp.path().join("keep.txt");
        std::fs::write(&keep, "not ours").unwrap();
        let mut sink = FrameDirSink::new(tmp.path());
        sink.begin(4, 4, 30).unwrap();
        sink.write_frame(&raster::blank(4, 4)).unwrap();
        // What an interrupted save of frame 1 leaves behind.
        std::fs::write(sink.frame_path(1), b"\x89PNG trunc").unwrap();
        sink.abort();
        assert!(!sink.frame_path(0).exists());
        assert!(!sink.frame_path(1).exists());
        assert!(keep.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_encoder_exit_reported_on_write() {
        // `false` exits at once without reading the pipe.
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("x.mp4");
        let mut sink = FfmpegSink::with_binary(&out, "false");
        sink.begin(512, 512, 30).unwrap();
        let err = sink.write_frame(&raster::blank(512, 512)).unwrap_err();
        match err {
            RenderError::RenderFailure(msg) => assert!(msg.contains("exited with"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
        sink.abort();
        assert!(!out.exists());
    }

    #[test]
    fn test_write_before_begin_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FrameDirSink::new(tmp.path());
        assert!(sink.write_frame(&raster::blank(2, 2)).is_err());
    }

    #[test]
    fn test_missing_encoder() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sink = FfmpegSink::with_binary(tmp.path().join("x.mp4"), "moodviz-no-such-ffmpeg");
        assert!(matches!(sink.begin(4, 4, 30), Err(RenderError::EncoderNotFound)));
        assert!(matches!(
            probe_with_ffprobe(&tmp.path().join("x.mp4"), "moodviz-no-such-ffprobe"),
            Err(RenderError::EncoderNotFound)
        ));
    }

    #[test]
    fn test_parse_probe_json() {
        let json = r#"{"streams":[{"width":1920,"height":1080,"r_frame_rate":"30/1","nb_read_frames":"300"}]}"#;
        let info = parse_probe_json(json).unwrap();
        assert_eq!(info.frame_count, 300);
        assert_eq!(info.fps, 30.0);
        assert!((info.duration() - 10.0).abs() < 1e-9);

        assert!((parse_rate("30000/1001") - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("0/0"), 0.0);
        assert!(parse_probe_json(r#"{"streams":[]}"#).is_err());
    }
}
