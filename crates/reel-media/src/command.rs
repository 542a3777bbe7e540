//! FFmpeg command builder and supervised runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::probe::Prober;
use crate::progress::{is_progress_line, FfmpegProgress};
use reel_models::CompositionConfig;

/// Number of stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 40;

/// One `-i` input with the options that precede it.
#[derive(Debug, Clone)]
pub struct FfmpegInput {
    args: Vec<String>,
    source: String,
}

impl FfmpegInput {
    /// Plain file input.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            args: Vec::new(),
            source: path.as_ref().to_string_lossy().to_string(),
        }
    }

    /// Still image repeated as a video stream.
    pub fn looped_image(path: impl AsRef<Path>, fps: u32) -> Self {
        Self::file(path)
            .arg("-loop")
            .arg("1")
            .arg("-framerate")
            .arg(fps.to_string())
    }

    /// Motion clip repeated until the output duration is reached.
    pub fn looped_video(path: impl AsRef<Path>) -> Self {
        Self::file(path).arg("-stream_loop").arg("-1")
    }

    /// Add an input option.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Seek within this input.
    pub fn seek(self, seconds: f64) -> Self {
        self.arg("-ss").arg(format!("{:.3}", seconds))
    }
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<FfmpegInput>,
    output: PathBuf,
    /// Output arguments (after the last -i)
    output_args: Vec<String>,
    overwrite: bool,
}

impl FfmpegCommand {
    /// Create a command writing to `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
        }
    }

    /// Add an input.
    pub fn input(mut self, input: FfmpegInput) -> Self {
        self.inputs.push(input);
        self
    }

    /// Add a plain file input.
    pub fn input_file(self, path: impl AsRef<Path>) -> Self {
        self.input(FfmpegInput::file(path))
    }

    /// Add an output argument.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Limit output duration.
    pub fn duration(self, seconds: f64) -> Self {
        self.output_arg("-t").output_arg(format!("{:.3}", seconds))
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Map a stream or filter label into the output.
    pub fn map(self, label: impl Into<String>) -> Self {
        self.output_arg("-map").output_arg(label)
    }

    /// Apply segment encoding settings.
    pub fn encoding(self, config: &CompositionConfig) -> Self {
        self.output_args(config.to_ffmpeg_args())
    }

    /// Move the moov atom to the front for progressive playback.
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-frames:v").output_arg("1")
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }
        args.extend(["-hide_banner".to_string(), "-nostdin".to_string()]);
        args.push("-v".to_string());
        args.push("error".to_string());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.source.clone());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// Subprocess timeout scaled to the amount of media produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubprocessTimeouts {
    pub base_secs: u64,
    /// Allowance per second of output media
    pub per_media_sec: f64,
    /// Hard ceiling regardless of media length
    pub ceiling_secs: u64,
}

impl Default for SubprocessTimeouts {
    fn default() -> Self {
        Self {
            base_secs: 30,
            per_media_sec: 4.0,
            ceiling_secs: 900,
        }
    }
}

impl SubprocessTimeouts {
    pub fn for_media(&self, media_secs: f64) -> u64 {
        let scaled = self.base_secs as f64 + media_secs.max(0.0) * self.per_media_sec;
        (scaled.ceil() as u64).min(self.ceiling_secs)
    }
}

enum WaitOutcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut(u64),
    Cancelled,
}

/// Receives the encoded fraction (0.0-1.0) of the expected output.
pub type MediaProgress = Arc<dyn Fn(f64) + Send + Sync>;

#[derive(Clone)]
struct ProgressSink {
    expected_secs: f64,
    callback: MediaProgress,
}

/// Runner for FFmpeg commands with progress tracking, cancellation and timeout.
#[derive(Clone)]
pub struct FfmpegRunner {
    binary: PathBuf,
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout_secs: Option<u64>,
    progress: Option<ProgressSink>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            cancel_rx: None,
            timeout_secs: None,
            progress: None,
        }
    }

    /// Use a specific ffmpeg executable.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Report encoding progress against `expected_secs` of output.
    pub fn with_progress(mut self, expected_secs: f64, callback: MediaProgress) -> Self {
        self.progress = Some(ProgressSink {
            expected_secs,
            callback,
        });
        self
    }

    /// Same binary, limits and cancellation, without progress reporting.
    pub fn without_progress(&self) -> Self {
        Self {
            progress: None,
            ..self.clone()
        }
    }

    /// FFprobe sharing this runner's cancellation and timeout.
    pub fn prober(&self) -> Prober {
        let mut prober = Prober::new();
        if let Some(secs) = self.timeout_secs {
            prober = prober.with_timeout(Duration::from_secs(secs));
        }
        match &self.cancel_rx {
            Some(rx) => prober.with_cancel(rx.clone()),
            None => prober,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Run an FFmpeg command.
    ///
    /// On any failure the (partial) output file is removed.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        let result = self.spawn_and_wait(cmd).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(cmd.output_path()).await;
        }
        result
    }

    async fn spawn_and_wait(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        if self.is_cancelled() {
            return Err(MediaError::Cancelled);
        }

        let binary = which::which(&self.binary).map_err(|_| MediaError::FfmpegNotFound)?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", binary.display(), args.join(" "));

        let started = Instant::now();
        let mut child = Command::new(&binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;

        // Progress lines go to the sink, everything else is kept for error reports
        let progress = self.progress.clone();
        let stderr_handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            let mut current = FfmpegProgress::default();
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

            while let Ok(Some(line)) = reader.next_line().await {
                if is_progress_line(&line) {
                    if let (Some(block), Some(sink)) = (current.apply_line(&line), &progress) {
                        (sink.callback)(block.fraction(sink.expected_secs));
                    }
                } else if !line.trim().is_empty() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            Vec::from(tail).join("\n")
        });

        let outcome = self.wait_for_completion(&mut child).await;
        let stderr_text = stderr_handle.await.unwrap_or_default();

        metrics::histogram!("reel_ffmpeg_duration_seconds").record(started.elapsed().as_secs_f64());

        match outcome {
            WaitOutcome::Exited(status) => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    metrics::counter!("reel_ffmpeg_failures_total").increment(1);
                    Err(MediaError::ffmpeg_failed(
                        format!("FFmpeg exited with {}", status),
                        (!stderr_text.is_empty()).then_some(stderr_text),
                        status.code(),
                    ))
                }
            }
            WaitOutcome::TimedOut(secs) => Err(MediaError::Timeout(secs)),
            WaitOutcome::Cancelled => Err(MediaError::Cancelled),
        }
    }

    /// Wait for the child, killing it on timeout or cancellation.
    async fn wait_for_completion(&self, child: &mut Child) -> WaitOutcome {
        let timeout_secs = self.timeout_secs;
        let deadline = async move {
            match timeout_secs {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            _ = deadline => WaitOutcome::TimedOut(timeout_secs.unwrap_or_default()),
            _ = wait_for_cancel(self.cancel_rx.clone()) => WaitOutcome::Cancelled,
        };

        match &outcome {
            WaitOutcome::TimedOut(secs) => {
                warn!("FFmpeg timed out after {} seconds, killing process", secs);
                let _ = child.kill().await;
            }
            WaitOutcome::Cancelled => {
                info!("FFmpeg cancelled, killing process");
                let _ = child.kill().await;
            }
            WaitOutcome::Exited(_) => {}
        }
        outcome
    }
}

/// Resolve once the flag turns true; never resolves without a signal.
pub(crate) async fn wait_for_cancel(cancel_rx: Option<watch::Receiver<bool>>) {
    match cancel_rx {
        Some(mut rx) => {
            if rx.wait_for(|cancelled| *cancelled).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input(FfmpegInput::looped_image("scene.png", 30))
            .input_file("voice.wav")
            .duration(3.5)
            .map("[v]")
            .map("1:a");

        let args = cmd.build_args();
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));

        let loop_at = args.iter().position(|a| a == "-loop").unwrap();
        let first_input = args.iter().position(|a| a == "scene.png").unwrap();
        let second_input = args.iter().position(|a| a == "voice.wav").unwrap();
        assert!(loop_at < first_input);
        assert!(first_input < second_input);
        assert!(args.contains(&"3.500".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-progress" && w[1] == "pipe:2"));
    }

    #[test]
    fn test_media_info_runner_inherits_limits() {
        let (_tx, rx) = watch::channel(false);
        let prober = FfmpegRunner::new().with_timeout(12).with_cancel(rx).prober();
        assert_eq!(prober.timeout(), Duration::from_secs(12));
        assert!(prober.has_cancel());
    }

    #[test]
    fn test_timeouts_scale_with_media() {
        let timeouts = SubprocessTimeouts {
            base_secs: 30,
            per_media_sec: 4.0,
            ceiling_secs: 120,
        };
        assert_eq!(timeouts.for_media(0.0), 30);
        assert_eq!(timeouts.for_media(5.0), 50);
        assert_eq!(timeouts.for_media(600.0), 120);
    }

    #[tokio::test]
    async fn test_cancelled_before_spawn() {
        let (tx, rx) = watch::channel(true);
        let runner = FfmpegRunner::new().with_cancel(rx);
        let cmd = FfmpegCommand::new("/nonexistent/out.mp4");
        assert!(matches!(runner.run(&cmd).await, Err(MediaError::Cancelled)));
        drop(tx);
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let runner = FfmpegRunner::new().with_binary("definitely-not-ffmpeg-xyz");
        let cmd = FfmpegCommand::new("/nonexistent/out.mp4");
        assert!(matches!(runner.run(&cmd).await, Err(MediaError::FfmpegNotFound)));
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        fn fake_ffmpeg(dir: &TempDir, body: &str) -> PathBuf {
            let path = dir.path().join("fake-ffmpeg");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_failure_captures_stderr() {
            let dir = TempDir::new().unwrap();
            let binary = fake_ffmpeg(&dir, "echo 'progress=continue' >&2\necho 'scene.png: Invalid data found' >&2\nexit 1");
            let output = dir.path().join("out.mp4");
            std::fs::write(&output, b"partial").unwrap();

            let err = FfmpegRunner::new()
                .with_binary(&binary)
                .run(&FfmpegCommand::new(&output))
                .await
                .unwrap_err();

            match err {
                MediaError::FfmpegFailed { stderr, exit_code, .. } => {
                    let stderr = stderr.unwrap();
                    assert!(stderr.contains("Invalid data found"));
                    assert!(!stderr.contains("progress="));
                    assert_eq!(exit_code, Some(1));
                }
                other => panic!("unexpected {other:?}"),
            }
            assert!(!output.exists(), "partial output must be removed");
        }

        #[tokio::test]
        async fn test_progress_reported_as_fraction_of_expected() {
            let dir = TempDir::new().unwrap();
            let binary = fake_ffmpeg(
                &dir,
                "printf 'out_time_us=1000000\\nprogress=continue\\nout_time_us=2000000\\nprogress=end\\n' >&2",
            );
            let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
            let sink = seen.clone();

            FfmpegRunner::new()
                .with_binary(&binary)
                .with_progress(4.0, Arc::new(move |f: f64| sink.lock().unwrap().push(f)))
                .run(&FfmpegCommand::new(dir.path().join("o.mp4")))
                .await
                .unwrap();

            assert_eq!(*seen.lock().unwrap(), vec![0.25, 1.0]);
        }

        #[tokio::test]
        async fn test_without_progress_stays_quiet() {
            let dir = TempDir::new().unwrap();
            let binary = fake_ffmpeg(&dir, "printf 'out_time_us=1000000\\nprogress=end\\n' >&2");
            let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
            let counter = calls.clone();

            let runner = FfmpegRunner::new().with_binary(&binary).with_progress(
                1.0,
                Arc::new(move |_: f64| {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }),
            );
            runner
                .without_progress()
                .run(&FfmpegCommand::new(dir.path().join("o.mp4")))
                .await
                .unwrap();

            assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn test_cancel_kills_running_process() {
            let dir = TempDir::new().unwrap();
            let binary = fake_ffmpeg(&dir, "exec sleep 30");
            let (tx, rx) = watch::channel(false);
            let runner = FfmpegRunner::new().with_binary(&binary).with_cancel(rx);
            let cmd = FfmpegCommand::new(dir.path().join("o.mp4"));

            let started = Instant::now();
            let handle = tokio::spawn(async move { runner.run(&cmd).await });
            tokio::time::sleep(Duration::from_millis(200)).await;
            tx.send(true).unwrap();

            let result = handle.await.unwrap();
            assert!(matches!(result, Err(MediaError::Cancelled)));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_timeout_kills_process() {
            let dir = TempDir::new().unwrap();
            let binary = fake_ffmpeg(&dir, "exec sleep 30");
            let result = FfmpegRunner::new()
                .with_binary(&binary)
                .with_timeout(1)
                .run(&FfmpegCommand::new(dir.path().join("o.mp4")))
                .await;
            assert!(matches!(result, Err(MediaError::Timeout(1))));
        }
    }
}
