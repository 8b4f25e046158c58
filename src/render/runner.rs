//! Bounded invocation of the external FFmpeg tools.

use std::ffi::OsStr;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::RenderError;

/// Keep only the tail of stderr in error messages.
const MAX_STDERR_CHARS: usize = 2000;

/// Default bound for one ffprobe call.
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Locations of the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegTools {
    pub ffmpeg: String,
    pub ffprobe: String,
    /// Bound for version checks and probes; the child is killed when it expires.
    pub probe_timeout: Duration,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl FfmpegTools {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
            probe_timeout: config.probe_timeout(),
        }
    }

    /// Check that both binaries run.
    pub async fn check(&self) -> Result<(), RenderError> {
        for tool in [&self.ffmpeg, &self.ffprobe] {
            let output = self
                .bounded_output(tool, &[OsStr::new("-version")])
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        e
                    } else {
                        RenderError::tool_failure(
                            tool.as_str(),
                            None,
                            format!("{tool} not found. Install FFmpeg and ensure it is on PATH: {e}"),
                        )
                    }
                })?;
            if !output.status.success() {
                return Err(RenderError::tool_failure(
                    tool.as_str(),
                    output.status.code(),
                    "version check failed",
                ));
            }
        }
        debug!("FFmpeg tools are available");
        Ok(())
    }

    /// Container duration as reported by ffprobe.
    pub async fn probe_duration(&self, input: &Path) -> Result<Duration, RenderError> {
        let output = self
            .probe(&[
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-show_entries"),
                OsStr::new("format=duration"),
                OsStr::new("-of"),
                OsStr::new("default=noprint_wrappers=1:nokey=1"),
                input.as_os_str(),
            ])
            .await?;

        let text = String::from_utf8_lossy(&output.stdout);
        let secs: f64 = text.trim().parse().map_err(|e| {
            RenderError::tool_failure(
                &self.ffprobe,
                output.status.code(),
                format!("failed to parse duration '{}': {e}", text.trim()),
            )
        })?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(RenderError::tool_failure(
                &self.ffprobe,
                output.status.code(),
                format!("invalid duration '{}'", text.trim()),
            ));
        }

        Ok(Duration::from_secs_f64(secs))
    }

    /// Whether the file carries at least one audio stream.
    pub async fn has_audio(&self, input: &Path) -> Result<bool, RenderError> {
        let output = self
            .probe(&[
                OsStr::new("-v"),
                OsStr::new("error"),
                OsStr::new("-select_streams"),
                OsStr::new("a"),
                OsStr::new("-show_entries"),
                OsStr::new("stream=index"),
                OsStr::new("-of"),
                OsStr::new("csv=p=0"),
                input.as_os_str(),
            ])
            .await?;
        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }

    /// Run ffprobe and require a zero exit.
    async fn probe(&self, args: &[&OsStr]) -> Result<Output, RenderError> {
        let output = self.bounded_output(&self.ffprobe, args).await?;
        if !output.status.success() {
            return Err(RenderError::tool_failure(
                &self.ffprobe,
                output.status.code(),
                tail(&String::from_utf8_lossy(&output.stderr)),
            ));
        }
        Ok(output)
    }

    /// Run `program` to completion within `probe_timeout`.
    async fn bounded_output(&self, program: &str, args: &[&OsStr]) -> Result<Output, RenderError> {
        let pending = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.probe_timeout, pending).await {
            Ok(result) => result.map_err(|e| {
                RenderError::tool_failure(program, None, format!("failed to run: {e}"))
            }),
            Err(_) => {
                // Dropping the pending output kills the child.
                warn!(
                    "{} timed out after {}s, killing process",
                    program,
                    self.probe_timeout.as_secs()
                );
                Err(RenderError::Timeout {
                    tool: program.to_string(),
                    after: self.probe_timeout,
                })
            }
        }
    }

    pub fn runner(&self) -> FfmpegRunner {
        FfmpegRunner::new(self.ffmpeg.clone())
    }
}

/// Runs one ffmpeg command with an optional hard timeout.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    program: String,
    timeout: Option<Duration>,
    expected_duration: Option<Duration>,
}

impl FfmpegRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
            expected_duration: None,
        }
    }

    /// Kill the process and fail with [`RenderError::Timeout`] after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Media duration the output is expected to reach, for progress reporting.
    pub fn with_expected_duration(mut self, duration: Duration) -> Self {
        self.expected_duration = Some(duration);
        self
    }

    /// Arguments placed before the caller's own.
    fn base_args() -> [&'static str; 8] {
        [
            "-hide_banner",
            "-nostdin",
            "-y",
            "-v",
            "error",
            "-progress",
            "pipe:1",
            "-nostats",
        ]
    }

    pub async fn run(&self, args: &[String]) -> Result<(), RenderError> {
        self.run_with_progress(args, |_| {}).await
    }

    /// Run ffmpeg, reporting completion fractions in `[0, 1]` as they are parsed.
    pub async fn run_with_progress<F>(&self, args: &[String], on_progress: F) -> Result<(), RenderError>
    where
        F: Fn(f64) + Send + Sync,
    {
        debug!("Running: {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(Self::base_args())
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RenderError::tool_failure(&self.program, None, format!("failed to spawn: {e}"))
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let total_secs = self
            .expected_duration
            .map(|d| d.as_secs_f64())
            .filter(|secs| *secs > 0.0);

        let progress = async {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let (Some(total), Some(out_us)) = (total_secs, parse_out_time_us(&line)) {
                        on_progress((out_us as f64 / 1_000_000.0 / total).clamp(0.0, 1.0));
                    }
                }
            }
        };
        let errors = async {
            let mut text = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut text).await;
            }
            text
        };
        let run = async {
            let ((), stderr_text, status) = tokio::join!(progress, errors, child.wait());
            (stderr_text, status)
        };

        let finished = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.ok(),
            None => Some(run.await),
        };
        let Some((stderr_text, status)) = finished else {
            let limit = self.timeout.unwrap_or_default();
            warn!(
                "{} timed out after {}s, killing process",
                self.program,
                limit.as_secs()
            );
            let _ = child.kill().await;
            return Err(RenderError::Timeout {
                tool: self.program.clone(),
                after: limit,
            });
        };

        let status = status.map_err(|e| {
            RenderError::tool_failure(&self.program, None, format!("failed to wait: {e}"))
        })?;

        if !status.success() {
            return Err(RenderError::tool_failure(
                &self.program,
                status.code(),
                tail(&stderr_text),
            ));
        }

        on_progress(1.0);
        Ok(())
    }
}

/// Stand-in tool that never exits, for timeout tests.
#[cfg(all(test, unix))]
pub(crate) fn hanging_tool(dir: &Path) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("hanging-tool");
    std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// `out_time_us=<n>` lines from `-progress` output.
fn parse_out_time_us(line: &str) -> Option<i64> {
    line.trim()
        .strip_prefix("out_time_us=")
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|us| *us > 0)
}

fn tail(text: &str) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= MAX_STDERR_CHARS {
        return text.to_string();
    }
    text.chars().skip(count - MAX_STDERR_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ffmpeg_available() -> bool {
        std::process::Command::new("ffmpeg")
            .arg("-version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_parse_out_time_us() {
        assert_eq!(parse_out_time_us("out_time_us=1500000"), Some(1_500_000));
        assert_eq!(parse_out_time_us("out_time_us=N/A"), None);
        assert_eq!(parse_out_time_us("out_time_us=0"), None);
        assert_eq!(parse_out_time_us("frame=42"), None);
    }

    #[test]
    fn test_tail_truncates_long_output() {
        let long = "x".repeat(MAX_STDERR_CHARS + 50);
        assert_eq!(tail(&long).len(), MAX_STDERR_CHARS);
        assert_eq!(tail("  short \n"), "short");
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_failure() {
        let runner = FfmpegRunner::new("/nonexistent/ffmpeg-binary");
        let err = runner.run(&["-version".to_string()]).await.unwrap_err();
        assert!(matches!(err, RenderError::ToolFailure { code: None, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hanging_ffprobe_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let tool = hanging_tool(dir.path()).display().to_string();
        let tools = FfmpegTools {
            ffmpeg: tool.clone(),
            ffprobe: tool.clone(),
            probe_timeout: Duration::from_millis(300),
        };

        let started = std::time::Instant::now();
        let err = tools
            .probe_duration(Path::new("/tmp/clip.mp4"))
            .await
            .unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            RenderError::Timeout { tool: name, after } => {
                assert_eq!(name, tool);
                assert_eq!(after, Duration::from_millis(300));
            }
            other => panic!("expected timeout, got {other:?}"),
        }

        assert!(tools.has_audio(Path::new("/tmp/clip.mp4")).await.unwrap_err().is_timeout());
        assert!(tools.check().await.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_missing_ffprobe_is_tool_failure() {
        let tools = FfmpegTools {
            ffprobe: "/nonexistent/ffprobe-binary".to_string(),
            ..Default::default()
        };
        let err = tools.probe_duration(Path::new("/tmp/clip.mp4")).await.unwrap_err();
        assert!(matches!(err, RenderError::ToolFailure { code: None, .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        if !ffmpeg_available() {
            eprintln!("Skipping test: FFmpeg not available");
            return;
        }

        // An endless synthetic source never finishes on its own
        let args: Vec<String> = ["-f", "lavfi", "-i", "anullsrc", "-f", "null", "-"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let runner = FfmpegRunner::new("ffmpeg").with_timeout(Duration::from_millis(300));

        let err = runner.run(&args).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_tool_failure() {
        if !ffmpeg_available() {
            eprintln!("Skipping test: FFmpeg not available");
            return;
        }

        let args = vec!["-i".to_string(), "/nonexistent/input.mp4".to_string(), "-f".to_string(), "null".to_string(), "-".to_string()];
        let err = FfmpegRunner::new("ffmpeg")
            .with_timeout(Duration::from_secs(30))
            .run(&args)
            .await
            .unwrap_err();
        match err {
            RenderError::ToolFailure { code, .. } => assert_ne!(code, Some(0)),
            other => panic!("expected tool failure, got {other:?}"),
        }
    }
}
