//! FFmpeg command lines for both composition strategies.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::RenderError;

use super::runner::FfmpegTools;
use super::{RenderOverlay, RenderRequest, Renderer, Strategy};

/// Audio codecs an MP4 can carry without transcoding, keyed by extension.
const MP4_COPYABLE_AUDIO: &[&str] = &["aac", "m4a", "mp3"];

/// Format of the silence generated for clips without an audio stream.
const SILENCE_SOURCE: &str = "anullsrc=channel_layout=stereo:sample_rate=48000";

/// Renders through the `ffmpeg` binary.
pub struct FfmpegRenderer {
    tools: FfmpegTools,
    stream_copy_timeout: Duration,
    reencode_timeout: Duration,
    font_file: Option<PathBuf>,
}

/// Everything the re-encode graph needs beyond the request itself.
#[derive(Debug, Default)]
struct ReencodeInputs {
    /// Display time of each slideshow image.
    image_secs: Option<f64>,
    /// Text file per overlay, `None` for image overlays.
    text_files: Vec<Option<PathBuf>>,
    /// Length of each clip that has no audio stream, `None` for clips that do.
    silent_clips: Vec<Option<f64>>,
    font_file: Option<PathBuf>,
}

impl FfmpegRenderer {
    pub fn new(config: &Config) -> Self {
        Self {
            tools: FfmpegTools::from_config(config),
            stream_copy_timeout: config.stream_copy_timeout(),
            reencode_timeout: config.reencode_timeout(),
            font_file: config.font_file.clone(),
        }
    }

    fn timeout_for(&self, strategy: Strategy) -> Duration {
        match strategy {
            Strategy::StreamCopy => self.stream_copy_timeout,
            Strategy::Reencode => self.reencode_timeout,
        }
    }

    /// Sum of input durations, used only for progress reporting.
    async fn expected_duration(&self, request: &RenderRequest) -> Option<Duration> {
        if request.images.is_empty() {
            let mut total = Duration::ZERO;
            for video in &request.videos {
                total += self.tools.probe_duration(video).await.ok()?;
            }
            Some(total)
        } else {
            let audio = request.audio.as_ref()?;
            self.tools.probe_duration(audio).await.ok()
        }
    }

    /// Durations of clips lacking audio, when the clips' own audio is concatenated.
    async fn silent_clips(&self, request: &RenderRequest) -> Result<Vec<Option<f64>>, RenderError> {
        if !keeps_source_audio(request) {
            return Ok(Vec::new());
        }
        let mut clips = Vec::with_capacity(request.videos.len());
        for video in &request.videos {
            if self.tools.has_audio(video).await? {
                clips.push(None);
            } else {
                let length = self.tools.probe_duration(video).await?;
                debug!("{} has no audio, padding {:.3}s of silence", video.display(), length.as_secs_f64());
                clips.push(Some(length.as_secs_f64()));
            }
        }
        Ok(clips)
    }

    async fn build_args(
        &self,
        request: &RenderRequest,
        strategy: Strategy,
    ) -> Result<Vec<String>, RenderError> {
        match strategy {
            Strategy::StreamCopy => {
                let list = request.work_dir.join("concat.txt");
                tokio::fs::write(&list, concat_list(&request.videos))
                    .await
                    .map_err(|e| {
                        RenderError::tool_failure("ffmpeg", None, format!("failed to write concat list: {e}"))
                    })?;
                Ok(stream_copy_args(request, &list))
            }
            Strategy::Reencode => {
                let image_secs = if request.images.is_empty() {
                    None
                } else {
                    let audio = request.audio.as_ref().ok_or_else(|| {
                        RenderError::tool_failure("ffmpeg", None, "slideshow has no audio track")
                    })?;
                    let total = self.tools.probe_duration(audio).await?;
                    Some(total.as_secs_f64() / request.images.len() as f64)
                };
                let inputs = ReencodeInputs {
                    image_secs,
                    text_files: write_text_files(request).await?,
                    silent_clips: self.silent_clips(request).await?,
                    font_file: self.font_file.clone(),
                };
                Ok(reencode_args(request, &inputs))
            }
        }
    }
}

#[async_trait]
impl Renderer for FfmpegRenderer {
    async fn render(
        &self,
        request: &RenderRequest,
        strategy: Strategy,
        progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<(), RenderError> {
        let args = self.build_args(request, strategy).await?;

        let mut runner = self.tools.runner().with_timeout(self.timeout_for(strategy));
        if let Some(duration) = self.expected_duration(request).await {
            runner = runner.with_expected_duration(duration);
        }

        let result = runner.run_with_progress(&args, progress).await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(&request.output).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove partial output: {}", e);
                }
            }
        }
        result
    }

    fn name(&self) -> &'static str {
        "FFmpeg"
    }
}

/// Concat demuxer list with single quotes escaped.
fn concat_list(videos: &[impl AsRef<Path>]) -> String {
    videos
        .iter()
        .map(|p| {
            let path = p.as_ref().display().to_string().replace('\'', r"'\''");
            format!("file '{path}'\n")
        })
        .collect()
}

/// Escape a value embedded in a filtergraph option.
fn escape_filter_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '\'' | ':' | ',' | ';' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn enable_expr(start: Option<f64>, end: Option<f64>) -> String {
    match (start, end) {
        (None, None) => String::new(),
        (Some(s), None) => format!(":enable='gte(t,{s:.3})'"),
        (s, Some(e)) => format!(":enable='between(t,{:.3},{e:.3})'", s.unwrap_or(0.0)),
    }
}

/// Source audio is concatenated alongside video only when nothing replaces it.
fn keeps_source_audio(request: &RenderRequest) -> bool {
    request.images.is_empty() && request.audio.is_none()
}

fn push(args: &mut Vec<String>, items: &[&str]) {
    args.extend(items.iter().map(|s| s.to_string()));
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

fn copyable_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| MP4_COPYABLE_AUDIO.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// `amix` chain over a base audio stream and delayed, scaled effects.
/// Effects are expected as inputs `first_effect..`.
fn effects_mix(request: &RenderRequest, base: &str, first_effect: usize) -> String {
    let mut parts = Vec::new();
    let mut labels = format!("[{base}]");
    for (i, effect) in request.sound_effects.iter().enumerate() {
        let delay_ms = (effect.start * 1000.0).round() as u64;
        parts.push(format!(
            "[{}:a]adelay={delay_ms}:all=1,volume={:.3}[fx{i}]",
            first_effect + i,
            effect.volume
        ));
        labels.push_str(&format!("[fx{i}]"));
    }
    parts.push(format!(
        "{labels}amix=inputs={}:duration=first:dropout_transition=0:normalize=0[aout]",
        request.sound_effects.len() + 1
    ));
    parts.join(";")
}

/// Concatenate with the concat demuxer and copy the video stream.
fn stream_copy_args(request: &RenderRequest, concat_list: &Path) -> Vec<String> {
    let mut args = Vec::new();
    push(&mut args, &["-f", "concat", "-safe", "0", "-i"]);
    args.push(path_arg(concat_list));

    if let Some(audio) = &request.audio {
        args.push("-i".into());
        args.push(path_arg(audio));
    }
    let first_effect = 1 + usize::from(request.audio.is_some());
    for effect in &request.sound_effects {
        args.push("-i".into());
        args.push(path_arg(&effect.path));
    }

    let base_audio = if request.audio.is_some() { "1:a:0" } else { "0:a:0" };

    if !request.sound_effects.is_empty() {
        args.push("-filter_complex".into());
        args.push(effects_mix(request, base_audio, first_effect));
        push(&mut args, &["-map", "0:v:0", "-map", "[aout]", "-c:v", "copy"]);
        push(&mut args, &["-c:a", "aac", "-b:a"]);
        args.push(format!("{}k", request.options.audio_bitrate_kbps));
    } else if let Some(audio) = &request.audio {
        push(&mut args, &["-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy"]);
        if copyable_audio(audio) {
            push(&mut args, &["-c:a", "copy"]);
        } else {
            push(&mut args, &["-c:a", "aac", "-b:a"]);
            args.push(format!("{}k", request.options.audio_bitrate_kbps));
        }
    } else {
        push(&mut args, &["-map", "0:v:0", "-map", "0:a?", "-c", "copy"]);
    }

    if request.audio.is_some() {
        args.push("-shortest".into());
    }
    push(&mut args, &["-movflags", "+faststart"]);
    args.push(path_arg(&request.output));
    args
}

/// Decode every input, normalize size and rate, concatenate, draw overlays
/// and encode with the request's options.
fn reencode_args(request: &RenderRequest, inputs: &ReencodeInputs) -> Vec<String> {
    let opts = &request.options;
    let mut args = Vec::new();

    let visual_count = if request.images.is_empty() {
        for video in &request.videos {
            args.push("-i".into());
            args.push(path_arg(video));
        }
        request.videos.len()
    } else {
        let secs = inputs.image_secs.unwrap_or(1.0);
        for image in &request.images {
            push(&mut args, &["-loop", "1", "-t"]);
            args.push(format!("{secs:.3}"));
            args.push("-i".into());
            args.push(path_arg(image));
        }
        request.images.len()
    };

    let mut next_input = visual_count;
    let audio_input = request.audio.as_ref().map(|audio| {
        args.push("-i".into());
        args.push(path_arg(audio));
        next_input += 1;
        next_input - 1
    });

    let mut overlay_inputs = Vec::with_capacity(request.overlays.len());
    for overlay in &request.overlays {
        match overlay {
            RenderOverlay::Image { path, .. } => {
                args.push("-i".into());
                args.push(path_arg(path));
                overlay_inputs.push(Some(next_input));
                next_input += 1;
            }
            RenderOverlay::Text { .. } => overlay_inputs.push(None),
        }
    }

    let first_effect = next_input;
    for effect in &request.sound_effects {
        args.push("-i".into());
        args.push(path_arg(&effect.path));
    }

    let mut graph = Vec::new();
    for i in 0..visual_count {
        graph.push(format!(
            "[{i}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1,fps={fps},format=yuv420p[v{i}]",
            w = opts.width,
            h = opts.height,
            fps = opts.fps
        ));
    }

    let keep_source_audio = keeps_source_audio(request);
    let mut concat_inputs = String::new();
    for i in 0..visual_count {
        concat_inputs.push_str(&format!("[v{i}]"));
        if !keep_source_audio {
            continue;
        }
        match inputs.silent_clips.get(i).copied().flatten() {
            Some(secs) => {
                graph.push(format!("{SILENCE_SOURCE},atrim=duration={secs:.3}[a{i}]"));
                concat_inputs.push_str(&format!("[a{i}]"));
            }
            None => concat_inputs.push_str(&format!("[{i}:a]")),
        }
    }
    if keep_source_audio {
        graph.push(format!(
            "{concat_inputs}concat=n={visual_count}:v=1:a=1[base][abase]"
        ));
    } else {
        graph.push(format!("{concat_inputs}concat=n={visual_count}:v=1:a=0[base]"));
    }

    let mut current = "base".to_string();
    for (j, overlay) in request.overlays.iter().enumerate() {
        let label = format!("ov{j}");
        match overlay {
            RenderOverlay::Text {
                text,
                x,
                y,
                font_size,
                color,
                start,
                end,
            } => {
                let source = match inputs.text_files.get(j).and_then(|p| p.as_ref()) {
                    Some(path) => format!("textfile={}", escape_filter_value(&path.display().to_string())),
                    None => format!("text={}", escape_filter_value(text)),
                };
                let font = inputs
                    .font_file
                    .as_ref()
                    .map(|f| format!(":fontfile={}", escape_filter_value(&f.display().to_string())))
                    .unwrap_or_default();
                graph.push(format!(
                    "[{current}]drawtext={source}{font}:fontsize={font_size}:fontcolor={}:\
                     x={}:y={}:borderw=2:bordercolor=black{}[{label}]",
                    escape_filter_value(color),
                    escape_filter_value(x),
                    escape_filter_value(y),
                    enable_expr(*start, *end)
                ));
            }
            RenderOverlay::Image {
                x, y, start, end, ..
            } => {
                let input = overlay_inputs[j].unwrap_or_default();
                graph.push(format!(
                    "[{current}][{input}:v]overlay=x={}:y={}{}[{label}]",
                    escape_filter_value(x),
                    escape_filter_value(y),
                    enable_expr(*start, *end)
                ));
            }
        }
        current = label;
    }

    let base_audio = match audio_input {
        Some(idx) => format!("{idx}:a"),
        None => "abase".to_string(),
    };
    let audio_map = if request.sound_effects.is_empty() {
        if audio_input.is_some() {
            base_audio
        } else {
            "[abase]".to_string()
        }
    } else {
        graph.push(effects_mix(request, &base_audio, first_effect));
        "[aout]".to_string()
    };

    args.push("-filter_complex".into());
    args.push(graph.join(";"));
    args.push("-map".into());
    args.push(format!("[{current}]"));
    args.push("-map".into());
    args.push(audio_map);
    args.extend(opts.output_args());
    if request.audio.is_some() {
        args.push("-shortest".into());
    }
    push(&mut args, &["-movflags", "+faststart"]);
    args.push(path_arg(&request.output));

    debug!("Filter graph has {} nodes", graph.len());
    args
}

/// Text overlays are passed through files so arbitrary text needs no quoting.
async fn write_text_files(request: &RenderRequest) -> Result<Vec<Option<PathBuf>>, RenderError> {
    let mut files = Vec::with_capacity(request.overlays.len());
    for (j, overlay) in request.overlays.iter().enumerate() {
        match overlay {
            RenderOverlay::Text { text, .. } => {
                let path = request.work_dir.join(format!("overlay_{j}.txt"));
                tokio::fs::write(&path, text).await.map_err(|e| {
                    RenderError::tool_failure("ffmpeg", None, format!("failed to write overlay text: {e}"))
                })?;
                files.push(Some(path));
            }
            RenderOverlay::Image { .. } => files.push(None),
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{EncodeOptions, RenderSoundEffect};

    fn base_request() -> RenderRequest {
        RenderRequest {
            videos: vec![PathBuf::from("/w/video_0.mp4"), PathBuf::from("/w/video_1.mp4")],
            images: Vec::new(),
            audio: None,
            overlays: Vec::new(),
            sound_effects: Vec::new(),
            options: EncodeOptions::default(),
            work_dir: PathBuf::from("/w"),
            output: PathBuf::from("/out/video.mp4"),
        }
    }

    fn joined(args: &[String]) -> String {
        args.join(" ")
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> &'a str {
        let pos = args.iter().position(|a| a == flag).unwrap();
        &args[pos + 1]
    }

    #[test]
    fn test_concat_list_escapes_quotes() {
        let list = concat_list(&[PathBuf::from("/w/it's.mp4"), PathBuf::from("/w/b.mp4")]);
        assert_eq!(list, "file '/w/it'\\''s.mp4'\nfile '/w/b.mp4'\n");
    }

    #[test]
    fn test_escape_filter_value() {
        assert_eq!(escape_filter_value("(w-text_w)/2"), "(w-text_w)/2");
        assert_eq!(escape_filter_value("max(0,10)"), "max(0\\,10)");
        assert_eq!(escape_filter_value("C:\\t.txt"), "C\\:\\\\t.txt");
    }

    #[test]
    fn test_enable_expr() {
        assert_eq!(enable_expr(None, None), "");
        assert_eq!(enable_expr(Some(1.0), None), ":enable='gte(t,1.000)'");
        assert_eq!(
            enable_expr(None, Some(2.5)),
            ":enable='between(t,0.000,2.500)'"
        );
    }

    #[test]
    fn test_stream_copy_plain_concat() {
        let args = stream_copy_args(&base_request(), Path::new("/w/concat.txt"));
        let s = joined(&args);

        assert!(s.starts_with("-f concat -safe 0 -i /w/concat.txt"));
        assert!(s.contains("-c copy"));
        assert!(s.contains("-movflags +faststart"));
        assert!(!s.contains("libx264"));
        assert_eq!(args.last().unwrap(), "/out/video.mp4");
    }

    #[test]
    fn test_stream_copy_replacement_audio() {
        let mut request = base_request();
        request.audio = Some(PathBuf::from("/w/audio.mp3"));
        let s = joined(&stream_copy_args(&request, Path::new("/w/concat.txt")));
        assert!(s.contains("-map 0:v:0 -map 1:a:0 -c:v copy -c:a copy"));
        assert!(s.contains("-shortest"));

        request.audio = Some(PathBuf::from("/w/audio.wav"));
        let s = joined(&stream_copy_args(&request, Path::new("/w/concat.txt")));
        assert!(s.contains("-c:a aac -b:a 128k"));
    }

    #[test]
    fn test_stream_copy_mixes_sound_effects() {
        let mut request = base_request();
        request.sound_effects.push(RenderSoundEffect {
            path: PathBuf::from("/w/fx_0.wav"),
            start: 1.5,
            volume: 0.5,
        });
        let args = stream_copy_args(&request, Path::new("/w/concat.txt"));
        let graph = value_after(&args, "-filter_complex");

        assert!(graph.contains("[1:a]adelay=1500:all=1,volume=0.500[fx0]"));
        assert!(graph.contains("[0:a:0][fx0]amix=inputs=2"));
        assert!(joined(&args).contains("-map [aout] -c:v copy"));
    }

    #[test]
    fn test_reencode_with_text_overlay() {
        let mut request = base_request();
        request.overlays.push(RenderOverlay::Text {
            text: "Hello: world".into(),
            x: "(w-text_w)/2".into(),
            y: "h-100".into(),
            font_size: 40,
            color: "white".into(),
            start: Some(1.0),
            end: Some(4.0),
        });
        let inputs = ReencodeInputs {
            text_files: vec![Some(PathBuf::from("/w/overlay_0.txt"))],
            ..Default::default()
        };
        let args = reencode_args(&request, &inputs);
        let graph = value_after(&args, "-filter_complex");

        assert!(graph.contains("[0:v]scale=1280:720"));
        assert!(graph.contains("[v0][0:a][v1][1:a]concat=n=2:v=1:a=1[base][abase]"));
        assert!(graph.contains("[base]drawtext=textfile=/w/overlay_0.txt:fontsize=40"));
        assert!(!graph.contains("fontfile="));
        assert!(graph.contains("between(t,1.000,4.000)"));
        assert_eq!(value_after(&args, "-map"), "[ov0]");

        let s = joined(&args);
        assert!(s.contains("-map [abase]"));
        assert!(s.contains("-c:v libx264"));
        assert!(s.contains("-movflags +faststart"));
    }

    #[test]
    fn test_reencode_slideshow_with_image_overlay() {
        let mut request = base_request();
        request.videos.clear();
        request.images = vec![PathBuf::from("/w/image_0.jpg"), PathBuf::from("/w/image_1.png")];
        request.audio = Some(PathBuf::from("/w/audio.mp3"));
        request.overlays.push(RenderOverlay::Image {
            path: PathBuf::from("/w/overlay_0.png"),
            x: "10".into(),
            y: "10".into(),
            start: None,
            end: None,
        });

        let inputs = ReencodeInputs {
            image_secs: Some(5.0),
            text_files: vec![None],
            ..Default::default()
        };
        let args = reencode_args(&request, &inputs);
        let s = joined(&args);

        assert!(s.contains("-loop 1 -t 5.000 -i /w/image_0.jpg"));
        assert!(s.contains("-loop 1 -t 5.000 -i /w/image_1.png"));
        // images 0,1 then audio 2 then overlay 3
        assert!(s.contains("-i /w/audio.mp3 -i /w/overlay_0.png"));

        let graph = value_after(&args, "-filter_complex");
        assert!(graph.contains("[v0][v1]concat=n=2:v=1:a=0[base]"));
        assert!(graph.contains("[base][3:v]overlay=x=10:y=10[ov0]"));
        assert!(s.contains("-map [ov0] -map 2:a"));
        assert!(s.contains("-shortest"));
    }

    #[test]
    fn test_reencode_effects_follow_overlay_inputs() {
        let mut request = base_request();
        request.audio = Some(PathBuf::from("/w/audio.mp3"));
        request.overlays.push(RenderOverlay::Image {
            path: PathBuf::from("/w/overlay_0.png"),
            x: "0".into(),
            y: "0".into(),
            start: None,
            end: Some(3.0),
        });
        request.sound_effects.push(RenderSoundEffect {
            path: PathBuf::from("/w/fx_0.wav"),
            start: 0.25,
            volume: 2.0,
        });

        let inputs = ReencodeInputs {
            text_files: vec![None],
            ..Default::default()
        };
        let args = reencode_args(&request, &inputs);
        let graph = value_after(&args, "-filter_complex");

        // videos 0,1; audio 2; overlay 3; effect 4
        assert!(graph.contains("[base][3:v]overlay"));
        assert!(graph.contains("[4:a]adelay=250:all=1,volume=2.000[fx0]"));
        assert!(graph.contains("[2:a][fx0]amix=inputs=2"));
        assert!(joined(&args).contains("-map [aout]"));
    }

    #[test]
    fn test_reencode_pads_clip_without_audio() {
        let request = base_request();
        let inputs = ReencodeInputs {
            silent_clips: vec![None, Some(4.0)],
            ..Default::default()
        };
        let args = reencode_args(&request, &inputs);
        let graph = value_after(&args, "-filter_complex");

        assert!(graph.contains(
            "anullsrc=channel_layout=stereo:sample_rate=48000,atrim=duration=4.000[a1]"
        ));
        assert!(graph.contains("[v0][0:a][v1][a1]concat=n=2:v=1:a=1[base][abase]"));
        assert!(!graph.contains("[1:a]"));
        assert!(joined(&args).contains("-map [abase]"));
    }

    #[test]
    fn test_replacement_audio_needs_no_padding() {
        let mut request = base_request();
        request.audio = Some(PathBuf::from("/w/audio.mp3"));
        assert!(!keeps_source_audio(&request));

        let inputs = ReencodeInputs {
            silent_clips: vec![Some(4.0), Some(4.0)],
            ..Default::default()
        };
        let graph = value_after(&reencode_args(&request, &inputs), "-filter_complex").to_string();
        assert!(!graph.contains("anullsrc"));
        assert!(graph.contains("[v0][v1]concat=n=2:v=1:a=0[base]"));
    }

    #[test]
    fn test_drawtext_uses_configured_font() {
        let mut request = base_request();
        request.overlays.push(RenderOverlay::Text {
            text: "Title".into(),
            x: "10".into(),
            y: "10".into(),
            font_size: 24,
            color: "white".into(),
            start: None,
            end: None,
        });
        let inputs = ReencodeInputs {
            text_files: vec![Some(PathBuf::from("/w/overlay_0.txt"))],
            font_file: Some(PathBuf::from("/fonts/Inter Bold.ttf")),
            ..Default::default()
        };
        let graph = value_after(&reencode_args(&request, &inputs), "-filter_complex").to_string();

        assert!(graph.contains(
            "drawtext=textfile=/w/overlay_0.txt:fontfile=/fonts/Inter Bold.ttf:fontsize=24"
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_render_with_hanging_tools_times_out() {
        use crate::render::runner::hanging_tool;

        let dir = tempfile::tempdir().unwrap();
        let tool = hanging_tool(dir.path()).display().to_string();
        let config = Config {
            ffmpeg_path: tool.clone(),
            ffprobe_path: tool,
            stream_copy_timeout_secs: 1,
            probe_timeout_secs: 1,
            ..Config::default()
        };
        let mut request = base_request();
        request.work_dir = dir.path().to_path_buf();
        request.output = dir.path().join("out.mp4");

        let renderer = FfmpegRenderer::new(&config);
        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            renderer.render(&request, Strategy::StreamCopy, &|_: f64| {}),
        )
        .await
        .expect("render should give up on its own");

        assert!(outcome.unwrap_err().is_timeout());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reencode_with_hanging_ffprobe_times_out() {
        use crate::render::runner::hanging_tool;

        let dir = tempfile::tempdir().unwrap();
        let tool = hanging_tool(dir.path()).display().to_string();
        let config = Config {
            ffmpeg_path: tool.clone(),
            ffprobe_path: tool,
            probe_timeout_secs: 1,
            ..Config::default()
        };
        let mut request = base_request();
        request.work_dir = dir.path().to_path_buf();
        request.output = dir.path().join("out.mp4");

        let renderer = FfmpegRenderer::new(&config);
        let err = tokio::time::timeout(
            Duration::from_secs(10),
            renderer.render(&request, Strategy::Reencode, &|_: f64| {}),
        )
        .await
        .expect("render should give up on its own")
        .unwrap_err();

        match err {
            RenderError::Timeout { after, .. } => assert_eq!(after, Duration::from_secs(1)),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_copyable_audio() {
        assert!(copyable_audio(Path::new("/w/a.MP3")));
        assert!(copyable_audio(Path::new("/w/a.m4a")));
        assert!(!copyable_audio(Path::new("/w/a.wav")));
        assert!(!copyable_audio(Path::new("/w/a")));
    }
}
