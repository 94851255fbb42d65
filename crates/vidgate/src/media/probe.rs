//! Media metadata probing.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

/// Video properties sent along with an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaMetadata {
    /// Whole seconds.
    pub duration: u32,
    pub width: u32,
    pub height: u32,
}

#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// `None` when the file cannot be probed. Callers send without metadata.
    async fn probe(&self, path: &Path) -> Option<MediaMetadata>;
}

/// Probe that never reports metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProbe;

#[async_trait]
impl MediaProbe for NoopProbe {
    async fn probe(&self, _path: &Path) -> Option<MediaMetadata> {
        None
    }
}

/// Runs `ffprobe` and reads its JSON output.
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    command: String,
}

impl FfprobeProbe {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe(&self, path: &Path) -> Option<MediaMetadata> {
        let output = Command::new(&self.command)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,duration:format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                debug!(
                    path = %path.display(),
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Media probe failed"
                );
                return None;
            }
            Err(e) => {
                debug!(command = %self.command, error = %e, "Media probe could not run");
                return None;
            }
        };

        let metadata = parse_ffprobe_output(&output.stdout);
        if metadata.is_none() {
            debug!(path = %path.display(), "Media probe output had no video stream");
        }
        metadata
    }
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    // ffprobe prints durations as strings
    duration: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Extract metadata of the first video stream. Stream duration wins over
/// container duration.
pub fn parse_ffprobe_output(stdout: &[u8]) -> Option<MediaMetadata> {
    let output: ProbeOutput = serde_json::from_slice(stdout).ok()?;
    let stream = output.streams.into_iter().next()?;

    let seconds = |d: Option<String>| d.and_then(|d| d.trim().parse::<f64>().ok());
    let duration = seconds(stream.duration)
        .or_else(|| seconds(output.format.and_then(|f| f.duration)))
        .filter(|d| d.is_finite() && *d >= 0.0)?;

    Some(MediaMetadata {
        duration: duration.round() as u32,
        width: stream.width?,
        height: stream.height?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_stream_fields() {
        let out = br#"{"programs":[],"streams":[{"width":1280,"height":720,"duration":"12.600000"}],"format":{"duration":"12.640000"}}"#;
        assert_eq!(
            parse_ffprobe_output(out),
            Some(MediaMetadata {
                duration: 13,
                width: 1280,
                height: 720
            })
        );
    }

    #[test]
    fn falls_back_to_container_duration() {
        let out = br#"{"streams":[{"width":640,"height":360}],"format":{"duration":"4.2"}}"#;
        assert_eq!(parse_ffprobe_output(out).map(|m| m.duration), Some(4));
    }

    #[test]
    fn no_video_stream_is_none() {
        assert_eq!(parse_ffprobe_output(br#"{"streams":[],"format":{}}"#), None);
        assert_eq!(parse_ffprobe_output(b"not json"), None);
        assert_eq!(
            parse_ffprobe_output(br#"{"streams":[{"width":640,"height":360}]}"#),
            None
        );
    }

    #[tokio::test]
    async fn missing_binary_is_none() {
        let probe = FfprobeProbe::new("/nonexistent/ffprobe");
        assert_eq!(probe.probe(Path::new("/tmp/x.mp4")).await, None);
    }
}
