use super::types::QualityRequest;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Non-zero exit from yt-dlp, with its stderr kept for callers that inspect it.
#[derive(Debug, Error)]
#[error("yt-dlp failed with code {code:?}: {stderr}")]
pub struct ExtractorError {
    pub code: Option<i32>,
    pub stderr: String,
}

#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
    user_agent: Option<String>,
    audio_quality: Option<&'static str>,
    metadata_timeout: Duration,
    download_timeout: Duration,
}

impl YtDlp {
    pub fn new(binary: &str, metadata_timeout: Duration, download_timeout: Duration) -> Self {
        Self {
            binary: binary.to_string(),
            user_agent: None,
            audio_quality: None,
            metadata_timeout,
            download_timeout,
        }
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    /// Passes `--audio-quality 0` on audio extraction.
    pub fn with_best_audio_quality(mut self) -> Self {
        self.audio_quality = Some("0");
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        // The child dies with the future, so a timeout never leaves it running.
        cmd.kill_on_drop(true)
            .stdin(Stdio::null())
            .arg("--no-warnings")
            .arg("--no-playlist")
            .arg("--no-mtime");
        if let Some(user_agent) = &self.user_agent {
            cmd.arg("--user-agent").arg(user_agent);
        }
        cmd
    }

    async fn run(&self, mut cmd: Command, timeout: Duration) -> Result<Vec<u8>> {
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .with_context(|| format!("yt-dlp timed out after {}s", timeout.as_secs()))?
            .with_context(|| format!("Failed to run {}", self.binary))?;

        if !output.status.success() {
            return Err(ExtractorError {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        Ok(output.stdout)
    }

    pub async fn dump_json(&self, url: &str) -> Result<Value> {
        debug!("Extracting metadata with yt-dlp for: {}", url);

        let mut cmd = self.command();
        cmd.arg("--dump-json").arg("--skip-download").arg(url);

        let stdout = self.run(cmd, self.metadata_timeout).await?;
        let json_str = String::from_utf8_lossy(&stdout);
        debug!("yt-dlp JSON output: {}", json_str);

        serde_json::from_str(&json_str).context("Failed to parse media metadata")
    }

    /// Downloads into `output`, whose extension must already match the request kind.
    pub async fn download(
        &self,
        url: &str,
        request: QualityRequest,
        output: &Path,
    ) -> Result<PathBuf> {
        info!("Downloading {:?} with yt-dlp into {}", request, output.display());

        let mut cmd = self.command();
        match request {
            QualityRequest::Audio => {
                cmd.arg("--extract-audio").arg("--audio-format").arg("mp3");
                if let Some(quality) = self.audio_quality {
                    cmd.arg("--audio-quality").arg(quality);
                }
            }
            QualityRequest::MaxHeight(_) | QualityRequest::Best => {
                cmd.arg("--format")
                    .arg(request.format_selector())
                    .arg("--remux-video")
                    .arg("mp4");
            }
        }
        cmd.arg("--print")
            .arg("after_move:filepath")
            .arg("--output")
            .arg(output_template(output))
            .arg(url);

        let stdout = self.run(cmd, self.download_timeout).await?;

        let path = resolve_output(printed_path(&stdout), output).await?;
        // the sweep ages files by mtime
        restamp(&path)
            .await
            .with_context(|| format!("Failed to update mtime of {}", path.display()))?;
        Ok(path)
    }

    pub async fn test_availability(binary: &str) -> bool {
        super::probe_tool("yt-dlp", binary, "--version").await
    }
}

/// `/dir/name.mp4` -> `/dir/name.%(ext)s`
fn output_template(output: &Path) -> PathBuf {
    output.with_extension("%(ext)s")
}

fn printed_path(stdout: &[u8]) -> Option<PathBuf> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .map(PathBuf::from)
}

async fn resolve_output(printed: Option<PathBuf>, expected: &Path) -> Result<PathBuf> {
    for candidate in printed.iter().map(PathBuf::as_path).chain([expected]) {
        if tokio::fs::try_exists(candidate).await.unwrap_or(false) {
            return Ok(candidate.to_path_buf());
        }
    }

    Err(anyhow::anyhow!(
        "yt-dlp finished but no output file was found at {}",
        expected.display()
    ))
}

async fn restamp(path: &Path) -> std::io::Result<()> {
    let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.into_std().await.set_modified(SystemTime::now())
}

/// Reads `duration` as whole seconds; yt-dlp reports floats for most sites.
pub fn duration_secs(json: &Value) -> u64 {
    json["duration"]
        .as_f64()
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| d as u64)
        .unwrap_or(0)
}

pub fn thumbnail(json: &Value) -> String {
    json["thumbnail"]
        .as_str()
        .or_else(|| json["thumbnails"][0]["url"].as_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
pub(super) mod testing {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    /// Writes an executable `sh` script standing in for yt-dlp.
    pub fn fake_extractor(dir: &Path, body: &str) -> PathBuf {
        let bin = dir.join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let script = bin.join("yt-dlp");
        std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    /// Records argv next to itself, writes the output with a year-2000 mtime, prints its path.
    pub const DOWNLOADER: &str = r#"printf '%s\n' "$@" > "$(dirname "$0")/argv.txt"
ext=mp4
out=
prev=
for arg in "$@"; do
  if [ "$arg" = "--extract-audio" ]; then ext=mp3; fi
  if [ "$prev" = "--output" ]; then out="$arg"; fi
  prev="$arg"
done
file="${out%.*}.$ext"
printf 'media' > "$file"
touch -t 200001010000 "$file"
echo "$file""#;

    pub fn recorded_argv(script: &Path) -> Vec<String> {
        let argv = script.with_file_name("argv.txt");
        std::fs::read_to_string(argv)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}
