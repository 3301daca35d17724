//! The transcoder seam and its ffmpeg implementation.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use lh_domain::config::MediaConfig;
use lh_domain::error::{Error, Result};

use crate::plan::TranscodePlan;

/// Runs a [`TranscodePlan`] over an input buffer.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn run(&self, plan: &TranscodePlan, input: &[u8]) -> Result<Vec<u8>>;
}

/// Spawns one ffmpeg process per plan, using a scratch directory for the
/// input and output files.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: String,
    timeout: Duration,
}

/// How much of ffmpeg's stderr is kept in error messages.
const STDERR_TAIL: usize = 512;

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    pub fn from_config(cfg: &MediaConfig) -> Self {
        Self::new(cfg.ffmpeg_path.clone(), Duration::from_secs(cfg.timeout_secs))
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn run(&self, plan: &TranscodePlan, input: &[u8]) -> Result<Vec<u8>> {
        let scratch = tempfile::tempdir()?;
        let input_path = scratch.path().join(format!("input.{}", plan.input_ext));
        let output_path = scratch.path().join(format!("output.{}", plan.output_ext));
        tokio::fs::write(&input_path, input).await?;

        let mut cmd = Command::new(&self.binary);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y", "-i"])
            .arg(&input_path)
            .args(&plan.args)
            .arg(&output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::Other(format!("failed to spawn {}: {e}", self.binary)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                Error::Timeout(format!(
                    "{} transcode exceeded {}s",
                    plan.label,
                    self.timeout.as_secs()
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail = tail_chars(stderr.trim(), STDERR_TAIL);
            tracing::warn!(plan = plan.label, status = %output.status, stderr = %tail, "ffmpeg failed");
            return Err(Error::MediaFormat(format!(
                "{} transcode failed ({}): {tail}",
                plan.label, output.status
            )));
        }

        let bytes = tokio::fs::read(&output_path).await?;
        if bytes.is_empty() {
            return Err(Error::MediaFormat(format!("{} transcode produced no output", plan.label)));
        }
        tracing::debug!(
            plan = plan.label,
            input_bytes = input.len(),
            output_bytes = bytes.len(),
            "transcode complete"
        );
        Ok(bytes)
    }
}

fn tail_chars(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
