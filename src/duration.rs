//! Duration probe. Short-deadline duration extraction for list views
//! and VOD eligibility. Never used in the hot path.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,
    #[error("prober exited with an error: {0}")]
    ProberFailed(String),
    #[error("could not parse prober output")]
    Unparseable,
}

#[derive(Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

#[derive(Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Probe `path`'s duration in seconds, giving up after `deadline`.
pub async fn probe(prober_bin: &str, path: &Path, deadline: Duration) -> Result<f64, ProbeError> {
    let run = Command::new(prober_bin)
        .args(["-v", "error", "-print_format", "json", "-show_format"])
        .arg(path)
        .output();

    let output = match tokio::time::timeout(deadline, run).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(ProbeError::ProberFailed(e.to_string())),
        Err(_) => return Err(ProbeError::Timeout),
    };

    if !output.status.success() {
        return Err(ProbeError::ProberFailed(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout).map_err(|e| {
        debug!(error = %e, "failed to parse ffprobe json");
        ProbeError::Unparseable
    })?;

    parsed
        .format
        .duration
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or(ProbeError::Unparseable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn times_out_against_a_slow_prober() {
        let result = probe("sleep", Path::new("5"), Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ProbeError::Timeout)));
    }

    #[tokio::test]
    async fn reports_prober_failure_for_missing_binary() {
        let result = probe("definitely-not-a-real-binary", Path::new("x"), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ProbeError::ProberFailed(_))));
    }
}
