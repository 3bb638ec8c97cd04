use anyhow::{Context, Result};
use tokio::process::Command;

fn has_word(output: &str, word: &str) -> bool {
    output
        .lines()
        .any(|l| l.split_whitespace().any(|tok| tok == word))
}

/// Startup sanity check: the configured transcoder binary must support the
/// protocols and muxers the build/remux pipelines rely on.
pub async fn check_ffmpeg(bin: &str) -> Result<()> {
    let proto = Command::new(bin)
        .arg("-protocols")
        .output()
        .await
        .with_context(|| format!("failed to run {bin} -protocols"))?;
    if !proto.status.success() {
        anyhow::bail!(
            "{bin} -protocols failed with status {}: {}",
            proto.status,
            String::from_utf8_lossy(&proto.stderr)
        );
    }
    let list = String::from_utf8_lossy(&proto.stdout);
    for p in ["https", "tls"] {
        if !has_word(&list, p) {
            anyhow::bail!("{bin} missing required protocol: {}", p);
        }
    }

    let mux = Command::new(bin)
        .arg("-muxers")
        .output()
        .await
        .with_context(|| format!("failed to run {bin} -muxers"))?;
    if !mux.status.success() {
        anyhow::bail!(
            "{bin} -muxers failed with status {}: {}",
            mux.status,
            String::from_utf8_lossy(&mux.stderr)
        );
    }
    let muxers = String::from_utf8_lossy(&mux.stdout);
    for m in ["hls", "mp4"] {
        if !has_word(&muxers, m) {
            anyhow::bail!("{bin} missing required muxer: {}", m);
        }
    }
    Ok(())
}
