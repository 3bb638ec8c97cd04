//! Playlist publisher. Readiness checks and the atomic EVENT→VOD
//! finalize step, built around the cache dir's segment allowlist model.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs;
use tracing::info;

use crate::layout::{self, final_playlist_path, live_playlist_path, staging_playlist_path};

/// `true` iff `index.m3u8` exists, is VOD with ENDLIST, and references at
/// least one segment that is present and allowlisted.
pub async fn final_ready(cache_dir: &Path) -> bool {
    let path = final_playlist_path(cache_dir);
    let Ok(content) = fs::read_to_string(&path).await else {
        return false;
    };
    is_vod_complete(&content) && has_playable_segment(cache_dir, &content).await
}

/// `true` iff `index.live.m3u8` exists and references at least one segment
/// that is present and allowlisted (readable while the build is running).
pub async fn progressive_ready(cache_dir: &Path) -> bool {
    let path = live_playlist_path(cache_dir);
    let Ok(content) = fs::read_to_string(&path).await else {
        return false;
    };
    has_playable_segment(cache_dir, &content).await
}

fn is_vod_complete(content: &str) -> bool {
    content.contains("#EXTM3U")
        && content.contains("#EXT-X-PLAYLIST-TYPE:VOD")
        && content.contains("#EXT-X-ENDLIST")
}

async fn has_playable_segment(cache_dir: &Path, playlist: &str) -> bool {
    for name in segment_uris(playlist) {
        if layout::confine_segment(cache_dir, &name).await.is_some() {
            return true;
        }
    }
    false
}

fn segment_uris(playlist: &str) -> Vec<String> {
    playlist
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|s| s.to_string())
        .collect()
}

/// Path to the live (in-progress) playlist a running build writes to.
pub fn live_playlist(cache_dir: &Path) -> std::path::PathBuf {
    live_playlist_path(cache_dir)
}

/// Rewrite `index.live.m3u8` into a VOD `index.m3u8`: strip any existing
/// PLAYLIST-TYPE/ENDLIST/DISCONTINUITY directives, inject
/// `#EXT-X-PLAYLIST-TYPE:VOD` right after `#EXTM3U`, append `#EXT-X-ENDLIST`,
/// then publish via write-to-temp-then-rename so readers never observe a
/// half-written file.
pub async fn finalize(cache_dir: &Path) -> Result<()> {
    let live = live_playlist_path(cache_dir);
    let content = fs::read_to_string(&live)
        .await
        .with_context(|| format!("reading live playlist {}", live.display()))?;

    let vod = rewrite_to_vod(&content);

    let staging = staging_playlist_path(cache_dir);
    fs::write(&staging, vod.as_bytes())
        .await
        .with_context(|| format!("writing staging playlist {}", staging.display()))?;

    let finalp = final_playlist_path(cache_dir);
    fs::rename(&staging, &finalp)
        .await
        .with_context(|| format!("renaming {} to {}", staging.display(), finalp.display()))?;

    if let Err(e) = fs::remove_file(&live).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            return Err(e).context("removing live playlist after finalize");
        }
    }

    info!(playlist = %finalp.display(), "playlist finalized to VOD");
    Ok(())
}

fn rewrite_to_vod(original: &str) -> String {
    let mut out = String::new();
    let mut has_header = false;

    for line in original.lines() {
        let l = line.trim_end();
        if l.starts_with("#EXTM3U") {
            has_header = true;
            out.push_str("#EXTM3U\n#EXT-X-PLAYLIST-TYPE:VOD\n");
            continue;
        }
        if l.starts_with("#EXT-X-PLAYLIST-TYPE:")
            || l.starts_with("#EXT-X-ENDLIST")
            || l.starts_with("#EXT-X-DISCONTINUITY")
        {
            continue;
        }
        out.push_str(l);
        out.push('\n');
    }

    if !has_header {
        out = format!("#EXTM3U\n#EXT-X-PLAYLIST-TYPE:VOD\n{out}");
    }
    out.push_str("#EXT-X-ENDLIST\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn finalize_rewrites_event_to_vod_and_removes_live() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path();
        fs::write(cache_dir.join("seg_00000.ts"), b"x").await.unwrap();
        fs::write(
            live_playlist_path(cache_dir),
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-PLAYLIST-TYPE:EVENT\n#EXT-X-TARGETDURATION:6\nseg_00000.ts\n",
        )
        .await
        .unwrap();

        finalize(cache_dir).await.unwrap();

        assert!(!live_playlist_path(cache_dir).exists());
        let content = fs::read_to_string(final_playlist_path(cache_dir)).await.unwrap();
        assert!(content.contains("#EXT-X-PLAYLIST-TYPE:VOD"));
        assert!(content.contains("#EXT-X-ENDLIST"));
        assert!(content.contains("seg_00000.ts"));
        assert!(final_ready(cache_dir).await);
    }

    #[tokio::test]
    async fn progressive_ready_requires_an_allowlisted_segment_on_disk() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path();
        fs::write(
            live_playlist_path(cache_dir),
            "#EXTM3U\n#EXT-X-PLAYLIST-TYPE:EVENT\nseg_00000.ts\n",
        )
        .await
        .unwrap();
        assert!(!progressive_ready(cache_dir).await, "segment file doesn't exist yet");

        fs::write(cache_dir.join("seg_00000.ts"), b"x").await.unwrap();
        assert!(progressive_ready(cache_dir).await);
    }

    #[tokio::test]
    async fn final_ready_false_without_endlist() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path();
        fs::write(cache_dir.join("seg_00000.ts"), b"x").await.unwrap();
        fs::write(
            final_playlist_path(cache_dir),
            "#EXTM3U\n#EXT-X-PLAYLIST-TYPE:VOD\nseg_00000.ts\n",
        )
        .await
        .unwrap();
        assert!(!final_ready(cache_dir).await);
    }
}
