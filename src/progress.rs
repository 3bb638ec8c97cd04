//! Progress parser. Consumes ffmpeg's `-progress` key=value stream and
//! emits monotone `ProgressSample`s.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

/// Backpressure: bounded; the supervisor tolerates dropped samples.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSample {
    pub out_time_us: Option<u64>,
    pub total_size_bytes: Option<u64>,
    pub speed: Option<f64>,
    pub fps: Option<f64>,
}

/// Read `reader` line by line, accumulating key=value pairs until a
/// `progress=continue` or `progress=end` terminator, then push a sample.
/// Drops the sample if the channel is full rather than blocking.
pub async fn pump<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<ProgressSample>) {
    let mut lines = BufReader::new(reader).lines();
    let mut acc = ProgressSample::default();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) | Err(_) => break,
        };
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "out_time_us" => acc.out_time_us = value.parse().ok(),
            "total_size" => acc.total_size_bytes = value.parse().ok(),
            "speed" => acc.speed = value.trim_end_matches('x').parse().ok(),
            "fps" => acc.fps = value.parse().ok(),
            "progress" if value == "continue" || value == "end" => {
                let sample = std::mem::take(&mut acc);
                let _ = tx.try_send(sample);
                if value == "end" {
                    break;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn parses_one_report_per_terminator() {
        let input = "frame=10\nout_time_us=1000000\ntotal_size=2048\nspeed=1.02x\nfps=29.97\nprogress=continue\nout_time_us=2000000\nprogress=end\n";
        let (tx, mut rx) = mpsc::channel(8);
        pump(Cursor::new(input.as_bytes()), tx).await;

        let first = rx.recv().await.unwrap();
        assert_eq!(first.out_time_us, Some(1_000_000));
        assert_eq!(first.total_size_bytes, Some(2048));
        assert_eq!(first.speed, Some(1.02));
        assert_eq!(first.fps, Some(29.97));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.out_time_us, Some(2_000_000));
        assert!(rx.recv().await.is_none() || rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ignores_unknown_keys() {
        let input = "bitrate=128kbits/s\nprogress=end\n";
        let (tx, mut rx) = mpsc::channel(8);
        pump(Cursor::new(input.as_bytes()), tx).await;
        let sample = rx.recv().await.unwrap();
        assert_eq!(sample, ProgressSample::default());
    }
}
