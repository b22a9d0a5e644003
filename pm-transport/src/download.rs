//! Concurrent segmented downloader: multi-range HTTP GET against a single
//! URL, adaptive worker count, ordered write to a pre-sized file via one
//! writer task so file-offset writes and progress never need a
//! cross-worker mutex.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use camino::Utf8Path;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

use crate::errors::{TransportError, TransportResult};
use crate::progress::SharedProgressSink;

/// Default block size: 8 MiB.
pub const DEFAULT_BLOCK_SIZE: u64 = 8 * 1024 * 1024;
const INITIAL_WORKERS: usize = 10;
const MAX_WORKERS: usize = 20;
const MIN_WORKERS: usize = 1;
const MAX_RETRIES: u32 = 5;
const RETRY_DELAY_MS: u64 = 500;

/// A half-open byte range `[from, to)` still owed to the target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Range {
    from: u64,
    to: u64,
}

struct WriterMessage {
    offset: u64,
    data: Vec<u8>,
}

/// Splits `[0, size)` into fixed-size blocks, the final one possibly
/// shorter.
fn partition(size: u64, block: u64) -> VecDeque<Range> {
    let mut ranges = VecDeque::new();
    let mut from = 0u64;
    while from < size {
        let to = (from + block).min(size);
        ranges.push_back(Range { from, to });
        from = to;
    }
    ranges
}

/// Downloads `size` bytes from `url` into `target_file`, using ranged GETs
/// across an adaptive worker pool. `target_file` is created (or
/// truncated) and pre-sized before any range is fetched.
pub async fn segmented_download(
    remote_name: &str,
    client: Client,
    url: &str,
    size: u64,
    target_file: &Utf8Path,
    progress: SharedProgressSink,
) -> TransportResult<()> {
    segmented_download_with_block_size(
        remote_name,
        client,
        url,
        size,
        target_file,
        progress,
        DEFAULT_BLOCK_SIZE,
    )
    .await
}

/// Same as [`segmented_download`] with an explicit block size, exposed for
/// tests that want a small block count without an 8 MiB fixture.
pub async fn segmented_download_with_block_size(
    remote_name: &str,
    client: Client,
    url: &str,
    size: u64,
    target_file: &Utf8Path,
    progress: SharedProgressSink,
    block_size: u64,
) -> TransportResult<()> {
    let io_err = |details: String| TransportError::Io {
        remote: remote_name.to_string(),
        details,
    };

    let mut file = tokio::fs::File::create(target_file)
        .await
        .map_err(|e| io_err(e.to_string()))?;
    if size > 0 {
        file.seek(std::io::SeekFrom::Start(size - 1))
            .await
            .map_err(|e| io_err(e.to_string()))?;
        file.write_all(&[0u8]).await.map_err(|e| io_err(e.to_string()))?;
        file.seek(std::io::SeekFrom::Start(0))
            .await
            .map_err(|e| io_err(e.to_string()))?;
    }

    let queue = partition(size, block_size);
    let total_blocks = queue.len().max(1);
    let state = Arc::new(DownloadState {
        queue: Mutex::new(queue),
        worker_count: AtomicUsize::new(INITIAL_WORKERS.min(total_blocks).max(1)),
        latched_error: Mutex::new(None),
        cancelled: AtomicBool::new(false),
        remote_name: remote_name.to_string(),
        url: url.to_string(),
        client,
        block_size,
    });

    let (tx, rx) = mpsc::unbounded_channel::<WriterMessage>();

    let writer_state = state.clone();
    let writer_progress = progress.clone();
    let writer_path = target_file.to_owned();
    let writer = tokio::spawn(async move {
        writer_task(writer_state, writer_path, rx, writer_progress, size).await
    });

    let mut worker_handles = Vec::new();
    let active = state.worker_count.load(Ordering::SeqCst);
    for _ in 0..active {
        let state = state.clone();
        let tx = tx.clone();
        worker_handles.push(tokio::spawn(async move { worker_loop(state, tx).await }));
    }
    drop(tx);

    for handle in worker_handles {
        let _ = handle.await;
    }
    let write_result = writer.await.map_err(|e| io_err(e.to_string()))?;

    if let Some(err) = state.latched_error.lock().await.clone() {
        return Err(err);
    }
    write_result?;
    progress.on_finish();
    Ok(())
}

struct DownloadState {
    queue: Mutex<VecDeque<Range>>,
    worker_count: AtomicUsize,
    latched_error: Mutex<Option<TransportError>>,
    cancelled: AtomicBool,
    remote_name: String,
    url: String,
    client: Client,
    block_size: u64,
}

impl DownloadState {
    async fn latch(&self, err: TransportError) {
        let mut guard = self.latched_error.lock().await;
        if guard.is_none() {
            *guard = Some(err);
        }
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn io_err(&self, details: impl std::fmt::Display) -> TransportError {
        TransportError::Io {
            remote: self.remote_name.clone(),
            details: details.to_string(),
        }
    }

    fn unreachable_err(&self, details: impl std::fmt::Display) -> TransportError {
        TransportError::Unreachable {
            remote: self.remote_name.clone(),
            details: details.to_string(),
        }
    }
}

/// A trailing window of the last 5 completed-block speeds, in bytes/sec,
/// used to decide whether to grow or shrink the pool.
struct SpeedWindow {
    samples: VecDeque<f64>,
}

impl SpeedWindow {
    fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(5),
        }
    }

    fn push(&mut self, bytes_per_sec: f64) -> f64 {
        self.samples.push_back(bytes_per_sec);
        if self.samples.len() > 5 {
            self.samples.pop_front();
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }
}

async fn worker_loop(state: Arc<DownloadState>, tx: mpsc::UnboundedSender<WriterMessage>) {
    let mut speed_window = SpeedWindow::new();
    let mut previous_smoothed: Option<f64> = None;

    loop {
        if state.cancelled.load(Ordering::SeqCst) {
            return;
        }
        let range = {
            let mut queue = state.queue.lock().await;
            queue.pop_back()
        };
        let Some(range) = range else {
            return;
        };

        let started = Instant::now();
        match fetch_range(&state, range, &tx).await {
            Ok(()) => {
                let elapsed = started.elapsed().as_secs_f64().max(0.001);
                let bytes = (range.to - range.from) as f64;
                let smoothed = speed_window.push(bytes / elapsed);
                if let Some(prev) = previous_smoothed {
                    adjust_worker_count(&state, prev, smoothed);
                }
                previous_smoothed = Some(smoothed);
            }
            Err(err) => {
                state.latch(err).await;
                return;
            }
        }
    }
}

fn adjust_worker_count(state: &DownloadState, previous: f64, current: f64) {
    if previous <= 0.0 {
        return;
    }
    let ratio = current / previous;
    if ratio < 0.75 {
        let prev = state.worker_count.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            Some(n.saturating_sub(1).max(MIN_WORKERS))
        });
        let _ = prev;
    } else if ratio > 1.05 {
        let prev = state.worker_count.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            Some((n + 1).min(MAX_WORKERS))
        });
        let _ = prev;
    }
}

/// Fetches `range`, streaming sub-chunks of `block_size / 16` to the
/// writer. On transport I/O failure mid-stream, the *unfetched remainder*
/// of the range is pushed back onto the queue so another worker can pick
/// it up, matching the "partial progress survives a dropped connection"
/// contract.
async fn fetch_range(
    state: &Arc<DownloadState>,
    range: Range,
    tx: &mpsc::UnboundedSender<WriterMessage>,
) -> TransportResult<()> {
    let sub_chunk = (state.block_size / 16).max(1);
    let mut attempt = 0u32;
    let mut cursor = range.from;

    loop {
        if state.cancelled.load(Ordering::SeqCst) {
            return Ok(());
        }
        let resp = state
            .client
            .get(&state.url)
            .header("Range", format!("bytes={}-{}", cursor, range.to.saturating_sub(1)))
            .send()
            .await;

        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => {
                attempt += 1;
                if attempt > MAX_RETRIES {
                    return Err(state.unreachable_err(e));
                }
                tokio::time::sleep(std::time::Duration::from_millis(RETRY_DELAY_MS)).await;
                continue;
            }
        };

        if resp.status() != StatusCode::PARTIAL_CONTENT && !resp.status().is_success() {
            attempt += 1;
            if attempt > MAX_RETRIES {
                return Err(state.unreachable_err(format!(
                    "range request returned {}",
                    resp.status()
                )));
            }
            tokio::time::sleep(std::time::Duration::from_millis(RETRY_DELAY_MS)).await;
            continue;
        }

        let mut stream = resp.bytes_stream();
        let mut pending = Vec::with_capacity(sub_chunk as usize);
        loop {
            let next = stream.next().await;
            match next {
                Some(Ok(bytes)) => {
                    pending.extend_from_slice(&bytes);
                    while pending.len() as u64 >= sub_chunk {
                        let drained: Vec<u8> = pending.drain(..sub_chunk as usize).collect();
                        let offset = cursor;
                        cursor += drained.len() as u64;
                        if tx
                            .send(WriterMessage {
                                offset,
                                data: drained,
                            })
                            .is_err()
                        {
                            return Ok(());
                        }
                    }
                    if cursor >= range.to {
                        if !pending.is_empty() {
                            let offset = cursor - pending.len() as u64;
                            let _ = tx.send(WriterMessage {
                                offset,
                                data: std::mem::take(&mut pending),
                            });
                        }
                        return Ok(());
                    }
                }
                Some(Err(e)) => {
                    // Requeue only what's left unfetched; the bytes already
                    // handed to the writer up to `cursor` are not retried.
                    let mut queue = state.queue.lock().await;
                    queue.push_front(Range {
                        from: cursor,
                        to: range.to,
                    });
                    drop(queue);
                    return Err(state.io_err(e));
                }
                None => {
                    if !pending.is_empty() {
                        let offset = cursor - pending.len() as u64;
                        cursor += pending.len() as u64;
                        let _ = tx.send(WriterMessage {
                            offset,
                            data: std::mem::take(&mut pending),
                        });
                    }
                    if cursor < range.to {
                        // Stream ended early; requeue the remainder and retry.
                        let mut queue = state.queue.lock().await;
                        queue.push_front(Range {
                            from: cursor,
                            to: range.to,
                        });
                        drop(queue);
                        return Ok(());
                    }
                    return Ok(());
                }
            }
        }
    }
}

/// The sole task allowed to write to the target file or call the
/// progress sink, so offset writes never need a cross-worker mutex.
async fn writer_task(
    state: Arc<DownloadState>,
    path: camino::Utf8PathBuf,
    mut rx: mpsc::UnboundedReceiver<WriterMessage>,
    progress: SharedProgressSink,
    total_size: u64,
) -> TransportResult<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .await
        .map_err(|e| state.io_err(e))?;
    let mut written: u64 = 0;

    while let Some(msg) = rx.recv().await {
        if state.cancelled.load(Ordering::SeqCst) {
            continue;
        }
        if let Err(e) = file.seek(std::io::SeekFrom::Start(msg.offset)).await {
            state.latch(state.io_err(e)).await;
            continue;
        }
        if let Err(e) = file.write_all(&msg.data).await {
            state.latch(state.io_err(e)).await;
            continue;
        }
        written += msg.data.len() as u64;
        progress.on_progress(written.min(total_size), total_size);
    }
    file.flush().await.map_err(|e| state.io_err(e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_splits_into_fixed_blocks_with_short_tail() {
        let ranges = partition(20, 8);
        assert_eq!(
            ranges,
            VecDeque::from(vec![
                Range { from: 0, to: 8 },
                Range { from: 8, to: 16 },
                Range { from: 16, to: 20 },
            ])
        );
    }

    #[test]
    fn partition_of_zero_size_is_empty() {
        assert!(partition(0, 8).is_empty());
    }

    #[test]
    fn speed_window_smooths_over_five_samples() {
        let mut w = SpeedWindow::new();
        for v in [10.0, 20.0, 30.0, 40.0, 50.0, 60.0] {
            w.push(v);
        }
        // the oldest sample (10.0) should have rolled off
        assert_eq!(w.samples.len(), 5);
        assert!((w.samples.iter().sum::<f64>() / 5.0 - 40.0).abs() < 1e-9);
    }
}
