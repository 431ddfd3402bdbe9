//! # Live Channels
//!
//! One `LiveChannel` per streamed query path. The ESP stream runs once per
//! channel no matter how many viewers watch it; every received frame is
//! accumulated, trimmed and broadcast as a JSON batch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lib_esp::frames::{self, Frame, LiveBuffer, StreamBatch};
use lib_esp::plugin::Datasource;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

const BROADCAST_CAPACITY: usize = 64;

pub struct LiveChannel {
    path: String,
    tx: broadcast::Sender<Arc<String>>,
    latest: Mutex<Option<Arc<String>>>,
    viewers: AtomicUsize,
    cancel: CancellationToken,
}

impl LiveChannel {
    fn new(path: &str) -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            path: path.to_string(),
            tx,
            latest: Mutex::new(None),
            viewers: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Channel path below the datasource, e.g. `stream/<hash>`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Number of attached viewers.
    pub fn viewers(&self) -> usize {
        self.viewers.load(Ordering::SeqCst)
    }

    /// Whether the stream ended or was stopped.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the stream ended or was stopped.
    pub async fn stopped(&self) {
        self.cancel.cancelled().await
    }

    /// Cancels the stream; viewers are closed once they notice.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Registers a viewer; returns the latest batch and a receiver for the next ones.
    pub(crate) fn attach(&self) -> (Option<Arc<String>>, broadcast::Receiver<Arc<String>>) {
        self.viewers.fetch_add(1, Ordering::SeqCst);
        let rx = self.tx.subscribe();
        let latest = self.latest.lock().unwrap_or_else(|e| e.into_inner()).clone();
        (latest, rx)
    }

    /// Unregisters a viewer and stops the stream when it was the last one.
    pub(crate) fn detach(&self) -> bool {
        let previous = self.viewers.fetch_sub(1, Ordering::SeqCst);
        if previous <= 1 {
            log::info!("Last viewer left {}, stopping stream", self.path);
            self.cancel.cancel();
            true
        } else {
            false
        }
    }

    fn publish(&self, batch: &StreamBatch) {
        let json = match serde_json::to_string(batch) {
            Ok(json) => Arc::new(json),
            Err(e) => {
                log::error!("Failed to serialize batch for {}: {}", self.path, e);
                return;
            }
        };

        *self.latest.lock().unwrap_or_else(|e| e.into_inner()) = Some(json.clone());
        // No receivers is fine; the next viewer starts from `latest`.
        let _ = self.tx.send(json);
    }
}

/// Starts streaming `path`. `on_finish` runs once the stream has ended.
pub fn start<F>(datasource: Arc<Datasource>, path: &str, capacity: usize, on_finish: F) -> Arc<LiveChannel>
where
    F: FnOnce(&Arc<LiveChannel>) + Send + 'static,
{
    let channel = Arc::new(LiveChannel::new(path));
    let (frame_tx, frame_rx) = mpsc::unbounded_channel::<Frame>();

    let stream_path = path.to_string();
    let cancel = channel.cancel.clone();
    tokio::spawn(async move {
        match datasource.run_stream(&stream_path, &frame_tx, cancel).await {
            Ok(()) => log::debug!("Stream {} finished", stream_path),
            Err(e) => log::warn!("Stream {} ended with error: {}", stream_path, e),
        }
    });

    tokio::spawn(pump(channel.clone(), frame_rx, capacity, on_finish));
    channel
}

async fn pump<F>(channel: Arc<LiveChannel>, mut frame_rx: mpsc::UnboundedReceiver<Frame>, capacity: usize, on_finish: F)
where
    F: FnOnce(&Arc<LiveChannel>),
{
    let mut buffer = LiveBuffer::new(capacity);
    while let Some(frame) = frame_rx.recv().await {
        buffer.push(frame);
        let batch = frames::process(buffer.snapshot());
        if let Some(error) = batch.error() {
            log::debug!("Channel {} reports error: {}", channel.path, error.message);
        }
        channel.publish(&batch);
    }

    on_finish(&channel);
    channel.cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_detach_stops() {
        let channel = LiveChannel::new("stream/abc");
        let _first = channel.attach();
        let _second = channel.attach();
        assert_eq!(channel.viewers(), 2);

        assert!(!channel.detach());
        assert!(!channel.is_stopped());
        assert!(channel.detach());
        assert!(channel.is_stopped());
    }

    #[test]
    fn late_viewer_gets_latest_batch() {
        let channel = LiveChannel::new("stream/abc");
        channel.publish(&StreamBatch::new(vec![lib_esp::frames::factory::error_clear_frame()]));

        let (latest, _rx) = channel.attach();
        let latest = latest.unwrap();
        let value: serde_json::Value = serde_json::from_str(&latest).unwrap();
        assert_eq!(value["frames"][0]["name"], "error-clear");
    }

    #[tokio::test]
    async fn publish_reaches_attached_viewers() {
        let channel = LiveChannel::new("stream/abc");
        let (_, mut rx) = channel.attach();
        channel.publish(&StreamBatch::new(Vec::new()));
        let message = rx.recv().await.unwrap();
        assert_eq!(message.as_str(), r#"{"frames":[]}"#);
    }
}
