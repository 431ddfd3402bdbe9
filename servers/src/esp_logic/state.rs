use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use lib_esp::plugin::Datasource;

use crate::esp_logic::live::{self, LiveChannel};

#[derive(Clone)]
pub struct AppState {
    pub datasource: Arc<Datasource>,
    // Rows kept per buffered frame of each live channel
    capacity: usize,
    // Map of channel path -> running stream
    channels: Arc<Mutex<HashMap<String, Arc<LiveChannel>>>>,
}

impl AppState {
    pub fn new(datasource: Datasource, capacity: usize) -> Self {
        Self {
            datasource: Arc::new(datasource),
            capacity,
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_channels(&self) -> MutexGuard<'_, HashMap<String, Arc<LiveChannel>>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attaches a viewer to the stream of `path`, starting it when nobody watches it yet.
    pub fn join(&self, path: &str) -> (Arc<LiveChannel>, Option<Arc<String>>, tokio::sync::broadcast::Receiver<Arc<String>>) {
        let mut channels = self.lock_channels();

        let channel = match channels.get(path) {
            Some(channel) if !channel.is_stopped() => channel.clone(),
            _ => {
                log::info!("Starting live stream {}", path);
                let registry = self.channels.clone();
                let channel = live::start(self.datasource.clone(), path, self.capacity, move |finished| {
                    let mut channels = registry.lock().unwrap_or_else(|e| e.into_inner());
                    if channels.get(finished.path()).is_some_and(|c| Arc::ptr_eq(c, finished)) {
                        channels.remove(finished.path());
                    }
                });
                channels.insert(path.to_string(), channel.clone());
                channel
            }
        };

        let (latest, rx) = channel.attach();
        (channel, latest, rx)
    }

    /// Detaches a viewer; the stream stops with its last viewer.
    pub fn leave(&self, channel: &Arc<LiveChannel>) {
        let mut channels = self.lock_channels();
        if channel.detach() && channels.get(channel.path()).is_some_and(|c| Arc::ptr_eq(c, channel)) {
            channels.remove(channel.path());
        }
    }

    pub fn active_channels(&self) -> usize {
        self.lock_channels().len()
    }

    /// Stops every stream and drops stored queries.
    pub fn shutdown(&self) {
        let channels: Vec<_> = self.lock_channels().drain().map(|(_, c)| c).collect();
        for channel in channels {
            channel.stop();
        }
        self.datasource.dispose();
    }
}
