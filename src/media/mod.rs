//! Background media downloads
//!
//! Workers hand the media URLs of an extracted record to the `MediaFetcher`
//! and move on. Downloads run on their own tasks, gated by a semaphore, and
//! every failure ends up in the `MediaStore` error log instead of reaching
//! the worker.

use crate::pipeline::fetch_bytes;
use crate::storage::MediaStore;
use reqwest::Client;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use url::Url;

/// Extension used when the URL path does not carry a usable one
const DEFAULT_EXTENSION: &str = "jpg";

/// Fire-and-forget media downloader shared by every worker
pub struct MediaFetcher {
    client: Client,
    store: Arc<dyn MediaStore>,
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
}

impl MediaFetcher {
    pub fn new(client: Client, store: Arc<dyn MediaStore>, max_concurrent: usize) -> Self {
        Self {
            client,
            store,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Queues every URL of one item for download
    ///
    /// Files land at `{source}/{item_id}/{index}.{ext}` relative to the
    /// media root, `index` being the URL's position in `urls`.
    pub fn fetch(&self, urls: Vec<String>, source: &str, item_id: &str) {
        if urls.is_empty() {
            return;
        }

        tracing::debug!(
            "[{}] queueing {} media downloads for item {}",
            source,
            urls.len(),
            item_id
        );

        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        reap_finished(&mut tasks);
        for (index, url) in urls.into_iter().enumerate() {
            let job = MediaJob {
                relative_path: format!("{}/{}/{}.{}", source, item_id, index, extension_of(&url)),
                url,
                source: source.to_string(),
                item_id: item_id.to_string(),
            };
            let client = self.client.clone();
            let store = Arc::clone(&self.store);
            let permits = Arc::clone(&self.permits);

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                job.run(&client, store.as_ref()).await;
            });
        }
    }

    /// Number of queued or running downloads
    pub fn pending(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
        reap_finished(&mut tasks);
        tasks.len()
    }

    /// Waits for every queued download to finish
    pub async fn shutdown(&self) {
        let mut tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(|p| p.into_inner());
            std::mem::replace(&mut *guard, JoinSet::new())
        };

        if !tasks.is_empty() {
            tracing::info!("Waiting for {} media downloads to finish", tasks.len());
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!("Media download task failed: {}", e);
            }
        }
    }
}

/// Drops finished downloads from the set without waiting
fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(e) = result {
            tracing::error!("Media download task failed: {}", e);
        }
    }
}

struct MediaJob {
    url: String,
    source: String,
    item_id: String,
    relative_path: String,
}

impl MediaJob {
    async fn run(self, client: &Client, store: &dyn MediaStore) {
        let outcome = match fetch_bytes(client, &self.url).await {
            Ok(bytes) => store
                .save_media(&self.relative_path, &bytes)
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(()) => tracing::debug!("Saved media {} as {}", self.url, self.relative_path),
            Err(error) => {
                tracing::warn!("[{}] media {} failed: {}", self.source, self.url, error);
                let logged =
                    store.log_media_error(&self.url, &self.source, &self.item_id, &error);
                if let Err(e) = logged {
                    tracing::error!("Failed to log media error for {}: {}", self.url, e);
                }
            }
        }
    }
}

/// File extension taken from the last path segment of a media URL
fn extension_of(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return DEFAULT_EXTENSION.to_string();
    };

    parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}
