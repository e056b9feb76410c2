use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;

use crate::model::{
    ConsumerSnapshot, StoredMessage, StreamConfig, StreamInfo, StreamSnapshot, StreamState,
    subjects_overlap,
};
use crate::{Error, Result};

pub mod http;

#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotRequest {
    pub check_health: bool,
    pub include_consumers: bool,
}

pub trait StreamService: Sync {
    fn provider(&self) -> &'static str;

    fn list_streams<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StreamInfo>>> + Send + 'a>>;

    fn stream_names<'a>(
        &'a self,
        subject_filter: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>>;

    fn stream_info<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StreamInfo>> + Send + 'a>>;

    fn snapshot_stream<'a>(
        &'a self,
        name: &'a str,
        request: SnapshotRequest,
    ) -> Pin<Box<dyn Future<Output = Result<StreamSnapshot>> + Send + 'a>>;

    fn restore_stream<'a>(
        &'a self,
        snapshot: StreamSnapshot,
    ) -> Pin<Box<dyn Future<Output = Result<StreamInfo>> + Send + 'a>>;
}

pub struct StreamHandle<'a, S: StreamService + ?Sized> {
    service: &'a S,
    info: StreamInfo,
}

impl<'a, S: StreamService + ?Sized> StreamHandle<'a, S> {
    pub fn new(service: &'a S, info: StreamInfo) -> Self {
        Self { service, info }
    }

    pub fn name(&self) -> &str {
        self.info.name()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.info.config
    }

    pub fn service(&self) -> &'a S {
        self.service
    }

    pub async fn latest_state(&mut self) -> Result<StreamState> {
        let info = self.service.stream_info(self.info.name()).await?;
        self.info = info;
        Ok(self.info.state.clone())
    }
}

pub async fn list_stream_handles<S: StreamService + ?Sized>(
    service: &S,
) -> Result<Vec<StreamHandle<'_, S>>> {
    let infos = service.list_streams().await?;
    Ok(infos
        .into_iter()
        .map(|info| StreamHandle::new(service, info))
        .collect())
}

#[derive(Debug, Clone)]
struct MemStream {
    config: StreamConfig,
    messages: Vec<StoredMessage>,
    consumers: Vec<ConsumerSnapshot>,
    created_at: String,
}

impl MemStream {
    fn state(&self) -> StreamState {
        StreamState {
            messages: self.messages.len() as u64,
            bytes: self
                .messages
                .iter()
                .map(|m| (m.subject.len() + m.data.len()) as u64)
                .sum(),
            first_seq: self.messages.first().map(|m| m.seq).unwrap_or(0),
            last_seq: self.messages.last().map(|m| m.seq).unwrap_or(0),
            consumer_count: self.consumers.len(),
        }
    }

    fn info(&self) -> StreamInfo {
        StreamInfo {
            config: self.config.clone(),
            state: self.state(),
            created_at: self.created_at.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    state: HashSet<String>,
    snapshot: HashMap<String, String>,
    restore: HashMap<String, String>,
    unhealthy: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryService {
    pub snapshots: AtomicUsize,
    pub restores: AtomicUsize,
    streams: Mutex<BTreeMap<String, MemStream>>,
    faults: Mutex<Faults>,
}

impl InMemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_stream(&self, config: StreamConfig) -> Result<()> {
        let mut streams = self.streams.lock().await;
        if streams.contains_key(&config.name) {
            return Err(Error::StreamExists {
                stream: config.name,
            });
        }
        streams.insert(
            config.name.clone(),
            MemStream {
                config,
                messages: Vec::new(),
                consumers: Vec::new(),
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        );
        Ok(())
    }

    pub async fn publish(&self, stream: &str, subject: &str, data: &[u8]) -> Result<u64> {
        let mut streams = self.streams.lock().await;
        let s = streams.get_mut(stream).ok_or_else(|| Error::StreamNotFound {
            stream: stream.to_string(),
        })?;
        let seq = s.messages.last().map(|m| m.seq).unwrap_or(0) + 1;
        s.messages.push(StoredMessage {
            seq,
            subject: subject.to_string(),
            data: data.to_vec(),
            published_at: chrono::Utc::now().to_rfc3339(),
        });
        Ok(seq)
    }

    pub async fn add_consumer(&self, stream: &str, consumer: ConsumerSnapshot) -> Result<()> {
        let mut streams = self.streams.lock().await;
        let s = streams.get_mut(stream).ok_or_else(|| Error::StreamNotFound {
            stream: stream.to_string(),
        })?;
        s.consumers.push(consumer);
        Ok(())
    }

    pub async fn messages(&self, stream: &str) -> Option<Vec<StoredMessage>> {
        self.streams
            .lock()
            .await
            .get(stream)
            .map(|s| s.messages.clone())
    }

    pub async fn consumers(&self, stream: &str) -> Option<Vec<ConsumerSnapshot>> {
        self.streams
            .lock()
            .await
            .get(stream)
            .map(|s| s.consumers.clone())
    }

    pub async fn stream_count(&self) -> usize {
        self.streams.lock().await.len()
    }

    pub async fn fail_state(&self, stream: &str) {
        self.faults.lock().await.state.insert(stream.to_string());
    }

    pub async fn fail_snapshot(&self, stream: &str, message: &str) {
        self.faults
            .lock()
            .await
            .snapshot
            .insert(stream.to_string(), message.to_string());
    }

    pub async fn fail_restore(&self, stream: &str, message: &str) {
        self.faults
            .lock()
            .await
            .restore
            .insert(stream.to_string(), message.to_string());
    }

    pub async fn mark_unhealthy(&self, stream: &str) {
        self.faults.lock().await.unhealthy.insert(stream.to_string());
    }
}

impl StreamService for InMemoryService {
    fn provider(&self) -> &'static str {
        "test.mem"
    }

    fn list_streams<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<StreamInfo>>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .streams
                .lock()
                .await
                .values()
                .map(MemStream::info)
                .collect())
        })
    }

    fn stream_names<'a>(
        &'a self,
        subject_filter: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .streams
                .lock()
                .await
                .values()
                .filter(|s| match subject_filter {
                    Some(filter) => subjects_overlap(&s.config.subjects, filter),
                    None => true,
                })
                .map(|s| s.config.name.clone())
                .collect())
        })
    }

    fn stream_info<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StreamInfo>> + Send + 'a>> {
        Box::pin(async move {
            if self.faults.lock().await.state.contains(name) {
                return Err(Error::Service {
                    message: format!("stream info for {name} timed out"),
                });
            }
            self.streams
                .lock()
                .await
                .get(name)
                .map(MemStream::info)
                .ok_or_else(|| Error::StreamNotFound {
                    stream: name.to_string(),
                })
        })
    }

    fn snapshot_stream<'a>(
        &'a self,
        name: &'a str,
        request: SnapshotRequest,
    ) -> Pin<Box<dyn Future<Output = Result<StreamSnapshot>> + Send + 'a>> {
        Box::pin(async move {
            {
                let faults = self.faults.lock().await;
                if let Some(message) = faults.snapshot.get(name) {
                    return Err(Error::Service {
                        message: message.clone(),
                    });
                }
                if request.check_health && faults.unhealthy.contains(name) {
                    return Err(Error::Unhealthy {
                        stream: name.to_string(),
                        message: "stream health check failed".to_string(),
                    });
                }
            }

            let streams = self.streams.lock().await;
            let s = streams.get(name).ok_or_else(|| Error::StreamNotFound {
                stream: name.to_string(),
            })?;
            self.snapshots.fetch_add(1, Ordering::Relaxed);
            Ok(StreamSnapshot {
                config: s.config.clone(),
                state: s.state(),
                messages: s.messages.clone(),
                consumers: if request.include_consumers {
                    s.consumers.clone()
                } else {
                    Vec::new()
                },
            })
        })
    }

    fn restore_stream<'a>(
        &'a self,
        snapshot: StreamSnapshot,
    ) -> Pin<Box<dyn Future<Output = Result<StreamInfo>> + Send + 'a>> {
        Box::pin(async move {
            let name = snapshot.config.name.clone();
            if let Some(message) = self.faults.lock().await.restore.get(&name) {
                return Err(Error::Service {
                    message: message.clone(),
                });
            }

            let mut streams = self.streams.lock().await;
            if streams.contains_key(&name) {
                return Err(Error::StreamExists { stream: name });
            }
            let stream = MemStream {
                config: snapshot.config,
                messages: snapshot.messages,
                consumers: snapshot.consumers,
                created_at: chrono::Utc::now().to_rfc3339(),
            };
            let info = stream.info();
            streams.insert(name, stream);
            self.restores.fetch_add(1, Ordering::Relaxed);
            Ok(info)
        })
    }
}
