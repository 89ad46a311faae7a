//! Per-channel write coordinator.
//!
//! Routes every submitted job for a given channel-id to a single dedicated
//! task, spawned on first use. Jobs for one channel run strictly one at a
//! time in submission order; jobs for different channels run independently.
//! This is the actor counterpart of the per-channel mutex used by the
//! single-process adapter.

use dashmap::DashMap;
use futures::future::BoxFuture;
use std::future::Future;
use stratum_core::error::GatewayError;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

type Job = BoxFuture<'static, ()>;

const QUEUE_DEPTH: usize = 64;

#[derive(Default)]
pub struct ChannelSerializer {
    senders: DashMap<Uuid, mpsc::Sender<Job>>,
}

impl ChannelSerializer {
    pub fn new() -> Self {
        Self {
            senders: DashMap::new(),
        }
    }

    /// Run `work` on the coordinator task owning `channel_id`, waiting for
    /// its result. Submission order is completion order within a channel.
    pub async fn run<T, F>(&self, channel_id: Uuid, work: F) -> Result<T, GatewayError>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = reply_tx.send(work.await);
        });

        self.sender_for(channel_id)
            .send(job)
            .await
            .map_err(|_| GatewayError::AdapterFatal("channel coordinator stopped".into()))?;

        reply_rx
            .await
            .map_err(|_| GatewayError::AdapterFatal("channel coordinator dropped job".into()))
    }

    /// Drop the coordinator for a deleted channel; its task exits once the
    /// queue drains.
    pub fn retire(&self, channel_id: Uuid) {
        self.senders.remove(&channel_id);
    }

    fn sender_for(&self, channel_id: Uuid) -> mpsc::Sender<Job> {
        self.senders
            .entry(channel_id)
            .or_insert_with(|| {
                let (tx, mut rx) = mpsc::channel::<Job>(QUEUE_DEPTH);
                tokio::spawn(async move {
                    while let Some(job) = rx.recv().await {
                        job.await;
                    }
                });
                tx
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn test_same_channel_jobs_serialize() {
        let serializer = Arc::new(ChannelSerializer::new());
        let channel = Uuid::new_v4();
        let counter = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let serializer = serializer.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                serializer
                    .run(channel, async move {
                        // Read-sleep-write would lose increments if two jobs
                        // ever overlapped.
                        let seen = counter.load(Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                        counter.store(seen + 1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 16);
    }

    #[tokio::test]
    async fn test_different_channels_run_independently() {
        let serializer = Arc::new(ChannelSerializer::new());
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let first = serializer.run(a, async { 1u32 });
        let second = serializer.run(b, async { 2u32 });
        let (first, second) = tokio::join!(first, second);
        assert_eq!(first.unwrap(), 1);
        assert_eq!(second.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_retire_then_reuse_spawns_fresh_task() {
        let serializer = ChannelSerializer::new();
        let channel = Uuid::new_v4();
        assert_eq!(serializer.run(channel, async { 7u32 }).await.unwrap(), 7);
        serializer.retire(channel);
        assert_eq!(serializer.run(channel, async { 8u32 }).await.unwrap(), 8);
    }
}
