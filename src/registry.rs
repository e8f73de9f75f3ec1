use std::net::SocketAddr;
use std::sync::{Arc, RwLock as StdRwLock};

use anyhow::bail;
use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::buffer_pool::PacketBufferPool;
use crate::config::{MoldConfig, StreamSpec};
use crate::datagram;
use crate::error::{RegistryError, SubmitError};
use crate::publisher::StreamPublisher;
use crate::recovery_buffer::RecoveryBuffer;
use crate::recovery_log::RecoveryLog;
use crate::recovery_server::RecoveryServer;
use crate::stream_name::StreamName;

/// A live stream: the publisher / recovery-server pair wired to the shared log and buffer.
pub struct StreamHandle {
    name: String,
    publisher: StreamPublisher,
    recovery: RecoveryServer,
}

impl StreamHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn publisher(&self) -> &StreamPublisher {
        &self.publisher
    }

    /// The address the stream's recovery server is listening on.
    pub fn recovery_addr(&self) -> std::io::Result<SocketAddr> {
        self.recovery.local_addr()
    }

    pub async fn send(&self, message: &[u8]) -> Result<(), SubmitError> {
        self.publisher.send_message(message).await
    }
}

/// Creates streams on request, keeps each stream's publisher / recovery-server pair alive
///  and routes producer submissions to the right publisher. A publisher that stopped on a
///  fatal log error is restarted here, replaying the log so sequence continuity is kept.
pub struct StreamRegistry {
    config: Arc<MoldConfig>,
    streams: RwLock<FxHashMap<String, Arc<StreamHandle>>>,
}

impl StreamRegistry {
    pub fn new(config: MoldConfig) -> anyhow::Result<StreamRegistry> {
        config.validate()?;
        Ok(StreamRegistry {
            config: Arc::new(config),
            streams: RwLock::new(FxHashMap::default()),
        })
    }

    pub async fn create_stream(&self, spec: StreamSpec) -> anyhow::Result<Arc<StreamHandle>> {
        let mut streams = self.streams.write().await;
        if streams.contains_key(&spec.name) {
            bail!(RegistryError::StreamAlreadyExists(spec.name));
        }

        let stream_name = StreamName::new(&spec.name);
        let effective = Arc::new(self.config.effective_publisher_config(&spec));

        let log = Arc::new(StdRwLock::new(RecoveryLog::open(&spec.log_path)?));
        let recovery_buffer = Arc::new(StdRwLock::new(RecoveryBuffer::new(self.config.recovery_buffer_capacity)));
        let buffer_pool = Arc::new(PacketBufferPool::new(self.config.mtu, self.config.buffer_pool_size));

        let multicast_socket = datagram::bind_multicast_sender(
            spec.source_ip,
            self.config.multicast_ttl,
            self.config.multicast_loop,
        ).await?;
        let group_addr = SocketAddr::from((spec.multicast_group, spec.multicast_port));

        let recovery_socket = Arc::new(UdpSocket::bind((spec.source_ip, spec.recovery_port)).await?);

        let mut publisher = StreamPublisher::new(
            effective.clone(),
            stream_name,
            group_addr,
            Arc::new(multicast_socket),
            log.clone(),
            recovery_buffer.clone(),
            buffer_pool.clone(),
        );
        publisher.spawn_heartbeat_loop();

        let mut recovery = RecoveryServer::new(
            effective,
            stream_name,
            recovery_socket,
            log,
            recovery_buffer,
            buffer_pool,
        );
        recovery.spawn_recv_loop();

        let handle = Arc::new(StreamHandle {
            name: spec.name.clone(),
            publisher,
            recovery,
        });
        streams.insert(spec.name.clone(), handle.clone());

        info!("created stream '{}': multicast {:?}, recovery port {}, log {:?}",
              spec.name, group_addr, spec.recovery_port, spec.log_path);
        Ok(handle)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<StreamHandle>> {
        self.streams.read().await.get(name).cloned()
    }

    /// Routes a submission to the named stream. A publisher that previously died of a log
    ///  error is restarted from the log and the submission retried once.
    pub async fn send(&self, name: &str, message: &[u8]) -> Result<(), RegistryError> {
        let handle = self.get(name).await
            .ok_or_else(|| RegistryError::StreamNotFound(name.to_string()))?;

        match handle.publisher.send_message(message).await {
            Err(SubmitError::StreamFailed) | Err(SubmitError::LogIo(_)) => {
                warn!("stream '{}': publisher failed - restarting it from the recovery log", name);
                handle.publisher.restart().await?;
                Ok(handle.publisher.send_message(message).await?)
            }
            other => Ok(other?),
        }
    }

    /// Restarts the named stream's publisher from its log, keeping sockets and the
    ///  recovery server untouched.
    pub async fn restart_stream(&self, name: &str) -> Result<(), RegistryError> {
        let handle = self.get(name).await
            .ok_or_else(|| RegistryError::StreamNotFound(name.to_string()))?;
        Ok(handle.publisher.restart().await?)
    }

    /// Graceful teardown of one stream: flush, multicast end-of-session, stop the recovery
    ///  server and deregister the name.
    pub async fn close_stream(&self, name: &str) -> Result<(), RegistryError> {
        let handle = self.streams.write().await.remove(name)
            .ok_or_else(|| RegistryError::StreamNotFound(name.to_string()))?;

        let result = handle.publisher.close().await;
        handle.recovery.abort();
        info!("closed stream '{}'", name);
        Ok(result?)
    }
}
