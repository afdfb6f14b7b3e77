use wireproto_codec::MAX_PACKET_SIZE;
use wireproto_pool::{DEFAULT_POOL_CAPACITY, MessagePool};
use wireproto_utils::ThreadPriority;

use crate::tcp::byte_ring::DEFAULT_CAPACITY as DEFAULT_BYTE_RING_CAPACITY;

const DEFAULT_MAX_FRAGMENTS_PER_PACKET: usize = 100;

/// Library-level tunables shared by connections and listeners.
///
/// Builder-style, mirroring the rest of this stack's config types: each
/// `with_*` consumes and returns `self`.
#[derive(Clone, Debug)]
pub struct Config {
    max_client_packet_size: usize,
    pool_capacity: usize,
    max_receive_fragments_per_packet: usize,
    socket_buf_size: Option<usize>,
    byte_ring_capacity: usize,
}

impl Config {
    /// Caps the declared message size this side will accept, clamped to the
    /// protocol's hard `MAX_PACKET_SIZE` ceiling regardless of what's
    /// requested.
    pub fn with_max_client_packet_size(mut self, size: usize) -> Self {
        self.max_client_packet_size = size.min(MAX_PACKET_SIZE);
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_max_receive_fragments_per_packet(mut self, limit: usize) -> Self {
        self.max_receive_fragments_per_packet = limit;
        self
    }

    /// Sets kernel `SO_SNDBUF`/`SO_RCVBUF` on connection sockets.
    pub fn with_socket_buf_size(mut self, size: usize) -> Self {
        self.socket_buf_size = Some(size);
        self
    }

    pub fn with_byte_ring_capacity(mut self, capacity: usize) -> Self {
        self.byte_ring_capacity = capacity;
        self
    }

    pub const fn max_client_packet_size(&self) -> usize {
        self.max_client_packet_size
    }

    pub const fn pool_capacity(&self) -> usize {
        self.pool_capacity
    }

    pub const fn max_receive_fragments_per_packet(&self) -> usize {
        self.max_receive_fragments_per_packet
    }

    pub const fn socket_buf_size(&self) -> Option<usize> {
        self.socket_buf_size
    }

    pub const fn byte_ring_capacity(&self) -> usize {
        self.byte_ring_capacity
    }

    /// Builds a fresh [`MessagePool`] sized to [`pool_capacity`](Self::pool_capacity).
    ///
    /// A pool isn't implicit in a `Connection` or `Listener` — callers pass
    /// one in explicitly so several connections can share a single free
    /// list — but most callers just want one pool per config, so this saves
    /// having to import `wireproto-pool` directly for the common case.
    pub fn build_pool(&self) -> MessagePool {
        MessagePool::new(self.pool_capacity)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_client_packet_size: MAX_PACKET_SIZE,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            max_receive_fragments_per_packet: DEFAULT_MAX_FRAGMENTS_PER_PACKET,
            socket_buf_size: None,
            byte_ring_capacity: DEFAULT_BYTE_RING_CAPACITY,
        }
    }
}

/// Settings for a single [`crate::tcp::Listener::listen`] call.
#[derive(Clone, Debug, Default)]
pub struct ListenerConfig {
    pub config: Config,
    pub connection: ConnectionConfig,
}

/// Settings for a single connection's filler/drainer threads.
#[derive(Clone, Debug, Default)]
pub struct ConnectionConfig {
    pub config: Config,
    /// Pin the filler/drainer threads to this core, if set.
    pub core_affinity: Option<usize>,
    /// Scheduling class requested for the filler/drainer threads.
    pub thread_priority: ThreadPriority,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_clamps_to_protocol_ceiling() {
        let config = Config::default().with_max_client_packet_size(MAX_PACKET_SIZE * 4);
        assert_eq!(config.max_client_packet_size(), MAX_PACKET_SIZE);
    }

    #[test]
    fn build_pool_respects_configured_capacity() {
        let config = Config::default().with_pool_capacity(2);
        let pool = config.build_pool();
        for _ in 0..5 {
            pool.free(Box::new(wireproto_codec::Message::new()));
        }
        assert_eq!(pool.len(), 2);
    }
}
