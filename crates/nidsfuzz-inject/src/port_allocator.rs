//! Allocates ephemeral ports and remembers the last N of them, so the
//! aligner has a bounded "reorder window" of recently-used client ports.

use std::collections::VecDeque;

use tokio::net::TcpListener;

use nidsfuzz_core::error::Result;

#[derive(Debug)]
pub struct PortAllocator {
    ring: VecDeque<u16>,
    capacity: usize,
}

impl PortAllocator {
    pub fn new(capacity: usize) -> PortAllocator {
        PortAllocator {
            ring: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    async fn find_free_port() -> Result<u16> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(listener.local_addr()?.port())
    }

    /// Binds an ephemeral port, optionally retrying on a collision with the
    /// ring buffer, then records it when `memorize` is set.
    pub async fn allocate(&mut self, memorize: bool) -> Result<u16> {
        loop {
            let port = Self::find_free_port().await?;
            if memorize && self.ring.contains(&port) {
                continue;
            }
            if memorize {
                if self.ring.len() == self.capacity {
                    self.ring.pop_front();
                }
                self.ring.push_back(port);
            }
            return Ok(port);
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        self.ring.contains(&port)
    }

    pub fn window(&self) -> impl Iterator<Item = &u16> {
        self.ring.iter()
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        PortAllocator::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocate_without_memorize_does_not_grow_ring() {
        let mut allocator = PortAllocator::new(4);
        let port = allocator.allocate(false).await.unwrap();
        assert!(port > 0);
        assert!(!allocator.contains(port));
    }

    #[tokio::test]
    async fn allocate_with_memorize_adds_to_ring_and_evicts_oldest() {
        let mut allocator = PortAllocator::new(2);
        let p1 = allocator.allocate(true).await.unwrap();
        let p2 = allocator.allocate(true).await.unwrap();
        assert!(allocator.contains(p1));
        assert!(allocator.contains(p2));

        let p3 = allocator.allocate(true).await.unwrap();
        assert!(allocator.contains(p3));
        assert_eq!(allocator.window().count(), 2);
    }
}
