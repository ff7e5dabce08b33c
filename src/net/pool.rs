use tokio::net::TcpStream;

use crate::net::node::Node;

/// Free list of finished Nodes, so every accept doesn't allocate two
/// pairs of 8 KiB buffers.
///
/// A Node is either handed out (owned by its session) or sitting here, never
/// both: `acquire` moves it out and `release` moves it back in.
pub struct NodePool<S = TcpStream> {
    free: Vec<Box<Node<S>>>,
    allocated: u64,
}

impl<S> NodePool<S> {
    pub fn new() -> Self {
        Self {
            free: Vec::new(),
            allocated: 0,
        }
    }

    pub fn acquire(&mut self) -> Box<Node<S>> {
        match self.free.pop() {
            Some(node) => {
                debug_assert!(node.is_pristine(), "pooled node was not reset");
                node
            }
            None => {
                self.allocated += 1;
                Box::new(Node::new())
            }
        }
    }

    pub fn release(&mut self, mut node: Box<Node<S>>) {
        node.reset();
        self.free.push(node);
    }

    /// Nodes created over the pool's lifetime.
    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    pub fn idle(&self) -> usize {
        self.free.len()
    }
}

impl<S> Default for NodePool<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::ConnectionType;

    #[test]
    fn sequential_sessions_reuse_one_node() {
        let mut pool: NodePool<u32> = NodePool::new();

        for i in 0..5u32 {
            let mut node = pool.acquire();
            assert!(node.is_pristine());
            node.attach(i, format!("10.0.0.{}", i));
            node.kind = ConnectionType::Telnet;
            node.in_menu = true;
            node.upstream.buffer.extend_from_slice(b"1\r\n");
            pool.release(node);
        }

        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.idle(), 1);

        let node = pool.acquire();
        assert_eq!(pool.allocated(), 1);
        assert!(node.is_pristine());
        assert!(node.downstream.socket.is_none());
        assert!(node.upstream.buffer.is_empty());
    }

    #[test]
    fn concurrent_sessions_allocate_separately() {
        let mut pool: NodePool<u32> = NodePool::new();
        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.allocated(), 2);
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle(), 2);
        let _c = pool.acquire();
        assert_eq!(pool.allocated(), 2);
    }
}
