//! In-memory buffer transport
//!
//! Buffers are FIFO queues registered process-wide by address. Both ends of
//! a channel attach to the same queue; whichever end attaches first creates
//! it. The queue is unregistered when its receiving end closes, and the
//! address is remembered as closed so a sender that attaches afterwards gets
//! an error instead of re-registering a queue nobody drains.

use crate::error::CommError;
use crate::sync::{lock, wait_until};
use crate::transport::Transport;
use core_types::CommAddress;
use ipc::Direction;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::Duration;

/// Closed addresses remembered for late senders
const MAX_CLOSED: usize = 4096;

/// FIFO queue shared by the two ends of a buffer channel
#[derive(Debug, Default)]
pub(crate) struct SharedQueue {
    frames: Mutex<VecDeque<Vec<u8>>>,
    ready: Condvar,
    closed: AtomicBool,
}

impl SharedQueue {
    fn closed() -> Self {
        Self {
            closed: AtomicBool::new(true),
            ..Self::default()
        }
    }

    fn push(&self, frame: Vec<u8>) -> bool {
        let mut frames = lock(&self.frames);
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        frames.push_back(frame);
        drop(frames);
        self.ready.notify_all();
        true
    }

    fn close(&self) {
        let mut frames = lock(&self.frames);
        self.closed.store(true, Ordering::SeqCst);
        frames.clear();
    }

    fn pop(&self, timeout: Duration) -> Option<Vec<u8>> {
        let guard = lock(&self.frames);
        let (mut guard, ready) = wait_until(&self.ready, guard, timeout, |q| !q.is_empty());
        if ready {
            guard.pop_front()
        } else {
            None
        }
    }

    fn len(&self) -> usize {
        lock(&self.frames).len()
    }
}

#[derive(Default)]
struct Registry {
    open: HashMap<String, Arc<SharedQueue>>,
    // Bounded; the oldest closed address is forgotten first.
    closed: HashSet<String>,
    closed_order: VecDeque<String>,
}

impl Registry {
    fn remember_closed(&mut self, address: &str) {
        if !self.closed.insert(address.to_string()) {
            return;
        }
        self.closed_order.push_back(address.to_string());
        while self.closed_order.len() > MAX_CLOSED {
            if let Some(oldest) = self.closed_order.pop_front() {
                self.closed.remove(&oldest);
            }
        }
    }

    fn forget_closed(&mut self, address: &str) {
        if self.closed.remove(address) {
            self.closed_order.retain(|closed| closed != address);
        }
    }
}

fn registry() -> &'static Mutex<Registry> {
    static QUEUES: OnceLock<Mutex<Registry>> = OnceLock::new();
    QUEUES.get_or_init(|| Mutex::new(Registry::default()))
}

fn attach(address: &CommAddress, direction: Direction) -> Arc<SharedQueue> {
    let mut registry = lock(registry());
    if direction.is_recv() {
        registry.forget_closed(address.as_str());
    } else if registry.closed.contains(address.as_str()) {
        return Arc::new(SharedQueue::closed());
    }
    Arc::clone(
        registry
            .open
            .entry(address.as_str().to_string())
            .or_default(),
    )
}

fn detach(address: &CommAddress, queue: &Arc<SharedQueue>) {
    let mut registry = lock(registry());
    if registry
        .open
        .get(address.as_str())
        .is_some_and(|registered| Arc::ptr_eq(registered, queue))
    {
        registry.open.remove(address.as_str());
        registry.remember_closed(address.as_str());
        queue.close();
    }
}

/// Number of frames waiting in the buffer at an address
pub fn queued_frames(address: &CommAddress) -> usize {
    lock(registry())
        .open
        .get(address.as_str())
        .map_or(0, |queue| queue.len())
}

/// Checks if a queue is registered at an address
pub fn is_registered(address: &CommAddress) -> bool {
    lock(registry()).open.contains_key(address.as_str())
}

/// One end of a buffer channel
pub(crate) struct BufferTransport {
    address: CommAddress,
    direction: Direction,
    queue: Arc<SharedQueue>,
}

impl BufferTransport {
    pub(crate) fn open(address: &CommAddress, direction: Direction) -> Self {
        Self {
            address: address.clone(),
            direction,
            queue: attach(address, direction),
        }
    }
}

impl Transport for BufferTransport {
    fn send_frame(&mut self, frame: Vec<u8>) -> Result<(), CommError> {
        if self.queue.push(frame) {
            Ok(())
        } else {
            Err(CommError::Closed(format!("buffer {}", self.address)))
        }
    }

    fn recv_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, CommError> {
        Ok(self.queue.pop(timeout))
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }

    fn close(&mut self) {
        if self.direction.is_recv() {
            detach(&self.address, &self.queue);
        }
    }
}
