use crate::queue::Queue;
use std::collections::HashMap;

/// Registry of the queues by address. Queues are created on first use and never deleted.
#[derive(Debug, Default)]
pub struct QueueManager {
    queues: HashMap<String, Queue>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the queue of the address, creating an empty one if it doesn't exist yet.
    pub fn get_or_create(&mut self, address: &str) -> &mut Queue {
        self.queues
            .entry(address.to_string())
            .or_insert_with(|| Queue::new(address))
    }

    pub fn get(&self, address: &str) -> Option<&Queue> {
        self.queues.get(address)
    }

    pub fn get_mut(&mut self, address: &str) -> Option<&mut Queue> {
        self.queues.get_mut(address)
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
