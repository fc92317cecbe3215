/// Processor pool: arena plus free list for amortized reuse.
///
/// Consumers that need many short-lived processors (one per tree node, one
/// per window) check items out by stable integer id and hand everything back
/// at once. A released item's sequence and accumulator are fully reset
/// before it can be checked out again.

use crate::model::NetworkConfig;
use crate::processor::RecurrentProcessor;

pub struct ProcessorPool {
    config: NetworkConfig,
    items: Vec<RecurrentProcessor>,
    free: Vec<usize>,
}

impl ProcessorPool {
    pub fn new(config: NetworkConfig) -> Self {
        ProcessorPool {
            config,
            items: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Check out a processor, constructing one lazily if none is free.
    /// Returns its stable id.
    pub fn get_item(&mut self) -> usize {
        match self.free.pop() {
            Some(id) => id,
            None => {
                self.items.push(RecurrentProcessor::new(self.config.clone()));
                self.items.len() - 1
            }
        }
    }

    pub fn get(&self, id: usize) -> &RecurrentProcessor {
        &self.items[id]
    }

    pub fn get_mut(&mut self, id: usize) -> &mut RecurrentProcessor {
        &mut self.items[id]
    }

    /// Total number of constructed items, free or checked out.
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// Return every checked-out item to the free list, resetting each one.
    pub fn release_all(&mut self) {
        for id in 0..self.items.len() {
            if !self.free.contains(&id) {
                self.items[id].reset();
                self.free.push(id);
            }
        }
    }
}
