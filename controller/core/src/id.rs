//! Identifier allocation for newly created gateway entities.
//!
//! Snowflake-style layout: 39 bits of 10 ms ticks since the Unix epoch,
//! 8 bits of per-tick sequence, 16 bits of machine id. Gateway-assigned ids
//! always win; this allocator only covers entities the gateway has never
//! seen.

use parking_lot::Mutex;
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

const TICK_MILLIS: u64 = 10;
const SEQUENCE_BITS: u64 = 8;
const MACHINE_BITS: u64 = 16;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug)]
pub struct Allocator {
    machine: u64,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    last_tick: u64,
    sequence: u64,
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new(rand::thread_rng().gen())
    }
}

impl Allocator {
    pub fn new(machine: u16) -> Self {
        Self {
            machine: machine as u64,
            state: Mutex::new(State::default()),
        }
    }

    /// Returns the next unique id. Never returns zero, which the sync
    /// controller reserves as the "needs an id" sentinel.
    pub fn next(&self) -> u64 {
        let mut state = self.state.lock();
        let tick = current_tick();
        if tick > state.last_tick {
            state.last_tick = tick;
            state.sequence = 0;
        } else {
            state.sequence += 1;
            if state.sequence > MAX_SEQUENCE {
                state.last_tick += 1;
                state.sequence = 0;
            }
        }
        (state.last_tick << (SEQUENCE_BITS + MACHINE_BITS))
            | (state.sequence << MACHINE_BITS)
            | self.machine
    }
}

fn current_tick() -> u64 {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    elapsed.as_millis() as u64 / TICK_MILLIS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_nonzero() {
        let alloc = Allocator::new(1);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            let id = alloc.next();
            assert_ne!(id, 0);
            assert!(seen.insert(id), "duplicate id {id}");
        }
    }

    #[test]
    fn machines_do_not_collide() {
        let a = Allocator::new(1);
        let b = Allocator::new(2);
        assert_ne!(a.next(), b.next());
    }
}
