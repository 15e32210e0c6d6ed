//! Monotonic, time-sortable transaction id generation
//!
//! Ids are 63-bit positive integers laid out as
//! `(milliseconds since epoch) << 22 | node_id << 12 | sequence`. They are
//! strictly monotonic within a process and roughly time-ordered across
//! processes, which is what lets the transaction log use `ORDER BY id DESC`
//! as "newest first". Zero is reserved as "not an id".

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;

/// Custom epoch the timestamp component counts from (2022-11-23T12:17:20.566Z)
pub const ID_EPOCH_MILLIS: i64 = 1_669_205_840_566;

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_NODE: i64 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_SHIFT: u32 = NODE_BITS + SEQUENCE_BITS;

/// Transaction id generator
#[derive(Debug)]
pub struct IdGenerator {
    node_id: i64,
    state: Mutex<GeneratorState>,
}

#[derive(Debug)]
struct GeneratorState {
    last_millis: i64,
    sequence: i64,
}

impl IdGenerator {
    /// Generator with a random node id, drawn once at construction
    pub fn new() -> Self {
        Self::with_node(rand::thread_rng().gen_range(0..=MAX_NODE))
    }

    /// Generator with an explicit node id (masked to 10 bits)
    pub fn with_node(node_id: i64) -> Self {
        IdGenerator {
            node_id: node_id & MAX_NODE,
            state: Mutex::new(GeneratorState {
                last_millis: 0,
                sequence: 0,
            }),
        }
    }

    /// The node id baked into every generated id
    pub fn node_id(&self) -> i64 {
        self.node_id
    }

    /// Produce the next id. Ids from one generator are strictly increasing;
    /// if the per-millisecond sequence is exhausted the call spins until the
    /// clock advances.
    pub fn generate(&self) -> i64 {
        let mut state = self.state.lock();

        let mut now = clock_millis();
        if now < state.last_millis {
            // clock went backwards; never hand out a smaller timestamp
            now = state.last_millis;
        }

        if now == state.last_millis {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                while now <= state.last_millis {
                    now = clock_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_millis = now;

        (now - ID_EPOCH_MILLIS) << TIMESTAMP_SHIFT
            | self.node_id << SEQUENCE_BITS
            | state.sequence
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn clock_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_positive() {
        let ids = IdGenerator::new();
        assert!(ids.generate() > 0);
    }

    #[test]
    fn test_ids_are_strictly_monotonic() {
        let ids = IdGenerator::new();
        let mut previous = 0;
        for _ in 0..10_000 {
            let id = ids.generate();
            assert!(id > previous);
            previous = id;
        }
    }

    #[test]
    fn test_node_id_is_masked() {
        let ids = IdGenerator::with_node(MAX_NODE + 5);
        assert!(ids.node_id() <= MAX_NODE);
    }

    #[test]
    fn test_id_layout() {
        let ids = IdGenerator::with_node(373);
        let before = clock_millis();
        let id = ids.generate();
        let after = clock_millis();

        let millis = (id >> TIMESTAMP_SHIFT) + ID_EPOCH_MILLIS;
        assert!(millis >= before && millis <= after);
        assert_eq!((id >> SEQUENCE_BITS) & MAX_NODE, 373);
    }

    #[test]
    fn test_sequence_stays_within_twelve_bits() {
        let ids = IdGenerator::with_node(1);
        for _ in 0..20_000 {
            let id = ids.generate();
            assert!(id & MAX_SEQUENCE <= MAX_SEQUENCE);
        }
    }
}
