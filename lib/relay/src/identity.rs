use chassis::ClientId;
use std::sync::atomic::{AtomicU32, Ordering};

/// Monotonic source of client and group identifiers. A single shared sequence
/// serves both id spaces, so a user id can never collide with a group id and
/// recipient resolution stays unambiguous. Id 0 is reserved for the server.
pub struct IdGenerator {
    sequence: AtomicU32,
}

impl IdGenerator {
    #[inline]
    pub fn new() -> IdGenerator {
        IdGenerator {
            sequence: AtomicU32::new(1),
        }
    }

    #[inline]
    pub fn next_id(&self) -> ClientId {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ids_are_monotonic_from_one() {
        let ids = IdGenerator::new();

        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);
        assert_eq!(ids.next_id(), 3);
    }

    #[test]
    fn test_ids_are_unique_across_threads() {
        let ids = Arc::new(IdGenerator::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                thread::spawn(move || (0..1000).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<ClientId> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();

        all.sort();
        all.dedup();
        assert_eq!(all.len(), 4000);
    }
}
