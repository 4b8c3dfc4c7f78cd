use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rollcall_proto::Channel;
use tokio::net::TcpStream;

/// One filled roster entry.
pub(crate) struct WorkerSlot {
    pub(crate) id: u32,
    pub(crate) name: String,
    pub(crate) conn: tokio::sync::Mutex<Channel<TcpStream>>,
    busy: AtomicBool,
    failed: AtomicBool,
}

impl WorkerSlot {
    pub(crate) fn new(id: u32, name: String, conn: Channel<TcpStream>) -> Self {
        Self {
            id,
            name,
            conn: tokio::sync::Mutex::new(conn),
            busy: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        }
    }

    /// Claim the slot for one dispatch. Returns false if already busy.
    pub(crate) fn try_claim(&self) -> bool {
        !self.busy.swap(true, Ordering::SeqCst)
    }

    /// Clear the busy flag after a dispatch finishes.
    pub(crate) fn release(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }

    /// True while a dispatch is outstanding on a live worker.
    pub(crate) fn in_flight(&self) -> bool {
        self.busy.load(Ordering::SeqCst) && !self.is_failed()
    }

    /// Remove the worker from further scheduling.
    pub(crate) fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }
}

enum SlotState {
    Empty,
    /// Reserved by a setup dialog that has not finished yet. Blocks
    /// concurrent assigners from double-issuing the id.
    Held,
    Ready(Arc<WorkerSlot>),
}

/// Fixed-size worker table, indexed by id 1..=N.
///
/// Mutated only by the setup orchestrator; schedulers touch nothing but
/// each slot's own flags.
pub(crate) struct Registry {
    slots: Mutex<Vec<SlotState>>,
}

impl Registry {
    pub(crate) fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || SlotState::Empty);
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Reserve the lowest unassigned id, or `None` when the table is full.
    pub(crate) fn hold_lowest_free(&self) -> Option<u32> {
        let mut slots = self.slots.lock().expect("registry lock poisoned");
        for (index, slot) in slots.iter_mut().enumerate() {
            if matches!(slot, SlotState::Empty) {
                *slot = SlotState::Held;
                return Some(index as u32 + 1);
            }
        }
        None
    }

    /// Give a held id back after a failed setup so a later connection
    /// can claim it.
    pub(crate) fn release_held(&self, id: u32) {
        let mut slots = self.slots.lock().expect("registry lock poisoned");
        if let Some(slot) = slots.get_mut(id as usize - 1) {
            if matches!(slot, SlotState::Held) {
                *slot = SlotState::Empty;
            }
        }
    }

    /// Fill a held slot once its setup dialog succeeded.
    pub(crate) fn finalize(&self, slot: WorkerSlot) -> Arc<WorkerSlot> {
        let ready = Arc::new(slot);
        let mut slots = self.slots.lock().expect("registry lock poisoned");
        slots[ready.id as usize - 1] = SlotState::Ready(ready.clone());
        ready
    }

    pub(crate) fn ready_count(&self) -> usize {
        let slots = self.slots.lock().expect("registry lock poisoned");
        slots
            .iter()
            .filter(|slot| matches!(slot, SlotState::Ready(_)))
            .count()
    }

    /// Filled slots in id order.
    pub(crate) fn ready_slots(&self) -> Vec<Arc<WorkerSlot>> {
        let slots = self.slots.lock().expect("registry lock poisoned");
        slots
            .iter()
            .filter_map(|slot| match slot {
                SlotState::Ready(ready) => Some(ready.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drop every slot, closing all worker connections.
    pub(crate) fn clear(&self) {
        let mut slots = self.slots.lock().expect("registry lock poisoned");
        for slot in slots.iter_mut() {
            *slot = SlotState::Empty;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn ids_are_assigned_lowest_free_first() {
        let registry = Registry::new(3);
        assert_eq!(registry.hold_lowest_free(), Some(1));
        assert_eq!(registry.hold_lowest_free(), Some(2));

        // A failed setup re-offers its id to the next connection.
        registry.release_held(1);
        assert_eq!(registry.hold_lowest_free(), Some(1));
        assert_eq!(registry.hold_lowest_free(), Some(3));
        assert_eq!(registry.hold_lowest_free(), None);
    }

    #[tokio::test]
    async fn finalize_fills_the_held_slot() {
        let registry = Registry::new(2);
        let id = registry.hold_lowest_free().unwrap();
        let (client, _server) = tcp_pair().await;
        registry.finalize(WorkerSlot::new(id, "alpha".to_string(), Channel::new(client)));

        assert_eq!(registry.ready_count(), 1);
        let slots = registry.ready_slots();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].id, 1);
        assert_eq!(slots[0].name, "alpha");

        registry.clear();
        assert_eq!(registry.ready_count(), 0);
    }

    #[tokio::test]
    async fn busy_flag_admits_one_claim_at_a_time() {
        let (client, _server) = tcp_pair().await;
        let slot = WorkerSlot::new(1, "alpha".to_string(), Channel::new(client));

        assert!(slot.try_claim());
        assert!(!slot.try_claim());
        assert!(slot.in_flight());

        slot.release();
        assert!(!slot.in_flight());
        assert!(slot.try_claim());

        slot.mark_failed();
        assert!(!slot.in_flight());
    }
}
