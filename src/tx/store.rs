//! Durable per-connector transaction ring.
//!
//! Each connector owns up to `MAX_TRANSACTIONS` slots under
//! `tx/<connector>-<slot>.jsn`. Records are persisted in strictly
//! increasing `tx_nr` order and consumed in the same order; a slot is only
//! reclaimed once its record is Completed or Aborted.

use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::storage::FilesystemAdapter;
use crate::tx::transaction::{Transaction, TX_SCHEMA_VERSION};

/// Default ring capacity per connector.
pub const MAX_TRANSACTIONS: usize = 8;

#[derive(Default)]
struct ConnectorRing {
    /// Records in ascending `tx_nr` order.
    queue: VecDeque<Transaction>,
    next_tx_nr: u32,
}

/// Arena of all transaction records, keyed by `(connector_id, tx_nr)`.
pub struct TransactionStore {
    filesystem: Option<Rc<dyn FilesystemAdapter>>,
    capacity: usize,
    rings: Vec<ConnectorRing>,
}

impl TransactionStore {
    /// `connector_count` includes connector 0 (the charge point itself,
    /// which never carries transactions but keeps indexing uniform).
    pub fn new(connector_count: usize, filesystem: Option<Rc<dyn FilesystemAdapter>>) -> Self {
        let mut rings = Vec::with_capacity(connector_count);
        for _ in 0..connector_count {
            rings.push(ConnectorRing {
                queue: VecDeque::new(),
                next_tx_nr: 1,
            });
        }
        Self {
            filesystem,
            capacity: MAX_TRANSACTIONS,
            rings,
        }
    }

    pub fn connector_count(&self) -> usize {
        self.rings.len()
    }

    fn slot_path(&self, connector_id: u32, tx_nr: u32) -> String {
        format!("tx/{}-{}.jsn", connector_id, tx_nr as usize % self.capacity)
    }

    /// Read every slot back and rebuild the per-connector queues and
    /// counters. Partially written documents (unparseable or missing the
    /// terminal marker) are discarded.
    pub fn load_all(&mut self) {
        let Some(fs) = self.filesystem.clone() else {
            return;
        };
        for connector_id in 0..self.rings.len() {
            let mut records: Vec<Transaction> = Vec::new();
            for slot in 0..self.capacity {
                let path = format!("tx/{}-{}.jsn", connector_id, slot);
                let Some(content) = fs.read(&path) else {
                    continue;
                };
                match serde_json::from_str::<Transaction>(&content) {
                    Ok(tx) if tx.v == TX_SCHEMA_VERSION => {
                        if tx.connector_id as usize == connector_id {
                            records.push(tx);
                        } else {
                            warn!("{}: record for connector {}", path, tx.connector_id);
                        }
                    }
                    Ok(_) => warn!("{}: missing terminal marker, discarding", path),
                    Err(e) => warn!("{}: discarding unreadable record: {}", path, e),
                }
            }
            records.sort_by_key(|tx| tx.tx_nr);
            let ring = &mut self.rings[connector_id];
            ring.next_tx_nr = records.last().map(|tx| tx.tx_nr + 1).unwrap_or(1);
            ring.queue = records.into();
            if !ring.queue.is_empty() {
                info!(
                    "connector {}: recovered {} transaction record(s)",
                    connector_id,
                    ring.queue.len()
                );
            }
        }
    }

    /// Allocate the next transaction on a connector. The oldest record is
    /// evicted if, and only if, it is settled; otherwise the ring is full.
    pub fn allocate(&mut self, connector_id: u32) -> Result<&mut Transaction, CoreError> {
        let capacity = self.capacity;
        let fs = self.filesystem.clone();
        let ring = self
            .rings
            .get_mut(connector_id as usize)
            .ok_or(CoreError::UnknownConnector(connector_id))?;

        if ring.queue.len() >= capacity {
            let evictable = ring.queue.front().is_some_and(Transaction::is_settled);
            if !evictable {
                return Err(CoreError::StoreFull);
            }
            let evicted = ring.queue.pop_front().expect("checked non-empty");
            debug!(
                "connector {}: evicting settled tx {}",
                connector_id, evicted.tx_nr
            );
            if let Some(fs) = &fs {
                let path = format!(
                    "tx/{}-{}.jsn",
                    connector_id,
                    evicted.tx_nr as usize % capacity
                );
                if let Err(e) = fs.remove(&path) {
                    warn!("failed to remove {}: {}", path, e);
                }
            }
        }

        let tx_nr = ring.next_tx_nr;
        ring.next_tx_nr += 1;
        ring.queue.push_back(Transaction::new(connector_id, tx_nr));
        debug!("connector {}: allocated tx {}", connector_id, tx_nr);
        Ok(ring.queue.back_mut().expect("just pushed"))
    }

    /// The transaction currently being processed: the oldest record that is
    /// not yet settled.
    pub fn head(&self, connector_id: u32) -> Option<&Transaction> {
        self.rings
            .get(connector_id as usize)?
            .queue
            .iter()
            .find(|tx| !tx.is_settled())
    }

    pub fn head_mut(&mut self, connector_id: u32) -> Option<&mut Transaction> {
        self.rings
            .get_mut(connector_id as usize)?
            .queue
            .iter_mut()
            .find(|tx| !tx.is_settled())
    }

    /// The most recently allocated transaction.
    pub fn tail(&self, connector_id: u32) -> Option<&Transaction> {
        self.rings.get(connector_id as usize)?.queue.back()
    }

    pub fn get(&self, connector_id: u32, tx_nr: u32) -> Option<&Transaction> {
        self.rings
            .get(connector_id as usize)?
            .queue
            .iter()
            .find(|tx| tx.tx_nr == tx_nr)
    }

    pub fn get_mut(&mut self, connector_id: u32, tx_nr: u32) -> Option<&mut Transaction> {
        self.rings
            .get_mut(connector_id as usize)?
            .queue
            .iter_mut()
            .find(|tx| tx.tx_nr == tx_nr)
    }

    /// All records of one connector in `tx_nr` order.
    pub fn iter(&self, connector_id: u32) -> impl Iterator<Item = &Transaction> {
        self.rings
            .get(connector_id as usize)
            .map(|r| r.queue.iter())
            .into_iter()
            .flatten()
    }

    /// Atomically persist one record.
    pub fn commit(&mut self, connector_id: u32, tx_nr: u32) -> Result<(), CoreError> {
        let path = self.slot_path(connector_id, tx_nr);
        let Some(tx) = self.get(connector_id, tx_nr) else {
            return Err(CoreError::UnknownConnector(connector_id));
        };
        let Some(fs) = &self.filesystem else {
            return Ok(());
        };
        let json = serde_json::to_string(tx).map_err(|e| CoreError::Storage(e.to_string()))?;
        fs.write(&path, &json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemFilesystem;

    fn store() -> (TransactionStore, MemFilesystem) {
        let fs = MemFilesystem::new();
        (TransactionStore::new(3, Some(Rc::new(fs.clone()))), fs)
    }

    #[test]
    fn allocate_assigns_monotonic_numbers() {
        let (mut store, _fs) = store();
        let a = store.allocate(1).unwrap().tx_nr;
        store.head_mut(1).unwrap().end_session();
        let b = store.allocate(1).unwrap().tx_nr;
        assert_eq!((a, b), (1, 2));
        // Independent per connector.
        assert_eq!(store.allocate(2).unwrap().tx_nr, 1);
    }

    #[test]
    fn head_skips_settled_records() {
        let (mut store, _fs) = store();
        store.allocate(1).unwrap().end_session();
        store.allocate(1).unwrap();
        assert_eq!(store.head(1).unwrap().tx_nr, 2);
        assert_eq!(store.tail(1).unwrap().tx_nr, 2);
    }

    #[test]
    fn full_ring_of_unsettled_records_rejects_allocation() {
        let (mut store, _fs) = store();
        for _ in 0..MAX_TRANSACTIONS {
            let tx = store.allocate(1).unwrap();
            tx.start.rpc.requested = true; // running, not settled
        }
        assert!(matches!(store.allocate(1), Err(CoreError::StoreFull)));
    }

    #[test]
    fn full_ring_evicts_a_settled_oldest_record() {
        let (mut store, fs) = store();
        for i in 0..MAX_TRANSACTIONS {
            let tx = store.allocate(1).unwrap();
            if i == 0 {
                tx.end_session(); // aborted, evictable
            } else {
                tx.start.rpc.requested = true;
            }
            let nr = tx.tx_nr;
            store.commit(1, nr).unwrap();
        }
        let tx_nr = store.allocate(1).unwrap().tx_nr;
        assert_eq!(tx_nr, MAX_TRANSACTIONS as u32 + 1);
        // Slot file of the evicted record is gone.
        assert!(fs.read("tx/1-0.jsn").is_none());
    }

    #[test]
    fn load_all_restores_order_and_counters() {
        let fs = MemFilesystem::new();
        {
            let mut store = TransactionStore::new(2, Some(Rc::new(fs.clone())));
            for _ in 0..3 {
                let tx = store.allocate(1).unwrap();
                tx.start.rpc.requested = true;
                let nr = tx.tx_nr;
                store.commit(1, nr).unwrap();
            }
        }

        let mut reloaded = TransactionStore::new(2, Some(Rc::new(fs)));
        reloaded.load_all();
        let nrs: Vec<u32> = reloaded.iter(1).map(|tx| tx.tx_nr).collect();
        assert_eq!(nrs, vec![1, 2, 3]);
        assert_eq!(reloaded.head(1).unwrap().tx_nr, 1);
        assert_eq!(reloaded.allocate(1).unwrap().tx_nr, 4);
    }

    #[test]
    fn load_all_discards_partial_records() {
        let fs = MemFilesystem::new();
        fs.write("tx/1-0.jsn", "{\"connectorId\":1,\"txNr\":1").unwrap(); // torn write
        fs.write("tx/1-1.jsn", "{\"connectorId\":1,\"txNr\":2,\"silent\":false,\"session\":{\"idTag\":\"\",\"authorized\":false,\"deauthorized\":false,\"ts\":null,\"active\":true,\"txProfileId\":-1},\"start\":{\"rpc\":{\"requested\":false,\"confirmed\":false},\"ts\":null,\"meter\":-1,\"reservationId\":-1,\"transactionId\":-1},\"stop\":{\"rpc\":{\"requested\":false,\"confirmed\":false},\"idTag\":\"\",\"ts\":null,\"meter\":-1,\"reason\":\"\"}}")
            .unwrap(); // complete JSON but no terminal marker

        let mut store = TransactionStore::new(2, Some(Rc::new(fs)));
        store.load_all();
        assert!(store.iter(1).next().is_none());
    }
}
