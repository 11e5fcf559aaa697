use crate::store::StoreError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::warn;

const CLAIM_HEADER_LEN: usize = 8;
const UNCLAIMED: u64 = 0;

/// Queue-assigned identifier of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId(pub u64);

impl ItemId {
    fn key(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An item handed out by [`Queue::claim`].
#[derive(Debug, Clone)]
pub struct QueueItem<T> {
    pub id: ItemId,
    pub data: T,
}

/// Durable FIFO-ish buffer with exclusive, time-bounded claims.
///
/// A claimed item stays invisible to other claimants until it is released,
/// deleted, or its lease runs out.
pub trait Queue<T>: Send + Sync {
    fn push(&self, data: &T) -> Result<ItemId, StoreError>;

    fn claim(&self, lease: Duration) -> Result<Option<QueueItem<T>>, StoreError>;

    fn release(&self, id: ItemId) -> Result<(), StoreError>;

    /// Returns `false` if the item was already gone.
    fn delete(&self, id: ItemId) -> Result<bool, StoreError>;

    /// All items, claimed or not.
    fn depth(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.depth()? == 0)
    }
}

impl<T, Q: Queue<T> + ?Sized> Queue<T> for &Q {
    fn push(&self, data: &T) -> Result<ItemId, StoreError> {
        (**self).push(data)
    }

    fn claim(&self, lease: Duration) -> Result<Option<QueueItem<T>>, StoreError> {
        (**self).claim(lease)
    }

    fn release(&self, id: ItemId) -> Result<(), StoreError> {
        (**self).release(id)
    }

    fn delete(&self, id: ItemId) -> Result<bool, StoreError> {
        (**self).delete(id)
    }

    fn depth(&self) -> Result<usize, StoreError> {
        (**self).depth()
    }
}

/// [`Queue`] backed by a sled tree.
///
/// Each value is an 8-byte big-endian claim expiry in unix millis (`0` when
/// unclaimed) followed by the JSON payload. Claims are taken with
/// compare-and-swap, so concurrent claimants never share an item.
pub struct SledQueue<T> {
    db: sled::Db,
    tree: sled::Tree,
    name: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for SledQueue<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            tree: self.tree.clone(),
            name: self.name.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for SledQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledQueue")
            .field("name", &self.name)
            .field("depth", &self.tree.len())
            .finish()
    }
}

impl<T> SledQueue<T> {
    pub fn open(db: &sled::Db, name: &str) -> Result<Self, StoreError> {
        let tree = db.open_tree(name)?;
        Ok(Self {
            db: db.clone(),
            tree,
            name: name.to_string(),
            _payload: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of items currently under an unexpired claim.
    pub fn claimed_count(&self) -> Result<usize, StoreError> {
        let now = now_millis();
        let mut claimed = 0;
        for entry in self.tree.iter() {
            let (_, value) = entry?;
            if let Some(expiry) = claim_expiry(&value)
                && expiry != UNCLAIMED
                && expiry > now
            {
                claimed += 1;
            }
        }
        Ok(claimed)
    }
}

impl<T> Queue<T> for SledQueue<T>
where
    T: Serialize + DeserializeOwned,
{
    fn push(&self, data: &T) -> Result<ItemId, StoreError> {
        let id = self.db.generate_id()?;
        let payload = serde_json::to_vec(data)?;
        self.tree
            .insert(id.to_be_bytes(), encode_record(UNCLAIMED, &payload))?;
        Ok(ItemId(id))
    }

    fn claim(&self, lease: Duration) -> Result<Option<QueueItem<T>>, StoreError> {
        let now = now_millis();
        let lease_ms = (lease.as_millis() as u64).max(1);

        for entry in self.tree.iter() {
            let (key, value) = entry?;
            let Some(id) = decode_id(&key) else {
                warn!(queue = %self.name, "Skipping record with malformed key");
                continue;
            };
            let Some(expiry) = claim_expiry(&value) else {
                warn!(queue = %self.name, item = id, "Skipping record without claim header");
                continue;
            };
            if expiry != UNCLAIMED && expiry > now {
                continue;
            }

            let payload = &value[CLAIM_HEADER_LEN..];
            let data: T = match serde_json::from_slice(payload) {
                Ok(data) => data,
                Err(e) => {
                    warn!(queue = %self.name, item = id, error = %e, "Skipping undecodable record");
                    continue;
                }
            };

            let claimed = encode_record(now + lease_ms, payload);
            match self.tree.compare_and_swap(&key, Some(&value), Some(claimed))? {
                Ok(()) => {
                    return Ok(Some(QueueItem {
                        id: ItemId(id),
                        data,
                    }));
                }
                // Another claimant got there first
                Err(_) => continue,
            }
        }

        Ok(None)
    }

    fn release(&self, id: ItemId) -> Result<(), StoreError> {
        self.tree.fetch_and_update(id.key(), |old| {
            old.map(|value| {
                let mut record = value.to_vec();
                if record.len() >= CLAIM_HEADER_LEN {
                    record[..CLAIM_HEADER_LEN].copy_from_slice(&UNCLAIMED.to_be_bytes());
                }
                record
            })
        })?;
        Ok(())
    }

    fn delete(&self, id: ItemId) -> Result<bool, StoreError> {
        Ok(self.tree.remove(id.key())?.is_some())
    }

    fn depth(&self) -> Result<usize, StoreError> {
        Ok(self.tree.len())
    }
}

fn encode_record(claimed_until: u64, payload: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(CLAIM_HEADER_LEN + payload.len());
    record.extend_from_slice(&claimed_until.to_be_bytes());
    record.extend_from_slice(payload);
    record
}

fn claim_expiry(value: &[u8]) -> Option<u64> {
    let header: [u8; CLAIM_HEADER_LEN] = value.get(..CLAIM_HEADER_LEN)?.try_into().ok()?;
    Some(u64::from_be_bytes(header))
}

fn decode_id(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    const LEASE: Duration = Duration::from_secs(60);

    fn test_queue() -> SledQueue<String> {
        let db = sled::Config::new().temporary(true).open().unwrap();
        SledQueue::open(&db, "test_queue").unwrap()
    }

    #[test]
    fn test_push_claim_delete() {
        let queue = test_queue();
        queue.push(&"first".to_string()).unwrap();
        queue.push(&"second".to_string()).unwrap();
        assert_eq!(queue.depth().unwrap(), 2);

        let item = queue.claim(LEASE).unwrap().unwrap();
        assert_eq!(item.data, "first");
        assert!(queue.delete(item.id).unwrap());
        assert!(!queue.delete(item.id).unwrap());

        assert_eq!(queue.depth().unwrap(), 1);
    }

    #[test]
    fn test_claimed_item_is_invisible_until_released() {
        let queue = test_queue();
        queue.push(&"only".to_string()).unwrap();

        let item = queue.claim(LEASE).unwrap().unwrap();
        assert!(queue.claim(LEASE).unwrap().is_none());
        // claimed items still count towards depth
        assert_eq!(queue.depth().unwrap(), 1);
        assert_eq!(queue.claimed_count().unwrap(), 1);

        queue.release(item.id).unwrap();
        let again = queue.claim(LEASE).unwrap().unwrap();
        assert_eq!(again.id, item.id);
        assert_eq!(again.data, "only");
    }

    #[test]
    fn test_expired_lease_makes_item_claimable() {
        let queue = test_queue();
        queue.push(&"leased".to_string()).unwrap();

        let item = queue.claim(Duration::from_millis(1)).unwrap().unwrap();
        thread::sleep(Duration::from_millis(10));

        let reclaimed = queue.claim(LEASE).unwrap().unwrap();
        assert_eq!(reclaimed.id, item.id);
    }

    #[test]
    fn test_claim_order_follows_submission() {
        let queue = test_queue();
        for i in 0..5 {
            queue.push(&format!("item-{i}")).unwrap();
        }

        let claimed: Vec<String> = (0..5)
            .map(|_| queue.claim(LEASE).unwrap().unwrap().data)
            .collect();
        assert_eq!(claimed, vec!["item-0", "item-1", "item-2", "item-3", "item-4"]);
    }

    #[test]
    fn test_concurrent_claimants_never_share_an_item() {
        let queue = Arc::new(test_queue());
        for i in 0..200 {
            queue.push(&format!("item-{i}")).unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut ids = Vec::new();
                    while let Some(item) = queue.claim(LEASE).unwrap() {
                        ids.push(item.id);
                    }
                    ids
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "item {id} claimed twice");
            }
        }
        assert_eq!(seen.len(), 200);
    }

    #[test]
    fn test_release_of_deleted_item_is_noop() {
        let queue = test_queue();
        let id = queue.push(&"gone".to_string()).unwrap();
        queue.delete(id).unwrap();
        queue.release(id).unwrap();
        assert!(queue.is_empty().unwrap());
    }
}
