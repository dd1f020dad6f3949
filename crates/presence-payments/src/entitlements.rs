//! Entitlement Storage
//!
//! Durable mapping from subscriber phone number to the premium flag.
//! The flag is monotonic: once a verified payment sets it, nothing in this
//! crate ever clears it again.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use crate::error::{PaymentError, Result};

/// Entitlement storage trait.
///
/// Implementations must keep `mark_premium` idempotent and atomic per
/// subscriber: two racing writers for the same phone number converge to
/// `true`. Reads never fail: a store that cannot be read answers `false`
/// (fail-closed) and logs the fault, so a storage problem can deny paid
/// access temporarily but never grant unpaid access.
pub trait EntitlementStore: Send + Sync {
    /// Current premium flag for a subscriber; `false` when absent.
    fn is_premium(&self, subscriber: &str) -> bool;

    /// Record that the subscriber paid. Setting an already-set flag is a
    /// no-op. Write failures surface as [`PaymentError::Storage`].
    fn mark_premium(&self, subscriber: &str) -> Result<()>;
}

/// In-memory entitlement store (for tests and development).
pub struct MemoryEntitlementStore {
    premium: RwLock<HashMap<String, bool>>,
}

impl Default for MemoryEntitlementStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEntitlementStore {
    pub fn new() -> Self {
        Self {
            premium: RwLock::new(HashMap::new()),
        }
    }
}

impl EntitlementStore for MemoryEntitlementStore {
    fn is_premium(&self, subscriber: &str) -> bool {
        match self.premium.read() {
            Ok(map) => map.get(subscriber).copied().unwrap_or(false),
            Err(poisoned) => {
                tracing::error!("entitlement map lock poisoned, answering false");
                drop(poisoned);
                false
            }
        }
    }

    fn mark_premium(&self, subscriber: &str) -> Result<()> {
        let mut map = self
            .premium
            .write()
            .map_err(|_| PaymentError::Storage("entitlement map lock poisoned".into()))?;
        map.insert(subscriber.to_string(), true);
        Ok(())
    }
}

/// File-backed entitlement store.
///
/// Persists the whole map as one JSON object (`{"<phone>": true, ...}`) and
/// rewrites it synchronously on every new grant. The read-modify-write cycle
/// is serialized behind a single mutex, which satisfies the per-subscriber
/// atomicity requirement; at this map's size the coarser lock is not a
/// bottleneck. Writes land in a temp file first and are renamed into place,
/// so a crash mid-write leaves the previous map intact.
pub struct JsonFileEntitlementStore {
    path: PathBuf,
    state: Mutex<HashMap<String, bool>>,
}

impl JsonFileEntitlementStore {
    /// Open the store at `path`, creating parent directories as needed.
    ///
    /// A missing file starts as the empty map. A corrupt file also starts
    /// empty (with the fault logged) rather than refusing to start; reads
    /// then answer `false` until the next verified payment rewrites it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PaymentError::Storage(format!("creating {}: {e}", parent.display()))
            })?;
        }

        let state = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, bool>>(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    tracing::error!(
                        path = %path.display(),
                        error = %e,
                        "entitlement file corrupt, starting from empty map"
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "entitlement file unreadable, starting from empty map"
                );
                HashMap::new()
            }
        };

        tracing::info!(
            path = %path.display(),
            subscribers = state.len(),
            "opened entitlement store"
        );

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Write `map` to disk: temp file in the same directory, fsync, rename.
    fn persist(&self, map: &HashMap<String, bool>) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(map)
            .map_err(|e| PaymentError::Storage(format!("encoding entitlement map: {e}")))?;

        let mut file = fs::File::create(&tmp)
            .map_err(|e| PaymentError::Storage(format!("creating {}: {e}", tmp.display())))?;
        file.write_all(&bytes)
            .and_then(|()| file.sync_all())
            .map_err(|e| PaymentError::Storage(format!("writing {}: {e}", tmp.display())))?;
        drop(file);

        fs::rename(&tmp, &self.path).map_err(|e| {
            PaymentError::Storage(format!("replacing {}: {e}", self.path.display()))
        })
    }
}

impl EntitlementStore for JsonFileEntitlementStore {
    fn is_premium(&self, subscriber: &str) -> bool {
        match self.state.lock() {
            Ok(map) => map.get(subscriber).copied().unwrap_or(false),
            Err(poisoned) => {
                tracing::error!("entitlement store lock poisoned, answering false");
                drop(poisoned);
                false
            }
        }
    }

    fn mark_premium(&self, subscriber: &str) -> Result<()> {
        let mut map = self
            .state
            .lock()
            .map_err(|_| PaymentError::Storage("entitlement store lock poisoned".into()))?;

        // Already granted: skip the disk write so redeliveries are free.
        if map.get(subscriber).copied().unwrap_or(false) {
            return Ok(());
        }

        map.insert(subscriber.to_string(), true);
        self.persist(&map)
    }
}
