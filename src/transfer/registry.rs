//! Maps transfer ids to cancellation tokens so a button press can reach a running transfer.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(Uuid);

impl TransferId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // fits in the 64-byte callback data limit
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for TransferId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// The only state shared across transfers.
///
/// The registry holds clones of each transfer's token so it can signal them;
/// the transfer itself stays the owner and decides what cancellation means.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    inner: Mutex<HashMap<TransferId, CancellationToken>>,
}

impl CancelRegistry {
    /// Register `token` under a fresh id. The entry is removed when the ticket drops.
    pub fn register(self: &Arc<Self>, token: &CancellationToken) -> TransferTicket {
        let mut g = self.lock();
        let id = loop {
            let id = TransferId::new();
            if !g.contains_key(&id) {
                break id;
            }
        };
        g.insert(id, token.clone());
        TransferTicket {
            id,
            registry: Arc::clone(self),
        }
    }

    /// Signal the transfer registered under `id`.
    ///
    /// Returns `false` for unknown ids, including transfers that already finished.
    pub fn cancel(&self, id: TransferId) -> bool {
        let g = self.lock();
        match g.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn remove(&self, id: TransferId) -> bool {
        self.lock().remove(&id).is_some()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TransferId, CancellationToken>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Registration of one running transfer.
#[derive(Debug)]
pub struct TransferTicket {
    id: TransferId,
    registry: Arc<CancelRegistry>,
}

impl TransferTicket {
    pub fn id(&self) -> TransferId {
        self.id
    }
}

impl Drop for TransferTicket {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reaches_registered_token() {
        let registry = Arc::new(CancelRegistry::default());
        let token = CancellationToken::new();
        let ticket = registry.register(&token);

        assert_eq!(registry.len(), 1);
        assert!(registry.cancel(ticket.id()));
        assert!(token.is_cancelled());
    }

    #[test]
    fn stale_cancel_is_a_noop() {
        let registry = Arc::new(CancelRegistry::default());
        let token = CancellationToken::new();
        let ticket = registry.register(&token);
        let id = ticket.id();
        drop(ticket);

        assert!(registry.is_empty());
        assert!(!registry.cancel(id));
        assert!(!token.is_cancelled());
        assert!(!registry.cancel(TransferId::new()));
    }

    #[test]
    fn ids_round_trip_through_callback_text() {
        let id = TransferId::new();
        let text = id.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(text.parse::<TransferId>().unwrap(), id);
        assert!("not-an-id".parse::<TransferId>().is_err());
    }

    #[test]
    fn concurrent_register_and_cancel() {
        let registry = Arc::new(CancelRegistry::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let token = CancellationToken::new();
                        let ticket = r.register(&token);
                        assert!(r.cancel(ticket.id()));
                        drop(ticket);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.len(), 0);
    }
}
