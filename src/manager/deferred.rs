//! Single-assignment handle
//!
//! Resolves or rejects exactly once; every waiter, early or late, observes
//! the same outcome.

use crate::error::{BridgeError, Result};
use tokio::sync::watch;

#[derive(Debug, Clone)]
enum Slot<T> {
    Pending,
    Resolved(T),
    Rejected,
}

impl<T> Slot<T> {
    fn is_settled(&self) -> bool {
        !matches!(self, Slot::Pending)
    }
}

#[derive(Debug)]
pub struct Deferred<T> {
    tx: watch::Sender<Slot<T>>,
}

impl<T: Clone + Send + Sync> Deferred<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Slot::Pending);
        Self { tx }
    }

    /// A handle that is already rejected.
    pub fn rejected() -> Self {
        let deferred = Self::new();
        deferred.reject();
        deferred
    }

    /// Resolve with `value`. Returns false if already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_settled() {
                return false;
            }
            *slot = Slot::Resolved(value);
            true
        })
    }

    /// Reject with the disabled error. Returns false if already settled.
    pub fn reject(&self) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_settled() {
                return false;
            }
            *slot = Slot::Rejected;
            true
        })
    }

    /// The resolved value, if there is one yet.
    pub fn peek(&self) -> Option<T> {
        match &*self.tx.borrow() {
            Slot::Resolved(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Wait until settled.
    pub async fn wait(&self) -> Result<T> {
        let mut rx = self.tx.subscribe();
        let slot = rx
            .wait_for(Slot::is_settled)
            .await
            .map_err(|_| BridgeError::Disabled)?;
        match &*slot {
            Slot::Resolved(value) => Ok(value.clone()),
            _ => Err(BridgeError::Disabled),
        }
    }
}

impl<T: Clone + Send + Sync> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_waiters_see_resolution() {
        let deferred = Arc::new(Deferred::<u32>::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let d = deferred.clone();
                tokio::spawn(async move { d.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(deferred.resolve(7));
        for waiter in waiters {
            assert_eq!(waiter.await.unwrap().unwrap(), 7);
        }
    }

    #[tokio::test]
    async fn test_settles_once() {
        let deferred = Deferred::<u32>::new();
        assert!(deferred.resolve(1));
        assert!(!deferred.resolve(2));
        assert!(!deferred.reject());
        assert_eq!(deferred.wait().await.unwrap(), 1);
        assert_eq!(deferred.peek(), Some(1));
    }

    #[tokio::test]
    async fn test_rejection_is_disabled_error() {
        let deferred = Deferred::<u32>::rejected();
        assert!(!deferred.resolve(1));
        assert!(deferred.peek().is_none());
        assert!(matches!(deferred.wait().await, Err(BridgeError::Disabled)));
    }
}
