//! The single active-transaction slot of one engine instance.

use parking_lot::RwLock;
use std::sync::Arc;

/// Shared marker of which transaction, if any, is active
///
/// At most one transaction is active per engine. The batch executor reads
/// the slot to decide whether sequential batches stop on first failure.
#[derive(Debug, Clone, Default)]
pub struct TransactionSlot {
    active: Arc<RwLock<Option<String>>>,
}

impl TransactionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<String> {
        self.active.read().clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.read().is_some()
    }

    /// Claim the slot, returning the id already holding it on conflict
    pub fn try_claim(&self, transaction_id: &str) -> Result<(), String> {
        let mut active = self.active.write();
        match active.as_ref() {
            Some(existing) => Err(existing.clone()),
            None => {
                *active = Some(transaction_id.to_string());
                Ok(())
            }
        }
    }

    /// Clear the slot if `transaction_id` holds it
    pub fn release(&self, transaction_id: &str) -> bool {
        let mut active = self.active.write();
        if active.as_deref() == Some(transaction_id) {
            *active = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_holder() {
        let slot = TransactionSlot::new();
        assert!(slot.try_claim("a").is_ok());
        assert_eq!(slot.try_claim("b"), Err("a".to_string()));
        assert!(!slot.release("b"));
        assert!(slot.release("a"));
        assert!(!slot.is_active());
    }
}
