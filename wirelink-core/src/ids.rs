use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Client-scoped identifier of one logical operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(u64);

impl OperationId {
    pub fn new(value: u64) -> Self {
        OperationId(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationId({})", self.0)
    }
}

impl From<u64> for OperationId {
    fn from(value: u64) -> Self {
        OperationId::new(value)
    }
}

/// Hands out strictly increasing operation ids, starting at 1.
#[derive(Debug)]
pub struct OperationIdAllocator {
    next: AtomicU64,
}

impl OperationIdAllocator {
    pub fn new() -> Self {
        OperationIdAllocator {
            next: AtomicU64::new(1),
        }
    }

    pub fn allocate(&self) -> OperationId {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        OperationId::new(id)
    }

    pub fn peek_next(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for OperationIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
