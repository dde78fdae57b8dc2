use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Bounds how many missions run at once.
///
/// `reset` swaps in a fresh semaphore at full capacity; permits taken from
/// the previous one return there and no longer count.
pub struct SlotPool {
    capacity: usize,
    current: Mutex<Arc<Semaphore>>,
}

impl SlotPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            current: Mutex::new(Arc::new(Semaphore::new(capacity))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore().available_permits()
    }

    pub async fn acquire(&self) -> Result<Slot, AcquireError> {
        let permit = self.semaphore().acquire_owned().await?;
        Ok(Slot { permit })
    }

    pub fn reset(&self) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::new(Semaphore::new(self.capacity));
    }

    fn semaphore(&self) -> Arc<Semaphore> {
        Arc::clone(&self.current.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// A held mission slot. Dropping it releases the slot exactly once.
#[derive(Debug)]
pub struct Slot {
    permit: OwnedSemaphorePermit,
}

impl Slot {
    /// Releases the slot.
    pub fn release(self) {
        drop(self.permit);
    }
}
