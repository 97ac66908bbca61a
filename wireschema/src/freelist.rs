//! Thread-local pool of struct-instance slot vectors, bucketed by slot
//! count. Bounded in both the largest slot count served and the number of
//! vectors retained per bucket; `shrink_freelist` releases everything.

use crate::value::Value;
use std::cell::RefCell;
use std::mem;
use tracing::trace;

/// Largest slot count the pool serves; bigger instances hit the allocator.
const MAX_SLOTS: usize = 64;
/// Vectors retained per slot-count bucket.
const MAX_RETAINED: usize = 16;

thread_local! {
    static POOL: RefCell<Vec<Vec<Vec<Value>>>> = const { RefCell::new(Vec::new()) };
}

/// Fetch an empty slot vector with capacity for `n` values.
pub(crate) fn acquire(n: usize) -> Vec<Value> {
    if n <= MAX_SLOTS {
        let pooled = POOL.with(|pool| {
            pool.borrow_mut().get_mut(n).and_then(|bucket| bucket.pop())
        });
        if let Some(vec) = pooled {
            return vec;
        }
    }
    Vec::with_capacity(n)
}

/// Return a slot vector to the pool, if capacity and retention bounds
/// permit.
pub(crate) fn release(mut vec: Vec<Value>) {
    let capacity = vec.capacity();
    if capacity == 0 || capacity > MAX_SLOTS {
        return;
    }
    // dropping the contained values can recursively release other
    // instances, so it must happen before the pool is borrowed
    vec.clear();
    POOL.with(|pool| {
        let mut pool = pool.borrow_mut();
        if pool.len() <= capacity {
            pool.resize_with(capacity + 1, Vec::new);
        }
        let bucket = &mut pool[capacity];
        if bucket.len() < MAX_RETAINED {
            bucket.push(vec);
        }
    });
}

/// Drop every retained slot vector on this thread.
pub fn shrink_freelist() {
    let drained = POOL.with(|pool| mem::take(&mut *pool.borrow_mut()));
    let count: usize = drained.iter().map(Vec::len).sum();
    drop(drained);
    trace!(released = count, "slot freelist cleared");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_by_capacity() {
        shrink_freelist();
        let mut vec = acquire(4);
        vec.push(Value::Int(1));
        release(vec);
        let reused = acquire(4);
        assert!(reused.is_empty());
        assert_eq!(reused.capacity(), 4);
    }

    #[test]
    fn test_oversize_not_pooled() {
        shrink_freelist();
        release(Vec::with_capacity(MAX_SLOTS + 1));
        let vec = acquire(MAX_SLOTS + 1);
        assert_eq!(vec.capacity(), MAX_SLOTS + 1);
        shrink_freelist();
    }

    #[test]
    fn test_retention_bound() {
        shrink_freelist();
        for _ in 0..MAX_RETAINED + 4 {
            release(Vec::with_capacity(2));
        }
        let retained = POOL.with(|pool| {
            pool.borrow().get(2).map(Vec::len).unwrap_or(0)
        });
        assert_eq!(retained, MAX_RETAINED);
        shrink_freelist();
    }
}
