use std::mem::ManuallyDrop;
use std::ptr;
use std::sync::atomic::Ordering;

use crossbeam_epoch::Atomic;
use crossbeam_epoch::Owned;
use crossbeam_epoch::Shared;

/// Lock-free Treiber stack
///
/// Nodes are linked with CAS on the head pointer and reclaimed through
/// epoch-based garbage collection, so a popped node is never freed while
/// another thread may still be reading it.
pub(crate) struct LifoStack<T> {
    head: Atomic<Node<T>>,
}

struct Node<T> {
    data: ManuallyDrop<T>,
    next: Atomic<Node<T>>,
}

impl<T> LifoStack<T> {
    pub fn new() -> Self {
        Self { head: Atomic::null() }
    }

    pub fn push(&self, value: T) {
        let mut node = Owned::new(Node { data: ManuallyDrop::new(value), next: Atomic::null() });
        let guard = crossbeam_epoch::pin();

        loop {
            let head = self.head.load(Ordering::Relaxed, &guard);
            node.next.store(head, Ordering::Relaxed);

            match self.head.compare_exchange(head, node, Ordering::Release, Ordering::Relaxed, &guard) {
                Ok(_) => break,
                Err(err) => node = err.new, // Lost the race, retry with the same node
            }
        }
    }

    pub fn pop(&self) -> Option<T> {
        let guard = crossbeam_epoch::pin();

        loop {
            let head = self.head.load(Ordering::Acquire, &guard);

            // SAFETY: head was loaded under the pinned guard, so it cannot be reclaimed yet
            let node = unsafe { head.as_ref() }?;
            let next = node.next.load(Ordering::Relaxed, &guard);

            if self.head.compare_exchange(head, next, Ordering::Relaxed, Ordering::Relaxed, &guard).is_ok() {
                // SAFETY: the successful CAS unlinked the node, so this thread is the only one
                // that moves `data` out; the node memory itself is destroyed after the epoch ends
                unsafe {
                    guard.defer_destroy(head);
                    return Some(ManuallyDrop::into_inner(ptr::read(&node.data)));
                }
            }
        }
    }
}

impl<T> Drop for LifoStack<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` guarantees no concurrent access, so nodes can be freed directly
        unsafe {
            let guard = crossbeam_epoch::unprotected();
            let mut current: Shared<'_, Node<T>> = self.head.load(Ordering::Relaxed, guard);

            while let Some(node) = current.as_ref() {
                let next = node.next.load(Ordering::Relaxed, guard);
                let mut owned = current.into_owned();
                ManuallyDrop::drop(&mut owned.data);
                drop(owned);
                current = next;
            }
        }
    }
}

// SAFETY: values are moved between threads only through push/pop
unsafe impl<T: Send> Send for LifoStack<T> {}
unsafe impl<T: Send> Sync for LifoStack<T> {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_pop_order_is_lifo() {
        let stack = LifoStack::new();
        stack.push(1);
        stack.push(2);
        stack.push(3);

        assert_eq!(stack.pop(), Some(3));
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.pop(), Some(1));
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn test_drop_releases_remaining_values() {
        let value = Arc::new(());
        let stack = LifoStack::new();
        stack.push(Arc::clone(&value));
        stack.push(Arc::clone(&value));
        assert_eq!(Arc::strong_count(&value), 3);

        drop(stack);
        assert_eq!(Arc::strong_count(&value), 1);
    }

    #[test]
    fn test_concurrent_push_pop() {
        let stack = Arc::new(LifoStack::new());
        let mut handles = vec![];

        for t in 0..8 {
            let stack = Arc::clone(&stack);
            handles.push(std::thread::spawn(move || {
                for i in 0..1000 {
                    stack.push(t * 1000 + i);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let mut popped = 0;
        while stack.pop().is_some() {
            popped += 1;
        }
        assert_eq!(popped, 8000);
    }
}
