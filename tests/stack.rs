//! A Treiber stack built on top of `AtomicShared`, exercising the crate's public surface the way
//! an external consumer would. Covers the distilled spec's end-to-end scenarios 1 and 2.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use hazard::{AtomicShared, Shared, make_shared};

struct Node<T> {
    value: T,
    next: Option<Shared<Node<T>>>,
}

struct Stack<T> {
    head: AtomicShared<Node<T>>,
}

impl<T: Clone> Stack<T> {
    fn new() -> Self {
        Self {
            head: AtomicShared::null(),
        }
    }

    fn push(&self, value: T) {
        let mut next = self.head.load(Ordering::Acquire);
        loop {
            let node = make_shared(Node {
                value: value.clone(),
                next: next.clone(),
            });
            match self
                .head
                .compare_exchange_weak(next.as_ref(), Some(node), Ordering::AcqRel)
            {
                Ok(_) => return,
                Err(err) => next = err.current,
            }
        }
    }

    fn pop(&self) -> Option<Shared<Node<T>>> {
        let mut current = self.head.load(Ordering::Acquire);
        loop {
            let node = current.clone()?;
            let next = node.next.clone();
            match self
                .head
                .compare_exchange_weak(Some(&node), next, Ordering::AcqRel)
            {
                Ok(_) => return Some(node),
                Err(err) => current = err.current,
            }
        }
    }
}

#[test]
fn spsc_push_pop_is_lifo() {
    let stack: Stack<u32> = Stack::new();
    stack.push(1);
    stack.push(2);
    stack.push(3);

    let mut popped = Vec::new();
    for _ in 0..3 {
        popped.push(stack.pop().unwrap().value);
    }
    assert_eq!(popped, vec![3, 2, 1]);
    assert!(stack.pop().is_none());
}

#[test]
fn concurrent_stack_stress_no_duplicates_no_losses() {
    let _ = tracing_subscriber::fmt::try_init();

    const THREADS: u32 = 8;
    const PER_THREAD: u32 = 10_000;

    let stack = Arc::new(Stack::new());
    let pushers: Vec<_> = (0..THREADS)
        .map(|t| {
            let stack = stack.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    stack.push(t * PER_THREAD + i);
                }
            })
        })
        .collect();
    for p in pushers {
        p.join().unwrap();
    }

    let popped = Arc::new(std::sync::Mutex::new(Vec::new()));
    let poppers: Vec<_> = (0..THREADS)
        .map(|_| {
            let stack = stack.clone();
            let popped = popped.clone();
            thread::spawn(move || {
                let mut mine = Vec::new();
                while let Some(node) = stack.pop() {
                    mine.push(node.value);
                }
                popped.lock().unwrap().extend(mine);
            })
        })
        .collect();
    for p in poppers {
        p.join().unwrap();
    }

    let popped = Arc::try_unwrap(popped).unwrap().into_inner().unwrap();
    let expected: HashSet<u32> = (0..THREADS * PER_THREAD).collect();
    let actual: HashSet<u32> = popped.iter().copied().collect();
    assert_eq!(actual.len(), popped.len(), "duplicate value popped");
    assert_eq!(actual, expected);
}
