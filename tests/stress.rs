use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Barrier,
};
use std::thread;

use hazard_stack::{Domain, Stack};

#[repr(align(64))]
struct ThreadCount(AtomicUsize);

struct DropCount(&'static AtomicUsize);
impl Drop for DropCount {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn push_pop_pairs() {
    const THREADS: usize = 8;
    const ITERS: usize = 250_000;

    let domain = Arc::new(Domain::new(THREADS).unwrap());
    let stack = Arc::new(Stack::with_domain(Arc::clone(&domain)));
    let start = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let (stack, start) = (Arc::clone(&stack), Arc::clone(&start));
            thread::spawn(move || {
                let guard = stack.domain().acquire_guard().unwrap();
                start.wait();
                for i in 0..ITERS {
                    stack.push(i);
                    // every thread pushes before it pops, so the stack can never be empty here
                    assert!(stack.pop_with(&guard).is_some());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(stack.is_empty());
    assert_eq!(stack.pop(), Ok(None));
    assert_eq!(domain.registered_threads(), 0);

    domain.sweep();
    assert_eq!(domain.retired_count(), 0, "unprotected retired nodes must all be reclaimed");
}

#[test]
fn no_leaks_with_prefilled_stack() {
    const THREADS: usize = 8;
    const PREFILL: usize = 1_000;
    const ITERS: usize = 100_000;
    static COUNTERS: [ThreadCount; THREADS] = [
        ThreadCount(AtomicUsize::new(0)),
        ThreadCount(AtomicUsize::new(0)),
        ThreadCount(AtomicUsize::new(0)),
        ThreadCount(AtomicUsize::new(0)),
        ThreadCount(AtomicUsize::new(0)),
        ThreadCount(AtomicUsize::new(0)),
        ThreadCount(AtomicUsize::new(0)),
        ThreadCount(AtomicUsize::new(0)),
    ];

    let domain = Arc::new(Domain::new(THREADS).unwrap());
    let stack = Arc::new(Stack::with_domain(Arc::clone(&domain)));

    let handles: Vec<_> = (0..THREADS)
        .map(|id| {
            let stack = Arc::clone(&stack);
            thread::spawn(move || {
                let counter = &COUNTERS[id].0;
                let guard = stack.domain().acquire_guard().unwrap();

                for _ in 0..PREFILL {
                    stack.push(DropCount(counter));
                }

                for _ in 0..ITERS {
                    let _res = stack.pop_with(&guard);
                    stack.push(DropCount(counter));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    drop(stack);
    drop(domain);

    let drop_sum: usize = COUNTERS.iter().map(|local| local.0.load(Ordering::Relaxed)).sum();
    assert_eq!(drop_sum, THREADS * (PREFILL + ITERS));
}
