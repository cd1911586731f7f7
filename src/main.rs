use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::thread::scope;
use hp_stack::{Domain, LockFreeStack};
use log::info;

const PRODUCERS: usize = 5;
const CONSUMERS: usize = 3;
const PER_PRODUCER: usize = 10;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let domain = Domain::default();
    let stack = LockFreeStack::new(&domain);
    let popped = AtomicUsize::new(0);

    scope(|s| {
        for i in 0..PRODUCERS {
            let stack = &stack;
            s.spawn(move |_| {
                for j in 0..PER_PRODUCER {
                    stack.push(i * 10 + j).unwrap();
                }
            });
        }
    })
    .unwrap();
    info!("pushed {} values", PRODUCERS * PER_PRODUCER);

    scope(|s| {
        for _ in 0..CONSUMERS {
            s.spawn(|_| {
                let mut handle = domain.register().unwrap();
                while stack.pop(&mut handle).is_some() {
                    popped.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    })
    .unwrap();

    println!("popped {} values", popped.load(Ordering::Relaxed));
    println!("stack is empty: {}", stack.is_empty());
    info!(
        "retired {} nodes, {} still pending",
        domain.reclaimed_count() + domain.garbage_count(),
        domain.garbage_count()
    );
}
