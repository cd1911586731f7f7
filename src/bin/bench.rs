use crossbeam_utils::thread::scope;
use hp_stack::config::stack::{setup, BenchWriter, Config, Op, Perf};
use hp_stack::{Domain, LockFreeStack};
use rand::prelude::*;
use std::cmp::max;
use std::io::{stdout, Write};
use std::path::Path;
use std::sync::atomic::{compiler_fence, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::time::Instant;

cfg_if::cfg_if! {
    if #[cfg(all(not(feature = "sanitize"), target_os = "linux"))] {
        #[global_allocator]
        static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let (config, output) = setup(
        Path::new(file!())
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string())
            .unwrap(),
    );
    bench(&config, output);
}

fn bench(config: &Config, output: BenchWriter) {
    println!("{}", config);
    let perf = bench_stack(config);
    output.write_record(config, &perf);
    println!("{}", perf);
}

fn prefill(config: &Config, stack: &LockFreeStack<'_, usize>) {
    print!("prefilling... ");
    stdout().flush().unwrap();
    let rng = &mut rand::thread_rng();
    for _ in 0..config.prefill {
        stack.push(config.value_dist.sample(rng)).unwrap();
    }
    print!("prefilled... ");
    stdout().flush().unwrap();
}

fn bench_stack(config: &Config) -> Perf {
    let domain = &Domain::new(config.domain_config()).unwrap();
    let stack = &LockFreeStack::new(domain);
    prefill(config, stack);

    let barrier = &Arc::new(Barrier::new(config.threads + config.aux_thread));
    let (ops_sender, ops_receiver) = mpsc::channel();
    let (mem_sender, mem_receiver) = mpsc::channel();

    scope(|s| {
        // sampling thread
        if config.aux_thread > 0 {
            let mem_sender = mem_sender.clone();
            s.spawn(move |_| {
                let mut samples = 0usize;
                let mut acc = 0usize;
                let mut peak = 0usize;
                let mut garb_acc = 0usize;
                let mut garb_peak = 0usize;
                barrier.clone().wait();

                let start = Instant::now();
                let mut next_sampling = start + config.sampling_period;
                while start.elapsed() < config.duration {
                    let now = Instant::now();
                    if now > next_sampling {
                        let allocated = config.mem_sampler.sample();
                        samples += 1;

                        acc += allocated;
                        peak = max(peak, allocated);

                        let garbages = domain.garbage_count();
                        garb_acc += garbages;
                        garb_peak = max(garb_peak, garbages);

                        next_sampling = now + config.sampling_period;
                    }
                    std::thread::sleep(config.aux_thread_period);
                }

                if config.sampling && samples > 0 {
                    mem_sender
                        .send((peak, acc / samples, garb_peak, garb_acc / samples))
                        .unwrap();
                } else {
                    mem_sender.send((0, 0, 0, 0)).unwrap();
                }
            });
        } else {
            mem_sender.send((0, 0, 0, 0)).unwrap();
        }

        for _ in 0..config.threads {
            let ops_sender = ops_sender.clone();
            s.spawn(move |_| {
                let mut ops: u64 = 0;
                let mut rng = &mut rand::thread_rng();
                let mut handle = domain.register().unwrap();
                barrier.clone().wait();
                let start = Instant::now();

                while start.elapsed() < config.duration {
                    match Op::OPS[config.op_dist.sample(&mut rng)] {
                        Op::Push => {
                            let value = config.value_dist.sample(rng);
                            stack.push(value).unwrap();
                        }
                        Op::Pop => {
                            stack.pop(&mut handle);
                        }
                    }
                    compiler_fence(Ordering::SeqCst);
                    ops += 1;
                }

                ops_sender.send(ops).unwrap();
            });
        }
    })
    .unwrap();
    println!("end");

    let mut ops = 0;
    for _ in 0..config.threads {
        let local_ops = ops_receiver.recv().unwrap();
        ops += local_ops;
    }
    let ops_per_sec = ops / config.interval.max(1);
    let (peak_mem, avg_mem, peak_garb, avg_garb) = mem_receiver.recv().unwrap();
    Perf {
        ops_per_sec,
        peak_mem,
        avg_mem,
        peak_garb,
        avg_garb,
    }
}
