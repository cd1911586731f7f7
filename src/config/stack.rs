use crate::MemSampler;
use clap::{value_parser, Arg, ArgAction, Command};
use csv::Writer;
use hazard::DomainConfig;
use rand::distributions::{Uniform, WeightedIndex};
use std::fmt;
use std::fs::{create_dir_all, File, OpenOptions};
use std::path::Path;
use std::time::Duration;

#[derive(PartialEq, Debug)]
pub enum Op {
    Push,
    Pop,
}

impl Op {
    pub const OPS: [Op; 2] = [Op::Push, Op::Pop];
}

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum PopRate {
    Balanced = 0,
    PushIntensive = 1,
    PopIntensive = 2,
}

impl PopRate {
    /// Weights of [`Op::OPS`].
    pub fn weights(self) -> [u32; 2] {
        match self {
            PopRate::Balanced => [1, 1],
            PopRate::PushIntensive => [3, 1],
            PopRate::PopIntensive => [1, 3],
        }
    }
}

pub struct Config {
    pub threads: usize,
    pub max_threads: usize,
    pub retire_threshold: usize,

    pub aux_thread: usize,
    pub aux_thread_period: Duration,
    pub sampling: bool,
    pub sampling_period: Duration,

    pub pop_rate: PopRate,
    pub op_dist: WeightedIndex<u32>,
    pub value_dist: Uniform<usize>,
    pub prefill: usize,
    pub interval: u64,
    pub duration: Duration,

    pub mem_sampler: MemSampler,
}

impl Config {
    pub fn domain_config(&self) -> DomainConfig {
        DomainConfig::default()
            .max_concurrent_threads(self.max_threads)
            .retire_threshold(self.retire_threshold)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stack: {} threads, g{}, r{}, p{}",
            self.threads, self.pop_rate as u8, self.retire_threshold, self.prefill,
        )
    }
}

pub struct BenchWriter {
    output: Option<Writer<File>>,
}

#[derive(Clone)]
pub struct Perf {
    pub ops_per_sec: u64,
    pub peak_mem: usize,
    pub avg_mem: usize,
    pub peak_garb: usize,
    pub avg_garb: usize,
}

impl fmt::Display for Perf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ops/s: {}, peak mem: {}, avg_mem: {}, peak garb: {}, avg garb: {}",
            self.ops_per_sec,
            readable_bytes(self.peak_mem),
            readable_bytes(self.avg_mem),
            self.peak_garb,
            self.avg_garb
        )
    }
}

fn readable_bytes(num: usize) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut scaled = num as f64;
    for unit in &UNITS[..UNITS.len() - 1] {
        if scaled < 1000.0 {
            return format!("{:.3} {}", scaled, unit);
        }
        scaled /= 1024.0;
    }
    format!("{:.3} {}", scaled, UNITS[UNITS.len() - 1])
}

impl BenchWriter {
    pub fn write_record(self, config: &Config, perf: &Perf) {
        if let Some(mut output) = self.output {
            output
                .write_record(&[
                    config.threads.to_string(),
                    config.max_threads.to_string(),
                    config.retire_threshold.to_string(),
                    (config.pop_rate as u8).to_string(),
                    config.prefill.to_string(),
                    config.sampling_period.as_millis().to_string(),
                    perf.ops_per_sec.to_string(),
                    perf.peak_mem.to_string(),
                    perf.avg_mem.to_string(),
                    perf.peak_garb.to_string(),
                    perf.avg_garb.to_string(),
                    config.interval.to_string(),
                ])
                .unwrap();
            output.flush().unwrap();
        }
    }
}

fn open_output(output_name: &str) -> Writer<File> {
    let output_path = Path::new(output_name);
    if let Some(dir) = output_path.parent() {
        create_dir_all(dir).unwrap();
    }
    match OpenOptions::new().read(true).append(true).open(output_path) {
        Ok(f) => csv::Writer::from_writer(f),
        Err(_) => {
            let f = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(output_path)
                .unwrap();
            let mut output = csv::Writer::from_writer(f);
            // NOTE: `write_record` on `BenchWriter`
            output
                .write_record([
                    "threads",
                    "max_threads",
                    "retire_threshold",
                    "pop_rate",
                    "prefill",
                    "sampling_period",
                    "throughput",
                    "peak_mem",
                    "avg_mem",
                    "peak_garb",
                    "avg_garb",
                    "interval",
                ])
                .unwrap();
            output.flush().unwrap();
            output
        }
    }
}

pub fn command(name: String) -> Command {
    Command::new(name)
        .arg(
            Arg::new("threads")
                .short('t')
                .value_parser(value_parser!(usize))
                .required(true)
                .help("Numbers of threads which push and pop."),
        )
        .arg(
            Arg::new("pop rate")
                .short('g')
                .help(
                    "The proportion of `pop` operations. \
                     0: 50%, 1: 25%, 2: 75%",
                )
                .value_parser(value_parser!(u8).range(0..3))
                .default_value("0"),
        )
        .arg(
            Arg::new("max threads")
                .short('m')
                .value_parser(value_parser!(usize))
                .help("Capacity of the hazard pointer registry")
                .default_value("128"),
        )
        .arg(
            Arg::new("retire threshold")
                .short('r')
                .value_parser(value_parser!(usize))
                .help("Retired nodes per thread that trigger a reclamation pass")
                .default_value("64"),
        )
        .arg(
            Arg::new("prefill")
                .short('p')
                .value_parser(value_parser!(usize))
                .help("Elements pushed before the benchmark starts")
                .default_value("10000"),
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .value_parser(value_parser!(u64))
                .help("Time interval in seconds to run the benchmark")
                .default_value("10"),
        )
        .arg(
            Arg::new("sampling period")
                .short('s')
                .value_parser(value_parser!(u64))
                .help(
                    "The period to query jemalloc stats.allocated and the garbage count (ms). \
                     0 for no sampling.",
                )
                .default_value("1"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .help("Output CSV filename. Appends the data if the file already exists."),
        )
        .arg(
            Arg::new("dry run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Check whether the arguments are parsable, without running a benchmark"),
        )
}

pub fn setup(name: String) -> (Config, BenchWriter) {
    let m = command(name).get_matches();

    let threads = m.get_one::<usize>("threads").copied().unwrap();
    let max_threads = m.get_one::<usize>("max threads").copied().unwrap();
    let retire_threshold = m.get_one::<usize>("retire threshold").copied().unwrap();
    assert!(
        threads >= 1,
        "The number of threads must be greater than zero!"
    );
    assert!(
        threads <= max_threads,
        "The registry must have a slot for every thread!"
    );
    assert!(
        retire_threshold >= 1,
        "The retire threshold must be greater than zero!"
    );

    let pop_rate = match m.get_one::<u8>("pop rate").copied().unwrap() {
        0 => PopRate::Balanced,
        1 => PopRate::PushIntensive,
        2 => PopRate::PopIntensive,
        _ => unreachable!("pop_rate is invalid"),
    };
    let op_dist = WeightedIndex::new(pop_rate.weights()).unwrap();
    let prefill = m.get_one::<usize>("prefill").copied().unwrap();
    let interval = m.get_one::<u64>("interval").copied().unwrap();
    let sampling_period = m.get_one::<u64>("sampling period").copied().unwrap();
    let sampling = sampling_period > 0;
    let duration = Duration::from_secs(interval);

    let output = m
        .get_one::<String>("output")
        .map(|output_name| open_output(output_name));
    let mem_sampler = MemSampler::new();
    let config = Config {
        threads,
        max_threads,
        retire_threshold,

        aux_thread: if sampling { 1 } else { 0 },
        aux_thread_period: Duration::from_millis(1),
        sampling,
        sampling_period: Duration::from_millis(sampling_period),

        pop_rate,
        op_dist,
        value_dist: Uniform::new(0, 100000),
        prefill,
        interval,
        duration,

        mem_sampler,
    };

    if m.get_flag("dry run") {
        std::process::exit(0);
    }

    (config, BenchWriter { output })
}
