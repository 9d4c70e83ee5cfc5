//! Sensor-average job.
//!
//! ```text
//! source ──round robin──► [tokenize → pre-aggregate] x P ──► average ──► stdout
//! ```
//!
//! Each pre-aggregate task sums `(sensor, value)` samples per sensor until its
//! trigger fires; the final stage merges the partial sums per sensor.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use combinecrab_core::PreAggregateConfig;
use combinecrab_core::channel::{LocalChannelSender, local_channel, local_channel_default};
use combinecrab_core::control::{ControlChannel, TcpControlChannel};
use combinecrab_core::function::{SumCount, SumCountCombine};
use combinecrab_core::operator::{Chain, FlatMapOp, RuntimeContext};
use combinecrab_core::pre_aggregate::PreAggregateOperator;
use combinecrab_core::task::{Task, TaskStats};
use combinecrab_core::types::StreamElement;

type Sample = (u32, f64);

type SensorPreAggregate = PreAggregateOperator<
    u32,
    SumCount,
    Sample,
    (u32, SumCount),
    SumCountCombine,
    fn(&Sample) -> u32,
>;

const SENSORS: u32 = 8;
const SAMPLES_PER_LINE: usize = 4;

/// Default flush threshold; well above the sensor count so bundles combine.
pub const DEFAULT_MAX_COUNT: u64 = 64;

#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub parallelism: usize,
    pub config: PreAggregateConfig,
    pub adaptive: bool,
    pub input: Option<PathBuf>,
    pub records: usize,
    pub pooling: Duration,
}

pub struct DemoReport {
    averages: BTreeMap<u32, SumCount>,
    partials: u64,
    samples: u64,
    stats: Vec<TaskStats>,
    elapsed: Duration,
}

impl DemoReport {
    pub fn print(&self) {
        for (sensor, partial) in &self.averages {
            if let Some(average) = partial.average() {
                println!(
                    "sensor {}: average {:.3} over {} samples",
                    sensor, average, partial.count
                );
            }
        }
        let records_in: u64 = self.stats.iter().map(|s| s.records_in).sum();
        println!(
            "{} line(s), {} sample(s) pre-aggregated into {} partial(s) by {} task(s) in {:?}",
            records_in,
            self.samples,
            self.partials,
            self.stats.len(),
            self.elapsed
        );
    }
}

/// Split `id;value|id;value` into samples, skipping malformed tokens.
pub fn tokenize(line: &String) -> Vec<Sample> {
    line.to_lowercase()
        .split('|')
        .filter(|token| !token.is_empty())
        .filter_map(|token| {
            let mut fields = token.split(';');
            match (fields.next(), fields.next(), fields.next()) {
                (Some(id), Some(value), None) => {
                    match (id.trim().parse(), value.trim().parse()) {
                        (Ok(id), Ok(value)) => Some((id, value)),
                        _ => None,
                    }
                }
                _ => {
                    tracing::trace!("malformed sensor token '{}'", token);
                    None
                }
            }
        })
        .collect()
}

fn sensor_key(sample: &Sample) -> u32 {
    sample.0
}

fn synthetic_line(index: usize) -> String {
    (0..SAMPLES_PER_LINE)
        .map(|slot| {
            let seq = index * SAMPLES_PER_LINE + slot;
            let sensor = (seq as u32) % SENSORS;
            let value = 20.0 + (seq % 17) as f64 * 0.5;
            format!("{};{}", sensor, value)
        })
        .collect::<Vec<_>>()
        .join("|")
}

fn run_source(options: &DemoOptions, inputs: &[LocalChannelSender<String>]) -> Result<()> {
    let mut next = 0usize;
    let mut emit = |line: String| -> Result<()> {
        inputs[next % inputs.len()].send(StreamElement::record(line))?;
        next += 1;
        if !options.pooling.is_zero() {
            thread::sleep(options.pooling);
        }
        Ok(())
    };

    match &options.input {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
            for line in BufReader::new(file).lines() {
                emit(line?)?;
            }
        }
        None => {
            for index in 0..options.records {
                emit(synthetic_line(index))?;
            }
        }
    }
    for input in inputs {
        input.send(StreamElement::End)?;
    }
    Ok(())
}

pub fn run(options: DemoOptions) -> Result<DemoReport> {
    if options.parallelism == 0 {
        return Err(anyhow!("parallelism must be at least 1"));
    }
    options.config.validate()?;
    let started = Instant::now();
    let control: Option<Arc<dyn ControlChannel>> = if options.adaptive {
        Some(Arc::new(TcpControlChannel::new(
            options.config.broker_address.clone(),
        )))
    } else {
        None
    };
    let tick = options
        .config
        .max_time()
        .map(|max_time| (max_time / 2).max(Duration::from_millis(1)));

    let (output_tx, output_rx) = local_channel_default::<(u32, SumCount)>();
    let mut inputs = Vec::with_capacity(options.parallelism);
    let mut handles = Vec::with_capacity(options.parallelism);
    for subtask_index in 0..options.parallelism {
        let (input_tx, input_rx) = local_channel::<String>(256);
        let mut pre_aggregate =
            SensorPreAggregate::new(SumCountCombine, sensor_key, options.config.clone())?;
        if let Some(channel) = &control {
            pre_aggregate = pre_aggregate.with_control_channel(Arc::clone(channel));
        }
        let operator = Chain::new(FlatMapOp::new(tokenize), pre_aggregate);
        let context = RuntimeContext::new("pre-aggregate", subtask_index, options.parallelism);
        let mut task = Task::new(context, input_rx, output_tx.clone(), operator);
        if let Some(interval) = tick {
            task = task.with_tick_interval(interval);
        }
        handles.push(task.spawn()?);
        inputs.push(input_tx);
    }
    drop(output_tx);

    let source = {
        let source_inputs = inputs.clone();
        let source_options = options.clone();
        thread::Builder::new()
            .name("source".to_string())
            .spawn(move || run_source(&source_options, &source_inputs))?
    };
    drop(inputs);

    let mut averages: BTreeMap<u32, SumCount> = BTreeMap::new();
    let mut partials = 0u64;
    let mut ended = 0;
    while ended < options.parallelism {
        match output_rx.recv()? {
            StreamElement::Record(record) => {
                let (sensor, partial) = record.value;
                partials += 1;
                let merged = averages.entry(sensor).or_default();
                *merged = merged.merge(partial);
            }
            StreamElement::Watermark(_) => {}
            StreamElement::End => ended += 1,
        }
    }

    source
        .join()
        .map_err(|_| anyhow!("source thread panicked"))??;
    let mut stats = Vec::with_capacity(handles.len());
    for handle in handles {
        stats.push(handle.join().map_err(|_| anyhow!("task thread panicked"))??);
    }

    let samples = averages.values().map(|partial| partial.count).sum();
    Ok(DemoReport {
        averages,
        partials,
        samples,
        stats,
        elapsed: started.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_skips_malformed_tokens() {
        let line = "1;20.5|2;abc||3;1;2|4;-1.5".to_string();
        assert_eq!(tokenize(&line), vec![(1, 20.5), (4, -1.5)]);
    }

    #[test]
    fn test_synthetic_line_is_tokenizable() {
        let samples = tokenize(&synthetic_line(3));
        assert_eq!(samples.len(), SAMPLES_PER_LINE);
        assert!(samples.iter().all(|(sensor, _)| *sensor < SENSORS));
    }

    #[test]
    fn test_demo_averages_match_direct_computation() {
        let records = 200;
        let mut expected: BTreeMap<u32, SumCount> = BTreeMap::new();
        for index in 0..records {
            for (sensor, value) in tokenize(&synthetic_line(index)) {
                let entry = expected.entry(sensor).or_default();
                *entry = entry.merge(SumCount::of(value));
            }
        }

        let report = run(DemoOptions {
            parallelism: 3,
            config: PreAggregateConfig::new(32),
            adaptive: false,
            input: None,
            records,
            pooling: Duration::ZERO,
        })
        .unwrap();

        assert_eq!(report.samples, (records * SAMPLES_PER_LINE) as u64);
        assert_eq!(
            report.averages.keys().collect::<Vec<_>>(),
            expected.keys().collect::<Vec<_>>()
        );
        for (sensor, partial) in &report.averages {
            let want = expected[sensor];
            assert_eq!(partial.count, want.count);
            assert!((partial.sum - want.sum).abs() < 1e-6);
        }
        assert!(report.partials < report.samples);
    }

    #[test]
    fn test_default_threshold_combines_samples() {
        let records = 500;
        let report = run(DemoOptions {
            parallelism: 2,
            config: PreAggregateConfig::new(DEFAULT_MAX_COUNT),
            adaptive: false,
            input: None,
            records,
            pooling: Duration::ZERO,
        })
        .unwrap();

        assert_eq!(report.samples, (records * SAMPLES_PER_LINE) as u64);
        assert!(report.partials * 4 < report.samples);
    }
}
