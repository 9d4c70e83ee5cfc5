//! Single-threaded task driving one operator instance.
//!
//! # Event Loop
//!
//! ```text
//! open(ctx)
//! loop {
//!     element = input.recv_timeout(until next tick)
//!     match element {
//!         None (tick due)  => operator.on_processing_time(now)
//!         Record(rec)      => operator.process_batch([rec])
//!         Watermark(wm)    => operator.on_timer(wm, EventTime); forward wm
//!         End              => operator.on_end(); forward End; break
//!     }
//!     forward outputs
//! }
//! close()
//! ```

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

use crate::channel::{LocalChannelReceiver, LocalChannelSender};
use crate::operator::{Operator, RuntimeContext, TimerDomain};
use crate::types::{EventTime, StreamData, StreamElement};

/// Counters collected by one task run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub records_in: u64,
    pub records_out: u64,
    pub watermarks: u64,
    pub ticks: u64,
}

pub struct Task<IN, Op: Operator<IN>> {
    context: RuntimeContext,
    input: LocalChannelReceiver<IN>,
    output: LocalChannelSender<Op::OUT>,
    operator: Op,
    tick_interval: Option<Duration>,
    stats: TaskStats,
}

impl<IN, Op> Task<IN, Op>
where
    Op: Operator<IN>,
{
    pub fn new(
        context: RuntimeContext,
        input: LocalChannelReceiver<IN>,
        output: LocalChannelSender<Op::OUT>,
        operator: Op,
    ) -> Self {
        Self {
            context,
            input,
            output,
            operator,
            tick_interval: None,
            stats: TaskStats::default(),
        }
    }

    /// Call `on_processing_time` every `interval` of wall-clock time.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    pub fn context(&self) -> &RuntimeContext {
        &self.context
    }

    /// Run until `End`, then close the operator.
    ///
    /// The operator is closed even when the loop fails; the loop error wins.
    pub fn run(mut self) -> Result<TaskStats> {
        self.operator
            .open(&self.context)
            .with_context(|| format!("failed to open {}", self.context))?;
        let result = self.event_loop();
        let closed = self.operator.close();
        match (result, closed) {
            (Err(err), _) => Err(err.context(format!("task {} failed", self.context))),
            (Ok(()), Err(err)) => Err(err.context(format!("failed to close {}", self.context))),
            (Ok(()), Ok(())) => {
                tracing::info!("task {} finished: {:?}", self.context, self.stats);
                Ok(self.stats)
            }
        }
    }

    fn event_loop(&mut self) -> Result<()> {
        let mut input_batch = Vec::with_capacity(1);
        let mut output_batch = Vec::new();
        let mut next_tick = self.tick_interval.map(|interval| Instant::now() + interval);

        loop {
            let element = match (next_tick, self.tick_interval) {
                (Some(deadline), Some(interval)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.stats.ticks += 1;
                        self.operator
                            .on_processing_time(processing_time(), &mut output_batch)?;
                        self.emit(&mut output_batch)?;
                        next_tick = Some(now + interval);
                        continue;
                    }
                    match self.input.recv_timeout(deadline - now)? {
                        Some(element) => element,
                        None => continue,
                    }
                }
                _ => self.input.recv()?,
            };

            match element {
                StreamElement::Record(record) => {
                    self.stats.records_in += 1;
                    input_batch.clear();
                    input_batch.push(record.value);
                    self.operator.process_batch(&input_batch, &mut output_batch)?;
                    self.emit(&mut output_batch)?;
                }
                StreamElement::Watermark(watermark) => {
                    self.stats.watermarks += 1;
                    self.operator.on_timer(
                        watermark.timestamp,
                        TimerDomain::EventTime,
                        &mut output_batch,
                    )?;
                    self.emit(&mut output_batch)?;
                    self.output.send(StreamElement::Watermark(watermark))?;
                }
                StreamElement::End => {
                    self.operator.on_end(&mut output_batch)?;
                    self.emit(&mut output_batch)?;
                    self.output.send(StreamElement::End)?;
                    return Ok(());
                }
            }
        }
    }

    fn emit(&mut self, batch: &mut Vec<Op::OUT>) -> Result<()> {
        for value in batch.drain(..) {
            self.output.send(StreamElement::record(value))?;
            self.stats.records_out += 1;
        }
        Ok(())
    }
}

impl<IN, Op> Task<IN, Op>
where
    IN: StreamData,
    Op: Operator<IN> + 'static,
    Op::OUT: 'static,
{
    /// Run on a dedicated thread named after the task.
    pub fn spawn(self) -> Result<JoinHandle<Result<TaskStats>>> {
        let name = format!(
            "{}-{}",
            self.context.operator_name, self.context.subtask_index
        );
        Ok(thread::Builder::new().name(name).spawn(move || self.run())?)
    }
}

fn processing_time() -> EventTime {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as EventTime)
}

#[cfg(test)]
#[path = "tests/task_tests.rs"]
mod tests;
