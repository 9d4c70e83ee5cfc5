//! Runtime-facing operator contract.
//!
//! Operators are batch + push based: the task hands a slice of input values
//! and a reusable output buffer, and the operator pushes whatever it emits.
//! Lifecycle hooks (`open`, `on_end`, `close`) let stateful operators such as
//! the pre-aggregate stage allocate and release per-instance resources.

use std::fmt;

use anyhow::Result;

use crate::types::{EventTime, SubtaskIndex};

/// Timer domain for unified timer callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerDomain {
    /// Event-time timer (usually driven by watermarks).
    EventTime,
    /// Processing-time timer (driven by wall-clock ticks).
    ProcessingTime,
}

/// What the host engine tells an operator instance about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContext {
    pub operator_name: String,
    pub subtask_index: SubtaskIndex,
    pub parallelism: usize,
}

impl RuntimeContext {
    pub fn new(operator_name: impl Into<String>, subtask_index: SubtaskIndex, parallelism: usize) -> Self {
        Self {
            operator_name: operator_name.into(),
            subtask_index,
            parallelism,
        }
    }
}

impl fmt::Display for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}/{})",
            self.operator_name,
            self.subtask_index + 1,
            self.parallelism
        )
    }
}

/// Operator driven by a [`Task`](crate::task::Task).
///
/// `OUT` is an associated type so chains can be composed at the type level.
pub trait Operator<IN>: Send {
    /// Output type of this operator.
    type OUT: Send;

    /// Called once before the first record.
    fn open(&mut self, _ctx: &RuntimeContext) -> Result<()> {
        Ok(())
    }

    /// Process a batch of input records, pushing outputs to the provided buffer.
    ///
    /// The output buffer is reused across batches (caller clears it).
    fn process_batch(&mut self, input: &[IN], output: &mut Vec<Self::OUT>) -> Result<()>;

    /// Unified timer callback, routed to the domain-specific hooks.
    fn on_timer(
        &mut self,
        timestamp: EventTime,
        domain: TimerDomain,
        output: &mut Vec<Self::OUT>,
    ) -> Result<()> {
        match domain {
            TimerDomain::EventTime => self.on_event_time(timestamp, output),
            TimerDomain::ProcessingTime => self.on_processing_time(timestamp, output),
        }
    }

    fn on_event_time(
        &mut self,
        _event_time: EventTime,
        _output: &mut Vec<Self::OUT>,
    ) -> Result<()> {
        Ok(())
    }

    fn on_processing_time(
        &mut self,
        _processing_time: EventTime,
        _output: &mut Vec<Self::OUT>,
    ) -> Result<()> {
        Ok(())
    }

    /// Input is exhausted. Emit anything still buffered.
    fn on_end(&mut self, _output: &mut Vec<Self::OUT>) -> Result<()> {
        Ok(())
    }

    /// Release resources. Called once, after the last callback.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Chain: two operators run back to back in one task
// ============================================================================

/// `Head` feeds `Tail` without leaving the task thread.
pub struct Chain<Head, Tail> {
    head: Head,
    tail: Tail,
}

impl<Head, Tail> Chain<Head, Tail> {
    pub fn new(head: Head, tail: Tail) -> Self {
        Self { head, tail }
    }

    pub fn head(&self) -> &Head {
        &self.head
    }

    pub fn tail(&self) -> &Tail {
        &self.tail
    }
}

impl<IN, Head, Tail> Operator<IN> for Chain<Head, Tail>
where
    Head: Operator<IN>,
    Tail: Operator<Head::OUT>,
{
    type OUT = Tail::OUT;

    fn open(&mut self, ctx: &RuntimeContext) -> Result<()> {
        self.head.open(ctx)?;
        self.tail.open(ctx)
    }

    fn process_batch(&mut self, input: &[IN], output: &mut Vec<Self::OUT>) -> Result<()> {
        let mut intermediate = Vec::with_capacity(input.len());
        self.head.process_batch(input, &mut intermediate)?;
        if intermediate.is_empty() {
            return Ok(());
        }
        self.tail.process_batch(&intermediate, output)
    }

    fn on_timer(
        &mut self,
        timestamp: EventTime,
        domain: TimerDomain,
        output: &mut Vec<Self::OUT>,
    ) -> Result<()> {
        let mut intermediate = Vec::new();
        self.head.on_timer(timestamp, domain, &mut intermediate)?;
        if !intermediate.is_empty() {
            self.tail.process_batch(&intermediate, output)?;
        }
        self.tail.on_timer(timestamp, domain, output)
    }

    fn on_processing_time(
        &mut self,
        processing_time: EventTime,
        output: &mut Vec<Self::OUT>,
    ) -> Result<()> {
        self.on_timer(processing_time, TimerDomain::ProcessingTime, output)
    }

    fn on_event_time(&mut self, event_time: EventTime, output: &mut Vec<Self::OUT>) -> Result<()> {
        self.on_timer(event_time, TimerDomain::EventTime, output)
    }

    fn on_end(&mut self, output: &mut Vec<Self::OUT>) -> Result<()> {
        let mut intermediate = Vec::new();
        self.head.on_end(&mut intermediate)?;
        if !intermediate.is_empty() {
            self.tail.process_batch(&intermediate, output)?;
        }
        self.tail.on_end(output)
    }

    fn close(&mut self) -> Result<()> {
        let head = self.head.close();
        let tail = self.tail.close();
        head.and(tail)
    }
}

/// Transforms each input to zero or more outputs.
pub struct FlatMapOp<F> {
    f: F,
}

impl<F> FlatMapOp<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, IN, OUT, I> Operator<IN> for FlatMapOp<F>
where
    F: FnMut(&IN) -> I + Send,
    I: IntoIterator<Item = OUT>,
    OUT: Send,
{
    type OUT = OUT;

    fn process_batch(&mut self, input: &[IN], output: &mut Vec<OUT>) -> Result<()> {
        for item in input {
            output.extend((self.f)(item));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/operator_tests.rs"]
mod tests;
