//! Adaptive local pre-aggregation.
//!
//! [`PreAggregateOperator`] sits in front of a keyed shuffle. Records are
//! folded per key into a [`Bundle`] with the user's [`CombineFunction`]; when
//! the trigger fires the bundle is handed to `collect`, the partial
//! aggregates go downstream and the bundle starts over.
//!
//! ```text
//! record ──► key_selector ──► bundle.merge(add_input) ──► trigger.on_element
//!                                                              │ Fire
//!                                                              ▼
//!                              output ◄── collect(bundle) ◄── flush
//!
//! control topic ──► ControlListener ──► AdaptiveController ──► trigger.max_count
//! ```
//!
//! The record path and the control path share only the trigger, whose
//! threshold is atomic. The listener runs on its own thread from `open` to
//! `close`.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::bundle::Bundle;
use crate::config::PreAggregateConfig;
use crate::control::{ControlChannel, ControlListener, topic_for};
use crate::controller::AdaptiveController;
use crate::error::{CombinePhase, PreAggregateError};
use crate::function::CombineFunction;
use crate::metrics::{self, LatencyHistogram};
use crate::operator::{Operator, RuntimeContext};
use crate::trigger::{CountTrigger, PreAggregateTrigger, TriggerControl};
use crate::types::EventTime;

/// Operator that combines records per key before the shuffle.
///
/// - `K`, `V`, `IN`, `OUT`: see [`CombineFunction`]
/// - `F`: the combine function
/// - `KF`: key selector, `Fn(&IN) -> K`
/// - `TR`: flush trigger, [`CountTrigger`] unless replaced
pub struct PreAggregateOperator<K, V, IN, OUT, F, KF, TR = CountTrigger> {
    function: F,
    key_selector: KF,
    config: PreAggregateConfig,
    trigger: Arc<TR>,
    bundle: Bundle<K, V>,
    histogram: LatencyHistogram,
    last_flush: Instant,
    control_channel: Option<Arc<dyn ControlChannel>>,
    controller: Option<Arc<AdaptiveController>>,
    listener: Option<ControlListener>,
    context: Option<RuntimeContext>,
    flush_count: u64,
    _marker: PhantomData<fn(IN) -> OUT>,
}

impl<K, V, IN, OUT, F, KF> PreAggregateOperator<K, V, IN, OUT, F, KF, CountTrigger>
where
    K: Eq + std::hash::Hash,
{
    /// Build an operator with a [`CountTrigger`] described by `config`.
    pub fn new(function: F, key_selector: KF, config: PreAggregateConfig) -> Result<Self> {
        let trigger = Arc::new(CountTrigger::from_config(&config)?);
        Self::with_trigger(function, key_selector, config, trigger)
    }
}

impl<K, V, IN, OUT, F, KF, TR> PreAggregateOperator<K, V, IN, OUT, F, KF, TR>
where
    K: Eq + std::hash::Hash,
{
    /// Build an operator around a caller-supplied trigger.
    pub fn with_trigger(
        function: F,
        key_selector: KF,
        config: PreAggregateConfig,
        trigger: Arc<TR>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            function,
            key_selector,
            histogram: LatencyHistogram::new(config.histogram_window),
            config,
            trigger,
            bundle: Bundle::new(),
            last_flush: Instant::now(),
            control_channel: None,
            controller: None,
            listener: None,
            context: None,
            flush_count: 0,
            _marker: PhantomData,
        })
    }

    /// Subscribe to threshold adjustments on `channel` when opened.
    ///
    /// Without a channel the operator runs with a static threshold.
    pub fn with_control_channel(mut self, channel: Arc<dyn ControlChannel>) -> Self {
        self.control_channel = Some(channel);
        self
    }

    pub fn config(&self) -> &PreAggregateConfig {
        &self.config
    }

    pub fn trigger(&self) -> &Arc<TR> {
        &self.trigger
    }

    pub fn bundle(&self) -> &Bundle<K, V> {
        &self.bundle
    }

    pub fn histogram(&self) -> &LatencyHistogram {
        &self.histogram
    }

    pub fn controller(&self) -> Option<&Arc<AdaptiveController>> {
        self.controller.as_ref()
    }

    pub fn context(&self) -> Option<&RuntimeContext> {
        self.context.as_ref()
    }

    /// Topic of the running control listener, if any.
    pub fn control_topic(&self) -> Option<&str> {
        self.listener.as_ref().map(ControlListener::topic)
    }

    /// Whether a control listener is running.
    pub fn is_adaptive(&self) -> bool {
        self.listener
            .as_ref()
            .is_some_and(ControlListener::is_running)
    }

    /// Number of flushes since construction.
    pub fn flush_count(&self) -> u64 {
        self.flush_count
    }

    fn subtask_index(&self) -> usize {
        self.context.as_ref().map_or(0, |ctx| ctx.subtask_index)
    }

    fn stop_listener(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.stop();
            tracing::info!(
                "subtask[{}] control listener on '{}' stopped",
                self.subtask_index(),
                listener.topic()
            );
        }
    }
}

impl<K, V, IN, OUT, F, KF, TR> PreAggregateOperator<K, V, IN, OUT, F, KF, TR>
where
    K: Eq + std::hash::Hash,
    IN: Clone,
    F: CombineFunction<K, V, IN, OUT>,
    KF: Fn(&IN) -> K,
    TR: PreAggregateTrigger<IN> + 'static,
{
    /// Fold one record into the bundle and flush if the trigger fires.
    pub fn process_element(&mut self, input: &IN, output: &mut Vec<OUT>) -> Result<()> {
        let key = (self.key_selector)(input);
        let function = &mut self.function;
        self.bundle
            .merge(key, |accumulator| function.add_input(accumulator, input.clone()))
            .context(PreAggregateError::Combine(CombinePhase::AddInput))?;

        if self.trigger.on_element(input).is_fire() {
            self.flush(output)?;
        }
        Ok(())
    }

    /// Emit the bundle downstream and start a new one.
    ///
    /// An empty bundle emits nothing, but the trigger is still reset and the
    /// interval is still recorded. If `collect` fails, everything it pushed is
    /// removed from `output` and the bundle is kept.
    pub fn flush(&mut self, output: &mut Vec<OUT>) -> Result<()> {
        let emitted_from = output.len();
        let keys = self.bundle.len();
        if !self.bundle.is_empty() {
            if let Err(err) = self.function.collect(&self.bundle, output) {
                output.truncate(emitted_from);
                return Err(err.context(PreAggregateError::Combine(CombinePhase::Collect)));
            }
            self.bundle.clear();
        }
        self.trigger.reset();

        let now = Instant::now();
        let interval_ms = now.duration_since(self.last_flush).as_millis() as u64;
        self.last_flush = now;
        self.histogram.update(interval_ms);
        self.flush_count += 1;

        let emitted = output.len() - emitted_from;
        metrics::record_flush_interval(interval_ms);
        metrics::record_flush(keys, emitted);
        tracing::debug!(
            "subtask[{}] flushed {} key(s), {} record(s) after {}ms",
            self.subtask_index(),
            keys,
            emitted,
            interval_ms
        );
        Ok(())
    }

    /// Time-based firing: flush unconditionally.
    pub fn time_trigger(&mut self, output: &mut Vec<OUT>) -> Result<()> {
        if self.trigger.time_trigger().is_fire() {
            self.flush(output)?;
        }
        Ok(())
    }

    fn start_control_listener(&mut self, ctx: &RuntimeContext, controller: &Arc<AdaptiveController>) {
        let Some(topic) = topic_for(
            self.config.strategy,
            &self.config.control_topic,
            ctx.subtask_index,
        ) else {
            tracing::warn!(
                "{}: strategy {} has no control topic, running with static threshold",
                ctx,
                self.config.strategy
            );
            return;
        };
        let Some(channel) = self.control_channel.as_ref() else {
            tracing::info!("{}: no control channel, running with static threshold", ctx);
            return;
        };

        let started = channel
            .subscribe(&topic)
            .and_then(|subscription| ControlListener::spawn(subscription, Arc::clone(controller)));
        match started {
            Ok(listener) => {
                tracing::info!("{}: listening for adjustments on '{}'", ctx, topic);
                self.listener = Some(listener);
            }
            Err(err) => tracing::warn!(
                "{}: control channel unavailable, running with static threshold: {:#}",
                ctx,
                err
            ),
        }
    }
}

impl<K, V, IN, OUT, F, KF, TR> Operator<IN> for PreAggregateOperator<K, V, IN, OUT, F, KF, TR>
where
    K: Eq + std::hash::Hash + Send,
    V: Send,
    IN: Clone,
    OUT: Send,
    F: CombineFunction<K, V, IN, OUT>,
    KF: Fn(&IN) -> K + Send,
    TR: PreAggregateTrigger<IN> + 'static,
{
    type OUT = OUT;

    fn open(&mut self, ctx: &RuntimeContext) -> Result<()> {
        self.stop_listener();
        self.bundle.clear();
        self.trigger.reset();
        self.histogram = LatencyHistogram::new(self.config.histogram_window);
        self.last_flush = Instant::now();
        self.context = Some(ctx.clone());

        let shared: Arc<dyn TriggerControl> = self.trigger.clone();
        let controller = Arc::new(AdaptiveController::new(shared, ctx.subtask_index));
        self.start_control_listener(ctx, &controller);
        self.controller = Some(controller);

        tracing::info!("{} opened: {}", ctx, self.trigger.explain());
        Ok(())
    }

    fn process_batch(&mut self, input: &[IN], output: &mut Vec<OUT>) -> Result<()> {
        for item in input {
            self.process_element(item, output)?;
        }
        Ok(())
    }

    fn on_processing_time(&mut self, _processing_time: EventTime, output: &mut Vec<OUT>) -> Result<()> {
        let Some(max_time) = self.trigger.max_time() else {
            return Ok(());
        };
        if self.last_flush.elapsed() >= max_time {
            self.time_trigger(output)?;
        }
        Ok(())
    }

    fn on_end(&mut self, output: &mut Vec<OUT>) -> Result<()> {
        if self.bundle.is_empty() {
            return Ok(());
        }
        self.flush(output)
    }

    fn close(&mut self) -> Result<()> {
        self.stop_listener();
        self.controller = None;
        let dropped = self.bundle.len();
        self.bundle = Bundle::new();
        if dropped > 0 {
            tracing::warn!(
                "subtask[{}] closed with {} unflushed key(s)",
                self.subtask_index(),
                dropped
            );
        }
        tracing::info!(
            "subtask[{}] pre-aggregate closed after {} flush(es)",
            self.subtask_index(),
            self.flush_count
        );
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/pre_aggregate_tests.rs"]
mod tests;
