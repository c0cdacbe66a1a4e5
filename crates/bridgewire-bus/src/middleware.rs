//! # Middleware Pipelines
//!
//! Ordered transform chains applied to inbound and outbound payloads.
//!
//! Each stage returns a [`StageResult`]: `Ok(Transform::Replace(p))` hands `p`
//! to the next stage, `Ok(Transform::Keep)` passes the current payload along,
//! and `Err(_)` fails open: the stage's output is discarded, the previous
//! payload is kept, and the failure is logged. A failing stage never aborts
//! the pipeline and never reaches a publisher or subscriber.

use bridgewire_telemetry::{metric_inc, MIDDLEWARE_FAILURES};
use bridgewire_types::{Payload, Sender, ValueKind};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Why a stage produced no usable payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MiddlewareError {
    /// The stage produced a value that is not an argument list.
    #[error("stage returned a non-structured value ({found})")]
    NotStructured { found: ValueKind },

    /// The stage reported its own failure.
    #[error("stage failed: {0}")]
    Failed(String),
}

/// Successful stage outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    /// Continue with this payload.
    Replace(Payload),
    /// Continue with the payload the stage received.
    Keep,
}

impl Transform {
    /// Interpret a dynamically produced value. Only an array is a payload.
    pub fn from_value(value: Value) -> StageResult {
        match value {
            Value::Array(args) => Ok(Transform::Replace(Payload::new(args))),
            other => Err(MiddlewareError::NotStructured {
                found: ValueKind::of(&other),
            }),
        }
    }
}

pub type StageResult = Result<Transform, MiddlewareError>;

/// Inbound stage: sees the sender and the current payload.
pub trait InboundMiddleware: Send + Sync {
    fn apply(&self, sender: &Sender, payload: &Payload) -> StageResult;
}

impl<F> InboundMiddleware for F
where
    F: Fn(&Sender, &Payload) -> StageResult + Send + Sync,
{
    fn apply(&self, sender: &Sender, payload: &Payload) -> StageResult {
        self(sender, payload)
    }
}

/// Outbound stage: sees only the current payload.
pub trait OutboundMiddleware: Send + Sync {
    fn apply(&self, payload: &Payload) -> StageResult;
}

impl<F> OutboundMiddleware for F
where
    F: Fn(&Payload) -> StageResult + Send + Sync,
{
    fn apply(&self, payload: &Payload) -> StageResult {
        self(payload)
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

fn settle(
    direction: Direction,
    channel: &str,
    stage: usize,
    current: Payload,
    result: StageResult,
) -> Payload {
    match result {
        Ok(Transform::Replace(next)) => next,
        Ok(Transform::Keep) => current,
        Err(error) => {
            metric_inc!(MIDDLEWARE_FAILURES, &[direction.label()]);
            warn!(
                channel = %channel,
                direction = direction.label(),
                stage,
                error = %error,
                "Middleware stage failed open, keeping previous payload"
            );
            current
        }
    }
}

/// Ordered inbound chain. Replaced wholesale via `Bridge::set_inbound_middleware`.
#[derive(Clone, Default)]
pub struct InboundPipeline {
    stages: Vec<Arc<dyn InboundMiddleware>>,
}

impl InboundPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage (builder style).
    #[must_use]
    pub fn stage(mut self, stage: impl InboundMiddleware + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order.
    pub fn run(&self, channel: &str, sender: &Sender, payload: Payload) -> Payload {
        self.stages
            .iter()
            .enumerate()
            .fold(payload, |current, (index, stage)| {
                let result = stage.apply(sender, &current);
                settle(Direction::Inbound, channel, index, current, result)
            })
    }
}

impl From<Vec<Arc<dyn InboundMiddleware>>> for InboundPipeline {
    fn from(stages: Vec<Arc<dyn InboundMiddleware>>) -> Self {
        Self { stages }
    }
}

impl fmt::Debug for InboundPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundPipeline")
            .field("stages", &self.stages.len())
            .finish()
    }
}

/// Ordered outbound chain. Replaced wholesale via `Bridge::set_outbound_middleware`.
#[derive(Clone, Default)]
pub struct OutboundPipeline {
    stages: Vec<Arc<dyn OutboundMiddleware>>,
}

impl OutboundPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage (builder style).
    #[must_use]
    pub fn stage(mut self, stage: impl OutboundMiddleware + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order.
    pub fn run(&self, channel: &str, payload: Payload) -> Payload {
        self.stages
            .iter()
            .enumerate()
            .fold(payload, |current, (index, stage)| {
                let result = stage.apply(&current);
                settle(Direction::Outbound, channel, index, current, result)
            })
    }
}

impl From<Vec<Arc<dyn OutboundMiddleware>>> for OutboundPipeline {
    fn from(stages: Vec<Arc<dyn OutboundMiddleware>>) -> Self {
        Self { stages }
    }
}

impl fmt::Debug for OutboundPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundPipeline")
            .field("stages", &self.stages.len())
            .finish()
    }
}
