//! `ember-query` is the query and hardware performance-counter engine of the
//! EmberGPU command-stream driver.
//!
//! Clients ask the device to measure events (occlusion samples, primitives,
//! stream-output byte counts, elapsed time, per-multiprocessor performance
//! counters) without stalling the CPU, and fetch the results once the device
//! has produced them. The engine coordinates three timelines — CPU issue
//! order, GPU execution order and asynchronous completion — while
//! multiplexing eight hardware counter slots among arbitrarily many logical
//! queries and recycling a bounded pool of result-staging memory.
//!
//! The engine consumes its surroundings through traits: command emission via
//! [`CmdSink`], buffer and fence primitives via [`DeviceMemory`] / [`Fence`].
//! It exposes the query lifecycle ([`DeviceContext::create_query`] through
//! [`DeviceContext::query_result`]), GPU-side predicated rendering
//! ([`DeviceContext::set_render_condition`]) and capability discovery
//! ([`DeviceContext::enumerate_counters`]).

pub mod alloc;
pub mod backend;
pub mod cmd;
pub mod metric;
pub mod perf;
pub mod stats;

mod condition;
mod context;
mod error;
mod query;

pub use backend::{
    DeviceError, DeviceMemory, Fence, FenceRef, HostFence, ImmediateFence, StagingBuffer,
    SystemMemory,
};
pub use cmd::{Access, CmdSink, CondMode, Method, NullSink};
pub use condition::CondRenderMode;
pub use context::{CounterInfo, DeviceCaps, DeviceContext, RenderCondition};
pub use error::QueryError;
pub use metric::MetricOp;
pub use perf::PerfCounter;
pub use query::{Query, QueryKind, QueryResult, QueryState};
pub use stats::{DriverStat, DriverStats};
