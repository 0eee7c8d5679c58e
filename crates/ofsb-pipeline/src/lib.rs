//! # ofsb-pipeline: Async Southbound Engine
//!
//! Programs OpenFlow devices: flow and group changes go in, ordered and
//! correlated device messages go out, and device replies come back as the
//! results of the submitted operations.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Southbound Pipeline                                 │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                SouthboundPipeline (facade)                       │  │
//! │  │  submit_add / submit_update / submit_remove                      │  │
//! │  │  submit_group_* / submit_group_*_batch / send_barrier            │  │
//! │  │  handle_event(ChangeEvent)                                       │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │   JobSerializer: one FIFO worker per device                      │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               ▼                                         │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  FlowService   │  │  GroupService  │  │  Batch/Barrier         │    │
//! │  │  + Dependency  │  │                │  │  composer              │    │
//! │  │    Resolver    │  │                │  │                        │    │
//! │  └───────┬────────┘  └───────┬────────┘  └───────────┬────────────┘    │
//! │          └───────────────────┼───────────────────────┘                 │
//! │                              ▼                                          │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │   OutboundChannel ─► DeviceConnection ─► WireCodec ─► device     │  │
//! │  │                         └─ TransactionRegistry (xid ─► reply)    │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  STATE:                                                                │
//! │  • DeviceGroupRegistry - groups confirmed on each device               │
//! │  • DeviceFlowRegistry  - FlowHash ─► FlowDescriptor per device         │
//! │  • ConfigStore         - configured groups, stale-flow markers         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pipeline`] - `SouthboundPipeline` facade and device lifecycle
//! - [`serializer`] - Per-device job queues
//! - [`resolver`] - Group dependency resolution
//! - [`batch`] - Batch and barrier settlement
//! - [`flow_service`] / [`group_service`] - Job bodies
//! - [`channel`] - `OutboundChannel` and the queue-backed `DeviceConnection`
//! - [`transaction`] - Pending requests keyed by xid
//! - [`registry`] - Device group and flow registries
//! - [`protocol`] / [`codec`] - Messages and their wire encoding
//! - [`store`] - Configuration store boundary
//! - [`events`] - Change notifications
//! - [`config`] - TOML configuration with env overrides
//! - [`error`] - Pipeline error types
//! - [`telemetry`] - Tracing setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ofsb_pipeline::{DeviceConnection, InMemoryConfigStore, JsonCodec, PipelineConfig, SouthboundPipeline};
//!
//! let config = PipelineConfig::load_or_default(None);
//! let pipeline = SouthboundPipeline::new(config.clone(), Arc::new(InMemoryConfigStore::new()))?;
//!
//! // `wire` is the sender half feeding the device's byte stream
//! let conn = DeviceConnection::open(device_id, Arc::new(JsonCodec), wire, &config);
//! pipeline.attach_device(Arc::new(conn.clone())).await?;
//!
//! let outcome = pipeline.submit_add(path, flow).await?;
//! println!("installed as {}", outcome.descriptor.flow_id);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod batch;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod flow_service;
pub mod group_service;
pub mod pipeline;
pub mod protocol;
pub mod registry;
pub mod resolver;
pub mod serializer;
pub mod store;
pub mod telemetry;
pub mod transaction;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use batch::{BatchFailure, BatchStep};
pub use channel::{DeviceConnection, OutboundChannel, PendingReply};
pub use codec::{JsonCodec, WireCodec};
pub use config::{DeviceSettings, PipelineConfig, TransactionSettings};
pub use error::{PipelineError, PipelineResult};
pub use events::ChangeEvent;
pub use flow_service::FlowOutcome;
pub use pipeline::SouthboundPipeline;
pub use protocol::{Envelope, ErrorMsg, FlowMod, FlowModCommand, GroupMod, GroupModCommand, OfMessage};
pub use resolver::{GroupExistsRule, ResolveOutcome};
pub use store::{ConfigStore, InMemoryConfigStore, StaleFlowMarker};
pub use transaction::TransactionRegistry;
