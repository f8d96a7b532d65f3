//! An EEVDF (Earliest Eligible Virtual Deadline First) run queue core:
//! virtual-time bookkeeping, eligibility/deadline request issuance, and a
//! trace-replay harness for validating against a kernel reference log.
//!
//! The five operations in [`RunQueue`] (`place`, `dequeue`, `change_weight`,
//! `tick`, `pick`) are the whole of the scheduling core. Everything else
//! (entity lifetime, the request index, fixed-point virtual time, the
//! configuration surface, and replay) exists to support them.

pub mod config;
pub mod entity;
pub mod error;
pub mod fixed;
pub mod index;
pub mod replay;
pub mod runqueue;

pub use config::{SchedConfig, Variant, DEFAULT_SLICE_NS, DEFAULT_WEIGHT};
pub use entity::{Entity, EntityId, Request};
pub use error::{SchedError, SchedResult};
pub use fixed::Fixed;
pub use index::{BTreeRequestIndex, RequestIndex};
pub use replay::{replay_trace, Discrepancy, DiscrepancyKind, TraceEvent};
pub use runqueue::RunQueue;
