//! # rtscribe-core
//!
//! Foundation types shared by every rtscribe crate:
//!
//! - Branded ID newtypes ([`ConnectionId`], [`SessionId`])
//! - Channel wire messages pushed to the remote peer ([`ChannelMessage`])
//! - `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod wire;

pub use ids::{ConnectionId, SessionId};
pub use wire::{ChannelMessage, SegmentMessage, StatusMessage};
