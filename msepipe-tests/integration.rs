//! Integration tests for msepipe
//!
//! These tests drive append pipelines through their public handle with the
//! scripted demuxer and recording client from `msepipe_core::sim`, and run
//! the seek coordinator against a real append.

#[path = "integration/common.rs"]
mod common;

#[path = "integration/abort_flow.rs"]
mod abort_flow;
#[path = "integration/append_flow.rs"]
mod append_flow;
#[path = "integration/seek_flow.rs"]
mod seek_flow;
#[path = "integration/state_properties.rs"]
mod state_properties;
#[path = "integration/stream_wiring.rs"]
mod stream_wiring;
