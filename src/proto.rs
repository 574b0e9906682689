//! Generated protobuf types and client for `auditpulse.v1.RealtimeFeed`.
//!
//! Compiled from `proto/realtime.proto` by the build script. The server
//! half (`realtime_feed_server`) is generated too, for backends and tests.

tonic::include_proto!("auditpulse.v1");
