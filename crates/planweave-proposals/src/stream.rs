//! Stream protocol to the caller
//!
//! The pipeline drives a single callback with opaque text payloads plus a
//! small set of sentinel frames marking phase transitions. Errors arrive as
//! an empty payload with the error set, and terminate the stream.

use std::sync::Arc;

use crate::error::ProposalError;

/// Sentinel: describe phase finished, description frame follows
pub const DESCRIPTION_PHASE: &str = "__DESCRIPTION_PHASE__";

/// Sentinel: per-file build streams follow
pub const BUILD_PHASE: &str = "__BUILD_PHASE__";

/// Terminal sentinel: the stream completed
pub const STREAM_FINISHED: &str = "__STREAM_FINISHED__";

const FILE_FINISHED_PREFIX: &str = "__FILE_FINISHED__:";

/// Per-file completion marker emitted when a built file is committed
pub fn file_finished_marker(path: &str) -> String {
    format!("{FILE_FINISHED_PREFIX}{path}")
}

/// Parse a per-file completion marker back into its path
pub fn parse_file_finished_marker(payload: &str) -> Option<&str> {
    payload.strip_prefix(FILE_FINISHED_PREFIX)
}

/// Callback the pipeline drives with stream payloads
///
/// Exactly one terminal delivery happens per accepted request: either the
/// `STREAM_FINISHED` sentinel or a payload-less error.
pub type OnStream = Arc<dyn Fn(&str, Option<ProposalError>) + Send + Sync>;
