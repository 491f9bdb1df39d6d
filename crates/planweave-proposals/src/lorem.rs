//! Deterministic placeholder stream for the test environment
//!
//! When the runtime environment is `test`, the describe driver emits this
//! fixed word stream instead of opening a provider connection, following
//! the same protocol as a real run that made no plan.

use chrono::Utc;
use uuid::Uuid;

use crate::models::PlanDescription;
use crate::stream::{OnStream, DESCRIPTION_PHASE, STREAM_FINISHED};

const LOREM_IPSUM: &str = "Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed do \
eiusmod tempor incididunt ut labore et dolore magna aliqua. Ut enim ad minim veniam, quis \
nostrud exercitation ullamco laboris nisi ut aliquip ex ea commodo consequat. Duis aute \
irure dolor in reprehenderit in voluptate velit esse cillum dolore eu fugiat nulla \
pariatur.";

/// Drive the callback through a full no-plan run with fixed content
pub fn stream_placeholder(proposal_id: Uuid, on_stream: &OnStream) {
    on_stream(&proposal_id.to_string(), None);

    for word in LOREM_IPSUM.split_whitespace() {
        on_stream(&format!("{word} "), None);
    }

    on_stream(DESCRIPTION_PHASE, None);
    let description = PlanDescription::no_plan(Utc::now(), None);
    if let Ok(frame) = serde_json::to_string(&description) {
        on_stream(&frame, None);
    }
    on_stream(STREAM_FINISHED, None);
}
