//! Application-level orchestration utilities.
//!
//! This module owns the query lifecycle (submit/cancel/clear, timers, deadline)
//! and post-query processing such as summaries and file exports. UI/CLI layers
//! call into this module to keep responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::{run_controller, UiCommand};
pub(crate) use post_process::{process_completion, ExportTargets};
