//! Verification pipeline for provisioned exercise environments.
//!
//! An exercise environment is a remote machine (or session) reachable through
//! a synchronous command channel. This crate proves that one exercise task
//! behaves correctly across its full lifecycle: the environment can be set
//! up, the workload applies, grading has the right polarity, and teardown is
//! complete enough that repeated setup/teardown cycles are indistinguishable.
//!
//! The entry point is [`pipeline::run_pipeline`]; everything else supports
//! it: [`snapshot`] captures and diffs environment state, [`phases`] holds
//! the individual verification phases, and [`exec`]/[`lifecycle`] define the
//! injected collaborators (command channel and task lifecycle glue).

pub mod config;
pub mod exec;
pub mod lifecycle;
pub mod phases;
pub mod pipeline;
pub mod schema;
pub mod score;
pub mod snapshot;
// Scripted doubles for the test suite; not part of the supported API.
#[doc(hidden)]
pub mod testkit;
