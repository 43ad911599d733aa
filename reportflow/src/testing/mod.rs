//! Testing utilities for reportflow pipelines.
//!
//! This module provides:
//! - Scripted collaborators (static, scripted, slow, probing)
//! - A store that injects write failures
//! - Standard-pipeline fixtures
//! - Assertions over execution reports

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_artifacts_absent, assert_run_status, assert_run_succeeded, assert_stage_failed_with,
    assert_stage_order, assert_stage_status,
};
pub use fixtures::{
    sample_bundle, sample_inputs, standard_with, static_collaborators, static_standard,
    test_policies,
};
pub use mocks::{
    FailingPutStore, RecordingCollaborator, ScriptedCollaborator, SlowCollaborator, StaticCollaborator,
};
