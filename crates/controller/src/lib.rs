/*
 * Networkmachinery - NetworkPerformanceTest Controller
 * Copyright (C) 2025 Networkmachinery
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! NetworkPerformanceTest controller library
//!
//! This crate provides the CRD, the reconciliation state machine that drives a
//! network performance test pod to completion, the admission webhook that guards
//! the test spec, and Lease-based leader election for HA deployments.

pub mod crds;
pub mod leader_election;
pub mod tasks;
pub mod webhook;

// Re-export commonly used types
pub use crds::{
    NetworkPerformanceTest, NetworkPerformanceTestOutput, NetworkPerformanceTestPhase,
    NetworkPerformanceTestSpec, NetworkPerformanceTestStatus, ResultTable,
};
pub use tasks::config::ControllerConfig;
pub use tasks::{run_task_controller, Context, Error, Result};

/// Controller name, used as field manager, event reporter, and worker service account
pub const CONTROLLER_NAME: &str = "networkperformance-test-controller";
