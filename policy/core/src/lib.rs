// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `gatekeeper-core` — Code-Signing Assessment Policy Engine
//!
//! Decides whether system policy allows executing, installing or opening a
//! filesystem object.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | Rules, requirements, assessment types, collaborator traits |
//! | [`application`] | Application | `PolicyEngine`, `EvaluationTask`, `EvaluationManager`, `AssessmentService` |
//! | [`infrastructure`] | Infrastructure | SQLite rule store, preferences files, signature/ticket/scheduler adapters |
//!
//! Concurrent requests for the same `(path, operation)` pair are coalesced
//! into a single evaluation by the [`application::evaluation_manager::EvaluationManager`].

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
