// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Value types and collaborator contracts shared by every layer.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Defines the assessment vocabulary

pub mod assessment;
pub mod authorization;
pub mod clock;
pub mod config;
pub mod errors;
pub mod events;
pub mod repository;
pub mod requirement;
pub mod result;
pub mod rule;
pub mod scheduler;
pub mod signature;
