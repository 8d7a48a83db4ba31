// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the gkctl CLI

pub mod assess;
pub mod config;
pub mod control;
pub mod db;
pub mod rule;

pub use self::assess::AssessCommand;
pub use self::config::ConfigCommand;
pub use self::control::ControlCommand;
pub use self::db::DbCommand;
pub use self::rule::RuleCommand;
