// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod repositories;
pub mod db;
pub mod migrations;
pub mod event_bus;
pub mod preferences;
pub mod signature;
pub mod tickets;
pub mod authorization;
pub mod scheduler;
pub mod metrics;

pub use authorization::TokenAuthorizer;
pub use event_bus::EventBus;
pub use preferences::{PreferenceStore, RejectionRecord};
pub use scheduler::{ManualTrigger, PowerStateScheduler};
pub use signature::DetachedSignatureValidator;
pub use tickets::StaticTicketService;
