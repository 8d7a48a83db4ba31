// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Embedded policy services
//!
//! Builds the engine, evaluation manager and assessment service in-process
//! from a `PolicyConfig`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use gatekeeper_core::{
    application::{
        assessment_service::AssessmentService, evaluation_manager::EvaluationManager,
        policy_engine::PolicyEngine, repository_factory::create_rule_repository,
    },
    domain::{
        clock::{Clock, SystemClock},
        config::PolicyConfig,
        repository::RuleRepository,
        scheduler::{DeferredCriteria, DeferredTrigger},
        signature::TicketService,
    },
    infrastructure::{
        DetachedSignatureValidator, EventBus, PowerStateScheduler, PreferenceStore,
        StaticTicketService, TokenAuthorizer,
    },
};

pub struct EmbeddedPolicy {
    pub config: PolicyConfig,
    pub repo: Arc<dyn RuleRepository>,
    pub event_bus: Arc<EventBus>,
    pub service: AssessmentService,
}

impl EmbeddedPolicy {
    pub async fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config =
            PolicyConfig::load_or_default(config_path).context("Failed to load configuration")?;
        config
            .validate()
            .context("Configuration validation failed")?;
        Self::from_config(config).await
    }

    pub async fn from_config(config: PolicyConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let repo = create_rule_repository(&config.database).await;
        if !repo.is_writable() {
            warn!(path = %config.database.path.display(), "Rule database is read-only");
        }

        let validator = Arc::new(DetachedSignatureValidator::new(clock.clone()));
        let tickets: Arc<dyn TicketService> = match &config.notarization.tickets_file {
            Some(path) => Arc::new(
                StaticTicketService::from_file(path)
                    .with_context(|| format!("Failed to load tickets from {}", path.display()))?,
            ),
            None => Arc::new(StaticTicketService::new()),
        };
        let event_bus = Arc::new(EventBus::with_default_capacity());

        let engine = PolicyEngine::new(
            repo.clone(),
            validator.clone(),
            tickets,
            Arc::new(TokenAuthorizer::from_config(&config.authorization)),
            Arc::new(PreferenceStore::from_config(&config.state)),
            event_bus.clone(),
            clock,
        )
        .with_cache_config(config.cache.clone());

        let trigger: Arc<dyn DeferredTrigger> = PowerStateScheduler::start(&config.scheduler);
        let manager = EvaluationManager::new(Arc::new(engine), Some(trigger)).with_deferral(
            DeferredCriteria {
                require_ac_power: config.scheduler.require_ac_power,
                ..DeferredCriteria::default()
            },
        );

        let mut service = AssessmentService::new(Arc::new(manager))
            .with_explicit_set(config.explicit_set.clone(), validator);
        if let Some(legacy) = &config.database.legacy_path {
            service = service.with_legacy_database(legacy.clone());
        }
        debug!(database = %config.database.path.display(), "Embedded policy services ready");

        Ok(Self {
            config,
            repo,
            event_bus,
            service,
        })
    }
}
