//! Configuration validation

use super::schema::Config;
use crate::access::parse_network;
use crate::error::{Result, ValidationError};
use crate::rules::PatternEngine;
use std::collections::HashSet;

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire configuration
    pub fn validate(config: &Config) -> Result<()> {
        Self::validate_limits(config)?;
        Self::validate_rules(config)?;
        Self::validate_access(config)?;
        Ok(())
    }

    fn validate_limits(config: &Config) -> Result<()> {
        if config.telemetry.capacity == 0 {
            return Err(ValidationError::ZeroCapacity.into());
        }
        if config.telemetry.subscriber_backlog == 0 {
            return Err(ValidationError::ZeroBacklog.into());
        }

        let statuses = [
            ("block_status", config.engine.block_status),
            ("flag_status", config.engine.flag_status),
            ("allow_status", config.engine.allow_status),
        ];
        for (field, status) in statuses {
            if !(100..=599).contains(&status) {
                return Err(ValidationError::InvalidStatus { field, status }.into());
            }
        }

        Ok(())
    }

    /// Rule ids must be unique and every pattern must compile
    fn validate_rules(config: &Config) -> Result<()> {
        let engine = config.matching.engine();
        let mut seen = HashSet::new();

        for rule in &config.rules {
            if !seen.insert(rule.id) {
                return Err(ValidationError::DuplicateRuleId { id: rule.id }.into());
            }

            engine
                .compile(&rule.pattern)
                .map_err(|source| ValidationError::InvalidPattern {
                    id: rule.id,
                    source,
                })?;
        }

        Ok(())
    }

    /// Addresses must parse and appear at most once per list
    fn validate_access(config: &Config) -> Result<()> {
        let mut seen = HashSet::new();

        for entry in &config.access {
            let network = parse_network(&entry.address).ok_or_else(|| {
                ValidationError::InvalidAddress {
                    address: entry.address.clone(),
                }
            })?;

            if !seen.insert((network, entry.list)) {
                return Err(ValidationError::DuplicateEntry {
                    address: entry.address.clone(),
                    list: entry.list.to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}
