//! Allow-list filters applied before aggregation.
//!
//! An empty allow-list lets everything through.

use std::collections::HashSet;

use crate::envelope::EventKind;
use crate::error::ConfigError;

/// Filters envelopes by BOSH deployment name.
#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    deployments: HashSet<String>,
}

impl DeploymentFilter {
    pub fn new<I, S>(deployments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let deployments = deployments
            .into_iter()
            .map(|d| d.as_ref().trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        Self { deployments }
    }

    pub fn enabled(&self, deployment: &str) -> bool {
        self.deployments.is_empty() || self.deployments.contains(deployment)
    }
}

/// Filters envelopes by event kind.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    kinds: HashSet<EventKind>,
}

impl EventFilter {
    /// Build a filter from kind names such as `CounterEvent`.
    ///
    /// Unknown names are a configuration error.
    pub fn new<I, S>(kinds: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let kinds = kinds
            .into_iter()
            .filter(|k| !k.as_ref().trim().is_empty())
            .map(|k| k.as_ref().parse::<EventKind>())
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(Self { kinds })
    }

    pub fn enabled(&self, kind: EventKind) -> bool {
        self.kinds.is_empty() || self.kinds.contains(&kind)
    }
}
