use std::fmt;
use std::str::FromStr;

use anyhow::{Context, anyhow};

use crate::config::Config;

/// Whether an operation mutates local state before or after the store
/// confirms it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Apply locally first, roll back on failure.
    Optimistic,
    /// Apply locally only once the store accepted the change.
    Confirmed,
}

impl FromStr for UpdatePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "optimistic" => Ok(UpdatePolicy::Optimistic),
            "confirmed" => Ok(UpdatePolicy::Confirmed),
            other => Err(anyhow!(
                "invalid update policy: {other} (expected optimistic or confirmed)"
            )),
        }
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePolicy::Optimistic => f.write_str("optimistic"),
            UpdatePolicy::Confirmed => f.write_str("confirmed"),
        }
    }
}

/// Per-operation policies. Insert is always confirmed because the local row
/// needs the store-assigned id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policies {
    pub reorder: UpdatePolicy,
    pub toggle: UpdatePolicy,
    pub rename: UpdatePolicy,
    pub delete: UpdatePolicy,
    pub clear: UpdatePolicy,
}

impl Default for Policies {
    fn default() -> Self {
        Self {
            reorder: UpdatePolicy::Optimistic,
            toggle: UpdatePolicy::Confirmed,
            rename: UpdatePolicy::Confirmed,
            delete: UpdatePolicy::Confirmed,
            clear: UpdatePolicy::Confirmed,
        }
    }
}

impl Policies {
    pub fn all(policy: UpdatePolicy) -> Self {
        Self {
            reorder: policy,
            toggle: policy,
            rename: policy,
            delete: policy,
            clear: policy,
        }
    }

    #[tracing::instrument(skip(cfg))]
    pub fn from_config(cfg: &Config) -> anyhow::Result<Self> {
        let mut policies = Self::default();
        let slots = [
            ("policy.reorder", &mut policies.reorder),
            ("policy.toggle", &mut policies.toggle),
            ("policy.rename", &mut policies.rename),
            ("policy.delete", &mut policies.delete),
            ("policy.clear", &mut policies.clear),
        ];

        for (key, slot) in slots {
            if let Some(raw) = cfg.get(key) {
                *slot = raw
                    .parse()
                    .with_context(|| format!("invalid value for {key}"))?;
            }
        }

        tracing::debug!(?policies, "resolved update policies");
        Ok(policies)
    }
}
