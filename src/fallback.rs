use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::logw;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{tier} unavailable: {reason}")]
pub struct Unavailable {
    pub tier: &'static str,
    pub reason: String,
}

impl Unavailable {
    pub fn new(tier: &'static str, reason: impl Into<String>) -> Self {
        Self {
            tier,
            reason: reason.into(),
        }
    }
}

pub trait OrUnavailable<T> {
    fn or_unavailable(self, tier: &'static str) -> Result<T, Unavailable>;
}

impl<T> OrUnavailable<T> for anyhow::Result<T> {
    fn or_unavailable(self, tier: &'static str) -> Result<T, Unavailable> {
        self.map_err(|err| Unavailable::new(tier, format!("{:#}", err)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exhausted {
    pub component: &'static str,
    pub failures: Vec<Unavailable>,
}

impl fmt::Display for Exhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: every tier failed", self.component)?;
        for failure in &self.failures {
            write!(f, "; {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for Exhausted {}

#[async_trait]
pub trait Tier<I: Sync, O: Send>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, input: &I) -> Result<O, Unavailable>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tiered<O> {
    pub value: O,
    pub tier: &'static str,
    /// Zero for the preferred tier.
    pub rank: usize,
}

pub struct FallbackChain<I, O> {
    component: &'static str,
    tiers: Vec<Box<dyn Tier<I, O>>>,
}

impl<I: Sync, O: Send> FallbackChain<I, O> {
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            tiers: Vec::new(),
        }
    }

    pub fn then(mut self, tier: impl Tier<I, O> + 'static) -> Self {
        self.tiers.push(Box::new(tier));
        self
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    pub async fn run(&self, input: &I) -> Result<Tiered<O>, Exhausted> {
        let mut failures = Vec::new();
        for (rank, tier) in self.tiers.iter().enumerate() {
            match tier.attempt(input).await {
                Ok(value) => {
                    return Ok(Tiered {
                        value,
                        tier: tier.name(),
                        rank,
                    });
                }
                Err(err) => {
                    logw(format!("{}: {}", self.component, err));
                    failures.push(err);
                }
            }
        }
        Err(Exhausted {
            component: self.component,
            failures,
        })
    }
}
