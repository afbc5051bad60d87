//! Per-provider worker pool: a concurrency ceiling plus minimum spacing
//! between calls, wrapped around any provider.

use std::time::Duration;

use async_trait::async_trait;
use buyergroup_shared::{BuyerGroupError, ProviderConfig, Result};
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;

use crate::contract::{
    CollectedProfile, CompanyCandidate, CompanyDataProvider, PeopleDataProvider, SearchPage,
};

/// Throttling decorator. Every call holds a permit for its whole duration.
#[derive(Debug)]
pub struct Throttled<P> {
    inner: P,
    permits: Semaphore,
    min_interval: Duration,
    next_slot: Mutex<Instant>,
}

impl<P> Throttled<P> {
    pub fn new(inner: P, concurrency: usize, min_interval: Duration) -> Self {
        Self {
            inner,
            permits: Semaphore::new(concurrency.max(1)),
            min_interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn from_config(inner: P, config: &ProviderConfig) -> Self {
        Self::new(
            inner,
            config.concurrency as usize,
            Duration::from_millis(config.min_interval_ms),
        )
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Wait for a free slot, then for this call's start time.
    async fn acquire(&self, provider: &str) -> Result<SemaphorePermit<'_>> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| BuyerGroupError::unavailable(provider, "throttle closed"))?;

        if !self.min_interval.is_zero() {
            let start = {
                let mut slot = self.next_slot.lock().await;
                let start = (*slot).max(Instant::now());
                *slot = start + self.min_interval;
                start
            };
            tokio::time::sleep_until(start).await;
        }
        Ok(permit)
    }
}

#[async_trait]
impl<P: CompanyDataProvider> CompanyDataProvider for Throttled<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn resolve(
        &self,
        name: Option<&str>,
        domain: Option<&str>,
    ) -> Result<Vec<CompanyCandidate>> {
        let _permit = self.acquire(self.inner.name()).await?;
        self.inner.resolve(name, domain).await
    }
}

#[async_trait]
impl<P: PeopleDataProvider> PeopleDataProvider for Throttled<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn search_active_employees(
        &self,
        company_id: &str,
        cursor: Option<&str>,
    ) -> Result<SearchPage> {
        let _permit = self.acquire(self.inner.name()).await?;
        self.inner.search_active_employees(company_id, cursor).await
    }

    async fn collect_profile(&self, profile_id: &str) -> Result<CollectedProfile> {
        let _permit = self.acquire(self.inner.name()).await?;
        self.inner.collect_profile(profile_id).await
    }
}
