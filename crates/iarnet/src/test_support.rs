//! Shared test doubles.
//!
//! `InMemoryBackend` stands in for a provider backend: it tracks deployed
//! instances and derives capacity from them, so adapter/scheduler tests
//! observe the same used/available bookkeeping a real backend would show.
//! Individual operations can be scripted to fail.

use crate::error::{IarnetError, Result};
use crate::provider::backend::{ComputeBackend, ConnectAck, DeploySpec, HealthReport};
use crate::resources::{Capacity, Language, ResourceInfo, ResourceTags};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

struct BackendState {
    total: ResourceInfo,
    tags: ResourceTags,
    languages: Vec<Language>,
    deployed: HashMap<String, ResourceInfo>,
    fail_connect: bool,
    fail_health: bool,
    fail_deploy: Option<IarnetError>,
    /// `Some(n)` limits `fail_deploy` to the next `n` calls.
    fail_deploy_budget: Option<usize>,
}

pub struct InMemoryBackend {
    state: Mutex<BackendState>,
    pub deploy_calls: AtomicUsize,
    pub undeploy_calls: AtomicUsize,
    pub health_calls: AtomicUsize,
    pub capacity_calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new(total: ResourceInfo) -> Self {
        Self {
            state: Mutex::new(BackendState {
                total,
                tags: ResourceTags {
                    cpu: true,
                    memory: true,
                    gpu: false,
                    camera: false,
                },
                languages: vec![Language::Python, Language::Go],
                deployed: HashMap::new(),
                fail_connect: false,
                fail_health: false,
                fail_deploy: None,
                fail_deploy_budget: None,
            }),
            deploy_calls: AtomicUsize::new(0),
            undeploy_calls: AtomicUsize::new(0),
            health_calls: AtomicUsize::new(0),
            capacity_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_tags(self, tags: ResourceTags) -> Self {
        self.state.lock().tags = tags;
        self
    }

    pub fn with_languages(self, languages: Vec<Language>) -> Self {
        self.state.lock().languages = languages;
        self
    }

    pub fn failing_connect(self) -> Self {
        self.state.lock().fail_connect = true;
        self
    }

    pub fn failing_health(self) -> Self {
        self.state.lock().fail_health = true;
        self
    }

    pub fn set_tags(&self, tags: ResourceTags) {
        self.state.lock().tags = tags;
    }

    pub fn set_health_failing(&self, failing: bool) {
        self.state.lock().fail_health = failing;
    }

    pub fn set_deploy_error(&self, error: Option<IarnetError>) {
        let mut state = self.state.lock();
        state.fail_deploy = error;
        state.fail_deploy_budget = None;
    }

    /// Fail only the next `count` deploy calls with `error`, then recover.
    pub fn fail_next_deploys(&self, error: IarnetError, count: usize) {
        let mut state = self.state.lock();
        state.fail_deploy = Some(error);
        state.fail_deploy_budget = Some(count);
    }

    pub fn deployed_ids(&self) -> Vec<String> {
        self.state.lock().deployed.keys().cloned().collect()
    }

    fn capacity_locked(state: &BackendState) -> Capacity {
        let used = state
            .deployed
            .values()
            .fold(ResourceInfo::zero(), |acc, r| acc.saturating_add(r));
        Capacity::from_total_used(state.total.clone(), used)
    }
}

#[async_trait]
impl ComputeBackend for InMemoryBackend {
    async fn connect(&self, _provider_id: &str) -> Result<ConnectAck> {
        let state = self.state.lock();
        if state.fail_connect {
            return Err(IarnetError::backend_network("simulated connect failure"));
        }
        Ok(ConnectAck {
            success: true,
            provider_type: "in-memory".to_string(),
            supported_languages: state.languages.clone(),
        })
    }

    async fn disconnect(&self, _provider_id: &str) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self, _provider_id: &str) -> Result<HealthReport> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        if state.fail_health {
            return Err(IarnetError::backend_network("simulated health failure"));
        }
        Ok(HealthReport {
            capacity: Self::capacity_locked(&state),
            resource_tags: state.tags,
            supported_languages: state.languages.clone(),
        })
    }

    async fn get_capacity(&self, _provider_id: &str) -> Result<Capacity> {
        self.capacity_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        Ok(Self::capacity_locked(&state))
    }

    async fn get_real_time_usage(&self, _provider_id: &str) -> Result<ResourceInfo> {
        let state = self.state.lock();
        Ok(Self::capacity_locked(&state).used)
    }

    async fn deploy(&self, spec: &DeploySpec) -> Result<()> {
        self.deploy_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(e) = state.fail_deploy.clone() {
            match state.fail_deploy_budget {
                Some(0) => {
                    state.fail_deploy = None;
                    state.fail_deploy_budget = None;
                }
                Some(remaining) => {
                    state.fail_deploy_budget = Some(remaining - 1);
                    return Err(e);
                }
                None => return Err(e),
            }
        }
        // The backend is the final admission authority.
        let available = Self::capacity_locked(&state).available;
        if !spec.request.fits_within(&available) {
            return Err(IarnetError::backend_status(
                409,
                format!("insufficient capacity for {}", spec.instance_id),
            ));
        }
        state
            .deployed
            .insert(spec.instance_id.clone(), spec.request.clone());
        Ok(())
    }

    async fn undeploy(&self, instance_id: &str, _provider_id: &str) -> Result<()> {
        self.undeploy_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        state
            .deployed
            .remove(instance_id)
            .map(|_| ())
            .ok_or_else(|| {
                IarnetError::backend_status(404, format!("unknown instance {}", instance_id))
            })
    }
}
