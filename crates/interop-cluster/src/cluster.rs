//! # Local cluster
//!
//! An in-process [`Scheduler`] backed by a tokio runtime. Every task waits
//! for its dependencies, then for the resources it asked for, and finally
//! runs its body on the blocking pool.

use crate::config::ClusterConfig;
use anyhow::{Context, Result};
use interop_core::compose::Target;
use interop_core::error::{ConfigError, RemoteError};
use interop_core::models::{DynModel, ResourceRequest};
use interop_core::plugins::PluginRegistry;
use interop_core::scheduler::{RemoteTask, Scheduler, TaskBody, TaskHandle, WorkerContext};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::runtime::Runtime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

/// Custom resources are fractional; they are admitted in units of 1/10000.
const RESOURCE_UNITS: f64 = 10_000.0;

struct Pool {
    runtime: Runtime,
    permits: PoolPermits,
}

/// What one task holds while it runs.
#[derive(Debug, Default)]
struct Demand {
    cpus: u32,
    gpus: u32,
    resources: Vec<(String, u32)>,
}

impl Demand {
    async fn acquire(self, pool: &PoolPermits) -> Option<Vec<OwnedSemaphorePermit>> {
        let mut permits = Vec::with_capacity(2 + self.resources.len());
        permits.push(pool.cpus.clone().acquire_many_owned(self.cpus).await.ok()?);
        permits.push(pool.gpus.clone().acquire_many_owned(self.gpus).await.ok()?);
        // Sorted by name, so tasks never wait on each other crosswise.
        for (name, units) in self.resources {
            let semaphore = pool.resources.get(&name)?.clone();
            permits.push(semaphore.acquire_many_owned(units).await.ok()?);
        }
        Some(permits)
    }
}

/// Semaphores shared with running tasks.
#[derive(Clone)]
struct PoolPermits {
    cpus: Arc<Semaphore>,
    gpus: Arc<Semaphore>,
    resources: BTreeMap<String, Arc<Semaphore>>,
}

/// Retry policy of a single task.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    /// `None` retries forever.
    max_retries: Option<u32>,
    retry_exceptions: bool,
}

impl RetryPolicy {
    fn from_request(request: &ResourceRequest) -> Self {
        Self {
            max_retries: request.effective_max_retries(),
            retry_exceptions: request.retries_exceptions(),
        }
    }

    /// Whether another run is allowed after `attempt` runs have failed.
    fn allows(&self, attempt: u32) -> bool {
        self.max_retries.is_none_or(|max| attempt <= max)
    }
}

/// An in-process cluster implementing [`Scheduler`].
pub struct LocalCluster {
    config: ClusterConfig,
    plugins: Arc<PluginRegistry>,
    pool: RwLock<Option<Pool>>,
}

impl LocalCluster {
    /// Starts a cluster with the given capacity. `plugins` serves by-name
    /// lookups for late-bound components.
    pub fn start(config: ClusterConfig, plugins: PluginRegistry) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.num_cpus.max(1) as usize)
            .thread_name("interop-worker")
            .enable_all()
            .build()
            .context("Failed to start cluster runtime")?;

        let resources = config
            .resources
            .iter()
            .map(|(name, quantity)| {
                let units = (quantity * RESOURCE_UNITS)
                    .round()
                    .clamp(0.0, Semaphore::MAX_PERMITS as f64) as usize;
                (name.clone(), Arc::new(Semaphore::new(units)))
            })
            .collect();
        let pool = Pool {
            runtime,
            permits: PoolPermits {
                cpus: Arc::new(Semaphore::new(config.num_cpus as usize)),
                gpus: Arc::new(Semaphore::new(config.num_gpus as usize)),
                resources,
            },
        };

        tracing::info!(
            num_cpus = config.num_cpus,
            num_gpus = config.num_gpus,
            resources = ?config.resources,
            address = ?config.address,
            "Local cluster started"
        );
        Ok(Self {
            config,
            plugins: Arc::new(plugins),
            pool: RwLock::new(Some(pool)),
        })
    }

    /// Starts a cluster configured from the environment.
    pub fn from_env(plugins: PluginRegistry) -> Result<Self> {
        Self::start(ClusterConfig::from_env()?, plugins)
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Stops the cluster. In-flight tasks are cancelled and later
    /// submissions fail with [`RemoteError::SchedulerUnavailable`].
    pub fn shutdown(&self) {
        let pool = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            pool.runtime.shutdown_background();
            tracing::warn!("Local cluster shut down");
        }
    }

    /// Translates a request into the permits a task must hold, or the first
    /// figure this cluster could never satisfy.
    fn demand(&self, request: &ResourceRequest) -> Result<Demand, RemoteError> {
        let cpus = request.num_cpus.unwrap_or(1);
        if cpus > self.config.num_cpus {
            return Err(infeasible("CPU", cpus.into(), self.config.num_cpus.into()));
        }
        let gpus = request.num_gpus.unwrap_or(0);
        if gpus > self.config.num_gpus {
            return Err(infeasible("GPU", gpus.into(), self.config.num_gpus.into()));
        }
        if let (Some(requested), Some(capacity)) = (request.memory, self.config.memory) {
            if requested > capacity {
                return Err(infeasible("memory", requested, capacity));
            }
        }

        let mut resources = Vec::new();
        let mut requested: Vec<_> = request.resources.iter().flatten().collect();
        requested.sort_by(|a, b| a.0.cmp(b.0));
        for (name, quantity) in requested {
            let capacity = self.config.resources.get(name).copied().unwrap_or(0.0);
            if *quantity > capacity {
                return Err(infeasible(name, *quantity, capacity));
            }
            let units = resource_units(*quantity)
                .ok_or_else(|| infeasible(name, *quantity, MAX_TASK_RESOURCE))?;
            resources.push((name.clone(), units));
        }

        Ok(Demand {
            cpus,
            gpus,
            resources,
        })
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        // Dropping a runtime blocks; shut it down without waiting instead.
        self.shutdown();
    }
}

impl Scheduler for LocalCluster {
    fn is_initialized(&self) -> bool {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn submit(&self, task: RemoteTask, request: &ResourceRequest) -> Result<TaskHandle, RemoteError> {
        let guard = self.pool.read().unwrap_or_else(PoisonError::into_inner);
        let pool = guard.as_ref().ok_or(RemoteError::SchedulerUnavailable)?;

        let id = Uuid::new_v4();
        let demand = match self.demand(request) {
            Ok(demand) => demand,
            Err(err) => {
                tracing::error!(task = %id, label = %task.label, error = %err, "Task can never be scheduled");
                return Ok(TaskHandle::new(id, task.label, futures::future::ready(Err(err))));
            }
        };

        let permits = pool.permits.clone();
        let policy = RetryPolicy::from_request(request);
        let plugins = self.plugins.clone();
        let RemoteTask { label, deps, body } = task;
        let task_label = label.clone();

        let join = pool.runtime.spawn(async move {
            let mut inputs = Vec::with_capacity(deps.len());
            for dep in &deps {
                let value = dep.result().await.map_err(|source| RemoteError::Upstream {
                    task: dep.id(),
                    source: Box::new(source),
                })?;
                inputs.push(value);
            }

            let _permits = demand
                .acquire(&permits)
                .await
                .ok_or(RemoteError::Cancelled { task: id })?;
            tracing::debug!(task = %id, label = %task_label, "Task admitted");

            run_with_retries(id, &task_label, body, inputs, plugins, policy).await
        });

        tracing::debug!(task = %id, label = %label, "Task queued");
        Ok(TaskHandle::new(id, label, async move {
            match join.await {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => Err(RemoteError::Cancelled { task: id }),
                Err(err) => Err(RemoteError::WorkerCrashed {
                    attempts: 0,
                    message: err.to_string(),
                }),
            }
        }))
    }

    fn resolve(&self, handle: &TaskHandle) -> Result<DynModel, RemoteError> {
        futures::executor::block_on(handle.result())
    }

    fn resolve_by_name(&self, namespace: &str, name: &str) -> Result<Target, ConfigError> {
        self.plugins.get(namespace, name)
    }
}

async fn run_with_retries(
    id: Uuid,
    label: &str,
    body: TaskBody,
    inputs: Vec<DynModel>,
    plugins: Arc<PluginRegistry>,
    policy: RetryPolicy,
) -> Result<DynModel, RemoteError> {
    let mut attempt = 1;
    loop {
        let ctx = WorkerContext::new(id, attempt, plugins.clone());
        let body = body.clone();
        let inputs = inputs.clone();
        let outcome = tokio::task::spawn_blocking(move || body(&ctx, &inputs)).await;

        match outcome {
            Ok(Ok(model)) => return Ok(model),
            Ok(Err(err)) if policy.retry_exceptions && policy.allows(attempt) => {
                tracing::warn!(task = %id, label, attempt, error = %err, "Task failed, retrying");
            }
            Ok(Err(err)) => {
                tracing::error!(task = %id, label, attempt, error = %err, "Task failed");
                return Err(RemoteError::Task(Arc::new(err)));
            }
            Err(join) if join.is_panic() => {
                let message = panic_message(join.into_panic());
                if !policy.allows(attempt) {
                    tracing::error!(task = %id, label, attempt, %message, "Worker crashed");
                    return Err(RemoteError::WorkerCrashed {
                        attempts: attempt,
                        message,
                    });
                }
                tracing::warn!(task = %id, label, attempt, %message, "Worker crashed, retrying");
            }
            Err(_) => return Err(RemoteError::Cancelled { task: id }),
        }
        attempt += 1;
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "worker panicked".to_string(),
        },
    }
}

/// Permits a single task can hold of one custom resource, as a quantity.
const MAX_TASK_RESOURCE: f64 = u32::MAX as f64 / RESOURCE_UNITS;

/// Units one task acquires for `quantity`, or `None` past what a single
/// acquisition can take.
fn resource_units(quantity: f64) -> Option<u32> {
    let units = (quantity * RESOURCE_UNITS).round();
    (units <= u32::MAX as f64).then_some(units as u32)
}

fn infeasible(resource: &str, requested: f64, capacity: f64) -> RemoteError {
    RemoteError::Infeasible {
        resource: resource.to_string(),
        requested,
        capacity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> LocalCluster {
        LocalCluster::start(
            ClusterConfig::default()
                .with_cpus(2)
                .with_resource("accelerator", 0.5),
            PluginRegistry::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_demand_defaults_to_one_cpu() {
        let demand = cluster().demand(&ResourceRequest::default()).unwrap();
        assert_eq!(demand.cpus, 1);
        assert_eq!(demand.gpus, 0);
        assert!(demand.resources.is_empty());
    }

    #[test]
    fn test_demand_rejects_excess() {
        let cluster = cluster();
        let err = cluster
            .demand(&ResourceRequest {
                num_gpus: Some(1),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, RemoteError::Infeasible { ref resource, .. } if resource == "GPU"));

        let mut resources = std::collections::HashMap::new();
        resources.insert("accelerator".to_string(), 0.25);
        let demand = cluster
            .demand(&ResourceRequest {
                resources: Some(resources),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(demand.resources, vec![("accelerator".to_string(), 2500)]);
    }

    #[test]
    fn test_demand_beyond_one_acquisition() {
        let cluster = LocalCluster::start(
            ClusterConfig::default().with_cpus(1).with_resource("bulk", 1e6),
            PluginRegistry::new(),
        )
        .unwrap();
        let request = |quantity: f64| ResourceRequest {
            resources: Some([("bulk".to_string(), quantity)].into_iter().collect()),
            ..Default::default()
        };

        let demand = cluster.demand(&request(4e5)).unwrap();
        assert_eq!(demand.resources, vec![("bulk".to_string(), 4_000_000_000)]);

        let err = cluster.demand(&request(5e5)).unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Infeasible { ref resource, requested, .. } if resource == "bulk" && requested == 5e5
        ));
    }

    #[test]
    fn test_retry_policy() {
        let bounded = RetryPolicy {
            max_retries: Some(2),
            retry_exceptions: false,
        };
        assert!(bounded.allows(1));
        assert!(bounded.allows(2));
        assert!(!bounded.allows(3));

        let none = RetryPolicy {
            max_retries: Some(0),
            retry_exceptions: false,
        };
        assert!(!none.allows(1));

        let unlimited = RetryPolicy::from_request(&ResourceRequest {
            max_retries: Some(-1),
            ..Default::default()
        });
        assert!(unlimited.allows(1_000));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload), "bang");
    }
}
