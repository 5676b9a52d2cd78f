//! # Scheduler boundary
//!
//! Remote components never run anything themselves: they package a call as
//! a [`RemoteTask`] and hand it to a [`Scheduler`]. Submission returns at
//! once with a [`TaskHandle`]; resolving the handle is always an explicit,
//! separate step taken by the caller.
//!
//! [`BoundNode`]s describe calls lazily. Nodes can feed each other, and
//! executing the last node submits the whole graph.

use crate::compose::Target;
use crate::components::{Binding, Kwargs, ModelView, PluginRef};
use crate::error::{ComponentError, ConfigError, RemoteError, ValidationError};
use crate::models::{DataModel, DynModel, ExecReq, Payload, ResourceRequest};
use crate::plugins::PluginRegistry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

/// The repeatable body of a remote task. Receives the resolved results of
/// the task's dependencies, in order.
pub type TaskBody =
    Arc<dyn Fn(&WorkerContext, &[DynModel]) -> Result<DynModel, ComponentError> + Send + Sync>;

/// A unit of work submitted to a scheduler.
pub struct RemoteTask {
    pub label: String,
    pub deps: Vec<TaskHandle>,
    pub body: TaskBody,
}

impl fmt::Debug for RemoteTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTask")
            .field("label", &self.label)
            .field("deps", &self.deps)
            .finish()
    }
}

/// What a task body can see of the worker it runs on.
#[derive(Clone)]
pub struct WorkerContext {
    task_id: Uuid,
    attempt: u32,
    plugins: Arc<PluginRegistry>,
}

impl WorkerContext {
    pub fn new(task_id: Uuid, attempt: u32, plugins: Arc<PluginRegistry>) -> Self {
        Self {
            task_id,
            attempt,
            plugins,
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// 1 for the first run, incremented on every retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn resolve_by_name(&self, namespace: &str, name: &str) -> Result<Target, ConfigError> {
        self.plugins.get(namespace, name)
    }
}

/// A distributed (or simulated) task scheduler.
pub trait Scheduler: Send + Sync {
    fn is_initialized(&self) -> bool;

    /// Queues a task. Never blocks on the task itself.
    fn submit(&self, task: RemoteTask, request: &ResourceRequest) -> Result<TaskHandle, RemoteError>;

    /// Blocks until the task behind `handle` has finished.
    fn resolve(&self, handle: &TaskHandle) -> Result<DynModel, RemoteError>;

    /// Looks up a late-bound implementation by name.
    fn resolve_by_name(&self, namespace: &str, name: &str) -> Result<Target, ConfigError>;
}

type SharedResult = Shared<BoxFuture<'static, Result<DynModel, RemoteError>>>;

/// Shared future of a submitted task's result.
#[derive(Clone)]
pub struct TaskHandle {
    id: Uuid,
    label: String,
    result: SharedResult,
}

impl TaskHandle {
    pub fn new<F>(id: Uuid, label: impl Into<String>, result: F) -> Self
    where
        F: Future<Output = Result<DynModel, RemoteError>> + Send + 'static,
    {
        Self {
            id,
            label: label.into(),
            result: result.boxed().shared(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// The result future. Every clone observes the same outcome.
    pub fn result(&self) -> SharedResult {
        self.result.clone()
    }

    /// The result, if the task has already finished.
    pub fn peek(&self) -> Option<Result<DynModel, RemoteError>> {
        self.result.peek().cloned()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish()
    }
}

/// Typed handle returned by `compute_remote`.
pub struct RemoteHandle<Out = DynModel> {
    task: TaskHandle,
    _out: PhantomData<fn() -> Out>,
}

impl<Out> RemoteHandle<Out> {
    pub fn new(task: TaskHandle) -> Self {
        Self {
            task,
            _out: PhantomData,
        }
    }

    pub fn id(&self) -> Uuid {
        self.task.id()
    }

    pub fn task(&self) -> &TaskHandle {
        &self.task
    }
}

impl<Out: ModelView> RemoteHandle<Out> {
    /// Blocks until the remote call has finished.
    pub fn resolve(&self, scheduler: &dyn Scheduler) -> Result<Out, ComponentError> {
        let model = scheduler.resolve(&self.task)?;
        Out::from_dyn(model)
    }
}

impl<Out> Clone for RemoteHandle<Out> {
    fn clone(&self) -> Self {
        Self::new(self.task.clone())
    }
}

impl<Out> fmt::Debug for RemoteHandle<Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RemoteHandle").field(&self.task).finish()
    }
}

/// Resolves a batch of handles. Results come back in the order the handles
/// were given, whatever order the tasks finished in.
pub fn gather<Out: ModelView>(
    scheduler: &dyn Scheduler,
    handles: &[RemoteHandle<Out>],
) -> Result<Vec<Out>, ComponentError> {
    handles.iter().map(|handle| handle.resolve(scheduler)).collect()
}

struct NodeInner {
    id: Uuid,
    binding: Binding,
    input: NodeInput,
    exec_req: Option<ExecReq>,
    kwargs: Kwargs,
    plugin: Option<PluginRef>,
}

/// A node used as the input of another node.
#[derive(Clone)]
pub struct Upstream(Arc<NodeInner>);

/// Input of a bound call: a value, or the output of another node.
#[derive(Clone)]
pub enum NodeInput {
    Payload(Payload),
    Node(Upstream),
}

impl<M: DataModel> From<M> for NodeInput {
    fn from(model: M) -> Self {
        NodeInput::Payload(model.into())
    }
}

impl From<DynModel> for NodeInput {
    fn from(model: DynModel) -> Self {
        NodeInput::Payload(model.into())
    }
}

impl From<Value> for NodeInput {
    fn from(value: Value) -> Self {
        NodeInput::Payload(value.into())
    }
}

impl From<Payload> for NodeInput {
    fn from(payload: Payload) -> Self {
        NodeInput::Payload(payload)
    }
}

impl<Out> From<BoundNode<Out>> for NodeInput {
    fn from(node: BoundNode<Out>) -> Self {
        NodeInput::Node(Upstream(node.inner))
    }
}

impl<Out> From<&BoundNode<Out>> for NodeInput {
    fn from(node: &BoundNode<Out>) -> Self {
        NodeInput::Node(Upstream(node.inner.clone()))
    }
}

/// A remote call described but not yet submitted.
pub struct BoundNode<Out = DynModel> {
    inner: Arc<NodeInner>,
    _out: PhantomData<fn() -> Out>,
}

impl<Out> BoundNode<Out> {
    pub(crate) fn new(
        binding: Binding,
        input: NodeInput,
        exec_req: Option<ExecReq>,
        kwargs: Kwargs,
        plugin: Option<PluginRef>,
    ) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                id: Uuid::new_v4(),
                binding,
                input,
                exec_req,
                kwargs,
                plugin,
            }),
            _out: PhantomData,
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        self.inner.binding.name()
    }
}

impl<Out: ModelView> BoundNode<Out> {
    /// Submits this node and every node it depends on. A node reachable
    /// through several paths is submitted once.
    #[tracing::instrument(skip_all, fields(node = %self.inner.id, component = %self.name()))]
    pub fn execute(&self, scheduler: &dyn Scheduler) -> Result<RemoteHandle<Out>, ComponentError> {
        if !scheduler.is_initialized() {
            return Err(RemoteError::SchedulerUnavailable.into());
        }
        let mut submitted = HashMap::new();
        let task = submit_node(&self.inner, scheduler, &mut submitted)?;
        tracing::debug!(tasks = submitted.len(), "Submitted graph");
        Ok(RemoteHandle::new(task))
    }
}

impl<Out> Clone for BoundNode<Out> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _out: PhantomData,
        }
    }
}

impl<Out> fmt::Debug for BoundNode<Out> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundNode")
            .field("id", &self.inner.id)
            .field("component", &self.inner.binding.name())
            .finish()
    }
}

fn submit_node(
    node: &Arc<NodeInner>,
    scheduler: &dyn Scheduler,
    submitted: &mut HashMap<Uuid, TaskHandle>,
) -> Result<TaskHandle, ComponentError> {
    if let Some(handle) = submitted.get(&node.id) {
        return Ok(handle.clone());
    }

    let deps = match &node.input {
        NodeInput::Payload(_) => Vec::new(),
        NodeInput::Node(Upstream(upstream)) => vec![submit_node(upstream, scheduler, submitted)?],
    };
    let request = node.binding.effective_request(node.exec_req.as_ref());
    let task = RemoteTask {
        label: node.binding.name().to_string(),
        deps,
        body: task_body(node),
    };

    let handle = scheduler.submit(task, &request)?;
    tracing::info!(
        component = %node.binding.name(),
        task = %handle.id(),
        request = ?request.overrides(),
        "Submitted remote task"
    );
    submitted.insert(node.id, handle.clone());
    Ok(handle)
}

/// What runs on the worker: the same validate, execute, validate pipeline,
/// preceded by by-name resolution for late-bound calls.
fn task_body(node: &NodeInner) -> TaskBody {
    let binding = node.binding.clone();
    let payload = match &node.input {
        NodeInput::Payload(payload) => Some(payload.clone()),
        NodeInput::Node(_) => None,
    };
    let exec_req = node.exec_req.clone();
    let kwargs = node.kwargs.clone();
    let plugin = node.plugin.clone();

    Arc::new(
        move |ctx: &WorkerContext, deps: &[DynModel]| -> Result<DynModel, ComponentError> {
            let input = match (&payload, deps.first()) {
                (Some(payload), _) => payload.clone(),
                (None, Some(upstream)) => Payload::Model(upstream.clone()),
                (None, None) => {
                    return Err(ComponentError::validation(
                        crate::error::Boundary::Input,
                        ValidationError::field(binding.input().type_name(), "__root__", "upstream result missing"),
                    ));
                }
            };

            match &plugin {
                Some(plugin) => {
                    let target = ctx.resolve_by_name(&plugin.namespace, &plugin.name)?;
                    tracing::debug!(plugin = %plugin, attempt = ctx.attempt(), "Resolved late-bound target");
                    binding
                        .resolve_target(target)?
                        .compute(input, exec_req.as_ref(), &kwargs)
                }
                None => binding.compute(input, exec_req.as_ref(), &kwargs),
            }
        },
    )
}
