use interop_cluster::{ClusterConfig, LocalCluster};
use interop_core::data_model;
use interop_core::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

data_model! {
    pub struct IntModel {
        pub value: i64,
    }
}

fn double(input: IntModel, _: Option<&ExecReq>, _: &Kwargs) -> anyhow::Result<IntModel> {
    Ok(IntModel::new(input.value * 2))
}

fn square(input: IntModel, _: Option<&ExecReq>, _: &Kwargs) -> anyhow::Result<IntModel> {
    Ok(IntModel::new(input.value * input.value))
}

fn fail(_: IntModel, _: Option<&ExecReq>, _: &Kwargs) -> anyhow::Result<IntModel> {
    anyhow::bail!("always fails")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn cluster(num_cpus: u32) -> LocalCluster {
    init_tracing();
    LocalCluster::start(ClusterConfig::default().with_cpus(num_cpus), PluginRegistry::new()).unwrap()
}

fn remote_error(err: ComponentError) -> RemoteError {
    match err {
        ComponentError::Remote(err) => err,
        other => panic!("expected a remote error, got: {}", other),
    }
}

#[test]
fn test_compute_remote_double() {
    let cluster = cluster(2);
    let double = Composer::function("double", double).num_cpus(1).remote().unwrap();

    let handle = double.compute_remote(&cluster, IntModel::new(3)).unwrap();
    assert_eq!(handle.resolve(&cluster).unwrap().value, 6);
}

#[test]
fn test_gather_many() {
    let cluster = cluster(4);
    let square = Composer::function("square", square).remote().unwrap();

    let handles: Vec<_> = (0..20)
        .map(|i| square.compute_remote(&cluster, IntModel::new(i)).unwrap())
        .collect();
    let values: Vec<i64> = gather(&cluster, &handles)
        .unwrap()
        .into_iter()
        .map(|m| m.value)
        .collect();
    assert_eq!(values, (0..20).map(|i| i * i).collect::<Vec<_>>());
}

#[test]
fn test_bound_chain() {
    let cluster = cluster(2);
    let double = Composer::function("double", double).remote().unwrap();
    let square = Composer::function("square", square).remote().unwrap();

    let first = double.bind(IntModel::new(2)).unwrap();
    let second = square.bind(&first).unwrap();
    let last = double.bind(second).unwrap();

    let handle = last.execute(&cluster).unwrap();
    assert_eq!(handle.resolve(&cluster).unwrap().value, 32);
}

#[test]
fn test_upstream_failure_propagates() {
    let cluster = cluster(2);
    let fail = Composer::function("fail", fail).remote().unwrap();
    let double = Composer::function("double", double).remote().unwrap();

    let node = double.bind(fail.bind(IntModel::new(1)).unwrap()).unwrap();
    let err = remote_error(node.execute(&cluster).unwrap().resolve(&cluster).unwrap_err());
    match err {
        RemoteError::Upstream { source, .. } => assert!(matches!(*source, RemoteError::Task(_))),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_infeasible_surfaces_on_resolve() {
    let cluster = cluster(1);
    let gpu = Composer::function("double", double).num_gpus(1).remote().unwrap();

    let handle = gpu.compute_remote(&cluster, IntModel::new(1)).unwrap();
    let err = remote_error(handle.resolve(&cluster).unwrap_err());
    assert!(matches!(
        err,
        RemoteError::Infeasible { ref resource, capacity, .. } if resource == "GPU" && capacity == 0.0
    ));
}

static CRASHES: AtomicUsize = AtomicUsize::new(0);

fn crash_twice(input: IntModel, _: Option<&ExecReq>, _: &Kwargs) -> anyhow::Result<IntModel> {
    if CRASHES.fetch_add(1, Ordering::SeqCst) < 2 {
        panic!("worker lost");
    }
    Ok(input)
}

#[test]
fn test_crashed_worker_is_retried() {
    let cluster = cluster(1);
    let flaky = Composer::function("flaky", crash_twice).max_retries(2).remote().unwrap();

    let handle = flaky.compute_remote(&cluster, IntModel::new(7)).unwrap();
    assert_eq!(handle.resolve(&cluster).unwrap().value, 7);
    assert_eq!(CRASHES.load(Ordering::SeqCst), 3);
}

fn always_crash(_: IntModel, _: Option<&ExecReq>, _: &Kwargs) -> anyhow::Result<IntModel> {
    panic!("worker lost")
}

#[test]
fn test_crash_without_retries() {
    let cluster = cluster(1);
    let crash = Composer::function("crash", always_crash).max_retries(0).remote().unwrap();

    let err = remote_error(
        crash
            .compute_remote(&cluster, IntModel::new(1))
            .unwrap()
            .resolve(&cluster)
            .unwrap_err(),
    );
    match err {
        RemoteError::WorkerCrashed { attempts, message } => {
            assert_eq!(attempts, 1);
            assert_eq!(message, "worker lost");
        }
        other => panic!("unexpected error: {}", other),
    }
}

static FAILURES: AtomicUsize = AtomicUsize::new(0);

fn fail_once(input: IntModel, _: Option<&ExecReq>, _: &Kwargs) -> anyhow::Result<IntModel> {
    if FAILURES.fetch_add(1, Ordering::SeqCst) == 0 {
        anyhow::bail!("transient");
    }
    Ok(input)
}

#[test]
fn test_application_errors_retried_on_request() {
    let cluster = cluster(1);
    let flaky = Composer::function("flaky", fail_once)
        .retry_exceptions(true)
        .remote()
        .unwrap();

    let handle = flaky.compute_remote(&cluster, IntModel::new(4)).unwrap();
    assert_eq!(handle.resolve(&cluster).unwrap().value, 4);
    assert_eq!(FAILURES.load(Ordering::SeqCst), 2);

    let fail = Composer::function("fail", fail).max_retries(-1).remote().unwrap();
    let err = remote_error(
        fail.compute_remote(&cluster, IntModel::new(1))
            .unwrap()
            .resolve(&cluster)
            .unwrap_err(),
    );
    match err {
        RemoteError::Task(inner) => assert!(matches!(inner.as_ref(), ComponentError::Execution(_))),
        other => panic!("unexpected error: {}", other),
    }
}

static RUNNING: AtomicUsize = AtomicUsize::new(0);
static PEAK: AtomicUsize = AtomicUsize::new(0);

fn hold_slot(input: IntModel, _: Option<&ExecReq>, _: &Kwargs) -> anyhow::Result<IntModel> {
    let now = RUNNING.fetch_add(1, Ordering::SeqCst) + 1;
    PEAK.fetch_max(now, Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(20));
    RUNNING.fetch_sub(1, Ordering::SeqCst);
    Ok(input)
}

#[test]
fn test_custom_resource_limits_concurrency() {
    init_tracing();
    let cluster = LocalCluster::start(
        ClusterConfig::default().with_cpus(4).with_resource("slot", 1.0),
        PluginRegistry::new(),
    )
    .unwrap();
    let exclusive = Composer::function("exclusive", hold_slot)
        .resource("slot", 1.0)
        .remote()
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| exclusive.compute_remote(&cluster, IntModel::new(i)).unwrap())
        .collect();
    gather(&cluster, &handles).unwrap();
    assert_eq!(PEAK.load(Ordering::SeqCst), 1);
}

#[test]
fn test_meta_remote_plugins() {
    init_tracing();
    let mut plugins = PluginRegistry::new();
    plugins.register_function("math", "square", square).unwrap();
    plugins.register_function("math", "double", double).unwrap();
    let cluster = LocalCluster::start(ClusterConfig::default().with_cpus(2), plugins).unwrap();

    let op = Composer::interface::<IntModel, IntModel>("op")
        .num_cpus(1)
        .meta_remote()
        .unwrap();

    let squared = op
        .compute_remote(&cluster, IntModel::new(3), &PluginRef::new("math", "square"))
        .unwrap();
    let doubled = op
        .compute_remote(&cluster, IntModel::new(3), &PluginRef::new("math", "double"))
        .unwrap();
    assert_eq!(squared.resolve(&cluster).unwrap().value, 9);
    assert_eq!(doubled.resolve(&cluster).unwrap().value, 6);

    let err = remote_error(
        op.compute_remote(&cluster, IntModel::new(3), &PluginRef::new("math", "cube"))
            .unwrap()
            .resolve(&cluster)
            .unwrap_err(),
    );
    match err {
        RemoteError::Task(inner) => assert!(matches!(
            inner.as_ref(),
            ComponentError::Config(ConfigError::UnknownPlugin { .. })
        )),
        other => panic!("unexpected error: {}", other),
    }
}

fn slow(input: IntModel, _: Option<&ExecReq>, _: &Kwargs) -> anyhow::Result<IntModel> {
    std::thread::sleep(Duration::from_millis(500));
    Ok(input)
}

#[test]
fn test_shutdown() {
    let cluster = cluster(1);
    let slow = Composer::function("slow", slow).remote().unwrap();

    let running = slow.compute_remote(&cluster, IntModel::new(1)).unwrap();
    let queued = slow.compute_remote(&cluster, IntModel::new(2)).unwrap();
    cluster.shutdown();

    assert!(!cluster.is_initialized());
    for handle in [running, queued] {
        let err = remote_error(handle.resolve(&cluster).unwrap_err());
        assert!(matches!(err, RemoteError::Cancelled { .. }));
    }

    let err = remote_error(slow.compute_remote(&cluster, IntModel::new(1)).unwrap_err());
    assert!(matches!(err, RemoteError::SchedulerUnavailable));
}
