//! Test doubles and builders for the host agent.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use byoh_client::{MockStore, RecordingEventPublisher};
use crds::constants::{ATTACHED_BYO_MACHINE_LABEL, CLUSTER_NAME_LABEL, HOST_CLEANUP_ANNOTATION};
use crds::references::secret_reference;
use crds::{ByoHost, ByoHostSpec};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::cloudinit::{CloudInitError, CommandRunner, FileWriter, ScriptExecutor, WriteFile};
use crate::reconciler::{Collaborators, HostReconciler};
use crate::runtime::{ContainerRuntime, RuntimeError};

type RunHook = Box<dyn Fn() + Send>;

/// Records every command; commands listed in `failures` fail with the given message.
#[derive(Clone, Default)]
pub struct FakeCommandRunner {
    commands: Arc<Mutex<Vec<String>>>,
    failures: Arc<Mutex<HashMap<String, String>>>,
    timeouts: Arc<Mutex<Vec<Duration>>>,
    hooks: Arc<Mutex<HashMap<String, RunHook>>>,
}

impl FakeCommandRunner {
    pub fn fail(&self, cmd: &str, message: &str) {
        self.failures.lock().unwrap().insert(cmd.to_string(), message.to_string());
    }

    /// Runs `hook` every time `cmd` executes, while the command is "running".
    pub fn on_run(&self, cmd: &str, hook: impl Fn() + Send + 'static) {
        self.hooks.lock().unwrap().insert(cmd.to_string(), Box::new(hook));
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.commands.lock().unwrap().clear();
    }

    fn run(&self, cmd: &str) -> Result<(), CloudInitError> {
        self.commands.lock().unwrap().push(cmd.to_string());
        if let Some(hook) = self.hooks.lock().unwrap().get(cmd) {
            hook();
        }
        match self.failures.lock().unwrap().get(cmd) {
            Some(msg) => Err(CloudInitError::Failed(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeCommandRunner {
    async fn run_cmd(&self, cmd: &str) -> Result<(), CloudInitError> {
        self.run(cmd)
    }

    async fn run_cmd_with_timeout(&self, cmd: &str, timeout: Duration) -> Result<(), CloudInitError> {
        self.timeouts.lock().unwrap().push(timeout);
        self.run(cmd)
    }
}

#[derive(Clone, Default)]
pub struct FakeFileWriter {
    pub dirs: Arc<Mutex<Vec<String>>>,
    pub files: Arc<Mutex<Vec<WriteFile>>>,
}

#[async_trait]
impl FileWriter for FakeFileWriter {
    async fn mkdir_if_not_exists(&self, dir: &str) -> Result<(), CloudInitError> {
        self.dirs.lock().unwrap().push(dir.to_string());
        Ok(())
    }

    async fn write_to_file(&self, file: &WriteFile) -> Result<(), CloudInitError> {
        self.files.lock().unwrap().push(file.clone());
        Ok(())
    }
}

/// Container runtime whose stop/remove calls fail a configurable number of times.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    pub containers: Arc<Mutex<Vec<String>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub stop_failures: Arc<Mutex<usize>>,
    pub not_running: Arc<Mutex<bool>>,
}

impl FakeRuntime {
    pub fn with_containers(ids: &[&str]) -> Self {
        let rt = Self::default();
        *rt.containers.lock().unwrap() = ids.iter().map(|s| (*s).to_string()).collect();
        rt
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn connect(&self) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push("connect".into());
        Ok(())
    }

    async fn is_running(&self) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push("is_running".into());
        if *self.not_running.lock().unwrap() {
            return Err(RuntimeError::NotRunning("RuntimeReady is false".into()));
        }
        Ok(())
    }

    async fn list_kube_containers(&self) -> Result<Vec<String>, RuntimeError> {
        self.calls.lock().unwrap().push("list".into());
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn stop_pod_sandbox(&self, id: &str) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push(format!("stop {}", id));
        let mut failures = self.stop_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(RuntimeError::Stop { id: id.to_string(), reason: "busy".into() });
        }
        Ok(())
    }

    async fn remove_pod_sandbox(&self, id: &str) -> Result<(), RuntimeError> {
        self.calls.lock().unwrap().push(format!("remove {}", id));
        self.containers.lock().unwrap().retain(|c| c != id);
        Ok(())
    }
}

pub fn create_test_secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| ((*k).to_string(), ByteString(v.as_bytes().to_vec())))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Default::default()
    }
}

pub fn create_test_host(namespace: &str, name: &str) -> ByoHost {
    let mut host = ByoHost::new(name, ByoHostSpec::default());
    host.metadata.namespace = Some(namespace.to_string());
    host
}

/// Host claimed by machine `m1` with bootstrap secret `bootstrap` and,
/// when `with_install` is set, installation secret `install`.
pub fn create_claimed_host(namespace: &str, name: &str, with_install: bool) -> ByoHost {
    let mut host = create_test_host(namespace, name);
    host.metadata.labels = Some(BTreeMap::from([
        (CLUSTER_NAME_LABEL.to_string(), "c1".to_string()),
        (ATTACHED_BYO_MACHINE_LABEL.to_string(), format!("{}.m1", namespace)),
    ]));
    host.status_mut().machine_ref = Some(ObjectReference {
        api_version: Some("infrastructure.cluster.x-k8s.io/v1beta1".into()),
        kind: Some("ByoMachine".into()),
        namespace: Some(namespace.to_string()),
        name: Some("m1".into()),
        ..Default::default()
    });
    host.spec.bootstrap_secret = Some(secret_reference(namespace, "bootstrap"));
    if with_install {
        host.spec.installation_secret = Some(secret_reference(namespace, "install"));
    }
    host
}

pub fn mark_for_cleanup(host: &mut ByoHost) {
    host.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(HOST_CLEANUP_ANNOTATION.to_string(), String::new());
}

pub const BOOTSTRAP_SCRIPT: &str = "write_files:\n- path: /tmp/bootstrap/a.txt\n  content: hello\nrunCmd:\n- kubeadm join\n";

/// Everything a [`HostReconciler`] test needs to arrange and inspect.
pub struct Fixture {
    pub hosts: MockStore<ByoHost>,
    pub secrets: MockStore<Secret>,
    pub events: RecordingEventPublisher,
    pub runner: FakeCommandRunner,
    pub writer: FakeFileWriter,
    pub runtime: FakeRuntime,
}

impl Fixture {
    pub fn new() -> Self {
        let fx = Self {
            hosts: MockStore::new(),
            secrets: MockStore::new(),
            events: RecordingEventPublisher::new(),
            runner: FakeCommandRunner::default(),
            writer: FakeFileWriter::default(),
            runtime: FakeRuntime::default(),
        };
        fx.secrets.insert(create_test_secret("default", "bootstrap", &[("value", BOOTSTRAP_SCRIPT)]));
        fx.secrets.insert(create_test_secret(
            "default",
            "install",
            &[("install", "install-k8s"), ("uninstall", "uninstall-k8s")],
        ));
        fx
    }

    pub fn reconciler(&self, skip_k8s_installation: bool) -> HostReconciler {
        self.reconciler_with_runner(skip_k8s_installation, Arc::new(self.runner.clone()))
    }

    pub fn reconciler_with_runner(&self, skip_k8s_installation: bool, runner: Arc<dyn CommandRunner>) -> HostReconciler {
        HostReconciler::new(
            Collaborators {
                hosts: Arc::new(self.hosts.clone()),
                secrets: Arc::new(self.secrets.clone()),
                events: Arc::new(self.events.clone()),
                runner: runner.clone(),
                executor: ScriptExecutor::new(Arc::new(self.writer.clone()), runner, "host-1"),
                runtime: Arc::new(self.runtime.clone()),
            },
            skip_k8s_installation,
        )
    }

    pub fn host(&self, name: &str) -> ByoHost {
        self.hosts.snapshot("default", name).unwrap()
    }
}
