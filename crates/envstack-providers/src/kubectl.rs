//! kubectl-backed cluster adapter
//!
//! Implements [`NamespaceProvider`], [`SecretProvider`] and [`ManifestApplier`]
//! by shelling out to `kubectl`. Namespaces and secrets are piped to
//! `kubectl apply -f -` as JSON documents, so secret material only ever
//! travels over the child's stdin. Deletions pass `--ignore-not-found`, which
//! makes every delete idempotent. Workloads are deleted by the object names
//! `kubectl apply -o name` reported, never by re-reading the manifest file.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use envstack_state::{
    ManifestApplier, NamespaceHandle, NamespaceProvider, ProviderError, ProviderResult,
    ResourceKey, SecretHandle, SecretProvider, SecretRequest, WorkloadHandle,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Annotation set on objects of critical environments.
pub const PROTECTED_ANNOTATION: &str = "envstack.io/protected";
/// Annotation listing the resource keys an object was declared to depend on.
pub const DEPENDS_ON_ANNOTATION: &str = "envstack.io/depends-on";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubectlConfig {
    /// kubectl executable
    pub binary: PathBuf,
    /// `--context` to pass, if any
    pub context: Option<String>,
    /// Per-invocation timeout; 0 disables it
    pub timeout_secs: u64,
}

impl Default for KubectlConfig {
    fn default() -> Self {
        KubectlConfig {
            binary: PathBuf::from("kubectl"),
            context: None,
            timeout_secs: 120,
        }
    }
}

/// Cluster adapter driving `kubectl`.
#[derive(Debug, Clone, Default)]
pub struct KubectlCluster {
    config: KubectlConfig,
}

fn metadata(
    name: &str,
    namespace: Option<&str>,
    protect: bool,
    depends_on: &[ResourceKey],
) -> Value {
    let mut annotations = Map::new();
    if protect {
        annotations.insert(PROTECTED_ANNOTATION.to_string(), json!("true"));
    }
    if !depends_on.is_empty() {
        let keys: Vec<&str> = depends_on.iter().map(ResourceKey::as_str).collect();
        annotations.insert(DEPENDS_ON_ANNOTATION.to_string(), json!(keys.join(",")));
    }

    let mut meta = Map::new();
    meta.insert("name".to_string(), json!(name));
    if let Some(ns) = namespace {
        meta.insert("namespace".to_string(), json!(ns));
    }
    meta.insert("labels".to_string(), json!({ MANAGED_BY_LABEL: "envstack" }));
    meta.insert("annotations".to_string(), Value::Object(annotations));
    Value::Object(meta)
}

/// `Namespace` object for `kubectl apply`.
pub fn namespace_document(name: &str, protect: bool) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": metadata(name, None, protect, &[]),
    })
}

/// `Secret` object for `kubectl apply`, with the payload under `stringData`.
pub fn secret_document(
    request: &SecretRequest,
    protect: bool,
    depends_on: &[ResourceKey],
) -> Value {
    let data: Map<String, Value> = request
        .data
        .iter()
        .map(|(k, v)| (k.clone(), json!(v.expose())))
        .collect();
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": metadata(&request.name, Some(&request.namespace), protect, depends_on),
        "type": request.secret_type,
        "stringData": data,
    })
}

fn is_namespace_missing(stderr: &str, namespace: &str) -> bool {
    stderr.contains(&format!("namespaces \"{}\" not found", namespace))
}

impl KubectlCluster {
    pub fn new(config: KubectlConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KubectlConfig {
        &self.config
    }

    /// Full argument list for one invocation, `--context` first.
    pub fn command_args(&self, args: &[&str]) -> Vec<String> {
        let mut out = Vec::with_capacity(args.len() + 2);
        if let Some(ctx) = &self.config.context {
            out.push("--context".to_string());
            out.push(ctx.clone());
        }
        out.extend(args.iter().map(|a| a.to_string()));
        out
    }

    /// Run kubectl, optionally feeding `stdin`, and return its stdout.
    async fn run(&self, args: &[&str], stdin: Option<String>) -> ProviderResult<String> {
        let args = self.command_args(args);
        let command = format!("{} {}", self.config.binary.display(), args.join(" "));
        debug!(command = %command, "running kubectl");

        let mut child = Command::new(&self.config.binary)
            .args(&args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            match pipe.write_all(input.as_bytes()).await {
                Ok(()) => {}
                // The exit status reports why the child stopped reading.
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Err(e) => return Err(e.into()),
            }
            drop(pipe);
        }

        let output = if self.config.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(self.config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| ProviderError::Command {
                command: command.clone(),
                status: -1,
                stderr: format!("timed out after {}s", self.config.timeout_secs),
            })??
        } else {
            child.wait_with_output().await?
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(ProviderError::Command {
                command,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn apply_document(&self, document: &Value) -> ProviderResult<String> {
        let body = serde_json::to_string(document)?;
        self.run(&["apply", "-f", "-"], Some(body)).await
    }

    /// Set `annotation` (`key=value`, or `key-` to remove) on applied objects.
    async fn annotate(
        &self,
        namespace: &str,
        objects: &[String],
        annotation: &str,
    ) -> ProviderResult<()> {
        let mut args = vec!["annotate", "--overwrite", "-n", namespace];
        args.extend(objects.iter().map(String::as_str));
        args.push(annotation);
        self.run(&args, None).await?;
        Ok(())
    }
}

#[async_trait]
impl NamespaceProvider for KubectlCluster {
    async fn ensure_namespace(
        &self,
        name: &str,
        protect: bool,
    ) -> ProviderResult<NamespaceHandle> {
        self.apply_document(&namespace_document(name, protect)).await?;
        info!(namespace = %name, protect, "namespace applied");
        Ok(NamespaceHandle {
            name: name.to_string(),
        })
    }

    async fn delete_namespace(&self, handle: &NamespaceHandle) -> ProviderResult<()> {
        self.run(&["delete", "namespace", &handle.name, "--ignore-not-found"], None)
            .await?;
        info!(namespace = %handle.name, "namespace deleted");
        Ok(())
    }
}

#[async_trait]
impl SecretProvider for KubectlCluster {
    async fn ensure_secret(
        &self,
        request: &SecretRequest,
        protect: bool,
        depends_on: &[ResourceKey],
    ) -> ProviderResult<SecretHandle> {
        let document = secret_document(request, protect, depends_on);
        match self.apply_document(&document).await {
            Ok(_) => {}
            Err(ProviderError::Command { stderr, .. })
                if is_namespace_missing(&stderr, &request.namespace) =>
            {
                return Err(ProviderError::NotFound {
                    resource: format!("namespace/{}", request.namespace),
                })
            }
            Err(e) => return Err(e),
        }
        info!(
            namespace = %request.namespace,
            secret = %request.name,
            protect,
            "secret applied"
        );
        Ok(SecretHandle {
            namespace: request.namespace.clone(),
            name: request.name.clone(),
        })
    }

    async fn delete_secret(&self, handle: &SecretHandle) -> ProviderResult<()> {
        self.run(
            &[
                "delete",
                "secret",
                &handle.name,
                "--namespace",
                &handle.namespace,
                "--ignore-not-found",
            ],
            None,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ManifestApplier for KubectlCluster {
    async fn apply_manifest(
        &self,
        path: &Path,
        namespace: &str,
        protect: bool,
        depends_on: &[ResourceKey],
    ) -> ProviderResult<WorkloadHandle> {
        let file = path.to_string_lossy();
        let stdout = self
            .run(&["apply", "-f", &file, "-n", namespace, "-o", "name"], None)
            .await?;
        let objects = parse_object_names(&stdout);

        if !objects.is_empty() {
            let protected = if protect {
                format!("{}=true", PROTECTED_ANNOTATION)
            } else {
                format!("{}-", PROTECTED_ANNOTATION)
            };
            self.annotate(namespace, &objects, &protected).await?;
            if !depends_on.is_empty() {
                let keys: Vec<&str> = depends_on.iter().map(ResourceKey::as_str).collect();
                let annotation = format!("{}={}", DEPENDS_ON_ANNOTATION, keys.join(","));
                self.annotate(namespace, &objects, &annotation).await?;
            }
        }

        info!(
            manifest = %path.display(),
            namespace = %namespace,
            objects = objects.len(),
            protect,
            "manifest applied"
        );
        Ok(WorkloadHandle {
            manifest_path: path.to_path_buf(),
            namespace: namespace.to_string(),
            objects,
        })
    }

    async fn delete_manifest(&self, handle: &WorkloadHandle) -> ProviderResult<()> {
        if handle.objects.is_empty() {
            return Ok(());
        }
        let owned = delete_objects_args(handle);
        let args: Vec<&str> = owned.iter().map(String::as_str).collect();
        self.run(&args, None).await?;
        info!(
            namespace = %handle.namespace,
            objects = handle.objects.len(),
            "workload deleted"
        );
        Ok(())
    }
}

/// Object names printed by `kubectl apply -o name`, one per line.
fn parse_object_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// `kubectl delete` arguments for the objects recorded in `handle`.
fn delete_objects_args(handle: &WorkloadHandle) -> Vec<String> {
    let mut args = vec![
        "delete".to_string(),
        "-n".to_string(),
        handle.namespace.clone(),
    ];
    args.extend(handle.objects.iter().cloned());
    args.push("--ignore-not-found".to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use envstack_state::SecretValue;
    use std::collections::BTreeMap;

    fn request() -> SecretRequest {
        let mut data = BTreeMap::new();
        data.insert(".dockerconfigjson".to_string(), SecretValue::new("{\"auths\":{}}"));
        SecretRequest {
            name: "ghcr-pull-secret".to_string(),
            namespace: "hello-world-dev".to_string(),
            secret_type: "kubernetes.io/dockerconfigjson".to_string(),
            data,
        }
    }

    fn with_binary(binary: &str) -> KubectlCluster {
        KubectlCluster::new(KubectlConfig {
            binary: PathBuf::from(binary),
            context: None,
            timeout_secs: 10,
        })
    }

    #[test]
    fn test_namespace_document_protection() {
        let doc = namespace_document("hello-world-production", true);
        assert_eq!(doc["kind"], "Namespace");
        assert_eq!(doc["metadata"]["annotations"][PROTECTED_ANNOTATION], "true");

        let doc = namespace_document("hello-world-dev", false);
        assert!(doc["metadata"]["annotations"]
            .as_object()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_secret_document_shape() {
        let deps = [ResourceKey::new("ns-dev")];
        let doc = secret_document(&request(), false, &deps);
        assert_eq!(doc["type"], "kubernetes.io/dockerconfigjson");
        assert_eq!(doc["metadata"]["namespace"], "hello-world-dev");
        assert_eq!(doc["stringData"][".dockerconfigjson"], "{\"auths\":{}}");
        assert_eq!(doc["metadata"]["annotations"][DEPENDS_ON_ANNOTATION], "ns-dev");
    }

    #[test]
    fn test_context_is_prepended() {
        let cluster = KubectlCluster::new(KubectlConfig {
            context: Some("kind-ci".to_string()),
            ..KubectlConfig::default()
        });
        assert_eq!(
            cluster.command_args(&["apply", "-f", "-"]),
            vec!["--context", "kind-ci", "apply", "-f", "-"]
        );
    }

    #[test]
    fn test_namespace_missing_detection() {
        let stderr = "Error from server (NotFound): error when creating \"STDIN\": namespaces \"hello-world-dev\" not found";
        assert!(is_namespace_missing(stderr, "hello-world-dev"));
        assert!(!is_namespace_missing(stderr, "other"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let cluster = with_binary("/nonexistent/kubectl-for-envstack-tests");
        let err = cluster.ensure_namespace("dev", false).await.unwrap_err();
        assert!(matches!(err, ProviderError::Io(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_binary_is_command_error() {
        let cluster = with_binary("false");
        let err = cluster
            .delete_namespace(&NamespaceHandle {
                name: "dev".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Command { status: 1, .. }));
    }

    fn workload(path: &str, objects: &[&str]) -> WorkloadHandle {
        WorkloadHandle {
            manifest_path: PathBuf::from(path),
            namespace: "hello-world-dev".to_string(),
            objects: objects.iter().map(|o| o.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_object_names() {
        let stdout = "deployment.apps/hello-world\nservice/hello-world\n\n";
        assert_eq!(
            parse_object_names(stdout),
            vec!["deployment.apps/hello-world", "service/hello-world"]
        );
    }

    #[test]
    fn test_delete_targets_recorded_objects_in_namespace() {
        let handle = workload(
            "infra/rendered/deployment.dev.yaml",
            &["deployment.apps/hello-world", "service/hello-world"],
        );
        assert_eq!(
            delete_objects_args(&handle),
            vec![
                "delete",
                "-n",
                "hello-world-dev",
                "deployment.apps/hello-world",
                "service/hello-world",
                "--ignore-not-found",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_delete_manifest_does_not_need_the_rendered_file() {
        let cluster = with_binary("true");
        let handle = workload(
            "/nonexistent/envstack-tests/deployment.dev.yaml",
            &["deployment.apps/hello-world"],
        );
        cluster.delete_manifest(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_manifest_without_objects_runs_nothing() {
        let cluster = with_binary("/nonexistent/kubectl-for-envstack-tests");
        let handle = workload("/nonexistent/deployment.dev.yaml", &[]);
        cluster.delete_manifest(&handle).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_binary_reports_the_command() {
        let cluster = with_binary("false");
        let err = cluster
            .delete_manifest(&workload("x.yaml", &["service/hello-world"]))
            .await
            .unwrap_err();
        match err {
            ProviderError::Command { command, .. } => {
                assert!(command.starts_with("false delete -n hello-world-dev"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_binary_returns_handle() {
        let cluster = with_binary("true");
        let handle = cluster.ensure_secret(&request(), true, &[]).await.unwrap();
        assert_eq!(handle.namespace, "hello-world-dev");
        assert_eq!(handle.name, "ghcr-pull-secret");
    }
}
