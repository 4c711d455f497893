//! envstack - per-environment deployment provisioning
//!
//! ## Commands
//!
//! - `up`: render, build and apply an environment's resources
//! - `preview`: show what `up` would change without applying
//! - `destroy`: tear down an environment (refused for critical ones)
//! - `render`: write the rendered manifest only
//! - `outputs`: print the environment's resolved identity (nothing is
//!   applied or exported; `up` exports outputs after a successful apply)

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use envstack_core::outputs::{append_outputs_env, render_outputs_env, write_outputs_json};
use envstack_core::template::render_to_file;
use envstack_core::{
    obs, ChangeAction, DeployContext, FeatureFlags, NamingConfig, Pipeline, PipelineConfig,
    PlannedChange, Providers, RunId, StackOutputs,
};
use envstack_providers::{
    EnvConfigSource, GithubConfig, GithubEnvironments, KubectlCluster, KubectlConfig,
};
use envstack_state::{ConfigSource, FileStateStore, SecretValue};
use serde::Serialize;
use tracing::{info, Level};

/// Secret config key consulted when `--github-token` is not given.
const GITHUB_TOKEN_CONFIG_KEY: &str = "githubToken";

#[derive(Parser)]
#[command(name = "envstack")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Per-environment deployment provisioning", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines and JSON results
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render, build and apply the environment's resources
    Up(UpArgs),

    /// Show planned changes without applying them
    Preview(StackArgs),

    /// Delete every resource recorded for the environment
    Destroy(StackArgs),

    /// Render the workload manifest and print its path
    Render(StackArgs),

    /// Print the resolved environment, image and namespace
    Outputs(StackArgs),
}

#[derive(Args, Debug, Clone)]
struct StackArgs {
    /// Environment (stack) name, e.g. dev, staging-main, production
    #[arg(short, long, env = "ENVSTACK_ENVIRONMENT")]
    environment: String,

    /// Directory holding envstack.<environment>.toml
    #[arg(long, env = "ENVSTACK_CONFIG_DIR", default_value = ".")]
    config_dir: PathBuf,

    /// Workload manifest template
    #[arg(long, env = "ENVSTACK_TEMPLATE", default_value = "k8s/deployment.yaml")]
    template: PathBuf,

    /// Directory for rendered manifests
    #[arg(long, env = "ENVSTACK_RENDER_DIR", default_value = "infra/rendered")]
    render_dir: PathBuf,

    /// Directory for per-environment state files
    #[arg(long, env = "ENVSTACK_STATE_DIR", default_value = ".envstack/state")]
    state_dir: PathBuf,

    /// Assume the namespace already exists instead of managing it
    #[arg(long)]
    no_namespace: bool,

    /// Skip the registry pull credential (public images)
    #[arg(long)]
    no_pull_credential: bool,

    /// Registry host used in the image reference
    #[arg(long, env = "ENVSTACK_REGISTRY_HOST", default_value = "ghcr.io")]
    registry_host: String,

    /// Prefix of the namespace name
    #[arg(long, env = "ENVSTACK_NAMESPACE_PREFIX", default_value = "hello-world")]
    namespace_prefix: String,

    /// kubectl executable
    #[arg(long, env = "ENVSTACK_KUBECTL", default_value = "kubectl")]
    kubectl: PathBuf,

    /// kubectl context
    #[arg(long, env = "ENVSTACK_KUBE_CONTEXT")]
    kube_context: Option<String>,

    /// Timeout for each kubectl invocation in seconds (0 disables)
    #[arg(long, default_value = "120")]
    kubectl_timeout: u64,

    /// GitHub API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    github_api: String,

    /// Token for managing GitHub environments
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct UpArgs {
    #[command(flatten)]
    stack: StackArgs,

    /// After a successful apply, write outputs as JSON to this file
    #[arg(long)]
    outputs_json: Option<PathBuf>,

    /// After a successful apply, append outputs as name=value lines to this file
    #[arg(long, env = "GITHUB_OUTPUT")]
    github_output: Option<PathBuf>,
}

impl StackArgs {
    fn features(&self) -> FeatureFlags {
        FeatureFlags {
            with_namespace: !self.no_namespace,
            with_pull_credential: !self.no_pull_credential,
        }
    }

    fn naming(&self) -> NamingConfig {
        NamingConfig {
            registry_host: self.registry_host.clone(),
            namespace_prefix: self.namespace_prefix.clone(),
        }
    }

    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            naming: self.naming(),
            features: self.features(),
            template_path: self.template.clone(),
            render_dir: self.render_dir.clone(),
        }
    }

    fn kubectl_config(&self) -> KubectlConfig {
        KubectlConfig {
            binary: self.kubectl.clone(),
            context: self.kube_context.clone(),
            timeout_secs: self.kubectl_timeout,
        }
    }

    fn load_config(&self) -> Result<EnvConfigSource> {
        EnvConfigSource::load(&self.config_dir, &self.environment).with_context(|| {
            format!(
                "Failed to load configuration for {} from {:?}",
                self.environment, self.config_dir
            )
        })
    }

    fn github_token(&self, source: &dyn ConfigSource) -> Option<SecretValue> {
        self.github_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .map(SecretValue::new)
            .or_else(|| source.get_secret(GITHUB_TOKEN_CONFIG_KEY))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    envstack_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Up(args) => cmd_up(&args, cli.json).await,
        Commands::Preview(args) => cmd_preview(&args, cli.json).await,
        Commands::Destroy(args) => cmd_destroy(&args, cli.json).await,
        Commands::Render(args) => cmd_render(&args),
        Commands::Outputs(args) => cmd_outputs(&args, cli.json),
    }
}

/// Concrete adapters for one run.
struct Adapters {
    source: EnvConfigSource,
    cluster: KubectlCluster,
    github: GithubEnvironments,
    store: FileStateStore,
}

impl Adapters {
    fn build(args: &StackArgs) -> Result<Self> {
        let source = args.load_config()?;
        let ctx = DeployContext::resolve(&args.environment, &source, &args.naming())
            .context("Failed to resolve deployment context")?;

        let mut github = GithubConfig::new(&ctx.repository().owner).with_api_base(&args.github_api);
        if let Some(token) = args.github_token(&source) {
            github = github.with_token(token);
        }

        Ok(Adapters {
            cluster: KubectlCluster::new(args.kubectl_config()),
            github: GithubEnvironments::new(github).context("Failed to create GitHub client")?,
            store: FileStateStore::new(&args.state_dir)
                .with_context(|| format!("Failed to open state directory {:?}", args.state_dir))?,
            source,
        })
    }

    fn pipeline(&self, args: &StackArgs) -> Result<Pipeline<'_>> {
        let providers = Providers {
            namespaces: &self.cluster,
            secrets: &self.cluster,
            environments: &self.github,
            manifests: &self.cluster,
        };
        Pipeline::new(
            &args.environment,
            &self.source,
            providers,
            &self.store,
            args.pipeline_config(),
        )
        .context("Failed to resolve deployment context")
    }
}

#[derive(Serialize)]
struct UpSummary<'a> {
    run_id: String,
    outputs: &'a StackOutputs,
    changes: &'a [PlannedChange],
}

async fn cmd_up(up: &UpArgs, json: bool) -> Result<()> {
    let args = &up.stack;
    let adapters = Adapters::build(args)?;
    let pipeline = adapters.pipeline(args)?;
    let outcome = pipeline
        .up()
        .await
        .with_context(|| format!("Deployment of {} failed", args.environment))?;

    if json {
        let summary = UpSummary {
            run_id: outcome.run_id.to_string(),
            outputs: &outcome.outputs,
            changes: &outcome.report.changes,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", render_changes(&outcome.report.changes));
        println!(
            "{} changed, {} unchanged",
            outcome.report.changed_count(),
            outcome.report.unchanged_count()
        );
        print!("{}", render_outputs_env(&outcome.outputs));
    }

    export_outputs(up, &outcome.outputs)
}

async fn cmd_preview(args: &StackArgs, json: bool) -> Result<()> {
    let adapters = Adapters::build(args)?;
    let pipeline = adapters.pipeline(args)?;
    let outcome = pipeline
        .preview()
        .await
        .with_context(|| format!("Preview of {} failed", args.environment))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.plan)?);
    } else {
        let changes: Vec<PlannedChange> = outcome.plan.changes().cloned().collect();
        print!("{}", render_changes(&changes));
        if !outcome.plan.has_changes() {
            println!("No changes.");
        }
    }
    Ok(())
}

async fn cmd_destroy(args: &StackArgs, json: bool) -> Result<()> {
    let adapters = Adapters::build(args)?;
    let pipeline = adapters.pipeline(args)?;
    let outcome = pipeline
        .destroy()
        .await
        .with_context(|| format!("Destroy of {} failed", args.environment))?;

    let deleted: Vec<&str> = outcome.report.deleted.iter().map(|k| k.as_str()).collect();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "run_id": outcome.run_id.to_string(),
                "environment": &outcome.report.environment,
                "deleted": deleted,
            }))?
        );
    } else if deleted.is_empty() {
        println!("Nothing to destroy for {}", outcome.report.environment);
    } else {
        for key in &deleted {
            println!("  - {}", key);
        }
        println!("{} resources deleted", deleted.len());
    }
    Ok(())
}

fn cmd_render(args: &StackArgs) -> Result<()> {
    let source = args.load_config()?;
    let ctx = DeployContext::resolve(&args.environment, &source, &args.naming())
        .context("Failed to resolve deployment context")?;
    let run_id = RunId::new().to_string();
    let _span = obs::RunSpan::enter(&run_id, ctx.environment().as_str());

    let manifest = render_to_file(&args.template, &args.render_dir, &ctx)
        .with_context(|| format!("Failed to render {:?}", args.template))?;
    info!(path = %manifest.path.display(), "manifest rendered");
    println!("{}", manifest.path.display());
    Ok(())
}

fn cmd_outputs(args: &StackArgs, json: bool) -> Result<()> {
    let source = args.load_config()?;
    let ctx = DeployContext::resolve(&args.environment, &source, &args.naming())
        .context("Failed to resolve deployment context")?;
    let outputs = StackOutputs::from_context(&ctx);

    if json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
    } else {
        print!("{}", render_outputs_env(&outputs));
    }
    Ok(())
}

fn export_outputs(args: &UpArgs, outputs: &StackOutputs) -> Result<()> {
    if let Some(path) = &args.outputs_json {
        write_outputs_json(path, outputs)?;
    }
    if let Some(path) = args.github_output.as_deref().filter(|p| !is_blank(p)) {
        append_outputs_env(path, outputs)?;
    }
    Ok(())
}

fn is_blank(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

/// One line per change: `+` create, `~` update, `±` replace, `-` delete,
/// `=` released (no longer managed, left in place).
fn render_changes(changes: &[PlannedChange]) -> String {
    let mut out = String::new();
    for change in changes {
        let marker = match change.action {
            ChangeAction::Create => "+",
            ChangeAction::Update => "~",
            ChangeAction::Replace => "±",
            ChangeAction::Delete => "-",
            ChangeAction::Release => "=",
            ChangeAction::Unchanged => " ",
        };
        let protected = if change.protect { " [protected]" } else { "" };
        out.push_str(&format!(
            "{} {} ({}){}\n",
            marker, change.key, change.kind, protected
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use envstack_state::{ResourceKey, ResourceKind};
    use std::collections::HashMap;

    fn env_map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn stack_args(cli: Cli) -> StackArgs {
        match cli.command {
            Commands::Up(a) => a.stack,
            Commands::Preview(a)
            | Commands::Destroy(a)
            | Commands::Render(a)
            | Commands::Outputs(a) => a,
        }
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_up_defaults() {
        let args = stack_args(parse(&["envstack", "up", "--environment", "dev"]));
        assert_eq!(args.environment, "dev");
        let config = args.pipeline_config();
        assert_eq!(config.features, FeatureFlags::full());
        assert_eq!(config.template_path, PathBuf::from("k8s/deployment.yaml"));
        assert_eq!(config.render_dir, PathBuf::from("infra/rendered"));
        assert_eq!(config.naming, NamingConfig::default());
    }

    #[test]
    fn test_feature_flags_from_switches() {
        let args = stack_args(parse(&[
            "envstack",
            "preview",
            "-e",
            "dev",
            "--no-namespace",
            "--no-pull-credential",
        ]));
        assert_eq!(args.features(), FeatureFlags::workload_only());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&["envstack", "destroy", "-e", "dev", "--json", "-v"]);
        assert!(cli.json);
        assert!(cli.verbose);
    }

    #[test]
    fn test_github_token_flag_wins_over_config() {
        let mut args = stack_args(parse(&["envstack", "up", "-e", "dev"]));
        let source = EnvConfigSource::from_values(env_map(&[("githubToken", "from-file")]))
            .with_env(HashMap::new());

        args.github_token = Some("from-flag".to_string());
        assert_eq!(args.github_token(&source).unwrap().expose(), "from-flag");

        args.github_token = None;
        assert_eq!(args.github_token(&source).unwrap().expose(), "from-file");
    }

    #[test]
    fn test_render_changes_markers() {
        let changes = vec![
            PlannedChange {
                key: ResourceKey::new("ns-production"),
                kind: ResourceKind::Namespace,
                action: ChangeAction::Create,
                protect: true,
            },
            PlannedChange {
                key: ResourceKey::new("gh-env-production"),
                kind: ResourceKind::RemoteEnvironmentRecord,
                action: ChangeAction::Unchanged,
                protect: true,
            },
        ];
        let text = render_changes(&changes);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("+ ns-production ("));
        assert!(lines[0].ends_with("[protected]"));
        assert!(lines[1].starts_with("  gh-env-production"));
    }

    #[test]
    fn test_export_flags_belong_to_up() {
        let cli = parse(&[
            "envstack",
            "up",
            "-e",
            "dev",
            "--outputs-json",
            "out.json",
            "--github-output",
            "gh.txt",
        ]);
        match cli.command {
            Commands::Up(up) => {
                assert_eq!(up.stack.environment, "dev");
                assert_eq!(up.outputs_json, Some(PathBuf::from("out.json")));
                assert_eq!(up.github_output, Some(PathBuf::from("gh.txt")));
            }
            _ => panic!("expected up"),
        }

        for command in ["outputs", "preview", "render", "destroy"] {
            let parsed =
                Cli::try_parse_from(["envstack", command, "-e", "dev", "--github-output", "x"]);
            assert!(parsed.is_err(), "{command}");
        }
    }

    #[test]
    fn test_export_outputs_writes_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let json_path = dir.path().join("outputs.json");
        let gh_path = dir.path().join("github_output");
        let json_arg = json_path.to_string_lossy().to_string();
        let gh_arg = gh_path.to_string_lossy().to_string();

        let up = match parse(&[
            "envstack",
            "up",
            "-e",
            "dev",
            "--outputs-json",
            &json_arg,
            "--github-output",
            &gh_arg,
        ])
        .command
        {
            Commands::Up(up) => up,
            _ => panic!("expected up"),
        };
        let outputs = StackOutputs {
            environment: "dev".to_string(),
            image: "ghcr.io/acme/widgets:dev".to_string(),
            namespace: "hello-world-dev".to_string(),
        };
        export_outputs(&up, &outputs).unwrap();

        let written: StackOutputs =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(written.namespace, "hello-world-dev");
        assert_eq!(
            std::fs::read_to_string(&gh_path).unwrap(),
            render_outputs_env(&outputs)
        );
    }

    #[test]
    fn test_outputs_command_resolves_without_exporting() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("envstack.dev.toml"),
            "githubRepository = \"acme/widgets\"\n",
        )
        .unwrap();
        let config_dir = dir.path().to_string_lossy().to_string();

        let args = stack_args(parse(&[
            "envstack",
            "outputs",
            "-e",
            "dev",
            "--config-dir",
            &config_dir,
        ]));
        cmd_outputs(&args, true).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
