//! Resolution and rendering properties over a fake configuration source.

use envstack_core::context::{REPOSITORY_CONFIG_KEY, REPOSITORY_ENV_VAR};
use envstack_core::template::{render_to_file, rendered_path};
use envstack_core::{render, DeployContext, DeployError, NamingConfig, Substitutions};
use envstack_state::fakes::MemoryConfigSource;

fn resolve(env: &str, source: &MemoryConfigSource) -> Result<DeployContext, DeployError> {
    DeployContext::resolve(env, source, &NamingConfig::default())
}

#[test]
fn criticality_is_exact_and_case_sensitive() {
    let source = MemoryConfigSource::new().with_env(REPOSITORY_ENV_VAR, "acme/widgets");
    for (env, critical) in [
        ("production", true),
        ("staging-main", true),
        ("Production", false),
        ("staging", false),
        ("dev", false),
    ] {
        assert_eq!(resolve(env, &source).unwrap().is_critical(), critical, "{env}");
    }
}

#[test]
fn names_derive_from_environment_and_repository() {
    let source = MemoryConfigSource::new().with_env(REPOSITORY_ENV_VAR, "acme/widgets");
    let ctx = resolve("dev", &source).unwrap();
    assert_eq!(ctx.image(), "ghcr.io/acme/widgets:dev");
    assert_eq!(ctx.namespace(), "hello-world-dev");
    assert_eq!(ctx.registry_username(), "acme");
    assert_eq!(resolve("dev", &source).unwrap(), ctx);
}

#[test]
fn repository_splits_on_first_slash() {
    let source = MemoryConfigSource::new().with_env(REPOSITORY_ENV_VAR, "acme/widgets/sub");
    let ctx = resolve("dev", &source).unwrap();
    assert_eq!(ctx.repository().owner, "acme");
    assert_eq!(ctx.repository().repo, "widgets/sub");
}

#[test]
fn config_key_is_fallback_for_repository() {
    let source = MemoryConfigSource::new().with_config(REPOSITORY_CONFIG_KEY, "acme/widgets");
    assert_eq!(resolve("dev", &source).unwrap().repository().full_name(), "acme/widgets");

    let both = MemoryConfigSource::new()
        .with_env(REPOSITORY_ENV_VAR, "env/wins")
        .with_config(REPOSITORY_CONFIG_KEY, "acme/widgets");
    assert_eq!(resolve("dev", &both).unwrap().repository().full_name(), "env/wins");
}

#[test]
fn missing_or_malformed_repository_is_configuration_error() {
    let empty = MemoryConfigSource::new();
    assert!(matches!(resolve("dev", &empty), Err(DeployError::Configuration(_))));

    for bad in ["widgets", "/widgets", "acme/"] {
        let source = MemoryConfigSource::new().with_env(REPOSITORY_ENV_VAR, bad);
        assert!(
            matches!(resolve("dev", &source), Err(DeployError::Configuration(_))),
            "{bad}"
        );
    }
}

#[test]
fn empty_environment_is_configuration_error() {
    let source = MemoryConfigSource::new().with_env(REPOSITORY_ENV_VAR, "acme/widgets");
    assert!(matches!(resolve("", &source), Err(DeployError::Configuration(_))));
}

#[test]
fn path_like_environment_is_configuration_error() {
    let source = MemoryConfigSource::new().with_env(REPOSITORY_ENV_VAR, "acme/widgets");
    for bad in ["../escape", "a/b", "a\\b", ".hidden", "."] {
        assert!(
            matches!(resolve(bad, &source), Err(DeployError::Configuration(_))),
            "{bad}"
        );
    }
    assert!(resolve("staging-main", &source).is_ok());
    assert!(resolve("pr-42.preview", &source).is_ok());
}

#[test]
fn username_override() {
    let source = MemoryConfigSource::new()
        .with_env(REPOSITORY_ENV_VAR, "acme/widgets")
        .with_config("ghcrUsername", "deploy-bot");
    assert_eq!(resolve("dev", &source).unwrap().registry_username(), "deploy-bot");
}

#[test]
fn render_example() {
    let subs = Substitutions::new()
        .with("ENVIRONMENT", "prod")
        .with("NAMESPACE", "hello-world-prod")
        .with("IMAGE", "ghcr.io/acme/widgets:prod");
    assert_eq!(
        render("env={{ENVIRONMENT}} ns={{NAMESPACE}} img={{IMAGE}}", &subs),
        "env=prod ns=hello-world-prod img=ghcr.io/acme/widgets:prod"
    );
}

#[test]
fn rerender_overwrites_previous_file() {
    let dir = tempfile::tempdir().unwrap();
    let template = dir.path().join("deployment.yaml");
    let render_dir = dir.path().join("rendered");
    let source = MemoryConfigSource::new().with_env(REPOSITORY_ENV_VAR, "acme/widgets");
    let ctx = resolve("dev", &source).unwrap();

    std::fs::write(&template, "image: {{IMAGE}}\nextra: line\n").unwrap();
    render_to_file(&template, &render_dir, &ctx).unwrap();

    std::fs::write(&template, "image: {{IMAGE}}\n").unwrap();
    let manifest = render_to_file(&template, &render_dir, &ctx).unwrap();

    assert_eq!(manifest.path, rendered_path(&render_dir, "dev"));
    assert_eq!(
        std::fs::read_to_string(&manifest.path).unwrap(),
        "image: ghcr.io/acme/widgets:dev\n"
    );
}

#[test]
fn missing_template_is_template_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let source = MemoryConfigSource::new().with_env(REPOSITORY_ENV_VAR, "acme/widgets");
    let ctx = resolve("dev", &source).unwrap();
    let err = render_to_file(&dir.path().join("absent.yaml"), dir.path(), &ctx).unwrap_err();
    assert!(matches!(err, DeployError::TemplateRead { .. }));
}

#[test]
fn shipped_template_renders_every_token() {
    let template_path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../k8s/deployment.yaml");
    let dir = tempfile::tempdir().unwrap();
    let source = MemoryConfigSource::new().with_env(REPOSITORY_ENV_VAR, "acme/widgets");
    let ctx = resolve("staging-main", &source).unwrap();

    let manifest = render_to_file(&template_path, dir.path(), &ctx).unwrap();
    assert!(!manifest.content.contains("{{"));
    assert!(manifest.content.contains("namespace: hello-world-staging-main"));
    assert!(manifest.content.contains("image: ghcr.io/acme/widgets:staging-main"));
    assert!(manifest.content.contains("name: ghcr-pull-secret"));
}
