//! Tests for default values and partial sections.

use fob_config::{DevConfig, MissingModule, RuntimeConfig};

#[test]
fn dev_config_defaults() {
    let config = DevConfig::default();
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.port, 3000);
    assert!(!config.open_browser);
    assert_eq!(config.server_url(), "http://127.0.0.1:3000");
}

#[test]
fn hmr_and_lazy_defaults() {
    let config = DevConfig::default();
    assert_eq!(config.hmr.path, "/__hmr");
    assert_eq!(config.hmr.max_retries, 2);
    assert!(config.hmr.overlay);

    assert!(!config.lazy_compilation.enabled);
    assert_eq!(config.lazy_compilation.path, "/__lazy_compile");
    assert!(!config.lazy_compilation.node);
}

#[test]
fn watch_defaults_ignore_build_output() {
    let config = DevConfig::default();
    for ignored in ["node_modules", ".git", "dist", "build"] {
        assert!(config.watch.ignore.iter().any(|p| p == ignored));
    }
    assert_eq!(config.watch.debounce_ms, 100);
}

#[test]
fn partial_section_keeps_field_defaults() {
    let config: DevConfig = toml::from_str(
        r#"
port = 5173

[hmr]
max_retries = 0
"#,
    )
    .unwrap();

    assert_eq!(config.port, 5173);
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.hmr.max_retries, 0);
    assert_eq!(config.hmr.path, "/__hmr");
    assert!(config.hmr.overlay);
    assert_eq!(config.runtime, RuntimeConfig::default());
}

#[test]
fn runtime_json_uses_camel_case() {
    let mut runtime = RuntimeConfig {
        missing_module: MissingModule::Empty,
        ..Default::default()
    };
    runtime.env.insert("NODE_ENV".into(), "development".into());

    assert_eq!(
        runtime.to_runtime_json(),
        serde_json::json!({
            "publicPath": "/",
            "missingModule": "empty",
            "env": { "NODE_ENV": "development" },
        })
    );
}
