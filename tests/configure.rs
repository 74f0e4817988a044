mod common;

use common::*;
use podwarden::{ErrorCode, K8sAttestor, ManualClock};
use podwarden_config::{Config, ConfigBuilder, KubeletConfig};
use std::sync::Arc;

fn configure(config: Config) -> podwarden::Result<K8sAttestor> {
    let workspace = Workspace::new();
    K8sAttestor::configure(&config, workspace.deps(Arc::new(ManualClock::new()), &[]))
}

#[tokio::test]
async fn test_both_ports_rejected() {
    let config = Config {
        kubelet: KubeletConfig {
            read_only_port: Some(10255),
            secure_port: Some(10250),
            ..Default::default()
        },
        ..Default::default()
    };

    let err = configure(config).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert!(
        err.to_string()
            .contains("cannot use both the read-only and secure port"),
        "{err}"
    );
}

#[tokio::test]
async fn test_zero_poll_attempts_rejected() {
    let err = configure(
        ConfigBuilder::new()
            .with_read_only_port(10255)
            .with_max_poll_attempts(0)
            .build(),
    )
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert!(err.to_string().contains("max_poll_attempts"), "{err}");
}

#[tokio::test]
async fn test_malformed_intervals_rejected() {
    for config in [
        ConfigBuilder::new()
            .with_read_only_port(10255)
            .with_poll_retry_interval("soon")
            .build(),
        ConfigBuilder::new()
            .with_read_only_port(10255)
            .with_reload_interval("-1")
            .build(),
    ] {
        let err = configure(config).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }
}

#[tokio::test]
async fn test_toml_config_builds_attestor() {
    let kubelet = FakeKubelet::insecure().await;
    let config = Config::from_toml_str(&format!(
        r#"
        [kubelet]
        read_only_port = {}
        max_poll_attempts = 2
        poll_retry_interval = "250ms"
        disable_container_selectors = true
        "#,
        kubelet.port()
    ))
    .unwrap();

    let attestor = configure(config).unwrap();
    assert_eq!(
        attestor.kubelet_url().as_str(),
        format!("http://127.0.0.1:{}/", kubelet.port())
    );
    assert_eq!(attestor.trust().to_string(), "read-only");
}
