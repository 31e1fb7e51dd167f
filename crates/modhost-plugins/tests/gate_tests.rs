//! Integration tests for the request-time access gate

mod common;

use std::fs;
use std::sync::Arc;

use common::{ECHO_ENTRY, FAILING_ENTRY, Fixture};
use modhost_kernel::{CallerIdentity, CapabilityAuthorizer, HostConfig, PluginsConfig};
use modhost_plugins::{GateDecision, ModuleHost, ModuleState};
use tempfile::TempDir;

fn callers() -> Vec<CallerIdentity> {
    vec![
        CallerIdentity::anonymous(),
        CallerIdentity::new("alice"),
        CallerIdentity::new("root")
            .with_capability("reports.read")
            .with_capability("admin"),
    ]
}

#[tokio::test]
async fn test_disabled_module_unavailable_for_every_caller() {
    let fx = Fixture::new().await;
    fx.write_module("reports", "Reports", "1.0", ECHO_ENTRY);
    let manager = fx.host.manager();
    manager.scan().await.unwrap();
    manager.install("reports").await.unwrap();
    manager.disable("reports").await.unwrap();

    for caller in callers() {
        for path in ["/api/reports", "/api/reports/daily?x=1", "/API/Reports/"] {
            let decision = fx.host.gate().check(path, &caller);
            assert_eq!(decision.status_code(), 503, "{path}");
            assert!(decision.body().unwrap().contains("Reports"));
        }
    }

    manager.enable("reports").await.unwrap();
    assert!(
        fx.host
            .gate()
            .check("/api/reports/daily", &CallerIdentity::anonymous())
            .is_pass()
    );
}

#[tokio::test]
async fn test_failed_module_is_unavailable() {
    let fx = Fixture::new().await;
    fx.write_module("ledger", "ledger", "1.0", FAILING_ENTRY);
    let manager = fx.host.manager();
    manager.scan().await.unwrap();
    let _ = manager.install("ledger").await;
    assert_eq!(manager.get("ledger").unwrap().state, ModuleState::Failed);

    let decision = fx
        .host
        .gate()
        .check("/api/ledger/entries", &CallerIdentity::anonymous());
    assert!(matches!(decision, GateDecision::Unavailable { ref module_id, .. } if module_id == "ledger"));
    assert_eq!(decision.body(), Some("Module 'ledger' is currently unavailable"));
}

#[tokio::test]
async fn test_capabilities_are_enforced() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("Plugins");
    let module_dir = root.join("reports");
    fs::create_dir_all(&module_dir).unwrap();
    fs::write(
        module_dir.join("manifest.json"),
        format!(
            r#"{{ "name": "reports", "version": "1.0", "entry_point": "{ECHO_ENTRY}",
                 "capabilities": ["reports.read"], "route_prefix": "/reports" }}"#
        ),
    )
    .unwrap();
    fs::write(module_dir.join("libreports.so"), b"x").unwrap();

    let mut config = HostConfig {
        plugins: PluginsConfig {
            path: root,
            ..PluginsConfig::default()
        },
        ..HostConfig::default()
    };
    config.monitor.watch = false;
    let mut host = ModuleHost::builder(config)
        .with_authorizer(Arc::new(CapabilityAuthorizer))
        .with_linked_module(ECHO_ENTRY, || {
            Box::new(common::EchoModule::named("reports")) as modhost_kernel::ModuleBox
        })
        .build()
        .await
        .unwrap();
    host.start().await.unwrap();

    let [anonymous, alice, admin]: [CallerIdentity; 3] = callers().try_into().unwrap();
    for caller in [anonymous, alice] {
        let decision = host.gate().check("/reports/q1", &caller);
        assert_eq!(decision.status_code(), 403);
        assert_eq!(decision.body(), None);
    }
    assert!(host.gate().check("/reports/q1", &admin).is_pass());
    assert!(host.gate().check("/health", &CallerIdentity::anonymous()).is_pass());

    host.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_gate_answers_while_other_module_is_installing() {
    let fx = Fixture::new().await;
    fx.write_module("reports", "reports", "1.0", ECHO_ENTRY);
    fx.write_module("billing", "billing", "1.0", ECHO_ENTRY);
    let manager = fx.host.manager();
    manager.scan().await.unwrap();
    manager.install("reports").await.unwrap();

    // hold billing's slot as an in-flight install would
    let _slot = fx.host.registry().acquire("billing").await;

    assert!(
        fx.host
            .gate()
            .check("/api/reports", &CallerIdentity::anonymous())
            .is_pass()
    );
    assert_eq!(
        fx.host
            .gate()
            .check("/api/billing", &CallerIdentity::anonymous())
            .status_code(),
        503
    );
}
