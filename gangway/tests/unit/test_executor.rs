//! Deployment executor tests

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use gangway::deploy::fsm::{DeploymentEvent, DeploymentState};
use gangway::errors::GatewayError;
use gangway::models::deployment::{AccessToken, CredentialSet, Deployment};
use gangway_api::models::{CreateDeploymentRequest, EnvVarSpec, RuntimeKind};
use machines_api::models::MachineState;

use crate::support::TestGateway;

fn request(package: &str, runtime: RuntimeKind) -> CreateDeploymentRequest {
    CreateDeploymentRequest {
        name: "weather".to_string(),
        package: package.to_string(),
        runtime,
        env_vars: vec![EnvVarSpec {
            name: "WEATHER_API_KEY".to_string(),
            required: true,
            secret: true,
            description: None,
        }],
        credentials: HashMap::from([(
            "env_WEATHER_API_KEY".to_string(),
            "wk-secret-value".to_string(),
        )]),
    }
}

async fn running(gateway: &TestGateway) -> Deployment {
    let (deployment, _token) = gateway
        .state
        .executor
        .create(request("weather-server", RuntimeKind::Npm))
        .await
        .unwrap();
    gateway
        .wait_for_state(deployment.id, DeploymentState::Running)
        .await;
    gateway.state.executor.get(deployment.id).await.unwrap()
}

#[tokio::test]
async fn test_create_reaches_running() {
    let gateway = TestGateway::new().await;

    let (deployment, token) = gateway
        .state
        .executor
        .create(request("weather-server", RuntimeKind::Npm))
        .await
        .unwrap();

    assert_eq!(deployment.state(), DeploymentState::Starting);
    assert_eq!(deployment.machine_id.as_deref(), Some("m-1"));
    assert_eq!(deployment.access_token_hash, token.hash());

    let specs = gateway.provisioner.specs.lock().unwrap().clone();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].cmd, vec!["npx", "-y", "weather-server"]);
    assert_eq!(
        specs[0].env.get("WEATHER_API_KEY").map(String::as_str),
        Some("wk-secret-value")
    );
    assert_eq!(specs[0].env.get("MCP_RUNTIME").map(String::as_str), Some("npm"));
    assert!(!format!("{:?}", specs[0]).contains("wk-secret-value"));

    gateway
        .wait_for_state(deployment.id, DeploymentState::Running)
        .await;
}

#[tokio::test]
async fn test_repository_launch_command() {
    let gateway = TestGateway::new().await;

    gateway
        .state
        .executor
        .create(request("https://github.com/acme/tools", RuntimeKind::Python))
        .await
        .unwrap();

    let specs = gateway.provisioner.specs.lock().unwrap().clone();
    assert_eq!(
        specs[0].cmd,
        vec!["uvx", "--from", "git+https://github.com/acme/tools.git", "tools"]
    );
}

#[tokio::test]
async fn test_shell_metacharacters_never_reach_the_provisioner() {
    let gateway = TestGateway::new().await;

    let err = gateway
        .state
        .executor
        .create(request("weather-server; rm -rf /", RuntimeKind::Npm))
        .await
        .unwrap_err();

    let GatewayError::PackageRejected { deployment_id, .. } = err else {
        panic!("expected a package rejection, got {:?}", err);
    };
    assert_eq!(gateway.provisioner.calls(), 0);

    let record = gateway.state.executor.get(deployment_id).await.unwrap();
    assert_eq!(record.state(), DeploymentState::Failed);
    assert!(record.lifecycle.error().unwrap().contains("Package validation failed"));
    assert!(record.machine_id.is_none());
}

#[tokio::test]
async fn test_unknown_package_fails_without_machine() {
    let gateway = TestGateway::new().await;

    let err = gateway
        .state
        .executor
        .create(request("no-such-package", RuntimeKind::Npm))
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::PackageRejected { .. }));
    assert_eq!(gateway.provisioner.creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_missing_credentials_create_nothing() {
    let gateway = TestGateway::new().await;

    let mut req = request("weather-server", RuntimeKind::Npm);
    req.credentials.clear();
    req.env_vars.push(EnvVarSpec {
        name: "REGION".to_string(),
        required: true,
        secret: false,
        description: None,
    });

    let err = gateway.state.executor.create(req).await.unwrap_err();
    match err {
        GatewayError::MissingCredentials(names) => {
            assert_eq!(names, vec!["WEATHER_API_KEY", "REGION"]);
        }
        other => panic!("unexpected error {:?}", other),
    }

    assert!(gateway.state.store.list().await.unwrap().is_empty());
    assert_eq!(gateway.provisioner.calls(), 0);
    assert_eq!(gateway.registry.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_provisioner_failure_marks_failed() {
    let gateway = TestGateway::new().await;
    gateway.provisioner.fail_create.store(true, Ordering::SeqCst);

    let err = gateway
        .state
        .executor
        .create(request("weather-server", RuntimeKind::Npm))
        .await
        .unwrap_err();

    let GatewayError::ProvisioningFailed { deployment_id, .. } = err else {
        panic!("expected a provisioning failure, got {:?}", err);
    };
    let record = gateway.state.executor.get(deployment_id).await.unwrap();
    assert_eq!(record.state(), DeploymentState::Failed);
}

#[tokio::test]
async fn test_startup_timeout_fails() {
    let gateway = TestGateway::new().await;
    gateway.backend.healthy.store(false, Ordering::SeqCst);

    let (deployment, _token) = gateway
        .state
        .executor
        .create(request("weather-server", RuntimeKind::Npm))
        .await
        .unwrap();

    gateway
        .wait_for_state(deployment.id, DeploymentState::Failed)
        .await;
    let record = gateway.state.executor.get(deployment.id).await.unwrap();
    assert!(record.lifecycle.error().is_some());
}

#[tokio::test]
async fn test_stop_and_restart() {
    let gateway = TestGateway::new().await;
    let deployment = running(&gateway).await;

    let stopped = gateway.state.executor.stop(deployment.id).await.unwrap();
    assert_eq!(stopped.state(), DeploymentState::Stopped);
    assert_eq!(gateway.provisioner.stops.load(Ordering::SeqCst), 1);

    // stopping again is not a valid move
    let err = gateway.state.executor.stop(deployment.id).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidTransition(_)));

    let restarted = gateway.state.executor.restart(deployment.id).await.unwrap();
    assert_eq!(restarted.state(), DeploymentState::Starting);
    assert_eq!(restarted.machine_id, deployment.machine_id);
    assert_eq!(gateway.provisioner.starts.load(Ordering::SeqCst), 1);

    gateway
        .wait_for_state(deployment.id, DeploymentState::Running)
        .await;
}

#[tokio::test]
async fn test_restart_running_is_rejected() {
    let gateway = TestGateway::new().await;
    let deployment = running(&gateway).await;

    let err = gateway
        .state
        .executor
        .restart(deployment.id)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_restart_failed_with_destroyed_machine_reprovisions() {
    let gateway = TestGateway::new().await;
    let deployment = running(&gateway).await;

    gateway.provisioner.forget("m-1");
    gateway
        .state
        .store
        .transition(deployment.id, &DeploymentEvent::Fail("machine destroyed".to_string()))
        .await
        .unwrap();

    let restarted = gateway.state.executor.restart(deployment.id).await.unwrap();
    assert_eq!(restarted.state(), DeploymentState::Starting);
    assert_eq!(restarted.machine_id.as_deref(), Some("m-2"));
    assert_eq!(gateway.provisioner.creates.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_restart_failed_with_stopped_machine_starts_it() {
    let gateway = TestGateway::new().await;
    let deployment = running(&gateway).await;

    gateway.provisioner.set_state("m-1", MachineState::Stopped);
    gateway
        .state
        .store
        .transition(deployment.id, &DeploymentEvent::Fail("crashed".to_string()))
        .await
        .unwrap();

    let restarted = gateway.state.executor.restart(deployment.id).await.unwrap();
    assert_eq!(restarted.machine_id.as_deref(), Some("m-1"));
    assert_eq!(gateway.provisioner.starts.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.provisioner.creates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let gateway = TestGateway::new().await;
    let deployment = running(&gateway).await;

    gateway.state.executor.delete(deployment.id).await.unwrap();
    assert_eq!(gateway.provisioner.machine_count(), 0);
    assert!(gateway.state.store.get(deployment.id).await.unwrap().is_none());
    assert!(gateway.state.logs.get(deployment.id).is_empty());

    let err = gateway.state.executor.delete(deployment.id).await.unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
    assert_eq!(gateway.provisioner.deletes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_delete_with_machine_already_gone() {
    let gateway = TestGateway::new().await;
    let deployment = running(&gateway).await;
    gateway.provisioner.forget("m-1");

    gateway.state.executor.delete(deployment.id).await.unwrap();
    assert!(gateway.state.store.get(deployment.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_purges_sessions() {
    let gateway = TestGateway::new().await;
    let deployment = running(&gateway).await;

    gateway
        .state
        .sessions
        .resolve(deployment.id, None, "2025-06-18");
    assert_eq!(gateway.state.sessions.len(), 1);

    gateway.state.executor.delete(deployment.id).await.unwrap();
    assert!(gateway.state.sessions.is_empty());
}

#[tokio::test]
async fn test_rotate_token() {
    let gateway = TestGateway::new().await;
    let deployment = running(&gateway).await;

    let token = gateway
        .state
        .executor
        .rotate_token(deployment.id)
        .await
        .unwrap();
    let record = gateway.state.executor.get(deployment.id).await.unwrap();
    assert_ne!(record.access_token_hash, deployment.access_token_hash);
    assert_eq!(record.access_token_hash, token.hash());
    assert_eq!(record.state(), DeploymentState::Running);
}

#[tokio::test]
async fn test_logs_merge_gateway_and_machine_lines() {
    let gateway = TestGateway::new().await;
    let deployment = running(&gateway).await;

    let lines = gateway
        .state
        .executor
        .logs_for(deployment.id)
        .await
        .unwrap();
    assert!(lines.iter().any(|l| l.stream == "gateway" && l.message == "Deployment created"));
    assert!(lines.iter().any(|l| l.stream == "stdout" && l.message == "server listening"));
}

#[tokio::test]
async fn test_interrupted_provisioning_is_failed_on_resume() {
    let gateway = TestGateway::new().await;

    let record = Deployment::new(
        "stuck".to_string(),
        "weather-server".to_string(),
        RuntimeKind::Npm,
        vec![],
        AccessToken::generate().hash(),
    );
    let record = gateway
        .state
        .store
        .insert(record, CredentialSet::new())
        .await
        .unwrap();
    gateway
        .state
        .store
        .transition(record.id, &DeploymentEvent::Accept)
        .await
        .unwrap();

    let resumed = gateway
        .state
        .executor
        .resume_startup_watches()
        .await
        .unwrap();
    assert_eq!(resumed, 0);

    let record = gateway.state.executor.get(record.id).await.unwrap();
    assert_eq!(record.state(), DeploymentState::Failed);
}

#[tokio::test]
async fn test_failure_after_delete_leaves_no_logs() {
    let gateway = TestGateway::new().await;
    gateway.provisioner.fail_create.store(true, Ordering::SeqCst);
    *gateway.provisioner.create_delay.lock().unwrap() = Some(Duration::from_millis(300));

    let executor = gateway.state.executor.clone();
    let create = tokio::spawn(async move {
        executor
            .create(request("weather-server", RuntimeKind::Npm))
            .await
    });

    // deleted while the machine is still being created
    for _ in 0..100 {
        if gateway.provisioner.creates.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let records = gateway.state.store.list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].state(), DeploymentState::Installing);
    let id = records[0].id;
    gateway.state.executor.delete(id).await.unwrap();

    let err = create.await.unwrap().unwrap_err();
    assert!(matches!(err, GatewayError::ProvisioningFailed { .. }));
    assert!(gateway.state.store.get(id).await.unwrap().is_none());
    assert!(gateway.state.logs.get(id).is_empty());
}
