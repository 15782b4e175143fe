//! Package validator
//!
//! Gates every deployment: a launch command can only be built from a
//! [`ValidatedPackage`], and that type is only produced here from a
//! successful validation.

pub mod package_ref;

use std::sync::Arc;
use std::time::Duration;

use gangway_api::models::RuntimeKind;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::validation::{CacheKey, ValidationCache};
use crate::errors::GatewayError;
use crate::validator::package_ref::{
    is_valid_npm_name, is_valid_python_name, parse_repository, RepoRef,
};

/// Validator options
#[derive(Debug, Clone)]
pub struct Options {
    pub npm_url: String,
    pub pypi_url: String,
    pub github_url: String,
    pub timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            npm_url: "https://registry.npmjs.org".to_string(),
            pypi_url: "https://pypi.org/pypi".to_string(),
            github_url: "https://api.github.com".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Where the package was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedRuntime {
    Npm,
    Python,
    Repository,
}

impl ResolvedRuntime {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolvedRuntime::Npm => "npm",
            ResolvedRuntime::Python => "python",
            ResolvedRuntime::Repository => "repository",
        }
    }
}

/// Why a package was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidName,
    NotFound,
    RegistryError,
    RegistryUnreachable,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InvalidName => "invalid_name",
            RejectReason::NotFound => "not_found",
            RejectReason::RegistryError => "registry_error",
            RejectReason::RegistryUnreachable => "registry_unreachable",
        }
    }

    /// Worth remembering; transient failures are retried next time
    pub fn is_definitive(&self) -> bool {
        matches!(self, RejectReason::InvalidName | RejectReason::NotFound)
    }
}

/// Outcome of validating one identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub runtime: ResolvedRuntime,
    pub reason: Option<RejectReason>,
    pub message: Option<String>,
    pub version: Option<String>,
}

impl ValidationResult {
    pub fn accepted(runtime: ResolvedRuntime, version: Option<String>) -> Self {
        Self {
            valid: true,
            runtime,
            reason: None,
            message: None,
            version,
        }
    }

    pub fn rejected(
        runtime: ResolvedRuntime,
        reason: RejectReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            valid: false,
            runtime,
            reason: Some(reason),
            message: Some(message.into()),
            version: None,
        }
    }

    fn is_cacheable(&self) -> bool {
        self.reason.map_or(true, |reason| reason.is_definitive())
    }
}

/// A package that passed validation. Only [`PackageValidator::admit`] makes these.
#[derive(Debug, Clone)]
pub struct ValidatedPackage {
    identifier: String,
    runtime: RuntimeKind,
    repository: Option<RepoRef>,
    version: Option<String>,
}

impl ValidatedPackage {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn runtime(&self) -> &RuntimeKind {
        &self.runtime
    }

    pub fn repository(&self) -> Option<&RepoRef> {
        self.repository.as_ref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    #[cfg(test)]
    pub(crate) fn assume_valid(
        identifier: &str,
        runtime: RuntimeKind,
        repository: Option<RepoRef>,
    ) -> Self {
        Self {
            identifier: identifier.to_string(),
            runtime,
            repository,
            version: None,
        }
    }
}

/// Result of admitting a package for deployment
#[derive(Debug, Clone)]
pub enum Admission {
    Accepted(ValidatedPackage),
    Rejected(ValidationResult),
}

#[derive(Deserialize)]
struct NpmPackument {
    #[serde(rename = "dist-tags", default)]
    dist_tags: NpmDistTags,
}

#[derive(Deserialize, Default)]
struct NpmDistTags {
    latest: Option<String>,
}

#[derive(Deserialize)]
struct PypiProject {
    info: PypiInfo,
}

#[derive(Deserialize)]
struct PypiInfo {
    version: Option<String>,
}

/// Checks identifiers against npm, PyPI and GitHub
pub struct PackageValidator {
    client: Client,
    options: Options,
    cache: Arc<dyn ValidationCache>,
}

impl PackageValidator {
    pub fn new(options: Options, cache: Arc<dyn ValidationCache>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(options.timeout)
            .user_agent(concat!("gangway/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            options,
            cache,
        })
    }

    pub fn cache(&self) -> &Arc<dyn ValidationCache> {
        &self.cache
    }

    /// Validate an identifier for a runtime.
    ///
    /// Only a blank identifier is an `Err`; every other failure is a
    /// `valid = false` result with a reason.
    pub async fn validate(
        &self,
        identifier: &str,
        runtime: &RuntimeKind,
    ) -> Result<ValidationResult, GatewayError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(GatewayError::ValidationError(
                "Package identifier cannot be empty".to_string(),
            ));
        }

        let key = CacheKey::new(runtime.as_str(), identifier);
        if let Some(cached) = self.cache.get(&key) {
            debug!("Validation cache hit for {} ({})", identifier, runtime.as_str());
            return Ok(cached);
        }

        let result = self.check(identifier, runtime).await;

        if result.valid {
            info!(
                "Package '{}' validated via {} (version {:?})",
                identifier,
                result.runtime.as_str(),
                result.version
            );
        } else {
            warn!(
                "Package '{}' rejected: {}",
                identifier,
                result.reason.map(|r| r.as_str()).unwrap_or("unknown")
            );
        }

        if result.is_cacheable() {
            self.cache.put(key, result.clone());
        }
        Ok(result)
    }

    /// Validate and, on success, hand out the launchable package
    pub async fn admit(
        &self,
        identifier: &str,
        runtime: &RuntimeKind,
    ) -> Result<Admission, GatewayError> {
        let result = self.validate(identifier, runtime).await?;
        if !result.valid {
            return Ok(Admission::Rejected(result));
        }

        let identifier = identifier.trim().to_string();
        let repository = match result.runtime {
            ResolvedRuntime::Repository => parse_repository(&identifier),
            _ => None,
        };

        Ok(Admission::Accepted(ValidatedPackage {
            identifier,
            runtime: runtime.clone(),
            repository,
            version: result.version,
        }))
    }

    async fn check(&self, identifier: &str, runtime: &RuntimeKind) -> ValidationResult {
        if let Some(repo) = parse_repository(identifier) {
            return self.check_github(&repo).await;
        }

        match runtime {
            RuntimeKind::Custom { .. } => ValidationResult::rejected(
                ResolvedRuntime::Repository,
                RejectReason::InvalidName,
                "custom runtime requires a repository reference",
            ),
            RuntimeKind::Npm => {
                if !is_valid_npm_name(identifier) {
                    return ValidationResult::rejected(
                        ResolvedRuntime::Npm,
                        RejectReason::InvalidName,
                        format!("'{}' is not a valid npm package name", identifier),
                    );
                }
                self.check_npm(identifier).await
            }
            RuntimeKind::Python => {
                if !is_valid_python_name(identifier) {
                    return ValidationResult::rejected(
                        ResolvedRuntime::Python,
                        RejectReason::InvalidName,
                        format!("'{}' is not a valid Python package name", identifier),
                    );
                }
                self.check_pypi(identifier).await
            }
        }
    }

    async fn check_npm(&self, name: &str) -> ValidationResult {
        let url = format!(
            "{}/{}",
            self.options.npm_url.trim_end_matches('/'),
            name.replace('/', "%2F")
        );
        self.lookup(ResolvedRuntime::Npm, "npm registry", &url, |body: NpmPackument| {
            body.dist_tags.latest
        })
        .await
    }

    async fn check_pypi(&self, name: &str) -> ValidationResult {
        let url = format!("{}/{}/json", self.options.pypi_url.trim_end_matches('/'), name);
        self.lookup(ResolvedRuntime::Python, "PyPI", &url, |body: PypiProject| {
            body.info.version
        })
        .await
    }

    async fn check_github(&self, repo: &RepoRef) -> ValidationResult {
        let url = format!(
            "{}/repos/{}/{}",
            self.options.github_url.trim_end_matches('/'),
            repo.owner,
            repo.repo
        );
        self.lookup(ResolvedRuntime::Repository, "GitHub", &url, |_: serde_json::Value| None)
            .await
    }

    async fn lookup<T, F>(
        &self,
        runtime: ResolvedRuntime,
        source: &str,
        url: &str,
        version_of: F,
    ) -> ValidationResult
    where
        T: serde::de::DeserializeOwned,
        F: FnOnce(T) -> Option<String>,
    {
        debug!("GET {}", url);

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("{} unreachable: {}", source, e);
                return ValidationResult::rejected(
                    runtime,
                    RejectReason::RegistryUnreachable,
                    format!("Could not reach {}; try again", source),
                );
            }
        };

        match response.status() {
            StatusCode::OK => match response.json::<T>().await {
                Ok(body) => ValidationResult::accepted(runtime, version_of(body)),
                Err(e) if e.is_timeout() => ValidationResult::rejected(
                    runtime,
                    RejectReason::RegistryUnreachable,
                    format!("Timed out reading from {}", source),
                ),
                Err(e) => {
                    warn!("Unexpected {} response body: {}", source, e);
                    ValidationResult::rejected(
                        runtime,
                        RejectReason::RegistryError,
                        format!("{} returned an unreadable response", source),
                    )
                }
            },
            StatusCode::NOT_FOUND => ValidationResult::rejected(
                runtime,
                RejectReason::NotFound,
                format!("Package not found in {}", source),
            ),
            status => ValidationResult::rejected(
                runtime,
                RejectReason::RegistryError,
                format!("{} error: HTTP {}", source, status.as_u16()),
            ),
        }
    }
}
