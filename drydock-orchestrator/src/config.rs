//! Orchestrator configuration
//!
//! Defines all configurable parameters of the orchestrator: platform credentials,
//! container runtime settings, loop intervals, timeouts and the runner environment
//! templates.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Prefix of environment variables that become runner environment templates
pub const RUNNER_ENV_PREFIX: &str = "RUNNERENV_";

const MIN_LOOP_INTERVAL: Duration = Duration::from_secs(10);

/// Reconcile intervals outside this range still work but are reported
const SUGGESTED_RECONCILE_INTERVAL: (Duration, Duration) =
    (Duration::from_secs(60), Duration::from_secs(600));

const TOKEN_PLACEHOLDER: &str = "{registration_token}";

/// Which repositories the reconciliation loop looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Organization repositories when the account has an organization, personal
    /// repositories otherwise
    All,

    /// Only repositories of one organization
    Organization,
}

impl DiscoveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryMode::All => "all",
            DiscoveryMode::Organization => "organization",
        }
    }
}

impl std::str::FromStr for DiscoveryMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(DiscoveryMode::All),
            "organization" | "org" => Ok(DiscoveryMode::Organization),
            other => anyhow::bail!(
                "DISCOVERY_MODE must be 'all' or 'organization', got '{}'",
                other
            ),
        }
    }
}

/// Orchestrator configuration
///
/// All timeouts and intervals are configurable to allow tuning for different
/// deployment scenarios.
#[derive(Clone)]
pub struct Config {
    /// Token used for every platform API call
    pub github_token: String,

    /// Platform API base URL
    pub github_api_url: String,

    /// Image every runner container is created from
    pub runner_image: String,

    /// Container runtime CLI (`docker` or `podman`)
    pub container_runtime: String,

    /// Whether the reconciliation loop creates runners on its own
    pub auto_create_runners: bool,

    /// How often the reconciliation loop runs
    pub reconcile_interval: Duration,

    /// How often the cleanup sweeper runs
    pub cleanup_interval: Duration,

    /// Repository discovery mode
    pub discovery_mode: DiscoveryMode,

    /// Organization to restrict discovery to
    pub organization: Option<String>,

    /// Maximum time a runner may stay in `Creating`
    pub provisioning_timeout: Duration,

    /// Maximum lifetime of a runner container
    pub runner_ttl: Duration,

    /// Global bound on concurrent runner creations
    pub max_concurrent_creations: usize,

    /// Template replacing the container's default command
    pub command_override: Option<String>,

    /// Timeout for each platform API call
    pub api_timeout: Duration,

    /// Timeout for each container runtime call
    pub runtime_timeout: Duration,

    /// Adopt labelled containers left over from a previous process at startup
    pub adopt_orphans: bool,

    /// HTTP listen address
    pub bind_addr: String,

    /// Runner environment templates (variable name -> template)
    pub env_templates: BTreeMap<String, String>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("github_token", &"<redacted>")
            .field("github_api_url", &self.github_api_url)
            .field("runner_image", &self.runner_image)
            .field("container_runtime", &self.container_runtime)
            .field("auto_create_runners", &self.auto_create_runners)
            .field("reconcile_interval", &self.reconcile_interval)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("discovery_mode", &self.discovery_mode)
            .field("organization", &self.organization)
            .field("provisioning_timeout", &self.provisioning_timeout)
            .field("runner_ttl", &self.runner_ttl)
            .field("max_concurrent_creations", &self.max_concurrent_creations)
            .field("command_override", &self.command_override)
            .field("api_timeout", &self.api_timeout)
            .field("runtime_timeout", &self.runtime_timeout)
            .field("adopt_orphans", &self.adopt_orphans)
            .field("bind_addr", &self.bind_addr)
            .field("env_templates", &self.env_templates.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(github_token: impl Into<String>, runner_image: impl Into<String>) -> Self {
        Self {
            github_token: github_token.into(),
            github_api_url: drydock_github::DEFAULT_API_URL.to_string(),
            runner_image: runner_image.into(),
            container_runtime: "docker".to_string(),
            auto_create_runners: false,
            reconcile_interval: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(300),
            discovery_mode: DiscoveryMode::All,
            organization: None,
            provisioning_timeout: Duration::from_secs(300),
            runner_ttl: Duration::from_secs(6 * 60 * 60),
            max_concurrent_creations: 5,
            command_override: None,
            api_timeout: Duration::from_secs(30),
            runtime_timeout: Duration::from_secs(120),
            adopt_orphans: true,
            bind_addr: "0.0.0.0:8000".to_string(),
            env_templates: BTreeMap::new(),
        }
    }

    /// Creates configuration from the process environment
    ///
    /// Expected environment variables:
    /// - GITHUB_RUNNER_TOKEN (required)
    /// - RUNNER_IMAGE (required)
    /// - GITHUB_API_URL (optional, default: https://api.github.com)
    /// - CONTAINER_RUNTIME (optional, default: docker)
    /// - AUTO_CREATE_RUNNERS (optional, true/false, default: false)
    /// - RUNNER_CHECK_INTERVAL (optional, seconds, default: 300)
    /// - RUNNER_PURGE_INTERVAL (optional, seconds, default: 300)
    /// - DISCOVERY_MODE (optional, all/organization, default: all)
    /// - GITHUB_ORGANIZATION (optional)
    /// - PROVISIONING_TIMEOUT (optional, seconds, default: 300)
    /// - RUNNER_TTL (optional, seconds, default: 21600)
    /// - MAX_CONCURRENT_CREATIONS (optional, default: 5)
    /// - RUNNER_COMMAND (optional)
    /// - API_TIMEOUT (optional, seconds, default: 30)
    /// - RUNTIME_TIMEOUT (optional, seconds, default: 120)
    /// - ADOPT_ORPHANS (optional, true/false, default: true)
    /// - ORCHESTRATOR_BIND_ADDR (optional, default: 0.0.0.0:8000)
    /// - RUNNERENV_<NAME> (optional, one per runner environment variable)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Creates configuration from an explicit set of variables
    pub fn from_vars<I>(vars: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let github_token = get("GITHUB_RUNNER_TOKEN")
            .ok_or_else(|| anyhow::anyhow!("GITHUB_RUNNER_TOKEN environment variable not set"))?;

        let runner_image = get("RUNNER_IMAGE")
            .ok_or_else(|| anyhow::anyhow!("RUNNER_IMAGE environment variable not set"))?;

        let mut config = Self::new(github_token, runner_image);

        if let Some(url) = get("GITHUB_API_URL") {
            config.github_api_url = url;
        }
        if let Some(runtime) = get("CONTAINER_RUNTIME") {
            config.container_runtime = runtime;
        }
        if let Some(value) = get("AUTO_CREATE_RUNNERS") {
            config.auto_create_runners = parse_bool("AUTO_CREATE_RUNNERS", &value)?;
        }
        if let Some(value) = get("RUNNER_CHECK_INTERVAL") {
            config.reconcile_interval = parse_secs("RUNNER_CHECK_INTERVAL", &value)?;
        }
        if let Some(value) = get("RUNNER_PURGE_INTERVAL") {
            config.cleanup_interval = parse_secs("RUNNER_PURGE_INTERVAL", &value)?;
        }
        if let Some(value) = get("DISCOVERY_MODE") {
            config.discovery_mode = value.parse()?;
        }
        config.organization = get("GITHUB_ORGANIZATION");
        if let Some(value) = get("PROVISIONING_TIMEOUT") {
            config.provisioning_timeout = parse_secs("PROVISIONING_TIMEOUT", &value)?;
        }
        if let Some(value) = get("RUNNER_TTL") {
            config.runner_ttl = parse_secs("RUNNER_TTL", &value)?;
        }
        if let Some(value) = get("MAX_CONCURRENT_CREATIONS") {
            config.max_concurrent_creations = value.parse::<usize>().map_err(|_| {
                anyhow::anyhow!("MAX_CONCURRENT_CREATIONS must be a number, got '{}'", value)
            })?;
        }
        config.command_override = get("RUNNER_COMMAND");
        if let Some(value) = get("API_TIMEOUT") {
            config.api_timeout = parse_secs("API_TIMEOUT", &value)?;
        }
        if let Some(value) = get("RUNTIME_TIMEOUT") {
            config.runtime_timeout = parse_secs("RUNTIME_TIMEOUT", &value)?;
        }
        if let Some(value) = get("ADOPT_ORPHANS") {
            config.adopt_orphans = parse_bool("ADOPT_ORPHANS", &value)?;
        }
        if let Some(addr) = get("ORCHESTRATOR_BIND_ADDR") {
            config.bind_addr = addr;
        }

        for (key, value) in &vars {
            let name = key
                .strip_prefix(RUNNER_ENV_PREFIX)
                .or_else(|| key.strip_prefix("runnerenv_"));
            if let Some(name) = name.filter(|n| !n.is_empty()) {
                config.env_templates.insert(name.to_string(), value.clone());
            }
        }

        Ok(config)
    }

    /// Adds a runner environment template
    #[cfg(test)]
    pub fn with_env_template(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.env_templates.insert(name.into(), template.into());
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.github_token.trim().is_empty() {
            anyhow::bail!("github_token cannot be empty");
        }

        if self.runner_image.trim().is_empty() {
            anyhow::bail!("runner_image cannot be empty");
        }

        if !self.github_api_url.starts_with("http://") && !self.github_api_url.starts_with("https://")
        {
            anyhow::bail!("github_api_url must start with http:// or https://");
        }

        if self.container_runtime.trim().is_empty() {
            anyhow::bail!("container_runtime cannot be empty");
        }

        if self.reconcile_interval < MIN_LOOP_INTERVAL {
            anyhow::bail!("reconcile_interval must be at least 10 seconds");
        }

        if self.cleanup_interval < MIN_LOOP_INTERVAL {
            anyhow::bail!("cleanup_interval must be at least 10 seconds");
        }

        if self.provisioning_timeout.is_zero() {
            anyhow::bail!("provisioning_timeout must be greater than 0");
        }

        if self.runner_ttl <= self.provisioning_timeout {
            anyhow::bail!("runner_ttl must be longer than provisioning_timeout");
        }

        if self.max_concurrent_creations == 0 {
            anyhow::bail!("max_concurrent_creations must be greater than 0");
        }

        if self.api_timeout.is_zero() || self.runtime_timeout.is_zero() {
            anyhow::bail!("api_timeout and runtime_timeout must be greater than 0");
        }

        if self.bind_addr.trim().is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        Ok(())
    }

    /// Settings that are accepted but probably not what the operator meant
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.env_templates.is_empty() {
            warnings.push(format!(
                "No {}* variables found, runners get the default environment",
                RUNNER_ENV_PREFIX
            ));
        } else {
            let carries_token = self
                .env_templates
                .values()
                .chain(self.command_override.iter())
                .any(|t| t.contains(TOKEN_PLACEHOLDER));
            if !carries_token {
                warnings.push(format!(
                    "No runner template references {}, runners cannot register",
                    TOKEN_PLACEHOLDER
                ));
            }
        }

        if self.organization.is_some() && self.discovery_mode == DiscoveryMode::All {
            warnings.push(
                "GITHUB_ORGANIZATION is ignored unless DISCOVERY_MODE=organization".to_string(),
            );
        }

        if self.discovery_mode == DiscoveryMode::Organization && !self.auto_create_runners {
            warnings.push(
                "DISCOVERY_MODE has no effect while AUTO_CREATE_RUNNERS is false".to_string(),
            );
        }

        warnings
    }

    /// Tuning suggestions for an otherwise valid configuration
    pub fn recommendations(&self) -> Vec<String> {
        let mut recommendations = Vec::new();
        let (low, high) = SUGGESTED_RECONCILE_INTERVAL;

        if self.env_templates.is_empty() {
            recommendations.push(format!(
                "Consider configuring {}* variables for the runner image",
                RUNNER_ENV_PREFIX
            ));
        }

        if self.reconcile_interval < low {
            recommendations.push(format!(
                "RUNNER_CHECK_INTERVAL below {} seconds may cause excessive API load",
                low.as_secs()
            ));
        } else if self.reconcile_interval > high {
            recommendations.push(format!(
                "RUNNER_CHECK_INTERVAL above {} seconds may delay job execution",
                high.as_secs()
            ));
        }

        recommendations
    }
}

fn parse_secs(key: &str, value: &str) -> anyhow::Result<Duration> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| anyhow::anyhow!("{} must be a number of seconds, got '{}'", key, value))
}

fn parse_bool(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => anyhow::bail!("{} must be true or false, got '{}'", key, value),
    }
}
