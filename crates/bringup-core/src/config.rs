use crate::error::{BringupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "bringup.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// HelmRepo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelmRepo {
    pub name: String,
    pub url: String,
}

impl HelmRepo {
    fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }
}

fn default_repos() -> Vec<HelmRepo> {
    vec![
        HelmRepo::new("datadog", "https://helm.datadoghq.com"),
        HelmRepo::new("bitnami", "https://charts.bitnami.com/bitnami"),
        HelmRepo::new("azure-samples", "https://azure-samples.github.io/helm-charts"),
        HelmRepo::new("ingress-nginx", "https://kubernetes.github.io/ingress-nginx"),
        HelmRepo::new("jetstack", "https://charts.jetstack.io"),
        HelmRepo::new(
            "prometheus-community",
            "https://prometheus-community.github.io/helm-charts",
        ),
    ]
}

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

/// Observability agent release (Datadog Helm chart).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_namespace")]
    pub namespace: String,
    #[serde(default = "default_agent_release")]
    pub release: String,
    #[serde(default = "default_agent_chart")]
    pub chart: String,
    #[serde(default = "default_chart_version")]
    pub chart_version: String,
    #[serde(default = "default_agent_version")]
    pub agent_version: String,
    #[serde(default = "default_site")]
    pub site: String,
    #[serde(default = "default_agent_cluster_name")]
    pub cluster_name: String,
    #[serde(default = "default_agent_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_values_file")]
    pub values_file: PathBuf,
    #[serde(default = "default_secret_name")]
    pub secret_name: String,
}

fn default_agent_namespace() -> String {
    "datadog".to_string()
}

fn default_agent_release() -> String {
    "datadog".to_string()
}

fn default_agent_chart() -> String {
    "datadog/datadog".to_string()
}

fn default_chart_version() -> String {
    "3.80.0".to_string()
}

fn default_agent_version() -> String {
    "7.60.0".to_string()
}

fn default_site() -> String {
    "datadoghq.com".to_string()
}

fn default_agent_cluster_name() -> String {
    "aks-cluster".to_string()
}

fn default_agent_timeout() -> u64 {
    600
}

fn default_values_file() -> PathBuf {
    PathBuf::from("datadog-values.yaml")
}

fn default_secret_name() -> String {
    "datadog-secret".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            namespace: default_agent_namespace(),
            release: default_agent_release(),
            chart: default_agent_chart(),
            chart_version: default_chart_version(),
            agent_version: default_agent_version(),
            site: default_site(),
            cluster_name: default_agent_cluster_name(),
            timeout_seconds: default_agent_timeout(),
            values_file: default_values_file(),
            secret_name: default_secret_name(),
        }
    }
}

impl AgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// Sample workload (AKS Store Demo).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_namespace")]
    pub namespace: String,
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_seconds: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

fn default_app_namespace() -> String {
    "pets".to_string()
}

fn default_manifest() -> PathBuf {
    PathBuf::from("aks-store-demo.yaml")
}

fn default_service() -> String {
    "store-front".to_string()
}

fn default_wait_timeout() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            namespace: default_app_namespace(),
            manifest: default_manifest(),
            service: default_service(),
            wait_timeout_seconds: default_wait_timeout(),
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

impl AppConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

// ---------------------------------------------------------------------------
// KindConfig
// ---------------------------------------------------------------------------

/// Local ephemeral cluster managed through `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindConfig {
    #[serde(default = "default_kind_cluster_name")]
    pub cluster_name: String,
    #[serde(default = "default_kind_config_file")]
    pub config_file: PathBuf,
    #[serde(default = "default_kustomize_dir")]
    pub kustomize_dir: PathBuf,
    #[serde(default = "default_local_url")]
    pub url: String,
    #[serde(default = "default_required_tools")]
    pub required_tools: Vec<String>,
}

fn default_kind_cluster_name() -> String {
    "aks-store-local".to_string()
}

fn default_kind_config_file() -> PathBuf {
    PathBuf::from("kind/kind-config.yaml")
}

fn default_kustomize_dir() -> PathBuf {
    PathBuf::from("kind")
}

fn default_local_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_required_tools() -> Vec<String> {
    vec!["kind".to_string(), "kubectl".to_string(), "docker".to_string()]
}

impl Default for KindConfig {
    fn default() -> Self {
        Self {
            cluster_name: default_kind_cluster_name(),
            config_file: default_kind_config_file(),
            kustomize_dir: default_kustomize_dir(),
            url: default_local_url(),
            required_tools: default_required_tools(),
        }
    }
}

// ---------------------------------------------------------------------------
// CiliumConfig
// ---------------------------------------------------------------------------

/// Cilium CNI for NetworkPolicy enforcement on the local cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiliumConfig {
    #[serde(default = "default_cilium_repo")]
    pub repo: HelmRepo,
    #[serde(default = "default_cilium_chart")]
    pub chart: String,
    #[serde(default = "default_cilium_namespace")]
    pub namespace: String,
    #[serde(default = "default_cilium_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_rollout_timeout")]
    pub rollout_timeout_seconds: u64,
    #[serde(default = "default_cilium_set")]
    pub set: Vec<String>,
}

fn default_cilium_repo() -> HelmRepo {
    HelmRepo::new("cilium", "https://helm.cilium.io/")
}

fn default_cilium_chart() -> String {
    "cilium/cilium".to_string()
}

fn default_cilium_namespace() -> String {
    "kube-system".to_string()
}

fn default_cilium_timeout() -> u64 {
    300
}

fn default_rollout_timeout() -> u64 {
    120
}

fn default_cilium_set() -> Vec<String> {
    vec![
        "image.pullPolicy=IfNotPresent".to_string(),
        "ipam.mode=kubernetes".to_string(),
        "kubeProxyReplacement=partial".to_string(),
        "operator.replicas=1".to_string(),
    ]
}

impl Default for CiliumConfig {
    fn default() -> Self {
        Self {
            repo: default_cilium_repo(),
            chart: default_cilium_chart(),
            namespace: default_cilium_namespace(),
            timeout_seconds: default_cilium_timeout(),
            rollout_timeout_seconds: default_rollout_timeout(),
            set: default_cilium_set(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_repos")]
    pub repos: Vec<HelmRepo>,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub kind: KindConfig,
    #[serde(default)]
    pub cilium: CiliumConfig,
    /// Directory relative paths are resolved against: the config file's
    /// parent, or the working directory when running on defaults.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            repos: default_repos(),
            agent: AgentConfig::default(),
            app: AppConfig::default(),
            kind: KindConfig::default(),
            cilium: CiliumConfig::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BringupError::ConfigNotFound(path.display().to_string()));
        }
        let data = std::fs::read_to_string(path)?;
        let mut cfg: Config = serde_yaml::from_str(&data)?;
        cfg.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(cfg)
    }

    /// Load an explicit config file, or `bringup.yaml` from `cwd` if present,
    /// or fall back to built-in defaults.
    pub fn discover(explicit: Option<&Path>, cwd: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let candidate = cwd.join(DEFAULT_CONFIG_FILE);
        if candidate.exists() {
            return Self::load(&candidate);
        }
        Ok(Self {
            base_dir: cwd.to_path_buf(),
            ..Self::default()
        })
    }

    /// Resolve a configured path against `base_dir`.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for repo in &self.repos {
            if repo.url.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("helm repo '{}' has an empty url", repo.name),
                });
            }
        }

        if self.agent.timeout_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "agent.timeout_seconds must be greater than zero".to_string(),
            });
        }

        if self.app.poll_interval_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "app.poll_interval_seconds must be greater than zero".to_string(),
            });
        } else if self.app.poll_interval_seconds >= self.app.wait_timeout_seconds {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "app.poll_interval_seconds={} is not below app.wait_timeout_seconds={}; \
                     deployments will be polled at most once",
                    self.app.poll_interval_seconds, self.app.wait_timeout_seconds
                ),
            });
        }

        if self.kind.cluster_name.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "kind.cluster_name is empty".to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.repos, cfg.repos);
        assert_eq!(parsed.agent.chart_version, "3.80.0");
        assert_eq!(parsed.kind.cluster_name, "aks-store-local");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let yaml = "agent:\n  site: datadoghq.eu\n  timeout_seconds: 120\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.agent.site, "datadoghq.eu");
        assert_eq!(cfg.agent.timeout(), Duration::from_secs(120));
        assert_eq!(cfg.agent.agent_version, "7.60.0");
        assert_eq!(cfg.app.namespace, "pets");
        assert_eq!(cfg.repos.len(), 6);
    }

    #[test]
    fn repos_keep_file_order() {
        let yaml = "repos:\n  - name: zeta\n    url: https://z.example\n  - name: alpha\n    url: https://a.example\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let names: Vec<&str> = cfg.repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn load_sets_base_dir_and_resolves_paths() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bringup.yaml");
        std::fs::write(&path, "app:\n  manifest: manifests/store.yaml\n").unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.base_dir, dir.path());
        assert_eq!(
            cfg.resolve(&cfg.app.manifest),
            dir.path().join("manifests/store.yaml")
        );
        assert_eq!(cfg.resolve(Path::new("/abs/x.yaml")), PathBuf::from("/abs/x.yaml"));
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, BringupError::ConfigNotFound(_)));
    }

    #[test]
    fn discover_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::discover(None, dir.path()).unwrap();
        assert_eq!(cfg.base_dir, dir.path());
        assert_eq!(cfg.agent.release, "datadog");
    }

    #[test]
    fn discover_picks_up_default_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            "kind:\n  cluster_name: dev\n",
        )
        .unwrap();
        let cfg = Config::discover(None, dir.path()).unwrap();
        assert_eq!(cfg.kind.cluster_name, "dev");
    }

    #[test]
    fn discover_explicit_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("custom.yaml");
        assert!(Config::discover(Some(&missing), dir.path()).is_err());
    }

    #[test]
    fn validate_default_config_no_warnings() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn validate_flags_bad_values() {
        let mut cfg = Config::default();
        cfg.repos.push(HelmRepo::new("broken", " "));
        cfg.agent.timeout_seconds = 0;
        cfg.app.poll_interval_seconds = 600;

        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("'broken'")));
        assert!(warnings
            .iter()
            .any(|w| w.message.contains("agent.timeout_seconds")));
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Warning && w.message.contains("polled at most once")));
    }

    #[test]
    fn unknown_yaml_is_rejected_when_malformed() {
        let result = serde_yaml::from_str::<Config>("agent: [not, a, map]");
        assert!(result.is_err());
    }
}
