//! Endpoint configuration: which host, API version and auth scheme a call uses.
//!
//! Resolution never fails: missing or unusable inputs degrade to the public
//! API defaults.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use serde::{Deserialize, Serialize};

use crate::{
    CONFIGURATION_FILE, DEFAULT_API_VERSION, DEFAULT_DOMAIN, DEFAULT_GATEWAY_API_VERSION,
    GATEWAY_DOMAIN,
    auth::Credential,
    errors::{Error, Result},
};

/// Placeholder substituted with the resource path in a URL template.
pub const RESOURCE_PLACEHOLDER: &str = "{0}";

static PROCESS_DEFAULT: RwLock<Option<Arc<Settings>>> = RwLock::new(None);

/// Deployment shape the client talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointMode {
    /// The public API.
    Direct,
    /// A self-hosted proxy exposing the same paths under another domain.
    Proxy,
    /// An enterprise gateway addressed by resource name and deployment id.
    Gateway,
}

/// Injected configuration object, usually loaded from `openai.config.json`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Configuration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_domain: Option<String>,
    #[serde(rename = "useAzureOpenAI")]
    pub use_azure_openai: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub use_active_directory_authentication: bool,
}

impl Configuration {
    /// Load a configuration file. A missing file yields `Ok(None)`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Config(format!(
                "failed to read {}: {err}",
                path.display()
            ))),
        }
    }

    /// Search `dir` and its ancestors for [`CONFIGURATION_FILE`].
    pub fn discover(dir: impl AsRef<Path>) -> Result<Option<Self>> {
        let mut current: Option<&Path> = Some(dir.as_ref());
        while let Some(dir) = current {
            if let Some(found) = Self::from_file(dir.join(CONFIGURATION_FILE))? {
                return Ok(Some(found));
            }
            current = dir.parent();
        }
        Ok(None)
    }

    /// Credential carried by this configuration, if it has a key.
    pub fn credential(&self) -> Result<Option<Credential>> {
        match self.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            Some(key) => Credential::new(key, self.organization_id.as_deref()).map(Some),
            None => Ok(None),
        }
    }

    fn gateway_resource(&self) -> Option<&str> {
        self.use_azure_openai
            .then_some(self.resource_name.as_deref())
            .flatten()
    }

    fn gateway_deployment(&self) -> Option<&str> {
        self.use_azure_openai
            .then_some(self.deployment_id.as_deref())
            .flatten()
    }
}

/// Inputs to [`Settings::resolve`], highest priority first per field:
/// explicit values, then `configuration`, then a configuration file discovered
/// from `discover_from`, then compiled-in defaults.
#[derive(Clone, Debug, Default)]
pub struct SettingsSources {
    pub domain: Option<String>,
    pub resource_name: Option<String>,
    pub deployment_id: Option<String>,
    pub api_version: Option<String>,
    pub use_directory_auth: Option<bool>,
    pub configuration: Option<Configuration>,
    pub discover_from: Option<PathBuf>,
}

impl SettingsSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn gateway(
        mut self,
        resource_name: impl Into<String>,
        deployment_id: impl Into<String>,
    ) -> Self {
        self.resource_name = Some(resource_name.into());
        self.deployment_id = Some(deployment_id.into());
        self
    }

    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    pub fn directory_auth(mut self, enabled: bool) -> Self {
        self.use_directory_auth = Some(enabled);
        self
    }

    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    pub fn discover_from(mut self, dir: impl Into<PathBuf>) -> Self {
        self.discover_from = Some(dir.into());
        self
    }
}

/// Resolved endpoint configuration. Read-only once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    mode: EndpointMode,
    base_url_template: String,
    api_version: String,
    use_directory_auth: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self::direct_with(DEFAULT_DOMAIN, DEFAULT_API_VERSION)
    }
}

impl Settings {
    /// Resolve settings from the given sources. Never fails.
    pub fn resolve(sources: &SettingsSources) -> Self {
        let discovered = sources.discover_from.as_deref().and_then(discover_quietly);
        let layers: Vec<&Configuration> = sources
            .configuration
            .iter()
            .chain(discovered.iter())
            .collect();

        let pick = |explicit: &Option<String>, from: fn(&Configuration) -> Option<&str>| {
            non_blank(explicit.as_deref())
                .or_else(|| layers.iter().copied().find_map(|c| non_blank(from(c))))
                .map(str::to_string)
        };

        let resource = pick(&sources.resource_name, Configuration::gateway_resource);
        let deployment = pick(&sources.deployment_id, Configuration::gateway_deployment);
        let version = pick(&sources.api_version, |c| c.api_version.as_deref());
        let use_directory_auth = sources.use_directory_auth.unwrap_or_else(|| {
            layers
                .first()
                .map(|c| c.use_active_directory_authentication)
                .unwrap_or(false)
        });

        if let (Some(resource), Some(deployment)) = (resource, deployment) {
            return Self::gateway_with(
                &resource,
                &deployment,
                version.as_deref().unwrap_or(DEFAULT_GATEWAY_API_VERSION),
                use_directory_auth,
            );
        }

        let domain = pick(&sources.domain, |c| c.proxy_domain.as_deref());
        let mut settings = Self::direct_with(
            domain.as_deref().unwrap_or(DEFAULT_DOMAIN),
            version.as_deref().unwrap_or(DEFAULT_API_VERSION),
        );
        settings.use_directory_auth = use_directory_auth;
        settings
    }

    /// Settings for the public API or a proxy on `domain`.
    pub fn proxy(domain: &str, api_version: Option<&str>) -> Self {
        Self::direct_with(domain, api_version.unwrap_or(DEFAULT_API_VERSION))
    }

    /// Settings for an enterprise gateway deployment.
    pub fn gateway(
        resource_name: &str,
        deployment_id: &str,
        api_version: Option<&str>,
        use_directory_auth: bool,
    ) -> Self {
        Self::resolve(&SettingsSources {
            resource_name: Some(resource_name.to_string()),
            deployment_id: Some(deployment_id.to_string()),
            api_version: api_version.map(str::to_string),
            use_directory_auth: Some(use_directory_auth),
            ..Default::default()
        })
    }

    fn direct_with(domain: &str, api_version: &str) -> Self {
        let (scheme, host) = split_scheme(domain);
        let host = if is_plain_domain(host) {
            host
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!(domain, "ignoring malformed domain; using the public API");
            DEFAULT_DOMAIN
        };
        let mode = if host == DEFAULT_DOMAIN {
            EndpointMode::Direct
        } else {
            EndpointMode::Proxy
        };
        let api_version = api_version.trim().trim_matches('/');
        let base_url_template = if api_version.is_empty() {
            format!("{scheme}://{host}/{RESOURCE_PLACEHOLDER}")
        } else {
            format!("{scheme}://{host}/{api_version}/{RESOURCE_PLACEHOLDER}")
        };
        Self {
            mode,
            base_url_template,
            api_version: api_version.to_string(),
            use_directory_auth: false,
        }
    }

    fn gateway_with(
        resource_name: &str,
        deployment_id: &str,
        api_version: &str,
        use_directory_auth: bool,
    ) -> Self {
        let api_version = api_version.trim();
        Self {
            mode: EndpointMode::Gateway,
            base_url_template: format!(
                "https://{}.{GATEWAY_DOMAIN}/openai/deployments/{}/{RESOURCE_PLACEHOLDER}?api-version={api_version}",
                resource_name.trim(),
                deployment_id.trim(),
            ),
            api_version: api_version.to_string(),
            use_directory_auth,
        }
    }

    pub fn mode(&self) -> EndpointMode {
        self.mode
    }

    pub fn base_url_template(&self) -> &str {
        &self.base_url_template
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn use_directory_auth(&self) -> bool {
        self.use_directory_auth
    }

    /// Full URL for a resource path such as `chat/completions` or `models/abc?x=1`.
    pub fn resource_url(&self, resource: &str) -> String {
        let resource = resource.trim_start_matches('/');
        let (path, query) = match resource.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (resource, None),
        };
        let mut url = self.base_url_template.replace(RESOURCE_PLACEHOLDER, path);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(query);
        }
        url
    }

    /// Install `settings` as the process-wide default. The last call wins.
    pub fn set_process_default(settings: Settings) {
        let mut slot = PROCESS_DEFAULT
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(Arc::new(settings));
    }

    /// Forget the process-wide default so [`Settings::process_default`] returns the built-in one.
    pub fn clear_process_default() {
        let mut slot = PROCESS_DEFAULT
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = None;
    }

    /// The process-wide default, or the public API defaults if none was installed.
    pub fn process_default() -> Arc<Settings> {
        let slot = PROCESS_DEFAULT
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.clone().unwrap_or_else(|| Arc::new(Settings::default()))
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn split_scheme(domain: &str) -> (&str, &str) {
    let domain = domain.trim().trim_end_matches('/');
    match domain.split_once("://") {
        Some((scheme, host)) if scheme == "http" || scheme == "https" => (scheme, host),
        _ => ("https", domain),
    }
}

fn is_plain_domain(host: &str) -> bool {
    !host.is_empty()
        && !host.contains('/')
        && !host.chars().any(char::is_whitespace)
        && (host.contains('.') || host.contains(':'))
}

pub(crate) fn discover_quietly(dir: &Path) -> Option<Configuration> {
    match Configuration::discover(dir) {
        Ok(found) => found,
        Err(_err) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_err, "ignoring unreadable configuration file");
            None
        }
    }
}
