//! API credentials and where they come from.
//!
//! A [`Credential`] is validated once when it is built and never changes
//! afterwards. Sources are consulted in priority order and the first one that
//! yields a non-empty key decides the outcome, including its validation error.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::errors::{Error, Result};

/// Prefix carried by secret API keys.
pub const API_KEY_PREFIX: &str = "sk-";
/// Prefix carried by short-lived session keys.
pub const SESSION_KEY_PREFIX: &str = "sess-";
/// Prefix carried by organization ids.
pub const ORGANIZATION_PREFIX: &str = "org-";
/// Default name of the local credentials file.
pub const CREDENTIALS_FILE: &str = ".openai";

/// Environment variables checked for an API key, in order.
pub const API_KEY_ENV_VARS: [&str; 4] = [
    "OPENAI_API_KEY",
    "OPENAI_KEY",
    "OPENAI_SECRET_KEY",
    "TEST_OPENAI_SECRET_KEY",
];

/// Environment variables checked for an organization id, in order.
pub const ORGANIZATION_ENV_VARS: [&str; 3] =
    ["OPENAI_ORGANIZATION_ID", "OPEN_AI_ORGANIZATION_ID", "ORGANIZATION"];

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self> {
        let value = raw.as_ref().trim();
        if value.is_empty() {
            return Err(Error::InvalidCredential("API key is empty".to_string()));
        }
        if value.contains(API_KEY_PREFIX) || value.contains(SESSION_KEY_PREFIX) {
            return Ok(Self(value.to_string()));
        }
        Err(Error::InvalidCredential(format!(
            "{value} must contain '{API_KEY_PREFIX}'"
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Only a short prefix of the key is printed.
impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.0.chars().take(6).collect();
        write!(f, "ApiKey({visible}***)")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OrganizationId(String);

impl OrganizationId {
    pub fn parse(raw: impl AsRef<str>) -> Result<Self> {
        let value = raw.as_ref().trim();
        if value.contains(ORGANIZATION_PREFIX) {
            return Ok(Self(value.to_string()));
        }
        Err(Error::InvalidCredential(format!(
            "{value} must contain '{ORGANIZATION_PREFIX}'"
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated API key plus optional organization id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credential {
    api_key: ApiKey,
    organization: Option<OrganizationId>,
}

impl Credential {
    /// Validate and build a credential. A blank organization is treated as absent.
    pub fn new(api_key: impl AsRef<str>, organization: Option<&str>) -> Result<Self> {
        let api_key = ApiKey::parse(api_key)?;
        let organization = match organization.map(str::trim).filter(|s| !s.is_empty()) {
            Some(org) => Some(OrganizationId::parse(org)?),
            None => None,
        };
        Ok(Self {
            api_key,
            organization,
        })
    }

    pub fn api_key(&self) -> &ApiKey {
        &self.api_key
    }

    pub fn organization(&self) -> Option<&OrganizationId> {
        self.organization.as_ref()
    }

    /// Read the credential from process environment variables.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read the credential from an environment-style lookup.
    ///
    /// Returns `Ok(None)` when none of [`API_KEY_ENV_VARS`] holds a value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let first = |names: &[&str]| {
            names
                .iter()
                .filter_map(|name| lookup(name))
                .find(|value| !value.trim().is_empty())
        };
        let Some(api_key) = first(&API_KEY_ENV_VARS) else {
            return Ok(None);
        };
        let organization = first(&ORGANIZATION_ENV_VARS);
        Self::new(api_key, organization.as_deref()).map(Some)
    }

    /// Read a credentials file.
    ///
    /// The file is either JSON (`{"apiKey": "...", "organization": "..."}`) or
    /// `KEY=VALUE` lines using the environment variable names. A missing file
    /// yields `Ok(None)`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::Config(format!(
                    "failed to read {}: {err}",
                    path.display()
                )));
            }
        };
        let parsed = parse_credentials_file(&contents)?;
        match parsed {
            Some((key, org)) => Self::new(key, org.as_deref()).map(Some),
            None => Ok(None),
        }
    }

    /// Look for `filename` in `dir`, and in each ancestor of `dir` when `search_up` is set.
    pub fn from_directory(
        dir: impl AsRef<Path>,
        filename: &str,
        search_up: bool,
    ) -> Result<Option<Self>> {
        let mut current: Option<&Path> = Some(dir.as_ref());
        while let Some(dir) = current {
            if let Some(credential) = Self::from_file(dir.join(filename))? {
                #[cfg(feature = "tracing")]
                tracing::debug!(dir = %dir.display(), "loaded credentials file");
                return Ok(Some(credential));
            }
            if !search_up {
                break;
            }
            current = dir.parent();
        }
        Ok(None)
    }

    /// Resolve from the ambient sources: environment, then a `.openai` file in
    /// the working directory or its ancestors, then one in the home directory.
    pub fn resolve() -> Result<Option<Self>> {
        if let Some(credential) = Self::from_env()? {
            return Ok(Some(credential));
        }
        if let Ok(cwd) = std::env::current_dir() {
            if let Some(credential) = Self::from_directory(&cwd, CREDENTIALS_FILE, true)? {
                return Ok(Some(credential));
            }
        }
        match home_credentials_path() {
            Some(path) => Self::from_file(path),
            None => Ok(None),
        }
    }
}

fn home_credentials_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CREDENTIALS_FILE))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsJson {
    #[serde(default, alias = "api_key", alias = "key")]
    api_key: Option<String>,
    #[serde(default, alias = "organizationId", alias = "organization_id")]
    organization: Option<String>,
}

fn parse_credentials_file(contents: &str) -> Result<Option<(String, Option<String>)>> {
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.starts_with('{') {
        let parsed: CredentialsJson = serde_json::from_str(trimmed)?;
        return Ok(parsed
            .api_key
            .filter(|k| !k.trim().is_empty())
            .map(|key| (key, parsed.organization)));
    }

    let mut api_key = None;
    let mut organization = None;
    for line in trimmed.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((name, value)) => {
                let name = name.trim();
                let value = value.trim().trim_matches('"').to_string();
                if API_KEY_ENV_VARS.contains(&name) && api_key.is_none() {
                    api_key = Some(value);
                } else if ORGANIZATION_ENV_VARS.contains(&name) && organization.is_none() {
                    organization = Some(value);
                }
            }
            // A bare line is taken as the key itself.
            None if api_key.is_none() => api_key = Some(line.to_string()),
            None => {}
        }
    }
    Ok(api_key
        .filter(|k| !k.trim().is_empty())
        .map(|key| (key, organization)))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn accepts_keys_with_recognized_prefix() {
        for key in ["sk-abc123", "sess-xyz", "  sk-proj-123  "] {
            let credential = Credential::new(key, None).expect(key);
            assert_eq!(credential.api_key().as_str(), key.trim());
        }
    }

    #[test]
    fn rejects_keys_without_prefix_naming_the_value() {
        for key in ["", "   ", "abc123", "pk-live"] {
            let err = Credential::new(key, None).expect_err(key);
            assert!(matches!(err, Error::InvalidCredential(_)));
        }
        let err = Credential::new("bogus", None).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn validates_organization_when_present() {
        let ok = Credential::new("sk-1", Some("org-42")).unwrap();
        assert_eq!(ok.organization().map(|o| o.as_str()), Some("org-42"));

        let blank = Credential::new("sk-1", Some("  ")).unwrap();
        assert!(blank.organization().is_none());

        let err = Credential::new("sk-1", Some("team-42")).unwrap_err();
        assert!(matches!(err, Error::InvalidCredential(_)));
    }

    #[test]
    fn debug_output_redacts_key() {
        let credential = Credential::new("sk-supersecretvalue", None).unwrap();
        let debug = format!("{credential:?}");
        assert!(!debug.contains("supersecretvalue"));
    }

    #[test]
    fn lookup_uses_first_non_empty_variable() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", " "),
            ("OPENAI_KEY", "sk-from-second"),
            ("OPENAI_SECRET_KEY", "sk-never-read"),
            ("OPEN_AI_ORGANIZATION_ID", "org-7"),
        ]);
        let credential = Credential::from_lookup(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(credential.api_key().as_str(), "sk-from-second");
        assert_eq!(credential.organization().unwrap().as_str(), "org-7");
    }

    #[test]
    fn lookup_without_key_is_none() {
        assert!(Credential::from_lookup(|_| None).unwrap().is_none());
    }

    #[test]
    fn lookup_with_bad_key_fails_instead_of_falling_through() {
        let err = Credential::from_lookup(|name| {
            (name == "OPENAI_API_KEY").then(|| "not-a-key".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidCredential(_)));
    }

    #[test]
    fn parses_key_value_file() {
        let parsed = parse_credentials_file(
            "# local dev\nOPENAI_KEY=sk-file\nOPENAI_ORGANIZATION_ID=\"org-file\"\n",
        )
        .unwrap()
        .unwrap();
        assert_eq!(parsed.0, "sk-file");
        assert_eq!(parsed.1.as_deref(), Some("org-file"));
    }

    #[test]
    fn parses_json_file() {
        let parsed = parse_credentials_file(r#"{"apiKey":"sk-json","organization":"org-json"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(parsed, ("sk-json".to_string(), Some("org-json".to_string())));
    }

    #[test]
    fn bare_line_is_the_key() {
        let parsed = parse_credentials_file("sk-bare\n").unwrap().unwrap();
        assert_eq!(parsed.0, "sk-bare");
        assert!(parsed.1.is_none());
    }

    #[test]
    fn empty_file_is_no_credential() {
        assert!(parse_credentials_file("\n\n").unwrap().is_none());
    }
}
