use std::collections::BTreeMap;
use std::path::Path;

use eyre::Result;
use tracing::*;

use super::config::ConfigError;

/// Optional file in `.github/` with environment settings for running outside
/// of CI.
pub const LOCAL_ENV_FILE: &str = "local-env.yaml";

/// Environment variables visible to the tool and to every child process it
/// spawns.
///
/// The process environment always wins; `local-env.yaml` only fills in
/// variables that are unset.
#[derive(Debug, Clone)]
pub struct Environment {
    overlay: BTreeMap<String, String>,
    inherit: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            overlay: BTreeMap::new(),
            inherit: true,
        }
    }
}

impl Environment {
    pub async fn load(github_dir: &Path) -> Result<Self> {
        let path = github_dir.join(LOCAL_ENV_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        info!("loading local environment from {}", path.display());
        let buf = tokio::fs::read_to_string(&path).await?;
        let settings: BTreeMap<String, String> = serde_yaml::from_str(&buf)?;

        let overlay = settings
            .into_iter()
            .filter(|(key, _)| std::env::var_os(key).is_none())
            .collect::<BTreeMap<_, _>>();
        debug!("local environment sets {} variables", overlay.len());

        Ok(Self {
            overlay,
            inherit: true,
        })
    }

    /// An environment that ignores the process environment.
    pub fn isolated<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            overlay: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            inherit: false,
        }
    }

    pub fn lookup(&self, var: &str) -> Option<String> {
        if self.inherit {
            if let Ok(value) = std::env::var(var) {
                return Some(value);
            }
        }
        self.overlay.get(var).cloned()
    }

    pub fn get(&self, var: &str) -> Result<String, ConfigError> {
        self.lookup(var)
            .ok_or_else(|| ConfigError::UnsetVariable(var.into()))
    }

    /// Variables to add to a child process' environment.
    pub fn exported(&self) -> impl Iterator<Item = (&String, &String)> {
        self.overlay.iter()
    }
}

#[cfg(test)]
mod tests {
    use crate::fs::TempDir;

    use super::*;

    #[ctor::ctor]
    fn init() {
        crate::util::test_init();
    }

    #[test]
    fn test_isolated_lookup() {
        let env = Environment::isolated([("DOCKER_REGISTRY_USER", "zultron")]);

        assert_eq!(env.get("DOCKER_REGISTRY_USER").unwrap(), "zultron");
        assert!(env.lookup("DOCKER_REGISTRY_REPO").is_none());
        let err = env.get("PATH").unwrap_err();
        assert_eq!(err.to_string(), "PATH unset in environment");
    }

    #[tokio::test]
    async fn test_local_env_does_not_clobber() -> Result<()> {
        let tmp = TempDir::new().await?;
        tokio::fs::write(
            tmp.path_view().join(LOCAL_ENV_FILE),
            "PATH: /clobbered\nMKCI_TEST_LOCAL_ONLY: from-file\n",
        )
        .await?;

        let env = Environment::load(&tmp.path_view()).await?;

        assert_ne!(env.get("PATH")?, "/clobbered");
        assert_eq!(env.get("MKCI_TEST_LOCAL_ONLY")?, "from-file");
        assert!(env.exported().all(|(k, _)| k != "PATH"));

        Ok(())
    }

    #[tokio::test]
    async fn test_missing_local_env_is_empty() -> Result<()> {
        let tmp = TempDir::new().await?;
        let env = Environment::load(&tmp.path_view()).await?;
        assert_eq!(env.exported().count(), 0);
        Ok(())
    }
}
