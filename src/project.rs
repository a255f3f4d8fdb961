use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::{eyre, Result};
use tracing::*;
use url::Url;

use crate::fs::normalize;
use crate::process::{Cmd, Runner};
use crate::util::config::{ArmedCombination, DistroSettings};
use crate::util::env::Environment;
use crate::util::is_writable;

/// A git checkout carrying `.github/debian-distro-settings.yaml`, with the
/// environment and process runner every command works through.
pub struct Project {
    root: PathBuf,
    settings: DistroSettings,
    env: Environment,
    runner: Arc<dyn Runner>,
}

impl Project {
    /// Locate the repository containing `path` (default: the current
    /// directory) and load its settings.
    pub async fn open(path: Option<PathBuf>, runner: Arc<dyn Runner>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => std::env::current_dir()?,
        };
        if !path.exists() {
            return Err(eyre!("path {} is not a file or directory", path.display()));
        }

        let root = runner
            .read(
                &Cmd::new("git")
                    .args(["rev-parse", "--show-toplevel"])
                    .cwd(&path),
            )
            .await
            .map_err(|e| eyre!("path {} is not a git repository: {e}", path.display()))?;
        let root = PathBuf::from(root.trim_end_matches('/'));

        let version = tokio::fs::read_to_string(root.join("VERSION"))
            .await
            .unwrap_or_default();
        if version.trim().is_empty() {
            return Err(eyre!(
                "path {} is not a repository root: no VERSION file",
                root.display()
            ));
        }

        let github_dir = root.join(".github");
        if !github_dir.is_dir() {
            return Err(eyre!(
                "path {} is not a file or directory",
                github_dir.display()
            ));
        }

        let settings = DistroSettings::load(&github_dir).await?;
        let env = Environment::load(&github_dir).await?;
        info!("project {} at {}", settings.project_name, root.display());

        Ok(Self::new(root, settings, env, runner))
    }

    pub fn new(
        root: PathBuf,
        settings: DistroSettings,
        env: Environment,
        runner: Arc<dyn Runner>,
    ) -> Self {
        Self {
            root,
            settings,
            env,
            runner,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &DistroSettings {
        &self.settings
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn runner(&self) -> &dyn Runner {
        self.runner.as_ref()
    }

    /// A command running in the repository root with the local environment
    /// exported.
    pub fn cmd<S: Into<String>>(&self, program: S) -> Cmd {
        self.env
            .exported()
            .fold(Cmd::new(program).cwd(&self.root), |cmd, (k, v)| {
                cmd.env(k.clone(), v.clone())
            })
    }

    pub fn parent_dir(&self) -> PathBuf {
        normalize(&self.root.join(".."))
    }

    pub fn source_dir(&self) -> PathBuf {
        normalize(&self.root.join(self.settings.source_dir()))
    }

    pub fn source_parent_dir(&self) -> PathBuf {
        normalize(&self.source_dir().join(".."))
    }

    pub fn debian_dir(&self) -> PathBuf {
        normalize(&self.root.join(self.settings.debian_dir()))
    }

    pub fn assert_parent_dir_writable(&self) -> Result<()> {
        let parent = self.parent_dir();
        if !is_writable(&parent) {
            return Err(eyre!("directory {} is not writable", parent.display()));
        }
        Ok(())
    }

    pub fn arm(&self, version: &str, architecture: &str) -> Result<ArmedCombination> {
        Ok(self.settings.arm(version, architecture)?)
    }

    /// `$DOCKER_REGISTRY_USER/$DOCKER_REGISTRY_REPO`
    pub fn registry_namespace(&self) -> Result<String> {
        Ok(format!(
            "{}/{}",
            self.env.get("DOCKER_REGISTRY_USER")?,
            self.env.get("DOCKER_REGISTRY_REPO")?
        ))
    }

    pub fn registry_url(&self) -> Result<Url> {
        let raw = self.env.get("DOCKER_REGISTRY_URL")?;
        Url::parse(&raw).map_err(|e| eyre!("invalid DOCKER_REGISTRY_URL {raw:?}: {e}"))
    }

    /// `<namespace>/<image name>`, the repository path inside the registry.
    pub fn registry_repository(&self, armed: &ArmedCombination) -> Result<String> {
        Ok(format!(
            "{}/{}",
            self.registry_namespace()?,
            self.settings.image_name(armed)
        ))
    }

    /// `host[:port]` of `$DOCKER_REGISTRY_URL`, as used in image references.
    pub fn registry_host(&self) -> Result<String> {
        let url = self.registry_url()?;
        let host = url
            .host_str()
            .ok_or_else(|| eyre!("DOCKER_REGISTRY_URL {url} has no host"))?;
        Ok(match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        })
    }

    /// `<registry host>/<namespace>/<image name>:<image tag>`
    pub fn image_registry_name_tag(&self, armed: &ArmedCombination) -> Result<String> {
        Ok(format!(
            "{}/{}:{}",
            self.registry_host()?,
            self.registry_repository(armed)?,
            self.settings.image_tag(armed)
        ))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::fs::TempDir;
    use crate::process::testing::RecordingRunner;

    #[ctor::ctor]
    fn init() {
        crate::util::test_init();
    }

    #[test]
    fn test_registry_reference() -> Result<()> {
        let project = project(Path::new("/src/hal"), Arc::new(RecordingRunner::new()));
        let armed = project.arm("buster", "armhf")?;

        assert_eq!(
            project.image_registry_name_tag(&armed)?,
            "ghcr.io/machinekit/ci/machinekit-hal-debian-builder:10_armhf"
        );
        assert_eq!(
            project.registry_repository(&armed)?,
            "machinekit/ci/machinekit-hal-debian-builder"
        );

        Ok(())
    }

    #[test]
    fn test_registry_reference_keeps_port() -> Result<()> {
        let project = project_with(
            Path::new("/src/hal"),
            SETTINGS,
            Environment::isolated([
                ("DOCKER_REGISTRY_URL", "http://localhost:5000"),
                ("DOCKER_REGISTRY_USER", "machinekit"),
                ("DOCKER_REGISTRY_REPO", "ci"),
            ]),
            Arc::new(RecordingRunner::new()),
        );
        let armed = project.arm("buster", "amd64")?;

        assert_eq!(project.registry_host()?, "localhost:5000");
        assert_eq!(
            project.image_registry_name_tag(&armed)?,
            "localhost:5000/machinekit/ci/machinekit-hal-debian-builder:10_amd64"
        );

        let default_port = project_with(
            Path::new("/src/hal"),
            SETTINGS,
            Environment::isolated([("DOCKER_REGISTRY_URL", "https://ghcr.io:443")]),
            Arc::new(RecordingRunner::new()),
        );
        assert_eq!(default_port.registry_host()?, "ghcr.io");

        Ok(())
    }

    #[test]
    fn test_missing_registry_env_is_an_error() {
        let project = project_with(
            Path::new("/src/hal"),
            SETTINGS,
            Environment::isolated(Vec::<(String, String)>::new()),
            Arc::new(RecordingRunner::new()),
        );
        let armed = project.arm("focal", "amd64").unwrap();

        let err = project.image_registry_name_tag(&armed).unwrap_err();
        assert!(err.to_string().contains("DOCKER_REGISTRY_URL unset"));
    }

    #[test]
    fn test_paths() {
        let project = project(Path::new("/src/hal"), Arc::new(RecordingRunner::new()));

        assert_eq!(project.parent_dir(), PathBuf::from("/src"));
        assert_eq!(project.source_dir(), PathBuf::from("/src/hal"));
        assert_eq!(project.source_parent_dir(), PathBuf::from("/src"));
        assert_eq!(project.debian_dir(), PathBuf::from("/src/hal/debian"));
    }

    #[test]
    fn test_cmd_exports_local_env() {
        let project = project_with(
            Path::new("/src/hal"),
            SETTINGS,
            Environment::isolated([("CLOUDSMITH_API_KEY", "secret")]),
            Arc::new(RecordingRunner::new()),
        );
        let cmd = project.cmd("cloudsmith").arg("whoami");

        assert_eq!(cmd.get_cwd(), Some(Path::new("/src/hal")));
        assert_eq!(
            cmd.get_envs(),
            &[("CLOUDSMITH_API_KEY".to_string(), "secret".to_string())]
        );
    }

    #[tokio::test]
    async fn test_open_finds_repository_root() -> Result<()> {
        let tmp = TempDir::new().await?;
        let root = tmp.path_view();
        tokio::fs::create_dir_all(root.join(".github")).await?;
        tokio::fs::write(root.join("VERSION"), "0.4\n").await?;
        tokio::fs::write(root.join(".github/debian-distro-settings.yaml"), SETTINGS).await?;

        let runner = Arc::new(RecordingRunner::new().respond(
            "git rev-parse --show-toplevel",
            format!("{}\n", root.display()),
        ));
        let project = Project::open(Some(root.join(".github")), runner.clone()).await?;

        assert_eq!(project.root(), root.as_path());
        assert_eq!(project.settings().package, "machinekit-hal");
        assert_eq!(
            runner.calls()[0].get_cwd(),
            Some(root.join(".github").as_path())
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_open_requires_version_file() -> Result<()> {
        let tmp = TempDir::new().await?;
        let root = tmp.path_view();
        let runner = Arc::new(
            RecordingRunner::new().respond("git rev-parse", root.display().to_string()),
        );

        let err = Project::open(Some(root), runner).await.err().unwrap();
        assert!(err.to_string().contains("no VERSION file"));

        Ok(())
    }

    #[tokio::test]
    async fn test_open_outside_git_fails() -> Result<()> {
        let tmp = TempDir::new().await?;
        let runner = Arc::new(
            RecordingRunner::new().fail("git rev-parse", "fatal: not a git repository"),
        );

        let err = Project::open(Some(tmp.path_view()), runner).await.err().unwrap();
        assert!(err.to_string().contains("is not a git repository"));

        Ok(())
    }
}
