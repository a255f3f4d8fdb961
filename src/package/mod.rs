//! Building, signing and listing Debian packages with the `dpkg` tools.

use std::path::PathBuf;

use eyre::{eyre, Result};
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tracing::*;

use crate::fs::normalize;
use crate::project::Project;
use crate::util::strip_epoch;

/// Releases whose `dpkg-buildpackage` needs `-d` to get past build
/// dependency checks.
const SKIP_DEPENDENCY_CHECK: &[&str] = &["stretch", "bionic"];

/// Source name and version from the newest changelog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    pub source: String,
    pub version: String,
}

pub struct PackageBuilder<'a> {
    project: &'a Project,
    architecture: String,
}

impl<'a> PackageBuilder<'a> {
    /// Builder for `architecture`, or for `$ARCHITECTURE` / the host
    /// architecture if none is given. Fails unless dpkg can build for it.
    pub async fn new(project: &'a Project, architecture: Option<String>) -> Result<Self> {
        let architecture = match architecture {
            Some(architecture) => architecture,
            None => Self::default_architecture(project).await?,
        };
        let builder = Self {
            project,
            architecture,
        };
        builder.validate_architecture().await?;
        builder.check_buildable().await?;

        info!("package directory: {}", project.source_dir().display());
        info!("host architecture: {}", builder.architecture);
        Ok(builder)
    }

    pub async fn default_architecture(project: &Project) -> Result<String> {
        if let Some(architecture) = project.env().lookup("ARCHITECTURE") {
            return Ok(architecture);
        }
        Ok(project
            .runner()
            .read(&project.cmd("dpkg-architecture").arg("-qDEB_HOST_ARCH"))
            .await?)
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    async fn validate_architecture(&self) -> Result<()> {
        self.project
            .runner()
            .output(
                &self
                    .project
                    .cmd("dpkg-architecture")
                    .args(["-a", self.architecture.as_str()]),
            )
            .await
            .map_err(|_| {
                eyre!(
                    "architecture {} is not a valid dpkg one",
                    self.architecture
                )
            })?;
        Ok(())
    }

    /// The architecture must be the native one or an added foreign one.
    async fn check_buildable(&self) -> Result<()> {
        let runner = self.project.runner();
        let foreign = runner
            .read(&self.project.cmd("dpkg").arg("--print-foreign-architectures"))
            .await?;
        let native = runner
            .read(&self.project.cmd("dpkg").arg("--print-architecture"))
            .await?;

        let buildable = foreign
            .split_whitespace()
            .chain(std::iter::once(native.as_str()))
            .any(|a| a == self.architecture);
        if !buildable {
            return Err(eyre!(
                "host architecture {} cannot be built",
                self.architecture
            ));
        }
        Ok(())
    }

    pub async fn configure_source(&self) -> Result<()> {
        let Some(configure_cmd) = self.project.settings().configure_source_cmd() else {
            info!("no configureSourceCmd specified; doing nothing");
            return Ok(());
        };
        // may write an orig.tar.gz next to the repository
        self.project.assert_parent_dir_writable()?;

        info!("running configureSourceCmd '{configure_cmd}'");
        self.project
            .runner()
            .status(&self.project.cmd("bash").args(["-c", configure_cmd]))
            .await
            .map_err(|e| eyre!("configure source command '{configure_cmd}' failed: {e}"))?;
        Ok(())
    }

    pub async fn build(&self) -> Result<()> {
        self.project.assert_parent_dir_writable()?;
        let runner = self.project.runner();

        let codename = runner
            .read(&self.project.cmd("lsb_release").arg("-cs"))
            .await?
            .to_lowercase();
        let mut cmd = self
            .project
            .cmd("dpkg-buildpackage")
            .args(["-uc", "-us", "-a", self.architecture.as_str(), "-B"])
            .cwd(self.project.source_dir());
        if SKIP_DEPENDENCY_CHECK.contains(&codename.as_str()) {
            cmd = cmd.arg("-d");
        }

        info!("building packages: {cmd}");
        runner
            .status(&cmd)
            .await
            .map_err(|e| eyre!("packages cannot be built because of an error: {e}"))?;
        Ok(())
    }

    pub async fn changelog(&self) -> Result<ChangelogEntry> {
        let changelog = self.project.debian_dir().join("changelog");
        let field = |name: &str| {
            self.project
                .cmd("dpkg-parsechangelog")
                .arg("-l")
                .arg(changelog.to_string_lossy())
                .args(["-S", name])
        };
        let runner = self.project.runner();

        Ok(ChangelogEntry {
            source: runner.read(&field("Source")).await?,
            version: runner.read(&field("Version")).await?,
        })
    }

    /// `<source parent>/<source>_<version>_<arch>.changes`
    pub async fn changes_file_path(&self) -> Result<PathBuf> {
        let entry = self.changelog().await?;
        Ok(self.project.source_parent_dir().join(format!(
            "{}_{}_{}.changes",
            entry.source,
            strip_epoch(&entry.version),
            self.architecture
        )))
    }

    async fn gpg_home(&self) -> Result<PathBuf> {
        let help = self
            .project
            .runner()
            .read(&self.project.cmd("gpg").arg("--help"))
            .await?;
        let home_regex = Regex::new(r"(?m)^Home:\s*(.*)$")?;
        let home = home_regex
            .captures(&help)
            .and_then(|c| c.get(1))
            .ok_or_else(|| eyre!("could not find GPG home in `gpg --help` output"))?
            .as_str()
            .trim();

        let home = match home.strip_prefix("~/") {
            Some(rest) => PathBuf::from(self.project.env().get("HOME")?).join(rest),
            None => PathBuf::from(home),
        };
        Ok(normalize(&home))
    }

    /// Import the secret key held in the environment variable `var`.
    pub async fn import_gpg_key(&self, var: &str) -> Result<()> {
        let gpg_home = self.gpg_home().await?;
        info!("GPG home: {}", gpg_home.display());
        let secret = self.project.env().get(var)?;

        let key_file = gpg_home.join(format!("mkci-import-{}.asc", rand::random::<u32>()));
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&key_file)
            .await?;
        file.write_all(secret.as_bytes()).await?;
        file.flush().await?;
        drop(file);

        let result = self
            .project
            .runner()
            .status(
                &self
                    .project
                    .cmd("gpg")
                    .args(["-v", "--batch", "--import"])
                    .arg(key_file.to_string_lossy()),
            )
            .await;
        if let Err(e) = tokio::fs::remove_file(&key_file).await {
            warn!("could not remove {}: {e}", key_file.display());
        }
        result?;

        Ok(())
    }

    pub async fn sign(&self) -> Result<()> {
        let key_id = self.project.env().get("PACKAGE_SIGNING_KEY_ID")?;
        let changes = self.changes_file_path().await?;

        self.project
            .runner()
            .status(
                &self
                    .project
                    .cmd("dpkg-sig")
                    .args(["--sign", "builder", "-v", "-k", key_id.as_str()])
                    .arg(changes.to_string_lossy())
                    .cwd(self.project.source_parent_dir()),
            )
            .await?;
        Ok(())
    }

    /// Absolute paths of the files in the `.changes` file's `Files` field.
    pub async fn package_list(&self) -> Result<Vec<PathBuf>> {
        let path = self.changes_file_path().await?;
        debug!("reading {}", path.display());
        let f = std::fs::File::open(&path)
            .map_err(|e| eyre!("could not open {}: {e}", path.display()))?;
        let changes = debian_control::changes::Changes::read(&f)
            .map_err(|e| eyre!("could not parse {}: {e}", path.display()))?;

        let parent = self.project.source_parent_dir();
        Ok(changes
            .files()
            .unwrap_or_default()
            .iter()
            .map(|file| parent.join(&file.filename))
            .collect())
    }

    /// Package files, then `.buildinfo` and `.changes` files if asked for.
    pub async fn list(&self, with_buildinfo: bool, with_changes: bool) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = self
            .package_list()
            .await?
            .into_iter()
            .filter(|f| with_buildinfo || f.extension().map_or(true, |ext| ext != "buildinfo"))
            .collect();
        if with_changes {
            files.push(self.changes_file_path().await?);
        }
        Ok(files)
    }
}
