//! Publishing built packages to Cloudsmith with the `cloudsmith` CLI.

use std::path::{Path, PathBuf};

use eyre::{eyre, Result};
use regex::Regex;
use serde::Deserialize;
use tracing::*;

use crate::fs::list_files;
use crate::project::Project;

const WHOAMI_REGEX: &str = r"(?m)slug: *([^,]*),";
const PACKAGE_REGEX: &str = r"^[^_]+_(.*)_([^.]*)\.d?deb$";
/// `<anything>-<distro>-<release>-<arch>-<x>-<y>`
const DIRECTORY_REGEX: &str = r"^.+-([^-]+)-([^-]+)-([^-]+)-[^-]+-[^-]+$";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CloudsmithRepo {
    pub namespace: String,
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoList {
    data: Vec<CloudsmithRepo>,
}

/// Cloudsmith account details, looked up at most once per run.
#[derive(Debug, Default)]
pub struct CloudsmithCache {
    namespace: Option<String>,
    repo: Option<CloudsmithRepo>,
}

impl CloudsmithCache {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A package file and the directory it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageFile {
    pub dir: PathBuf,
    pub name: String,
}

pub struct Uploader<'a> {
    project: &'a Project,
    package_directory: PathBuf,
}

impl<'a> Uploader<'a> {
    pub fn new(project: &'a Project, package_directory: PathBuf) -> Self {
        Self {
            project,
            package_directory,
        }
    }

    pub fn repo_slug(&self) -> String {
        self.project.settings().cloudsmith_repo_slug()
    }

    /// The account namespace reported by `cloudsmith whoami`.
    pub async fn namespace(&self, cache: &mut CloudsmithCache) -> Result<String> {
        if let Some(namespace) = &cache.namespace {
            return Ok(namespace.clone());
        }

        let whoami = self
            .project
            .runner()
            .read(&self.project.cmd("cloudsmith").arg("whoami"))
            .await?;
        let namespace = Regex::new(WHOAMI_REGEX)?
            .captures(&whoami)
            .and_then(|c| c.get(1))
            .ok_or_else(|| eyre!("no Cloudsmith namespace in `cloudsmith whoami` output"))?
            .as_str()
            .trim()
            .to_string();
        info!("discovered Cloudsmith namespace {namespace}");

        cache.namespace = Some(namespace.clone());
        Ok(namespace)
    }

    /// The repository the packages go to, which must already exist.
    pub async fn repo(&self, cache: &mut CloudsmithCache) -> Result<CloudsmithRepo> {
        if let Some(repo) = &cache.repo {
            return Ok(repo.clone());
        }

        let namespace = self.namespace(cache).await?;
        let slug = self.repo_slug();
        let output = self
            .project
            .runner()
            .output(
                &self
                    .project
                    .cmd("cloudsmith")
                    .args(["list", "repos", "--output-format=json"]),
            )
            .await?;
        let repos: RepoList = serde_json::from_slice(&output.stdout)?;

        let repo = repos
            .data
            .into_iter()
            .find(|r| r.namespace == namespace && r.slug == slug)
            .ok_or_else(|| {
                eyre!("no Cloudsmith repo found in {namespace} namespace with {slug} slug")
            })?;
        info!("found Cloudsmith repo, namespace {namespace}, slug {slug}");

        cache.repo = Some(repo.clone());
        Ok(repo)
    }

    /// Every `.deb`/`.ddeb` under the package directory, sorted by path.
    pub async fn find_packages(&self) -> Result<Vec<PackageFile>> {
        let package_regex = Regex::new(PACKAGE_REGEX)?;
        let mut files = list_files(&self.package_directory).await?;
        files.sort();

        Ok(files
            .into_iter()
            .filter_map(|path| {
                let name = path.file_name()?.to_str()?.to_string();
                if !package_regex.is_match(&name) {
                    return None;
                }
                Some(PackageFile {
                    dir: path.parent()?.to_path_buf(),
                    name,
                })
            })
            .collect())
    }

    /// `<namespace>/<slug>/<distro>/<release>`, with distro and release
    /// parsed from the name of the package's directory.
    pub fn destination(&self, namespace: &str, dir: &Path) -> Result<String> {
        let dir_name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| eyre!("package directory {} has no name", dir.display()))?;
        let captures = Regex::new(DIRECTORY_REGEX)?
            .captures(dir_name)
            .ok_or_else(|| {
                eyre!("package directory name {dir_name} does not match {DIRECTORY_REGEX}")
            })?;

        Ok(format!(
            "{namespace}/{}/{}/{}",
            self.repo_slug(),
            &captures[1],
            &captures[2]
        ))
    }

    pub async fn upload(&self, cache: &mut CloudsmithCache, dry_run: bool) -> Result<()> {
        let namespace = self.namespace(cache).await?;
        self.repo(cache).await?;

        let packages = self.find_packages().await?;
        if packages.is_empty() {
            warn!(
                "no packages found under {}",
                self.package_directory.display()
            );
        }

        for package in packages {
            let destination = self.destination(&namespace, &package.dir)?;
            info!("uploading package {destination} {}", package.name);
            let cmd = self
                .project
                .cmd("cloudsmith")
                .args(["push", "deb", "--republish"])
                .arg(destination)
                .arg(package.name)
                .cwd(package.dir);

            if dry_run {
                self.project.runner().show(&cmd);
                continue;
            }
            self.project.runner().status(&cmd).await?;
        }

        Ok(())
    }
}
