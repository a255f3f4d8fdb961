//! Command line interface definition

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use eyre::{eyre, Result};
use tracing::*;

use crate::container::{ContainerImage, ContainerRun};
use crate::package::PackageBuilder;
use crate::process::SystemRunner;
use crate::project::Project;
use crate::query::{OutputFormat, Query, QueryKey};
use crate::upload::{CloudsmithCache, Uploader};

/// mkci - build, containerize and publish Debian packages in CI
#[derive(Parser, Debug)]
#[command(name = "mkci")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, containerize and publish Debian packages in CI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build packages for Debian like distributions
    BuildPackages(BuildPackagesArgs),

    /// Build container images
    BuildContainerImage(BuildContainerImageArgs),

    /// Upload packages to Cloudsmith
    UploadToRegistry(UploadArgs),

    /// Query distro settings
    Query(QueryArgs),

    /// Run commands in a builder container
    RunInContainer(RunInContainerArgs),
}

#[derive(Args, Debug)]
pub struct PathArg {
    /// Path inside the git repository (default: current directory)
    #[arg(short, long)]
    pub path: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct BuildPackagesArgs {
    #[command(flatten)]
    pub path: PathArg,

    /// Build packages for a specific architecture (default: $ARCHITECTURE,
    /// else the host architecture)
    #[arg(short, long, value_name = "ARCHITECTURE")]
    pub architecture: Option<String>,

    /// Run configureSourceCmd to prepare the source tree
    #[arg(long)]
    pub configure_source: bool,

    /// Build packages
    #[arg(long)]
    pub build_packages: bool,

    /// Import a GPG secret key from the given environment variable
    #[arg(long, value_name = "VAR")]
    pub import_gpg_from_secret_env_var: Option<String>,

    /// Sign packages
    #[arg(long)]
    pub sign_packages: bool,

    /// Print the list of package files
    #[arg(long)]
    pub list_packages: bool,

    /// With --list-packages, print the .buildinfo file
    #[arg(long, requires = "list_packages")]
    pub with_buildinfo: bool,

    /// With --list-packages, print the .changes file
    #[arg(long, requires = "list_packages")]
    pub with_changes: bool,
}

#[derive(Args, Debug)]
pub struct BuildContainerImageArgs {
    #[command(flatten)]
    pub path: PathArg,

    /// Build the Docker image
    #[arg(long)]
    pub build: bool,

    /// Dockerfile target to build
    #[arg(short, long, value_name = "TARGET")]
    pub target: Option<String>,

    /// Show the commands but don't run them
    #[arg(long)]
    pub dry_run: bool,

    /// Path to a Dockerfile to use instead of the built-in one
    #[arg(long)]
    pub dockerfile: Option<PathBuf>,

    /// Path to an entrypoint script to use instead of the built-in one
    #[arg(long)]
    pub entrypoint: Option<PathBuf>,

    /// Push the Docker image
    #[arg(long)]
    pub push: bool,

    /// List the registry image's labels
    #[arg(long)]
    pub list_registry: bool,

    /// Pull the Docker image, only if it matches the local tree
    #[arg(long)]
    pub pull: bool,

    /// Show the local build context hash
    #[arg(long)]
    pub show_hash: bool,

    /// Distribution version or codename
    pub version: String,

    /// Debian architecture
    pub architecture: String,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    #[command(flatten)]
    pub path: PathArg,

    /// Directory containing packages (default: current directory)
    #[arg(long)]
    pub package_directory: Option<PathBuf>,

    /// Show what would be done, but don't do anything
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[command(flatten)]
    pub path: PathArg,

    /// OS version number or codename
    #[arg(long, requires = "architecture")]
    pub version: Option<String>,

    /// Debian architecture
    #[arg(long, requires = "version")]
    pub architecture: Option<String>,

    /// List all keys
    #[arg(long)]
    pub list_keys: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Auto)]
    pub format: OutputFormat,

    /// Indent JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Keys to query
    #[arg(value_name = "KEYS")]
    pub keys: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RunInContainerArgs {
    #[command(flatten)]
    pub path: PathArg,

    /// Do NOT pass `--tty --interactive` to docker run
    #[arg(long)]
    pub notty: bool,

    /// Pass or set an environment variable in the container
    #[arg(long, value_name = "VAR[=VALUE]")]
    pub env: Vec<String>,

    /// Bind-mount a directory at the same path in the container
    #[arg(long, value_name = "DIR")]
    pub volume: Vec<String>,

    /// Extra `docker run` option; replaces the defaults when given
    #[arg(long, value_name = "ARG", allow_hyphen_values = true)]
    pub docker_arg: Vec<String>,

    /// OS version number or codename
    pub version: String,

    /// Debian architecture
    pub architecture: String,

    /// Command to run in the container
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let runner = Arc::new(SystemRunner);

        match self.command {
            Command::BuildPackages(args) => {
                let project = Project::open(args.path.path.clone(), runner).await?;
                build_packages(&project, args).await
            }
            Command::BuildContainerImage(args) => {
                let project = Project::open(args.path.path.clone(), runner).await?;
                build_container_image(&project, args).await
            }
            Command::UploadToRegistry(args) => {
                let project = Project::open(args.path.path.clone(), runner).await?;
                upload_to_registry(&project, args).await
            }
            Command::Query(args) => {
                let project = Project::open(args.path.path.clone(), runner).await?;
                query(&project, args)
            }
            Command::RunInContainer(args) => {
                let project = Project::open(args.path.path.clone(), runner).await?;
                run_in_container(&project, args).await
            }
        }
    }
}

pub async fn build_packages(project: &Project, args: BuildPackagesArgs) -> Result<()> {
    let builder = PackageBuilder::new(project, args.architecture).await?;

    if args.configure_source {
        builder.configure_source().await?;
    }
    if args.build_packages {
        builder.build().await?;
    }
    if let Some(var) = &args.import_gpg_from_secret_env_var {
        builder.import_gpg_key(var).await?;
    }
    if args.sign_packages {
        builder.sign().await?;
    }
    if args.list_packages {
        for file in builder.list(args.with_buildinfo, args.with_changes).await? {
            println!("{}", file.display());
        }
    }

    Ok(())
}

pub async fn build_container_image(project: &Project, args: BuildContainerImageArgs) -> Result<()> {
    let image = ContainerImage::new(project, &args.version, &args.architecture)?
        .dockerfile(args.dockerfile)
        .entrypoint(args.entrypoint);

    if args.build {
        image.build(args.target.as_deref(), args.dry_run).await?;
        if !args.dry_run {
            info!("container image build ran successfully to completion!");
        }
    }
    if args.push {
        image.push(args.dry_run).await?;
    }
    if args.list_registry {
        image.list_registry_labels().await?;
    }
    if args.pull && !image.pull(args.dry_run).await? {
        return Err(eyre!(
            "no matching image for {} in the registry",
            image.reference()?
        ));
    }
    if args.show_hash {
        image.show_hash().await?;
    }

    Ok(())
}

pub async fn upload_to_registry(project: &Project, args: UploadArgs) -> Result<()> {
    let package_directory = match args.package_directory {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let mut cache = CloudsmithCache::new();

    Uploader::new(project, package_directory)
        .upload(&mut cache, args.dry_run)
        .await
}

pub fn query(project: &Project, args: QueryArgs) -> Result<()> {
    if let (Some(version), Some(architecture)) = (&args.version, &args.architecture) {
        project.arm(version, architecture)?;
    }

    if args.list_keys {
        for line in QueryKey::list() {
            println!("{line}");
        }
        return Ok(());
    }

    let query = Query::new(project.settings());
    for key in &args.keys {
        let key = QueryKey::parse(key)?;
        println!("{}", query.render(key, args.format, args.pretty)?);
    }

    Ok(())
}

pub async fn run_in_container(project: &Project, args: RunInContainerArgs) -> Result<()> {
    let tty = !args.notty && std::io::stdout().is_terminal();

    ContainerRun::new(project, &args.version, &args.architecture)?
        .tty(tty)
        .env(args.env)
        .volumes(args.volume)
        .docker_args(args.docker_arg)
        .run(&args.command)
        .await
}
