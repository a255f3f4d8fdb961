//! mkci drives the tools a Debian package CI pipeline is made of.
//!
//! ## how?
//!
//! Every command starts from a [`Project`]: a git checkout whose
//! `.github/debian-distro-settings.yaml` lists the OS releases it supports and
//! the release/architecture pairs that may be built. A requested pair is
//! checked against that list and "armed", and every image name, tag and
//! registry reference is derived from the armed pair. The actual work is done
//! by external tools (`dpkg-buildpackage`, `dpkg-sig`, `gpg`, `git`, `docker`,
//! `cloudsmith`) run through a [`Runner`].
//!
//! ## commands
//!
//! - `build-packages`: configure, build, sign and list Debian packages
//! - `build-container-image`: build, push and pull builder images, reusing a
//!   registry image when its build context hash matches the local tree
//! - `upload-to-registry`: publish packages to Cloudsmith
//! - `query`: print workflow matrices derived from the settings
//! - `run-in-container`: run a command inside a builder image

pub mod cli;
pub mod container;
pub mod fs;
pub mod package;
pub mod process;
pub mod project;
pub mod query;
pub mod upload;
pub mod util;

pub use process::Runner;
pub use project::Project;

pub mod prelude {
    pub use crate::container::{BuildContext, CachedImage, ContainerImage, ContainerRun};
    pub use crate::package::PackageBuilder;
    pub use crate::process::{Cmd, CommandError, Runner, SystemRunner};
    pub use crate::project::Project;
    pub use crate::query::{OutputFormat, Query, QueryKey};
    pub use crate::upload::{CloudsmithCache, Uploader};
    pub use crate::util::config::{ArmedCombination, ConfigError, DistroSettings};
    pub use crate::util::env::Environment;
}
