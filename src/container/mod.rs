//! Builder images: assembling their build context, fingerprinting it, and
//! building, caching and running them with Docker.

pub mod context;
pub mod engine;
pub mod hash;
pub mod image;
pub mod registry;
pub mod run;

pub use context::BuildContext;
pub use hash::hash_directory;
pub use image::{CachedImage, ContainerImage, GitInfo};
pub use run::ContainerRun;
