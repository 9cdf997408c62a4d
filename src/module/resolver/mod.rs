//! Dependency resolution against package repositories
//!
//! Repositories are tried in order behind a local artifact cache.

pub mod cache;
pub mod dependencies;
pub mod repository;

pub use cache::ArtifactCache;
pub use dependencies::DependencyResolver;
#[cfg(feature = "http-repository")]
pub use repository::HttpRepository;
pub use repository::{repository_from_location, DirectoryRepository, PackageRepository};
