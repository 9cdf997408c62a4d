//! Module archive inspection
//!
//! Locates build descriptors and initializer classes inside module archives.

pub mod inspector;

pub use inspector::{is_archive, ArchiveInspector, InitializerConvention, BUILD_DESCRIPTOR_NAME};
