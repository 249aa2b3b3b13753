//! Shared types for the Holoscan CLI: the platform table, SDK and application
//! kinds, release-number handling, image references and the manifests
//! written into packaged images.

pub mod image;
pub mod kinds;
pub mod manifest;
pub mod platform;
pub mod version;

// Re-exports
pub use image::ImageReference;
pub use kinds::*;
pub use manifest::{ApplicationManifest, IoSpec, PackageManifest, Probe};
pub use platform::*;
