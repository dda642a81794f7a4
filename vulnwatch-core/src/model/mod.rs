//! Domain records shared by the inspector, scanners, store and reconcilers.

pub mod build;
pub mod image;
pub mod job;
pub mod report;
pub mod workload;

pub use build::*;
pub use image::*;
pub use job::*;
pub use report::*;
pub use workload::*;
