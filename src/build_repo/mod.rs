//! Execution environment builder.
//!
//! Materializes, per profile, a mirrored source branch at the pinned commit
//! and a content-addressed container image built from the profile's recipe.
//! Both operations are idempotent: an existing mirror is left alone and an
//! image whose recipe digest matches the cache marker is not rebuilt.

mod image;
mod mirror;

pub use image::{build_image, BuildOutcome};
pub use mirror::{create_mirror, mirror_exists};
