//! Pipeline stages for image conversion and document assembly.
//!
//! Each submodule implements exactly one step. The stages are synchronous
//! and know nothing about jobs; [`crate::job`] drives them, moving the
//! CPU-bound ones onto `spawn_blocking`.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ image ──▶ assemble
//! (classify) (→ 1-page PDF) (concatenate)
//!                 cleanup (scratch files, every exit path)
//! ```
//!
//! 1. [`input`]    classify uploads by extension, name staged files
//! 2. [`image`]    decode a raster image and place it on an A4 page
//! 3. [`assemble`] concatenate documents in order; one document is copied
//! 4. [`cleanup`]  remove registered scratch files when a job ends

pub mod assemble;
pub mod cleanup;
pub mod image;
pub mod input;
