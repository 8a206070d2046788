//! Storage module for downloaded documents
//!
//! This module handles everything after a PDF URL has been chosen:
//! - HEAD validation and size limits before any bytes move
//! - Byte-signature checks on the downloaded content
//! - Local and object-store persistence
//! - The file registry that makes re-runs skip unchanged files

mod filename;
mod manager;
mod object_store;
mod registry;

pub use filename::{department_slug, generate_filename, slugify};
pub use manager::{validate_pdf_content, StorageManager};
pub use object_store::{HttpObjectStore, ObjectStore, S3ObjectStore};
pub use registry::{content_hash, FileRegistry, RegistryEntry, RegistryStats};
