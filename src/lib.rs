//! Outfitter
//!
//! Addon management core for a game launcher: tracks installed add-ons
//! (plugins, skins, music packages), ingests remote catalog metadata,
//! resolves inter-addon dependencies, and performs atomic install, update,
//! and remove operations.
//!
//! # Architecture
//!
//! - **descriptor**: compendium document parsing into a validated model
//! - **registry**: the installed set and the available index
//! - **resolver**: request -> ordered operation plan
//! - **engine**: plan execution with staged, atomic commits
//! - **scripts**: startup-hook bookkeeping for the launch collaborator
//! - **fetch**: catalog and payload transport on a background thread
//!
//! # Usage
//!
//! ```no_run
//! use outfitter::{AddonRegistry, SharedRegistry, InstallEngine};
//! use outfitter::{resolve, Request, CancelToken, HttpPayloadSource};
//! # let scan_root = std::path::PathBuf::from("/tmp/addons");
//! # let identity = outfitter::AddonIdentity::new(
//! #     outfitter::Category::Plugin, "Author", "TitanBar");
//!
//! let mut registry = AddonRegistry::new();
//! registry.load_installed(&scan_root);
//! let shared = SharedRegistry::new(registry);
//!
//! let plan = resolve(
//!     &Request::Install { identity, version: None },
//!     &shared.snapshot(),
//! ).expect("resolution failed");
//!
//! let engine = InstallEngine::new(shared, scan_root);
//! let report = engine.execute(&plan, &HttpPayloadSource::new(), &CancelToken::new());
//! println!("{report}");
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod descriptor;
pub mod engine;
pub mod fetch;
pub mod logging;
pub mod registry;
pub mod resolver;
pub mod scripts;

// Re-export main types
pub use config::AddonSettings;
pub use descriptor::{
    AddonDescriptor, AddonIdentity, Category, DependencyRef, DescriptorError, Provenance, Version,
    parse_descriptor,
};
pub use engine::{
    CancelToken, EngineError, ExecutionReport, InstallEngine, OpStatus, PayloadSource,
};
pub use fetch::{BackgroundFetcher, CatalogFeed, FetchResult, HttpCatalogFeed, HttpPayloadSource};
pub use registry::{AddonRegistry, InstalledAddon, SharedRegistry};
pub use resolver::{OpKind, Operation, OperationPlan, Request, ResolveError, resolve};
pub use scripts::{ScriptHandle, hooks_for};

use thiserror::Error;

/// Top-level error for callers that funnel every subsystem failure into
/// one channel (the launcher UI does).
#[derive(Debug, Error)]
pub enum OutfitterError {
    /// A descriptor failed to parse or validate.
    #[error(transparent)]
    MalformedDescriptor(#[from] DescriptorError),
    /// Dependency resolution failed; nothing was mutated.
    #[error(transparent)]
    Resolution(#[from] ResolveError),
    /// A plan operation failed at commit time.
    #[error(transparent)]
    Execution(#[from] EngineError),
    /// The remote catalog could not be fetched.
    #[error(transparent)]
    Catalog(#[from] fetch::FetchError),
}
