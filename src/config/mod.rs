//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize, defaults for missing fields)
//!     → command-line flags override individual fields (crate::cli)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//! ```
//!
//! The one value that changes at runtime, the default backend, is not kept
//! here: it lives in `proxy::target::DefaultTarget`, seeded from
//! `backend.url`.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{check_config, load_config, parse_config, ConfigError};
pub use schema::{
    BackendConfig, ListenerConfig, ObservabilityConfig, ProxyConfig, ProxyHeaderPolicy, TlsConfig,
};
pub use validation::ValidationError;
