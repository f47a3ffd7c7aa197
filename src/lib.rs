//! # Envelope-Kit: Hybrid Encryption and Key Lifecycle for API Backends
//!
//! `envelope-kit` provides the server-side security layer of an API backend:
//! adaptive hybrid encryption for responses, HMAC request signing, RSA-PSS
//! response signatures, and the full lifecycle of the long-lived credentials
//! behind them (RSA keypair, API secret, JWT secret).
//!
//! ## Core Concepts
//!
//! - **`KeyStore`**: generates, persists, and rotates the three credential
//!   classes, optionally reconciling the RSA keypair against a database
//!   mirror shared by multiple instances.
//! - **`ClientKeyRegistry`**: in-memory registry of client RSA public keys
//!   used to encrypt responses toward individual clients.
//! - **`EncryptionEngine`**: picks an encryption strategy by payload size
//!   (standard RSA-OAEP, hybrid AES-CBC, or chunked hybrid) and falls back
//!   down a fixed ladder on failure.
//! - **`ResponseCodec`**: the outer envelope, combining the engine with
//!   RSA-PSS response signatures and request decryption.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use envelope_kit::prelude::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! fn main() -> envelope_kit::Result<()> {
//!     let keystore = Arc::new(KeyStore::open(SecurityConfig::default(), None)?);
//!     let registry = Arc::new(ClientKeyRegistry::new());
//!     let codec = ResponseCodec::new(keystore, registry);
//!
//!     let envelope = codec.encrypt_response(None, &json!({"balance": 42}))?;
//!     let payload = codec.decrypt_response(&envelope)?;
//!     assert_eq!(payload["balance"], 42);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod encrypt;
pub mod envelope;
pub mod error;
pub mod keystore;
pub mod registry;
pub mod signature;
pub mod util;

pub use config::SecurityConfig;
pub use encrypt::{EncryptionEngine, Strategy};
pub use envelope::{EncryptedEnvelope, ResponseCodec};
pub use error::{Error, Result};
pub use keystore::{KeyStore, SecretKind};
pub use registry::ClientKeyRegistry;
pub use signature::{SignatureEngine, VerifyOutcome};

/// A collection of the most commonly used types.
pub mod prelude {
    pub use crate::config::SecurityConfig;
    pub use crate::encrypt::{EncryptionEngine, Strategy};
    pub use crate::envelope::{EncryptedEnvelope, ResponseCodec};
    pub use crate::error::{Error, Result};
    pub use crate::keystore::mirror::{KeyMirror, MemoryMirror};
    pub use crate::keystore::{KeyStore, SecretKind, SecretValidity};
    pub use crate::registry::ClientKeyRegistry;
    pub use crate::signature::{SecurityHeaders, SignatureEngine, VerifyOutcome};
}

/// Library version, taken from the crate manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
