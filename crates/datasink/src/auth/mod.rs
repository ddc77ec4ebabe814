// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client authentication.

pub mod htpasswd;

pub use htpasswd::{HtpasswdError, HtpasswdStore};

use crate::config::AuthConfig;
use std::sync::Arc;
use thiserror::Error;

/// Credential backend.
///
/// `verify` must be deterministic and free of side effects: the same pair
/// always yields the same answer.
pub trait CredentialStore: Send + Sync {
    fn verify(&self, user: &str, pass: &str) -> bool;
}

/// Errors raised while opening a credential store.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("htpasswd: {0}")]
    Htpasswd(#[from] HtpasswdError),
}

/// Open the credential store selected in the configuration.
pub fn new_store(config: &AuthConfig) -> Result<Arc<dyn CredentialStore>, AuthError> {
    match config {
        AuthConfig::Htpasswd { file } => {
            let store = HtpasswdStore::from_file(file)?;
            tracing::info!(
                "Loaded {} htpasswd entries from {}",
                store.len(),
                file.display()
            );
            Ok(Arc::new(store))
        }
    }
}
