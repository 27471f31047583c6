// Copyright 2024-2026 MSG-SOURCE Contributors
// Licensed under the Apache License, Version 2.0

//! Credential alias resolution.
//!
//! Aliases are resolved immediately before every connection is created and
//! the result is never cached, so rotating the secret behind an alias takes
//! effect on the next connection.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;

pub use crate::provider::Credentials;

/// Env var prefix for [`EnvCredentialResolver`].
pub const AUTH_ENV_PREFIX: &str = "MSG_SOURCE_AUTH_";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Unknown credential alias: {0}")]
    UnknownAlias(String),

    #[error("Alias {alias} has no {field}")]
    Incomplete { alias: String, field: &'static str },
}

/// Maps an alias to a username/password pair.
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, alias: &str) -> Result<Credentials, CredentialError>;
}

/// Reads `MSG_SOURCE_AUTH_<ALIAS>_USERNAME` and `_PASSWORD`.
///
/// The alias is upper-cased and non-alphanumerics become `_`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentialResolver;

impl EnvCredentialResolver {
    fn var_name(alias: &str, field: &str) -> String {
        let normalized: String = alias
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}{}_{}", AUTH_ENV_PREFIX, normalized, field)
    }
}

impl CredentialResolver for EnvCredentialResolver {
    fn resolve(&self, alias: &str) -> Result<Credentials, CredentialError> {
        let username = std::env::var(Self::var_name(alias, "USERNAME"))
            .map_err(|_| CredentialError::UnknownAlias(alias.to_string()))?;
        let password = std::env::var(Self::var_name(alias, "PASSWORD")).map_err(|_| {
            CredentialError::Incomplete {
                alias: alias.to_string(),
                field: "password",
            }
        })?;
        Ok(Credentials { username, password })
    }
}

/// In-memory alias table that can be rotated at runtime.
#[derive(Default)]
pub struct StaticCredentialResolver {
    entries: RwLock<HashMap<String, Credentials>>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the credentials behind `alias`.
    pub fn set(&self, alias: impl Into<String>, username: impl Into<String>, password: impl Into<String>) {
        self.entries.write().insert(
            alias.into(),
            Credentials {
                username: username.into(),
                password: password.into(),
            },
        );
    }

    pub fn remove(&self, alias: &str) {
        self.entries.write().remove(alias);
    }
}

impl CredentialResolver for StaticCredentialResolver {
    fn resolve(&self, alias: &str) -> Result<Credentials, CredentialError> {
        self.entries
            .read()
            .get(alias)
            .cloned()
            .ok_or_else(|| CredentialError::UnknownAlias(alias.to_string()))
    }
}
