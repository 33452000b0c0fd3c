//! Cluster credentials built from request secrets.
//!
//! The user key is written to a private key file that lives exactly as long
//! as the [`Credentials`] value; dropping it removes the file.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use zeroize::Zeroizing;

/// Secret key carrying the cluster user ID.
pub const USER_ID_KEY: &str = "userID";
/// Secret key carrying the cluster user key.
pub const USER_KEY_KEY: &str = "userKey";

const KEY_FILE_PREFIX: &str = "keyfile-";

/// Errors building credentials from secrets.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// No secrets were provided at all.
    #[error("provided secret is empty")]
    EmptySecrets,

    /// The ID field is missing.
    #[error("missing ID field '{field}' in secrets")]
    MissingId {
        /// Expected secret key.
        field: &'static str,
    },

    /// The key field is missing or empty.
    #[error("missing key field '{field}' in secrets")]
    MissingKey {
        /// Expected secret key.
        field: &'static str,
    },

    /// The key file could not be written.
    #[error("error creating a temporary keyfile: {0}")]
    KeyFile(#[from] std::io::Error),
}

/// Credentials for one request, scoped to its lifetime.
#[derive(Debug)]
pub struct Credentials {
    id: String,
    key_file: NamedTempFile,
}

impl Credentials {
    /// Builds user credentials from `userID`/`userKey` secrets.
    ///
    /// The key file is created in `key_dir`, or the system temp directory
    /// when unset.
    pub fn from_user_secrets(
        secrets: &HashMap<String, String>,
        key_dir: Option<&Path>,
    ) -> Result<Self, CredentialError> {
        if secrets.is_empty() {
            return Err(CredentialError::EmptySecrets);
        }
        let id = secrets
            .get(USER_ID_KEY)
            .ok_or(CredentialError::MissingId { field: USER_ID_KEY })?
            .clone();
        let key = Zeroizing::new(
            secrets
                .get(USER_KEY_KEY)
                .filter(|k| !k.is_empty())
                .ok_or(CredentialError::MissingKey {
                    field: USER_KEY_KEY,
                })?
                .clone(),
        );

        let mut builder = tempfile::Builder::new();
        builder.prefix(KEY_FILE_PREFIX);
        let mut key_file = match key_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        key_file.write_all(key.as_bytes())?;
        key_file.flush()?;

        Ok(Self { id, key_file })
    }

    /// Cluster user ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path of the key file; valid until `self` is dropped.
    pub fn key_file(&self) -> &Path {
        self.key_file.path()
    }

    /// Owned copy of the key file path.
    pub fn key_file_path(&self) -> PathBuf {
        self.key_file.path().to_path_buf()
    }
}
