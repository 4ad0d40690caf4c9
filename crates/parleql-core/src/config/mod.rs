//! Configuration: environment-backed settings, TOML config files and
//! secret resolution.
//!
//! Config values may reference secrets with `${env:NAME}` or
//! `${provider-id:key}`; resolution happens at load time so the rest of
//! the engine only ever sees resolved values (and strips them again on the
//! way out).

mod files;
mod secrets;
mod settings;

pub use files::{
    ConnectionConfig, DatasourceConfig, DatasourcesFile, LlmFile, PoliciesFile, SecretProviderConfig,
    SecretsFile,
};
pub use secrets::{EnvSecretProvider, FileSecretProvider, SecretProvider, SecretResolver};
pub use settings::{ExporterKind, MismatchPolicy, Settings};
