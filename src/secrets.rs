//! Secret store collaborator consumed by the secret phase of template
//! resolution. Not implemented here — this is the boundary a concrete
//! secret store plugs into.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("secret resolution failed: {0}")]
pub struct SecretsError(pub String);

/// Resolves `{{SECRETS.NAME}}`-style placeholders inside a template string.
pub trait SecretsProvider: Send + Sync {
    fn resolve_template(&self, template: &str) -> Result<String, SecretsError>;
}
