use core::error::Error;

use crate::domain::manifest::ChildKind;
use crate::domain::sync::ChildOp;

/// Errors returned by the cluster store.
///
/// The `Display` output starts with the symbolic error class so it reads
/// well inside a status condition message.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum StoreError {
    #[display("AlreadyExists: {kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },
    #[display("NotFound: {kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },
    #[display("TransportFailure: {message}")]
    Failure { message: String },
}

impl Error for StoreError {}

impl StoreError {
    pub fn reason(&self) -> &'static str {
        match self {
            StoreError::AlreadyExists { .. } => "AlreadyExists",
            StoreError::NotFound { .. } => "NotFound",
            StoreError::Failure { .. } => "TransportFailure",
        }
    }
}

/// Errors raised while loading or instantiating manifest templates.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum TemplateError {
    #[display("template {file} could not be loaded: {message}")]
    Missing { file: String, message: String },
    #[display("template {file} is not valid YAML: {message}")]
    InvalidYaml { file: String, message: String },
    #[display("unresolved placeholder {{{placeholder}}} in template {file}")]
    UnresolvedPlaceholder { file: String, placeholder: String },
    #[display("template {file} does not describe a valid {kind}: {message}")]
    Malformed {
        file: String,
        kind: ChildKind,
        message: String,
    },
}

impl Error for TemplateError {}

/// Failure of a single reconciliation pass, as recorded in the status.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ReconcileError {
    #[display("invalid WorkerPool spec: {message}")]
    InvalidSpec { message: String },
    #[display("failed to render {kind}: {error}")]
    Template { kind: ChildKind, error: TemplateError },
    #[display("failed to {op} {kind}: {error}")]
    Store {
        kind: ChildKind,
        op: ChildOp,
        error: StoreError,
    },
}

impl Error for ReconcileError {}

impl ReconcileError {
    /// Symbolic reason written to the Error condition.
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::InvalidSpec { .. } => "InvalidSpec",
            ReconcileError::Template { .. } => "TemplateError",
            ReconcileError::Store { error, .. } => error.reason(),
        }
    }

    /// Child the failure is attributed to, if any.
    pub fn kind(&self) -> Option<ChildKind> {
        match self {
            ReconcileError::InvalidSpec { .. } => None,
            ReconcileError::Template { kind, .. } | ReconcileError::Store { kind, .. } => Some(*kind),
        }
    }
}
