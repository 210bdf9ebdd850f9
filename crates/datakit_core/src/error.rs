//! Error taxonomy and reporting hooks for the data-access core.
//!
//! # Responsibility
//! - Classify failures into configuration, tracking, persistence and
//!   unexpected errors.
//! - Provide the reporting collaborator used for tolerated failures.
//! - Format nested error chains for transaction results.
//!
//! # Invariants
//! - Mapping and tracking failures are reported, never used to abort a scan.
//! - Commit-time failures are converted into `TransactionResult` values by the
//!   unit of work and never reach callers as `Err`.

use crate::db::DbError;
use log::error;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type DataResult<T> = Result<T, DataError>;

/// Boxed cause carried by persistence and unexpected errors.
pub type ErrorSource = Box<dyn Error + Send + Sync + 'static>;

/// Schema configuration failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Entity type has no mapping in the schema model.
    MissingMapping { entity: String },
    /// Descriptor factory failed to produce an instance.
    DescriptorInstantiation { descriptor: String, message: String },
    /// Descriptor `configure` returned an error.
    DescriptorConfiguration {
        descriptor: String,
        entity: String,
        message: String,
    },
    /// Accumulated entity configuration failed validation.
    InvalidMapping { entity: String, message: String },
    /// Base schema step failed before any per-entity mapping ran.
    BaseSchema(String),
}

impl Display for ConfigurationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingMapping { entity } => {
                write!(f, "entity type `{entity}` has no schema mapping")
            }
            Self::DescriptorInstantiation {
                descriptor,
                message,
            } => write!(
                f,
                "mapping descriptor `{descriptor}` could not be instantiated: {message}"
            ),
            Self::DescriptorConfiguration {
                descriptor,
                entity,
                message,
            } => write!(
                f,
                "mapping descriptor `{descriptor}` failed to configure `{entity}`: {message}"
            ),
            Self::InvalidMapping { entity, message } => {
                write!(f, "invalid mapping for `{entity}`: {message}")
            }
            Self::BaseSchema(message) => write!(f, "base schema configuration failed: {message}"),
        }
    }
}

impl Error for ConfigurationError {}

/// Error type for every data-access operation.
#[derive(Debug)]
pub enum DataError {
    Configuration(ConfigurationError),
    /// Tracking mode changed before the schema model exists.
    TrackingState(String),
    /// Constraint violation or update that touched no row.
    Persistence {
        message: String,
        source: ErrorSource,
    },
    Unexpected {
        message: String,
        source: Option<ErrorSource>,
    },
    /// Key values do not match the entity's key shape.
    KeyShape {
        entity: String,
        expected: usize,
        actual: usize,
    },
    InvalidOperation(String),
    Db(DbError),
}

impl DataError {
    pub fn missing_mapping(entity: impl Into<String>) -> Self {
        Self::Configuration(ConfigurationError::MissingMapping {
            entity: entity.into(),
        })
    }

    /// Returns whether this error belongs to the persistence class
    /// (rolled back under the persistence-failure message template).
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence { .. })
    }
}

impl Display for DataError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration(err) => write!(f, "{err}"),
            Self::TrackingState(message) => write!(f, "invalid tracking state: {message}"),
            Self::Persistence { message, .. } => write!(f, "{message}"),
            Self::Unexpected { message, .. } => write!(f, "{message}"),
            Self::KeyShape {
                entity,
                expected,
                actual,
            } => write!(
                f,
                "entity `{entity}` has a key of {expected} value(s), got {actual}"
            ),
            Self::InvalidOperation(message) => write!(f, "invalid operation: {message}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Configuration(err) => Some(err),
            Self::Persistence { source, .. } => Some(&**source),
            Self::Unexpected { source, .. } => source
                .as_deref()
                .map(|inner| inner as &(dyn Error + 'static)),
            Self::Db(err) => Some(err),
            Self::TrackingState(_) => None,
            Self::KeyShape { .. } => None,
            Self::InvalidOperation(_) => None,
        }
    }
}

impl From<ConfigurationError> for DataError {
    fn from(value: ConfigurationError) -> Self {
        Self::Configuration(value)
    }
}

impl From<DbError> for DataError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for DataError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Joins the message of `err` and of every nested `source()` with newlines.
///
/// Adjacent duplicate messages (wrappers that display their inner error
/// verbatim) are collapsed.
pub fn format_error_chain(err: &(dyn Error + 'static)) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current = Some(err);
    while let Some(inner) = current {
        let message = inner.to_string();
        if lines.last() != Some(&message) {
            lines.push(message);
        }
        current = inner.source();
    }
    lines.join("\n")
}

/// Collaborator notified about tolerated failures.
///
/// Implementations must not panic. Default methods emit structured error log
/// entries and nothing else: a descriptor or validation failure is never
/// raised to the caller, it only shows up in the log and in
/// `SchemaModel::failures()`. Override `on_mapping_error` to escalate it, for
/// example by recording failures and refusing to start. Base-schema failures
/// are returned from the model build regardless of the reporter.
pub trait ErrorReporter: Send + Sync {
    /// Called for every descriptor, validation or base-schema failure.
    fn on_mapping_error(&self, err: &DataError) {
        error!(
            "event=mapping_error module=schema status=error error={}",
            single_line(err)
        );
    }

    /// Called for session-level failures such as tracking-state errors.
    fn on_session_error(&self, err: &DataError) {
        error!(
            "event=session_error module=session status=error error={}",
            single_line(err)
        );
    }
}

/// Reporter that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {}

pub(crate) fn single_line(err: &(dyn Error + 'static)) -> String {
    format_error_chain(err).replace(['\n', '\r'], " | ")
}
