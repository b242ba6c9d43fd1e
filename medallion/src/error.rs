//! Error types and result definitions for medallion operations.
//!
//! [`MedallionError`] carries a [`ErrorKind`], a static description, optional dynamic detail and
//! source, plus the callsite location and a captured backtrace. Several errors can be aggregated
//! into one value, which the worker pool uses when more than one table task fails to join.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

use medallion_config::shared::{TableDefinitionError, ValidationError};

/// Result alias used by every fallible medallion operation.
pub type MedallionResult<T> = Result<T, MedallionError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type of the medallion crate.
#[derive(Debug, Clone)]
pub struct MedallionError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Aggregated errors, for example from several failed table tasks.
    Many {
        errors: Vec<MedallionError>,
        location: &'static Location<'static>,
    },
}

/// Categories of failures raised by the pipeline.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Definition errors
    InvalidTableDefinition,
    ConfigError,

    // Hashing errors
    UnknownColumn,
    NoHashableColumns,
    ColumnAlreadyExists,
    HashValidationFailed,

    // Source errors
    SourcePathMissing,
    SourceIoError,
    UnsupportedFileFormat,

    // Storage errors
    TableNotFound,
    CorruptTable,
    SchemaMismatch,
    MergeFailed,
    StorageIoError,

    // Data & conversion errors
    ConversionError,
    InvalidData,

    // IO & serialization errors
    IoError,
    SerializationError,
    DeserializationError,

    // Worker errors
    TableWorkerPanic,

    Unknown,

    // Error kinds raised by failpoints in tests.
    #[cfg(feature = "failpoints")]
    InjectedFailure,
}

impl MedallionError {
    /// Returns the [`ErrorKind`] of this error, or of the first aggregated error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the static description.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { .. } => "Multiple errors occurred",
        }
    }

    /// Returns the dynamic detail, or the first detail of an aggregate.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns `description: detail` without location or backtrace.
    ///
    /// This is the text stored in result records and fed to error classification.
    pub fn message(&self) -> String {
        match &self.repr {
            ErrorRepr::Single(payload) => match payload.detail.as_deref() {
                Some(detail) if !detail.trim().is_empty() => {
                    format!("{}: {detail}", payload.description)
                }
                _ => payload.description.to_string(),
            },
            ErrorRepr::Many { errors, .. } => errors
                .iter()
                .map(MedallionError::message)
                .collect::<Vec<_>>()
                .join("; "),
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating error. Aggregates are left unchanged.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        MedallionError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for MedallionError {
    fn eq(&self, other: &MedallionError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => {
                a.kind == b.kind && a.description == b.description
            }
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Hash for MedallionError {
    /// Hashes kind and description only so repeated failures group together.
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.repr).hash(state);
        match &self.repr {
            ErrorRepr::Single(payload) => {
                payload.kind.hash(state);
                payload.description.hash(state);
            }
            ErrorRepr::Many { errors, .. } => {
                errors.len().hash(state);
                for error in errors {
                    error.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for MedallionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f)?;
                write_backtrace(payload.backtrace.as_ref(), f)
            }
            ErrorRepr::Many { errors, location } => {
                write!(
                    f,
                    "[Many] {} error(s) aggregated @ {}:{}:{}",
                    errors.len(),
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for MedallionError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

fn write_backtrace(backtrace: &Backtrace, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let rendered = backtrace.to_string();
    if rendered.trim().is_empty() {
        return Ok(());
    }

    write!(f, "\n  Backtrace:")?;
    for line in rendered.lines() {
        write!(f, "\n    {line}")?;
    }

    Ok(())
}

fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let Some(detail) = detail else {
        return Ok(());
    };

    if detail.trim().is_empty() {
        return write!(f, "\n  Detail: <empty>");
    }

    write!(f, "\n  Detail:")?;
    for line in detail.lines() {
        write!(f, "\n    {line}")?;
    }

    Ok(())
}

impl From<(ErrorKind, &'static str)> for MedallionError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> MedallionError {
        MedallionError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for MedallionError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> MedallionError {
        MedallionError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned unwrapped.
impl<E> From<Vec<E>> for MedallionError
where
    E: Into<MedallionError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> MedallionError {
        let location = Location::caller();
        let mut errors: Vec<MedallionError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }

        MedallionError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Builds a conversion that keeps the source error and its message as detail.
macro_rules! impl_from_source {
    ($source:ty, $kind:expr, $desc:expr) => {
        impl From<$source> for MedallionError {
            #[track_caller]
            fn from(err: $source) -> MedallionError {
                let detail = err.to_string();
                MedallionError::from_components(
                    $kind,
                    Cow::Borrowed($desc),
                    Some(Cow::Owned(detail)),
                    Some(Arc::new(err)),
                )
            }
        }
    };
}

impl_from_source!(std::io::Error, ErrorKind::IoError, "I/O operation failed");
impl_from_source!(
    std::num::ParseIntError,
    ErrorKind::ConversionError,
    "Integer parsing failed"
);
impl_from_source!(
    chrono::ParseError,
    ErrorKind::ConversionError,
    "Timestamp parsing failed"
);
impl_from_source!(uuid::Error, ErrorKind::InvalidData, "UUID parsing failed");
impl_from_source!(
    ValidationError,
    ErrorKind::ConfigError,
    "Configuration validation failed"
);
impl_from_source!(
    TableDefinitionError,
    ErrorKind::InvalidTableDefinition,
    "Invalid table definition"
);

#[cfg(feature = "parquet")]
impl_from_source!(
    parquet::errors::ParquetError,
    ErrorKind::SourceIoError,
    "Parquet read failed"
);

/// Maps JSON failures by category so syntax problems and I/O problems stay distinct.
impl From<serde_json::Error> for MedallionError {
    #[track_caller]
    fn from(err: serde_json::Error) -> MedallionError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => (ErrorKind::IoError, "JSON I/O operation failed"),
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        MedallionError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
