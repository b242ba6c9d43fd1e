use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use medallion::error::MedallionError;
use medallion::types::Layer;

fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

pub type RunnerResult<T> = Result<T, RunnerError>;

/// Backtrace captured when a runner error is created.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type of the runner binary.
///
/// Pipeline errors are wrapped as [`RunnerError::Medallion`]. A run whose tables failed ends
/// in [`RunnerError::TablesFailed`] so the process exits with a non-zero status.
#[derive(Debug)]
pub enum RunnerError {
    Medallion(MedallionError),
    /// Configuration or DAG error.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    Io(std::io::Error, CapturedBacktrace),
    /// At least one table of a layer ended as failed.
    TablesFailed { layer: Layer, tables: Vec<String> },
}

impl RunnerError {
    /// Short category label used in the terminal report.
    pub fn category(&self) -> &'static str {
        match self {
            RunnerError::Medallion(_) => "pipeline error",
            RunnerError::Config(_, _) => "configuration error",
            RunnerError::Io(_, _) => "i/o error",
            RunnerError::TablesFailed { .. } => "table failures",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            RunnerError::Medallion(err) => err.backtrace(),
            RunnerError::Config(_, captured) => Some(&captured.0),
            RunnerError::Io(_, captured) => Some(&captured.0),
            RunnerError::TablesFailed { .. } => None,
        }
    }

    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        RunnerError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Renders the error with its cause chain for terminal output.
    ///
    /// The backtrace is appended when `RUST_BACKTRACE` is `1` or `full`.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("medallion run failed\n");
        out.push_str(&format!("category: {}\n", self.category()));
        out.push_str(&format!("error: {self}\n"));

        let mut source = Error::source(self);
        let mut index = 1usize;
        while let Some(err) = source {
            out.push_str(&format!("cause {index}: {err}\n"));
            source = err.source();
            index += 1;
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::Medallion(err) => write!(f, "{}", err.message()),
            RunnerError::Config(source, _) => write!(f, "configuration error: {source}"),
            RunnerError::Io(source, _) => write!(f, "i/o error: {source}"),
            RunnerError::TablesFailed { layer, tables } => write!(
                f,
                "{} {layer} table(s) failed: {}",
                tables.len(),
                tables.join(", ")
            ),
        }
    }
}

impl Error for RunnerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RunnerError::Medallion(err) => err.source(),
            RunnerError::Config(source, _) => Some(source.as_ref()),
            RunnerError::Io(source, _) => Some(source),
            RunnerError::TablesFailed { .. } => None,
        }
    }
}

impl From<std::io::Error> for RunnerError {
    fn from(err: std::io::Error) -> Self {
        RunnerError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<MedallionError> for RunnerError {
    fn from(err: MedallionError) -> Self {
        RunnerError::Medallion(err)
    }
}
