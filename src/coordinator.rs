//! One formatting attempt per save.
//!
//! [`FormatCoordinator::format`] walks an attempt through
//! `TokenAcquired → Staged → Invoked → {Committed | Stale | Rejected | Failed}`
//! and always ends by removing the staged copy. Nothing is returned as an error:
//! every outcome is reported through `log` before `format` returns, and the
//! returned [`FormatOutcome`] exists so callers can summarise runs.

use std::sync::Arc;

use crate::editor::EditorSink;
use crate::formatter::{ExitStatus, FormatterClient, FormatterError};
use crate::staging::{StagingArea, StagingError};
use crate::token_registry::{Token, TokenRegistry};

/// Why an attempt ended without touching the document.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("Formatter failed for {resource} with exit code {status}")]
    FormatterFailed { resource: String, status: ExitStatus },

    #[error("Formatter could not run for {resource}: {source}")]
    Invocation {
        resource: String,
        #[source]
        source: FormatterError,
    },

    #[error(transparent)]
    Staging(#[from] StagingError),
}

/// Terminal state of one attempt.
#[derive(Debug)]
pub enum FormatOutcome {
    /// The formatted text was applied to the document.
    Committed,
    /// A newer save superseded this attempt; its result was dropped.
    Stale,
    /// Still current, but the sink refused it: the document context moved
    /// elsewhere or the target changed underneath the attempt.
    Rejected,
    /// Staging or the formatter failed; the document was not touched.
    Failed(AttemptError),
}

impl FormatOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Runs formatting attempts against a shared [`TokenRegistry`].
///
/// The registry lock is only taken to acquire a token and to commit; the
/// formatter runs without it, so attempts for the same or different resources
/// proceed in parallel and only the newest one per resource may commit.
pub struct FormatCoordinator<F, S> {
    registry: Arc<TokenRegistry>,
    formatter: F,
    sink: S,
    staging: StagingArea,
}

impl<F, S> FormatCoordinator<F, S>
where
    F: FormatterClient,
    S: EditorSink,
{
    pub fn new(formatter: F, sink: S) -> Self {
        Self::with_registry(Arc::new(TokenRegistry::new()), formatter, sink)
    }

    /// Share `registry` with other components that need to supersede in-flight attempts.
    pub fn with_registry(registry: Arc<TokenRegistry>, formatter: F, sink: S) -> Self {
        Self {
            registry,
            formatter,
            sink,
            staging: StagingArea::default(),
        }
    }

    pub fn with_staging(mut self, staging: StagingArea) -> Self {
        self.staging = staging;
        self
    }

    pub fn registry(&self) -> &Arc<TokenRegistry> {
        &self.registry
    }

    pub fn formatter(&self) -> &F {
        &self.formatter
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Format `content` as the newest save of `resource_id` and commit the result
    /// if no newer save has been registered by the time the formatter finishes.
    pub fn format(&self, resource_id: &str, content: &str) -> FormatOutcome {
        let token = self.registry.acquire(resource_id);
        self.format_acquired(token, content)
    }

    /// Continue an attempt whose token the caller already took from [`registry`](Self::registry).
    ///
    /// Event loops that hand work to other threads acquire the token on the event
    /// thread, so versions follow save order rather than thread scheduling order.
    pub fn format_acquired(&self, token: Token, content: &str) -> FormatOutcome {
        let outcome = self.attempt(&token, content).unwrap_or_else(FormatOutcome::Failed);
        self.report(&token, &outcome);
        outcome
    }

    fn attempt(&self, token: &Token, content: &str) -> Result<FormatOutcome, AttemptError> {
        let resource = token.resource_id();
        self.sink.attempt_started(token, content);

        // Dropping `staged` removes the working copy on every path out of here
        let staged = self.staging.stage(resource, token.version(), content)?;
        log::trace!("{resource} v{}: staged at {}", token.version(), staged.path().display());

        let status = self
            .formatter
            .run(staged.path())
            .map_err(|source| AttemptError::Invocation {
                resource: resource.to_string(),
                source,
            })?;
        log::trace!("{resource} v{}: formatter exited with {status}", token.version());

        if !status.success() {
            return Err(AttemptError::FormatterFailed {
                resource: resource.to_string(),
                status,
            });
        }

        let formatted = staged.read()?;

        let mut applied = false;
        let current = self
            .registry
            .run_if_current(token, || applied = self.sink.apply(resource, &formatted));

        Ok(match (current, applied) {
            (false, _) => FormatOutcome::Stale,
            (true, true) => FormatOutcome::Committed,
            (true, false) => FormatOutcome::Rejected,
        })
    }

    fn report(&self, token: &Token, outcome: &FormatOutcome) {
        let resource = token.resource_id();
        let version = token.version();

        match outcome {
            FormatOutcome::Committed => log::debug!("Formatted {resource} (v{version})"),
            FormatOutcome::Stale => {
                let newest = self.registry.current_version(resource).unwrap_or(version);
                log::warn!("Discarding stale format result for {resource} (v{version}, superseded by v{newest})");
            }
            FormatOutcome::Rejected => {
                log::warn!("{resource} is no longer the document v{version} formatted; result dropped")
            }
            FormatOutcome::Failed(e) => log::error!("{e}"),
        }
    }
}
