use log::error;

use super::errors::DataLayerError;

/// What to do when an established connection errors, closes or times out.
///
/// Any `Fn(DataLayerError) + Send + Sync` closure is a policy, so a recoverable
/// handler can be as small as `|e| log::warn!("{e}")`.
pub trait FailurePolicy: Send + Sync {
    fn on_failure(&self, error: DataLayerError);
}

impl<F> FailurePolicy for F
where
    F: Fn(DataLayerError) + Send + Sync,
{
    fn on_failure(&self, error: DataLayerError) {
        self(error)
    }
}

/// The default policy: a lost connection is unrecoverable, so log it and
/// terminate the process with the error kind's code as exit status.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailFast;

impl FailurePolicy for FailFast {
    fn on_failure(&self, error: DataLayerError) {
        let code = error.kind().map_or(1, |kind| kind.code());
        error!("{error}. Terminating with status {code}.");
        std::process::exit(code);
    }
}
