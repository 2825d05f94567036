//! Plugin-facing logging (§4.7, observational only).
//!
//! `getInfrastructureLogger(name)` returns a [`Logger`] that first offers
//! each message to the `infrastructureLog` sync-bail hook; if no tap
//! consumes it, the message falls through to the process's `tracing`
//! subscriber.

use std::sync::Arc;

use kiln_error::{Error, Result};
use kiln_hook::SyncBailHook;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    Error,
    Warn,
    Info,
    Log,
    Debug,
    Trace,
}

pub type InfrastructureLogHook = SyncBailHook<(Arc<str>, LogType, Arc<str>), bool>;

/// A logger bound to a fixed origin name, backed by a shared
/// `infrastructureLog` hook. Child loggers concatenate their name with `/`.
#[derive(Clone)]
pub struct Logger {
    origin: Arc<str>,
    hook: Arc<InfrastructureLogHook>,
}

impl Logger {
    pub(crate) fn new(origin: impl Into<Arc<str>>, hook: Arc<InfrastructureLogHook>) -> Result<Self> {
        let origin = origin.into();
        if origin.is_empty() {
            return Err(Error::Argument("logger name must not be empty".into()));
        }
        Ok(Self { origin, hook })
    }

    /// A logger not wired to any compiler's `infrastructureLog` hook; every
    /// message falls straight through to `tracing`. Used for loggers handed
    /// out by a `Compilation` that was constructed without a compiler handle
    /// (e.g. in tests).
    pub fn standalone(origin: impl Into<Arc<str>>) -> Self {
        Self::new(origin, Arc::new(InfrastructureLogHook::new()))
            .expect("standalone loggers are only ever constructed with a fixed non-empty name")
    }

    pub fn child(&self, name: impl AsRef<str>) -> Result<Self> {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(Error::Argument("logger child name must not be empty".into()));
        }
        Logger::new(format!("{}/{name}", self.origin), self.hook.clone())
    }

    pub fn log(&self, level: LogType, message: impl AsRef<str>) {
        let message: Arc<str> = Arc::from(message.as_ref());
        if self
            .hook
            .call((self.origin.clone(), level, message.clone()))
            .unwrap_or(false)
        {
            return;
        }
        match level {
            LogType::Error => tracing::error!(origin = %self.origin, "{message}"),
            LogType::Warn => tracing::warn!(origin = %self.origin, "{message}"),
            LogType::Info => tracing::info!(origin = %self.origin, "{message}"),
            LogType::Log | LogType::Debug => tracing::debug!(origin = %self.origin, "{message}"),
            LogType::Trace => tracing::trace!(origin = %self.origin, "{message}"),
        }
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(LogType::Error, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(LogType::Warn, message);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(LogType::Info, message);
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(LogType::Debug, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_is_an_argument_error() {
        let hook = Arc::new(InfrastructureLogHook::new());
        let err = Logger::new("", hook).unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[test]
    fn child_name_concatenates_with_slash() {
        let hook = Arc::new(InfrastructureLogHook::new());
        let logger = Logger::new("compiler", hook).unwrap();
        let child = logger.child("emit").unwrap();
        assert_eq!(&*child.origin, "compiler/emit");
    }

    #[test]
    fn unconsumed_message_falls_through_without_panicking() {
        let hook = Arc::new(InfrastructureLogHook::new());
        let logger = Logger::new("compiler", hook).unwrap();
        logger.info("hello");
    }

    #[test]
    fn tap_that_returns_true_consumes_the_message() {
        let mut hook = InfrastructureLogHook::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        hook.tap("collector", move |(origin, _level, message)| {
            seen2.lock().unwrap().push((origin, message));
            Some(true)
        });
        let logger = Logger::new("compiler", Arc::new(hook)).unwrap();
        logger.warn("disk almost full");
        let captured = seen.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(&*captured[0].1, "disk almost full");
    }
}
