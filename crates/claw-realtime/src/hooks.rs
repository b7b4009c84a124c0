//! Application lifecycle hooks.
//!
//! Hooks run inline on the connection reactor. A hook that returns an error
//! or panics is logged and otherwise ignored, so application code can never
//! corrupt connection state.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{error, warn};

use crate::close::Closure;
use crate::message::InboundMessage;

/// Error type returned by hooks.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by hooks.
pub type HookResult = Result<(), HookError>;

type OpenHook = Arc<dyn Fn() -> HookResult + Send + Sync>;
type MessageHook = Arc<dyn Fn(&InboundMessage) -> HookResult + Send + Sync>;
type CloseHook = Arc<dyn Fn(&Closure) -> HookResult + Send + Sync>;

/// Optional `onopen`, `onmessage`, and `onclose` callbacks.
#[derive(Clone, Default)]
pub struct Hooks {
    on_open: Option<OpenHook>,
    on_message: Option<MessageHook>,
    on_close: Option<CloseHook>,
}

impl Hooks {
    /// Create an empty hook set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after every successful open.
    #[must_use]
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn() -> HookResult + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(f));
        self
    }

    /// Called for every application message, after it is published.
    #[must_use]
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&InboundMessage) -> HookResult + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Called for every closure of an open connection, before it is classified.
    #[must_use]
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&Closure) -> HookResult + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(f));
        self
    }

    pub(crate) fn opened(&self) {
        if let Some(hook) = &self.on_open {
            invoke("onopen", || hook());
        }
    }

    pub(crate) fn message(&self, message: &InboundMessage) {
        if let Some(hook) = &self.on_message {
            invoke("onmessage", || hook(message));
        }
    }

    pub(crate) fn closed(&self, closure: &Closure) {
        if let Some(hook) = &self.on_close {
            invoke("onclose", || hook(closure));
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_open", &self.on_open.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

fn invoke(name: &'static str, f: impl FnOnce() -> HookResult) {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(hook = name, error = %e, "hook returned an error"),
        Err(_) => error!(hook = name, "hook panicked"),
    }
}
