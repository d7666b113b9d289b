//! Inbound method handler registry.
//!
//! A dispatch table from `(scope, method)` to the queue of the single
//! component handling it. Registering twice for the same pair is an error.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;

use super::methods::{ProtocolMethod, Scope};
use super::types::InboundRequest;
use crate::errors::PairkitError;
use crate::Result;

/// Why an inbound request could not be queued.
#[derive(Debug, PartialEq, Eq)]
pub enum DispatchError {
    NoHandler,
    Busy,
}

pub struct MethodRegistry {
    handlers: RwLock<HashMap<(Scope, ProtocolMethod), mpsc::Sender<InboundRequest>>>,
    capacity: usize,
}

impl MethodRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Claim a method and receive its inbound requests.
    ///
    /// # Errors
    /// `DuplicateHandler` if a live handler already owns the method. A
    /// handler whose receiver was dropped no longer counts.
    pub fn register(&self, method: ProtocolMethod) -> Result<mpsc::Receiver<InboundRequest>> {
        let key = (method.scope(), method);
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = handlers.get(&key) {
            if !existing.is_closed() {
                return Err(PairkitError::DuplicateHandler(method.to_string()));
            }
        }
        let (tx, rx) = mpsc::channel(self.capacity);
        handlers.insert(key, tx);
        Ok(rx)
    }

    pub fn unregister(&self, method: ProtocolMethod) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.remove(&(method.scope(), method)).is_some()
    }

    pub fn is_registered(&self, method: ProtocolMethod) -> bool {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers
            .get(&(method.scope(), method))
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Queue a request for its handler without waiting.
    pub fn dispatch(
        &self,
        method: ProtocolMethod,
        request: InboundRequest,
    ) -> std::result::Result<(), DispatchError> {
        let sender = {
            let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
            handlers.get(&(method.scope(), method)).cloned()
        };
        let sender = sender.ok_or(DispatchError::NoHandler)?;
        sender.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::Busy,
            mpsc::error::TrySendError::Closed(_) => DispatchError::NoHandler,
        })
    }
}
