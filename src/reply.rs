//! Reply contract invoked by the worker for each admitted session.
//!
//! Payload generation belongs to the caller; this module only defines the
//! seam and two small implementations: a fixed payload and the echo mode
//! used for protocol compatibility checks.

use std::fmt;
use std::net::TcpStream;
use std::sync::Arc;

use crate::net::session::{Session, SessionError, SessionStream};
use crate::security::encryption::Encryptor;

/// Produces the response for one session. Called synchronously on the worker thread.
pub trait Reply<S = TcpStream>: Send + Sync {
    fn reply(&self, session: &mut Session<S>) -> Result<(), SessionError>;
}

impl<S, F> Reply<S> for F
where
    F: Fn(&mut Session<S>) -> Result<(), SessionError> + Send + Sync,
{
    fn reply(&self, session: &mut Session<S>) -> Result<(), SessionError> {
        self(session)
    }
}

/// Builds a fresh encryption engine for each reply.
pub type EncryptorFactory = Arc<dyn Fn() -> Box<dyn Encryptor> + Send + Sync>;

/// Serves the same bytes to every peer, optionally encrypted.
#[derive(Clone)]
pub struct StaticReply {
    payload: Arc<[u8]>,
    encryptor: Option<EncryptorFactory>,
}

impl StaticReply {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into().into(),
            encryptor: None,
        }
    }

    pub fn with_encryptor(mut self, factory: EncryptorFactory) -> Self {
        self.encryptor = Some(factory);
        self
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Debug for StaticReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticReply")
            .field("len", &self.payload.len())
            .field("encrypted", &self.encryptor.is_some())
            .finish()
    }
}

impl<S: SessionStream> Reply<S> for StaticReply {
    fn reply(&self, session: &mut Session<S>) -> Result<(), SessionError> {
        let written = match &self.encryptor {
            Some(factory) => {
                let mut engine = factory();
                session.write(&self.payload, Some(engine.as_mut()))?
            }
            None => session.write(&self.payload, None)?,
        };
        tracing::debug!(connection_id = %session.id(), bytes = written, "Reply sent");
        Ok(())
    }
}

/// Echo mode: read the request and answer with the canned acknowledgement.
pub fn echo<S: SessionStream>(session: &mut Session<S>) -> Result<(), SessionError> {
    session.acknowledge().map(|_| ())
}
