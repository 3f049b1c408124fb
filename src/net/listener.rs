//! Acceptor: the single-threaded reactor's accept loop.
//!
//! # Responsibilities
//! - Bind the wildcard address of the configured family
//! - Accept connections and turn each into a blocking [`Session`]
//! - Hand sessions to a sink without ever blocking on it
//! - Keep accepting after transient accept errors

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};

use crate::lifecycle::reactor::StopSignal;
use crate::net::session::Session;
use crate::observability::metrics;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The wildcard address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// One accept call failed; the loop keeps going.
    #[error("failed to accept: {0}")]
    Accept(#[source] io::Error),
}

/// Wildcard address for the chosen family.
pub fn bind_address(ipv6: bool, port: u16) -> SocketAddr {
    if ipv6 {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, port))
    } else {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))
    }
}

/// Accepts connections on behalf of one port run.
pub struct Acceptor {
    inner: TcpListener,
    segment_size: usize,
}

impl Acceptor {
    /// Bind to the wildcard address. Must be called inside the reactor runtime.
    pub async fn bind(ipv6: bool, port: u16, segment_size: usize) -> Result<Self, ListenerError> {
        let addr = bind_address(ipv6, port);
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind { addr, source })?;

        tracing::info!(address = %addr, ipv6, "Listener bound");
        Ok(Self {
            inner,
            segment_size,
        })
    }

    /// Bound address; carries the real port when bound to port 0.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    /// Accept one connection as a session.
    pub async fn accept(&self) -> Result<Session, ListenerError> {
        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        let session = self.make_session(stream).map_err(ListenerError::Accept)?;
        tracing::debug!(connection_id = %session.id(), peer = %peer, "Connection accepted");
        Ok(session)
    }

    /// Accept until `stop` fires, passing every session to `sink`.
    pub async fn run_accept<F>(&self, sink: F, stop: StopSignal)
    where
        F: FnMut(Session),
    {
        let acceptor = self;
        accept_loop(move || acceptor.accept(), sink, stop).await;
    }

    /// Detach the socket from the reactor; the worker writes to it blocking.
    fn make_session(&self, stream: TcpStream) -> io::Result<Session> {
        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;
        Ok(Session::new(stream, self.segment_size))
    }
}

/// Drive `accept` until `stop` fires; a pending stop wins over a ready accept.
/// Failed accepts are logged and skipped.
async fn accept_loop<S, A, Fut, F>(mut accept: A, mut sink: F, mut stop: StopSignal)
where
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<Session<S>, ListenerError>>,
    F: FnMut(Session<S>),
{
    loop {
        tokio::select! {
            biased;
            _ = stop.stopped() => {
                tracing::debug!("Accept loop stopped");
                break;
            }
            accepted = accept() => match accepted {
                Ok(session) => {
                    metrics::record_accepted();
                    sink(session);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed, continuing");
                    metrics::record_accept_error();
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::reactor::ReactorHandle;
    use crate::net::testing::RecordingStream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn wildcard_addresses_per_family() {
        assert_eq!(bind_address(false, 6556).to_string(), "0.0.0.0:6556");
        assert_eq!(bind_address(true, 6556).to_string(), "[::]:6556");
    }

    #[tokio::test]
    async fn accepted_connection_reaches_sink() {
        let acceptor = Acceptor::bind(false, 0, 128).await.unwrap();
        let port = acceptor.local_addr().unwrap().port();
        let (handle, signal) = ReactorHandle::pair();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink_received = Arc::clone(&received);
        let stopper = handle.clone();
        let sink = move |session: Session| {
            sink_received.lock().unwrap().push(session.segment_size());
            stopper.stop();
        };

        let client = tokio::spawn(async move {
            tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap()
        });
        tokio::time::timeout(Duration::from_secs(5), acceptor.run_accept(sink, signal))
            .await
            .unwrap();
        client.await.unwrap();

        assert_eq!(*received.lock().unwrap(), vec![128]);
    }

    #[tokio::test]
    async fn failed_accept_does_not_end_the_loop() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let accept = move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(ListenerError::Accept(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "aborted before accept",
                    )))
                } else {
                    Ok(Session::new(RecordingStream::default(), 32))
                }
            }
        };

        let (handle, signal) = ReactorHandle::pair();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink_received = Arc::clone(&received);
        let sink = move |session: Session<RecordingStream>| {
            sink_received.lock().unwrap().push(session.segment_size());
            handle.stop();
        };

        tokio::time::timeout(Duration::from_secs(5), accept_loop(accept, sink, signal))
            .await
            .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(*received.lock().unwrap(), vec![32]);
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let first = Acceptor::bind(false, 0, 16).await.unwrap();
        let port = first.local_addr().unwrap().port();
        let err = Acceptor::bind(false, port, 16).await.err().unwrap();
        assert!(matches!(err, ListenerError::Bind { .. }));
    }
}
