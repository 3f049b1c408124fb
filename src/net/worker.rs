//! The single worker that drains the session queue.
//!
//! # Responsibilities
//! - Pop sessions in arrival order
//! - Resolve the peer address and apply the allow-list
//! - Run the reply for admitted sessions, then close them
//! - Survive failing or panicking replies
//!
//! Shutdown is cooperative: the loop re-checks its flag after every wait,
//! so it stops within one wake delay plus one in-flight reply.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::net::queue::SessionQueue;
use crate::net::session::{Session, SessionStream};
use crate::observability::metrics;
use crate::reply::Reply;
use crate::security::access_control::AddressFilter;

/// Worker loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Created, loop not entered yet.
    Idle,
    /// Handling one dequeued session.
    Dispatching,
    /// Sleeping on the queue for at most the wake delay.
    WaitingOnQueue,
    /// Shutdown flag observed; the loop has exited.
    Terminating,
}

/// Drains a [`SessionQueue`] on its own thread.
pub struct Worker<S> {
    queue: Arc<SessionQueue<Session<S>>>,
    filter: Arc<dyn AddressFilter>,
    reply: Arc<dyn Reply<S>>,
    shutdown: Arc<AtomicBool>,
    wake_delay: Duration,
    state: WorkerState,
}

impl<S: SessionStream> Worker<S> {
    /// `wake_delay` bounds how long a shutdown request can go unnoticed.
    pub fn new(
        queue: Arc<SessionQueue<Session<S>>>,
        filter: Arc<dyn AddressFilter>,
        reply: Arc<dyn Reply<S>>,
        shutdown: Arc<AtomicBool>,
        wake_delay: Duration,
    ) -> Self {
        Self {
            queue,
            filter,
            reply,
            shutdown,
            wake_delay,
            state: WorkerState::Idle,
        }
    }

    /// Current position in the loop.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Process the queue until the shutdown flag is observed.
    pub fn run(&mut self) {
        tracing::debug!(wake_delay = ?self.wake_delay, "Worker started");
        loop {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.step())) {
                tracing::error!(
                    panic = panic_message(&*payload),
                    "Unexpected panic while processing queue"
                );
            }

            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
        }
        self.state = WorkerState::Terminating;
        tracing::info!("Exiting process queue");
    }

    /// One iteration: dispatch at most one session, then wait for more.
    fn step(&mut self) {
        if let Some(session) = self.queue.pop() {
            metrics::record_queue_depth(self.queue.len());
            self.state = WorkerState::Dispatching;
            self.dispatch(session);
        }

        self.state = WorkerState::WaitingOnQueue;
        self.queue.wait_for_item(self.wake_delay);
    }

    fn dispatch(&self, mut session: Session<S>) {
        let peer = match session.peer_info() {
            Ok(peer) => peer,
            Err(e) => {
                tracing::warn!(connection_id = %session.id(), error = %e, "Dropping session");
                return;
            }
        };
        tracing::debug!(
            connection_id = %session.id(),
            peer = %peer.ip,
            ipv6 = peer.ipv6,
            "Connected from peer <- queue"
        );

        if !self.filter.is_ip_address_allowed(&peer.ip) {
            tracing::debug!(
                connection_id = %session.id(),
                peer = %peer.ip,
                "Address is not allowed, dropping session"
            );
            metrics::record_rejected();
            return;
        }

        match self.reply.reply(&mut session) {
            Ok(()) => metrics::record_reply("ok"),
            Err(e) => {
                tracing::warn!(connection_id = %session.id(), peer = %peer.ip, error = %e, "Reply failed");
                metrics::record_reply("error");
            }
        }
        session.close();
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::session::SessionError;
    use crate::net::testing::RecordingStream;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Instant;

    const TICK: Duration = Duration::from_millis(20);

    type Queue = Arc<SessionQueue<Session<RecordingStream>>>;

    fn spawn_worker(
        filter: Arc<dyn AddressFilter>,
        reply: Arc<dyn Reply<RecordingStream>>,
    ) -> (Queue, Arc<AtomicBool>, thread::JoinHandle<WorkerState>) {
        let queue: Queue = Arc::new(SessionQueue::new(8));
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut worker = Worker::new(
            Arc::clone(&queue),
            filter,
            reply,
            Arc::clone(&shutdown),
            TICK,
        );
        assert_eq!(worker.state(), WorkerState::Idle);
        let handle = thread::spawn(move || {
            worker.run();
            worker.state()
        });
        (queue, shutdown, handle)
    }

    fn stop(shutdown: &AtomicBool, handle: thread::JoinHandle<WorkerState>) -> WorkerState {
        shutdown.store(true, Ordering::Release);
        handle.join().unwrap()
    }

    fn wait_until(cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn writing(payload: &'static [u8]) -> Arc<dyn Reply<RecordingStream>> {
        Arc::new(move |s: &mut Session<RecordingStream>| s.write(payload, None).map(|_| ()))
    }

    #[test]
    fn allowed_session_gets_reply_and_is_closed() {
        let (queue, shutdown, handle) = spawn_worker(Arc::new(|_: &str| true), writing(b"data"));
        let stream = RecordingStream::new();
        assert!(queue.push(Session::new(stream.clone(), 64)));

        wait_until(|| stream.is_closed());
        assert_eq!(stream.bytes(), b"data".to_vec());
        assert_eq!(stop(&shutdown, handle), WorkerState::Terminating);
    }

    #[test]
    fn rejected_peer_receives_nothing() {
        let (queue, shutdown, handle) = spawn_worker(
            Arc::new(|ip: &str| ip != "192.0.2.1"),
            writing(b"secret"),
        );
        let rejected = RecordingStream::new().with_peer("192.0.2.1:1000");
        let admitted = RecordingStream::new().with_peer("192.0.2.2:1000");
        queue.push(Session::new(rejected.clone(), 64));
        queue.push(Session::new(admitted.clone(), 64));

        wait_until(|| admitted.is_closed());
        assert!(rejected.writes().is_empty());
        assert_eq!(admitted.bytes(), b"secret".to_vec());
        stop(&shutdown, handle);
    }

    #[test]
    fn sessions_served_in_arrival_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&order);
        let reply: Arc<dyn Reply<RecordingStream>> =
            Arc::new(move |s: &mut Session<RecordingStream>| {
                seen.lock().unwrap().push(s.id());
                Ok::<(), SessionError>(())
            });
        let (queue, shutdown, handle) = spawn_worker(Arc::new(|_: &str| true), reply);

        let sessions: Vec<_> = (0..3)
            .map(|_| Session::new(RecordingStream::new(), 8))
            .collect();
        let ids: Vec<_> = sessions.iter().map(Session::id).collect();
        for s in sessions {
            queue.push(s);
        }

        wait_until(|| order.lock().unwrap().len() == 3);
        assert_eq!(*order.lock().unwrap(), ids);
        stop(&shutdown, handle);
    }

    #[test]
    fn panicking_reply_does_not_kill_worker() {
        let reply: Arc<dyn Reply<RecordingStream>> =
            Arc::new(|s: &mut Session<RecordingStream>| {
                if s.peer_info()?.ip == "192.0.2.9" {
                    panic!("reply blew up");
                }
                s.write(b"fine", None).map(|_| ())
            });
        let (queue, shutdown, handle) = spawn_worker(Arc::new(|_: &str| true), reply);

        queue.push(Session::new(RecordingStream::new().with_peer("192.0.2.9:1"), 8));
        let survivor = RecordingStream::new();
        queue.push(Session::new(survivor.clone(), 8));

        wait_until(|| survivor.is_closed());
        assert_eq!(survivor.bytes(), b"fine".to_vec());
        assert_eq!(stop(&shutdown, handle), WorkerState::Terminating);
    }

    #[test]
    fn failing_reply_and_unknown_peer_are_skipped() {
        let reply: Arc<dyn Reply<RecordingStream>> =
            Arc::new(|s: &mut Session<RecordingStream>| s.write(b"abc", None).map(|_| ()));
        let (queue, shutdown, handle) = spawn_worker(Arc::new(|_: &str| true), reply);

        let broken = RecordingStream::new().fail_after(0);
        let anonymous = RecordingStream::new().without_peer();
        let healthy = RecordingStream::new();
        queue.push(Session::new(broken.clone(), 8));
        queue.push(Session::new(anonymous.clone(), 8));
        queue.push(Session::new(healthy.clone(), 8));

        wait_until(|| healthy.is_closed());
        assert!(broken.is_closed());
        assert!(anonymous.writes().is_empty());
        stop(&shutdown, handle);
    }

    #[test]
    fn shutdown_observed_within_wake_delay() {
        let reply: Arc<dyn Reply<RecordingStream>> =
            Arc::new(|_: &mut Session<RecordingStream>| Err::<(), _>(SessionError::NoBlockSize));
        let (_queue, shutdown, handle) = spawn_worker(Arc::new(|_: &str| true), reply);
        thread::sleep(TICK);

        let start = Instant::now();
        assert_eq!(stop(&shutdown, handle), WorkerState::Terminating);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn panic_message_extracts_text() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(&*boxed), "static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*owned), "owned");
        let other: Box<dyn Any + Send> = Box::new(5u8);
        assert_eq!(panic_message(&*other), "non-string panic payload");
    }
}
