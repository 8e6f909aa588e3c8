use std::sync::Arc;
use std::time::Duration;

use mio::{Events, Interest, Poll, Token, Waker};

use crate::error::Result;
use crate::socket::Socket;

/// Token 0 is reserved for the cross-thread waker.
pub const WAKER_TOKEN: usize = 0;

/// A socket-readiness multiplexer with an interrupt primitive. The network
/// thread blocks only here; other threads use an [`EventLoopWaker`] to cut
/// the wait short.
pub trait EventLoop {
    fn register(&mut self, socket: &mut Socket, token: usize) -> Result<()>;
    fn unregister(&mut self, socket: &mut Socket) -> Result<()>;

    /// Blocks until readiness, interrupt, or timeout. Tokens of ready
    /// sockets are appended to `ready`; the waker token is filtered out.
    fn wait(&mut self, ready: &mut Vec<usize>, timeout: Duration) -> Result<()>;

    fn waker(&self) -> EventLoopWaker;
}

/// Cross-thread handle that interrupts a blocked [`EventLoop::wait`].
#[derive(Clone)]
pub struct EventLoopWaker {
    waker: Arc<Waker>,
}

impl EventLoopWaker {
    pub fn interrupt(&self) {
        if let Err(e) = self.waker.wake() {
            log::error!("failed to wake the event loop: {e}");
        }
    }
}

/// The production event loop, backed by mio's poller.
pub struct MioEventLoop {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
}

impl MioEventLoop {
    pub fn new() -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), Token(WAKER_TOKEN))?);
        Ok(MioEventLoop {
            poll,
            events: Events::with_capacity(64),
            waker,
        })
    }
}

impl EventLoop for MioEventLoop {
    fn register(&mut self, socket: &mut Socket, token: usize) -> Result<()> {
        debug_assert_ne!(token, WAKER_TOKEN);
        self.poll
            .registry()
            .register(socket.inner_mut(), Token(token), Interest::READABLE)?;
        Ok(())
    }

    fn unregister(&mut self, socket: &mut Socket) -> Result<()> {
        self.poll.registry().deregister(socket.inner_mut())?;
        Ok(())
    }

    fn wait(&mut self, ready: &mut Vec<usize>, timeout: Duration) -> Result<()> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        for event in self.events.iter() {
            let token = event.token().0;
            if token != WAKER_TOKEN {
                ready.push(token);
            }
        }
        Ok(())
    }

    fn waker(&self) -> EventLoopWaker {
        EventLoopWaker {
            waker: self.waker.clone(),
        }
    }
}

#[cfg(test)]
mod event_loop_test {
    use super::*;

    #[test]
    fn test_interrupt_cuts_wait_short() {
        let mut event_loop = MioEventLoop::new().unwrap();
        let waker = event_loop.waker();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            waker.interrupt();
        });

        let started = std::time::Instant::now();
        let mut ready = Vec::new();
        event_loop
            .wait(&mut ready, Duration::from_secs(10))
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(ready.is_empty());
        handle.join().unwrap();
    }

    #[test]
    fn test_socket_readiness() {
        let mut event_loop = MioEventLoop::new().unwrap();

        // A socket talking to itself
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer_addr = peer.local_addr().unwrap();
        let mut socket = Socket::new(peer_addr).unwrap();
        event_loop.register(&mut socket, 1).unwrap();

        peer.send_to(b"hello", socket.local_addr().unwrap()).unwrap();

        let mut ready = Vec::new();
        // Poll may need a couple of rounds on slow machines
        for _ in 0..50 {
            event_loop
                .wait(&mut ready, Duration::from_millis(100))
                .unwrap();
            if !ready.is_empty() {
                break;
            }
        }
        assert_eq!(ready, vec![1]);

        let datagrams = socket.receive_all();
        assert_eq!(datagrams.len(), 1);
        assert_eq!(&datagrams[0][..], b"hello");
    }
}
