//! Non-blocking HTTP front end, polled once per loop turn.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

use bytes::Bytes;
use tracing::{debug, warn};
use turnloop_compute::{
    DispatchError, Dispatched, Dispatcher, IoSource, IoStatus, PendingResponse, Scheduler,
};

use crate::http::{parse_request, response, HttpError};

enum Phase {
    Reading(Vec<u8>),
    Waiting(PendingResponse),
    Writing { out: Vec<u8>, written: usize },
    Done,
}

struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    phase: Phase,
}

fn dispatch_result(route: &str, result: Result<Bytes, DispatchError>) -> Vec<u8> {
    match result {
        Ok(body) => response(200, &body),
        Err(e) if e.is_not_found() => response(404, e.to_string().as_bytes()),
        Err(e) => {
            warn!(route, error = %e, "handler failed");
            response(500, e.to_string().as_bytes())
        }
    }
}

impl Connection {
    fn writing(out: Vec<u8>) -> Phase {
        Phase::Writing { out, written: 0 }
    }

    /// Advance as far as possible without blocking. Returns whether
    /// anything happened.
    fn poll(&mut self, dispatcher: &Dispatcher) -> bool {
        let phase = std::mem::replace(&mut self.phase, Phase::Done);
        let (next, progress) = match phase {
            Phase::Reading(buf) => self.read(buf, dispatcher),
            Phase::Waiting(pending) => match pending.try_take() {
                Some(result) => (Self::writing(dispatch_result(pending.route(), result)), true),
                None => (Phase::Waiting(pending), false),
            },
            Phase::Writing { out, written } => self.write(out, written),
            Phase::Done => (Phase::Done, false),
        };
        self.phase = next;
        progress
    }

    fn read(&mut self, mut buf: Vec<u8>, dispatcher: &Dispatcher) -> (Phase, bool) {
        let mut chunk = [0u8; 4096];
        let mut progress = false;
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    debug!(peer = %self.peer, "peer closed before a full request");
                    return (Phase::Done, true);
                }
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    progress = true;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "read failed");
                    return (Phase::Done, true);
                }
            }
        }

        match parse_request(&buf) {
            Ok(None) => (Phase::Reading(buf), progress),
            Ok(Some(request)) => {
                debug!(peer = %self.peer, method = %request.method, path = %request.path, "request");
                if request.method != "GET" && request.method != "POST" {
                    return (Self::writing(response(405, b"method not allowed\n")), true);
                }
                let phase = match dispatcher.dispatch(&request.path, request.body) {
                    Ok(Dispatched::Ready(body)) => Self::writing(response(200, &body)),
                    Ok(Dispatched::Pending(pending)) => Phase::Waiting(pending),
                    Err(e) => Self::writing(dispatch_result(&request.path, Err(e))),
                };
                (phase, true)
            }
            Err(HttpError::TooLarge) => (Self::writing(response(413, b"request too large\n")), true),
            Err(e) => (Self::writing(response(400, e.to_string().as_bytes())), true),
        }
    }

    fn write(&mut self, out: Vec<u8>, mut written: usize) -> (Phase, bool) {
        let mut progress = false;
        while written < out.len() {
            match self.stream.write(&out[written..]) {
                Ok(0) => return (Phase::Done, true),
                Ok(n) => {
                    written += n;
                    progress = true;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    return (Phase::Writing { out, written }, progress)
                }
                Err(e) => {
                    debug!(peer = %self.peer, error = %e, "write failed");
                    return (Phase::Done, true);
                }
            }
        }
        let _ = self.stream.shutdown(Shutdown::Write);
        (Phase::Done, true)
    }
}

/// Accepts connections and drives each one through read, dispatch and
/// write from the loop's poll phase.
pub struct HttpFrontend {
    listener: TcpListener,
    dispatcher: Dispatcher,
    connections: Vec<Connection>,
}

impl HttpFrontend {
    pub fn bind(addr: &str, dispatcher: Dispatcher) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            dispatcher,
            connections: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn accept(&mut self) -> bool {
        let mut accepted = false;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!(peer = %peer, error = %e, "dropping connection");
                        continue;
                    }
                    debug!(peer = %peer, "accepted");
                    self.connections.push(Connection {
                        stream,
                        peer,
                        phase: Phase::Reading(Vec::new()),
                    });
                    accepted = true;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return accepted,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return accepted;
                }
            }
        }
    }
}

impl IoSource for HttpFrontend {
    fn poll(&mut self, _scheduler: &Scheduler) -> IoStatus {
        let mut progress = self.accept();
        for conn in &mut self.connections {
            progress |= conn.poll(&self.dispatcher);
        }
        self.connections.retain(|c| !matches!(c.phase, Phase::Done));
        if progress {
            IoStatus::Progress
        } else {
            IoStatus::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use turnloop_compute::{ManualClock, RouteTable};
    use turnloop_core::config::default_routes;
    use turnloop_core::ComputeConfig;

    use super::*;

    fn frontend() -> (Scheduler, SocketAddr) {
        let scheduler = Scheduler::with_clock(Rc::new(ManualClock::new()));
        let compute = ComputeConfig {
            iterations: 300,
            chunk_iterations: 100,
            ..ComputeConfig::default()
        };
        let table = RouteTable::from_config(&default_routes(), &compute).unwrap();
        let dispatcher = Dispatcher::new(&scheduler, table);
        let frontend = HttpFrontend::bind("127.0.0.1:0", dispatcher).unwrap();
        let addr = frontend.local_addr().unwrap();
        scheduler.register_io("http", Box::new(frontend));
        (scheduler, addr)
    }

    fn exchange(scheduler: &Scheduler, addr: SocketAddr, request: &[u8]) -> String {
        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(request).unwrap();
        client.set_nonblocking(true).unwrap();
        let mut reply = Vec::new();
        let mut buf = [0u8; 1024];
        for _ in 0..10_000 {
            scheduler.turn();
            match client.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => reply.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(1))
                }
                Err(e) => panic!("client read failed: {e}"),
            }
        }
        String::from_utf8(reply).unwrap()
    }

    #[test]
    fn serves_plain_route() {
        let (scheduler, addr) = frontend();
        let reply = exchange(&scheduler, addr, b"GET /health HTTP/1.1\r\n\r\n");
        assert!(reply.starts_with("HTTP/1.1 200 OK"), "{reply}");
        assert!(reply.ends_with("all good \n"));
    }

    #[test]
    fn serves_chunked_route_once_computed() {
        let (scheduler, addr) = frontend();
        let reply = exchange(&scheduler, addr, b"GET /compute-fast HTTP/1.1\r\n\r\n");
        assert!(reply.starts_with("HTTP/1.1 200 OK"), "{reply}");
        let digest = reply.rsplit("\r\n\r\n").next().unwrap().trim_end();
        assert_eq!(digest.len(), 64);
    }

    #[test]
    fn unknown_route_is_404() {
        let (scheduler, addr) = frontend();
        let reply = exchange(&scheduler, addr, b"GET /missing HTTP/1.1\r\n\r\n");
        assert!(reply.starts_with("HTTP/1.1 404 Not Found"), "{reply}");
    }

    #[test]
    fn echo_returns_post_body() {
        let (scheduler, addr) = frontend();
        let reply = exchange(
            &scheduler,
            addr,
            b"POST /echo HTTP/1.1\r\nContent-Length: 4\r\n\r\nping",
        );
        assert!(reply.ends_with("\r\n\r\nping"), "{reply}");
    }
}
