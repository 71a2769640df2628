//! Binder client
//!
//! Used by source services: commands go out on the inherited seqpacket
//! socket, events (with their descriptors) come back on a channel fed by a
//! dedicated reader thread, so the service's async runtime never blocks on
//! `recvmsg`.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;

use nix::sys::socket::{recvmsg, sendmsg, ControlMessageOwned, MsgFlags};
use tokio::sync::mpsc;

use crate::{BinderAddr, BinderError};

/// An event from the binder process.
#[derive(Debug)]
pub enum BinderEvent {
    /// A new accepted connection (stream) or bound socket (packet).
    NewConn {
        uid: String,
        addr: BinderAddr,
        fd: OwnedFd,
    },
    Error {
        addr: String,
        message: String,
    },
    Stopped {
        addr: String,
    },
}

/// Command side of the binder socket.
#[derive(Clone)]
pub struct BinderClient {
    sock: Arc<OwnedFd>,
}

impl BinderClient {
    /// Wrap the inherited binder socket; the returned receiver yields
    /// binder events until the binder goes away.
    pub fn new(sock: OwnedFd) -> (BinderClient, mpsc::UnboundedReceiver<BinderEvent>) {
        let sock = Arc::new(sock);
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = Arc::clone(&sock);
        std::thread::Builder::new()
            .name("binder-events".into())
            .spawn(move || read_loop(reader, tx))
            .expect("spawning the binder reader thread");
        (BinderClient { sock }, rx)
    }

    fn send(&self, msg: &str) -> Result<(), BinderError> {
        let iov = [IoSlice::new(msg.as_bytes())];
        sendmsg::<()>(self.sock.as_raw_fd(), &iov, &[], MsgFlags::empty(), None)
            .map_err(|e| BinderError::Io(e.into()))?;
        Ok(())
    }

    /// Ask the binder to listen on every given address.
    pub fn listen(&self, addrs: &[String]) -> Result<(), BinderError> {
        if addrs.is_empty() {
            return Ok(());
        }
        self.send(&format!("listen {}", addrs.join(" ")))
    }

    pub fn stop_listen(&self, addr: &str) -> Result<(), BinderError> {
        self.send(&format!("stoplisten {addr}"))
    }

    /// Release the binder's retained descriptor for one connection.
    pub fn close_conn(&self, uid: &str) -> Result<(), BinderError> {
        self.send(&format!("closeconn {uid}"))
    }

    /// Release every retained descriptor.
    pub fn close_all(&self) -> Result<(), BinderError> {
        self.send("closeconn")
    }

    /// Close all listeners and connections.
    pub fn reset(&self) -> Result<(), BinderError> {
        self.send("reset")
    }

    /// Tell the binder this client is done.
    pub fn byebye(&self) -> Result<(), BinderError> {
        self.send("byebye")
    }
}

fn read_loop(sock: Arc<OwnedFd>, tx: mpsc::UnboundedSender<BinderEvent>) {
    let mut buf = vec![0u8; 4096];
    loop {
        let mut cmsg_buf = nix::cmsg_space!([std::os::fd::RawFd; 1]);
        let mut iov = [IoSliceMut::new(&mut buf)];
        let (bytes, fd) = match recvmsg::<()>(
            sock.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buf),
            MsgFlags::empty(),
        ) {
            Ok(msg) => {
                let mut fd = None;
                if let Ok(cmsgs) = msg.cmsgs() {
                    for cmsg in cmsgs {
                        if let ControlMessageOwned::ScmRights(fds) = cmsg {
                            for raw in fds {
                                // the binder keeps its own copy; this one is ours
                                fd = Some(unsafe { OwnedFd::from_raw_fd(raw) });
                            }
                        }
                    }
                }
                (msg.bytes, fd)
            }
            Err(nix::errno::Errno::EINTR) => continue,
            Err(_) => return,
        };
        if bytes == 0 {
            return;
        }

        let line = String::from_utf8_lossy(&buf[..bytes]).trim().to_string();
        let event = match parse_event(&line, fd) {
            Some(e) => e,
            None => {
                tracing::debug!(line, "unparseable binder event dropped");
                continue;
            }
        };
        if tx.send(event).is_err() {
            return;
        }
    }
}

fn parse_event(line: &str, fd: Option<OwnedFd>) -> Option<BinderEvent> {
    let mut parts = line.splitn(3, ' ');
    match parts.next()? {
        "newconn" => {
            let uid = parts.next()?.to_string();
            let addr = BinderAddr::parse(parts.next()?).ok()?;
            Some(BinderEvent::NewConn {
                uid,
                addr,
                fd: fd?,
            })
        }
        "error" => Some(BinderEvent::Error {
            addr: parts.next()?.to_string(),
            message: parts.next().unwrap_or("").to_string(),
        }),
        "stopped" => Some(BinderEvent::Stopped {
            addr: parts.next()?.to_string(),
        }),
        _ => None,
    }
}

/// Convert a received stream descriptor into a tokio TCP stream.
pub fn into_tcp_stream(fd: OwnedFd) -> std::io::Result<tokio::net::TcpStream> {
    let std_stream = std::net::TcpStream::from(fd);
    std_stream.set_nonblocking(true)?;
    tokio::net::TcpStream::from_std(std_stream)
}

/// Convert a received stream descriptor into a tokio unix stream.
pub fn into_unix_stream(fd: OwnedFd) -> std::io::Result<tokio::net::UnixStream> {
    let std_stream = std::os::unix::net::UnixStream::from(fd);
    std_stream.set_nonblocking(true)?;
    tokio::net::UnixStream::from_std(std_stream)
}

/// Convert a received packet descriptor into a tokio UDP socket.
pub fn into_udp_socket(fd: OwnedFd) -> std::io::Result<tokio::net::UdpSocket> {
    let std_sock = std::net::UdpSocket::from(fd);
    std_sock.set_nonblocking(true)?;
    tokio::net::UdpSocket::from_std(std_sock)
}

#[cfg(test)]
#[path = "client_test.rs"]
mod client_test;
