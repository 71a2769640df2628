//! The binder process
//!
//! Plain threads and blocking sockets: the binder does nothing but bind,
//! accept and pass descriptors, and it must keep working while the rest of
//! the process tree is being restarted around it.

use std::collections::HashMap;
use std::io::IoSlice;
use std::net::{Shutdown, SocketAddr};
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Arc;

use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};
use parking_lot::Mutex;
use socket2::{Domain, SockAddr, Socket, Type};

use skewer_model::Uid;

use crate::{BinderAddr, BinderError, Scheme};

struct ClientState {
    /// The seqpacket socket back to the service
    sock: Arc<OwnedFd>,
    /// Bound listeners by address string
    listeners: Mutex<HashMap<String, Socket>>,
    /// Retained descriptors by uid; kept until an explicit closeconn
    conns: Mutex<HashMap<String, Socket>>,
}

impl ClientState {
    /// Send one protocol message, optionally with a descriptor attached.
    fn send(&self, msg: &str, fd: Option<&Socket>) -> nix::Result<()> {
        let iov = [IoSlice::new(msg.as_bytes())];
        let raw;
        let cmsgs: &[ControlMessage] = match fd {
            Some(sock) => {
                raw = [sock.as_raw_fd()];
                &[ControlMessage::ScmRights(&raw)]
            }
            None => &[],
        };
        sendmsg::<()>(self.sock.as_raw_fd(), &iov, cmsgs, MsgFlags::empty(), None)?;
        Ok(())
    }

    fn close_conn(&self, uid: &str) {
        let mut conns = self.conns.lock();
        if uid.is_empty() {
            conns.clear();
        } else {
            conns.remove(uid);
        }
    }

    fn reset(&self) {
        let mut listeners = self.listeners.lock();
        for (_, sock) in listeners.drain() {
            let _ = sock.shutdown(Shutdown::Both);
        }
        self.conns.lock().clear();
    }
}

/// Serve binder clients. Each element of `clients` is one service's end of
/// a seqpacket pair; the call returns when every client has said `byebye`
/// or hung up.
pub fn run(clients: Vec<OwnedFd>) -> Result<(), BinderError> {
    let mut handles = Vec::new();
    for sock in clients {
        handles.push(std::thread::spawn(move || serve_client(sock)));
    }
    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

fn serve_client(sock: OwnedFd) {
    let state = Arc::new(ClientState {
        sock: Arc::new(sock),
        listeners: Mutex::new(HashMap::new()),
        conns: Mutex::new(HashMap::new()),
    });

    let mut buf = vec![0u8; 4096];
    loop {
        let n = match nix::sys::socket::recv(
            state.sock.as_raw_fd(),
            &mut buf,
            MsgFlags::empty(),
        ) {
            Ok(0) => break,
            Ok(n) => n,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "binder control socket failed");
                break;
            }
        };

        let line = String::from_utf8_lossy(&buf[..n]).trim().to_string();
        let (command, args) = match line.split_once(' ') {
            Some((c, a)) => (c.to_string(), a.trim().to_string()),
            None => (line.clone(), String::new()),
        };

        match command.as_str() {
            "listen" => {
                for addr in args.split_whitespace() {
                    handle_listen(&state, addr);
                }
            }
            "stoplisten" => {
                if let Some(sock) = state.listeners.lock().remove(&args) {
                    let _ = sock.shutdown(Shutdown::Both);
                }
                let _ = state.send(&format!("stopped {args}"), None);
            }
            "closeconn" => state.close_conn(&args),
            "reset" => state.reset(),
            "byebye" => break,
            other => {
                tracing::debug!(command = other, "unknown binder command ignored");
            }
        }
    }

    state.reset();
}

fn handle_listen(state: &Arc<ClientState>, addr: &str) {
    let parsed = match BinderAddr::parse(addr) {
        Ok(p) => p,
        Err(e) => {
            let _ = state.send(&format!("error {addr} {e}"), None);
            return;
        }
    };

    if parsed.scheme.is_stream() {
        match bind_stream(&parsed) {
            Ok(listener) => {
                let accept = match listener.try_clone() {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = state.send(&format!("error {addr} {e}"), None);
                        return;
                    }
                };
                state
                    .listeners
                    .lock()
                    .insert(addr.to_string(), listener);
                let state = Arc::clone(state);
                let addr = addr.to_string();
                std::thread::spawn(move || accept_loop(state, addr, accept));
            }
            Err(e) => {
                let _ = state.send(&format!("error {addr} {e}"), None);
            }
        }
    } else {
        match bind_packet(&parsed) {
            Ok(sock) => {
                let uid = Uid::new().to_string();
                let _ = state.send(&format!("newconn {uid} {addr}"), Some(&sock));
                state.conns.lock().insert(uid, sock);
            }
            Err(e) => {
                let _ = state.send(&format!("error {addr} {e}"), None);
            }
        }
    }
}

fn accept_loop(state: Arc<ClientState>, addr: String, listener: Socket) {
    loop {
        match listener.accept() {
            Ok((conn, _peer)) => {
                let uid = Uid::new().to_string();
                if state
                    .send(&format!("newconn {uid} {addr}"), Some(&conn))
                    .is_ok()
                {
                    // retained until closeconn, so a service restart does
                    // not drop the connection
                    state.conns.lock().insert(uid, conn);
                } else {
                    return;
                }
            }
            Err(_) => {
                // listener was shut down by stoplisten/reset
                return;
            }
        }
    }
}

fn bind_stream(addr: &BinderAddr) -> std::io::Result<Socket> {
    let sock = match addr.scheme {
        Scheme::Tcp => {
            let sa: SocketAddr = addr
                .rest
                .parse()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
            let sock = Socket::new(Domain::for_address(sa), Type::STREAM, None)?;
            sock.set_reuse_address(true)?;
            sock.bind(&sa.into())?;
            sock
        }
        Scheme::Unix | Scheme::Unixpacket => {
            let ty = if addr.scheme == Scheme::Unix {
                Type::STREAM
            } else {
                Type::SEQPACKET
            };
            let _ = std::fs::remove_file(&addr.rest);
            let sock = Socket::new(Domain::UNIX, ty, None)?;
            sock.bind(&SockAddr::unix(&addr.rest)?)?;
            set_world_writable(&addr.rest);
            sock
        }
        Scheme::Udp | Scheme::Unixgram => unreachable!("packet scheme in bind_stream"),
    };
    sock.listen(128)?;
    Ok(sock)
}

fn bind_packet(addr: &BinderAddr) -> std::io::Result<Socket> {
    match addr.scheme {
        Scheme::Udp => {
            let sa: SocketAddr = addr
                .rest
                .parse()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
            let sock = Socket::new(Domain::for_address(sa), Type::DGRAM, None)?;
            sock.set_reuse_address(true)?;
            sock.bind(&sa.into())?;
            Ok(sock)
        }
        Scheme::Unixgram => {
            let _ = std::fs::remove_file(&addr.rest);
            let sock = Socket::new(Domain::UNIX, Type::DGRAM, None)?;
            sock.bind(&SockAddr::unix(&addr.rest)?)?;
            set_world_writable(&addr.rest);
            Ok(sock)
        }
        _ => unreachable!("stream scheme in bind_packet"),
    }
}

fn set_world_writable(path: &str) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777));
}
