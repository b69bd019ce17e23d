//! Frames [`super::ControlMessage`] over a `UnixStream`, optionally
//! attaching one file descriptor via `SCM_RIGHTS`.
//!
//! Each logical message is sent as a *single* `sendmsg` call (length prefix
//! + payload as one buffer, plus the ancillary fd data if any) and expected
//! to arrive in a *single* `recvmsg` call on the other end. `SCM_RIGHTS`
//! ancillary data is only guaranteed to be delivered intact when the
//! accompanying bytes are read in the same call that produced them; since
//! every frame here is a few dozen bytes at most, one `recvmsg` call is
//! always sufficient in practice and this channel does not attempt to
//! reassemble a frame split across multiple reads.

use super::ControlMessage;
use anyhow::{anyhow, Context, Result};
use nix::cmsg_space;
use nix::sys::socket::{recvmsg, sendmsg, ControlMessage as NixControlMessage, ControlMessageOwned, MsgFlags};
use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use tokio::io::Interest;
use tokio::net::{TcpStream, UnixStream};

/// Upper bound on one frame (4-byte length prefix + bincode payload). Every
/// message this channel carries is a handful of bytes; this is headroom,
/// not a tuned limit.
const MAX_FRAME_LEN: usize = 4096;

/// One end of the master↔worker control channel.
pub struct FdChannel {
    stream: UnixStream,
}

impl FdChannel {
    /// Wrap an already-connected `UnixStream`.
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// Build a connected pair: one end for the master to keep, one to hand
    /// to the spawned child as an inherited fd.
    pub fn pair() -> Result<(Self, std::os::unix::net::UnixStream)> {
        let (a, b) =
            std::os::unix::net::UnixStream::pair().context("creating control-channel socketpair")?;
        a.set_nonblocking(true)?;
        let a = UnixStream::from_std(a).context("registering control channel with tokio")?;
        Ok((Self { stream: a }, b))
    }

    /// Open the worker side of the channel from an inherited raw fd (read
    /// from [`crate::role::IPC_FD_VAR`] by the caller).
    ///
    /// # Safety
    ///
    /// `fd` must be a valid, open file descriptor owned exclusively by this
    /// process (inherited from the parent, not otherwise in use).
    pub unsafe fn from_raw_fd(fd: RawFd) -> Result<Self> {
        let std_stream = std::os::unix::net::UnixStream::from_raw_fd(fd);
        std_stream.set_nonblocking(true)?;
        let stream = UnixStream::from_std(std_stream)?;
        Ok(Self { stream })
    }

    /// Send a control message, optionally attaching `fd` via `SCM_RIGHTS`.
    ///
    /// The caller retains ownership of `fd`: the kernel duplicates the
    /// descriptor into the peer rather than moving it, so the caller is
    /// still responsible for closing its own copy afterwards.
    pub async fn send(&self, msg: &ControlMessage, fd: Option<RawFd>) -> Result<()> {
        let payload = bincode::serialize(msg).context("encoding control message")?;
        if payload.len() + 4 > MAX_FRAME_LEN {
            return Err(anyhow!("control message too large: {} bytes", payload.len()));
        }
        let mut framed = Vec::with_capacity(4 + payload.len());
        framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        framed.extend_from_slice(&payload);

        let raw = self.stream.as_raw_fd();
        loop {
            self.stream.writable().await?;
            let result = self.stream.try_io(Interest::WRITABLE, || {
                let iov = [IoSlice::new(&framed)];
                let fds = fd.map(|f| [f]);
                let cmsgs: Vec<NixControlMessage> = match &fds {
                    Some(fds) => vec![NixControlMessage::ScmRights(fds)],
                    None => Vec::new(),
                };
                sendmsg::<()>(raw, &iov, &cmsgs, MsgFlags::empty(), None).map_err(std::io::Error::from)
            });
            match result {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e).context("sendmsg on control channel"),
            }
        }
    }

    /// Receive one control message, reconstituting an attached fd (if any)
    /// as a [`TcpStream`]: the only kind of fd this channel ever carries.
    pub async fn recv(&self) -> Result<(ControlMessage, Option<TcpStream>)> {
        let raw = self.stream.as_raw_fd();
        let mut buf = vec![0u8; MAX_FRAME_LEN];
        let mut received_fd: Option<RawFd> = None;
        let n = loop {
            self.stream.readable().await?;
            let mut cmsg_buffer = cmsg_space!([RawFd; 1]);
            let result = self.stream.try_io(Interest::READABLE, || {
                let mut iov = [IoSliceMut::new(&mut buf)];
                let msg = recvmsg::<()>(raw, &mut iov, Some(&mut cmsg_buffer), MsgFlags::empty())
                    .map_err(std::io::Error::from)?;
                let cmsgs = msg.cmsgs().map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed ancillary data")
                })?;
                for cmsg in cmsgs {
                    if let ControlMessageOwned::ScmRights(fds) = cmsg {
                        received_fd = fds.into_iter().next();
                    }
                }
                Ok(msg.bytes)
            });
            match result {
                Ok(n) => break n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e).context("recvmsg on control channel"),
            }
        };

        if n == 0 {
            return Err(anyhow!("control channel closed by peer"));
        }
        if n < 4 {
            return Err(anyhow!("short read on control channel: {n} bytes"));
        }
        let len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
        if n < 4 + len {
            return Err(anyhow!(
                "control frame split across reads ({n} bytes for a {len}-byte payload); \
                 this channel does not reassemble split frames"
            ));
        }
        let msg: ControlMessage =
            bincode::deserialize(&buf[4..4 + len]).context("decoding control message")?;

        let socket = match received_fd {
            Some(fd) => {
                let std_stream = unsafe { std::net::TcpStream::from_raw_fd(fd) };
                std_stream.set_nonblocking(true)?;
                Some(TcpStream::from_std(std_stream).context("registering handed-off socket")?)
            }
            None => None,
        };
        Ok((msg, socket))
    }
}
