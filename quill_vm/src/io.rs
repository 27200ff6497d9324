//! Per-worker I/O multiplexer.
//!
//! Each worker owns one epoll instance. A frame that would block parks in
//! `IoWait` and its descriptor is registered here; when the descriptor
//! becomes ready the frame id comes back from [`IoPoller::poll`] and the
//! worker re-enqueues it, retrying the suspended instruction.
//!
//! Registrations are one-shot by construction: a ready descriptor is
//! deregistered before its frame is reported.

use crate::frame::FrameId;
use quill_core::{IoInterest, IoRequest};
use rustc_hash::FxHashMap;
use std::io;
use std::os::unix::io::RawFd;

const MAX_EVENTS: usize = 32;

pub struct IoPoller {
    epfd: RawFd,
    registered: FxHashMap<RawFd, FrameId>,
}

impl IoPoller {
    pub fn new() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epfd,
            registered: FxHashMap::default(),
        })
    }

    /// Park `frame` until the request's descriptor is ready.
    pub fn register(&mut self, request: IoRequest, frame: FrameId) -> io::Result<()> {
        let events = match request.interest {
            IoInterest::Readable => libc::EPOLLIN,
            IoInterest::Writable => libc::EPOLLOUT,
        } as u32;
        let mut ev = libc::epoll_event {
            events,
            u64: request.fd as u64,
        };
        let op = if self.registered.contains_key(&request.fd) {
            libc::EPOLL_CTL_MOD
        } else {
            libc::EPOLL_CTL_ADD
        };
        if unsafe { libc::epoll_ctl(self.epfd, op, request.fd, &mut ev) } < 0 {
            return Err(io::Error::last_os_error());
        }
        self.registered.insert(request.fd, frame);
        Ok(())
    }

    /// Collect frames whose descriptors became ready. `timeout_ms` of zero
    /// is a non-blocking check.
    pub fn poll(&mut self, timeout_ms: i32, ready: &mut Vec<FrameId>) -> io::Result<usize> {
        if self.registered.is_empty() {
            return Ok(0);
        }
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];
        let n = unsafe {
            libc::epoll_wait(self.epfd, events.as_mut_ptr(), MAX_EVENTS as i32, timeout_ms)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        let mut woken = 0;
        for ev in &events[..n as usize] {
            let fd = ev.u64 as RawFd;
            if let Some(frame) = self.registered.remove(&fd) {
                unsafe {
                    libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
                }
                ready.push(frame);
                woken += 1;
            }
        }
        Ok(woken)
    }

    /// Number of frames currently parked on a descriptor.
    pub fn pending(&self) -> usize {
        self.registered.len()
    }
}

impl Drop for IoPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe() -> (RawFd, RawFd) {
        let mut fds = [0 as RawFd; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn test_readable_pipe_wakes_frame() {
        let (read_fd, write_fd) = pipe();
        let mut poller = IoPoller::new().unwrap();
        let frame = FrameId::from_raw(7);
        poller
            .register(
                IoRequest {
                    fd: read_fd,
                    interest: IoInterest::Readable,
                },
                frame,
            )
            .unwrap();

        let mut ready = Vec::new();
        // nothing written yet
        assert_eq!(poller.poll(0, &mut ready).unwrap(), 0);
        assert!(ready.is_empty());

        assert_eq!(unsafe { libc::write(write_fd, b"x".as_ptr().cast(), 1) }, 1);
        assert_eq!(poller.poll(100, &mut ready).unwrap(), 1);
        assert_eq!(ready, vec![frame]);
        // one-shot: the registration is gone
        assert_eq!(poller.pending(), 0);

        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
    }
}
