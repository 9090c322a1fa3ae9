//! Socket readiness wait built on `poll(2)`

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io;
use std::os::fd::AsFd;
use std::time::Duration;

/// Block until `socket` is readable or `timeout` elapses.
///
/// Hang-up and error conditions count as readable so the following read or
/// accept call observes them. An interrupted wait reports not ready.
pub fn wait_readable(socket: &impl AsFd, timeout: Duration) -> io::Result<bool> {
    let mut fds = [PollFd::new(socket.as_fd(), PollFlags::POLLIN)];
    let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    match poll(&mut fds, PollTimeout::from(millis)) {
        Ok(ready) => Ok(ready > 0),
        Err(Errno::EINTR) => Ok(false),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Peer shutdown on systems that report it separately from `POLLHUP`
#[cfg(any(target_os = "linux", target_os = "android"))]
const PEER_CLOSED: PollFlags = PollFlags::from_bits_retain(nix::libc::POLLRDHUP);
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const PEER_CLOSED: PollFlags = PollFlags::empty();

/// True if the peer has closed or the socket is in error. Does not wait and
/// does not consume any buffered bytes.
pub fn peer_hung_up(socket: &impl AsFd) -> io::Result<bool> {
    let mut fds = [PollFd::new(socket.as_fd(), PEER_CLOSED)];
    match poll(&mut fds, PollTimeout::ZERO) {
        Ok(0) => Ok(false),
        Ok(_) => Ok(fds[0].revents().is_some_and(|revents| {
            revents.intersects(PEER_CLOSED | PollFlags::POLLHUP | PollFlags::POLLERR)
        })),
        Err(Errno::EINTR) => Ok(false),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn test_readable_after_write_and_timeout_before() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();

        assert!(wait_readable(&listener, Duration::from_secs(2)).unwrap());
        let (server, _) = listener.accept().unwrap();

        assert!(!wait_readable(&server, Duration::from_millis(10)).unwrap());
        client.write_all(b"ping").unwrap();
        assert!(wait_readable(&server, Duration::from_secs(2)).unwrap());
    }

    #[test]
    fn test_hangup_counts_as_readable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        drop(client);
        assert!(wait_readable(&server, Duration::from_secs(2)).unwrap());
    }

    #[test]
    fn test_peer_hung_up_leaves_buffered_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = listener.accept().unwrap();
        assert!(!peer_hung_up(&server).unwrap());

        client.write_all(b"tail").unwrap();
        drop(client);
        assert!(wait_readable(&server, Duration::from_secs(2)).unwrap());
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !peer_hung_up(&server).unwrap() {
            assert!(std::time::Instant::now() < deadline, "hang-up not reported");
            std::thread::sleep(Duration::from_millis(5));
        }

        let mut buf = [0u8; 8];
        assert_eq!(server.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"tail");
    }
}
