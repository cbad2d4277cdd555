use std::io::{self, Write};
use std::net::{TcpListener, TcpStream};

use psn_epoll::compat::{self, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD};
use psn_epoll::{EpollFlags, Event, RawSocket};

fn pair() -> io::Result<(TcpStream, TcpStream)> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let client = TcpStream::connect(listener.local_addr()?)?;
    let (server, _) = listener.accept()?;
    Ok((client, server))
}

#[cfg(unix)]
fn raw(stream: &TcpStream) -> RawSocket {
    use std::os::unix::io::AsRawFd;
    stream.as_raw_fd()
}

#[cfg(windows)]
fn raw(stream: &TcpStream) -> RawSocket {
    use std::os::windows::io::AsRawSocket;
    stream.as_raw_socket()
}

#[test]
fn readiness() -> io::Result<()> {
    let (mut client, server) = pair()?;
    let epfd = compat::epoll_create(1);
    assert!(epfd > 0);

    let fd = compat::epoll_sock2fd(epfd, raw(&server));
    assert!(fd >= 1);
    assert_eq!(compat::epoll_sock2fd(epfd, raw(&server)), fd);
    assert_eq!(compat::epoll_fd2sock(epfd, fd), Some(raw(&server)));

    let ev = Event::new(EpollFlags::IN, 0xdead_beef);
    assert_eq!(compat::epoll_ctl(epfd, EPOLL_CTL_ADD, fd, Some(&ev)), 0);
    client.write_all(b"ping")?;

    let mut events = [Event::default(); 4];
    let n = compat::epoll_wait(epfd, Some(&mut events), 4, 5000);
    assert!(n >= 1);
    assert_eq!(events[0].fd.as_raw(), fd);
    assert_eq!(events[0].data, 0xdead_beef);
    assert!(events[0].events.contains(EpollFlags::IN));

    let ev = Event::new(EpollFlags::OUT, 1);
    assert_eq!(compat::epoll_ctl(epfd, EPOLL_CTL_MOD, fd, Some(&ev)), 0);
    assert_eq!(compat::epoll_ctl(epfd, EPOLL_CTL_DEL, fd, None), 0);
    assert_eq!(compat::epoll_fd2sock(epfd, fd), None);
    assert_eq!(compat::errno(), libc::EBADF);

    assert_eq!(compat::epoll_close(epfd), 0);
    Ok(())
}

#[test]
fn error_codes() -> io::Result<()> {
    let (_client, server) = pair()?;
    let epfd = compat::epoll_create1(0);
    let ev = Event::new(EpollFlags::IN, 0);

    assert_eq!(compat::epoll_ctl(epfd, EPOLL_CTL_ADD, 777, Some(&ev)), -1);
    assert_eq!(compat::errno(), libc::EBADF);

    let fd = compat::epoll_sock2fd(epfd, raw(&server));
    assert_eq!(compat::epoll_ctl(epfd, EPOLL_CTL_DEL, fd, None), -1);
    assert_eq!(compat::errno(), libc::ENOENT);
    assert_eq!(compat::epoll_ctl(epfd, EPOLL_CTL_MOD, fd, Some(&ev)), -1);
    assert_eq!(compat::errno(), libc::ENOENT);
    assert_eq!(compat::epoll_ctl(epfd, EPOLL_CTL_ADD, fd, None), -1);
    assert_eq!(compat::errno(), libc::EINVAL);

    assert_eq!(compat::epoll_ctl(epfd, EPOLL_CTL_ADD, fd, Some(&ev)), 0);
    assert_eq!(compat::epoll_ctl(epfd, EPOLL_CTL_ADD, fd, Some(&ev)), -1);
    assert_eq!(compat::errno(), libc::EEXIST);

    assert_eq!(compat::epoll_wait(epfd, None, 4, 0), -1);
    assert_eq!(compat::errno(), libc::EFAULT);

    let mut events = [Event::default(); 4];
    assert_eq!(compat::epoll_wait(epfd, Some(&mut events), 0, 0), -1);
    assert_eq!(compat::errno(), libc::EINVAL);

    assert_eq!(compat::epoll_close(epfd), 0);
    assert_eq!(compat::epoll_wait(epfd, Some(&mut events), 4, 0), -1);
    assert_eq!(compat::errno(), libc::EINVAL);
    assert_eq!(compat::epoll_ctl(epfd, EPOLL_CTL_ADD, fd, Some(&ev)), -1);
    assert_eq!(compat::errno(), libc::EINVAL);
    Ok(())
}

#[test]
fn postqueued_wakes() {
    let epfd = compat::epoll_create(1);
    assert_eq!(compat::epoll_postqueued(epfd), 0);

    let mut events = [Event::default(); 4];
    assert_eq!(compat::epoll_wait(epfd, Some(&mut events), 4, -1), 0);
    assert_eq!(compat::epoll_wait(epfd, None, 4, -1), 0);
    assert_eq!(compat::epoll_close(epfd), 0);
}

#[test]
fn timeout() {
    let epfd = compat::epoll_create(1);
    let mut events = [Event::default(); 4];
    assert_eq!(compat::epoll_wait(epfd, Some(&mut events), 4, 20), 0);

    // More slots requested than supplied.
    assert_eq!(compat::epoll_wait(epfd, Some(&mut events), 64, 0), 0);
    assert_eq!(compat::epoll_close(epfd), 0);
}
