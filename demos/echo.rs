//! A TCP echo server driven by an epoll instance.
//!
//! Start the server:
//!
//! ```
//! cargo run --example echo
//! ```
//!
//! Then connect to it:
//!
//! ```
//! nc 127.0.0.1 7000
//! ```

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};

use psn_epoll::{Descriptor, Epoll, EpollFlags, Event, RawSocket};

#[cfg(unix)]
fn raw<T: std::os::unix::io::AsRawFd>(socket: &T) -> RawSocket {
    socket.as_raw_fd()
}

#[cfg(windows)]
fn raw<T: std::os::windows::io::AsRawSocket>(socket: &T) -> RawSocket {
    socket.as_raw_socket()
}

fn main() -> io::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:7000")?;
    listener.set_nonblocking(true)?;
    println!("Listening on {}", listener.local_addr()?);

    let epoll = Epoll::new(1)?;
    let server = epoll.descriptor_for(raw(&listener))?;
    epoll.add(server, Event::new(EpollFlags::IN, 0))?;

    let mut clients: HashMap<Descriptor, TcpStream> = HashMap::new();
    let mut events = vec![Event::default(); 64];
    let mut buf = [0; 4096];

    loop {
        let n = epoll.wait(&mut events, None)?;

        for ev in &events[..n] {
            if ev.fd == server {
                // Accept everything that is pending.
                loop {
                    match listener.accept() {
                        Ok((stream, peer)) => {
                            stream.set_nonblocking(true)?;
                            let fd = epoll.descriptor_for(raw(&stream))?;
                            epoll.add(fd, Event::new(EpollFlags::RDHUP, 0))?;
                            println!("Accepted client: {} as {}", peer, fd);
                            clients.insert(fd, stream);
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                        Err(err) => return Err(err),
                    }
                }
                continue;
            }

            let stream = match clients.get_mut(&ev.fd) {
                Some(stream) => stream,
                None => continue,
            };
            let closed = match stream.read(&mut buf) {
                Ok(0) => true,
                Ok(n) => stream.write_all(&buf[..n]).is_err(),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => false,
                Err(_) => true,
            };
            if closed {
                epoll.delete(ev.fd)?;
                clients.remove(&ev.fd);
                println!("Closed client {}", ev.fd);
            }
        }
    }
}
