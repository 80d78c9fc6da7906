//! End-to-end proxy forwarding test: a real loopback upstream, a real
//! `ConnectionHandler` in the proxy role, and the actual epoll instance
//! it registers descriptors with — driven through a small bounded event
//! pump rather than the full [`relay_net::Reactor`] loop, so the test
//! can assert on a specific response without a background thread.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use relay_net::{ConnectionContext, ConnectionHandler, ConnectionTable, Epoll, Interest, Role, SharedContext, UpstreamTarget};

fn socket_pair() -> (RawFd, RawFd) {
    let mut fds = [0; 2];
    let rc = unsafe {
        libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0, fds.as_mut_ptr())
    };
    assert_eq!(rc, 0);
    (fds[0], fds[1])
}

#[test]
fn client_request_is_forwarded_and_response_bridged_back() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let upstream_port = listener.local_addr().unwrap().port();

    let upstream_thread = std::thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        let mut buf = [0u8; 4096];
        let n = conn.read(&mut buf).unwrap();
        let received = String::from_utf8_lossy(&buf[..n]).to_string();
        assert!(received.starts_with("GET /widgets HTTP/1.1\r\n"));
        assert!(received.contains("content-length: 0\r\n"));

        let response = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";
        conn.write_all(response).unwrap();
    });

    let table = Arc::new(ConnectionTable::new());
    let epoll = Arc::new(Epoll::new().unwrap());
    let target = UpstreamTarget { host: "127.0.0.1".to_string(), port: upstream_port };
    let handler = ConnectionHandler::new(Arc::clone(&table), Arc::clone(&epoll), Role::Proxy(target));

    let (client_side, server_side) = socket_pair();
    let ctx: SharedContext = Arc::new(Mutex::new(ConnectionContext::new(server_side)));
    table.insert(server_side, ctx);
    epoll.add(server_side, Interest::ReadOnly).unwrap();

    let request = b"GET /widgets HTTP/1.1\r\nHost: x\r\n\r\n";
    let n = unsafe { libc::write(client_side, request.as_ptr() as *const libc::c_void, request.len()) };
    assert_eq!(n as usize, request.len());

    // First event: the client side becomes readable, which parses the
    // request, opens the upstream connection, and queues the forwarded
    // bytes for it.
    handler.handle_event(server_side, libc::EPOLLIN as u32);

    // Pump whatever the kernel reports (upstream connect completing,
    // the forwarded request draining out, the upstream's response
    // coming back, and it bridging to the client) until the client
    // socket has something to read or a deadline passes.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut events_buf = vec![unsafe { std::mem::zeroed::<libc::epoll_event>() }; 16];
    let mut response = Vec::new();
    while Instant::now() < deadline {
        let events = epoll.wait(&mut events_buf, 200).unwrap();
        for event in &events {
            handler.handle_event(event.fd, event.mask);
        }

        let mut scratch = [0u8; 4096];
        loop {
            let n = unsafe { libc::read(client_side, scratch.as_mut_ptr() as *mut libc::c_void, scratch.len()) };
            if n > 0 {
                response.extend_from_slice(&scratch[..n as usize]);
                continue;
            }
            break;
        }
        if !response.is_empty() {
            break;
        }
    }

    upstream_thread.join().unwrap();

    let text = String::from_utf8(response).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "unexpected response: {text}");
    assert!(text.ends_with("ok"));

    unsafe {
        libc::close(client_side);
    }
}
