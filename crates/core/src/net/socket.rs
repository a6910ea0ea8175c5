use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

/// Remote peer as given to `connect`. Resolving it is left to the socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Unreliable datagram transport the connection runs on.
///
/// Both calls must return immediately. `try_receive` yields `Ok(None)` once no
/// datagram is queued.
pub trait DatagramSocket {
    fn send_to(&mut self, datagram: &[u8], destination: &Endpoint) -> io::Result<()>;

    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;
}

impl<S: DatagramSocket + ?Sized> DatagramSocket for Box<S> {
    fn send_to(&mut self, datagram: &[u8], destination: &Endpoint) -> io::Result<()> {
        (**self).send_to(datagram, destination)
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        (**self).try_receive(buf)
    }
}

/// Non-blocking `UdpSocket` adapter.
///
/// The first resolved address of the current destination is cached, and
/// datagrams from any other source are discarded.
#[derive(Debug)]
pub struct UdpDatagramSocket {
    socket: UdpSocket,
    local_addr: SocketAddr,
    remote: Option<(Endpoint, SocketAddr)>,
}

impl UdpDatagramSocket {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            remote: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote.as_ref().map(|(_, addr)| *addr)
    }

    fn resolve(&mut self, destination: &Endpoint) -> io::Result<SocketAddr> {
        if let Some((endpoint, addr)) = &self.remote {
            if endpoint == destination {
                return Ok(*addr);
            }
        }

        let wants_ipv6 = self.local_addr.is_ipv6();
        let addr = (destination.host.as_str(), destination.port)
            .to_socket_addrs()?
            .find(|addr| addr.is_ipv6() == wants_ipv6)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no usable address for {}", destination),
                )
            })?;

        log::debug!("Resolved {} to {}", destination, addr);
        self.remote = Some((destination.clone(), addr));
        Ok(addr)
    }
}

impl DatagramSocket for UdpDatagramSocket {
    fn send_to(&mut self, datagram: &[u8], destination: &Endpoint) -> io::Result<()> {
        let addr = self.resolve(destination)?;
        match self.socket.send_to(datagram, addr) {
            Ok(_) => Ok(()),
            // the kernel buffer is full, same as a datagram lost on the wire
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        loop {
            match self.socket.recv_from(buf) {
                Ok((size, from)) => {
                    if self.remote_addr() != Some(from) {
                        log::trace!("Ignoring {} bytes from unknown source {}", size, from);
                        continue;
                    }
                    return Ok(Some(size));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                // ICMP port unreachable surfaces here on some platforms
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
