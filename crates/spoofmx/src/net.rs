use std::fmt;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

use dns_types::protocol::types::{HEADER_LEN, UDP_MAX_MESSAGE_LEN};

/// Bind the listening socket.
///
/// # Errors
///
/// If the address cannot be bound.
pub async fn bind_udp(address: SocketAddr) -> Result<UdpSocket, BindError> {
    UdpSocket::bind(address)
        .await
        .map_err(|error| BindError::from_io(address, error))
}

/// Why the listening socket could not be bound.  Startup gives up on
/// any of these.
#[derive(Debug)]
pub enum BindError {
    PermissionDenied { address: SocketAddr },
    AddressInUse { address: SocketAddr },
    Other { address: SocketAddr, error: io::Error },
}

impl BindError {
    pub fn from_io(address: SocketAddr, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::PermissionDenied => BindError::PermissionDenied { address },
            io::ErrorKind::AddrInUse => BindError::AddressInUse { address },
            _ => BindError::Other { address, error },
        }
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BindError::PermissionDenied { address } => write!(
                f,
                "permission denied binding {address}: run as root (or with CAP_NET_BIND_SERVICE), or pick an unprivileged port such as --port 5353"
            ),
            BindError::AddressInUse { address } => write!(
                f,
                "{address} is already in use: find the process holding it (e.g. `ss -ulnp 'sport = :{}'`) and stop it",
                address.port()
            ),
            BindError::Other { address, error } => {
                write!(f, "could not bind {address}: {error}")
            }
        }
    }
}

impl std::error::Error for BindError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BindError::Other { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Write a serialised message to a UDP socket.  Messages are never
/// cut to fit: the caller must already have made them small enough.
///
/// # Errors
///
/// If the message is shorter than a header or longer than 512 octets,
/// or the send fails.
pub async fn send_udp_bytes_to(
    sock: &UdpSocket,
    target: SocketAddr,
    bytes: &[u8],
) -> Result<(), io::Error> {
    check_udp_len(bytes)?;
    sock.send_to(bytes, target).await?;
    Ok(())
}

fn check_udp_len(bytes: &[u8]) -> Result<(), io::Error> {
    if bytes.len() < HEADER_LEN {
        tracing::error!(length = %bytes.len(), "message too short");
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "message shorter than a header",
        ));
    }
    if bytes.len() > UDP_MAX_MESSAGE_LEN {
        tracing::error!(length = %bytes.len(), "message too long");
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "message longer than a UDP datagram",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sends_anything_from_a_header_to_512_octets() {
        for len in [HEADER_LEN, 100, UDP_MAX_MESSAGE_LEN] {
            assert!(check_udp_len(&vec![0; len]).is_ok());
        }
    }

    #[test]
    fn refuses_short_messages() {
        let error = check_udp_len(&[0; HEADER_LEN - 1]).unwrap_err();
        assert_eq!(io::ErrorKind::InvalidInput, error.kind());
    }

    #[test]
    fn refuses_to_cut_long_messages() {
        let error = check_udp_len(&[0; UDP_MAX_MESSAGE_LEN + 1]).unwrap_err();
        assert_eq!(io::ErrorKind::InvalidInput, error.kind());
    }

    #[tokio::test]
    async fn long_messages_are_not_sent() {
        let sender = bind_udp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let receiver = bind_udp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let target = receiver.local_addr().unwrap();

        assert!(send_udp_bytes_to(&sender, target, &[0; 600]).await.is_err());
        send_udp_bytes_to(&sender, target, &[7; HEADER_LEN]).await.unwrap();

        // the first datagram through is the short one
        let mut buf = [0; 1024];
        let (size, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!([7; HEADER_LEN], buf[..size]);
    }

    #[test]
    fn bind_error_classification() {
        let address: SocketAddr = "0.0.0.0:53".parse().unwrap();

        assert!(matches!(
            BindError::from_io(address, io::ErrorKind::PermissionDenied.into()),
            BindError::PermissionDenied { .. }
        ));
        assert!(matches!(
            BindError::from_io(address, io::ErrorKind::AddrInUse.into()),
            BindError::AddressInUse { .. }
        ));
        assert!(matches!(
            BindError::from_io(address, io::ErrorKind::AddrNotAvailable.into()),
            BindError::Other { .. }
        ));

        let message = BindError::PermissionDenied { address }.to_string();
        assert!(message.contains("--port 5353"));
        let message = BindError::AddressInUse { address }.to_string();
        assert!(message.contains("already in use"));
    }

    #[tokio::test]
    async fn bind_reports_address_in_use() {
        let first = bind_udp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let address = first.local_addr().unwrap();

        assert!(matches!(
            bind_udp(address).await,
            Err(BindError::AddressInUse { .. })
        ));
    }
}
