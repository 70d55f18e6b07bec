//! Connection rendezvous
//!
//! The coordinator has no pre-shared port. It binds a listener on any free
//! port and advertises that port to the client with a UDP datagram,
//! resending after every accept timeout until the client connects or the
//! retries run out.
//!
//! Workers skip the datagram step: their ports reach the client over the
//! already-established primary channel, so a worker binds and then waits
//! for a single connection.

use crate::config::{Config, NetworkConfig};
use crate::distributed::endpoint::Endpoint;
use crate::distributed::protocol::port_datagram;
use crate::error::SessionError;
use crate::Result;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Resolve the client host and discovery port to one address
///
/// Only addresses the listener on `bind` can accept a connection from are
/// considered: an IPv4 bind needs an IPv4 client, a specific IPv6 bind an
/// IPv6 client. The IPv6 wildcard accepts both and prefers IPv4.
/// Resolution is bounded by `timeout` like every other blocking step.
pub async fn resolve_host(
    host: &str,
    port: u16,
    bind: IpAddr,
    timeout: Duration,
) -> Result<SocketAddr> {
    let host = host.trim();
    if host.is_empty() {
        return Err(SessionError::UnresolvableHost("<empty>".to_string()));
    }

    let addrs = tokio::time::timeout(timeout, tokio::net::lookup_host((host, port)))
        .await
        .map_err(|_| SessionError::UnresolvableHost(format!("{} (lookup timed out)", host)))?
        .map_err(|e| SessionError::UnresolvableHost(format!("{} ({})", host, e)))?;

    select_address(addrs, bind).ok_or_else(|| {
        SessionError::UnresolvableHost(format!("{} (no address reachable from {})", host, bind))
    })
}

/// First resolved address whose family a listener on `bind` accepts
fn select_address(
    addrs: impl IntoIterator<Item = SocketAddr>,
    bind: IpAddr,
) -> Option<SocketAddr> {
    let addrs: Vec<SocketAddr> = addrs.into_iter().collect();
    match bind {
        IpAddr::V4(_) => addrs.iter().find(|a| a.is_ipv4()).copied(),
        IpAddr::V6(ip) if ip.is_unspecified() => addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied(),
        IpAddr::V6(_) => addrs.iter().find(|a| a.is_ipv6()).copied(),
    }
}

/// Establish the primary channel with the client
///
/// Resolves the client first, so an unresolvable host fails before any
/// socket is bound. Sends at most `retries` datagrams. On failure the
/// listening socket is closed before returning.
pub async fn primary_rendezvous(config: &Config) -> Result<Endpoint> {
    let network = &config.network;
    let retries = config.rendezvous.retries;
    let retry_timeout = config.rendezvous.retry_timeout();

    let client = resolve_host(
        &network.client_host,
        network.discovery_port,
        network.bind_address,
        retry_timeout,
    )
    .await?;
    info!("Client {} resolved to {}", network.client_host, client);

    let mut endpoint = Endpoint::new();
    let port = endpoint
        .bind(network.bind_address, network.min_port, network.max_port)
        .await?;
    info!("Listening for client on port {}", port);

    match advertise(&mut endpoint, port, client, retries, retry_timeout).await {
        Ok(peer) => {
            info!("Client {} connected to port {}", peer, port);
            Ok(endpoint)
        }
        Err(e) => {
            endpoint.close().await;
            Err(e)
        }
    }
}

/// Send the port datagram and wait for the client, up to `retries` times
async fn advertise(
    endpoint: &mut Endpoint,
    port: u16,
    client: SocketAddr,
    retries: u32,
    retry_timeout: Duration,
) -> Result<SocketAddr> {
    let socket = UdpSocket::bind(unspecified_for(client)).await?;
    let payload = port_datagram(port);

    for attempt in 1..=retries {
        info!("Sending port datagram, waiting for client.. {}/{}", attempt, retries);
        socket.send_to(&payload, client).await?;

        match endpoint.accept(retry_timeout).await {
            Ok(peer) => return Ok(peer),
            Err(SessionError::IdleTimeout(_)) => {
                debug!("No connection within {:?}", retry_timeout);
            }
            Err(e) => return Err(e),
        }
    }

    warn!("Client did not connect after {} datagrams", retries);
    Err(SessionError::RendezvousTimeout { port, attempts: retries })
}

/// Bind a worker's listener in the configured port range
pub async fn bind_worker(endpoint: &mut Endpoint, network: &NetworkConfig) -> Result<u16> {
    endpoint
        .bind(network.bind_address, network.min_port, network.max_port)
        .await
}

/// Wait once for the client to open a worker's stream
pub async fn accept_worker(endpoint: &mut Endpoint, timeout: Duration) -> Result<SocketAddr> {
    match endpoint.accept(timeout).await {
        Err(SessionError::IdleTimeout(_)) => Err(SessionError::RendezvousTimeout {
            port: endpoint.local_port().unwrap_or(0),
            attempts: 1,
        }),
        other => other,
    }
}

fn unspecified_for(peer: SocketAddr) -> SocketAddr {
    let ip = match peer {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::endpoint::ConnectionState;
    use crate::distributed::protocol::parse_port_datagram;
    use tokio::net::TcpStream;

    fn local_config(discovery_port: u16, min_port: u16) -> Config {
        let mut config = Config::default();
        config.network.client_host = "127.0.0.1".to_string();
        config.network.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.network.discovery_port = discovery_port;
        config.network.min_port = min_port;
        config.rendezvous.retries = 3;
        config.rendezvous.retry_timeout_ms = 100;
        config
    }

    const ANY_V4: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    const ANY_V6: IpAddr = IpAddr::V6(Ipv6Addr::UNSPECIFIED);
    const WAIT: Duration = Duration::from_secs(1);

    fn addrs(list: &[&str]) -> Vec<SocketAddr> {
        list.iter().map(|a| a.parse().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = resolve_host("127.0.0.1", 3126, ANY_V4, WAIT).await.unwrap();
        assert_eq!(addr, "127.0.0.1:3126".parse().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_empty_host() {
        let err = resolve_host("  ", 3126, ANY_V4, WAIT).await.unwrap_err();
        assert!(matches!(err, SessionError::UnresolvableHost(_)));
    }

    #[tokio::test]
    async fn test_resolve_ipv6_client_for_ipv4_listener() {
        let err = resolve_host("::1", 3126, ANY_V4, WAIT).await.unwrap_err();
        assert!(matches!(err, SessionError::UnresolvableHost(_)));

        let addr = resolve_host("::1", 3126, ANY_V6, WAIT).await.unwrap();
        assert_eq!(addr, "[::1]:3126".parse().unwrap());
    }

    #[test]
    fn test_select_address_matches_bind_family() {
        let mixed = addrs(&["[::1]:3126", "127.0.0.1:3126"]);

        // IPv4 listener skips the IPv6 address listed first
        assert_eq!(
            select_address(mixed.clone(), ANY_V4),
            Some("127.0.0.1:3126".parse().unwrap())
        );
        // IPv6 wildcard takes either family and prefers IPv4
        assert_eq!(
            select_address(mixed.clone(), ANY_V6),
            Some("127.0.0.1:3126".parse().unwrap())
        );
        assert_eq!(
            select_address(addrs(&["[::1]:3126"]), ANY_V6),
            Some("[::1]:3126".parse().unwrap())
        );
        // Specific IPv6 listener needs an IPv6 client
        assert_eq!(
            select_address(mixed, IpAddr::V6(Ipv6Addr::LOCALHOST)),
            Some("[::1]:3126".parse().unwrap())
        );
        assert_eq!(select_address(addrs(&["[::1]:3126"]), ANY_V4), None);
        assert_eq!(select_address(Vec::new(), ANY_V6), None);
    }

    #[tokio::test]
    async fn test_unresolvable_host_fails_before_binding() {
        let mut config = local_config(3126, 27000);
        config.network.client_host = String::new();
        let err = primary_rendezvous(&config).await.unwrap_err();
        assert!(matches!(err, SessionError::UnresolvableHost(_)));
    }

    #[tokio::test]
    async fn test_client_connects_after_datagram() {
        let discovery = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let discovery_port = discovery.local_addr().unwrap().port();
        let config = local_config(discovery_port, 27100);

        let client = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            let (len, from) = discovery.recv_from(&mut buf).await.unwrap();
            let port = parse_port_datagram(&buf[..len]).unwrap();
            TcpStream::connect((from.ip(), port)).await.unwrap()
        });

        let endpoint = primary_rendezvous(&config).await.unwrap();
        assert_eq!(endpoint.state(), ConnectionState::Connected);
        let _stream = client.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_sends_one_datagram_per_retry() {
        let discovery = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let discovery_port = discovery.local_addr().unwrap().port();
        let config = local_config(discovery_port, 27200);

        let err = primary_rendezvous(&config).await.unwrap_err();
        let port = match err {
            SessionError::RendezvousTimeout { port, attempts } => {
                assert_eq!(attempts, 3);
                port
            }
            other => panic!("unexpected error: {:?}", other),
        };

        // Exactly one datagram per attempt, each carrying the bound port
        let mut buf = [0u8; 16];
        let wait = Duration::from_millis(200);
        for _ in 0..3 {
            let (len, _) = tokio::time::timeout(wait, discovery.recv_from(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(parse_port_datagram(&buf[..len]), Some(port));
        }
        assert!(tokio::time::timeout(wait, discovery.recv_from(&mut buf)).await.is_err());

        // Listener was released
        let mut endpoint = Endpoint::new();
        let rebound = endpoint
            .bind(IpAddr::V4(Ipv4Addr::LOCALHOST), port, port + 1)
            .await
            .unwrap();
        assert_eq!(rebound, port);
    }

    #[tokio::test]
    async fn test_worker_accept_timeout() {
        let mut endpoint = Endpoint::new();
        let network = local_config(3126, 27300).network;
        let port = bind_worker(&mut endpoint, &network).await.unwrap();
        let err = accept_worker(&mut endpoint, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::RendezvousTimeout { port: p, attempts: 1 } if p == port
        ));
    }
}
