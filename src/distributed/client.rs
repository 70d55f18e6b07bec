//! Client side of the session protocol
//!
//! Used by `--mode client` to drive a coordinator end to end, and by the
//! integration tests.
//!
//! Worker ids are assigned from 0 in the order the ports are reported, so
//! the index of a port in [`Client::request_workers`]'s result is the id
//! that `QUERY_MAX_SUM_WORKER` answers with.

use crate::distributed::protocol::{
    parse_port_datagram, read_message, write_message, ControlMessage,
};
use crate::error::SessionError;
use crate::Result;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::Serialize;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, info, warn};

/// Bound a network step by `timeout`
async fn timed<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| SessionError::IdleTimeout(timeout))?
        .map_err(SessionError::from)
}

/// UDP socket the coordinator's port datagram arrives on
pub struct DiscoveryListener {
    socket: UdpSocket,
}

impl DiscoveryListener {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket })
    }

    pub fn local_port(&self) -> Result<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Wait for a port datagram
    ///
    /// Returns the coordinator's address: the datagram's source IP with the
    /// advertised port. Malformed datagrams are skipped.
    pub async fn recv_port(&self, timeout: Duration) -> Result<SocketAddr> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut buf = [0u8; 64];

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let (len, from) = timed(remaining, self.socket.recv_from(&mut buf)).await?;
            match parse_port_datagram(&buf[..len]) {
                Some(port) => {
                    debug!("Port datagram from {}: {}", from, port);
                    return Ok(SocketAddr::new(from.ip(), port));
                }
                None => warn!("Ignoring malformed datagram from {}", from),
            }
        }
    }
}

/// Primary connection to a coordinator
pub struct Client {
    stream: TcpStream,
    coordinator: IpAddr,
    timeout: Duration,
}

impl Client {
    /// Wait for the coordinator's datagram and open the primary stream
    ///
    /// `timeout` bounds the wait for the datagram and every later step.
    pub async fn connect(listener: &DiscoveryListener, timeout: Duration) -> Result<Self> {
        let addr = listener.recv_port(timeout).await?;
        let stream = timed(timeout, TcpStream::connect(addr)).await?;
        stream.set_nodelay(true)?;
        info!("Connected to coordinator at {}", addr);

        Ok(Self {
            stream,
            coordinator: addr.ip(),
            timeout,
        })
    }

    /// Send the worker count and read back one port per worker
    ///
    /// A port of `-1` means that worker could not bind.
    pub async fn request_workers(&mut self, count: i32) -> Result<Vec<i32>> {
        timed(self.timeout, write_message(&mut self.stream, count)).await?;

        let mut ports = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            ports.push(timed(self.timeout, read_message(&mut self.stream)).await?);
        }
        Ok(ports)
    }

    /// Open the data stream to one worker
    pub async fn open_stream(&self, port: i32) -> Result<WorkerStream> {
        let port = u16::try_from(port)
            .ok()
            .filter(|&p| p != 0)
            .ok_or_else(|| {
                SessionError::ProtocolViolation(format!("invalid worker port {}", port))
            })?;

        let stream = timed(self.timeout, TcpStream::connect((self.coordinator, port))).await?;
        stream.set_nodelay(true)?;
        Ok(WorkerStream {
            stream,
            timeout: self.timeout,
        })
    }

    /// Send a query and wait for its answer
    pub async fn query(&mut self, query: ControlMessage) -> Result<i32> {
        self.query_code(query.value()).await
    }

    /// Send a raw query code and wait for its answer
    pub async fn query_code(&mut self, code: i32) -> Result<i32> {
        timed(self.timeout, write_message(&mut self.stream, code)).await?;
        timed(self.timeout, read_message(&mut self.stream)).await
    }

    /// End the session
    pub async fn close(mut self) -> Result<()> {
        timed(
            self.timeout,
            write_message(&mut self.stream, ControlMessage::CloseConnection.value()),
        )
        .await?;
        timed(self.timeout, self.stream.shutdown()).await
    }
}

/// Data stream to one worker
pub struct WorkerStream {
    stream: TcpStream,
    timeout: Duration,
}

impl WorkerStream {
    /// Send one data value
    ///
    /// `0` is the stream terminator and cannot be sent as data.
    pub async fn send(&mut self, value: i32) -> Result<()> {
        if ControlMessage::is_stream_terminator(value) {
            return Err(SessionError::ProtocolViolation(
                "0 is reserved for TERMINATE_STREAM".to_string(),
            ));
        }
        timed(self.timeout, write_message(&mut self.stream, value)).await
    }

    /// Terminate the stream and wait until the worker has drained it
    ///
    /// The worker closes its side only after applying every earlier value,
    /// so once this returns all of them are visible to queries.
    pub async fn finish(mut self) -> Result<()> {
        timed(
            self.timeout,
            write_message(&mut self.stream, ControlMessage::TerminateStream.value()),
        )
        .await?;

        let mut buf = [0u8; 16];
        loop {
            let n = timed(self.timeout, self.stream.read(&mut buf)).await?;
            if n == 0 {
                return Ok(());
            }
        }
    }
}

/// Generated workload for client mode
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub workers: u32,
    pub numbers_per_worker: usize,
    pub seed: u64,
}

impl LoadPlan {
    /// Non-zero values in `[-1000, 1000]` for each worker
    pub fn generate(&self) -> Vec<Vec<i32>> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed);
        (0..self.workers)
            .map(|_| {
                (0..self.numbers_per_worker)
                    .map(|_| loop {
                        let value = rng.gen_range(-1000..=1000);
                        if value != 0 {
                            break value;
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

/// What the client sent, what the coordinator answered, and whether they agree
#[derive(Debug, Clone, Serialize)]
pub struct ClientReport {
    pub ports: Vec<i32>,
    pub expected_sum: i64,
    pub expected_count: u64,
    pub expected_max_worker: Option<u32>,
    pub reported_sum: i32,
    pub reported_count: i32,
    pub reported_max_worker: i32,
    pub verified: bool,
}

/// Run one full session: stream the plan's values, query, verify, close
pub async fn run_load(
    listener: &DiscoveryListener,
    plan: &LoadPlan,
    timeout: Duration,
) -> Result<ClientReport> {
    let mut client = Client::connect(listener, timeout).await?;
    let ports = client.request_workers(plan.workers as i32).await?;
    info!("Workers listening on ports {:?}", ports);

    let streams = plan.generate();
    let mut tasks = Vec::with_capacity(streams.len());
    for (&port, values) in ports.iter().zip(streams.iter().cloned()) {
        let mut stream = client.open_stream(port).await?;
        tasks.push(tokio::spawn(async move {
            for value in values {
                stream.send(value).await?;
            }
            stream.finish().await
        }));
    }
    for task in tasks {
        task.await.map_err(|e| {
            SessionError::Transport(std::io::Error::new(std::io::ErrorKind::Other, e))
        })??;
    }

    let sums: Vec<i64> = streams
        .iter()
        .map(|values| values.iter().map(|&v| v as i64).sum())
        .collect();
    let expected_sum: i64 = sums.iter().sum();
    let expected_count = streams.iter().map(|values| values.len() as u64).sum();
    let expected_max_worker = sums
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, i64)>, (i, &sum)| match best {
            Some((_, best_sum)) if sum <= best_sum => best,
            _ => Some((i, sum)),
        })
        .map(|(i, _)| i as u32);

    let reported_sum = client.query(ControlMessage::QuerySumComplete).await?;
    let reported_count = client.query(ControlMessage::QueryNumberCount).await?;
    let reported_max_worker = client.query(ControlMessage::QueryMaxSumWorker).await?;
    client.close().await?;

    let verified = reported_sum as i64 == expected_sum
        && reported_count as u64 == expected_count
        && expected_max_worker.map(|id| id as i32) == Some(reported_max_worker);

    Ok(ClientReport {
        ports,
        expected_sum,
        expected_count,
        expected_max_worker,
        reported_sum,
        reported_count,
        reported_max_worker,
        verified,
    })
}
