//! Server network layer: TCP accept loop, datagram routing and the periodic
//! housekeeping tasks

use crate::config::ServerConfig;
use crate::context::{Collaborators, ServerContext};
use crate::dispatch;
use crate::pipeline;
use crate::session_manager::{self, ConnectionEvent};
use bytes::Bytes;
use log::{debug, error, info, warn};
use shared::DATAGRAM_HEADER_SIZE;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;

/// Stops a running [`Server`]
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Bound listeners plus the shared context every connection task uses
pub struct Server {
    context: Arc<ServerContext>,
    listener: TcpListener,
    socket: Arc<UdpSocket>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Server {
    /// Validates the configuration and binds both transports
    ///
    /// Port 0 binds an ephemeral port; the chosen addresses are available
    /// through [`Server::tcp_addr`] and [`Server::udp_addr`].
    pub async fn bind(config: ServerConfig, collaborators: Collaborators) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;

        let listener = TcpListener::bind(config.tcp_addr()).await?;
        let socket = Arc::new(UdpSocket::bind(config.udp_addr()).await?);
        let udp_addr = socket.local_addr()?;
        info!(
            "Server {} listening on tcp {} and udp {}",
            config.server_name,
            listener.local_addr()?,
            udp_addr
        );

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Server {
            context: Arc::new(ServerContext::new(config, collaborators, udp_addr)),
            listener,
            socket,
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }

    pub fn tcp_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn udp_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.context
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Spawns task that routes incoming datagrams to their connection
    ///
    /// Datagrams are encrypted per connection, so routing goes by the peer
    /// address recorded at UDP init rather than by the session field.
    fn spawn_datagram_receiver(&self) {
        let context = Arc::clone(&self.context);
        let socket = Arc::clone(&self.socket);
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; context.config.max_inbound_payload + DATAGRAM_HEADER_SIZE + 2];

            loop {
                tokio::select! {
                    received = socket.recv_from(&mut buffer) => match received {
                        Ok((len, addr)) => {
                            let inbox = {
                                let directory = session_manager::read(&context.directory);
                                directory
                                    .find_by_udp_addr(addr)
                                    .and_then(|id| directory.inbox(id))
                            };
                            match inbox {
                                Some(inbox) => {
                                    let datagram = Bytes::copy_from_slice(&buffer[..len]);
                                    if inbox.send(ConnectionEvent::Datagram(datagram)).is_err() {
                                        debug!("Datagram from {} arrived after its connection ended", addr);
                                    }
                                }
                                None => debug!("Dropping datagram from unknown peer {}", addr),
                            }
                        }
                        Err(e) => {
                            error!("Error receiving datagram: {}", e);
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    },
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    /// Spawns task that monitors connection timeouts
    fn spawn_timeout_checker(&self) {
        let context = Arc::clone(&self.context);
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            let timeout = context.config.idle_timeout();

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let timed_out = {
                            let mut directory = session_manager::write(&context.directory);
                            directory
                                .check_timeouts(timeout)
                                .into_iter()
                                .filter_map(|id| directory.inbox(id).map(|inbox| (id, inbox)))
                                .collect::<Vec<_>>()
                        };

                        for (id, inbox) in timed_out {
                            warn!("Session {} timed out", id);
                            if inbox.send(ConnectionEvent::TimedOut).is_err() {
                                debug!("Session {} already gone", id);
                            }
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn spawn_watchdog(&self) {
        tokio::spawn(dispatch::run_watchdog(
            Arc::clone(&self.context.monitor),
            self.context.config.watchdog_interval(),
            self.shutdown_tx.subscribe(),
        ));
    }

    /// Accepts connections until shut down, then closes every connection
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_datagram_receiver();
        self.spawn_timeout_checker();
        self.spawn_watchdog();

        let mut shutdown = self.shutdown_tx.subscribe();
        info!("Server started successfully");

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        debug!("Accepted connection from {}", addr);
                        tokio::spawn(pipeline::run_connection(
                            Arc::clone(&self.context),
                            stream,
                            addr,
                            Arc::clone(&self.socket),
                        ));
                    }
                    Err(e) => {
                        error!("Accept failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        info!("Server shutting down");
        self.context.monitor.close();
        let directory = session_manager::read(&self.context.directory);
        for id in directory.session_ids() {
            if let Some(handle) = directory.handle(id) {
                handle.outbound.close();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ephemeral() -> ServerConfig {
        ServerConfig {
            tcp_port: 0,
            udp_port: 0,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_ephemeral_ports() {
        let server = tokio_test::assert_ok!(Server::bind(ephemeral(), Collaborators::in_memory()).await);
        assert_ne!(server.tcp_addr().unwrap().port(), 0);
        assert_eq!(server.context().udp_addr, server.udp_addr().unwrap());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = ServerConfig {
            max_clients: 0,
            ..ephemeral()
        };
        assert!(Server::bind(config, Collaborators::in_memory()).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_run() {
        let server = Server::bind(ephemeral(), Collaborators::in_memory()).await.unwrap();
        let handle = server.shutdown_handle();
        let task = tokio::spawn(async move { server.run().await.is_ok() });
        handle.shutdown();
        let finished = tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert!(finished);
    }
}
