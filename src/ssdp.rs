//! The SSDP engine: multicast presence announcements and discovery
//! responses on UDP 1900.
//!
//! Two long-lived tasks share one send path, serialized by a mutex so a
//! burst is never interleaved with a search reply. The advertiser sends a
//! byebye burst at startup, then alive bursts on a uniform random period;
//! the listener answers M-SEARCH queries with unicast replies. Shutdown
//! stops the advertiser, then the listener, then says byebye.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::state::AppState;

pub const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_PORT: u16 = 1900;

/// Advertisement validity; the refresh interval stays below half of it.
const MAX_AGE_SECS: u64 = 1800;
const MIN_INTERVAL_SECS: u64 = 10;

const NT_ROOTDEVICE: &str = "upnp:rootdevice";
const NT_MEDIASERVER: &str = "urn:schemas-upnp-org:device:MediaServer:1";
const NT_CONTENTDIRECTORY: &str = "urn:schemas-upnp-org:service:ContentDirectory:1";
const NT_CONNECTIONMANAGER: &str = "urn:schemas-upnp-org:service:ConnectionManager:1";
const ST_ALL: &str = "ssdp:all";

/// Everything that goes into an announcement, fixed at startup.
#[derive(Debug, Clone)]
struct Advertisement {
    uuid: String,
    location: String,
    server_ident: String,
}

impl Advertisement {
    fn new(uuid: &str, ip: IpAddr, port: u16) -> Self {
        Advertisement {
            uuid: uuid.to_owned(),
            location: format!("http://{ip}:{port}/location/yada.xml"),
            server_ident: format!(
                "{}/{} UPnP/1.0 YADA-UPNP/1.0",
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
        }
    }
}

/// One `ssdp:alive` NOTIFY. `nt` of `None` is the bare device-UUID
/// announcement, whose USN carries no NT qualifier.
fn alive_message(ad: &Advertisement, nt: Option<&str>) -> String {
    let (nt_line, usn) = match nt {
        Some(nt) => (nt.to_owned(), format!("uuid:{}::{}", ad.uuid, nt)),
        None => (format!("uuid:{}", ad.uuid), format!("uuid:{}", ad.uuid)),
    };
    format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: {SSDP_MULTICAST_ADDR}:{SSDP_PORT}\r\n\
         CACHE-CONTROL: max-age={MAX_AGE_SECS}\r\n\
         LOCATION: {}\r\n\
         NT: {}\r\n\
         NTS: ssdp:alive\r\n\
         USN: {}\r\n\
         SERVER: {}\r\n\
         CONTENT-LENGTH: 0\r\n\r\n",
        ad.location, nt_line, usn, ad.server_ident
    )
}

fn byebye_message(ad: &Advertisement, nt: &str) -> String {
    format!(
        "NOTIFY * HTTP/1.1\r\n\
         HOST: {SSDP_MULTICAST_ADDR}:{SSDP_PORT}\r\n\
         NT: {nt}\r\n\
         NTS: ssdp:byebye\r\n\
         USN: uuid:{}::{nt}\r\n\
         CONTENT-LENGTH: 0\r\n\r\n",
        ad.uuid
    )
}

fn msearch_reply(ad: &Advertisement, st: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         CACHE-CONTROL: max-age={MAX_AGE_SECS}\r\n\
         EXT:\r\n\
         LOCATION: {}\r\n\
         ST: {st}\r\n\
         USN: uuid:{}::{st}\r\n\
         SERVER: {}\r\n\
         CONTENT-LENGTH: 0\r\n\r\n",
        ad.location, ad.uuid, ad.server_ident
    )
}

/// The 5-message alive set, in the announcement order.
fn alive_burst(ad: &Advertisement) -> Vec<String> {
    vec![
        alive_message(ad, Some(NT_ROOTDEVICE)),
        alive_message(ad, None),
        alive_message(ad, Some(NT_MEDIASERVER)),
        alive_message(ad, Some(NT_CONTENTDIRECTORY)),
        alive_message(ad, Some(NT_CONNECTIONMANAGER)),
    ]
}

fn byebye_burst(ad: &Advertisement) -> Vec<String> {
    vec![
        byebye_message(ad, NT_ROOTDEVICE),
        byebye_message(ad, NT_MEDIASERVER),
        byebye_message(ad, NT_CONNECTIONMANAGER),
        byebye_message(ad, NT_CONTENTDIRECTORY),
    ]
}

fn header_value<'a>(message: &'a str, name: &str) -> Option<&'a str> {
    message.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

/// Which search targets an M-SEARCH asks for. Empty means the datagram is
/// malformed or not for us; it gets dropped rather than answered badly.
fn msearch_targets(request: &str) -> Vec<&'static str> {
    if !request.starts_with("M-SEARCH") {
        return Vec::new();
    }
    match header_value(request, "man") {
        Some(man) if man.contains("ssdp:discover") => {}
        _ => return Vec::new(),
    }
    let Some(st) = header_value(request, "st") else {
        return Vec::new();
    };
    if st == ST_ALL {
        return vec![
            NT_ROOTDEVICE,
            NT_MEDIASERVER,
            NT_CONTENTDIRECTORY,
            NT_CONNECTIONMANAGER,
        ];
    }
    for known in [
        NT_ROOTDEVICE,
        NT_MEDIASERVER,
        NT_CONTENTDIRECTORY,
        NT_CONNECTIONMANAGER,
    ] {
        if st == known {
            return vec![known];
        }
    }
    Vec::new()
}

/// The listener socket: bound to the SSDP port, joined to the multicast
/// group on our interface, TTL 1.
fn new_server_socket(local_ip: Ipv4Addr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("could not create SSDP server socket")?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    socket.set_multicast_if_v4(&local_ip)?;
    socket
        .bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, SSDP_PORT)).into())
        .context("could not bind UDP 1900")?;
    socket
        .join_multicast_v4(&SSDP_MULTICAST_ADDR, &local_ip)
        .context("could not join the SSDP multicast group")?;
    socket.set_multicast_ttl_v4(1)?;
    UdpSocket::from_std(socket.into()).context("could not register SSDP socket with the runtime")
}

/// A short-lived send socket: multicast out our interface, TTL 2.
fn new_client_socket(local_ip: Ipv4Addr) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .context("could not create SSDP send socket")?;
    socket.set_nonblocking(true)?;
    socket.set_multicast_if_v4(&local_ip)?;
    socket.set_multicast_ttl_v4(2)?;
    socket.bind(&SocketAddr::from((local_ip, 0)).into())?;
    UdpSocket::from_std(socket.into()).context("could not register SSDP socket with the runtime")
}

/// Send one ordered set of messages from a fresh client socket while
/// holding the send lock.
async fn send_messages(
    lock: &Mutex<()>,
    local_ip: Ipv4Addr,
    messages: &[String],
    dest: SocketAddr,
) -> Result<()> {
    let _guard = lock.lock().await;
    let socket = new_client_socket(local_ip)?;
    for message in messages {
        socket
            .send_to(message.as_bytes(), dest)
            .await
            .context("SSDP send failed")?;
    }
    Ok(())
}

fn multicast_dest() -> SocketAddr {
    SocketAddr::from((SSDP_MULTICAST_ADDR, SSDP_PORT))
}

pub struct SsdpEngine {
    advertiser: JoinHandle<()>,
    listener: JoinHandle<()>,
    advertiser_stop: watch::Sender<bool>,
    listener_stop: watch::Sender<bool>,
    ad: Advertisement,
    local_ip: Ipv4Addr,
    send_lock: Arc<Mutex<()>>,
}

impl SsdpEngine {
    /// Bring the engine up: byebye first, then the initial alive burst,
    /// then steady state.
    pub async fn start(state: &AppState) -> Result<SsdpEngine> {
        let local_ip = match state.host.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => ip,
            _ => Ipv4Addr::UNSPECIFIED,
        };
        let ad = Advertisement::new(&state.config.server.uuid, IpAddr::V4(local_ip), state.port);
        let send_lock = Arc::new(Mutex::new(()));

        // Devices should retract any stale presence before announcing.
        info!("sending ssdp:byebye messages");
        send_messages(&send_lock, local_ip, &byebye_burst(&ad), multicast_dest()).await?;

        let server_socket = new_server_socket(local_ip)?;

        let (advertiser_stop, mut adv_rx) = watch::channel(false);
        let advertiser = {
            let ad = ad.clone();
            let send_lock = send_lock.clone();
            tokio::spawn(async move {
                send_alive(&send_lock, local_ip, &ad).await;
                loop {
                    let secs = {
                        let mut rng = rand::rng();
                        rand::Rng::random_range(&mut rng, MIN_INTERVAL_SECS..=MAX_AGE_SECS / 2)
                    };
                    debug!("next alive burst in {secs}s");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                            send_alive(&send_lock, local_ip, &ad).await;
                        }
                        _ = adv_rx.changed() => break,
                    }
                }
                info!("SSDP advertiser stopped");
            })
        };

        let (listener_stop, mut listen_rx) = watch::channel(false);
        let listener = {
            let ad = ad.clone();
            let send_lock = send_lock.clone();
            let config = state.config.clone();
            tokio::spawn(async move {
                listen_loop(server_socket, ad, send_lock, local_ip, config, &mut listen_rx).await;
                info!("SSDP listener stopped");
            })
        };

        info!("SSDP engine started on {local_ip}:{SSDP_PORT}");
        Ok(SsdpEngine {
            advertiser,
            listener,
            advertiser_stop,
            listener_stop,
            ad,
            local_ip,
            send_lock,
        })
    }

    /// Ordered teardown: the advertiser finishes its current burst and
    /// stops, then the listener, then the final byebye goes out.
    pub async fn shutdown(self) {
        let _ = self.advertiser_stop.send(true);
        let _ = self.advertiser.await;
        let _ = self.listener_stop.send(true);
        let _ = self.listener.await;

        info!("sending ssdp:byebye messages");
        if let Err(e) = send_messages(
            &self.send_lock,
            self.local_ip,
            &byebye_burst(&self.ad),
            multicast_dest(),
        )
        .await
        {
            warn!("final byebye failed: {e}");
        }
    }
}

/// One alive advertisement: the 5-message set twice, back to back, for
/// resilience against multicast loss.
async fn send_alive(lock: &Mutex<()>, local_ip: Ipv4Addr, ad: &Advertisement) {
    let mut messages = alive_burst(ad);
    messages.extend(alive_burst(ad));
    debug_assert_eq!(messages.len(), 10);
    if let Err(e) = send_messages(lock, local_ip, &messages, multicast_dest()).await {
        error!("failed to send alive burst: {e}");
    }
}

async fn listen_loop(
    socket: UdpSocket,
    ad: Advertisement,
    send_lock: Arc<Mutex<()>>,
    local_ip: Ipv4Addr,
    config: Arc<Config>,
    stop: &mut watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; 2048];
    loop {
        tokio::select! {
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, peer)) => {
                        if !config.peer_allowed(peer.ip()) {
                            debug!("dropping SSDP datagram from {peer}: not allowed");
                            continue;
                        }
                        let data = String::from_utf8_lossy(&buf[..len]);
                        handle_datagram(&data, peer, &ad, &send_lock, local_ip).await;
                    }
                    Err(e) => {
                        warn!("SSDP receive error: {e}");
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
            _ = stop.changed() => break,
        }
    }
}

async fn handle_datagram(
    data: &str,
    peer: SocketAddr,
    ad: &Advertisement,
    send_lock: &Mutex<()>,
    local_ip: Ipv4Addr,
) {
    if data.starts_with("M-SEARCH") {
        let targets = msearch_targets(data);
        if targets.is_empty() {
            debug!("ignoring M-SEARCH from {peer} for other targets");
            return;
        }
        debug!("answering M-SEARCH from {peer} with {} replies", targets.len());
        let replies: Vec<String> = targets.iter().map(|st| msearch_reply(ad, st)).collect();
        if let Err(e) = send_messages(send_lock, local_ip, &replies, peer).await {
            warn!("failed to answer M-SEARCH from {peer}: {e}");
        }
    } else if data.starts_with("NOTIFY") {
        debug!("NOTIFY from {peer}, ignored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ad() -> Advertisement {
        Advertisement::new(
            "0a1b2c3d-1111-2222-3333-444455556666",
            "192.168.1.10".parse().unwrap(),
            52323,
        )
    }

    #[test]
    fn alive_burst_order_and_shape() {
        let burst = alive_burst(&ad());
        assert_eq!(burst.len(), 5);
        assert!(burst[0].contains("NT: upnp:rootdevice\r\n"));
        // The bare uuid announcement has no NT qualifier in its USN.
        assert!(burst[1].contains("NT: uuid:0a1b2c3d-1111-2222-3333-444455556666\r\n"));
        assert!(burst[1].contains("USN: uuid:0a1b2c3d-1111-2222-3333-444455556666\r\n"));
        assert!(!burst[1].contains("::"));
        assert!(burst[2].contains("NT: urn:schemas-upnp-org:device:MediaServer:1\r\n"));
        assert!(burst[3].contains("NT: urn:schemas-upnp-org:service:ContentDirectory:1\r\n"));
        assert!(burst[4].contains("NT: urn:schemas-upnp-org:service:ConnectionManager:1\r\n"));

        for message in &burst {
            assert!(message.starts_with("NOTIFY * HTTP/1.1\r\n"));
            assert!(message.contains("HOST: 239.255.255.250:1900\r\n"));
            assert!(message.contains("CACHE-CONTROL: max-age=1800\r\n"));
            assert!(message.contains("LOCATION: http://192.168.1.10:52323/location/yada.xml\r\n"));
            assert!(message.contains("NTS: ssdp:alive\r\n"));
            assert!(message.contains("UPnP/1.0 YADA-UPNP/1.0\r\n"));
            assert!(message.ends_with("CONTENT-LENGTH: 0\r\n\r\n"));
        }
    }

    #[test]
    fn full_advertisement_is_ten_messages() {
        let mut messages = alive_burst(&ad());
        messages.extend(alive_burst(&ad()));
        assert_eq!(messages.len(), 10);
        assert_eq!(messages[0], messages[5]);
        assert_eq!(messages[4], messages[9]);
    }

    #[test]
    fn byebye_is_minimal() {
        let burst = byebye_burst(&ad());
        assert_eq!(burst.len(), 4);
        for message in &burst {
            assert!(message.contains("NTS: ssdp:byebye\r\n"));
            assert!(!message.contains("CACHE-CONTROL"));
            assert!(!message.contains("LOCATION"));
        }
        assert!(burst[0].contains("NT: upnp:rootdevice\r\n"));
        assert!(burst[0]
            .contains("USN: uuid:0a1b2c3d-1111-2222-3333-444455556666::upnp:rootdevice\r\n"));
    }

    #[test]
    fn msearch_target_selection() {
        let request = "M-SEARCH * HTTP/1.1\r\n\
                       HOST: 239.255.255.250:1900\r\n\
                       MAN: \"ssdp:discover\"\r\n\
                       MX: 3\r\n\
                       ST: urn:schemas-upnp-org:device:MediaServer:1\r\n\r\n";
        assert_eq!(msearch_targets(request), vec![NT_MEDIASERVER]);

        let all = request.replace(
            "ST: urn:schemas-upnp-org:device:MediaServer:1",
            "ST: ssdp:all",
        );
        assert_eq!(msearch_targets(&all).len(), 4);

        // MAN is mandatory.
        let no_man = request.replace("MAN: \"ssdp:discover\"\r\n", "");
        assert!(msearch_targets(&no_man).is_empty());

        // Searches for targets we do not offer are dropped.
        let other = request.replace(
            "ST: urn:schemas-upnp-org:device:MediaServer:1",
            "ST: urn:schemas-upnp-org:device:InternetGatewayDevice:1",
        );
        assert!(msearch_targets(&other).is_empty());

        assert!(msearch_targets("NOTIFY * HTTP/1.1\r\n\r\n").is_empty());
    }

    #[test]
    fn msearch_reply_shape() {
        let reply = msearch_reply(&ad(), NT_MEDIASERVER);
        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.contains("EXT:\r\n"));
        assert!(reply.contains("ST: urn:schemas-upnp-org:device:MediaServer:1\r\n"));
        assert!(reply.contains(
            "USN: uuid:0a1b2c3d-1111-2222-3333-444455556666::urn:schemas-upnp-org:device:MediaServer:1\r\n"
        ));
        assert!(reply.contains("LOCATION: http://192.168.1.10:52323/location/yada.xml\r\n"));
        assert!(reply.ends_with("CONTENT-LENGTH: 0\r\n\r\n"));
    }
}
