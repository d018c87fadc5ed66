//! End-to-end tests over a live server on an ephemeral port: raw HTTP/1.1
//! exchanges so response headers and byte-exact bodies can be checked.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

use yada::cds::{ContentTree, ROOT_ID};
use yada::config::{AccessConfig, Config, ServerConfig};
use yada::media::{DlnaProfile, HashProvider, MediaKind, Md5Hash, Resource};
use yada::state::AppState;
use yada::web;

const TEST_UUID: &str = "f81d4fae-7dec-11d0-a765-00a0c91e6bf6";

struct TestServer {
    addr: SocketAddr,
    #[allow(dead_code)]
    docs: TempDir,
}

fn audio_resource(path: &Path, size: u64, duration_micros: Option<u64>) -> Resource {
    Resource {
        path: path.to_path_buf(),
        size,
        duration_micros,
        bitrate: None,
        sample_rate: None,
        channels: None,
        width: None,
        height: None,
        profile: DlnaProfile::Mp3,
        kind: MediaKind::Audio,
    }
}

/// Bring up a server with a few known items and a document root.
async fn start_server(enforce_empty_allowlist: bool) -> (TestServer, Vec<String>) {
    let docs = TempDir::new().unwrap();
    let doc_root = docs.path().to_path_buf();
    std::fs::write(doc_root.join("hello.txt"), b"hello from the doc root").unwrap();

    // A 4000-byte "track" with recognizable content for range checks, and
    // a 1000-byte one with a known duration for time seeks.
    let track_path = doc_root.join("track.mp3");
    let track_bytes: Vec<u8> = (0..4000u32).map(|i| (i % 251) as u8).collect();
    std::fs::write(&track_path, &track_bytes).unwrap();

    let timed_path = doc_root.join("timed.mp3");
    std::fs::write(&timed_path, vec![7u8; 1000]).unwrap();

    let mut tree = ContentTree::new(Arc::new(Md5Hash));
    let track_id = tree
        .add_item(audio_resource(&track_path, 4000, None), ROOT_ID)
        .unwrap();
    let timed_id = tree
        .add_item(
            audio_resource(&timed_path, 1000, Some(10_000_000)),
            ROOT_ID,
        )
        .unwrap();

    let config = Config {
        server: ServerConfig {
            ip_address: "127.0.0.1".into(),
            port: 0,
            doc_root_path: doc_root,
            uuid: TEST_UUID.into(),
            announce_as: "YADA".into(),
            samsung_extensions: true,
        },
        access: AccessConfig {
            allowed_ips: Vec::new(),
            enforce: enforce_empty_allowlist,
        },
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = AppState {
        config: Arc::new(config),
        tree: Arc::new(RwLock::new(tree)),
        host: "127.0.0.1".into(),
        port: addr.port(),
    };
    tokio::spawn(web::serve(listener, state));

    (TestServer { addr, docs }, vec![track_id, timed_id])
}

/// One request, one response: the server closes the connection, so the
/// whole exchange is a single write followed by read-to-end.
async fn raw_request(addr: SocketAddr, request: &str) -> (String, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();

    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("no header terminator in response");
    let head = String::from_utf8_lossy(&response[..split]).into_owned();
    let body = response[split + 4..].to_vec();
    (head, body)
}

fn header_of<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(value.trim())
        } else {
            None
        }
    })
}

fn browse_envelope(object_id: &str, flag: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:Browse xmlns:u="urn:schemas-upnp-org:service:ContentDirectory:1"><ObjectID>{object_id}</ObjectID><BrowseFlag>{flag}</BrowseFlag><Filter>*</Filter><StartingIndex>0</StartingIndex><RequestedCount>0</RequestedCount><SortCriteria></SortCriteria></u:Browse></s:Body></s:Envelope>"#
    )
}

fn soap_post(addr: SocketAddr, body: &str) -> String {
    format!(
        "POST /cds/control/ContentDirectory1 HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Content-Type: text/xml; charset=\"utf-8\"\r\n\
         SOAPACTION: \"urn:schemas-upnp-org:service:ContentDirectory:1#Browse\"\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    )
}

#[tokio::test]
async fn browse_root_lists_the_three_virtual_folders() {
    let (server, _) = start_server(false).await;
    let body = browse_envelope(ROOT_ID, "BrowseDirectChildren");
    let (head, response_body) = raw_request(server.addr, &soap_post(server.addr, &body)).await;

    assert!(head.starts_with("HTTP/1.1 200"), "{head}");
    let text = String::from_utf8_lossy(&response_body);
    assert!(text.contains("<NumberReturned>3</NumberReturned>"));
    assert!(text.contains("<TotalMatches>3</TotalMatches>"));
    for name in ["Music", "Photo", "Video"] {
        assert!(text.contains(&format!("&lt;dc:title&gt;{name}&lt;/dc:title&gt;")));
    }

    // Mandatory response headers on every exchange.
    assert_eq!(header_of(&head, "connection"), Some("close"));
    assert_eq!(header_of(&head, "server"), Some("YADA-HTTP/1.0"));
    assert!(header_of(&head, "ext").is_some());
    let date = header_of(&head, "date").unwrap();
    assert!(date.ends_with("GMT"));
    // The advertised length matches the bytes actually sent.
    let content_length: usize = header_of(&head, "content-length").unwrap().parse().unwrap();
    assert_eq!(content_length, response_body.len());
}

#[tokio::test]
async fn browse_unknown_object_faults_with_701() {
    let (server, _) = start_server(false).await;
    let body = browse_envelope("deadbeefdeadbeefdeadbeefdeadbeef", "BrowseMetadata");
    let (head, response_body) = raw_request(server.addr, &soap_post(server.addr, &body)).await;

    assert!(head.starts_with("HTTP/1.1 500"), "{head}");
    let text = String::from_utf8_lossy(&response_body);
    assert!(text.contains("<errorCode>701</errorCode>"));
    assert!(text.contains("UPnPError"));
}

#[tokio::test]
async fn media_range_request_returns_exact_bytes() {
    let (server, ids) = start_server(false).await;
    let track_id = &ids[0];

    let request = format!(
        "GET /{track_id}.mp3 HTTP/1.1\r\nHost: {}\r\nRange: bytes=1000-1999\r\nConnection: close\r\n\r\n",
        server.addr
    );
    let (head, body) = raw_request(server.addr, &request).await;

    assert!(head.starts_with("HTTP/1.1 206"), "{head}");
    assert_eq!(
        header_of(&head, "content-range"),
        Some("bytes 1000-1999/4000")
    );
    assert_eq!(header_of(&head, "content-length"), Some("1000"));
    assert_eq!(header_of(&head, "content-type"), Some("audio/mpeg"));
    assert_eq!(body.len(), 1000);
    let expected: Vec<u8> = (1000..2000u32).map(|i| (i % 251) as u8).collect();
    assert_eq!(body, expected);
}

#[tokio::test]
async fn media_without_range_returns_full_content() {
    let (server, ids) = start_server(false).await;
    let request = format!(
        "GET /{}.mp3 HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        ids[0], server.addr
    );
    let (head, body) = raw_request(server.addr, &request).await;
    assert!(head.starts_with("HTTP/1.1 200"), "{head}");
    assert_eq!(body.len(), 4000);
}

#[tokio::test]
async fn time_seek_maps_to_proportional_byte_range() {
    let (server, ids) = start_server(false).await;
    let timed_id = &ids[1];

    // 10 s over 1000 bytes: npt=2- begins at byte 200.
    let request = format!(
        "GET /{timed_id}.mp3 HTTP/1.1\r\nHost: {}\r\nTimeSeekRange.dlna.org: npt=2-\r\nConnection: close\r\n\r\n",
        server.addr
    );
    let (head, body) = raw_request(server.addr, &request).await;
    assert!(head.starts_with("HTTP/1.1 206"), "{head}");
    assert_eq!(header_of(&head, "content-range"), Some("bytes 200-999/1000"));
    assert_eq!(body.len(), 800);

    // The range-less track has no probed duration: time seek cannot be
    // satisfied there.
    let request = format!(
        "GET /{}.mp3 HTTP/1.1\r\nHost: {}\r\nTimeSeekRange.dlna.org: npt=2-\r\nConnection: close\r\n\r\n",
        ids[0], server.addr
    );
    let (head, _) = raw_request(server.addr, &request).await;
    assert!(head.starts_with("HTTP/1.1 416"), "{head}");
}

#[tokio::test]
async fn invalid_dlna_headers_are_rejected() {
    let (server, ids) = start_server(false).await;

    let request = format!(
        "GET /{}.mp3 HTTP/1.1\r\nHost: {}\r\ntransferMode.dlna.org: Bulk\r\nConnection: close\r\n\r\n",
        ids[0], server.addr
    );
    let (head, body) = raw_request(server.addr, &request).await;
    assert!(head.starts_with("HTTP/1.1 400"), "{head}");
    assert_eq!(header_of(&head, "content-length"), Some("0"));
    assert!(body.is_empty());

    let request = format!(
        "GET /{}.mp3 HTTP/1.1\r\nHost: {}\r\ngetcontentFeatures.dlna.org: 0\r\nConnection: close\r\n\r\n",
        ids[0], server.addr
    );
    let (head, _) = raw_request(server.addr, &request).await;
    assert!(head.starts_with("HTTP/1.1 400"), "{head}");

    // Interactive transfers must not carry a time seek.
    let request = format!(
        "GET /{}.mp3 HTTP/1.1\r\nHost: {}\r\ntransferMode.dlna.org: Interactive\r\nTimeSeekRange.dlna.org: npt=0-\r\nConnection: close\r\n\r\n",
        ids[0], server.addr
    );
    let (head, _) = raw_request(server.addr, &request).await;
    assert!(head.starts_with("HTTP/1.1 400"), "{head}");

    let request = format!(
        "GET /{}.mp3 HTTP/1.1\r\nHost: {}\r\nRange: bytes=9999999-\r\nConnection: close\r\n\r\n",
        ids[0], server.addr
    );
    let (head, _) = raw_request(server.addr, &request).await;
    assert!(head.starts_with("HTTP/1.1 416"), "{head}");
}

#[tokio::test]
async fn descriptions_and_scpds_are_served() {
    let (server, _) = start_server(false).await;

    let request = format!(
        "GET /location/yada.xml HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        server.addr
    );
    let (head, body) = raw_request(server.addr, &request).await;
    assert!(head.starts_with("HTTP/1.1 200"), "{head}");
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("<friendlyName>YADA</friendlyName>"));
    assert!(text.contains(&format!("<UDN>uuid:{TEST_UUID}</UDN>")));

    for (path, marker) in [
        ("/cds.xml", "<name>Browse</name>"),
        ("/cms.xml", "<name>GetProtocolInfo</name>"),
    ] {
        let request = format!(
            "GET {path} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            server.addr
        );
        let (head, body) = raw_request(server.addr, &request).await;
        assert!(head.starts_with("HTTP/1.1 200"), "{head}");
        assert!(String::from_utf8_lossy(&body).contains(marker));
    }
}

#[tokio::test]
async fn event_endpoints_are_not_implemented() {
    let (server, _) = start_server(false).await;
    let request = format!(
        "SUBSCRIBE /cds/event/ContentDirectory1 HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        server.addr
    );
    let (head, _) = raw_request(server.addr, &request).await;
    assert!(head.starts_with("HTTP/1.1 501"), "{head}");
}

#[tokio::test]
async fn doc_root_files_and_missing_paths() {
    let (server, _) = start_server(false).await;

    let request = format!(
        "GET /hello.txt HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        server.addr
    );
    let (head, body) = raw_request(server.addr, &request).await;
    assert!(head.starts_with("HTTP/1.1 200"), "{head}");
    assert_eq!(body, b"hello from the doc root");

    let request = format!(
        "GET /no-such-file.txt HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        server.addr
    );
    let (head, body) = raw_request(server.addr, &request).await;
    assert!(head.starts_with("HTTP/1.1 404"), "{head}");
    assert!(body.is_empty());

    // A 32-hex id that is not in the tree is not a media item; with no
    // matching doc-root file either, it is plainly missing.
    let request = format!(
        "GET /00000000000000000000000000000000.mp3 HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        server.addr
    );
    let (head, _) = raw_request(server.addr, &request).await;
    assert!(head.starts_with("HTTP/1.1 404"), "{head}");
}

#[tokio::test]
async fn enforced_allowlist_rejects_unlisted_peers() {
    let (server, _) = start_server(true).await;
    let request = format!(
        "GET /cds.xml HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        server.addr
    );
    let (head, _) = raw_request(server.addr, &request).await;
    assert!(head.starts_with("HTTP/1.1 403"), "{head}");
}

#[tokio::test]
async fn vendor_index_lookup_round_trips_to_browse() {
    let (server, ids) = start_server(false).await;
    let body = format!(
        r#"<?xml version="1.0"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><u:X_GetObjectIDfromIndex xmlns:u="urn:schemas-upnp-org:service:ContentDirectory:1"><CategoryType>0</CategoryType><Index>0</Index></u:X_GetObjectIDfromIndex></s:Body></s:Envelope>"#
    );
    let request = format!(
        "POST /cds/control/ContentDirectory1 HTTP/1.1\r\n\
         Host: {}\r\n\
         Content-Type: text/xml; charset=\"utf-8\"\r\n\
         SOAPACTION: \"urn:schemas-upnp-org:service:ContentDirectory:1#X_GetObjectIDfromIndex\"\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        server.addr,
        body.len()
    );
    let (head, response_body) = raw_request(server.addr, &request).await;
    assert!(head.starts_with("HTTP/1.1 200"), "{head}");
    let text = String::from_utf8_lossy(&response_body);
    // The first direct child of the music subtree is the first item added.
    assert!(text.contains(&format!("<ObjectID>{}</ObjectID>", ids[0])));
}

#[tokio::test]
async fn item_ids_are_path_digests() {
    // The identity a control point sees is reproducible from the path.
    let (_, ids) = start_server(false).await;
    assert_eq!(ids[0].len(), 32);
    assert!(ids[0].bytes().all(|b| b.is_ascii_hexdigit()));

    let hasher = Md5Hash;
    let p = PathBuf::from("/some/track.mp3");
    assert_eq!(hasher.digest_path(&p), hasher.digest_path(&p));
}
