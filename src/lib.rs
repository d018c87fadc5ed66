//! YADA: a DLNA 1.5 / UPnP AV 1.0 MediaServer.
//!
//! Three subsystems realize the protocol contract: the SSDP engine
//! announces the device and answers discovery queries over UDP multicast,
//! the HTTP server dispatches SOAP control actions and streams media
//! bytes with seek support, and the ContentDirectory service holds the
//! browsable hierarchy those actions operate on.

pub mod cds;
pub mod cms;
pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod seekrange;
pub mod ssdp;
pub mod web;

pub mod state {
    use std::sync::Arc;

    use tokio::sync::RwLock;

    use crate::cds::didl::DidlContext;
    use crate::cds::ContentTree;
    use crate::config::Config;

    /// Shared state of a running server. The tree is written during the
    /// share ingest at startup and read-only while serving; the lock
    /// serializes any future runtime additions against Browse handling.
    #[derive(Clone)]
    pub struct AppState {
        pub config: Arc<Config>,
        pub tree: Arc<RwLock<ContentTree>>,
        /// The advertised interface address.
        pub host: String,
        /// The bound TCP port, known once the listener is up.
        pub port: u16,
    }

    impl AppState {
        pub fn didl_context(&self) -> DidlContext {
            DidlContext {
                host: self.host.clone(),
                port: self.port,
            }
        }
    }
}
