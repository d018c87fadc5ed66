//! ConnectionManager service.
//!
//! Only the constant-shaped responses are implemented: the server does not
//! support PrepareForConnection, so connection information always reports
//! the single implicit connection with default values.

use crate::cds::actions::CdsError;

const ENVELOPE_OPEN: &str = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body>"#;
const ENVELOPE_CLOSE: &str = "</s:Body></s:Envelope>";

/// Every format the media streamer can source.
const SOURCE_PROTOCOL_INFO: &str = "http-get:*:audio/mpeg:DLNA.ORG_PN=MP3,\
http-get:*:audio/L16:DLNA.ORG_PN=LPCM,\
http-get:*:image/jpeg:DLNA.ORG_PN=JPEG_MED,\
http-get:*:image/png:DLNA.ORG_PN=PNG_LRG,\
http-get:*:video/mpeg:DLNA.ORG_PN=MPEG_PS_PAL";

pub fn get_protocol_info() -> String {
    format!(
        "{ENVELOPE_OPEN}<u:GetProtocolInfoResponse xmlns:u=\"urn:schemas-upnp-org:service:ConnectionManager:1\">\
<Source>{SOURCE_PROTOCOL_INFO}</Source><Sink></Sink></u:GetProtocolInfoResponse>{ENVELOPE_CLOSE}"
    )
}

pub fn get_current_connection_ids() -> String {
    format!(
        "{ENVELOPE_OPEN}<u:GetCurrentConnectionIDsResponse xmlns:u=\"urn:schemas-upnp-org:service:ConnectionManager:1\">\
<ConnectionIDs>0</ConnectionIDs></u:GetCurrentConnectionIDsResponse>{ENVELOPE_CLOSE}"
    )
}

pub fn get_current_connection_info() -> String {
    format!(
        "{ENVELOPE_OPEN}<u:GetCurrentConnectionInfoResponse xmlns:u=\"urn:schemas-upnp-org:service:ConnectionManager:1\">\
<RcsID>-1</RcsID><AVTransportID>-1</AVTransportID><ProtocolInfo>{SOURCE_PROTOCOL_INFO}</ProtocolInfo>\
<PeerConnectionManager></PeerConnectionManager><PeerConnectionID>-1</PeerConnectionID>\
<Direction>Output</Direction><Status>OK</Status>\
</u:GetCurrentConnectionInfoResponse>{ENVELOPE_CLOSE}"
    )
}

/// ConnectionManager dispatcher, same shape as the CDS one.
pub fn dispatch_action(soap_action: &str) -> Result<String, CdsError> {
    if soap_action.contains("#GetProtocolInfo") {
        return Ok(get_protocol_info());
    }
    if soap_action.contains("#GetCurrentConnectionIDs") {
        return Ok(get_current_connection_ids());
    }
    if soap_action.contains("#GetCurrentConnectionInfo") {
        return Ok(get_current_connection_info());
    }
    Err(CdsError::CannotProcess)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_info_lists_source_formats() {
        let response = get_protocol_info();
        assert!(response.contains("DLNA.ORG_PN=MP3"));
        assert!(response.contains("<Sink></Sink>"));
    }

    #[test]
    fn connection_info_defaults() {
        let response = get_current_connection_info();
        assert!(response.contains("<RcsID>-1</RcsID>"));
        assert!(response.contains("<Direction>Output</Direction>"));
        assert!(response.contains("<Status>OK</Status>"));
    }

    #[test]
    fn dispatcher_rejects_unknown_actions() {
        assert!(dispatch_action("\"urn:...#GetProtocolInfo\"").is_ok());
        // The IDs action must win over the Info action despite the shared
        // prefix in the opposite order of specificity.
        let ids = dispatch_action("\"urn:...#GetCurrentConnectionIDs\"").unwrap();
        assert!(ids.contains("ConnectionIDs"));
        assert!(dispatch_action("\"urn:...#PrepareForConnection\"").is_err());
    }
}
