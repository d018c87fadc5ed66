//! ContentDirectory SOAP actions and the action dispatcher.
//!
//! Every handler consumes the raw SOAP body and yields a complete response
//! envelope; failures map onto the UPnP ContentDirectory error codes and
//! the HTTP layer wraps them into a fault envelope.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, error};
use xml::reader::{EventReader, XmlEvent};

use crate::cds::didl::{didl_fragment, xml_escape, DidlContext};
use crate::cds::{ContentTree, ObjectView};
use crate::media::MediaKind;

/// UPnP ContentDirectory error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CdsError {
    #[error("Invalid Args")]
    InvalidArgs,
    #[error("Action Failed")]
    ActionFailed,
    #[error("No Such Object")]
    NoSuchObject,
    #[error("Unsupported or invalid sort criteria")]
    UnsupportedSort,
    #[error("Cannot process the request")]
    CannotProcess,
}

impl CdsError {
    pub fn code(&self) -> u16 {
        match self {
            CdsError::InvalidArgs => 402,
            CdsError::ActionFailed => 501,
            CdsError::NoSuchObject => 701,
            CdsError::UnsupportedSort => 709,
            CdsError::CannotProcess => 720,
        }
    }
}

const ENVELOPE_OPEN: &str = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body>"#;
const ENVELOPE_CLOSE: &str = "</s:Body></s:Envelope>";

/// No search support: capabilities are empty.
const SEARCH_CAPABILITIES: &str = "";
/// No sort support: capabilities are empty.
const SORT_CAPABILITIES: &str = "";
/// The update counter never moves; any strictly monotonic policy would do.
const SYSTEM_UPDATE_ID: &str = "1";

/// A fault envelope carrying a UPnPError block, sent with HTTP 500.
pub fn fault_envelope(err: CdsError) -> String {
    format!(
        "{ENVELOPE_OPEN}<s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring><detail>\
<UPnPError xmlns=\"urn:schemas-upnp-org:control-1-0\"><errorCode>{}</errorCode><errorDescription>{}</errorDescription></UPnPError>\
</detail></s:Fault>{ENVELOPE_CLOSE}",
        err.code(),
        err
    )
}

/// Pull the child-element text of one action element out of a SOAP body.
/// Elements present but empty are recorded as empty strings, so required
/// arguments can be told apart from missing ones.
fn action_arguments(body: &str, action: &str) -> Result<HashMap<String, String>, CdsError> {
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut in_action = false;
    let mut seen_action = false;
    let mut current: Option<String> = None;

    for event in EventReader::from_str(body) {
        match event {
            Ok(XmlEvent::StartElement { name, .. }) => {
                if name.local_name == action {
                    in_action = true;
                    seen_action = true;
                } else if in_action {
                    fields.entry(name.local_name.clone()).or_default();
                    current = Some(name.local_name);
                }
            }
            Ok(XmlEvent::EndElement { name }) => {
                if name.local_name == action {
                    in_action = false;
                }
                current = None;
            }
            Ok(XmlEvent::Characters(text)) => {
                if let Some(field) = &current {
                    if let Some(value) = fields.get_mut(field) {
                        value.push_str(&text);
                    }
                }
            }
            Err(e) => {
                error!("malformed SOAP body: {e}");
                return Err(CdsError::InvalidArgs);
            }
            _ => {}
        }
    }

    if !seen_action {
        return Err(CdsError::InvalidArgs);
    }
    Ok(fields)
}

fn required<'a>(fields: &'a HashMap<String, String>, name: &str) -> Result<&'a str, CdsError> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or(CdsError::InvalidArgs)
}

fn required_u32(fields: &HashMap<String, String>, name: &str) -> Result<u32, CdsError> {
    required(fields, name)?
        .trim()
        .parse()
        .map_err(|_| CdsError::InvalidArgs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseFlag {
    Metadata,
    DirectChildren,
}

#[derive(Debug)]
pub struct BrowseRequest {
    pub object_id: String,
    pub browse_flag: BrowseFlag,
    pub filter: String,
    pub starting_index: u32,
    pub requested_count: u32,
    pub sort_criteria: String,
}

fn parse_browse_request(body: &str) -> Result<BrowseRequest, CdsError> {
    let fields = action_arguments(body, "Browse")?;
    let flag = match required(&fields, "BrowseFlag")? {
        "BrowseMetadata" => BrowseFlag::Metadata,
        "BrowseDirectChildren" => BrowseFlag::DirectChildren,
        other => {
            debug!("unknown BrowseFlag {other:?}");
            return Err(CdsError::CannotProcess);
        }
    };
    Ok(BrowseRequest {
        object_id: required(&fields, "ObjectID")?.to_owned(),
        browse_flag: flag,
        // Filter and SortCriteria are accepted but not acted upon: the
        // server advertises no search or sort capabilities.
        filter: required(&fields, "Filter")?.to_owned(),
        starting_index: required_u32(&fields, "StartingIndex")?,
        requested_count: required_u32(&fields, "RequestedCount")?,
        sort_criteria: required(&fields, "SortCriteria")?.to_owned(),
    })
}

fn browse_response(didl: &str, number_returned: usize, total_matches: usize) -> String {
    format!(
        "{ENVELOPE_OPEN}<u:BrowseResponse xmlns:u=\"urn:schemas-upnp-org:service:ContentDirectory:1\">\
<Result>{}</Result><NumberReturned>{}</NumberReturned><TotalMatches>{}</TotalMatches><UpdateID>0</UpdateID>\
</u:BrowseResponse>{ENVELOPE_CLOSE}",
        xml_escape(didl),
        number_returned,
        total_matches
    )
}

/// The Browse action.
pub fn browse(tree: &ContentTree, ctx: &DidlContext, body: &str) -> Result<String, CdsError> {
    let req = parse_browse_request(body)?;
    debug!(
        "Browse {:?} of {} [{}+{}]",
        req.browse_flag, req.object_id, req.starting_index, req.requested_count
    );

    match req.browse_flag {
        BrowseFlag::Metadata => {
            let object = tree.object(&req.object_id).ok_or(CdsError::NoSuchObject)?;
            let didl = didl_fragment(std::slice::from_ref(&object), ctx);
            Ok(browse_response(&didl, 1, 1))
        }
        BrowseFlag::DirectChildren => {
            let children: Vec<ObjectView> = tree
                .direct_children(&req.object_id)
                .ok_or(CdsError::NoSuchObject)?;
            let total = children.len();
            let start = (req.starting_index as usize).min(total);
            let end = if req.requested_count == 0 {
                total
            } else {
                (start + req.requested_count as usize).min(total)
            };
            let window = &children[start..end];
            let didl = didl_fragment(window, ctx);
            Ok(browse_response(&didl, window.len(), total))
        }
    }
}

pub fn get_search_capabilities() -> String {
    format!(
        "{ENVELOPE_OPEN}<u:GetSearchCapabilitiesResponse xmlns:u=\"urn:schemas-upnp-org:service:ContentDirectory:1\">\
<SearchCaps>{SEARCH_CAPABILITIES}</SearchCaps></u:GetSearchCapabilitiesResponse>{ENVELOPE_CLOSE}"
    )
}

pub fn get_sort_capabilities() -> String {
    format!(
        "{ENVELOPE_OPEN}<u:GetSortCapabilitiesResponse xmlns:u=\"urn:schemas-upnp-org:service:ContentDirectory:1\">\
<SortCaps>{SORT_CAPABILITIES}</SortCaps></u:GetSortCapabilitiesResponse>{ENVELOPE_CLOSE}"
    )
}

pub fn get_system_update_id() -> String {
    format!(
        "{ENVELOPE_OPEN}<u:GetSystemUpdateIDResponse xmlns:u=\"urn:schemas-upnp-org:service:ContentDirectory:1\">\
<Id>{SYSTEM_UPDATE_ID}</Id></u:GetSystemUpdateIDResponse>{ENVELOPE_CLOSE}"
    )
}

/// Vendor action used by some renderers to map a child index onto an
/// object id before browsing. The CategoryType convention is not published
/// anywhere; it is reduced over the fixed top-folder order.
pub fn x_get_object_id_from_index(tree: &ContentTree, body: &str) -> Result<String, CdsError> {
    let fields = action_arguments(body, "X_GetObjectIDfromIndex")?;
    let category = required_u32(&fields, "CategoryType")?;
    let index = required_u32(&fields, "Index")?;

    let kind = match category % 3 {
        0 => MediaKind::Audio,
        1 => MediaKind::Photo,
        _ => MediaKind::Video,
    };
    let object_id = tree
        .child_at(kind, index as usize)
        .ok_or(CdsError::NoSuchObject)?;

    Ok(format!(
        "{ENVELOPE_OPEN}<u:X_GetObjectIDfromIndexResponse xmlns:u=\"urn:schemas-upnp-org:service:ContentDirectory:1\">\
<ObjectID>{}</ObjectID></u:X_GetObjectIDfromIndexResponse>{ENVELOPE_CLOSE}",
        xml_escape(&object_id)
    ))
}

/// Pick the handler by substring match on the `SOAPACTION` header value.
/// Unknown actions cannot be processed.
pub fn dispatch_action(
    tree: &ContentTree,
    ctx: &DidlContext,
    soap_action: &str,
    body: &str,
    vendor_extensions: bool,
) -> Result<String, CdsError> {
    if soap_action.contains("#Browse") {
        return browse(tree, ctx, body);
    }
    if soap_action.contains("#GetSortCapabilities") {
        return Ok(get_sort_capabilities());
    }
    if soap_action.contains("#GetSearchCapabilities") {
        return Ok(get_search_capabilities());
    }
    if soap_action.contains("#GetSystemUpdateID") {
        return Ok(get_system_update_id());
    }
    if vendor_extensions && soap_action.contains("#X_GetObjectIDfromIndex") {
        return x_get_object_id_from_index(tree, body);
    }
    Err(CdsError::CannotProcess)
}
