//! DIDL-Lite serialization of content directory objects.
//!
//! The fragment produced here is plain XML; the SOAP layer escapes it once
//! when embedding it in a `<Result>` element, because the envelope itself
//! is XML.

use std::fmt::Write;

use crate::cds::ObjectView;

const DIDL_OPEN: &str = r#"<DIDL-Lite xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/" xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns:dlna="urn:schemas-dlna-org:metadata-1-0/">"#;
const DIDL_CLOSE: &str = "</DIDL-Lite>";

/// Where resource URLs point: the HTTP server's bound interface.
#[derive(Debug, Clone)]
pub struct DidlContext {
    pub host: String,
    pub port: u16,
}

/// Escape text for embedding in XML element content or attribute values.
pub fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// The parentID attribute value; the hidden root has no parent and
/// advertises the conventional `-1`.
fn parent_attr(parent_id: &Option<String>) -> &str {
    parent_id.as_deref().unwrap_or("-1")
}

fn write_container(out: &mut String, id: &str, parent_id: &Option<String>, name: &str, child_count: usize) {
    let _ = write!(
        out,
        r#"<container id="{}" parentID="{}" childCount="{}" restricted="1"><dc:title>{}</dc:title><upnp:class>object.container</upnp:class></container>"#,
        xml_escape(id),
        xml_escape(parent_attr(parent_id)),
        child_count,
        xml_escape(name),
    );
}

fn write_item(out: &mut String, id: &str, parent_id: &Option<String>, view: &ObjectView, ctx: &DidlContext) {
    let resource = match view {
        ObjectView::Item { resource, .. } => resource,
        ObjectView::Folder { .. } => return,
    };

    let url = format!(
        "http://{}:{}/{}.{}",
        ctx.host,
        ctx.port,
        id,
        resource.profile.extension()
    );
    let protocol_info = format!(
        "http-get:*:{}:DLNA.ORG_PN={};DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01500000000000000000000000000000",
        resource.mime(),
        resource.profile.name()
    );

    let _ = write!(
        out,
        r#"<item id="{}" parentID="{}" restricted="1"><dc:title>{}</dc:title><upnp:class>{}</upnp:class>"#,
        xml_escape(id),
        xml_escape(parent_attr(parent_id)),
        xml_escape(&resource.title()),
        resource.kind.upnp_class(),
    );
    let _ = write!(out, r#"<res protocolInfo="{}" size="{}""#, protocol_info, resource.size);
    if let Some(duration) = resource.didl_duration() {
        let _ = write!(out, r#" duration="{duration}""#);
    }
    if let (Some(w), Some(h)) = (resource.width, resource.height) {
        let _ = write!(out, r#" resolution="{w}x{h}""#);
    }
    if let Some(rate) = resource.sample_rate {
        let _ = write!(out, r#" sampleFrequency="{rate}""#);
    }
    if let Some(bitrate) = resource.bitrate {
        let _ = write!(out, r#" bitrate="{bitrate}""#);
    }
    let _ = write!(out, ">{}</res></item>", xml_escape(&url));
}

/// Build the DIDL-Lite fragment describing `objects`.
pub fn didl_fragment(objects: &[ObjectView], ctx: &DidlContext) -> String {
    let mut out = String::with_capacity(256 + objects.len() * 256);
    out.push_str(DIDL_OPEN);
    for view in objects {
        match view {
            ObjectView::Folder {
                id,
                parent_id,
                name,
                child_count,
            } => write_container(&mut out, id, parent_id, name, *child_count),
            ObjectView::Item { id, parent_id, .. } => write_item(&mut out, id, parent_id, view, ctx),
        }
    }
    out.push_str(DIDL_CLOSE);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{DlnaProfile, MediaKind, Resource};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn ctx() -> DidlContext {
        DidlContext {
            host: "192.168.1.10".into(),
            port: 52323,
        }
    }

    #[test]
    fn escape_covers_all_five() {
        assert_eq!(xml_escape(r#"a&b<c>d"e'f"#), "a&amp;b&lt;c&gt;d&quot;e&#39;f");
    }

    #[test]
    fn container_fragment() {
        let view = ObjectView::Folder {
            id: "aabb".into(),
            parent_id: Some("ccdd".into()),
            name: "My <Albums>".into(),
            child_count: 7,
        };
        let didl = didl_fragment(&[view], &ctx());
        assert!(didl.starts_with(DIDL_OPEN));
        assert!(didl.ends_with(DIDL_CLOSE));
        assert!(didl.contains(r#"<container id="aabb" parentID="ccdd" childCount="7" restricted="1">"#));
        assert!(didl.contains("<dc:title>My &lt;Albums&gt;</dc:title>"));
        assert!(didl.contains("<upnp:class>object.container</upnp:class>"));
    }

    #[test]
    fn audio_item_fragment() {
        let resource = Resource {
            path: PathBuf::from("/share/track.mp3"),
            size: 3673383,
            duration_micros: Some(183_000_000),
            bitrate: Some(192_000),
            sample_rate: Some(44_100),
            channels: Some(2),
            width: None,
            height: None,
            profile: DlnaProfile::Mp3,
            kind: MediaKind::Audio,
        };
        let view = ObjectView::Item {
            id: "0123456789abcdef0123456789abcdef".into(),
            parent_id: Some("ffff".into()),
            resource: Arc::new(resource),
        };
        let didl = didl_fragment(&[view], &ctx());
        assert!(didl.contains("<upnp:class>object.item.audioItem.musicTrack</upnp:class>"));
        assert!(didl.contains(
            r#"protocolInfo="http-get:*:audio/mpeg:DLNA.ORG_PN=MP3;DLNA.ORG_OP=01;DLNA.ORG_CI=0;DLNA.ORG_FLAGS=01500000000000000000000000000000""#
        ));
        assert!(didl.contains(r#"size="3673383""#));
        assert!(didl.contains(r#"duration="0:03:03""#));
        assert!(didl
            .contains("http://192.168.1.10:52323/0123456789abcdef0123456789abcdef.mp3</res>"));
    }

    #[test]
    fn photo_item_uses_image_class_and_mime() {
        let resource = Resource {
            path: PathBuf::from("/share/pic.jpg"),
            size: 555,
            duration_micros: None,
            bitrate: None,
            sample_rate: None,
            channels: None,
            width: Some(1024),
            height: Some(768),
            profile: DlnaProfile::JpegMed,
            kind: MediaKind::Photo,
        };
        let view = ObjectView::Item {
            id: "feed".into(),
            parent_id: None,
            resource: Arc::new(resource),
        };
        let didl = didl_fragment(&[view], &ctx());
        assert!(didl.contains("<upnp:class>object.item.imageItem.photo</upnp:class>"));
        assert!(didl.contains("image/jpeg"));
        assert!(didl.contains(r#"resolution="1024x768""#));
        assert!(!didl.contains("duration"));
        assert!(didl.contains(r#"parentID="-1""#));
    }
}
