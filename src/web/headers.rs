//! DLNA request-header recognition and validation.
//!
//! A table-driven reducer over the request's header map: recognized
//! headers are parsed and recorded, unknown ones are ignored as the
//! guidelines require tolerance of them. Validation failures map to 400
//! or 416 depending on the header.

use axum::http::HeaderMap;

use crate::error::AppError;
use crate::seekrange::{BytesRange, TimeSeekRange};

/// Total request header budget. DLNA endpoints must keep the header block
/// within 8 KB in either direction.
const MAX_HEADER_BYTES: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Streaming,
    Interactive,
    Background,
}

/// The observed DLNA headers of one request. Per-connection state: built
/// fresh for every request and dropped with it.
#[derive(Debug, Default)]
pub struct DlnaHeaders {
    pub user_agent: Option<String>,
    pub soap_action: Option<String>,
    /// `getcontentFeatures.dlna.org: 1` was present.
    pub content_features: bool,
    pub time_seek: Option<TimeSeekRange>,
    pub range: Option<BytesRange>,
    pub friendly_name: Option<String>,
    pub transfer_mode: Option<TransferMode>,
    pub get_media_info: bool,
    pub get_caption_info: bool,
}

impl DlnaHeaders {
    pub fn parse(headers: &HeaderMap) -> Result<Self, AppError> {
        let total: usize = headers
            .iter()
            .map(|(name, value)| name.as_str().len() + value.len() + 4)
            .sum();
        if total > MAX_HEADER_BYTES {
            return Err(AppError::BadRequest);
        }

        let mut parsed = DlnaHeaders::default();

        for (name, value) in headers {
            // Header names arrive lowercased; values keep their case.
            let value = match value.to_str() {
                Ok(v) => v.trim(),
                Err(_) => continue,
            };
            match name.as_str() {
                "user-agent" => parsed.user_agent = Some(value.to_owned()),
                "soapaction" => parsed.soap_action = Some(value.to_owned()),
                "getcontentfeatures.dlna.org" => {
                    // Any value except "1" is a protocol violation.
                    if value != "1" {
                        return Err(AppError::BadRequest);
                    }
                    parsed.content_features = true;
                }
                "timeseekrange.dlna.org" => {
                    parsed.time_seek = Some(
                        value
                            .parse()
                            .map_err(|_| AppError::RangeNotSatisfiable)?,
                    );
                }
                "range" => {
                    parsed.range = Some(
                        value
                            .parse()
                            .map_err(|_| AppError::RangeNotSatisfiable)?,
                    );
                }
                "friendlyname.dlna.org" => parsed.friendly_name = Some(value.to_owned()),
                "transfermode.dlna.org" => {
                    parsed.transfer_mode = Some(match value {
                        "Streaming" => TransferMode::Streaming,
                        "Interactive" => TransferMode::Interactive,
                        "Background" => TransferMode::Background,
                        _ => return Err(AppError::BadRequest),
                    });
                }
                "getmediainfo.sec" => parsed.get_media_info = true,
                "getcaptioninfo.sec" => parsed.get_caption_info = true,
                _ => {}
            }
        }

        parsed.validate()?;
        Ok(parsed)
    }

    /// Cross-header rules: time-based seeking only makes sense for a
    /// streaming transfer, so Interactive and Background transfers must
    /// not carry a TimeSeekRange.
    fn validate(&self) -> Result<(), AppError> {
        if matches!(
            self.transfer_mode,
            Some(TransferMode::Interactive) | Some(TransferMode::Background)
        ) && self.time_seek.is_some()
        {
            return Err(AppError::BadRequest);
        }
        Ok(())
    }
}
