//! Build notifications and their validation.
//!
//! The webhook delivers a JSON document in its `payload` form field:
//!
//! ```json
//! {
//!   "event": "build_finished",
//!   "name": "Webserver",
//!   "build": {
//!     "image_type": "xen",
//!     "version": "0.0.1",
//!     "download_url": "https://builds.example.com/Webserver.x86_64-0.0.1.xen.tar.gz"
//!   }
//! }
//! ```
//!
//! [`parse_payload`] decodes it into a [`RawNotification`] where every field
//! is optional, and [`validate`] turns that into a [`BuildNotification`] or a
//! [`Rejection`]. Fields are checked in a fixed order: `event`, then
//! `build.image_type`, then `name`, `build.version` and `build.download_url`,
//! so an ignored notification is never rejected for fields it does not need.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Rejection;
use crate::prepare::archive_file_name;
use crate::strategy::{resolve, ImageType, ImportStrategy};

pub const EVENT_BUILD_FINISHED: &str = "build_finished";

pub const FIELD_EVENT: &str = "[payload][event]";
pub const FIELD_NAME: &str = "[payload][name]";
pub const FIELD_IMAGE_TYPE: &str = "[payload][build][image_type]";
pub const FIELD_VERSION: &str = "[payload][build][version]";
pub const FIELD_DOWNLOAD_URL: &str = "[payload][build][download_url]";

/// Decoded webhook payload, before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawNotification {
    #[serde(default, deserialize_with = "scalar_string")]
    pub event: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub name: Option<String>,
    #[serde(default)]
    pub build: Option<RawBuild>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawBuild {
    #[serde(default, deserialize_with = "scalar_string")]
    pub image_type: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: Option<String>,
    #[serde(default, deserialize_with = "scalar_string")]
    pub download_url: Option<String>,
}

/// Accept strings and numbers (versions are sometimes sent as `1.2`).
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(de::Error::custom(format!(
            "expected a string, found {other}"
        ))),
    }
}

/// A validated notification for a registered image type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildNotification {
    pub event: String,
    pub image_type: ImageType,
    pub name: String,
    pub version: String,
    pub download_url: String,
}

impl BuildNotification {
    /// Registry image name: `<name>-<version>-<image type>`.
    pub fn image_name(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.image_type)
    }

    pub fn strategy(&self) -> &'static ImportStrategy {
        self.image_type.strategy()
    }
}

/// Decode the `payload` form field.
pub fn parse_payload(payload: &str) -> Result<RawNotification, Rejection> {
    serde_json::from_str(payload).map_err(|err| {
        let rejection = Rejection::InvalidPayload(err.to_string());
        tracing::error!(error = %rejection, "Bad request (400)");
        rejection
    })
}

/// Validate a decoded notification.
///
/// Rejections are logged at error level and ignores at info level before
/// they are returned.
pub fn validate(raw: &RawNotification) -> Result<BuildNotification, Rejection> {
    let result = check(raw);
    match &result {
        Ok(n) => tracing::debug!(image = %n.image_name(), "Notification accepted"),
        Err(r) if r.is_ignored() => tracing::info!("{r}"),
        Err(r) => tracing::error!(error = %r, "Bad request (400)"),
    }
    result
}

fn check(raw: &RawNotification) -> Result<BuildNotification, Rejection> {
    let event = required(&raw.event, FIELD_EVENT)?;
    if event != EVENT_BUILD_FINISHED {
        return Err(Rejection::Ignored(format!(
            "unsupported event type: {event}"
        )));
    }

    let build = raw.build.as_ref();
    let image_type = required(&build.and_then(|b| b.image_type.clone()), FIELD_IMAGE_TYPE)?;
    let Some(strategy) = resolve(&image_type) else {
        return Err(Rejection::Ignored(format!(
            "unsupported image type: {image_type}"
        )));
    };

    let name = required(&raw.name, FIELD_NAME)?;
    let version = required(&build.and_then(|b| b.version.clone()), FIELD_VERSION)?;
    let download_url = required(&build.and_then(|b| b.download_url.clone()), FIELD_DOWNLOAD_URL)?;

    check_url(&download_url, strategy)?;

    Ok(BuildNotification {
        event,
        image_type: strategy.image_type,
        name,
        version,
        download_url,
    })
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, Rejection> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.clone()),
        _ => Err(Rejection::MissingField(field)),
    }
}

fn check_url(url: &str, strategy: &ImportStrategy) -> Result<(), Rejection> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Rejection::InvalidField {
            field: FIELD_DOWNLOAD_URL,
            reason: "expected an http or https URL".into(),
        });
    }
    if strategy.preparation.stages_locally() && archive_file_name(url).is_none() {
        return Err(Rejection::InvalidField {
            field: FIELD_DOWNLOAD_URL,
            reason: "URL does not end in an archive file name".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> RawNotification {
        parse_payload(json).expect("payload should decode")
    }

    #[test]
    fn accepts_complete_kvm_notification() {
        let n = validate(&raw(
            r#"{"event":"build_finished","name":"Webserver",
                "build":{"image_type":"kvm","version":"0.0.1",
                         "download_url":"http://example.com/Webserver.qcow2"}}"#,
        ))
        .unwrap();
        assert_eq!(n.image_type, ImageType::Kvm);
        assert_eq!(n.image_name(), "Webserver-0.0.1-kvm");
        assert_eq!(n.strategy().disk_format, "qcow2");
    }

    #[test]
    fn missing_event_is_rejected() {
        let err = validate(&raw(r#"{"name":"x"}"#)).unwrap_err();
        assert_eq!(err, Rejection::MissingField(FIELD_EVENT));
    }

    #[test]
    fn other_events_are_ignored_without_further_checks() {
        let err = validate(&raw(r#"{"event":"build_started"}"#)).unwrap_err();
        assert_eq!(
            err,
            Rejection::Ignored("unsupported event type: build_started".into())
        );
    }

    #[test]
    fn build_finished_requires_image_type() {
        let err = validate(&raw(r#"{"event":"build_finished","name":"x"}"#)).unwrap_err();
        assert_eq!(err, Rejection::MissingField(FIELD_IMAGE_TYPE));
    }

    #[test]
    fn unknown_image_type_is_ignored_even_without_name() {
        let err = validate(&raw(
            r#"{"event":"build_finished","build":{"image_type":"oem"}}"#,
        ))
        .unwrap_err();
        assert_eq!(err, Rejection::Ignored("unsupported image type: oem".into()));
    }

    #[test]
    fn missing_fields_are_named_in_order() {
        let err = validate(&raw(
            r#"{"event":"build_finished","build":{"image_type":"kvm"}}"#,
        ))
        .unwrap_err();
        assert_eq!(err, Rejection::MissingField(FIELD_NAME));

        let err = validate(&raw(
            r#"{"event":"build_finished","name":"x","build":{"image_type":"kvm",
                "download_url":"http://example.com/x.qcow2"}}"#,
        ))
        .unwrap_err();
        assert_eq!(err, Rejection::MissingField(FIELD_VERSION));

        let err = validate(&raw(
            r#"{"event":"build_finished","name":"x","build":{"image_type":"kvm","version":"1"}}"#,
        ))
        .unwrap_err();
        assert_eq!(err, Rejection::MissingField(FIELD_DOWNLOAD_URL));
    }

    #[test]
    fn blank_and_null_fields_count_as_missing() {
        let err = validate(&raw(
            r#"{"event":"build_finished","name":"  ","build":{"image_type":"kvm"}}"#,
        ))
        .unwrap_err();
        assert_eq!(err, Rejection::MissingField(FIELD_NAME));

        let err = validate(&raw(r#"{"event":null}"#)).unwrap_err();
        assert_eq!(err, Rejection::MissingField(FIELD_EVENT));
    }

    #[test]
    fn numeric_version_is_accepted() {
        let n = validate(&raw(
            r#"{"event":"build_finished","name":"x","build":{"image_type":"kvm",
                "version":1.5,"download_url":"https://example.com/x.qcow2"}}"#,
        ))
        .unwrap();
        assert_eq!(n.version, "1.5");
    }

    #[test]
    fn non_http_urls_are_invalid() {
        let err = validate(&raw(
            r#"{"event":"build_finished","name":"x","build":{"image_type":"kvm",
                "version":"1","download_url":"file:///etc/passwd"}}"#,
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            Rejection::InvalidField { field: FIELD_DOWNLOAD_URL, .. }
        ));
    }

    #[test]
    fn archive_strategies_need_a_file_name() {
        let err = validate(&raw(
            r#"{"event":"build_finished","name":"x","build":{"image_type":"xen",
                "version":"1","download_url":"https://example.com/downloads/"}}"#,
        ))
        .unwrap_err();
        assert!(matches!(err, Rejection::InvalidField { .. }));
    }

    #[test]
    fn structural_garbage_is_an_invalid_payload() {
        assert!(matches!(
            parse_payload("not json"),
            Err(Rejection::InvalidPayload(_))
        ));
        assert!(matches!(
            parse_payload(r#"{"event":["build_finished"]}"#),
            Err(Rejection::InvalidPayload(_))
        ));
    }
}
