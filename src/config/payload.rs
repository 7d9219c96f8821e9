//! Host configuration payload.
//!
//! The host sends flat XML-like elements:
//!
//! ```text
//! <config>
//!   <imgWidth>640</imgWidth>
//!   <imgHeight>480</imgHeight>
//!   <imgCompress>80</imgCompress>
//!   <NirCount>1</NirCount>
//!   <isActived>2</isActived>
//!   <timeOut>30</timeOut>
//!   <liveThreshold>0.7</liveThreshold>
//!   <pidL>2203</pidL>
//!   <pidR>2204</pidR>
//! </config>
//! ```
//!
//! Unknown elements are ignored at any depth. Known elements are checked
//! one by one; the first bad one rejects the whole payload.

use super::session::{ConfigValidationError, LivenessMode, SessionConfig, MIN_PREVIEW_EDGE};
use crate::device::{DeviceRole, ProductId};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

/// Product ids named by a payload or file config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicePids {
    /// Product id for the infrared role.
    pub left: Option<ProductId>,
    /// Product id for the visible role.
    pub right: Option<ProductId>,
}

impl DevicePids {
    /// Product id named for `role`.
    pub fn get(&self, role: DeviceRole) -> Option<ProductId> {
        match role {
            DeviceRole::LeftInfrared => self.left,
            DeviceRole::RightVisible => self.right,
        }
    }

    /// Checks each named id against the supported-device allow-list.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        for (field, pid) in [("pidL", self.left), ("pidR", self.right)] {
            if let Some(pid) = pid {
                if !pid.is_supported() {
                    return Err(ConfigValidationError::UnsupportedProduct {
                        field,
                        value: pid.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// A payload that passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPayload {
    /// Active config with the payload's fields applied.
    pub session: SessionConfig,
    /// Device ids carried by the payload.
    pub devices: DevicePids,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    ImgWidth,
    ImgHeight,
    ImgCompress,
    NirCount,
    IsActived,
    TimeOut,
    LiveThreshold,
    PidL,
    PidR,
}

impl Field {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"imgWidth" => Some(Field::ImgWidth),
            b"imgHeight" => Some(Field::ImgHeight),
            b"imgCompress" => Some(Field::ImgCompress),
            b"NirCount" => Some(Field::NirCount),
            b"isActived" => Some(Field::IsActived),
            b"timeOut" => Some(Field::TimeOut),
            b"liveThreshold" => Some(Field::LiveThreshold),
            b"pidL" => Some(Field::PidL),
            b"pidR" => Some(Field::PidR),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Field::ImgWidth => "imgWidth",
            Field::ImgHeight => "imgHeight",
            Field::ImgCompress => "imgCompress",
            Field::NirCount => "NirCount",
            Field::IsActived => "isActived",
            Field::TimeOut => "timeOut",
            Field::LiveThreshold => "liveThreshold",
            Field::PidL => "pidL",
            Field::PidR => "pidR",
        }
    }

    fn malformed(self, value: &str) -> ConfigValidationError {
        ConfigValidationError::Malformed {
            field: self.name(),
            value: value.to_string(),
        }
    }

    fn integer(self, text: &str) -> Result<i64, ConfigValidationError> {
        text.parse::<i64>().map_err(|_| self.malformed(text))
    }

    fn product(self, text: &str) -> Result<ProductId, ConfigValidationError> {
        let code = u32::from_str_radix(text, 16).map_err(|_| self.malformed(text))?;
        let unsupported = || ConfigValidationError::UnsupportedProduct {
            field: self.name(),
            value: format!("{code:#x}"),
        };
        let pid = u16::try_from(code).map(ProductId).map_err(|_| unsupported())?;
        if pid.is_supported() {
            Ok(pid)
        } else {
            Err(unsupported())
        }
    }

    /// Parses `text` and writes it into the working copy.
    fn apply(
        self,
        text: &str,
        session: &mut SessionConfig,
        devices: &mut DevicePids,
    ) -> Result<(), ConfigValidationError> {
        let name = self.name();
        match self {
            Field::ImgWidth | Field::ImgHeight => {
                let value = self.integer(text)?;
                let edge = u32::try_from(value)
                    .ok()
                    .filter(|v| *v >= MIN_PREVIEW_EDGE)
                    .ok_or_else(|| ConfigValidationError::out_of_range(name, value, ">= 200"))?;
                if self == Field::ImgWidth {
                    session.preview_width = edge;
                } else {
                    session.preview_height = edge;
                }
            }
            Field::ImgCompress => {
                let value = self.integer(text)?;
                session.image_quality = u8::try_from(value)
                    .ok()
                    .filter(|v| *v <= 100)
                    .ok_or_else(|| ConfigValidationError::out_of_range(name, value, "0-100"))?;
            }
            Field::NirCount => {
                let value = self.integer(text)?;
                session.pass_count = u32::try_from(value)
                    .map_err(|_| ConfigValidationError::out_of_range(name, value, ">= 0"))?;
            }
            Field::IsActived => {
                let value = self.integer(text)?;
                session.mode = u8::try_from(value)
                    .ok()
                    .filter(|code| *code <= 3)
                    .and_then(LivenessMode::from_code)
                    .ok_or_else(|| ConfigValidationError::out_of_range(name, value, "0, 1, 2 or 3"))?;
            }
            Field::TimeOut => {
                let value = self.integer(text)?;
                if !(10..=120).contains(&value) {
                    return Err(ConfigValidationError::out_of_range(name, value, "10-120 s"));
                }
                session.timeout_ms = value as u64 * 1000;
            }
            Field::LiveThreshold => {
                let value = text.parse::<f32>().map_err(|_| self.malformed(text))?;
                if !(0.0..=1.0).contains(&value) {
                    return Err(ConfigValidationError::out_of_range(name, value, "0.0-1.0"));
                }
                session.score_threshold = value;
            }
            Field::PidL => devices.left = Some(self.product(text)?),
            Field::PidR => devices.right = Some(self.product(text)?),
        }
        Ok(())
    }
}

/// Validates a host payload against the currently active config.
///
/// Fields absent from the payload keep their value from `active`. On any
/// failure nothing is applied and `active` remains the config in force.
pub fn parse_payload(
    payload: &str,
    active: &SessionConfig,
) -> Result<ValidatedPayload, ConfigValidationError> {
    let mut reader = Reader::from_str(payload);
    reader.config_mut().trim_text(true);

    let mut session = active.clone();
    let mut devices = DevicePids::default();
    // Known element whose text has not been seen yet.
    let mut open: Option<Field> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            ConfigValidationError::Syntax(format!("at byte {}: {e}", reader.buffer_position()))
        })?;
        match event {
            Event::Start(element) => {
                if let Some(field) = open.take() {
                    return Err(field.malformed(""));
                }
                open = Field::from_name(element.local_name().as_ref());
            }
            Event::Empty(element) => {
                if let Some(field) = Field::from_name(element.local_name().as_ref()) {
                    return Err(field.malformed(""));
                }
            }
            Event::Text(text) => {
                if let Some(field) = open.take() {
                    let text = text
                        .unescape()
                        .map_err(|e| ConfigValidationError::Syntax(e.to_string()))?;
                    field.apply(text.trim(), &mut session, &mut devices)?;
                }
            }
            Event::End(_) => {
                if let Some(field) = open.take() {
                    return Err(field.malformed(""));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    session.validate()?;
    Ok(ValidatedPayload { session, devices })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const FULL: &str = "<config>\
        <imgWidth>800</imgWidth><imgHeight>600</imgHeight>\
        <imgCompress>90</imgCompress><NirCount>3</NirCount>\
        <isActived>1</isActived><timeOut>45</timeOut>\
        <liveThreshold>0.55</liveThreshold>\
        <pidL>2203</pidL><pidR>2210</pidR>\
        </config>";

    #[test]
    fn test_full_payload() {
        let parsed = parse_payload(FULL, &SessionConfig::default()).unwrap();
        let s = &parsed.session;
        assert_eq!((s.preview_width, s.preview_height), (800, 600));
        assert_eq!(s.image_quality, 90);
        assert_eq!(s.pass_count, 3);
        assert_eq!(s.mode, LivenessMode::InfraredSingle);
        assert_eq!(s.timeout_ms, 45_000);
        assert!((s.score_threshold - 0.55).abs() < f32::EPSILON);
        assert_eq!(parsed.devices.left, Some(ProductId(0x2203)));
        assert_eq!(parsed.devices.right, Some(ProductId(0x2210)));
    }

    #[test]
    fn test_missing_fields_keep_active_values() {
        let active = SessionConfig {
            pass_count: 5,
            ..Default::default()
        };
        let parsed = parse_payload("<config><timeOut>10</timeOut></config>", &active).unwrap();
        assert_eq!(parsed.session.pass_count, 5);
        assert_eq!(parsed.session.timeout_ms, 10_000);
        assert_eq!(parsed.devices, DevicePids::default());
    }

    #[test]
    fn test_unknown_elements_ignored() {
        let parsed = parse_payload(
            "<root><vendor><extra>x</extra></vendor><NirCount>0</NirCount></root>",
            &SessionConfig::default(),
        )
        .unwrap();
        assert_eq!(parsed.session.pass_count, 0);
    }

    #[test]
    fn test_timeout_out_of_range_names_field() {
        let err = parse_payload("<c><timeOut>121</timeOut></c>", &SessionConfig::default())
            .unwrap_err();
        assert_eq!(err.field(), Some("timeOut"));
        assert!(err.to_string().contains("10-120"));
    }

    #[test]
    fn test_malformed_number() {
        let err = parse_payload("<c><imgWidth>wide</imgWidth></c>", &SessionConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigValidationError::Malformed { field: "imgWidth", .. }));
    }

    #[test]
    fn test_empty_known_element_rejected() {
        for payload in ["<c><NirCount/></c>", "<c><NirCount></NirCount></c>"] {
            let err = parse_payload(payload, &SessionConfig::default()).unwrap_err();
            assert_eq!(err.field(), Some("NirCount"));
        }
    }

    #[test]
    fn test_pid_outside_allow_list() {
        // 0x220a is numerically between allowed codes but not on the list
        let err = parse_payload("<c><pidR>220a</pidR></c>", &SessionConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigValidationError::UnsupportedProduct { field: "pidR", .. }
        ));
    }

    #[test]
    fn test_threshold_mode_not_selectable() {
        let err = parse_payload("<c><isActived>4</isActived></c>", &SessionConfig::default())
            .unwrap_err();
        assert_eq!(err.field(), Some("isActived"));
    }

    #[test]
    fn test_syntax_error() {
        let err = parse_payload("<c><imgWidth>640</imgHeight></c>", &SessionConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigValidationError::Syntax(_)));
    }

    proptest! {
        #[test]
        fn prop_accepts_iff_every_field_in_bounds(
            width in 0i64..1000,
            compress in -10i64..120,
            nir in -5i64..10,
            mode in -1i64..6,
            timeout in 0i64..150,
            threshold in -0.5f32..1.5,
        ) {
            let payload = format!(
                "<c><imgWidth>{width}</imgWidth><imgCompress>{compress}</imgCompress>\
                 <NirCount>{nir}</NirCount><isActived>{mode}</isActived>\
                 <timeOut>{timeout}</timeOut><liveThreshold>{threshold}</liveThreshold></c>"
            );
            let in_bounds = width >= 200
                && (0..=100).contains(&compress)
                && nir >= 0
                && (0..=3).contains(&mode)
                && (10..=120).contains(&timeout)
                && (0.0..=1.0).contains(&threshold);

            let active = SessionConfig::default();
            match parse_payload(&payload, &active) {
                Ok(parsed) => {
                    prop_assert!(in_bounds);
                    prop_assert_eq!(parsed.session.preview_width as i64, width);
                    prop_assert_eq!(parsed.session.timeout_ms as i64, timeout * 1000);
                }
                Err(err) => {
                    prop_assert!(!in_bounds);
                    prop_assert!(err.field().is_some());
                }
            }
        }
    }
}
