use meter_core::{DeviceError, Sample, TimeBase};
use serde::{Deserialize, Serialize};

/// One newline-delimited JSON message from a remote meter server.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MeterMessage {
    /// A new measurement. Readings without a timestamp are stamped on arrival.
    Reading {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp_us: Option<u64>,
        value: f64,
    },
    /// The instrument polled but had nothing new.
    Idle,
    /// The instrument reported a fault for this poll.
    Fault { message: String },
}

impl MeterMessage {
    pub fn parse(line: &str) -> Result<Self, DeviceError> {
        serde_json::from_str(line).map_err(|e| DeviceError::Malformed(format!("{e}: {line}")))
    }

    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }

    /// Map onto the device read contract.
    pub fn into_reading(self, timebase: &TimeBase) -> Result<Option<Sample>, DeviceError> {
        match self {
            MeterMessage::Reading {
                timestamp_us,
                value,
            } => {
                if !value.is_finite() {
                    return Err(DeviceError::Malformed(format!("non-finite value {value}")));
                }
                let timestamp_us = timestamp_us.unwrap_or_else(|| timebase.now_us());
                Ok(Some(Sample::new(timestamp_us, value)))
            }
            MeterMessage::Idle => Ok(None),
            MeterMessage::Fault { message } => Err(DeviceError::Fault(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reading_with_timestamp() {
        let msg = MeterMessage::parse(r#"{"type":"reading","timestamp_us":42,"value":0.5}"#)
            .unwrap();
        let sample = msg.into_reading(&TimeBase::new()).unwrap();
        assert_eq!(sample, Some(Sample::new(42, 0.5)));
    }

    #[test]
    fn stamps_reading_without_timestamp() {
        let msg = MeterMessage::parse(r#"{"type":"reading","value":1.25}"#).unwrap();
        let sample = msg.into_reading(&TimeBase::new()).unwrap().unwrap();
        assert_eq!(sample.value, 1.25);
    }

    #[test]
    fn idle_and_fault() {
        let tb = TimeBase::new();
        assert_eq!(
            MeterMessage::parse(r#"{"type":"idle"}"#)
                .unwrap()
                .into_reading(&tb)
                .unwrap(),
            None
        );
        let fault = MeterMessage::parse(r#"{"type":"fault","message":"sensor unplugged"}"#)
            .unwrap()
            .into_reading(&tb);
        assert!(matches!(fault, Err(DeviceError::Fault(m)) if m == "sensor unplugged"));
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(matches!(
            MeterMessage::parse(r#"{"type":"recommendation"}"#),
            Err(DeviceError::Malformed(_))
        ));
        assert!(matches!(
            MeterMessage::parse("not json"),
            Err(DeviceError::Malformed(_))
        ));
    }

    #[test]
    fn line_is_newline_terminated() {
        let line = MeterMessage::Idle.to_line();
        assert_eq!(line, "{\"type\":\"idle\"}\n");
    }
}
