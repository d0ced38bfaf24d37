use serde_json::Value;

use crate::types::{GameMode, TelemetrySample};

#[derive(Debug)]
pub enum ParsedClientMessage {
    Join {
        room: Option<String>,
        mode: GameMode,
    },
    Sensor(TelemetrySample),
    Watch {
        room: Option<String>,
    },
    Ping {
        t: f64,
    },
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "join" => {
            let room = parse_optional_string(object.get("room"))?;
            let mode = GameMode::parse(object.get("mode")?.as_str()?)?;
            Some(ParsedClientMessage::Join { room, mode })
        }
        "sensor" => Some(ParsedClientMessage::Sensor(TelemetrySample {
            roll: lenient_number(object.get("b")),
            pitch: lenient_number(object.get("g")),
            acceleration_z: lenient_number(object.get("accelerationZ")),
        })),
        "watch" => {
            let room = parse_optional_string(object.get("room"))?;
            Some(ParsedClientMessage::Watch { room })
        }
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

fn parse_optional_string(value: Option<&Value>) -> Option<Option<String>> {
    match value {
        None | Some(Value::Null) => Some(None),
        Some(value) => Some(Some(value.as_str()?.to_string())),
    }
}

/// Telemetry never fails to parse: anything that is not a finite number
/// (or a string holding one) reads as zero.
fn lenient_number(value: Option<&Value>) -> f32 {
    let number = match value {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    number
        .filter(|number| number.is_finite())
        .map(|number| number as f32)
        .filter(|number| number.is_finite())
        .unwrap_or(0.0)
}
