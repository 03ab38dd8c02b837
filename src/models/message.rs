use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

use super::booking::BookingLocation;
use super::location_sample::{LocationReport, LocationSample};
use super::session::{BookingId, Role, UserId};

/// Client-to-server message.
///
/// Clients serialize this directly. The server never deserializes it with serde;
/// it goes through [`parse_client_message`] so each missing or malformed field
/// gets its own error reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Init {
        #[serde(rename = "userId")]
        user_id: UserId,
        role: Role,
    },
    SubscribeTracking {
        #[serde(rename = "bookingId")]
        booking_id: BookingId,
    },
    LocationUpdate(LocationReport),
    Ping,
}

/// Server-to-client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ConnectionEstablished,
    InitSuccess,
    SubscribeSuccess {
        #[serde(rename = "bookingId")]
        booking_id: BookingId,
    },
    LocationUpdate {
        data: LocationSample,
    },
    LastKnownLocation {
        data: BookingLocation,
    },
    Pong,
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn error(message: impl ToString) -> Self {
        ServerMessage::Error {
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawInit {
    #[serde(rename = "userId", default, deserialize_with = "parse_id_option")]
    user_id: Option<i32>,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSubscribe {
    #[serde(rename = "bookingId", default, deserialize_with = "parse_id_option")]
    booking_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct RawLocationUpdate {
    #[serde(rename = "bookingId", default, deserialize_with = "parse_id_option")]
    booking_id: Option<i32>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    latitude: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    longitude: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    speed: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    heading: Option<f64>,
}

/// Parse and validate one inbound text frame.
pub fn parse_client_message(payload: &str) -> Result<ClientMessage, ProtocolError> {
    let value: Value = serde_json::from_str(payload).map_err(|_| ProtocolError::InvalidJson)?;

    let kind = match value.get("type").and_then(Value::as_str) {
        Some(kind) if !kind.is_empty() => kind.to_string(),
        _ => return Err(ProtocolError::MissingType),
    };

    match kind.as_str() {
        "init" => {
            let raw: RawInit =
                serde_json::from_value(value).map_err(|_| ProtocolError::MissingIdentity)?;
            let (user_id, role) = match (raw.user_id.filter(|id| *id > 0), raw.role) {
                (Some(user_id), Some(role)) if !role.trim().is_empty() => (user_id, role),
                _ => return Err(ProtocolError::MissingIdentity),
            };
            let role = role.parse().map_err(ProtocolError::InvalidRole)?;
            Ok(ClientMessage::Init { user_id, role })
        }
        "subscribe_tracking" => {
            let raw: RawSubscribe =
                serde_json::from_value(value).map_err(|_| ProtocolError::MissingBookingId)?;
            let booking_id = raw
                .booking_id
                .filter(|id| *id > 0)
                .ok_or(ProtocolError::MissingBookingId)?;
            Ok(ClientMessage::SubscribeTracking { booking_id })
        }
        "location_update" => {
            let raw: RawLocationUpdate = serde_json::from_value(value)
                .map_err(|e| ProtocolError::InvalidLocation(e.to_string()))?;
            validate_location(raw).map(ClientMessage::LocationUpdate)
        }
        "ping" => Ok(ClientMessage::Ping),
        other => Err(ProtocolError::UnknownType(other.to_string())),
    }
}

fn validate_location(raw: RawLocationUpdate) -> Result<LocationReport, ProtocolError> {
    let invalid = |reason: &str| ProtocolError::InvalidLocation(reason.to_string());

    let booking_id = raw
        .booking_id
        .filter(|id| *id > 0)
        .ok_or_else(|| invalid("bookingId is required"))?;
    let latitude = raw.latitude.ok_or_else(|| invalid("latitude is required"))?;
    let longitude = raw.longitude.ok_or_else(|| invalid("longitude is required"))?;

    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(invalid("latitude must be between -90 and 90"));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(invalid("longitude must be between -180 and 180"));
    }
    if raw.speed.is_some_and(|s| !s.is_finite() || s < 0.0) {
        return Err(invalid("speed must be a non-negative number"));
    }
    if raw.heading.is_some_and(|h| !h.is_finite()) {
        return Err(invalid("heading must be a number"));
    }

    Ok(LocationReport {
        booking_id,
        latitude,
        longitude,
        speed: raw.speed,
        heading: raw.heading,
    })
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        String(String),
        Float(f64),
    }

    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(f)) => Ok(Some(f)),
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}

fn parse_id_option<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(i64),
    }

    let v: Option<StringOrInt> = Option::deserialize(deserializer)?;
    let n = match v {
        Some(StringOrInt::Int(n)) => n,
        Some(StringOrInt::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(StringOrInt::String(s)) => s.trim().parse::<i64>().map_err(serde::de::Error::custom)?,
        None => return Ok(None),
    };
    i32::try_from(n).map(Some).map_err(serde::de::Error::custom)
}
