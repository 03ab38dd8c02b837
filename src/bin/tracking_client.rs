//! Headless tracking client.
//!
//! Connects with the identity and booking from the environment, logs every
//! message from the server, and forwards fixes typed on stdin as
//! `lat,lon[,speed[,heading]]`.

use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use limo_tracking::client::{ConnectionStatus, LocationFix, TrackingClient};
use limo_tracking::config::ClientConfig;
use limo_tracking::models::message::ServerMessage;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ClientConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Connecting to {}", config.url);
    if config.user_id.is_none() || config.role.is_none() {
        warn!("TRACKING_USER_ID/TRACKING_ROLE not set; init is deferred");
    }

    let (client, mut events) = TrackingClient::spawn(config);
    let mut status = client.status();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ServerMessage::LocationUpdate { data }) => info!(
                    "Booking {} at ({}, {}) speed={:?} heading={:?} [{}]",
                    data.booking_id, data.latitude, data.longitude, data.speed, data.heading, data.timestamp
                ),
                Some(ServerMessage::LastKnownLocation { data }) => info!(
                    "Booking {} last seen at ({}, {}) [{}]",
                    data.booking_id, data.last_known_latitude, data.last_known_longitude, data.last_location_update
                ),
                Some(ServerMessage::Error { message }) => warn!("Server error: {}", message),
                Some(other) => info!("Server: {:?}", other),
                None => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                info!("Status: {:?}", current);
                if let ConnectionStatus::Failed(message) = current {
                    error!("{}", message);
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match parse_fix(&line) {
                    Ok(fix) => client.send_location(fix),
                    Err(e) => warn!("{}", e),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    client.shutdown().await;
    Ok(())
}

fn parse_fix(line: &str) -> Result<LocationFix> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 2 || fields.len() > 4 {
        return Err(anyhow!("Expected lat,lon[,speed[,heading]], got '{}'", line));
    }

    let number = |s: &str| -> Result<f64> {
        s.parse::<f64>()
            .map_err(|_| anyhow!("'{}' is not a number", s))
    };
    let optional = |i: usize| -> Result<Option<f64>> {
        match fields.get(i) {
            Some(s) if !s.is_empty() => number(s).map(Some),
            _ => Ok(None),
        }
    };

    Ok(LocationFix {
        latitude: number(fields[0])?,
        longitude: number(fields[1])?,
        speed: optional(2)?,
        heading: optional(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fix() {
        let fix = parse_fix("29.76, -95.37").unwrap();
        assert_eq!(fix.latitude, 29.76);
        assert_eq!(fix.longitude, -95.37);
        assert_eq!(fix.speed, None);

        let fix = parse_fix("29.76,-95.37,,270").unwrap();
        assert_eq!(fix.speed, None);
        assert_eq!(fix.heading, Some(270.0));

        assert!(parse_fix("29.76").is_err());
        assert!(parse_fix("north,-95.37").is_err());
        assert!(parse_fix("1,2,3,4,5").is_err());
    }
}
