//! Sample telemetry producer.
//!
//! Plays the sender role for exercising a receiver deployment: generates
//! readings with fresh message ids and current timestamps, seals them with
//! the shared codec, and emits them over UDP at an interval. This is an
//! operator tool, not part of the ingestion path.

use std::time::Duration;

use rand::Rng;
use tokio::net::UdpSocket;
use tracing::info;
use uuid::Uuid;

use crate::codec::Codec;
use crate::error::Result;
use crate::reading::{epoch_now, Location, Reading};

/// Emits encrypted sample telemetry to a receiver.
#[derive(Debug)]
pub struct TelemetrySender {
    socket: UdpSocket,
    codec: Codec,
    target: String,
    location: Location,
}

impl TelemetrySender {
    /// Create a sender aimed at the given receiver address.
    ///
    /// # Errors
    ///
    /// Returns an error if the local socket cannot be bound.
    pub async fn connect(target: impl Into<String>, codec: Codec) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket,
            codec,
            target: target.into(),
            location: Location {
                lat: 12.9716,
                lon: 77.5946,
            },
        })
    }

    /// Generate the next sample reading, drifting the simulated position.
    fn next_reading(&mut self) -> Reading {
        let mut rng = rand::thread_rng();
        self.location.lat += rng.gen_range(-0.001..0.001);
        self.location.lon += rng.gen_range(-0.001..0.001);

        Reading {
            msg_id: Some(Uuid::new_v4().simple().to_string()),
            ts: Some(epoch_now()),
            altitude: Some(rng.gen_range(100.0..500.0)),
            speed: Some(rng.gen_range(30.0..60.0)),
            battery: Some(rng.gen_range(60.0..100.0)),
            location: Some(self.location),
        }
    }

    /// Seal and transmit one sample reading.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, encryption, or the send fails.
    pub async fn send_one(&mut self) -> Result<Reading> {
        let reading = self.next_reading();
        let plaintext = serde_json::to_string(&reading)?;
        let envelope = self.codec.encrypt(plaintext.as_bytes())?;
        self.socket.send_to(&envelope, &self.target).await?;
        Ok(reading)
    }

    /// Emit `count` readings spaced by `interval`; `count == 0` runs until
    /// the process is stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if any send fails.
    pub async fn run(&mut self, count: u32, interval: Duration) -> Result<()> {
        let mut sent: u32 = 0;
        loop {
            let reading = self.send_one().await?;
            sent += 1;
            info!(
                seq = sent,
                msg_id = reading.msg_id.as_deref().unwrap_or(""),
                "Sent encrypted telemetry"
            );
            if count != 0 && sent >= count {
                break;
            }
            tokio::time::sleep(interval).await;
        }
        Ok(())
    }
}
