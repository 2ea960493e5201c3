//! The ingestion loop: transport receipt to durable storage.
//!
//! One dedicated task owns the UDP socket and drives every datagram through
//! decrypt, parse, admission, and insert. No per-packet failure stops the
//! loop; a bad key, a garbled payload, a replay, or a lost race with a
//! duplicate each log and move on to the next packet. The loop is the only
//! writer to the store and to the admission filter's seen-ID window.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::admission::{AdmissionFilter, RejectReason};
use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::reading::epoch_now;
use crate::storage::{InsertOutcome, Store};

/// Largest datagram the receiver will accept.
const MAX_DATAGRAM_LEN: usize = 65_536;

/// Pause after a transport-level receive error before retrying.
const RECV_BACKOFF: Duration = Duration::from_millis(500);

/// What became of one processed datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    /// Decoded, admitted, and stored as a new row.
    Stored,
    /// Decoded and admitted, but the row already existed; the reading is
    /// durable either way.
    AlreadyStored,
    /// Decoded but refused by the admission filter.
    Rejected(RejectReason),
}

/// The per-packet processing chain, separated from the socket so it can be
/// exercised without a network.
#[derive(Debug)]
pub struct Pipeline {
    codec: Codec,
    filter: AdmissionFilter,
    store: Store,
}

impl Pipeline {
    /// Assemble a pipeline from its stages.
    #[must_use]
    pub fn new(codec: Codec, filter: AdmissionFilter, store: Store) -> Self {
        Self {
            codec,
            filter,
            store,
        }
    }

    /// Run one datagram through decrypt, admission, and insert.
    ///
    /// `now` is the receiver clock in epoch seconds, used for both the
    /// freshness check and the row's `inserted_at` stamp.
    ///
    /// # Errors
    ///
    /// Returns decode errors (short or unauthenticated envelope, malformed
    /// plaintext) and storage errors. Admission refusals are not errors;
    /// they are [`PacketOutcome::Rejected`].
    pub fn process(&mut self, datagram: &[u8], now: f64) -> Result<PacketOutcome> {
        let (reading, raw) = self.codec.decrypt_reading(datagram)?;

        if let Err(reason) = self.filter.admit(&reading, now) {
            return Ok(PacketOutcome::Rejected(reason));
        }

        // Admission guarantees an identity; missing fields land in the
        // Rejected arm above.
        let Some((msg_id, ts)) = reading.identity() else {
            return Ok(PacketOutcome::Rejected(RejectReason::MissingIdentity));
        };

        match self
            .store
            .insert_if_absent(msg_id, ts, &reading, &raw, now)?
        {
            InsertOutcome::Inserted => Ok(PacketOutcome::Stored),
            InsertOutcome::AlreadyExists => Ok(PacketOutcome::AlreadyStored),
        }
    }
}

/// The UDP receiver task.
#[derive(Debug)]
pub struct Ingestor {
    socket: UdpSocket,
    pipeline: Pipeline,
}

impl Ingestor {
    /// Bind the receiver socket and wrap it around a pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub async fn bind(addr: &str, pipeline: Pipeline) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket, pipeline })
    }

    /// The address the receiver socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the local address cannot be determined.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive and process datagrams until `shutdown` fires.
    ///
    /// Transport receive errors are logged and retried after a short
    /// backoff. Shutdown is graceful: the in-flight packet finishes before
    /// the socket and storage handles are dropped.
    ///
    /// # Errors
    ///
    /// Currently only returns `Ok`; the signature leaves room for treating
    /// permanent resource loss as fatal.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
        info!(addr = %self.socket.local_addr()?, "Receiver listening for encrypted telemetry");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Receiver shutting down");
                    break;
                }
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, peer)) => self.handle_datagram(&buf[..len], peer),
                    Err(e) => {
                        warn!(error = %e, "Transport receive failed, backing off");
                        tokio::time::sleep(RECV_BACKOFF).await;
                    }
                }
            }
        }

        info!("Receiver stopped");
        Ok(())
    }

    /// Process one datagram, logging the outcome. Never propagates.
    fn handle_datagram(&mut self, datagram: &[u8], peer: SocketAddr) {
        match self.pipeline.process(datagram, epoch_now()) {
            Ok(PacketOutcome::Stored) => {
                debug!(%peer, "Stored telemetry reading");
            }
            Ok(PacketOutcome::AlreadyStored) => {
                debug!(%peer, "Reading already durable, dropping duplicate");
            }
            Ok(PacketOutcome::Rejected(reason)) => {
                info!(%peer, %reason, "Rejected packet");
            }
            Err(e @ (Error::AuthenticationFailed | Error::EnvelopeTooShort { .. })) => {
                warn!(%peer, error = %e, "Dropped undecryptable packet");
            }
            Err(e) if e.is_malformed_payload() => {
                warn!(%peer, error = %e, "Dropped packet with malformed plaintext");
            }
            Err(e) => {
                // Storage failure: this packet is lost, the loop continues.
                error!(%peer, error = %e, "Failed to persist packet");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::SecretKey;
    use crate::storage::Window;

    const NOW: f64 = 1_700_000_000.0;

    fn envelope(codec: &Codec, msg_id: &str, ts: f64, battery: f64) -> Vec<u8> {
        let plaintext = format!(
            r#"{{"msg_id":"{msg_id}","ts":{ts},"altitude":120.0,"speed":42.0,"battery":{battery},"location":{{"lat":12.9716,"lon":77.5946}}}}"#
        );
        codec.encrypt(plaintext.as_bytes()).unwrap()
    }

    fn test_pipeline(codec: &Codec, window: usize) -> Pipeline {
        Pipeline::new(
            codec.clone(),
            AdmissionFilter::new(60, window),
            Store::open_in_memory().unwrap(),
        )
    }

    #[test]
    fn test_duplicate_delivery_stores_once() {
        let codec = Codec::new(SecretKey::generate());
        let mut pipeline = test_pipeline(&codec, 100);

        let a = envelope(&codec, "A", NOW, 90.0);
        let b = envelope(&codec, "B", NOW, 80.0);

        assert_eq!(pipeline.process(&a, NOW).unwrap(), PacketOutcome::Stored);
        assert_eq!(pipeline.process(&b, NOW).unwrap(), PacketOutcome::Stored);
        // Replaying A's envelope is caught by the seen-ID window.
        assert_eq!(
            pipeline.process(&a, NOW).unwrap(),
            PacketOutcome::Rejected(RejectReason::Replay)
        );

        assert_eq!(pipeline.store.count().unwrap(), 2);
        let rows = pipeline.store.range(Window::All, 10, NOW).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_store_backstops_evicted_window() {
        let codec = Codec::new(SecretKey::generate());
        // A one-slot window forgets "A" as soon as "B" arrives.
        let mut pipeline = test_pipeline(&codec, 1);

        let a = envelope(&codec, "A", NOW, 90.0);
        let b = envelope(&codec, "B", NOW, 80.0);

        assert_eq!(pipeline.process(&a, NOW).unwrap(), PacketOutcome::Stored);
        assert_eq!(pipeline.process(&b, NOW).unwrap(), PacketOutcome::Stored);

        // The filter no longer remembers "A", but the primary key does.
        assert_eq!(
            pipeline.process(&a, NOW).unwrap(),
            PacketOutcome::AlreadyStored
        );
        assert_eq!(pipeline.store.count().unwrap(), 2);
    }

    #[test]
    fn test_stale_packet_never_stored() {
        let codec = Codec::new(SecretKey::generate());
        let mut pipeline = test_pipeline(&codec, 100);

        let stale = envelope(&codec, "old", NOW - 3600.0, 90.0);
        assert_eq!(
            pipeline.process(&stale, NOW).unwrap(),
            PacketOutcome::Rejected(RejectReason::StaleOrFuture)
        );

        assert_eq!(pipeline.store.count().unwrap(), 0);
        assert!(pipeline.store.latest(Window::All, NOW).unwrap().is_none());
    }

    #[test]
    fn test_future_packet_rejected() {
        let codec = Codec::new(SecretKey::generate());
        let mut pipeline = test_pipeline(&codec, 100);

        let future = envelope(&codec, "soon", NOW + 120.0, 90.0);
        assert_eq!(
            pipeline.process(&future, NOW).unwrap(),
            PacketOutcome::Rejected(RejectReason::StaleOrFuture)
        );
    }

    #[test]
    fn test_missing_identity_rejected() {
        let codec = Codec::new(SecretKey::generate());
        let mut pipeline = test_pipeline(&codec, 100);

        let envelope = codec.encrypt(br#"{"altitude": 120.0}"#).unwrap();
        assert_eq!(
            pipeline.process(&envelope, NOW).unwrap(),
            PacketOutcome::Rejected(RejectReason::MissingIdentity)
        );
    }

    #[test]
    fn test_tampered_envelope_fails_closed() {
        let codec = Codec::new(SecretKey::generate());
        let mut pipeline = test_pipeline(&codec, 100);

        let mut env = envelope(&codec, "A", NOW, 90.0);
        env[30] ^= 0x01;

        let err = pipeline.process(&env, NOW).unwrap_err();
        assert!(err.is_authentication_failure());
        assert_eq!(pipeline.store.count().unwrap(), 0);
    }

    #[test]
    fn test_wrong_key_fails_closed() {
        let sender = Codec::new(SecretKey::generate());
        let mut pipeline = test_pipeline(&Codec::new(SecretKey::generate()), 100);

        let env = envelope(&sender, "A", NOW, 90.0);
        let err = pipeline.process(&env, NOW).unwrap_err();
        assert!(err.is_authentication_failure());
    }

    #[test]
    fn test_garbage_datagram() {
        let codec = Codec::new(SecretKey::generate());
        let mut pipeline = test_pipeline(&codec, 100);

        let err = pipeline.process(b"hi", NOW).unwrap_err();
        assert!(matches!(err, Error::EnvelopeTooShort { .. }));
    }

    #[tokio::test]
    async fn test_socket_to_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("telemetry.db");

        let key = SecretKey::generate();
        let codec = Codec::new(key);
        let pipeline = Pipeline::new(
            codec.clone(),
            AdmissionFilter::new(60, 100),
            Store::open(&db_path).unwrap(),
        );

        let ingestor = Ingestor::bind("127.0.0.1:0", pipeline).await.unwrap();
        let addr = ingestor.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(ingestor.run(shutdown_rx));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let env = envelope(&codec, "live-1", epoch_now(), 95.0);
        sender.send_to(&env, addr).await.unwrap();

        // Poll the reader connection until the row lands.
        let reader = Store::open(&db_path).unwrap();
        let mut stored = false;
        for _ in 0..50 {
            if reader.count().unwrap() == 1 {
                stored = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(stored, "packet never reached the store");

        let row = reader.latest(Window::All, epoch_now()).unwrap().unwrap();
        assert_eq!(row.msg_id, "live-1");

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
