use std::net::SocketAddr;
use std::time::Instant;
use tokio::net::UdpSocket;
use tracing::Instrument;

use crate::forge::handle_raw_message;
use crate::metrics::*;
use crate::net::send_udp_bytes_to;
use crate::settings::Settings;

/// Queries are small, but leave room for EDNS padding and the like.
const RECV_BUFFER_LEN: usize = 4096;

/// Drop reason for a response which could not be encoded.
const UNSERIALISABLE: &str = "unserialisable";

/// Answer queries on a bound socket, forever.
pub async fn listen_udp(settings: Settings, socket: UdpSocket) {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((size, peer)) => {
                handle_datagram(&settings, &socket, peer, &buf[..size])
                    .instrument(tracing::error_span!("udp", %peer))
                    .await;
            }
            Err(error) => tracing::warn!(?error, "udp receive error"),
        }
    }
}

async fn handle_datagram(
    settings: &Settings,
    socket: &UdpSocket,
    peer: SocketAddr,
    octets: &[u8],
) {
    DNS_REQUESTS_TOTAL.inc();
    let start = Instant::now();

    let (kind, response) = match handle_raw_message(settings, octets) {
        Ok(answer) => answer,
        Err(reason) => {
            record_drop(reason.metric_label(), start);
            tracing::debug!(%reason, "dropped");
            return;
        }
    };

    let serialised = match response.to_octets() {
        Ok(serialised) => serialised,
        Err(error) => {
            record_drop(UNSERIALISABLE, start);
            tracing::error!(message = ?response, %error, "could not serialise message");
            return;
        }
    };
    DNS_RESPONSE_TIME_SECONDS.observe(start.elapsed().as_secs_f64());

    if let Err(error) = send_udp_bytes_to(socket, peer, &serialised).await {
        tracing::warn!(?error, "udp send error");
        return;
    }

    DNS_RESPONSES_TOTAL
        .with_label_values(&[kind.metric_label()])
        .inc();
    for rr in &response.answers {
        tracing::info!(answer = %rr, ?kind, "sent forged response");
    }
    for rr in &response.additional {
        tracing::info!(additional = %rr, "sent forged response");
    }
    if response.answers.is_empty() {
        tracing::info!("sent empty response");
    }
}

/// Every datagram which gets no reply is counted by reason, and timed
/// like the ones which do.
fn record_drop(reason: &'static str, start: Instant) {
    DNS_REQUESTS_DROPPED_TOTAL
        .with_label_values(&[reason])
        .inc();
    DNS_RESPONSE_TIME_SECONDS.observe(start.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unserialisable_responses_are_counted_and_timed() {
        let dropped = || {
            DNS_REQUESTS_DROPPED_TOTAL
                .with_label_values(&[UNSERIALISABLE])
                .get()
        };
        let before = dropped();
        let timed_before = DNS_RESPONSE_TIME_SECONDS.get_sample_count();

        record_drop(UNSERIALISABLE, Instant::now());

        assert_eq!(before + 1, dropped());
        assert!(DNS_RESPONSE_TIME_SECONDS.get_sample_count() > timed_before);
    }
}
