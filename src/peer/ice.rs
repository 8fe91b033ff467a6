use crate::error::NegotiationError;
use crate::peer::state::{ConnectionState, GatheringState};
use crate::peer::transport::Transport;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// How often the gathering state is re-checked.
pub const GATHERING_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Waits until ICE gathering reports `complete`.
///
/// The state is polled rather than awaited so transports without a completion
/// signal behave the same. Fails early if the transport closes, and after
/// `limit` with [`NegotiationError::GatheringTimeout`].
pub async fn wait_for_gathering(
    transport: &dyn Transport,
    poll: Duration,
    limit: Duration,
) -> Result<(), NegotiationError> {
    let start = Instant::now();

    loop {
        match transport.gathering_state() {
            GatheringState::Complete => {
                debug!("ICE gathering complete after {:?}", start.elapsed());
                return Ok(());
            }
            state => {
                if matches!(
                    transport.connection_state(),
                    ConnectionState::Closed | ConnectionState::Failed
                ) {
                    return Err(NegotiationError::TransportClosed);
                }
                if start.elapsed() >= limit {
                    warn!("ICE gathering still {:?} after {:?}", state, limit);
                    return Err(NegotiationError::GatheringTimeout(limit));
                }
            }
        }
        sleep(poll).await;
    }
}

/// Host / server-reflexive / relay candidate counts found in an SDP body.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(sdp: &str) -> CandidateSummary {
    let mut summary = CandidateSummary::default();

    for line in sdp.lines().filter(|l| l.starts_with("a=candidate:")) {
        if line.contains("typ host") {
            summary.host += 1;
        } else if line.contains("typ srflx") {
            summary.srflx += 1;
        } else if line.contains("typ relay") {
            summary.relay += 1;
        }
    }

    debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );
    if summary.srflx == 0 && summary.relay == 0 {
        warn!("no server-reflexive or relay candidates, peers behind NAT may not connect");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_candidate_types() {
        let sdp = "v=0\r\n\
            a=candidate:1 1 udp 2130706431 10.0.0.2 50000 typ host\r\n\
            a=candidate:2 1 udp 1694498815 1.2.3.4 50001 typ srflx raddr 10.0.0.2 rport 50000\r\n\
            a=candidate:3 1 udp 16777215 5.6.7.8 3478 typ relay raddr 1.2.3.4 rport 50001\r\n\
            a=candidate:4 1 udp 2130706431 10.0.0.3 50002 typ host\r\n";
        assert_eq!(
            analyze_candidates(sdp),
            CandidateSummary {
                host: 2,
                srflx: 1,
                relay: 1
            }
        );
    }
}
