use super::{Action, Orchestrator, SessionError, SessionReport};
use crate::{
    logging,
    pdu::Pdu,
    shutdown::Shutdown,
    transport::{Endpoint, Network, Transport},
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Runs `orchestrator` over a control endpoint opened at `local` until the
/// session finishes or fails.
///
/// Receiving never blocks past the orchestrator's next wake-up, so a node that
/// goes silent surfaces as [`SessionError::Stalled`]. Triggering `shutdown`
/// stops and deregisters every node and then fails with
/// [`SessionError::Aborted`].
pub async fn run_session(
    network: &dyn Network,
    local: Endpoint,
    mut orchestrator: Orchestrator,
    shutdown: Shutdown,
) -> Result<SessionReport, SessionError> {
    let transport = network.open(local).await?;
    tracing::info!(
        "Orchestrating {} nodes from {}",
        orchestrator.descriptors().count(),
        transport.local_endpoint()
    );

    let started = Instant::now();
    let epoch_unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_millis() as u64)
        .unwrap_or_default();
    orchestrator.set_time(Duration::ZERO);
    let actions = orchestrator.start(epoch_unix_ms);
    if let Some(outcome) = perform(&*transport, actions).await {
        return outcome;
    }

    let mut interrupted = false;
    loop {
        let wake = orchestrator.next_wake().map(|offset| started + offset);
        let sleep = async move {
            match wake {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        let actions = tokio::select! {
            received = transport.recv() => {
                let (from, bytes) = received?;
                match Pdu::from_bytes(bytes.into_iter()) {
                    Ok(pdu) => {
                        logging::pdu_event(false, from, &pdu);
                        orchestrator.set_time(started.elapsed());
                        orchestrator.handle(pdu)
                    }
                    Err(e) => {
                        tracing::warn!("Discarding a malformed PDU from {}: {}", from, e);
                        continue;
                    }
                }
            }
            _ = sleep => {
                orchestrator.set_time(started.elapsed());
                orchestrator.on_wake()
            }
            _ = shutdown.wait_for_shutdown(), if !interrupted => {
                interrupted = true;
                tracing::warn!("Shutdown requested, aborting the session");
                orchestrator.set_time(started.elapsed());
                orchestrator.abort()
            }
        };

        if let Some(outcome) = perform(&*transport, actions).await {
            return outcome;
        }
    }
}

/// Sends every PDU and returns the outcome once the orchestrator is done. A
/// failed send is treated like a lost datagram.
async fn perform(
    transport: &dyn Transport,
    actions: Vec<Action>,
) -> Option<Result<SessionReport, SessionError>> {
    let mut outcome = None;
    for action in actions {
        match action {
            Action::Send { to, pdu } => {
                logging::pdu_event(true, to, &pdu);
                if let Err(e) = transport.send_pdu(to, &pdu).await {
                    tracing::warn!("Failed to send {} to {}: {}", pdu.kind(), to, e);
                }
            }
            Action::Finished(report) => outcome = Some(Ok(report)),
            Action::Failed(error) => outcome = Some(Err(error)),
        }
    }
    outcome
}
