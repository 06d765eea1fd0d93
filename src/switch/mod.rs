//! The HTLC switch: routes payments between links and keeps the circuit map
//! that ties each incoming HTLC to its outgoing one.
//!
//! A circuit is created before the packet reaches the outgoing link and is
//! deleted only after the incoming side durably committed the resolution, so
//! a crash anywhere in between leaves enough on disk to finish the payment
//! exactly once.

pub mod circuit;
pub mod registry;

pub use circuit::{Circuit, CircuitMap, ForwardPacket};
pub use registry::LinkRegistry;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::errors::SwitchError;
use crate::link::{LinkCommand, LinkEvent};
use crate::types::{ChannelId, CircuitKey, HtlcResolution, HtlcSource, PaymentId};

/// Final outcome of a payment this node originated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentResult {
    pub payment_id: PaymentId,
    pub resolution: HtlcResolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Forwarded,
    /// A circuit already existed for this incoming HTLC; nothing was sent.
    Duplicate,
}

pub struct Switch {
    circuits: CircuitMap,
    links: LinkRegistry,
    payment_results: UnboundedSender<PaymentResult>,
}

impl Switch {
    pub fn new(circuits: CircuitMap, links: LinkRegistry, payment_results: UnboundedSender<PaymentResult>) -> Self {
        Switch {
            circuits,
            links,
            payment_results,
        }
    }

    pub fn links(&self) -> &LinkRegistry {
        &self.links
    }

    pub fn circuits(&self) -> &CircuitMap {
        &self.circuits
    }

    /// Opens a circuit for `incoming` and hands the packet to the outgoing
    /// link. A second call for the same incoming HTLC sends nothing.
    pub fn forward_htlc(
        &self,
        incoming: CircuitKey,
        outgoing_channel: ChannelId,
        packet: ForwardPacket,
    ) -> Result<ForwardOutcome, SwitchError> {
        self.dispatch(HtlcSource::Forwarded(incoming), outgoing_channel, packet)
    }

    /// Sends a payment originated by this node.
    pub fn local_add_htlc(
        &self,
        payment_id: PaymentId,
        outgoing_channel: ChannelId,
        packet: ForwardPacket,
    ) -> Result<ForwardOutcome, SwitchError> {
        self.dispatch(HtlcSource::Local(payment_id), outgoing_channel, packet)
    }

    fn dispatch(
        &self,
        source: HtlcSource,
        outgoing_channel: ChannelId,
        packet: ForwardPacket,
    ) -> Result<ForwardOutcome, SwitchError> {
        if !self.links.contains(&outgoing_channel) {
            return Err(SwitchError::UnknownLink(outgoing_channel));
        }

        let circuit = Circuit {
            incoming: source,
            outgoing_channel,
            packet: packet.clone(),
            outgoing: None,
        };
        if !self.circuits.check_and_insert(circuit)? {
            debug!(source = %source, "duplicate forward ignored");
            return Ok(ForwardOutcome::Duplicate);
        }

        // The circuit is durable: a lost send is replayed by `resync`.
        if let Err(err) = self
            .links
            .send(&outgoing_channel, LinkEvent::Command(LinkCommand::AddHtlc { source, packet }))
        {
            warn!(source = %source, channel_id = %outgoing_channel, error = %err, "outgoing link unavailable");
        }
        debug!(source = %source, channel_id = %outgoing_channel, "circuit opened");
        Ok(ForwardOutcome::Forwarded)
    }

    /// Records the outgoing HTLC of a circuit once the outgoing link
    /// committed the add.
    pub fn open_circuit(&self, source: HtlcSource, outgoing: CircuitKey) -> Result<(), SwitchError> {
        self.circuits.set_keystone(&source, outgoing)?;
        debug!(source = %source, outgoing = %outgoing, "keystone set");
        Ok(())
    }

    /// The outgoing HTLC `outgoing` was irrevocably settled or failed.
    pub fn resolve_outgoing(&self, outgoing: CircuitKey, resolution: HtlcResolution) -> Result<(), SwitchError> {
        let source = self.circuits.lookup_outgoing(&outgoing).ok_or_else(|| {
            warn!(outgoing = %outgoing, "resolution for unknown outgoing htlc dropped");
            SwitchError::CircuitNotFound(HtlcSource::Forwarded(outgoing))
        })?;
        self.settle_or_fail(source, resolution)
    }

    /// Sends `resolution` back toward where `source` came from. The circuit
    /// stays open until `complete_resolution`.
    pub fn settle_or_fail(&self, source: HtlcSource, resolution: HtlcResolution) -> Result<(), SwitchError> {
        if self.circuits.get(&source).is_none() {
            warn!(source = %source, "no circuit for resolution, dropped");
            return Err(SwitchError::CircuitNotFound(source));
        }

        match source {
            HtlcSource::Forwarded(incoming) => {
                self.links.send(
                    &incoming.channel_id,
                    LinkEvent::Command(LinkCommand::Resolve {
                        htlc_id: incoming.htlc_id,
                        resolution,
                        source,
                    }),
                )?;
                debug!(source = %source, "resolution sent to incoming link");
                Ok(())
            }
            HtlcSource::Local(payment_id) => {
                // One result per payment: only after the circuit is durably gone.
                if !self.close_circuit(source)? {
                    return Ok(());
                }
                let settled = matches!(resolution, HtlcResolution::Settle(_));
                if self
                    .payment_results
                    .send(PaymentResult { payment_id, resolution })
                    .is_err()
                {
                    warn!(source = %source, "payment result receiver dropped");
                }
                info!(source = %source, settled, "local payment resolved");
                Ok(())
            }
        }
    }

    /// The incoming side durably committed the resolution: closes the
    /// circuit and lets the outgoing link forget the resolved HTLC.
    pub fn complete_resolution(&self, source: HtlcSource) -> Result<(), SwitchError> {
        self.close_circuit(source).map(|_| ())
    }

    /// Returns false when the circuit was already closed.
    fn close_circuit(&self, source: HtlcSource) -> Result<bool, SwitchError> {
        let Some(circuit) = self.circuits.remove(&source)? else {
            return Ok(false);
        };
        if let Some(outgoing) = circuit.outgoing {
            if let Err(err) = self.links.send(
                &outgoing.channel_id,
                LinkEvent::Command(LinkCommand::ResolutionAcked {
                    htlc_id: outgoing.htlc_id,
                }),
            ) {
                debug!(outgoing = %outgoing, error = %err, "resolution ack not delivered");
            }
        }
        debug!(source = %source, "circuit closed");
        Ok(true)
    }

    /// Replays half-open circuits to their outgoing links. Links re-report
    /// their keystones first, so only packets that never became an HTLC are
    /// sent again.
    pub fn resync(&self) -> usize {
        let mut replayed = 0;
        for circuit in self.circuits.half_open() {
            let event = LinkEvent::Command(LinkCommand::AddHtlc {
                source: circuit.incoming,
                packet: circuit.packet,
            });
            match self.links.send(&circuit.outgoing_channel, event) {
                Ok(()) => replayed += 1,
                Err(err) => {
                    debug!(source = %circuit.incoming, error = %err, "half-open circuit not replayed")
                }
            }
        }
        if replayed > 0 {
            info!(replayed, "replayed half-open circuits");
        }
        replayed
    }
}
