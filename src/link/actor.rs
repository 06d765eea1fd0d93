use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::channel::{Channel, ResolvedHtlc};
use crate::config::LinkConfig;
use crate::errors::{ChannelError, LinkError, PolicyViolation, ProtocolViolation, SwitchError};
use crate::interfaces::{ChainBackend, PeerTransport, RouteDecision, RouteProvider};
use crate::link::{LinkCommand, LinkEvent, LinkNotification};
use crate::switch::{ForwardPacket, Switch};
use crate::types::{
    ChannelId, ChannelStatus, CircuitKey, HtlcId, HtlcResolution, HtlcSource, IncomingHtlc, PaymentPreimage,
    PeerId,
};
use crate::wire::{ChannelReestablish, CommitmentSigned, ErrorMessage, Message, RevokeAndAck, TlvStream};

// Onion failure codes relayed back in update_fail_htlc.
const PERM: u16 = 0x4000;
const UPDATE: u16 = 0x1000;
pub const TEMPORARY_CHANNEL_FAILURE: u16 = UPDATE | 7;
pub const UNKNOWN_NEXT_PEER: u16 = PERM | 10;
pub const FEE_INSUFFICIENT: u16 = UPDATE | 12;
pub const INCORRECT_CLTV_EXPIRY: u16 = UPDATE | 13;
pub const INCORRECT_OR_UNKNOWN_PAYMENT_DETAILS: u16 = PERM | 15;

pub fn failure_reason(code: u16) -> Vec<u8> {
    code.to_be_bytes().to_vec()
}

/// Drives one channel. Owns the `Channel` exclusively; everything else
/// reaches it through `LinkEvent`s.
pub struct ChannelLink {
    channel: Channel,
    peer: PeerId,
    transport: Arc<dyn PeerTransport>,
    switch: Arc<Switch>,
    router: Arc<dyn RouteProvider>,
    chain: Arc<dyn ChainBackend + Send + Sync>,
    notifications: UnboundedSender<LinkNotification>,
    config: LinkConfig,

    connected: bool,
    reestablished: bool,
    stalled: bool,
    persist_failures: u32,
    deferred: VecDeque<LinkCommand>,
    first_unsigned_at: Option<Instant>,
    revocation_deadline: Option<Instant>,
    stopped: bool,
}

impl ChannelLink {
    pub fn new(
        channel: Channel,
        transport: Arc<dyn PeerTransport>,
        switch: Arc<Switch>,
        router: Arc<dyn RouteProvider>,
        chain: Arc<dyn ChainBackend + Send + Sync>,
        notifications: UnboundedSender<LinkNotification>,
        config: LinkConfig,
    ) -> Self {
        ChannelLink {
            peer: channel.counterparty(),
            channel,
            transport,
            switch,
            router,
            chain,
            notifications,
            config,
            connected: false,
            reestablished: false,
            stalled: false,
            persist_failures: 0,
            deferred: VecDeque::new(),
            first_unsigned_at: None,
            revocation_deadline: None,
            stopped: false,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel.channel_id()
    }

    pub fn switch(&self) -> &Arc<Switch> {
        &self.switch
    }

    pub async fn run(mut self, mut events: UnboundedReceiver<LinkEvent>) {
        let channel_id = self.channel_id();
        info!(channel_id = %channel_id, peer = %self.peer, "link started");
        self.resume();

        let mut ticker = time::interval(self.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.stopped {
            tokio::select! {
                event = events.recv() => match event {
                    Some(LinkEvent::Stop) | None => break,
                    Some(event) => self.handle_event(event),
                },
                _ = ticker.tick() => self.handle_event(LinkEvent::Tick),
            }
        }

        self.switch.links().unregister(&channel_id);
        let _ = self.notifications.send(LinkNotification::Stopped { channel_id });
        info!(channel_id = %channel_id, "link stopped");
    }

    fn handle_event(&mut self, event: LinkEvent) {
        let result = match event {
            LinkEvent::PeerConnected => self.on_connected(),
            LinkEvent::PeerDisconnected => {
                self.on_disconnected();
                Ok(())
            }
            LinkEvent::PeerBytes(bytes) => self.on_peer_bytes(&bytes),
            LinkEvent::Command(command) => self.on_command(command),
            LinkEvent::BlockConnected(height) => self.on_block(height),
            LinkEvent::Tick => self.on_tick(),
            LinkEvent::Stop => {
                self.stopped = true;
                Ok(())
            }
        };
        if let Err(err) = result {
            self.on_error(err);
        }
    }

    fn is_operational(&self) -> bool {
        matches!(self.channel.status(), ChannelStatus::Normal | ChannelStatus::ShuttingDown)
    }

    /// Re-reports everything the switch may have missed before a restart or
    /// a store outage.
    fn resume(&mut self) {
        if !self.is_operational() {
            return;
        }
        for (htlc_id, source) in self.channel.outgoing_keystones() {
            if let Err(err) = self.report_keystone(source, htlc_id) {
                self.on_error(err);
                return;
            }
        }
        for htlc in self.channel.unhanded_incoming() {
            if let Err(err) = self.route_incoming(htlc) {
                self.on_error(err);
                return;
            }
        }
        for resolved in self.channel.unhanded_resolutions() {
            if let Err(err) = self.deliver_resolution(resolved) {
                self.on_error(err);
                return;
            }
        }
    }

    // ========================================================================
    // PEER
    // ========================================================================

    /// Sends if the peer is connected. Anything not delivered is recovered
    /// through channel_reestablish.
    fn send(&mut self, msg: &Message) -> Result<(), LinkError> {
        if !self.connected {
            return Ok(());
        }
        let bytes = msg.encode()?;
        debug!(channel_id = %self.channel_id(), msg = msg.type_name(), "sending");
        self.transport.send(&self.peer, bytes)?;
        Ok(())
    }

    /// Channel updates wait for reestablishment to finish.
    fn send_update(&mut self, msg: &Message) -> Result<(), LinkError> {
        if !self.reestablished {
            return Ok(());
        }
        self.send(msg)
    }

    fn on_connected(&mut self) -> Result<(), LinkError> {
        self.connected = true;
        self.reestablished = false;
        if !self.is_operational() {
            return Ok(());
        }
        self.channel.drop_uncommitted_remote_updates();
        let msg = Message::ChannelReestablish(self.channel.reestablish_message());
        info!(channel_id = %self.channel_id(), "peer connected, reestablishing");
        self.send(&msg)
    }

    fn on_disconnected(&mut self) {
        if self.connected {
            info!(channel_id = %self.channel_id(), "peer disconnected");
        }
        self.connected = false;
        self.reestablished = false;
    }

    fn on_peer_bytes(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let msg = Message::decode(bytes).map_err(|e| ChannelError::from(ProtocolViolation::Malformed(e)))?;
        if let Some(channel_id) = msg.channel_id() {
            if channel_id != self.channel_id() {
                warn!(channel_id = %self.channel_id(), other = %channel_id, "message for another channel dropped");
                return Ok(());
            }
        }
        debug!(channel_id = %self.channel_id(), msg = msg.type_name(), "received");

        match msg {
            Message::ChannelReestablish(m) => self.on_reestablish(&m),
            Message::UpdateAddHtlc(m) => Ok(self.channel.receive_update_add(&m)?),
            Message::UpdateFulfillHtlc(m) => Ok(self.channel.receive_update_fulfill(&m)?),
            Message::UpdateFailHtlc(m) => Ok(self.channel.receive_update_fail(&m)?),
            Message::UpdateFee(m) => Ok(self.channel.receive_update_fee(&m)?),
            Message::CommitmentSigned(m) => self.on_commitment_signed(&m),
            Message::RevokeAndAck(m) => self.on_revoke_and_ack(&m),
            Message::Shutdown(m) => {
                if let Some(reply) = self.channel.receive_shutdown(&m)? {
                    self.send_update(&Message::Shutdown(reply))?;
                }
                self.check_drained();
                Ok(())
            }
            Message::Error(m) => {
                let text = String::from_utf8_lossy(&m.data).into_owned();
                Err(ChannelError::from(ProtocolViolation::RemoteError(text)).into())
            }
            Message::Unknown { msg_type, .. } => {
                debug!(channel_id = %self.channel_id(), msg_type, "ignoring unknown odd message");
                Ok(())
            }
        }
    }

    fn on_reestablish(&mut self, msg: &ChannelReestablish) -> Result<(), LinkError> {
        let resend = self.channel.handle_reestablish(msg)?;
        self.reestablished = true;
        info!(channel_id = %self.channel_id(), resent = resend.len(), "channel reestablished");

        for msg in &resend {
            self.send(msg)?;
        }
        if self.channel.awaiting_revocation() {
            self.revocation_deadline = Some(Instant::now() + self.config.revocation_timeout());
        }
        self.flush_deferred()?;
        self.maybe_sign(false)
    }

    fn on_commitment_signed(&mut self, msg: &CommitmentSigned) -> Result<(), LinkError> {
        let revocation = self.channel.receive_commitment_sig(msg)?;
        self.send_update(&Message::RevokeAndAck(revocation))?;
        self.maybe_sign(true)
    }

    fn on_revoke_and_ack(&mut self, msg: &RevokeAndAck) -> Result<(), LinkError> {
        let locked_in = self.channel.receive_revoke_and_ack(msg)?;
        self.revocation_deadline = None;

        for htlc in locked_in.adds {
            self.route_incoming(htlc)?;
        }
        for resolved in locked_in.resolutions {
            self.deliver_resolution(resolved)?;
        }
        self.check_drained();
        self.maybe_sign(true)
    }

    fn check_drained(&self) {
        if self.channel.status() == ChannelStatus::ShuttingDown && self.channel.is_drained() {
            info!(channel_id = %self.channel_id(), "channel drained, ready for closing negotiation");
        }
    }

    // ========================================================================
    // SIGNING
    // ========================================================================

    fn note_unsigned(&mut self) {
        if self.first_unsigned_at.is_none() {
            self.first_unsigned_at = Some(Instant::now());
        }
    }

    /// Signs when the batch is full, the batch interval elapsed, or `reply`
    /// asks to acknowledge the peer's updates right away.
    fn maybe_sign(&mut self, reply: bool) -> Result<(), LinkError> {
        if !self.connected || !self.reestablished || self.stalled || !self.channel.can_sign() {
            return Ok(());
        }
        let pending = self.channel.unsigned_local_update_count();
        let interval_elapsed = self
            .first_unsigned_at
            .map_or(false, |t| t.elapsed() >= self.config.batch_interval());

        if reply || pending >= self.config.batch_size || interval_elapsed {
            return self.sign();
        }
        if pending > 0 {
            self.note_unsigned();
        }
        Ok(())
    }

    fn sign(&mut self) -> Result<(), LinkError> {
        let signed = self.channel.sign_next_commitment()?;
        self.first_unsigned_at = None;
        self.revocation_deadline = Some(Instant::now() + self.config.revocation_timeout());
        debug!(
            channel_id = %self.channel_id(),
            newly_signed = signed.newly_signed.len(),
            "sending commitment"
        );
        self.send_update(&Message::CommitmentSigned(signed.message))
    }

    // ========================================================================
    // SWITCH
    // ========================================================================

    fn on_command(&mut self, command: LinkCommand) -> Result<(), LinkError> {
        if self.stalled || (matches!(command, LinkCommand::AddHtlc { .. }) && !self.reestablished) {
            self.deferred.push_back(command);
            return Ok(());
        }

        let result = match command.clone() {
            LinkCommand::AddHtlc { source, packet } => self.add_htlc(source, packet),
            LinkCommand::Resolve {
                htlc_id,
                resolution,
                source,
            } => self.resolve_incoming(htlc_id, resolution, source),
            LinkCommand::ResolutionAcked { htlc_id } => match self.channel.mark_resolution_handed_off(htlc_id) {
                Err(ChannelError::LocalPolicyReject(PolicyViolation::UnknownHtlc(_))) => Ok(()),
                other => other.map_err(LinkError::from),
            },
        };
        if let Err(err) = &result {
            if is_persistence(err) {
                self.deferred.push_back(command);
            }
        }
        result
    }

    fn flush_deferred(&mut self) -> Result<(), LinkError> {
        for _ in 0..self.deferred.len() {
            if self.stalled {
                break;
            }
            let Some(command) = self.deferred.pop_front() else {
                break;
            };
            self.on_command(command)?;
        }
        Ok(())
    }

    fn add_htlc(&mut self, source: HtlcSource, packet: ForwardPacket) -> Result<(), LinkError> {
        if let Some(htlc_id) = self.channel.find_outgoing(&source) {
            return self.report_keystone(source, htlc_id);
        }

        match self.channel.propose_add_htlc(
            packet.amount_msat,
            packet.payment_hash,
            packet.cltv_expiry,
            packet.onion_routing_packet,
            Some(source),
        ) {
            Ok(msg) => {
                let htlc_id = msg.htlc_id;
                self.note_unsigned();
                self.send_update(&Message::UpdateAddHtlc(msg))?;
                self.report_keystone(source, htlc_id)?;
                self.maybe_sign(false)
            }
            Err(ChannelError::LocalPolicyReject(reason)) => {
                info!(channel_id = %self.channel_id(), source = %source, reason = %reason, "add refused, failing back");
                let resolution = HtlcResolution::Fail(failure_reason(TEMPORARY_CHANNEL_FAILURE));
                match self.switch.settle_or_fail(source, resolution) {
                    Ok(()) | Err(SwitchError::CircuitNotFound(_)) => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    fn report_keystone(&mut self, source: HtlcSource, htlc_id: HtlcId) -> Result<(), LinkError> {
        let outgoing = CircuitKey {
            channel_id: self.channel_id(),
            htlc_id,
        };
        match self.switch.open_circuit(source, outgoing) {
            Ok(()) => Ok(()),
            Err(SwitchError::CircuitNotFound(_)) => {
                debug!(channel_id = %self.channel_id(), htlc_id, "circuit already closed");
                Ok(())
            }
            Err(SwitchError::KeystoneMismatch { htlc_source }) => {
                warn!(channel_id = %self.channel_id(), htlc_id, source = %htlc_source, "circuit bound elsewhere");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Settles or fails the peer's HTLC on instruction from the switch, then
    /// lets the switch close the circuit.
    fn resolve_incoming(
        &mut self,
        htlc_id: HtlcId,
        resolution: HtlcResolution,
        source: HtlcSource,
    ) -> Result<(), LinkError> {
        let proposed = match resolution {
            HtlcResolution::Settle(preimage) => self
                .channel
                .propose_settle_htlc(htlc_id, preimage)
                .map(Message::UpdateFulfillHtlc),
            HtlcResolution::Fail(reason) => self.channel.propose_fail_htlc(htlc_id, reason).map(Message::UpdateFailHtlc),
        };

        match proposed {
            Ok(msg) => {
                self.note_unsigned();
                self.send_update(&msg)?;
            }
            Err(ChannelError::LocalPolicyReject(PolicyViolation::HtlcAlreadyResolving(_))) => {}
            Err(ChannelError::LocalPolicyReject(PolicyViolation::UnknownHtlc(_))) => {
                warn!(channel_id = %self.channel_id(), htlc_id, "resolution for unknown incoming htlc");
            }
            Err(err) => return Err(err.into()),
        }

        self.switch.complete_resolution(source)?;
        self.maybe_sign(false)
    }

    /// Acts on a peer HTLC that just locked in.
    fn route_incoming(&mut self, htlc: IncomingHtlc) -> Result<(), LinkError> {
        if self.channel.status() == ChannelStatus::ShuttingDown {
            debug!(channel_id = %self.channel_id(), htlc_id = htlc.htlc_id, "refusing add that raced our shutdown");
            return self.fail_incoming(htlc.htlc_id, failure_reason(TEMPORARY_CHANNEL_FAILURE));
        }
        match self.router.route(&htlc) {
            RouteDecision::Forward {
                outgoing_channel,
                amount_msat,
                cltv_expiry,
            } => {
                if amount_msat > htlc.amount_msat {
                    warn!(channel_id = %self.channel_id(), htlc_id = htlc.htlc_id, "forward pays more than it receives");
                    return self.fail_incoming(htlc.htlc_id, failure_reason(FEE_INSUFFICIENT));
                }
                if cltv_expiry.saturating_add(self.config.cltv_expiry_delta) > htlc.cltv_expiry {
                    warn!(channel_id = %self.channel_id(), htlc_id = htlc.htlc_id, "forward expiry delta too small");
                    return self.fail_incoming(htlc.htlc_id, failure_reason(INCORRECT_CLTV_EXPIRY));
                }

                let packet = ForwardPacket {
                    amount_msat,
                    payment_hash: htlc.payment_hash,
                    cltv_expiry,
                    onion_routing_packet: htlc.onion_routing_packet.clone(),
                };
                match self.switch.forward_htlc(htlc.circuit_key(), outgoing_channel, packet) {
                    Ok(outcome) => {
                        debug!(channel_id = %self.channel_id(), htlc_id = htlc.htlc_id, outcome = ?outcome, "forwarded");
                        self.channel.mark_incoming_handed_off(htlc.htlc_id)?;
                        Ok(())
                    }
                    Err(SwitchError::UnknownLink(_)) | Err(SwitchError::LinkUnavailable(_)) => {
                        self.fail_incoming(htlc.htlc_id, failure_reason(UNKNOWN_NEXT_PEER))
                    }
                    Err(err) => Err(err.into()),
                }
            }
            RouteDecision::Settle(preimage) => self.settle_incoming(htlc.htlc_id, preimage),
            RouteDecision::Fail(reason) => self.fail_incoming(htlc.htlc_id, reason),
        }
    }

    fn settle_incoming(&mut self, htlc_id: HtlcId, preimage: PaymentPreimage) -> Result<(), LinkError> {
        match self.channel.propose_settle_htlc(htlc_id, preimage) {
            Ok(msg) => {
                info!(channel_id = %self.channel_id(), htlc_id, "settling as final hop");
                self.note_unsigned();
                self.send_update(&Message::UpdateFulfillHtlc(msg))?;
                self.maybe_sign(false)
            }
            Err(ChannelError::LocalPolicyReject(PolicyViolation::InvalidPreimage(_))) => {
                warn!(channel_id = %self.channel_id(), htlc_id, "route provider returned a wrong preimage");
                self.fail_incoming(htlc_id, failure_reason(TEMPORARY_CHANNEL_FAILURE))
            }
            Err(ChannelError::LocalPolicyReject(PolicyViolation::HtlcAlreadyResolving(_))) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn fail_incoming(&mut self, htlc_id: HtlcId, reason: Vec<u8>) -> Result<(), LinkError> {
        match self.channel.propose_fail_htlc(htlc_id, reason) {
            Ok(msg) => {
                self.note_unsigned();
                self.send_update(&Message::UpdateFailHtlc(msg))?;
                self.maybe_sign(false)
            }
            Err(ChannelError::LocalPolicyReject(PolicyViolation::HtlcAlreadyResolving(_))) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Hands an irrevocable resolution of our HTLC to the switch. The entry
    /// is marked handed off once the switch acknowledges it.
    fn deliver_resolution(&mut self, resolved: ResolvedHtlc) -> Result<(), LinkError> {
        if resolved.source.is_none() {
            self.channel.mark_resolution_handed_off(resolved.htlc_id)?;
            return Ok(());
        }
        let outgoing = CircuitKey {
            channel_id: self.channel_id(),
            htlc_id: resolved.htlc_id,
        };
        match self.switch.resolve_outgoing(outgoing, resolved.resolution) {
            Ok(()) => Ok(()),
            Err(SwitchError::CircuitNotFound(_)) => {
                self.channel.mark_resolution_handed_off(resolved.htlc_id)?;
                Ok(())
            }
            Err(SwitchError::UnknownLink(_)) | Err(SwitchError::LinkUnavailable(_)) => {
                warn!(channel_id = %self.channel_id(), htlc_id = resolved.htlc_id, "incoming link down, resolution held");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    // ========================================================================
    // CHAIN AND TIMERS
    // ========================================================================

    fn on_block(&mut self, height: u32) -> Result<(), LinkError> {
        if !self.is_operational() {
            return Ok(());
        }
        let expiring = self
            .channel
            .htlcs_needing_chain_action(height, self.config.expiry_safety_margin);
        if !expiring.is_empty() {
            warn!(channel_id = %self.channel_id(), height, htlcs = ?expiring, "htlcs near expiry");
            self.fail_channel(format!("htlcs {:?} must be resolved on-chain", expiring), false);
        }
        Ok(())
    }

    fn on_tick(&mut self) -> Result<(), LinkError> {
        if self.stalled {
            self.retry_store()?;
            if self.stalled {
                return Ok(());
            }
        }

        if let Some(deadline) = self.revocation_deadline {
            if Instant::now() >= deadline && self.channel.awaiting_revocation() {
                warn!(channel_id = %self.channel_id(), "peer did not revoke in time");
                self.fail_channel("revocation timeout".to_string(), false);
                return Ok(());
            }
        }

        if self.reestablished {
            self.flush_deferred()?;
        }
        self.maybe_sign(false)
    }

    fn retry_store(&mut self) -> Result<(), LinkError> {
        match self.channel.persist() {
            Ok(()) => {
                info!(channel_id = %self.channel_id(), attempts = self.persist_failures, "store recovered");
                self.stalled = false;
                self.persist_failures = 0;
                self.resume();
                Ok(())
            }
            Err(err) => {
                self.persist_failures += 1;
                debug!(channel_id = %self.channel_id(), attempts = self.persist_failures, error = %err, "store still failing");
                if self.persist_failures >= self.config.max_persist_retries {
                    return Err(LinkError::StoreUnrecoverable {
                        attempts: self.persist_failures,
                    });
                }
                Ok(())
            }
        }
    }

    // ========================================================================
    // FAILURE
    // ========================================================================

    fn on_error(&mut self, err: LinkError) {
        if err.is_fatal() {
            let data_loss = matches!(err, LinkError::Channel(ChannelError::LocalDataLoss));
            self.fail_channel(err.to_string(), data_loss);
            return;
        }

        if is_persistence(&err) {
            if !self.stalled {
                warn!(channel_id = %self.channel_id(), error = %err, "store failed, link stalled");
            }
            self.stalled = true;
            self.transport.disconnect(&self.peer);
            self.on_disconnected();
            return;
        }

        match err {
            LinkError::TransientLinkFailure(err) => {
                debug!(channel_id = %self.channel_id(), error = %err, "peer unreachable");
                self.on_disconnected();
            }
            other => warn!(channel_id = %self.channel_id(), error = %other, "link operation failed"),
        }
    }

    /// Tells the peer, then either broadcasts our commitment or, when we lost
    /// data, waits for the peer to close. Stops the link.
    fn fail_channel(&mut self, reason: String, data_loss: bool) {
        let channel_id = self.channel_id();
        error!(channel_id = %channel_id, reason = %reason, "failing channel");

        let msg = Message::Error(ErrorMessage {
            channel_id,
            data: reason.into_bytes(),
            extensions: TlvStream::new(),
        });
        if let Err(err) = self.send(&msg) {
            debug!(channel_id = %channel_id, error = %err, "error message not delivered");
        }

        if data_loss {
            let _ = self.notifications.send(LinkNotification::DataLoss { channel_id });
        } else {
            match self.channel.force_close() {
                Ok(closed) => {
                    self.chain.broadcast_transactions(&[&closed.commitment_tx]);
                    let _ = self.notifications.send(LinkNotification::ForceClosed(closed));
                }
                Err(err) => error!(channel_id = %channel_id, error = %err, "force close failed"),
            }
        }

        self.transport.disconnect(&self.peer);
        self.connected = false;
        self.stopped = true;
    }
}

fn is_persistence(err: &LinkError) -> bool {
    matches!(
        err,
        LinkError::Channel(ChannelError::PersistenceFailure(_)) | LinkError::Switch(SwitchError::Persistence(_))
    )
}
