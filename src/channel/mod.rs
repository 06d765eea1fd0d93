//! The per-channel commitment state machine.
//!
//! `update_log` holds the two append-only logs of proposed updates, `state`
//! evaluates them into commitment views, `policy` decides whether a view is
//! acceptable and `machine` drives the commitment_signed/revoke_and_ack
//! exchange on top, persisting through a `ChannelStateStore`.

pub mod machine;
pub mod policy;
pub mod reestablish;
pub mod state;
pub mod update_log;

pub use machine::{
    Channel, ChannelForceClosed, LockedIn, ResolvedHtlc, SignedCommitment, MIN_FEERATE_PER_KW,
};
pub use reestablish::{plan_reestablish, ReestablishPlan, SyncPosition};
pub use state::{ChannelSetup, ChannelState, CommitmentSnapshot, CommitmentView};
pub use update_log::{LogEntry, Update, UpdateLog};
