//! Channel constraints shared by locally proposed and peer-proposed updates.
//! A violation is a `LocalPolicyReject` for our own proposals and a
//! protocol violation when the peer sends it.

use crate::channel::state::{commitment_htlcs, ChannelState, CommitmentView};
use crate::errors::PolicyViolation;
use crate::transactions::{calculate_commitment_tx_fee, count_untrimmed_htlcs, is_htlc_dust};
use crate::types::HtlcDirection;

/// Commitment fee plus anchors the funder pays on the costlier of the two
/// commitments for `view`, in msat.
pub fn funder_commitment_cost_msat(state: &ChannelState, view: &CommitmentView) -> u64 {
    let format = state.format.capability();
    let local_untrimmed = count_untrimmed_htlcs(
        &commitment_htlcs(&view.htlcs, true),
        state.local_limits.dust_limit_sat,
        view.feerate_per_kw,
        format,
    );
    let remote_untrimmed = count_untrimmed_htlcs(
        &commitment_htlcs(&view.htlcs, false),
        state.remote_limits.dust_limit_sat,
        view.feerate_per_kw,
        format,
    );
    let fee_sat = calculate_commitment_tx_fee(
        format,
        view.feerate_per_kw,
        local_untrimmed.max(remote_untrimmed),
    );
    (fee_sat + format.anchor_output_sat() * 2) * 1000
}

/// Value of HTLCs trimmed to dust on either commitment.
pub fn dust_exposure_msat(state: &ChannelState, view: &CommitmentView) -> u64 {
    let format = state.format.capability();
    view.htlcs
        .iter()
        .filter(|h| {
            let offered_by_us = h.direction == HtlcDirection::Offered;
            let amount_sat = h.amount_msat / 1000;
            is_htlc_dust(format, amount_sat, state.local_limits.dust_limit_sat, view.feerate_per_kw, offered_by_us)
                || is_htlc_dust(format, amount_sat, state.remote_limits.dust_limit_sat, view.feerate_per_kw, !offered_by_us)
        })
        .map(|h| h.amount_msat)
        .sum()
}

fn funder_balance_msat(state: &ChannelState, view: &CommitmentView) -> u64 {
    if state.is_funder {
        view.to_local_msat
    } else {
        view.to_remote_msat
    }
}

/// Checks a view that already contains the new HTLC offered by `offerer`.
pub fn validate_add(
    state: &ChannelState,
    view: &CommitmentView,
    offerer: HtlcDirection,
    amount_msat: u64,
) -> Result<(), PolicyViolation> {
    let (offerer_limits, receiver_limits, offerer_balance, offerer_is_funder) = match offerer {
        HtlcDirection::Offered => (&state.local_limits, &state.remote_limits, view.to_local_msat, state.is_funder),
        HtlcDirection::Received => (&state.remote_limits, &state.local_limits, view.to_remote_msat, !state.is_funder),
    };

    if amount_msat == 0 || amount_msat < receiver_limits.htlc_minimum_msat {
        return Err(PolicyViolation::BelowHtlcMinimum {
            amount_msat,
            minimum_msat: receiver_limits.htlc_minimum_msat,
        });
    }

    if view.offered_by(offerer).count() > receiver_limits.max_accepted_htlcs as usize {
        return Err(PolicyViolation::TooManyHtlcs {
            max: receiver_limits.max_accepted_htlcs,
        });
    }

    let in_flight: u64 = view.offered_by(offerer).map(|h| h.amount_msat).sum();
    if in_flight > receiver_limits.max_htlc_value_in_flight_msat {
        return Err(PolicyViolation::InFlightValueExceeded {
            value_msat: in_flight,
            max_msat: receiver_limits.max_htlc_value_in_flight_msat,
        });
    }

    let cost_msat = funder_commitment_cost_msat(state, view);
    let spendable = if offerer_is_funder {
        offerer_balance.checked_sub(cost_msat)
    } else {
        Some(offerer_balance)
    };
    let Some(spendable) = spendable else {
        return Err(PolicyViolation::InsufficientBalance {
            available_msat: offerer_balance,
            required_msat: cost_msat,
        });
    };
    let reserve_msat = offerer_limits.channel_reserve_sat * 1000;
    if spendable < reserve_msat {
        return Err(PolicyViolation::ReserveBreached {
            balance_msat: spendable,
            reserve_msat,
        });
    }

    // The fundee's add can still raise the funder's fee beyond its balance.
    if !offerer_is_funder && funder_balance_msat(state, view) < cost_msat {
        return Err(PolicyViolation::InsufficientBalance {
            available_msat: funder_balance_msat(state, view),
            required_msat: cost_msat,
        });
    }

    let exposure = dust_exposure_msat(state, view);
    if exposure > state.max_dust_htlc_exposure_msat {
        return Err(PolicyViolation::DustExposureExceeded {
            exposure_msat: exposure,
            max_msat: state.max_dust_htlc_exposure_msat,
        });
    }

    Ok(())
}

/// Checks a view that already carries the new fee rate.
pub fn validate_fee(state: &ChannelState, view: &CommitmentView) -> Result<(), PolicyViolation> {
    let balance = funder_balance_msat(state, view);
    let cost_msat = funder_commitment_cost_msat(state, view);
    let funder_limits = if state.is_funder {
        &state.local_limits
    } else {
        &state.remote_limits
    };
    let reserve_msat = funder_limits.channel_reserve_sat * 1000;

    match balance.checked_sub(cost_msat) {
        None => Err(PolicyViolation::InsufficientBalance {
            available_msat: balance,
            required_msat: cost_msat,
        }),
        Some(left) if left < reserve_msat => Err(PolicyViolation::ReserveBreached {
            balance_msat: left,
            reserve_msat,
        }),
        Some(_) => Ok(()),
    }
}
