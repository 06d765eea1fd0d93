// ============================================================================
// FEE CALCULATIONS
// ============================================================================
// Everything that differs between commitment formats sits behind
// `FormatCapability`; the state machine only ever sees the tagged
// `CommitmentFormat` and asks it for its capability.

use bitcoin::sighash::EcdsaSighashType;

use crate::types::CommitmentFormat;

pub trait FormatCapability: Sync {
    fn commitment_base_weight(&self) -> u64;
    fn htlc_timeout_weight(&self) -> u64;
    fn htlc_success_weight(&self) -> u64;
    /// Value of each anchor output, zero when the format has none.
    fn anchor_output_sat(&self) -> u64;
    /// Second-stage HTLC transactions carry no fee of their own.
    fn zero_fee_htlc_tx(&self) -> bool;
    fn htlc_sighash_type(&self) -> EcdsaSighashType;
    /// HTLC outputs and to_remote are encumbered by a 1-block CSV.
    fn csv_encumbered(&self) -> bool;

    fn htlc_output_weight(&self) -> u64 {
        172
    }
}

pub struct LegacyFormat;

pub struct AnchorFormat;

impl FormatCapability for LegacyFormat {
    fn commitment_base_weight(&self) -> u64 {
        724
    }
    fn htlc_timeout_weight(&self) -> u64 {
        663
    }
    fn htlc_success_weight(&self) -> u64 {
        703
    }
    fn anchor_output_sat(&self) -> u64 {
        0
    }
    fn zero_fee_htlc_tx(&self) -> bool {
        false
    }
    fn htlc_sighash_type(&self) -> EcdsaSighashType {
        EcdsaSighashType::All
    }
    fn csv_encumbered(&self) -> bool {
        false
    }
}

impl FormatCapability for AnchorFormat {
    fn commitment_base_weight(&self) -> u64 {
        1124
    }
    fn htlc_timeout_weight(&self) -> u64 {
        666
    }
    fn htlc_success_weight(&self) -> u64 {
        706
    }
    fn anchor_output_sat(&self) -> u64 {
        330
    }
    fn zero_fee_htlc_tx(&self) -> bool {
        true
    }
    fn htlc_sighash_type(&self) -> EcdsaSighashType {
        EcdsaSighashType::SinglePlusAnyoneCanPay
    }
    fn csv_encumbered(&self) -> bool {
        true
    }
}

impl CommitmentFormat {
    pub fn capability(&self) -> &'static dyn FormatCapability {
        match self {
            CommitmentFormat::Legacy => &LegacyFormat,
            CommitmentFormat::Anchors => &AnchorFormat,
        }
    }
}

/// (feerate_per_kw * weight) / 1000, weight = base + 172 * untrimmed htlcs
pub fn calculate_commitment_tx_fee(
    format: &dyn FormatCapability,
    feerate_per_kw: u32,
    num_untrimmed_htlcs: usize,
) -> u64 {
    let weight = format.commitment_base_weight() + format.htlc_output_weight() * num_untrimmed_htlcs as u64;
    (feerate_per_kw as u64 * weight) / 1000
}

pub fn calculate_htlc_timeout_tx_fee(format: &dyn FormatCapability, feerate_per_kw: u32) -> u64 {
    if format.zero_fee_htlc_tx() {
        return 0;
    }
    (feerate_per_kw as u64 * format.htlc_timeout_weight()) / 1000
}

pub fn calculate_htlc_success_tx_fee(format: &dyn FormatCapability, feerate_per_kw: u32) -> u64 {
    if format.zero_fee_htlc_tx() {
        return 0;
    }
    (feerate_per_kw as u64 * format.htlc_success_weight()) / 1000
}

/// An HTLC is dust, and trimmed from the commitment, when its value cannot
/// cover the dust limit plus the second-stage transaction claiming it.
/// `offered` is from the broadcaster's point of view.
pub fn is_htlc_dust(
    format: &dyn FormatCapability,
    htlc_amount_sat: u64,
    dust_limit_satoshis: u64,
    feerate_per_kw: u32,
    offered: bool,
) -> bool {
    let htlc_tx_fee = if offered {
        calculate_htlc_timeout_tx_fee(format, feerate_per_kw)
    } else {
        calculate_htlc_success_tx_fee(format, feerate_per_kw)
    };

    htlc_amount_sat < dust_limit_satoshis + htlc_tx_fee
}
