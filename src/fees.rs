// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Fee calculation.
//!
//! All rates use 10^6 precision: 29_000 = 2.9%. Amounts are minor units;
//! intermediates widen to i128 so no amount can overflow.

/// Fee rate precision (10^6 = 1,000,000).
pub const FEE_PRECISION: i64 = 1_000_000;

/// Card/wallet processor percentage rate (29_000 = 2.9%).
pub const PROCESSOR_RATE: i64 = 29_000;

/// Processor fixed fee per transaction, in minor units.
pub const PROCESSOR_FIXED_FEE_MINOR: i64 = 30;

/// Platform cut on match stakes (50_000 = 5%).
pub const MATCH_FEE_RATE: i64 = 50_000;

/// House vig on prop wagers (100_000 = 10%).
pub const PROP_VIG_RATE: i64 = 100_000;

/// Processor fee breakdown for a deposit amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorFee {
    pub percentage_fee: i64,
    pub fixed_fee: i64,
    pub total: i64,
}

/// Platform cut on a match stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchFee {
    pub fee: i64,
    pub net: i64,
}

/// House vig on a prop wager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropVig {
    pub vig: i64,
    pub net: i64,
}

/// Calculate a percentage fee from an amount and a 10^6-precision rate.
///
/// Nonzero amounts at nonzero rates charge a minimum fee of 1 minor unit.
#[inline]
pub fn fee_from_rate(amount_minor: i64, rate: i64) -> i64 {
    let fee = (amount_minor as i128 * rate as i128) / FEE_PRECISION as i128;
    if fee == 0 && amount_minor > 0 && rate > 0 {
        1
    } else {
        fee as i64
    }
}

/// Processor fee for a deposit: percentage plus fixed component.
#[inline]
pub fn processor_fee(amount_minor: i64) -> ProcessorFee {
    let percentage_fee = fee_from_rate(amount_minor, PROCESSOR_RATE);
    ProcessorFee {
        percentage_fee,
        fixed_fee: PROCESSOR_FIXED_FEE_MINOR,
        total: percentage_fee + PROCESSOR_FIXED_FEE_MINOR,
    }
}

/// Platform cut on a single match stake.
///
/// Reports the per-stake split only; prize-pool arithmetic belongs to the
/// game collaborators.
#[inline]
pub fn match_fee(amount_minor: i64) -> MatchFee {
    let fee = fee_from_rate(amount_minor, MATCH_FEE_RATE);
    MatchFee {
        fee,
        net: amount_minor - fee,
    }
}

/// House vig on a prop wager.
#[inline]
pub fn prop_vig(amount_minor: i64) -> PropVig {
    let vig = fee_from_rate(amount_minor, PROP_VIG_RATE);
    PropVig {
        vig,
        net: amount_minor - vig,
    }
}

/// Smallest deposit whose net after processor fees is non-negative.
///
/// Deposit sessions derive provider minimums from this so the platform never
/// credits more FC than the provider pays out.
pub fn min_deposit_minor() -> i64 {
    // Closed form from net = a - floor(a*r/P) - F >= 0, then nudge for the
    // flooring and minimum-fee rules.
    let numerator = PROCESSOR_FIXED_FEE_MINOR as i128 * FEE_PRECISION as i128;
    let divisor = (FEE_PRECISION - PROCESSOR_RATE) as i128;
    // Ceiling division; operands are all positive here.
    let mut candidate = ((numerator + divisor - 1) / divisor) as i64;
    while candidate - processor_fee(candidate).total < 0 {
        candidate += 1;
    }
    candidate
}
