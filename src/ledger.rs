//! Bucketed capital-accounting engine for a pooled-stake insurance system.
//!
//! A pool's capital is split into active stake (earning yield, exposed to
//! loss) and inactive stake (requested for withdrawal, still exposed to loss
//! until released). Loss events are shared pro rata between the two sides,
//! and withdrawals are resolved through a FIFO queue of unstake buckets so
//! that losses occurring between request and release are charged against the
//! requests that were pending at the time.
//!
//! The engine guarantees:
//! 1. Conservation: total capital changes only by the exact loss amount
//!    (`apply_loss`), the exact released+burned amount (`release_unstakes`),
//!    or the exact yield amount (`apply_yield`).
//! 2. Bounds: `inactive_burned <= inactive_stake` and the derived burn ratio
//!    stays in [0, 1] in every reachable state.
//! 3. Bucket resolution: `released + burned` never exceeds `requested`, and
//!    a fully resolved bucket is immutable thereafter.
//! 4. FIFO release: a quota that runs out mid-bucket leaves every younger
//!    bucket untouched.
//! 5. Atomic validation: every operation validates before it commits; on
//!    `Err` the pool is bit-identical to its state before the call.
//!
//! All arithmetic is unsigned 128-bit fixed-point with floor division;
//! ratios are carried as (numerator, denominator) pairs of live state and
//! never materialized as floats.

#![no_std]
#![forbid(unsafe_code)]

extern crate alloc;

#[cfg(kani)]
extern crate kani;

use alloc::vec::Vec;

// ============================================================================
// Constants
// ============================================================================

/// Maximum total stake a pool may hold, in base units.
///
/// Capping amounts at u64 range guarantees every product of two in-range
/// values fits in u128, so the floor mul/div helpers cannot overflow on any
/// reachable state.
pub const MAX_POOL_STAKE: u128 = u64::MAX as u128;

/// Basis-point denominator: 10_000 bps = 100%.
pub const BPS_DENOM: u128 = 10_000;

/// Yield floor in signed basis points; a rate at or below -100% would wipe
/// the active pool negative and is rejected.
pub const MIN_YIELD_BPS: i64 = -(BPS_DENOM as i64);

// ============================================================================
// Error Types
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerError {
    /// Loss amount is negative or exceeds total burnable stake
    InvalidLossAmount,

    /// Release quota is negative
    InvalidReleaseAmount,

    /// Unstake request amount is negative
    InvalidRequestAmount,

    /// Unstake request exceeds the active stake
    InsufficientActiveStake,

    /// Yield rate at or below -100%
    InvalidYieldPercentage,

    /// Burn ratio leaves no room to gross up a new request
    /// (100% of inactive stake already notionally burned, or the gross-up
    /// would push `inactive_burned` past `inactive_stake`)
    UndefinedBurnRatio,

    /// Amount outside the representable range (above `MAX_POOL_STAKE`)
    Overflow,
}

impl core::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            LedgerError::InvalidLossAmount => "loss amount negative or exceeds total stake",
            LedgerError::InvalidReleaseAmount => "release quota is negative",
            LedgerError::InvalidRequestAmount => "unstake request amount is negative",
            LedgerError::InsufficientActiveStake => "unstake request exceeds active stake",
            LedgerError::InvalidYieldPercentage => "yield rate at or below -100%",
            LedgerError::UndefinedBurnRatio => "burn ratio leaves no room to gross up",
            LedgerError::Overflow => "amount outside representable range",
        };
        f.write_str(msg)
    }
}

pub type Result<T> = core::result::Result<T, LedgerError>;

// ============================================================================
// Math Helpers (floor arithmetic, explicit division-by-zero)
// ============================================================================

#[inline]
fn add_u128(a: u128, b: u128) -> u128 {
    a.saturating_add(b)
}

#[inline]
fn sub_u128(a: u128, b: u128) -> u128 {
    a.saturating_sub(b)
}

/// floor(a * b / den), erroring on a zero denominator or a product that
/// leaves u128. Inputs bounded by `MAX_POOL_STAKE` can never hit either arm.
#[inline]
fn mul_div_floor(a: u128, b: u128, den: u128) -> Result<u128> {
    if den == 0 {
        return Err(LedgerError::Overflow); // Division by zero
    }
    let prod = a.checked_mul(b).ok_or(LedgerError::Overflow)?;
    Ok(prod / den)
}

// ============================================================================
// Core Data Structures
// ============================================================================

/// One withdrawal request, resolved in FIFO creation order.
///
/// `released` and `burned` only ever grow, and their sum never exceeds
/// `requested`. A bucket is never deleted; once resolved it remains as
/// history with `released + burned == requested`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnstakeBucket {
    /// Amount originally requested for withdrawal
    pub requested: u128,

    /// Implied notionally-burned amount attributable to this request at
    /// creation time, reconciling it with the pool's aggregate burn ratio.
    /// Audit-only: never read by the release arithmetic.
    pub virtual_requested: u128,

    /// Cumulative amount physically returned to the requester
    pub released: u128,

    /// Cumulative amount of this request written off as loss
    pub burned: u128,
}

impl UnstakeBucket {
    /// Unresolved remainder of the original request.
    #[inline]
    pub fn remaining(&self) -> u128 {
        sub_u128(self.requested, add_u128(self.released, self.burned))
    }

    /// Whether the request is fully resolved (released + burned == requested).
    #[inline]
    pub fn is_resolved(&self) -> bool {
        self.remaining() == 0
    }
}

/// Outcome of a `release_unstakes` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// Total amount physically returned to requesters this call
    pub total_released: u128,

    /// Total amount written off against pending requests this call
    pub total_burned: u128,

    /// Number of buckets whose accumulators advanced this call
    pub buckets_touched: u32,

    /// Number of buckets that became fully resolved this call
    pub buckets_resolved: u32,
}

/// Capital accounts and unstake queue for one pool.
///
/// Fields are public for whitebox tests and read-side reporting; all
/// semantic mutation must flow through the four operations. The pool is an
/// independent unit of mutual exclusion: no state is shared across pools,
/// so a multi-pool host may process pools in parallel with no coordination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakePool {
    /// Capital currently earning yield and exposed to loss
    pub active_stake: u128,

    /// Capital pending withdrawal, still exposed to loss until released
    pub inactive_stake: u128,

    /// Portion of `inactive_stake` notionally consumed by losses but not
    /// yet physically removed. Invariant: `inactive_burned <= inactive_stake`.
    pub inactive_burned: u128,

    /// Cached `active_stake + inactive_stake`, maintained by every
    /// operation. Not independently authoritative; `check_invariants`
    /// verifies it against the live sum.
    pub total_burnable: u128,

    /// Unstake requests in creation order. Never reordered, never deleted.
    pub buckets: Vec<UnstakeBucket>,

    // ========================================
    // Lifetime Counters (telemetry)
    // ========================================
    /// Total amount ever physically released to requesters
    pub lifetime_released: u128,

    /// Total amount ever written off against pending requests
    pub lifetime_burned: u128,
}

impl Default for StakePool {
    fn default() -> Self {
        Self::new()
    }
}

impl StakePool {
    /// Create an empty pool.
    pub fn new() -> Self {
        StakePool {
            active_stake: 0,
            inactive_stake: 0,
            inactive_burned: 0,
            total_burnable: 0,
            buckets: Vec::new(),
            lifetime_released: 0,
            lifetime_burned: 0,
        }
    }

    // ========================================
    // Derived Values & Accessors
    // ========================================

    /// Burn ratio as (numerator, denominator): the fraction of inactive
    /// stake that would be lost if withdrawn right now.
    /// Returns (0, 1) when there is no inactive stake.
    #[inline]
    pub fn burn_ratio(&self) -> (u128, u128) {
        if self.inactive_stake == 0 {
            (0, 1)
        } else {
            (self.inactive_burned, self.inactive_stake)
        }
    }

    /// Live total of burnable stake (active + inactive).
    #[inline]
    pub fn total_stake(&self) -> u128 {
        add_u128(self.active_stake, self.inactive_stake)
    }

    /// Unstake queue, oldest first.
    #[inline]
    pub fn buckets(&self) -> &[UnstakeBucket] {
        &self.buckets
    }

    /// Recompute the cached total from the live accounts.
    /// For test use after direct state mutation.
    pub fn recompute_total_burnable(&mut self) {
        self.total_burnable = self.total_stake();
    }

    /// Verify every structural invariant of the pool. Pure; does not mutate.
    ///
    /// Checks bounds (`inactive_burned <= inactive_stake`), the cached
    /// total against the live sum, the pool-size cap, and per-bucket
    /// `released + burned <= requested`.
    pub fn check_invariants(&self) -> bool {
        if self.inactive_burned > self.inactive_stake {
            return false;
        }
        if self.total_burnable != self.total_stake() {
            return false;
        }
        if self.total_burnable > MAX_POOL_STAKE {
            return false;
        }
        self.buckets
            .iter()
            .all(|b| add_u128(b.released, b.burned) <= b.requested)
    }

    // ========================================
    // Operation: apply_loss
    // ========================================

    /// Apply a loss event, shared pro rata between active and inactive
    /// stake over the pre-loss totals.
    ///
    /// Total capital drops by exactly `amount`: the active side takes the
    /// floored share of the loss and the inactive side absorbs the
    /// remainder. `inactive_burned` is recomputed as the loss fraction of
    /// the post-loss inactive pool, so the burn ratio reflects what pending
    /// withdrawals will be charged at release.
    ///
    /// # Errors
    /// * `InvalidLossAmount` - `amount` negative or above total stake
    ///   (a zero-capital pool rejects any positive loss on this path)
    pub fn apply_loss(&mut self, amount: i128) -> Result<()> {
        if amount < 0 {
            return Err(LedgerError::InvalidLossAmount);
        }
        let amount = amount as u128;
        let total = self.total_stake();
        if amount > total {
            return Err(LedgerError::InvalidLossAmount);
        }
        if amount == 0 {
            // No-op by contract; the recompute below would otherwise
            // rewrite inactive_burned at a zero loss ratio.
            return Ok(());
        }

        let active_cut = mul_div_floor(self.active_stake, amount, total)?;
        // Remainder goes to the inactive side so the total drops by
        // exactly `amount`. amount <= total bounds it by inactive_stake.
        let inactive_cut = amount - active_cut;

        self.active_stake = sub_u128(self.active_stake, active_cut);
        self.inactive_stake = sub_u128(self.inactive_stake, inactive_cut);
        self.inactive_burned = mul_div_floor(self.inactive_stake, amount, total)?;
        self.total_burnable = self.total_stake();
        Ok(())
    }

    // ========================================
    // Operation: release_unstakes
    // ========================================

    /// Release up to `max_amount` of inactive stake against the unstake
    /// queue, oldest bucket first.
    ///
    /// Each unit taken from a bucket splits at the pool's burn ratio as
    /// sampled at entry: the payout rounds down and the burn absorbs the
    /// remainder, so a release never over-pays. Iteration stops when the
    /// quota runs out; buckets not reached are guaranteed untouched and
    /// will be considered first on the next call.
    ///
    /// The quota is additionally capped by the live `inactive_stake`:
    /// bucket `requested` amounts are nominal pre-loss values, so after a
    /// loss the backlog exceeds the stake physically left in the pool, and
    /// a release must never remove more than the pool holds. The overhang
    /// stays unresolved in its buckets.
    ///
    /// # Errors
    /// * `InvalidReleaseAmount` - `max_amount` is negative
    pub fn release_unstakes(&mut self, max_amount: i128) -> Result<ReleaseOutcome> {
        if max_amount < 0 {
            return Err(LedgerError::InvalidReleaseAmount);
        }
        let mut quota = core::cmp::min(max_amount as u128, self.inactive_stake);
        let (br_num, br_den) = self.burn_ratio();

        let mut total_take = 0u128;
        let mut total_burned = 0u128;
        let mut touched = 0u32;
        let mut resolved = 0u32;

        for bucket in self.buckets.iter_mut() {
            if quota == 0 {
                break;
            }
            let remaining = bucket.remaining();
            if remaining == 0 {
                continue; // Already resolved; immutable
            }
            let take = core::cmp::min(quota, remaining);

            // Payout rounds down; the burn side takes the remainder.
            let released = mul_div_floor(take, sub_u128(br_den, br_num), br_den)?;
            let burned = take - released;

            bucket.released = add_u128(bucket.released, released);
            bucket.burned = add_u128(bucket.burned, burned);

            quota -= take;
            total_take = add_u128(total_take, take);
            total_burned = add_u128(total_burned, burned);
            touched += 1;
            if bucket.is_resolved() {
                resolved += 1;
            }
        }

        self.inactive_stake = sub_u128(self.inactive_stake, total_take);
        self.inactive_burned = sub_u128(self.inactive_burned, total_burned);
        // Floor-division dust can strand inactive_burned a hair above the
        // shrunken pool; shed it here to keep the ratio in [0, 1].
        self.inactive_burned = core::cmp::min(self.inactive_burned, self.inactive_stake);
        self.total_burnable = self.total_stake();

        let total_released = sub_u128(total_take, total_burned);
        self.lifetime_released = add_u128(self.lifetime_released, total_released);
        self.lifetime_burned = add_u128(self.lifetime_burned, total_burned);

        Ok(ReleaseOutcome {
            total_released,
            total_burned,
            buckets_touched: touched,
            buckets_resolved: resolved,
        })
    }

    // ========================================
    // Operation: request_unstake
    // ========================================

    /// Move `amount` from active to inactive stake and append an unstake
    /// bucket for it.
    ///
    /// The pool-wide burn ratio already reflects losses charged against the
    /// existing inactive pool, so `inactive_burned` is grossed up as if the
    /// moved capital had been through the same proportional loss history:
    /// `inactive_burned' = ratio * inactive_after / (1 - ratio)`. The
    /// bucket records its own share of that gross-up as
    /// `virtual_requested = ratio * amount / (1 - ratio)`, an audit field
    /// with no effect on release arithmetic.
    ///
    /// # Errors
    /// * `InvalidRequestAmount` - `amount` is negative
    /// * `InsufficientActiveStake` - `amount` exceeds the active stake
    /// * `UndefinedBurnRatio` - the gross-up is not representable: the
    ///   ratio is 1, or the grossed-up `inactive_burned` would exceed the
    ///   inactive pool (ratio above 1/2). Requests are rejected until some
    ///   stake is released or losses stop.
    pub fn request_unstake(&mut self, amount: i128) -> Result<()> {
        if amount < 0 {
            return Err(LedgerError::InvalidRequestAmount);
        }
        let amount = amount as u128;
        if amount > self.active_stake {
            return Err(LedgerError::InsufficientActiveStake);
        }
        if amount == 0 {
            // No-op by contract: no bucket, no gross-up.
            return Ok(());
        }

        let (br_num, br_den) = self.burn_ratio();
        if br_num == br_den && br_num != 0 {
            return Err(LedgerError::UndefinedBurnRatio);
        }
        // Payable fraction of the inactive pool; positive past this point.
        let payable = sub_u128(br_den, br_num);

        let inactive_after = add_u128(self.inactive_stake, amount);
        let new_burned = mul_div_floor(br_num, inactive_after, payable)?;
        if new_burned > inactive_after {
            // Ratio above 1/2: the gross-up would breach
            // inactive_burned <= inactive_stake. Reject, never clamp.
            return Err(LedgerError::UndefinedBurnRatio);
        }
        let virtual_requested = mul_div_floor(br_num, amount, payable)?;

        self.active_stake = sub_u128(self.active_stake, amount);
        self.inactive_stake = inactive_after;
        self.inactive_burned = new_burned;
        self.total_burnable = self.total_stake();

        self.buckets.push(UnstakeBucket {
            requested: amount,
            virtual_requested,
            released: 0,
            burned: 0,
        });
        Ok(())
    }

    // ========================================
    // Operation: apply_yield
    // ========================================

    /// Apply a period growth rate, in signed basis points, to the active
    /// stake only. Capital pending withdrawal earns nothing.
    ///
    /// The burn ratio is derived from `inactive_burned`/`inactive_stake`
    /// and is untouched by this call.
    ///
    /// # Errors
    /// * `InvalidYieldPercentage` - rate at or below -100%
    /// * `Overflow` - growth would push the pool past `MAX_POOL_STAKE`
    pub fn apply_yield(&mut self, yield_bps: i64) -> Result<()> {
        if yield_bps <= MIN_YIELD_BPS {
            return Err(LedgerError::InvalidYieldPercentage);
        }
        if yield_bps >= 0 {
            let gain = mul_div_floor(self.active_stake, yield_bps as u128, BPS_DENOM)?;
            let new_active = add_u128(self.active_stake, gain);
            if add_u128(new_active, self.inactive_stake) > MAX_POOL_STAKE {
                return Err(LedgerError::Overflow);
            }
            self.active_stake = new_active;
        } else {
            let cut = mul_div_floor(self.active_stake, (-yield_bps) as u128, BPS_DENOM)?;
            self.active_stake = sub_u128(self.active_stake, cut);
        }
        self.total_burnable = self.total_stake();
        Ok(())
    }
}
