//! Fuzzing suite for the stake ledger
//!
//! ## Running Tests
//! - Quick: `cargo test --features fuzz` (default proptest cases)
//! - Deep: `PROPTEST_CASES=5000 cargo test --features fuzz`
//!
//! ## Atomicity Model
//!
//! Every operation is validate-then-commit: on Err the pool must be
//! bit-identical to its state before the call. The fuzzer snapshots the
//! pool before each action and asserts equality whenever an action fails;
//! invariants are asserted after every action regardless of outcome.
//!
//! ## Invariant Definitions (check_pool)
//!
//! - Bounds: inactive_burned <= inactive_stake (burn ratio in [0, 1])
//! - Aggregate: total_burnable == active_stake + inactive_stake
//! - Buckets: released + burned <= requested for every bucket, monotone
//! - Conservation: total stake moves only by the exact loss amount, the
//!   exact released+burned amount, or the exact yield delta

#![cfg(feature = "fuzz")]

use proptest::prelude::*;
use stake_ledger::*;

// ============================================================================
// HELPERS
// ============================================================================

/// Assert all global invariants hold. Pure; does not mutate.
fn check_pool(pool: &StakePool, context: &str) {
    assert!(
        pool.inactive_burned <= pool.inactive_stake,
        "{}: inactive_burned={} > inactive_stake={}",
        context,
        pool.inactive_burned,
        pool.inactive_stake,
    );
    assert_eq!(
        pool.total_burnable,
        pool.active_stake + pool.inactive_stake,
        "{}: cached total diverged from live sum",
        context,
    );
    let (num, den) = pool.burn_ratio();
    assert!(num <= den, "{}: burn ratio {}/{} above 1", context, num, den);
    for (i, b) in pool.buckets().iter().enumerate() {
        assert!(
            b.released + b.burned <= b.requested,
            "{}: bucket {} over-resolved: released={} burned={} requested={}",
            context,
            i,
            b.released,
            b.burned,
            b.requested,
        );
    }
    assert!(pool.check_invariants(), "{}: check_invariants failed", context);
}

/// Build a pool directly from fuzzed accounts (whitebox seeding).
/// `burned_pct` keeps the seeded state inside the invariant range.
fn seeded_pool(active: u128, inactive: u128, burned_pct: u8) -> StakePool {
    let mut pool = StakePool::new();
    pool.active_stake = active;
    pool.inactive_stake = inactive;
    pool.inactive_burned = inactive * (burned_pct as u128) / 100;
    pool.recompute_total_burnable();
    pool
}

// ============================================================================
// ACTION-BASED STATE MACHINE FUZZER
// ============================================================================

#[derive(Clone, Copy, Debug)]
enum Action {
    ApplyLoss(i128),
    ReleaseUnstakes(i128),
    RequestUnstake(i128),
    ApplyYield(i64),
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (-10_000i128..2_000_000_000).prop_map(Action::ApplyLoss),
        (-10_000i128..500_000_000).prop_map(Action::ReleaseUnstakes),
        (-10_000i128..500_000_000).prop_map(Action::RequestUnstake),
        (-12_000i64..2_000).prop_map(Action::ApplyYield),
    ]
}

proptest! {
    #[test]
    fn fuzz_action_sequences(
        active in 0u128..1_000_000_000,
        inactive in 0u128..1_000_000_000,
        burned_pct in 0u8..=100,
        actions in proptest::collection::vec(action_strategy(), 1..100),
    ) {
        let mut pool = seeded_pool(active, inactive, burned_pct);
        check_pool(&pool, "seed");

        for (step, action) in actions.iter().enumerate() {
            let before = pool.clone();
            let total = pool.total_stake();
            let ctx = format!("step {} {:?}", step, action);

            match *action {
                Action::ApplyLoss(amount) => match pool.apply_loss(amount) {
                    Ok(()) => {
                        prop_assert_eq!(pool.total_stake(), total - amount as u128, "{}", &ctx);
                    }
                    Err(_) => prop_assert_eq!(&pool, &before, "{}", &ctx),
                },
                Action::ReleaseUnstakes(quota) => match pool.release_unstakes(quota) {
                    Ok(out) => {
                        let removed = out.total_released + out.total_burned;
                        prop_assert!(quota >= 0 && removed <= quota as u128, "{}", &ctx);
                        prop_assert_eq!(pool.total_stake(), total - removed, "{}", &ctx);
                        // Monotone bucket accumulators
                        for (b_after, b_before) in pool.buckets().iter().zip(before.buckets()) {
                            prop_assert!(b_after.released >= b_before.released, "{}", &ctx);
                            prop_assert!(b_after.burned >= b_before.burned, "{}", &ctx);
                        }
                    }
                    Err(_) => prop_assert_eq!(&pool, &before, "{}", &ctx),
                },
                Action::RequestUnstake(amount) => match pool.request_unstake(amount) {
                    Ok(()) => {
                        prop_assert_eq!(pool.total_stake(), total, "{}", &ctx);
                        prop_assert!(pool.buckets().len() <= before.buckets().len() + 1, "{}", &ctx);
                    }
                    Err(_) => prop_assert_eq!(&pool, &before, "{}", &ctx),
                },
                Action::ApplyYield(bps) => match pool.apply_yield(bps) {
                    Ok(()) => {
                        prop_assert_eq!(pool.inactive_stake, before.inactive_stake, "{}", &ctx);
                        prop_assert_eq!(pool.inactive_burned, before.inactive_burned, "{}", &ctx);
                    }
                    Err(_) => prop_assert_eq!(&pool, &before, "{}", &ctx),
                },
            }
            check_pool(&pool, &ctx);
        }
    }
}

// ============================================================================
// FOCUSED PROPERTY TESTS
// ============================================================================

proptest! {
    /// apply_loss removes exactly the loss amount, never more or less.
    #[test]
    fn prop_loss_conserves_exactly(
        active in 0u128..1_000_000_000_000,
        inactive in 0u128..1_000_000_000_000,
        loss_pct in 0u8..=100,
    ) {
        let mut pool = seeded_pool(active, inactive, 0);
        let total = pool.total_stake();
        let amount = total * (loss_pct as u128) / 100;

        pool.apply_loss(amount as i128).unwrap();
        prop_assert_eq!(pool.total_stake(), total - amount);
        check_pool(&pool, "after loss");
    }

    /// request_unstake never changes the total and always appends exactly
    /// one bucket for a positive amount.
    #[test]
    fn prop_request_preserves_total(
        active in 1u128..1_000_000_000_000,
        inactive in 0u128..1_000_000_000_000,
        burned_pct in 0u8..=33,
        raw_amount in 1u128..1_000_000_000_000,
    ) {
        let mut pool = seeded_pool(active, inactive, burned_pct);
        let total = pool.total_stake();
        let amount = raw_amount % active + 1;

        // burned_pct <= 33 keeps the gross-up representable
        pool.request_unstake(amount as i128).unwrap();
        prop_assert_eq!(pool.total_stake(), total);
        prop_assert_eq!(pool.buckets().len(), 1);
        prop_assert_eq!(pool.buckets()[0].requested, amount);
        check_pool(&pool, "after request");
    }

    /// Releases resolve a strict FIFO prefix: an untouched bucket is never
    /// followed by a touched one.
    #[test]
    fn prop_release_is_fifo_prefix(
        requests in proptest::collection::vec(1u128..10_000, 1..20),
        quota in 0u128..100_000,
    ) {
        let backlog: u128 = requests.iter().sum();
        let mut pool = seeded_pool(backlog, 0, 0);
        for r in &requests {
            pool.request_unstake(*r as i128).unwrap();
        }

        pool.release_unstakes(quota as i128).unwrap();

        let mut seen_untouched = false;
        for b in pool.buckets() {
            let touched = b.released + b.burned > 0;
            if seen_untouched {
                prop_assert!(!touched, "younger bucket advanced past an untouched one");
            }
            if !touched {
                seen_untouched = true;
            }
        }
        check_pool(&pool, "after fifo release");
    }
}
