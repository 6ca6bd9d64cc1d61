//! Property-based tests for distributions, the value recurrence, and the
//! decision state machine.

use proptest::collection::btree_set;
use proptest::prelude::*;

use batchstop::distribution::Distribution;
use batchstop::engine::{round_down, round_up, ProbabilityEngine};
use batchstop::model::{Decision, DecisionModel, TokenPolicy};
use batchstop::ModelConfig;

/// Strategy: a distribution over 2..=8 distinct support values with random
/// positive weights.
fn dist_strategy() -> impl Strategy<Value = Distribution> {
    btree_set(-50..200i64, 2..=8).prop_flat_map(|support| {
        let support: Vec<i64> = support.into_iter().collect();
        let n = support.len();
        (Just(support), prop::collection::vec(0.01..10.0f64, n))
    })
    .prop_map(|(support, weights)| {
        Distribution::from_weights(support, weights).expect("valid weights")
    })
}

fn config_strategy() -> impl Strategy<Value = (usize, usize)> {
    // (total_draws, batch_size) with R >= B
    (1..=6usize, 1..=25usize).prop_map(|(b, extra)| (b + extra - 1, b))
}

proptest! {
    // 1. pmf sums to 1 and cmf ends at 1 for any generated distribution
    #[test]
    fn pmf_and_cmf_are_normalized(d in dist_strategy()) {
        let total: f64 = d.support().iter().map(|&x| d.pmf(x)).sum();
        prop_assert!((total - 1.0).abs() < 1e-9, "pmf sum {total}");
        prop_assert!((d.cmf(d.max_value()) - 1.0).abs() < 1e-9);
        prop_assert!(d.cmf_at(f64::from(i32::MIN)) == 0.0);
    }

    // 2. capped expectation matches the naive sum and is monotone in the cap
    #[test]
    fn capped_expectation_matches_naive(d in dist_strategy(), u in -100.0..300.0f64) {
        let naive: f64 = d.support().iter()
            .map(|&x| (x as f64).max(u) * d.pmf(x))
            .sum();
        prop_assert!((d.capped_expectation(u) - naive).abs() < 1e-9);
        prop_assert!(d.capped_expectation(u + 1.0) >= d.capped_expectation(u) - 1e-12);
        prop_assert!(d.capped_expectation(u) >= d.expectation() - 1e-12);
    }

    // 3. a fresh-session cap below the whole support reduces to E[X]
    #[test]
    fn capped_expectation_handles_unbounded_low_cap(d in dist_strategy()) {
        let e = d.capped_expectation(f64::NEG_INFINITY);
        prop_assert!((e - d.expectation()).abs() < 1e-9);
        prop_assert!(e.is_finite());
    }

    // 4. batch max stochastically dominates the base: Fz(x) <= F(x)
    #[test]
    fn batch_max_dominates(d in dist_strategy(), b in 1..6u32) {
        let z = d.batch_max(b);
        for &x in d.support() {
            prop_assert!(z.cmf(x) <= d.cmf(x) + 1e-12);
            prop_assert!((z.pmf(x) - d.batch_max_pmf(b, x)).abs() < 1e-12);
        }
        prop_assert!(z.expectation() >= d.expectation() - 1e-9);
    }

    // 5. batch max of one draw is the base distribution
    #[test]
    fn batch_max_of_one_is_identity(d in dist_strategy()) {
        let z = d.batch_max(1);
        prop_assert_eq!(z.support(), d.support());
        for &x in d.support() {
            prop_assert!((z.pmf(x) - d.pmf(x)).abs() < 1e-12);
        }
    }

    // 6. transform by a monotone shift preserves masses at shifted points
    #[test]
    fn transform_shift_preserves_mass(d in dist_strategy(), shift in -20..20i64) {
        let t = d.transform(|x| x + shift).expect("shift keeps support distinct");
        for &x in d.support() {
            prop_assert!((t.pmf(x + shift) - d.pmf(x)).abs() < 1e-12);
        }
        prop_assert!((t.expectation() - (d.expectation() + shift as f64)).abs() < 1e-9);
    }

    // 7. Ef is nonnegative-increasing in r and dominates a single draw's EV
    #[test]
    fn value_table_is_monotone(d in dist_strategy(), (r_total, b) in config_strategy()) {
        let engine = ProbabilityEngine::new(d.clone(), b, r_total).expect("valid engine");
        let mut prev = 0.0;
        for r in 0..=round_up(r_total, b) {
            let e = engine.ef(r);
            prop_assert!(e >= prev - 1e-12, "Ef not monotone at r={r}");
            prev = e;
        }
        prop_assert!(engine.ef(b) >= d.expectation() - 1e-9);
        // exhaustion floors the session at 0, so the ceiling is max(X) or 0,
        // whichever is larger (an all-negative support is never claimed)
        prop_assert!(engine.ef(r_total) <= d.max_value().max(0) as f64 + 1e-9);

        // base-distribution delegation answers the same queries
        prop_assert!((engine.cmf(d.max_value()) - 1.0).abs() < 1e-9);
        for &x in d.support() {
            prop_assert_eq!(engine.pmf(x), d.pmf(x));
        }
    }

    // 8. extending the table past its precomputed end stays consistent with
    //    one more recurrence step
    #[test]
    fn value_table_extends_past_horizon(d in dist_strategy(), (r_total, b) in config_strategy()) {
        let engine = ProbabilityEngine::new(d, b, r_total).expect("valid engine");
        let top = round_up(r_total, b);
        let expected = engine.fz(b).capped_expectation(engine.ef(top));
        prop_assert!((engine.ef(top + b) - expected).abs() < 1e-9);
    }

    // 9. a full random session terminates, claims only at boundaries, and
    //    never prices buying below zero
    #[test]
    fn random_session_is_well_behaved(
        d in dist_strategy(),
        (r_total, b) in config_strategy(),
        seed in 0..u64::MAX,
    ) {
        use rand::rngs::SmallRng;
        use rand::SeedableRng;

        let cfg = ModelConfig::without_tokens(r_total, b);
        let mut m = DecisionModel::new(d, cfg).expect("valid model");
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut steps = 0;
        while !m.is_terminal() {
            let k = m.engine().base().sample(&mut rng);
            let level = m.remaining();
            match m.update(k) {
                Decision::Stop { index } => {
                    // stops only at a completed batch boundary
                    prop_assert_eq!(round_down(level - 1, b), level - 1);
                    let v = m.batch()[index];
                    prop_assert!(v as f64 > m.ef(level - 1));
                }
                Decision::TokenSpent => prop_assert!(false, "tokens are disabled"),
                Decision::Continue => {
                    if !m.is_terminal() {
                        prop_assert!(m.buy(b) >= 0.0);
                    }
                }
            }
            steps += 1;
            prop_assert!(steps <= r_total, "session ran past its horizon");
        }
    }

    // 10. the reach law is a valid cmf and the stop-level law a subprobability
    #[test]
    fn induced_laws_are_consistent(d in dist_strategy(), (r_total, b) in config_strategy()) {
        let m = DecisionModel::new(d, ModelConfig::without_tokens(r_total, b))
            .expect("valid model");
        prop_assert!((m.reach_probability(r_total) - 1.0).abs() < 1e-12);
        let mut mass = 0.0;
        for r in 0..=r_total {
            let p = m.p_r(r);
            prop_assert!(p >= -1e-12);
            if r >= 1 {
                prop_assert!(m.reach_probability(r) >= m.reach_probability(r - 1) - 1e-12);
            }
            mass += p;
        }
        prop_assert!((mass - (1.0 - m.reach_probability(0))).abs() < 1e-9);

        // the value law carries exactly the stop mass
        let k_mass: f64 = m.engine().base().support().iter().map(|&x| m.p_k(x)).sum();
        prop_assert!((k_mass - mass).abs() < 1e-9, "{k_mass} vs {mass}");
    }

    // 11. cutoffs, when they exist, sit on the support and respect the bound
    #[test]
    fn cutoff_respects_usage_bound(d in dist_strategy(), cycle in 2..=16usize) {
        let cfg = ModelConfig::with_token_cycle(20, 5, cycle);
        let m = DecisionModel::new(d.clone(), cfg.clone()).expect("valid model");
        if let Some(kp) = m.cutoff() {
            prop_assert!(d.index_of(kp).is_some());
            prop_assert!(m.emission_cmf(kp) <= cfg.usage_fraction + 1e-12);
        }
        let g = DecisionModel::with_policy(d.clone(), cfg.clone(), TokenPolicy::RateMatched)
            .expect("valid model");
        if let Some(kp) = g.cutoff() {
            let f = g.engine().fz(cfg.batch_size).cmf(kp);
            prop_assert!(f < 1.0);
            prop_assert!(g.p_r(1) * f / (1.0 - f) <= cfg.usage_fraction + 1e-12);
        }
    }

    // 12. the token-aware value law still carries the same total mass
    #[test]
    fn token_law_mass_is_preserved(d in dist_strategy(), cycle in 2..=16usize) {
        let cfg = ModelConfig::with_token_cycle(20, 5, cycle);
        let m = DecisionModel::new(d.clone(), cfg).expect("valid model");
        let last_mass: f64 = d.support().iter().map(|&x| m.p_last(x)).sum();
        prop_assert!((last_mass - 1.0).abs() < 1e-9, "p_last mass {last_mass}");

        let plain = DecisionModel::new(
            d.clone(),
            ModelConfig::without_tokens(20, 5),
        ).expect("valid model");
        let with: f64 = d.support().iter().map(|&x| m.p_k(x)).sum();
        let without: f64 = d.support().iter().map(|&x| plain.p_k(x)).sum();
        prop_assert!((with - without).abs() < 1e-9, "{with} vs {without}");
    }
}

// 13. sampling matches the pmf for a skewed distribution (non-proptest, needs
//     many draws for a stable histogram)
#[test]
fn sampling_matches_pmf() {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    let d = Distribution::from_pmf(vec![0, 1, 10], vec![0.7, 0.2, 0.1]).unwrap();
    let mut rng = SmallRng::seed_from_u64(5);
    let iters = 200_000;
    let mut counts = [0u64; 3];
    for _ in 0..iters {
        let x = d.sample(&mut rng);
        counts[d.index_of(x).unwrap()] += 1;
    }
    for (i, &x) in d.support().iter().enumerate() {
        let freq = counts[i] as f64 / iters as f64;
        assert!(
            (freq - d.pmf(x)).abs() < 0.01,
            "value {x}: {freq:.4} vs {:.4}",
            d.pmf(x)
        );
    }
}
