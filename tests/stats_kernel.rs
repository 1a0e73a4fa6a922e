//! Integration check for the suspicion-score composition (§4.1): the
//! confounding boost/penalty thresholds (0.8x and 0.5x of `|pearson|`) move
//! the score in the documented direction relative to having no confounder
//! signal at all.

use obscore::stats::{pearson, suspicion_score, SuspicionInputs};

fn base_inputs(partial: Option<f64>) -> SuspicionInputs {
    SuspicionInputs {
        pearson: 0.6,
        spearman: 0.6,
        cross_corr_max: 0.0,
        cross_corr_lag: 0,
        sample_size: 30,
        min_correlation: 0.3,
        partial,
        anomaly_density: 0.0,
    }
}

#[test]
fn partial_correlation_supporting_a_direct_link_boosts_the_score() {
    // |partial| >= 0.8 * |pearson| (0.8 * 0.6 = 0.48).
    let boosted = suspicion_score(&base_inputs(Some(0.55)));
    let unadjusted = suspicion_score(&base_inputs(None));
    assert!(boosted > unadjusted);
    assert!(boosted <= 0.95);
}

#[test]
fn partial_correlation_suggesting_confounding_penalizes_the_score() {
    // |partial| < 0.5 * |pearson| (0.5 * 0.6 = 0.3).
    let penalized = suspicion_score(&base_inputs(Some(0.1)));
    let unadjusted = suspicion_score(&base_inputs(None));
    assert!(penalized < unadjusted);
}

#[test]
fn real_pearson_feeds_the_same_composite_pipeline() {
    let impact = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    let cause = [1.1, 2.0, 2.9, 4.2, 4.8, 6.1, 7.2, 7.9];
    let r = pearson(&impact, &cause);
    assert!(r > 0.9);

    let score = suspicion_score(&SuspicionInputs {
        pearson: r,
        spearman: r,
        cross_corr_max: r,
        cross_corr_lag: 1,
        sample_size: impact.len(),
        min_correlation: 0.3,
        partial: None,
        anomaly_density: 0.0,
    });
    assert!(score > 0.0 && score <= 0.95);
}

#[test]
fn thin_sample_is_discounted_relative_to_a_full_sample_with_identical_correlation() {
    let impact = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    let cause = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    let r = pearson(&impact, &cause);

    let full_sample_score = suspicion_score(&SuspicionInputs {
        pearson: r,
        spearman: r,
        cross_corr_max: r,
        cross_corr_lag: 0,
        sample_size: 30,
        min_correlation: 0.3,
        partial: None,
        anomaly_density: 0.0,
    });
    let thin_sample_score = suspicion_score(&SuspicionInputs {
        pearson: r,
        spearman: r,
        cross_corr_max: r,
        cross_corr_lag: 0,
        sample_size: 3,
        min_correlation: 0.3,
        partial: None,
        anomaly_density: 0.0,
    });

    assert!(thin_sample_score < full_sample_score);
}
