use persona_budget::{
    allocation::{AllocationParameters, CostModel},
    delivery::{EffectiveNodeMetrics, HOURS_PER_WEEK, Horizon, Lookback, NodeDeliveryMetrics},
};

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

/// Records `hours` consecutive hours starting at hour-of-week 0.
fn steady(hours: usize, impressions: f64, media_spend: f64) -> NodeDeliveryMetrics {
    let mut metrics = NodeDeliveryMetrics::new();
    for hour in 0..hours {
        metrics.record_hour(hour, impressions, media_spend, true);
    }
    metrics
}

#[test]
fn empty_metrics_report_zero_everywhere() {
    let metrics = NodeDeliveryMetrics::default();
    assert_eq!(metrics.effective_lookback(), Lookback::Lifetime);
    assert_eq!(metrics.calc_effective_impression_rate(), 0.0);
    assert_eq!(metrics.calc_effective_media_spend(Horizon::Hours(24.0)), 0.0);
    assert!(!metrics.has_history());
    assert!(!metrics.has_delivery());
    assert!(!metrics.is_ineligible());
}

#[test]
fn given_recent_delivery_when_week_is_not_better_then_two_day_window_is_used() {
    let metrics = steady(24, 100.0, 0.2);
    assert_eq!(metrics.effective_lookback(), Lookback::TwoDays);
    assert_close(metrics.calc_effective_impression_rate(), 100.0);
    assert_close(metrics.calc_effective_media_spend_rate(), 0.2);
    assert_close(metrics.calc_effective_impressions(Horizon::Hours(24.0)), 2400.0);
}

#[test]
fn given_stronger_older_delivery_when_week_beats_two_days_then_week_window_is_used() {
    let mut metrics = NodeDeliveryMetrics::new();
    for hour in 0..100 {
        metrics.record_hour(hour, 200.0, 0.4, true);
    }
    for hour in 100..120 {
        metrics.record_hour(hour, 10.0, 0.02, true);
    }

    assert_eq!(metrics.last_hour_of_week(), Some(119));
    let two_days = metrics.rates(Lookback::TwoDays).impressions_per_hour;
    let one_week = metrics.rates(Lookback::OneWeek).impressions_per_hour;
    assert!(one_week > two_days);
    assert_eq!(metrics.effective_lookback(), Lookback::OneWeek);
    assert_close(
        metrics.calc_effective_impression_rate(),
        (100.0 * 200.0 + 20.0 * 10.0) / 120.0,
    );
}

#[test]
fn given_no_delivery_in_either_window_when_rate_is_requested_then_lifetime_rate_is_used() {
    let mut metrics = NodeDeliveryMetrics::new();
    metrics.record_hour(0, 100.0, 0.5, true);
    // three more weeks of silence at the same hour push the sample out
    for week in 1..=3 {
        metrics.record_hour(week * HOURS_PER_WEEK, 0.0, 0.0, true);
    }

    assert_eq!(metrics.rates(Lookback::TwoDays).impressions_per_hour, 0.0);
    assert_eq!(metrics.rates(Lookback::OneWeek).impressions_per_hour, 0.0);
    assert_eq!(metrics.effective_lookback(), Lookback::Lifetime);
    assert_close(metrics.calc_effective_impression_rate(), 25.0);
}

#[test]
fn hourly_buckets_keep_the_three_most_recent_samples() {
    let mut metrics = NodeDeliveryMetrics::new();
    for (week, impressions) in [10.0, 20.0, 30.0, 40.0].into_iter().enumerate() {
        metrics.record_hour(5 + week * HOURS_PER_WEEK, impressions, 0.0, true);
    }
    let bucket = metrics.bucket(5).expect("bucket exists");
    assert_eq!(bucket.impressions.len(), 3);
    assert_close(bucket.average_impressions(), 30.0);
    assert_eq!(bucket.samples, 4);
    assert_eq!(metrics.lifetime_impressions(), 100.0);
}

#[test]
fn recording_invalidates_cached_rates() {
    let mut metrics = steady(2, 50.0, 0.1);
    assert_close(metrics.calc_effective_impression_rate(), 50.0);
    metrics.record_hour(2, 110.0, 0.1, true);
    assert_close(metrics.calc_effective_impression_rate(), 70.0);
}

#[test]
fn eligible_hours_without_impressions_mark_a_node_ineligible() {
    let mut metrics = NodeDeliveryMetrics::new();
    metrics.record_hour(0, 0.0, 0.0, true);
    assert!(metrics.has_history());
    assert!(metrics.is_ineligible());

    let mut unreached = NodeDeliveryMetrics::new();
    unreached.record_hour(0, 0.0, 0.0, false);
    assert!(!unreached.is_ineligible());
}

#[test]
fn total_spend_adds_margin_and_per_mille_fees() {
    let params = AllocationParameters::default();
    let cost_model = CostModel::from_parameters(&params);
    let metrics = steady(10, 1000.0, 2.0);

    let expected_hourly = 2.0 * (1.0 + params.margin) + 1000.0 * params.per_mille_fees / 1000.0;
    assert_close(
        metrics.calc_effective_total_spend(&cost_model, Horizon::Hours(24.0)),
        expected_hourly * 24.0,
    );
    assert_close(
        metrics.calc_effective_total_spend(&cost_model, Horizon::Lifetime),
        expected_hourly * 10.0,
    );
    assert_close(metrics.effective_total_ecpm(&cost_model), expected_hourly);
}

#[test]
fn metrics_survive_a_serde_trip_without_the_cache() {
    let metrics = steady(30, 40.0, 0.08);
    let _ = metrics.calc_effective_impression_rate();
    let json = serde_json::to_string(&metrics).expect("metrics serialize");
    assert!(!json.contains("rate_cache"));

    let restored: NodeDeliveryMetrics = serde_json::from_str(&json).expect("metrics parse");
    assert_eq!(restored.lifetime_hours(), 30);
    assert_close(restored.calc_effective_impression_rate(), 40.0);
}
