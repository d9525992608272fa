use log::debug;

use crate::config::AdvancedParameters;
use crate::message::Message;
use crate::types::{
    ExperimentResource, TestingPattern, VersionWeight, WeightsAnalysis, WeightsConfig,
    WinnerAssessmentAnalysis,
};

/// Cap each candidate's weight by the per-iteration increment and by the
/// absolute maximum; excess traffic flows back to the baseline at index 0.
///
/// With previous = [20, 40, 40], input = [20, 30, 50], increment = 10, and
/// cap = 40, index 2 has increase 10 and overshoots the cap by 10, so the
/// result is [30, 30, 40].
fn apply_constraints(weights: &mut [f64], previous: &[f64], config: &WeightsConfig) {
    for index in 1..weights.len() {
        let increase = weights[index] - previous[index];
        let excess = 0f64
            .max(increase - config.max_candidate_weight_increment)
            .max(weights[index] - config.max_candidate_weight);
        weights[index] -= excess;
        weights[0] += excess;
    }
}

/// Largest-remainder rounding of non-negative reals into integers summing to
/// exactly `total`; ties in fractional remainders go to the earlier index.
fn round_to_sum(values: &[f64], total: u32) -> Vec<u32> {
    if values.is_empty() {
        return Vec::new();
    }
    let clamped: Vec<f64> = values.iter().map(|value| value.max(0.0)).collect();
    let mut rounded: Vec<u32> = clamped.iter().map(|value| value.floor() as u32).collect();
    let assigned: u32 = rounded.iter().sum();

    let mut order: Vec<usize> = (0..clamped.len()).collect();
    order.sort_by(|&a, &b| {
        let frac_a = clamped[a] - clamped[a].floor();
        let frac_b = clamped[b] - clamped[b].floor();
        frac_b
            .partial_cmp(&frac_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    if assigned < total {
        let mut remaining = total - assigned;
        let mut cursor = 0;
        while remaining > 0 {
            rounded[order[cursor % order.len()]] += 1;
            remaining -= 1;
            cursor += 1;
        }
    } else if assigned > total {
        // floating-point drift; walk back from the smallest remainders
        let mut surplus = assigned - total;
        let mut cursor = order.len();
        while surplus > 0 {
            cursor = if cursor == 0 { order.len() } else { cursor } - 1;
            let index = order[cursor];
            if rounded[index] > 0 {
                rounded[index] -= 1;
                surplus -= 1;
            } else if rounded.iter().all(|value| *value == 0) {
                break;
            }
        }
    }
    rounded
}

/// Recommend integer traffic weights for every version.
///
/// Mixes a uniform exploration distribution with an exploitation
/// distribution concentrated on the best versions (or on the baseline when
/// there are none), then applies the per-candidate constraints and rounds to
/// percentages summing to 100. Not applicable to conformance experiments.
pub fn compute_weights(
    expr: &ExperimentResource,
    winner: &WinnerAssessmentAnalysis,
    params: &AdvancedParameters,
) -> WeightsAnalysis {
    if expr.spec.strategy.testing_pattern == TestingPattern::Conformance {
        return WeightsAnalysis {
            data: Vec::new(),
            message: Message::join(&[Message::info(
                "weight computation is not applicable to a conformance experiment",
            )]),
        };
    }

    let versions = expr.versions();
    let count = versions.len();
    let mut messages: Vec<Message> = Vec::new();

    let mut exploitation = vec![0.0; count];
    let best_versions = &winner.data.best_versions;
    if best_versions.is_empty() {
        // baseline absorbs all exploitation traffic
        exploitation[0] = 1.0;
        messages.push(Message::info("no best version(s) found"));
    } else {
        for (index, version) in versions.iter().enumerate() {
            if best_versions.contains(&version.name) {
                exploitation[index] = 1.0 / best_versions.len() as f64;
            }
        }
        messages.push(Message::info("found best version(s)"));
    }

    let exploration = 1.0 / count as f64;
    let epsilon = params.exploration_traffic_percentage / 100.0;
    let mut mixed: Vec<f64> = exploitation
        .iter()
        .map(|exploit| (exploration * epsilon + exploit * (1.0 - epsilon)) * 100.0)
        .collect();
    debug!("mixed weights: {mixed:?}");

    // previous weights; the implicit initial distribution is all-baseline
    let mut previous = vec![0.0; count];
    previous[0] = 100.0;
    if let Some(distribution) = &expr.status.current_weight_distribution {
        for (index, slot) in previous.iter_mut().enumerate() {
            *slot = distribution
                .get(index)
                .map(|weight| weight.value as f64)
                .unwrap_or(0.0);
        }
    }

    match &expr.spec.strategy.weights {
        Some(config) => apply_constraints(&mut mixed, &previous, config),
        None => messages.push(Message::info(
            "no weight constraints specified; constraints not applied",
        )),
    }
    debug!("constrained weights: {mixed:?}");

    let data = versions
        .iter()
        .zip(round_to_sum(&mixed, 100))
        .map(|(version, value)| VersionWeight {
            name: version.name.clone(),
            value,
        })
        .collect();

    WeightsAnalysis {
        data,
        message: Message::join(&messages),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn experiment(value: serde_json::Value) -> ExperimentResource {
        serde_json::from_value(value).unwrap()
    }

    fn winner_with_best(best: Vec<&str>) -> WinnerAssessmentAnalysis {
        let mut winner = WinnerAssessmentAnalysis::default();
        winner.data.best_versions = best.iter().map(|name| name.to_string()).collect();
        if best.len() == 1 {
            winner.data.winner_found = true;
            winner.data.winner = Some(best[0].to_string());
        }
        winner
    }

    #[test]
    fn conformance_gets_no_weights() {
        let expr = experiment(json!({
            "spec": {
                "strategy": {"testingPattern": "Conformance"},
                "versionInfo": {"baseline": {"name": "default"}}
            },
            "status": {"startTime": "2020-04-03T12:55:50.568Z"}
        }));
        let weights = compute_weights(
            &expr,
            &winner_with_best(vec!["default"]),
            &AdvancedParameters::default(),
        );
        assert!(weights.data.is_empty());
        assert!(weights.message.unwrap().contains("not applicable"));
    }

    #[test]
    fn capped_increment_limits_candidate_growth() {
        // exploitation on the candidate gives it 97.5%; the previous weight
        // of 5 plus the increment cap of 10 limits it to 15
        let expr = experiment(json!({
            "spec": {
                "strategy": {
                    "testingPattern": "Canary",
                    "weights": {"maxCandidateWeightIncrement": 10}
                },
                "versionInfo": {
                    "baseline": {"name": "default"},
                    "candidates": [{"name": "canary"}]
                }
            },
            "status": {
                "startTime": "2020-04-03T12:55:50.568Z",
                "currentWeightDistribution": [
                    {"name": "default", "value": 95},
                    {"name": "canary", "value": 5}
                ]
            }
        }));
        let weights = compute_weights(
            &expr,
            &winner_with_best(vec!["canary"]),
            &AdvancedParameters::default(),
        );
        let values: Vec<(String, u32)> = weights
            .data
            .iter()
            .map(|w| (w.name.clone(), w.value))
            .collect();
        assert_eq!(
            values,
            vec![("default".to_string(), 85), ("canary".to_string(), 15)]
        );
    }

    #[test]
    fn absolute_cap_limits_candidate_weight() {
        let expr = experiment(json!({
            "spec": {
                "strategy": {
                    "testingPattern": "Canary",
                    "weights": {"maxCandidateWeight": 40}
                },
                "versionInfo": {
                    "baseline": {"name": "default"},
                    "candidates": [{"name": "canary"}]
                }
            },
            "status": {"startTime": "2020-04-03T12:55:50.568Z"}
        }));
        let weights = compute_weights(
            &expr,
            &winner_with_best(vec!["canary"]),
            &AdvancedParameters::default(),
        );
        let canary = weights.data.iter().find(|w| w.name == "canary").unwrap();
        assert!(canary.value <= 40);
        assert_eq!(weights.data.iter().map(|w| w.value).sum::<u32>(), 100);
    }

    #[test]
    fn no_best_versions_exploits_baseline() {
        let expr = experiment(json!({
            "spec": {
                "strategy": {"testingPattern": "A/B"},
                "versionInfo": {
                    "baseline": {"name": "default"},
                    "candidates": [{"name": "canary"}]
                }
            },
            "status": {"startTime": "2020-04-03T12:55:50.568Z"}
        }));
        let weights = compute_weights(
            &expr,
            &winner_with_best(vec![]),
            &AdvancedParameters::default(),
        );
        // epsilon 0.05 over two versions: baseline 97.5, candidate 2.5
        let values: Vec<u32> = weights.data.iter().map(|w| w.value).collect();
        assert_eq!(values, vec![98, 2]);
        assert!(weights.message.unwrap().contains("no best version"));
    }

    #[test]
    fn tied_best_versions_split_exploitation() {
        let expr = experiment(json!({
            "spec": {
                "strategy": {"testingPattern": "A/B/n"},
                "versionInfo": {
                    "baseline": {"name": "default"},
                    "candidates": [{"name": "canary1"}, {"name": "canary2"}]
                }
            },
            "status": {"startTime": "2020-04-03T12:55:50.568Z"}
        }));
        let weights = compute_weights(
            &expr,
            &winner_with_best(vec!["canary1", "canary2"]),
            &AdvancedParameters::default(),
        );
        let values: Vec<u32> = weights.data.iter().map(|w| w.value).collect();
        // 0.05 * [1/3, 1/3, 1/3] + 0.95 * [0, 0.5, 0.5], in percent
        assert_eq!(values.iter().sum::<u32>(), 100);
        assert_eq!(values[0], 2);
        assert_eq!(values[1], 49);
        assert_eq!(values[2], 49);
    }

    #[test]
    fn constraint_example_routes_excess_to_baseline() {
        let config = WeightsConfig {
            max_candidate_weight: 40.0,
            max_candidate_weight_increment: 10.0,
        };
        let mut weights = vec![20.0, 30.0, 50.0];
        apply_constraints(&mut weights, &[20.0, 40.0, 40.0], &config);
        assert_eq!(weights, vec![30.0, 30.0, 40.0]);
    }

    #[test]
    fn rounding_preserves_total_and_breaks_ties_low() {
        assert_eq!(round_to_sum(&[96.6667, 1.6667, 1.6667], 100), vec![97, 2, 1]);
        assert_eq!(round_to_sum(&[33.5, 33.5, 33.0], 100), vec![34, 33, 33]);
        assert_eq!(round_to_sum(&[100.0], 100), vec![100]);
        assert_eq!(round_to_sum(&[], 100), Vec::<u32>::new());
    }

    #[test]
    fn rounding_clamps_negatives() {
        let rounded = round_to_sum(&[-1.0, 101.0], 100);
        assert_eq!(rounded.iter().sum::<u32>(), 100);
        assert_eq!(rounded[0], 0);
    }
}
