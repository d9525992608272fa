use log::debug;

use crate::message::Message;
use crate::types::{
    AggregatedMetricsAnalysis, ExperimentResource, Objective, PreferredDirection, TestingPattern,
    VersionAssessmentsAnalysis, VersionDetail, WinnerAssessmentAnalysis, WinnerAssessmentData,
};

fn within_limits(objective: &Objective, value: f64) -> bool {
    if let Some(upper) = objective.upper_limit {
        if value > upper {
            return false;
        }
    }
    if let Some(lower) = objective.lower_limit {
        if value < lower {
            return false;
        }
    }
    true
}

/// Check every objective against every version's aggregated value.
///
/// A version's vector holds one boolean per objective, in objective order.
/// Missing metrics and missing values score `false` with a warning; absent
/// criteria yield an empty table, which downstream stages treat as "all
/// versions feasible".
pub fn version_assessments(
    expr: &ExperimentResource,
    aggregated: &AggregatedMetricsAnalysis,
) -> VersionAssessmentsAnalysis {
    let mut assessments = VersionAssessmentsAnalysis::default();

    let Some(objectives) = expr
        .spec
        .criteria
        .as_ref()
        .and_then(|criteria| criteria.objectives.as_ref())
    else {
        return assessments;
    };

    let versions = expr.versions();
    let mut messages: Vec<Message> = Vec::new();

    for version in &versions {
        assessments
            .data
            .insert(version.name.clone(), vec![false; objectives.len()]);
    }

    for (index, objective) in objectives.iter().enumerate() {
        let Some(metric) = aggregated.data.get(&objective.metric) else {
            messages.push(Message::warning(format!(
                "aggregated metric object for {} metric is unavailable",
                objective.metric
            )));
            continue;
        };
        for version in &versions {
            match metric.data.get(&version.name) {
                Some(version_metric) => match version_metric.value {
                    Some(value) => {
                        if let Some(bits) = assessments.data.get_mut(&version.name) {
                            bits[index] = within_limits(objective, value);
                        }
                    }
                    None => messages.push(Message::warning(format!(
                        "value for {} metric and {} version is missing",
                        objective.metric, version.name
                    ))),
                },
                None => messages.push(Message::warning(format!(
                    "value for {} metric and {} version is unavailable",
                    objective.metric, version.name
                ))),
            }
        }
    }

    assessments.message = Message::join(&messages);
    debug!("version assessments: {assessments:?}");
    assessments
}

/// Versions whose assessment vector is all-true. An empty assessment table
/// means there were no objectives, so every version is feasible.
fn feasible_versions<'a>(
    versions: &[&'a VersionDetail],
    assessments: &VersionAssessmentsAnalysis,
) -> Vec<&'a VersionDetail> {
    if assessments.data.is_empty() {
        return versions.to_vec();
    }
    versions
        .iter()
        .filter(|version| {
            assessments
                .data
                .get(&version.name)
                .map(|bits| bits.iter().all(|bit| *bit))
                .unwrap_or(false)
        })
        .copied()
        .collect()
}

fn winner_for_conformance(
    expr: &ExperimentResource,
    assessments: &VersionAssessmentsAnalysis,
) -> WinnerAssessmentAnalysis {
    let mut was = WinnerAssessmentAnalysis::default();
    let baseline = &expr.spec.version_info.baseline;
    let versions = vec![baseline];
    let feasible = feasible_versions(&versions, assessments);

    if feasible.iter().any(|version| version.name == baseline.name) {
        was.data = WinnerAssessmentData {
            winner_found: true,
            winner: Some(baseline.name.clone()),
            best_versions: vec![baseline.name.clone()],
        };
        was.message = Message::join(&[Message::info("baseline satisfies all objectives")]);
    }
    was
}

fn winner_for_canary_bluegreen(
    expr: &ExperimentResource,
    assessments: &VersionAssessmentsAnalysis,
) -> WinnerAssessmentAnalysis {
    let mut was = WinnerAssessmentAnalysis::default();
    let versions = expr.versions();
    if versions.len() < 2 {
        was.message = Message::join(&[Message::warning(
            "no candidate version in a canary or blue-green experiment",
        )]);
        return was;
    }

    let feasible = feasible_versions(&versions, assessments);
    let feasible_names: Vec<&str> = feasible.iter().map(|v| v.name.as_str()).collect();

    let baseline = versions[0];
    let candidate = versions[1];
    if feasible_names.contains(&candidate.name.as_str()) {
        was.data = WinnerAssessmentData {
            winner_found: true,
            winner: Some(candidate.name.clone()),
            best_versions: vec![candidate.name.clone()],
        };
        was.message = Message::join(&[Message::info("candidate satisfies all objectives")]);
    } else if feasible_names.contains(&baseline.name.as_str()) {
        was.data = WinnerAssessmentData {
            winner_found: true,
            winner: Some(baseline.name.clone()),
            best_versions: vec![baseline.name.clone()],
        };
        was.message = Message::join(&[Message::info(
            "baseline satisfies all objectives; candidate does not",
        )]);
    }
    was
}

fn winner_for_ab(
    expr: &ExperimentResource,
    aggregated: &AggregatedMetricsAnalysis,
    assessments: &VersionAssessmentsAnalysis,
) -> WinnerAssessmentAnalysis {
    let mut was = WinnerAssessmentAnalysis::default();

    let rewards = expr
        .spec
        .criteria
        .as_ref()
        .and_then(|criteria| criteria.rewards.as_ref())
        .filter(|rewards| !rewards.is_empty());
    let Some(rewards) = rewards else {
        was.message = Message::join(&[Message::warning(
            "no reward metric in experiment; winner assessment cannot be computed \
             for A/B or A/B/n experiments without a reward metric",
        )]);
        return was;
    };
    // only the first reward is consulted
    let reward = &rewards[0];

    let Some(metric) = aggregated.data.get(&reward.metric) else {
        was.message = Message::join(&[Message::warning("reward metric values are not available")]);
        return was;
    };
    let Some(direction) = reward.preferred_direction else {
        was.message = Message::join(&[Message::error(
            "metrics cannot be compared without a preferred direction",
        )]);
        return was;
    };

    let versions = expr.versions();
    let feasible = feasible_versions(&versions, assessments);
    debug!(
        "feasible versions: {:?}",
        feasible.iter().map(|v| &v.name).collect::<Vec<_>>()
    );

    let mut messages: Vec<Message> = Vec::new();
    if feasible.is_empty() {
        messages.push(Message::info("no version satisfies all objectives"));
    }

    let mut top_reward = match direction {
        PreferredDirection::High => f64::NEG_INFINITY,
        PreferredDirection::Low => f64::INFINITY,
    };
    let mut best_versions: Vec<String> = Vec::new();

    for version in &feasible {
        let value = metric.data.get(&version.name).and_then(|m| m.value);
        let Some(value) = value else {
            messages.push(Message::warning(format!(
                "reward value for feasible version {} is not available",
                version.name
            )));
            continue;
        };
        if value == top_reward {
            best_versions.push(version.name.clone());
        } else {
            let better = match direction {
                PreferredDirection::High => value > top_reward,
                PreferredDirection::Low => value < top_reward,
            };
            if better {
                top_reward = value;
                best_versions = vec![version.name.clone()];
            }
        }
    }

    was.data.best_versions = best_versions.clone();
    match best_versions.len() {
        1 => {
            was.data.winner_found = true;
            was.data.winner = Some(best_versions[0].clone());
            messages.push(Message::info("found unique winner"));
        }
        n if n > 1 => messages.push(Message::info(
            "no unique winner; two or more feasible versions share the best reward value",
        )),
        _ => {}
    }
    was.message = Message::join(&messages);
    was
}

/// Select a winner according to the experiment's testing pattern.
pub fn winner_assessment(
    expr: &ExperimentResource,
    aggregated: &AggregatedMetricsAnalysis,
    assessments: &VersionAssessmentsAnalysis,
) -> WinnerAssessmentAnalysis {
    match expr.spec.strategy.testing_pattern {
        TestingPattern::Conformance => winner_for_conformance(expr, assessments),
        TestingPattern::Canary | TestingPattern::BlueGreen => {
            winner_for_canary_bluegreen(expr, assessments)
        }
        TestingPattern::AB | TestingPattern::ABN => winner_for_ab(expr, aggregated, assessments),
    }
}
