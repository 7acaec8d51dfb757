//! Matching tolerations against taints
//!
//! All functions here are pure: they only look at the toleration and taint
//! values handed in.

use kestrel_core::{
    parse_strict_i64, KestrelError, Taint, TaintEffect, Toleration, TolerationOperator,
};
use std::time::Duration;

/// Whether `toleration` matches `taint`.
///
/// A Gt/Lt pair whose values are not both canonical integers never matches.
pub fn tolerates(toleration: &Toleration, taint: &Taint) -> bool {
    try_tolerates(toleration, taint).unwrap_or(false)
}

/// Like [`tolerates`], but reports a malformed Gt/Lt numeral instead of
/// silently treating it as a mismatch
pub fn try_tolerates(toleration: &Toleration, taint: &Taint) -> kestrel_core::Result<bool> {
    if let Some(effect) = toleration.effect {
        if effect != taint.effect {
            return Ok(false);
        }
    }

    let key = toleration.key_str();
    if !key.is_empty() && key != taint.key {
        return Ok(false);
    }

    match toleration.operator {
        TolerationOperator::Exists => Ok(true),
        TolerationOperator::Equal => Ok(toleration.value_str() == taint.value_str()),
        TolerationOperator::Gt | TolerationOperator::Lt => {
            let ours = parse_numeral("toleration", toleration.value_str())?;
            let theirs = parse_numeral("taint", taint.value_str())?;
            Ok(match toleration.operator {
                TolerationOperator::Gt => ours > theirs,
                _ => ours < theirs,
            })
        }
    }
}

fn parse_numeral(side: &str, value: &str) -> kestrel_core::Result<i64> {
    parse_strict_i64(value).map_err(|reason| {
        KestrelError::validation_failed(
            "Toleration",
            format!("{} value '{}' is not a valid integer: {}", side, value, reason),
            "Gt and Lt compare signed 64-bit integers without leading zeros",
        )
    })
}

/// Whether any of `tolerations` matches `taint`
pub fn tolerates_taint(tolerations: &[Toleration], taint: &Taint) -> bool {
    tolerations.iter().any(|t| tolerates(t, taint))
}

/// Taints from `taints` with one of `effects` that no toleration matches
pub fn untolerated_taints<'a>(
    tolerations: &[Toleration],
    taints: &'a [Taint],
    effects: &[TaintEffect],
) -> Vec<&'a Taint> {
    taints
        .iter()
        .filter(|taint| effects.contains(&taint.effect))
        .filter(|taint| !tolerates_taint(tolerations, taint))
        .collect()
}

/// How long a running pod may stay on a node carrying a NoExecute taint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tolerance {
    /// No toleration matches
    Untolerated,
    /// Tolerated for a bounded time
    For(Duration),
    /// Tolerated indefinitely
    Forever,
}

/// Tolerance of `tolerations` for one NoExecute taint.
///
/// Any matching toleration without `tolerationSeconds` tolerates the taint
/// forever. Otherwise the smallest `tolerationSeconds` among the matching
/// tolerations wins; negative values count as zero.
pub fn no_execute_tolerance(tolerations: &[Toleration], taint: &Taint) -> Tolerance {
    let mut shortest: Option<i64> = None;
    let mut matched = false;

    for toleration in tolerations.iter().filter(|t| tolerates(t, taint)) {
        matched = true;
        match toleration.toleration_seconds {
            None => return Tolerance::Forever,
            Some(secs) => {
                let secs = secs.max(0);
                shortest = Some(shortest.map_or(secs, |s| s.min(secs)));
            }
        }
    }

    match (matched, shortest) {
        (true, Some(secs)) => Tolerance::For(Duration::from_secs(secs as u64)),
        _ => Tolerance::Untolerated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taint(key: &str, value: Option<&str>, effect: TaintEffect) -> Taint {
        Taint::new(key, value, effect)
    }

    fn numeric(op: TolerationOperator, value: &str) -> Toleration {
        Toleration {
            key: Some("priority".to_string()),
            operator: op,
            value: Some(value.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_key_exists_matches_everything() {
        let everything = Toleration::tolerate_everything();
        for effect in [
            TaintEffect::NoSchedule,
            TaintEffect::PreferNoSchedule,
            TaintEffect::NoExecute,
        ] {
            assert!(tolerates(&everything, &taint("a", Some("x"), effect)));
            assert!(tolerates(&everything, &taint("example.com/b", None, effect)));
        }
    }

    #[test]
    fn test_equal_requires_exact_value() {
        let t = Toleration::equal("key1", "v1", Some(TaintEffect::NoSchedule));
        assert!(tolerates(&t, &taint("key1", Some("v1"), TaintEffect::NoSchedule)));
        assert!(!tolerates(&t, &taint("key1", Some("v2"), TaintEffect::NoSchedule)));
        assert!(!tolerates(&t, &taint("key2", Some("v1"), TaintEffect::NoSchedule)));
    }

    #[test]
    fn test_effect_wildcard_and_mismatch() {
        let any_effect = Toleration::exists("key1", None);
        assert!(tolerates(&any_effect, &taint("key1", None, TaintEffect::NoExecute)));

        let no_schedule = Toleration::exists("key1", Some(TaintEffect::NoSchedule));
        assert!(!tolerates(&no_schedule, &taint("key1", None, TaintEffect::NoExecute)));
    }

    #[test]
    fn test_gt_and_lt_compare_toleration_against_taint() {
        let t = taint("priority", Some("5"), TaintEffect::NoSchedule);
        assert!(tolerates(&numeric(TolerationOperator::Gt, "6"), &t));
        assert!(!tolerates(&numeric(TolerationOperator::Gt, "5"), &t));
        assert!(tolerates(&numeric(TolerationOperator::Lt, "-3"), &t));
        assert!(!tolerates(&numeric(TolerationOperator::Lt, "5"), &t));
    }

    #[test]
    fn test_gt_with_leading_zero_taint_is_validation_error() {
        let t = taint("priority", Some("0550"), TaintEffect::NoSchedule);
        let toleration = numeric(TolerationOperator::Gt, "3");

        let err = try_tolerates(&toleration, &t).unwrap_err();
        assert!(err.is_validation());
        assert!(!tolerates(&toleration, &t));
    }

    #[test]
    fn test_gt_with_non_numeric_never_matches() {
        let t = taint("priority", Some("high"), TaintEffect::NoSchedule);
        assert!(!tolerates(&numeric(TolerationOperator::Gt, "3"), &t));
        let t = taint("priority", Some("2"), TaintEffect::NoSchedule);
        assert!(!tolerates(&numeric(TolerationOperator::Gt, "+3"), &t));
    }

    #[test]
    fn test_untolerated_taints() {
        let taints = vec![
            taint("key1", Some("v1"), TaintEffect::NoSchedule),
            taint("key2", Some("v2"), TaintEffect::NoSchedule),
            taint("key3", None, TaintEffect::PreferNoSchedule),
        ];
        let tolerations = vec![Toleration::exists("key1", None)];

        let left = untolerated_taints(&tolerations, &taints, &[TaintEffect::NoSchedule]);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].key, "key2");
    }

    #[test]
    fn test_no_execute_tolerance() {
        let t = taint("key1", Some("v1"), TaintEffect::NoExecute);

        assert_eq!(no_execute_tolerance(&[], &t), Tolerance::Untolerated);

        let bounded = Toleration::exists("key1", Some(TaintEffect::NoExecute)).for_seconds(300);
        let shorter = Toleration::equal("key1", "v1", Some(TaintEffect::NoExecute)).for_seconds(60);
        assert_eq!(
            no_execute_tolerance(&[bounded.clone(), shorter], &t),
            Tolerance::For(Duration::from_secs(60))
        );

        let forever = Toleration::exists("key1", Some(TaintEffect::NoExecute));
        assert_eq!(
            no_execute_tolerance(&[bounded, forever], &t),
            Tolerance::Forever
        );

        let negative = Toleration::exists("key1", Some(TaintEffect::NoExecute)).for_seconds(-5);
        assert_eq!(
            no_execute_tolerance(&[negative], &t),
            Tolerance::For(Duration::ZERO)
        );
    }
}
