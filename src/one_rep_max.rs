//! Estimated one-rep max
//!
//! Epley-style estimate: a single rep is taken at face value, anything above
//! extrapolates linearly with 3.33% per rep.
//!
//! ```text
//! 1RM = load                       when reps == 1
//! 1RM = load × (1 + 0.0333 × reps) otherwise
//! ```
//!
//! `load` is the logged weight plus a bodyweight offset for bodyweight
//! flagged exercises.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::CalculationError;
use crate::models::{BodyweightMeasurement, LoadType};

/// Per-rep extrapolation coefficient (0.0333)
pub const REP_COEFFICIENT: Decimal = Decimal::from_parts(333, 0, 0, false, 4);

/// One-rep max estimator
pub struct OneRepMaxEstimator;

impl OneRepMaxEstimator {
    /// Estimate the one-rep max of a single set
    ///
    /// Fails for sets that cannot be extrapolated (no reps, negative weight,
    /// or no effective load); callers drop those sets and keep going.
    pub fn estimate(
        weight: Decimal,
        reps: u32,
        bodyweight_offset: Decimal,
    ) -> Result<Decimal, CalculationError> {
        if reps == 0 {
            return Err(CalculationError::invalid("one_rep_max", "reps", reps));
        }
        if weight < Decimal::ZERO {
            return Err(CalculationError::invalid("one_rep_max", "weight", weight));
        }

        let load = weight + bodyweight_offset;
        if load <= Decimal::ZERO {
            return Err(CalculationError::invalid("one_rep_max", "load", load));
        }

        if reps == 1 {
            return Ok(load);
        }

        load.checked_mul(Self::rep_factor(reps))
            .ok_or_else(|| CalculationError::Overflow {
                calculation: "one_rep_max".to_string(),
            })
    }

    /// Weight that the same formula predicts for `target_reps`
    pub fn weight_for_target_reps(
        one_rep_max: Decimal,
        target_reps: u32,
    ) -> Result<Decimal, CalculationError> {
        if target_reps == 0 {
            return Err(CalculationError::invalid(
                "weight_for_target_reps",
                "target_reps",
                target_reps,
            ));
        }
        if one_rep_max <= Decimal::ZERO {
            return Err(CalculationError::invalid(
                "weight_for_target_reps",
                "one_rep_max",
                one_rep_max,
            ));
        }

        if target_reps == 1 {
            return Ok(one_rep_max);
        }

        one_rep_max
            .checked_div(Self::rep_factor(target_reps))
            .ok_or_else(|| CalculationError::DivisionByZero {
                calculation: "weight_for_target_reps".to_string(),
            })
    }

    /// Bodyweight at the nearest measurement taken at or before `at`; zero if none
    pub fn resolve_bodyweight_offset(
        measurements: &[BodyweightMeasurement],
        at: DateTime<Utc>,
    ) -> Decimal {
        measurements
            .iter()
            .filter(|m| m.measured_at <= at)
            .max_by_key(|m| m.measured_at)
            .map(|m| m.weight)
            .unwrap_or(Decimal::ZERO)
    }

    /// Offset to add to a set's logged weight for the given load type
    pub fn offset_for(
        load_type: LoadType,
        measurements: &[BodyweightMeasurement],
        at: DateTime<Utc>,
    ) -> Decimal {
        if load_type.is_bodyweight() {
            Self::resolve_bodyweight_offset(measurements, at)
        } else {
            Decimal::ZERO
        }
    }

    fn rep_factor(reps: u32) -> Decimal {
        Decimal::ONE + REP_COEFFICIENT * Decimal::from(reps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    #[test]
    fn test_single_rep_is_face_value() {
        let orm = OneRepMaxEstimator::estimate(dec!(140), 1, Decimal::ZERO).unwrap();
        assert_eq!(orm, dec!(140));
    }

    #[test]
    fn test_multi_rep_estimate() {
        // 100 × (1 + 0.0333 × 5) = 116.65
        let orm = OneRepMaxEstimator::estimate(dec!(100), 5, Decimal::ZERO).unwrap();
        assert_eq!(orm, dec!(116.65));

        // 105 × (1 + 0.0333 × 3) = 115.4895
        let orm = OneRepMaxEstimator::estimate(dec!(105), 3, Decimal::ZERO).unwrap();
        assert_eq!(orm, dec!(115.4895));
    }

    #[test]
    fn test_bodyweight_offset_is_added_before_extrapolation() {
        let orm = OneRepMaxEstimator::estimate(dec!(20), 1, dec!(80)).unwrap();
        assert_eq!(orm, dec!(100));

        let orm = OneRepMaxEstimator::estimate(Decimal::ZERO, 10, dec!(80)).unwrap();
        assert_eq!(orm, dec!(106.64));
    }

    #[test]
    fn test_invalid_sets_fail() {
        assert!(OneRepMaxEstimator::estimate(dec!(100), 0, Decimal::ZERO).is_err());
        assert!(OneRepMaxEstimator::estimate(Decimal::ZERO, 5, Decimal::ZERO).is_err());
        assert!(OneRepMaxEstimator::estimate(dec!(-10), 5, dec!(80)).is_err());
    }

    #[test]
    fn test_inverse_round_trips() {
        let orm = OneRepMaxEstimator::estimate(dec!(100), 5, Decimal::ZERO).unwrap();
        let weight = OneRepMaxEstimator::weight_for_target_reps(orm, 5).unwrap();
        assert_eq!(weight, dec!(100));

        let weight = OneRepMaxEstimator::weight_for_target_reps(dec!(150), 1).unwrap();
        assert_eq!(weight, dec!(150));

        assert!(OneRepMaxEstimator::weight_for_target_reps(dec!(150), 0).is_err());
    }

    #[test]
    fn test_resolve_bodyweight_offset_uses_nearest_prior() {
        let t = Utc.with_ymd_and_hms(2024, 5, 10, 8, 0, 0).unwrap();
        let measurements = vec![
            BodyweightMeasurement {
                user_id: "u1".to_string(),
                measured_at: t - Duration::days(10),
                weight: dec!(82),
            },
            BodyweightMeasurement {
                user_id: "u1".to_string(),
                measured_at: t - Duration::days(2),
                weight: dec!(80.5),
            },
            BodyweightMeasurement {
                user_id: "u1".to_string(),
                measured_at: t + Duration::days(1),
                weight: dec!(79),
            },
        ];

        assert_eq!(
            OneRepMaxEstimator::resolve_bodyweight_offset(&measurements, t),
            dec!(80.5)
        );
        assert_eq!(
            OneRepMaxEstimator::resolve_bodyweight_offset(&measurements, t - Duration::days(30)),
            Decimal::ZERO
        );
        assert_eq!(
            OneRepMaxEstimator::offset_for(LoadType::Weighted, &measurements, t),
            Decimal::ZERO
        );
    }
}
