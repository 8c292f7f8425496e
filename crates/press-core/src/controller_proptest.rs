#[cfg(test)]
mod proptest_control_law {
    use crate::controller::*;
    use crate::limits::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(10000))]

        // Property: the law is exactly the three-zone partition.
        #[test]
        fn actuation_matches_band(
            target_kn in -50.0f64..=50.0,
            deadband_kn in 0.0f64..=5.0,
            force_kn in -60.0f64..=60.0,
        ) {
            let target = ControlTarget { target_kn, deadband_kn };
            let action = decide(force_kn, &target);

            let expected = if force_kn > target_kn + deadband_kn {
                Actuation::Down
            } else if force_kn < target_kn - deadband_kn {
                Actuation::Up
            } else {
                Actuation::Hold
            };
            prop_assert_eq!(action, expected);
        }

        // Property: readings exactly on either edge never actuate.
        #[test]
        fn band_edges_hold(
            target_kn in -50.0f64..=50.0,
            deadband_kn in 0.0f64..=5.0,
        ) {
            let target = ControlTarget { target_kn, deadband_kn };
            prop_assert_eq!(decide(target_kn + deadband_kn, &target), Actuation::Hold);
            prop_assert_eq!(decide(target_kn - deadband_kn, &target), Actuation::Hold);
        }

        // Property: widening the deadband never turns a hold into a correction.
        #[test]
        fn wider_band_is_never_more_aggressive(
            target_kn in -50.0f64..=50.0,
            deadband_kn in 0.0f64..=5.0,
            extra in 0.0f64..=5.0,
            force_kn in -60.0f64..=60.0,
        ) {
            let narrow = ControlTarget { target_kn, deadband_kn };
            let wide = ControlTarget { target_kn, deadband_kn: deadband_kn + extra };
            if decide(force_kn, &narrow) == Actuation::Hold {
                prop_assert_eq!(decide(force_kn, &wide), Actuation::Hold);
            }
        }

        // Property: validated targets always carry a usable band.
        #[test]
        fn validated_targets_are_well_formed(
            target_kn in -50.0f64..=50.0,
            deadband_kn in 0.0f64..=10.0,
        ) {
            let target = TargetRequest::new(target_kn, deadband_kn)
                .validate(&ForceLimits::default())
                .map(|t| t.into_target());
            prop_assert!(target.is_ok(), "rejected {:?}", target);
            let target = target.unwrap();
            prop_assert!(target.deadband_kn >= 0.0);
            prop_assert!(target.target_kn.is_finite());
        }
    }
}
