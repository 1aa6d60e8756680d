use survey_net::geometry::{normalize_angle, Axis, Point3};
use survey_net::surveying::{
    adjust_network, bearing, AdjustmentConfig, AdjustmentStatus, GnssBaseline, Network,
    Observation, ObservationKind as K, Station, SurveyPoint, WeightingMethod,
};
use survey_net::AdjustmentError;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn leveling(sigmas: [Option<f64>; 2]) -> Network {
    let mut net = Network::new();
    net.add_point(SurveyPoint::benchmark("A", 100.0)).unwrap();
    net.add_point(SurveyPoint::benchmark("B", 101.0)).unwrap();
    net.add_point(SurveyPoint::unknown_height("P", 105.0)).unwrap();
    net.add_station(Station::new(1, "A")).unwrap();
    net.add_station(Station::new(2, "B")).unwrap();
    for ((station, value), sigma) in [(1, 5.00), (2, 4.02)].into_iter().zip(sigmas) {
        let mut obs = Observation::new(K::VerticalDistance, station, "P", value);
        obs.sigma = sigma;
        net.add_observation(obs).unwrap();
    }
    net
}

#[test]
fn leveling_mean_of_two_lines() {
    init_logs();
    let net = leveling([None, None]);
    let config = AdjustmentConfig {
        weighting_method: WeightingMethod::Ordinary,
        ..Default::default()
    };
    let res = adjust_network(&net, &config).unwrap();
    assert_eq!(res.status, AdjustmentStatus::Converged);
    // one solve moves P, the next confirms the correction vanished
    assert_eq!(res.iterations, 2);
    assert_eq!(res.degrees_of_freedom, 1);
    let p = res.point("P").unwrap();
    assert!((p.adjusted(Axis::Z).unwrap() - 105.01).abs() < 1e-9);
    assert!((res.observations[0].residual - 0.01).abs() < 1e-9);
    assert!((res.observations[1].residual + 0.01).abs() < 1e-9);
    assert!((res.sigma0 - 0.0002f64.sqrt()).abs() < 1e-9);
    assert!((p.sigma(Axis::Z).unwrap() - 0.01).abs() < 1e-9);
    // every observation carries half of the redundancy
    for o in &res.observations {
        assert!((o.redundancy - 0.5).abs() < 1e-9);
    }
}

#[test]
fn weighted_leveling_is_invariant_to_sigma_scale() {
    init_logs();
    let config = AdjustmentConfig::default();
    let small = adjust_network(&leveling([Some(0.01), Some(0.02)]), &config).unwrap();
    let large = adjust_network(&leveling([Some(0.1), Some(0.2)]), &config).unwrap();
    let z_small = small.point("P").unwrap().adjusted(Axis::Z).unwrap();
    let z_large = large.point("P").unwrap().adjusted(Axis::Z).unwrap();
    assert!((z_small - 105.004).abs() < 1e-9);
    assert!((z_small - z_large).abs() < 1e-9);
    assert!((large.sigma0 / small.sigma0 - 0.1).abs() < 1e-9);
    assert_eq!(small.iterations, 2);
    let s_small = small.point("P").unwrap().sigma(Axis::Z).unwrap();
    let s_large = large.point("P").unwrap().sigma(Axis::Z).unwrap();
    assert!((s_small - s_large).abs() < 1e-12);
}

#[test]
fn exactly_determined_network_is_rejected() {
    let mut net = Network::new();
    net.add_point(SurveyPoint::benchmark("A", 100.0)).unwrap();
    net.add_point(SurveyPoint::unknown_height("P", 105.0)).unwrap();
    net.add_station(Station::new(1, "A")).unwrap();
    net.add_observation(Observation::new(K::VerticalDistance, 1, "P", 5.0))
        .unwrap();
    let err = adjust_network(&net, &AdjustmentConfig::default()).unwrap_err();
    assert_eq!(
        err,
        AdjustmentError::InsufficientRedundancy {
            observations: 1,
            datum_constraints: 0,
            unknowns: 1,
        }
    );
}

#[test]
fn repeated_distance_is_singular() {
    let mut net = Network::new();
    net.add_point(SurveyPoint::control("A", 0.0, 0.0)).unwrap();
    net.add_point(SurveyPoint::unknown("P", 100.0, 0.0)).unwrap();
    net.add_station(Station::new(1, "A")).unwrap();
    for _ in 0..3 {
        net.add_observation(Observation::new(K::HorizontalDistance, 1, "P", 100.0))
            .unwrap();
    }
    let err = adjust_network(&net, &AdjustmentConfig::default()).unwrap_err();
    assert!(matches!(err, AdjustmentError::SingularSystem(_)));
}

#[test]
fn coincident_points_report_the_observation() {
    let mut net = Network::new();
    net.add_point(SurveyPoint::control("A", 5.0, 5.0)).unwrap();
    net.add_point(SurveyPoint::control("B", 100.0, 5.0)).unwrap();
    net.add_point(SurveyPoint::control("C", 5.0, 100.0)).unwrap();
    net.add_point(SurveyPoint::unknown("P", 5.0, 5.0)).unwrap();
    for (key, id) in [(1, "A"), (2, "B"), (3, "C")] {
        net.add_station(Station::new(key, id)).unwrap();
    }
    net.add_observation(Observation::new(K::HorizontalDistance, 2, "P", 95.0))
        .unwrap();
    net.add_observation(Observation::new(K::Azimuth, 1, "P", 0.5))
        .unwrap();
    net.add_observation(Observation::new(K::HorizontalDistance, 3, "P", 95.0))
        .unwrap();
    match adjust_network(&net, &AdjustmentConfig::default()) {
        Err(AdjustmentError::DegenerateGeometry {
            index,
            station,
            target,
            ..
        }) => {
            assert_eq!(index, 1);
            assert_eq!(station, "A");
            assert_eq!(target, "P");
        }
        other => panic!("expected degenerate geometry, got {other:?}"),
    }
}

#[test]
fn invalid_input_is_rejected_before_solving() {
    let mut net = leveling([None, None]);
    assert!(matches!(
        net.add_observation(Observation::new(K::VerticalDistance, 9, "P", 1.0)),
        Err(AdjustmentError::Validation(_))
    ));
    assert!(matches!(
        net.add_observation(Observation::new(K::HorizontalDistance, 1, "P", 1.0)),
        Err(AdjustmentError::Validation(_))
    ));
    let config = AdjustmentConfig {
        max_iterations: 0,
        ..Default::default()
    };
    assert!(matches!(
        adjust_network(&net, &config),
        Err(AdjustmentError::Validation(_))
    ));
}

#[test]
fn intersection_with_directions_recovers_orientations() {
    init_logs();
    let a = Point3::new(0.0, 0.0, 0.0);
    let b = Point3::new(100.0, 0.0, 0.0);
    let p = Point3::new(50.0, 40.0, 0.0);
    let mut net = Network::new();
    net.add_point(SurveyPoint::control("A", a.x, a.y)).unwrap();
    net.add_point(SurveyPoint::control("B", b.x, b.y)).unwrap();
    net.add_point(SurveyPoint::unknown("P", 48.0, 42.0)).unwrap();
    net.add_station(Station::new(1, "A")).unwrap();
    net.add_station(Station::new(2, "B")).unwrap();
    let orientation = [0.3, 1.0];
    for (key, from, others) in [(1, a, [("B", b), ("P", p)]), (2, b, [("A", a), ("P", p)])] {
        let o = orientation[key as usize - 1];
        for (id, to) in others {
            let hz = normalize_angle(bearing(from, to) - o);
            net.add_observation(Observation::new(K::Direction, key, id, hz).with_sigma(1e-5))
                .unwrap();
        }
        let d = ((p.x - from.x).powi(2) + (p.y - from.y).powi(2)).sqrt();
        net.add_observation(Observation::new(K::HorizontalDistance, key, "P", d).with_sigma(0.005))
            .unwrap();
    }

    let res = adjust_network(&net, &AdjustmentConfig::default()).unwrap();
    assert!(res.converged);
    assert_eq!(res.counts.orientation_unknowns, 2);
    assert_eq!(res.degrees_of_freedom, 2);
    let point = res.point("P").unwrap();
    assert!((point.adjusted(Axis::X).unwrap() - 50.0).abs() < 1e-6);
    assert!((point.adjusted(Axis::Y).unwrap() - 40.0).abs() < 1e-6);
    for (result, expected) in res.orientations.iter().zip(orientation) {
        assert!((result.adjusted - expected).abs() < 1e-8);
    }
    assert!(res.sigma0 < 1e-6);
}

#[test]
fn noisy_intersection_ellipse_matches_covariance() {
    init_logs();
    let mut net = Network::new();
    net.add_point(SurveyPoint::control("A", 0.0, 0.0)).unwrap();
    net.add_point(SurveyPoint::control("B", 100.0, 0.0)).unwrap();
    net.add_point(SurveyPoint::control("C", 0.0, 100.0)).unwrap();
    net.add_point(SurveyPoint::unknown("P", 60.0, 55.0)).unwrap();
    for (key, id) in [(1, "A"), (2, "B"), (3, "C")] {
        net.add_station(Station::new(key, id)).unwrap();
    }
    // true position (60, 50), distances perturbed by a few millimetres
    for (key, d) in [(1, 78.1045), (2, 64.0352), (3, 78.1010)] {
        net.add_observation(Observation::new(K::HorizontalDistance, key, "P", d).with_sigma(0.003))
            .unwrap();
    }
    let res = adjust_network(&net, &AdjustmentConfig::default()).unwrap();
    assert!(res.converged);
    let p = res.point("P").unwrap();
    assert!((p.adjusted(Axis::X).unwrap() - 60.0).abs() < 0.01);
    assert!((p.adjusted(Axis::Y).unwrap() - 50.0).abs() < 0.01);
    let e = p.error_ellipse.unwrap();
    assert!(e.a >= e.b);
    assert!((0.0..std::f64::consts::PI).contains(&e.phi));
    let trace = p.covariance[0][0] + p.covariance[1][1];
    assert!((e.a * e.a + e.b * e.b - trace).abs() < 1e-12);
    let r: f64 = res.observations.iter().map(|o| o.redundancy).sum();
    assert!((r - res.degrees_of_freedom as f64).abs() < 1e-9);
}

#[test]
fn gnss_baselines_fix_a_three_dimensional_point() {
    init_logs();
    let mut net = Network::new();
    net.add_point(SurveyPoint::control3("A", 0.0, 0.0, 0.0)).unwrap();
    net.add_point(SurveyPoint::control3("C", 100.0, 0.0, 0.0)).unwrap();
    net.add_point(SurveyPoint::unknown3("B", 49.9, 50.2, 10.3)).unwrap();
    net.add_station(Station::new(1, "A")).unwrap();
    net.add_station(Station::new(2, "C")).unwrap();
    let covariance = [[4e-6, 1e-6, 0.0], [1e-6, 4e-6, 0.0], [0.0, 0.0, 9e-6]];
    for (station, dx) in [(1, 50.0), (2, -50.0)] {
        net.add_gnss_baseline(GnssBaseline {
            station,
            target: "B".into(),
            dx,
            dy: 50.0,
            dz: 10.0,
            covariance,
        })
        .unwrap();
    }
    let res = adjust_network(&net, &AdjustmentConfig::default()).unwrap();
    assert!(res.converged);
    assert_eq!(res.degrees_of_freedom, 3);
    let b = res.point("B").unwrap();
    for (axis, expected) in [(Axis::X, 50.0), (Axis::Y, 50.0), (Axis::Z, 10.0)] {
        assert!((b.adjusted(axis).unwrap() - expected).abs() < 1e-9);
    }
    assert!(res.observations.iter().all(|o| o.residual.abs() < 1e-9));
    assert_eq!(b.covariance_axes, vec![Axis::X, Axis::Y, Axis::Z]);
}

#[test]
fn slope_distance_and_zenith_angle_with_heights() {
    init_logs();
    let a = Point3::new(0.0, 0.0, 100.0);
    let b = Point3::new(120.0, 0.0, 110.0);
    let p = Point3::new(60.0, 80.0, 104.0);
    let (hi, ht) = (1.55, 1.80);
    let mut net = Network::new();
    net.add_point(SurveyPoint::control3("A", a.x, a.y, a.z)).unwrap();
    net.add_point(SurveyPoint::control3("B", b.x, b.y, b.z)).unwrap();
    net.add_point(SurveyPoint::unknown3("P", 61.0, 79.0, 103.0)).unwrap();
    net.add_station(Station::new(1, "A").with_height(hi)).unwrap();
    net.add_station(Station::new(2, "B").with_height(hi)).unwrap();
    for (key, from) in [(1, a), (2, b)] {
        let dx = p.x - from.x;
        let dy = p.y - from.y;
        let dz = (p.z + ht) - (from.z + hi);
        let horizontal = (dx * dx + dy * dy).sqrt();
        let slope = (horizontal * horizontal + dz * dz).sqrt();
        let zenith = horizontal.atan2(dz);
        net.add_observation(
            Observation::new(K::SlopeDistance, key, "P", slope)
                .with_sigma(0.003)
                .with_target_height(ht),
        )
        .unwrap();
        net.add_observation(
            Observation::new(K::ZenithAngle, key, "P", zenith)
                .with_sigma(1e-5)
                .with_target_height(ht),
        )
        .unwrap();
    }
    let res = adjust_network(&net, &AdjustmentConfig::default()).unwrap();
    assert!(res.converged);
    let point = res.point("P").unwrap();
    for (axis, expected) in [(Axis::X, p.x), (Axis::Y, p.y), (Axis::Z, p.z)] {
        assert!((point.adjusted(axis).unwrap() - expected).abs() < 1e-6);
    }
}
