use super::utils::{brute_force_mpe, cpt_entry, sprinkler_network};
use crate::core::{BNError, BayesianNetwork, VarId};
use crate::inference::{InferenceConfig, InferenceEngine};
use crate::random::{random_network, RandomNetworkConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;

#[test]
fn test_two_variables_mpe() {
    let mut bn = BayesianNetwork::new();
    let a = bn.add_variable_with_states("a", &["x", "y"]).unwrap();
    let b = bn.add_variable_with_states("b", &["x", "y", "z"]).unwrap();
    bn.add_edge(a, b).unwrap();
    bn.set_cpt(a, vec![0.6, 0.4]).unwrap();
    bn.set_cpt(b, vec![0.3, 0.3, 0.4, 0.9, 0.05, 0.05]).unwrap();
    let (expected, probability) = brute_force_mpe(&bn, &BTreeMap::new());
    // a = y, b = x: 0.4 * 0.9 beats a = x, b = z: 0.6 * 0.4
    assert_eq!(expected, vec![1, 0]);
    let engine = InferenceEngine::new(bn, InferenceConfig::sequential()).unwrap();
    let mpe = engine.most_probable_explanation(None).unwrap();
    assert_eq!(mpe.assignment.get(&a), Some(&1));
    assert_eq!(mpe.assignment.get(&b), Some(&0));
    assert_eq!(mpe.states.get("a").map(|s| s.as_str()), Some("y"));
    assert!((mpe.probability - probability).abs() < 1e-12);
    assert!((mpe.log_probability - 0.36f64.ln()).abs() < 1e-12);
}

#[test]
fn test_mpe_with_evidence_and_subset() {
    let bn = sprinkler_network();
    let mut engine = InferenceEngine::new(bn.clone(), InferenceConfig::sequential()).unwrap();
    engine.set_evidence(VarId(3), 0).unwrap();
    let mut observations = BTreeMap::new();
    observations.insert(VarId(3), 0);
    let (expected, probability) = brute_force_mpe(&bn, &observations);
    let mpe = engine.most_probable_explanation(None).unwrap();
    let found: Vec<usize> = mpe.assignment.values().copied().collect();
    assert_eq!(found, expected);
    assert!((mpe.probability - probability).abs() < 1e-12);

    let subset = [VarId(0), VarId(2)];
    let partial = engine.most_probable_explanation(Some(&subset[..])).unwrap();
    assert_eq!(partial.assignment.len(), 2);
    assert_eq!(partial.assignment[&VarId(0)], expected[0]);
    assert_eq!(partial.assignment[&VarId(2)], expected[2]);
    assert_eq!(partial.probability, mpe.probability);
    assert!(matches!(
        engine.most_probable_explanation(Some(&[VarId(9)][..])),
        Err(BNError::UnknownVariable(_))
    ));
}

#[test]
fn test_mpe_of_contradictory_evidence() {
    let bn = sprinkler_network();
    let mut engine = InferenceEngine::new(bn, InferenceConfig::parallel(2)).unwrap();
    engine.set_evidence(VarId(1), 1).unwrap();
    engine.set_evidence(VarId(2), 1).unwrap();
    engine.set_evidence(VarId(3), 0).unwrap();
    assert_eq!(
        engine.most_probable_explanation(None),
        Err(BNError::ContradictoryEvidence)
    );
}

#[test]
fn test_mpe_of_random_networks() {
    let mut rng = StdRng::seed_from_u64(3);
    let config = RandomNetworkConfig {
        variables_number: 8,
        edge_probability: 0.4,
        max_parents: 3,
        min_cardinality: 2,
        max_cardinality: 3,
    };
    for round in 0..10 {
        let bn = random_network(&mut rng, &config).unwrap();
        let mut engine = InferenceEngine::new(bn.clone(), InferenceConfig::parallel(3)).unwrap();
        let mut observations = BTreeMap::new();
        observations.insert(VarId(round % bn.len()), 0);
        engine.set_observations(&observations).unwrap();
        let (_, probability) = brute_force_mpe(&bn, &observations);
        let mpe = engine.most_probable_explanation(None).unwrap();
        assert!((mpe.probability - probability).abs() < 1e-12);
        // the reported assignment reaches the reported probability
        let assignment: Vec<usize> = mpe.assignment.values().copied().collect();
        let joint: f64 = bn.ids().map(|v| cpt_entry(&bn, v, &assignment)).product();
        assert!((joint - mpe.probability).abs() < 1e-12);
        assert_eq!(assignment[round % bn.len()], 0);
    }
}
