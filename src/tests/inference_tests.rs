use super::utils::{
    assert_close, brute_force_evidence, brute_force_marginal, chain_network, sprinkler_network,
};
use crate::core::{BNError, BayesianNetwork, VarId};
use crate::inference::{InferenceConfig, InferenceEngine};
use crate::random::{random_network, RandomNetworkConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

fn probabilities(engine: &mut InferenceEngine, var: VarId) -> Vec<f64> {
    engine.marginal(var).unwrap().probabilities.to_vec()
}

#[test]
fn test_chain_marginal() {
    let (bn, [a, b, c]) = chain_network();
    let expected = brute_force_marginal(&bn, &BTreeMap::new(), &BTreeMap::new(), c).unwrap();
    let mut engine = InferenceEngine::new(bn, InferenceConfig::sequential()).unwrap();
    // P(b = t) = 0.3 * 0.9 + 0.7 * 0.2 = 0.41, P(c = t) = 0.41 * 0.6 + 0.59 * 0.15
    assert_close(&probabilities(&mut engine, c), &[0.3345, 0.6655], 1e-12);
    assert_close(&probabilities(&mut engine, c), &expected, 1e-12);
    assert_close(&probabilities(&mut engine, b), &[0.41, 0.59], 1e-12);
    assert_close(&probabilities(&mut engine, a), &[0.3, 0.7], 1e-12);
    assert!((engine.probability_of_evidence().unwrap() - 1.).abs() < 1e-12);
}

#[test]
fn test_chain_with_evidence() {
    let (bn, [a, _, c]) = chain_network();
    let mut observations = BTreeMap::new();
    observations.insert(c, 1);
    let expected = brute_force_marginal(&bn, &observations, &BTreeMap::new(), a).unwrap();
    let p_e = brute_force_evidence(&bn, &observations);
    let mut engine = InferenceEngine::new(bn, InferenceConfig::sequential()).unwrap();
    engine.set_evidence(c, 1).unwrap();
    assert_close(&probabilities(&mut engine, a), &expected, 1e-12);
    assert_close(&probabilities(&mut engine, c), &[0., 1.], 1e-12);
    assert!((engine.probability_of_evidence().unwrap() - p_e).abs() < 1e-12);
    assert!((engine.log_probability_of_evidence().unwrap() - p_e.ln()).abs() < 1e-12);
}

#[test]
fn test_marginals_match_enumeration() {
    let bn = sprinkler_network();
    let mut engine = InferenceEngine::new(bn.clone(), InferenceConfig::sequential()).unwrap();
    let mut observations = BTreeMap::new();
    observations.insert(VarId(3), 1);
    engine.set_observations(&observations).unwrap();
    for marginal in engine.marginals().unwrap() {
        let var = bn.variable_id(&marginal.variable).unwrap();
        let expected = brute_force_marginal(&bn, &observations, &BTreeMap::new(), var).unwrap();
        assert_close(&marginal.probabilities.to_vec(), &expected, 1e-12);
        assert!((marginal.probabilities.sum() - 1.).abs() < 1e-9);
    }
    let wet = engine.marginal_named("wet_grass").unwrap();
    assert_eq!(wet.probability("damp"), Some(1.));
    assert_eq!(wet.mode(), 1);
}

#[test]
fn test_set_then_clear_evidence_restores_marginals() {
    let bn = sprinkler_network();
    let mut engine = InferenceEngine::new(bn, InferenceConfig::sequential()).unwrap();
    let before = engine.marginals().unwrap();
    engine.set_evidence(VarId(1), 0).unwrap();
    let during = engine.marginals().unwrap();
    assert_ne!(before, during);
    engine.clear_evidence(VarId(1)).unwrap();
    let after = engine.marginals().unwrap();
    for (lhs, rhs) in before.iter().zip(&after) {
        assert_close(&lhs.probabilities.to_vec(), &rhs.probabilities.to_vec(), 1e-9);
    }
}

#[test]
fn test_contradictory_evidence() {
    let bn = sprinkler_network();
    let mut engine = InferenceEngine::new(bn, InferenceConfig::sequential()).unwrap();
    // the sprinkler is off and there is no rain, the grass can not be wet
    engine.set_evidence_named("sprinkler", "off").unwrap();
    engine.set_evidence_named("rain", "no").unwrap();
    engine.set_evidence_named("wet_grass", "yes").unwrap();
    assert_eq!(engine.probability_of_evidence().unwrap(), 0.);
    assert_eq!(
        engine.log_probability_of_evidence().unwrap(),
        f64::NEG_INFINITY
    );
    for var in 0..4 {
        assert_eq!(
            engine.marginal(VarId(var)),
            Err(BNError::ContradictoryEvidence)
        );
    }
    // clearing the contradiction makes the engine usable again
    engine.set_evidence_named("wet_grass", "damp").unwrap();
    let marginal = engine.marginal(VarId(0)).unwrap();
    assert!(marginal.probabilities.iter().all(|p| p.is_finite()));
}

#[test]
fn test_unknown_inputs() {
    let (bn, _) = chain_network();
    let mut engine = InferenceEngine::new(bn, InferenceConfig::sequential()).unwrap();
    assert!(matches!(
        engine.set_evidence(VarId(3), 0),
        Err(BNError::UnknownVariable(_))
    ));
    assert!(matches!(
        engine.set_evidence(VarId(0), 2),
        Err(BNError::UnknownState { .. })
    ));
    assert!(matches!(
        engine.set_evidence_named("a", "maybe"),
        Err(BNError::UnknownState { .. })
    ));
    assert!(matches!(
        engine.marginal(VarId(3)),
        Err(BNError::UnknownVariable(_))
    ));
    assert_eq!(engine.epoch(), 0);
}

#[test]
fn test_epochs_and_snapshots() {
    let (bn, [a, b, c]) = chain_network();
    let mut engine = InferenceEngine::new(bn, InferenceConfig::sequential()).unwrap();
    assert_eq!(
        engine.cached_marginal(c),
        Err(BNError::UnpropagatedQuery { epoch: 0 })
    );
    let first = engine.propagate().unwrap();
    assert_eq!(first.epoch(), 0);
    assert!(engine.cached_marginal(c).is_ok());
    // a repeated propagation in the same epoch returns the same snapshot
    assert!(std::sync::Arc::ptr_eq(&first, &engine.propagate().unwrap()));

    engine.set_evidence(a, 0).unwrap();
    assert_eq!(engine.epoch(), 1);
    assert_eq!(
        engine.cached_marginal(c),
        Err(BNError::UnpropagatedQuery { epoch: 1 })
    );
    // identical evidence does not advance the epoch
    engine.set_evidence(a, 0).unwrap();
    engine.clear_evidence(b).unwrap();
    assert_eq!(engine.epoch(), 1);

    // a reader holding an old snapshot keeps its results
    let old = first.marginal(c).unwrap();
    let new = engine.marginal(c).unwrap();
    assert_ne!(old, new);
    assert_close(&first.marginal(c).unwrap().probabilities.to_vec(), &[0.3345, 0.6655], 1e-12);
    assert_eq!(engine.snapshot().unwrap().epoch(), 1);
}

#[test]
fn test_set_cpt_advances_epoch() {
    let (bn, [a, _, _]) = chain_network();
    let mut engine = InferenceEngine::new(bn, InferenceConfig::sequential()).unwrap();
    engine.propagate().unwrap();
    assert!(engine.set_cpt(a, vec![0.5, 0.6]).is_err());
    assert_eq!(engine.epoch(), 0);
    engine.set_cpt(a, vec![1., 0.]).unwrap();
    assert_eq!(engine.epoch(), 1);
    assert_close(&probabilities(&mut engine, a), &[1., 0.], 1e-12);
}

#[test]
fn test_frozen_evidence() {
    let (bn, [a, _, _]) = chain_network();
    let mut engine = InferenceEngine::new(bn, InferenceConfig::sequential()).unwrap();
    engine.freeze_evidence(true);
    assert_eq!(engine.set_evidence(a, 0), Err(BNError::EvidenceFrozen));
    assert_eq!(engine.reset_evidence(), Err(BNError::EvidenceFrozen));
    assert_eq!(engine.intervene(a, 0), Err(BNError::EvidenceFrozen));
    engine.freeze_evidence(false);
    engine.set_evidence(a, 0).unwrap();
    assert_eq!(engine.evidence().value(a), Some(0));
}

#[test]
fn test_intervention_cuts_parents() {
    let bn = sprinkler_network();
    let sprinkler = VarId(1);
    let cloudy = VarId(0);
    let wet = VarId(3);
    let mut engine = InferenceEngine::new(bn.clone(), InferenceConfig::sequential()).unwrap();
    let prior = probabilities(&mut engine, cloudy);
    engine.intervene(sprinkler, 0).unwrap();
    assert!(engine.evidence().is_intervention(sprinkler));
    // forcing the sprinkler says nothing about the weather
    assert_close(&probabilities(&mut engine, cloudy), &prior, 1e-12);
    let mut interventions = BTreeMap::new();
    interventions.insert(sprinkler, 0);
    let expected = brute_force_marginal(&bn, &BTreeMap::new(), &interventions, wet).unwrap();
    assert_close(&probabilities(&mut engine, wet), &expected, 1e-12);
    // an observation of the same state does
    engine.set_evidence(sprinkler, 0).unwrap();
    assert!(engine.evidence().is_observation(sprinkler));
    let mut observations = BTreeMap::new();
    observations.insert(sprinkler, 0);
    let expected = brute_force_marginal(&bn, &observations, &BTreeMap::new(), cloudy).unwrap();
    assert_close(&probabilities(&mut engine, cloudy), &expected, 1e-12);
}

#[test]
fn test_parallel_matches_sequential() {
    let mut rng = StdRng::seed_from_u64(7);
    let config = RandomNetworkConfig {
        variables_number: 14,
        edge_probability: 0.25,
        max_parents: 3,
        min_cardinality: 2,
        max_cardinality: 3,
    };
    for _ in 0..5 {
        let bn = random_network(&mut rng, &config).unwrap();
        let mut sequential = InferenceEngine::new(bn.clone(), InferenceConfig::sequential()).unwrap();
        let mut parallel = InferenceEngine::new(bn.clone(), InferenceConfig::parallel(4)).unwrap();
        let observed = VarId(rng.gen_range(0..bn.len()));
        sequential.set_evidence(observed, 0).unwrap();
        parallel.set_evidence(observed, 0).unwrap();
        let lhs = sequential.marginals().unwrap();
        let rhs = parallel.marginals().unwrap();
        for (l, r) in lhs.iter().zip(&rhs) {
            assert_close(&l.probabilities.to_vec(), &r.probabilities.to_vec(), 1e-12);
        }
        let lhs = sequential.log_probability_of_evidence().unwrap();
        let rhs = parallel.log_probability_of_evidence().unwrap();
        assert!((lhs - rhs).abs() < 1e-12);
    }
}

#[test]
fn test_cancelled_propagation_publishes_nothing() {
    for config in [InferenceConfig::sequential(), InferenceConfig::parallel(2)] {
        let bn = sprinkler_network();
        let mut engine = InferenceEngine::new(bn, config).unwrap();
        let token = engine.cancellation_token();
        token.cancel();
        assert!(matches!(engine.propagate(), Err(BNError::Cancelled)));
        assert!(matches!(
            engine.snapshot(),
            Err(BNError::UnpropagatedQuery { epoch: 0 })
        ));
        // the token is reset after a cancellation
        assert!(!token.is_cancelled());
        assert!(engine.propagate().is_ok());
    }
}

#[test]
fn test_table_size_limit() {
    let bn = sprinkler_network();
    // cliques {cloudy, sprinkler, rain} and {sprinkler, rain, wet_grass}: 8 + 12 entries
    let config = InferenceConfig::sequential().with_max_table_size(19);
    assert_eq!(
        InferenceEngine::new(bn.clone(), config).err(),
        Some(BNError::InferenceTooComplex {
            estimated: 20,
            limit: 19
        })
    );
    let config = InferenceConfig::sequential().with_max_table_size(20);
    assert!(InferenceEngine::new(bn, config).is_ok());
}

#[test]
fn test_empty_and_disconnected_networks() {
    let mut engine =
        InferenceEngine::new(BayesianNetwork::new(), InferenceConfig::sequential()).unwrap();
    assert_eq!(engine.probability_of_evidence().unwrap(), 1.);
    assert!(engine.marginals().unwrap().is_empty());

    let mut bn = BayesianNetwork::new();
    let a = bn.add_variable("a", 2).unwrap();
    let b = bn.add_variable("b", 3).unwrap();
    bn.set_cpt(a, vec![0.25, 0.75]).unwrap();
    bn.set_cpt(b, vec![0.2, 0.3, 0.5]).unwrap();
    let mut engine = InferenceEngine::new(bn, InferenceConfig::parallel(2)).unwrap();
    engine.set_evidence(a, 1).unwrap();
    assert_close(&probabilities(&mut engine, b), &[0.2, 0.3, 0.5], 1e-12);
    assert!((engine.probability_of_evidence().unwrap() - 0.75).abs() < 1e-12);
}

#[test]
fn test_hub_with_many_children() {
    let n = 200;
    let mut bn = BayesianNetwork::new();
    let hub = bn.add_variable("hub", 2).unwrap();
    bn.set_cpt(hub, vec![0.4, 0.6]).unwrap();
    let mut rows = Vec::with_capacity(n);
    let mut leaves = Vec::with_capacity(n);
    for i in 0..n {
        let leaf = bn.add_variable(&format!("leaf{i}"), 2).unwrap();
        bn.add_edge(hub, leaf).unwrap();
        let (p, q) = (0.1 + 0.8 * (i % 7) as f64 / 7., 0.9 - 0.8 * (i % 5) as f64 / 5.);
        bn.set_cpt(leaf, vec![p, 1. - p, q, 1. - q]).unwrap();
        rows.push([[p, 1. - p], [q, 1. - q]]);
        leaves.push(leaf);
    }
    // observing every third leaf, the hub posterior is a product of likelihoods
    let mut observations = BTreeMap::new();
    let mut joint = [0.4, 0.6];
    for i in (0..n).step_by(3) {
        let state = i % 2;
        observations.insert(leaves[i], state);
        for (hub_state, weight) in joint.iter_mut().enumerate() {
            *weight *= rows[i][hub_state][state];
        }
    }
    let p_e = joint[0] + joint[1];
    let posterior = [joint[0] / p_e, joint[1] / p_e];
    for config in [InferenceConfig::sequential(), InferenceConfig::parallel(4)] {
        let mut engine = InferenceEngine::new(bn.clone(), config).unwrap();
        engine.observe_all(&observations).unwrap();
        assert!((engine.probability_of_evidence().unwrap() / p_e - 1.).abs() < 1e-9);
        assert_close(&probabilities(&mut engine, hub), &posterior, 1e-9);
        for i in (1..n).step_by(3) {
            let expected: Vec<f64> = (0..2)
                .map(|s| posterior[0] * rows[i][0][s] + posterior[1] * rows[i][1][s])
                .collect();
            assert_close(&probabilities(&mut engine, leaves[i]), &expected, 1e-9);
        }
    }
}

#[test]
fn test_many_independent_variables_keep_their_priors() {
    let n = 400;
    let mut bn = BayesianNetwork::new();
    let mut priors = Vec::with_capacity(n);
    for i in 0..n {
        let var = bn.add_variable(&format!("x{i}"), 3).unwrap();
        let p = 0.05 + 0.9 * (i % 11) as f64 / 11.;
        let prior = vec![p * 0.5, p * 0.5, 1. - p];
        bn.set_cpt(var, prior.clone()).unwrap();
        priors.push(prior);
    }
    let mut engine = InferenceEngine::new(bn, InferenceConfig::parallel(4)).unwrap();
    engine.set_evidence(VarId(0), 2).unwrap();
    assert!((engine.probability_of_evidence().unwrap() - priors[0][2]).abs() < 1e-12);
    for (i, prior) in priors.iter().enumerate().skip(1) {
        assert_close(&probabilities(&mut engine, VarId(i)), prior, 1e-12);
    }
}

#[test]
fn test_bulk_evidence_advances_epoch() {
    let (bn, [a, b, c]) = chain_network();
    let mut engine = InferenceEngine::new(bn.clone(), InferenceConfig::sequential()).unwrap();
    let observations = BTreeMap::from([(c, 1)]);
    let interventions = BTreeMap::from([(b, 0)]);

    engine.observe_all(&observations).unwrap();
    assert_eq!(engine.epoch(), 1);
    engine.observe_all(&observations).unwrap();
    assert_eq!(engine.epoch(), 1);

    engine.intervene_all(&interventions).unwrap();
    assert_eq!(engine.epoch(), 2);
    // with b fixed, a is cut off from c
    assert_close(&probabilities(&mut engine, a), &[0.3, 0.7], 1e-12);

    engine.set_interventions(&BTreeMap::new()).unwrap();
    assert_eq!(engine.epoch(), 3);
    assert_eq!(engine.evidence().findings().len(), 1);
    let expected = brute_force_marginal(&bn, &observations, &BTreeMap::new(), a).unwrap();
    assert_close(&probabilities(&mut engine, a), &expected, 1e-12);

    engine
        .set_findings(&BTreeMap::from([(a, 0)]), &interventions)
        .unwrap();
    assert_eq!(engine.epoch(), 4);
    assert_eq!(engine.evidence().findings().len(), 2);
    assert!(matches!(
        engine.set_findings(&observations, &BTreeMap::from([(c, 0)])),
        Err(BNError::ConflictingFindings(_))
    ));
    assert_eq!(engine.epoch(), 4);
    engine
        .set_findings(&BTreeMap::from([(a, 0)]), &interventions)
        .unwrap();
    assert_eq!(engine.epoch(), 4);
}

#[test]
fn test_published_propagation_resets_cancellation() {
    let bn = sprinkler_network();
    let mut engine = InferenceEngine::new(bn, InferenceConfig::sequential()).unwrap();
    let token = engine.cancellation_token();
    let propagation = engine.run(engine.evidence().findings()).unwrap();
    // a cancel request arriving after the pass finished must not leak into the next one
    token.cancel();
    let published = engine.publish(propagation);
    assert!(!token.is_cancelled());
    assert_eq!(engine.snapshot().unwrap().epoch(), published.epoch());
    engine.set_evidence(VarId(3), 1).unwrap();
    assert!(engine.propagate().is_ok());
    assert!(engine.most_probable_explanation(None).is_ok());
    assert!(!token.is_cancelled());
}
