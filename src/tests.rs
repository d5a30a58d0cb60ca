use super::*;
use approx::assert_abs_diff_eq;
use proptest::prelude::*;
use rand::SeedableRng;

use crate::catalog::split_contiguous;
use crate::counts::{draw_dispersion, softplus};
use crate::dataset::{RunModel, draw_lineage_weights};
use crate::lineage::{PROGENITOR_LABEL, cell_type, label_from_scores, softmax_into};
use crate::network::{EdgeKind, RegulatoryEdge, SparseAdjacency};
use crate::simulator::{HILL_EPSILON, Neighborhoods, StepParams};

fn small_config() -> SimulationConfig {
    SimulationConfig {
        seed: 7,
        total_cells: 30,
        n_samples: 2,
        n_timepoints: 3,
        hours_per_timepoint: 2.0,
        dt: 1.0,
        ..SimulationConfig::default()
    }
}

fn default_catalog() -> GeneCatalog {
    GeneCatalog::new(&GroupSizes::default())
}

fn deterministic_network(catalog: &GeneCatalog) -> Network {
    let mut rng = SimRng::seed_from_u64(1);
    NetworkBuilder::new(catalog, 6, 2)
        .with_random_edges(0)
        .build(&mut rng)
        .unwrap()
}

fn edge(source: usize, target: usize, weight: f64) -> RegulatoryEdge {
    RegulatoryEdge {
        source,
        target,
        weight,
        kind: EdgeKind::Random,
    }
}

#[test]
fn catalog_groups_partition_gene_range() {
    let catalog = default_catalog();
    assert_eq!(catalog.n_genes(), 200);
    let mut seen = vec![0usize; catalog.n_genes()];
    for group in GeneGroup::ALL {
        for gene in catalog.indices(group) {
            seen[gene] += 1;
            assert_eq!(catalog.group_of(gene), Some(group));
        }
    }
    assert!(seen.iter().all(|&count| count == 1));
    assert_eq!(catalog.group_of(catalog.n_genes()), None);
}

#[test]
fn catalog_names_follow_group_prefixes() {
    let catalog = default_catalog();
    assert_eq!(catalog.name(0), "TF_PROG_1");
    assert_eq!(catalog.name(4), "TF_LIN1");
    assert_eq!(catalog.name(15), "TF_LIN12");
    assert_eq!(catalog.name(16), "LIG_1");
    assert_eq!(catalog.name(36), "REC_1");
    assert_eq!(catalog.name(56), "TARG_1");
    assert_eq!(catalog.name(136), "HK_1");
    assert_eq!(catalog.name(199), "OTHER_14");
}

#[test]
fn lineage_blocks_are_contiguous_and_bounded() {
    let catalog = default_catalog();
    assert_eq!(catalog.lineage_block(0, 2).unwrap(), 4..6);
    assert_eq!(catalog.lineage_block(5, 2).unwrap(), 14..16);
    let err = catalog.lineage_block(6, 2).unwrap_err();
    assert!(matches!(err, SimError::InvalidArgument(msg) if msg.contains("exceeds")));
}

#[test]
fn split_contiguous_puts_longer_pieces_first() {
    let sizes: Vec<usize> = split_contiguous(0..80, 6).iter().map(|r| r.len()).collect();
    assert_eq!(sizes, vec![14, 14, 13, 13, 13, 13]);
    let pieces = split_contiguous(16..36, 6);
    assert_eq!(pieces[0], 16..20);
    assert_eq!(pieces[5], 33..36);
    assert!(split_contiguous(0..2, 3)[2].is_empty());
}

#[test]
fn hill_reference_values() {
    assert_abs_diff_eq!(hill(1.0, 1.0, 2.0), 0.5, epsilon = 1e-7);
    assert_abs_diff_eq!(hill(2.0, 1.0, 2.0), 0.8, epsilon = 1e-7);
    assert_eq!(hill(0.0, 1.0, 2.0), 0.0);
    assert_eq!(hill(-3.0, 1.0, 2.0), 0.0);
    assert_abs_diff_eq!(hill(2.5, 2.5, 3.0), 0.5, epsilon = HILL_EPSILON);
}

proptest! {
    #[test]
    fn hill_is_increasing_and_bounded(
        a in 0.0f64..20.0,
        delta in 1e-3f64..5.0,
        k in 0.1f64..5.0,
        n in 0.5f64..4.0,
    ) {
        let lo = hill(a, k, n);
        let hi = hill(a + delta, k, n);
        prop_assert!(lo >= 0.0 && lo < 1.0);
        prop_assert!(hi >= 0.0 && hi < 1.0);
        prop_assert!(hi > lo);
    }

    #[test]
    fn softmax_rows_are_distributions(scores in prop::collection::vec(-50.0f64..50.0, 1..8)) {
        let mut probs = vec![0.0; scores.len()];
        softmax_into(&scores, &mut probs);
        prop_assert!(probs.iter().all(|&p| p >= 0.0));
        prop_assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}

#[test]
fn program_genes_wire_self_and_mutual_activation() {
    let catalog = default_catalog();
    let network = deterministic_network(&catalog);
    let adjacency = &network.adjacency;
    let prog_1 = 0;
    assert_abs_diff_eq!(adjacency.weight(prog_1, prog_1), 0.2);
    for other in 1..4 {
        let incoming = adjacency.weight(other, prog_1);
        let outgoing = adjacency.weight(prog_1, other);
        assert!((0.35..0.45).contains(&incoming), "incoming {incoming}");
        assert!((0.35..0.45).contains(&outgoing), "outgoing {outgoing}");
    }
    let mutual = network
        .edges
        .iter()
        .filter(|e| e.kind == EdgeKind::ProgMutual)
        .count();
    assert_eq!(mutual, 12);
}

#[test]
fn lineage_wiring_follows_construction_rules() {
    let catalog = default_catalog();
    let network = deterministic_network(&catalog);
    let w = |s: usize, t: usize| network.adjacency.weight(s, t);
    // TF_LIN1 / TF_LIN2 form lineage 0, TF_LIN3 / TF_LIN4 lineage 1.
    let (lin1, lin2, lin3) = (4, 5, 6);
    assert_abs_diff_eq!(w(0, lin1), 0.15);
    assert_abs_diff_eq!(w(lin1, lin1), 0.6);
    assert_abs_diff_eq!(w(lin1, lin2), 0.4);
    assert_abs_diff_eq!(w(lin2, lin1), 0.4);
    assert_abs_diff_eq!(w(lin3, lin1), -0.5);
    assert_abs_diff_eq!(w(lin1, lin3), -0.5);
    assert_abs_diff_eq!(w(lin1, 0), -0.3);

    let targets = catalog.indices(GeneGroup::Target);
    assert_abs_diff_eq!(w(lin1, targets.start), 0.7);
    assert_abs_diff_eq!(w(lin1, targets.start + 13), 0.7);
    assert_eq!(w(lin1, targets.start + 14), 0.0);
    assert_abs_diff_eq!(w(lin3, targets.start + 14), 0.7);

    let ligands = catalog.indices(GeneGroup::Ligand);
    assert_abs_diff_eq!(w(lin1, ligands.start), 0.6);
    assert_eq!(w(lin1, ligands.start + 4), 0.0);
    assert_abs_diff_eq!(w(lin3, ligands.start + 4), 0.6);

    let receptors = catalog.indices(GeneGroup::Receptor);
    assert_abs_diff_eq!(w(3, receptors.end - 1), 0.2);
}

#[test]
fn default_network_has_expected_edge_counts() {
    let catalog = default_catalog();
    let mut rng = SimRng::seed_from_u64(3);
    let network = NetworkBuilder::new(&catalog, 6, 2).build(&mut rng).unwrap();
    assert_eq!(network.edges.len(), 736);
    let random: Vec<_> = network
        .edges
        .iter()
        .filter(|e| e.kind == EdgeKind::Random)
        .collect();
    assert_eq!(random.len(), 200);
    assert!(random.iter().all(|e| e.source != e.target));
    assert!(random.iter().all(|e| (-0.05..0.05).contains(&e.weight)));
}

#[test]
fn duplicate_edges_accumulate() {
    let edges = vec![edge(0, 1, 0.2), edge(2, 1, -0.1), edge(0, 1, 0.03)];
    let adjacency = SparseAdjacency::from_edges(3, &edges).unwrap();
    assert_eq!(adjacency.nnz(), 2);
    assert_abs_diff_eq!(adjacency.weight(0, 1), 0.23, epsilon = 1e-12);
    assert_abs_diff_eq!(adjacency.weight(2, 1), -0.1);
    assert_eq!(adjacency.weight(1, 0), 0.0);
}

#[test]
fn network_adjacency_sums_random_edge_onto_scripted_edge() {
    let catalog = default_catalog();
    let network = deterministic_network(&catalog);
    let mut edges = network.edges.clone();
    edges.push(edge(0, 0, 0.03));
    let adjacency = SparseAdjacency::from_edges(catalog.n_genes(), &edges).unwrap();
    assert_abs_diff_eq!(adjacency.weight(0, 0), 0.23, epsilon = 1e-12);
    assert_eq!(adjacency.nnz(), network.adjacency.nnz());
}

#[test]
fn adjacency_rejects_out_of_range_edges() {
    let err = SparseAdjacency::from_edges(2, &[edge(0, 5, 1.0)]).unwrap_err();
    assert!(matches!(err, SimError::Shape(msg) if msg.contains("out of range")));
}

#[test]
fn propagate_routes_source_activity_to_targets() {
    let edges = vec![edge(0, 2, 0.5), edge(1, 2, -1.0), edge(2, 0, 2.0)];
    let adjacency = SparseAdjacency::from_edges(3, &edges).unwrap();
    let mut out = vec![9.0; 3];
    adjacency.propagate(&[1.0, 0.25, 0.5], &mut out);
    assert_abs_diff_eq!(out[0], 1.0);
    assert_eq!(out[1], 0.0);
    assert_abs_diff_eq!(out[2], 0.25);
}

#[test]
fn kinetics_follow_group_table() {
    let catalog = default_catalog();
    let network = deterministic_network(&catalog);
    let hk = catalog.indices(GeneGroup::Housekeeping).start;
    assert_eq!(
        (network.bias[hk], network.decay[hk], network.noise[hk]),
        (0.6, 0.1, 0.05)
    );
    let target = catalog.indices(GeneGroup::Target).start;
    assert_eq!(
        (network.bias[target], network.decay[target], network.noise[target]),
        (0.05, 0.2, 0.08)
    );
    assert_eq!((network.bias[0], network.decay[0], network.noise[0]), (0.05, 0.3, 0.1));
}

#[test]
fn signaling_pairs_cycle_through_lineages() {
    let catalog = default_catalog();
    let signaling = SignalingModel::new(&catalog, 6, 2).unwrap();
    assert_eq!(signaling.n_pairs(), 20);
    let pair = signaling.pairs()[7];
    assert_eq!(pair.lineage, 1);
    assert_eq!(pair.ligand, catalog.indices(GeneGroup::Ligand).start + 7);
    assert_eq!(pair.receptor, catalog.indices(GeneGroup::Receptor).start + 7);
    assert_abs_diff_eq!(signaling.effect(6, 7), 0.6);
    assert_abs_diff_eq!(signaling.effect(7, 7), 0.6);
    assert_eq!(signaling.effect(4, 7), 0.0);
    assert_eq!(signaling.effect(pair.ligand, 7), 0.0);
}

#[test]
fn signaling_accumulates_pair_signals_onto_lineage_tfs() {
    let catalog = default_catalog();
    let signaling = SignalingModel::new(&catalog, 6, 2).unwrap();
    let mut signal = vec![0.0; signaling.n_pairs()];
    signal[0] = 1.0;
    signal[6] = 0.5;
    signal[1] = 2.0;
    let mut out = vec![0.0; catalog.n_genes()];
    signaling.accumulate(&signal, &mut out);
    assert_abs_diff_eq!(out[4], 0.6 * 1.5, epsilon = 1e-12);
    assert_abs_diff_eq!(out[5], 0.6 * 1.5, epsilon = 1e-12);
    assert_abs_diff_eq!(out[6], 1.2, epsilon = 1e-12);
    assert_eq!(out.iter().filter(|&&v| v != 0.0).count(), 4);
}

#[test]
fn signaling_pairs_limited_by_smaller_group() {
    let sizes = GroupSizes {
        receptor: 5,
        ..GroupSizes::default()
    };
    let catalog = GeneCatalog::new(&sizes);
    let signaling = SignalingModel::new(&catalog, 6, 2).unwrap();
    assert_eq!(signaling.n_pairs(), 5);
}

#[test]
fn neighborhoods_exclude_self_and_fall_back() {
    let mut rng = SimRng::seed_from_u64(11);
    assert!(Neighborhoods::sample(&mut rng, 1, 5).is_none());
    assert!(Neighborhoods::sample(&mut rng, 10, 0).is_none());

    let hoods = Neighborhoods::sample(&mut rng, 4, 10).unwrap();
    assert_eq!(hoods.k(), 3);
    for cell in 0..4 {
        let mut picks = hoods.of(cell).to_vec();
        assert!(!picks.contains(&cell));
        picks.sort_unstable();
        picks.dedup();
        assert_eq!(picks.len(), 3);
    }
}

#[test]
fn snapshots_stay_within_bounds() {
    let config = SimulationConfig {
        x_max: 2.0,
        morphogen_scale: 25.0,
        ..small_config()
    };
    let mut rng = SimRng::seed_from_u64(config.seed);
    let model = RunModel::build(&config, &mut rng).unwrap();
    let weights = draw_lineage_weights(&mut rng, config.n_lineages).unwrap();
    let morphogen = model.morphogen(&weights).unwrap();
    let latent = model.simulator().run(&mut rng, 6, &morphogen).unwrap();
    assert_eq!(latent.n_rows(), 6 * 3);
    assert!(latent.as_rows().iter().all(|&v| (0.0..=2.0).contains(&v)));
    assert!(latent.as_rows().iter().any(|&v| v == 2.0));
}

#[test]
fn first_snapshot_is_initial_state() {
    let config = small_config();
    let mut rng = SimRng::seed_from_u64(1);
    let model = RunModel::build(&config, &mut rng).unwrap();
    let simulator = model.simulator();
    let morphogen = vec![0.0; model.catalog.n_genes()];

    let mut rng_a = SimRng::seed_from_u64(99);
    let latent = simulator.run(&mut rng_a, 3, &morphogen).unwrap();
    let mut rng_b = SimRng::seed_from_u64(99);
    let initial = simulator.initial_state(&mut rng_b, 3).unwrap();

    let n_genes = model.catalog.n_genes();
    for cell in 0..3 {
        assert_eq!(latent.row(cell, 0), &initial[cell * n_genes..(cell + 1) * n_genes]);
    }
    // Program TFs start near 1.5, housekeeping near 1.0.
    assert!((1.0..2.0).contains(&latent.get(0, 0, 0)));
    let hk = model.catalog.indices(GeneGroup::Housekeeping).start;
    assert!((0.5..1.5).contains(&latent.get(0, 0, hk)));
}

#[test]
fn single_cell_random_neighbors_match_mean_field() {
    let base = small_config();
    let random = SimulationConfig {
        neighbor_mode: NeighborMode::Random,
        ..base.clone()
    };
    let mut rng = SimRng::seed_from_u64(5);
    let model = RunModel::build(&base, &mut rng).unwrap();
    let morphogen = vec![0.0; model.catalog.n_genes()];
    let random_params = StepParams::from_config(&random).unwrap();
    let random_sim = Simulator::new(
        &model.catalog,
        &model.network,
        &model.signaling,
        random_params,
    );

    let mut rng_a = SimRng::seed_from_u64(42);
    let mut rng_b = SimRng::seed_from_u64(42);
    let mean_field = model.simulator().run(&mut rng_a, 1, &morphogen).unwrap();
    let fallback = random_sim.run(&mut rng_b, 1, &morphogen).unwrap();
    assert_eq!(mean_field, fallback);
}

#[test]
fn neighbor_count_is_capped_by_sample_size() {
    let base = small_config();
    let random = SimulationConfig {
        neighbor_mode: NeighborMode::Random,
        neighbor_k: 100,
        neighbor_mix: 0.0,
        ..base.clone()
    };
    let mut rng = SimRng::seed_from_u64(5);
    let model = RunModel::build(&base, &mut rng).unwrap();
    let morphogen = vec![0.0; model.catalog.n_genes()];
    let params = StepParams::from_config(&random).unwrap();
    let sim = Simulator::new(&model.catalog, &model.network, &model.signaling, params);
    let latent = sim.run(&mut SimRng::seed_from_u64(8), 4, &morphogen).unwrap();
    assert_eq!(latent.n_rows(), 12);
    assert!(latent.as_rows().iter().all(|v| v.is_finite()));
}

#[test]
fn run_rejects_mismatched_morphogen() {
    let config = small_config();
    let mut rng = SimRng::seed_from_u64(1);
    let model = RunModel::build(&config, &mut rng).unwrap();
    let err = model.simulator().run(&mut rng, 2, &[0.0; 3]).unwrap_err();
    assert!(matches!(err, SimError::Shape(msg) if msg.contains("morphogen length")));
}

#[test]
fn empty_sample_produces_no_rows() {
    let config = small_config();
    let mut rng = SimRng::seed_from_u64(1);
    let model = RunModel::build(&config, &mut rng).unwrap();
    let morphogen = vec![0.0; model.catalog.n_genes()];
    let latent = model.simulator().run(&mut rng, 0, &morphogen).unwrap();
    assert_eq!(latent.n_rows(), 0);
}

#[test]
fn count_model_reference_values() {
    assert_abs_diff_eq!(softplus(0.0), std::f64::consts::LN_2, epsilon = 1e-12);
    assert_abs_diff_eq!(softplus(800.0), 800.0, epsilon = 1e-9);
    let model = CountModel::new(vec![2.0; 3], 1.0, 0.6).unwrap();
    assert_abs_diff_eq!(model.dropout_probability(1.0), 0.5);
    assert!(model.dropout_probability(3.0) < 0.5);
    assert!(model.dropout_probability(0.0) > 0.5);
}

#[test]
fn count_mean_tracks_softplus_without_dropout() {
    let n_genes = 4;
    let model = CountModel::new(vec![2.0; n_genes], -50.0, 1.0).unwrap();
    let latent = vec![0.0; 5_000 * n_genes];
    let mut rng = SimRng::seed_from_u64(21);
    let draw = model.draw(&mut rng, &latent).unwrap();
    assert!(draw.dropped.iter().all(|&d| !d));
    let mean = draw.counts.iter().map(|&c| c as f64).sum::<f64>() / draw.counts.len() as f64;
    assert_abs_diff_eq!(mean, std::f64::consts::LN_2, epsilon = 0.05);
}

#[test]
fn dropped_entries_are_exactly_zero() {
    let n_genes = 5;
    let model = CountModel::new(vec![1.5; n_genes], 3.0, 0.6).unwrap();
    let latent: Vec<f64> = (0..200 * n_genes).map(|i| (i % 7) as f64).collect();
    let mut rng = SimRng::seed_from_u64(4);
    let draw = model.draw(&mut rng, &latent).unwrap();
    assert!(draw.dropped.iter().any(|&d| d));
    for (&count, &dropped) in draw.counts.iter().zip(&draw.dropped) {
        if dropped {
            assert_eq!(count, 0);
        }
    }
    assert!(draw.counts.iter().any(|&c| c > 0));
}

#[test]
fn count_model_rejects_bad_inputs() {
    assert!(matches!(
        CountModel::new(vec![1.0, 0.0], 1.0, 0.6),
        Err(SimError::InvalidArgument(_))
    ));
    assert!(matches!(
        CountModel::new(vec![1.0], 1.0, 0.0),
        Err(SimError::InvalidArgument(_))
    ));
    let model = CountModel::new(vec![1.0; 3], 1.0, 0.6).unwrap();
    let mut rng = SimRng::seed_from_u64(0);
    assert!(matches!(
        model.draw(&mut rng, &[0.0; 4]),
        Err(SimError::Shape(_))
    ));
}

#[test]
fn dispersion_draws_are_positive() {
    let mut rng = SimRng::seed_from_u64(2);
    let dispersion = draw_dispersion(&mut rng, 200, 1.0, 0.3).unwrap();
    assert_eq!(dispersion.len(), 200);
    assert!(dispersion.iter().all(|&d| d > 0.0));
}

#[test]
fn count_matrix_round_trips_and_stacks() {
    let dense = vec![0, 3, 0, 1, 0, 0];
    let mut matrix = CountMatrix::from_dense(2, 3, &dense).unwrap();
    assert_eq!(matrix.nnz(), 2);
    assert_eq!(matrix.indptr(), &[0, 1, 2]);
    assert_eq!(matrix.get(0, 1), 3);
    assert_eq!(matrix.get(1, 2), 0);

    let other = CountMatrix::from_dense(1, 3, &[4, 0, 2]).unwrap();
    matrix.append(&other).unwrap();
    assert_eq!(matrix.shape(), (3, 3));
    assert_eq!(matrix.indptr(), &[0, 1, 2, 4]);
    assert_eq!(matrix.to_dense(), vec![0, 3, 0, 1, 0, 0, 4, 0, 2]);

    let wrong = CountMatrix::from_dense(1, 2, &[1, 1]).unwrap();
    assert!(matches!(matrix.append(&wrong), Err(SimError::Shape(_))));
}

#[test]
fn lineage_label_threshold_scenarios() {
    assert_eq!(label_from_scores(&[1.5, 0.9], 1.2), 1);
    assert_eq!(label_from_scores(&[1.0, 1.1], 1.2), PROGENITOR_LABEL);
    assert_eq!(label_from_scores(&[0.3, 1.2, 1.2], 1.2), 2);
    assert_eq!(cell_type(0), "progenitor");
    assert_eq!(cell_type(3), "lin3");
}

#[test]
fn lineage_assigner_scores_tf_block_means() {
    let catalog = default_catalog();
    let assigner = LineageAssigner::new(&catalog, 6, 2, 1.2).unwrap();
    let n_genes = catalog.n_genes();
    let mut latent = vec![0.0; 2 * n_genes];
    // Row 0: lineage 3 (TF_LIN5, TF_LIN6) averages 2.0.
    latent[8] = 1.5;
    latent[9] = 2.5;
    // Row 1: best lineage averages 1.0, below the threshold.
    latent[n_genes + 4] = 1.0;
    latent[n_genes + 5] = 1.0;

    let calls = assigner.assign(&latent, n_genes).unwrap();
    assert_eq!(calls.labels, vec![3, PROGENITOR_LABEL]);
    for row in 0..2 {
        let probs = calls.fate_row(row);
        assert_eq!(probs.len(), 6);
        assert_abs_diff_eq!(probs.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }
    let row0 = calls.fate_row(0);
    assert!(row0[2] > row0[0]);
    let row1 = calls.fate_row(1);
    assert!(row1[0] > row1[1]);
}

#[test]
fn config_rejects_indivisible_step_size() {
    let config = SimulationConfig {
        dt: 0.7,
        ..SimulationConfig::default()
    };
    let err = config.validate().unwrap_err();
    assert!(matches!(err, SimError::InvalidArgument(msg) if msg.contains("divisible")));

    let fine = SimulationConfig {
        dt: 0.1,
        ..SimulationConfig::default()
    };
    assert_eq!(fine.steps_per_timepoint().unwrap(), 20);
    assert!(simulate_dataset(&config).is_err());
}

#[test]
fn config_validation_catches_bad_lineage_layout() {
    let config = SimulationConfig {
        n_lineages: 7,
        ..SimulationConfig::default()
    };
    assert!(matches!(
        config.validate(),
        Err(SimError::InvalidArgument(msg)) if msg.contains("lineage genes")
    ));

    let mix = SimulationConfig {
        neighbor_mix: 1.5,
        ..SimulationConfig::default()
    };
    assert!(mix.validate().is_err());
    assert!(SimulationConfig::default().validate().is_ok());
}

#[test]
fn config_splits_budget_and_timepoints() {
    let config = SimulationConfig {
        total_cells: 100,
        n_samples: 3,
        n_timepoints: 12,
        ..SimulationConfig::default()
    };
    assert_eq!(config.trajectories_per_sample(), vec![3, 3, 2]);
    let times = config.timepoints();
    assert_eq!(times.len(), 12);
    assert_eq!(times[0], 0.0);
    assert_eq!(times[11], 22.0);
}

#[test]
fn neighbor_mode_parses_case_insensitively() {
    assert_eq!("Random".parse::<NeighborMode>().unwrap(), NeighborMode::Random);
    assert_eq!("none".parse::<NeighborMode>().unwrap(), NeighborMode::None);
    assert!(matches!(
        "grid".parse::<NeighborMode>(),
        Err(SimError::InvalidArgument(_))
    ));
}

#[test]
fn config_deserializes_with_defaults() {
    let config: SimulationConfig =
        serde_json::from_str(r#"{"seed": 9, "neighbor_mode": "random"}"#).unwrap();
    assert_eq!(config.seed, 9);
    assert_eq!(config.neighbor_mode, NeighborMode::Random);
    assert_eq!(config.n_timepoints, 12);
    assert_eq!(config.group_sizes, GroupSizes::default());
}

#[test]
fn lineage_weights_form_a_distribution() {
    let mut rng = SimRng::seed_from_u64(12);
    let weights = draw_lineage_weights(&mut rng, 6).unwrap();
    assert_eq!(weights.len(), 6);
    assert!(weights.iter().all(|&w| w >= 0.0));
    assert_abs_diff_eq!(weights.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
}

#[test]
fn morphogen_only_touches_lineage_tfs() {
    let config = small_config();
    let mut rng = SimRng::seed_from_u64(config.seed);
    let model = RunModel::build(&config, &mut rng).unwrap();
    let weights = vec![0.5, 0.0, 0.0, 0.0, 0.25, 0.25];
    let morphogen = model.morphogen(&weights).unwrap();
    assert_abs_diff_eq!(morphogen[4], 0.3);
    assert_abs_diff_eq!(morphogen[5], 0.3);
    assert_eq!(morphogen[6], 0.0);
    assert_abs_diff_eq!(morphogen[14], 0.15);
    let lineage = model.catalog.indices(GeneGroup::Lineage);
    assert!(morphogen
        .iter()
        .enumerate()
        .all(|(gene, &m)| m == 0.0 || lineage.contains(&gene)));
    assert!(model.morphogen(&[1.0]).is_err());
}

#[test]
fn dataset_is_reproducible_for_a_seed() {
    let config = small_config();
    let a = simulate_dataset(&config).unwrap();
    let b = simulate_dataset(&config).unwrap();
    assert_eq!(a.counts, b.counts);
    assert_eq!(a.obs, b.obs);
    assert_eq!(a.fate_probabilities, b.fate_probabilities);
    assert_eq!(a.grn, b.grn);

    let other = simulate_dataset(&SimulationConfig {
        seed: 8,
        ..config
    })
    .unwrap();
    assert_ne!(a.counts, other.counts);
}

#[test]
fn dataset_is_independent_of_thread_count() {
    let single = simulate_dataset(&SimulationConfig {
        n_threads: Some(1),
        neighbor_mode: NeighborMode::Random,
        neighbor_k: 3,
        neighbor_mix: 0.5,
        ..small_config()
    })
    .unwrap();
    let many = simulate_dataset(&SimulationConfig {
        n_threads: Some(3),
        neighbor_mode: NeighborMode::Random,
        neighbor_k: 3,
        neighbor_mix: 0.5,
        ..small_config()
    })
    .unwrap();
    assert_eq!(single.counts, many.counts);
    assert_eq!(single.fate_probabilities, many.fate_probabilities);
}

#[test]
fn dataset_metadata_and_trajectory_graph_are_consistent() {
    let config = small_config();
    let mut latent_max = 0.0f64;
    let mut sample_rows = Vec::new();
    let dataset = simulate_dataset_with(&config, |sample| {
        latent_max = sample
            .latent
            .as_rows()
            .iter()
            .copied()
            .fold(latent_max, f64::max);
        sample_rows.push(sample.latent.n_rows());
        assert_abs_diff_eq!(sample.lineage_weights.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    })
    .unwrap();

    // 30 cells / 3 timepoints = 10 trajectories over 2 samples.
    assert_eq!(sample_rows, vec![15, 15]);
    assert!(latent_max <= config.x_max);
    assert_eq!(dataset.n_obs(), 30);
    assert_eq!(dataset.counts.shape(), (30, 200));
    assert_eq!(dataset.info.total_cells_generated, 30);
    assert_eq!(dataset.info.timepoints, vec![0.0, 2.0, 4.0]);
    assert_eq!(dataset.obs_names()[12], "cell_0000012");

    assert_eq!(dataset.obs[0].sample, "sample_0");
    assert_eq!(dataset.obs[15].sample, "sample_1");
    assert_eq!(dataset.obs[4].timepoint_idx, 1);
    assert_eq!(dataset.obs[4].timepoint, 2.0);
    assert_eq!(dataset.obs[4].pseudotime, 2.0);

    for (row, meta) in dataset.obs.iter().enumerate() {
        assert!(meta.lineage_id as usize <= config.n_lineages);
        assert_eq!(meta.cell_type, cell_type(meta.lineage_id));
        let probs = dataset.fate_row(row);
        assert!(probs.iter().all(|&p| p >= 0.0));
        assert_abs_diff_eq!(probs.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
    }

    assert_eq!(dataset.transitions.len(), 10 * 2);
    for edge in &dataset.transitions {
        assert_eq!(edge.tgt, edge.src + 1);
        assert_eq!(edge.weight, 1.0);
        let (src, tgt) = (&dataset.obs[edge.src], &dataset.obs[edge.tgt]);
        assert_eq!(src.sample, tgt.sample);
        assert_eq!(src.timepoint_idx + 1, tgt.timepoint_idx);
    }
}

#[test]
fn grn_export_serializes_edges_and_pairs() {
    let dataset = simulate_dataset(&small_config()).unwrap();
    assert_eq!(dataset.grn.gene_names.len(), 200);
    assert_eq!(dataset.grn.edges.len(), 736);
    assert_eq!(dataset.grn.ligand_receptor_pairs.len(), 20);
    let first = &dataset.grn.edges[0];
    assert_eq!((first.source.as_str(), first.target.as_str()), ("TF_PROG_1", "TF_PROG_1"));

    let json = dataset.grn.to_json().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["edges"][0]["type"], "prog_self");
    assert_eq!(parsed["ligand_receptor_pairs"][3]["ligand_name"], "LIG_4");
    assert_eq!(parsed["ligand_receptor_pairs"][3]["lineage"], 3);
}

#[test]
fn one_step_matches_hand_computed_euler_maruyama() {
    use rand::Rng;
    use rand_distr::StandardNormal;

    let config = SimulationConfig {
        n_timepoints: 2,
        hours_per_timepoint: 1.0,
        dt: 1.0,
        neighbor_mode: NeighborMode::Random,
        neighbor_k: 2,
        neighbor_mix: 0.5,
        ..small_config()
    };
    let mut rng = SimRng::seed_from_u64(config.seed);
    let model = RunModel::build(&config, &mut rng).unwrap();
    let weights = draw_lineage_weights(&mut rng, config.n_lineages).unwrap();
    let morphogen = model.morphogen(&weights).unwrap();
    let n_cells = 5;
    let latent = model
        .simulator()
        .run(&mut SimRng::seed_from_u64(17), n_cells, &morphogen)
        .unwrap();

    let simulator = model.simulator();
    let mut replay = SimRng::seed_from_u64(17);
    let x = simulator.initial_state(&mut replay, n_cells).unwrap();
    let neighbors = Neighborhoods::sample(&mut replay, n_cells, 2).unwrap();

    let n_genes = model.catalog.n_genes();
    let network = &model.network;
    let pairs = model.signaling.pairs();
    let h = |v: f64| hill(v, config.hill_k, config.hill_n);
    let at = |cell: usize, gene: usize| x[cell * n_genes + gene];
    let global: Vec<f64> = pairs
        .iter()
        .map(|p| (0..n_cells).map(|c| at(c, p.ligand).max(0.0)).sum::<f64>() / n_cells as f64)
        .collect();

    let mut max_diff = 0.0f64;
    for cell in 0..n_cells {
        let signal: Vec<f64> = pairs
            .iter()
            .zip(&global)
            .map(|(p, &global_mean)| {
                let local = neighbors
                    .of(cell)
                    .iter()
                    .map(|&other| at(other, p.ligand).max(0.0))
                    .sum::<f64>()
                    / 2.0;
                h(at(cell, p.receptor)) * (0.5 * local + 0.5 * global_mean)
            })
            .collect();
        for gene in 0..n_genes {
            let regulatory: f64 = (0..n_genes)
                .map(|source| h(at(cell, source)) * network.adjacency.weight(source, gene))
                .sum();
            let signaling: f64 = (0..pairs.len())
                .map(|p| model.signaling.effect(gene, p) * signal[p])
                .sum();
            let drift = regulatory + network.bias[gene] - network.decay[gene] * at(cell, gene)
                + signaling
                + morphogen[gene];
            let z: f64 = replay.sample(StandardNormal);
            let expected =
                (at(cell, gene) + drift + network.noise[gene] * z).clamp(0.0, config.x_max);
            max_diff = max_diff.max((expected - latent.get(cell, 1, gene)).abs());
        }
    }
    assert!(max_diff < 1e-10, "max difference {max_diff}");
}

#[test]
fn group_size_overrides_resize_the_catalog() {
    let sizes = GroupSizes::default()
        .with_overrides([("target", 10), ("Other", 0)])
        .unwrap();
    assert_eq!(sizes.target, 10);
    assert_eq!(sizes.other, 0);
    assert_eq!(sizes.lineage, GroupSizes::default().lineage);
    let catalog = GeneCatalog::new(&sizes);
    assert_eq!(catalog.n_genes(), 4 + 12 + 20 + 20 + 10 + 50);
    assert!(catalog.indices(GeneGroup::Other).is_empty());

    let err = GroupSizes::default()
        .with_overrides([("enhancer", 3)])
        .unwrap_err();
    assert!(matches!(err, SimError::InvalidArgument(msg) if msg.contains("enhancer")));
}

#[test]
fn lineage_assignment_rejects_ragged_latent_block() {
    let catalog = default_catalog();
    let assigner = LineageAssigner::new(&catalog, 6, 2, 1.2).unwrap();
    let err = assigner.assign(&[0.0; 5], catalog.n_genes()).unwrap_err();
    assert!(matches!(err, SimError::Shape(msg) if msg.contains("not a multiple")));
}

#[test]
fn counts_beyond_u32_range_are_rejected() {
    let model = CountModel::new(vec![50.0], 1.0, 0.6).unwrap();
    let mut rng = SimRng::seed_from_u64(3);
    let err = model.draw(&mut rng, &[1e12]).unwrap_err();
    assert!(matches!(err, SimError::Distribution(msg) if msg.contains("u32")));
}
