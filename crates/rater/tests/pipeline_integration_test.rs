//! Integration tests for the rating pipeline
//!
//! Runs the stages through the public API, from raw ratings to CSV output.

use boardgame_rater::{
    ALSConfig, CsvEstimateWriter, CsvSource, EmbeddingProjector, EntityId, EstimateSink,
    EstimatorError, NeighborConfig, NeighborEstimator, Pipeline, Query, QuerySource,
    RaterConfig, RatingMatrix, RatingRecord, RatingScale, RatingSource, WeightedALS,
};
use ndarray::array;
use std::fs;

fn id(name: &str) -> EntityId {
    EntityId::from(name)
}

/// 4 users x 4 games with ratings at (u1,i1)=8, (u2,i1)=2, (u1,i2)=7, (u3,i2)=9
fn four_by_four() -> RatingMatrix {
    let nan = f64::NAN;
    RatingMatrix::from_dense(
        vec![id("u1"), id("u2"), id("u3"), id("u4")],
        vec![id("i1"), id("i2"), id("i3"), id("i4")],
        array![
            [8.0, 7.0, nan, nan],
            [2.0, nan, nan, nan],
            [nan, 9.0, nan, nan],
            [nan, nan, nan, nan],
        ],
    )
    .unwrap()
}

fn small_als(seed: u64) -> ALSConfig {
    ALSConfig {
        latent_factors: 2,
        regularization: 0.1,
        iterations: 5,
        seed,
        ..ALSConfig::default()
    }
}

#[test]
fn test_end_to_end_four_by_four() {
    let matrix = four_by_four();

    let fit = WeightedALS::new(small_als(2024)).fit_seeded(&matrix).unwrap();
    assert_eq!(fit.errors.len(), 5);

    let completed = fit.complete(RatingScale::default()).unwrap();
    assert!(completed
        .values()
        .iter()
        .all(|v| (1.0..=10.0).contains(v)));

    let embedding = EmbeddingProjector::new(2).project(&completed).unwrap();
    assert_eq!(embedding.num_rows(), 4);

    let config = NeighborConfig {
        neighbors: 1,
        include_self: true,
    };
    let estimator = NeighborEstimator::new(&matrix, &embedding, config).unwrap();
    let estimate = estimator.estimate(&Query::new("u1", "i2")).unwrap();

    assert!(
        (6.0..=9.0).contains(&estimate.value),
        "estimate {} outside [6, 9]",
        estimate.value
    );
}

#[test]
fn test_end_to_end_is_deterministic() {
    let matrix = four_by_four();
    let run = || {
        let fit = WeightedALS::new(small_als(7)).fit_seeded(&matrix).unwrap();
        let completed = fit.complete(RatingScale::default()).unwrap();
        let embedding = EmbeddingProjector::new(2).project(&completed).unwrap();
        (completed.values().clone(), embedding.coordinates().clone())
    };

    let (completed_a, coords_a) = run();
    let (completed_b, coords_b) = run();
    assert_eq!(completed_a, completed_b);
    assert_eq!(coords_a, coords_b);
}

#[test]
fn test_embedding_wider_than_matrix_is_fatal() {
    let matrix = four_by_four();
    let fit = WeightedALS::new(small_als(1)).fit_seeded(&matrix).unwrap();
    let completed = fit.complete(RatingScale::default()).unwrap();

    assert!(matches!(
        EmbeddingProjector::new(5).project(&completed),
        Err(EstimatorError::Dimensionality { .. })
    ));
}

#[test]
fn test_pipeline_from_csv_to_csv() {
    let dir = tempfile::tempdir().unwrap();
    let train_path = dir.path().join("train.csv");
    let queries_path = dir.path().join("queries.csv");
    let output_path = dir.path().join("estimates.csv");

    fs::write(
        &train_path,
        "userID,gameID,rating\n\
         1,100,8\n1,200,7\n1,300,3\n\
         2,100,7.5\n2,200,6.5\n2,400,2\n\
         3,100,2\n3,300,9\n3,400,8\n\
         4,200,3\n4,300,8.5\n4,400,9\n\
         5,100,6\n5,500,4\n",
    )
    .unwrap();
    fs::write(
        &queries_path,
        "userID,gameID\n1,400\n2,300\n3,200\n4,100\n99,100\n",
    )
    .unwrap();

    let mut config = RaterConfig::default();
    config.als.latent_factors = 3;
    config.als.iterations = 8;
    config.embedding.dimensions = 2;
    config.neighbors.neighbors = 2;

    let records = CsvSource::from_path(&train_path, config.io.clone())
        .unwrap()
        .read_ratings()
        .unwrap();
    let queries = CsvSource::from_path(&queries_path, config.io.clone())
        .unwrap()
        .read_queries()
        .unwrap();
    assert_eq!(records.len(), 14);
    assert_eq!(queries.len(), 5);

    let report = Pipeline::new(config.clone())
        .unwrap()
        .run(&records, &queries)
        .unwrap();

    // User 5 is not queried, so it is not part of training
    assert_eq!(report.training_users, 4);
    assert_eq!(report.items, 5);
    assert_eq!(report.rows.len(), 5);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 4);
    assert!(matches!(
        report.failures[0].error,
        EstimatorError::Alignment { .. }
    ));

    for row in &report.rows[..4] {
        assert!(
            (1.0..=10.0).contains(&row.estimate),
            "estimate {} for {}/{}",
            row.estimate,
            row.user_id,
            row.item_id
        );
    }

    CsvEstimateWriter::create(&output_path, config.io.clone())
        .unwrap()
        .write_estimates(&report.rows)
        .unwrap();

    let written = fs::read_to_string(&output_path).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines[0], "userID,gameID,rating");
    assert_eq!(lines.len(), 6);
    assert!(lines[1].starts_with("1,400,"));
    assert_eq!(lines[5], "99,100,");
}

#[test]
fn test_pipeline_rejects_duplicates_when_configured() {
    let mut config = RaterConfig::default();
    config.als.latent_factors = 2;
    config.embedding.dimensions = 2;
    config.matrix.duplicate_policy = boardgame_rater::DuplicatePolicy::Reject;

    let records = vec![
        RatingRecord::new(1, 10, 8.0),
        RatingRecord::new(1, 10, 6.0),
        RatingRecord::new(2, 10, 5.0),
    ];
    let queries = vec![Query::new(1, 10), Query::new(2, 10)];

    let result = Pipeline::new(config).unwrap().run(&records, &queries);
    assert!(matches!(
        result,
        Err(EstimatorError::DuplicateRating { .. })
    ));
}

#[test]
fn test_timeout_surfaces_as_resource_error() {
    let mut config = RaterConfig::default();
    config.als.latent_factors = 2;
    config.als.iterations = 1_000_000;
    config.als.timeout_ms = Some(1);
    config.embedding.dimensions = 2;

    let mut records = Vec::new();
    for user in 0..40 {
        for item in 0..30 {
            if (user + item) % 3 != 0 {
                records.push(RatingRecord::new(user, item, ((user * item) % 10 + 1) as f64));
            }
        }
    }
    let queries: Vec<Query> = (0..40).map(|u| Query::new(u, 0)).collect();

    let result = Pipeline::new(config).unwrap().run(&records, &queries);
    assert!(matches!(
        result,
        Err(EstimatorError::ResourceExceeded {
            limit: "als_timeout",
            ..
        })
    ));
}
