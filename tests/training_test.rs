use std::fs;
use std::sync::Arc;
use std::thread;

use hearmony::{
    Analyzer, ArchitectureDescriptor, ArtifactError, CalibrationConfig, Dataset, Emotion, ExtractionConfig,
    HearmonyError, LabeledExample, ModelStore, SpectrogramImage, TrainedModel, TrainerBuilder, TrainingConfig,
    TrainingOutcome,
};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

const SIZE: usize = 16;

fn tiny_architecture(num_classes: usize) -> ArchitectureDescriptor {
    ArchitectureDescriptor {
        input_size: SIZE,
        channels: 1,
        conv_filters: vec![2, 4],
        kernel_size: 3,
        pool_size: 2,
        conv_dropout: 0.0,
        dense_units: 8,
        dense_dropout: 0.0,
        num_classes,
    }
}

/// Angry images are bright in the upper half, sad images in the lower half.
fn banded_dataset(per_class: usize, seed: u64) -> Dataset<SpectrogramImage> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut examples = Vec::new();
    for i in 0..per_class * 2 {
        let emotion = if i % 2 == 0 { Emotion::Angry } else { Emotion::Sad };
        let pixels = Array3::from_shape_fn((1, SIZE, SIZE), |(_, y, _)| {
            let upper = y < SIZE / 2;
            let lit = (emotion == Emotion::Angry) == upper;
            let base = if lit { 0.8 } else { 0.1 };
            base + rng.gen_range(0.0..0.1)
        });
        examples.push(LabeledExample::new(SpectrogramImage::from_pixels(pixels).unwrap(), emotion));
    }
    Dataset::new(examples).unwrap()
}

fn train(dataset: &Dataset<SpectrogramImage>, epochs: usize) -> TrainingOutcome {
    TrainerBuilder::new()
        .with_architecture(tiny_architecture(dataset.encoding().len()))
        .with_training_config(TrainingConfig {
            epochs,
            batch_size: 8,
            patience: 5,
            learning_rate: 0.01,
            test_fraction: 0.2,
            seed: 7,
        })
        .train(dataset)
        .unwrap()
}

#[test]
fn test_trains_on_separable_images() {
    let dataset = banded_dataset(20, 1);
    let outcome = train(&dataset, 15);

    assert!(!outcome.history.is_empty());
    assert_eq!(outcome.split.train.len() + outcome.split.test.len(), 40);
    assert_eq!(outcome.split.test.len(), 8);

    let report = outcome.report.as_ref().expect("held-out report");
    assert_eq!(report.total, 8);
    assert!(report.accuracy >= 0.7, "accuracy {}", report.accuracy);
    assert_eq!(outcome.model.labels(), &[Emotion::Angry, Emotion::Sad]);
}

#[test]
fn test_best_epoch_has_the_lowest_held_out_loss() {
    let dataset = banded_dataset(10, 2);
    let outcome = train(&dataset, 12);

    let losses: Vec<f32> = outcome.history.iter().filter_map(|r| r.val_loss).collect();
    assert_eq!(losses.len(), outcome.history.len());
    let best = losses.iter().copied().fold(f32::INFINITY, f32::min);
    assert_eq!(outcome.history[outcome.best_epoch - 1].val_loss, Some(best));
    if outcome.stopped_early {
        assert_eq!(outcome.history.len(), outcome.best_epoch + 5);
    }
}

#[test]
fn test_early_stop_restores_the_best_epoch_weights() {
    let dataset = banded_dataset(10, 2);
    let outcome = TrainerBuilder::new()
        .with_architecture(tiny_architecture(dataset.encoding().len()))
        .with_training_config(TrainingConfig {
            epochs: 40,
            batch_size: 4,
            patience: 1,
            learning_rate: 0.2,
            test_fraction: 0.2,
            seed: 11,
        })
        .train(&dataset)
        .unwrap();

    assert!(outcome.stopped_early);
    assert_eq!(outcome.history.len(), outcome.best_epoch + 1);

    let best = outcome.history[outcome.best_epoch - 1].val_loss.unwrap();
    let last = outcome.history.last().unwrap().val_loss.unwrap();
    assert!(last >= best || last.is_nan());

    let (restored, _) = outcome.model.evaluate(&dataset, &outcome.split.test).unwrap();
    assert_eq!(restored, best);
}

#[test]
fn test_evaluate_rejects_out_of_range_indices() {
    let dataset = banded_dataset(3, 12);
    let model = train(&dataset, 1).model;
    assert!(model.evaluate(&dataset, &[0, 1]).is_ok());
    assert!(matches!(
        model.evaluate(&dataset, &[6]),
        Err(HearmonyError::Validation(_))
    ));
}

#[test]
fn test_training_is_reproducible_for_a_seed() {
    let dataset = banded_dataset(6, 3);
    let a = train(&dataset, 3);
    let b = train(&dataset, 3);

    assert_eq!(a.split, b.split);
    assert_eq!(a.best_epoch, b.best_epoch);
    let image = dataset.examples()[0].representation();
    assert_eq!(
        a.model.predict_proba(image).unwrap(),
        b.model.predict_proba(image).unwrap()
    );
}

#[test]
fn test_split_is_seeded_and_disjoint() {
    let dataset = banded_dataset(25, 4);
    let first = dataset.split(0.2, 42).unwrap();
    let again = dataset.split(0.2, 42).unwrap();
    let other = dataset.split(0.2, 43).unwrap();

    assert_eq!(first, again);
    assert_ne!(first.test, other.test);
    assert_eq!(first.test.len(), 10);

    let mut all: Vec<usize> = first.train.iter().chain(&first.test).copied().collect();
    all.sort_unstable();
    assert_eq!(all, (0..50).collect::<Vec<_>>());
}

#[test]
fn test_wrong_image_shape_is_rejected() {
    let dataset = banded_dataset(3, 5);
    let result = TrainerBuilder::new()
        .with_architecture(ArchitectureDescriptor {
            channels: 3,
            ..tiny_architecture(2)
        })
        .train(&dataset);
    assert!(matches!(result, Err(HearmonyError::Classifier(_))));
}

#[test]
fn test_saved_model_round_trips() {
    let dir = TempDir::new().unwrap();
    let store = ModelStore::new(dir.path()).unwrap();
    let dataset = banded_dataset(4, 6);
    let model = train(&dataset, 2).model;

    store.save("banded", &model).unwrap();
    assert!(store.is_model_saved("banded"));
    assert_eq!(store.list().unwrap(), vec!["banded".to_string()]);

    let loaded = store.load("banded").unwrap();
    assert_eq!(loaded.labels(), model.labels());
    for example in dataset.examples() {
        assert_eq!(
            loaded.predict(example.representation()).unwrap(),
            model.predict(example.representation()).unwrap()
        );
    }
}

#[test]
fn test_artifacts_must_travel_together() {
    let dir = TempDir::new().unwrap();
    let store = ModelStore::new(dir.path()).unwrap();
    let model = train(&banded_dataset(4, 7), 1).model;

    assert!(matches!(store.load("banded"), Err(ArtifactError::Missing(_))));

    store.save("banded", &model).unwrap();
    fs::remove_file(store.get_labels_path("banded")).unwrap();
    assert!(matches!(store.load("banded"), Err(ArtifactError::Mismatch(_))));

    store.save("banded", &model).unwrap();
    fs::remove_file(store.get_model_path("banded")).unwrap();
    assert!(matches!(store.load("banded"), Err(ArtifactError::Mismatch(_))));
}

#[test]
fn test_only_a_missing_model_falls_back_to_placeholder_scores() {
    let dir = TempDir::new().unwrap();
    let store = ModelStore::new(dir.path()).unwrap();
    let analyzer = |store: &ModelStore| {
        Analyzer::from_store(
            store,
            "banded",
            ExtractionConfig::spectrogram(),
            CalibrationConfig::default(),
        )
    };

    assert!(store.load_if_present("banded").unwrap().is_none());
    assert_eq!(analyzer(&store).unwrap().source_name(), "placeholder");

    let model = train(&banded_dataset(4, 10), 1).model;
    store.save("banded", &model).unwrap();
    assert!(store.load_if_present("banded").unwrap().is_some());
    assert_eq!(analyzer(&store).unwrap().source_name(), "trained-cnn");

    fs::remove_file(store.get_model_path("banded")).unwrap();
    assert!(matches!(
        store.load_if_present("banded"),
        Err(ArtifactError::Mismatch(_))
    ));
    assert!(matches!(
        analyzer(&store).err(),
        Some(HearmonyError::Artifact(ArtifactError::Mismatch(_)))
    ));

    store.save("banded", &model).unwrap();
    fs::write(store.get_labels_path("banded"), r#"["calm","happy"]"#).unwrap();
    assert!(matches!(
        analyzer(&store).err(),
        Some(HearmonyError::Artifact(ArtifactError::HashMismatch { .. }))
    ));
}

#[test]
fn test_replaced_label_list_is_detected() {
    let dir = TempDir::new().unwrap();
    let store = ModelStore::new(dir.path()).unwrap();
    let model = train(&banded_dataset(4, 8), 1).model;
    store.save("banded", &model).unwrap();

    fs::write(store.get_labels_path("banded"), r#"["calm","happy"]"#).unwrap();
    assert!(matches!(
        store.load("banded"),
        Err(ArtifactError::HashMismatch { .. })
    ));
}

#[test]
fn test_trained_model_is_shareable_across_threads() {
    let dataset = banded_dataset(4, 9);
    let model: Arc<TrainedModel> = Arc::new(train(&dataset, 1).model);
    let image = Arc::new(dataset.examples()[0].representation().clone());
    let expected = model.predict(&image).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let model = Arc::clone(&model);
            let image = Arc::clone(&image);
            thread::spawn(move || model.predict(&image).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}
