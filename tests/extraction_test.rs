use std::f32::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

use hearmony::{
    extract_melspectrogram, extract_mfcc, Analyzer, ArchitectureDescriptor, CalibrationConfig, DatasetAssembler,
    Emotion, ExtractionConfig, HearmonyError, LabeledPath, MfccExtractor, SpectrogramExtractor, TrainerBuilder,
    TrainingConfig, Waveform,
};
use hound::{SampleFormat, WavSpec, WavWriter};
use proptest::prelude::*;
use tempfile::TempDir;

fn tone(rate: u32, secs: f32, freq: f32) -> Vec<f32> {
    let n = (rate as f32 * secs) as usize;
    (0..n)
        .map(|i| (2.0 * PI * freq * i as f32 / rate as f32).sin() * 0.4)
        .collect()
}

fn write_wav(path: &Path, samples: &[f32], rate: u32, channels: u16) -> PathBuf {
    let spec = WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for &s in samples {
        for _ in 0..channels {
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
    }
    writer.finalize().unwrap();
    path.to_path_buf()
}

#[test]
fn test_mfcc_length_is_independent_of_rate_and_duration() {
    let dir = TempDir::new().unwrap();
    let extractor = MfccExtractor::new(ExtractionConfig::mfcc()).unwrap();

    for (i, (rate, secs)) in [(16_000, 1.0), (22_050, 2.5), (44_100, 5.0), (48_000, 0.2)]
        .into_iter()
        .enumerate()
    {
        let path = write_wav(
            &dir.path().join(format!("clip_{}.wav", i)),
            &tone(rate, secs, 440.0),
            rate,
            1,
        );
        let features = extractor.extract_file(&path).unwrap();
        assert_eq!(features.len(), 40, "rate {} duration {}", rate, secs);
        assert!(features.values().iter().all(|v| v.is_finite()));
    }
}

#[test]
fn test_spectrogram_is_fixed_size_color_image() {
    let dir = TempDir::new().unwrap();
    let extractor = SpectrogramExtractor::new(ExtractionConfig::spectrogram()).unwrap();

    for (i, (rate, secs)) in [(16_000, 0.5), (44_100, 6.0)].into_iter().enumerate() {
        let path = write_wav(
            &dir.path().join(format!("clip_{}.wav", i)),
            &tone(rate, secs, 880.0),
            rate,
            2,
        );
        let image = extractor.extract_file(&path).unwrap();
        assert_eq!(image.pixels().dim(), (3, 128, 128));
        assert!(image.pixels().iter().all(|v| (0.0..=1.0).contains(v)));
    }
}

#[test]
fn test_grayscale_spectrogram_has_one_channel() {
    let config = ExtractionConfig {
        color: false,
        image_size: 64,
        ..ExtractionConfig::spectrogram()
    };
    let extractor = SpectrogramExtractor::new(config).unwrap();
    let image = extractor
        .extract(&Waveform::new(tone(22_050, 1.0, 300.0), 22_050))
        .unwrap();
    assert_eq!(image.pixels().dim(), (1, 64, 64));
}

#[test]
fn test_convenience_extractors_resample_first() {
    let waveform = Waveform::new(tone(8_000, 1.0, 500.0), 8_000);
    assert_eq!(extract_mfcc(&waveform).unwrap().len(), 40);
    assert_eq!(extract_melspectrogram(&waveform).unwrap().size(), 128);
}

#[test]
fn test_corrupt_file_is_a_decode_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.wav");
    fs::write(&path, b"RIFF....WAVEjunk").unwrap();

    let result = MfccExtractor::new(ExtractionConfig::mfcc())
        .unwrap()
        .extract_file(&path);
    match result {
        Err(HearmonyError::Decode { path: failed, .. }) => assert_eq!(failed, path),
        other => panic!("expected Decode error, got {:?}", other),
    }
}

#[test]
fn test_assembler_skips_undecodable_files() {
    let dir = TempDir::new().unwrap();
    let good = write_wav(&dir.path().join("good.wav"), &tone(22_050, 1.0, 440.0), 22_050, 1);
    let broken = dir.path().join("broken.wav");
    fs::write(&broken, b"not audio").unwrap();

    let pairs = vec![
        LabeledPath::new(&good, Emotion::Happy),
        LabeledPath::new(&broken, Emotion::Sad),
    ];
    let dataset = DatasetAssembler::new().assemble_mfcc(&pairs).unwrap();
    assert_eq!(dataset.len(), 1);
    assert_eq!(dataset.examples()[0].emotion(), Emotion::Happy);
    assert_eq!(dataset.encoding().classes(), &[Emotion::Happy]);
}

#[test]
fn test_only_undecodable_files_is_an_empty_dataset() {
    let dir = TempDir::new().unwrap();
    let broken = dir.path().join("broken.wav");
    fs::write(&broken, b"not audio").unwrap();

    let result = DatasetAssembler::new().assemble_mfcc(&[LabeledPath::new(&broken, Emotion::Sad)]);
    assert!(matches!(result, Err(HearmonyError::EmptyDataset)));
}

#[test]
fn test_export_and_reload_image_folder() {
    let dir = TempDir::new().unwrap();
    let config = ExtractionConfig {
        image_size: 32,
        ..ExtractionConfig::spectrogram()
    };
    let pairs = vec![
        LabeledPath::new(
            write_wav(&dir.path().join("a.wav"), &tone(22_050, 0.5, 300.0), 22_050, 1),
            Emotion::Calm,
        ),
        LabeledPath::new(
            write_wav(&dir.path().join("b.wav"), &tone(22_050, 0.5, 900.0), 22_050, 1),
            Emotion::Angry,
        ),
    ];
    let out = dir.path().join("images");
    let assembler = DatasetAssembler::new().with_spectrogram_config(config);

    let stats = assembler.export_spectrograms(&pairs, &out).unwrap();
    assert_eq!(stats.written, 2);
    assert!(out.join("calm").join("a.png").exists());
    assert!(out.join("angry").join("b.png").exists());

    let dataset = assembler.from_image_folder(&out).unwrap();
    assert_eq!(dataset.len(), 2);
    assert_eq!(dataset.encoding().classes(), &[Emotion::Angry, Emotion::Calm]);
    assert_eq!(dataset.examples()[0].representation().size(), 32);
}

#[test]
fn test_grayscale_exports_train_and_serve_in_grayscale() {
    let dir = TempDir::new().unwrap();
    let gray = ExtractionConfig {
        image_size: 16,
        color: false,
        ..ExtractionConfig::spectrogram()
    };
    let pairs = vec![
        LabeledPath::new(
            write_wav(&dir.path().join("low.wav"), &tone(22_050, 0.5, 250.0), 22_050, 1),
            Emotion::Calm,
        ),
        LabeledPath::new(
            write_wav(&dir.path().join("high.wav"), &tone(22_050, 0.5, 2_500.0), 22_050, 1),
            Emotion::Angry,
        ),
    ];
    let out = dir.path().join("images");
    let assembler = DatasetAssembler::new().with_spectrogram_config(gray.clone());
    assert_eq!(assembler.export_spectrograms(&pairs, &out).unwrap().written, 2);

    let dataset = assembler.from_image_folder(&out).unwrap();
    let extractor = SpectrogramExtractor::new(gray.clone()).unwrap();
    for example in dataset.examples() {
        let loaded = example.representation();
        assert_eq!(loaded.channels(), 1);
        let source = pairs.iter().find(|p| p.emotion == example.emotion()).unwrap();
        let direct = extractor.extract_file(&source.path).unwrap();
        let diff = (&loaded.pixels().view() - &direct.pixels().view()).mapv(f32::abs);
        assert!(diff.iter().all(|&d| d < 1.0 / 255.0 + 1e-6));
    }

    // Grayscale files never load as colormapped images
    let colored = DatasetAssembler::new().with_spectrogram_config(ExtractionConfig {
        color: true,
        ..gray.clone()
    });
    assert!(matches!(colored.from_image_folder(&out), Err(HearmonyError::EmptyDataset)));

    let outcome = TrainerBuilder::new()
        .with_architecture(ArchitectureDescriptor {
            input_size: 16,
            channels: 1,
            conv_filters: vec![2],
            kernel_size: 3,
            pool_size: 2,
            conv_dropout: 0.0,
            dense_units: 4,
            dense_dropout: 0.0,
            num_classes: 2,
        })
        .with_training_config(TrainingConfig {
            epochs: 1,
            batch_size: 2,
            ..TrainingConfig::default()
        })
        .train(&dataset)
        .unwrap();

    let analyzer =
        Analyzer::from_model(outcome.model, ExtractionConfig::spectrogram(), CalibrationConfig::default()).unwrap();
    assert!(!analyzer.extraction_config().color);
    assert_eq!(analyzer.extraction_config().image_size, 16);
    assert!(analyzer.analyze_file(&pairs[0].path).is_ready());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_shapes_hold_for_any_length(len in 0usize..30_000, freq in 50.0f32..4_000.0) {
        let samples: Vec<f32> = (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / 22_050.0).sin() * 0.5)
            .collect();
        let waveform = Waveform::new(samples, 22_050);

        let image = SpectrogramExtractor::new(ExtractionConfig::spectrogram())
            .unwrap()
            .extract(&waveform)
            .unwrap();
        prop_assert_eq!(image.pixels().dim(), (3, 128, 128));

        let mfcc = MfccExtractor::new(ExtractionConfig { target_sample_rate: 22_050, ..ExtractionConfig::mfcc() })
            .unwrap()
            .extract(&waveform)
            .unwrap();
        prop_assert_eq!(mfcc.len(), 40);
    }
}
