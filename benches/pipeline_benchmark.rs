use std::f32::consts::PI;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hearmony::classifier::EmotionCnn;
use hearmony::{
    calibrate, ArchitectureDescriptor, Emotion, ExtractionConfig, LabelEncoding, MfccExtractor, ScoreVector,
    SpectrogramExtractor, TrainedModel, Waveform,
};

fn synthetic_clip(rate: u32, secs: f32) -> Waveform {
    let n = (rate as f32 * secs) as usize;
    let samples = (0..n)
        .map(|i| {
            let t = i as f32 / rate as f32;
            ((2.0 * PI * 220.0 * t).sin() + 0.3 * (2.0 * PI * 1_760.0 * t).sin()) * 0.4
        })
        .collect();
    Waveform::new(samples, rate)
}

fn bench_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("Extraction");
    group.sample_size(20);
    group.warm_up_time(std::time::Duration::from_secs(1));

    let mfcc = MfccExtractor::new(ExtractionConfig::mfcc()).unwrap();
    let mfcc_clip = synthetic_clip(44_100, 3.0);
    group.bench_function("mfcc_3s", |b| b.iter(|| mfcc.extract(black_box(&mfcc_clip)).unwrap()));

    let spectrogram = SpectrogramExtractor::new(ExtractionConfig::spectrogram()).unwrap();
    let spectrogram_clip = synthetic_clip(22_050, 4.0);
    group.bench_function("spectrogram_4s", |b| {
        b.iter(|| spectrogram.extract(black_box(&spectrogram_clip)).unwrap())
    });

    let native = synthetic_clip(48_000, 4.0);
    group.bench_function("resample_48k_to_22k", |b| {
        b.iter(|| black_box(&native).resample(22_050).unwrap())
    });

    group.finish();
}

fn bench_inference(c: &mut Criterion) {
    let mut group = c.benchmark_group("Inference");
    group.sample_size(20);

    let classes = Emotion::INTERACTIVE.to_vec();
    let encoding = LabelEncoding::fit(classes.iter().copied()).unwrap();
    let network = EmotionCnn::new(ArchitectureDescriptor::standard(classes.len()), 42).unwrap();
    let model = TrainedModel::new(network, encoding).unwrap();
    let image = SpectrogramExtractor::new(ExtractionConfig::spectrogram())
        .unwrap()
        .extract(&synthetic_clip(22_050, 4.0))
        .unwrap();

    group.bench_function("cnn_forward_128px", |b| b.iter(|| model.predict(black_box(&image)).unwrap()));
    group.finish();
}

fn bench_calibration(c: &mut Criterion) {
    let raw = ScoreVector::new(vec![
        (Emotion::Angry, 0.05),
        (Emotion::Calm, 0.10),
        (Emotion::Disgust, 0.05),
        (Emotion::Fearful, 0.15),
        (Emotion::Happy, 0.40),
        (Emotion::Sad, 0.20),
        (Emotion::Surprised, 0.05),
    ])
    .unwrap();

    c.bench_function("calibrate_swap_and_floor", |b| {
        b.iter(|| calibrate(black_box(&raw), black_box(Emotion::Disgust)).unwrap())
    });
}

criterion_group!(benches, bench_extraction, bench_inference, bench_calibration);
criterion_main!(benches);
