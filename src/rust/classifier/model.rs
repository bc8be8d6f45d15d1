use std::sync::Arc;

use ndarray::Array1;

use super::builder::evaluate_loss;
use super::error::ClassifierError;
use super::network::{ArchitectureDescriptor, EmotionCnn};
use crate::calibration::ScoreVector;
use crate::dataset::{Dataset, LabelEncoding};
use crate::emotion::Emotion;
use crate::error::{HearmonyError, Result};
use crate::features::SpectrogramImage;

/// A trained spectrogram classifier together with the label encoding it
/// was fit with.
///
/// # Thread Safety
///
/// The network is held behind an `Arc` and never mutated after training,
/// so one model can serve concurrent predictions:
///
/// ```no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use std::sync::Arc;
/// use std::thread;
/// use hearmony::{ModelStore, SpectrogramImage};
///
/// let model = Arc::new(ModelStore::new("models")?.load("default")?);
/// let image = SpectrogramImage::load_png("clip.png".as_ref(), 128, true)?;
///
/// let shared = Arc::clone(&model);
/// let handle = thread::spawn(move || shared.predict(&image));
/// let scores = handle.join().expect("worker panicked")?;
/// println!("{:?}", scores.argmax());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TrainedModel {
    network: Arc<EmotionCnn>,
    encoding: LabelEncoding,
}

// Compile-time verification of thread-safety
const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn verify_thread_safety() {
        assert_send_sync::<TrainedModel>();
    }
};

impl TrainedModel {
    /// Pairs a network with its label encoding; the class counts must agree.
    pub fn new(network: EmotionCnn, encoding: LabelEncoding) -> Result<Self> {
        if network.num_classes() != encoding.len() {
            return Err(ClassifierError::ValidationError(format!(
                "Network has {} outputs but the label encoding has {} classes",
                network.num_classes(),
                encoding.len()
            ))
            .into());
        }
        Ok(Self {
            network: Arc::new(network),
            encoding,
        })
    }

    pub fn encoding(&self) -> &LabelEncoding {
        &self.encoding
    }

    pub fn labels(&self) -> &[Emotion] {
        self.encoding.classes()
    }

    pub fn architecture(&self) -> &ArchitectureDescriptor {
        self.network.architecture()
    }

    pub fn network(&self) -> &EmotionCnn {
        &self.network
    }

    /// Raw class probabilities in encoding order.
    pub fn predict_proba(&self, image: &SpectrogramImage) -> Result<Array1<f32>> {
        Ok(self.network.predict_proba(image.pixels())?)
    }

    pub fn predict(&self, image: &SpectrogramImage) -> Result<ScoreVector> {
        let probabilities = self.predict_proba(image)?;
        ScoreVector::from_probabilities(self.labels(), &probabilities.to_vec())
    }

    pub fn predict_batch(&self, images: &[SpectrogramImage]) -> Result<Vec<ScoreVector>> {
        images.iter().map(|image| self.predict(image)).collect()
    }

    /// Mean held-out loss and accuracy over the examples at `indices`,
    /// computed the way training reports `val_loss` for each epoch.
    pub fn evaluate(&self, dataset: &Dataset<SpectrogramImage>, indices: &[usize]) -> Result<(f32, f32)> {
        if let Some(&i) = indices.iter().find(|&&i| i >= dataset.len()) {
            return Err(HearmonyError::Validation(format!(
                "Index {} out of range for {} examples",
                i,
                dataset.len()
            )));
        }
        let images: Vec<&SpectrogramImage> = dataset.examples().iter().map(|e| e.representation()).collect();
        let targets = dataset
            .examples()
            .iter()
            .map(|e| self.encoding.encode(e.emotion()))
            .collect::<Result<Vec<usize>>>()?;
        Ok(evaluate_loss(&self.network, &images, &targets, indices)?)
    }

    /// Index of the most probable class.
    pub fn predict_class(&self, image: &SpectrogramImage) -> Result<usize> {
        let probabilities = self.predict_proba(image)?;
        Ok(argmax(&probabilities))
    }
}

pub(crate) fn argmax(values: &Array1<f32>) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}
