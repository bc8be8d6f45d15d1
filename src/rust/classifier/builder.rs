use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::error::ClassifierError;
use super::layers::Params;
use super::metrics::ClassificationReport;
use super::model::{argmax, TrainedModel};
use super::network::{ArchitectureDescriptor, EmotionCnn};
use super::optimizer::Adam;
use crate::config::TrainingConfig;
use crate::dataset::{Dataset, Split};
use crate::error::{HearmonyError, Result};
use crate::features::SpectrogramImage;

/// Loss and accuracy for one epoch. Held-out values are absent when the
/// split leaves no held-out examples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f32,
    pub train_accuracy: f32,
    pub val_loss: Option<f32>,
    pub val_accuracy: Option<f32>,
}

/// Result of a training run. `model` carries the weights of `best_epoch`.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: TrainedModel,
    pub history: Vec<EpochRecord>,
    pub best_epoch: usize,
    pub stopped_early: bool,
    pub split: Split,
    /// Evaluation on the held-out subset, absent if it is empty
    pub report: Option<ClassificationReport>,
}

/// A builder for configuring and running a training job with a fluent interface.
///
/// ```no_run
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use hearmony::{CorpusNormalizer, DatasetAssembler, NamingConvention, TrainerBuilder, TrainingConfig};
///
/// let pairs = CorpusNormalizer::new()
///     .with_source("data/ravdess", NamingConvention::ravdess())
///     .normalize()?;
/// let dataset = DatasetAssembler::new().assemble_spectrograms(&pairs)?;
///
/// let outcome = TrainerBuilder::new()
///     .with_training_config(TrainingConfig { epochs: 30, ..Default::default() })
///     .train(&dataset)?;
/// if let Some(report) = &outcome.report {
///     println!("{}", report);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct TrainerBuilder {
    architecture: Option<ArchitectureDescriptor>,
    config: TrainingConfig,
}

impl TrainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the layer layout. Without one, the standard layout is sized
    /// to the dataset's images and classes.
    pub fn with_architecture(mut self, architecture: ArchitectureDescriptor) -> Self {
        self.architecture = Some(architecture);
        self
    }

    pub fn with_training_config(mut self, config: TrainingConfig) -> Self {
        self.config = config;
        self
    }

    pub fn train(self, dataset: &Dataset<SpectrogramImage>) -> Result<TrainingOutcome> {
        self.config.validate()?;
        if dataset.is_empty() {
            return Err(HearmonyError::EmptyDataset);
        }

        let encoding = dataset.encoding().clone();
        let architecture = self.resolve_architecture(dataset)?;
        let split = dataset.split(self.config.test_fraction, self.config.seed)?;
        let targets = dataset.targets();
        let images: Vec<&SpectrogramImage> = dataset
            .examples()
            .iter()
            .map(|e| e.representation())
            .collect();

        info!(
            "Training on {} examples, holding out {} ({} classes, {} epochs max)",
            split.train.len(),
            split.test.len(),
            encoding.len(),
            self.config.epochs
        );

        let mut network = EmotionCnn::new(architecture, self.config.seed)?;
        let mut optimizer = Adam::new(self.config.learning_rate);
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(1));

        let mut history = Vec::with_capacity(self.config.epochs);
        let mut best: Option<(f32, usize, EmotionCnn)> = None;
        let mut wait = 0;
        let mut stopped_early = false;
        let mut order = split.train.clone();

        for epoch in 1..=self.config.epochs {
            order.shuffle(&mut rng);
            let (train_loss, train_accuracy) = run_epoch(
                &mut network,
                &mut optimizer,
                &mut rng,
                &images,
                &targets,
                &order,
                self.config.batch_size,
            )?;

            let held_out = if split.test.is_empty() {
                None
            } else {
                Some(evaluate_loss(&network, &images, &targets, &split.test)?)
            };
            let record = EpochRecord {
                epoch,
                train_loss,
                train_accuracy,
                val_loss: held_out.map(|(loss, _)| loss),
                val_accuracy: held_out.map(|(_, acc)| acc),
            };
            match (record.val_loss, record.val_accuracy) {
                (Some(val_loss), Some(val_accuracy)) => info!(
                    "Epoch {}/{}: loss {:.4}, accuracy {:.4}, val_loss {:.4}, val_accuracy {:.4}",
                    epoch, self.config.epochs, train_loss, train_accuracy, val_loss, val_accuracy
                ),
                _ => info!(
                    "Epoch {}/{}: loss {:.4}, accuracy {:.4}",
                    epoch, self.config.epochs, train_loss, train_accuracy
                ),
            }

            // Held-out loss is monitored; training loss stands in when nothing is held out
            let monitored = record.val_loss.unwrap_or(train_loss);
            history.push(record);

            let improved = best.as_ref().map_or(true, |(loss, _, _)| monitored < *loss);
            if improved {
                best = Some((monitored, epoch, network.clone()));
                wait = 0;
            } else {
                wait += 1;
                if wait >= self.config.patience {
                    info!(
                        "Early stopping at epoch {}: no improvement for {} epochs",
                        epoch, wait
                    );
                    stopped_early = true;
                    break;
                }
            }
        }

        let (best_loss, best_epoch, best_network) = best.ok_or_else(|| {
            ClassifierError::TrainingError("Training finished without completing an epoch".into())
        })?;
        info!("Restoring weights from epoch {} (monitored loss {:.4})", best_epoch, best_loss);

        let model = TrainedModel::new(best_network, encoding)?;
        let report = if split.test.is_empty() {
            warn!("No held-out examples; skipping evaluation");
            None
        } else {
            let truth: Vec<usize> = split.test.iter().map(|&i| targets[i]).collect();
            let predicted = split
                .test
                .iter()
                .map(|&i| model.predict_class(images[i]))
                .collect::<Result<Vec<_>>>()?;
            let report = ClassificationReport::compute(model.labels(), &truth, &predicted);
            info!("Held-out accuracy: {:.4}", report.accuracy);
            Some(report)
        };

        Ok(TrainingOutcome {
            model,
            history,
            best_epoch,
            stopped_early,
            split,
            report,
        })
    }

    fn resolve_architecture(&self, dataset: &Dataset<SpectrogramImage>) -> Result<ArchitectureDescriptor> {
        let classes = dataset.encoding().len();
        let first = dataset
            .examples()
            .first()
            .map(|e| e.representation())
            .ok_or(HearmonyError::EmptyDataset)?;

        let architecture = match &self.architecture {
            Some(arch) => arch.clone(),
            None => ArchitectureDescriptor {
                input_size: first.size(),
                channels: first.channels(),
                ..ArchitectureDescriptor::standard(classes)
            },
        };
        if architecture.num_classes != classes {
            return Err(ClassifierError::ValidationError(format!(
                "Architecture has {} outputs but the dataset has {} classes",
                architecture.num_classes, classes
            ))
            .into());
        }
        let expected = (architecture.channels, architecture.input_size, architecture.input_size);
        if let Some(bad) = dataset
            .examples()
            .iter()
            .find(|e| e.representation().pixels().dim() != expected)
        {
            return Err(ClassifierError::ShapeError(format!(
                "Every image must have shape {:?}; found {:?}",
                expected,
                bad.representation().pixels().dim()
            ))
            .into());
        }
        Ok(architecture)
    }
}

/// One pass over `order` in mini-batches. Returns mean loss and accuracy
/// as observed during the pass (with dropout active).
fn run_epoch(
    network: &mut EmotionCnn,
    optimizer: &mut Adam,
    rng: &mut StdRng,
    images: &[&SpectrogramImage],
    targets: &[usize],
    order: &[usize],
    batch_size: usize,
) -> Result<(f32, f32), ClassifierError> {
    let mut total_loss = 0.0f32;
    let mut correct = 0usize;

    for batch in order.chunks(batch_size) {
        let mut accumulated: Option<Vec<Params>> = None;
        for &i in batch {
            let trace = network.forward(images[i].pixels(), Some(&mut *rng))?;
            total_loss += EmotionCnn::loss(&trace, targets[i]);
            if argmax(&trace.probabilities) == targets[i] {
                correct += 1;
            }
            let grads = network.backward(trace, targets[i])?;
            match accumulated.as_mut() {
                Some(sum) => sum.iter_mut().zip(&grads).for_each(|(s, g)| s.add_assign(g)),
                None => accumulated = Some(grads),
            }
        }
        if let Some(mut grads) = accumulated {
            let scale = 1.0 / batch.len() as f32;
            grads.iter_mut().for_each(|g| g.scale(scale));
            optimizer.step(network.params_mut(), &grads)?;
        }
    }

    let n = order.len().max(1) as f32;
    Ok((total_loss / n, correct as f32 / n))
}

/// Mean cross-entropy and accuracy over `indices`, summed in index order.
pub(crate) fn evaluate_loss(
    network: &EmotionCnn,
    images: &[&SpectrogramImage],
    targets: &[usize],
    indices: &[usize],
) -> Result<(f32, f32), ClassifierError> {
    let mut total_loss = 0.0f32;
    let mut correct = 0usize;
    for &i in indices {
        let trace = network.forward(images[i].pixels(), None)?;
        total_loss += EmotionCnn::loss(&trace, targets[i]);
        if argmax(&trace.probabilities) == targets[i] {
            correct += 1;
        }
    }
    let n = indices.len().max(1) as f32;
    Ok((total_loss / n, correct as f32 / n))
}
