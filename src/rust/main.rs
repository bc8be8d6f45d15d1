use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use hearmony::corpus::{read_metadata, write_metadata};
use hearmony::{
    Analysis, Analyzer, Calibrator, CorpusNormalizer, DatasetAssembler, Emotion, ModelStore, NamingConvention,
    PipelineConfig, PlaceholderScorer, ScoreVector, TrainerBuilder,
};

#[derive(Parser)]
#[command(author, version, about = "Speech emotion recognition toolkit", long_about = None)]
struct Args {
    /// Pipeline settings in TOML; defaults are used for anything omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding saved models (overrides the config and HEARMONY_HOME)
    #[arg(long, global = true)]
    artifacts: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Label every recording of one or more corpora and write metadata CSV
    Normalize {
        /// Corpus as `<convention>=<root>`, e.g. `ravdess=data/ravdess`
        #[arg(short = 's', long = "source", required = true)]
        sources: Vec<String>,
        #[arg(short, long, default_value = "metadata.csv")]
        output: PathBuf,
    },
    /// Render spectrogram images into `<output>/<emotion>/` folders
    ExportSpectrograms {
        #[arg(short, long, default_value = "metadata.csv")]
        metadata: PathBuf,
        #[arg(short, long, default_value = "spectrograms")]
        output: PathBuf,
    },
    /// Compute averaged MFCC vectors and save them with their labels as JSON
    ExtractMfcc {
        #[arg(short, long, default_value = "metadata.csv")]
        metadata: PathBuf,
        #[arg(short, long, default_value = "features.json")]
        output: PathBuf,
    },
    /// Train the spectrogram classifier and save it with its label list
    Train {
        /// Metadata CSV to extract spectrograms from
        #[arg(short, long, conflicts_with = "images")]
        metadata: Option<PathBuf>,
        /// Folder tree of exported spectrogram images
        #[arg(short, long)]
        images: Option<PathBuf>,
        #[arg(short, long, default_value = "default")]
        name: String,
    },
    /// Analyze one recording with a saved model, or the placeholder if none exists
    Predict {
        audio: PathBuf,
        #[arg(short, long, default_value = "default")]
        name: String,
        /// Ignore saved models and use the placeholder scorer
        #[arg(long)]
        placeholder: bool,
        #[arg(long)]
        json: bool,
    },
    /// Calibrate a score vector given as `label=probability` pairs
    Calibrate {
        #[arg(short, long, value_delimiter = ',', required = true)]
        scores: Vec<String>,
        #[arg(short, long)]
        winner: String,
    },
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = &args.artifacts {
        config.artifacts_dir = Some(dir.clone());
    }
    Ok(config)
}

fn parse_source(spec: &str) -> Result<(NamingConvention, PathBuf)> {
    let (name, root) = spec
        .split_once('=')
        .with_context(|| format!("Expected `<convention>=<root>`, got '{}'", spec))?;
    let convention = NamingConvention::by_name(name)?;
    Ok((convention, PathBuf::from(root)))
}

fn parse_scores(pairs: &[String]) -> Result<ScoreVector> {
    let mut entries = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let (label, value) = pair
            .split_once('=')
            .with_context(|| format!("Expected `label=probability`, got '{}'", pair))?;
        let emotion: Emotion = label.parse()?;
        let probability: f64 = value
            .trim()
            .parse()
            .with_context(|| format!("Invalid probability '{}'", value))?;
        entries.push((emotion, probability));
    }
    Ok(ScoreVector::new(entries)?)
}

fn print_analysis(analysis: &Analysis, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(analysis)?);
        return Ok(());
    }
    match analysis {
        Analysis::Ready { prediction, insight } => {
            println!(
                "{} {} ({:.1}%)",
                insight.emoji,
                prediction.emotion.title(),
                prediction.confidence * 100.0
            );
            for (rank, entry) in prediction.top.iter().enumerate() {
                println!("  {}. {}", rank + 1, entry);
            }
            println!("Suggestions:");
            for suggestion in insight.suggestions {
                println!("  - {}", suggestion);
            }
        }
        Analysis::Unavailable { reason } => println!("Analysis unavailable: {}", reason),
    }
    Ok(())
}

fn run_predict(config: &PipelineConfig, audio: &Path, name: &str, placeholder: bool, json: bool) -> Result<()> {
    let store = ModelStore::new(config.resolve_artifacts_dir())?;
    let analyzer = if placeholder {
        Analyzer::new(
            Box::new(PlaceholderScorer::new()),
            config.spectrogram.clone(),
            config.calibration.clone(),
        )?
    } else {
        Analyzer::from_store(&store, name, config.spectrogram.clone(), config.calibration.clone())
            .with_context(|| format!("Failed to load model '{}'", name))?
    };
    info!("Scoring with the {} source", analyzer.source_name());
    let analysis = analyzer.analyze_file(audio);
    print_analysis(&analysis, json)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args)?;
    let start_time = Instant::now();

    match &args.command {
        Command::Normalize { sources, output } => {
            let mut normalizer = CorpusNormalizer::new();
            for spec in sources {
                let (convention, root) = parse_source(spec)?;
                normalizer = normalizer.with_source(root, convention);
            }
            let pairs = normalizer.normalize()?;
            write_metadata(output, &pairs)?;
            println!("Labeled {} recordings into {:?}", pairs.len(), output);
        }
        Command::ExportSpectrograms { metadata, output } => {
            let pairs = read_metadata(metadata).with_context(|| format!("Failed to read {:?}", metadata))?;
            let stats = DatasetAssembler::new()
                .with_spectrogram_config(config.spectrogram.clone())
                .export_spectrograms(&pairs, output)?;
            println!("Wrote {} images ({} skipped)", stats.written, stats.skipped);
        }
        Command::ExtractMfcc { metadata, output } => {
            let pairs = read_metadata(metadata).with_context(|| format!("Failed to read {:?}", metadata))?;
            let dataset = DatasetAssembler::new()
                .with_mfcc_config(config.mfcc.clone())
                .assemble_mfcc(&pairs)?;
            dataset.save_json(output)?;
            println!("Saved {} feature vectors to {:?}", dataset.len(), output);
        }
        Command::Train { metadata, images, name } => {
            let assembler = DatasetAssembler::new().with_spectrogram_config(config.spectrogram.clone());
            let dataset = match (metadata, images) {
                (Some(csv), None) => {
                    let pairs = read_metadata(csv).with_context(|| format!("Failed to read {:?}", csv))?;
                    assembler.assemble_spectrograms(&pairs)?
                }
                (None, Some(dir)) => assembler.from_image_folder(dir)?,
                _ => bail!("Pass either --metadata or --images"),
            };

            let outcome = TrainerBuilder::new()
                .with_training_config(config.training.clone())
                .train(&dataset)?;
            match &outcome.report {
                Some(report) => {
                    println!("Test Accuracy: {:.4}", report.accuracy);
                    println!("{}", report);
                }
                None => println!("No held-out examples; model was not evaluated"),
            }

            let store = ModelStore::new(config.resolve_artifacts_dir())?;
            store.save(name, &outcome.model)?;
            println!(
                "Saved model '{}' (best epoch {}) to {:?}",
                name,
                outcome.best_epoch,
                store.models_dir()
            );
        }
        Command::Predict {
            audio,
            name,
            placeholder,
            json,
        } => run_predict(&config, audio, name, *placeholder, *json)?,
        Command::Calibrate { scores, winner } => {
            let raw = parse_scores(scores)?;
            let winner: Emotion = winner.parse()?;
            let result = Calibrator::new(config.calibration.clone())?.calibrate(&raw, winner)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    info!("Done in {:.2?}", start_time.elapsed());
    Ok(())
}
