//!
//! CLI для LAS: MFCC-признаки, нормализация транскриптов, конвертация корпуса
//! и прогон модели Listen, Attend and Spell.

mod convert;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use audio::{load_audio, MfccExtractor};
use candle_core::{Device, Tensor};
use las_core::{LasConfig, MfccConfig};
use las_model::{one_hot_sequence, Las};
use las_text::{read_transcript, Vocabulary};

#[derive(Parser)]
#[command(name = "las")]
#[command(author, version, about = "LAS: Listen, Attend and Spell on Candle", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Извлечь 39-мерные MFCC (13 + Δ + ΔΔ) из .wav или .pcm
    Features {
        /// Path to the audio file (.wav or raw s16le .pcm)
        #[arg(long)]
        audio: PathBuf,

        /// Сохранить матрицу признаков в JSON (массив кадров)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Нормализовать транскрипт (CP949) в последовательность чамо
    Normalize {
        /// Path to the transcript file
        #[arg(long)]
        transcript: PathBuf,

        /// Печатать также индексы меток словаря
        #[arg(long, default_value_t = false)]
        ids: bool,
    },

    /// Показать словарь меток
    Labels,

    /// Сконвертировать корпус .pcm → .wav через ffmpeg
    Convert {
        /// Glob-шаблон входных файлов
        #[arg(long, default_value = convert::DEFAULT_PATTERN)]
        pattern: String,

        /// Путь к ffmpeg
        #[arg(long, default_value = "ffmpeg")]
        ffmpeg: String,
    },

    /// Прогон модели со случайными весами на случайном входе (проверка форм)
    Demo {
        /// JSON-конфигурация модели (по умолчанию: demo-пресет)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Device to use (cpu, metal, cuda)
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Размер батча
        #[arg(long, default_value_t = 1)]
        batch: usize,

        /// Seed для случайной разметки и декодирования
        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Вероятность teacher forcing (со случайной разметкой)
        #[arg(long, default_value_t = 0.0)]
        teacher_force_rate: f64,
    },

    /// Распознать запись обученной моделью (safetensors с ключами PyTorch)
    Transcribe {
        /// Path to the audio file (.wav or .pcm)
        #[arg(long)]
        audio: PathBuf,

        /// Safetensors-файлы с весами (можно несколько)
        #[arg(long, required = true)]
        weights: Vec<PathBuf>,

        /// JSON-конфигурация модели (по умолчанию: пресет KsponSpeech)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Device to use (cpu, metal, cuda)
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Seed (используется только при decode_mode = 2)
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Features { audio, out } => run_features(audio, out),
        Commands::Normalize { transcript, ids } => {
            let text = read_transcript(&transcript)?;
            println!("{}", text);
            if ids {
                let vocab = Vocabulary::korean_jamo();
                let ids = vocab.encode(&text)?;
                println!("{:?}", ids);
            }
            Ok(())
        }
        Commands::Labels => {
            let vocab = Vocabulary::korean_jamo();
            println!("📚 {} labels", vocab.len());
            for (i, label) in vocab.labels().iter().enumerate() {
                println!("{:>3}  {:?}", i, label);
            }
            Ok(())
        }
        Commands::Convert { pattern, ffmpeg } => {
            let start = Instant::now();
            let summary = convert::convert_all(&pattern, &ffmpeg)?;
            println!(
                "✅ Converted: {}, failed: {} ({:.1}s)",
                summary.converted,
                summary.failed,
                start.elapsed().as_secs_f32()
            );
            Ok(())
        }
        Commands::Demo {
            config,
            device,
            batch,
            seed,
            teacher_force_rate,
        } => run_demo(config, &device, batch, seed, teacher_force_rate),
        Commands::Transcribe {
            audio,
            weights,
            config,
            device,
            seed,
        } => run_transcribe(audio, weights, config, &device, seed),
    }
}

fn load_config(path: Option<PathBuf>, default: LasConfig) -> Result<LasConfig> {
    match path {
        Some(path) => LasConfig::from_json_file(&path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(default),
    }
}

fn run_features(audio: PathBuf, out: Option<PathBuf>) -> Result<()> {
    let config = MfccConfig::default();
    let extractor = MfccExtractor::new(config.clone())?;

    println!("📂 Loading audio file...");
    let buffer = load_audio(&audio, config.sample_rate as usize)?;
    println!(
        "   Duration: {:.2}s, {} samples",
        buffer.duration(),
        buffer.num_samples()
    );

    let features = extractor.extract_buffer(&buffer)?;
    println!(
        "🎛️  Features: [{}, {}]",
        features.num_frames(),
        features.dim()
    );

    if let Some(out) = out {
        let frames: Vec<&[f32]> = features.frames().collect();
        let file = std::fs::File::create(&out)
            .with_context(|| format!("failed to create {}", out.display()))?;
        serde_json::to_writer(std::io::BufWriter::new(file), &frames)?;
        println!("💾 Saved to {}", out.display());
    }
    Ok(())
}

/// Повторяет smoke-проверку форм: вход [B, max_label_len, F] → Listener → Speller.
fn run_demo(
    config: Option<PathBuf>,
    device: &str,
    batch: usize,
    seed: u64,
    teacher_force_rate: f64,
) -> Result<()> {
    let config = load_config(config, LasConfig::demo())?;
    let device = create_device(device)?;
    let maxlen = config.max_label_len;

    println!("🧪 LAS - Demo forward pass");
    println!("==========================");
    println!(
        "listener: {} x {} ({}), speller: {}, classes: {}",
        config.listener_layers,
        config.listener_hidden_dim,
        config.rnn_unit,
        config.speller_hidden_dim,
        config.output_class_dim
    );

    let (model, _varmap) = Las::with_random_weights(config.clone(), &device)?;

    // Длина входа кратна сжатию времени Listener.
    let reduction = config.time_reduction();
    let frames = maxlen.div_ceil(reduction) * reduction;
    let input = Tensor::rand(0f32, 1f32, (batch, frames, config.input_feature_dim), &device)?;
    println!("input: {:?}", input.dims());

    let mut rng = StdRng::seed_from_u64(seed);
    let labels: Vec<Vec<usize>> = (0..batch)
        .map(|_| {
            (0..maxlen)
                .map(|_| rng.gen_range(0..config.output_class_dim))
                .collect()
        })
        .collect();
    let ground_truth = one_hot_sequence(&labels, config.output_class_dim, &device)?;
    println!("label: {:?}", ground_truth.dims());
    println!("---------------------------");

    let start = Instant::now();
    let listener_feature = model.listener().forward(&input)?;
    println!("intermediate shape: {:?}", listener_feature.dims());

    let output = model.forward(&input, Some(&ground_truth), teacher_force_rate, &mut rng)?;
    println!("teacher forced: {}", output.teacher_forced);
    println!("raw_pred_seq: {}", output.log_probs.len());
    if let Some(first) = output.log_probs.first() {
        println!("raw_pred_seq[0]: {:?}", first.dims());
    }
    println!("attention_record: {}", output.attention.len());
    if let (Some(first), Some(last)) = (output.attention.first(), output.attention.last()) {
        println!("attention_record[0][0]: {:?}", first[0].dims());
        println!(
            "attention_record[{}][0]: {:?}",
            output.attention.len() - 1,
            last[0].dims()
        );
    }
    println!("✅ Done in {:.2}s", start.elapsed().as_secs_f32());
    Ok(())
}

fn run_transcribe(
    audio: PathBuf,
    weights: Vec<PathBuf>,
    config: Option<PathBuf>,
    device: &str,
    seed: u64,
) -> Result<()> {
    let config = load_config(config, LasConfig::kspon())?;
    let device = create_device(device)?;

    println!("🎤 LAS - Speech Recognition");
    println!("===========================");
    println!("Audio file: {}", audio.display());
    println!("Device: {:?}", device);
    println!();

    let start = Instant::now();

    let mfcc = MfccExtractor::new(MfccConfig::default())?;
    if mfcc.feature_dim() != config.input_feature_dim {
        anyhow::bail!(
            "model expects {} input features, MFCC extractor produces {}",
            config.input_feature_dim,
            mfcc.feature_dim()
        );
    }

    println!("📂 Loading audio file...");
    let buffer = load_audio(&audio, mfcc.config().sample_rate as usize)?;
    let features = mfcc.extract_buffer(&buffer)?;
    println!("   Features: [{}, {}]", features.num_frames(), features.dim());

    println!("🧠 Loading model...");
    let model = Las::from_safetensors(config, &weights, &device)?;

    let vocab = Vocabulary::korean_jamo();
    let mut rng = StdRng::seed_from_u64(seed);
    let text = model.transcribe(&features, &vocab, &mut rng)?;

    println!();
    println!("📝 {}", text);
    println!("⏱️  {:.2}s", start.elapsed().as_secs_f32());
    Ok(())
}

fn create_device(device: &str) -> Result<Device> {
    match device {
        "metal" => {
            // candle может panic при инициализации Metal, если устройство недоступно.
            let prev_hook = std::panic::take_hook();
            std::panic::set_hook(Box::new(|_| {}));
            let res = std::panic::catch_unwind(|| Device::new_metal(0));
            std::panic::set_hook(prev_hook);

            match res {
                Ok(Ok(dev)) => Ok(dev),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(anyhow::anyhow!(
                    "Инициализация Metal недоступна в этом окружении. Попробуйте --device cpu."
                )),
            }
        }
        "cuda" => Ok(Device::new_cuda(0)?),
        "cpu" => Ok(Device::Cpu),
        other => anyhow::bail!("unknown device '{other}' (expected cpu, cuda or metal)"),
    }
}
