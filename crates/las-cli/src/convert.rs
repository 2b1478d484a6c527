//! Пакетная конвертация сырого PCM (s16le, 16 кГц, mono) в WAV через ffmpeg.
//!
//! Ошибки ffmpeg по отдельным файлам логируются и пропускаются.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

/// Шаблон по умолчанию для корпуса KsponSpeech.
pub const DEFAULT_PATTERN: &str = "/data_hdd/stt/KsponSpeech_0?/*/*.pcm";

/// Итог конвертации.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConvertSummary {
    pub converted: usize,
    pub failed: usize,
}

/// Путь результата: каждое вхождение `pcm` в пути заменяется на `wav`.
pub fn wav_path_for(pcm: &Path) -> PathBuf {
    PathBuf::from(pcm.to_string_lossy().replace("pcm", "wav"))
}

/// Аргументы ffmpeg: `-f s16le -ar 16k -ac 1 -i <in> <out>`.
pub fn ffmpeg_args(pcm: &Path, wav: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-f", "s16le", "-ar", "16k", "-ac", "1", "-i"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(pcm.as_os_str().to_owned());
    args.push(wav.as_os_str().to_owned());
    args
}

/// Все файлы по шаблону, в отсортированном порядке.
pub fn collect_inputs(pattern: &str) -> Result<Vec<PathBuf>> {
    let entries =
        glob::glob(pattern).with_context(|| format!("invalid glob pattern: {pattern}"))?;

    let mut inputs = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) => inputs.push(path),
            Err(e) => warn!("Пропуск недоступного пути: {}", e),
        }
    }
    inputs.sort();
    Ok(inputs)
}

fn convert_one(ffmpeg: &str, pcm: &Path) -> Result<PathBuf> {
    let wav = wav_path_for(pcm);
    let status = Command::new(ffmpeg)
        .args(ffmpeg_args(pcm, &wav))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .with_context(|| format!("failed to run {ffmpeg}"))?;

    if !status.success() {
        anyhow::bail!("{ffmpeg} exited with {status}");
    }
    Ok(wav)
}

/// Сконвертировать все файлы, подходящие под `pattern`.
pub fn convert_all(pattern: &str, ffmpeg: &str) -> Result<ConvertSummary> {
    let inputs = collect_inputs(pattern)?;
    info!("Найдено {} файлов по шаблону {}", inputs.len(), pattern);

    let progress = ProgressBar::new(inputs.len() as u64);
    progress.set_style(
        ProgressStyle::with_template(
            "conversion [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );

    let mut summary = ConvertSummary::default();
    for pcm in &inputs {
        match convert_one(ffmpeg, pcm) {
            Ok(_) => summary.converted += 1,
            Err(e) => {
                warn!("Не удалось сконвертировать {}: {:#}", pcm.display(), e);
                summary.failed += 1;
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_path_replaces_every_occurrence() {
        assert_eq!(
            wav_path_for(Path::new("/data/KsponSpeech_01/a/KsponSpeech_000001.pcm")),
            PathBuf::from("/data/KsponSpeech_01/a/KsponSpeech_000001.wav")
        );
        assert_eq!(
            wav_path_for(Path::new("/pcm/clip.pcm")),
            PathBuf::from("/wav/clip.wav")
        );
    }

    #[test]
    fn test_ffmpeg_args() {
        let args = ffmpeg_args(Path::new("in.pcm"), Path::new("out.wav"));
        let args: Vec<&str> = args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(
            args,
            ["-f", "s16le", "-ar", "16k", "-ac", "1", "-i", "in.pcm", "out.wav"]
        );
    }

    #[test]
    fn test_failures_are_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.pcm", "b.pcm", "c.txt"] {
            std::fs::write(dir.path().join(name), [0u8; 4]).unwrap();
        }
        let pattern = format!("{}/*.pcm", dir.path().display());

        let summary = convert_all(&pattern, "/nonexistent/ffmpeg-binary").unwrap();
        assert_eq!(
            summary,
            ConvertSummary {
                converted: 0,
                failed: 2
            }
        );
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(collect_inputs("[").is_err());
    }
}
