use anyhow::{Context, Result};
use log::{debug, info};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use crate::vocoder::Waveform;

/// Decodes the first audio track of `path`, averaging all channels to mono.
pub fn load_waveform<P: AsRef<Path>>(path: P) -> Result<Waveform> {
    let path = path.as_ref();
    info!("Loading audio from {}", path.display());

    let file = File::open(path)
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
    let source = ReadOnlySource::new(BufReader::new(file));
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .context("Failed to probe audio format")?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No supported audio tracks found")?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .context("Audio track does not declare a sample rate")?;
    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Failed to create decoder")?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => {
                debug!("Decoder reset required");
                continue;
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(e) => return Err(anyhow::anyhow!("Failed to read packet: {}", e)),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let capacity = decoded.capacity() as u64;
                if capacity == 0 {
                    continue;
                }
                let channels = spec.channels.count().max(1);
                let mut buffer = SampleBuffer::<f64>::new(capacity, spec);
                buffer.copy_interleaved_ref(decoded);
                samples.extend(
                    buffer
                        .samples()
                        .chunks(channels)
                        .map(|frame| frame.iter().sum::<f64>() / channels as f64),
                );
            }
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(anyhow::anyhow!("Decode error: {}", e)),
        }
    }

    info!("Loaded {} samples at {}Hz", samples.len(), sample_rate);
    Ok(Waveform::new(samples, sample_rate)?)
}

/// Writes `samples` as a mono 16-bit PCM WAV file, clipping to `[-1, 1]`.
pub fn save_wav<P: AsRef<Path>>(path: P, samples: &[f64], sample_rate: u32) -> Result<()> {
    let path = path.as_ref();
    info!("Saving audio to {}", path.display());
    let file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_wav(&mut writer, samples, sample_rate)?;
    writer.flush()?;
    Ok(())
}

pub fn write_wav<W: Write>(writer: &mut W, samples: &[f64], sample_rate: u32) -> Result<()> {
    let num_channels = 1u16;
    let bits_per_sample = 16u16;
    let byte_rate = sample_rate * num_channels as u32 * (bits_per_sample / 8) as u32;
    let block_align = num_channels * (bits_per_sample / 8);
    let data_size = (samples.len() * 2) as u32;

    debug!(
        "Writing WAV: channels={}, bits={}, rate={}, size={}",
        num_channels, bits_per_sample, sample_rate, data_size
    );

    writer.write_all(b"RIFF")?;
    writer.write_all(&(36 + data_size).to_le_bytes())?;
    writer.write_all(b"WAVE")?;

    writer.write_all(b"fmt ")?;
    writer.write_all(&16u32.to_le_bytes())?;
    writer.write_all(&1u16.to_le_bytes())?;
    writer.write_all(&num_channels.to_le_bytes())?;
    writer.write_all(&sample_rate.to_le_bytes())?;
    writer.write_all(&byte_rate.to_le_bytes())?;
    writer.write_all(&block_align.to_le_bytes())?;
    writer.write_all(&bits_per_sample.to_le_bytes())?;

    writer.write_all(b"data")?;
    writer.write_all(&data_size.to_le_bytes())?;
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        writer.write_all(&value.to_le_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut bytes = Vec::new();
        write_wav(&mut bytes, &[0.0, 1.0, -2.0], 16000).unwrap();
        assert_eq!(bytes.len(), 44 + 6);
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 42);
        assert_eq!(u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]), 16000);
        assert_eq!(u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]), 6);
        assert_eq!(i16::from_le_bytes([bytes[46], bytes[47]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[48], bytes[49]]), -32767);
    }

    #[test]
    fn test_saved_file_decodes() {
        let path = std::env::temp_dir().join(format!("parvoc-audio-{}.wav", std::process::id()));
        let samples: Vec<f64> = (0..1600).map(|i| (i as f64 * 0.05).sin() * 0.5).collect();
        save_wav(&path, &samples, 16000).unwrap();

        let waveform = load_waveform(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(waveform.sample_rate, 16000);
        assert_eq!(waveform.len(), samples.len());
        for (a, b) in samples.iter().zip(&waveform.samples) {
            assert!((a - b).abs() < 1e-3);
        }
    }
}
