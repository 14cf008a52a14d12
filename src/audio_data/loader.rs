use crate::audio_data::{PcmBuffer, StreamResampler, adapt_to_stereo};
use crate::error::{AudioError, Result};
use crate::song::StreamSpec;
use std::fs::File;
use std::path::Path;
use symphonia::{
    core::{
        audio::SampleBuffer, codecs::DecoderOptions, errors::Error, formats::FormatOptions,
        io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
    },
    default::{get_codecs, get_probe},
};

/// Decode an entire audio file into a [`PcmBuffer`] in the given output
/// spec, ready to hand to the mixer as a sound effect.
///
/// Effects are short, so the whole file is decoded up front and resampled
/// offline; streaming only pays off for song-length material. Supports
/// whatever containers and codecs Symphonia ships (WAV, MP3, FLAC, OGG,
/// etc.).
pub fn load_pcm(path: &str, target: &StreamSpec) -> Result<PcmBuffer> {
    let file = File::open(path)
        .map_err(|e| AudioError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, e)))?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probe = get_probe();
    let probed = probe
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::Format(format!("Failed to probe audio format: {:?}", e)))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| AudioError::Format("No default audio track found".to_string()))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AudioError::Format("Sample rate not found".to_string()))?;

    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| AudioError::Format("Channel count not found".to_string()))?
        .count() as u16;

    let track_id = track.id;

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::Decode(format!("Failed to create decoder: {:?}", e)))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        // Read the next packet from the container
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(_)) => break, // end-of-file
            Err(e) => {
                return Err(AudioError::Decode(format!("Error reading packet: {:?}", e)));
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        // Decode the packet into audio samples
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(Error::IoError(_)) => break, // also EOF in some formats
            Err(Error::DecodeError(_)) => continue, // recoverable corruption
            Err(e) => {
                return Err(AudioError::Decode(format!("Error decoding packet: {:?}", e)));
            }
        };

        // Convert the sample buffer into f32 samples using SampleBuffer
        let spec = *decoded.spec();
        let capacity = decoded.capacity();

        let mut tmp = SampleBuffer::<f32>::new(capacity as u64, spec);
        tmp.copy_interleaved_ref(decoded);

        samples.extend_from_slice(tmp.samples());
    }

    let stereo = adapt_to_stereo(samples, channels);

    let mut resampler =
        StreamResampler::new(sample_rate, target.sample_rate, target.channels, None)?;
    let mut resampled = resampler.process(&stereo)?;
    resampled.extend(resampler.flush()?);

    log::debug!(
        "Loaded {}: {} Hz {}ch -> {} frames at {} Hz",
        path,
        sample_rate,
        channels,
        resampled.len() / target.channels as usize,
        target.sample_rate
    );

    Ok(PcmBuffer::new(
        resampled,
        target.sample_rate,
        target.channels,
    ))
}
