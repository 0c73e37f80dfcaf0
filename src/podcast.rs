//! Daily news podcast generation

use std::path::Path;

use crate::genai::{GenAiClient, NewsBriefing};
use crate::voice::OUTPUT_SAMPLE_RATE;
use crate::{Error, Result};

/// Wrap 16-bit little-endian mono PCM in a WAV container
///
/// # Errors
///
/// Returns error if `pcm` has an odd byte length or encoding fails
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    if pcm.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "PCM payload has odd length {}",
            pcm.len()
        )));
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for pair in pcm.chunks_exact(2) {
            writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Generate today's briefing, speak it, and write it to `out_path` as WAV
///
/// # Errors
///
/// Returns error if generation, synthesis or writing the file fails
pub async fn generate_podcast(client: &GenAiClient, out_path: &Path) -> Result<NewsBriefing> {
    tracing::info!("generating news summary");
    let briefing = client.news_summary().await?;

    tracing::info!(chars = briefing.summary.len(), "synthesizing podcast audio");
    let pcm = client.synthesize_dialogue(&briefing.summary).await?;

    let wav = pcm_to_wav(&pcm, OUTPUT_SAMPLE_RATE)?;
    tokio::fs::write(out_path, &wav).await?;

    tracing::info!(
        path = %out_path.display(),
        bytes = wav.len(),
        "podcast written"
    );
    Ok(briefing)
}
