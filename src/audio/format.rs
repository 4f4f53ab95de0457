/// Parsed audio format string such as `audio/x-pcm;bit=16;rate=16000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    /// MIME type without parameters, lowercased
    pub mime: String,
    /// Bits per sample (`bit=` parameter)
    pub bits: Option<u32>,
    /// Samples per second (`rate=` parameter)
    pub rate: Option<u32>,
    /// Channel count (`channels=` parameter, mono when absent)
    pub channels: u16,
}

impl AudioFormat {
    pub fn parse(format: &str) -> Self {
        let mut parts = format.split(';').map(str::trim);
        let mime = parts.next().unwrap_or_default().to_ascii_lowercase();

        let mut bits = None;
        let mut rate = None;
        let mut channels = 1;
        for part in parts {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                "bit" | "bits" => bits = value.trim().parse().ok(),
                "rate" => rate = value.trim().parse().ok(),
                "channels" => channels = value.trim().parse().unwrap_or(1),
                _ => {}
            }
        }

        Self {
            mime,
            bits,
            rate,
            channels,
        }
    }

    pub fn is_pcm(&self) -> bool {
        self.mime == "audio/x-pcm"
    }

    /// Companded telephony formats carry one byte per sample.
    fn is_companded(&self) -> bool {
        matches!(self.mime.as_str(), "audio/x-alaw" | "audio/x-mulaw")
    }

    /// Byte rate of the stream, when the format is uncompressed enough to know it.
    pub fn bytes_per_second(&self) -> Option<u64> {
        let rate = u64::from(self.rate?);
        let channels = u64::from(self.channels.max(1));
        if self.is_pcm() {
            let bytes = u64::from(self.bits?).div_ceil(8);
            Some(rate * bytes * channels)
        } else if self.is_companded() {
            Some(rate * channels)
        } else {
            None
        }
    }

    /// WAV header for 16-bit little-endian PCM; other formats have none.
    pub fn wav_spec(&self) -> Option<hound::WavSpec> {
        if !self.is_pcm() || self.bits != Some(16) {
            return None;
        }
        Some(hound::WavSpec {
            channels: self.channels.max(1),
            sample_rate: self.rate?,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        })
    }
}
