//! Protobuf records exchanged with the recognition service.
//!
//! Field numbers mirror the service's published schema; nothing outside this
//! file depends on them.

use bytes::Bytes;

/// Status code the server uses for success.
pub const RESPONSE_OK: i32 = 200;

/// Session-open request sent right after the protocol upgrade.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectionRequest {
    #[prost(int32, optional, tag = "1")]
    pub protocol_version: Option<i32>,
    #[prost(string, required, tag = "2")]
    pub speechkit_version: String,
    #[prost(string, required, tag = "3")]
    pub service_name: String,
    #[prost(string, required, tag = "4")]
    pub uuid: String,
    #[prost(string, required, tag = "5")]
    pub api_key: String,
    #[prost(string, required, tag = "6")]
    pub application_name: String,
    #[prost(string, required, tag = "7")]
    pub device: String,
    #[prost(string, required, tag = "8")]
    pub coords: String,
    #[prost(string, required, tag = "9")]
    pub topic: String,
    #[prost(string, required, tag = "10")]
    pub lang: String,
    #[prost(string, required, tag = "11")]
    pub format: String,
    #[prost(message, optional, tag = "12")]
    pub advanced_asr_options: Option<AdvancedAsrOptions>,
    #[prost(bool, optional, tag = "14")]
    pub punctuation: Option<bool>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AdvancedAsrOptions {
    #[prost(bool, optional, tag = "1")]
    pub partial_results: Option<bool>,
    #[prost(int32, optional, tag = "4")]
    pub utterance_silence: Option<i32>,
    #[prost(int32, optional, tag = "6")]
    pub cmn_latency: Option<i32>,
    #[prost(bool, optional, tag = "8")]
    pub capitalize: Option<bool>,
    #[prost(int32, optional, tag = "9")]
    pub expected_num_count: Option<i32>,
    #[prost(string, optional, tag = "10")]
    pub biometry: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ConnectionResponse {
    #[prost(int32, required, tag = "1")]
    pub response_code: i32,
    #[prost(string, required, tag = "2")]
    pub session_id: String,
    #[prost(string, optional, tag = "3")]
    pub message: Option<String>,
}

/// One streamed audio record.
#[derive(Clone, PartialEq, prost::Message)]
pub struct AddData {
    #[prost(bytes = "bytes", optional, tag = "1")]
    pub audio_data: Option<Bytes>,
    #[prost(bool, required, tag = "2")]
    pub last_chunk: bool,
}

impl AddData {
    pub fn audio(data: Bytes) -> Self {
        Self {
            audio_data: Some(data),
            last_chunk: false,
        }
    }

    pub fn last() -> Self {
        Self {
            audio_data: None,
            last_chunk: true,
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AlignInfo {
    #[prost(float, optional, tag = "1")]
    pub start_time: Option<f32>,
    #[prost(float, optional, tag = "2")]
    pub end_time: Option<f32>,
    #[prost(float, optional, tag = "3")]
    pub acoustic_score: Option<f32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Word {
    #[prost(float, required, tag = "1")]
    pub confidence: f32,
    #[prost(string, required, tag = "2")]
    pub value: String,
    #[prost(message, optional, tag = "3")]
    pub align_info: Option<AlignInfo>,
}

/// One recognition candidate.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Recognition {
    #[prost(float, required, tag = "1")]
    pub confidence: f32,
    #[prost(message, repeated, tag = "2")]
    pub words: Vec<Word>,
    #[prost(string, optional, tag = "3")]
    pub normalized: Option<String>,
    #[prost(message, optional, tag = "4")]
    pub align_info: Option<AlignInfo>,
}

impl Recognition {
    pub fn text(&self) -> &str {
        self.normalized.as_deref().unwrap_or("")
    }

    /// Utterance bounds in seconds, zero when the server sent no alignment.
    pub fn bounds(&self) -> (f64, f64) {
        match &self.align_info {
            Some(info) => (
                info.start_time.unwrap_or(0.0) as f64,
                info.end_time.unwrap_or(0.0) as f64,
            ),
            None => (0.0, 0.0),
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AddDataResponse {
    #[prost(int32, required, tag = "1")]
    pub response_code: i32,
    #[prost(message, repeated, tag = "2")]
    pub recognition: Vec<Recognition>,
    #[prost(bool, optional, tag = "3")]
    pub end_of_utt: Option<bool>,
    #[prost(int32, optional, tag = "4")]
    pub messages_count: Option<i32>,
    #[prost(string, optional, tag = "5")]
    pub message: Option<String>,
}

impl AddDataResponse {
    pub fn is_end_of_utterance(&self) -> bool {
        self.end_of_utt.unwrap_or(false)
    }

    /// Number of `AddData` records this response accounts for.
    pub fn acknowledged(&self) -> usize {
        self.messages_count.unwrap_or(1).max(0) as usize
    }

    pub fn best(&self) -> Option<&Recognition> {
        self.recognition.first()
    }
}
