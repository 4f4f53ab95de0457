//! Connection handshake: the plaintext HTTP upgrade, then the session-open
//! exchange on the framed channel.

use prost::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use super::messages::{
    AdvancedAsrOptions, ConnectionRequest, ConnectionResponse, RESPONSE_OK,
};
use crate::error::SessionError;
use crate::session::SessionConfig;
use crate::transport::FramedTransport;

/// Path requested in the upgrade line.
pub const UPGRADE_PATH: &str = "/asr_partial_checked";

/// Status line the server answers a successful upgrade with.
pub const UPGRADE_OK: &str = "HTTP/1.1 101 Switching Protocols";

/// Bytes of upgrade response read before giving up on the server.
pub const UPGRADE_RESPONSE_LIMIT: usize = 300;

pub const SPEECHKIT_VERSION: &str = "Not Speechkit";
pub const PROTOCOL_VERSION: i32 = 1;
pub const DEVICE: &str = "desktop";
pub const COORDS: &str = "0, 0";

/// Text of the upgrade request.
pub fn upgrade_request(config: &SessionConfig) -> String {
    format!(
        "GET {} HTTP/1.1\r\nUser-Agent: {}\r\nHost: {}:{}\r\nUpgrade: {}\r\n\r\n",
        UPGRADE_PATH, config.app, config.host, config.port, config.service
    )
}

/// Build the session-open record for `uuid`.
pub fn connection_request(config: &SessionConfig, uuid: &str) -> ConnectionRequest {
    let recognition = &config.recognition;
    ConnectionRequest {
        protocol_version: Some(PROTOCOL_VERSION),
        speechkit_version: SPEECHKIT_VERSION.to_string(),
        service_name: config.service.clone(),
        uuid: uuid.to_string(),
        api_key: config.api_key.clone(),
        application_name: config.app.clone(),
        device: DEVICE.to_string(),
        coords: COORDS.to_string(),
        topic: recognition.topic.clone(),
        lang: recognition.lang.clone(),
        format: recognition.format.clone(),
        advanced_asr_options: Some(AdvancedAsrOptions {
            partial_results: Some(true),
            utterance_silence: Some(recognition.inter_utt_silence),
            cmn_latency: Some(recognition.cmn_latency),
            capitalize: Some(recognition.capitalize),
            expected_num_count: Some(recognition.expected_num_count),
            biometry: recognition.biometry.clone(),
        }),
        punctuation: Some(recognition.punctuation),
    }
}

/// Switch the connection from HTTP to the framed protocol.
///
/// Reads the reply one byte at a time: the framed channel only starts after
/// the blank line that ends the HTTP headers.
pub async fn upgrade<S>(
    transport: &mut FramedTransport<S>,
    config: &SessionConfig,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = upgrade_request(config);
    transport.writer().write_raw(request.as_bytes()).await?;

    let mut reply = Vec::with_capacity(UPGRADE_RESPONSE_LIMIT);
    loop {
        let byte = transport.reader().read_exact(1).await?;
        reply.extend_from_slice(&byte);

        if reply.starts_with(UPGRADE_OK.as_bytes()) && reply.ends_with(b"\r\n\r\n") {
            debug!("Upgrade accepted after {} bytes", reply.len());
            return Ok(());
        }
        if reply.len() > UPGRADE_RESPONSE_LIMIT {
            let text = String::from_utf8_lossy(&reply).into_owned();
            warn!("Upgrade rejected: {}", text);
            return Err(SessionError::UpgradeRejected(text));
        }
    }
}

/// Open a logical session and return the server-issued session id.
pub async fn open_session<S>(
    transport: &mut FramedTransport<S>,
    config: &SessionConfig,
    uuid: &str,
) -> Result<String, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = connection_request(config, uuid);
    transport.writer().write_framed(&request.encode_to_vec()).await?;

    let payload = transport.reader().read_framed().await?;
    let response = ConnectionResponse::decode(payload.as_slice())?;

    if response.response_code != RESPONSE_OK {
        return Err(SessionError::Server {
            code: response.response_code,
            message: response.message,
        });
    }

    info!("session_id={}", response.session_id);
    Ok(response.session_id)
}

/// Run both handshake steps on a fresh connection.
pub async fn handshake<S>(
    transport: &mut FramedTransport<S>,
    config: &SessionConfig,
    uuid: &str,
) -> Result<String, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    upgrade(transport, config).await?;
    open_session(transport, config, uuid).await
}
