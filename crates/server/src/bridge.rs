//! Audio bridge (§4.6, §6 "Audio bridge wire format").
//!
//! A TCP listener speaking raw PCM frames bidirectionally: 16 kHz mono
//! signed 16-bit little-endian by default, chunked into `bridge_frame_samples`
//! (default 320 samples = 20 ms). The first line of the stream is
//! `CALL <internal_call_id>\n`; everything after that is raw frame bytes in
//! both directions.
//!
//! Frame capture and turn execution run as two independent tasks joined by
//! a bounded channel (§5 "the Audio Pipeline runs two dedicated ... threads
//! (capture, playback)"), so a multi-second LLM/TTS turn never stalls
//! ingestion of the next incoming frames.

use std::sync::Arc;

use phone_agent_config::constants::audio::{PCM16_NORMALIZE, PCM16_SCALE, SAMPLE_RATE};
use phone_agent_core::{AudioFrame, VadEvent, VoiceActivityDetector};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::call_handler::CallHandler;
use crate::error::ServerError;
use crate::state::AppState;

/// Utterances in flight between capture and turn execution before capture
/// backpressures (waits for the turn task to drain one).
const UTTERANCE_CHANNEL_DEPTH: usize = 4;

fn pcm16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_NORMALIZE)
        .collect()
}

fn f32_to_pcm16le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let clamped = (sample * PCM16_SCALE).clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&clamped.to_le_bytes());
    }
    bytes
}

async fn read_handshake<R: tokio::io::AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, ServerError> {
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .await
        .map_err(|e| ServerError::Bridge(e.to_string()))?;
    let line = line.trim();
    line.strip_prefix("CALL ")
        .map(str::to_string)
        .ok_or_else(|| ServerError::Bridge(format!("expected 'CALL <id>' handshake, got {line:?}")))
}

/// Accepts bridge connections on `listener`, each handled by its own task.
pub async fn serve(listener: TcpListener, state: Arc<AppState>, frame_samples: usize) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(socket, &state, frame_samples).await {
                        warn!(%peer, error = %err, "audio bridge connection ended with an error");
                    }
                });
            }
            Err(err) => warn!(error = %err, "failed to accept audio bridge connection"),
        }
    }
}

async fn handle_connection(socket: TcpStream, state: &AppState, frame_samples: usize) -> Result<(), ServerError> {
    let (read_half, write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    let internal_call_id = read_handshake(&mut reader).await?;
    let handler = state
        .calls
        .get(&internal_call_id)
        .ok_or_else(|| ServerError::UnknownCall(internal_call_id.clone()))?;

    info!(internal_call_id = %internal_call_id, "audio bridge connected");

    let vad = state.engine.voice_detector().clone();
    let (utterance_tx, utterance_rx) = mpsc::channel::<Vec<f32>>(UTTERANCE_CHANNEL_DEPTH);

    let turn_task = tokio::spawn(run_turns(handler.clone(), utterance_rx, write_half));
    let capture_result = capture_frames(&mut reader, &handler, vad, frame_samples, utterance_tx).await;

    match turn_task.await {
        Ok(turn_result) => {
            capture_result?;
            turn_result
        }
        Err(join_err) => Err(ServerError::Bridge(join_err.to_string())),
    }
}

/// Reads frames off the wire, runs VAD, and buffers speech into utterances;
/// never blocks on turn execution. Each completed utterance is handed to
/// `run_turns` over `utterance_tx`, so the next frame is read immediately.
async fn capture_frames<R: AsyncRead + Unpin>(
    reader: &mut R,
    handler: &Arc<CallHandler>,
    vad: Arc<dyn VoiceActivityDetector>,
    frame_samples: usize,
    utterance_tx: mpsc::Sender<Vec<f32>>,
) -> Result<(), ServerError> {
    let frame_bytes = frame_samples * 2;
    let mut read_buf = vec![0u8; frame_bytes];
    let mut speech_buffer: Vec<f32> = Vec::new();
    let mut in_speech = false;

    loop {
        match reader.read_exact(&mut read_buf).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(ServerError::Bridge(err.to_string())),
        }

        let samples = pcm16le_to_f32(&read_buf);
        let frame = AudioFrame::new(samples.clone(), SAMPLE_RATE);
        let event = vad.detect(&frame).await?;

        match event {
            VadEvent::SpeechStart => {
                in_speech = true;
                speech_buffer.clear();
                speech_buffer.extend_from_slice(&samples);
                handler.on_speech_detected()?;
            }
            VadEvent::SpeechContinue { .. } if in_speech => {
                speech_buffer.extend_from_slice(&samples);
            }
            VadEvent::SpeechEnd if in_speech => {
                in_speech = false;
                let utterance = std::mem::take(&mut speech_buffer);
                if utterance_tx.send(utterance).await.is_err() {
                    // Turn task is gone; nothing more to do for this call.
                    break;
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Drains completed utterances and runs the transcribe→triage→generate→
/// synthesize turn for each, writing the reply audio back to the caller.
/// Runs independently of `capture_frames` so a slow turn never backs up
/// frame ingestion.
async fn run_turns(
    handler: Arc<CallHandler>,
    mut utterance_rx: mpsc::Receiver<Vec<f32>>,
    mut write_half: OwnedWriteHalf,
) -> Result<(), ServerError> {
    while let Some(utterance) = utterance_rx.recv().await {
        let output = handler.on_utterance(&utterance, SAMPLE_RATE).await?;
        write_half
            .write_all(&f32_to_pcm16le(&output.audio))
            .await
            .map_err(|e| ServerError::Bridge(e.to_string()))?;
        handler.on_playback_complete()?;
    }

    write_half.shutdown().await.ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_roundtrip_preserves_amplitude_within_quantization_error() {
        let samples = vec![0.5_f32, -0.5, 0.0, 0.25];
        let bytes = f32_to_pcm16le(&samples);
        let roundtripped = pcm16le_to_f32(&bytes);
        for (original, recovered) in samples.iter().zip(roundtripped.iter()) {
            assert!((original - recovered).abs() < 0.001);
        }
    }

    #[tokio::test]
    async fn handshake_requires_the_call_prefix() {
        let mut reader = tokio::io::BufReader::new(std::io::Cursor::new(b"CALL abc-123\n".to_vec()));
        let id = read_handshake(&mut reader).await.unwrap();
        assert_eq!(id, "abc-123");
    }

    #[tokio::test]
    async fn handshake_without_prefix_is_rejected() {
        let mut reader = tokio::io::BufReader::new(std::io::Cursor::new(b"garbage\n".to_vec()));
        assert!(read_handshake(&mut reader).await.is_err());
    }
}
