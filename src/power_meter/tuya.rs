//! Tuya local protocol, versions 3.1 and 3.3.
//!
//! Frames are laid out as
//! `prefix | seq | cmd | len | payload | crc32 | suffix`, all integers big
//! endian, where `len` counts the payload plus the crc and suffix. Version
//! 3.3 encrypts the payload with AES-128-ECB using the device local key.

use aes::{
    cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit},
    Aes128,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{socket_target, PowerMeasurement, PowerMeter};
use crate::config::TuyaSettings;
use crate::error::{MeasureError, Result};

const TUYA_PORT: u16 = 6668;
const PREFIX: u32 = 0x0000_55AA;
const SUFFIX: u32 = 0x0000_AA55;
const DP_QUERY: u32 = 0x0a;
const HEADER_LEN: usize = 16;
const TRAILER_LEN: usize = 8;
const VERSION_HEADER_LEN: usize = 15;
const BLOCK_SIZE: usize = 16;
const MAX_FRAMES: usize = 3;
const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TuyaVersion {
    V31,
    V33,
}

pub struct TuyaPowerMeter {
    target: String,
    device_id: String,
    key: [u8; 16],
    version: TuyaVersion,
    seq: u32,
    io_timeout: Duration,
}

impl TuyaPowerMeter {
    pub fn new(settings: &TuyaSettings) -> Result<Self> {
        let version = match settings.version.trim() {
            "3.1" => TuyaVersion::V31,
            "3.3" => TuyaVersion::V33,
            other => {
                return Err(MeasureError::Unsupported(format!(
                    "Tuya protocol version {other}, only 3.1 and 3.3 are supported"
                )))
            }
        };
        let key: [u8; 16] = settings.device_key.as_bytes().try_into().map_err(|_| {
            MeasureError::config("TUYA_DEVICE_KEY", "local key must be 16 characters")
        })?;

        Ok(Self {
            target: socket_target(&settings.device_ip, TUYA_PORT),
            device_id: settings.device_id.clone(),
            key,
            version,
            seq: 0,
            io_timeout: Duration::from_secs(5),
        })
    }

    fn query_payload(&self, timestamp: i64) -> Vec<u8> {
        let body = json!({
            "gwId": self.device_id,
            "devId": self.device_id,
            "uid": self.device_id,
            "t": timestamp.to_string(),
        })
        .to_string();
        match self.version {
            TuyaVersion::V31 => body.into_bytes(),
            TuyaVersion::V33 => aes_ecb_encrypt(&self.key, body.as_bytes()),
        }
    }

    async fn query_status(&mut self) -> Result<Value> {
        self.seq = self.seq.wrapping_add(1);
        let request = pack_frame(
            self.seq,
            DP_QUERY,
            &self.query_payload(chrono::Utc::now().timestamp()),
        );

        let mut stream = TcpStream::connect(&self.target).await?;
        stream.write_all(&request).await?;

        for _ in 0..MAX_FRAMES {
            let frame = read_frame(&mut stream).await?;
            let (_, payload) = unpack_frame(&frame)?;
            let payload = strip_response_headers(payload);
            if payload.is_empty() {
                continue;
            }
            let plain = match self.version {
                TuyaVersion::V31 => payload.to_vec(),
                TuyaVersion::V33 => aes_ecb_decrypt(&self.key, payload)?,
            };
            debug!("Tuya status {}", String::from_utf8_lossy(&plain));
            return Ok(serde_json::from_slice(&plain)?);
        }
        Err(MeasureError::device("Tuya", "device sent no status payload"))
    }
}

#[async_trait]
impl PowerMeter for TuyaPowerMeter {
    async fn get_power(&mut self) -> Result<PowerMeasurement> {
        let status = timeout(self.io_timeout, self.query_status())
            .await
            .map_err(|_| MeasureError::device("Tuya", "timed out waiting for the device"))??;
        Ok(PowerMeasurement::now(power_from_status(&status)?))
    }

    fn name(&self) -> &'static str {
        "Tuya"
    }
}

/// Power is reported in deciwatts, on DP 19 for newer plugs and DP 5 for older ones
fn power_from_status(status: &Value) -> Result<f64> {
    let dps = status
        .get("dps")
        .ok_or_else(|| MeasureError::device("Tuya", "status contains no dps"))?;
    ["19", "5"]
        .iter()
        .find_map(|dp| dps.get(*dp).and_then(Value::as_f64))
        .map(|deciwatts| deciwatts / 10.0)
        .ok_or_else(|| MeasureError::device("Tuya", format!("no power data point in {dps}")))
}

fn pack_frame(seq: u32, cmd: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    frame.extend_from_slice(&PREFIX.to_be_bytes());
    frame.extend_from_slice(&seq.to_be_bytes());
    frame.extend_from_slice(&cmd.to_be_bytes());
    frame.extend_from_slice(&((payload.len() + TRAILER_LEN) as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    let crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame.extend_from_slice(&SUFFIX.to_be_bytes());
    frame
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Validates a frame and returns its command and payload
fn unpack_frame(frame: &[u8]) -> Result<(u32, &[u8])> {
    if frame.len() < HEADER_LEN + TRAILER_LEN {
        return Err(MeasureError::device("Tuya", "frame too short"));
    }
    if read_u32(frame, 0) != PREFIX {
        return Err(MeasureError::device("Tuya", "bad frame prefix"));
    }
    let cmd = read_u32(frame, 8);
    let len = read_u32(frame, 12) as usize;
    if len < TRAILER_LEN || frame.len() < HEADER_LEN + len {
        return Err(MeasureError::device("Tuya", "frame length mismatch"));
    }
    let crc_offset = HEADER_LEN + len - TRAILER_LEN;
    if read_u32(frame, crc_offset) != crc32fast::hash(&frame[..crc_offset]) {
        return Err(MeasureError::device("Tuya", "frame checksum mismatch"));
    }
    if read_u32(frame, crc_offset + 4) != SUFFIX {
        return Err(MeasureError::device("Tuya", "bad frame suffix"));
    }
    Ok((cmd, &frame[HEADER_LEN..crc_offset]))
}

async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut frame = vec![0u8; HEADER_LEN];
    stream.read_exact(&mut frame).await?;
    if read_u32(&frame, 0) != PREFIX {
        return Err(MeasureError::device("Tuya", "bad frame prefix"));
    }
    let len = read_u32(&frame, 12) as usize;
    if len > MAX_FRAME_LEN {
        return Err(MeasureError::device(
            "Tuya",
            format!("frame length {len} exceeds {MAX_FRAME_LEN} bytes"),
        ));
    }
    frame.resize(HEADER_LEN + len, 0);
    stream.read_exact(&mut frame[HEADER_LEN..]).await?;
    Ok(frame)
}

/// Drops the return code and the `3.3` version header devices prepend to replies
fn strip_response_headers(mut payload: &[u8]) -> &[u8] {
    if payload.len() >= 4 && payload[..3] == [0, 0, 0] {
        payload = &payload[4..];
    }
    if payload.starts_with(b"3.3") && payload.len() >= VERSION_HEADER_LEN {
        payload = &payload[VERSION_HEADER_LEN..];
    }
    payload
}

fn aes_ecb_encrypt(key: &[u8; 16], plain: &[u8]) -> Vec<u8> {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let pad = BLOCK_SIZE - plain.len() % BLOCK_SIZE;
    let mut data = plain.to_vec();
    data.extend(std::iter::repeat(pad as u8).take(pad));
    for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    data
}

fn aes_ecb_decrypt(key: &[u8; 16], encrypted: &[u8]) -> Result<Vec<u8>> {
    if encrypted.is_empty() || encrypted.len() % BLOCK_SIZE != 0 {
        return Err(MeasureError::device(
            "Tuya",
            "encrypted payload is not block aligned, check TUYA_DEVICE_VERSION",
        ));
    }
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut data = encrypted.to_vec();
    for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }
    let pad = data[data.len() - 1] as usize;
    if pad == 0 || pad > BLOCK_SIZE || !data[data.len() - pad..].iter().all(|&b| b as usize == pad)
    {
        return Err(MeasureError::device(
            "Tuya",
            "invalid padding after decryption, check TUYA_DEVICE_KEY",
        ));
    }
    data.truncate(data.len() - pad);
    Ok(data)
}
