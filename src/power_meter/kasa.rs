use async_trait::async_trait;
use serde_derive::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{socket_target, PowerMeasurement, PowerMeter};
use crate::error::{MeasureError, Result};

const KASA_PORT: u16 = 9999;
const INITIAL_KEY: u8 = 171;
const REALTIME_QUERY: &str = r#"{"emeter":{"get_realtime":{}}}"#;
const MAX_RESPONSE_LEN: usize = 64 * 1024;

/// Reads the energy meter of a TP-Link Kasa plug over its local TCP protocol
pub struct KasaPowerMeter {
    target: String,
    io_timeout: Duration,
}

impl KasaPowerMeter {
    pub fn new(device_ip: &str) -> Self {
        Self {
            target: socket_target(device_ip, KASA_PORT),
            io_timeout: Duration::from_secs(5),
        }
    }

    async fn query(&self, request: &str) -> Result<Vec<u8>> {
        let mut stream = TcpStream::connect(&self.target).await?;

        let payload = encrypt(request.as_bytes());
        let mut frame = Vec::with_capacity(payload.len() + 4);
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);
        stream.write_all(&frame).await?;

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_RESPONSE_LEN {
            return Err(MeasureError::device(
                "Kasa",
                format!("response length {len} exceeds {MAX_RESPONSE_LEN} bytes"),
            ));
        }
        let mut response = vec![0u8; len];
        stream.read_exact(&mut response).await?;

        Ok(decrypt(&response))
    }
}

#[async_trait]
impl PowerMeter for KasaPowerMeter {
    async fn get_power(&mut self) -> Result<PowerMeasurement> {
        let raw = timeout(self.io_timeout, self.query(REALTIME_QUERY))
            .await
            .map_err(|_| MeasureError::device("Kasa", "timed out waiting for the plug"))??;
        debug!("Kasa response {}", String::from_utf8_lossy(&raw));

        let response: KasaResponse = serde_json::from_slice(&raw)?;
        let realtime = response.emeter.get_realtime;
        if realtime.err_code != 0 {
            return Err(MeasureError::device(
                "Kasa",
                format!("emeter returned error code {}", realtime.err_code),
            ));
        }
        let power = match (realtime.power_mw, realtime.power) {
            (Some(milliwatts), _) => milliwatts / 1000.0,
            (None, Some(watts)) => watts,
            (None, None) => {
                return Err(MeasureError::device(
                    "Kasa",
                    "realtime reading contains no power value",
                ))
            }
        };
        Ok(PowerMeasurement::now(power))
    }

    fn name(&self) -> &'static str {
        "Kasa"
    }
}

/// XOR autokey cipher used by Kasa devices
pub(crate) fn encrypt(plain: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    plain
        .iter()
        .map(|&byte| {
            key ^= byte;
            key
        })
        .collect()
}

pub(crate) fn decrypt(cipher: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    cipher
        .iter()
        .map(|&byte| {
            let plain = key ^ byte;
            key = byte;
            plain
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct KasaResponse {
    emeter: Emeter,
}

#[derive(Debug, Deserialize)]
struct Emeter {
    get_realtime: Realtime,
}

#[derive(Debug, Deserialize)]
struct Realtime {
    #[serde(default)]
    power_mw: Option<f64>,
    #[serde(default)]
    power: Option<f64>,
    #[serde(default)]
    err_code: i64,
}
