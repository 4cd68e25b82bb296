//! RFC 6238 time-based one-time passwords (HMAC-SHA1, 30 second steps).

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

pub const TIME_STEP_SECS: i64 = 30;
pub const DIGITS: u32 = 6;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Decode an RFC 4648 base32 secret. Padding, spaces and case are ignored.
pub fn decode_base32(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut acc: u64 = 0;
    let mut bits = 0u32;

    for c in input.chars().filter(|c| !c.is_whitespace() && *c != '=' && *c != '-') {
        let c = c.to_ascii_uppercase() as u8;
        let value = BASE32_ALPHABET.iter().position(|&b| b == c)? as u64;
        acc = (acc << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((acc >> bits) as u8);
            acc &= (1 << bits) - 1;
        }
    }

    Some(out)
}

pub fn time_step(at: DateTime<Utc>) -> u64 {
    (at.timestamp().max(0) / TIME_STEP_SECS) as u64
}

pub fn generate_code(secret: &[u8], at: DateTime<Utc>) -> String {
    generate_code_for_step(secret, time_step(at), DIGITS)
}

fn generate_code_for_step(secret: &[u8], step: u64, digits: u32) -> String {
    let mut mac = match HmacSha1::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac key of any size is valid"),
    };
    mac.update(&step.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | (digest[offset + 3] as u32);

    let code = binary % 10u32.pow(digits);
    format!("{:0width$}", code, width = digits as usize)
}
