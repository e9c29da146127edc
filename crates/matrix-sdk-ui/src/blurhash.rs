// Copyright 2022 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The `xyz.amorgan.blurhash` compact image-placeholder codec (spec §6,
//! §8 round-trip property; `SPEC_FULL` addition ported from the
//! component-grid algorithm in `Quotient/blurhash.{h,cpp}`, in turn from
//! <https://blurha.sh/>).
//!
//! Pixels are flat `width * height * 3` RGB8 buffers, row-major, rather
//! than an image type: the codec only ever needs pixel access and this
//! crate has no image-decoding dependency.

use std::f32::consts::PI;

use thiserror::Error;

const BASE83_CHARS: &[u8] =
    b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz#$%*+,-.:;=?@[]^_{|}~";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlurHashError {
    #[error("blurhash string is shorter than the minimum length")]
    TooShort,
    #[error("invalid base83 character")]
    InvalidCharacter,
    #[error("blurhash string length does not match its declared component count")]
    LengthMismatch,
    #[error("component counts must be between 1 and 9")]
    InvalidComponentCount,
    #[error("pixel buffer length does not match width * height * 3")]
    BufferSizeMismatch,
}

/// Decode a base83 run (spec §8: used for every field of a blurhash
/// string). Never panics on non-ASCII input — matched byte-wise, not via
/// `&str` slicing, so a malformed string can't land on a UTF-8 boundary.
fn decode83(bytes: &[u8]) -> Result<i64, BlurHashError> {
    let mut value: i64 = 0;
    for &byte in bytes {
        let index = BASE83_CHARS
            .iter()
            .position(|&candidate| candidate == byte)
            .ok_or(BlurHashError::InvalidCharacter)?;
        value = value * 83 + index as i64;
    }
    Ok(value)
}

/// Encode `value` as exactly `length` base83 digits, zero-padded on the
/// left so the numeric value round-trips through [`decode83`].
fn encode83(mut value: u32, length: usize) -> String {
    let mut buffer = vec![b'0'; length];
    for slot in buffer.iter_mut().rev() {
        *slot = BASE83_CHARS[(value % 83) as usize];
        value /= 83;
    }
    String::from_utf8(buffer).expect("BASE83_CHARS is ASCII")
}

fn pack_components(x: u32, y: u32) -> u32 {
    (x - 1) + (y - 1) * 9
}

fn unpack_components(packed: u32) -> (u32, u32) {
    (packed % 9 + 1, packed / 9 + 1)
}

fn decode_max_ac(value: i64) -> f32 {
    (value as f32 + 1.0) / 166.0
}

fn encode_max_ac(value: f32) -> u32 {
    ((value * 166.0 - 0.5) as i32).clamp(0, 82) as u32
}

fn decode_average_color(value: i64) -> [u8; 3] {
    [((value >> 16) & 0xff) as u8, ((value >> 8) & 0xff) as u8, (value & 0xff) as u8]
}

fn encode_average_color(color: [u8; 3]) -> u32 {
    (color[0] as u32) << 16 | (color[1] as u32) << 8 | color[2] as u32
}

/// `pow(|value|, exp)` with the sign of `value` reattached.
fn sign_pow(value: f32, exp: f32) -> f32 {
    value.abs().powf(exp).copysign(value)
}

fn decode_ac(value: i64, max_ac: f32) -> [f32; 3] {
    let quant_r = value / (19 * 19);
    let quant_g = (value / 19) % 19;
    let quant_b = value % 19;
    [
        sign_pow((quant_r as f32 - 9.0) / 9.0, 2.0) * max_ac,
        sign_pow((quant_g as f32 - 9.0) / 9.0, 2.0) * max_ac,
        sign_pow((quant_b as f32 - 9.0) / 9.0, 2.0) * max_ac,
    ]
}

fn encode_ac(value: [f32; 3], max_ac: f32) -> u32 {
    let quantize = |component: f32| -> i32 {
        (sign_pow(component / max_ac, 0.5) * 9.0 + 9.5).floor().clamp(0.0, 18.0) as i32
    };
    let (r, g, b) = (quantize(value[0]), quantize(value[1]), quantize(value[2]));
    (r * 19 * 19 + g * 19 + b) as u32
}

/// The DCT-like basis weights for one dimension: `cos(pi / dimension * n *
/// x)` for every `(x, component)` pair.
fn calculate_weights(dimension: usize, components: usize) -> Vec<f32> {
    let scale = PI / dimension as f32;
    let mut bases = vec![0.0f32; dimension * components];
    for x in 0..dimension {
        for n in 0..components {
            bases[x * components + n] = (scale * (n * x) as f32).cos();
        }
    }
    bases
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 { c / 12.92 } else { ((c + 0.055) / 1.055).powf(2.4) }
}

fn linear_to_srgb(c: f32) -> f32 {
    let c = c.clamp(0.0, 1.0);
    if c <= 0.0031308 { c * 12.92 } else { 1.055 * c.powf(1.0 / 2.4) - 0.055 }
}

/// Decode a blurhash string into an RGB8 pixel buffer of `width * height *
/// 3` bytes.
pub fn decode(blurhash: &str, width: u32, height: u32) -> Result<Vec<u8>, BlurHashError> {
    let bytes = blurhash.as_bytes();
    if bytes.len() < 6 {
        return Err(BlurHashError::TooShort);
    }

    let (components_x, components_y) = unpack_components(decode83(&bytes[0..1])? as u32);
    let minimum_size = 6 + (components_x * components_y - 1) as usize * 2;
    if bytes.len() != minimum_size {
        return Err(BlurHashError::LengthMismatch);
    }

    let max_ac = decode_max_ac(decode83(&bytes[1..2])?);
    let average = decode_average_color(decode83(&bytes[2..6])?);

    let mut components = Vec::with_capacity((components_x * components_y) as usize);
    components.push(average.map(|c| srgb_to_linear(c as f32 / 255.0)));

    let mut offset = 6;
    while offset < bytes.len() {
        components.push(decode_ac(decode83(&bytes[offset..offset + 2])?, max_ac));
        offset += 2;
    }

    let basis_x = calculate_weights(width as usize, components_x as usize);
    let basis_y = calculate_weights(height as usize, components_y as usize);

    let mut pixels = vec![0u8; (width * height * 3) as usize];
    for y in 0..height as usize {
        for x in 0..width as usize {
            let mut linear = [0.0f32; 3];
            for ny in 0..components_y as usize {
                for nx in 0..components_x as usize {
                    let basis = basis_x[x * components_x as usize + nx]
                        * basis_y[y * components_y as usize + ny];
                    let component = components[nx + ny * components_x as usize];
                    linear[0] += component[0] * basis;
                    linear[1] += component[1] * basis;
                    linear[2] += component[2] * basis;
                }
            }

            let pixel_offset = (y * width as usize + x) * 3;
            pixels[pixel_offset] = (linear_to_srgb(linear[0]) * 255.0).round() as u8;
            pixels[pixel_offset + 1] = (linear_to_srgb(linear[1]) * 255.0).round() as u8;
            pixels[pixel_offset + 2] = (linear_to_srgb(linear[2]) * 255.0).round() as u8;
        }
    }

    Ok(pixels)
}

/// Encode an RGB8 pixel buffer (`width * height * 3` bytes, row-major)
/// into a blurhash string over a `components_x * components_y` grid.
/// `components_x`/`components_y` must each be between 1 and 9.
pub fn encode(
    pixels: &[u8],
    width: u32,
    height: u32,
    components_x: u32,
    components_y: u32,
) -> Result<String, BlurHashError> {
    if !(1..=9).contains(&components_x) || !(1..=9).contains(&components_y) {
        return Err(BlurHashError::InvalidComponentCount);
    }
    if pixels.len() != (width * height * 3) as usize {
        return Err(BlurHashError::BufferSizeMismatch);
    }

    let basis_x = calculate_weights(width as usize, components_x as usize);
    let basis_y = calculate_weights(height as usize, components_y as usize);

    let mut factors = vec![[0.0f32; 3]; (components_x * components_y) as usize];
    let normalization = 1.0 / width as f32;

    for y in 0..height as usize {
        for x in 0..width as usize {
            let pixel_offset = (y * width as usize + x) * 3;
            let linear = [
                srgb_to_linear(pixels[pixel_offset] as f32 / 255.0) * normalization,
                srgb_to_linear(pixels[pixel_offset + 1] as f32 / 255.0) * normalization,
                srgb_to_linear(pixels[pixel_offset + 2] as f32 / 255.0) * normalization,
            ];

            for ny in 0..components_y as usize {
                for nx in 0..components_x as usize {
                    let basis = basis_x[x * components_x as usize + nx]
                        * basis_y[y * components_y as usize + ny];
                    let index = ny * components_x as usize + nx;
                    factors[index][0] += linear[0] * basis;
                    factors[index][1] += linear[1] * basis;
                    factors[index][2] += linear[2] * basis;
                }
            }
        }
    }

    // Half the scaling was folded into the accumulation above to avoid
    // overflowing the float range on large images.
    for (i, factor) in factors.iter_mut().enumerate() {
        let scale = if i == 0 { 1.0 } else { 2.0 } / height as f32;
        factor[0] *= scale;
        factor[1] *= scale;
        factor[2] *= scale;
    }

    let average = factors[0];
    let ac_factors = &factors[1..];

    let mut encoded = encode83(pack_components(components_x, components_y), 1);

    let max_value = if ac_factors.is_empty() {
        encoded.push_str(&encode83(0, 1));
        1.0
    } else {
        let actual_max =
            ac_factors.iter().flatten().fold(0.0f32, |acc, component| acc.max(component.abs()));
        let quantised = encode_max_ac(actual_max);
        encoded.push_str(&encode83(quantised, 1));
        (quantised as f32 + 1.0) / 166.0
    };

    let average_srgb = [
        (linear_to_srgb(average[0]) * 255.0).round() as u8,
        (linear_to_srgb(average[1]) * 255.0).round() as u8,
        (linear_to_srgb(average[2]) * 255.0).round() as u8,
    ];
    encoded.push_str(&encode83(encode_average_color(average_srgb), 4));

    for ac in ac_factors {
        encoded.push_str(&encode83(encode_ac(*ac, max_value), 2));
    }

    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::{decode, encode, BlurHashError};

    fn solid_color(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..(width * height) {
            pixels.extend_from_slice(&color);
        }
        pixels
    }

    #[test]
    fn round_trips_a_solid_color_image() {
        let pixels = solid_color(32, 32, [120, 40, 200]);
        let hash = encode(&pixels, 32, 32, 4, 3).unwrap();
        assert_eq!(hash.len(), 1 + 1 + 4 + (4 * 3 - 1) * 2);

        let decoded = decode(&hash, 32, 32).unwrap();
        for pixel in decoded.chunks_exact(3) {
            assert!((pixel[0] as i32 - 120).abs() <= 2);
            assert!((pixel[1] as i32 - 40).abs() <= 2);
            assert!((pixel[2] as i32 - 200).abs() <= 2);
        }
    }

    #[test]
    fn round_trips_a_gradient() {
        let (width, height) = (16, 16);
        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[
                    (x * 255 / width) as u8,
                    (y * 255 / height) as u8,
                    128,
                ]);
            }
        }

        let hash = encode(&pixels, width, height, 5, 5).unwrap();
        let decoded = decode(&hash, width, height).unwrap();
        assert_eq!(decoded.len(), pixels.len());
    }

    #[test]
    fn rejects_out_of_range_component_counts() {
        let pixels = solid_color(4, 4, [0, 0, 0]);
        assert_eq!(encode(&pixels, 4, 4, 0, 4).unwrap_err(), BlurHashError::InvalidComponentCount);
        assert_eq!(encode(&pixels, 4, 4, 4, 10).unwrap_err(), BlurHashError::InvalidComponentCount);
    }

    #[test]
    fn rejects_mismatched_buffer_length() {
        let pixels = solid_color(4, 4, [0, 0, 0]);
        assert_eq!(encode(&pixels[..10], 4, 4, 3, 3).unwrap_err(), BlurHashError::BufferSizeMismatch);
    }

    #[test]
    fn rejects_invalid_base83_characters() {
        // A known-valid 28-character hash (4x3 components) with its last
        // character swapped for one outside the base83 alphabet, so the
        // length check passes and the character check is what fails.
        let valid = "LEHV6nWB2yk8pyo0adR*.7kCMdnj";
        let with_bad_char = format!("{} ", &valid[..valid.len() - 1]);
        assert_eq!(decode(&with_bad_char, 4, 4).unwrap_err(), BlurHashError::InvalidCharacter);
    }

    #[test]
    fn rejects_too_short_strings() {
        assert_eq!(decode("LEH", 4, 4).unwrap_err(), BlurHashError::TooShort);
    }
}
