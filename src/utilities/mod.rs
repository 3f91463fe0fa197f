// Copyright 2024 The salamander developers
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

mod pickle;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
pub(crate) use pickle::{
    ensure_fully_consumed, open_pickle, seal_pickle, Decode, DecodeSecret, Encode,
};
pub use pickle::PickleDecodeError;
use sha2::{Digest, Sha256};

/// Decode the input as base64 with no padding.
pub fn base64_decode(input: impl AsRef<[u8]>) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD_NO_PAD.decode(input)
}

/// Encode the input as base64 with no padding.
pub fn base64_encode(input: impl AsRef<[u8]>) -> String {
    STANDARD_NO_PAD.encode(input)
}

/// Hash the input with SHA-256 and return the unpadded base64 encoding of the
/// digest.
pub fn sha256(input: impl AsRef<[u8]>) -> String {
    base64_encode(Sha256::digest(input.as_ref()))
}

// The integer encoding logic here has been taken from the integer-encoding[1]
// crate and is under the MIT license.
//
// The MIT License (MIT)
//
// Copyright (c) 2016 Google Inc. (lewinb@google.com) -- though not an official
// Google product or in any way related!
// Copyright (c) 2018-2020 Lewin Bormann (lbo@spheniscida.de)
//
// [1]: https://github.com/dermesser/integer-encoding-rs
pub(crate) trait VarInt {
    fn to_var_int(self) -> Vec<u8>;
}

/// Most-significant byte, == 0x80
const MSB: u8 = 0b1000_0000;

/// How many bytes an integer uses when being encoded as a VarInt.
#[inline]
fn required_encoded_space_unsigned(mut v: u64) -> usize {
    if v == 0 {
        return 1;
    }

    let mut logcounter = 0;
    while v > 0 {
        logcounter += 1;
        v >>= 7;
    }
    logcounter
}

impl VarInt for usize {
    fn to_var_int(self) -> Vec<u8> {
        (self as u64).to_var_int()
    }
}

impl VarInt for u32 {
    fn to_var_int(self) -> Vec<u8> {
        u64::from(self).to_var_int()
    }
}

impl VarInt for u64 {
    #[inline]
    fn to_var_int(self) -> Vec<u8> {
        let mut v = Vec::new();
        v.resize(required_encoded_space_unsigned(self), 0);

        let mut n = self;
        let mut i = 0;

        while n >= 0x80 {
            v[i] = MSB | (n as u8);
            i += 1;
            n >>= 7;
        }

        v[i] = n as u8;

        v
    }
}

#[cfg(test)]
mod test {
    use super::{base64_decode, base64_encode, sha256, VarInt};

    #[test]
    fn base64_round_trip() {
        let content = b"A secret message";

        let encoded = base64_encode(content);
        assert!(!encoded.ends_with('='), "The encoding should be unpadded");

        let decoded = base64_decode(&encoded).expect("Our own base64 output should decode");
        assert_eq!(decoded, content);
    }

    #[test]
    fn sha256_known_answer() {
        // SHA-256 of the empty string.
        assert_eq!(sha256(b""), "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU");
    }

    #[test]
    fn varint_encoding() {
        assert_eq!(0u64.to_var_int(), [0x00]);
        assert_eq!(1u64.to_var_int(), [0x01]);
        assert_eq!(127u64.to_var_int(), [0x7F]);
        assert_eq!(128u64.to_var_int(), [0x80, 0x01]);
        assert_eq!(300u64.to_var_int(), [0xAC, 0x02]);
    }
}
