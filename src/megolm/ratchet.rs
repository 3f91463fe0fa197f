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

use hmac::{Hmac, Mac as _};
use rand::{thread_rng, CryptoRng, RngCore};
use sha2::{digest::CtOutput, Sha256};
use zeroize::Zeroize;

const ADVANCEMENT_SEEDS: [&[u8; 1]; Ratchet::RATCHET_PART_COUNT] =
    [b"\x00", b"\x01", b"\x02", b"\x03"];

/// The Megolm ratchet state: four 256-bit parts and the counter which
/// uniquely indexes it.
///
/// Part `R(i)` gets rehashed whenever the `i`-th byte of the counter
/// increments, which allows fast-forwarding by large amounts with
/// `O(log n)` rehashes while still making it computationally infeasible to
/// step the ratchet backwards.
#[derive(Clone)]
pub(super) struct Ratchet {
    inner: [u8; Self::RATCHET_LENGTH],
    counter: u32,
}

impl Drop for Ratchet {
    fn drop(&mut self) {
        self.inner.zeroize();
        self.counter.zeroize();
    }
}

struct RatchetPart<'a>(&'a mut [u8]);

impl RatchetPart<'_> {
    fn hash(&self, seed: &[u8]) -> CtOutput<Hmac<Sha256>> {
        let mut hmac = Hmac::<Sha256>::new_from_slice(self.0)
            .expect("We should be able to create a HMAC object from a ratchet part");
        hmac.update(seed);

        hmac.finalize()
    }

    fn update(&mut self, new_part: &[u8]) {
        self.0.copy_from_slice(new_part);
    }
}

struct RatchetParts<'a> {
    r_0: RatchetPart<'a>,
    r_1: RatchetPart<'a>,
    r_2: RatchetPart<'a>,
    r_3: RatchetPart<'a>,
}

impl<'a> RatchetParts<'a> {
    fn update(&'a mut self, from: usize, to: usize) {
        let from = match from {
            0 => &self.r_0,
            1 => &self.r_1,
            2 => &self.r_2,
            3 => &self.r_3,
            _ => unreachable!(),
        };

        let result = from.hash(ADVANCEMENT_SEEDS[to]);

        let to = match to {
            0 => &mut self.r_0,
            1 => &mut self.r_1,
            2 => &mut self.r_2,
            3 => &mut self.r_3,
            _ => unreachable!(),
        };

        to.update(&result.into_bytes());
    }
}

impl Ratchet {
    const RATCHET_PART_COUNT: usize = 4;

    /// The length of the ratchet state in bytes.
    pub const RATCHET_LENGTH: usize = 128;

    pub fn new() -> Self {
        Self::new_from_rng(&mut thread_rng())
    }

    pub fn new_from_rng(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        let mut ratchet = Self { inner: [0u8; Self::RATCHET_LENGTH], counter: 0 };

        rng.fill_bytes(&mut ratchet.inner);

        ratchet
    }

    pub const fn from_bytes(bytes: [u8; Self::RATCHET_LENGTH], counter: u32) -> Self {
        Self { inner: bytes, counter }
    }

    pub const fn index(&self) -> u32 {
        self.counter
    }

    pub const fn as_bytes(&self) -> &[u8; Self::RATCHET_LENGTH] {
        &self.inner
    }

    fn as_parts(&mut self) -> RatchetParts<'_> {
        let (top, bottom) = self.inner.split_at_mut(64);

        let (r_0, r_1) = top.split_at_mut(32);
        let (r_2, r_3) = bottom.split_at_mut(32);

        let r_0 = RatchetPart(r_0);
        let r_1 = RatchetPart(r_1);
        let r_2 = RatchetPart(r_2);
        let r_3 = RatchetPart(r_3);

        RatchetParts { r_0, r_1, r_2, r_3 }
    }

    pub fn advance(&mut self) {
        let mut mask: u32 = 0x00FF_FFFF;
        let mut h = 0;

        self.counter = self.counter.wrapping_add(1);

        // Figure out how much we need to rekey. The h-th part is the last
        // one whose counter byte changed.
        while h < Self::RATCHET_PART_COUNT {
            if (self.counter & mask) == 0 {
                break;
            }

            h += 1;
            mask >>= 8;
        }

        // Now update R(h)...R(3) based on R(h).
        for i in (h..Self::RATCHET_PART_COUNT).rev() {
            let mut parts = self.as_parts();
            parts.update(h, i);
        }
    }

    pub fn advance_to(&mut self, advance_to: u32) {
        for j in 0..Self::RATCHET_PART_COUNT {
            let shift = (Self::RATCHET_PART_COUNT - j - 1) * 8;
            let mask: u32 = !0u32 << shift;

            // How many times do we need to rehash this part?
            // '& 0xff' ensures we handle integer wraparound correctly.
            let mut steps: u32 =
                ((advance_to >> shift).wrapping_sub(self.counter >> shift)) & 0xff;

            if steps == 0 {
                // Deal with the edge case where the counter is slightly
                // larger than advance_to. This should only happen for R(0),
                // and implies that advance_to has wrapped around and we need
                // to advance R(0) 256 times.
                if advance_to < self.counter {
                    steps = 0x100;
                } else {
                    continue;
                }
            }

            // For all but the last step, we can just bump R(j) without
            // regard to R(j+1)...R(3).
            while steps > 1 {
                let mut parts = self.as_parts();
                parts.update(j, j);
                steps -= 1;
            }

            // On the last step we also need to bump R(j+1)...R(3).
            //
            // (Theoretically, we could skip bumping R(j+2) if we're going to
            // bump R(j+1) again, but the code to figure that out is a bit
            // baroque and doesn't save us much).
            for k in (j..Self::RATCHET_PART_COUNT).rev() {
                let mut parts = self.as_parts();
                parts.update(j, k);
            }

            self.counter = advance_to & mask;
        }
    }
}

#[cfg(test)]
mod test {
    use super::Ratchet;

    #[test]
    fn advance_to_matches_repeated_advancement() {
        for advance_to in [1, 2, 255, 256, 1000] {
            let mut slow = Ratchet::from_bytes([7u8; 128], 0);
            let mut fast = slow.clone();

            for _ in 0..advance_to {
                slow.advance();
            }
            fast.advance_to(advance_to);

            assert_eq!(slow.index(), advance_to);
            assert_eq!(fast.index(), advance_to);
            assert_eq!(slow.as_bytes(), fast.as_bytes(), "Mismatch at index {advance_to}");
        }
    }

    #[test]
    fn advancing_from_an_export_point_converges() {
        let mut ratchet = Ratchet::from_bytes([3u8; 128], 0);
        ratchet.advance_to(500);

        let mut imported = Ratchet::from_bytes(*ratchet.as_bytes(), ratchet.index());

        ratchet.advance_to(1500);
        imported.advance_to(1500);

        assert_eq!(ratchet.as_bytes(), imported.as_bytes());
    }

    #[test]
    fn advancing_across_a_part_boundary() {
        let mut slow = Ratchet::from_bytes([1u8; 128], 250);
        let mut fast = slow.clone();

        for _ in 0..20 {
            slow.advance();
        }
        fast.advance_to(270);

        assert_eq!(slow.as_bytes(), fast.as_bytes());
        assert_eq!(slow.index(), 270);
    }
}
