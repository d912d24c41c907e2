// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! CRC-32C (Castagnoli), as mandated for the SCTP common header checksum by
//! <https://datatracker.ietf.org/doc/html/rfc9260#appendix-B>.

const POLYNOMIAL_REFLECTED: u32 = 0x82f6_3b78;

const TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut value = n as u32;
        let mut bit = 0;
        while bit < 8 {
            value = if value & 1 == 1 { (value >> 1) ^ POLYNOMIAL_REFLECTED } else { value >> 1 };
            bit += 1;
        }
        table[n] = value;
        n += 1;
    }
    table
};

/// Incremental CRC-32C computation.
pub(crate) struct Crc32c {
    state: u32,
}

impl Crc32c {
    pub fn new() -> Self {
        Self { state: !0 }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.state = data.iter().fold(self.state, |crc, &byte| {
            TABLE[((crc ^ u32::from(byte)) & 0xff) as usize] ^ (crc >> 8)
        });
    }

    pub fn finish(&self) -> u32 {
        !self.state
    }
}

/// Computes the checksum of a serialized SCTP packet, treating its checksum field (bytes 8 to
/// 11) as zero.
pub(crate) fn packet_checksum(packet: &[u8]) -> u32 {
    let mut crc = Crc32c::new();
    crc.update(&packet[..8]);
    crc.update(&[0; 4]);
    crc.update(&packet[12..]);
    crc.finish()
}
