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

use std::cmp::Ordering;
use std::fmt;

/// Declares a wrapping sequence number type whose ordering follows serial number arithmetic, see
/// <https://datatracker.ietf.org/doc/html/rfc1982#section-3.2>.
macro_rules! serial_number {
    ($(#[$meta:meta])* $name:ident, $int:ty) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
        pub struct $name(pub $int);

        impl $name {
            /// Returns the number of steps from `self` forward to `other`, which must not be
            /// behind `self`.
            pub fn distance_to(self, other: $name) -> $int {
                other.0.wrapping_sub(self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                const HALF: $int = 1 << (<$int>::BITS - 1);
                let (a, b) = (self.0, other.0);
                if a == b {
                    Ordering::Equal
                } else if b.wrapping_sub(a) < HALF {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
        }

        impl std::ops::Add<$int> for $name {
            type Output = $name;

            #[inline]
            fn add(self, rhs: $int) -> $name {
                $name(self.0.wrapping_add(rhs))
            }
        }

        impl std::ops::Sub<$int> for $name {
            type Output = $name;

            #[inline]
            fn sub(self, rhs: $int) -> $name {
                $name(self.0.wrapping_sub(rhs))
            }
        }

        impl std::ops::AddAssign<$int> for $name {
            fn add_assign(&mut self, rhs: $int) {
                self.0 = self.0.wrapping_add(rhs);
            }
        }
    };
}

serial_number!(
    /// Transmission Sequence Number (TSN), one per DATA chunk and shared by all streams.
    Tsn,
    u32
);

serial_number!(
    /// Stream Sequence Number (SSN), counted per outgoing stream for ordered messages.
    Ssn,
    u16
);
