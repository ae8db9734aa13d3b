/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{fmt, net::Ipv4Addr};

/// The three leading octets shared by every generated address.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct AddressPrefix(pub [u8; 3]);
impl Default for AddressPrefix {
    fn default() -> Self {
        AddressPrefix([169, 1, 245])
    }
}
impl AddressPrefix {
    /// Draws the final octet uniformly from `0..=255`.
    pub fn random_address<R: Rng>(&self, rng: &mut R) -> Address {
        let [a, b, c] = self.0;
        Address(Ipv4Addr::new(a, b, c, rng.gen()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(Ipv4Addr);
impl Address {
    pub fn octets(&self) -> [u8; 4] {
        self.0.octets()
    }
}
impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Address(ip)
    }
}

/// An ordered batch of addresses generated for one iteration. Duplicates are allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBatch(Vec<Address>);
impl AddressBatch {
    pub fn generate<R: Rng>(rng: &mut R, prefix: &AddressPrefix, size: usize) -> Self {
        AddressBatch(
            (0..size)
                .map(|_| prefix.random_address(rng))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Address> {
        self.0.iter()
    }
}
impl From<Vec<Address>> for AddressBatch {
    fn from(addresses: Vec<Address>) -> Self {
        AddressBatch(addresses)
    }
}
impl IntoIterator for AddressBatch {
    type Item = Address;
    type IntoIter = std::vec::IntoIter<Address>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn batch_has_requested_size_and_fixed_prefix() {
        let mut rng = StdRng::seed_from_u64(1337);
        let batch = AddressBatch::generate(&mut rng, &AddressPrefix::default(), 100);

        assert_eq!(batch.len(), 100);
        for address in batch.iter() {
            let [a, b, c, _] = address.octets();
            assert_eq!([a, b, c], [169, 1, 245]);
            assert!(address.to_string().starts_with("169.1.245."));

            let last = address
                .to_string()
                .rsplit('.')
                .next()
                .and_then(|s| s.parse::<u16>().ok());
            assert!(matches!(last, Some(n) if n <= 255));
        }
    }

    #[test]
    fn final_octet_covers_the_full_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let batch = AddressBatch::generate(&mut rng, &AddressPrefix::default(), 20_000);

        let finals = batch.iter().map(|a| a.octets()[3]).unique().count();
        assert_eq!(finals, 256);
    }

    #[test]
    fn batches_are_generated_independently() {
        let mut rng = StdRng::seed_from_u64(42);
        let first = AddressBatch::generate(&mut rng, &AddressPrefix::default(), 100);
        let second = AddressBatch::generate(&mut rng, &AddressPrefix::default(), 100);
        assert_ne!(first, second);
    }

    #[test]
    fn custom_prefix_is_respected() {
        let mut rng = StdRng::seed_from_u64(0);
        let prefix = AddressPrefix([10, 0, 3]);
        let address = prefix.random_address(&mut rng);
        assert!(address.to_string().starts_with("10.0.3."));
    }
}
