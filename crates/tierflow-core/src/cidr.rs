//! CIDR partitioning
//!
//! Splits a parent network into equally sized subnet blocks.

use crate::error::TopologyError;
use ipnet::{IpNet, IpSubnets};

/// An address range: base address plus prefix length
pub type NetworkBlock = IpNet;

/// Parse a CIDR, rejecting addresses with host bits set
pub fn parse_block(input: &str) -> Result<NetworkBlock, TopologyError> {
    let block: NetworkBlock = input.trim().parse().map_err(|e: ipnet::AddrParseError| {
        TopologyError::InvalidCidr {
            input: input.to_string(),
            reason: e.to_string(),
        }
    })?;
    if block != block.trunc() {
        return Err(TopologyError::InvalidCidr {
            input: input.to_string(),
            reason: format!("host bits set (did you mean {}?)", block.trunc()),
        });
    }
    Ok(block)
}

/// Every block of `new_prefix_len` contained in `parent`, in ascending
/// address order
///
/// The sequence is lazy, finite and restartable (clone it to iterate again).
/// Host bits of `parent` are ignored.
pub fn partition(parent: NetworkBlock, new_prefix_len: u8) -> Result<Partition, TopologyError> {
    let parent = parent.trunc();

    if new_prefix_len <= parent.prefix_len() {
        return Err(TopologyError::InvalidPrefix {
            parent,
            requested: new_prefix_len,
            reason: format!(
                "must be longer than the parent prefix /{}",
                parent.prefix_len()
            ),
        });
    }
    if new_prefix_len > parent.max_prefix_len() {
        return Err(TopologyError::InvalidPrefix {
            parent,
            requested: new_prefix_len,
            reason: format!(
                "exceeds the address width of {} bits",
                parent.max_prefix_len()
            ),
        });
    }

    let blocks = parent
        .subnets(new_prefix_len)
        .map_err(|e| TopologyError::InvalidPrefix {
            parent,
            requested: new_prefix_len,
            reason: e.to_string(),
        })?;

    Ok(Partition {
        parent,
        new_prefix_len,
        blocks,
    })
}

/// Lazy sequence returned by [`partition`]
#[derive(Debug, Clone)]
pub struct Partition {
    parent: NetworkBlock,
    new_prefix_len: u8,
    blocks: IpSubnets,
}

impl Partition {
    pub fn parent(&self) -> NetworkBlock {
        self.parent
    }

    pub fn prefix_len(&self) -> u8 {
        self.new_prefix_len
    }

    /// Total number of blocks, `2^(new_prefix_len - parent_prefix_len)`.
    /// `None` when the count does not fit in a `u128` (`::/0` into `/128`).
    pub fn block_count(&self) -> Option<u128> {
        let bits = u32::from(self.new_prefix_len - self.parent.prefix_len());
        1u128.checked_shl(bits)
    }
}

impl Iterator for Partition {
    type Item = NetworkBlock;

    fn next(&mut self) -> Option<Self::Item> {
        self.blocks.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> NetworkBlock {
        s.parse().unwrap()
    }

    #[test]
    fn test_partition_slash16_into_slash24() {
        let blocks: Vec<_> = partition(net("10.0.0.0/16"), 24).unwrap().collect();

        assert_eq!(blocks.len(), 256);
        assert_eq!(blocks[0], net("10.0.0.0/24"));
        assert_eq!(blocks[1], net("10.0.1.0/24"));
        assert_eq!(blocks[255], net("10.0.255.0/24"));
    }

    #[test]
    fn test_blocks_are_disjoint_subsets_in_order() {
        let parent = net("172.16.0.0/20");
        let partition = partition(parent, 23).unwrap();
        let count = partition.block_count().unwrap();
        let blocks: Vec<_> = partition.collect();

        assert_eq!(blocks.len() as u128, count);
        assert_eq!(count, 8);
        for pair in blocks.windows(2) {
            assert!(pair[0].broadcast() < pair[1].network());
        }
        for block in &blocks {
            assert!(parent.contains(block));
            assert_eq!(block.prefix_len(), 23);
        }
    }

    #[test]
    fn test_partition_is_restartable() {
        let partition = partition(net("10.0.0.0/22"), 24).unwrap();
        let first: Vec<_> = partition.clone().collect();
        let second: Vec<_> = partition.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_partition_ipv6() {
        let partition = partition(net("2001:db8::/56"), 64).unwrap();
        assert_eq!(partition.block_count(), Some(256));
        let first = partition.clone().next().unwrap();
        assert_eq!(first, net("2001:db8::/64"));
    }

    #[test]
    fn test_host_bits_ignored() {
        let first = partition(net("10.0.7.9/16"), 24).unwrap().next().unwrap();
        assert_eq!(first, net("10.0.0.0/24"));
    }

    #[test]
    fn test_prefix_not_longer_than_parent() {
        for requested in [16, 8] {
            assert!(matches!(
                partition(net("10.0.0.0/16"), requested),
                Err(TopologyError::InvalidPrefix { .. })
            ));
        }
    }

    #[test]
    fn test_prefix_overflow() {
        assert!(matches!(
            partition(net("10.0.0.0/16"), 33),
            Err(TopologyError::InvalidPrefix { requested: 33, .. })
        ));
        assert!(partition(net("2001:db8::/64"), 129).is_err());
    }

    #[test]
    fn test_block_count_overflow() {
        let partition = partition(net("::/0"), 128).unwrap();
        assert_eq!(partition.block_count(), None);
    }

    #[test]
    fn test_parse_block() {
        assert_eq!(parse_block(" 10.0.0.0/16 ").unwrap(), net("10.0.0.0/16"));
        assert!(matches!(
            parse_block("10.0.0.1/16"),
            Err(TopologyError::InvalidCidr { .. })
        ));
        assert!(matches!(
            parse_block("not-a-cidr"),
            Err(TopologyError::InvalidCidr { .. })
        ));
    }

    #[test]
    fn test_top_of_address_space() {
        let blocks: Vec<_> = partition(net("255.255.255.0/24"), 26).unwrap().collect();
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[3], net("255.255.255.192/26"));
    }
}
