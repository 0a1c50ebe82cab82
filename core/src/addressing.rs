use crate::error::{Result, SimError};
use crate::network::{DeviceId, Topology};
use std::net::Ipv4Addr;

/// Hands out consecutive host addresses from one IPv4 subnet.
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    network: u32,
    prefix_len: u8,
    next_host: u32,
}

impl AddressAllocator {
    pub fn new(base: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if !(1..=30).contains(&prefix_len) {
            return Err(SimError::InvalidConfig(format!(
                "prefix length /{prefix_len} leaves no usable hosts"
            )));
        }
        let mask = u32::MAX << (32 - prefix_len);
        Ok(Self {
            network: u32::from(base) & mask,
            prefix_len,
            next_host: 1,
        })
    }

    fn host_capacity(&self) -> u32 {
        // Excludes the network and broadcast addresses.
        (1u32 << (32 - self.prefix_len)) - 2
    }

    pub fn next_address(&mut self) -> Result<Ipv4Addr> {
        if self.next_host > self.host_capacity() {
            return Err(SimError::InvalidConfig(format!(
                "subnet {}/{} is exhausted",
                Ipv4Addr::from(self.network),
                self.prefix_len
            )));
        }
        let address = Ipv4Addr::from(self.network | self.next_host);
        self.next_host += 1;
        Ok(address)
    }

    /// Assigns the device's logical address; all of its links share it.
    pub fn assign(&mut self, topology: &mut Topology, device: DeviceId) -> Result<Ipv4Addr> {
        topology.device(device)?;
        let address = self.next_address()?;
        topology.set_address(device, address)?;
        Ok(address)
    }
}
