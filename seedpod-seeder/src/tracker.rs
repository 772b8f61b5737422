//! Outbound calls from a seeder to the tracker.

use std::net::{Ipv4Addr, SocketAddr};

use seedpod_core::{CallPolicy, Catalog, OpError, PeerClient, Request};

pub struct TrackerLink {
    client: PeerClient,
}

impl TrackerLink {
    pub fn new(addr: SocketAddr, policy: CallPolicy) -> Self {
        Self {
            client: PeerClient::new(addr, policy),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.client.addr()
    }

    pub async fn register(&mut self, address: Ipv4Addr, files: Catalog) -> Result<(), OpError> {
        self.client.call_ok(&Request::register(address, files)).await?;
        Ok(())
    }

    /// Replace this seeder's catalog on the tracker.
    pub async fn update(&mut self, address: Ipv4Addr, files: Catalog) -> Result<(), OpError> {
        self.client.call_ok(&Request::update(address, files)).await?;
        Ok(())
    }

    pub async fn signout(&mut self, address: Ipv4Addr) -> Result<(), OpError> {
        self.client.call_ok(&Request::signout(address)).await?;
        Ok(())
    }
}
