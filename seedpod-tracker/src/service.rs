//! Tracker request handlers over the node registry.

use async_trait::async_trait;

use seedpod_core::protocol::{Operation, TRACKER_OPERATIONS};
use seedpod_core::{NodeRegistry, OpError, Payload, Request, Response, Service, TrackerCall};

use crate::maintenance::{self, MaintenancePolicy};

pub struct TrackerService {
    registry: NodeRegistry,
    maintenance: MaintenancePolicy,
}

impl TrackerService {
    pub fn new(maintenance: MaintenancePolicy) -> Self {
        Self {
            registry: NodeRegistry::new(),
            maintenance,
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    fn apply(&mut self, call: TrackerCall) -> Result<Payload, OpError> {
        match call {
            TrackerCall::Ping { message } => Ok(Payload::Text(format!("Received message: {}", message))),
            TrackerCall::Register { address, files } => {
                let count = files.len();
                self.registry.register(&address, files)?;
                tracing::info!(seeder = %address, files = count, "seeder registered");
                Ok(Payload::Text(format!("seeder {} registered", address)))
            }
            TrackerCall::Update { address, files } => {
                let count = files.len();
                self.registry.update(&address, files)?;
                tracing::info!(seeder = %address, files = count, "seeder catalog replaced");
                Ok(Payload::Text(format!("seeder {} updated", address)))
            }
            TrackerCall::Signout { address } => {
                self.registry.signout(&address)?;
                tracing::info!(seeder = %address, "seeder signed out");
                Ok(Payload::Text(format!("seeder {} signed out", address)))
            }
            TrackerCall::List => Ok(Payload::Listing(self.registry.list())),
            TrackerCall::Locate { file_id } => self.registry.owners(&file_id).map(Payload::Owners),
            TrackerCall::ReserveUpload { file_id, size } => self
                .registry
                .reserve_upload(&file_id, size)
                .map(Payload::Address),
        }
    }
}

#[async_trait]
impl Service for TrackerService {
    fn operations(&self) -> &'static [Operation] {
        TRACKER_OPERATIONS
    }

    async fn handle(&mut self, request: Request) -> Response {
        let result = TrackerCall::parse(request).and_then(|call| self.apply(call));
        if let Err(e) = &result {
            tracing::debug!(error = %e, "request rejected");
        }
        Response::from_result(result)
    }

    async fn on_idle(&mut self) {
        let report = maintenance::run_pass(&mut self.registry, &self.maintenance).await;
        if !report.removed.is_empty() || report.replicated > 0 || report.failed > 0 {
            tracing::info!(
                removed = ?report.removed,
                replicated = report.replicated,
                failed = report.failed,
                seeders = self.registry.len(),
                "maintenance pass"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedpod_core::protocol::{SeederCall, SEEDER_OPERATIONS};
    use seedpod_core::storage::Storage;
    use seedpod_core::transfer::{fetch_file, verify_file, NetworkSource};
    use seedpod_core::{CallPolicy, Catalog, Dispatcher, FileId, FileMetadata, PeerClient, Status};
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn service() -> TrackerService {
        TrackerService::new(MaintenancePolicy {
            seeder_port: 1,
            ping: CallPolicy::single_attempt(Duration::from_millis(100)),
            replicate: CallPolicy::single_attempt(Duration::from_millis(100)),
        })
    }

    fn one_file(data: &str, name: &str) -> Catalog {
        let mut c = Catalog::new();
        c.insert(
            FileId::of_content(data.as_bytes()),
            FileMetadata::new(name, data.len() as u64),
        );
        c
    }

    async fn send(s: &mut TrackerService, req: Request) -> Response {
        s.handle(req).await
    }

    #[tokio::test]
    async fn ping_echoes_message() {
        let mut s = service();
        let resp = send(&mut s, Request::ping("hello")).await;
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.message, Payload::Text("Received message: hello".into()));
    }

    #[tokio::test]
    async fn register_twice_is_rejected() {
        let mut s = service();
        let a = Ipv4Addr::new(10, 0, 0, 1);
        assert!(send(&mut s, Request::register(a, Catalog::new())).await.is_ok());
        let again = send(&mut s, Request::register(a, Catalog::new())).await;
        assert_eq!(again.status, Status::BadRequest);
    }

    #[tokio::test]
    async fn update_requires_registration() {
        let mut s = service();
        let a = Ipv4Addr::new(10, 0, 0, 1);
        let resp = send(&mut s, Request::update(a, Catalog::new())).await;
        assert_eq!(resp.status, Status::BadRequest);

        send(&mut s, Request::register(a, Catalog::new())).await;
        assert!(send(&mut s, Request::signout(a)).await.is_ok());
        let resp = send(&mut s, Request::update(a, one_file("x", "x"))).await;
        assert_eq!(resp.status, Status::BadRequest);
        assert_eq!(send(&mut s, Request::signout(a)).await.status, Status::BadRequest);
    }

    #[tokio::test]
    async fn malformed_address_is_400() {
        let mut s = service();
        let req = Request::new("SEEDER_REGISTER")
            .with("address", "10.0.0")
            .with("files", Catalog::new());
        assert_eq!(send(&mut s, req).await.status, Status::BadRequest);
        let req = Request::new("SEEDER_REGISTER").with("address", "10.0.0.1");
        assert_eq!(send(&mut s, req).await.status, Status::BadRequest);
    }

    #[tokio::test]
    async fn empty_list_is_ok() {
        let mut s = service();
        let resp = send(&mut s, Request::list()).await;
        assert_eq!(resp.status, Status::Ok);
        assert_eq!(resp.message, Payload::Listing(Catalog::new()));
    }

    #[tokio::test]
    async fn locate_reports_all_owners() {
        let mut s = service();
        let id = FileId::of_content(b"shared");
        assert_eq!(send(&mut s, Request::locate(&id)).await.status, Status::NotFound);

        send(&mut s, Request::register(Ipv4Addr::new(10, 0, 0, 1), one_file("shared", "first.txt"))).await;
        send(&mut s, Request::register(Ipv4Addr::new(10, 0, 0, 2), Catalog::new())).await;
        send(&mut s, Request::register(Ipv4Addr::new(10, 0, 0, 3), one_file("shared", "second.txt"))).await;

        let owners = send(&mut s, Request::locate(&id))
            .await
            .into_result()
            .unwrap()
            .into_owners()
            .unwrap();
        assert_eq!(owners.file_name, "first.txt");
        assert_eq!(owners.size, 6);
        assert_eq!(
            owners.owners,
            vec![Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 3)]
        );
    }

    #[tokio::test]
    async fn upload_goes_to_least_loaded() {
        let mut s = service();
        send(&mut s, Request::register(Ipv4Addr::new(10, 0, 0, 1), one_file("aaaaaaaa", "a"))).await;
        send(&mut s, Request::register(Ipv4Addr::new(10, 0, 0, 2), one_file("bb", "b"))).await;
        let fresh = FileId::of_content(b"fresh");
        let target = send(&mut s, Request::reserve_upload(&fresh, 5).unwrap())
            .await
            .into_result()
            .unwrap()
            .into_address()
            .unwrap();
        assert_eq!(target, Ipv4Addr::new(10, 0, 0, 2));

        let taken = FileId::of_content(b"bb");
        let resp = send(&mut s, Request::reserve_upload(&taken, 2).unwrap()).await;
        assert_eq!(resp.status, Status::BadRequest);
    }

    /// Seeder serving range reads from a storage directory and logging each one.
    struct ServingSeeder {
        address: Ipv4Addr,
        storage: Storage,
        reads: Arc<Mutex<Vec<(Ipv4Addr, u64, u64)>>>,
    }

    #[async_trait]
    impl Service for ServingSeeder {
        fn operations(&self) -> &'static [Operation] {
            SEEDER_OPERATIONS
        }

        async fn handle(&mut self, request: Request) -> Response {
            let result = match SeederCall::parse(request) {
                Ok(SeederCall::Ping { message }) => Ok(Payload::Text(message)),
                Ok(SeederCall::ReadRange {
                    file_id,
                    offset,
                    count,
                }) => {
                    self.reads.lock().unwrap().push((self.address, offset, count));
                    self.storage.read_range(&file_id, offset, count).await.map(|data| {
                        let count = data.len() as u64;
                        Payload::Chunk { data, count }
                    })
                }
                Ok(_) => Err(OpError::Internal("unsupported".into())),
                Err(e) => Err(e),
            };
            Response::from_result(result)
        }
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(17).wrapping_add(seed)).collect()
    }

    #[tokio::test]
    async fn single_owner_download_across_a_live_network() {
        let tracker = Dispatcher::bind("127.0.0.1:0".parse().unwrap(), None)
            .await
            .unwrap();
        let tracker_addr = tracker.local_addr().unwrap();
        let mut tracker_service = service();
        tokio::spawn(async move { tracker.run(&mut tracker_service).await });

        let policy = CallPolicy::single_attempt(Duration::from_secs(2));
        let reads = Arc::new(Mutex::new(Vec::new()));
        let mut port = 0;
        let mut held = Vec::new();
        for (last, name, len) in [(1u8, "a.bin", 5000usize), (2, "b.bin", 3000), (3, "c.bin", 1000)] {
            let address = Ipv4Addr::new(127, 0, 0, last);
            let dir = tempfile::tempdir().unwrap();
            let data = pattern(len, last);
            std::fs::write(dir.path().join(name), &data).unwrap();
            let storage = Storage::open(dir.path()).await.unwrap();
            let catalog = storage.catalog();

            let dispatcher = Dispatcher::bind(SocketAddr::from((address, port)), None)
                .await
                .unwrap();
            port = dispatcher.local_addr().unwrap().port();
            let mut seeder = ServingSeeder {
                address,
                storage,
                reads: reads.clone(),
            };
            tokio::spawn(async move { dispatcher.run(&mut seeder).await });

            PeerClient::new(tracker_addr, policy)
                .call_ok(&Request::register(address, catalog))
                .await
                .unwrap();
            held.push((dir, data));
        }

        let mut client = PeerClient::new(tracker_addr, policy);
        let listing = client.call_ok(&Request::list()).await.unwrap().into_listing().unwrap();
        assert_eq!(listing.len(), 3);

        let a = &held[0].1;
        let id = FileId::of_content(a);
        let owners = client
            .call_ok(&Request::locate(&id))
            .await
            .unwrap()
            .into_owners()
            .unwrap();
        assert_eq!(owners.owners, vec![Ipv4Addr::LOCALHOST]);
        assert_eq!(owners.size, 5000);

        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join(&owners.file_name);
        let mut source = NetworkSource::new(port, policy);
        let n = fetch_file(&mut source, &id, owners.size, &owners.owners, &dest)
            .await
            .unwrap();
        assert_eq!(n, 5000);
        verify_file(&dest, &id).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), *a);
        assert_eq!(*reads.lock().unwrap(), vec![(Ipv4Addr::LOCALHOST, 0, 8192)]);
    }
}
