//! Shared fixtures for mesh-dependent tests.
//!
//! The kameo actor swarm is a process-global, so every test shares one
//! mesh bootstrapped on first use. Tests must register actors under
//! unique DHT names (e.g. suffixed with a uuid) to avoid interference.

pub(crate) mod fixtures {
    use crate::remote::mesh::{MeshConfig, MeshHandle, bootstrap_mesh};
    use std::sync::OnceLock;
    use tokio::sync::OnceCell;

    // `#[tokio::test]` runtimes die with their test, which would kill the
    // swarm event loop for every later test. The mesh therefore lives on
    // a dedicated runtime that survives the whole process.
    static MESH_RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

    fn mesh_runtime() -> &'static tokio::runtime::Runtime {
        MESH_RUNTIME.get_or_init(|| {
            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .thread_name("test-mesh-rt")
                .build()
                .expect("create persistent mesh runtime")
        })
    }

    static TEST_MESH: OnceCell<MeshHandle> = OnceCell::const_new();

    /// The process-wide test mesh, bootstrapped on first call.
    pub async fn get_test_mesh() -> &'static MeshHandle {
        TEST_MESH
            .get_or_init(|| async {
                mesh_runtime()
                    .spawn(async {
                        let config = MeshConfig {
                            listen: Some("/ip4/127.0.0.1/tcp/0".to_string()),
                            mdns: false,
                            seed_peers: vec![],
                        };
                        bootstrap_mesh(&config)
                            .await
                            .expect("test mesh bootstrap failed")
                    })
                    .await
                    .expect("mesh bootstrap task panicked")
            })
            .await
    }
}
