//! In-process collector for tests.

use std::net::SocketAddr;

use tempfile::TempDir;
use tokio::sync::oneshot;
use vibelog_server::{CollectorConfig, CollectorServer};

/// A collector serving on an ephemeral port until dropped.
pub(crate) struct TestCollector {
    pub(crate) url: String,
    pub(crate) server: CollectorServer,
    shutdown: Option<oneshot::Sender<()>>,
    _dir: TempDir,
}

impl Drop for TestCollector {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub(crate) async fn start_collector() -> TestCollector {
    let dir = TempDir::new().unwrap();
    let config =
        CollectorConfig::new(dir.path()).with_bind_addr(SocketAddr::from(([127, 0, 0, 1], 0)));
    let server = CollectorServer::new(config).unwrap();
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (tx, rx) = oneshot::channel::<()>();
    let serving = server.clone();
    tokio::spawn(async move {
        let _ = serving
            .serve_on(listener, async move {
                let _ = rx.await;
            })
            .await;
    });

    TestCollector {
        url: format!("http://{addr}"),
        server,
        shutdown: Some(tx),
        _dir: dir,
    }
}

/// A URL nobody listens on.
pub(crate) fn unused_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    format!("http://127.0.0.1:{port}")
}
