//! Engine and HTTP server fixtures backed by a temporary data directory.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use tmsync::config::Config;
use tmsync::gateway::{HandlerState, create_router_with_state};
use tmsync::{Engine, EngineBuilder, EmbeddingProvider, StalePolicy};

#[derive(Clone)]
pub struct TestServerConfig {
    pub debounce: Duration,
    pub sweep_interval: Duration,
    pub stale_policy: StalePolicy,
    pub worker_id: String,
    pub provider: Option<Arc<dyn EmbeddingProvider>>,
}

impl Default for TestServerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(50),
            sweep_interval: Duration::from_secs(3600),
            stale_policy: StalePolicy::default(),
            worker_id: "test-worker".to_string(),
            provider: None,
        }
    }
}

impl TestServerConfig {
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    pub fn worker_id(mut self, worker_id: &str) -> Self {
        self.worker_id = worker_id.to_string();
        self
    }

    pub fn provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    fn to_config(&self, data_dir: &Path) -> Config {
        Config {
            data_dir: data_dir.to_path_buf(),
            debounce: self.debounce,
            sweep_interval: self.sweep_interval,
            retry_base: Duration::from_millis(20),
            retry_max: Duration::from_millis(500),
            stale_policy: self.stale_policy,
            worker_id: Some(self.worker_id.clone()),
            ..Config::default()
        }
    }
}

/// Starts an engine over `data_dir`.
pub async fn start_engine(config: &TestServerConfig, data_dir: &Path) -> anyhow::Result<Engine> {
    let mut builder = EngineBuilder::new(config.to_config(data_dir));
    if let Some(provider) = &config.provider {
        builder = builder.provider(Arc::clone(provider));
    }
    Ok(builder.start().await?)
}

pub struct TestServer {
    addr: SocketAddr,
    engine: Arc<Engine>,
    shutdown: Option<oneshot::Sender<()>>,
    _dir: TempDir,
}

impl TestServer {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Serves a fresh engine on an ephemeral port.
pub async fn spawn_test_server(config: TestServerConfig) -> anyhow::Result<TestServer> {
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(start_engine(&config, dir.path()).await?);
    let app = create_router_with_state(HandlerState::new(Arc::clone(&engine)));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            })
            .await;
    });

    Ok(TestServer {
        addr,
        engine,
        shutdown: Some(tx),
        _dir: dir,
    })
}
