use entitlement_rs::api::{ApiServer, AppState};
use entitlement_rs::clock::SystemClock;
use entitlement_rs::config::{Config, StorageConfig};
use entitlement_rs::db;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Set to run against an already deployed service instead of an in-process one
pub const BASE_URL_VAR: &str = "ENTITLEMENT_E2E_URL";

/// Test environment configuration
pub struct TestEnv {
    pub base_url: String,
    /// True when the service runs inside this test process
    pub in_process: bool,
    _db_dir: Option<TempDir>,
    _server: Option<JoinHandle<std::io::Result<()>>>,
}

impl TestEnv {
    /// Use `ENTITLEMENT_E2E_URL` if set, otherwise boot a server on a free port
    pub async fn start() -> Result<Self, String> {
        if let Ok(base_url) = std::env::var(BASE_URL_VAR) {
            return Ok(Self {
                base_url: base_url.trim_end_matches('/').to_string(),
                in_process: false,
                _db_dir: None,
                _server: None,
            });
        }

        let dir = tempfile::tempdir().map_err(|e| format!("Failed to create temp dir: {}", e))?;
        let config = Config {
            storage: StorageConfig {
                database_url: format!("sqlite://{}", dir.path().join("e2e.db").display()),
                ..StorageConfig::default()
            },
            ..Config::default()
        };

        let pool = db::connect(&config.storage)
            .await
            .map_err(|e| format!("Failed to open database: {}", e))?;
        db::init_schema(&pool)
            .await
            .map_err(|e| format!("Failed to create schema: {}", e))?;

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| format!("Failed to bind: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| format!("Failed to read local addr: {}", e))?;

        let state = Arc::new(AppState::new(pool, &config, Arc::new(SystemClock)));
        let server = ApiServer::new(state, addr.to_string());
        let handle = tokio::spawn(async move { server.serve(listener).await });

        let env = Self {
            base_url: format!("http://{}", addr),
            in_process: true,
            _db_dir: Some(dir),
            _server: Some(handle),
        };
        env.wait_for_service(10).await?;
        Ok(env)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Wait for service to be ready
    pub async fn wait_for_service(&self, timeout_secs: u64) -> Result<(), String> {
        let client = reqwest::Client::new();
        let health_url = self.url("/health");
        let start = std::time::Instant::now();

        loop {
            if start.elapsed().as_secs() > timeout_secs {
                return Err(format!("Timeout waiting for service: {}", health_url));
            }

            match client.get(&health_url).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                _ => sleep(Duration::from_millis(100)).await,
            }
        }
    }
}

/// Test result helper
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub duration: Duration,
}

impl TestResult {
    pub fn success(name: String, duration: Duration) -> Self {
        Self {
            name,
            passed: true,
            message: "✅ Test passed".to_string(),
            duration,
        }
    }

    pub fn failure(name: String, message: String, duration: Duration) -> Self {
        Self {
            name,
            passed: false,
            message: format!("❌ Test failed: {}", message),
            duration,
        }
    }

    pub fn print(&self) {
        println!("\n{}", "=".repeat(80));
        println!("📝 Test: {}", self.name);
        println!("⏱️  Duration: {:?}", self.duration);
        println!("{}", self.message);
        println!("{}", "=".repeat(80));
    }
}

/// Unique user id so runs against a shared deployment do not collide
pub fn generate_test_user(prefix: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{}_{}", prefix, nanos)
}
