use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use diaphantium_client::{cache::DiskCache, types::ScriptDocument};
use diaphantium_core::{
    bootstrap,
    discovery::DiscoveryConfig,
    host::{HostObject, HostValue, ObjectPrototype},
    ClickOutcome, DiscoveryError, EngineConfig, EngineOptions, PacketEngine, Runtime,
    ScriptDiscovery, ScriptFetcher, ScriptLocator, StaticScripts,
};
use tempfile::tempdir;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    time::Instant,
};

const BUNDLE: &str = concat!(
    r#"t.prototype.toString=function(){return"ConfigureSupplyMessage(type="+this.ab3+", count="+this.s1+")"};"#,
    "\n",
    r#"e.prototype.toString=function(){return"StopCooldownMessage(supplyType="+this.c1.toString()+")"};"#,
);

/// Reports the bundle only from the `ready_on`-th call on.
struct LateBundle {
    calls: AtomicU32,
    ready_on: u32,
}

impl LateBundle {
    fn new(ready_on: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            ready_on,
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptLocator for LateBundle {
    async fn script_sources(&self) -> Result<Vec<String>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut sources = vec!["https://game.test/vendor.js".to_string()];
        if call >= self.ready_on {
            sources.push("https://game.test/static/js/main.abc.js".to_string());
        }
        Ok(sources)
    }
}

struct FixedFetcher(&'static str);

#[async_trait]
impl ScriptFetcher for FixedFetcher {
    async fn fetch_text(&self, _url: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

struct FailingFetcher;

#[async_trait]
impl ScriptFetcher for FailingFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        Err(anyhow!("connection refused for {url}"))
    }
}

fn discovery(locator: Arc<dyn ScriptLocator>, fetcher: Arc<dyn ScriptFetcher>) -> ScriptDiscovery {
    ScriptDiscovery::new(locator, fetcher, DiscoveryConfig::default())
}

#[tokio::test(start_paused = true)]
async fn bundle_present_on_first_look_needs_no_wait() {
    let locator = Arc::new(LateBundle::new(1));
    let discovery = discovery(locator.clone(), Arc::new(FixedFetcher(BUNDLE)));

    let start = Instant::now();
    let url = discovery.locate().await.unwrap();
    assert_eq!(url, "https://game.test/static/js/main.abc.js");
    assert_eq!(locator.calls(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn late_bundle_is_found_by_the_single_retry() {
    let locator = Arc::new(LateBundle::new(2));
    let discovery = discovery(locator.clone(), Arc::new(FixedFetcher(BUNDLE)));

    let start = Instant::now();
    let fields = discovery.discover().await.unwrap();
    assert_eq!(fields.supply_field, "s1");
    assert_eq!(fields.cooldown_field, "c1");
    assert_eq!(locator.calls(), 2);
    assert!(start.elapsed() >= Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn retries_are_bounded() {
    let locator = Arc::new(LateBundle::new(u32::MAX));
    let discovery = discovery(locator.clone(), Arc::new(FixedFetcher(BUNDLE)));

    let error = discovery.locate().await.unwrap_err();
    assert!(matches!(
        error,
        DiscoveryError::ScriptNotFound { attempts: 2, .. }
    ));
    assert_eq!(locator.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn configured_attempts_are_honoured() {
    let locator = Arc::new(LateBundle::new(u32::MAX));
    let config = DiscoveryConfig {
        max_attempts: 5,
        retry_interval_ms: 10,
        ..DiscoveryConfig::default()
    };
    let discovery = ScriptDiscovery::new(locator.clone(), Arc::new(FixedFetcher(BUNDLE)), config);

    let start = Instant::now();
    assert!(discovery.locate().await.is_err());
    assert_eq!(locator.calls(), 5);
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[tokio::test]
async fn fetch_failure_names_the_url() {
    let discovery = discovery(
        Arc::new(StaticScripts::new(["https://game.test/static/js/main.js"])),
        Arc::new(FailingFetcher),
    );

    match discovery.discover().await {
        Err(DiscoveryError::Fetch { url, source }) => {
            assert_eq!(url, "https://game.test/static/js/main.js");
            assert!(source.to_string().contains("connection refused"));
        }
        other => panic!("expected fetch error, got {other:?}"),
    }
}

#[tokio::test]
async fn bundle_without_call_sites_is_an_extract_error() {
    let discovery = discovery(
        Arc::new(StaticScripts::new(["/static/js/main.js"])),
        Arc::new(FixedFetcher("console.log('nothing here')")),
    );
    assert!(matches!(
        discovery.discover().await,
        Err(DiscoveryError::Extract(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_discovery_leaves_engine_inert() {
    let prototype = ObjectPrototype::new();
    let engine = PacketEngine::new(prototype.clone(), EngineOptions::default()).with_discovery(
        discovery(Arc::new(StaticScripts::default()), Arc::new(FixedFetcher(BUNDLE))),
    );

    assert!(!engine.init().await);
    assert!(!engine.is_installed());
    assert!(prototype.observed_fields().is_empty());
    assert_eq!(engine.click_supply("1"), ClickOutcome::Inert);
    assert!(!engine.is_ready("1"));
    assert!(!engine.is_ready("5"));
}

/// Builds a bundle whose fields are named after `build`.
fn bundle_for(build: &str) -> String {
    format!(
        concat!(
            r#"t.prototype.toString=function(){{return"ConfigureSupplyMessage(type="+this.ab3+", count="+this.s_{build}+")"}};"#,
            "\n",
            r#"e.prototype.toString=function(){{return"StopCooldownMessage(supplyType="+this.c_{build}.toString()+")"}};"#,
        ),
        build = build
    )
}

/// A local game host. The `n`-th request for the page gets `pages[n]` (the
/// last one once exhausted); `/static/js/<build>.js` gets that build's
/// bundle.
struct GameServer {
    base: String,
    page_requests: Arc<AtomicU32>,
}

impl GameServer {
    async fn start(pages: Vec<&'static str>) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let page_requests = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&page_requests);
        let pages = Arc::new(pages);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let counter = Arc::clone(&counter);
                let pages = Arc::clone(&pages);
                tokio::spawn(async move {
                    let _ = respond(stream, &pages, &counter).await;
                });
            }
        });

        Self {
            base,
            page_requests,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn page_requests(&self) -> u32 {
        self.page_requests.load(Ordering::SeqCst)
    }
}

async fn respond(stream: TcpStream, pages: &[&str], page_requests: &AtomicU32) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).await? == 0 || header == "\r\n" {
            break;
        }
    }

    let path = request_line.split_whitespace().nth(1).unwrap_or("/");
    let body = match path
        .strip_prefix("/static/js/")
        .and_then(|name| name.strip_suffix(".js"))
    {
        Some(build) => bundle_for(build),
        None => {
            let seen = page_requests.fetch_add(1, Ordering::SeqCst) as usize;
            pages[seen.min(pages.len() - 1)].to_string()
        }
    };

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let mut stream = reader.into_inner();
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

const PAGE_WITHOUT_BUNDLE: &str = r#"<html><script src="/vendor.js"></script></html>"#;
const PAGE_BUILD_A: &str = r#"<html><script src="/static/js/a.js"></script></html>"#;
const PAGE_BUILD_B: &str = r#"<html><script src="/static/js/b.js"></script></html>"#;

fn runtime_in(cache_dir: &std::path::Path) -> Runtime {
    let mut config = EngineConfig::default();
    config.client.cache_dir = Some(cache_dir.to_path_buf());
    config.discovery.retry_interval_ms = 10;
    bootstrap(config).expect("bootstrap succeeds")
}

#[tokio::test]
async fn page_retry_sees_late_injected_bundle() {
    let server = GameServer::start(vec![PAGE_WITHOUT_BUNDLE, PAGE_BUILD_A]).await;
    let dir = tempdir().expect("tempdir");
    let runtime = runtime_in(dir.path());

    let fields = runtime
        .page_discovery(&server.url("/play/"))
        .discover()
        .await
        .expect("second look finds the bundle");
    assert_eq!(fields.supply_field, "s_a");
    assert_eq!(fields.cooldown_field, "c_a");
    assert_eq!(server.page_requests(), 2);
}

#[tokio::test]
async fn redeployed_game_yields_new_fields() {
    let server = GameServer::start(vec![PAGE_BUILD_A, PAGE_BUILD_B]).await;
    let dir = tempdir().expect("tempdir");
    let page_url = server.url("/play/");

    let first = runtime_in(dir.path())
        .page_discovery(&page_url)
        .discover()
        .await
        .unwrap();
    let second = runtime_in(dir.path())
        .page_discovery(&page_url)
        .discover()
        .await
        .unwrap();

    assert_eq!(first.supply_field, "s_a");
    assert_eq!(second.supply_field, "s_b");
    assert_eq!(second.cooldown_field, "c_b");
    assert_eq!(server.page_requests(), 2);
}

#[tokio::test]
async fn engine_initialises_from_live_page_and_cached_bundle() {
    let server = GameServer::start(vec![PAGE_BUILD_A]).await;
    let dir = tempdir().expect("tempdir");
    let page_url = server.url("/play/");
    let bundle_url = server.url("/static/js/a.js");

    // A cached copy of the content-hashed bundle wins over the network.
    DiskCache::new(dir.path())
        .store(
            &DiskCache::file_name_for(&bundle_url),
            ScriptDocument {
                url: bundle_url.clone(),
                text: BUNDLE.to_string(),
            },
        )
        .await
        .unwrap();

    let runtime = runtime_in(dir.path());
    let prototype = ObjectPrototype::new();
    let engine = runtime.engine(prototype.clone(), &page_url);
    assert!(engine.init().await);
    assert!(engine.init().await, "second init is a no-op");
    assert_eq!(server.page_requests(), 1);
    assert_eq!(engine.fields().map(|fields| fields.supply_field), Some("s1".to_string()));

    let object = HostObject::new(&prototype).with("fire", HostValue::function(|_| {}));
    object.set("s1", "DOUBLE_DAMAGE");
    assert_eq!(engine.click_supply("3"), ClickOutcome::Dispatched);
    assert!(!engine.is_ready("3"));
}
