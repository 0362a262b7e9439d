use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pipeline_engine::{
    BrowserAutomation, BrowserError, BrowserTokens, ClientFactory, ClientSettings,
    EscalationSettings, FailureKind, FetchEscalationChain, FetchTier, ProxySwitch,
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct FakeBrowser {
    tokens: Option<BrowserTokens>,
    content: Option<String>,
    token_calls: AtomicUsize,
    content_calls: AtomicUsize,
    selectors: Mutex<Vec<Option<String>>>,
}

impl FakeBrowser {
    fn solving(user_agent: &str) -> Self {
        Self {
            tokens: Some(BrowserTokens {
                user_agent: user_agent.to_string(),
                cookies: vec![("cf_clearance".to_string(), "solved".to_string())],
            }),
            content: Some("<html>rendered</html>".to_string()),
            ..Self::default()
        }
    }

    fn token_calls(&self) -> usize {
        self.token_calls.load(Ordering::SeqCst)
    }

    fn content_calls(&self) -> usize {
        self.content_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserAutomation for FakeBrowser {
    async fn start(&self) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn get_tokens(&self, _url: &str) -> Result<BrowserTokens, BrowserError> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        self.tokens.clone().ok_or(BrowserError::Unavailable)
    }

    async fn get_content(&self, _url: &str, wait_for: Option<&str>) -> Result<String, BrowserError> {
        self.content_calls.fetch_add(1, Ordering::SeqCst);
        self.selectors
            .lock()
            .unwrap()
            .push(wait_for.map(str::to_string));
        self.content.clone().ok_or(BrowserError::Unavailable)
    }

    async fn shutdown(&self) {}
}

fn chain(server: &MockServer, browser: Arc<FakeBrowser>) -> FetchEscalationChain {
    let factory = ClientFactory::new(ClientSettings::default(), Arc::new(ProxySwitch::default()))
        .expect("client factory");
    FetchEscalationChain::new(
        Arc::new(factory),
        browser,
        server.uri(),
        EscalationSettings::default(),
    )
}

#[tokio::test]
async fn direct_success_never_touches_the_browser() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manga"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>list</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let browser = Arc::new(FakeBrowser::solving("SolvedAgent/1.0"));
    let fetched = chain(&server, browser.clone())
        .fetch_detailed(&format!("{}/manga", server.uri()))
        .await
        .expect("fetch ok");

    assert_eq!(fetched.tier, FetchTier::Direct);
    assert_eq!(fetched.body, "<html>list</html>");
    assert_eq!(browser.token_calls(), 0);
    assert_eq!(browser.content_calls(), 0);
}

#[tokio::test]
async fn token_refresh_retries_direct_once_and_skips_full_browser() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chapter"))
        .and(header("user-agent", "SolvedAgent/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>pages</html>"))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chapter"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let browser = Arc::new(FakeBrowser::solving("SolvedAgent/1.0"));
    let chain = chain(&server, browser.clone());
    let fetched = chain
        .fetch_detailed(&format!("{}/chapter", server.uri()))
        .await
        .expect("fetch ok");

    assert_eq!(fetched.tier, FetchTier::Refreshed);
    assert_eq!(fetched.body, "<html>pages</html>");
    assert_eq!(browser.token_calls(), 1);
    assert_eq!(browser.content_calls(), 0);
    assert_eq!(chain.factory().user_agent(), "SolvedAgent/1.0");
}

#[tokio::test]
async fn challenge_page_with_ok_status_escalates_to_browser() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/guarded"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<title>Just a moment...</title>"),
        )
        .expect(2)
        .mount(&server)
        .await;

    let browser = Arc::new(FakeBrowser::solving("SolvedAgent/1.0"));
    let fetched = chain(&server, browser.clone())
        .fetch_detailed(&format!("{}/guarded", server.uri()))
        .await
        .expect("fetch ok");

    assert_eq!(fetched.tier, FetchTier::Browser);
    assert_eq!(fetched.body, "<html>rendered</html>");
    assert_eq!(browser.token_calls(), 1);
    assert_eq!(browser.content_calls(), 1);
}

#[tokio::test]
async fn failed_token_refresh_goes_straight_to_browser_fetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chapter"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let browser = Arc::new(FakeBrowser {
        content: Some("<html>rendered</html>".to_string()),
        ..FakeBrowser::default()
    });
    let fetched = chain(&server, browser.clone())
        .fetch_detailed(&format!("{}/chapter", server.uri()))
        .await
        .expect("fetch ok");

    assert_eq!(fetched.tier, FetchTier::Browser);
    assert_eq!(browser.token_calls(), 1);
    assert_eq!(browser.content_calls(), 1);
}

#[tokio::test]
async fn all_tiers_failing_reports_browser_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let browser = Arc::new(FakeBrowser::default());
    let err = chain(&server, browser)
        .fetch(&format!("{}/chapter", server.uri()))
        .await
        .unwrap_err();

    assert_eq!(err.kind, FailureKind::Browser);
}

#[tokio::test]
async fn selector_fetch_uses_the_browser_directly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let browser = Arc::new(FakeBrowser::solving("SolvedAgent/1.0"));
    let body = chain(&server, browser.clone())
        .fetch_with_selector(&format!("{}/reader", server.uri()), "img.page")
        .await
        .expect("fetch ok");

    assert_eq!(body, "<html>rendered</html>");
    assert_eq!(
        *browser.selectors.lock().unwrap(),
        vec![Some("img.page".to_string())]
    );
}

#[tokio::test]
async fn harvested_cookies_carry_over_to_later_fetches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chapter"))
        .and(header("cookie", "cf_clearance=solved"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>pages</html>"))
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chapter"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let browser = Arc::new(FakeBrowser::solving("SolvedAgent/1.0"));
    let chain = chain(&server, browser.clone());
    let url = format!("{}/chapter", server.uri());

    let first = chain.fetch_detailed(&url).await.expect("first fetch");
    let second = chain.fetch_detailed(&url).await.expect("second fetch");

    assert_eq!(first.tier, FetchTier::Refreshed);
    assert_eq!(second.tier, FetchTier::Direct);
    assert_eq!(browser.token_calls(), 1);
    assert_eq!(browser.content_calls(), 0);
}
