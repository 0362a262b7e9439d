//! Browser automation backed by a local Chrome/Chromium through `headless_chrome`.
//! The driver is synchronous, so every call runs on the blocking pool.

use std::sync::{Arc, Mutex};
use std::thread;

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use pipeline_logging::{pipeline_debug, pipeline_info, pipeline_warn};

use crate::browser::{
    contains_challenge, release_on_error, BrowserAutomation, BrowserError, BrowserSettings,
    BrowserTokens,
};

pub struct ChromeBrowser {
    settings: BrowserSettings,
    browser: Mutex<Option<Browser>>,
}

impl ChromeBrowser {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            browser: Mutex::new(None),
        }
    }

    fn handle(&self) -> Option<Browser> {
        self.browser
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn running(&self) -> Result<Browser, BrowserError> {
        if let Some(browser) = self.handle() {
            return Ok(browser);
        }
        self.start().await?;
        self.handle().ok_or(BrowserError::Unavailable)
    }
}

#[async_trait]
impl BrowserAutomation for ChromeBrowser {
    async fn start(&self) -> Result<(), BrowserError> {
        if self.handle().is_some() {
            return Ok(());
        }
        let idle = self.settings.navigation_timeout * 2;
        let browser = tokio::task::spawn_blocking(move || {
            let options = LaunchOptions::default_builder()
                .headless(true)
                .idle_browser_timeout(idle)
                .build()
                .map_err(|err| BrowserError::Launch(err.to_string()))?;
            Browser::new(options).map_err(|err| BrowserError::Launch(err.to_string()))
        })
        .await
        .map_err(|err| BrowserError::Launch(err.to_string()))??;

        pipeline_info!("Headless browser started");
        let mut slot = self
            .browser
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none() {
            *slot = Some(browser);
        }
        Ok(())
    }

    async fn get_tokens(&self, url: &str) -> Result<BrowserTokens, BrowserError> {
        let browser = self.running().await?;
        let settings = self.settings.clone();
        let url = url.to_string();
        tokio::task::spawn_blocking(move || harvest_tokens(&browser, &settings, &url))
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?
    }

    async fn get_content(&self, url: &str, wait_for: Option<&str>) -> Result<String, BrowserError> {
        let browser = self.running().await?;
        let settings = self.settings.clone();
        let url = url.to_string();
        let wait_for = wait_for.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            render(&browser, &settings, &url, wait_for.as_deref())
        })
        .await
        .map_err(|err| BrowserError::Launch(err.to_string()))?
    }

    async fn shutdown(&self) {
        let browser = self
            .browser
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if browser.is_some() {
            // Dropping the last handle terminates the child process.
            drop(browser);
            pipeline_info!("Headless browser stopped");
        }
    }
}

fn open(browser: &Browser, settings: &BrowserSettings, url: &str) -> Result<Arc<Tab>, BrowserError> {
    let tab = browser
        .new_tab()
        .map_err(|err| navigation_error(url, err))?;
    tab.set_default_timeout(settings.navigation_timeout);
    release_on_error(
        tab,
        |tab| {
            tab.navigate_to(url)
                .map_err(|err| navigation_error(url, err))?
                .wait_until_navigated()
                .map_err(|err| navigation_error(url, err))?;
            Ok(())
        },
        |tab| close(tab),
    )
}

fn navigation_error(url: &str, err: impl std::fmt::Display) -> BrowserError {
    BrowserError::Navigation {
        url: url.to_string(),
        message: err.to_string(),
    }
}

fn close(tab: &Tab) {
    if let Err(err) = tab.close(true) {
        pipeline_debug!("Closing browser tab failed: {}", err);
    }
}

fn harvest_tokens(
    browser: &Browser,
    settings: &BrowserSettings,
    url: &str,
) -> Result<BrowserTokens, BrowserError> {
    let tab = open(browser, settings, url)?;
    let result = wait_out_challenge(&tab, settings).and_then(|()| read_tokens(&tab, url));
    close(&tab);
    result
}

fn wait_out_challenge(tab: &Tab, settings: &BrowserSettings) -> Result<(), BrowserError> {
    for attempt in 0..=settings.poll_retries {
        let content = tab.get_content().unwrap_or_default();
        let title = tab.get_title().unwrap_or_default();
        if !contains_challenge(&content, &settings.challenge_markers)
            && !contains_challenge(&title, &settings.challenge_markers)
        {
            return Ok(());
        }
        if attempt < settings.poll_retries {
            pipeline_debug!(
                "Challenge still present, waiting {:?} ({}/{})",
                settings.poll_delay,
                attempt + 1,
                settings.poll_retries
            );
            thread::sleep(settings.poll_delay);
        }
    }
    pipeline_warn!("Challenge unsolved after {} checks", settings.poll_retries);
    Err(BrowserError::ChallengeUnsolved {
        attempts: settings.poll_retries,
    })
}

fn read_tokens(tab: &Tab, url: &str) -> Result<BrowserTokens, BrowserError> {
    let user_agent = tab
        .evaluate("navigator.userAgent", false)
        .ok()
        .and_then(|object| object.value)
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default();
    let cookies = tab
        .get_cookies()
        .map_err(|err| navigation_error(url, err))?
        .into_iter()
        .map(|cookie| (cookie.name, cookie.value))
        .collect();
    Ok(BrowserTokens {
        user_agent,
        cookies,
    })
}

fn render(
    browser: &Browser,
    settings: &BrowserSettings,
    url: &str,
    wait_for: Option<&str>,
) -> Result<String, BrowserError> {
    let tab = open(browser, settings, url)?;
    if let Some(selector) = wait_for {
        if let Err(err) = tab.wait_for_element_with_custom_timeout(selector, settings.selector_timeout) {
            pipeline_debug!("Selector {} not found on {}: {}", selector, url, err);
        }
    }
    let content = tab.get_content().map_err(|err| navigation_error(url, err));
    close(&tab);
    content
}
