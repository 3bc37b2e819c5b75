//! Headless Chromium driver over the DevTools protocol

use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::EventRequestWillBeSent;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::layout::Point;
use chromiumoxide::Page;
use futures_util::StreamExt;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use super::{BrowserDriver, BrowserSession, LaunchOptions, ObservedRequest, RequestObserver};
use crate::error::SniffError;

const READY_POLL: Duration = Duration::from_millis(100);

/// True once the new document has left the "loading" state
const DOM_READY_SCRIPT: &str =
    "location.href !== 'about:blank' && document.readyState !== 'loading'";

const SCROLL_SCRIPT: &str = "window.scrollTo(0, document.body.scrollHeight / 2)";

/// Launches a local Chrome/Chromium per session
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromiumDriver;

impl BrowserDriver for ChromiumDriver {
    fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>, SniffError> {
        // The handler must keep pumping while the caller thread sleeps between polls
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| SniffError::Runtime(e.to_string()))?;

        let (browser, page, handler_task) = runtime.block_on(launch_browser(options))?;
        log::debug!("Browser launched ({}x{})", options.viewport.0, options.viewport.1);

        Ok(Box::new(ChromiumSession {
            runtime,
            browser,
            page,
            handler_task,
            listener_task: None,
        }))
    }
}

async fn launch_browser(options: &LaunchOptions) -> Result<(Browser, Page, JoinHandle<()>), SniffError> {
    let (width, height) = options.viewport;
    let mut builder = BrowserConfig::builder()
        .window_size(width, height)
        .viewport(Viewport {
            width,
            height,
            ..Viewport::default()
        });
    for arg in &options.args {
        builder = builder.arg(arg.as_str());
    }
    if let Some(path) = &options.chrome_executable {
        builder = builder.chrome_executable(path);
    }
    let config = builder.build().map_err(SniffError::Launch)?;

    let (mut browser, mut handler) = Browser::launch(config)
        .await
        .map_err(|e| SniffError::Launch(e.to_string()))?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    });

    match browser.new_page("about:blank").await {
        Ok(page) => Ok((browser, page, handler_task)),
        Err(e) => {
            let _ = browser.close().await;
            handler_task.abort();
            Err(SniffError::Launch(e.to_string()))
        }
    }
}

struct ChromiumSession {
    runtime: Runtime,
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    listener_task: Option<JoinHandle<()>>,
}

impl BrowserSession for ChromiumSession {
    fn observe_requests(&mut self, observer: RequestObserver) -> Result<(), SniffError> {
        let mut requests = self
            .runtime
            .block_on(self.page.event_listener::<EventRequestWillBeSent>())
            .map_err(|e| SniffError::Runtime(e.to_string()))?;

        self.listener_task = Some(self.runtime.spawn(async move {
            while let Some(event) = requests.next().await {
                let headers = event
                    .request
                    .headers
                    .inner()
                    .as_object()
                    .map(|map| {
                        map.iter()
                            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                observer(ObservedRequest::new(event.request.url.clone(), headers));
            }
        }));
        Ok(())
    }

    fn navigate(&mut self, url: &str, limit: Duration) -> Result<(), SniffError> {
        let page = &self.page;
        self.runtime.block_on(async {
            timeout(limit, async {
                let response = page
                    .execute(NavigateParams::new(url))
                    .await
                    .map_err(|e| SniffError::Navigation(e.to_string()))?;
                if let Some(error) = &response.result.error_text {
                    return Err(SniffError::Navigation(error.clone()));
                }

                // Script errors while the old document unloads just mean "not yet"
                loop {
                    let ready = page
                        .evaluate(DOM_READY_SCRIPT)
                        .await
                        .ok()
                        .and_then(|r| r.into_value::<bool>().ok())
                        .unwrap_or(false);
                    if ready {
                        return Ok(());
                    }
                    sleep(READY_POLL).await;
                }
            })
            .await
            .map_err(|_| SniffError::Timeout)?
        })
    }

    fn move_pointer(&mut self, x: f64, y: f64) -> Result<(), SniffError> {
        self.runtime
            .block_on(self.page.move_mouse(Point { x, y }))
            .map(|_| ())
            .map_err(|e| SniffError::Runtime(e.to_string()))
    }

    fn scroll_half_page(&mut self) -> Result<(), SniffError> {
        self.runtime
            .block_on(self.page.evaluate(SCROLL_SCRIPT))
            .map(|_| ())
            .map_err(|e| SniffError::Runtime(e.to_string()))
    }

    fn close(self: Box<Self>) -> Result<(), SniffError> {
        let ChromiumSession {
            runtime,
            mut browser,
            page,
            handler_task,
            listener_task,
        } = *self;

        if let Some(task) = listener_task {
            task.abort();
        }
        drop(page);

        let result = runtime.block_on(async {
            let closed = browser.close().await;
            let _ = browser.wait().await;
            closed
        });
        handler_task.abort();
        runtime.shutdown_timeout(Duration::from_secs(1));

        result
            .map(|_| ())
            .map_err(|e| SniffError::Runtime(e.to_string()))
    }
}
