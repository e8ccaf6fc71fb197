use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::json;

use crate::archive;
use crate::config::{self, Config};
use crate::data::{ArchivePageSource, MockPageSource, PageSource};
use crate::feed::{FeedLoader, FeedStatus, LoaderOptions};
use crate::logging;
use crate::media::MediaResolver;
use crate::page::PageController;
use crate::ui;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    /// Raw `page` value, read the same way as the URL parameter.
    pub page: Option<String>,
    pub offline: bool,
    pub dump: bool,
}

pub fn run(options: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: options.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    let log_path = logging::init(&cfg.log);
    tracing::info!(
        version = crate::VERSION,
        base_url = %cfg.api.base_url,
        offline = options.offline,
        "archive-feed starting"
    );

    let source = build_source(&cfg, options.offline)?;
    let resolver = MediaResolver::new(&cfg.base_url()?, &cfg.media.scheme()?)
        .context("build media resolver")?;
    let loader = FeedLoader::new(
        source,
        Arc::new(resolver),
        LoaderOptions {
            filter_visibility: cfg.feed.filter_visibility,
            fallback_total: cfg.feed.fallback_total,
        },
    );
    let controller = PageController::new(cfg.feed_location(options.page.as_deref())?);

    if options.dump {
        return dump(loader, controller, &cfg);
    }

    let status_message = match (&log_path, options.offline) {
        (_, true) => "Offline sample archive. ←/→ to page, q to quit.".to_string(),
        (Some(path), false) => format!(
            "Reading {} (log: {}). ←/→ to page, q to quit.",
            cfg.api.base_url,
            path.display()
        ),
        (None, false) => format!("Reading {}. ←/→ to page, q to quit.", cfg.api.base_url),
    };

    let mut model = ui::Model::new(ui::Options {
        controller,
        loader,
        page_size: cfg.api.page_size,
        status_message,
    });
    model.run()
}

fn build_source(cfg: &Config, offline: bool) -> Result<Arc<dyn PageSource>> {
    if offline {
        return Ok(Arc::new(MockPageSource::sample()));
    }
    let client = archive::Client::new(archive::ClientConfig {
        base_url: cfg.api.base_url.clone(),
        list_path: cfg.api.list_path.clone(),
        user_agent: cfg.api.user_agent.clone(),
        timeout: Some(cfg.api.timeout),
        http_client: None,
    })
    .context("create archive client")?;
    Ok(Arc::new(ArchivePageSource::new(Arc::new(client))))
}

/// Loads the requested page once and prints it as JSON.
fn dump(mut loader: FeedLoader, mut controller: PageController, cfg: &Config) -> Result<()> {
    controller.mount();
    loader.load(controller.page(), cfg.api.page_size);
    let wait = cfg.api.timeout + Duration::from_secs(5);
    while loader.is_loading() {
        if !loader.poll_timeout(wait) {
            bail!("timed out waiting for page {}", controller.page());
        }
    }
    controller.unmount();

    let state = loader.state();
    if let FeedStatus::Error(message) = &state.status {
        bail!("load page {}: {}", controller.page(), message);
    }
    let out = json!({
        "page": controller.page(),
        "location": controller.location().as_str(),
        "total": state.total,
        "page_count": loader.page_count(cfg.api.page_size),
        "posts": state.posts,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
