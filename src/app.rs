use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config;
use crate::logging;
use crate::source::{self, ArchiveSource};
use crate::ui;

pub fn run(issue_id: String) -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;

    // Logging is best-effort; the reader works without it.
    if let Err(err) = logging::init_logging(&cfg.log) {
        eprintln!("warning: logging disabled: {err}");
    }
    tracing::info!(
        issue = %issue_id,
        base_url = %cfg.source.base_url,
        config = ?config::default_path(),
        "starting"
    );

    let source: Arc<dyn ArchiveSource> = Arc::new(
        source::HttpArchiveSource::new(source::HttpSourceConfig {
            user_agent: cfg.source.user_agent.clone(),
            timeout: Some(cfg.source.timeout),
            http_client: None,
        })
        .context("build archive source")?,
    );

    let options = ui::Options {
        issue_id,
        base_url: cfg.source.base_url.clone(),
        heartbeat: cfg.ui.heartbeat,
        filler: cfg.ui.filler.clone(),
        source,
    };

    let mut model = ui::Model::new(options)?;
    let result = model.run();
    if let Err(err) = &result {
        tracing::error!(error = %format!("{err:#}"), "exiting after fatal error");
    }
    model.shutdown();
    result
}
