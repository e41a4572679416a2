use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config;
use crate::extract;
use crate::patreon;
use crate::storage;
use crate::ui;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Session cookie header value; overrides the config file when set.
    pub cookies: Option<String>,
    pub config_file: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    /// YYYY-MM-DD cutoff for batch extraction; overrides the config file.
    pub published_after: Option<String>,
    /// Batch mode: extract links and exit instead of opening the browser UI.
    pub extract_links: bool,
}

pub fn run(opts: RunOptions) -> Result<()> {
    let cfg = config::load(config::LoadOptions {
        config_file: opts.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;

    let cookies = opts
        .cookies
        .clone()
        .unwrap_or_else(|| cfg.patreon.cookies.clone());
    if cookies.is_empty() {
        eprintln!("Warning: no cookies configured; patron-only posts will not be visible");
    }

    let store = Arc::new(
        storage::Store::open(storage::Options {
            path: opts.db_path.clone(),
        })
        .context("open storage")?,
    );

    for campaign in &cfg.patreon.campaigns {
        store
            .upsert_campaign(&campaign.id, &campaign.name)
            .with_context(|| format!("seed campaign {}", campaign.id))?;
    }

    let client = patreon::Client::new(patreon::ClientConfig {
        cookies,
        http_client: None,
    })
    .context("build http client")?;

    if opts.extract_links {
        let published_after = opts
            .published_after
            .clone()
            .unwrap_or_else(|| cfg.extract.published_after.clone());
        let links = extract::run(
            &client,
            &store,
            &extract::Options {
                campaigns: &cfg.patreon.campaigns,
                published_after: &published_after,
                delay_min: cfg.extract.delay_min(),
                delay_max: cfg.extract.delay_max(),
            },
        )?;
        report_links(&links);
        return Ok(());
    }

    let theme = ui::Theme::named(&cfg.ui.theme);
    let mut model = ui::Model::new(ui::Options {
        client: Some(Arc::new(client)),
        store,
        theme,
    });
    model.run()
}

fn report_links(links: &[String]) {
    if links.is_empty() {
        println!("No YouTube links found");
        return;
    }

    println!("\nFound {} unique YouTube link(s):\n", links.len());
    for link in links {
        println!("{link}");
    }

    // Copying is a convenience; headless environments just skip it.
    match copy_links(links) {
        Ok(()) => println!("\nCopied {} link(s) to the system clipboard", links.len()),
        Err(err) => eprintln!("\nClipboard copy failed: {err:#}"),
    }
}

fn copy_links(links: &[String]) -> Result<()> {
    let mut clipboard = arboard::Clipboard::new()?;
    clipboard.set_text(links.join("\n"))?;
    Ok(())
}
