use anyhow::{Context, anyhow};
use mimalloc::MiMalloc;
use shelf::app::context::StartupContext;
use shelf::app::shutdown::build_shutdown_pipeline;
use shelf::app::startup::build_start_pipeline;
use shelf::core::favorites::FavoritesView;
use shelf::core::models::volume::VolumeSummary;
use std::path::PathBuf;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const DEFAULT_CONFIG_PATH: &str = "shelf.yaml";

/// Usage: shelf [config.yaml] [query...]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let cfg_path: PathBuf = args
        .next()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
        .into();
    let query = args.collect::<Vec<_>>().join(" ");

    let startup_pipeline =
        build_start_pipeline(cfg_path).ok_or_else(|| anyhow!("Startup pipeline has no tasks"))?;
    let startup_ctx = StartupContext::default();

    startup_pipeline
        .run(&startup_ctx)
        .await
        .context("Startup failed")?;
    info!("Startup successful");

    print_results(&startup_ctx, &query).await?;

    if let Some(favorites) = startup_ctx.favorites() {
        tokio::spawn(watch_favorites(favorites.view()));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for sigint")?;

    let shutdown_pipeline =
        build_shutdown_pipeline().ok_or_else(|| anyhow!("Shutdown pipeline has no tasks"))?;

    shutdown_pipeline
        .run(&startup_ctx)
        .await
        .context("Clean shutdown failed")?;
    info!("Shutdown successful");

    Ok(())
}

async fn print_results(ctx: &StartupContext, query: &str) -> anyhow::Result<()> {
    let search = ctx
        .search
        .get()
        .ok_or_else(|| anyhow!("Search not configured"))?;

    let results = match search.search(query).await {
        Ok(results) => results,
        Err(e) => {
            warn!("Search failed: {}", e);
            return Ok(());
        }
    };

    if results.is_empty() {
        println!("No books found");
        return Ok(());
    }

    let favorites = ctx.favorites();
    for record in &results {
        let summary = VolumeSummary::from_record(record);
        let marker = match favorites {
            Some(favorites) if favorites.is_favorite(&record.id) => "*",
            _ => " ",
        };

        println!(
            "{} {:<14} {} by {} ({}, {})",
            marker, summary.id, summary.title, summary.author, summary.category, summary.rating
        );
    }

    Ok(())
}

async fn watch_favorites(mut view: FavoritesView) {
    while let Some(set) = view.changed().await {
        let mut titles: Vec<String> = set
            .values()
            .map(|record| VolumeSummary::from_record(record).title)
            .collect();
        titles.sort();

        info!("Favorites now {}: {}", titles.len(), titles.join(", "));
    }
}
