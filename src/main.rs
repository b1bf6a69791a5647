// snapvault CLI

use clap::{Parser, Subcommand, ValueEnum};
use snapvault::api::{HttpPhotoBackend, MetadataPatch, PhotoApiClient};
use snapvault::config::Config;
use snapvault::extract::Extractors;
use snapvault::geo::{
    BackfillOutcome, BoundaryCache, HttpGeocoder, MonthFilter, RegionAtlas, RegionBackfill,
    RegionResolver,
};
use snapvault::models::ImageId;
use snapvault::prefs::{PreferenceStore, ViewMode};
use snapvault::token_store::TokenStore;
use snapvault::upload::{EditDraft, ItemStatus, ParsePipeline, UploadSession};
use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "snapvault")]
#[command(about = "Photo library client: parse, upload and browse photos by region", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and upload photos (a same-named .mov/.mp4 makes a live photo)
    Upload {
        files: Vec<PathBuf>,
        /// Description applied to every file
        #[arg(short, long)]
        description: Option<String>,
        /// Category applied to every file
        #[arg(short, long)]
        category: Option<String>,
        /// Only parse; do not upload
        #[arg(long)]
        dry_run: bool,
    },

    /// List the uploaded library
    List {
        /// Only show favorites
        #[arg(long)]
        favorites: bool,
    },

    /// Delete uploaded images
    Delete {
        ids: Vec<String>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Change description or category of an uploaded image
    Edit {
        id: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Group the library by region
    Regions {
        /// Only photos taken in this month (YYYY-MM)
        #[arg(long)]
        month: Option<MonthFilter>,
        /// Also look up region boundaries
        #[arg(long)]
        boundaries: bool,
    },

    /// Toggle favorite state of an image
    Favorite { id: String },

    /// Replace the tags of an image (no tags clears them)
    Tag { id: String, tags: Vec<String> },

    /// Show or set the library view mode
    View { mode: Option<ViewArg> },

    /// Manage the upload token in the system keychain
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Store a token
    Set { token: String },
    /// Remove the stored token
    Clear,
    /// Report whether a token is available
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum ViewArg {
    Grid,
    List,
    Map,
}

impl From<ViewArg> for ViewMode {
    fn from(arg: ViewArg) -> Self {
        match arg {
            ViewArg::Grid => ViewMode::Grid,
            ViewArg::List => ViewMode::List,
            ViewArg::Map => ViewMode::Map,
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("snapvault=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(2);
        }
    };

    let result = match cli.command {
        Commands::Upload {
            files,
            description,
            category,
            dry_run,
        } => cmd_upload(&config, files, description, category, dry_run).await,
        Commands::List { favorites } => cmd_list(&config, favorites).await,
        Commands::Delete { ids, yes } => cmd_delete(&config, ids, yes).await,
        Commands::Edit {
            id,
            description,
            category,
        } => cmd_edit(&config, id, description, category).await,
        Commands::Regions { month, boundaries } => cmd_regions(&config, month, boundaries).await,
        Commands::Favorite { id } => cmd_favorite(&config, id),
        Commands::Tag { id, tags } => cmd_tag(&config, id, tags),
        Commands::View { mode } => cmd_view(&config, mode),
        Commands::Token { action } => cmd_token(&config, action),
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Environment token first, keychain second
fn upload_token(config: &Config) -> Option<String> {
    if let Some(token) = &config.upload_token {
        return Some(token.clone());
    }
    match TokenStore::new().and_then(|store| store.get()) {
        Ok(token) => token,
        Err(e) => {
            warn!("Could not read upload token from keychain: {}", e);
            None
        }
    }
}

fn api_client(config: &Config) -> PhotoApiClient {
    PhotoApiClient::new(
        Arc::new(HttpPhotoBackend::new(config.api_url.clone())),
        upload_token(config),
    )
}

fn resolver(config: &Config) -> RegionResolver {
    RegionResolver::new(Arc::new(HttpGeocoder::new(config.geocoder_url.clone())))
}

fn preferences(config: &Config) -> PreferenceStore {
    PreferenceStore::new(config.preferences_dir())
}

/// Cancelled on Ctrl-C
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted");
            on_signal.cancel();
        }
    });
    cancel
}

async fn cmd_upload(
    config: &Config,
    files: Vec<PathBuf>,
    description: Option<String>,
    category: Option<String>,
    dry_run: bool,
) -> CliResult {
    if files.is_empty() {
        return Err("No files given".into());
    }

    let pipeline = ParsePipeline::new(
        Extractors::default().with_thumbnail_edge(config.thumbnail_edge),
        resolver(config),
    );
    let session = UploadSession::new(pipeline, api_client(config), config.parse_workers)
        .with_success_callback(Arc::new(|count: usize| {
            info!("{} photo(s) added to the library", count)
        }));

    let ids = session.enqueue_paths(&files).await?;
    if description.is_some() || category.is_some() {
        session.set_edit_draft_all(&EditDraft {
            description,
            category,
            filename: None,
        });
    }

    info!("Parsing {} item(s)", ids.len());
    session.parse_all().await;

    for item in session.queue().snapshot() {
        match (item.status, &item.metadata) {
            (ItemStatus::Parsed, Some(metadata)) => {
                let region = metadata
                    .embedded_region()
                    .map(|r| r.display_name.as_str())
                    .unwrap_or("-");
                println!("parsed  {}  {}  {}", metadata.image_id, item.file.name, region);
            }
            _ => println!(
                "failed  {}  {}",
                item.file.name,
                item.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    if dry_run {
        return Ok(());
    }
    if !session.can_submit() {
        return Err("Nothing parsed successfully; nothing to upload".into());
    }

    let report = session.submit().await?;
    for (id, reason) in &report.failed {
        let name = session
            .queue()
            .get(id)
            .map(|item| item.file.name)
            .unwrap_or_else(|| id.clone());
        println!("upload failed  {}  {}", name, reason);
    }
    println!(
        "{} uploaded, {} failed",
        report.completed.len(),
        report.failed.len()
    );

    if report.failed.is_empty() {
        Ok(())
    } else {
        Err(format!("{} upload(s) failed", report.failed.len()).into())
    }
}

async fn cmd_list(config: &Config, favorites_only: bool) -> CliResult {
    let api = api_client(config);
    let cancel = interrupt_token();
    let Some(images) = api.list_all_images(config.list_page_size, &cancel).await? else {
        return Ok(());
    };

    let prefs = preferences(config);
    let favorites = prefs.favorites();
    let tags = prefs.tags();

    for image in images
        .iter()
        .filter(|image| !favorites_only || favorites.contains(&image.image_id))
    {
        let star = if favorites.contains(&image.image_id) { "*" } else { " " };
        let taken = image
            .taken_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let region = image
            .embedded_region()
            .map(|r| r.display_name.clone())
            .unwrap_or_else(|| "-".to_string());
        let image_tags = tags
            .get(&image.image_id)
            .map(|t| t.iter().cloned().collect::<Vec<_>>().join(","))
            .unwrap_or_default();
        println!(
            "{} {}  {}  {}  {}  {}",
            star, image.image_id, image.filename, taken, region, image_tags
        );
    }
    println!("{} image(s)", images.len());
    Ok(())
}

fn parse_ids(ids: &[String]) -> Result<Vec<ImageId>, Box<dyn Error>> {
    ids.iter()
        .map(|id| id.parse::<ImageId>().map_err(|e| Box::<dyn Error>::from(e)))
        .collect()
}

fn confirm(prompt: &str) -> std::io::Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

async fn cmd_delete(config: &Config, ids: Vec<String>, yes: bool) -> CliResult {
    let ids = parse_ids(&ids)?;
    if ids.is_empty() {
        return Err("No image ids given".into());
    }

    let api = api_client(config);
    if !api.has_token() {
        return Err("Upload token is not configured".into());
    }
    if !yes && !confirm(&format!("Delete {} image(s)?", ids.len()))? {
        println!("Cancelled");
        return Ok(());
    }

    let failures = api.delete_images(&ids).await?;
    let deleted: Vec<ImageId> = ids
        .iter()
        .filter(|id| !failures.iter().any(|(failed, _)| failed == *id))
        .cloned()
        .collect();
    preferences(config).forget(&deleted)?;

    for (id, e) in &failures {
        println!("delete failed  {}  {}", id, e);
    }
    println!("{} deleted, {} failed", deleted.len(), failures.len());
    Ok(())
}

async fn cmd_edit(
    config: &Config,
    id: String,
    description: Option<String>,
    category: Option<String>,
) -> CliResult {
    let image_id: ImageId = id.parse()?;
    let patch = MetadataPatch {
        description,
        category,
        geo: None,
    };
    if patch.is_empty() {
        return Err("Nothing to change; pass --description or --category".into());
    }

    api_client(config)
        .update_image_metadata(&image_id, &patch)
        .await?;
    println!("Updated {}", image_id);
    Ok(())
}

async fn cmd_regions(config: &Config, month: Option<MonthFilter>, boundaries: bool) -> CliResult {
    let api = api_client(config);
    let cancel = interrupt_token();
    let Some(images) = api.list_all_images(config.list_page_size, &cancel).await? else {
        return Ok(());
    };

    let resolver = resolver(config);
    let backfill = api.has_token().then(|| RegionBackfill::new(api.clone()));
    let atlas = RegionAtlas::new(resolver.clone(), backfill);

    let Some(regions) = atlas.build(&images, month, &cancel).await else {
        return Ok(());
    };

    let polygons = if boundaries {
        let keys: Vec<_> = regions.iter().map(|r| r.region.clone()).collect();
        BoundaryCache::new(resolver.geocoder())
            .fetch_all(&keys, &cancel)
            .await
            .unwrap_or_default()
    } else {
        Default::default()
    };

    for aggregate in &regions {
        let range = match (aggregate.first_taken_at, aggregate.last_taken_at) {
            (Some(first), Some(last)) => {
                format!("{} .. {}", first.format("%Y-%m-%d"), last.format("%Y-%m-%d"))
            }
            _ => "-".to_string(),
        };
        let polygon = match polygons.get(&aggregate.region.cache_key) {
            Some(Some(_)) => "  [boundary]",
            _ => "",
        };
        println!(
            "{:>5}  {}  {}{}",
            aggregate.count, aggregate.region.display_name, range, polygon
        );
    }

    if let Some(backfill) = atlas.backfill() {
        let written = backfill
            .wait_idle()
            .await
            .into_iter()
            .filter(|outcome| *outcome == BackfillOutcome::Written)
            .count();
        if written > 0 {
            info!("Saved regions onto {} photo(s)", written);
        }
    }
    Ok(())
}

fn cmd_favorite(config: &Config, id: String) -> CliResult {
    let image_id: ImageId = id.parse()?;
    let now_favorite = preferences(config).toggle_favorite(&image_id)?;
    println!(
        "{} {}",
        image_id,
        if now_favorite { "is now a favorite" } else { "is no longer a favorite" }
    );
    Ok(())
}

fn cmd_tag(config: &Config, id: String, tags: Vec<String>) -> CliResult {
    let image_id: ImageId = id.parse()?;
    preferences(config).set_tags(&image_id, &tags)?;
    println!("Tagged {}", image_id);
    Ok(())
}

fn cmd_view(config: &Config, mode: Option<ViewArg>) -> CliResult {
    let prefs = preferences(config);
    if let Some(mode) = mode {
        prefs.set_view_mode(mode.into())?;
    }
    println!("{:?}", prefs.view_mode());
    Ok(())
}

fn cmd_token(config: &Config, action: TokenAction) -> CliResult {
    let store = TokenStore::new()?;
    match action {
        TokenAction::Set { token } => {
            store.set(&token)?;
            println!("Token saved");
        }
        TokenAction::Clear => {
            store.clear()?;
            println!("Token cleared");
        }
        TokenAction::Status => {
            let source = if config.upload_token.is_some() {
                "environment"
            } else if store.get()?.is_some() {
                "keychain"
            } else {
                "none"
            };
            println!("Upload token: {}", source);
        }
    }
    Ok(())
}
