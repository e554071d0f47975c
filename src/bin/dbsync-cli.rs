use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

use dbsync_lib::input_validation::{validate_display_name, validate_path_argument};
use dbsync_lib::store::{Preset, PresetStore};
use dbsync_lib::{AppState, CopyRequest};

#[derive(Parser)]
#[command(name = "dbsync-cli")]
#[command(about = "Copy database files to multiple target folders", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding targetLocations.json, presets.json, history.json and settings.json
    #[arg(long, global = true, env = "DBSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Copy matching files from SOURCE to the selected targets
    Copy {
        source: Option<PathBuf>,
        /// Use this preset's targets
        #[arg(short, long)]
        preset: Option<String>,
        /// Target location ids; defaults to the selected locations
        #[arg(short, long = "target")]
        targets: Vec<String>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Check which target locations are reachable
    Check,
    #[command(subcommand)]
    Locations(LocationCommand),
    #[command(subcommand)]
    Presets(PresetCommand),
    #[command(subcommand)]
    History(HistoryCommand),
    /// Print the current settings
    Settings,
}

#[derive(Subcommand)]
enum LocationCommand {
    List,
    Add { name: String, path: String },
    Remove { id: String },
    Select {
        id: String,
        #[arg(long)]
        off: bool,
    },
}

#[derive(Subcommand)]
enum PresetCommand {
    List,
    Save {
        name: String,
        #[arg(short, long = "target", required = true)]
        targets: Vec<String>,
        #[arg(short, long)]
        description: Option<String>,
        /// Replace the preset with this id instead of creating one
        #[arg(long)]
        id: Option<String>,
    },
    Delete { id: String },
    /// Set the default preset; omit the id to clear it
    Default { id: Option<String> },
}

#[derive(Subcommand)]
enum HistoryCommand {
    List {
        #[arg(short, long, default_value_t = 1)]
        page: usize,
    },
    Clear,
    Delete { ids: Vec<u64> },
}

fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("dbsync"))
        .ok_or_else(|| anyhow!("Cannot determine a data directory; pass --data-dir"))
}

fn format_timestamp(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let state = AppState::open(&data_dir).await?;

    let result = run(&state, cli.command).await;
    state.shutdown();
    result
}

async fn run(state: &AppState, command: Command) -> Result<()> {
    match command {
        Command::Copy {
            source,
            preset,
            targets,
            description,
        } => copy(state, source, preset, targets, description).await,
        Command::Check => {
            let locations = state.locations.list().await;
            let status = state.check_locations(true).await;
            for location in locations {
                let icon = match status.get(&location.id) {
                    Some(true) => "✅",
                    Some(false) => "❌",
                    None => "❔",
                };
                println!("{} {:<20} {}", icon, location.name, location.path);
            }
            Ok(())
        }
        Command::Locations(cmd) => locations(state, cmd).await,
        Command::Presets(cmd) => presets(state, cmd).await,
        Command::History(cmd) => history(state, cmd).await,
        Command::Settings => {
            let settings = state.settings.load().await;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

async fn copy(
    state: &AppState,
    source: Option<PathBuf>,
    preset: Option<String>,
    targets: Vec<String>,
    description: Option<String>,
) -> Result<()> {
    let settings = state.settings.load().await;
    let source = source
        .or_else(|| settings.last_source_path.clone().map(PathBuf::from))
        .ok_or_else(|| anyhow!("Missing required argument: SOURCE"))?;
    validate_path_argument(&source.to_string_lossy())?;

    let target_ids = if !targets.is_empty() {
        targets
    } else if let Some(id) = preset.or(settings.default_preset_id.clone()) {
        state
            .presets
            .get(&id)
            .await
            .ok_or_else(|| anyhow!("Preset not found: {id}"))?
            .target_ids
    } else {
        state
            .locations
            .selected()
            .await
            .into_iter()
            .map(|l| l.id)
            .collect()
    };
    if target_ids.is_empty() {
        bail!("No targets: pass --target, --preset, or select locations first");
    }

    println!("🚀 Copying from {}", source.display());
    let pb = ProgressBar::new(target_ids.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let report = state
        .copy_to_targets_with_progress(
            CopyRequest {
                source,
                target_ids,
                description,
            },
            |progress| {
                pb.set_position(progress.completed as u64);
                let mark = if progress.success { "✅" } else { "⚠️" };
                pb.set_message(format!("{} {}", mark, progress.target_name));
            },
        )
        .await;

    let report = match report {
        Ok(report) => report,
        Err(e) => {
            pb.abandon_with_message("❌ Copy failed");
            return Err(e);
        }
    };
    pb.finish_with_message("done");

    println!();
    println!(
        "📊 {}: {}",
        report.entry.version.as_deref().unwrap_or("-"),
        report.entry.description
    );
    for result in report.entry.copy_results.iter().flatten() {
        let target = result.target_name.as_deref().unwrap_or(&result.target_id);
        let file = result.file_name.as_deref().unwrap_or("-");
        if result.success {
            let changed = if result.has_diff == Some(false) {
                " (unchanged)"
            } else {
                ""
            };
            println!(
                "   ✅ {:<20} {} {} bytes{}",
                target,
                file,
                result.file_size.unwrap_or(0),
                changed
            );
        } else {
            eprintln!(
                "   ⚠️  {:<20} {} {}",
                target,
                file,
                result.error.as_deref().unwrap_or("failed")
            );
        }
    }

    if !report.succeeded() {
        std::process::exit(1);
    }
    Ok(())
}

async fn locations(state: &AppState, cmd: LocationCommand) -> Result<()> {
    match cmd {
        LocationCommand::List => {
            for location in state.locations.list().await {
                let mark = if location.selected { "*" } else { " " };
                println!("{} {}  {:<20} {}", mark, location.id, location.name, location.path);
            }
        }
        LocationCommand::Add { name, path } => {
            validate_display_name(&name)?;
            validate_path_argument(&path)?;
            let location = state
                .locations
                .add(&name, &path)
                .await
                .map_err(|e| anyhow!(e.to_frontend_message()))?;
            println!("Added {} ({})", location.name, location.id);
        }
        LocationCommand::Remove { id } => {
            if !state.locations.delete(&id).await? {
                bail!("Target location not found: {id}");
            }
            println!("Removed {id}");
        }
        LocationCommand::Select { id, off } => {
            let location = state.locations.set_selected(&id, !off).await?;
            println!(
                "{} {}",
                if location.selected { "Selected" } else { "Deselected" },
                location.name
            );
        }
    }
    Ok(())
}

async fn presets(state: &AppState, cmd: PresetCommand) -> Result<()> {
    match cmd {
        PresetCommand::List => {
            let default_id = state.settings.load().await.default_preset_id;
            let locations = state.locations.list().await;
            for preset in state.presets.list().await {
                let mark = if default_id.as_deref() == Some(preset.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{} {}  {}", mark, preset.id, preset.name);
                if let Some(description) = &preset.description {
                    println!("      {}", description);
                }
                for target in PresetStore::resolve_targets(&preset, &locations) {
                    println!("      - {} ({})", target.name, target.path);
                }
            }
        }
        PresetCommand::Save {
            name,
            targets,
            description,
            id,
        } => {
            validate_display_name(&name)?;
            let mut preset = Preset::new(name, description, targets);
            if let Some(id) = id {
                preset.id = id;
            }
            let saved = state.presets.save(preset).await?;
            println!("Saved preset {} ({})", saved.name, saved.id);
        }
        PresetCommand::Delete { id } => {
            if !state.presets.delete(&id).await? {
                bail!("Preset not found: {id}");
            }
            println!("Deleted preset {id}");
        }
        PresetCommand::Default { id } => {
            state
                .presets
                .set_default(id.as_deref())
                .await
                .context("Failed to set the default preset")?;
            match id {
                Some(id) => println!("Default preset: {id}"),
                None => println!("Default preset cleared"),
            }
        }
    }
    Ok(())
}

async fn history(state: &AppState, cmd: HistoryCommand) -> Result<()> {
    match cmd {
        HistoryCommand::List { page } => {
            let per_page = state.settings.load().await.items_per_page();
            let page = state.history.page(page, per_page).await;
            for entry in &page.entries {
                let status = if entry.succeeded() { "✅" } else { "⚠️" };
                println!(
                    "{} {}  {:<4} {}  {}",
                    status,
                    entry.id,
                    entry.version.as_deref().unwrap_or("-"),
                    format_timestamp(entry.timestamp),
                    entry.description
                );
            }
            println!(
                "page {}/{} ({} entries)",
                page.page,
                page.total_pages.max(1),
                page.total
            );
        }
        HistoryCommand::Clear => {
            state.history.clear().await?;
            println!("History cleared");
        }
        HistoryCommand::Delete { ids } => {
            let removed = state.history.remove_many(&ids).await?;
            println!("Removed {removed} entr{}", if removed == 1 { "y" } else { "ies" });
        }
    }
    Ok(())
}
