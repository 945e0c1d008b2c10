//! CLI command implementations

use crate::output::{format_bytes, print_output};
use crate::progress::{drive, TransferProgress};
use crate::{ConfigAction, ModeArg, OutputFormat};
use anyhow::{anyhow, Result};
use console::style;
use pantransfer_core::{block_manifest, DownloadTarget, PanTransfer, SettingsStore, UploadRequest};
use pantransfer_types::{DownloadMode, DownloadSource, Settings, TransferTier};
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};
use tracing::info;

// ============================================================================
// Transfer Commands
// ============================================================================

pub async fn upload(
    settings: Settings,
    file: PathBuf,
    remote_dir: String,
    name: Option<String>,
    overwrite: bool,
    tier: Option<u8>,
    format: OutputFormat,
) -> Result<()> {
    let tier = tier.map(TransferTier::from_code).unwrap_or_else(|| settings.tier());
    let pan = PanTransfer::new(settings)?;

    let request = UploadRequest {
        local_path: file,
        target_dir: remote_dir,
        target_name: name,
        overwrite,
        tier,
    };

    info!(
        "Uploading {} to {} ({} tier)",
        request.local_path.display(),
        request.target_dir,
        tier
    );
    let progress = TransferProgress::new(matches!(format, OutputFormat::Human));
    let report = drive(pan.upload(request), pan.subscribe(), &progress).await?;
    info!("Uploaded {} ({} bytes)", report.remote, report.bytes);

    print_output(&report, format)
}

/// Arguments of the download command
pub struct DownloadOptions {
    pub source: DownloadSource,
    pub dir: Option<PathBuf>,
    pub name: Option<String>,
    pub overwrite: bool,
    pub mode: ModeArg,
    pub retry: Option<u32>,
    pub error_log: bool,
}

pub async fn download(
    mut settings: Settings,
    options: DownloadOptions,
    format: OutputFormat,
) -> Result<()> {
    if options.error_log {
        settings.enable_error_log = true;
    }

    let mode = match options.mode {
        ModeArg::Simple => DownloadMode::Simple,
        ModeArg::Breakpoint => DownloadMode::Breakpoint,
        ModeArg::Retry => DownloadMode::BreakpointRetry {
            max_attempts: options.retry.unwrap_or(settings.max_attempts).max(1),
        },
    };
    let local_dir = options
        .dir
        .unwrap_or_else(|| settings.default_download_dir.clone());

    info!(
        "Downloading {} into {} ({:?})",
        describe_source(&options.source),
        local_dir.display(),
        mode
    );
    let pan = PanTransfer::new(settings)?;
    let target = DownloadTarget {
        source: options.source,
        local_dir,
        local_name: options.name,
        overwrite: options.overwrite,
        mode,
    };

    let progress = TransferProgress::new(matches!(format, OutputFormat::Human));
    let report = drive(pan.download(target), pan.subscribe(), &progress).await?;
    info!(
        "Downloaded {} ({} bytes)",
        report.local_path.display(),
        report.bytes
    );

    print_output(&report, format)
}

/// Log-friendly name of a download source, without the link's query string
fn describe_source(source: &DownloadSource) -> String {
    match source {
        DownloadSource::Link(link) => {
            let bare = link.split_once('?').map_or(link.as_str(), |(bare, _)| bare);
            format!("link {}", bare)
        }
        DownloadSource::FsId(fs_id) => format!("fs_id {}", fs_id),
        DownloadSource::Path(path) => format!("path {}", path),
    }
}

#[derive(Tabled)]
struct BlockRow {
    #[tabled(rename = "Block")]
    index: usize,
    #[tabled(rename = "Offset")]
    offset: u64,
    #[tabled(rename = "Size")]
    size: u64,
    #[tabled(rename = "MD5")]
    md5: String,
}

pub async fn manifest(
    settings: &Settings,
    file: &Path,
    tier: Option<u8>,
    format: OutputFormat,
) -> Result<()> {
    let tier = tier.map(TransferTier::from_code).unwrap_or_else(|| settings.tier());
    let limits = tier.limits();
    let total = tokio::fs::metadata(file).await?.len();
    let manifest = block_manifest(file, tier).await?;

    let rows: Vec<BlockRow> = manifest
        .hashes()
        .iter()
        .enumerate()
        .map(|(index, md5)| BlockRow {
            index,
            offset: index as u64 * limits.block_size,
            size: limits.block_len(index as u32, total),
            md5: md5.clone(),
        })
        .collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&manifest)?);
        }
        OutputFormat::Table => {
            let mut table = Table::new(&rows);
            table.with(Style::rounded());
            println!("{}", table);
        }
        OutputFormat::Human => {
            println!(
                "{} ({}, {} tier, {} block(s))",
                style(file.display()).cyan(),
                format_bytes(total),
                tier,
                rows.len()
            );
            for row in &rows {
                println!("  {:>4}  {}  {}", row.index, row.md5, format_bytes(row.size));
            }
            if total > limits.max_total_size {
                println!(
                    "{} exceeds the {} tier limit of {}",
                    style("!").yellow().bold(),
                    tier,
                    format_bytes(limits.max_total_size)
                );
            }
        }
    }

    Ok(())
}

// ============================================================================
// Config Commands
// ============================================================================

pub async fn config_action(
    store: &SettingsStore,
    settings: Settings,
    action: Option<ConfigAction>,
    format: OutputFormat,
) -> Result<()> {
    match action {
        None | Some(ConfigAction::Show) => match format {
            OutputFormat::Json => {
                let mut shown = settings.clone();
                shown.access_token = shown.access_token.as_deref().map(mask_token);
                println!("{}", serde_json::to_string_pretty(&shown)?);
            }
            _ => {
                println!("PanTransfer Configuration:");
                println!("  (from {})", store.settings_path().display());
                println!();
                println!(
                    "  Access token: {}",
                    settings
                        .access_token
                        .as_deref()
                        .map(mask_token)
                        .unwrap_or_else(|| "not set".to_string())
                );
                println!("  Tier: {} ({})", settings.tier(), settings.tier);
                println!("  API base: {}", settings.api_base);
                println!("  PCS base: {}", settings.pcs_base);
                println!("  User agent: {}", settings.user_agent);
                println!("  Max download attempts: {}", settings.max_attempts);
                println!("  Error log: {}", settings.enable_error_log);
                println!(
                    "  Default download dir: {}",
                    settings.default_download_dir.display()
                );
            }
        },

        Some(ConfigAction::Get { key }) => {
            let value = match key.as_str() {
                "access_token" => settings.access_token.clone().unwrap_or_default(),
                "tier" => settings.tier.to_string(),
                "api_base" => settings.api_base.clone(),
                "pcs_base" => settings.pcs_base.clone(),
                "user_agent" => settings.user_agent.clone(),
                "max_attempts" => settings.max_attempts.to_string(),
                "enable_error_log" => settings.enable_error_log.to_string(),
                "default_download_dir" => settings.default_download_dir.display().to_string(),
                _ => return Err(anyhow!("Unknown config key: {}", key)),
            };
            println!("{}", value);
        }

        Some(ConfigAction::Set { key, value }) => {
            // Start from the stored file so a token given by env is not persisted
            let mut settings = store.load().await?;

            match key.as_str() {
                "access_token" => settings.access_token = Some(value).filter(|v| !v.is_empty()),
                "tier" => {
                    let tier: u8 = value.parse()?;
                    if tier > 2 {
                        return Err(anyhow!("Tier must be 0, 1 or 2"));
                    }
                    settings.tier = tier;
                }
                "api_base" => settings.api_base = value,
                "pcs_base" => settings.pcs_base = value,
                "user_agent" => settings.user_agent = value,
                "max_attempts" => settings.max_attempts = value.parse()?,
                "enable_error_log" => settings.enable_error_log = value.parse()?,
                "default_download_dir" => settings.default_download_dir = PathBuf::from(value),
                _ => return Err(anyhow!("Unknown config key: {}", key)),
            }

            store.save(&settings).await?;
            println!("{} Config updated", style("✓").green().bold());
        }

        Some(ConfigAction::Reset { yes }) => {
            let confirmed = yes
                || dialoguer::Confirm::new()
                    .with_prompt("Reset all settings to defaults?")
                    .default(false)
                    .interact()?;

            if confirmed {
                store.reset().await?;
                println!("{} Settings reset to defaults", style("✓").green().bold());
            }
        }
    }

    Ok(())
}

/// Keep only the last four characters of a token
fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{}", tail)
}
