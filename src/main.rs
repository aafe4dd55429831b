use args::{Args, Command, Connection};
use bucketview_lib::browser::{Browser, BrowserUpdate, SortDirection, ViewMode};
use bucketview_lib::config::AppConfig;
use bucketview_lib::format::{format_size, format_timestamp};
use bucketview_lib::preview::{Preview, PreviewMode};
use bucketview_lib::session::{
    CredentialFile, CredentialStore, Credentials, S3StoreFactory, SavedCredentials, SessionManager,
};
use bucketview_lib::worker::{OperationOutput, OperationResult, OperationStatus, Progress};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;

mod args;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .parse_default_env()
        .init();

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), String> {
    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    let (credentials, bucket) = resolve_credentials(&args.connection, &config)?;

    let sessions = SessionManager::new(Box::new(S3StoreFactory {
        page_size: config.page_size,
    }));
    let mut browser = Browser::new(sessions, config.worker);

    let needs_bucket = !matches!(args.command, Command::Buckets);
    if needs_bucket && bucket.is_none() {
        return Err("a bucket is required (--bucket or BUCKETVIEW_BUCKET)".to_string());
    }
    let initial_list = browser.connect(credentials, bucket).map_err(|e| e.to_string())?;

    match args.command {
        Command::Buckets => {
            browser.request_bucket_list().map_err(|e| e.to_string())?;
            match wait_for(&mut browser, |u| {
                matches!(u, BrowserUpdate::Buckets(_) | BrowserUpdate::BucketsUnavailable(_))
            })
            .await?
            {
                BrowserUpdate::Buckets(names) => {
                    for name in names {
                        println!("{}", name);
                    }
                    Ok(())
                }
                BrowserUpdate::BucketsUnavailable(e) => Err(format!(
                    "cannot list buckets ({}); pass --bucket to open one directly",
                    e
                )),
                _ => Ok(()),
            }
        }
        Command::Ls {
            prefix,
            flat,
            sort,
            desc,
        } => {
            if !prefix.is_empty() {
                browser.navigate_into(&prefix).map_err(|e| e.to_string())?;
            }
            let direction = if desc {
                SortDirection::Descending
            } else {
                SortDirection::Ascending
            };
            browser.state_mut().set_sort(sort, direction);
            if flat {
                browser.state_mut().set_view_mode(ViewMode::Flat);
            }
            match wait_for(&mut browser, |u| {
                matches!(
                    u,
                    BrowserUpdate::ListingReady { .. } | BrowserUpdate::ListingFailed { .. }
                )
            })
            .await?
            {
                BrowserUpdate::ListingFailed { prefix, error } => {
                    Err(format!("listing {} failed: {}", prefix, error))
                }
                _ => {
                    print_listing(&browser);
                    Ok(())
                }
            }
        }
        Command::Get { key, dest } => {
            skip_listing(&browser, initial_list);
            let id = browser
                .request_download(vec![key], dest)
                .map_err(|e| e.to_string())?;
            finish_transfer(&mut browser, id).await
        }
        Command::Archive { keys, out } => {
            skip_listing(&browser, initial_list);
            let id = browser
                .request_download(keys, out)
                .map_err(|e| e.to_string())?;
            finish_transfer(&mut browser, id).await
        }
        Command::Rm { keys } => {
            skip_listing(&browser, initial_list);
            let id = browser.request_delete(keys).map_err(|e| e.to_string())?;
            finish_transfer(&mut browser, id).await
        }
        Command::Preview { key } => {
            skip_listing(&browser, initial_list);
            browser.request_preview(&key).map_err(|e| e.to_string())?;
            match wait_for(&mut browser, |u| {
                matches!(
                    u,
                    BrowserUpdate::PreviewReady(_) | BrowserUpdate::PreviewFailed { .. }
                )
            })
            .await?
            {
                BrowserUpdate::PreviewReady(preview) => {
                    print_preview(&preview);
                    Ok(())
                }
                BrowserUpdate::PreviewFailed { key, error } => {
                    Err(format!("preview of {} failed: {}", key, error))
                }
                _ => Ok(()),
            }
        }
    }
}

fn default_credentials_path() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("bucketview").join("credentials.json")
}

/// Keys from flags/env win; otherwise fall back to the saved profile.
fn resolve_credentials(
    connection: &Connection,
    config: &AppConfig,
) -> Result<(Credentials, Option<String>), String> {
    let file = CredentialFile::new(
        connection
            .credentials_file
            .clone()
            .unwrap_or_else(default_credentials_path),
    );

    if let (Some(access_key_id), Some(secret)) =
        (&connection.access_key_id, &connection.secret_access_key)
    {
        let region = connection
            .region
            .clone()
            .unwrap_or_else(|| config.default_region.clone());
        let mut credentials = Credentials::new(access_key_id, secret, &region);
        credentials.session_token = connection.session_token.clone();
        credentials.endpoint_url = connection.endpoint_url.clone();
        credentials.force_path_style = connection.path_style;

        if connection.save {
            file.save(
                &connection.profile,
                &SavedCredentials {
                    credentials: credentials.clone(),
                    bucket: connection.bucket.clone(),
                },
            )?;
        }
        return Ok((credentials, connection.bucket.clone()));
    }

    let saved = file.load(&connection.profile)?.ok_or_else(|| {
        format!(
            "no credentials given and no saved profile '{}' in {}",
            connection.profile,
            file.path().display()
        )
    })?;
    info!("credentials_loaded: profile={}", connection.profile);
    Ok((saved.credentials, connection.bucket.clone().or(saved.bucket)))
}

/// Commands that never show a listing drop the one `connect` started.
fn skip_listing(browser: &Browser, initial_list: Option<u64>) {
    if let Some(id) = initial_list {
        browser.cancel(id);
    }
}

async fn wait_for<F>(browser: &mut Browser, wanted: F) -> Result<BrowserUpdate, String>
where
    F: Fn(&BrowserUpdate) -> bool,
{
    loop {
        let updates = browser.next_updates().await;
        if updates.is_empty() {
            return Err("background worker stopped".to_string());
        }
        for update in updates {
            if wanted(&update) {
                return Ok(update);
            }
            report(&update);
        }
    }
}

fn report(update: &BrowserUpdate) {
    match update {
        BrowserUpdate::ListingProgress { count } => info!("listing: {} objects so far", count),
        BrowserUpdate::TransferProgress { progress, .. } => match progress {
            Progress::Bytes {
                key,
                transferred,
                total,
            } => match total {
                Some(total) => info!(
                    "{}: {} / {}",
                    key,
                    format_size(*transferred),
                    format_size(*total)
                ),
                None => info!("{}: {}", key, format_size(*transferred)),
            },
            Progress::Items { done, total, key } => info!("[{}/{}] {}", done, total, key),
            Progress::Listed { count } => info!("expanding folders: {} objects", count),
        },
        BrowserUpdate::RelistSuggested => info!("some objects vanished since they were listed"),
        _ => {}
    }
}

async fn finish_transfer(browser: &mut Browser, id: u64) -> Result<(), String> {
    let update = wait_for(browser, |u| match u {
        BrowserUpdate::TransferFinished(result) => result.id == id,
        BrowserUpdate::Cancelled { id: cancelled, .. } => *cancelled == id,
        _ => false,
    })
    .await?;
    let BrowserUpdate::TransferFinished(result) = update else {
        return Err("operation cancelled".to_string());
    };
    print_result(&result);
    match result.status() {
        OperationStatus::Completed => Ok(()),
        status => Err(format!("{} {}", result.kind, status)),
    }
}

fn print_result(result: &OperationResult) {
    for key in &result.succeeded_keys {
        println!("ok      {}", key);
    }
    for (key, error) in &result.failed_keys {
        println!("failed  {}: {}", key, error);
    }
    match &result.output {
        OperationOutput::File { path, bytes } => {
            println!("saved {} ({})", path.display(), format_size(*bytes))
        }
        OperationOutput::Archive { path, files } => {
            println!("archive {} ({} files)", path.display(), files)
        }
        _ => {}
    }
    if let Some(error) = &result.error {
        println!("error: {}", error);
    }
}

fn print_listing(browser: &Browser) {
    let state = browser.state();
    for row in state.visible_rows() {
        let indent = "  ".repeat(row.depth);
        let size = match (row.is_folder, row.size) {
            (true, _) => "-".to_string(),
            (false, Some(size)) => format_size(size),
            (false, None) => String::new(),
        };
        let suffix = if row.is_folder { "/" } else { "" };
        println!(
            "{:>10}  {:<19}  {}{}{}",
            size,
            format_timestamp(row.last_modified.as_ref()),
            indent,
            row.name,
            suffix
        );
    }
    if state.is_truncated() {
        println!("(listing incomplete)");
    }
}

fn print_preview(preview: &Preview) {
    println!(
        "{} [{}] {}{}",
        preview.key,
        preview.content_type,
        preview.mode,
        if preview.truncated { " (truncated)" } else { "" }
    );
    match preview.mode {
        PreviewMode::Text | PreviewMode::CsvRaw => println!("{}", preview.text()),
        PreviewMode::CsvTable => {
            for record in preview.rows.iter().flatten() {
                println!("{}", record.join(" | "));
            }
        }
        PreviewMode::Image => println!("{} bytes of image data", preview.bytes.len()),
        PreviewMode::Hex => println!("{}", preview.hex()),
    }
}
