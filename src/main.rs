mod ad;
mod browser;
mod config;
mod google;
mod http;
mod metrics;
mod models;
mod pipeline;

use browser::{BrowserProfile, CategoryMap, HumanPacing, SessionStore, StdinGate};
use config::AppConfig;
use eyre::WrapErr;
use google::{GoogleDrive, GoogleSheets, ServiceAccountAuth};
use pipeline::{BrowserPublisher, Pipeline};
use std::sync::Arc;
use tracing::{Instrument, info, info_span};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    init_tracing();

    let config = AppConfig::from_env().wrap_err("invalid configuration")?;
    info!(
        target = "lbc.run",
        sheets_id = %config.sheets_id_preview(),
        sheet_name = %config.sheet_name,
        headless = config.headless,
        max_ads_per_run = config.max_ads_per_run,
        "configuration loaded"
    );

    let http = http::build_client(&config);
    let auth = Arc::new(
        ServiceAccountAuth::from_file(&config.service_account_path, http.clone())
            .wrap_err("cannot load the Google service account")?,
    );
    let sheets = GoogleSheets::new(
        http.clone(),
        Arc::clone(&auth),
        config.sheets_id.clone(),
        config.sheet_name.clone(),
    );
    let drive = GoogleDrive::new(http, Arc::clone(&auth));

    let categories = match &config.category_map_path {
        Some(path) => CategoryMap::from_file(path).wrap_err("cannot load the category map")?,
        None => CategoryMap::default(),
    };
    if categories.is_empty() {
        info!(target = "lbc.run", "no category map loaded, sheet labels are used as-is");
    }
    let store = SessionStore::new(config.storage_state_path.clone());
    info!(
        target = "lbc.run",
        session_state = %store.path().display(),
        mapped_categories = categories.len(),
        "browser layer ready"
    );
    let (min, max) = config.pacing_window();
    let publisher = BrowserPublisher::new(
        BrowserProfile::from(&config),
        HumanPacing::new(min, max),
        StdinGate::new(config.login_timeout),
        categories,
        store,
    );

    let pipeline = Pipeline::new(
        sheets,
        drive,
        publisher,
        HumanPacing::new(min, max),
        config.max_ads_per_run,
    );

    let run_id = Uuid::new_v4();
    let span = info_span!("run", %run_id);
    let report = pipeline
        .run()
        .instrument(span)
        .await
        .wrap_err("run could not start")?;

    info!(
        target = "lbc.run",
        %run_id,
        fetched = report.counters.fetched,
        eligible = report.counters.eligible,
        published = report.counters.published,
        failed = report.counters.failed,
        "done"
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
