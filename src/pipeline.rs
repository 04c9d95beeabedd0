use crate::ad::{build_description, build_title, parse_amount, should_publish};
use crate::browser::{
    BrowserProfile, CategoryMap, HumanGate, Pacing, Pause, SessionStore, SubmissionError,
    SubmissionErrorKind, SubmissionSession, WebDriverPage,
};
use crate::google::{DriveFile, PhotoSource, RowStore, extract_folder_id};
use crate::metrics::{self, RunCounters};
use crate::models::{AdPayload, MAX_IMAGES, Row, RunOutcome, StageReport};
use serde::Serialize;
use serde_json::{Value, json};
use std::{
    future::Future,
    path::{Path, PathBuf},
    time::Instant,
};
use thiserror::Error;
use tokio::time::{Duration, sleep};
use tracing::{debug, error, info, warn};

/// Submits one finished payload to the marketplace and returns the listing URL.
#[allow(async_fn_in_trait)]
pub trait Publisher {
    async fn publish(&self, payload: &AdPayload) -> Result<String, PipelineError>;
}

impl<T: Publisher> Publisher for &T {
    async fn publish(&self, payload: &AdPayload) -> Result<String, PipelineError> {
        (**self).publish(payload).await
    }
}

/// Publishes through a fresh Chrome session per payload.
pub struct BrowserPublisher<P, G> {
    profile: BrowserProfile,
    pacing: P,
    gate: G,
    categories: CategoryMap,
    store: SessionStore,
}

impl<P, G> BrowserPublisher<P, G> {
    pub fn new(
        profile: BrowserProfile,
        pacing: P,
        gate: G,
        categories: CategoryMap,
        store: SessionStore,
    ) -> Self {
        Self {
            profile,
            pacing,
            gate,
            categories,
            store,
        }
    }
}

impl<P: Pacing, G: HumanGate> Publisher for BrowserPublisher<P, G> {
    async fn publish(&self, payload: &AdPayload) -> Result<String, PipelineError> {
        let page = WebDriverPage::launch(&self.profile)
            .await
            .map_err(|err| PipelineError::internal("launch_browser", err.to_string()))?;
        SubmissionSession::new(
            page,
            &self.pacing,
            &self.gate,
            &self.categories,
            &self.store,
        )
        .publish(payload)
        .await
        .map_err(PipelineError::from)
    }
}

/// One orchestrator pass over the sheet: filter, cap, then publish rows in order.
pub struct Pipeline<S, Ph, Pb, Pc> {
    rows: S,
    photos: Ph,
    publisher: Pb,
    pacing: Pc,
    max_ads_per_run: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowReport {
    pub row_index: u32,
    pub outcome: RunOutcome,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub counters: RunCounters,
    pub rows: Vec<RowReport>,
}

impl<S, Ph, Pb, Pc> Pipeline<S, Ph, Pb, Pc>
where
    S: RowStore,
    Ph: PhotoSource,
    Pb: Publisher,
    Pc: Pacing,
{
    pub fn new(rows: S, photos: Ph, publisher: Pb, pacing: Pc, max_ads_per_run: usize) -> Self {
        Self {
            rows,
            photos,
            publisher,
            pacing,
            max_ads_per_run,
        }
    }

    /// Fails only when the sheet cannot be read; row failures are written back and skipped.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let mut report = RunReport::default();

        let rows = self
            .rows
            .fetch_rows()
            .await
            .map_err(|err| PipelineError::internal("fetch_rows", err.to_string()))?;
        report.counters.fetched = rows.len();
        info!(target = "lbc.run", rows = rows.len(), "rows fetched");

        let mut selected: Vec<Row> = rows.into_iter().filter(should_publish).collect();
        report.counters.eligible = selected.len();
        if selected.is_empty() {
            warn!(target = "lbc.run", "no rows to publish");
            return Ok(report);
        }
        if selected.len() > self.max_ads_per_run {
            warn!(
                target = "lbc.run",
                cap = self.max_ads_per_run,
                eligible = selected.len(),
                "limiting ads for this run"
            );
            selected.truncate(self.max_ads_per_run);
        }
        report.counters.selected = selected.len();

        let total = selected.len();
        let mut cooldown_rounds = 1u32;
        for (idx, row) in selected.iter().enumerate() {
            info!(
                target = "lbc.run",
                row = row.row_index,
                position = idx + 1,
                total,
                "processing row"
            );

            let mut stages = Vec::new();
            let outcome = match self.process_row(row, &mut stages).await {
                Ok(url) => {
                    report.counters.record_published();
                    info!(target = "lbc.run", row = row.row_index, url = %url, "ad published");
                    RunOutcome::Published { url }
                }
                Err(err) => {
                    report.counters.record_failed(err.kind().as_str());
                    match err.kind() {
                        PipelineErrorKind::SelectorMismatch => error!(
                            target = "lbc.run",
                            row = row.row_index,
                            stage = err.stage(),
                            error = %err,
                            "form control missing, selectors need updating"
                        ),
                        PipelineErrorKind::BotDefense => {
                            cooldown_rounds = 2;
                            error!(
                                target = "lbc.run",
                                row = row.row_index,
                                stage = err.stage(),
                                error = %err,
                                "bot defense suspected, slowing down for the rest of the run"
                            );
                        }
                        _ => error!(
                            target = "lbc.run",
                            row = row.row_index,
                            stage = err.stage(),
                            error = %err,
                            "row failed"
                        ),
                    }
                    RunOutcome::Failed {
                        error: err.detail().to_string(),
                    }
                }
            };

            self.write_back(row.row_index, &outcome).await;
            let published = outcome.is_published();
            report.rows.push(RowReport {
                row_index: row.row_index,
                outcome,
                stages,
            });

            if published && idx + 1 < total {
                self.cool_down(cooldown_rounds).await;
            }
        }

        info!(
            target = "lbc.run",
            eligible = report.counters.eligible,
            processed = report.counters.processed(),
            published = report.counters.published,
            failed = report.counters.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        Ok(report)
    }

    async fn process_row(
        &self,
        row: &Row,
        stages: &mut Vec<StageReport>,
    ) -> Result<String, PipelineError> {
        let draft = self
            .capture_stage("prepare_listing", stages, prepare_listing(row))
            .await?;
        let files = self
            .capture_stage("resolve_photos", stages, self.resolve_photos(row))
            .await?;

        // Removed on drop, whatever the row's outcome.
        let scratch = tempfile::Builder::new()
            .prefix("lbc-row-")
            .tempdir()
            .map_err(|err| PipelineError::internal("download_images", err.to_string()))?;
        let images = self
            .capture_stage(
                "download_images",
                stages,
                self.download_images(&files, scratch.path()),
            )
            .await?;

        let payload = AdPayload::new(
            draft.title,
            draft.description,
            draft.price_eur,
            draft.category,
            images,
        );
        self.capture_stage("publish", stages, self.submit(&payload))
            .await
    }

    async fn resolve_photos(
        &self,
        row: &Row,
    ) -> Result<StageOutcome<Vec<DriveFile>>, PipelineError> {
        let folder_id = extract_folder_id(&row.photo_folder).ok_or_else(|| {
            PipelineError::input_data(
                "resolve_photos",
                "Missing/invalid Dossier photos (Drive folder URL)",
            )
        })?;
        let files = self
            .photos
            .list_images(&folder_id)
            .await
            .map_err(|err| PipelineError::internal("resolve_photos", err.to_string()))?;
        if files.is_empty() {
            return Err(PipelineError::input_data(
                "resolve_photos",
                "No images found in Drive folder",
            ));
        }
        let output = json!({ "folder_id": folder_id, "images_found": files.len() });
        Ok(StageOutcome::new(files, output))
    }

    async fn download_images(
        &self,
        files: &[DriveFile],
        dir: &Path,
    ) -> Result<StageOutcome<Vec<PathBuf>>, PipelineError> {
        info!(
            target = "lbc.run",
            found = files.len(),
            limit = MAX_IMAGES,
            "downloading images"
        );
        let mut paths = Vec::with_capacity(files.len().min(MAX_IMAGES));
        for (idx, file) in files.iter().take(MAX_IMAGES).enumerate() {
            let dst = dir.join(format!("{:02}_{}", idx + 1, safe_file_name(&file.name)));
            self.photos
                .download(file, &dst)
                .await
                .map_err(|err| PipelineError::internal("download_images", err.to_string()))?;
            paths.push(dst);
        }
        let output = json!({ "downloaded": paths.len() });
        Ok(StageOutcome::new(paths, output))
    }

    async fn submit(&self, payload: &AdPayload) -> Result<StageOutcome<String>, PipelineError> {
        let url = self.publisher.publish(payload).await?;
        let output = json!({ "url": url });
        Ok(StageOutcome::new(url, output))
    }

    async fn write_back(&self, row_index: u32, outcome: &RunOutcome) {
        let updates = outcome.cell_updates();
        match self.rows.update_cells(row_index, &updates).await {
            Ok(cells) => debug!(target = "lbc.run", row = row_index, cells, "row written back"),
            Err(err) => error!(
                target = "lbc.run",
                row = row_index,
                error = %err,
                "could not write row result back to the sheet"
            ),
        }
    }

    async fn cool_down(&self, rounds: u32) {
        let mut delay = Duration::ZERO;
        for _ in 0..rounds {
            delay += self.pacing.delay(Pause::Cooldown);
        }
        info!(
            target = "lbc.run",
            secs = delay.as_secs(),
            rounds,
            "waiting before next ad"
        );
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    async fn capture_stage<T, Fut>(
        &self,
        name: &'static str,
        stages: &mut Vec<StageReport>,
        fut: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<StageOutcome<T>, PipelineError>>,
    {
        let started = Instant::now();
        let outcome = fut.await?;
        let elapsed_ms = started.elapsed().as_millis();
        metrics::stage_elapsed(name, elapsed_ms);
        stages.push(StageReport::new(name, elapsed_ms, outcome.output));
        Ok(outcome.value)
    }
}

struct ListingDraft {
    price_eur: u64,
    title: String,
    description: String,
    category: String,
}

async fn prepare_listing(row: &Row) -> Result<StageOutcome<ListingDraft>, PipelineError> {
    let price_eur = parse_amount(&row.asking_unit_price).ok_or_else(|| {
        PipelineError::input_data("prepare_listing", "Missing price (Prix demandé à l'unité)")
    })?;
    let category = row.category.trim();
    if category.is_empty() {
        return Err(PipelineError::input_data(
            "prepare_listing",
            "Missing category (Catégorie)",
        ));
    }
    let title = build_title(row);
    let description = build_description(row);
    debug!(
        target = "lbc.run",
        row = row.row_index,
        price_eur,
        title = %title,
        description_chars = description.chars().count(),
        "listing prepared"
    );

    let output = json!({
        "price_eur": price_eur,
        "title": title,
        "category": category,
    });
    Ok(StageOutcome::new(
        ListingDraft {
            price_eur,
            title,
            description,
            category: category.to_string(),
        },
        output,
    ))
}

fn safe_file_name(name: &str) -> String {
    name.chars()
        .map(|ch| if matches!(ch, '/' | '\\') { '_' } else { ch })
        .collect()
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    /// Missing price, category or photos in the row itself.
    InputData,
    SelectorMismatch,
    BotDefense,
    AuthenticationGate,
    Internal,
}

impl PipelineErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineErrorKind::InputData => "input_data",
            PipelineErrorKind::SelectorMismatch => "selector_mismatch",
            PipelineErrorKind::BotDefense => "bot_defense",
            PipelineErrorKind::AuthenticationGate => "authentication_gate",
            PipelineErrorKind::Internal => "internal",
        }
    }
}

impl PipelineError {
    pub fn new(stage: &'static str, kind: PipelineErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    pub fn input_data(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, PipelineErrorKind::InputData, message)
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, PipelineErrorKind::Internal, message)
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

impl From<SubmissionError> for PipelineError {
    fn from(err: SubmissionError) -> Self {
        let kind = match err.kind() {
            SubmissionErrorKind::SelectorMismatch => PipelineErrorKind::SelectorMismatch,
            SubmissionErrorKind::BotDefense => PipelineErrorKind::BotDefense,
            SubmissionErrorKind::Intervention => PipelineErrorKind::AuthenticationGate,
            SubmissionErrorKind::Driver => PipelineErrorKind::Internal,
        };
        Self::new(err.stage().as_str(), kind, err.detail())
    }
}

#[derive(Debug)]
pub struct StageOutcome<T> {
    pub value: T,
    pub output: Value,
}

impl<T> StageOutcome<T> {
    fn new(value: T, output: Value) -> Self {
        Self { value, output }
    }
}
