use crate::browser::categories::CategoryMap;
use crate::browser::driver::{DriverError, PageDriver, Target};
use crate::browser::gate::{GateError, HumanGate, Intervention};
use crate::browser::pacing::{Pacing, Pause};
use crate::browser::selectors::{
    CATEGORY_CHOOSER_LABEL, DEPOSIT_URL, DESCRIPTION_LABEL, HOME_URL, LOGIN_LABEL, PRICE_LABEL,
    SUBMIT_LABELS, TITLE_LABEL, TYPING_CHUNK_CHARS, VIEWPORT, is_marketplace_url,
};
use crate::browser::state::SessionStore;
use crate::models::AdPayload;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    Init,
    Navigated,
    Authenticated,
    FormFilled,
    Submitted,
    Done,
    Failed,
}

impl SessionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStage::Init => "init",
            SessionStage::Navigated => "navigated",
            SessionStage::Authenticated => "authenticated",
            SessionStage::FormFilled => "form_filled",
            SessionStage::Submitted => "submitted",
            SessionStage::Done => "done",
            SessionStage::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionErrorKind {
    /// An expected control is missing; the page layout or wording changed.
    SelectorMismatch,
    /// The page looks like a bot-block variant or the submit left the marketplace.
    BotDefense,
    /// The manual-intervention pause timed out or was cancelled.
    Intervention,
    Driver,
}

impl fmt::Display for SubmissionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SubmissionErrorKind::SelectorMismatch => "selector mismatch",
            SubmissionErrorKind::BotDefense => "bot defense",
            SubmissionErrorKind::Intervention => "manual intervention",
            SubmissionErrorKind::Driver => "browser error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
#[error("{kind} while {stage:?}: {message}")]
pub struct SubmissionError {
    stage: SessionStage,
    kind: SubmissionErrorKind,
    message: String,
}

impl SubmissionError {
    pub(crate) fn new(stage: SessionStage, kind: SubmissionErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }

    /// Last stage reached before the failure.
    pub fn stage(&self) -> SessionStage {
        self.stage
    }

    pub fn kind(&self) -> SubmissionErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

/// One submission through one browser context:
/// `Init → Navigated → Authenticated → FormFilled → Submitted → Done`,
/// or `Failed` from any of them.
pub struct SubmissionSession<'a, D, P, G> {
    driver: D,
    pacing: &'a P,
    gate: &'a G,
    categories: &'a CategoryMap,
    store: &'a SessionStore,
    stage: SessionStage,
    pointer: (f64, f64),
    restored: bool,
}

impl<'a, D, P, G> SubmissionSession<'a, D, P, G>
where
    D: PageDriver,
    P: Pacing,
    G: HumanGate,
{
    pub fn new(
        driver: D,
        pacing: &'a P,
        gate: &'a G,
        categories: &'a CategoryMap,
        store: &'a SessionStore,
    ) -> Self {
        Self {
            driver,
            pacing,
            gate,
            categories,
            store,
            stage: SessionStage::Init,
            pointer: (VIEWPORT.0 as f64 / 2.0, VIEWPORT.1 as f64 / 2.0),
            restored: false,
        }
    }

    /// Publishes the payload and returns the resulting listing URL.
    ///
    /// Session state is saved and the browser closed whatever the outcome.
    pub async fn publish(mut self, payload: &AdPayload) -> Result<String, SubmissionError> {
        let result = self.drive(payload).await;
        if let Err(err) = &result {
            self.stage = SessionStage::Failed;
            match err.kind() {
                SubmissionErrorKind::SelectorMismatch => error!(
                    target = "lbc.session",
                    stage = ?err.stage(),
                    error = %err,
                    "form control not found, selectors need updating"
                ),
                _ => warn!(target = "lbc.session", stage = ?err.stage(), error = %err, "submission failed"),
            }
        }

        self.persist_state().await;
        if let Err(err) = self.driver.close().await {
            warn!(target = "lbc.session", error = %err, "browser close failed");
        }
        result
    }

    async fn drive(&mut self, payload: &AdPayload) -> Result<String, SubmissionError> {
        self.navigate().await?;
        self.authenticate().await?;
        self.fill_form(payload).await?;
        self.submit().await?;
        self.await_result().await
    }

    async fn navigate(&mut self) -> Result<(), SubmissionError> {
        if let Some(saved) = self.store.load().await {
            self.restored = !saved.is_empty();
            self.driver.goto(HOME_URL).await.map_err(|e| self.driver_err(e))?;
            self.driver
                .import_state(&saved)
                .await
                .map_err(|e| self.driver_err(e))?;
            debug!(target = "lbc.session", cookies = saved.cookies.len(), "session state restored");
        }
        self.open_form().await?;
        self.advance(SessionStage::Navigated);
        Ok(())
    }

    async fn open_form(&mut self) -> Result<(), SubmissionError> {
        self.driver
            .goto(DEPOSIT_URL)
            .await
            .map_err(|e| self.driver_err(e))?;
        // A failing check script is treated like a degraded page.
        let js_ok = match self.driver.javascript_enabled().await {
            Ok(enabled) => enabled,
            Err(err) => {
                return Err(self.fail(
                    SubmissionErrorKind::BotDefense,
                    format!("javascript verification failed: {err}"),
                ));
            }
        };
        if !js_ok {
            return Err(self.fail(
                SubmissionErrorKind::BotDefense,
                "javascript verification failed, page served a degraded variant",
            ));
        }
        Ok(())
    }

    async fn authenticate(&mut self) -> Result<(), SubmissionError> {
        let mut login = self
            .driver
            .find_all(&Target::link(LOGIN_LABEL))
            .await
            .map_err(|e| self.driver_err(e))?;
        if login.is_empty() {
            login = self
                .driver
                .find_all(&Target::button(LOGIN_LABEL))
                .await
                .map_err(|e| self.driver_err(e))?;
        }
        if let Some(link) = login.first() {
            info!(target = "lbc.session", "login required, pausing for the operator");
            self.driver.click(link).await.map_err(|e| self.driver_err(e))?;
            self.gate
                .wait_for_human(Intervention::Login)
                .await
                .map_err(|e| self.gate_err(e))?;
            self.open_form().await?;
        } else {
            debug!(target = "lbc.session", "already authenticated");
        }
        self.advance(SessionStage::Authenticated);
        Ok(())
    }

    async fn fill_form(&mut self, payload: &AdPayload) -> Result<(), SubmissionError> {
        self.between_groups().await?;
        let chooser = self
            .first_match(&Target::text(CATEGORY_CHOOSER_LABEL), "category chooser")
            .await?;
        self.human_click(&chooser).await?;
        let categories = self.categories;
        let category = categories.resolve(payload.category_label());
        let option = self
            .first_match(&Target::text(category), "category option")
            .await?;
        self.human_click(&option).await?;

        self.between_groups().await?;
        self.fill_text(TITLE_LABEL, payload.title()).await?;
        self.between_groups().await?;
        self.fill_text(DESCRIPTION_LABEL, payload.description())
            .await?;
        self.between_groups().await?;
        self.fill_text(PRICE_LABEL, &payload.price_eur().to_string())
            .await?;

        self.between_groups().await?;
        let inputs = self
            .driver
            .find_all(&Target::FileInput)
            .await
            .map_err(|e| self.driver_err(e))?;
        let Some(input) = inputs.first() else {
            return Err(self.fail(
                SubmissionErrorKind::SelectorMismatch,
                "no file input found for image upload",
            ));
        };
        self.driver
            .attach_files(input, payload.images())
            .await
            .map_err(|e| self.driver_err(e))?;
        debug!(target = "lbc.session", images = payload.images().len(), "images attached");

        self.advance(SessionStage::FormFilled);
        Ok(())
    }

    async fn submit(&mut self) -> Result<(), SubmissionError> {
        self.pacing.pause(Pause::Field).await;
        let mut button = None;
        for label in SUBMIT_LABELS {
            let found = self
                .driver
                .find_all(&Target::button(label))
                .await
                .map_err(|e| self.driver_err(e))?;
            if let Some(first) = found.into_iter().next() {
                debug!(target = "lbc.session", label, "submit control found");
                button = Some(first);
                break;
            }
        }

        let Some(button) = button else {
            if let Err(err) = self
                .gate
                .wait_for_human(Intervention::SubmitControlMissing)
                .await
            {
                warn!(target = "lbc.session", error = %err, "inspection pause ended");
            }
            return Err(self.fail(
                SubmissionErrorKind::SelectorMismatch,
                format!("no submit control labelled {}", SUBMIT_LABELS.join(" or ")),
            ));
        };

        self.human_click(&button).await?;
        self.advance(SessionStage::Submitted);
        Ok(())
    }

    async fn await_result(&mut self) -> Result<String, SubmissionError> {
        self.driver
            .wait_for_network_idle()
            .await
            .map_err(|e| self.driver_err(e))?;
        let url = self
            .driver
            .current_url()
            .await
            .map_err(|e| self.driver_err(e))?;
        if !is_marketplace_url(&url) {
            return Err(self.fail(
                SubmissionErrorKind::BotDefense,
                format!("unexpected url after publish: {url}"),
            ));
        }
        self.advance(SessionStage::Done);
        Ok(url)
    }

    async fn fill_text(&mut self, label: &str, text: &str) -> Result<(), SubmissionError> {
        let field = self.first_match(&Target::label(label), label).await?;
        self.human_click(&field).await?;

        let chars: Vec<char> = text.chars().collect();
        for (idx, chunk) in chars.chunks(TYPING_CHUNK_CHARS).enumerate() {
            if idx > 0 {
                self.pacing.pause(Pause::Chunk).await;
            }
            for ch in chunk {
                let mut buf = [0u8; 4];
                self.driver
                    .type_text(&field, ch.encode_utf8(&mut buf))
                    .await
                    .map_err(|e| self.driver_err(e))?;
                self.pacing.pause(Pause::Keystroke).await;
            }
        }
        debug!(target = "lbc.session", field = label, chars = chars.len(), "field typed");
        Ok(())
    }

    async fn first_match(
        &self,
        target: &Target,
        what: &str,
    ) -> Result<D::Element, SubmissionError> {
        let found = self
            .driver
            .find_all(target)
            .await
            .map_err(|e| self.driver_err(e))?;
        found.into_iter().next().ok_or_else(|| {
            self.fail(
                SubmissionErrorKind::SelectorMismatch,
                format!("{what} not found ({target:?})"),
            )
        })
    }

    /// Moves the pointer along a curved path to the element, with sub-pixel jitter, then clicks.
    async fn human_click(&mut self, element: &D::Element) -> Result<(), SubmissionError> {
        let bbox = self
            .driver
            .bounding_box(element)
            .await
            .map_err(|e| self.driver_err(e))?;
        if let Some(bbox) = bbox {
            let (cx, cy) = bbox.center();
            let (jx, jy) = self.pacing.jitter();
            self.move_pointer_to((cx + jx, cy + jy)).await?;
        }
        self.driver
            .click(element)
            .await
            .map_err(|e| self.driver_err(e))
    }

    async fn move_pointer_to(&mut self, to: (f64, f64)) -> Result<(), SubmissionError> {
        for (x, y) in self.pacing.pointer_path(self.pointer, to) {
            self.driver
                .move_pointer(x, y)
                .await
                .map_err(|e| self.driver_err(e))?;
        }
        self.pointer = to;
        Ok(())
    }

    async fn between_groups(&mut self) -> Result<(), SubmissionError> {
        self.pacing.pause(Pause::Field).await;
        if let Some((target, scroll)) = self
            .pacing
            .wander((VIEWPORT.0 as f64, VIEWPORT.1 as f64))
        {
            self.move_pointer_to(target).await?;
            if scroll != 0 {
                self.driver
                    .scroll_by(scroll)
                    .await
                    .map_err(|e| self.driver_err(e))?;
            }
        }
        Ok(())
    }

    async fn persist_state(&self) {
        match self.driver.export_state().await {
            Ok(state) if state.is_empty() && self.restored => {
                warn!(
                    target = "lbc.session",
                    path = %self.store.path().display(),
                    "browser exported no session state, keeping the saved one"
                );
            }
            Ok(state) => {
                if let Err(err) = self.store.save(&state).await {
                    warn!(target = "lbc.session", error = %err, "session state not saved");
                }
            }
            Err(err) => {
                warn!(target = "lbc.session", error = %err, "session state export failed")
            }
        }
    }

    fn advance(&mut self, next: SessionStage) {
        debug!(target = "lbc.session", from = ?self.stage, to = ?next, "stage");
        self.stage = next;
    }

    fn fail(&self, kind: SubmissionErrorKind, message: impl Into<String>) -> SubmissionError {
        SubmissionError::new(self.stage, kind, message)
    }

    fn driver_err(&self, err: DriverError) -> SubmissionError {
        self.fail(SubmissionErrorKind::Driver, err.to_string())
    }

    fn gate_err(&self, err: GateError) -> SubmissionError {
        self.fail(SubmissionErrorKind::Intervention, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::driver::{BoundingBox, Role};
    use crate::browser::pacing::NoPacing;
    use crate::browser::state::{SessionState, StoredCookie};
    use std::cell::{Cell, RefCell};
    use std::path::PathBuf;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Goto(String),
        Import(usize),
        Click(usize),
        Type(usize, String),
        Attach(usize, Vec<PathBuf>),
        Move,
        Close,
    }

    struct FakePage {
        js_enabled: bool,
        js_error: bool,
        goto_error: Option<&'static str>,
        texts: RefCell<Vec<String>>,
        logged_in: Rc<Cell<bool>>,
        missing: Vec<Target>,
        submit_label: &'static str,
        final_url: String,
        calls: RefCell<Vec<Call>>,
        next_id: Cell<usize>,
    }

    impl FakePage {
        fn new() -> Self {
            Self {
                js_enabled: true,
                js_error: false,
                goto_error: None,
                texts: RefCell::new(Vec::new()),
                logged_in: Rc::new(Cell::new(true)),
                missing: Vec::new(),
                submit_label: "Valider",
                final_url: "https://www.leboncoin.fr/ad/ameublement/2891".into(),
                calls: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
            }
        }

        fn element(&self) -> usize {
            let id = self.next_id.get() + 1;
            self.next_id.set(id);
            id
        }
    }

    impl PageDriver for &FakePage {
        type Element = usize;

        async fn goto(&self, url: &str) -> Result<(), DriverError> {
            self.calls.borrow_mut().push(Call::Goto(url.to_string()));
            match self.goto_error {
                Some(message) => Err(DriverError::Command(message.into())),
                None => Ok(()),
            }
        }

        async fn javascript_enabled(&self) -> Result<bool, DriverError> {
            if self.js_error {
                return Err(DriverError::Command("javascript error: document unloaded".into()));
            }
            Ok(self.js_enabled)
        }

        async fn find_all(&self, target: &Target) -> Result<Vec<usize>, DriverError> {
            if let Target::Text(text) = target {
                self.texts.borrow_mut().push(text.clone());
            }
            if self.missing.contains(target) {
                return Ok(Vec::new());
            }
            let found = match target {
                Target::Role {
                    role: Role::Link, ..
                } => !self.logged_in.get(),
                Target::Role {
                    role: Role::Button,
                    name,
                } => name == self.submit_label,
                _ => true,
            };
            Ok(if found { vec![self.element()] } else { Vec::new() })
        }

        async fn click(&self, element: &usize) -> Result<(), DriverError> {
            self.calls.borrow_mut().push(Call::Click(*element));
            Ok(())
        }

        async fn type_text(&self, element: &usize, text: &str) -> Result<(), DriverError> {
            self.calls
                .borrow_mut()
                .push(Call::Type(*element, text.to_string()));
            Ok(())
        }

        async fn attach_files(&self, element: &usize, paths: &[PathBuf]) -> Result<(), DriverError> {
            self.calls
                .borrow_mut()
                .push(Call::Attach(*element, paths.to_vec()));
            Ok(())
        }

        async fn bounding_box(&self, _element: &usize) -> Result<Option<BoundingBox>, DriverError> {
            Ok(Some(BoundingBox {
                x: 100.0,
                y: 200.0,
                width: 80.0,
                height: 30.0,
            }))
        }

        async fn move_pointer(&self, _x: f64, _y: f64) -> Result<(), DriverError> {
            self.calls.borrow_mut().push(Call::Move);
            Ok(())
        }

        async fn scroll_by(&self, _dy: i64) -> Result<(), DriverError> {
            Ok(())
        }

        async fn wait_for_network_idle(&self) -> Result<(), DriverError> {
            Ok(())
        }

        async fn current_url(&self) -> Result<String, DriverError> {
            Ok(self.final_url.clone())
        }

        async fn export_state(&self) -> Result<SessionState, DriverError> {
            // A browser that never reached the site has no cookies to give back.
            if self.goto_error.is_some() {
                return Ok(SessionState::default());
            }
            Ok(SessionState {
                cookies: vec![StoredCookie {
                    name: "session".into(),
                    value: "fresh".into(),
                    domain: Some(".leboncoin.fr".into()),
                    path: Some("/".into()),
                    expires: None,
                    http_only: true,
                    secure: true,
                }],
                origins: Vec::new(),
            })
        }

        async fn import_state(&self, state: &SessionState) -> Result<(), DriverError> {
            self.calls
                .borrow_mut()
                .push(Call::Import(state.cookies.len()));
            Ok(())
        }

        async fn close(self) -> Result<(), DriverError> {
            self.calls.borrow_mut().push(Call::Close);
            Ok(())
        }
    }

    struct RecordingGate {
        seen: RefCell<Vec<Intervention>>,
        logs_in: Option<Rc<Cell<bool>>>,
    }

    impl RecordingGate {
        fn new() -> Self {
            Self {
                seen: RefCell::new(Vec::new()),
                logs_in: None,
            }
        }
    }

    impl HumanGate for RecordingGate {
        async fn wait_for_human(&self, reason: Intervention) -> Result<(), GateError> {
            self.seen.borrow_mut().push(reason);
            // The operator logs in while the session is paused.
            if let Some(flag) = &self.logs_in {
                flag.set(true);
            }
            Ok(())
        }
    }

    struct TimeoutGate;

    /// Counts pauses by kind; delays stay at zero.
    #[derive(Default)]
    struct CountingPacing {
        keystrokes: Cell<usize>,
        chunks: Cell<usize>,
    }

    impl Pacing for CountingPacing {
        fn delay(&self, pause: Pause) -> std::time::Duration {
            match pause {
                Pause::Keystroke => self.keystrokes.set(self.keystrokes.get() + 1),
                Pause::Chunk => self.chunks.set(self.chunks.get() + 1),
                _ => {}
            }
            std::time::Duration::ZERO
        }

        fn pointer_path(&self, _from: (f64, f64), to: (f64, f64)) -> Vec<(f64, f64)> {
            vec![to]
        }

        fn jitter(&self) -> (f64, f64) {
            (0.0, 0.0)
        }

        fn wander(&self, _viewport: (f64, f64)) -> Option<((f64, f64), i64)> {
            None
        }
    }

    fn saved_login() -> SessionState {
        SessionState {
            cookies: vec![StoredCookie {
                name: "lbc_session".into(),
                value: "logged-in".into(),
                domain: Some(".leboncoin.fr".into()),
                path: Some("/".into()),
                expires: None,
                http_only: true,
                secure: true,
            }],
            origins: Vec::new(),
        }
    }

    impl HumanGate for TimeoutGate {
        async fn wait_for_human(&self, _reason: Intervention) -> Result<(), GateError> {
            Err(GateError::TimedOut(std::time::Duration::from_secs(1)))
        }
    }

    fn payload() -> AdPayload {
        AdPayload::new(
            "Chaise",
            "Objet: Chaise",
            45,
            "Ameublement",
            vec![PathBuf::from("/tmp/01_a.jpg"), PathBuf::from("/tmp/02_b.jpg")],
        )
    }

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path().join("state/lbc.json"));
        (dir, store)
    }

    fn typed(page: &FakePage) -> String {
        page.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Type(_, text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn publishes_and_saves_state() {
        let page = FakePage::new();
        let gate = RecordingGate::new();
        let categories = CategoryMap::default();
        let (_dir, store) = store();

        let session = SubmissionSession::new(&page, &NoPacing, &gate, &categories, &store);
        let url = session.publish(&payload()).await.expect("publish");

        assert_eq!(url, "https://www.leboncoin.fr/ad/ameublement/2891");
        assert!(gate.seen.borrow().is_empty());
        assert_eq!(typed(&page), "ChaiseObjet: Chaise45");
        let calls = page.calls.borrow();
        assert_eq!(calls.first(), Some(&Call::Goto(DEPOSIT_URL.to_string())));
        assert!(calls.iter().any(|c| matches!(
            c,
            Call::Attach(_, paths) if paths == &vec![PathBuf::from("/tmp/01_a.jpg"), PathBuf::from("/tmp/02_b.jpg")]
        )));
        assert!(calls.contains(&Call::Move));
        assert_eq!(calls.last(), Some(&Call::Close));
        let saved = store.load().await.expect("state saved");
        assert_eq!(saved.cookies[0].value, "fresh");
    }

    #[tokio::test]
    async fn restores_saved_state_before_opening_form() {
        let page = FakePage::new();
        let gate = RecordingGate::new();
        let categories = CategoryMap::default();
        let (_dir, store) = store();
        store
            .save(&SessionState {
                cookies: vec![StoredCookie {
                    name: "session".into(),
                    value: "old".into(),
                    domain: None,
                    path: None,
                    expires: None,
                    http_only: false,
                    secure: false,
                }],
                origins: Vec::new(),
            })
            .await
            .expect("seed state");

        let session = SubmissionSession::new(&page, &NoPacing, &gate, &categories, &store);
        session.publish(&payload()).await.expect("publish");

        let calls = page.calls.borrow();
        assert_eq!(
            &calls[..3],
            &[
                Call::Goto(HOME_URL.to_string()),
                Call::Import(1),
                Call::Goto(DEPOSIT_URL.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn login_gate_pauses_then_reopens_form() {
        let page = FakePage::new();
        page.logged_in.set(false);
        let mut gate = RecordingGate::new();
        gate.logs_in = Some(Rc::clone(&page.logged_in));
        let categories = CategoryMap::default();
        let (_dir, store) = store();

        let session = SubmissionSession::new(&page, &NoPacing, &gate, &categories, &store);
        session.publish(&payload()).await.expect("publish");

        assert_eq!(*gate.seen.borrow(), vec![Intervention::Login]);
        let gotos = page
            .calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::Goto(url) if url == DEPOSIT_URL))
            .count();
        assert_eq!(gotos, 2);
    }

    #[tokio::test]
    async fn login_timeout_fails_and_still_saves() {
        let page = FakePage::new();
        page.logged_in.set(false);
        let categories = CategoryMap::default();
        let (_dir, store) = store();

        let session = SubmissionSession::new(&page, &NoPacing, &TimeoutGate, &categories, &store);
        let err = session.publish(&payload()).await.expect_err("should fail");

        assert_eq!(err.kind(), SubmissionErrorKind::Intervention);
        assert_eq!(err.stage(), SessionStage::Navigated);
        assert!(store.load().await.is_some());
        assert_eq!(page.calls.borrow().last(), Some(&Call::Close));
    }

    #[tokio::test]
    async fn javascript_failure_is_bot_defense() {
        let mut page = FakePage::new();
        page.js_enabled = false;
        let gate = RecordingGate::new();
        let categories = CategoryMap::default();
        let (_dir, store) = store();

        let session = SubmissionSession::new(&page, &NoPacing, &gate, &categories, &store);
        let err = session.publish(&payload()).await.expect_err("should fail");
        assert_eq!(err.kind(), SubmissionErrorKind::BotDefense);
        assert_eq!(err.stage(), SessionStage::Init);
        assert_eq!(page.calls.borrow().last(), Some(&Call::Close));
    }

    #[tokio::test]
    async fn missing_file_input_is_selector_mismatch() {
        let mut page = FakePage::new();
        page.missing.push(Target::FileInput);
        let gate = RecordingGate::new();
        let categories = CategoryMap::default();
        let (_dir, store) = store();

        let session = SubmissionSession::new(&page, &NoPacing, &gate, &categories, &store);
        let err = session.publish(&payload()).await.expect_err("should fail");
        assert_eq!(err.kind(), SubmissionErrorKind::SelectorMismatch);
        assert_eq!(err.stage(), SessionStage::Authenticated);
        assert!(store.load().await.is_some());
    }

    #[tokio::test]
    async fn falls_back_to_second_submit_label() {
        let mut page = FakePage::new();
        page.submit_label = "Publier";
        let gate = RecordingGate::new();
        let categories = CategoryMap::default();
        let (_dir, store) = store();

        let session = SubmissionSession::new(&page, &NoPacing, &gate, &categories, &store);
        assert!(session.publish(&payload()).await.is_ok());
    }

    #[tokio::test]
    async fn missing_submit_invokes_hook_then_fails() {
        let mut page = FakePage::new();
        page.submit_label = "Envoyer";
        let gate = RecordingGate::new();
        let categories = CategoryMap::default();
        let (_dir, store) = store();

        let session = SubmissionSession::new(&page, &NoPacing, &gate, &categories, &store);
        let err = session.publish(&payload()).await.expect_err("should fail");
        assert_eq!(err.kind(), SubmissionErrorKind::SelectorMismatch);
        assert_eq!(err.stage(), SessionStage::FormFilled);
        assert_eq!(
            *gate.seen.borrow(),
            vec![Intervention::SubmitControlMissing]
        );
    }

    #[tokio::test]
    async fn off_domain_result_is_bot_defense() {
        let mut page = FakePage::new();
        page.final_url = "https://geo.captcha-delivery.com/captcha/?initialCid=x".into();
        let gate = RecordingGate::new();
        let categories = CategoryMap::default();
        let (_dir, store) = store();

        let session = SubmissionSession::new(&page, &NoPacing, &gate, &categories, &store);
        let err = session.publish(&payload()).await.expect_err("should fail");
        assert_eq!(err.kind(), SubmissionErrorKind::BotDefense);
        assert_eq!(err.stage(), SessionStage::Submitted);
    }

    #[tokio::test]
    async fn long_text_is_typed_per_character() {
        let page = FakePage::new();
        let gate = RecordingGate::new();
        let categories = CategoryMap::default();
        let (_dir, store) = store();
        let description = "é".repeat(95);
        let payload = AdPayload::new("T", description.clone(), 1, "Divers", vec![PathBuf::from("a.jpg")]);

        let session = SubmissionSession::new(&page, &NoPacing, &gate, &categories, &store);
        session.publish(&payload).await.expect("publish");

        let keystrokes = page
            .calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::Type(_, t) if t == "é"))
            .count();
        assert_eq!(keystrokes, 95);
        assert_eq!(typed(&page), format!("T{description}1"));
    }

    #[tokio::test]
    async fn failed_navigation_keeps_the_saved_login() {
        let mut page = FakePage::new();
        page.goto_error = Some("net::ERR_PROXY_CONNECTION_FAILED");
        let gate = RecordingGate::new();
        let categories = CategoryMap::default();
        let (_dir, store) = store();
        store.save(&saved_login()).await.expect("seed");

        let session = SubmissionSession::new(&page, &NoPacing, &gate, &categories, &store);
        let err = session.publish(&payload()).await.expect_err("navigation fails");

        assert_eq!(err.kind(), SubmissionErrorKind::Driver);
        assert_eq!(err.stage(), SessionStage::Init);
        assert_eq!(store.load().await, Some(saved_login()));
        assert_eq!(page.calls.borrow().last(), Some(&Call::Close));
    }

    #[tokio::test]
    async fn first_run_saves_even_an_empty_state() {
        let mut page = FakePage::new();
        page.goto_error = Some("net::ERR_NAME_NOT_RESOLVED");
        let gate = RecordingGate::new();
        let categories = CategoryMap::default();
        let (_dir, store) = store();

        let session = SubmissionSession::new(&page, &NoPacing, &gate, &categories, &store);
        session.publish(&payload()).await.expect_err("navigation fails");

        assert_eq!(store.load().await, Some(SessionState::default()));
    }

    #[tokio::test]
    async fn javascript_check_error_is_bot_defense() {
        let mut page = FakePage::new();
        page.js_error = true;
        let gate = RecordingGate::new();
        let categories = CategoryMap::default();
        let (_dir, store) = store();

        let session = SubmissionSession::new(&page, &NoPacing, &gate, &categories, &store);
        let err = session.publish(&payload()).await.expect_err("bot defense");

        assert_eq!(err.kind(), SubmissionErrorKind::BotDefense);
        assert_eq!(err.stage(), SessionStage::Init);
        assert!(err.detail().contains("document unloaded"));
        assert!(!page.calls.borrow().iter().any(|c| matches!(c, Call::Type(..))));
    }

    #[tokio::test]
    async fn category_option_uses_the_mapped_label() {
        let page = FakePage::new();
        let gate = RecordingGate::new();
        let categories = CategoryMap::from_yaml_str(
            "categories:\n  - sheet: Mobilier\n    marketplace: Ameublement\n",
        )
        .expect("map");
        let (_dir, store) = store();
        let payload = AdPayload::new("Chaise", "Objet: Chaise", 45, "mobilier", vec![PathBuf::from("a.jpg")]);

        let session = SubmissionSession::new(&page, &NoPacing, &gate, &categories, &store);
        session.publish(&payload).await.expect("publish");

        let texts = page.texts.borrow();
        assert!(texts.iter().any(|t| t == "Ameublement"));
        assert!(!texts.iter().any(|t| t == "mobilier"));
    }

    #[tokio::test]
    async fn typing_pauses_per_keystroke_and_between_chunks() {
        let page = FakePage::new();
        let gate = RecordingGate::new();
        let categories = CategoryMap::default();
        let (_dir, store) = store();
        let pacing = CountingPacing::default();
        let payload = AdPayload::new("T", "x".repeat(95), 1, "Divers", vec![PathBuf::from("a.jpg")]);

        let session = SubmissionSession::new(&page, &pacing, &gate, &categories, &store);
        session.publish(&payload).await.expect("publish");

        // 95 characters split into 40 + 40 + 15.
        assert_eq!(pacing.chunks.get(), 2);
        assert_eq!(pacing.keystrokes.get(), 1 + 95 + 1);
    }
}
