//! Multi-engine orchestration.
//!
//! Fans one request out to every resolved engine, isolates their failures and
//! assembles the per-engine results in request order.
//!
//! Page-mode engines (OCR and vision NER) start together, one task each.
//! Text NER engines start as soon as the OCR engine feeding them has
//! reported, without waiting for unrelated engines. Every
//! task runs under the per-engine timeout budget; panics and timeouts become
//! failure results like any adapter error. Dropping the future returned by
//! [`Orchestrator::run`] aborts every in-flight task.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::aggregate::merge_pages;
use crate::config::Settings;
use crate::engines::{Engine, EngineInput};
use crate::error::{EngineError, RequestError};
use crate::registry::{EngineRegistry, InputMode, ResolvedEngine};
use crate::request::{ExtractionRequest, PageImage};
use crate::schema::{
    merge_entities, AggregateResult, EngineKind, EngineOutput, EngineResult, EntityMap, OcrOutput,
};

type Outcome = Result<EngineOutput, EngineError>;

/// Tunables for one orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Inserted between page texts when merging multi-page OCR output.
    pub page_separator: String,
    /// Wall-clock budget for one engine over the whole document.
    pub engine_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            page_separator: "\n".to_string(),
            engine_timeout: Duration::from_secs(120),
        }
    }
}

impl OrchestratorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            page_separator: settings.page_separator.clone(),
            engine_timeout: settings.engine_timeout,
        }
    }
}

/// Runs extraction requests against a shared registry.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<EngineRegistry>,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(registry: Arc<EngineRegistry>, options: OrchestratorOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Process one input and return one result per requested engine.
    ///
    /// Request errors are returned before any adapter is invoked.
    pub async fn run(&self, request: ExtractionRequest) -> Result<AggregateResult, RequestError> {
        let request_id = uuid::Uuid::new_v4();
        let span = info_span!("extract", %request_id);
        self.run_inner(request).instrument(span).await
    }

    async fn run_inner(&self, request: ExtractionRequest) -> Result<AggregateResult, RequestError> {
        if request.pages.is_empty() && request.text.is_none() {
            return Err(RequestError::EmptyInput);
        }
        if request.engines.is_empty() {
            return Err(RequestError::NoEngines);
        }

        let resolved = self.registry.resolve(&request.engines)?;

        let wants_pages = resolved.iter().any(|e| e.input == InputMode::Pages);
        if wants_pages && request.pages.is_empty() {
            return Err(RequestError::EmptyInput);
        }
        let has_ocr = resolved.iter().any(|e| e.kind == EngineKind::Ocr);
        let has_text_ner = resolved
            .iter()
            .any(|e| e.kind == EngineKind::Ner && e.input == InputMode::Text);
        if has_text_ner && !has_ocr && request.text.is_none() {
            return Err(RequestError::MissingText);
        }

        info!(
            "Processing {} page(s) with {} engine(s): {:?}",
            request.pages.len(),
            resolved.len(),
            resolved.iter().map(|e| e.name.as_str()).collect::<Vec<_>>()
        );

        let pages = Arc::new(request.pages);
        let languages = Arc::new(request.languages);
        let budget = self.options.engine_timeout;
        let mut outcomes: Vec<Option<Outcome>> = resolved.iter().map(|_| None).collect();

        // Page-mode engines start together
        let mut tasks = JoinSet::new();
        for (slot, engine) in resolved.iter().enumerate() {
            if engine.input != InputMode::Pages {
                continue;
            }
            let job = run_pages(
                engine.engine.clone(),
                engine.kind,
                pages.clone(),
                languages.clone(),
                self.options.page_separator.clone(),
            );
            spawn_guarded(&mut tasks, slot, engine.name.clone(), budget, job);
        }

        // Text NER starts as soon as its input text is settled, while the
        // remaining page-mode engines keep running.
        let mut ner_pending = has_text_ner;
        loop {
            if ner_pending {
                let choice = select_ner_text(
                    &resolved,
                    &outcomes,
                    request.ner_text_source.as_deref(),
                    request.text.as_deref(),
                    tasks.is_empty(),
                );
                if let NerText::Ready(text) = choice {
                    ner_pending = false;
                    for (slot, engine) in resolved.iter().enumerate() {
                        if engine.kind != EngineKind::Ner || engine.input != InputMode::Text {
                            continue;
                        }
                        match &text {
                            Some(text) => {
                                let job = run_text(engine.engine.clone(), text.clone());
                                spawn_guarded(&mut tasks, slot, engine.name.clone(), budget, job);
                            }
                            None => {
                                outcomes[slot] = Some(Err(EngineError::missing_input(
                                    "no OCR text available for entity extraction",
                                )));
                            }
                        }
                    }
                    continue;
                }
            }

            match tasks.join_next().await {
                Some(Ok((slot, outcome))) => outcomes[slot] = Some(outcome),
                // Slots left empty are reported as internal failures
                Some(Err(e)) => error!("Engine task aborted: {}", e),
                None => break,
            }
        }

        let results = resolved
            .iter()
            .zip(outcomes)
            .map(|(engine, outcome)| {
                let outcome = outcome
                    .unwrap_or_else(|| Err(EngineError::internal("engine task did not report")));
                match outcome {
                    Ok(output) => EngineResult::success(&engine.name, engine.kind, output),
                    Err(err) => {
                        warn!("Engine {} failed: {}", engine.name, err);
                        EngineResult::failure(&engine.name, engine.kind, err)
                    }
                }
            })
            .collect::<Vec<_>>();

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            "Extraction complete: {} succeeded, {} failed",
            results.len() - failed,
            failed
        );
        Ok(AggregateResult::from_ordered(results))
    }
}

/// Spawn one engine job with panic capture and the timeout budget applied.
fn spawn_guarded<F>(
    tasks: &mut JoinSet<(usize, Outcome)>,
    slot: usize,
    name: String,
    budget: Duration,
    job: F,
) where
    F: Future<Output = Outcome> + Send + 'static,
{
    let span = info_span!("engine", engine = %name);
    tasks.spawn(
        async move {
            let guarded = AssertUnwindSafe(job).catch_unwind();
            let outcome = match tokio::time::timeout(budget, guarded).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(panic)) => Err(EngineError::internal(format!(
                    "{} panicked: {}",
                    name,
                    panic_message(panic.as_ref())
                ))),
                Err(_) => Err(EngineError::timeout(format!(
                    "{} did not finish within {:?}",
                    name, budget
                ))),
            };
            debug!("Engine {} finished (ok={})", name, outcome.is_ok());
            (slot, outcome)
        }
        .instrument(span),
    );
}

/// Run a page-mode engine over every page, in page order.
async fn run_pages(
    engine: Arc<dyn Engine>,
    kind: EngineKind,
    pages: Arc<Vec<PageImage>>,
    languages: Arc<Vec<String>>,
    separator: String,
) -> Outcome {
    let mut texts: Vec<OcrOutput> = Vec::new();
    let mut entities = EntityMap::new();

    for page in pages.iter() {
        let input = EngineInput::Page {
            image: page,
            languages: &languages,
        };
        let output = engine
            .extract(input)
            .await
            .map_err(|e| e.on_page(page.index))?;

        match (kind, output) {
            (EngineKind::Ocr, EngineOutput::Text(out)) => texts.push(tag_page(out, page.index)),
            (EngineKind::Ner, EngineOutput::Entities(map)) => merge_entities(&mut entities, map),
            (kind, _) => {
                return Err(EngineError::internal(format!(
                    "{} returned output of the wrong kind for a {} engine",
                    engine.name(),
                    kind
                ))
                .on_page(page.index))
            }
        }
    }

    Ok(match kind {
        EngineKind::Ocr => EngineOutput::Text(merge_pages(texts, &separator)),
        EngineKind::Ner => EngineOutput::Entities(entities),
    })
}

async fn run_text(engine: Arc<dyn Engine>, text: Arc<str>) -> Outcome {
    match engine.extract(EngineInput::Text(&text)).await? {
        EngineOutput::Entities(map) => Ok(EngineOutput::Entities(map)),
        EngineOutput::Text(_) => Err(EngineError::internal(format!(
            "{} returned text for an entity extraction",
            engine.name()
        ))),
    }
}

/// Ensure every span carries the page it was recognized on.
fn tag_page(mut out: OcrOutput, page: usize) -> OcrOutput {
    for span in &mut out.spans {
        span.page = page;
    }
    out
}

/// Text NER input, once it can be decided.
#[derive(Debug, PartialEq)]
enum NerText {
    /// An OCR engine that could supply the text has not reported yet.
    Pending,
    /// The chosen text, or `None` when no source produced any.
    Ready(Option<Arc<str>>),
}

/// Pick the text fed to text NER engines.
///
/// Preference: the named source engine, then the first successful OCR engine
/// in request order, then the text supplied with the request. Unreported
/// slots count as failed once `all_reported` is set.
fn select_ner_text(
    resolved: &[ResolvedEngine],
    outcomes: &[Option<Outcome>],
    source: Option<&str>,
    supplied: Option<&str>,
    all_reported: bool,
) -> NerText {
    enum Slot<'a> {
        Pending,
        Failed,
        Text(&'a str),
    }
    let slot_text = |slot: usize| match &outcomes[slot] {
        Some(Ok(EngineOutput::Text(out))) => Slot::Text(out.text.as_str()),
        None if !all_reported => Slot::Pending,
        _ => Slot::Failed,
    };

    if let Some(source) = source {
        match resolved
            .iter()
            .position(|e| e.name == source && e.kind == EngineKind::Ocr)
        {
            Some(slot) => match slot_text(slot) {
                Slot::Text(text) => return NerText::Ready(Some(Arc::from(text))),
                Slot::Pending => return NerText::Pending,
                Slot::Failed => debug!("NER text source {} failed, falling back", source),
            },
            None => debug!("NER text source {} is not a requested OCR engine", source),
        }
    }

    for (slot, _) in resolved
        .iter()
        .enumerate()
        .filter(|(_, e)| e.kind == EngineKind::Ocr)
    {
        match slot_text(slot) {
            Slot::Text(text) => return NerText::Ready(Some(Arc::from(text))),
            Slot::Pending => return NerText::Pending,
            Slot::Failed => {}
        }
    }
    NerText::Ready(supplied.map(Arc::from))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
