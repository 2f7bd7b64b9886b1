//! End-to-end `ask` pipeline: question → plan → retrieve → aggregate →
//! extract → refine → prompt.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument, warn};

use quarry_search::{BackendRegistry, PageFetcher, normalize_path};
use quarry_shared::{PipelineConfig, QuarryError, Result};

use crate::aggregator;
use crate::assembler::{self, AssembleOptions};
use crate::context::RequestContext;
use crate::extractor;
use crate::llm::{ChatMessage, LlmClient};
use crate::planner;
use crate::refiner;
use crate::retriever::{self, Retrieval, RetrieveOptions};
use crate::retry::with_retries;
use crate::similarity::{BigramSimilarity, Similarity};

const ANSWER_SYSTEM_PROMPT: &str =
    "You are a careful research assistant. Answer from the provided references only.";

/// One user request.
#[derive(Debug, Clone)]
pub struct AskRequest {
    /// The user's question.
    pub question: String,
    /// Routing path selecting the search backend (e.g. `/searxng/news`).
    pub path: String,
    /// Overrides `search_limit`.
    pub limit: Option<usize>,
    /// Overrides `rerank`.
    pub rerank: Option<bool>,
    /// Overrides `deep`.
    pub deep: Option<bool>,
}

impl AskRequest {
    pub fn new(question: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            path: path.into(),
            limit: None,
            rerank: None,
            deep: None,
        }
    }
}

/// The wired-up pipeline: configuration plus collaborators.
///
/// Holds no per-request state; one instance serves any number of requests,
/// each with its own [`RequestContext`].
pub struct Pipeline {
    config: PipelineConfig,
    registry: Arc<BackendRegistry>,
    fetcher: Arc<dyn PageFetcher>,
    llm: Option<Arc<dyn LlmClient>>,
    similarity: Arc<dyn Similarity>,
}

impl Pipeline {
    /// A pipeline without an LLM: planning falls back to the raw question and
    /// the prompt is built from documents.
    pub fn new(
        config: PipelineConfig,
        registry: Arc<BackendRegistry>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            config,
            registry,
            fetcher,
            llm: None,
            similarity: Arc::new(BigramSimilarity),
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_similarity(mut self, similarity: Arc<dyn Similarity>) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Every routing path the registry answers.
    pub fn paths(&self) -> Vec<String> {
        self.registry.all_paths()
    }

    /// Run every stage for `request` and return the final prompt.
    ///
    /// Each stage's artifact is stored in `ctx.results` as soon as it exists,
    /// so a cancelled run still exposes what was collected.
    #[instrument(skip_all, fields(request_id = %ctx.id(), path = %request.path))]
    pub async fn run(&self, ctx: &mut RequestContext, request: &AskRequest) -> Result<String> {
        let start = Instant::now();
        let path = normalize_path(&request.path);
        let backend = self.registry.resolve(&path).ok_or_else(|| {
            QuarryError::validation(format!("no search backend for path {path}"))
        })?;
        let question = request.question.trim();
        if question.is_empty() {
            return Err(QuarryError::validation("question must not be empty"));
        }

        let limit = request.limit.unwrap_or(self.config.search_limit);
        let rerank = request.rerank.unwrap_or(self.config.rerank);
        let deep = request.deep.unwrap_or(self.config.deep);
        let llm = self.llm.as_deref();

        info!(backend = backend.name(), limit, rerank, deep, "starting ask pipeline");

        // --- Phase 1: Plan ---
        ctx.check_cancelled()?;
        let plans = planner::plan(ctx, llm, self.config.max_attempts, question).await?;
        ctx.results.planned_queries = plans.clone();

        // --- Phase 2: Retrieve ---
        ctx.check_cancelled()?;
        let opts = RetrieveOptions {
            path: &path,
            question,
            limit,
            rerank,
        };
        let retrieval = match retriever::retrieve(ctx, backend.as_ref(), &plans, &opts).await {
            Ok(retrieval) => retrieval,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(error = %e, "retrieval failed");
                ctx.log(format!("搜索失败: {e}"));
                Retrieval::default()
            }
        };
        ctx.results.search_results = retrieval.documents;
        if retrieval.cancelled {
            return Err(QuarryError::Cancelled);
        }

        // --- Phase 3: Aggregate ---
        ctx.check_cancelled()?;
        let fetch_count = ctx.results.search_results.len().min(self.config.page_fetch_limit);
        let summaries = ctx.results.search_results[..fetch_count].to_vec();
        let docs =
            aggregator::aggregate(ctx, self.fetcher.as_ref(), self.similarity.as_ref(), &summaries)
                .await?;
        ctx.results.details_search_results = docs;

        // --- Phase 4/5: Extract + Refine ---
        let assemble = AssembleOptions {
            budget: self.config.budget,
            document_limit: self.config.prompt_document_limit,
        };
        let prompt = match (deep, llm) {
            (true, Some(llm)) => {
                ctx.check_cancelled()?;
                let facts = extractor::extract_facts(
                    ctx,
                    llm,
                    &self.config,
                    &ctx.results.details_search_results,
                    question,
                )
                .await?;
                ctx.results.parsed_facts = facts;

                if ctx.results.parsed_facts.is_empty() {
                    ctx.log("没有提取到事实，改用原始资料");
                    self.prompt_from_documents(ctx, question, assemble)?
                } else {
                    ctx.check_cancelled()?;
                    let refined = refiner::refine(
                        ctx,
                        llm,
                        &self.config,
                        &ctx.results.parsed_facts,
                        question,
                    )
                    .await?;
                    ctx.check_cancelled()?;
                    let prompt =
                        assembler::assemble_from_facts(ctx, &refined, question, self.config.budget);
                    ctx.results.refined_facts = Some(refined);
                    prompt
                }
            }
            (true, None) => {
                ctx.log("未配置模型，跳过事实提取");
                self.prompt_from_documents(ctx, question, assemble)?
            }
            (false, _) => self.prompt_from_documents(ctx, question, assemble)?,
        };

        // --- Phase 6: Prompt ---
        ctx.results.final_prompt = Some(prompt.clone());
        info!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            prompt_len = prompt.len(),
            "ask pipeline complete"
        );
        ctx.log("提示词已生成");
        Ok(prompt)
    }

    /// Send the final prompt to the LLM and return its answer.
    #[instrument(skip_all, fields(request_id = %ctx.id()))]
    pub async fn answer(&self, ctx: &RequestContext, prompt: &str) -> Result<String> {
        let llm = self
            .llm
            .as_deref()
            .ok_or_else(|| QuarryError::config("no LLM configured for answering"))?;
        ctx.check_cancelled()?;
        ctx.log("正在生成回答");

        let messages = [
            ChatMessage::system(ANSWER_SYSTEM_PROMPT),
            ChatMessage::user(prompt),
        ];
        let responses = with_retries(ctx.token(), self.config.max_attempts, "answer", || {
            llm.complete(&messages)
        })
        .await?;

        responses
            .into_iter()
            .next()
            .ok_or_else(|| QuarryError::Llm("model returned no answer".into()))
    }

    fn prompt_from_documents(
        &self,
        ctx: &RequestContext,
        question: &str,
        opts: AssembleOptions,
    ) -> Result<String> {
        ctx.check_cancelled()?;
        Ok(assembler::assemble_from_documents(
            ctx,
            &ctx.results.details_search_results,
            question,
            opts,
        ))
    }
}
