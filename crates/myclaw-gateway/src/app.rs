//! Orchestrator state and lifecycle (§4.9): composition at construction,
//! `run(ctx)` wiring the outbound dispatcher, channel manager, scheduler,
//! and process loop together, and an ordered shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use myclaw_bus::{MessageBus, OutboundSubscriber};
use myclaw_channels::{Allowlist, Channel, ChannelManager};
use myclaw_core::{MyclawConfig, OutboundMessage, RetrievalMode as ConfigRetrievalMode};
use myclaw_memory::{
    retrieval::{should_retrieve, Mode as RetrievalMode},
    CompressionLlm, CompressionService, Embedder, ExtractionConfig, ExtractionLlm, ExtractionService,
    HttpEmbedder, HttpMemoryLlm, HttpReranker, LlmQueryExpander, MemoryEngine, ProfileLlm, QueryExpander,
    Reranker, RetrievalConfig, RetrievalEngine,
};
use myclaw_runtime::{AnthropicRuntime, ModelRuntime, RunRequest};
use myclaw_scheduler::{JobHandler, SchedulerEngine, SchedulerHandle};
use myclaw_telegram::TelegramChannel;
use myclaw_wecom::WecomChannel;
use myclaw_feishu::FeishuChannel;
use myclaw_whatsapp::WhatsappChannel;
use myclaw_webui::WebuiChannel;

use crate::error::Result;
use crate::job_handler::OnJobHandler;
use crate::prompt::build_system_prompt;
use crate::skills::{load_skills, Skill};

/// Fixed user-visible reply when the runtime call itself fails (§7).
const APOLOGY: &str = "Sorry, I ran into a problem processing that. Please try again in a moment.";

/// Central shared state. Each enabled memory-pipeline stage is `None` when
/// `config.memory.enabled` is false, so the process loop and the health
/// endpoint both branch on presence rather than a separate feature flag.
pub struct GatewayState {
    pub config: MyclawConfig,
    pub bus: Arc<MessageBus>,
    pub memory: Option<Arc<MemoryEngine>>,
    pub retrieval: Option<Arc<RetrievalEngine>>,
    pub extraction: Option<Arc<ExtractionService>>,
    pub compression: Option<Arc<CompressionService>>,
    pub runtime: Arc<dyn ModelRuntime>,
    pub scheduler: SchedulerEngine,
    pub channels: ChannelManager,
    pub skills: Vec<Skill>,
}

/// Forwards bus-routed outbound deliveries to a channel's `send`.
struct ChannelSubscriber {
    channel: Arc<dyn Channel>,
}

#[async_trait]
impl OutboundSubscriber for ChannelSubscriber {
    async fn deliver(&self, msg: OutboundMessage) -> std::result::Result<(), String> {
        self.channel.send(&msg).await.map_err(|e| e.to_string())
    }
}

impl GatewayState {
    /// Composition order (§4.9, each step fatal): bus + memory + system
    /// prompt, skills, runtime, scheduler, channel manager.
    pub async fn build(config: MyclawConfig) -> Result<Arc<Self>> {
        let bus = Arc::new(MessageBus::new(config.bus.capacity));
        let workspace = config.gateway.workspace.as_ref().map(PathBuf::from);

        let (memory, retrieval, extraction, compression) = if config.memory.enabled {
            build_memory_stack(&config, workspace.as_deref())?
        } else {
            (None, None, None, None)
        };

        let memory_context = memory
            .as_ref()
            .and_then(|m| m.active_tier1().ok())
            .map(|rows| rows.iter().map(|r| r.content.clone()).collect::<Vec<_>>().join("\n"))
            .unwrap_or_default();
        let system_prompt = build_system_prompt(workspace.as_deref(), &memory_context);

        let skills = match &config.gateway.skills_dir {
            Some(dir) => load_skills(&PathBuf::from(dir))?,
            None => Vec::new(),
        };
        if !skills.is_empty() {
            info!(count = skills.len(), "loaded skills");
        }

        let runtime: Arc<dyn ModelRuntime> = Arc::new(AnthropicRuntime::new(
            config.runtime.api_key.clone().unwrap_or_default(),
            config.runtime.base_url.clone(),
            config.runtime.model.clone(),
            system_prompt,
        ));

        let job_handler: Arc<dyn JobHandler> = Arc::new(OnJobHandler::new(runtime.clone(), bus.clone()));
        let scheduler = SchedulerEngine::new(&config.runtime.cron_jobs_path, Some(job_handler))?;

        let channels = build_channel_manager(&config, &bus)?;

        Ok(Arc::new(Self {
            config,
            bus,
            memory,
            retrieval,
            extraction,
            compression,
            runtime,
            scheduler,
            channels,
            skills,
        }))
    }

    /// `Run(ctx)` (§4.9): outbound dispatcher, channel startup (fatal),
    /// scheduler and compression heartbeat (non-fatal), process loop, then
    /// wait for shutdown signal and stop in order.
    pub async fn run(self: Arc<Self>, ctx: CancellationToken) -> Result<()> {
        let dispatch_bus = self.bus.clone();
        let dispatch_ctx = ctx.clone();
        tokio::spawn(async move { dispatch_bus.dispatch_outbound(dispatch_ctx).await });

        self.channels.start_all(ctx.clone()).await?;

        let scheduler_ctx = ctx.clone();
        let scheduler_state = self.clone();
        tokio::spawn(async move { scheduler_state.scheduler.run(scheduler_ctx).await });

        if let Some(extraction) = &self.extraction {
            extraction.start(ctx.clone());
        }
        if self.compression.is_some() {
            let compression_state = self.clone();
            let compression_ctx = ctx.clone();
            tokio::spawn(async move { compression_state.run_compression_heartbeat(compression_ctx).await });
        }

        let process_state = self.clone();
        let process_ctx = ctx.clone();
        tokio::spawn(async move { process_state.process_loop(process_ctx).await });

        wait_for_shutdown(ctx.clone()).await;
        info!("gateway shutting down");

        self.scheduler.stop(ctx.clone()).await;
        self.channels.stop_all().await;
        if let Some(extraction) = &self.extraction {
            extraction.stop().await;
        }
        Ok(())
    }

    /// For each inbound message: run memory retrieval and buffering (when
    /// enabled), call the runtime, and publish the result (§4.9 "Process
    /// loop").
    async fn process_loop(self: Arc<Self>, ctx: CancellationToken) {
        let Some(mut rx) = self.bus.take_inbound_receiver().await else {
            error!("process loop could not take the inbound receiver, already taken");
            return;
        };

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!("process loop stopping");
                    break;
                }
                maybe_msg = rx.recv() => {
                    let Some(msg) = maybe_msg else { break };
                    self.handle_inbound(ctx.clone(), msg).await;
                }
            }
        }
    }

    async fn handle_inbound(&self, ctx: CancellationToken, msg: myclaw_core::InboundMessage) {
        if let Some(extraction) = &self.extraction {
            if let Err(e) = extraction.buffer_message(&msg.channel, &msg.sender_id, "user", &msg.content) {
                warn!(error = %e, "failed to buffer inbound message for extraction");
            }
        }

        let prompt = self.decorate_with_memory(&msg.content).await;
        let req = RunRequest {
            prompt,
            content_blocks: msg.blocks.clone(),
            session_id: msg.session_key(),
        };

        match self.runtime.run(ctx, req).await {
            Ok(result) if !result.output.trim().is_empty() => {
                if let Some(extraction) = &self.extraction {
                    if let Err(e) = extraction.buffer_message(&msg.channel, &msg.sender_id, "assistant", &result.output) {
                        warn!(error = %e, "failed to buffer assistant reply for extraction");
                    }
                }
                let outbound = OutboundMessage::new(msg.channel.clone(), msg.chat_id.clone(), result.output);
                if let Err(e) = self.bus.publish_outbound(outbound).await {
                    error!(error = %e, "failed to publish outbound message");
                }
            }
            Ok(_) => {
                // Empty agent output: emit nothing (§7).
            }
            Err(e) => {
                warn!(error = %e, session_id = %msg.session_key(), "runtime call failed, sending apology");
                let outbound = OutboundMessage::new(msg.channel, msg.chat_id, APOLOGY);
                if let Err(e) = self.bus.publish_outbound(outbound).await {
                    error!(error = %e, "failed to publish apology message");
                }
            }
        }
    }

    /// When retrieval is enabled and the advisory gate fires, prepend
    /// formatted recent memories to the prompt text (§4.5).
    async fn decorate_with_memory(&self, content: &str) -> String {
        let Some(retrieval) = &self.retrieval else {
            return content.to_string();
        };
        if !should_retrieve(content) {
            return content.to_string();
        }
        let hits = retrieval.retrieve(content).await;
        if hits.is_empty() {
            return content.to_string();
        }
        let context: String = hits.iter().map(|m| format!("- {}\n", m.content)).collect();
        format!("Relevant memory:\n{context}\n{content}")
    }

    /// Daily/weekly compression ticker. No cron surface names this in
    /// config, so local wall-clock comparison mirrors the extraction
    /// service's own daily-flush ticker (§4.7, §4.9 "heartbeat").
    async fn run_compression_heartbeat(self: Arc<Self>, ctx: CancellationToken) {
        use chrono::{Datelike, Timelike, Weekday};

        let Some(compression) = &self.compression else { return };
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = ticker.tick() => {
                    let now = chrono::Local::now();
                    let hhmm = format!("{:02}:{:02}", now.hour(), now.minute());
                    if hhmm == self.config.memory.daily_flush {
                        let yesterday = (now.date_naive() - chrono::Duration::days(1)).format("%Y-%m-%d").to_string();
                        if let Err(e) = compression.daily_compress(&yesterday).await {
                            warn!(error = %e, "daily compress failed");
                        }
                        if now.weekday() == Weekday::Mon {
                            if let Err(e) = compression.weekly_deep_compress().await {
                                warn!(error = %e, "weekly deep compress failed");
                            }
                        }
                    }
                }
            }
        }
    }

    /// Cron job management surface, exposed for callers outside the process
    /// loop (e.g. a future admin surface).
    pub fn scheduler_handle(&self) -> SchedulerHandle {
        self.scheduler.handle()
    }

    #[cfg(test)]
    pub async fn build_for_test(mut config: MyclawConfig) -> Arc<Self> {
        let dir = tempfile::tempdir().unwrap();
        config.runtime.cron_jobs_path = dir.path().join("jobs.json").to_string_lossy().to_string();
        config.memory.enabled = false;
        Self::build(config).await.unwrap()
    }
}

fn build_memory_stack(
    config: &MyclawConfig,
    workspace: Option<&std::path::Path>,
) -> Result<(
    Option<Arc<MemoryEngine>>,
    Option<Arc<RetrievalEngine>>,
    Option<Arc<ExtractionService>>,
    Option<Arc<CompressionService>>,
)> {
    let conn = myclaw_memory::schema::open(&config.database.path)?;
    let embedder: Option<Arc<dyn Embedder>> = config.memory.embedder_url.as_ref().map(|url| {
        Arc::new(HttpEmbedder::new(
            url.clone(),
            config.runtime.api_key.clone(),
            "text-embedding-3-small".to_string(),
            Duration::from_secs(config.memory.embedding_timeout_secs),
        )) as Arc<dyn Embedder>
    });
    let reranker: Option<Arc<dyn Reranker>> = config.memory.reranker_url.as_ref().map(|url| {
        Arc::new(HttpReranker::new(
            url.clone(),
            config.runtime.api_key.clone(),
            Duration::from_secs(config.memory.rerank_timeout_secs),
        )) as Arc<dyn Reranker>
    });
    let expander: Option<Arc<dyn QueryExpander>> = config.memory.query_expander_url.as_ref().map(|url| {
        Arc::new(LlmQueryExpander::new(
            url.clone(),
            config.runtime.api_key.clone(),
            config.runtime.model.clone(),
            Duration::from_secs(config.memory.query_expansion_timeout_secs),
        )) as Arc<dyn QueryExpander>
    });

    let memory = Arc::new(MemoryEngine::new(conn, embedder.clone()));

    if let Some(workspace) = workspace {
        if let Err(e) = myclaw_memory::migrator::migrate_if_needed(&memory, workspace) {
            warn!(error = %e, "legacy workspace migration failed");
        }
    }

    // No config surface names retrieval's known-projects list; starts empty
    // and is only ever populated programmatically.
    let retrieval_config = RetrievalConfig {
        mode: match config.memory.retrieval_mode() {
            ConfigRetrievalMode::Classic => RetrievalMode::Classic,
            ConfigRetrievalMode::Enhanced => RetrievalMode::Enhanced,
        },
        candidate_limit: config.memory.candidate_limit,
        rerank_limit: config.memory.rerank_limit,
        known_projects: Vec::new(),
    };
    let retrieval = Arc::new(RetrievalEngine::new(memory.clone(), retrieval_config, embedder, reranker, expander));

    // Extraction/compression LLM calls reuse the primary runtime's
    // base_url/api_key/model; no separate config surface exists for them.
    let memory_llm = Arc::new(HttpMemoryLlm::new(
        config.runtime.base_url.clone(),
        config.runtime.api_key.clone(),
        config.runtime.model.clone(),
        Duration::from_secs(30),
    ));
    let extraction_llm: Arc<dyn ExtractionLlm> = memory_llm.clone();
    let compress_llm: Arc<dyn CompressionLlm> = memory_llm.clone();
    let profile_llm: Arc<dyn ProfileLlm> = memory_llm;

    let extraction_config = ExtractionConfig {
        quiet_gap: Duration::from_secs(config.memory.quiet_gap_secs),
        token_cap: config.memory.token_cap(),
        daily_flush: config.memory.daily_flush.clone(),
    };
    let extraction = Arc::new(ExtractionService::new(memory.clone(), extraction_llm, extraction_config));
    let compression = Arc::new(CompressionService::new(memory.clone(), compress_llm, profile_llm));

    Ok((Some(memory), Some(retrieval), Some(extraction), Some(compression)))
}

fn build_channel_manager(config: &MyclawConfig, bus: &Arc<MessageBus>) -> Result<ChannelManager> {
    let mut channels = ChannelManager::new();

    if let Some(telegram) = &config.channels.telegram {
        let channel: Arc<dyn Channel> = Arc::new(TelegramChannel::new(
            telegram.bot_token.clone(),
            bus.clone(),
            Allowlist::new(telegram.allow_from.clone()),
        ));
        register(&mut channels, bus, channel);
    }

    if let Some(wecom) = &config.channels.wecom {
        let channel: Arc<dyn Channel> = Arc::new(WecomChannel::new(
            wecom.token.clone(),
            &wecom.encoding_aes_key,
            wecom.receive_id.clone(),
            wecom.port,
            Allowlist::new(wecom.allow_from.clone()),
            Duration::from_secs(wecom.reply_cache_ttl_secs),
            Duration::from_secs(wecom.dedup_ttl_secs),
            bus.clone(),
        )?);
        register(&mut channels, bus, channel);
    }

    if let Some(feishu) = &config.channels.feishu {
        let channel: Arc<dyn Channel> = Arc::new(FeishuChannel::new(
            feishu.app_id.clone(),
            feishu.app_secret.clone(),
            feishu.port,
            feishu.verification_token.clone(),
            Allowlist::new(feishu.allow_from.clone()),
            bus.clone(),
        ));
        register(&mut channels, bus, channel);
    }

    if let Some(whatsapp) = &config.channels.whatsapp {
        let channel: Arc<dyn Channel> = Arc::new(WhatsappChannel::new(
            whatsapp.ws_url.clone(),
            bus.clone(),
            Allowlist::new(whatsapp.allow_from.clone()),
        ));
        register(&mut channels, bus, channel);
    }

    if let Some(webui) = &config.channels.webui {
        let channel: Arc<dyn Channel> = Arc::new(WebuiChannel::new(
            webui.port,
            myclaw_webui::bundled_static_dir(),
            Allowlist::new(webui.allow_from.clone()),
            bus.clone(),
        ));
        register(&mut channels, bus, channel);
    }

    Ok(channels)
}

fn register(channels: &mut ChannelManager, bus: &Arc<MessageBus>, channel: Arc<dyn Channel>) {
    let name = channel.name().to_string();
    bus.subscribe_outbound(name, Arc::new(ChannelSubscriber { channel: channel.clone() }));
    channels.register(channel);
}

async fn wait_for_shutdown(ctx: CancellationToken) {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler, falling back to ctrl_c only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = ctx.cancelled() => {}
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = ctx.cancelled() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
}
