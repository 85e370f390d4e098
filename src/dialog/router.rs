//! Inbound event router.
//!
//! Handles one update end to end: takes the user's handling lock, runs
//! global commands (which reset the session first), otherwise feeds the
//! input to the active flow through [`transition`] and applies the resulting
//! step. Failures and panics are caught at this boundary; the user gets a
//! generic message and the session is reset so nobody stays stuck.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channels::{CallbackQuery, ChatOutbox, InboundEvent, Outbox, Reply};
use crate::config::{DialogConfig, TimeoutConfig};
use crate::context::TaskContext;
use crate::dialog::command::{CallbackData, Command, CommandParser};
use crate::dialog::machine::{Effect, Env, FlowRegistry, Input, Step, enter, transition};
use crate::dialog::{render, validate};
use crate::dialog::state::{DialogState, FlowKind};
use crate::error::{CollaboratorError, Error, NotFoundError, Result};
use crate::services::{AnalyzerService, JobStore, NewsService, Position, PositionStore};
use crate::session::SessionStore;
use crate::worker::{BackgroundJob, Dispatcher, panic_message};

/// Collaborators and shared state the router works with.
pub struct RouterDeps {
    pub sessions: Arc<SessionStore>,
    pub outbox: Arc<Outbox>,
    pub dispatcher: Arc<Dispatcher>,
    pub positions: Arc<dyn PositionStore>,
    pub analyzer: Arc<dyn AnalyzerService>,
    pub jobs: Arc<dyn JobStore>,
    pub news: Arc<dyn NewsService>,
    pub timeouts: TimeoutConfig,
    pub dialog: DialogConfig,
}

/// Routes inbound events to commands and flows.
pub struct Router {
    sessions: Arc<SessionStore>,
    registry: FlowRegistry,
    outbox: Arc<Outbox>,
    dispatcher: Arc<Dispatcher>,
    positions: Arc<dyn PositionStore>,
    analyzer: Arc<dyn AnalyzerService>,
    jobs: Arc<dyn JobStore>,
    news: Arc<dyn NewsService>,
    timeouts: TimeoutConfig,
    dialog: DialogConfig,
}

impl Router {
    /// Build the router, refusing to start if the flow table is inconsistent.
    pub fn new(deps: RouterDeps) -> Result<Self> {
        let registry = FlowRegistry::new()?;
        Ok(Self {
            sessions: deps.sessions,
            registry,
            outbox: deps.outbox,
            dispatcher: deps.dispatcher,
            positions: deps.positions,
            analyzer: deps.analyzer,
            jobs: deps.jobs,
            news: deps.news,
            timeouts: deps.timeouts,
            dialog: deps.dialog,
        })
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    fn root(&self) -> &CancellationToken {
        self.dispatcher.root()
    }

    /// Handle one inbound event. Never fails; errors are logged and answered.
    pub async fn handle(&self, event: InboundEvent) {
        let user = event.user();
        let chat = event.chat();
        let _guard = self.sessions.lock_user(user).await;

        let outbox = self.outbox.chat(chat, user);
        let ctx = TaskContext::new(self.root()).with_timeout(self.timeouts.reply);
        let before = self.sessions.state(user);
        let flow = self.registry.resolve(before.code());

        debug!(%user, %chat, kind = event.kind(), ?flow, state = %before, "Handling event");

        let result = AssertUnwindSafe(self.dispatch(&ctx, &outbox, event))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_shutdown() => {
                info!(%user, %chat, ?flow, state = %before, "Shutdown in progress, event dropped");
            }
            Ok(Err(e)) => {
                self.recover(&outbox, &e.to_string(), before, user_message(&e))
                    .await;
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                self.recover(&outbox, &format!("panic: {message}"), before, render::GENERIC_FAILURE)
                    .await;
            }
        }
    }

    /// Reset the user and tell them something went wrong.
    async fn recover(&self, outbox: &ChatOutbox, error: &str, state: DialogState, text: &str) {
        let user = outbox.user_id();
        let flow = state.flow();
        error!(%user, chat = %outbox.chat_id(), ?flow, %state, error, "Event handling failed");
        self.sessions.reset(user);

        let ctx = TaskContext::new(self.root()).with_timeout(self.timeouts.reply);
        if let Err(e) = outbox.send(&ctx, &Reply::text(text)).await {
            warn!(%user, error = %e, "Failed to send failure notice");
        }
    }

    async fn dispatch(
        &self,
        ctx: &TaskContext,
        outbox: &ChatOutbox,
        event: InboundEvent,
    ) -> Result<()> {
        match event {
            InboundEvent::Message { text, .. } => match CommandParser::parse(&text) {
                Command::Text(text) => self.step(ctx, outbox, Input::Text(text)).await,
                command => {
                    let was = self.sessions.state(outbox.user_id());
                    self.sessions.reset(outbox.user_id());
                    self.command(ctx, outbox, command, was).await
                }
            },
            InboundEvent::Callback { query, .. } => self.callback(ctx, outbox, query).await,
        }
    }

    async fn callback(
        &self,
        ctx: &TaskContext,
        outbox: &ChatOutbox,
        query: CallbackQuery,
    ) -> Result<()> {
        let user = outbox.user_id();
        if let Err(e) = outbox.respond(ctx, &query, None).await {
            if matches!(e, crate::error::TransportError::Cancelled(_)) {
                return Err(e.into());
            }
            warn!(%user, error = %e, "Failed to acknowledge callback");
        }

        let data = match CallbackData::decode(&query.data) {
            Ok(data) => data,
            Err(e) => {
                debug!(%user, data = %query.data, error = %e, "Rejected callback payload");
                return self.send(ctx, outbox, Reply::text(e.to_string())).await;
            }
        };

        match data {
            CallbackData::Cancel => {
                let was = self.sessions.state(user);
                self.sessions.reset(user);
                self.command(ctx, outbox, Command::Cancel, was).await
            }
            CallbackData::Monitor(symbol) => {
                self.sessions.reset(user);
                self.monitor(ctx, outbox, symbol).await
            }
            CallbackData::Remove(symbol) => {
                self.sessions.reset(user);
                self.remove(ctx, outbox, symbol).await
            }
            CallbackData::RunJob(name) => {
                let was = self.sessions.state(user);
                self.sessions.reset(user);
                self.command(ctx, outbox, Command::RunJob { name: Some(name) }, was)
                    .await
            }
            other => self.step(ctx, outbox, Input::Button(other)).await,
        }
    }

    async fn command(
        &self,
        ctx: &TaskContext,
        outbox: &ChatOutbox,
        command: Command,
        was: DialogState,
    ) -> Result<()> {
        let user = outbox.user_id();
        if !was.is_idle() {
            info!(%user, flow = ?was.flow(), state = %was, "Active flow reset by command");
        }

        match command {
            Command::Start | Command::Help => self.send(ctx, outbox, render::help()).await,
            Command::Cancel => {
                let text = if was.is_idle() {
                    "Nothing to cancel."
                } else {
                    "Cancelled."
                };
                self.send(ctx, outbox, Reply::text(text)).await
            }
            Command::Enter(flow) => self.enter(ctx, outbox, flow).await,
            Command::Positions => {
                let positions = self.active_positions(ctx, outbox).await?;
                self.send(ctx, outbox, render::positions(&positions)).await
            }
            Command::Jobs => {
                let jobs = self.store_call(ctx, self.jobs.list_jobs()).await?;
                self.send(ctx, outbox, render::jobs(&jobs)).await
            }
            Command::RunJob { name: None } => {
                self.send(ctx, outbox, Reply::text("Usage: /runjob <name>. See /jobs for names."))
                    .await
            }
            Command::RunJob { name: Some(name) } => {
                let name = match validate::job_name(&name) {
                    Ok(name) => name,
                    Err(e) => {
                        debug!(%user, error = %e, "Rejected job name");
                        return self.send(ctx, outbox, Reply::text(e.to_string())).await;
                    }
                };
                match self.store_call(ctx, self.jobs.trigger(&name)).await {
                    Ok(run) => {
                        info!(%user, job = %name, "Job triggered");
                        self.send(ctx, outbox, render::job_run(&run)).await
                    }
                    Err(Error::NotFound(NotFoundError::Job { name })) => {
                        let text = format!("There is no job named '{name}'. See /jobs.");
                        self.send(ctx, outbox, Reply::text(text)).await
                    }
                    Err(e) => Err(e),
                }
            }
            Command::JobHistory { limit } => {
                let runs = self.store_call(ctx, self.jobs.history(limit)).await?;
                self.send(ctx, outbox, render::job_history(&runs)).await
            }
            Command::Unknown(name) => {
                let text = format!("Unknown command {name}. Send /help for the list.");
                self.send(ctx, outbox, Reply::text(text)).await
            }
            Command::Text(_) => Ok(()),
        }
    }

    async fn enter(&self, ctx: &TaskContext, outbox: &ChatOutbox, flow: FlowKind) -> Result<()> {
        let positions = if flow.needs_positions() {
            self.active_positions(ctx, outbox).await?
        } else {
            Vec::new()
        };
        info!(user = %outbox.user_id(), %flow, "Flow started");
        let step = enter(flow, positions);
        self.apply(ctx, outbox, DialogState::Idle, step).await
    }

    async fn step(&self, ctx: &TaskContext, outbox: &ChatOutbox, input: Input) -> Result<()> {
        let user = outbox.user_id();
        let (state, data) = self.sessions.snapshot(user);
        let env = Env {
            user,
            today: chrono::Local::now().date_naive(),
        };
        let step = transition(&state, data.as_ref(), &input, &env);
        self.apply(ctx, outbox, state, step).await
    }

    async fn apply(
        &self,
        ctx: &TaskContext,
        outbox: &ChatOutbox,
        state: DialogState,
        step: Step,
    ) -> Result<()> {
        let user = outbox.user_id();
        match step {
            Step::Advance {
                state: next,
                data,
                reply,
            } => {
                debug!(%user, from = %state, to = %next, "Flow advanced");
                self.sessions.advance(user, next, data);
                self.send(ctx, outbox, reply).await
            }
            Step::Reprompt { error, reply } => {
                debug!(%user, %state, %error, "Input rejected");
                self.send(ctx, outbox, reply).await
            }
            Step::Finish { effect } => self.finish(ctx, outbox, effect).await,
            Step::Abort { reply } => {
                self.sessions.reset(user);
                self.send(ctx, outbox, reply).await
            }
            Step::Expired => {
                warn!(%user, flow = ?state.flow(), %state, "Session scratch missing, resetting");
                self.sessions.reset(user);
                self.send(ctx, outbox, Reply::text(render::SESSION_EXPIRED)).await
            }
        }
    }

    /// Run the flow's effect, reset, then report.
    async fn finish(&self, ctx: &TaskContext, outbox: &ChatOutbox, effect: Effect) -> Result<()> {
        let user = outbox.user_id();
        let flow = effect.flow();

        let reply = match effect {
            Effect::CreatePosition(new_position) => {
                let position = self.store_call(ctx, self.positions.create(new_position)).await?;
                info!(%user, %flow, symbol = %position.symbol, "Position created");
                render::position_created(&position)
            }
            Effect::ClosePosition(position) => {
                self.store_call(ctx, self.positions.update(&position)).await?;
                info!(%user, %flow, symbol = %position.symbol, "Position closed");
                render::position_closed(&position)
            }
            Effect::UpdatePosition(position) => {
                self.store_call(ctx, self.positions.update(&position)).await?;
                info!(%user, %flow, symbol = %position.symbol, "Position updated");
                render::position_updated(&position)
            }
            Effect::AnalyzeSymbol {
                symbol,
                interval,
                range,
            } => {
                let analyzer = Arc::clone(&self.analyzer);
                let job = self.job(
                    "analyze_symbol",
                    outbox,
                    format!("Analyzing {symbol} ({interval}, {range})"),
                    self.timeouts.symbol_analysis,
                );
                self.dispatcher.launch(job, move |ctx| async move {
                    let result = analyzer.analyze_symbol(&ctx, &symbol, interval, range).await?;
                    Ok(render::analysis(&result))
                });
                self.sessions.reset(user);
                return Ok(());
            }
            Effect::AnalyzeUniverse { interval, range } => {
                let analyzer = Arc::clone(&self.analyzer);
                let universe = self.dialog.universe.clone();
                let job = self.job(
                    "analyze_universe",
                    outbox,
                    format!("Analyzing {} symbols ({interval}, {range})", universe.len()),
                    self.timeouts.universe_analysis,
                );
                self.dispatcher.launch(job, move |ctx| async move {
                    let result = analyzer.analyze_universe(&ctx, &universe, interval, range).await?;
                    Ok(render::summary(&result))
                });
                self.sessions.reset(user);
                return Ok(());
            }
            Effect::FetchNews { symbol, days } => {
                let news = Arc::clone(&self.news);
                let job = self.job(
                    "fetch_news",
                    outbox,
                    format!("Fetching news for {symbol}"),
                    self.timeouts.news,
                );
                self.dispatcher.launch(job, move |ctx| async move {
                    let items = news.recent(&ctx, &symbol, days).await?;
                    Ok(render::news(&symbol, days, &items))
                });
                self.sessions.reset(user);
                return Ok(());
            }
        };

        self.sessions.reset(user);
        self.send(ctx, outbox, reply).await
    }

    /// Launch a health check for one of the user's active positions.
    async fn monitor(&self, ctx: &TaskContext, outbox: &ChatOutbox, symbol: String) -> Result<()> {
        let user = outbox.user_id();
        let Some(position) = self
            .store_call(ctx, self.positions.find(user, &symbol, true))
            .await?
        else {
            let text = format!("There is no active position for {symbol}.");
            return self.send(ctx, outbox, Reply::text(text)).await;
        };

        let analyzer = Arc::clone(&self.analyzer);
        let job = self.job(
            "monitor_position",
            outbox,
            format!("Checking {symbol}"),
            self.timeouts.symbol_analysis,
        );
        self.dispatcher.launch(job, move |ctx| async move {
            let result = analyzer.monitor_position(&ctx, position.to_request()).await?;
            Ok(render::position_check(&result))
        });
        Ok(())
    }

    async fn remove(&self, ctx: &TaskContext, outbox: &ChatOutbox, symbol: String) -> Result<()> {
        let user = outbox.user_id();
        let removed = self
            .store_call(ctx, self.positions.delete(user, &symbol, true))
            .await?;
        let text = if removed {
            info!(%user, %symbol, "Position removed");
            format!("Removed {symbol}.")
        } else {
            format!("There is no active position for {symbol}.")
        };
        self.send(ctx, outbox, Reply::text(text)).await
    }

    fn job(
        &self,
        name: &'static str,
        outbox: &ChatOutbox,
        text: String,
        timeout: std::time::Duration,
    ) -> BackgroundJob {
        BackgroundJob {
            name,
            outbox: outbox.clone(),
            loading_text: text,
            timeout,
        }
    }

    async fn active_positions(
        &self,
        ctx: &TaskContext,
        outbox: &ChatOutbox,
    ) -> Result<Vec<Position>> {
        self.store_call(ctx, self.positions.list(outbox.user_id(), true))
            .await
    }

    /// Await a collaborator call bounded by the store timeout.
    async fn store_call<T, F>(&self, ctx: &TaskContext, call: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let timeout = self.timeouts.store_call;
        match ctx.with_timeout(timeout).run(call).await {
            Ok(result) => result,
            Err(crate::error::Cancelled::Deadline) => Err(CollaboratorError::Timeout {
                service: "store".into(),
                timeout,
            }
            .into()),
            Err(cancelled) => Err(cancelled.into()),
        }
    }

    async fn send(&self, ctx: &TaskContext, outbox: &ChatOutbox, reply: Reply) -> Result<()> {
        outbox.send(ctx, &reply).await?;
        Ok(())
    }
}

/// What the user sees for an error that escaped a handler.
fn user_message(error: &Error) -> &'static str {
    match error {
        Error::NotFound(_) => render::SESSION_EXPIRED,
        Error::Collaborator(CollaboratorError::Timeout { .. }) => render::TIMED_OUT,
        _ => render::GENERIC_FAILURE,
    }
}
