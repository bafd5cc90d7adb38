//! bevy_llm_chat: a streaming chat front-end over the `llm` crate (groq).
//!
//! - `ChatHistory` is the session transcript (a bevy resource).
//! - `PipelineFactory` builds and caches one pipeline per (api key, model).
//! - `Turn` accumulates streamed fragments and records the final answer.
//! - `ChatPlugin` wires these to events so any bevy ui can render them.
//! - never blocks the main thread: fragments are pulled with `try_pull`
//!   each frame; the request itself runs on a tiny tokio runtime (native)
//!   or bevy's async pool (wasm).
//!
//! api docs for the provider types: https://docs.rs/llm

use bevy::prelude::*;
use std::sync::Arc;

pub mod config;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod turn;

pub use config::{ChatSettings, GroqModel};
pub use error::{ChatError, Result};
pub use pipeline::{
    FragmentStream, GroqPipelineBuilder, Pipeline, PipelineBuilder, PipelineConfig, PipelineFactory,
    PipelineKey, Pull, SYSTEM_PROMPT,
};
pub use session::{ChatHistory, ChatTurn, Role};
pub use turn::{ChatUpdate, TranscriptView, Turn, TurnOutcome, run_turn};

/// re-export the llm types the pipeline is built from.
pub use llm::{
    LLMProvider,
    builder::{LLMBackend, LLMBuilder},
    chat::{ChatMessage, ChatRole},
    error::LLMError,
};

/// on native we keep a tiny tokio runtime to drive `llm` futures, so
/// neither the main thread nor bevy's compute pools block.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Resource, Clone)]
pub struct TokioRt(pub Arc<tokio::runtime::Runtime>);

#[cfg(not(target_arch = "wasm32"))]
impl Default for TokioRt {
    fn default() -> Self {
        info!(target: "bevy_llm_chat", "ChatPlugin: initializing Tokio multi-thread runtime (native)");
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("tokio runtime");
        Self(Arc::new(rt))
    }
}

/// system ordering so uis can run after we emit events
#[derive(SystemSet, Debug, Hash, PartialEq, Eq, Clone)]
pub enum ChatSet {
    /// settings sync, submissions and stream pumping happen here (in `Update`)
    Pump,
}

/// the pipeline for the current settings, if any.
#[derive(Resource, Clone, Default)]
pub struct CurrentPipeline(pub Option<Arc<dyn Pipeline>>);

/// whether chatting is possible with the current settings.
#[derive(Resource, Clone, Debug, Default, PartialEq, Eq)]
pub enum PipelineStatus {
    /// no api key yet; uis should prompt for one.
    #[default]
    NotConfigured,
    Ready { model_id: String },
    /// the provider client could not be built.
    Broken { error: String },
}

/// the single in-flight submission, if any.
#[derive(Resource, Default)]
pub struct ActiveTurn(Option<(Turn, FragmentStream)>);

impl ActiveTurn {
    pub fn is_streaming(&self) -> bool {
        self.0.is_some()
    }

    /// accumulator of the in-flight turn.
    pub fn partial(&self) -> Option<&str> {
        self.0.as_ref().map(|(turn, _)| turn.partial())
    }
}

/// send this to ask a question.
#[derive(Event, Clone, Debug)]
pub struct SubmitQuestion {
    pub text: String,
}

/// send this to reset the transcript.
#[derive(Event, Clone, Debug, Default)]
pub struct ClearConversation;

/// emitted for every partial render, the final render and failures.
#[derive(Event, Clone, Debug, PartialEq, Eq)]
pub struct ChatUpdateEvt {
    pub update: ChatUpdate,
}

/// helper to enqueue a question from any system.
pub fn submit_question(writer: &mut EventWriter<SubmitQuestion>, text: impl Into<String>) {
    let text = text.into();
    info!(target: "bevy_llm_chat", "submit_question (len={})", text.len());
    writer.write(SubmitQuestion { text });
}

impl TranscriptView for EventWriter<'_, ChatUpdateEvt> {
    fn show(&mut self, update: ChatUpdate) {
        self.write(ChatUpdateEvt { update });
    }
}

/// bevy plugin: wires resources, events and systems.
/// inserts `ChatSettings::from_env()` and a groq-backed `PipelineFactory`
/// unless the app already provides them.
pub struct ChatPlugin;

impl Plugin for ChatPlugin {
    fn build(&self, app: &mut App) {
        info!(target: "bevy_llm_chat", "ChatPlugin: build()");

        if app.world().get_resource::<ChatSettings>().is_none() {
            app.insert_resource(ChatSettings::from_env());
        }

        #[cfg(not(target_arch = "wasm32"))]
        if app.world().get_resource::<TokioRt>().is_none() {
            app.insert_resource(TokioRt::default());
        }

        if app.world().get_resource::<PipelineFactory>().is_none() {
            #[cfg(not(target_arch = "wasm32"))]
            let builder = GroqPipelineBuilder::new(app.world().resource::<TokioRt>().clone());
            #[cfg(target_arch = "wasm32")]
            let builder = GroqPipelineBuilder::new();
            app.insert_resource(PipelineFactory::new(builder));
        }

        app.init_resource::<ChatHistory>()
            .init_resource::<CurrentPipeline>()
            .init_resource::<PipelineStatus>()
            .init_resource::<ActiveTurn>()
            .add_event::<SubmitQuestion>()
            .add_event::<ClearConversation>()
            .add_event::<ChatUpdateEvt>()
            .configure_sets(Update, ChatSet::Pump)
            .add_systems(
                Update,
                (sync_pipeline, clear_conversation, start_turns, pump_active_turn)
                    .chain()
                    .in_set(ChatSet::Pump),
            );
    }
}

/// (re)resolves the pipeline whenever the settings change.
fn sync_pipeline(
    settings: Res<ChatSettings>,
    mut factory: ResMut<PipelineFactory>,
    mut current: ResMut<CurrentPipeline>,
    mut status: ResMut<PipelineStatus>,
) {
    if !settings.is_changed() {
        return;
    }
    let config = PipelineConfig::new(settings.api_key.clone(), settings.model.id());
    // only the active key stays cached; old keys are not kept around
    factory.retain_only(&config.key());

    match factory.get_with(config) {
        Ok(Some(pipeline)) => {
            info!(target: "bevy_llm_chat", "pipeline ready: model='{}'", pipeline.model_id());
            *status = PipelineStatus::Ready { model_id: pipeline.model_id().to_string() };
            current.0 = Some(pipeline);
        }
        Ok(None) => {
            warn!(target: "bevy_llm_chat", "no api key configured; chat disabled");
            *status = PipelineStatus::NotConfigured;
            current.0 = None;
        }
        Err(err) => {
            error!(target: "bevy_llm_chat", "pipeline build failed: {}", err);
            *status = PipelineStatus::Broken { error: err.to_string() };
            current.0 = None;
        }
    }
}

/// applies reset requests. an in-flight answer is abandoned with the
/// transcript it belonged to; dropping its stream stops the worker.
fn clear_conversation(
    mut ev: EventReader<ClearConversation>,
    mut history: ResMut<ChatHistory>,
    mut active: ResMut<ActiveTurn>,
) {
    if ev.read().count() == 0 {
        return;
    }
    if let Some((turn, _stream)) = active.0.take() {
        info!(
            target: "bevy_llm_chat",
            "clear: abandoning in-flight turn (question_len={}, partial_len={})",
            turn.question().len(), turn.partial().len()
        );
    }
    history.clear();
}

/// turns submissions into the active turn (one at a time).
fn start_turns(
    mut ev: EventReader<SubmitQuestion>,
    current: Res<CurrentPipeline>,
    mut active: ResMut<ActiveTurn>,
    mut history: ResMut<ChatHistory>,
) {
    for SubmitQuestion { text } in ev.read() {
        let Some(pipeline) = current.0.as_ref() else {
            warn!(target: "bevy_llm_chat", "question dropped: no pipeline configured");
            continue;
        };
        if active.is_streaming() {
            warn!(target: "bevy_llm_chat", "question dropped: a turn is already streaming");
            continue;
        }
        if let Some(turn) = Turn::begin(&mut history, text) {
            let stream = pipeline.stream(text);
            active.0 = Some((turn, stream));
        }
    }
}

/// pulls buffered fragments without blocking and finishes the turn.
fn pump_active_turn(
    mut active: ResMut<ActiveTurn>,
    mut history: ResMut<ChatHistory>,
    mut view: EventWriter<ChatUpdateEvt>,
) {
    // drain up to a cap per frame to avoid long frames on bursty streams
    const MAX_PER_FRAME: usize = 512;

    // read-only check first so idle frames don't trip change detection
    if !active.is_streaming() {
        return;
    }
    let Some((turn, stream)) = active.0.as_mut() else {
        return;
    };

    let mut end = None;
    for _ in 0..MAX_PER_FRAME {
        match stream.try_pull() {
            Pull::Fragment(text) => turn.push(&text, &mut view),
            Pull::Pending => break,
            Pull::Exhausted => {
                end = Some(Ok(()));
                break;
            }
            Pull::Failed(err) => {
                end = Some(Err(err));
                break;
            }
        }
    }

    if let Some(end) = end
        && let Some((turn, _)) = active.0.take()
    {
        match end {
            Ok(()) => {
                turn.complete(&mut history, &mut view);
            }
            Err(err) => {
                turn.fail(&err, &mut view);
            }
        }
    }
}
