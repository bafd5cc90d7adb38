//! prompt -> model -> text pipeline and the keyed factory that caches it.
//!
//! a pipeline turns one question into a `FragmentStream`: a lazy, finite,
//! non-restartable sequence of text fragments fed by a background worker
//! over a flume channel. construction never talks to the network; a bad
//! key or model id only shows up as a failure item once the stream is pulled.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bevy::prelude::*;
use flume::{Receiver, Sender, TryRecvError};
use futures_lite::StreamExt;

use crate::config::{DEFAULT_TEMPERATURE, redact};
use crate::error::{ChatError, Result};
use crate::{ChatMessage, LLMBackend, LLMBuilder, LLMProvider};

pub const SYSTEM_PROMPT: &str =
    "You are a helpful assistant powered by Groq. You provide clear and concise answers.";

/// bound on fragments buffered between the network worker and the reader.
const FRAGMENT_BUFFER: usize = 2048;

/// everything needed to construct a pipeline.
#[derive(Clone, PartialEq)]
pub struct PipelineConfig {
    pub credential: String,
    pub model_id: String,
    pub temperature: f32,
    pub streaming: bool,
}

impl PipelineConfig {
    pub fn new(credential: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            credential: credential.into(),
            model_id: model_id.into(),
            temperature: DEFAULT_TEMPERATURE,
            streaming: true,
        }
    }

    pub fn key(&self) -> PipelineKey {
        PipelineKey {
            credential: self.credential.clone(),
            model_id: self.model_id.clone(),
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("credential", &redact(&self.credential))
            .field("model_id", &self.model_id)
            .field("temperature", &self.temperature)
            .field("streaming", &self.streaming)
            .finish()
    }
}

/// cache key: temperature and streaming are fixed, so only these two matter.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    credential: String,
    model_id: String,
}

impl PipelineKey {
    pub fn new(credential: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self { credential: credential.into(), model_id: model_id.into() }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl fmt::Debug for PipelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineKey")
            .field("credential", &redact(&self.credential))
            .field("model_id", &self.model_id)
            .finish()
    }
}

/// the composed prompt -> model -> parser unit.
pub trait Pipeline: Send + Sync {
    /// starts generating an answer. failures arrive through the stream.
    fn stream(&self, question: &str) -> FragmentStream;

    fn model_id(&self) -> &str;
}

/// constructs pipelines for the factory. swapped out in tests.
pub trait PipelineBuilder: Send + Sync {
    fn build(&self, config: &PipelineConfig) -> Result<Arc<dyn Pipeline>>;
}

// ---------------------- fragment stream ----------------------

#[derive(Debug)]
enum StreamMsg {
    Delta(String),
    Done,
    Err(ChatError),
}

/// result of a non-blocking pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull {
    Fragment(String),
    Failed(ChatError),
    /// nothing buffered yet; try again next frame.
    Pending,
    Exhausted,
}

/// lazy sequence of text fragments for a single answer.
///
/// `Iterator::next` blocks until the worker sends something; `try_pull`
/// never blocks (use that on wasm and on the bevy main thread). after the
/// first failure or the end marker the stream is fused.
#[derive(Debug)]
pub struct FragmentStream {
    rx: Receiver<StreamMsg>,
    finished: bool,
}

/// producer half handed to the worker that talks to the provider.
#[derive(Debug, Clone)]
pub struct FragmentSender {
    tx: Sender<StreamMsg>,
}

pub fn fragment_channel() -> (FragmentSender, FragmentStream) {
    let (tx, rx) = flume::bounded(FRAGMENT_BUFFER);
    (FragmentSender { tx }, FragmentStream { rx, finished: false })
}

impl FragmentSender {
    /// returns false once the reader is gone.
    pub async fn fragment(&self, text: impl Into<String>) -> bool {
        self.tx.send_async(StreamMsg::Delta(text.into())).await.is_ok()
    }

    pub async fn finish(self) {
        let _ = self.tx.send_async(StreamMsg::Done).await;
    }

    pub async fn fail(self, err: ChatError) {
        let _ = self.tx.send_async(StreamMsg::Err(err)).await;
    }
}

impl FragmentStream {
    /// a stream whose contents are already known: each fragment, then either
    /// the failure or the end marker.
    pub fn scripted<I, S>(fragments: I, failure: Option<ChatError>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (tx, rx) = flume::unbounded();
        for fragment in fragments {
            let _ = tx.send(StreamMsg::Delta(fragment.into()));
        }
        let _ = tx.send(match failure {
            Some(err) => StreamMsg::Err(err),
            None => StreamMsg::Done,
        });
        Self { rx, finished: false }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn try_pull(&mut self) -> Pull {
        if self.finished {
            return Pull::Exhausted;
        }
        match self.rx.try_recv() {
            Ok(msg) => self.accept(msg),
            Err(TryRecvError::Empty) => Pull::Pending,
            Err(TryRecvError::Disconnected) => {
                self.finished = true;
                Pull::Failed(ChatError::Disconnected)
            }
        }
    }

    fn accept(&mut self, msg: StreamMsg) -> Pull {
        match msg {
            StreamMsg::Delta(text) => Pull::Fragment(text),
            StreamMsg::Done => {
                self.finished = true;
                Pull::Exhausted
            }
            StreamMsg::Err(err) => {
                self.finished = true;
                Pull::Failed(err)
            }
        }
    }
}

impl Iterator for FragmentStream {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let pulled = match self.rx.recv() {
            Ok(msg) => self.accept(msg),
            Err(_) => {
                self.finished = true;
                Pull::Failed(ChatError::Disconnected)
            }
        };
        match pulled {
            Pull::Fragment(text) => Some(Ok(text)),
            Pull::Failed(err) => Some(Err(err)),
            Pull::Pending | Pull::Exhausted => None,
        }
    }
}

// ---------------------- factory ----------------------

/// keyed cache of constructed pipelines.
///
/// identical `(credential, model_id)` pairs share one construction; a new
/// pair builds a new one. stale entries are dropped explicitly through
/// `invalidate`, `retain_only` or `clear`.
#[derive(Resource)]
pub struct PipelineFactory {
    builder: Box<dyn PipelineBuilder>,
    cache: HashMap<PipelineKey, Arc<dyn Pipeline>>,
}

impl PipelineFactory {
    pub fn new(builder: impl PipelineBuilder + 'static) -> Self {
        Self { builder: Box::new(builder), cache: HashMap::new() }
    }

    /// `Ok(None)` means "not configured": no credential was supplied.
    pub fn get(&mut self, credential: &str, model_id: &str) -> Result<Option<Arc<dyn Pipeline>>> {
        self.get_with(PipelineConfig::new(credential, model_id))
    }

    pub fn get_with(&mut self, config: PipelineConfig) -> Result<Option<Arc<dyn Pipeline>>> {
        if config.credential.trim().is_empty() {
            debug!(target: "bevy_llm_chat", "pipeline factory: no credential, not configured");
            return Ok(None);
        }
        let key = config.key();
        if let Some(pipeline) = self.cache.get(&key) {
            return Ok(Some(pipeline.clone()));
        }
        info!(
            target: "bevy_llm_chat",
            "pipeline factory: building pipeline for model='{}' (cached={})",
            config.model_id, self.cache.len()
        );
        let pipeline = self.builder.build(&config)?;
        self.cache.insert(key, pipeline.clone());
        Ok(Some(pipeline))
    }

    pub fn invalidate(&mut self, credential: &str, model_id: &str) -> bool {
        self.cache.remove(&PipelineKey::new(credential, model_id)).is_some()
    }

    /// drops every entry except `keep`.
    pub fn retain_only(&mut self, keep: &PipelineKey) {
        let before = self.cache.len();
        self.cache.retain(|k, _| k == keep);
        if before != self.cache.len() {
            debug!(target: "bevy_llm_chat", "pipeline factory: evicted {} stale entries", before - self.cache.len());
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

// ---------------------- groq pipeline ----------------------

/// builds pipelines over the `llm` crate's groq backend.
#[derive(Clone)]
pub struct GroqPipelineBuilder {
    #[cfg(not(target_arch = "wasm32"))]
    rt: crate::TokioRt,
}

impl GroqPipelineBuilder {
    #[cfg(not(target_arch = "wasm32"))]
    pub fn new(rt: crate::TokioRt) -> Self {
        Self { rt }
    }

    #[cfg(target_arch = "wasm32")]
    pub fn new() -> Self {
        Self {}
    }
}

impl PipelineBuilder for GroqPipelineBuilder {
    fn build(&self, config: &PipelineConfig) -> Result<Arc<dyn Pipeline>> {
        info!(
            target: "bevy_llm_chat",
            "build_provider: backend=groq model='{}' temperature={} stream={} key_present={}",
            config.model_id, config.temperature, config.streaming, !config.credential.is_empty()
        );
        let provider = LLMBuilder::new()
            .backend(LLMBackend::Groq)
            .api_key(config.credential.clone())
            .model(config.model_id.clone())
            .temperature(config.temperature)
            .stream(config.streaming)
            .system(SYSTEM_PROMPT)
            .build()
            .map_err(|e| ChatError::Build(e.to_string()))?;

        Ok(Arc::new(GroqPipeline {
            provider: provider.into(),
            model_id: config.model_id.clone(),
            #[cfg(not(target_arch = "wasm32"))]
            rt: self.rt.clone(),
        }))
    }
}

struct GroqPipeline {
    provider: Arc<dyn LLMProvider>,
    model_id: String,
    #[cfg(not(target_arch = "wasm32"))]
    rt: crate::TokioRt,
}

impl Pipeline for GroqPipeline {
    fn stream(&self, question: &str) -> FragmentStream {
        let (tx, stream) = fragment_channel();
        // the system instruction is configured on the provider; the question
        // is the sole user turn.
        let messages = vec![ChatMessage::user().content(question.to_string()).build()];
        let run = forward_answer(self.provider.clone(), messages, tx);

        #[cfg(target_arch = "wasm32")]
        {
            bevy::tasks::AsyncComputeTaskPool::get().spawn(run).detach();
        }
        #[cfg(not(target_arch = "wasm32"))]
        {
            let _ = self.rt.0.spawn(run);
        }
        stream
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// drives one provider request and forwards its text into the channel.
async fn forward_answer(
    provider: Arc<dyn LLMProvider>,
    messages: Vec<ChatMessage>,
    tx: FragmentSender,
) {
    let mut s = match provider.chat_stream(&messages).await {
        Ok(s) => s,
        Err(err) => {
            error!(target: "bevy_llm_chat", "streaming request failed: {}", err);
            tx.fail(err.into()).await;
            return;
        }
    };

    let mut total = 0usize;
    while let Some(item) = s.next().await {
        match item {
            Ok(text) => {
                if text.is_empty() {
                    continue;
                }
                total += text.len();
                if !tx.fragment(text).await {
                    debug!(target: "bevy_llm_chat", "reader dropped the stream after {} bytes", total);
                    return;
                }
            }
            Err(err) => {
                error!(target: "bevy_llm_chat", "streaming error: {}", err);
                tx.fail(err.into()).await;
                return;
            }
        }
    }
    info!(target: "bevy_llm_chat", "stream completed: final_len={}", total);
    tx.finish().await;
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn config_defaults_match_the_chat_contract() {
        let cfg = PipelineConfig::new("key", "llama-3.1-8b-instant");
        assert_eq!(cfg.temperature, 0.7);
        assert!(cfg.streaming);
        assert_eq!(cfg.key(), PipelineKey::new("key", "llama-3.1-8b-instant"));
        assert!(!format!("{cfg:?}").contains("\"key\""));
    }

    #[test]
    fn empty_credential_is_not_configured() {
        let probe = CountingBuilder::default();
        let mut factory = PipelineFactory::new(probe.clone());
        assert!(factory.get("", "llama-3.1-8b-instant").unwrap().is_none());
        assert!(factory.get("", "anything").unwrap().is_none());
        assert!(factory.get("   ", "anything").unwrap().is_none());
        assert_eq!(probe.built(), 0);
        assert_eq!(factory.cached(), 0);
    }

    #[test]
    fn same_key_reuses_the_construction() {
        let probe = CountingBuilder::default();
        let mut factory = PipelineFactory::new(probe.clone());
        let a = factory.get("k", "m").unwrap().unwrap();
        let b = factory.get("k", "m").unwrap().unwrap();
        assert_eq!(probe.built(), 1);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn changed_key_rebuilds() {
        let probe = CountingBuilder::default();
        let mut factory = PipelineFactory::new(probe.clone());
        factory.get("k", "m1").unwrap();
        factory.get("k", "m2").unwrap();
        factory.get("k2", "m2").unwrap();
        assert_eq!(probe.built(), 3);
        assert_eq!(factory.cached(), 3);
    }

    #[test]
    fn invalidation_forces_a_rebuild() {
        let probe = CountingBuilder::default();
        let mut factory = PipelineFactory::new(probe.clone());
        factory.get("k", "m1").unwrap();
        factory.get("k", "m2").unwrap();

        factory.retain_only(&PipelineKey::new("k", "m2"));
        assert_eq!(factory.cached(), 1);

        assert!(factory.invalidate("k", "m2"));
        assert!(!factory.invalidate("k", "m2"));
        factory.get("k", "m2").unwrap();
        assert_eq!(probe.built(), 3);

        factory.clear();
        assert_eq!(factory.cached(), 0);
    }

    #[test]
    fn scripted_stream_yields_then_ends() {
        let stream = FragmentStream::scripted(["Hel", "lo"], None);
        let got: Vec<_> = stream.collect();
        assert_eq!(got, vec![Ok("Hel".to_string()), Ok("lo".to_string())]);
    }

    #[test]
    fn stream_is_fused_after_failure() {
        let mut stream =
            FragmentStream::scripted(["Par"], Some(ChatError::Provider("boom".into())));
        assert_eq!(stream.next(), Some(Ok("Par".into())));
        assert_eq!(stream.next(), Some(Err(ChatError::Provider("boom".into()))));
        assert!(stream.is_finished());
        assert_eq!(stream.next(), None);
        assert_eq!(stream.try_pull(), Pull::Exhausted);
    }

    #[test]
    fn try_pull_reports_pending_until_the_worker_sends() {
        let (tx, mut stream) = fragment_channel();
        assert_eq!(stream.try_pull(), Pull::Pending);

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            assert!(tx.fragment("a").await);
            tx.finish().await;
        });

        assert_eq!(stream.try_pull(), Pull::Fragment("a".into()));
        assert_eq!(stream.try_pull(), Pull::Exhausted);
        assert!(stream.is_finished());
    }

    #[test]
    fn dropped_worker_surfaces_as_disconnect() {
        let (tx, mut stream) = fragment_channel();
        drop(tx);
        assert_eq!(stream.next(), Some(Err(ChatError::Disconnected)));
        assert_eq!(stream.next(), None);
    }

    #[test]
    fn scripted_pipeline_counts_calls() {
        let pipeline = ScriptedPipeline::ok(&["x"]);
        let _ = pipeline.stream("q").count();
        let _ = pipeline.stream("q").count();
        assert_eq!(pipeline.calls(), 2);
    }
}
