//! one question in, one answer out.
//!
//! `Turn` is the per-submission state: `begin` records the user turn,
//! `push` grows the accumulator and re-renders it as in-progress,
//! `complete` records the assistant turn, `fail` drops the partial answer
//! and reports the error. `run_turn` drives those steps over a blocking
//! pull loop; the bevy plugin drives the same steps one frame at a time.

use crate::error::ChatError;
use crate::pipeline::Pipeline;
use crate::session::{ChatHistory, ChatTurn};
use bevy::prelude::*;

/// cursor appended to in-progress text.
pub const STREAM_CURSOR: char = '▌';

/// what the display collaborator is asked to show.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChatUpdate {
    /// latest accumulator value, still streaming.
    Partial(String),
    /// final answer; replaces the in-progress text.
    Finished(String),
    /// user-visible failure message.
    Failed(String),
}

impl ChatUpdate {
    /// text as the transcript should render it.
    pub fn render(&self) -> String {
        match self {
            ChatUpdate::Partial(text) => format!("{text}{STREAM_CURSOR}"),
            ChatUpdate::Finished(text) => text.clone(),
            ChatUpdate::Failed(message) => format!("Error: {message}"),
        }
    }
}

/// receives in-progress and final renders of the assistant reply.
pub trait TranscriptView {
    fn show(&mut self, update: ChatUpdate);
}

/// collects updates; handy for headless frontends and tests.
impl TranscriptView for Vec<ChatUpdate> {
    fn show(&mut self, update: ChatUpdate) {
        self.push(update);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// blank input, nothing happened.
    Skipped,
    Completed(String),
    Failed(String),
}

/// a submission between `Received` and `Completed`/`Failed`.
#[derive(Debug)]
pub struct Turn {
    question: String,
    accumulator: String,
    fragments: usize,
}

impl Turn {
    /// records the user turn. blank questions are a no-op and yield `None`.
    pub fn begin(history: &mut ChatHistory, question: &str) -> Option<Self> {
        if question.trim().is_empty() {
            debug!(target: "bevy_llm_chat", "ignoring blank question");
            return None;
        }
        info!(target: "bevy_llm_chat", "turn started: question_len={}", question.len());
        history.append(ChatTurn::user(question));
        Some(Self {
            question: question.to_string(),
            accumulator: String::new(),
            fragments: 0,
        })
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    /// text received so far.
    pub fn partial(&self) -> &str {
        &self.accumulator
    }

    pub fn push(&mut self, fragment: &str, view: &mut impl TranscriptView) {
        self.accumulator.push_str(fragment);
        self.fragments += 1;
        view.show(ChatUpdate::Partial(self.accumulator.clone()));
    }

    /// records the assistant turn and returns its content.
    pub fn complete(self, history: &mut ChatHistory, view: &mut impl TranscriptView) -> String {
        info!(
            target: "bevy_llm_chat",
            "turn completed: fragments={} final_len={}",
            self.fragments, self.accumulator.len()
        );
        view.show(ChatUpdate::Finished(self.accumulator.clone()));
        history.append(ChatTurn::assistant(self.accumulator.clone()));
        self.accumulator
    }

    /// drops the partial answer; history keeps only the user turn.
    pub fn fail(self, err: &ChatError, view: &mut impl TranscriptView) -> String {
        error!(
            target: "bevy_llm_chat",
            "turn failed after {} fragments (question_len={}): {}",
            self.fragments, self.question.len(), err
        );
        let message = err.to_string();
        view.show(ChatUpdate::Failed(message.clone()));
        message
    }
}

/// runs a whole turn, blocking on each fragment.
///
/// the caller gates on the factory result, so `pipeline` is always present
/// here. not for the wasm main thread; use `Turn` with `try_pull` there.
pub fn run_turn(
    history: &mut ChatHistory,
    pipeline: &dyn Pipeline,
    question: &str,
    view: &mut impl TranscriptView,
) -> TurnOutcome {
    let Some(mut turn) = Turn::begin(history, question) else {
        return TurnOutcome::Skipped;
    };

    for item in pipeline.stream(question) {
        match item {
            Ok(fragment) => turn.push(&fragment, view),
            Err(err) => return TurnOutcome::Failed(turn.fail(&err, view)),
        }
    }
    TurnOutcome::Completed(turn.complete(history, view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::ScriptedPipeline;
    use crate::session::Role;
    use pretty_assertions::assert_eq;

    #[test]
    fn fragments_accumulate_into_the_assistant_turn() {
        let mut history = ChatHistory::new();
        let pipeline = ScriptedPipeline::ok(&["Hel", "lo"]);
        let mut view: Vec<ChatUpdate> = Vec::new();

        let outcome = run_turn(&mut history, &pipeline, "greet me", &mut view);

        assert_eq!(outcome, TurnOutcome::Completed("Hello".into()));
        assert_eq!(
            history.all(),
            &[ChatTurn::user("greet me"), ChatTurn::assistant("Hello")]
        );
        assert_eq!(
            view,
            vec![
                ChatUpdate::Partial("Hel".into()),
                ChatUpdate::Partial("Hello".into()),
                ChatUpdate::Finished("Hello".into()),
            ]
        );
    }

    #[test]
    fn failure_keeps_only_the_user_turn() {
        let mut history = ChatHistory::new();
        let pipeline = ScriptedPipeline::failing(&["Par", "tial"], "rate limited");
        let mut view: Vec<ChatUpdate> = Vec::new();

        let outcome = run_turn(&mut history, &pipeline, "q", &mut view);

        assert_eq!(outcome, TurnOutcome::Failed("rate limited".into()));
        assert_eq!(history.all(), &[ChatTurn::user("q")]);
        assert!(history.all().iter().all(|t| t.role != Role::Assistant));
        match view.last() {
            Some(ChatUpdate::Failed(msg)) => assert!(msg.contains("rate limited")),
            other => panic!("expected a failure update, got {other:?}"),
        }
    }

    #[test]
    fn session_stays_usable_after_a_failure() {
        let mut history = ChatHistory::new();
        let mut view: Vec<ChatUpdate> = Vec::new();
        run_turn(&mut history, &ScriptedPipeline::failing(&[], "down"), "a", &mut view);
        let outcome = run_turn(&mut history, &ScriptedPipeline::ok(&["ok"]), "b", &mut view);

        assert_eq!(outcome, TurnOutcome::Completed("ok".into()));
        assert_eq!(
            history.all(),
            &[ChatTurn::user("a"), ChatTurn::user("b"), ChatTurn::assistant("ok")]
        );
    }

    #[test]
    fn blank_questions_are_ignored() {
        let mut history = ChatHistory::new();
        let pipeline = ScriptedPipeline::ok(&["never"]);
        let mut view: Vec<ChatUpdate> = Vec::new();

        for q in ["", "   ", "\n\t"] {
            assert_eq!(run_turn(&mut history, &pipeline, q, &mut view), TurnOutcome::Skipped);
        }
        assert!(history.is_empty());
        assert!(view.is_empty());
        assert_eq!(pipeline.calls(), 0);
    }

    #[test]
    fn n_turns_leave_2n_alternating_entries() {
        let mut history = ChatHistory::new();
        let pipeline = ScriptedPipeline::ok(&["a", "b", "c"]);
        let mut view: Vec<ChatUpdate> = Vec::new();
        let questions = ["one", "two", "three", "four"];

        for q in questions {
            run_turn(&mut history, &pipeline, q, &mut view);
        }

        assert_eq!(history.len(), 2 * questions.len());
        for (i, pair) in history.all().chunks(2).enumerate() {
            assert_eq!(pair[0], ChatTurn::user(questions[i]));
            assert_eq!(pair[1], ChatTurn::assistant("abc"));
        }
    }

    #[test]
    fn empty_stream_completes_with_empty_answer() {
        let mut history = ChatHistory::new();
        let mut view: Vec<ChatUpdate> = Vec::new();
        let outcome = run_turn(&mut history, &ScriptedPipeline::ok(&[]), "q", &mut view);
        assert_eq!(outcome, TurnOutcome::Completed(String::new()));
        assert_eq!(view, vec![ChatUpdate::Finished(String::new())]);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn render_marks_partial_text_in_progress() {
        assert_eq!(ChatUpdate::Partial("Hi".into()).render(), "Hi▌");
        assert_eq!(ChatUpdate::Finished("Hi".into()).render(), "Hi");
        assert_eq!(ChatUpdate::Failed("nope".into()).render(), "Error: nope");
    }
}
