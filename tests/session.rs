//! Conversation session integration tests
//!
//! Drives the session against scripted collaborators; no network or audio
//! hardware involved.

use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use voice_agent::session::{CallTimeouts, HistoryLimit, RetryPolicy};
use voice_agent::{Role, ServiceError, SessionState, Turn};

mod common;

use common::{
    RecordingSink, ScriptedModel, ScriptedSpeechInput, ScriptedSpeechOutput, StalledSink,
    fast_config, session_with, session_with_sink, tone_wav,
};

const RATE: u32 = 16000;

/// Run a full exchange and assert it ends awaiting input
async fn exchange(session: &mut voice_agent::ConversationSession, audio: &[u8]) {
    session.submit_utterance(audio, RATE).await.unwrap();
    let reply = session.generate_reply().await.unwrap();
    session.synthesize_and_play(&reply).await.unwrap();
    assert_eq!(session.state(), SessionState::AwaitingInput);
}

#[tokio::test]
async fn test_submit_hello_records_user_turn() {
    let mut session = session_with(
        fast_config(20),
        ScriptedSpeechInput::saying("hello"),
        ScriptedModel::replying("hi there"),
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );
    session.start().unwrap();

    let turn = session.submit_utterance(&tone_wav(RATE), RATE).await.unwrap();

    assert_eq!(turn.role(), Role::User);
    assert_eq!(turn.text(), "hello");
    assert_eq!(session.history_view().len(), 1);
    assert_eq!(session.state(), SessionState::Generating);
}

#[tokio::test]
async fn test_generate_reply_appends_assistant_turn() {
    let llm = ScriptedModel::replying("hi there");
    let mut session = session_with(
        fast_config(20),
        ScriptedSpeechInput::saying("hello"),
        llm.clone(),
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );
    session.start().unwrap();
    session.submit_utterance(&tone_wav(RATE), RATE).await.unwrap();

    let reply = session.generate_reply().await.unwrap();

    assert_eq!(reply.role(), Role::Assistant);
    let view = session.history_view();
    assert_eq!(view.texts().collect::<Vec<_>>(), ["hello", "hi there"]);
    assert_eq!(session.state(), SessionState::Synthesizing);

    let seen = llm.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, ["hello"]);
    assert_eq!(seen[0].1, "You are a test assistant.");
}

#[tokio::test]
async fn test_tts_failure_returns_to_awaiting_input() {
    let sink = RecordingSink::default();
    let mut session = session_with(
        fast_config(20),
        ScriptedSpeechInput::saying("hello"),
        ScriptedModel::replying("hi there"),
        ScriptedSpeechOutput::failing(ServiceError::fatal("voice not found")),
        sink.clone(),
    );
    session.start().unwrap();
    session.submit_utterance(&tone_wav(RATE), RATE).await.unwrap();
    let reply = session.generate_reply().await.unwrap();

    let result = session.synthesize_and_play(&reply).await;

    assert_eq!(result, Err(ServiceError::fatal("voice not found")));
    assert_eq!(session.state(), SessionState::AwaitingInput);
    assert_eq!(session.history_view().len(), 2);
    assert!(sink.played().is_empty());
}

#[tokio::test]
async fn test_invalid_turn_returns_to_awaiting_input() {
    let tts = ScriptedSpeechOutput::ok();
    let sink = RecordingSink::default();
    let mut session = session_with(
        fast_config(20),
        ScriptedSpeechInput::saying("hello"),
        ScriptedModel::replying("hi there"),
        tts.clone(),
        sink.clone(),
    );
    session.start().unwrap();
    session.submit_text("hello").unwrap();
    session.generate_reply().await.unwrap();

    let result = session.synthesize_and_play(&Turn::user("not assistant")).await;

    assert_eq!(
        result,
        Err(ServiceError::fatal("only assistant turns can be spoken"))
    );
    assert_eq!(session.state(), SessionState::AwaitingInput);

    // A blank assistant turn is refused the same way
    session.submit_text("again").unwrap();
    session.generate_reply().await.unwrap();
    let result = session.synthesize_and_play(&Turn::assistant("   ")).await;

    assert_eq!(result, Err(ServiceError::fatal("cannot speak an empty turn")));
    assert_eq!(session.state(), SessionState::AwaitingInput);
    assert_eq!(session.history_view().len(), 4);
    assert_eq!(tts.calls(), 0);
    assert!(sink.played().is_empty());

    // The session keeps working afterwards
    assert_ok!(session.submit_text("still there?"));
}

#[tokio::test(start_paused = true)]
async fn test_sink_timeout_returns_to_awaiting_input() {
    let tts = ScriptedSpeechOutput::ok();
    let mut session = session_with_sink(
        fast_config(20),
        ScriptedSpeechInput::saying("hello"),
        ScriptedModel::replying("hi there"),
        tts.clone(),
        Box::new(StalledSink),
    );
    session.start().unwrap();
    session.submit_text("hello").unwrap();
    let reply = session.generate_reply().await.unwrap();

    let err = session.synthesize_and_play(&reply).await.unwrap_err();

    assert!(err.reason().contains("audio sink timed out after 200ms"));
    assert_eq!(session.state(), SessionState::AwaitingInput);
    assert_eq!(session.history_view().len(), 2);
    assert_eq!(tts.calls(), 1);
}

#[tokio::test]
async fn test_bound_keeps_last_four_turns() {
    let llm = ScriptedModel::new([
        Ok("reply one".to_string()),
        Ok("reply two".to_string()),
        Ok("reply three".to_string()),
    ]);
    let stt = ScriptedSpeechInput::new([
        Ok("first".to_string()),
        Ok("second".to_string()),
        Ok("third".to_string()),
    ]);
    let mut session = session_with(
        fast_config(4),
        stt,
        llm,
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );
    session.start().unwrap();

    let audio = tone_wav(RATE);
    for _ in 0..3 {
        exchange(&mut session, &audio).await;
    }

    let texts: Vec<String> = session.history_view().texts().map(str::to_string).collect();
    assert_eq!(texts, ["second", "reply two", "third", "reply three"]);
    assert_eq!(session.exchange_count(), 2);
}

#[tokio::test]
async fn test_history_is_two_per_exchange() {
    let sink = RecordingSink::default();
    let mut session = session_with(
        fast_config(100),
        ScriptedSpeechInput::saying("again"),
        ScriptedModel::replying("sure"),
        ScriptedSpeechOutput::ok(),
        sink.clone(),
    );
    session.start().unwrap();

    let audio = tone_wav(RATE);
    for n in 1..=5 {
        exchange(&mut session, &audio).await;
        assert_eq!(session.history_view().len(), 2 * n);
    }

    let roles: Vec<Role> = session.history_view().iter().map(|t| t.role()).collect();
    assert!(roles.chunks(2).all(|pair| pair == [Role::User, Role::Assistant]));
    assert_eq!(sink.played().len(), 5);
}

#[tokio::test]
async fn test_generate_failure_does_not_append() {
    let llm = ScriptedModel::new([Err(ServiceError::fatal("invalid api key"))]);
    let mut session = session_with(
        fast_config(20),
        ScriptedSpeechInput::saying("hello"),
        llm.clone(),
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );
    session.start().unwrap();
    session.submit_utterance(&tone_wav(RATE), RATE).await.unwrap();

    let err = session.generate_reply().await.unwrap_err();

    assert!(!err.is_transient());
    assert_eq!(llm.calls(), 1, "fatal failures are not retried");
    assert_eq!(session.history_view().len(), 1);
    assert_eq!(session.state(), SessionState::Error);
    assert_eq!(session.last_error(), Some(&err));
}

#[tokio::test]
async fn test_recover_keeps_history() {
    let llm = ScriptedModel::new([
        Ok("hi there".to_string()),
        Err(ServiceError::fatal("malformed response")),
    ]);
    let mut session = session_with(
        fast_config(20),
        ScriptedSpeechInput::saying("hello"),
        llm,
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );
    session.start().unwrap();
    exchange(&mut session, &tone_wav(RATE)).await;
    session.submit_text("and then?").unwrap();
    session.generate_reply().await.unwrap_err();

    session.recover().unwrap();

    assert_eq!(session.state(), SessionState::AwaitingInput);
    assert!(session.last_error().is_none());
    assert_eq!(session.history_view().len(), 3);

    // The next exchange carries on from the kept history
    session.submit_text("try again").unwrap();
    session.generate_reply().await.unwrap();
    assert_eq!(session.history_view().len(), 5);
}

#[tokio::test]
async fn test_transient_failures_are_retried_then_succeed() {
    let stt = ScriptedSpeechInput::new([
        Err(ServiceError::transient("503 service unavailable")),
        Err(ServiceError::transient("connection reset")),
        Ok("hello".to_string()),
    ]);
    let mut session = session_with(
        fast_config(20),
        stt.clone(),
        ScriptedModel::replying("hi"),
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );
    session.start().unwrap();

    let turn = session.submit_utterance(&tone_wav(RATE), RATE).await.unwrap();

    assert_eq!(turn.text(), "hello");
    assert_eq!(stt.calls(), 3);
}

#[tokio::test]
async fn test_retry_bound_escalates_to_fatal() {
    let stt = ScriptedSpeechInput::new(std::iter::repeat_n(
        Err(ServiceError::transient("429 rate limited")),
        10,
    ));
    let mut config = fast_config(20);
    config.retry = RetryPolicy::immediate(4);
    let mut session = session_with(
        config,
        stt.clone(),
        ScriptedModel::replying("hi"),
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );
    session.start().unwrap();

    let err = session
        .submit_utterance(&tone_wav(RATE), RATE)
        .await
        .unwrap_err();

    assert_eq!(stt.calls(), 4);
    assert!(!err.is_transient());
    assert!(err.reason().contains("after 4 attempts"));
    assert!(session.history_view().is_empty());
    assert_eq!(session.state(), SessionState::Error);
}

#[tokio::test]
async fn test_timeout_counts_as_transient() {
    let llm = ScriptedModel::slow(Duration::from_secs(5));
    let mut config = fast_config(20);
    config.retry = RetryPolicy::immediate(2);
    config.timeouts = CallTimeouts {
        generate: Duration::from_millis(20),
        ..config.timeouts
    };
    let mut session = session_with(
        config,
        ScriptedSpeechInput::saying("hello"),
        llm.clone(),
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );
    session.start().unwrap();
    session.submit_text("hello").unwrap();

    let err = session.generate_reply().await.unwrap_err();

    assert_eq!(llm.calls(), 2);
    assert!(err.reason().contains("timed out"));
    assert_eq!(session.history_view().len(), 1);
}

#[tokio::test]
async fn test_reset_is_idempotent() {
    let mut session = session_with(
        fast_config(20),
        ScriptedSpeechInput::saying("hello"),
        ScriptedModel::replying("hi"),
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );
    session.start().unwrap();
    exchange(&mut session, &tone_wav(RATE)).await;

    session.reset();
    let once = (session.state(), session.history_view().len());
    session.reset();
    let twice = (session.state(), session.history_view().len());

    assert_eq!(once, (SessionState::AwaitingInput, 0));
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_reset_from_mid_turn() {
    let mut session = session_with(
        fast_config(20),
        ScriptedSpeechInput::saying("hello"),
        ScriptedModel::replying("hi"),
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );
    session.start().unwrap();
    session.submit_text("hello").unwrap();
    assert_eq!(session.state(), SessionState::Generating);

    session.reset();

    assert_eq!(session.state(), SessionState::AwaitingInput);
    assert!(session.history_view().is_empty());
}

#[tokio::test]
async fn test_empty_audio_rejected_without_state_change() {
    let stt = ScriptedSpeechInput::saying("hello");
    let mut session = session_with(
        fast_config(20),
        stt.clone(),
        ScriptedModel::replying("hi"),
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );
    session.start().unwrap();

    let err = session.submit_utterance(&[], RATE).await.unwrap_err();

    assert!(!err.is_transient());
    assert_eq!(stt.calls(), 0);
    assert_eq!(session.state(), SessionState::AwaitingInput);
}

#[tokio::test]
async fn test_blank_transcript_is_fatal() {
    let mut session = session_with(
        fast_config(20),
        ScriptedSpeechInput::saying("   "),
        ScriptedModel::replying("hi"),
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );
    session.start().unwrap();

    let err = session
        .submit_utterance(&tone_wav(RATE), RATE)
        .await
        .unwrap_err();

    assert_eq!(err, ServiceError::fatal("no speech recognized"));
    assert!(session.history_view().is_empty());
}

#[tokio::test]
async fn test_operations_require_their_state() {
    let mut session = session_with(
        fast_config(20),
        ScriptedSpeechInput::saying("hello"),
        ScriptedModel::replying("hi"),
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );

    // Not started yet
    assert_err!(session.submit_text("hello"));
    assert_err!(session.generate_reply().await);
    assert_eq!(session.state(), SessionState::Idle);

    assert_ok!(session.start());
    assert_err!(session.start());
    assert_err!(session.generate_reply().await);
    assert_eq!(session.state(), SessionState::AwaitingInput);
}

#[tokio::test]
async fn test_cancel_mid_generation_discards_reply() {
    let mut session = session_with(
        fast_config(20),
        ScriptedSpeechInput::saying("hello"),
        ScriptedModel::slow(Duration::from_millis(150)),
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );
    session.start().unwrap();
    session.submit_text("hello").unwrap();

    let finished = tokio::time::timeout(Duration::from_millis(10), session.generate_reply())
        .await
        .is_ok();
    assert!(!finished);
    assert_eq!(session.state(), SessionState::Generating);

    assert!(session.cancel());
    assert_eq!(session.state(), SessionState::AwaitingInput);
    assert_eq!(session.history_view().len(), 1);
    assert!(!session.cancel(), "nothing left to cancel");
}

#[tokio::test]
async fn test_quit_is_terminal() {
    let mut session = session_with(
        fast_config(20),
        ScriptedSpeechInput::saying("hello"),
        ScriptedModel::replying("hi"),
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );
    session.start().unwrap();
    session.quit();

    session.reset();
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(session.submit_text("hello").is_err());
    assert_eq!(session.state(), SessionState::Terminated);
}

#[tokio::test]
async fn test_token_budget_evicts_oldest() {
    let mut config = fast_config(100);
    config.history = HistoryLimit {
        max_turns: 100,
        max_tokens: Some(10),
    };
    let mut session = session_with(
        config,
        ScriptedSpeechInput::saying("hello"),
        // 16 chars = 4 tokens each
        ScriptedModel::replying("abcdefghijklmnop"),
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );
    session.start().unwrap();

    for _ in 0..3 {
        session.submit_text("qrstuvwxyzabcdef").unwrap();
        let reply = session.generate_reply().await.unwrap();
        session.synthesize_and_play(&reply).await.unwrap();
    }

    assert_eq!(session.history_view().len(), 2);
}

#[tokio::test]
async fn test_sample_rate_is_forwarded() {
    let stt = ScriptedSpeechInput::saying("hello");
    let mut session = session_with(
        fast_config(20),
        stt.clone(),
        ScriptedModel::replying("hi"),
        ScriptedSpeechOutput::ok(),
        RecordingSink::default(),
    );
    session.start().unwrap();

    session.submit_utterance(&tone_wav(8000), 8000).await.unwrap();

    assert_eq!(stt.rates(), [8000]);
}
