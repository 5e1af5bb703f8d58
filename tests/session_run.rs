use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sandpit::interpreter::exception::Unwind;
use sandpit::interpreter::value::NativeFunction;
use sandpit::interpreter::{InterpreterHost, Module, ModuleRegistry, Value};
use sandpit::runtime::error::SessionError;
use sandpit::runtime::{
    ExecutionState, ExternalMessage, FriendlyError, MessageData, MessageKind, RunOutcome, RunRequest,
    Session, SessionConfig,
};
use tokio::sync::mpsc;

fn config() -> SessionConfig {
    SessionConfig {
        honor_sleep: false,
        ..SessionConfig::default()
    }
}

fn session() -> (Arc<Session>, mpsc::UnboundedReceiver<ExternalMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::builder().config(config()).sink(tx).build().unwrap();
    (Arc::new(session), rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ExternalMessage>) -> Vec<ExternalMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

async fn next_message(rx: &mut mpsc::UnboundedReceiver<ExternalMessage>) -> ExternalMessage {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("sink closed")
}

fn kinds(messages: &[ExternalMessage]) -> Vec<MessageKind> {
    messages.iter().map(|message| message.kind).collect()
}

fn text(message: &ExternalMessage) -> &str {
    message.data.as_text().unwrap()
}

#[tokio::test]
async fn output_messages_arrive_in_order_between_start_and_end() {
    let (session, mut rx) = session();
    let outcome = session
        .run(RunRequest::new("(print \"a\")\n(print \"b\" 2)\n(+ 1 2)"))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::Int(3)));

    let messages = drain(&mut rx);
    assert_eq!(
        kinds(&messages),
        vec![MessageKind::Start, MessageKind::Output, MessageKind::Output, MessageKind::End]
    );
    assert_eq!(text(&messages[0]), "run");
    assert_eq!(text(&messages[1]), "a\n");
    assert_eq!(text(&messages[2]), "b 2\n");
    assert_eq!(messages[2].content_type, "text/plain");
    assert_eq!(text(&messages[3]), "3");
    assert_eq!(messages[3].content_type, "text/json");
    assert_eq!(session.state(), ExecutionState::Finished);
}

#[tokio::test]
async fn compile_errors_bypass_explanation() {
    let (session, mut rx) = session();
    let outcome = session
        .run(RunRequest::new("(print \"a\")\n(print \"b\"").filename("broken.scm"))
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::CompileFailed(_)));

    let messages = drain(&mut rx);
    assert_eq!(kinds(&messages), vec![MessageKind::Start, MessageKind::Error]);
    assert_eq!(messages[1].content_type, "text/plain");
    let report = text(&messages[1]);
    assert!(report.contains("File \"broken.scm\""), "{report}");
    assert!(report.contains("SyntaxError"), "{report}");
    assert_eq!(session.state(), ExecutionState::Errored);
}

#[tokio::test]
async fn runtime_errors_follow_their_output_and_are_explained() {
    let (session, mut rx) = session();
    let source = "(print 1)\n(print 2)\n(def f (x)\n  (/ x 0))\n(f 5)";
    let outcome = session.run(RunRequest::new(source)).await.unwrap();
    let RunOutcome::Failed(friendly) = outcome else {
        panic!("expected a runtime failure, got {outcome:?}");
    };
    assert_eq!(friendly.name, "ZeroDivisionError");

    let messages = drain(&mut rx);
    assert_eq!(
        kinds(&messages),
        vec![MessageKind::Start, MessageKind::Output, MessageKind::Output, MessageKind::Error]
    );
    let error = messages.last().unwrap();
    assert_eq!(error.content_type, "text/json");
    let data: serde_json::Value = serde_json::from_str(text(error)).unwrap();
    let keys: Vec<&str> = data.as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(keys.len(), 6);
    for key in ["name", "traceback", "info", "why", "where", "what"] {
        assert!(keys.contains(&key), "missing {key}");
    }

    let parsed: FriendlyError = serde_json::from_str(text(error)).unwrap();
    assert_eq!(parsed, friendly);
    assert!(!parsed.excerpt.is_empty());
    assert!(parsed.traceback.contains(&parsed.excerpt));
    assert!(parsed.excerpt.contains("line 5"));
    assert!(parsed.traceback.ends_with("ZeroDivisionError: division by zero"));
}

#[tokio::test]
async fn input_suspends_until_a_value_is_supplied() {
    let (session, mut rx) = session();
    let handle = session.handle();
    let runner = {
        let session = session.clone();
        tokio::spawn(async move {
            session
                .run(RunRequest::new("(print \"go\")\n(let name (input \"Name: \"))\n(print \"hi\" name)"))
                .await
        })
    };

    assert_eq!(next_message(&mut rx).await.kind, MessageKind::Start);
    assert_eq!(text(&next_message(&mut rx).await), "go\n");
    let request = next_message(&mut rx).await;
    assert_eq!(request.kind, MessageKind::Input);
    assert_eq!(text(&request), "Name: ");

    handle.provide_input("Ada");
    let outcome = runner.await.unwrap().unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::Nil));

    let rest = drain(&mut rx);
    assert_eq!(kinds(&rest), vec![MessageKind::Output, MessageKind::End]);
    assert_eq!(text(&rest[0]), "hi Ada\n");
}

#[tokio::test]
async fn batch_input_answers_without_suspending() {
    let (session, mut rx) = session();
    let request = RunRequest::new("(let a (input \"a? \"))\n(let b (input))\n(+ a b)").stdin(["x", "y"]);
    let outcome = session.run(request).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::Str("xy".into())));

    let messages = drain(&mut rx);
    assert_eq!(
        kinds(&messages),
        vec![MessageKind::Start, MessageKind::Input, MessageKind::Input, MessageKind::End]
    );
    assert_eq!(text(&messages[1]), "a? ");
    assert_eq!(text(&messages[2]), "");
}

#[tokio::test]
async fn sleeps_are_reported_in_milliseconds() {
    let (session, mut rx) = session();
    session.run(RunRequest::new("(sleep 0.5)\n(print \"woke\")")).await.unwrap();
    let messages = drain(&mut rx);
    assert_eq!(
        kinds(&messages),
        vec![MessageKind::Start, MessageKind::Sleep, MessageKind::Output, MessageKind::End]
    );
    assert_eq!(messages[1].data, MessageData::Number(500));
    assert_eq!(messages[1].content_type, "application/number");
}

#[tokio::test]
async fn images_are_forwarded_with_their_format() {
    let (session, mut rx) = session();
    session
        .run(RunRequest::new("(import image)\n(image.show \"png\" \"aGVsbG8=\")"))
        .await
        .unwrap();
    let messages = drain(&mut rx);
    let image = messages
        .iter()
        .find(|message| message.kind == MessageKind::Output)
        .unwrap();
    assert_eq!(image.content_type, "img/png;base64");
    assert_eq!(text(image), "aGVsbG8=");
}

#[tokio::test]
async fn a_second_run_is_rejected_while_one_is_in_flight() {
    let (session, mut rx) = session();
    let handle = session.handle();
    let runner = {
        let session = session.clone();
        tokio::spawn(async move { session.run(RunRequest::new("(input)")).await })
    };
    loop {
        if next_message(&mut rx).await.kind == MessageKind::Input {
            break;
        }
    }

    assert!(matches!(
        session.run(RunRequest::new("(print 1)")).await,
        Err(SessionError::Busy)
    ));
    assert!(matches!(session.set_source("(print 2)", None), Err(SessionError::Busy)));

    handle.provide_input("done");
    let outcome = runner.await.unwrap().unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::Str("done".into())));
    assert!(session.set_source("(print 2)", Some("other.scm")).is_ok());
}

#[tokio::test]
async fn rerunning_the_buffer_uses_the_latest_source() {
    let (session, mut rx) = session();
    let unit = session.set_source("(* 6 7)", Some("answer.scm")).unwrap();
    assert_eq!(&*unit.filename, "answer.scm");

    let outcome = session.run(RunRequest::default()).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::Int(42)));
    let before = session.source().revision;
    session.run(RunRequest::new("(+ 1 1)")).await.unwrap();
    assert_eq!(session.source().revision, before + 1);
    assert_eq!(&*session.source().filename, "answer.scm");
    drain(&mut rx);
}

#[tokio::test]
async fn files_are_readable_by_scripts() {
    let (session, mut rx) = session();
    session.provide_files([("data.txt".to_string(), "1 2 3".to_string())].into());
    let outcome = session.run(RunRequest::new("(read-file \"data.txt\")")).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::Str("1 2 3".into())));

    let outcome = session.run(RunRequest::new("(read-file \"/etc/passwd\")")).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Failed(ref err) if err.name == "FileNotFoundError"));
    drain(&mut rx);
}

#[tokio::test]
async fn deep_recursion_raises_recursion_error() {
    let (session, mut rx) = session();
    let outcome = session
        .run(RunRequest::new("(def down (n) (down (+ n 1)))\n(down 0)"))
        .await
        .unwrap();
    let RunOutcome::Failed(friendly) = outcome else {
        panic!("expected failure");
    };
    assert_eq!(friendly.name, "RecursionError");
    drain(&mut rx);
}

#[tokio::test]
async fn building_without_a_sink_fails() {
    assert!(matches!(Session::builder().build(), Err(SessionError::MissingCallback)));
}

#[tokio::test]
async fn callbacks_receive_every_message() {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let session = Session::builder()
        .config(config())
        .callback(move |message: ExternalMessage| sink.lock().push(message.kind))
        .build()
        .unwrap();
    session.run(RunRequest::new("(print 1)")).await.unwrap();
    assert_eq!(
        *seen.lock(),
        vec![MessageKind::Start, MessageKind::Output, MessageKind::End]
    );
}

#[tokio::test]
async fn oversized_sequences_raise_instead_of_allocating() {
    let (session, mut rx) = session();
    for source in [
        "(* (list 1 2) 9223372036854775807)",
        "(len (* \"a\" 100000000000000))",
        "(let s (* \"ab\" 4000000))\n(+ s s)",
    ] {
        let outcome = session.run(RunRequest::new(source)).await.unwrap();
        let RunOutcome::Failed(friendly) = outcome else {
            panic!("expected failure for {source}, got {outcome:?}");
        };
        assert_eq!(friendly.name, "OverflowError");
        assert_eq!(kinds(&drain(&mut rx)), vec![MessageKind::Start, MessageKind::Error]);
    }

    let outcome = session.run(RunRequest::new("(len (* \"ab\" 3))")).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::Int(6)));
    drain(&mut rx);
}

fn explode(_: &mut dyn InterpreterHost, _: Vec<Value>) -> Result<Value, Unwind> {
    panic!("native function blew up");
}

#[tokio::test]
async fn a_panicking_worker_still_ends_the_run_with_an_error() {
    let mut registry = ModuleRegistry::with_std();
    let members = BTreeMap::from([(
        "explode".to_string(),
        Value::Native(NativeFunction {
            name: "explode",
            func: explode,
        }),
    )]);
    registry.install(Module::native("fragile", members));

    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = Session::builder()
        .config(config())
        .registry(registry)
        .sink(tx)
        .build()
        .unwrap();

    let outcome = session
        .run(RunRequest::new("(print 1)\n(import fragile)\n(fragile.explode)"))
        .await
        .unwrap();
    let RunOutcome::Failed(friendly) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(friendly.name, "SystemError");
    assert!(friendly.message.contains("native function blew up"));
    assert_eq!(
        kinds(&drain(&mut rx)),
        vec![MessageKind::Start, MessageKind::Output, MessageKind::Error]
    );
    assert_eq!(session.state(), ExecutionState::Errored);

    let outcome = session.run(RunRequest::new("(+ 1 1)")).await.unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::Int(2)));
}
