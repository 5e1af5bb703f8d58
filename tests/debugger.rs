use std::sync::Arc;
use std::time::Duration;

use sandpit::interpreter::Value;
use sandpit::runtime::{
    DebugCommand, ExternalMessage, MessageKind, RunOutcome, RunRequest, Session, SessionConfig,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Run = JoinHandle<sandpit::runtime::error::Result<RunOutcome>>;

fn start(source: &str, breakpoints: &[u32]) -> (Arc<Session>, mpsc::UnboundedReceiver<ExternalMessage>, Run) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Arc::new(
        Session::builder()
            .config(SessionConfig {
                honor_sleep: false,
                ..SessionConfig::default()
            })
            .sink(tx)
            .build()
            .unwrap(),
    );
    let request = RunRequest::new(source).debug(breakpoints.iter().copied());
    let runner = {
        let session = session.clone();
        tokio::spawn(async move { session.run(request).await })
    };
    (session, rx, runner)
}

/// Receive messages until the next pause or terminal message.
async fn until_pause_or_end(rx: &mut mpsc::UnboundedReceiver<ExternalMessage>) -> Vec<ExternalMessage> {
    let mut seen = Vec::new();
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out")
            .expect("sink closed");
        let stop = message.kind == MessageKind::Debug || message.kind.is_terminal();
        seen.push(message);
        if stop {
            return seen;
        }
    }
}

fn ten_lines() -> String {
    (1..=10).map(|n| format!("(print {n})")).collect::<Vec<_>>().join("\n")
}

#[tokio::test]
async fn pauses_only_at_breakpoints_in_order() {
    let (session, mut rx, runner) = start(&ten_lines(), &[3, 7]);
    let handle = session.handle();

    let first = until_pause_or_end(&mut rx).await;
    assert_eq!(first[0].kind, MessageKind::Start);
    assert_eq!(first[0].data.as_text(), Some("debug"));
    let outputs = first.iter().filter(|m| m.kind == MessageKind::Output).count();
    assert_eq!(outputs, 2, "lines 1 and 2 run before the first pause");
    assert_eq!(first.last().unwrap().data.as_number(), Some(3));
    assert!(handle.is_debugging());

    handle.debug(DebugCommand::Continue);
    let second = until_pause_or_end(&mut rx).await;
    assert_eq!(second.last().unwrap().data.as_number(), Some(7));
    assert_eq!(second.iter().filter(|m| m.kind == MessageKind::Output).count(), 4);

    handle.debug(DebugCommand::Continue);
    let rest = until_pause_or_end(&mut rx).await;
    assert_eq!(rest.last().unwrap().kind, MessageKind::End);
    assert_eq!(rest.iter().filter(|m| m.kind == MessageKind::Output).count(), 4);

    assert_eq!(runner.await.unwrap().unwrap(), RunOutcome::Completed(Value::Nil));
    assert!(!session.is_debugging());
}

#[tokio::test]
async fn stepping_pauses_on_the_next_line() {
    let (session, mut rx, runner) = start(&ten_lines(), &[2]);
    let handle = session.handle();

    let first = until_pause_or_end(&mut rx).await;
    assert_eq!(first.last().unwrap().data.as_number(), Some(2));
    handle.debug(DebugCommand::Step);
    let next = until_pause_or_end(&mut rx).await;
    assert_eq!(next.last().unwrap().data.as_number(), Some(3));
    let printed: Vec<&str> = next
        .iter()
        .filter(|m| m.kind == MessageKind::Output)
        .filter_map(|m| m.data.as_text())
        .collect();
    assert_eq!(printed, vec!["2\n"]);

    handle.debug(DebugCommand::Continue);
    until_pause_or_end(&mut rx).await;
    assert!(matches!(runner.await.unwrap().unwrap(), RunOutcome::Completed(_)));
}

#[tokio::test]
async fn quitting_ends_the_run_normally() {
    let (session, mut rx, runner) = start(&ten_lines(), &[5]);
    let handle = session.handle();

    until_pause_or_end(&mut rx).await;
    handle.debug(DebugCommand::Quit);
    let rest = until_pause_or_end(&mut rx).await;
    let end = rest.last().unwrap();
    assert_eq!(end.kind, MessageKind::End);
    assert_eq!(end.data.as_text(), Some("null"));
    assert!(rest.iter().all(|m| m.kind != MessageKind::Output));

    assert_eq!(runner.await.unwrap().unwrap(), RunOutcome::Completed(Value::Nil));
    assert!(!session.is_debugging());
}

#[tokio::test]
async fn breakpoints_on_blank_lines_are_ignored() {
    let source = "(print 1)\n\n; just a comment\n(print 2)";
    let (session, mut rx, runner) = start(source, &[2, 3, 4, 99]);
    let handle = session.handle();

    let first = until_pause_or_end(&mut rx).await;
    assert_eq!(first.last().unwrap().data.as_number(), Some(4));
    handle.debug(DebugCommand::Continue);
    until_pause_or_end(&mut rx).await;
    assert!(matches!(runner.await.unwrap().unwrap(), RunOutcome::Completed(_)));
}

#[tokio::test]
async fn loop_bodies_pause_on_every_iteration() {
    let source = "(let i 0)\n(while (< i 3)\n  (set i (+ i 1)))\ni";
    let (session, mut rx, runner) = start(source, &[3]);
    let handle = session.handle();

    let mut pauses = 0;
    loop {
        let batch = until_pause_or_end(&mut rx).await;
        let last = batch.last().unwrap();
        if last.kind != MessageKind::Debug {
            break;
        }
        assert_eq!(last.data.as_number(), Some(3));
        pauses += 1;
        handle.debug(DebugCommand::Continue);
    }
    assert_eq!(pauses, 3);
    assert_eq!(runner.await.unwrap().unwrap(), RunOutcome::Completed(Value::Int(3)));
}

#[tokio::test]
async fn errors_in_debug_mode_still_clean_up() {
    let (session, mut rx, runner) = start("(print 1)\n(undefined)", &[]);
    let messages = until_pause_or_end(&mut rx).await;
    assert_eq!(messages.last().unwrap().kind, MessageKind::Error);
    assert!(matches!(runner.await.unwrap().unwrap(), RunOutcome::Failed(_)));
    assert!(!session.is_debugging());
}
