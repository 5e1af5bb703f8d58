use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use sandpit::interpreter::{Module, Value};
use sandpit::runtime::{
    DebugCommand, ExternalMessage, ImportResolver, MessageKind, PackageIndex, ResolveError, RunOutcome, RunRequest,
    Session, SessionConfig,
};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// Resolver that counts calls and serves at most one known module.
#[derive(Default)]
struct Counting {
    resolves: AtomicUsize,
    prefetches: AtomicUsize,
    known: Option<(&'static str, &'static str)>,
    eager: bool,
}

impl Counting {
    fn module(&self, name: &str) -> Option<Module> {
        let (known, source) = self.known?;
        (known == name).then(|| Module::script(known, &format!("{known}.scm"), source, 100).unwrap())
    }
}

impl ImportResolver for Counting {
    fn resolve<'a>(&'a self, module: &'a str) -> BoxFuture<'a, Result<Module, ResolveError>> {
        Box::pin(async move {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            self.module(module)
                .ok_or_else(|| ResolveError::NotFound(module.to_string()))
        })
    }

    fn prefetch<'a>(&'a self, modules: &'a [String]) -> BoxFuture<'a, Vec<Module>> {
        Box::pin(async move {
            self.prefetches.fetch_add(1, Ordering::SeqCst);
            if !self.eager {
                return Vec::new();
            }
            modules.iter().filter_map(|name| self.module(name)).collect()
        })
    }
}

fn session(resolver: Arc<Counting>) -> (Session, mpsc::UnboundedReceiver<ExternalMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::builder()
        .config(SessionConfig::default())
        .resolver(resolver)
        .sink(tx)
        .build()
        .unwrap();
    (session, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ExternalMessage>) -> Vec<ExternalMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = rx.try_recv() {
        messages.push(message);
    }
    messages
}

fn loading_statuses(messages: &[ExternalMessage]) -> Vec<String> {
    messages
        .iter()
        .filter(|m| m.kind == MessageKind::Loading)
        .map(|m| {
            let data: serde_json::Value = serde_json::from_str(m.data.as_text().unwrap()).unwrap();
            data["status"].as_str().unwrap().to_string()
        })
        .collect()
}

#[tokio::test]
async fn unresolvable_modules_are_retried_once_then_reported_unchanged() {
    let resolver = Arc::new(Counting::default());
    let (session, mut rx) = session(resolver.clone());

    let outcome = session
        .run(RunRequest::new("(import zzz_missing_pkg)\n(print \"unreachable\")"))
        .await
        .unwrap();
    let RunOutcome::Failed(friendly) = outcome else {
        panic!("expected failure");
    };
    assert_eq!(friendly.name, "ModuleNotFoundError");
    assert!(friendly.traceback.ends_with("ModuleNotFoundError: No module named 'zzz_missing_pkg'"));
    assert_eq!(resolver.resolves.load(Ordering::SeqCst), 1);

    let messages = drain(&mut rx);
    assert_eq!(loading_statuses(&messages), vec!["loading", "failed"]);
    let loading: serde_json::Value = serde_json::from_str(messages[1].data.as_text().unwrap()).unwrap();
    assert_eq!(loading, json!({"modules": ["zzz_missing_pkg"], "status": "loading"}));
    assert_eq!(messages.last().unwrap().kind, MessageKind::Error);
    assert!(messages.iter().all(|m| m.kind != MessageKind::Output));
}

#[tokio::test]
async fn resolved_modules_are_installed_and_the_run_retried() {
    let resolver = Arc::new(Counting {
        known: Some(("greet", "(def hello (n) (+ \"hello \" n))")),
        ..Counting::default()
    });
    let (session, mut rx) = session(resolver.clone());

    let outcome = session
        .run(RunRequest::new("(import greet)\n(print (greet.hello \"ada\"))\n(greet.hello \"bob\")"))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::Str("hello bob".into())));
    assert_eq!(resolver.resolves.load(Ordering::SeqCst), 1);
    assert!(session.modules().contains(&"greet".to_string()));

    let messages = drain(&mut rx);
    assert_eq!(loading_statuses(&messages), vec!["loading", "loaded"]);
    let outputs: Vec<&str> = messages
        .iter()
        .filter(|m| m.kind == MessageKind::Output)
        .filter_map(|m| m.data.as_text())
        .collect();
    assert_eq!(outputs, vec!["hello ada\n"]);

    // Installed modules survive into later runs without resolving again.
    session.run(RunRequest::new("(import greet)\n(greet.hello \"x\")")).await.unwrap();
    assert_eq!(resolver.resolves.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn prefetch_installs_modules_before_execution() {
    let resolver = Arc::new(Counting {
        known: Some(("consts", "(let answer 42)")),
        eager: true,
        ..Counting::default()
    });
    let (session, mut rx) = session(resolver.clone());

    let outcome = session
        .run(RunRequest::new("(import consts)\n(import math)\nconsts.answer"))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::Int(42)));
    assert_eq!(resolver.prefetches.load(Ordering::SeqCst), 1);
    assert_eq!(resolver.resolves.load(Ordering::SeqCst), 0);

    let messages = drain(&mut rx);
    assert_eq!(loading_statuses(&messages), vec!["loaded"]);
    assert_eq!(messages[1].kind, MessageKind::Loading);
}

#[tokio::test]
async fn std_imports_do_not_consult_the_resolver() {
    let resolver = Arc::new(Counting::default());
    let (session, mut rx) = session(resolver.clone());
    let outcome = session.run(RunRequest::new("(import math)\n(math.floor 2.5)")).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));
    assert_eq!(resolver.prefetches.load(Ordering::SeqCst), 0);
    assert!(loading_statuses(&drain(&mut rx)).is_empty());
}

#[tokio::test]
async fn package_index_serves_modules_from_a_directory() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("shapes.scm"),
        "(def area (w h)\n  (* w h))\n(def broken ()\n  (/ 1 0))",
    )
    .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = Session::builder()
        .resolver(PackageIndex::new(dir.path(), 100))
        .sink(tx)
        .build()
        .unwrap();

    let outcome = session
        .run(RunRequest::new("(import shapes)\n(shapes.area 3 4)"))
        .await
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::Int(12)));
    assert_eq!(loading_statuses(&drain(&mut rx)), vec!["loaded"]);

    // Frames inside the module carry its own filename; the excerpt starts at
    // the user's file.
    let outcome = session
        .run(RunRequest::new("(import shapes)\n(shapes.broken)"))
        .await
        .unwrap();
    let RunOutcome::Failed(friendly) = outcome else {
        panic!("expected failure");
    };
    assert!(friendly.traceback.contains("File \"shapes.scm\", line 4, in broken"));
    assert!(friendly.excerpt.starts_with("  File \"main.scm\", line 2"));
    drain(&mut rx);
}

#[tokio::test]
async fn retried_runs_replay_batch_input_from_the_start() {
    let resolver = Arc::new(Counting {
        known: Some(("extra", "(let tag \"!\")")),
        ..Counting::default()
    });
    let (session, mut rx) = session(resolver.clone());

    let request = RunRequest::new("(let n (input \"Name: \"))\n(import extra)\n(print n extra.tag)").stdin(["bob"]);
    let outcome = tokio::time::timeout(Duration::from_secs(10), session.run(request))
        .await
        .expect("retry waited for input that was already supplied")
        .unwrap();
    assert_eq!(outcome, RunOutcome::Completed(Value::Nil));
    assert_eq!(resolver.resolves.load(Ordering::SeqCst), 1);

    let messages = drain(&mut rx);
    let kinds: Vec<MessageKind> = messages.iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![
            MessageKind::Start,
            MessageKind::Input,
            MessageKind::Loading,
            MessageKind::Loading,
            MessageKind::Input,
            MessageKind::Output,
            MessageKind::End,
        ]
    );
    assert_eq!(messages[5].data.as_text(), Some("bob !\n"));
}

#[tokio::test]
async fn retried_debug_runs_restart_at_the_first_breakpoint() {
    let resolver = Arc::new(Counting {
        known: Some(("extra", "(let tag 1)")),
        ..Counting::default()
    });
    let (session, mut rx) = session(resolver);
    let session = Arc::new(session);
    let handle = session.handle();
    let runner = {
        let session = session.clone();
        let request = RunRequest::new("(print 1)\n(import extra)\n(print 2)").debug([2]);
        tokio::spawn(async move { session.run(request).await })
    };

    let mut pauses = Vec::new();
    let mut first = true;
    loop {
        let message = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out")
            .expect("sink closed");
        if message.kind == MessageKind::Debug {
            pauses.push(message.data.as_number().unwrap());
            // Stepping off the failing import leaves the debugger mid-step.
            handle.debug(if first { DebugCommand::Step } else { DebugCommand::Continue });
            first = false;
        }
        if message.kind.is_terminal() {
            break;
        }
    }
    assert_eq!(pauses, vec![2, 2]);
    assert!(matches!(runner.await.unwrap().unwrap(), RunOutcome::Completed(_)));
}
