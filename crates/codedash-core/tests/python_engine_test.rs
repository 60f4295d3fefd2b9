//! Runs snippets through a real interpreter. Skipped when `python3` is not on PATH.

use codedash_core::config::CodedashConfig;
use codedash_core::core_types::{EngineEvent, ExecutionResult, OutputEvent};
use codedash_core::engine::ExecutionEngine;
use codedash_core::router::{RunState, SessionId};
use codedash_core::suggestions::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn engine() -> Option<Arc<ExecutionEngine>> {
    if which::which("python3").is_err() {
        eprintln!("python3 not found, skipping");
        return None;
    }
    let config = CodedashConfig::default();
    Some(Arc::new(ExecutionEngine::from_config(&config).expect("engine from default config")))
}

fn session(engine: &ExecutionEngine) -> (SessionId, mpsc::UnboundedReceiver<EngineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (engine.open_session(tx), rx)
}

/// Start `code`, answer each input request in turn with `replies`, and return
/// the streamed output together with the prompts that were asked.
async fn run_interactively(
    engine: &Arc<ExecutionEngine>,
    code: &'static str,
    replies: &[&str],
) -> (ExecutionResult, Vec<String>, String) {
    let (id, mut rx) = session(engine);
    let task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.execute(id, code).await })
    };

    let mut prompts = Vec::new();
    let mut shown = Vec::new();
    for &reply in replies {
        loop {
            match rx.recv().await {
                Some(EngineEvent::InputRequested { prompt }) => {
                    prompts.push(prompt);
                    break;
                }
                Some(EngineEvent::Output(event)) => shown.push(event.content),
                None => panic!("session closed"),
            }
        }
        assert!(engine.supply_input(id, reply));
    }

    let result = task.await.unwrap().unwrap();
    while let Ok(event) = rx.try_recv() {
        match event {
            EngineEvent::Output(event) => shown.push(event.content),
            other => panic!("unexpected event {:?}", other),
        }
    }
    (result, prompts, shown.concat())
}

#[tokio::test]
async fn test_last_expression_is_echoed() {
    let Some(engine) = engine() else { return };
    let (id, mut rx) = session(&engine);

    let result = engine.execute(id, "1 + 1").await.unwrap();
    match result {
        ExecutionResult::Success {
            output,
            interactive,
            ..
        } => {
            assert_eq!(output, "2\n");
            assert!(!interactive);
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_fenced_indented_snippet_runs() {
    let Some(engine) = engine() else { return };
    let (id, _rx) = session(&engine);

    let raw = "```python\n    import sys\n    total = sum(range(5))\n    print('total', total)\n    print('warn', file=sys.stderr)\n    None\n```";
    let result = engine.execute(id, raw).await.unwrap();
    match result {
        ExecutionResult::Success { output, bindings, .. } => {
            assert_eq!(output, "total 10\nwarn\n");
            assert_eq!(bindings.get("total").map(String::as_str), Some("10"));
            assert!(bindings.keys().all(|name| !name.starts_with('_')));
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_syntax_error_reports_line() {
    let Some(engine) = engine() else { return };
    let (id, mut rx) = session(&engine);

    let result = engine.execute(id, "x = 1\ndef f(:\n    pass").await.unwrap();
    match result {
        ExecutionResult::Failure {
            error_kind,
            line,
            output,
            ..
        } => {
            assert_eq!(error_kind, ErrorKind::SyntaxError);
            assert_eq!(line, Some(2));
            assert_eq!(output, "");
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(rx.try_recv().is_err());
    assert_eq!(engine.state(id), Some(RunState::Idle));
}

#[tokio::test]
async fn test_indentation_error_is_classified() {
    let Some(engine) = engine() else { return };
    let (id, _rx) = session(&engine);

    let result = engine.execute(id, "if True:\nprint('x')").await.unwrap();
    assert_eq!(result.error_kind(), Some(&ErrorKind::IndentationError));
}

#[tokio::test]
async fn test_division_by_zero() {
    let Some(engine) = engine() else { return };
    let (id, _rx) = session(&engine);

    let code = "def divide_numbers(a, b):\n    return a / b\n\nprint('dividing')\ndivide_numbers(4, 0)";
    let result = engine.execute(id, code).await.unwrap();
    match result {
        ExecutionResult::Failure {
            error_kind,
            message,
            suggestion,
            traceback,
            output,
            line,
            ..
        } => {
            assert_eq!(error_kind, ErrorKind::ZeroDivisionError);
            assert_eq!(message, "division by zero");
            assert!(suggestion.starts_with("Avoid dividing by zero. Add a check for zero before division."));
            let traceback = traceback.unwrap();
            assert!(traceback.contains("divide_numbers(4, 0)"));
            assert!(traceback.contains("<snippet>"));
            assert_eq!(output, "dividing\n");
            assert_eq!(line, Some(2));
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_interactive_input_echo() {
    let Some(engine) = engine() else { return };
    let (id, mut rx) = session(&engine);

    let task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.execute(id, "x = input('n? ')\nprint(x)").await })
    };

    assert_eq!(
        rx.recv().await,
        Some(EngineEvent::InputRequested { prompt: "n? ".into() })
    );
    assert!(engine.supply_input(id, "5"));
    assert_eq!(rx.recv().await, Some(EngineEvent::Output(OutputEvent::stdout("5\n"))));

    let result = task.await.unwrap().unwrap();
    match result {
        ExecutionResult::Success {
            output,
            interactive,
            bindings,
            ..
        } => {
            assert_eq!(output, "5\n");
            assert!(interactive);
            assert_eq!(bindings.get("x").map(String::as_str), Some("5"));
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_interactive_helpers_and_loop() {
    let Some(engine) = engine() else { return };
    let (id, mut rx) = session(&engine);

    let code = "def show(total):\n    print('total:', total)\n\ntotal = 0\nwhile True:\n    n = int(input('n? '))\n    if n == 0:\n        break\n    total += n\n    show(total)";
    let task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.execute(id, code).await })
    };

    let mut shown = Vec::new();
    for reply in ["2", "3", "0"] {
        loop {
            match rx.recv().await {
                Some(EngineEvent::InputRequested { .. }) => break,
                Some(EngineEvent::Output(event)) => shown.push(event.content),
                None => panic!("session closed"),
            }
        }
        assert!(engine.supply_input(id, reply));
    }

    let result = task.await.unwrap().unwrap();
    assert!(result.is_success(), "{:?}", result);
    while let Ok(EngineEvent::Output(event)) = rx.try_recv() {
        shown.push(event.content);
    }
    assert_eq!(shown.concat(), "total: 2\ntotal: 5\n");
    assert_eq!(result.output(), "total: 2\ntotal: 5\n");
}

#[tokio::test]
async fn test_interactive_failure_maps_lines_to_the_snippet() {
    let Some(engine) = engine() else { return };
    let (id, mut rx) = session(&engine);

    let task = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.execute(id, "a = input()\nb = {}\nprint(b[a])").await })
    };
    assert!(matches!(rx.recv().await, Some(EngineEvent::InputRequested { .. })));
    engine.supply_input(id, "missing");

    let result = task.await.unwrap().unwrap();
    match result {
        ExecutionResult::Failure {
            error_kind, line, ..
        } => {
            assert_eq!(error_kind, ErrorKind::KeyError);
            assert_eq!(line, Some(3));
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_deadline_stops_runaway_loop() {
    if which::which("python3").is_err() {
        return;
    }
    let mut config = CodedashConfig::default();
    config.execution.run_timeout_secs = Some(1);
    let engine = ExecutionEngine::from_config(&config).unwrap();
    let (id, _rx) = session(&engine);

    let started = std::time::Instant::now();
    let result = engine.execute(id, "x = 0\nwhile x >= 0:\n    x += 1").await;
    assert!(result.is_err());
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(engine.state(id), Some(RunState::Idle));
}

#[tokio::test]
async fn test_constructor_prints_before_input() {
    let Some(engine) = engine() else { return };

    let code = "class Game:\n    def __init__(self):\n        print('Welcome to the game')\n\ngame = Game()\nname = input('name? ')\nprint('hi', name)";
    let (result, prompts, shown) = run_interactively(&engine, code, &["Ann"]).await;

    assert!(result.is_success(), "{:?}", result);
    assert_eq!(prompts, vec!["name? ".to_string()]);
    assert_eq!(shown, "Welcome to the game\nhi Ann\n");
    assert_eq!(result.output(), shown);
}

#[tokio::test]
async fn test_input_through_method_chains_and_callbacks() {
    let Some(engine) = engine() else { return };

    let code = "class Asker:\n    def ask(self, prompt):\n        return input(prompt)\n\nfirst = Asker().ask('a? ')\nitems = [Asker()]\nsecond = items[0].ask('b? ')\n\ndef shout(word):\n    return input(word + '? ').upper()\n\nloud = list(map(shout, ['c', 'd']))\nprint(first, second, loud)";
    let (result, prompts, shown) = run_interactively(&engine, code, &["1", "2", "x", "y"]).await;

    assert!(result.is_success(), "{:?}", result);
    assert_eq!(prompts, vec!["a? ", "b? ", "c? ", "d? "]);
    assert_eq!(shown, "1 2 ['X', 'Y']\n");
}

#[tokio::test]
async fn test_input_inside_an_f_string() {
    let Some(engine) = engine() else { return };

    let code = "print(f\"Hello {input('name? ')}\")";
    let (result, prompts, shown) = run_interactively(&engine, code, &["Ann"]).await;

    assert!(result.is_success(), "{:?}", result);
    assert_eq!(prompts, vec!["name? ".to_string()]);
    assert_eq!(shown, "Hello Ann\n");
}

#[tokio::test]
async fn test_interactive_runs_keep_module_globals() {
    let Some(engine) = engine() else { return };

    let code = "from math import *\ncount = 0\n\ndef bump():\n    global count\n    count += 1\n\nwhile True:\n    if input('again? ') != 'y':\n        break\n    bump()\nprint('count', count, floor(2.5))";
    let (result, prompts, shown) = run_interactively(&engine, code, &["y", "y", "n"]).await;

    assert_eq!(prompts.len(), 3);
    assert_eq!(shown, "count 2 2\n");
    match result {
        ExecutionResult::Success { bindings, .. } => {
            assert_eq!(bindings.get("count").map(String::as_str), Some("2"));
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_interactive_last_expression_is_echoed() {
    let Some(engine) = engine() else { return };

    let (result, _, shown) = run_interactively(&engine, "n = int(input('n? '))\nn * 2", &["21"]).await;

    assert!(result.is_success(), "{:?}", result);
    assert_eq!(shown, "42\n");
}

#[tokio::test]
async fn test_failures_keep_the_exception_name() {
    let Some(engine) = engine() else { return };
    let (id, _rx) = session(&engine);

    let result = engine.execute(id, "import definitely_not_installed_here").await.unwrap();
    match result {
        ExecutionResult::Failure {
            error_type,
            error_kind,
            line,
            ..
        } => {
            assert_eq!(error_type, "ModuleNotFoundError");
            assert_eq!(error_kind, ErrorKind::ImportError);
            assert_eq!(line, Some(1));
        }
        other => panic!("unexpected result {:?}", other),
    }

    let result = engine
        .execute(id, "count = 0\ndef bump():\n    count += 1\nbump()")
        .await
        .unwrap();
    match result {
        ExecutionResult::Failure {
            error_type, error_kind, ..
        } => {
            assert_eq!(error_type, "UnboundLocalError");
            assert_eq!(error_kind, ErrorKind::NameError);
        }
        other => panic!("unexpected result {:?}", other),
    }
}
